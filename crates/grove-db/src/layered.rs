//! Copy-on-write ordered map: a shared base plus a novelty layer.
//!
//! Cloning a [`Layered`] copies two `Arc`s. Writes land in the novelty
//! layer, which is folded into the base once it outgrows a threshold, so a
//! commit copies the recent novelty rather than the whole map. Readers see
//! novelty first and fall through to the base.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::iter::Peekable;
use std::ops::RangeBounds;
use std::sync::Arc;

/// Novelty below this size is never folded.
const MIN_NOVELTY: usize = 1024;

#[derive(Debug, Clone)]
pub(crate) struct Layered<K, V> {
    base: Arc<BTreeMap<K, V>>,
    /// `None` hides a key still present in the base.
    novelty: Arc<BTreeMap<K, Option<V>>>,
}

impl<K, V> Default for Layered<K, V> {
    fn default() -> Self {
        Self {
            base: Arc::default(),
            novelty: Arc::default(),
        }
    }
}

impl<K: Ord + Clone, V: Clone> Layered<K, V> {
    pub(crate) fn get(&self, key: &K) -> Option<&V> {
        match self.novelty.get(key) {
            Some(slot) => slot.as_ref(),
            None => self.base.get(key),
        }
    }

    pub(crate) fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Novelty slot for `key`, seeded from the base on first write.
    fn slot(&mut self, key: K) -> &mut Option<V> {
        let base = &self.base;
        Arc::make_mut(&mut self.novelty)
            .entry(key)
            .or_insert_with_key(|k| base.get(k).cloned())
    }

    pub(crate) fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if !self.contains_key(key) {
            return None;
        }
        self.slot(key.clone()).as_mut()
    }

    pub(crate) fn get_or_default(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        self.slot(key).get_or_insert_with(V::default)
    }

    pub(crate) fn insert(&mut self, key: K, value: V) {
        Arc::make_mut(&mut self.novelty).insert(key, Some(value));
    }

    pub(crate) fn remove(&mut self, key: &K) {
        if self.base.contains_key(key) {
            Arc::make_mut(&mut self.novelty).insert(key.clone(), None);
        } else if self.novelty.contains_key(key) {
            Arc::make_mut(&mut self.novelty).remove(key);
        }
    }

    /// Live entries in `range`, in key order.
    pub(crate) fn range<R>(&self, range: R) -> impl Iterator<Item = (&K, &V)>
    where
        R: RangeBounds<K> + Clone,
    {
        Merge {
            base: self.base.range(range.clone()).peekable(),
            novelty: self.novelty.range(range).peekable(),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.range(..)
    }

    /// Fold the novelty into the base once it is large enough.
    ///
    /// The fold copies the base when a snapshot still shares it; the
    /// threshold grows with the base so that copy stays amortized.
    pub(crate) fn compact(&mut self) {
        let limit = MIN_NOVELTY.max(self.base.len().isqrt());
        if self.novelty.len() <= limit {
            return;
        }
        let novelty = std::mem::take(&mut self.novelty);
        let base = Arc::make_mut(&mut self.base);
        for (key, slot) in novelty.iter() {
            match slot {
                Some(value) => {
                    base.insert(key.clone(), value.clone());
                }
                None => {
                    base.remove(key);
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn shares_base_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.base, &other.base)
    }

    #[cfg(test)]
    pub(crate) fn novelty_len(&self) -> usize {
        self.novelty.len()
    }
}

/// Ordered merge of the two layers; novelty shadows the base.
struct Merge<B: Iterator, N: Iterator> {
    base: Peekable<B>,
    novelty: Peekable<N>,
}

impl<'a, K, V, B, N> Iterator for Merge<B, N>
where
    K: Ord + 'a,
    V: 'a,
    B: Iterator<Item = (&'a K, &'a V)>,
    N: Iterator<Item = (&'a K, &'a Option<V>)>,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let order = match (self.base.peek(), self.novelty.peek()) {
                (None, None) => return None,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some((b, _)), Some((n, _))) => b.cmp(n),
            };
            match order {
                Ordering::Less => return self.base.next(),
                Ordering::Equal => {
                    self.base.next();
                }
                Ordering::Greater => {}
            }
            if let Some((key, Some(value))) = self.novelty.next() {
                return Some((key, value));
            }
        }
    }
}
