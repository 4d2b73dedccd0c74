//! Sibling order keys.
//!
//! Siblings are sorted by an opaque string key drawn from a densely ordered
//! base-36 key space. A new key strictly between any two neighbors can always
//! be produced without touching other siblings, so inserting is O(1) in
//! writes. Keys grow by roughly one digit each time the same gap is split
//! repeatedly; [`keys_between`] spreads bulk insertions by bisection so their
//! length only grows logarithmically.
//!
//! ## Key Format
//!
//! A key is a non-empty string over `0-9a-z` that does not end in `0`. The
//! trailing-zero rule guarantees there is always room below any key.

use thiserror::Error;

/// Key alphabet, in sort order.
pub const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

const BASE: usize = DIGITS.len();

/// Errors from order key generation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderKeyError {
    /// The key is empty, contains characters outside the alphabet, or ends
    /// in the minimal digit.
    #[error("invalid order key {0:?}")]
    Invalid(String),

    /// The lower bound does not sort before the upper bound.
    #[error("order keys out of order: {lo:?} must sort before {hi:?}")]
    OutOfOrder { lo: String, hi: String },
}

/// Check that a key is well formed.
pub fn validate(key: &str) -> Result<(), OrderKeyError> {
    let bytes = key.as_bytes();
    let well_formed = !bytes.is_empty()
        && bytes.iter().all(|b| DIGITS.contains(b))
        && bytes.last() != Some(&DIGITS[0]);
    if well_formed {
        Ok(())
    } else {
        Err(OrderKeyError::Invalid(key.to_string()))
    }
}

fn digit_value(b: u8) -> usize {
    // Callers validate keys first, so every byte is in the alphabet.
    DIGITS.iter().position(|d| *d == b).unwrap_or(0)
}

fn midpoint(a: &[u8], b: Option<&[u8]>) -> Vec<u8> {
    if let Some(b) = b {
        let mut n = 0;
        while n < b.len() && a.get(n).copied().unwrap_or(DIGITS[0]) == b[n] {
            n += 1;
        }
        if n > 0 {
            let rest_a = if n < a.len() { &a[n..] } else { &[][..] };
            let mut out = b[..n].to_vec();
            out.extend(midpoint(rest_a, Some(&b[n..])));
            return out;
        }
    }

    let digit_a = a.first().map(|d| digit_value(*d)).unwrap_or(0);
    let digit_b = match b {
        Some(b) => b.first().map(|d| digit_value(*d)).unwrap_or(BASE),
        None => BASE,
    };

    if digit_b - digit_a > 1 {
        vec![DIGITS[(digit_a + digit_b + 1) / 2]]
    } else {
        match b {
            Some(b) if b.len() > 1 => b[..1].to_vec(),
            _ => {
                let rest_a = if a.len() > 1 { &a[1..] } else { &[][..] };
                let mut out = vec![DIGITS[digit_a]];
                out.extend(midpoint(rest_a, None));
                out
            }
        }
    }
}

/// Generate a key strictly between `lo` and `hi`.
///
/// `None` for `lo` sorts the new key before every existing key; `None` for
/// `hi` sorts it after every existing key.
pub fn key_between(lo: Option<&str>, hi: Option<&str>) -> Result<String, OrderKeyError> {
    if let Some(lo) = lo {
        validate(lo)?;
    }
    if let Some(hi) = hi {
        validate(hi)?;
    }
    if let (Some(lo), Some(hi)) = (lo, hi) {
        if lo >= hi {
            return Err(OrderKeyError::OutOfOrder {
                lo: lo.to_string(),
                hi: hi.to_string(),
            });
        }
    }

    let key = midpoint(lo.unwrap_or("").as_bytes(), hi.map(str::as_bytes));
    // The alphabet is ASCII, so the bytes are valid UTF-8.
    Ok(key.into_iter().map(char::from).collect())
}

/// Generate `n` ascending keys strictly between `lo` and `hi`.
pub fn keys_between(
    lo: Option<&str>,
    hi: Option<&str>,
    n: usize,
) -> Result<Vec<String>, OrderKeyError> {
    match n {
        0 => Ok(Vec::new()),
        1 => Ok(vec![key_between(lo, hi)?]),
        _ => {
            let mid_index = n / 2;
            let mid = key_between(lo, hi)?;
            let mut keys = keys_between(lo, Some(&mid), mid_index)?;
            let right = keys_between(Some(&mid), hi, n - mid_index - 1)?;
            keys.push(mid);
            keys.extend(right);
            Ok(keys)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
