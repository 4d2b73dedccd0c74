//! # CLI UI Module
//!
//! Styling and formatting layer for grove CLI output.
//!
//! ## Design Principles
//!
//! 1. **Scannable**: success or failure is visible at a glance
//! 2. **Accessible**: works without colors (respects `NO_COLOR`)
//! 3. **Scriptable**: machine-parseable with the `--json` flag
//!
//! ## Module Structure
//!
//! - `color`: Color mode detection and terminal capability checks
//! - `style`: Message types, prefixes, and styling functions
//! - `format`: Utility formatters (time, truncation, outline trees)
//! - `progress`: Spinners, bars and step trees for long operations

pub mod color;
pub mod format;
pub mod progress;
pub mod style;

// Re-export main types for convenient access
pub use color::ColorMode;
pub use progress::{Progress, ProgressMode, StepTree};
pub use style::{MessageType, Style};
