//! Evidence model
//!
//! Common attribute vocabulary, raw probe output shapes and the normalizer
//! that isolates probe-specific formats from the correlator.

mod normalizer;
pub mod signatures;
mod types;

pub use normalizer::{canonical_mac, clean_value, normalize};
pub use types::*;
