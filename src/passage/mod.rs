//! Passage generation boundary and fallback handling

pub mod provider;

pub use provider::{FallbackPassageSource, PassageProvider, StaticPassageProvider, PLACEHOLDER_PASSAGE};
