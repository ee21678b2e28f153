//! Configuration for the launcher
//!
//! - **preferences**: saved choices in a flat TOML file
//! - **merge**: detected ⊕ saved ⊕ command-line into one [`EffectiveConfig`](crate::types::EffectiveConfig)

pub mod merge;
pub mod preferences;

pub use merge::{merge, Overrides};
pub use preferences::{Preferences, PreferencesStore};
