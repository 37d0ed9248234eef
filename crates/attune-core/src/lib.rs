//! Shared types, config, errors, and the profile store for Attune.

pub mod config;
pub mod error;
pub mod modules;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{AttuneError, Result};
pub use store::ProfileStore;
