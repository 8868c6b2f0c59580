//! Pulse core crate - shared domain types, configuration, and errors.
//!
//! Every other crate in the workspace depends on this one for the
//! Channel / Publication / Story model, the TOML configuration tree and
//! the category canonicalization table.

pub mod category;
pub mod config;
pub mod error;
pub mod types;

pub use category::{canonicalize, CanonicalCategory};
pub use config::{ClusteringMode, PulseConfig};
pub use error::{PulseError, Result};
pub use types::*;
