//! Dbsim library crate.
//!
//! Synthetic database activity for training behavior-analytics detectors:
//! agents, schedulers, scenarios and the harness that plays them.

pub mod behavior;
pub mod core;
pub mod formats;
pub mod harness;
pub mod obfuscation;
pub mod provenance;
pub mod scenarios;
pub mod scheduler;
pub mod sql;
pub mod stats;

pub use crate::core::agents;
pub use crate::core::clock;
pub use crate::core::config;
pub use crate::core::intent;
pub use crate::core::traits;
