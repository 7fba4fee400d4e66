//! Shared types: agents, intents, configuration, the virtual clock and the
//! collaborator traits implemented by translators and executors.

pub mod agents;
pub mod clock;
pub mod config;
pub mod intent;
pub mod traits;
