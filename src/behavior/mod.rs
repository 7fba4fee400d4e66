//! Role transition tables, requirement tables and the Markov model that
//! steps agents through them.

pub mod catalog;
pub mod model;
pub mod table;

pub use model::BehaviorModel;
pub use table::{BehaviorSpec, BehaviorTables, TableError};
