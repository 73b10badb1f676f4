//! History storage.

pub mod actor;
pub mod db;

pub use actor::DbHandle;
