//! Storage: table file persistence and directory locking.

pub mod lock;
pub mod persistence;
