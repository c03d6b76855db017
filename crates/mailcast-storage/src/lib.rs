//! Mailcast Storage - Database models and repositories
//!
//! This crate provides the PostgreSQL-backed repositories used by the
//! dispatch core, and an in-memory store implementing the same traits.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use memory::MemoryStore;
pub use models::*;
pub use repository::*;
