//! Narra shared types and utilities
//!
//! Row types, enums, and database plumbing used by every Narra service.

pub mod db;
pub mod types;

pub use db::*;
pub use types::*;
