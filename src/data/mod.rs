//! Data layer module
//!
//! Handles all persistence:
//! - SQLite database operations (sqlx)
//! - Row models and domain enums

mod database;
mod models;

pub use database::Database;
pub use models::*;

#[cfg(test)]
mod database_test;
