//! # MIZDB Common Library
//!
//! Shared code for the MIZDB maintenance tools including:
//! - Error type
//! - Configuration loading
//! - Database connection and schema introspection
//! - Dynamic column values

pub mod config;
pub mod db;
pub mod error;
pub mod value;

pub use error::{Error, Result};
pub use value::Value;
