//! prodsearch-core - Core types and traits for product search
//!
//! This crate provides the foundational types, traits, and error handling
//! shared by the stores, the embedder, and the hybrid ranker.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{Result, SearchError};
pub use traits::*;
pub use types::*;
