// src/lib.rs

//! Catalog synchronizer library.
//!
//! Mirrors a content catalog served by two independent sources into a
//! deduplicated local index, estimates missing publish times, and exports or
//! bulk-loads the result.

pub mod engine;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

pub use engine::SyncEngine;
