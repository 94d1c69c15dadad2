// src/lib.rs

//! sitesync library: relays media from content sites into object storage
//! and syncs the resulting records to a backend.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub mod testing;
