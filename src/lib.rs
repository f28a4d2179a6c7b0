// src/lib.rs

//! matrec: incremental scrape, clean and extract pipeline for material data pages

pub mod error;
pub mod logging;
pub mod models;
pub mod pipeline;
#[cfg(feature = "server")]
pub mod server;
pub mod services;
pub mod storage;
pub mod utils;
