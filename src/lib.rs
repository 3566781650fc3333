//! Rolling statistics, active region detection and multi-rate
//! synchronization of welding sensor recordings.

pub mod cache;
pub mod channel;
pub mod config;
pub mod error;
pub mod manager;
pub mod region;
pub mod stats;
pub mod sync;
pub mod synth;
pub mod utils;
