//! Fare estimates and driver hotspot checks backed by two pre-trained
//! TorchScript models.

pub mod config;
pub mod error;
pub mod features;
pub mod model;
pub mod server;
pub mod session;
pub mod types;

pub use error::{CopilotError, Result};
