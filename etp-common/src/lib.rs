//! # ETP Common Library
//!
//! Shared code for the ETP scoring services:
//! - Error type shared by configuration and storage code
//! - Bootstrap configuration (CLI > environment > TOML > defaults)
//! - Pipeline event types and the broadcast `EventBus`
//! - Server-Sent Events helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
pub use events::{EventBus, PipelineEvent};
