//! # stagelab Common Library
//!
//! Shared code for the stagelab crates:
//! - Error type
//! - Item and session status state machine
//! - Event types and EventBus
//! - Configuration file loading

pub mod config;
pub mod error;
pub mod events;
pub mod status;

pub use error::{Error, Result};
pub use status::{ItemStatus, SessionStatus};
