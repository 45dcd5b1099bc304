//! Berth - compose descriptor toolkit
//!
//! Berth reads Docker Compose descriptors and works out what an external
//! container runtime would do with them. It provides:
//!
//! - A typed, order-preserving model of the descriptor
//! - Variable interpolation and `.env` loading
//! - Override-file merging
//! - Port, volume and dependency validation
//! - Activation plans (start waves, containers, mounts, labels)
//! - Concurrent host preflight checks
//!
//! Berth never builds images or starts containers.

pub mod compose;
pub mod error;

pub use error::{BerthError, Result};
