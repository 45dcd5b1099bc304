//! Docker Compose descriptor handling
//!
//! This module loads compose files into a typed model, validates them, and
//! derives the activation plan an external runtime would follow.

pub mod config;
pub mod dockerfile;
pub mod env;
pub mod interpolate;
pub mod parser;
pub mod plan;
pub mod ports;
pub mod preflight;
pub mod project;
pub mod validate;
pub mod volumes;

pub use config::{ComposeConfig, Provisioning, ServiceConfig};
pub use parser::ComposeParser;
pub use plan::ActivationPlan;
pub use preflight::PreflightReport;
pub use project::{Project, ProjectOptions};
pub use validate::{Diagnostic, Diagnostics, Severity, Validator};
