//! Courier Core - shared service infrastructure
//!
//! This crate provides:
//! - The standard process lifecycle trait every Courier binary implements
//! - Cross-cutting domain types (RequestContext, Timestamp)
//! - Error handling utilities
//! - Generic environment-driven configuration

pub mod config;
pub mod domain;
pub mod error;
pub mod service;

pub use config::ServiceConfig;
pub use domain::*;
pub use error::{CourierError, Result};
pub use service::{CourierRuntime, CourierService, DependencyStatus, HealthStatus, ReadinessStatus};
