//! Core functionality for the Keystead key distribution service.
//!
//! This crate provides the error taxonomy, configuration, logging and clock
//! primitives shared by every other Keystead crate.

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::{Clock, ClockRef, ManualClock, SystemClock};
pub use config::{
    parse_hex32, AttestationMode, AttestationSection, ContractSection, LoggingSection,
    ServiceConfig, ServiceSection,
};
pub use error::{CoreError, IntegrityViolation, Result};
pub use logging::LogFormat;
