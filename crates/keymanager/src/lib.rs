//! Key lifecycle and distribution for Keystead.
//!
//! This crate holds the signing keys handed to proxies and workers. It
//! rotates them on a schedule, persists them in the signed record store and
//! serves them over attested TLS to peers whose image hash the contract
//! allows.
//!
//! # Components
//!
//! - [`KeyLifecycleManager`]: live key set, expiry and generation
//! - [`KeyQueryService`]: role queries gated by attested identity
//! - [`AdminOps`]: operator commands and [`StatusReport`]
//! - [`KeyManagerService`]: maintenance ticker plus listener
//! - [`KeyManagerClient`]: what proxies and workers run

pub mod admin;
pub mod client;
pub mod config_source;
pub mod error;
pub mod key;
pub mod lifecycle;
pub mod protocol;
pub mod query;
pub mod service;

pub use admin::{AdminOps, KeyStatus, StatusReport, SyncState};
pub use client::{KeyManagerClient, KeyManagerConnection};
pub use config_source::{ConfigSource, ConfigSourceRef, ContractSnapshot, StaticConfigSource};
pub use error::{KeyManagerError, KeyManagerResult};
pub use key::{KeyRecord, Role, KEY_TTL_SECS};
pub use lifecycle::{with_manager_blocking, KeyLifecycleManager, ReconcileReport, SharedManager};
pub use protocol::{ErrorCode, KeyRequest, KeyResponse, PrivateKeyEntry, MAX_FRAME_LEN};
pub use query::{KeyQueryService, QueryError};
pub use service::{KeyManagerService, DEFAULT_RECONCILE_INTERVAL};
