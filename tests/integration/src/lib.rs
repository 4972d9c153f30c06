//! End-to-end tests for the Keystead key manager
//!
//! This test suite validates:
//! - Key distribution to attested proxies and workers over TLS
//! - Rejection of peers whose image hash the contract does not allow
//! - Attestation policy failures during the handshake
//! - Detection of tampered persisted state at startup

pub mod test_utils;

#[cfg(test)]
mod key_distribution_tests;

#[cfg(test)]
mod attestation_boundary_tests;

#[cfg(test)]
mod tamper_detection_tests;
