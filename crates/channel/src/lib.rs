//! Attestation-gated TLS channels and stream relaying.
//!
//! # Core Capabilities
//!
//! - **Attested establishment**: wrap a raw stream in mutually
//!   authenticated TLS whose trust decision is an attestation policy
//! - **Plaintext hand-off**: expose the decrypted stream as an in-memory
//!   duplex pipe once the peer is verified
//! - **Relay**: generic bidirectional splice between two streams

pub mod error;
pub mod relay;
pub mod tls;
pub mod verifier;

pub use error::{ChannelError, ChannelResult};
pub use relay::{relay, spawn_relay, RelayEnd, RelayStats};
pub use tls::{
    wrap_tls_client, wrap_tls_server, AttestedChannel, AttestedTlsContext, ChannelOptions,
    DEFAULT_HANDSHAKE_TIMEOUT,
};
pub use verifier::{AttestedClientVerifier, AttestedServerVerifier, ConnectionAddrs, PolicyAdapter};
