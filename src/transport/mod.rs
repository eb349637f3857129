//! # Transport Layer
//!
//! Connections between peer devices and the TLS sessions layered on them.
//!
//! ## Components
//! - **Acceptor**: Inbound TCP listener with a queue of unclaimed connections
//! - **Connection**: Duplex stream that can be upgraded to TLS in place
//! - **TLS**: Session settings, trust modes and handshake execution
//! - **Trust Store**: Pinned peer certificates keyed by fingerprint
//!
//! ## Trust Model
//! Every device issues its own certificate. In strict mode a peer is trusted
//! only if its exact certificate was pinned beforehand and names the expected
//! device; opportunistic mode records whatever the peer presents.

pub mod acceptor;
pub mod connection;
pub mod tls;
pub mod trust_store;
pub(crate) mod verifier;
