//! tlsaudit - TLS client auditing
//!
//! This crate poses as a TLS server with deliberately weak or untrusted
//! parameters and records how a connecting client reacts: whether it
//! completes handshakes it should refuse, and whether it then sends data.
//!
//! - `forge` manufactures certificates and keys, broken on request
//! - `tls` configures and drives the server side of OpenSSL handshakes
//! - `transport` listens, speaks STARTTLS, and observes one session
//! - `scenario` holds the test catalog and turns observations into results

pub mod config;
pub mod forge;
pub mod report;
pub mod scenario;
pub mod tls;
pub mod transport;

pub use scenario::ResultCode;
pub use transport::Wait;
