//! Ferrolite server and client library.
//!
//! Serves one Ferrolite engine over TCP with a JSON-lines protocol, so
//! tools written against the DynamoDB request model can share a local
//! engine instead of embedding their own.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::FerroliteClient;
pub use server::FerroliteServer;
