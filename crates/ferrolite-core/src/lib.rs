//! # Ferrolite
//!
//! A local, in-process emulation of the DynamoDB data plane and table
//! lifecycle, for development and testing.
//!
//! Ferrolite keeps every table in memory, optionally backed by a write-ahead
//! log and snapshots on disk. It maintains global and local secondary indexes,
//! simulates provisioned throughput and table state transitions, and maps
//! every failure onto the DynamoDB error taxonomy.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ferrolite_core::api::{ConditionExpr, Engine, UpdateAction};
//! use ferrolite_core::types::KeyType;
//! use ferrolite_core::value::AttributeValue;
//!
//! let engine = Engine::in_memory().unwrap();
//!
//! engine
//!     .create_table("users")
//!     .partition_key("user_id", KeyType::String)
//!     .execute()
//!     .unwrap();
//!
//! engine
//!     .put_item("users")
//!     .attr("user_id", AttributeValue::s("alice"))
//!     .attr("name", AttributeValue::s("Alice"))
//!     .condition(ConditionExpr::not_exists("user_id"))
//!     .execute()
//!     .unwrap();
//!
//! engine
//!     .update_item("users")
//!     .key("user_id", AttributeValue::s("alice"))
//!     .action(UpdateAction::add("logins", AttributeValue::n(1)))
//!     .execute()
//!     .unwrap();
//!
//! let item = engine
//!     .get_item("users")
//!     .key("user_id", AttributeValue::s("alice"))
//!     .consistent_read(true)
//!     .execute()
//!     .unwrap();
//! assert_eq!(item.unwrap()["name"], AttributeValue::s("Alice"));
//! ```

pub mod api;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod encoding;
pub mod error;
pub mod index;
pub mod storage;
pub mod throughput;
pub mod types;
pub mod value;

pub use api::Engine;
pub use config::EngineConfig;
pub use error::{Error, ErrorKind};
