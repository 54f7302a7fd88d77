//! Base table storage and durability.
//!
//! Items live in memory ([`table::TableData`]). In durable mode every change
//! is first appended to a write-ahead log ([`wal`]), and the whole state is
//! periodically folded into a snapshot ([`snapshot`]) so the log stays short.

pub mod durable;
pub mod lock;
pub mod snapshot;
pub mod table;
pub mod wal;
