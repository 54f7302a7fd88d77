//! Simulated provisioned throughput.
//!
//! Each provisioned table and global index owns a read and a write token
//! bucket refilled at its provisioned units per second. Buckets bank up to
//! `burst_seconds` of unused capacity. Reads are admitted while the bucket
//! is positive and charged their real cost afterwards; writes are charged
//! up front.

use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, WriteError};
use crate::types::ProvisionedThroughput;

const READ_UNIT_BYTES: usize = 4 * 1024;
const WRITE_UNIT_BYTES: usize = 1024;

/// Capacity units charged for reading `bytes`.
///
/// Eventually consistent reads cost half.
pub fn read_units(bytes: usize, consistent: bool) -> f64 {
    let units = bytes.div_ceil(READ_UNIT_BYTES).max(1) as f64;
    if consistent { units } else { units / 2.0 }
}

/// Capacity units charged for writing an item of `bytes`.
pub fn write_units(bytes: usize) -> f64 {
    bytes.div_ceil(WRITE_UNIT_BYTES).max(1) as f64
}

/// Capacity consumed by one operation, reported when requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumedCapacity {
    pub table_name: String,
    pub capacity_units: f64,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    rate: f64,
    capacity: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn new(rate: u64, burst_seconds: u64) -> Self {
        let rate = rate as f64;
        let capacity = (rate * burst_seconds.max(1) as f64).max(rate);
        Self {
            tokens: capacity,
            rate,
            capacity,
            refilled_at: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.refilled_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.refilled_at = now;
    }
}

/// Read and write buckets for one table or global index.
#[derive(Debug)]
pub struct ThroughputLimiter {
    name: String,
    read: Mutex<Bucket>,
    write: Mutex<Bucket>,
}

impl ThroughputLimiter {
    pub fn new(name: impl Into<String>, provisioned: ProvisionedThroughput, burst_seconds: u64) -> Self {
        Self {
            name: name.into(),
            read: Mutex::new(Bucket::new(provisioned.read_capacity_units, burst_seconds)),
            write: Mutex::new(Bucket::new(provisioned.write_capacity_units, burst_seconds)),
        }
    }

    fn exceeded(&self) -> Error {
        WriteError::ThroughputExceeded(self.name.clone()).into()
    }

    /// Fail unless some read capacity is left.
    pub fn admit_read(&self) -> Result<(), Error> {
        let mut bucket = self.read.lock();
        bucket.refill();
        if bucket.tokens <= 0.0 {
            return Err(self.exceeded());
        }
        Ok(())
    }

    /// Charge a completed read. May leave the bucket in debt.
    pub fn charge_read(&self, units: f64) {
        let mut bucket = self.read.lock();
        bucket.refill();
        bucket.tokens -= units;
    }

    /// Take `units` of write capacity, or fail without taking any.
    pub fn consume_write(&self, units: f64) -> Result<(), Error> {
        let mut bucket = self.write.lock();
        bucket.refill();
        if bucket.tokens < units {
            return Err(self.exceeded());
        }
        bucket.tokens -= units;
        Ok(())
    }

    /// Give back write capacity taken for a write that was then rejected.
    pub fn refund_write(&self, units: f64) {
        let mut bucket = self.write.lock();
        bucket.tokens = (bucket.tokens + units).min(bucket.capacity);
    }
}
