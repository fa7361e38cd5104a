//! # RelayKV Sync Client
//!
//! Purpose: Provide the blocking, pooled RESP2 connection layer that the
//! access layer in `rkv-dao` leases connections from.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Explicit Pipelining**: `send`/`flush`/`receive` expose batching without
//!    hidden async machinery; `exec` is the single round trip.
//! 3. **Minimal Allocation**: Reuse buffers for RESP framing and parsing.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod error;
mod pool;
pub mod resp;

pub use error::{ClientError, ClientResult};
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use resp::RespValue;
