//! # RelayKV Access Layer
//!
//! Purpose: One storage-agnostic get/set/delete/scan/script contract over a
//! pooled, pipelined RESP connection, with flat and grouped addressing.
//!
//! ## Design Principles
//! 1. **One Lease Per Operation**: Every call leases its own connection,
//!    selects the database once, and returns the connection when done.
//! 2. **Explicit Pipelining**: Batches queue N commands, flush once, and read
//!    N replies in submission order.
//! 3. **Typed Seams**: Writes take a closed `Value` type; replies are decoded
//!    by a name-keyed `ReplyRegistry` into a closed `Reply` type.
//! 4. **Absence Is Not Failure**: Nil replies become `None`; transport and
//!    decode failures stay distinct errors.

mod batch;
mod config;
mod dao;
mod error;
mod namespace;
mod registry;
mod scan;
mod script;
mod value;

pub use batch::BatchGroups;
pub use config::{DaoConfig, DaoOptions, KIND};
pub use dao::RedisDao;
pub use error::{DaoError, DaoResult, DecodeError};
pub use namespace::NamespaceResolver;
pub use registry::{DecodeRule, Reply, ReplyRegistry};
pub use scan::ScanPage;
pub use value::{Marshal, Options, Record, Unmarshal, Value};
