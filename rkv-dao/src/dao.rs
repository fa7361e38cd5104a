//! # Store Adapter
//!
//! Purpose: Present get/set/delete/exists/keys over two addressing modes on
//! top of a pooled RESP connection.
//!
//! ## Addressing
//!
//! ```text
//! flat     (group = None)        id ─────────▶ top-level key, or hash named id
//! grouped  (group = Some(g))     (g, id) ────▶ field id of the hash named g
//! ```
//!
//! ## Operation Flow
//!
//! 1. Lease a connection from the pool (created lazily on first use).
//! 2. `SELECT` the index the database name resolves to (exactly once).
//! 3. Branch on flat vs grouped and build the command.
//! 4. Decode the reply through the `ReplyRegistry`.
//!
//! Batch, scan and script entry points live in `batch.rs`, `scan.rs` and
//! `script.rs` as further `impl RedisDao` blocks.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rkv_client::{ConnectionPool, PooledConnection};
use serde_json::{Map, Value as Json};
use tracing::{debug, info};

use crate::config::DaoConfig;
use crate::error::{DaoError, DaoResult, DecodeError};
use crate::namespace::NamespaceResolver;
use crate::registry::{Reply, ReplyRegistry};
use crate::value::{text_record, to_wire, Options, Record, Unmarshal, Value, Wire};

/// Page size hint used when `keys` enumerates a hash with a pattern.
const KEYS_SCAN_COUNT: usize = 256;

enum PoolSlot {
    /// Configured (or not) but no pool built yet.
    Idle,
    Open(ConnectionPool),
    /// `close` was called; only `connect` reopens.
    Closed,
}

/// Key-value access layer over one logical store instance.
pub struct RedisDao {
    config: RwLock<Option<DaoConfig>>,
    pool: Mutex<PoolSlot>,
    namespaces: NamespaceResolver,
    registry: Arc<ReplyRegistry>,
}

impl Default for RedisDao {
    fn default() -> Self {
        Self::new()
    }
}

impl RedisDao {
    /// Creates an unconfigured adapter using the shared decoder table.
    pub fn new() -> Self {
        Self::with_registry(ReplyRegistry::shared())
    }

    /// Creates an unconfigured adapter with a caller-provided decoder table.
    pub fn with_registry(registry: Arc<ReplyRegistry>) -> Self {
        RedisDao {
            config: RwLock::new(None),
            pool: Mutex::new(PoolSlot::Idle),
            namespaces: NamespaceResolver::default(),
            registry,
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Validates and stores connection parameters.
    ///
    /// Any existing pool is closed; the next operation dials with the new
    /// settings. The namespace table is re-seeded from `options.databases`.
    #[allow(clippy::too_many_arguments)]
    pub fn configure(
        &self,
        name: &str,
        kind: &str,
        host: &str,
        port: u16,
        user: &str,
        pass: &str,
        database: &str,
        options: &Map<String, Json>,
    ) -> DaoResult<()> {
        let config = DaoConfig::new(name, kind, host, port, user, pass, database, options)?;

        let mut seeds: Vec<_> = config.options.databases.iter().collect();
        seeds.sort();
        self.namespaces.reset(config.default_index);
        for (db, index) in seeds {
            self.namespaces.define(db, *index, true, false)?;
        }

        info!(
            dao = name,
            addr = %config.addr(),
            default_index = config.default_index,
            "store configured"
        );
        *self.config.write() = Some(config);
        let previous = std::mem::replace(&mut *self.pool.lock(), PoolSlot::Idle);
        if let PoolSlot::Open(pool) = previous {
            pool.close();
        }
        Ok(())
    }

    /// Builds the pool if needed and verifies the store answers `PING`.
    pub fn connect(&self) -> DaoResult<()> {
        let pool = {
            let mut slot = self.pool.lock();
            if matches!(*slot, PoolSlot::Closed) {
                *slot = PoolSlot::Idle;
            }
            self.open_pool(&mut slot)?
        };
        let mut conn = pool.acquire()?;
        self.registry.decode("PING", conn.exec(&["PING"]))?;
        info!(addr = %pool.config().addr, "connected");
        Ok(())
    }

    /// Closes the pool. Operations fail with `NotConnected` until `connect`.
    pub fn close(&self) -> DaoResult<()> {
        let previous = std::mem::replace(&mut *self.pool.lock(), PoolSlot::Closed);
        if let PoolSlot::Open(pool) = previous {
            pool.close();
            info!(addr = %pool.config().addr, "closed");
        }
        Ok(())
    }

    /// True when a pool is open and a leased connection answers `PING`.
    pub fn is_connected(&self) -> bool {
        let pool = match &*self.pool.lock() {
            PoolSlot::Open(pool) => pool.clone(),
            _ => return false,
        };
        let mut conn = match pool.acquire() {
            Ok(conn) => conn,
            Err(_) => return false,
        };
        self.registry.decode("PING", conn.exec(&["PING"])).is_ok()
    }

    /// Leases a raw connection already switched to `db`.
    pub fn agent(&self, db: &str) -> DaoResult<PooledConnection> {
        self.lease(db)
    }

    /// Snapshot of the active configuration.
    pub fn config(&self) -> Option<DaoConfig> {
        self.config.read().clone()
    }

    // -------------------------------------------------------------------------
    // Namespaces
    // -------------------------------------------------------------------------

    /// Issues one `SELECT` for the index `name` resolves to.
    pub fn select_database(&self, conn: &mut PooledConnection, name: &str) -> DaoResult<u32> {
        let index = self.namespaces.resolve(name);
        let index_arg = index.to_string();
        self.registry
            .decode("SELECT", conn.exec(&["SELECT", index_arg.as_str()]))?;
        Ok(index)
    }

    /// Maps database `name` to store `index`.
    pub fn define_database(
        &self,
        name: &str,
        index: u32,
        create: bool,
        override_existing: bool,
    ) -> DaoResult<bool> {
        self.namespaces.define(name, index, create, override_existing)
    }

    pub fn database_exists(&self, name: &str) -> bool {
        self.namespaces.contains(name)
    }

    /// Defined database names and their indexes, sorted by name.
    pub fn databases(&self) -> Vec<(String, u32)> {
        self.namespaces.snapshot()
    }

    /// Asks the store whether the group's hash exists.
    pub fn group_exists(&self, db: &str, group: &str) -> DaoResult<bool> {
        let mut conn = self.lease(db)?;
        let reply = self.registry.decode("EXISTS", conn.exec(&["EXISTS", group]))?;
        Ok(reply.as_int().unwrap_or(0) > 0)
    }

    // -------------------------------------------------------------------------
    // Single-key operations
    // -------------------------------------------------------------------------

    /// Reads one record; a missing id is `Ok(None)`.
    pub fn get(
        &self,
        db: &str,
        group: Option<&str>,
        id: &str,
        opts: &Options,
    ) -> DaoResult<Option<Record>> {
        let group = group_name(group);
        debug!(database = db, group = ?group, id, "get");
        let command = read_command(group, id, opts.unmarshal);
        let mut conn = self.lease(db)?;
        let reply = self.registry.decode(command.name, conn.exec(&command.parts()));
        into_record(reply, command.name, opts.unmarshal)
    }

    /// Writes one record.
    ///
    /// The value is marshalled before a connection is leased, so marshal
    /// failures never reach the store.
    pub fn update(
        &self,
        db: &str,
        group: Option<&str>,
        id: &str,
        value: &Value,
        opts: &Options,
    ) -> DaoResult<Reply> {
        let group = group_name(group);
        debug!(database = db, group = ?group, id, marshal = ?opts.marshal, "update");
        let command = write_command(group, id, value, opts)?;
        let mut conn = self.lease(db)?;
        self.registry.decode(command.name, conn.exec(&command.parts()))
    }

    /// Deletes one key (flat) or field (grouped); returns how many went away.
    pub fn delete(&self, db: &str, group: Option<&str>, id: &str) -> DaoResult<i64> {
        let group = group_name(group);
        debug!(database = db, group = ?group, id, "delete");
        let command = delete_command(group, id);
        let mut conn = self.lease(db)?;
        let reply = self.registry.decode(command.name, conn.exec(&command.parts()))?;
        Ok(reply.as_int().unwrap_or(0))
    }

    /// Counts how many of `ids` exist.
    ///
    /// Flat ids take one `EXISTS` round trip; grouped ids pipeline one
    /// `HEXISTS` per id on the same connection.
    pub fn exists(&self, db: &str, group: Option<&str>, ids: &[&str]) -> DaoResult<i64> {
        let group = group_name(group);
        debug!(database = db, group = ?group, ids = ids.len(), "exists");
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lease(db)?;
        match group {
            None => {
                let mut parts = Vec::with_capacity(ids.len() + 1);
                parts.push("EXISTS");
                parts.extend_from_slice(ids);
                let reply = self.registry.decode("EXISTS", conn.exec(&parts))?;
                Ok(reply.as_int().unwrap_or(0))
            }
            Some(group) => {
                for &id in ids {
                    conn.send(&["HEXISTS", group, id])?;
                }
                conn.flush()?;
                let mut count = 0;
                for _ in ids {
                    let reply = self.registry.decode("HEXISTS", conn.receive())?;
                    if reply.as_bool() == Some(true) {
                        count += 1;
                    }
                }
                Ok(count)
            }
        }
    }

    /// Lists key names (flat) or field names (grouped) matching `wildcard`.
    ///
    /// An empty wildcard means `*`. Grouped patterns other than `*` are
    /// matched by the store through `HSCAN ... MATCH`.
    pub fn keys(&self, db: &str, group: Option<&str>, wildcard: &str) -> DaoResult<Vec<String>> {
        let group = group_name(group);
        let wildcard = if wildcard.is_empty() { "*" } else { wildcard };
        debug!(database = db, group = ?group, wildcard, "keys");
        let mut conn = self.lease(db)?;
        match group {
            None => {
                let reply = self.registry.decode("KEYS", conn.exec(&["KEYS", wildcard]));
                strings_or_empty(reply, "KEYS")
            }
            Some(group) if wildcard == "*" => {
                let reply = self.registry.decode("HKEYS", conn.exec(&["HKEYS", group]));
                strings_or_empty(reply, "HKEYS")
            }
            Some(group) => self.matching_fields(&mut conn, group, wildcard),
        }
    }

    fn matching_fields(
        &self,
        conn: &mut PooledConnection,
        group: &str,
        wildcard: &str,
    ) -> DaoResult<Vec<String>> {
        let count = KEYS_SCAN_COUNT.to_string();
        let mut seen = HashSet::new();
        let mut fields = Vec::new();
        let mut cursor = 0u64;
        loop {
            let cursor_arg = cursor.to_string();
            let args = [
                "HSCAN",
                group,
                cursor_arg.as_str(),
                "MATCH",
                wildcard,
                "COUNT",
                count.as_str(),
            ];
            match self.registry.decode("HSCAN", conn.exec(&args))? {
                Reply::Scan { cursor: next, items } => {
                    // HSCAN pages alternate field, value.
                    for field in items.into_iter().step_by(2) {
                        if seen.insert(field.clone()) {
                            fields.push(field);
                        }
                    }
                    cursor = next;
                }
                _ => return Err(unexpected("HSCAN", "cursor and page")),
            }
            if cursor == 0 {
                return Ok(fields);
            }
        }
    }

    /// Runs any command the Registry knows and decodes its reply; a nil
    /// reply is `Ok(None)`.
    ///
    /// Unsupported commands fail before anything is sent.
    pub fn command(&self, db: &str, command: &str, args: &[&str]) -> DaoResult<Option<Reply>> {
        if !self.registry.supports(command) {
            return Err(DecodeError::UnsupportedCommand(command.to_ascii_uppercase()).into());
        }
        debug!(database = db, command, args = args.len(), "command");
        let mut parts = Vec::with_capacity(args.len() + 1);
        parts.push(command);
        parts.extend_from_slice(args);
        let mut conn = self.lease(db)?;
        match self.registry.decode(command, conn.exec(&parts)) {
            Ok(reply) => Ok(Some(reply)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    // -------------------------------------------------------------------------
    // Shared plumbing
    // -------------------------------------------------------------------------

    pub(crate) fn registry(&self) -> &ReplyRegistry {
        &self.registry
    }

    /// Leases a connection and selects `db` on it.
    pub(crate) fn lease(&self, db: &str) -> DaoResult<PooledConnection> {
        let pool = {
            let mut slot = self.pool.lock();
            self.open_pool(&mut slot)?
        };
        let mut conn = pool.acquire()?;
        self.select_database(&mut conn, db)?;
        Ok(conn)
    }

    fn open_pool(&self, slot: &mut PoolSlot) -> DaoResult<ConnectionPool> {
        match slot {
            PoolSlot::Open(pool) => Ok(pool.clone()),
            PoolSlot::Closed => Err(DaoError::NotConnected),
            PoolSlot::Idle => {
                let pool_config = self
                    .config
                    .read()
                    .as_ref()
                    .map(DaoConfig::pool_config)
                    .ok_or_else(|| DaoError::Config("store not configured".into()))?;
                let pool = ConnectionPool::new(pool_config)?;
                info!(
                    addr = %pool.config().addr,
                    max_total = pool.config().max_total,
                    "connection pool created"
                );
                *slot = PoolSlot::Open(pool.clone());
                Ok(pool)
            }
        }
    }
}

/// One wire command: name plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Command {
    pub(crate) name: &'static str,
    pub(crate) args: Vec<String>,
}

impl Command {
    pub(crate) fn new(name: &'static str) -> Self {
        Command {
            name,
            args: Vec::new(),
        }
    }

    pub(crate) fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Name followed by arguments, ready for `exec`/`send`.
    pub(crate) fn parts(&self) -> Vec<&str> {
        std::iter::once(self.name)
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

/// Treats an empty group name as no group.
pub(crate) fn group_name(group: Option<&str>) -> Option<&str> {
    group.filter(|name| !name.is_empty())
}

pub(crate) fn read_command(group: Option<&str>, id: &str, unmarshal: Unmarshal) -> Command {
    match (group, unmarshal) {
        (Some(group), _) => Command::new("HGET").arg(group).arg(id),
        (None, Unmarshal::Raw) => Command::new("HGETALL").arg(id),
        (None, _) => Command::new("GET").arg(id),
    }
}

pub(crate) fn write_command(
    group: Option<&str>,
    id: &str,
    value: &Value,
    opts: &Options,
) -> DaoResult<Command> {
    let wire = to_wire(value, opts.marshal, group.is_some())?;
    let command = match (group, wire) {
        (Some(group), Wire::Plain(text)) => {
            let name = if opts.override_existing { "HSET" } else { "HSETNX" };
            Command::new(name).arg(group).arg(id).arg(text)
        }
        (Some(_), Wire::Fields(_)) => {
            return Err(DaoError::Precondition("grouped writes take a single string".into()));
        }
        (None, Wire::Fields(fields)) => {
            let mut command = Command::new("HMSET").arg(id);
            for (field, text) in fields {
                command = command.arg(field).arg(text);
            }
            command
        }
        (None, Wire::Plain(text)) => {
            let name = if opts.override_existing { "SET" } else { "SETNX" };
            Command::new(name).arg(id).arg(text)
        }
    };
    Ok(command)
}

pub(crate) fn delete_command(group: Option<&str>, id: &str) -> Command {
    match group {
        Some(group) => Command::new("HDEL").arg(group).arg(id),
        None => Command::new("DEL").arg(id),
    }
}

/// Turns a decoded read reply into a record; nil and empty hashes are absence.
pub(crate) fn into_record(
    reply: DaoResult<Reply>,
    command: &str,
    unmarshal: Unmarshal,
) -> DaoResult<Option<Record>> {
    match reply {
        Ok(Reply::Str(text)) => text_record(text, unmarshal).map(Some),
        Ok(Reply::Map(fields)) if fields.is_empty() => Ok(None),
        Ok(Reply::Map(fields)) => Ok(Some(Record::Fields(fields))),
        Ok(_) => Err(unexpected(command, "string or field map")),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

fn strings_or_empty(reply: DaoResult<Reply>, command: &str) -> DaoResult<Vec<String>> {
    match reply {
        Ok(Reply::Strings(items)) => Ok(items),
        Ok(_) => Err(unexpected(command, "list of strings")),
        Err(err) if err.is_not_found() => Ok(Vec::new()),
        Err(err) => Err(err),
    }
}

pub(crate) fn unexpected(command: &str, expected: &'static str) -> DaoError {
    DecodeError::UnexpectedReply {
        command: command.to_string(),
        expected,
    }
    .into()
}
