//! # Batch Pipelined Operations
//!
//! Purpose: Run N logical reads, writes or deletes as one pipelined round
//! trip on one leased connection.
//!
//! ## Algorithm
//!
//! ```text
//! send(cmd_0) .. send(cmd_n-1)      queue only, nothing read
//! flush()                           one write
//! receive() -> reply_0              reply i is read before reply i+1
//!   ...
//! receive() -> reply_n-1
//! ```
//!
//! - A nil reply for item i means absence and is not an error.
//! - Any other error stops the loop and is returned; results collected so
//!   far are dropped. Replies still unread stay on the connection, so it is
//!   closed instead of going back to the pool.
//! - Precondition failures (length mismatch, marshalling) happen before the
//!   first `send`.

use rkv_client::PooledConnection;
use tracing::{debug, warn};

use crate::dao::{
    delete_command, group_name, into_record, read_command, write_command, Command, RedisDao,
};
use crate::error::{DaoError, DaoResult};
use crate::registry::Reply;
use crate::value::{Options, Record, Value};

/// Group addressing for `update_batch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchGroups<'a> {
    /// Every item uses the same group (`None` or `""` = flat).
    Shared(Option<&'a str>),
    /// Item i uses `groups[i]` (`""` = flat), so flat and grouped writes can
    /// share one pipeline.
    PerItem(&'a [&'a str]),
}

impl<'a> BatchGroups<'a> {
    fn group(&self, index: usize) -> Option<&'a str> {
        match *self {
            BatchGroups::Shared(group) => group_name(group),
            BatchGroups::PerItem(groups) => {
                groups.get(index).copied().and_then(|g| group_name(Some(g)))
            }
        }
    }
}

impl<'a> From<Option<&'a str>> for BatchGroups<'a> {
    fn from(group: Option<&'a str>) -> Self {
        BatchGroups::Shared(group)
    }
}

impl RedisDao {
    /// Reads many ids in one round trip.
    ///
    /// Returns `(id, record)` for the ids that exist, in request order.
    pub fn gets(
        &self,
        db: &str,
        group: Option<&str>,
        ids: &[&str],
        opts: &Options,
    ) -> DaoResult<Vec<(String, Record)>> {
        let group = group_name(group);
        debug!(database = db, group = ?group, ids = ids.len(), "gets");
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let commands: Vec<Command> = ids
            .iter()
            .map(|id| read_command(group, id, opts.unmarshal))
            .collect();

        let mut conn = self.lease(db)?;
        let records = self.pipeline(&mut conn, &commands, |command, reply| {
            into_record(reply, command.name, opts.unmarshal)
        })?;

        Ok(ids
            .iter()
            .zip(records)
            .filter_map(|(id, record)| record.map(|record| (id.to_string(), record)))
            .collect())
    }

    /// Writes many ids in one round trip.
    ///
    /// `results[i]` is the reply for `ids[i]` (`None` for a nil reply). The
    /// call fails before anything is queued when `ids`, `values` and
    /// per-item `groups` differ in length.
    pub fn update_batch(
        &self,
        db: &str,
        groups: BatchGroups<'_>,
        ids: &[&str],
        values: &[Value],
        opts: &Options,
    ) -> DaoResult<Vec<Option<Reply>>> {
        if ids.len() != values.len() {
            return Err(DaoError::LengthMismatch {
                ids: ids.len(),
                values: values.len(),
            });
        }
        if let BatchGroups::PerItem(per_item) = groups {
            if per_item.len() != ids.len() {
                return Err(DaoError::GroupsMismatch {
                    ids: ids.len(),
                    groups: per_item.len(),
                });
            }
        }
        debug!(
            database = db,
            groups = ?groups,
            ids = ids.len(),
            marshal = ?opts.marshal,
            "update batch"
        );
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let commands = ids
            .iter()
            .zip(values)
            .enumerate()
            .map(|(index, (id, value))| write_command(groups.group(index), id, value, opts))
            .collect::<DaoResult<Vec<Command>>>()?;

        let mut conn = self.lease(db)?;
        self.pipeline(&mut conn, &commands, |_, reply| match reply {
            Ok(reply) => Ok(Some(reply)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        })
    }

    /// Deletes many ids in one round trip; `removed[i]` tells whether
    /// `ids[i]` existed.
    pub fn deletes(&self, db: &str, group: Option<&str>, ids: &[&str]) -> DaoResult<Vec<bool>> {
        let group = group_name(group);
        debug!(database = db, group = ?group, ids = ids.len(), "deletes");
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let commands: Vec<Command> = ids.iter().map(|id| delete_command(group, id)).collect();

        let mut conn = self.lease(db)?;
        self.pipeline(&mut conn, &commands, |_, reply| match reply {
            Ok(reply) => Ok(reply.as_int().unwrap_or(0) > 0),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        })
    }

    /// Queues every command, flushes once, then receives and decodes the
    /// replies in submission order, handing each to `on_reply`.
    fn pipeline<T, F>(
        &self,
        conn: &mut PooledConnection,
        commands: &[Command],
        mut on_reply: F,
    ) -> DaoResult<Vec<T>>
    where
        F: FnMut(&Command, DaoResult<Reply>) -> DaoResult<T>,
    {
        for command in commands {
            conn.send(&command.parts())?;
        }
        conn.flush()?;

        let mut results = Vec::with_capacity(commands.len());
        for (index, command) in commands.iter().enumerate() {
            let reply = self.registry().decode(command.name, conn.receive());
            match on_reply(command, reply) {
                Ok(value) => results.push(value),
                Err(err) => {
                    warn!(
                        command = command.name,
                        item = index,
                        unread = conn.pending(),
                        error = %err,
                        "pipelined batch aborted"
                    );
                    return Err(err);
                }
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_item_groups_normalize_empty_names() {
        let groups = ["", "users"];
        let per_item = BatchGroups::PerItem(&groups);
        assert_eq!(per_item.group(0), None);
        assert_eq!(per_item.group(1), Some("users"));

        let shared = BatchGroups::from(Some("orders"));
        assert_eq!(shared.group(5), Some("orders"));
        assert_eq!(BatchGroups::Shared(Some("")).group(0), None);
    }

    #[test]
    fn length_mismatch_fails_before_leasing() {
        // Unconfigured adapter: any lease attempt would fail with Config.
        let dao = RedisDao::new();
        let values = vec![Value::from("a"), Value::from("b")];
        let ids = ["k1", "k2", "k3"];
        let err = dao
            .update_batch("db", BatchGroups::Shared(None), &ids, &values, &Options::new())
            .unwrap_err();
        assert!(matches!(err, DaoError::LengthMismatch { ids: 3, values: 2 }));

        let groups = ["g"];
        let err = dao
            .update_batch("db", BatchGroups::PerItem(&groups), &ids[..2], &values, &Options::new())
            .unwrap_err();
        assert!(matches!(err, DaoError::GroupsMismatch { ids: 2, groups: 1 }));
    }
}
