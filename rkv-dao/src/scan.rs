//! # Cursor Scan
//!
//! One call fetches one page. Callers loop, feeding `ScanPage::cursor` back
//! in, until `ScanPage::is_done` reports the store's zero cursor.
//!
//! ```text
//! flat:    SCAN  cursor [COUNT hint] query...        page = [key, key, ...]
//! grouped: HSCAN group cursor [COUNT hint] query...  page = [field, value, ...]
//! ```

use std::collections::HashMap;

use tracing::debug;

use crate::dao::{group_name, unexpected, Command, RedisDao};
use crate::error::DaoResult;
use crate::registry::Reply;

/// One page of a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next call; `0` once the scan has wrapped around.
    pub cursor: u64,
    /// Keys (flat, value `None`) or fields with their values (grouped).
    pub entries: HashMap<String, Option<String>>,
}

impl ScanPage {
    pub fn is_done(&self) -> bool {
        self.cursor == 0
    }
}

impl RedisDao {
    /// Fetches the page starting at `cursor`.
    ///
    /// `page_size_hint` is sent as `COUNT` when non-zero; `query` words
    /// (e.g. `["MATCH", "user:*"]`) are appended untouched.
    pub fn scan_as_map(
        &self,
        db: &str,
        group: Option<&str>,
        cursor: u64,
        page_size_hint: usize,
        query: &[&str],
    ) -> DaoResult<ScanPage> {
        let group = group_name(group);
        let command = scan_command(group, cursor, page_size_hint, query);
        debug!(database = db, group = ?group, cursor, page_size_hint, "scan");

        let mut conn = self.lease(db)?;
        let reply = self.registry().decode(command.name, conn.exec(&command.parts()))?;
        let (cursor, items) = match reply {
            Reply::Scan { cursor, items } => (cursor, items),
            _ => return Err(unexpected(command.name, "cursor and page")),
        };

        let entries = match group {
            None => items.into_iter().map(|key| (key, None)).collect(),
            Some(_) => {
                if items.len() % 2 != 0 {
                    return Err(unexpected(command.name, "field/value pairs"));
                }
                let mut entries = HashMap::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
                    entries.insert(field, Some(value));
                }
                entries
            }
        };
        Ok(ScanPage { cursor, entries })
    }
}

fn scan_command(
    group: Option<&str>,
    cursor: u64,
    page_size_hint: usize,
    query: &[&str],
) -> Command {
    let mut command = match group {
        Some(group) => Command::new("HSCAN").arg(group),
        None => Command::new("SCAN"),
    };
    command = command.arg(cursor.to_string());
    if page_size_hint > 0 {
        command = command.arg("COUNT").arg(page_size_hint.to_string());
    }
    for word in query {
        command = command.arg(*word);
    }
    command
}
