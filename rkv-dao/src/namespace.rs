//! # Namespace Resolver
//!
//! Purpose: Map logical database names to numeric store indexes.
//!
//! The table is read on every operation and written only by
//! `define`, which holds the write lock for its whole check-then-insert.
//! Groups are not tracked here: a group exists when its hash has a field, so
//! asking about one is a store round trip (see `RedisDao::group_exists`).

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::info;

use crate::error::{DaoError, DaoResult};

#[derive(Debug, Default)]
struct Table {
    names: HashMap<String, u32>,
    default_index: u32,
}

/// Name → store index table owned by one adapter.
#[derive(Debug, Default)]
pub struct NamespaceResolver {
    table: RwLock<Table>,
}

impl NamespaceResolver {
    pub fn new(default_index: u32) -> Self {
        NamespaceResolver {
            table: RwLock::new(Table {
                names: HashMap::new(),
                default_index,
            }),
        }
    }

    /// Store index for `name`; unmapped names use the default index.
    pub fn resolve(&self, name: &str) -> u32 {
        let table = self.table.read();
        table.names.get(name).copied().unwrap_or(table.default_index)
    }

    /// Records `name → index`.
    ///
    /// Fails when `name` is already mapped and `create` is false, or when
    /// another name already claims `index` and `override_existing` is false.
    pub fn define(
        &self,
        name: &str,
        index: u32,
        create: bool,
        override_existing: bool,
    ) -> DaoResult<bool> {
        let mut table = self.table.write();
        if !create && table.names.contains_key(name) {
            return Err(DaoError::DatabaseExists(name.to_string()));
        }
        if !override_existing {
            let owner = table
                .names
                .iter()
                .find(|(owner, claimed)| **claimed == index && owner.as_str() != name);
            if let Some((owner, _)) = owner {
                return Err(DaoError::IndexTaken {
                    index,
                    owner: owner.clone(),
                });
            }
        }
        table.names.insert(name.to_string(), index);
        info!(database = name, index, "database defined");
        Ok(true)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.read().names.contains_key(name)
    }

    /// Drops every mapping and installs a new default index.
    pub fn reset(&self, default_index: u32) {
        let mut table = self.table.write();
        table.names.clear();
        table.default_index = default_index;
    }

    /// Sorted snapshot of the mappings.
    pub fn snapshot(&self) -> Vec<(String, u32)> {
        let mut entries: Vec<_> = self
            .table
            .read()
            .names
            .iter()
            .map(|(name, index)| (name.clone(), *index))
            .collect();
        entries.sort();
        entries
    }
}
