use std::collections::HashMap;
use std::sync::Arc;

use common::{parent_relpath, relpath_name, NodeId};
use redb::{Database, ReadableTable, TableDefinition, TableError, WriteTransaction};
use serde::{Deserialize, Serialize};

use crate::folders::{FolderIndex, FolderInfo};
use crate::{decode_value, encode_value, LibraryError, KEY_SEP};

const NODES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("nodes");
const NODE_PATHS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("node_paths");
const NODE_META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("node_meta");

const NEXT_ID_KEY: &str = "next_id";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeEntry {
    pub id: NodeId,
    pub storage_id: String,
    // Slash separated path inside the storage; empty for the storage root.
    pub relpath: String,
    pub name: String,
    // Raw parent within the same storage; `None` for the storage root.
    pub parent: Option<NodeId>,
    pub is_dir: bool,
}

#[derive(Clone)]
pub struct NodeStore {
    db: Arc<Database>,
}

impl NodeStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn init_tables(&self) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(NODES_TABLE)?;
            let _ = write_txn.open_table(NODE_PATHS_TABLE)?;
            let _ = write_txn.open_table(NODE_META_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn register(
        &self,
        storage_id: &str,
        relpath: &str,
        is_dir: bool,
    ) -> Result<NodeId, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let (id, _) = register_in(&write_txn, storage_id, relpath, is_dir)?;
        write_txn.commit()?;
        Ok(id)
    }

    pub fn get(&self, id: NodeId) -> Result<Option<NodeEntry>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(NODES_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let entry = match table.get(id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(entry)
    }

    pub fn find(&self, storage_id: &str, relpath: &str) -> Result<Option<NodeId>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(NODE_PATHS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let key = path_key(storage_id, relpath);
        let id = table.get(key.as_str())?.map(|value| value.value());
        Ok(id)
    }
}

impl FolderIndex for NodeStore {
    fn names_and_parents(
        &self,
        ids: &[NodeId],
        storage_id: &str,
    ) -> Result<HashMap<NodeId, FolderInfo>, LibraryError> {
        let mut out = HashMap::with_capacity(ids.len());
        if ids.is_empty() {
            return Ok(out);
        }
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(NODES_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(out),
            Err(err) => return Err(err.into()),
        };
        for id in ids {
            let Some(value) = table.get(*id)? else {
                continue;
            };
            let entry: NodeEntry = decode_value(value.value())?;
            if !entry.is_dir || entry.storage_id != storage_id {
                continue;
            }
            out.insert(
                entry.id,
                FolderInfo {
                    name: entry.name,
                    parent: entry.parent,
                },
            );
        }
        Ok(out)
    }
}

pub(crate) fn register_in(
    txn: &WriteTransaction,
    storage_id: &str,
    relpath: &str,
    is_dir: bool,
) -> Result<(NodeId, Option<NodeId>), LibraryError> {
    let mut nodes = txn.open_table(NODES_TABLE)?;
    let mut paths = txn.open_table(NODE_PATHS_TABLE)?;
    let mut meta = txn.open_table(NODE_META_TABLE)?;
    register_with(&mut nodes, &mut paths, &mut meta, storage_id, relpath, is_dir)
}

fn register_with(
    nodes: &mut redb::Table<u64, &[u8]>,
    paths: &mut redb::Table<&str, u64>,
    meta: &mut redb::Table<&str, u64>,
    storage_id: &str,
    relpath: &str,
    is_dir: bool,
) -> Result<(NodeId, Option<NodeId>), LibraryError> {
    let key = path_key(storage_id, relpath);
    let existing = paths.get(key.as_str())?.map(|value| value.value());
    if let Some(id) = existing {
        let parent = match nodes.get(id)? {
            Some(value) => decode_value::<NodeEntry>(value.value())?.parent,
            None => None,
        };
        return Ok((id, parent));
    }

    let parent = match parent_relpath(relpath) {
        Some(parent_path) => {
            let (parent_id, _) = register_with(nodes, paths, meta, storage_id, parent_path, true)?;
            Some(parent_id)
        }
        None => None,
    };

    let id = meta.get(NEXT_ID_KEY)?.map(|value| value.value()).unwrap_or(1);
    meta.insert(NEXT_ID_KEY, id + 1)?;

    let entry = NodeEntry {
        id,
        storage_id: storage_id.to_string(),
        relpath: relpath.to_string(),
        name: relpath_name(relpath).to_string(),
        parent,
        is_dir,
    };
    let bytes = encode_value(&entry)?;
    nodes.insert(id, bytes.as_slice())?;
    paths.insert(key.as_str(), id)?;
    Ok((id, parent))
}

fn path_key(storage_id: &str, relpath: &str) -> String {
    let mut out = String::with_capacity(storage_id.len() + relpath.len() + 1);
    out.push_str(storage_id);
    out.push(KEY_SEP);
    out.push_str(relpath);
    out
}
