//! Persistent storage in a single SQLite database file.
//!
//! The file is opened with `PRAGMA mmap_size` so reads go through a
//! memory-mapped window. One transaction is kept open at all times: every
//! mutation lands in it, [`flush`](AppFileSystemStorage::flush) commits and
//! starts the next one. Work that was never flushed is lost if the process
//! dies.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use afs_core::{
    check_metadata, check_node_name, now_millis, AddOutcome, AppFileSystemStorage, DataWriter,
    EventsBus, NewNode, NodeDependency, NodeEvent, NodeGenericMetadata, NodeId, NodeInfo,
    PseudoClass, Result, StorageError,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, instrument, warn};

use crate::common::{dependency_added_events, dependency_removed_events, parse_uuid_id, Emitter};

const BACKEND: &str = "mmap";

/// Memory-map window used when none is configured.
pub const DEFAULT_MMAP_SIZE: u64 = 64 * 1024 * 1024;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS nodes (
        id TEXT PRIMARY KEY,
        parent_id TEXT REFERENCES nodes(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        pseudo_class TEXT NOT NULL,
        description TEXT NOT NULL,
        version INTEGER NOT NULL,
        creation_time INTEGER NOT NULL,
        modification_time INTEGER NOT NULL,
        metadata TEXT NOT NULL,
        seq INTEGER NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_parent_name ON nodes(parent_id, name);

    CREATE TABLE IF NOT EXISTS attributes (
        node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (node_id, name)
    );

    CREATE TABLE IF NOT EXISTS binary_data (
        node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        data BLOB NOT NULL,
        PRIMARY KEY (node_id, name)
    );

    CREATE TABLE IF NOT EXISTS dependencies (
        source_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        target_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        PRIMARY KEY (source_id, name)
    );

    CREATE INDEX IF NOT EXISTS idx_dependencies_target ON dependencies(target_id);
";

const NEXT_SEQ: &str = "(SELECT COALESCE(MAX(seq), 0) + 1 FROM nodes)";

const SUBTREE_DEEPEST_FIRST: &str = "
    WITH RECURSIVE subtree(id, depth) AS (
        SELECT ?1, 0
        UNION ALL
        SELECT nodes.id, subtree.depth + 1 FROM nodes JOIN subtree ON nodes.parent_id = subtree.id
    )
    SELECT id FROM subtree ORDER BY depth DESC
";

trait SqlResultExt<T> {
    fn engine(self) -> Result<T>;
}

impl<T> SqlResultExt<T> for rusqlite::Result<T> {
    fn engine(self) -> Result<T> {
        self.map_err(|e| StorageError::engine(BACKEND, e))
    }
}

/// Options for opening a [`MmapFileStorage`].
#[derive(Debug, Clone)]
pub struct MmapOptions {
    /// Bytes of the database file mapped into memory. Ignored on Windows,
    /// where mapping is disabled.
    pub mmap_size: u64,
}

impl Default for MmapOptions {
    fn default() -> Self {
        MmapOptions {
            mmap_size: DEFAULT_MMAP_SIZE,
        }
    }
}

/// Storage persisted in a memory-mapped database file.
pub struct MmapFileStorage {
    name: String,
    path: Option<PathBuf>,
    root: NodeId,
    conn: Mutex<Option<Connection>>,
    emitter: Emitter,
}

impl MmapFileStorage {
    /// Open or create the database at `path`.
    pub fn open(
        file_system_name: impl Into<String>,
        path: &Path,
        options: MmapOptions,
        bus: Arc<EventsBus>,
    ) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).engine()?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .engine()?;
        let storage = Self::init(file_system_name.into(), Some(path.to_path_buf()), conn, &options, bus)?;
        info!(file_system = %storage.name, path = %path.display(), "opened mmap storage");
        Ok(storage)
    }

    /// A storage backed by a private in-memory database, for tests.
    pub fn in_memory(file_system_name: impl Into<String>) -> Result<Self> {
        let conn = Connection::open_in_memory().engine()?;
        Self::init(
            file_system_name.into(),
            None,
            conn,
            &MmapOptions::default(),
            Arc::new(EventsBus::new()),
        )
    }

    fn init(
        name: String,
        path: Option<PathBuf>,
        conn: Connection,
        options: &MmapOptions,
        bus: Arc<EventsBus>,
    ) -> Result<Self> {
        let mmap_size = if cfg!(windows) { 0 } else { options.mmap_size };
        conn.execute_batch(&format!(
            "PRAGMA foreign_keys=ON; PRAGMA mmap_size={};",
            mmap_size
        ))
        .engine()?;
        conn.execute_batch(SCHEMA).engine()?;

        let root = match conn
            .query_row("SELECT value FROM meta WHERE key = 'root_id'", [], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .engine()?
        {
            Some(root) => parse_stored_id(&root)?,
            None => {
                let root = NodeId::new_uuid();
                let info = NewNode::folder(name.clone()).into_info(root.clone());
                insert_node(&conn, &info, None)?;
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('root_id', ?1)",
                    params![root.to_string()],
                )
                .engine()?;
                debug!(root = %root, "created root node");
                root
            }
        };

        conn.execute_batch("BEGIN").engine()?;

        Ok(MmapFileStorage {
            emitter: Emitter::new(&name, bus),
            name,
            path,
            root,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Backing file, `None` for in-memory storages.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.lock();
        let conn = guard
            .as_ref()
            .ok_or_else(|| StorageError::Closed(self.name.clone()))?;
        f(conn)
    }

    /// Run a mutation atomically inside the open transaction.
    fn mutate<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.read(|conn| {
            conn.execute_batch("SAVEPOINT op").engine()?;
            match f(conn) {
                Ok(value) => {
                    conn.execute_batch("RELEASE op").engine()?;
                    Ok(value)
                }
                Err(e) => {
                    conn.execute_batch("ROLLBACK TO op; RELEASE op").engine()?;
                    Err(e)
                }
            }
        })
    }

    fn store_data(&self, id: &NodeId, name: &str, bytes: Vec<u8>) -> Result<()> {
        self.mutate(|conn| {
            ensure_node(conn, id)?;
            conn.execute(
                "INSERT INTO binary_data (node_id, name, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT(node_id, name) DO UPDATE SET data = excluded.data",
                params![id.to_string(), name, bytes],
            )
            .engine()?;
            Ok(())
        })?;
        debug!(id = %id, data_name = %name, "stored binary data");
        self.emitter.emit(NodeEvent::NodeDataUpdated {
            id: id.clone(),
            data_name: name.to_string(),
        });
        Ok(())
    }

    fn update_node(&self, id: &NodeId, sql: &str, value: &dyn rusqlite::ToSql) -> Result<()> {
        let changed = self.mutate(|conn| {
            conn.execute(sql, params![id.to_string(), value]).engine()
        })?;
        if changed == 0 {
            return Err(StorageError::node_not_found(id));
        }
        Ok(())
    }
}

fn parse_stored_id(s: &str) -> Result<NodeId> {
    parse_uuid_id(s, BACKEND).map_err(|e| StorageError::engine(BACKEND, e.to_string()))
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::engine(BACKEND, format!("invalid timestamp {}", millis)))
}

fn insert_node(conn: &Connection, info: &NodeInfo, parent: Option<&NodeId>) -> Result<()> {
    let metadata = serde_json::to_string(&info.metadata)?;
    conn.execute(
        &format!(
            "INSERT INTO nodes (id, parent_id, name, pseudo_class, description, version,
                                creation_time, modification_time, metadata, seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, {})",
            NEXT_SEQ
        ),
        params![
            info.id.to_string(),
            parent.map(|p| p.to_string()),
            info.name,
            info.pseudo_class.as_str(),
            info.description,
            info.version,
            info.creation_time.timestamp_millis(),
            info.modification_time.timestamp_millis(),
            metadata,
        ],
    )
    .engine()?;
    Ok(())
}

fn ensure_node(conn: &Connection, id: &NodeId) -> Result<()> {
    let exists: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM nodes WHERE id = ?1)",
            params![id.to_string()],
            |row| row.get(0),
        )
        .engine()?;
    if exists {
        Ok(())
    } else {
        Err(StorageError::node_not_found(id))
    }
}

/// Parent of an existing node; errors if the node does not exist.
fn parent_of(conn: &Connection, id: &NodeId) -> Result<Option<NodeId>> {
    let parent: Option<Option<String>> = conn
        .query_row(
            "SELECT parent_id FROM nodes WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .engine()?;
    match parent {
        None => Err(StorageError::node_not_found(id)),
        Some(None) => Ok(None),
        Some(Some(parent)) => Ok(Some(parse_stored_id(&parent)?)),
    }
}

fn child_named(conn: &Connection, parent: &NodeId, name: &str) -> Result<Option<NodeId>> {
    conn.query_row(
        "SELECT id FROM nodes WHERE parent_id = ?1 AND name = ?2",
        params![parent.to_string(), name],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .engine()?
    .map(|id| parse_stored_id(&id))
    .transpose()
}

fn query_ids(conn: &Connection, sql: &str, id: &NodeId) -> Result<Vec<NodeId>> {
    let mut stmt = conn.prepare(sql).engine()?;
    let ids = stmt
        .query_map(params![id.to_string()], |row| row.get::<_, String>(0))
        .engine()?
        .collect::<rusqlite::Result<Vec<_>>>()
        .engine()?;
    ids.iter().map(|id| parse_stored_id(id)).collect()
}

fn query_strings(conn: &Connection, sql: &str, id: &NodeId) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql).engine()?;
    let values = stmt
        .query_map(params![id.to_string()], |row| row.get::<_, String>(0))
        .engine()?
        .collect::<rusqlite::Result<Vec<_>>>()
        .engine()?;
    Ok(values)
}

struct NodeRow {
    name: String,
    pseudo_class: String,
    description: String,
    version: i32,
    creation_time: i64,
    modification_time: i64,
    metadata: String,
}

impl NodeRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(NodeRow {
            name: row.get(0)?,
            pseudo_class: row.get(1)?,
            description: row.get(2)?,
            version: row.get(3)?,
            creation_time: row.get(4)?,
            modification_time: row.get(5)?,
            metadata: row.get(6)?,
        })
    }

    fn into_info(self, id: NodeId) -> Result<NodeInfo> {
        Ok(NodeInfo {
            id,
            name: self.name,
            pseudo_class: PseudoClass::from(self.pseudo_class),
            description: self.description,
            version: self.version,
            creation_time: timestamp(self.creation_time)?,
            modification_time: timestamp(self.modification_time)?,
            metadata: serde_json::from_str(&self.metadata)?,
        })
    }
}

impl AppFileSystemStorage for MmapFileStorage {
    fn file_system_name(&self) -> &str {
        &self.name
    }

    fn events_bus(&self) -> &EventsBus {
        self.emitter.bus()
    }

    fn root_node(&self) -> NodeId {
        self.root.clone()
    }

    fn from_string(&self, s: &str) -> Result<NodeId> {
        parse_uuid_id(s, BACKEND)
    }

    fn node_info(&self, id: &NodeId) -> Result<NodeInfo> {
        let row = self.read(|conn| {
            conn.query_row(
                "SELECT name, pseudo_class, description, version, creation_time,
                        modification_time, metadata
                 FROM nodes WHERE id = ?1",
                params![id.to_string()],
                NodeRow::from_row,
            )
            .optional()
            .engine()
        })?;
        row.ok_or_else(|| StorageError::node_not_found(id))?
            .into_info(id.clone())
    }

    fn child_nodes(&self, id: &NodeId) -> Result<Vec<NodeId>> {
        self.read(|conn| {
            ensure_node(conn, id)?;
            query_ids(conn, "SELECT id FROM nodes WHERE parent_id = ?1 ORDER BY seq", id)
        })
    }

    fn child_node(&self, id: &NodeId, name: &str) -> Result<Option<NodeId>> {
        self.read(|conn| {
            ensure_node(conn, id)?;
            child_named(conn, id, name)
        })
    }

    fn parent_node(&self, id: &NodeId) -> Result<Option<NodeId>> {
        self.read(|conn| parent_of(conn, id))
    }

    #[instrument(skip(self), fields(backend = BACKEND, id = %id, new_parent = %new_parent))]
    fn set_parent_node(&self, id: &NodeId, new_parent: &NodeId) -> Result<()> {
        let old_parent = self.mutate(|conn| {
            let old_parent = parent_of(conn, id)?.ok_or_else(|| {
                StorageError::InvalidOperation("cannot move the root node".to_string())
            })?;
            ensure_node(conn, new_parent)?;
            if old_parent == *new_parent {
                return Ok(None);
            }

            let cycle: bool = conn
                .query_row(
                    "WITH RECURSIVE ancestors(id) AS (
                         SELECT ?1
                         UNION ALL
                         SELECT n.parent_id FROM nodes n JOIN ancestors a ON n.id = a.id
                         WHERE n.parent_id IS NOT NULL
                     )
                     SELECT EXISTS(SELECT 1 FROM ancestors WHERE id = ?2)",
                    params![new_parent.to_string(), id.to_string()],
                    |row| row.get(0),
                )
                .engine()?;
            if cycle {
                return Err(StorageError::InvalidOperation(format!(
                    "cannot move node {} under its own subtree",
                    id
                )));
            }

            let name: String = conn
                .query_row(
                    "SELECT name FROM nodes WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .engine()?;
            if child_named(conn, new_parent, &name)?.is_some() {
                return Err(StorageError::already_exists(new_parent, &name));
            }

            conn.execute(
                &format!(
                    "UPDATE nodes SET parent_id = ?2, seq = {} WHERE id = ?1",
                    NEXT_SEQ
                ),
                params![id.to_string(), new_parent.to_string()],
            )
            .engine()?;
            Ok(Some(old_parent))
        })?;

        if let Some(old_parent) = old_parent {
            debug!("moved node");
            self.emitter.emit(NodeEvent::ParentChanged {
                id: id.clone(),
                old_parent,
                new_parent: new_parent.clone(),
            });
        }
        Ok(())
    }

    fn is_writable(&self, id: &NodeId) -> Result<bool> {
        self.read(|conn| ensure_node(conn, id))?;
        Ok(true)
    }

    #[instrument(skip(self, node), fields(backend = BACKEND, parent = %parent, name = %node.name))]
    fn create_node(&self, parent: &NodeId, node: NewNode) -> Result<NodeId> {
        check_node_name(&node.name)?;
        check_metadata(&node.metadata)?;
        let id = NodeId::new_uuid();
        self.mutate(|conn| {
            ensure_node(conn, parent)?;
            if child_named(conn, parent, &node.name)?.is_some() {
                return Err(StorageError::already_exists(parent, &node.name));
            }
            insert_node(conn, &node.into_info(id.clone()), Some(parent))
        })?;

        debug!(id = %id, "created node");
        self.emitter.emit(NodeEvent::NodeCreated {
            id: id.clone(),
            parent: parent.clone(),
        });
        Ok(id)
    }

    #[instrument(skip(self), fields(backend = BACKEND, id = %id))]
    fn delete_node(&self, id: &NodeId) -> Result<NodeId> {
        let parent = self.mutate(|conn| {
            let parent = parent_of(conn, id)?.ok_or_else(|| {
                StorageError::InvalidOperation("cannot delete the root node".to_string())
            })?;
            // Deepest first, so each delete only cascades one level to
            // attributes, data and edges and never nests child cascades.
            let subtree = query_ids(conn, SUBTREE_DEEPEST_FIRST, id)?;
            let mut stmt = conn
                .prepare_cached("DELETE FROM nodes WHERE id = ?1")
                .engine()?;
            for node in &subtree {
                stmt.execute(params![node.to_string()]).engine()?;
            }
            Ok(parent)
        })?;

        debug!("deleted subtree");
        self.emitter.emit(NodeEvent::NodeRemoved {
            id: id.clone(),
            parent: parent.clone(),
        });
        Ok(parent)
    }

    fn rename_node(&self, id: &NodeId, name: &str) -> Result<()> {
        check_node_name(name)?;
        let renamed = self.mutate(|conn| {
            let parent = parent_of(conn, id)?.ok_or_else(|| {
                StorageError::InvalidOperation("cannot rename the root node".to_string())
            })?;
            match child_named(conn, &parent, name)? {
                Some(existing) if existing == *id => return Ok(false),
                Some(_) => return Err(StorageError::already_exists(&parent, name)),
                None => {}
            }
            conn.execute(
                "UPDATE nodes SET name = ?2 WHERE id = ?1",
                params![id.to_string(), name],
            )
            .engine()?;
            Ok(true)
        })?;

        if renamed {
            self.emitter.emit(NodeEvent::NodeNameUpdated {
                id: id.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn set_description(&self, id: &NodeId, description: &str) -> Result<()> {
        self.update_node(
            id,
            "UPDATE nodes SET description = ?2 WHERE id = ?1",
            &description,
        )?;
        self.emitter.emit(NodeEvent::NodeDescriptionUpdated {
            id: id.clone(),
            description: description.to_string(),
        });
        Ok(())
    }

    fn set_metadata(&self, id: &NodeId, metadata: NodeGenericMetadata) -> Result<()> {
        check_metadata(&metadata)?;
        let json = serde_json::to_string(&metadata)?;
        self.update_node(id, "UPDATE nodes SET metadata = ?2 WHERE id = ?1", &json)?;
        self.emitter
            .emit(NodeEvent::NodeMetadataUpdated { id: id.clone(), metadata });
        Ok(())
    }

    fn update_modification_time(&self, id: &NodeId) -> Result<()> {
        self.update_node(
            id,
            "UPDATE nodes SET modification_time = ?2 WHERE id = ?1",
            &now_millis().timestamp_millis(),
        )
    }

    fn string_attribute(&self, id: &NodeId, name: &str) -> Result<Option<String>> {
        self.read(|conn| {
            ensure_node(conn, id)?;
            conn.query_row(
                "SELECT value FROM attributes WHERE node_id = ?1 AND name = ?2",
                params![id.to_string(), name],
                |row| row.get(0),
            )
            .optional()
            .engine()
        })
    }

    fn set_string_attribute(&self, id: &NodeId, name: &str, value: Option<&str>) -> Result<()> {
        let event = self.mutate(|conn| {
            ensure_node(conn, id)?;
            match value {
                Some(value) => {
                    conn.execute(
                        "INSERT INTO attributes (node_id, name, value) VALUES (?1, ?2, ?3)
                         ON CONFLICT(node_id, name) DO UPDATE SET value = excluded.value",
                        params![id.to_string(), name, value],
                    )
                    .engine()?;
                    Ok(Some(NodeEvent::AttributeUpdated {
                        id: id.clone(),
                        name: name.to_string(),
                    }))
                }
                None => {
                    let removed = conn
                        .execute(
                            "DELETE FROM attributes WHERE node_id = ?1 AND name = ?2",
                            params![id.to_string(), name],
                        )
                        .engine()?;
                    Ok((removed > 0).then(|| NodeEvent::AttributeRemoved {
                        id: id.clone(),
                        name: name.to_string(),
                    }))
                }
            }
        })?;

        if let Some(event) = event {
            self.emitter.emit(event);
        }
        Ok(())
    }

    fn string_attribute_names(&self, id: &NodeId) -> Result<Vec<String>> {
        self.read(|conn| {
            ensure_node(conn, id)?;
            query_strings(
                conn,
                "SELECT name FROM attributes WHERE node_id = ?1 ORDER BY name",
                id,
            )
        })
    }

    fn read_binary_data(&self, id: &NodeId, name: &str) -> Result<Option<Vec<u8>>> {
        self.read(|conn| {
            ensure_node(conn, id)?;
            conn.query_row(
                "SELECT data FROM binary_data WHERE node_id = ?1 AND name = ?2",
                params![id.to_string(), name],
                |row| row.get(0),
            )
            .optional()
            .engine()
        })
    }

    fn write_binary_data(&self, id: &NodeId, name: &str) -> Result<DataWriter<'_>> {
        self.read(|conn| ensure_node(conn, id))?;
        let id = id.clone();
        let name = name.to_string();
        Ok(DataWriter::new(move |bytes| self.store_data(&id, &name, bytes)))
    }

    fn data_exists(&self, id: &NodeId, name: &str) -> Result<bool> {
        self.read(|conn| {
            ensure_node(conn, id)?;
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM binary_data WHERE node_id = ?1 AND name = ?2)",
                params![id.to_string(), name],
                |row| row.get(0),
            )
            .engine()
        })
    }

    fn data_names(&self, id: &NodeId) -> Result<Vec<String>> {
        self.read(|conn| {
            ensure_node(conn, id)?;
            query_strings(
                conn,
                "SELECT name FROM binary_data WHERE node_id = ?1 ORDER BY name",
                id,
            )
        })
    }

    fn remove_data(&self, id: &NodeId, name: &str) -> Result<bool> {
        let removed = self.mutate(|conn| {
            ensure_node(conn, id)?;
            conn.execute(
                "DELETE FROM binary_data WHERE node_id = ?1 AND name = ?2",
                params![id.to_string(), name],
            )
            .engine()
        })? > 0;

        if removed {
            self.emitter.emit(NodeEvent::NodeDataRemoved {
                id: id.clone(),
                data_name: name.to_string(),
            });
        }
        Ok(removed)
    }

    #[instrument(skip(self), fields(backend = BACKEND, id = %id, target = %target))]
    fn add_dependency(&self, id: &NodeId, name: &str, target: &NodeId) -> Result<()> {
        let outcome = self.mutate(|conn| {
            ensure_node(conn, id)?;
            ensure_node(conn, target)?;
            let previous: Option<String> = conn
                .query_row(
                    "SELECT target_id FROM dependencies WHERE source_id = ?1 AND name = ?2",
                    params![id.to_string(), name],
                    |row| row.get(0),
                )
                .optional()
                .engine()?;
            let previous = previous.map(|p| parse_stored_id(&p)).transpose()?;
            if previous.as_ref() == Some(target) {
                return Ok(AddOutcome::Unchanged);
            }
            conn.execute(
                "INSERT INTO dependencies (source_id, name, target_id) VALUES (?1, ?2, ?3)
                 ON CONFLICT(source_id, name) DO UPDATE SET target_id = excluded.target_id",
                params![id.to_string(), name, target.to_string()],
            )
            .engine()?;
            Ok(match previous {
                Some(old) => AddOutcome::Replaced(old),
                None => AddOutcome::Added,
            })
        })?;

        self.emitter
            .emit_all(dependency_added_events(id, name, target, outcome));
        Ok(())
    }

    fn dependency(&self, id: &NodeId, name: &str) -> Result<Option<NodeId>> {
        self.read(|conn| {
            ensure_node(conn, id)?;
            conn.query_row(
                "SELECT target_id FROM dependencies WHERE source_id = ?1 AND name = ?2",
                params![id.to_string(), name],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .engine()?
            .map(|target| parse_stored_id(&target))
            .transpose()
        })
    }

    fn dependencies(&self, id: &NodeId) -> Result<Vec<NodeDependency>> {
        self.read(|conn| {
            ensure_node(conn, id)?;
            let mut stmt = conn
                .prepare(
                    "SELECT name, target_id FROM dependencies WHERE source_id = ?1 ORDER BY rowid",
                )
                .engine()?;
            let rows = stmt
                .query_map(params![id.to_string()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .engine()?
                .collect::<rusqlite::Result<Vec<_>>>()
                .engine()?;
            rows.into_iter()
                .map(|(name, target)| {
                    Ok(NodeDependency {
                        name,
                        node: parse_stored_id(&target)?,
                    })
                })
                .collect()
        })
    }

    fn backward_dependencies(&self, id: &NodeId) -> Result<Vec<NodeId>> {
        self.read(|conn| {
            ensure_node(conn, id)?;
            query_ids(
                conn,
                "SELECT source_id FROM dependencies WHERE target_id = ?1
                 GROUP BY source_id ORDER BY MIN(rowid)",
                id,
            )
        })
    }

    fn remove_dependency(&self, id: &NodeId, name: &str, target: &NodeId) -> Result<()> {
        let removed = self.mutate(|conn| {
            ensure_node(conn, id)?;
            conn.execute(
                "DELETE FROM dependencies WHERE source_id = ?1 AND name = ?2 AND target_id = ?3",
                params![id.to_string(), name, target.to_string()],
            )
            .engine()
        })?;
        if removed == 0 {
            return Err(StorageError::NotFound(format!(
                "dependency '{}' from {} to {}",
                name, id, target
            )));
        }
        self.emitter
            .emit_all(dependency_removed_events(id, name, target));
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.read(|conn| conn.execute_batch("COMMIT; BEGIN").engine())?;
        debug!(file_system = %self.name, "flushed");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let conn = self.lock().take();
        match conn {
            Some(conn) => {
                conn.execute_batch("COMMIT").engine()?;
                conn.close().map_err(|(_, e)| StorageError::engine(BACKEND, e))?;
                info!(file_system = %self.name, "closed mmap storage");
                Ok(())
            }
            None => Err(StorageError::Closed(self.name.clone())),
        }
    }
}

impl Drop for MmapFileStorage {
    fn drop(&mut self) {
        let conn = self
            .conn
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(conn) = conn {
            if let Err(e) = conn.execute_batch("COMMIT") {
                warn!(file_system = %self.name, error = %e, "failed to commit on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn open(path: &Path) -> MmapFileStorage {
        MmapFileStorage::open("mem", path, MmapOptions::default(), Arc::new(EventsBus::new()))
            .unwrap()
    }

    #[test]
    fn test_reopen_restores_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("afs.db");

        let (root, folder, data, data2) = {
            let storage = open(&path);
            let root = storage.root_node();
            let folder = storage.create_node(&root, NewNode::folder("test")).unwrap();
            let data = storage
                .create_node(
                    &folder,
                    NewNode::new("data", "data")
                        .with_description("first")
                        .with_version(3)
                        .with_metadata(NodeGenericMetadata::new().set_int("rows", 10)),
                )
                .unwrap();
            let data2 = storage.create_node(&folder, NewNode::new("data2", "data")).unwrap();
            storage.set_string_attribute(&data, "format", Some("TEST")).unwrap();
            let mut writer = storage.write_binary_data(&data, "blob").unwrap();
            writer.write_all(b"payload").unwrap();
            writer.close().unwrap();
            storage.add_dependency(&data, "mylink", &data2).unwrap();
            storage.close().unwrap();
            (root, folder, data, data2)
        };

        let storage = open(&path);
        assert_eq!(storage.root_node(), root);
        assert_eq!(storage.node_name(&root).unwrap(), "mem");
        assert_eq!(storage.child_nodes(&folder).unwrap(), vec![data.clone(), data2.clone()]);

        let info = storage.node_info(&data).unwrap();
        assert_eq!(info.description, "first");
        assert_eq!(info.version, 3);
        assert_eq!(info.metadata.int("rows"), Some(10));

        assert_eq!(
            storage.string_attribute(&data, "format").unwrap().as_deref(),
            Some("TEST")
        );
        assert_eq!(
            storage.read_binary_data(&data, "blob").unwrap().as_deref(),
            Some(&b"payload"[..])
        );
        assert_eq!(storage.dependency(&data, "mylink").unwrap(), Some(data2.clone()));
        assert_eq!(storage.backward_dependencies(&data2).unwrap(), vec![data]);
    }

    #[test]
    fn test_flushed_work_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("afs.db");

        let node = {
            let storage = open(&path);
            let root = storage.root_node();
            let node = storage.create_node(&root, NewNode::folder("kept")).unwrap();
            storage.flush().unwrap();
            node
        };

        let storage = open(&path);
        assert_eq!(storage.node_name(&node).unwrap(), "kept");
    }

    #[test]
    fn test_calls_after_close_fail() {
        let storage = MmapFileStorage::in_memory("mem").unwrap();
        let root = storage.root_node();
        storage.close().unwrap();

        assert!(matches!(
            storage.child_nodes(&root),
            Err(StorageError::Closed(_))
        ));
        assert!(matches!(storage.flush(), Err(StorageError::Closed(_))));
        assert!(matches!(storage.close(), Err(StorageError::Closed(_))));
    }

    #[test]
    fn test_failed_mutation_leaves_no_partial_state() {
        let storage = MmapFileStorage::in_memory("mem").unwrap();
        let root = storage.root_node();
        storage.create_node(&root, NewNode::folder("a")).unwrap();

        assert!(storage
            .create_node(&root, NewNode::folder("a"))
            .unwrap_err()
            .is_already_exists());
        assert_eq!(storage.child_nodes(&root).unwrap().len(), 1);

        // The open transaction is still usable
        storage.create_node(&root, NewNode::folder("b")).unwrap();
        storage.flush().unwrap();
        assert_eq!(storage.child_nodes(&root).unwrap().len(), 2);
    }

    #[test]
    fn test_moved_node_goes_last() {
        let storage = MmapFileStorage::in_memory("mem").unwrap();
        let root = storage.root_node();
        let a = storage.create_node(&root, NewNode::folder("a")).unwrap();
        let b = storage.create_node(&root, NewNode::folder("b")).unwrap();
        let inner = storage.create_node(&a, NewNode::folder("inner")).unwrap();

        storage.set_parent_node(&inner, &root).unwrap();
        assert_eq!(storage.child_nodes(&root).unwrap(), vec![a, b, inner]);
    }

    #[test]
    fn test_cycle_detection() {
        let storage = MmapFileStorage::in_memory("mem").unwrap();
        let root = storage.root_node();
        let a = storage.create_node(&root, NewNode::folder("a")).unwrap();
        let b = storage.create_node(&a, NewNode::folder("b")).unwrap();
        let c = storage.create_node(&b, NewNode::folder("c")).unwrap();

        assert!(matches!(
            storage.set_parent_node(&a, &c),
            Err(StorageError::InvalidOperation(_))
        ));
        assert_eq!(storage.parent_node(&a).unwrap(), Some(root));
    }

    #[test]
    fn test_deep_subtree_delete() {
        let storage = MmapFileStorage::in_memory("mem").unwrap();
        let root = storage.root_node();
        let other = storage.create_node(&root, NewNode::new("other", "data")).unwrap();
        let top = storage.create_node(&root, NewNode::folder("top")).unwrap();
        let mut leaf = top.clone();
        for i in 0..1100 {
            leaf = storage
                .create_node(&leaf, NewNode::folder(format!("level{}", i)))
                .unwrap();
        }
        storage.set_string_attribute(&leaf, "format", Some("TEST")).unwrap();
        storage.add_dependency(&leaf, "link", &other).unwrap();

        assert_eq!(storage.delete_node(&top).unwrap(), root);
        assert_eq!(storage.child_nodes(&root).unwrap(), vec![other.clone()]);
        assert!(storage.node_info(&leaf).unwrap_err().is_not_found());
        assert!(storage.backward_dependencies(&other).unwrap().is_empty());
    }
}
