//! In-memory resource with real savepoints.
//!
//! Writes made through a connection are buffered in its pending log and only
//! become visible in the shared tables on physical commit. A savepoint is a
//! marker into that log. Writes made without a connection are applied
//! immediately (auto-commit).
//!
//! Every physical call is journaled so callers can observe exactly what the
//! coordinator did, and the next open/commit/rollback/close can be made to
//! fail.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::{Resource, ResourceError, ResourceResult, SavepointId};
use crate::transaction::TransactionOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn{}", self.0)
    }
}

/// A stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Row {
    pub id: u64,
    pub columns: BTreeMap<String, String>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns.get(column).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
enum Write {
    Insert { table: String, row: Row },
    Update { table: String, id: u64, column: String, value: String },
}

/// A connection carrying one physical transaction.
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    options: TransactionOptions,
    opened_at: Instant,
    pending: Vec<Write>,
    /// Savepoint and the pending-log length when it was taken, oldest first.
    savepoints: Vec<(SavepointId, usize)>,
    next_savepoint: u32,
}

impl MemoryConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    fn marker(&self, savepoint: SavepointId) -> ResourceResult<usize> {
        self.savepoints
            .iter()
            .position(|(sp, _)| *sp == savepoint)
            .ok_or(ResourceError::UnknownSavepoint(savepoint))
    }
}

/// One journaled physical call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PhysicalEvent {
    Opened { connection: ConnectionId, read_only: bool },
    Committed { connection: ConnectionId },
    RolledBack { connection: ConnectionId },
    Closed { connection: ConnectionId },
    SavepointCreated { connection: ConnectionId, savepoint: u32 },
    RolledBackToSavepoint { connection: ConnectionId, savepoint: u32 },
    SavepointReleased { connection: ConnectionId, savepoint: u32 },
}

impl PhysicalEvent {
    pub fn connection(&self) -> ConnectionId {
        match self {
            Self::Opened { connection, .. }
            | Self::Committed { connection }
            | Self::RolledBack { connection }
            | Self::Closed { connection }
            | Self::SavepointCreated { connection, .. }
            | Self::RolledBackToSavepoint { connection, .. }
            | Self::SavepointReleased { connection, .. } => *connection,
        }
    }
}

impl std::fmt::Display for PhysicalEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opened {
                connection,
                read_only,
            } => {
                if *read_only {
                    write!(f, "{}: begin (read-only)", connection)
                } else {
                    write!(f, "{}: begin", connection)
                }
            }
            Self::Committed { connection } => write!(f, "{}: commit", connection),
            Self::RolledBack { connection } => write!(f, "{}: rollback", connection),
            Self::Closed { connection } => write!(f, "{}: close", connection),
            Self::SavepointCreated {
                connection,
                savepoint,
            } => write!(f, "{}: savepoint {}", connection, savepoint),
            Self::RolledBackToSavepoint {
                connection,
                savepoint,
            } => write!(f, "{}: rollback to savepoint {}", connection, savepoint),
            Self::SavepointReleased {
                connection,
                savepoint,
            } => write!(f, "{}: release savepoint {}", connection, savepoint),
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    open: bool,
    commit: bool,
    rollback: bool,
    close: bool,
}

/// Shared in-memory database.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: DashMap<String, Vec<Row>>,
    next_row_id: AtomicU64,
    next_connection_id: AtomicU64,
    journal: Mutex<Vec<PhysicalEvent>>,
    faults: Mutex<Faults>,
    open_connections: AtomicU64,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a row into `table`, buffered in `connection` when one is
    /// bound, applied immediately otherwise. Returns the new row id.
    pub fn insert(
        &self,
        connection: Option<&mut MemoryConnection>,
        table: &str,
        columns: &[(&str, &str)],
    ) -> ResourceResult<u64> {
        let row = Row {
            id: self.next_row_id.fetch_add(1, Ordering::Relaxed) + 1,
            columns: columns
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        let id = row.id;
        let write = Write::Insert {
            table: table.to_string(),
            row,
        };
        self.write(connection, write)?;
        Ok(id)
    }

    /// Sets one column of an existing row, with the same buffering rules as
    /// `insert`.
    pub fn update(
        &self,
        connection: Option<&mut MemoryConnection>,
        table: &str,
        id: u64,
        column: &str,
        value: &str,
    ) -> ResourceResult<()> {
        let write = Write::Update {
            table: table.to_string(),
            id,
            column: column.to_string(),
            value: value.to_string(),
        };
        self.write(connection, write)
    }

    fn write(&self, connection: Option<&mut MemoryConnection>, write: Write) -> ResourceResult<()> {
        match connection {
            Some(conn) if conn.options.read_only => Err(ResourceError::ReadOnly(conn.id.to_string())),
            Some(conn) => {
                conn.pending.push(write);
                Ok(())
            }
            None => {
                self.apply(write);
                Ok(())
            }
        }
    }

    fn apply(&self, write: Write) {
        match write {
            Write::Insert { table, row } => self.tables.entry(table).or_default().push(row),
            Write::Update {
                table,
                id,
                column,
                value,
            } => {
                if let Some(mut rows) = self.tables.get_mut(&table) {
                    if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
                        row.columns.insert(column, value);
                    }
                }
            }
        }
    }

    /// First committed row of `table` whose `column` equals `value`.
    pub fn find(&self, table: &str, column: &str, value: &str) -> Option<Row> {
        self.tables
            .get(table)?
            .iter()
            .find(|r| r.get(column) == Some(value))
            .cloned()
    }

    /// All committed rows of `table`.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .get(table)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<PhysicalEvent> {
        self.journal.lock().clone()
    }

    pub fn clear_events(&self) {
        self.journal.lock().clear();
    }

    pub fn commit_count(&self) -> usize {
        self.count(|e| matches!(e, PhysicalEvent::Committed { .. }))
    }

    pub fn rollback_count(&self) -> usize {
        self.count(|e| matches!(e, PhysicalEvent::RolledBack { .. }))
    }

    pub fn open_count(&self) -> usize {
        self.count(|e| matches!(e, PhysicalEvent::Opened { .. }))
    }

    /// Connections opened and not yet closed.
    pub fn open_connections(&self) -> u64 {
        self.open_connections.load(Ordering::Relaxed)
    }

    fn count(&self, pred: impl Fn(&PhysicalEvent) -> bool) -> usize {
        self.journal.lock().iter().filter(|e| pred(e)).count()
    }

    fn record(&self, event: PhysicalEvent) {
        self.journal.lock().push(event);
    }

    pub fn fail_next_open(&self) {
        self.faults.lock().open = true;
    }

    pub fn fail_next_commit(&self) {
        self.faults.lock().commit = true;
    }

    pub fn fail_next_rollback(&self) {
        self.faults.lock().rollback = true;
    }

    pub fn fail_next_close(&self) {
        self.faults.lock().close = true;
    }

    fn take_fault(&self, pick: impl FnOnce(&mut Faults) -> &mut bool) -> bool {
        let mut faults = self.faults.lock();
        std::mem::take(pick(&mut faults))
    }

    fn expired(conn: &MemoryConnection) -> Option<Duration> {
        conn.options
            .timeout
            .filter(|limit| conn.opened_at.elapsed() > *limit)
    }
}

impl Resource for MemoryDatabase {
    type Connection = MemoryConnection;

    fn open_physical(&self, options: &TransactionOptions) -> ResourceResult<MemoryConnection> {
        if self.take_fault(|f| &mut f.open) {
            return Err(ResourceError::ConnectionFailed("injected open failure".into()));
        }
        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        self.open_connections.fetch_add(1, Ordering::Relaxed);
        self.record(PhysicalEvent::Opened {
            connection: id,
            read_only: options.read_only,
        });
        Ok(MemoryConnection {
            id,
            options: *options,
            opened_at: Instant::now(),
            pending: Vec::new(),
            savepoints: Vec::new(),
            next_savepoint: 1,
        })
    }

    fn physical_commit(&self, connection: &mut MemoryConnection) -> ResourceResult<()> {
        if self.take_fault(|f| &mut f.commit) {
            connection.pending.clear();
            return Err(ResourceError::CommitFailed("injected commit failure".into()));
        }
        if let Some(limit) = Self::expired(connection) {
            connection.pending.clear();
            self.record(PhysicalEvent::RolledBack {
                connection: connection.id,
            });
            return Err(ResourceError::TimedOut { limit });
        }
        for write in connection.pending.drain(..) {
            self.apply(write);
        }
        connection.savepoints.clear();
        self.record(PhysicalEvent::Committed {
            connection: connection.id,
        });
        Ok(())
    }

    fn physical_rollback(&self, connection: &mut MemoryConnection) -> ResourceResult<()> {
        connection.pending.clear();
        connection.savepoints.clear();
        if self.take_fault(|f| &mut f.rollback) {
            return Err(ResourceError::RollbackFailed("injected rollback failure".into()));
        }
        self.record(PhysicalEvent::RolledBack {
            connection: connection.id,
        });
        Ok(())
    }

    fn close(&self, connection: MemoryConnection) -> ResourceResult<()> {
        self.open_connections.fetch_sub(1, Ordering::Relaxed);
        if self.take_fault(|f| &mut f.close) {
            return Err(ResourceError::ConnectionFailed("injected close failure".into()));
        }
        self.record(PhysicalEvent::Closed {
            connection: connection.id,
        });
        Ok(())
    }

    fn supports_savepoints(&self) -> bool {
        true
    }

    fn create_savepoint(&self, connection: &mut MemoryConnection) -> ResourceResult<SavepointId> {
        let savepoint = SavepointId(connection.next_savepoint);
        connection.next_savepoint += 1;
        connection
            .savepoints
            .push((savepoint, connection.pending.len()));
        self.record(PhysicalEvent::SavepointCreated {
            connection: connection.id,
            savepoint: savepoint.0,
        });
        Ok(savepoint)
    }

    fn rollback_to_savepoint(
        &self,
        connection: &mut MemoryConnection,
        savepoint: SavepointId,
    ) -> ResourceResult<()> {
        let index = connection.marker(savepoint)?;
        let len = connection.savepoints[index].1;
        connection.pending.truncate(len);
        connection.savepoints.truncate(index + 1);
        self.record(PhysicalEvent::RolledBackToSavepoint {
            connection: connection.id,
            savepoint: savepoint.0,
        });
        Ok(())
    }

    fn release_savepoint(
        &self,
        connection: &mut MemoryConnection,
        savepoint: SavepointId,
    ) -> ResourceResult<()> {
        let index = connection.marker(savepoint)?;
        connection.savepoints.truncate(index);
        self.record(PhysicalEvent::SavepointReleased {
            connection: connection.id,
            savepoint: savepoint.0,
        });
        Ok(())
    }
}
