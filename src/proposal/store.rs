//! SQLite-backed proposal store with a dedicated writer thread.
//!
//! All mutations funnel through one writer thread (mpsc commands answered
//! over oneshot channels); reads go to a small pool of read-only
//! connections via `spawn_blocking`. Two unique keys carry the router's
//! core invariants: `proposals.idempotency_key` deduplicates propose, and
//! the `apply_guards` primary key is the exactly-once apply lock — its
//! insert either succeeds or reports `Already`, never check-then-insert.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::error::{Result, RouterError};

use super::{ProposalStatus, RoutingProposal, store_err, store_err_with};

const READ_POOL_SIZE: usize = 2;

const SELECT_COLUMNS: &str = "id, idempotency_key, board_id, item_id, status, assignee, \
     action, selected_rule, normalized_values, explains, created_at, decided_at";

/// Raw proposal row; JSON columns are parsed after the query.
type ProposalRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
    String,
    Option<String>,
);

/// Result of the atomic propose insert.
#[derive(Debug)]
pub enum InsertOutcome {
    Inserted,
    /// Another proposal already owns this idempotency key.
    Existing(RoutingProposal),
}

/// Result of the atomic apply-guard insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    /// This caller owns the apply.
    Created,
    /// An apply was already attempted for this proposal.
    Already,
}

enum StoreCommand {
    Insert {
        proposal: Box<RoutingProposal>,
        response: oneshot::Sender<Result<InsertOutcome>>,
    },
    UpdateStatus {
        id: String,
        from: ProposalStatus,
        to: ProposalStatus,
        decided_at: Option<DateTime<Utc>>,
        assignee: Option<String>,
        response: oneshot::Sender<Result<()>>,
    },
    BeginApply {
        proposal_id: String,
        response: oneshot::Sender<Result<GuardOutcome>>,
    },
    Shutdown,
}

struct StoreWriter {
    tx: Sender<StoreCommand>,
    handle: Option<JoinHandle<()>>,
}

impl StoreWriter {
    fn new(db_path: PathBuf) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let handle = thread::Builder::new()
            .name("proposal-writer".into())
            .spawn(move || match Self::init_db(&db_path) {
                Ok(conn) => {
                    let _ = ready_tx.send(Ok(()));
                    Self::process_commands(&conn, rx);
                }
                Err(e) => {
                    error!(error = %e, "Proposal writer init failed");
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| store_err_with("Failed to spawn writer thread", e))?;

        ready_rx
            .recv()
            .map_err(|_| store_err("Writer thread died during init"))??;

        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    fn init_db(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path)
            .map_err(|e| store_err_with("Failed to open database", e))?;
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS proposals (
                id TEXT PRIMARY KEY,
                idempotency_key TEXT NOT NULL UNIQUE,
                board_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                status TEXT NOT NULL,
                assignee TEXT NOT NULL,
                action TEXT NOT NULL,
                selected_rule TEXT,
                normalized_values TEXT NOT NULL,
                explains TEXT NOT NULL,
                created_at TEXT NOT NULL,
                decided_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_proposals_item
                ON proposals(board_id, item_id);
            CREATE INDEX IF NOT EXISTS idx_proposals_status
                ON proposals(status);

            CREATE TABLE IF NOT EXISTS apply_guards (
                proposal_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| store_err_with("Failed to init schema", e))?;
        Ok(conn)
    }

    fn process_commands(conn: &Connection, rx: Receiver<StoreCommand>) {
        for cmd in rx {
            match cmd {
                StoreCommand::Insert { proposal, response } => {
                    let _ = response.send(Self::insert(conn, &proposal));
                }
                StoreCommand::UpdateStatus {
                    id,
                    from,
                    to,
                    decided_at,
                    assignee,
                    response,
                } => {
                    let _ = response
                        .send(Self::update_status(conn, &id, from, to, decided_at, assignee));
                }
                StoreCommand::BeginApply {
                    proposal_id,
                    response,
                } => {
                    let _ = response.send(Self::begin_apply(conn, &proposal_id));
                }
                StoreCommand::Shutdown => {
                    debug!("Proposal writer received shutdown signal");
                    break;
                }
            }
        }
    }

    fn insert(conn: &Connection, proposal: &RoutingProposal) -> Result<InsertOutcome> {
        let result = conn.execute(
            "INSERT INTO proposals (id, idempotency_key, board_id, item_id, status, assignee, \
                action, selected_rule, normalized_values, explains, created_at, decided_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                proposal.id,
                proposal.idempotency_key,
                proposal.board_id,
                proposal.item_id,
                proposal.status.as_str(),
                proposal.assignee,
                serde_json::to_string(&proposal.action)
                    .map_err(|e| store_err_with("Failed to serialize action", e))?,
                proposal
                    .selected_rule
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()
                    .map_err(|e| store_err_with("Failed to serialize rule", e))?,
                serde_json::to_string(&proposal.normalized_values)
                    .map_err(|e| store_err_with("Failed to serialize values", e))?,
                serde_json::to_string(&proposal.explains)
                    .map_err(|e| store_err_with("Failed to serialize explains", e))?,
                proposal.created_at.to_rfc3339(),
                proposal.decided_at.map(|d| d.to_rfc3339()),
            ],
        );

        match result {
            Ok(_) => {
                debug!(proposal_id = %proposal.id, key = %proposal.idempotency_key, "Proposal inserted");
                Ok(InsertOutcome::Inserted)
            }
            Err(e) if is_constraint_violation(&e) => {
                let existing = query_by_key(conn, &proposal.idempotency_key)?
                    .ok_or_else(|| store_err("Duplicate key but existing row not found"))?;
                debug!(proposal_id = %existing.id, "Propose deduplicated onto existing proposal");
                Ok(InsertOutcome::Existing(existing))
            }
            Err(e) => Err(store_err_with("Failed to insert proposal", e)),
        }
    }

    fn update_status(
        conn: &Connection,
        id: &str,
        from: ProposalStatus,
        to: ProposalStatus,
        decided_at: Option<DateTime<Utc>>,
        assignee: Option<String>,
    ) -> Result<()> {
        // Conditional update: the WHERE clause is the compare-and-swap.
        let affected = conn
            .execute(
                "UPDATE proposals SET status = ?1,
                        decided_at = COALESCE(?2, decided_at),
                        assignee = COALESCE(?3, assignee)
                 WHERE id = ?4 AND status = ?5",
                params![
                    to.as_str(),
                    decided_at.map(|d| d.to_rfc3339()),
                    assignee,
                    id,
                    from.as_str(),
                ],
            )
            .map_err(|e| store_err_with("Failed to update status", e))?;

        if affected == 1 {
            return Ok(());
        }

        let actual: Option<String> = conn
            .query_row(
                "SELECT status FROM proposals WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| store_err_with("Failed to read status", e))?;

        match actual {
            None => Err(RouterError::ProposalNotFound(id.to_string())),
            Some(actual) => {
                warn!(proposal_id = %id, actual = %actual, target = %to, "Status transition refused");
                Err(RouterError::InvalidTransition {
                    from: actual,
                    to: to.to_string(),
                })
            }
        }
    }

    fn begin_apply(conn: &Connection, proposal_id: &str) -> Result<GuardOutcome> {
        let result = conn.execute(
            "INSERT INTO apply_guards (proposal_id, created_at) VALUES (?1, ?2)",
            params![proposal_id, Utc::now().to_rfc3339()],
        );

        match result {
            Ok(_) => Ok(GuardOutcome::Created),
            Err(e) if is_constraint_violation(&e) => Ok(GuardOutcome::Already),
            Err(e) => Err(store_err_with("Failed to create apply guard", e)),
        }
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        let _ = self.tx.send(StoreCommand::Shutdown);
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.join()
        {
            warn!("Proposal writer thread panicked: {:?}", e);
        }
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(ffi, _)
            if ffi.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

struct ReadPool {
    connections: Vec<Mutex<Connection>>,
    next: std::sync::atomic::AtomicUsize,
}

impl ReadPool {
    fn new(db_path: &Path, size: usize) -> Result<Self> {
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open_with_flags(
                db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| store_err_with("Failed to open read connection", e))?;
            connections.push(Mutex::new(conn));
        }
        Ok(Self {
            connections,
            next: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    fn acquire(&self) -> parking_lot::MutexGuard<'_, Connection> {
        let idx =
            self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % self.connections.len();
        self.connections[idx].lock()
    }
}

struct StoreInner {
    writer_tx: Sender<StoreCommand>,
    read_pool: ReadPool,
    /// Holds the writer thread handle for the store's lifetime.
    #[allow(dead_code)]
    writer: StoreWriter,
}

#[derive(Clone)]
pub struct ProposalStore {
    inner: Arc<StoreInner>,
}

impl ProposalStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| store_err_with("Failed to create db directory", e))?;
        }

        let writer = StoreWriter::new(db_path.clone())?;
        let writer_tx = writer.tx.clone();
        let read_pool = ReadPool::new(&db_path, READ_POOL_SIZE)?;

        Ok(Self {
            inner: Arc::new(StoreInner {
                writer_tx,
                read_pool,
                writer,
            }),
        })
    }

    /// Insert a new proposal, or return the existing one holding the same
    /// idempotency key. The unique index is the arbiter.
    pub async fn insert(&self, proposal: RoutingProposal) -> Result<InsertOutcome> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreCommand::Insert {
            proposal: Box::new(proposal),
            response: tx,
        })?;
        rx.await
            .map_err(|_| store_err("Writer response channel dropped"))?
    }

    /// Compare-and-swap status update; fails when the stored status does
    /// not match `from`. An override passes the replacement assignee.
    pub async fn update_status(
        &self,
        id: &str,
        from: ProposalStatus,
        to: ProposalStatus,
        decided_at: Option<DateTime<Utc>>,
        assignee: Option<String>,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreCommand::UpdateStatus {
            id: id.to_string(),
            from,
            to,
            decided_at,
            assignee,
            response: tx,
        })?;
        rx.await
            .map_err(|_| store_err("Writer response channel dropped"))?
    }

    /// Atomically claim the apply for a proposal.
    pub async fn begin_apply(&self, proposal_id: &str) -> Result<GuardOutcome> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreCommand::BeginApply {
            proposal_id: proposal_id.to_string(),
            response: tx,
        })?;
        rx.await
            .map_err(|_| store_err("Writer response channel dropped"))?
    }

    pub async fn get(&self, id: &str) -> Result<Option<RoutingProposal>> {
        let id = id.to_string();
        self.read(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM proposals WHERE id = ?1"),
                    params![id],
                    read_row,
                )
                .optional()
                .map_err(|e| store_err_with("Failed to read proposal", e))?;
            row.map(parse_row).transpose()
        })
        .await
    }

    pub async fn get_by_key(&self, key: &str) -> Result<Option<RoutingProposal>> {
        let key = key.to_string();
        self.read(move |conn| query_by_key(conn, &key)).await
    }

    /// Most recent proposal for an item, excluding one proposal id.
    /// Used by the forced-manual trigger to compare against the previous
    /// decision for the same lead.
    pub async fn latest_for_item(
        &self,
        board_id: &str,
        item_id: &str,
        exclude_id: &str,
    ) -> Result<Option<RoutingProposal>> {
        let board_id = board_id.to_string();
        let item_id = item_id.to_string();
        let exclude_id = exclude_id.to_string();
        self.read(move |conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM proposals
                         WHERE board_id = ?1 AND item_id = ?2 AND id != ?3
                         ORDER BY created_at DESC, rowid DESC LIMIT 1"
                    ),
                    params![board_id, item_id, exclude_id],
                    read_row,
                )
                .optional()
                .map_err(|e| store_err_with("Failed to read latest proposal", e))?;
            row.map(parse_row).transpose()
        })
        .await
    }

    pub async fn list(&self, status: Option<ProposalStatus>) -> Result<Vec<RoutingProposal>> {
        self.read(move |conn| {
            let (sql, filter) = match status {
                Some(status) => (
                    format!(
                        "SELECT {SELECT_COLUMNS} FROM proposals WHERE status = ?1
                         ORDER BY created_at DESC, rowid DESC"
                    ),
                    Some(status.as_str()),
                ),
                None => (
                    format!(
                        "SELECT {SELECT_COLUMNS} FROM proposals
                         ORDER BY created_at DESC, rowid DESC"
                    ),
                    None,
                ),
            };

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| store_err_with("Failed to prepare list query", e))?;
            let rows = match filter {
                Some(status) => stmt.query_map(params![status], read_row),
                None => stmt.query_map([], read_row),
            }
            .map_err(|e| store_err_with("Failed to list proposals", e))?;

            let mut proposals = Vec::new();
            for row in rows {
                let row = row.map_err(|e| store_err_with("Failed to read proposal row", e))?;
                proposals.push(parse_row(row)?);
            }
            Ok(proposals)
        })
        .await
    }

    fn send(&self, cmd: StoreCommand) -> Result<()> {
        self.inner
            .writer_tx
            .send(cmd)
            .map_err(|_| store_err("Writer thread disconnected"))
    }

    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let guard = inner.read_pool.acquire();
            f(&guard)
        })
        .await
        .map_err(|e| store_err_with("Read task failed", e))?
    }
}

fn query_by_key(conn: &Connection, key: &str) -> Result<Option<RoutingProposal>> {
    let row = conn
        .query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM proposals WHERE idempotency_key = ?1"),
            params![key],
            read_row,
        )
        .optional()
        .map_err(|e| store_err_with("Failed to read proposal by key", e))?;
    row.map(parse_row).transpose()
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProposalRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

fn parse_row(row: ProposalRow) -> Result<RoutingProposal> {
    let (
        id,
        idempotency_key,
        board_id,
        item_id,
        status,
        assignee,
        action,
        selected_rule,
        normalized_values,
        explains,
        created_at,
        decided_at,
    ) = row;

    Ok(RoutingProposal {
        id,
        idempotency_key,
        board_id,
        item_id,
        status: ProposalStatus::parse(&status)
            .ok_or_else(|| store_err(format!("Unknown proposal status '{status}'")))?,
        assignee,
        action: serde_json::from_str(&action)
            .map_err(|e| store_err_with("Failed to parse action", e))?,
        selected_rule: selected_rule
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| store_err_with("Failed to parse rule", e))?,
        normalized_values: serde_json::from_str(&normalized_values)
            .map_err(|e| store_err_with("Failed to parse values", e))?,
        explains: serde_json::from_str(&explains)
            .map_err(|e| store_err_with("Failed to parse explains", e))?,
        created_at: parse_timestamp(&created_at)?,
        decided_at: decided_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| store_err_with("Failed to parse timestamp", e))
}
