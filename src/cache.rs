//! Local SQLite order cache.
//!
//! Uses rusqlite with WAL mode and versioned schema migrations. Unread
//! membership lives in its own id table rather than a column on the
//! order row, so the unread set can be validated and purged without
//! rewriting order data. Upserts from remote fetches never lower a
//! printed flag. Writers bump a generation counter published through a
//! `watch` channel so subscription tasks can re-query after each change
//! without polling.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::model::{FulfillmentInfo, Order, OrderId};
use crate::status::{self, OrderStatus};

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache database: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("cache lock poisoned")]
    Poisoned,
    #[error("cache setup: {0}")]
    Setup(String),
}

// ---------------------------------------------------------------------------
// Cache seam
// ---------------------------------------------------------------------------

/// Local order store consumed by the reconciler.
pub trait OrderCache: Send + Sync {
    fn cached_orders(&self) -> Result<Vec<Order>, CacheError>;
    fn order_by_id(&self, id: OrderId) -> Result<Option<Order>, CacheError>;
    fn orders_by_ids(&self, ids: &[OrderId]) -> Result<Vec<Order>, CacheError>;
    fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, CacheError>;
    fn all_order_ids(&self) -> Result<Vec<OrderId>, CacheError>;

    /// Insert or update orders. Existing rows keep their printed flag
    /// (it may only be raised); brand new rows join the unread set iff
    /// `new_unread`. Returns the ids of orders not seen before.
    fn upsert_orders(&self, orders: &[Order], new_unread: bool)
        -> Result<Vec<OrderId>, CacheError>;

    fn unread_order_ids(&self) -> Result<Vec<OrderId>, CacheError>;
    fn mark_orders_read(&self, ids: &[OrderId]) -> Result<usize, CacheError>;
    fn mark_all_read(&self) -> Result<usize, CacheError>;

    /// Returns false when no such order exists.
    fn mark_order_printed(&self, id: OrderId) -> Result<bool, CacheError>;

    /// Printed flags for every cached order, keyed by id.
    fn printed_flags(&self) -> Result<HashMap<OrderId, bool>, CacheError>;

    /// Write-generation counter; receivers re-query after each bump.
    fn changes(&self) -> watch::Receiver<u64>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

pub struct SqliteOrderCache {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    changes_tx: watch::Sender<u64>,
}

impl SqliteOrderCache {
    /// Open the cache at `{data_dir}/orders.db`.
    ///
    /// Creates the directory if needed, opens the connection, sets
    /// pragmas, and runs any pending migrations. On corruption or open
    /// failure, deletes the file and retries once.
    pub fn open(data_dir: &Path) -> Result<Self, CacheError> {
        fs::create_dir_all(data_dir)
            .map_err(|e| CacheError::Setup(format!("create data dir: {e}")))?;

        let db_path = data_dir.join("orders.db");
        info!("Opening order cache at {}", db_path.display());

        let conn = match open_and_configure(&db_path) {
            Ok(c) => c,
            Err(first_err) => {
                warn!(
                    "Cache open failed ({}), deleting and retrying once",
                    first_err
                );
                if db_path.exists() {
                    let _ = fs::remove_file(&db_path);
                    // Also remove WAL/SHM files if present
                    let _ = fs::remove_file(db_path.with_extension("db-wal"));
                    let _ = fs::remove_file(db_path.with_extension("db-shm"));
                }
                open_and_configure(&db_path)
                    .map_err(|e| CacheError::Setup(format!("open after retry: {e}")))?
            }
        };

        run_migrations(&conn)?;
        info!("Order cache initialized (schema v{CURRENT_SCHEMA_VERSION})");

        let (changes_tx, _) = watch::channel(0);
        Ok(SqliteOrderCache {
            conn: Mutex::new(conn),
            db_path,
            changes_tx,
        })
    }

    /// In-memory cache for tests and previews.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        run_migrations(&conn)?;
        let (changes_tx, _) = watch::channel(0);
        Ok(SqliteOrderCache {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
            changes_tx,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::Poisoned)
    }

    fn bump(&self) {
        self.changes_tx.send_modify(|generation| *generation += 1);
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) {
        self.lock().unwrap().execute_batch(sql).unwrap();
        self.bump();
    }
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, CacheError> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), CacheError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    info!("Migrating order cache from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<(), CacheError> {
    conn.execute_batch(
        "BEGIN;
         CREATE TABLE orders (
             id INTEGER PRIMARY KEY,
             number TEXT NOT NULL,
             status TEXT NOT NULL,
             total TEXT NOT NULL DEFAULT '',
             customer_name TEXT NOT NULL DEFAULT '',
             contact_info TEXT NOT NULL DEFAULT '',
             customer_note TEXT NOT NULL DEFAULT '',
             date_created TEXT NOT NULL,
             is_printed INTEGER NOT NULL DEFAULT 0
         );
         CREATE INDEX idx_orders_status ON orders(status);
         INSERT INTO schema_version (version) VALUES (1);
         COMMIT;",
    )?;
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<(), CacheError> {
    conn.execute_batch(
        "BEGIN;
         CREATE TABLE unread_orders (
             order_id INTEGER PRIMARY KEY,
             marked_at TEXT DEFAULT (datetime('now'))
         );
         INSERT INTO schema_version (version) VALUES (2);
         COMMIT;",
    )?;
    Ok(())
}

fn migrate_v3(conn: &Connection) -> Result<(), CacheError> {
    conn.execute_batch(
        "BEGIN;
         ALTER TABLE orders ADD COLUMN fulfillment_json TEXT;
         INSERT INTO schema_version (version) VALUES (3);
         COMMIT;",
    )?;
    Ok(())
}

const ORDER_COLUMNS: &str = "id, number, status, total, customer_name, contact_info,
     customer_note, date_created, is_printed, fulfillment_json";

fn row_to_order(row: &rusqlite::Row<'_>) -> rusqlite::Result<Order> {
    let date_raw: String = row.get(7)?;
    let fulfillment_json: Option<String> = row.get(9)?;
    Ok(Order {
        id: row.get(0)?,
        number: row.get(1)?,
        status: row.get(2)?,
        total: row.get(3)?,
        customer_name: row.get(4)?,
        contact_info: row.get(5)?,
        customer_note: row.get(6)?,
        date_created: chrono::DateTime::parse_from_rfc3339(&date_raw)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_default(),
        is_printed: row.get::<_, i64>(8)? != 0,
        fulfillment: fulfillment_json
            .as_deref()
            .and_then(|json| serde_json::from_str::<FulfillmentInfo>(json).ok()),
    })
}

fn ids_placeholder(len: usize) -> String {
    std::iter::repeat("?")
        .take(len)
        .collect::<Vec<_>>()
        .join(", ")
}

impl OrderCache for SqliteOrderCache {
    fn cached_orders(&self) -> Result<Vec<Order>, CacheError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY date_created DESC"
        ))?;
        let orders = stmt
            .query_map([], row_to_order)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(orders)
    }

    fn order_by_id(&self, id: OrderId) -> Result<Option<Order>, CacheError> {
        let conn = self.lock()?;
        let order = conn
            .query_row(
                &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"),
                params![id],
                row_to_order,
            )
            .optional()?;
        Ok(order)
    }

    fn orders_by_ids(&self, ids: &[OrderId]) -> Result<Vec<Order>, CacheError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE id IN ({})
             ORDER BY date_created DESC",
            ids_placeholder(ids.len())
        ))?;
        let orders = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), row_to_order)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(orders)
    }

    fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, CacheError> {
        // Rows may carry labels written by older app versions; match
        // through the vocabulary instead of raw equality.
        let orders = self
            .cached_orders()?
            .into_iter()
            .filter(|order| status::canonicalize(&order.status) == status.as_str())
            .collect();
        Ok(orders)
    }

    fn all_order_ids(&self) -> Result<Vec<OrderId>, CacheError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM orders")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn upsert_orders(
        &self,
        orders: &[Order],
        new_unread: bool,
    ) -> Result<Vec<OrderId>, CacheError> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        let new_ids;
        {
            let conn = self.lock()?;

            let candidate_ids: Vec<OrderId> = orders.iter().map(|o| o.id).collect();
            let mut existing_stmt = conn.prepare(&format!(
                "SELECT id FROM orders WHERE id IN ({})",
                ids_placeholder(candidate_ids.len())
            ))?;
            let existing: Vec<OrderId> = existing_stmt
                .query_map(rusqlite::params_from_iter(candidate_ids.iter()), |row| {
                    row.get(0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            new_ids = candidate_ids
                .into_iter()
                .filter(|id| !existing.contains(id))
                .collect::<Vec<_>>();

            let mut stmt = conn.prepare(
                "INSERT INTO orders (
                     id, number, status, total, customer_name, contact_info,
                     customer_note, date_created, is_printed, fulfillment_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                     number = excluded.number,
                     status = excluded.status,
                     total = excluded.total,
                     customer_name = excluded.customer_name,
                     contact_info = excluded.contact_info,
                     customer_note = excluded.customer_note,
                     date_created = excluded.date_created,
                     is_printed = MAX(orders.is_printed, excluded.is_printed),
                     fulfillment_json = excluded.fulfillment_json",
            )?;
            for order in orders {
                let fulfillment_json = order
                    .fulfillment
                    .as_ref()
                    .and_then(|info| serde_json::to_string(info).ok());
                stmt.execute(params![
                    order.id,
                    order.number,
                    status::canonicalize(&order.status),
                    order.total,
                    order.customer_name,
                    order.contact_info,
                    order.customer_note,
                    order.date_created.to_rfc3339(),
                    order.is_printed as i64,
                    fulfillment_json,
                ])?;
            }

            if new_unread && !new_ids.is_empty() {
                let mut unread_stmt = conn
                    .prepare("INSERT OR IGNORE INTO unread_orders (order_id) VALUES (?1)")?;
                for id in &new_ids {
                    unread_stmt.execute(params![id])?;
                }
            }
        }
        self.bump();
        Ok(new_ids)
    }

    fn unread_order_ids(&self) -> Result<Vec<OrderId>, CacheError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT order_id FROM unread_orders")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn mark_orders_read(&self, ids: &[OrderId]) -> Result<usize, CacheError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let changed = {
            let conn = self.lock()?;
            conn.execute(
                &format!(
                    "DELETE FROM unread_orders WHERE order_id IN ({})",
                    ids_placeholder(ids.len())
                ),
                rusqlite::params_from_iter(ids.iter()),
            )?
        };
        if changed > 0 {
            self.bump();
        }
        Ok(changed)
    }

    fn mark_all_read(&self) -> Result<usize, CacheError> {
        let changed = {
            let conn = self.lock()?;
            conn.execute("DELETE FROM unread_orders", [])?
        };
        if changed > 0 {
            self.bump();
        }
        Ok(changed)
    }

    fn mark_order_printed(&self, id: OrderId) -> Result<bool, CacheError> {
        let changed = {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE orders SET is_printed = 1 WHERE id = ?1",
                params![id],
            )?
        };
        if changed > 0 {
            self.bump();
        }
        Ok(changed > 0)
    }

    fn printed_flags(&self) -> Result<HashMap<OrderId, bool>, CacheError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, is_printed FROM orders")?;
        let flags = stmt
            .query_map([], |row| {
                Ok((row.get::<_, OrderId>(0)?, row.get::<_, i64>(1)? != 0))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(flags)
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.changes_tx.subscribe()
    }
}
