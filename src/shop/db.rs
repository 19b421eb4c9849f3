use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, Row, params, params_from_iter};
use serde::de::DeserializeOwned;

use crate::domain::*;

/// Async-safe handle to the shop database.
///
/// Wraps `ShopDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, keeping synchronous SQLite I/O
/// off the async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<ShopDb>>,
}

impl DbHandle {
    pub fn new(db: ShopDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ShopDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

/// Row mapping for a record type. The first column is always `id`.
pub trait Stored: Record {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];

    fn to_values(&self) -> Result<Vec<Value>>;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

pub struct ShopDb {
    conn: Connection,
}

impl ShopDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS machine_types (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    stations INTEGER NOT NULL DEFAULT 1,
                    color TEXT
                );

                CREATE TABLE IF NOT EXISTS job_works (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    vendor TEXT NOT NULL DEFAULT '',
                    contact TEXT NOT NULL DEFAULT '',
                    notes TEXT NOT NULL DEFAULT ''
                );

                CREATE TABLE IF NOT EXISTS work_orders (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    product TEXT NOT NULL DEFAULT '',
                    quantity INTEGER NOT NULL,
                    quantity_done INTEGER NOT NULL DEFAULT 0,
                    current_step_index INTEGER NOT NULL DEFAULT -1,
                    steps TEXT NOT NULL DEFAULT '[]',
                    parent_id TEXT REFERENCES work_orders(id) ON DELETE SET NULL,
                    notes TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS items (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    unit TEXT NOT NULL DEFAULT '',
                    quantity INTEGER NOT NULL DEFAULT 0,
                    min_quantity INTEGER NOT NULL DEFAULT 0,
                    sub_items TEXT NOT NULL DEFAULT '[]',
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS roadmaps (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    phases TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_work_orders_parent ON work_orders(parent_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Generic record CRUD ───────────────────────────────────────────

    pub fn list<T: Stored>(&self) -> Result<Vec<T>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            T::COLUMNS.join(", "),
            T::TABLE
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("Failed to prepare list for {}", T::TABLE))?;
        let rows = stmt
            .query_map([], |row| T::from_row(row))
            .with_context(|| format!("Failed to query {}", T::TABLE))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.with_context(|| format!("Failed to read {} row", T::TABLE))?);
        }
        Ok(records)
    }

    pub fn get<T: Stored>(&self, id: &str) -> Result<Option<T>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1",
            T::COLUMNS.join(", "),
            T::TABLE
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("Failed to prepare get for {}", T::TABLE))?;
        let mut rows = stmt
            .query_map(params![id], |row| T::from_row(row))
            .with_context(|| format!("Failed to query {}", T::TABLE))?;
        match rows.next() {
            Some(row) => Ok(Some(
                row.with_context(|| format!("Failed to read {} row", T::TABLE))?,
            )),
            None => Ok(None),
        }
    }

    pub fn exists<T: Stored>(&self, id: &str) -> Result<bool> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", T::TABLE);
        self.conn
            .query_row(&sql, params![id], |row| row.get(0))
            .with_context(|| format!("Failed to check {} existence", T::TABLE))
    }

    /// Insert a new record. Returns `None` when the id is already taken.
    pub fn insert<T: Stored>(&self, record: &T) -> Result<Option<T>> {
        if self.exists::<T>(record.id())? {
            return Ok(None);
        }
        let placeholders: Vec<String> = (1..=T::COLUMNS.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            T::TABLE,
            T::COLUMNS.join(", "),
            placeholders.join(", ")
        );
        self.conn
            .execute(&sql, params_from_iter(record.to_values()?))
            .with_context(|| format!("Failed to insert into {}", T::TABLE))?;
        self.get::<T>(record.id())?
            .with_context(|| format!("{} not found after insert", T::RESOURCE.label()))
            .map(Some)
    }

    /// Replace every column of an existing record. Returns `None` when the id
    /// is unknown.
    pub fn replace<T: Stored>(&self, record: &T) -> Result<Option<T>> {
        let assignments: Vec<String> = T::COLUMNS
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, col)| format!("{} = ?{}", col, i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?1",
            T::TABLE,
            assignments.join(", ")
        );
        let count = self
            .conn
            .execute(&sql, params_from_iter(record.to_values()?))
            .with_context(|| format!("Failed to update {}", T::TABLE))?;
        if count == 0 {
            return Ok(None);
        }
        self.get::<T>(record.id())
    }

    pub fn delete<T: Stored>(&self, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", T::TABLE);
        let count = self
            .conn
            .execute(&sql, params![id])
            .with_context(|| format!("Failed to delete from {}", T::TABLE))?;
        Ok(count > 0)
    }

    // ── Referential checks ────────────────────────────────────────────

    /// Describe every machine type, job work or parent order the given work
    /// order points at that does not exist.
    pub fn missing_references(&self, order: &WorkOrder) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for step in &order.steps {
            if let Some(mt) = &step.machine_type_id {
                if !self.exists::<MachineTypeConfig>(mt)? {
                    missing.push(format!("machine type {} (step '{}')", mt, step.label));
                }
            }
            if let Some(jw) = &step.job_work_id {
                if !self.exists::<JobWork>(jw)? {
                    missing.push(format!("job work {} (step '{}')", jw, step.label));
                }
            }
        }
        if let Some(parent) = &order.parent_id {
            if !self.exists::<WorkOrder>(parent)? {
                missing.push(format!("parent work order {}", parent));
            }
        }
        Ok(missing)
    }

    /// Number of work orders with a path step pointing at `id` through `field`
    /// (`machineTypeId` or `jobWorkId`).
    pub fn step_reference_count(&self, field: &str, id: &str) -> Result<i64> {
        let path = format!("$.{}", field);
        self.conn
            .query_row(
                "SELECT COUNT(DISTINCT work_orders.id)
                 FROM work_orders, json_each(work_orders.steps)
                 WHERE json_extract(json_each.value, ?1) = ?2",
                params![path, id],
                |row| row.get(0),
            )
            .context("Failed to count step references")
    }
}

// ── Row mappings ──────────────────────────────────────────────────────

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    Ok(Value::Text(
        serde_json::to_string(value).context("Failed to encode JSON column")?,
    ))
}

fn optional_text(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::Text(s.clone()),
        None => Value::Null,
    }
}

impl Stored for WorkOrder {
    const TABLE: &'static str = "work_orders";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "product",
        "quantity",
        "quantity_done",
        "current_step_index",
        "steps",
        "parent_id",
        "notes",
        "created_at",
        "updated_at",
    ];

    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            Value::Text(self.id.clone()),
            Value::Text(self.name.clone()),
            Value::Text(self.product.clone()),
            Value::Integer(i64::from(self.quantity)),
            Value::Integer(i64::from(self.quantity_done)),
            Value::Integer(i64::from(self.current_step_index)),
            json_value(&self.steps)?,
            optional_text(&self.parent_id),
            Value::Text(self.notes.clone()),
            Value::Text(self.created_at.clone()),
            Value::Text(self.updated_at.clone()),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(WorkOrder {
            id: row.get(0)?,
            name: row.get(1)?,
            product: row.get(2)?,
            quantity: row.get(3)?,
            quantity_done: row.get(4)?,
            current_step_index: row.get(5)?,
            steps: json_column(row, 6)?,
            parent_id: row.get(7)?,
            notes: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl Stored for JobWork {
    const TABLE: &'static str = "job_works";
    const COLUMNS: &'static [&'static str] = &["id", "name", "vendor", "contact", "notes"];

    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            Value::Text(self.id.clone()),
            Value::Text(self.name.clone()),
            Value::Text(self.vendor.clone()),
            Value::Text(self.contact.clone()),
            Value::Text(self.notes.clone()),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(JobWork {
            id: row.get(0)?,
            name: row.get(1)?,
            vendor: row.get(2)?,
            contact: row.get(3)?,
            notes: row.get(4)?,
        })
    }
}

impl Stored for MachineTypeConfig {
    const TABLE: &'static str = "machine_types";
    const COLUMNS: &'static [&'static str] = &["id", "name", "stations", "color"];

    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            Value::Text(self.id.clone()),
            Value::Text(self.name.clone()),
            Value::Integer(i64::from(self.stations)),
            optional_text(&self.color),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(MachineTypeConfig {
            id: row.get(0)?,
            name: row.get(1)?,
            stations: row.get(2)?,
            color: row.get(3)?,
        })
    }
}

impl Stored for Item {
    const TABLE: &'static str = "items";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "unit",
        "quantity",
        "min_quantity",
        "sub_items",
        "updated_at",
    ];

    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            Value::Text(self.id.clone()),
            Value::Text(self.name.clone()),
            Value::Text(self.unit.clone()),
            Value::Integer(self.quantity),
            Value::Integer(self.min_quantity),
            json_value(&self.sub_items)?,
            Value::Text(self.updated_at.clone()),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Item {
            id: row.get(0)?,
            name: row.get(1)?,
            unit: row.get(2)?,
            quantity: row.get(3)?,
            min_quantity: row.get(4)?,
            sub_items: json_column(row, 5)?,
            updated_at: row.get(6)?,
        })
    }
}

impl Stored for Roadmap {
    const TABLE: &'static str = "roadmaps";
    const COLUMNS: &'static [&'static str] = &["id", "title", "phases", "created_at"];

    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            Value::Text(self.id.clone()),
            Value::Text(self.title.clone()),
            json_value(&self.phases)?,
            Value::Text(self.created_at.clone()),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Roadmap {
            id: row.get(0)?,
            title: row.get(1)?,
            phases: json_column(row, 2)?,
            created_at: row.get(3)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_type(id: &str) -> MachineTypeConfig {
        MachineTypeConfig {
            id: id.to_string(),
            name: format!("Machine {}", id),
            stations: 2,
            color: None,
        }
    }

    fn order_on(mt: &str, quantity: u32) -> WorkOrder {
        WorkOrder::new("Tees", "T-shirt", quantity, vec![PathStep::machine("Cutting", mt)]).unwrap()
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = ShopDb::new_in_memory()?;
        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
             ('work_orders', 'job_works', 'machine_types', 'items', 'roadmaps')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 5);
        Ok(())
    }

    #[test]
    fn test_migrations_are_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("shop.db");
        ShopDb::new(&path)?;
        let db = ShopDb::new(&path)?;
        assert!(db.list::<WorkOrder>()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_work_order_round_trip_keeps_steps() -> Result<()> {
        let db = ShopDb::new_in_memory()?;
        db.insert(&machine_type("mt-cut"))?;
        let mut order = order_on("mt-cut", 40);
        order.advance()?;

        let stored = db.insert(&order)?.expect("inserted");
        assert_eq!(stored, order);

        let listed = db.list::<WorkOrder>()?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].steps[0].status, StepStatus::Running);
        Ok(())
    }

    #[test]
    fn test_insert_duplicate_id_returns_none() -> Result<()> {
        let db = ShopDb::new_in_memory()?;
        let mt = machine_type("mt-1");
        assert!(db.insert(&mt)?.is_some());
        assert!(db.insert(&mt)?.is_none());
        Ok(())
    }

    #[test]
    fn test_replace_and_delete() -> Result<()> {
        let db = ShopDb::new_in_memory()?;
        let mut item = Item {
            id: "it-1".into(),
            name: "Buttons".into(),
            unit: "pcs".into(),
            quantity: 500,
            min_quantity: 100,
            sub_items: vec![SubItem {
                id: "s1".into(),
                name: "Black".into(),
                quantity: 200,
            }],
            updated_at: String::new(),
        };
        db.insert(&item)?;

        item.sub_items[0].quantity = 150;
        let replaced = db.replace(&item)?.expect("exists");
        assert_eq!(replaced.sub_items[0].quantity, 150);

        let mut ghost = item.clone();
        ghost.id = "missing".into();
        assert!(db.replace(&ghost)?.is_none());

        assert!(db.delete::<Item>("it-1")?);
        assert!(!db.delete::<Item>("it-1")?);
        assert!(db.get::<Item>("it-1")?.is_none());
        Ok(())
    }

    #[test]
    fn test_list_preserves_insertion_order() -> Result<()> {
        let db = ShopDb::new_in_memory()?;
        for id in ["c", "a", "b"] {
            db.insert(&machine_type(id))?;
        }
        let ids: Vec<String> = db.list::<MachineTypeConfig>()?.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        Ok(())
    }

    #[test]
    fn test_missing_references() -> Result<()> {
        let db = ShopDb::new_in_memory()?;
        let mut order = order_on("mt-none", 10);
        order.parent_id = Some("wo-ghost".into());
        let missing = db.missing_references(&order)?;
        assert_eq!(missing.len(), 2);
        assert!(missing[0].contains("mt-none"));
        assert!(missing[1].contains("wo-ghost"));
        Ok(())
    }

    #[test]
    fn test_step_reference_count() -> Result<()> {
        let db = ShopDb::new_in_memory()?;
        db.insert(&machine_type("mt-cut"))?;
        db.insert(&order_on("mt-cut", 10))?;
        db.insert(&order_on("mt-cut", 20))?;
        assert_eq!(db.step_reference_count("machineTypeId", "mt-cut")?, 2);
        assert_eq!(db.step_reference_count("machineTypeId", "mt-other")?, 0);
        Ok(())
    }

    #[test]
    fn test_deleting_parent_clears_child_link() -> Result<()> {
        let db = ShopDb::new_in_memory()?;
        db.insert(&machine_type("mt-cut"))?;
        let mut parent = order_on("mt-cut", 100);
        let children = parent.split(&[25])?;
        db.insert(&parent)?;
        db.insert(&children[0])?;

        assert!(db.delete::<WorkOrder>(&parent.id)?);
        let child = db.get::<WorkOrder>(&children[0].id)?.expect("child survives");
        assert!(child.parent_id.is_none());
        Ok(())
    }
}
