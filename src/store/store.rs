//! Workflow state store

use super::model::{WorkflowInstance, WorkflowObject, WorkflowStatus};
use super::schema::init_schema;
use crate::error::{Result, WorkflowError};
use crate::jobs::{Job, JobHandle, JobQueue, JobRequest};
use crate::workflow::Position;
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use serde_json::{Map, Value};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const INSTANCE_COLUMNS: &str =
    "uuid, name, owner_id, status, position, extra_data, version, message, created_at, modified_at";

const OBJECT_COLUMNS: &str = "id, workflow_uuid, parent_id, data, created_at, modified_at";

/// Equality filter over instances
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub owner_id: Option<String>,
    pub name: Option<String>,
    pub status: Option<WorkflowStatus>,
    /// Finished instances are skipped unless this is set
    pub include_finished: bool,
}

impl InstanceFilter {
    pub fn owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Raw instance row, decoded outside the rusqlite row closure
struct InstanceRow {
    uuid: String,
    name: String,
    owner_id: String,
    status: String,
    position: String,
    extra_data: String,
    version: i64,
    message: Option<String>,
    created_at: String,
    modified_at: String,
}

impl InstanceRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            uuid: row.get(0)?,
            name: row.get(1)?,
            owner_id: row.get(2)?,
            status: row.get(3)?,
            position: row.get(4)?,
            extra_data: row.get(5)?,
            version: row.get(6)?,
            message: row.get(7)?,
            created_at: row.get(8)?,
            modified_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<WorkflowInstance> {
        Ok(WorkflowInstance {
            id: parse_uuid(&self.uuid)?,
            name: self.name,
            owner_id: self.owner_id,
            status: WorkflowStatus::from_str(&self.status)?,
            position: serde_json::from_str(&self.position)?,
            extra_data: serde_json::from_str(&self.extra_data)?,
            version: self.version,
            message: self.message,
            created_at: self.created_at,
            modified_at: self.modified_at,
        })
    }
}

struct ObjectRow {
    id: i64,
    workflow_uuid: String,
    parent_id: Option<i64>,
    data: String,
    created_at: String,
    modified_at: String,
}

impl ObjectRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            workflow_uuid: row.get(1)?,
            parent_id: row.get(2)?,
            data: row.get(3)?,
            created_at: row.get(4)?,
            modified_at: row.get(5)?,
        })
    }

    fn decode(self) -> Result<WorkflowObject> {
        Ok(WorkflowObject {
            id: self.id,
            workflow_id: parse_uuid(&self.workflow_uuid)?,
            parent_id: self.parent_id,
            data: serde_json::from_str(&self.data)?,
            created_at: self.created_at,
            modified_at: self.modified_at,
        })
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| WorkflowError::validation(format!("bad uuid '{raw}': {e}")))
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering
fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

/// Lock contention that outlasted the busy timeout is a concurrency conflict
fn contention(err: rusqlite::Error, id: &Uuid) -> WorkflowError {
    if is_busy(&err) {
        WorkflowError::Concurrency { id: id.to_string() }
    } else {
        WorkflowError::Storage(err)
    }
}

fn workflow_not_found(id: &Uuid) -> WorkflowError {
    WorkflowError::not_found(format!("workflow {id}"))
}

/// SQLite-backed persistence for workflow instances and their objects.
///
/// A store wraps one connection. Read-modify-write operations run inside
/// `BEGIN IMMEDIATE` transactions so that handles on the same database file
/// (in this process or another) serialize instead of losing updates.
pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Open or create the store database
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open with an explicit busy timeout for lock contention
    pub fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        init_schema(&conn)?;

        tracing::debug!(path = %path.display(), "Opened workflow store");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory store, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Allocate a fresh instance with status `new`
    pub fn create(&self, name: &str, owner_id: &str) -> Result<Uuid> {
        let instance = self.create_with_id(Uuid::new_v4(), name, owner_id)?;
        Ok(instance.id)
    }

    /// Allocate an instance under a caller-chosen id
    pub fn create_with_id(&self, id: Uuid, name: &str, owner_id: &str) -> Result<WorkflowInstance> {
        let now = now();
        let position = serde_json::to_string(&Position::start())?;

        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO workflows (uuid, name, owner_id, status, position, extra_data, version, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, '{}', 0, ?6, ?7)
             ON CONFLICT(uuid) DO NOTHING",
            params![
                id.to_string(),
                name,
                owner_id,
                WorkflowStatus::New.as_str(),
                position,
                &now,
                &now,
            ],
        )?;

        if inserted == 0 {
            return Err(WorkflowError::validation(format!(
                "workflow {id} already exists"
            )));
        }

        tracing::info!(workflow = %id, name, owner = owner_id, "Created workflow instance");

        Ok(WorkflowInstance {
            id,
            name: name.to_string(),
            owner_id: owner_id.to_string(),
            status: WorkflowStatus::New,
            position: Position::start(),
            extra_data: Value::Object(Map::new()),
            version: 0,
            message: None,
            created_at: now.clone(),
            modified_at: now,
        })
    }

    /// Load an instance or fail with `NotFound`
    pub fn load(&self, id: Uuid) -> Result<WorkflowInstance> {
        self.find(id)?.ok_or_else(|| workflow_not_found(&id))
    }

    /// Load an instance if it exists
    pub fn find(&self, id: Uuid) -> Result<Option<WorkflowInstance>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {INSTANCE_COLUMNS} FROM workflows WHERE uuid = ?1"),
                [id.to_string()],
                InstanceRow::from_row,
            )
            .optional()?;
        drop(conn);

        row.map(InstanceRow::decode).transpose()
    }

    /// Persist status, position and extra data together.
    ///
    /// Fails with `Concurrency` when the stored version moved since the
    /// instance was loaded; on success the instance carries the new version.
    pub fn save(&self, instance: &mut WorkflowInstance) -> Result<()> {
        if !instance.extra_data.is_object() {
            return Err(WorkflowError::validation("extra data must be a JSON object"));
        }

        let position = serde_json::to_string(&instance.position)?;
        let extra_data = serde_json::to_string(&instance.extra_data)?;
        let now = now();

        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE workflows
                 SET status = ?1, position = ?2, extra_data = ?3, message = ?4,
                     version = version + 1, modified_at = ?5
                 WHERE uuid = ?6 AND version = ?7",
                params![
                    instance.status.as_str(),
                    position,
                    extra_data,
                    &instance.message,
                    &now,
                    instance.id.to_string(),
                    instance.version,
                ],
            )
            .map_err(|e| contention(e, &instance.id))?;

        if updated == 0 {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM workflows WHERE uuid = ?1)",
                [instance.id.to_string()],
                |row| row.get(0),
            )?;
            return Err(if exists {
                WorkflowError::Concurrency {
                    id: instance.id.to_string(),
                }
            } else {
                workflow_not_found(&instance.id)
            });
        }

        instance.version += 1;
        instance.modified_at = now;
        Ok(())
    }

    /// Run `transform` over the stored extra data and persist the result.
    ///
    /// Load, transform and write happen in one immediate transaction. If the
    /// transform fails nothing is written and its error is returned.
    pub fn apply<T, F>(&self, id: Uuid, transform: F) -> Result<T>
    where
        F: FnOnce(&mut Value) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| contention(e, &id))?;

        let raw: Option<String> = tx
            .query_row(
                "SELECT extra_data FROM workflows WHERE uuid = ?1",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| contention(e, &id))?;
        let raw = raw.ok_or_else(|| workflow_not_found(&id))?;

        let mut extra_data: Value = serde_json::from_str(&raw)?;
        let output = transform(&mut extra_data)?;

        if !extra_data.is_object() {
            return Err(WorkflowError::validation("extra data must be a JSON object"));
        }

        tx.execute(
            "UPDATE workflows SET extra_data = ?1, version = version + 1, modified_at = ?2
             WHERE uuid = ?3",
            params![serde_json::to_string(&extra_data)?, now(), id.to_string()],
        )
        .map_err(|e| contention(e, &id))?;
        tx.commit().map_err(|e| contention(e, &id))?;

        Ok(output)
    }

    /// Read the stored extra data through `query` without modifying it
    pub fn query<T, F>(&self, id: Uuid, query: F) -> Result<T>
    where
        F: FnOnce(&Value) -> Result<T>,
    {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT extra_data FROM workflows WHERE uuid = ?1",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        drop(conn);

        let raw = raw.ok_or_else(|| workflow_not_found(&id))?;
        let extra_data: Value = serde_json::from_str(&raw)?;
        query(&extra_data)
    }

    /// Engine checkpoint: status, position and message, plus the working
    /// object's data, in one transaction. Leaves extra data alone so that
    /// writes tasks made through `apply` are never clobbered.
    pub fn checkpoint(
        &self,
        instance: &mut WorkflowInstance,
        object: Option<&WorkflowObject>,
    ) -> Result<()> {
        let position = serde_json::to_string(&instance.position)?;
        let now = now();
        let id = instance.id;

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| contention(e, &id))?;

        let updated = tx
            .execute(
                "UPDATE workflows
                 SET status = ?1, position = ?2, message = ?3, version = version + 1, modified_at = ?4
                 WHERE uuid = ?5",
                params![
                    instance.status.as_str(),
                    position,
                    &instance.message,
                    &now,
                    id.to_string(),
                ],
            )
            .map_err(|e| contention(e, &id))?;
        if updated == 0 {
            return Err(workflow_not_found(&id));
        }

        if let Some(object) = object {
            tx.execute(
                "UPDATE objects SET data = ?1, modified_at = ?2 WHERE id = ?3",
                params![serde_json::to_string(&object.data)?, &now, object.id],
            )
            .map_err(|e| contention(e, &id))?;
        }

        let version: i64 = tx.query_row(
            "SELECT version FROM workflows WHERE uuid = ?1",
            [id.to_string()],
            |row| row.get(0),
        )?;
        tx.commit().map_err(|e| contention(e, &id))?;

        instance.version = version;
        instance.modified_at = now;
        Ok(())
    }

    /// Most recently created non-finished instance of `name` owned by `owner_id`
    pub fn most_recent(&self, owner_id: &str, name: &str) -> Result<WorkflowInstance> {
        let filter = InstanceFilter::owner(owner_id).with_name(name);
        self.list(&filter)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                WorkflowError::not_found(format!(
                    "unfinished '{name}' workflow for owner {owner_id}"
                ))
            })
    }

    /// Instances matching `filter`, newest first
    pub fn list(&self, filter: &InstanceFilter) -> Result<Vec<WorkflowInstance>> {
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(ref owner_id) = filter.owner_id {
            values.push(owner_id.clone());
            clauses.push(format!("owner_id = ?{}", values.len()));
        }
        if let Some(ref name) = filter.name {
            values.push(name.clone());
            clauses.push(format!("name = ?{}", values.len()));
        }
        if let Some(status) = filter.status {
            values.push(status.as_str().to_string());
            clauses.push(format!("status = ?{}", values.len()));
        }
        if !filter.include_finished {
            values.push(WorkflowStatus::Finished.as_str().to_string());
            clauses.push(format!("status != ?{}", values.len()));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!("SELECT {INSTANCE_COLUMNS} FROM workflows {where_clause} ORDER BY seq DESC");

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), InstanceRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        rows.into_iter().map(InstanceRow::decode).collect()
    }

    /// Remove an instance and every object it owns
    pub fn delete(&self, id: Uuid) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| contention(e, &id))?;

        let objects = tx.execute(
            "DELETE FROM objects WHERE workflow_uuid = ?1",
            [id.to_string()],
        )?;
        let jobs = tx.execute("DELETE FROM jobs WHERE workflow_uuid = ?1", [id.to_string()])?;
        let removed = tx.execute("DELETE FROM workflows WHERE uuid = ?1", [id.to_string()])?;
        if removed == 0 {
            return Err(workflow_not_found(&id));
        }
        tx.commit()?;

        tracing::info!(workflow = %id, objects, jobs, "Deleted workflow instance");
        Ok(())
    }

    /// Attach a new object to an instance
    pub fn add_object(
        &self,
        workflow_id: Uuid,
        parent_id: Option<i64>,
        data: &Value,
    ) -> Result<WorkflowObject> {
        let data = match data {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => data.clone(),
            other => {
                return Err(WorkflowError::validation(format!(
                    "object data must be a JSON object, got {other}"
                )));
            }
        };
        let now = now();

        let conn = self.conn.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM workflows WHERE uuid = ?1)",
            [workflow_id.to_string()],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(workflow_not_found(&workflow_id));
        }

        conn.execute(
            "INSERT INTO objects (workflow_uuid, parent_id, data, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                workflow_id.to_string(),
                parent_id,
                serde_json::to_string(&data)?,
                &now,
                &now,
            ],
        )?;

        Ok(WorkflowObject {
            id: conn.last_insert_rowid(),
            workflow_id,
            parent_id,
            data,
            created_at: now.clone(),
            modified_at: now,
        })
    }

    /// Persist an object's data outside of an engine checkpoint
    pub fn update_object(&self, object: &mut WorkflowObject) -> Result<()> {
        let now = now();
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE objects SET data = ?1, modified_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(&object.data)?, &now, object.id],
        )?;
        if updated == 0 {
            return Err(WorkflowError::not_found(format!("object {}", object.id)));
        }
        object.modified_at = now;
        Ok(())
    }

    /// Objects of an instance in creation order
    pub fn objects(&self, workflow_id: Uuid) -> Result<Vec<WorkflowObject>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE workflow_uuid = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt
            .query_map([workflow_id.to_string()], ObjectRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        rows.into_iter().map(ObjectRow::decode).collect()
    }

    /// The object a run most recently worked on: the latest-modified child
    /// object, or the newest object when there are no children.
    pub fn latest_object(&self, workflow_id: Uuid) -> Result<WorkflowObject> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {OBJECT_COLUMNS} FROM objects WHERE workflow_uuid = ?1
                     ORDER BY (parent_id IS NOT NULL) DESC, modified_at DESC, id DESC
                     LIMIT 1"
                ),
                [workflow_id.to_string()],
                ObjectRow::from_row,
            )
            .optional()?;
        drop(conn);

        row.map(ObjectRow::decode)
            .transpose()?
            .ok_or_else(|| WorkflowError::not_found(format!("objects of workflow {workflow_id}")))
    }

    /// Reserve the next record identifier for a workflow
    pub fn reserve_record_id(&self, workflow_id: Uuid) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO records (workflow_uuid, created_at) VALUES (?1, ?2)",
            params![workflow_id.to_string(), now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Cache form values for the next workflow the owner starts;
    /// `None` clears the cache
    pub fn set_prefill(&self, owner_id: &str, values: Option<&Map<String, Value>>) -> Result<()> {
        let conn = self.conn.lock();
        match values {
            Some(values) => {
                conn.execute(
                    "INSERT INTO prefill (owner_id, form_values, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(owner_id) DO UPDATE SET
                        form_values = excluded.form_values,
                        updated_at = excluded.updated_at",
                    params![owner_id, serde_json::to_string(values)?, now()],
                )?;
            }
            None => {
                conn.execute("DELETE FROM prefill WHERE owner_id = ?1", [owner_id])?;
            }
        }
        Ok(())
    }

    /// Return and clear the owner's cached form values
    pub fn take_prefill(&self, owner_id: &str) -> Result<Option<Map<String, Value>>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let raw: Option<String> = tx
            .query_row(
                "SELECT form_values FROM prefill WHERE owner_id = ?1",
                [owner_id],
                |row| row.get(0),
            )
            .optional()?;
        if raw.is_some() {
            tx.execute("DELETE FROM prefill WHERE owner_id = ?1", [owner_id])?;
        }
        tx.commit()?;

        raw.map(|r| serde_json::from_str(&r))
            .transpose()
            .map_err(WorkflowError::from)
    }

    /// Queued jobs, optionally limited to one workflow, oldest first
    pub fn jobs(&self, workflow_id: Option<Uuid>) -> Result<Vec<Job>> {
        let conn = self.conn.lock();
        let row_mapper = |row: &rusqlite::Row| -> rusqlite::Result<(i64, String, String, String, String, String)> {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        };

        let (sql, filter) = match workflow_id {
            Some(id) => (
                "SELECT id, workflow_uuid, name, payload, status, created_at
                 FROM jobs WHERE workflow_uuid = ?1 ORDER BY id ASC",
                vec![id.to_string()],
            ),
            None => (
                "SELECT id, workflow_uuid, name, payload, status, created_at
                 FROM jobs ORDER BY id ASC",
                Vec::new(),
            ),
        };

        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(filter.iter()), row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        rows.into_iter()
            .map(|(id, workflow_uuid, name, payload, status, created_at)| {
                Ok(Job {
                    id,
                    workflow_id: parse_uuid(&workflow_uuid)?,
                    name,
                    payload: serde_json::from_str(&payload)?,
                    status,
                    created_at,
                })
            })
            .collect()
    }
}

impl JobQueue for StateStore {
    fn submit(&self, request: &JobRequest) -> Result<JobHandle> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO jobs (workflow_uuid, name, payload, status, created_at)
             VALUES (?1, ?2, ?3, 'queued', ?4)",
            params![
                request.workflow_id.to_string(),
                &request.name,
                serde_json::to_string(&request.payload)?,
                now(),
            ],
        )?;
        let handle = JobHandle(conn.last_insert_rowid());

        tracing::info!(
            workflow = %request.workflow_id,
            job = %request.name,
            handle = handle.0,
            "Queued background job"
        );

        Ok(handle)
    }
}
