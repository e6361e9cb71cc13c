//! Task upsert engine and subtask mutations.
//!
//! A task's identity for deduplication is its content hash over
//! `(subject_id, date, description)`. The same hash is used for the lookup
//! and for the `UNIQUE(child_id, content_hash)` constraint.
//!
//! Every mutation that touches subtasks recomputes the parent task's status
//! with [`aggregate`] inside the same transaction.

use super::{Database, is_constraint_violation, now_ms};
use crate::import::aggregate;
use crate::types::{Subtask, Task, TaskDraft, TaskStatus, UpsertOutcome, UpsertResult};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{debug, warn};

const TASK_COLUMNS: &str =
    "id, child_id, subject_id, date, title, description, content_hash, status, created_at, updated_at";
const SUBTASK_COLUMNS: &str =
    "id, task_id, title, type, status, parent_reaction, position, created_at, updated_at";

/// Dedup key of a task: SHA-256 (hex) of the fields joined by a unit separator.
pub fn content_hash(subject_id: i64, date: &str, description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject_id.to_string().as_bytes());
    hasher.update([0x1f]);
    hasher.update(date.trim().as_bytes());
    hasher.update([0x1f]);
    hasher.update(description.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// A requested change to one subtask's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtaskStatusChange {
    /// `todo -> in_progress`; any other current status is left alone.
    Start,
    Complete,
    Check,
    Set(TaskStatus),
}

impl SubtaskStatusChange {
    fn apply(self, current: TaskStatus) -> TaskStatus {
        match self {
            SubtaskStatusChange::Start if current == TaskStatus::Todo => TaskStatus::InProgress,
            SubtaskStatusChange::Start => current,
            SubtaskStatusChange::Complete => TaskStatus::Done,
            SubtaskStatusChange::Check => TaskStatus::Checked,
            SubtaskStatusChange::Set(status) => status,
        }
    }
}

fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        child_id: row.get(1)?,
        subject_id: row.get(2)?,
        date: row.get(3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        content_hash: row.get(6)?,
        status: row.get(7)?,
        subtasks: Vec::new(),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn parse_subtask_row(row: &Row) -> rusqlite::Result<Subtask> {
    Ok(Subtask {
        id: row.get(0)?,
        task_id: row.get(1)?,
        title: row.get(2)?,
        subtask_type: row.get(3)?,
        status: row.get(4)?,
        parent_reaction: row.get(5)?,
        position: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn load_subtasks(conn: &Connection, task_id: i64) -> Result<Vec<Subtask>> {
    let sql = format!("SELECT {SUBTASK_COLUMNS} FROM subtasks WHERE task_id = ?1 ORDER BY position, id");
    let mut stmt = conn.prepare(&sql)?;
    let subtasks = stmt
        .query_map(params![task_id], parse_subtask_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(subtasks)
}

/// Internal helper to get a task using an existing connection (avoids deadlock).
fn get_task_internal(conn: &Connection, task_id: i64) -> Result<Option<Task>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
    let Some(mut task) = conn
        .query_row(&sql, params![task_id], parse_task_row)
        .optional()?
    else {
        return Ok(None);
    };
    task.subtasks = load_subtasks(conn, task_id)?;
    Ok(Some(task))
}

fn find_task_id_by_hash(conn: &Connection, child_id: i64, hash: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM tasks WHERE child_id = ?1 AND content_hash = ?2",
            params![child_id, hash],
            |row| row.get(0),
        )
        .optional()?)
}

fn insert_subtask(
    conn: &Connection,
    task_id: i64,
    title: &str,
    category: Option<&str>,
    position: i64,
    now: i64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO subtasks (task_id, title, type, status, position, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![task_id, title, category, TaskStatus::Todo, position, now],
    )?;
    Ok(conn.last_insert_rowid())
}

fn max_position(conn: &Connection, task_id: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(position), 0) FROM subtasks WHERE task_id = ?1",
        params![task_id],
        |row| row.get(0),
    )?)
}

/// Recompute and persist a task's status from its subtasks.
fn refresh_task_status(conn: &Connection, task_id: i64, now: i64) -> Result<TaskStatus> {
    let mut stmt = conn.prepare("SELECT status FROM subtasks WHERE task_id = ?1")?;
    let statuses = stmt
        .query_map(params![task_id], |row| row.get::<_, TaskStatus>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let status = aggregate(statuses);
    conn.execute(
        "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status, now, task_id],
    )?;
    Ok(status)
}

fn upsert_in_tx(conn: &mut Connection, draft: &TaskDraft, hash: &str) -> Result<UpsertResult> {
    let now = now_ms();
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let (task_id, outcome) = match find_task_id_by_hash(&tx, draft.child_id, hash)? {
        Some(task_id) => {
            let mut seen: HashSet<String> = load_subtasks(&tx, task_id)?
                .into_iter()
                .map(|st| st.title)
                .collect();
            let mut position = max_position(&tx, task_id)?;
            let mut appended = 0;
            for draft_subtask in &draft.subtasks {
                if !seen.insert(draft_subtask.title.clone()) {
                    continue;
                }
                position += 1;
                insert_subtask(
                    &tx,
                    task_id,
                    &draft_subtask.title,
                    draft_subtask.category.as_deref(),
                    position,
                    now,
                )?;
                appended += 1;
            }

            if appended == 0 {
                (task_id, UpsertOutcome::Duplicate)
            } else {
                debug!(task_id, appended, "Appended subtasks to existing task");
                refresh_task_status(&tx, task_id, now)?;
                (task_id, UpsertOutcome::Updated)
            }
        }
        None => {
            let description = draft.description.trim();
            tx.execute(
                "INSERT INTO tasks (child_id, subject_id, date, title, description, content_hash, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6, ?7, ?7)",
                params![
                    draft.child_id,
                    draft.subject_id,
                    draft.date,
                    description,
                    hash,
                    TaskStatus::Todo,
                    now
                ],
            )?;
            let task_id = tx.last_insert_rowid();
            for (idx, draft_subtask) in draft.subtasks.iter().enumerate() {
                insert_subtask(
                    &tx,
                    task_id,
                    &draft_subtask.title,
                    draft_subtask.category.as_deref(),
                    idx as i64 + 1,
                    now,
                )?;
            }
            refresh_task_status(&tx, task_id, now)?;
            (task_id, UpsertOutcome::Created)
        }
    };

    let task = get_task_internal(&tx, task_id)?
        .ok_or_else(|| anyhow::anyhow!("task {} vanished inside its own transaction", task_id))?;
    tx.commit()?;
    Ok(UpsertResult { outcome, task })
}

impl Database {
    /// Idempotently create or merge a task.
    ///
    /// - no task with this hash for the child: insert it with subtasks at
    ///   positions `1..=n`, outcome `created`
    /// - existing task: append only subtask titles it does not have yet, at
    ///   positions after the current maximum, outcome `updated`; with nothing
    ///   new the outcome is `duplicate` and nothing is written
    ///
    /// A uniqueness violation from a concurrent insert is answered with the
    /// row that won, as `duplicate`.
    pub fn upsert_task(&self, draft: &TaskDraft) -> Result<UpsertResult> {
        let hash = content_hash(draft.subject_id, &draft.date, &draft.description);
        match self.with_conn_mut(|conn| upsert_in_tx(conn, draft, &hash)) {
            Err(e) if is_constraint_violation(&e) => self.recover_lost_insert(draft, &hash, e),
            other => other,
        }
    }

    /// Answer a uniqueness violation with the row that won the race.
    fn recover_lost_insert(
        &self,
        draft: &TaskDraft,
        hash: &str,
        err: anyhow::Error,
    ) -> Result<UpsertResult> {
        let existing = self.with_conn(|conn| match find_task_id_by_hash(conn, draft.child_id, hash)? {
            Some(id) => get_task_internal(conn, id),
            None => Ok(None),
        })?;
        // a foreign-key failure also lands here and has no winner row
        let task = existing.ok_or(err)?;
        warn!(task_id = task.id, "Lost insert race on content hash, returning existing task");
        Ok(UpsertResult {
            outcome: UpsertOutcome::Duplicate,
            task,
        })
    }

    pub fn get_task(&self, task_id: i64) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, task_id))
    }

    /// A child's tasks, newest date first.
    pub fn list_tasks_for_child(&self, child_id: i64) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE child_id = ?1 ORDER BY date DESC, id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut tasks = stmt
                .query_map(params![child_id], parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for task in &mut tasks {
                task.subtasks = load_subtasks(conn, task.id)?;
            }
            Ok(tasks)
        })
    }

    /// Delete a task. Subtasks go with it.
    pub fn delete_task(&self, task_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
            Ok(deleted > 0)
        })
    }

    /// Append a subtask after the current last position.
    ///
    /// Returns the refreshed parent task, or `None` if the task does not exist.
    pub fn add_subtask(
        &self,
        task_id: i64,
        title: &str,
        category: Option<&str>,
    ) -> Result<Option<Task>> {
        let now = now_ms();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if get_task_internal(&tx, task_id)?.is_none() {
                return Ok(None);
            }
            let position = max_position(&tx, task_id)? + 1;
            insert_subtask(&tx, task_id, title.trim(), category, position, now)?;
            refresh_task_status(&tx, task_id, now)?;
            let task = get_task_internal(&tx, task_id)?;
            tx.commit()?;
            Ok(task)
        })
    }

    /// Change a subtask's status and re-aggregate its task.
    pub fn set_subtask_status(
        &self,
        subtask_id: i64,
        change: SubtaskStatusChange,
    ) -> Result<Option<Task>> {
        self.mutate_subtask(subtask_id, |tx, subtask, now| {
            let next = change.apply(subtask.status);
            if next != subtask.status {
                tx.execute(
                    "UPDATE subtasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![next, now, subtask.id],
                )?;
            }
            Ok(())
        })
    }

    /// Record (or clear) the parent's reaction tag on a subtask.
    pub fn set_parent_reaction(
        &self,
        subtask_id: i64,
        reaction: Option<&str>,
    ) -> Result<Option<Task>> {
        self.mutate_subtask(subtask_id, |tx, subtask, now| {
            tx.execute(
                "UPDATE subtasks SET parent_reaction = ?1, updated_at = ?2 WHERE id = ?3",
                params![reaction, now, subtask.id],
            )?;
            Ok(())
        })
    }

    pub fn delete_subtask(&self, subtask_id: i64) -> Result<Option<Task>> {
        self.mutate_subtask(subtask_id, |tx, subtask, _| {
            tx.execute("DELETE FROM subtasks WHERE id = ?1", params![subtask.id])?;
            Ok(())
        })
    }

    /// Run `f` on one subtask, then recompute the parent status in the same
    /// transaction. `None` when the subtask does not exist.
    fn mutate_subtask<F>(&self, subtask_id: i64, f: F) -> Result<Option<Task>>
    where
        F: FnOnce(&Connection, &Subtask, i64) -> Result<()>,
    {
        let now = now_ms();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let sql = format!("SELECT {SUBTASK_COLUMNS} FROM subtasks WHERE id = ?1");
            let Some(subtask) = tx
                .query_row(&sql, params![subtask_id], parse_subtask_row)
                .optional()?
            else {
                return Ok(None);
            };

            f(&tx, &subtask, now)?;
            refresh_task_status(&tx, subtask.task_id, now)?;
            let task = get_task_internal(&tx, subtask.task_id)?;
            tx.commit()?;
            Ok(task)
        })
    }
}
