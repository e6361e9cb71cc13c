//! Core types for the homework worker.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle status of a job.
///
/// Transitions are monotonic: `pending -> running -> done | failed`.
/// A job never returns to `pending` once claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Done and failed jobs are never picked up again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Whether `self -> next` is an allowed lifecycle step.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Done)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub user_id: i64,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub payload: Option<Value>,
    pub result: Option<Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Status shared by tasks and subtasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Checked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Checked => "checked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(TaskStatus::Todo),
            "in_progress" => Some(TaskStatus::InProgress),
            "done" => Some(TaskStatus::Done),
            "checked" => Some(TaskStatus::Checked),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A school subject from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: i64,
    pub name: String,
}

/// A homework task with its ordered checklist.
///
/// When `subtasks` is non-empty, `status` is always the aggregate of the
/// subtask statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub child_id: i64,
    pub subject_id: i64,
    /// ISO calendar date (`YYYY-MM-DD`).
    pub date: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content_hash: String,
    pub status: TaskStatus,
    pub subtasks: Vec<Subtask>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A checklist item of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: i64,
    pub task_id: i64,
    pub title: String,
    /// Category tag (`exercise`, `theory`, ...).
    #[serde(rename = "type")]
    pub subtask_type: Option<String>,
    pub status: TaskStatus,
    pub parent_reaction: Option<String>,
    /// 1-based, strictly increasing within a task.
    pub position: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for the task upsert engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDraft {
    pub child_id: i64,
    pub subject_id: i64,
    pub date: String,
    pub description: String,
    pub subtasks: Vec<SubtaskDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskDraft {
    pub title: String,
    pub category: Option<String>,
}

/// Tri-state result of an idempotent task upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// A new task was inserted.
    Created,
    /// New subtasks were appended to an existing task.
    Updated,
    /// The task already existed with every incoming subtask; nothing changed.
    Duplicate,
}

impl UpsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertOutcome::Created => "created",
            UpsertOutcome::Updated => "updated",
            UpsertOutcome::Duplicate => "duplicate",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertResult {
    pub outcome: UpsertOutcome,
    pub task: Task,
}
