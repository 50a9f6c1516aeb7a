use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::app_context::AppContext;
use crate::background::TaskErrorSink;

#[derive(Clone)]
pub struct ServeState {
    context: Arc<AppContext>,
    health: Arc<ServeHealth>,
}

impl ServeState {
    pub fn new(context: Arc<AppContext>, health: Arc<ServeHealth>) -> Self {
        Self { context, health }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    pub fn health(&self) -> &Arc<ServeHealth> {
        &self.health
    }

    /// Ready once both the summary and the recent fallback hold data.
    pub(crate) fn readiness(&self) -> Readiness {
        let readiness = Readiness {
            summary: self.context.summary().snapshot().is_some(),
            recent: self.context.recent().cached().is_some(),
        };
        if readiness.is_ready() {
            self.health.mark_ready();
        } else {
            self.health.mark_unready(readiness.describe());
        }
        readiness
    }

    pub(crate) fn health_snapshot(&self) -> ServeHealthSnapshot {
        self.health.snapshot()
    }

    pub fn mark_live(&self) {
        self.health.mark_live();
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
pub(crate) struct Readiness {
    pub(crate) summary: bool,
    pub(crate) recent: bool,
}

impl Readiness {
    pub(crate) fn is_ready(&self) -> bool {
        self.summary && self.recent
    }

    fn describe(&self) -> String {
        let missing: Vec<&str> = [("summary", self.summary), ("recent", self.recent)]
            .into_iter()
            .filter(|(_, present)| !present)
            .map(|(name, _)| name)
            .collect();
        format!("waiting for {} snapshot", missing.join(" and "))
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TaskFailure {
    pub task: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

#[derive(Default)]
pub struct ServeHealth {
    live: AtomicBool,
    ready: AtomicBool,
    last_ready_check: AtomicU64,
    last_error: Mutex<Option<String>>,
    task_failures: AtomicU64,
    last_task_failure: Mutex<Option<TaskFailure>>,
}

impl ServeHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_live(&self) {
        self.live.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.update_last_check();
        *self.last_error.lock() = None;
    }

    pub(crate) fn mark_unready(&self, error: impl Into<String>) {
        self.ready.store(false, Ordering::SeqCst);
        self.update_last_check();
        *self.last_error.lock() = Some(error.into());
    }

    pub(crate) fn snapshot(&self) -> ServeHealthSnapshot {
        ServeHealthSnapshot {
            ready: self.ready.load(Ordering::SeqCst),
            live: self.live.load(Ordering::SeqCst),
            last_ready_check: self.last_ready_check(),
            last_error: self.last_error.lock().clone(),
            task_failures: self.task_failures.load(Ordering::SeqCst),
            last_task_failure: self.last_task_failure.lock().clone(),
        }
    }

    fn update_last_check(&self) {
        self.last_ready_check
            .store(Utc::now().timestamp().max(0) as u64, Ordering::SeqCst);
    }

    fn last_ready_check(&self) -> Option<u64> {
        match self.last_ready_check.load(Ordering::SeqCst) {
            0 => None,
            value => Some(value),
        }
    }
}

impl TaskErrorSink for ServeHealth {
    fn record_task_error(&self, task: &str, error: &str) {
        self.task_failures.fetch_add(1, Ordering::SeqCst);
        *self.last_task_failure.lock() = Some(TaskFailure {
            task: task.to_string(),
            error: error.to_string(),
            at: Utc::now(),
        });
    }
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct ServeHealthSnapshot {
    pub(crate) ready: bool,
    pub(crate) live: bool,
    pub(crate) last_ready_check: Option<u64>,
    pub(crate) last_error: Option<String>,
    pub(crate) task_failures: u64,
    pub(crate) last_task_failure: Option<TaskFailure>,
}
