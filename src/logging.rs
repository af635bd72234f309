//! Logging for taskdash
//!
//! Writes to ~/.taskdash/logs/ (one file per day, pruned after a week).
//! Until `init()` runs every call is a silent no-op, so library code and
//! tests can log freely.

use chrono::Local;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);
static TASK_LOG_CONTEXTS: OnceLock<Mutex<HashMap<String, LogContext>>> = OnceLock::new();

const RETENTION_DAYS: i64 = 7;

/// Who the current log lines are about
#[derive(Default, Clone)]
pub struct LogContext {
    pub viewer: Option<String>,
    pub role: Option<String>,
    pub task: Option<String>,
}

thread_local! {
    static LOG_CONTEXT: RefCell<LogContext> = RefCell::new(LogContext::default());
}

/// Set the viewer (and role) for the current tokio task, or the current
/// thread outside a runtime.
pub fn set_viewer(viewer: &str, role: &str) {
    update_context(|ctx| {
        ctx.viewer = Some(viewer.to_string());
        ctx.role = Some(role.to_string());
    });
}

/// Tag subsequent lines with the task being worked on
pub fn set_task(task_id: Option<&str>) {
    update_context(|ctx| ctx.task = task_id.map(str::to_string));
}

/// Forget everything set for the current tokio task (or thread). Sessions
/// call this when they are dropped so the per-task map does not grow.
pub fn clear_context() {
    if let Some(task_id) = current_task_id() {
        if let Some(store) = TASK_LOG_CONTEXTS.get() {
            if let Ok(mut contexts) = store.lock() {
                contexts.remove(&task_id);
            }
        }
    }

    LOG_CONTEXT.with(|c| {
        *c.borrow_mut() = LogContext::default();
    });
}

fn update_context(update: impl FnOnce(&mut LogContext)) {
    if let Some(task_id) = current_task_id() {
        let store = TASK_LOG_CONTEXTS.get_or_init(|| Mutex::new(HashMap::new()));
        if let Ok(mut contexts) = store.lock() {
            update(contexts.entry(task_id).or_default());
            return;
        }
    }
    LOG_CONTEXT.with(|c| update(&mut c.borrow_mut()));
}

fn current_task_id() -> Option<String> {
    tokio::task::try_id().map(|id| id.to_string())
}

#[cfg(test)]
pub(crate) fn has_task_context() -> bool {
    let Some(task_id) = current_task_id() else {
        return false;
    };
    TASK_LOG_CONTEXTS
        .get()
        .and_then(|store| store.lock().ok().map(|c| c.contains_key(&task_id)))
        .unwrap_or(false)
}

fn context_prefix() -> String {
    let task_ctx = current_task_id().and_then(|task_id| {
        let contexts = TASK_LOG_CONTEXTS.get()?.lock().ok()?;
        contexts.get(&task_id).cloned()
    });
    match task_ctx {
        Some(ctx) => context_prefix_for(&ctx),
        None => LOG_CONTEXT.with(|c| context_prefix_for(&c.borrow())),
    }
}

fn context_prefix_for(ctx: &LogContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref viewer) = ctx.viewer {
        parts.push(format!("viewer:{}", truncate(viewer, 12)));
    }
    if let Some(ref role) = ctx.role {
        parts.push(format!("role:{}", role));
    }
    if let Some(ref task) = ctx.task {
        parts.push(format!("task:{}", truncate(task, 12)));
    }

    if parts.is_empty() {
        String::new()
    } else {
        format!("[{}] ", parts.join("|"))
    }
}

pub struct Logger {
    file: File,
    path: PathBuf,
}

impl Logger {
    fn new() -> Option<Self> {
        let path = log_path()?;
        fs::create_dir_all(path.parent()?).ok()?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()?;
        Some(Self { file, path })
    }

    fn write(&mut self, level: &str, message: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let line = format!("[{}] [{}] {}{}\n", timestamp, level, context_prefix(), message);
        let _ = self.file.write_all(line.as_bytes());
        let _ = self.file.flush();
    }
}

/// Initialize the logger (call once at startup)
pub fn init() {
    let mut guard = LOGGER.lock().unwrap_or_else(|e| e.into_inner());
    if guard.is_none() {
        *guard = Logger::new();
    }
}

fn write(level: &str, message: &str) {
    if let Ok(mut guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_mut() {
            logger.write(level, message);
        }
    }
}

pub fn info(message: &str) {
    write("INFO", message);
}

pub fn warn(message: &str) {
    write("WARN", message);
}

pub fn error(message: &str) {
    write("ERROR", message);
}

/// Only written when TASKDASH_TRACE is set
pub fn debug(message: &str) {
    if std::env::var("TASKDASH_TRACE").is_ok() {
        write("DEBUG", message);
    }
}

fn log_dir() -> Option<PathBuf> {
    crate::storage::taskdash_dir().ok().map(|d| d.join("logs"))
}

/// Path to today's log file
pub fn log_path() -> Option<PathBuf> {
    let date = Local::now().format("%Y-%m-%d");
    Some(log_dir()?.join(format!("taskdash-{}.log", date)))
}

pub fn cleanup_old_logs() {
    let Some(dir) = log_dir() else {
        return;
    };
    let Ok(entries) = fs::read_dir(&dir) else {
        return;
    };
    let cutoff = Local::now() - chrono::Duration::days(RETENTION_DAYS);
    for entry in entries.flatten() {
        let modified = entry.metadata().and_then(|m| m.modified());
        if let Ok(modified) = modified {
            let modified: chrono::DateTime<Local> = modified.into();
            if modified < cutoff {
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
