//! Bot task registry
//!
//! The panel's process manager: one entry per bot run, each driving its own
//! browser session on its own tokio task. Status transitions are
//! starting -> running -> finished | stopped | error; stop and restart act
//! through the polled stop flag, never by killing the task outright.

use std::sync::Arc;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{info, warn, error};
use uuid::Uuid;

use crate::bot::{self, AutoBuy, BotConfig, RunControl, RunOutcome, Selection, TaskLog};
use crate::browser::reset_bot_counter;
use crate::stats::{TaskStats, TaskStatsSnapshot};

/// Lifecycle state of a bot task
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "message")]
pub enum TaskStatus {
    Starting,
    Running,
    Stopping,
    Finished,
    Stopped,
    Error(String),
}

impl TaskStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Starting | TaskStatus::Running | TaskStatus::Stopping)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Starting => "starting",
            TaskStatus::Running => "running",
            TaskStatus::Stopping => "stopping",
            TaskStatus::Finished => "finished",
            TaskStatus::Stopped => "stopped",
            TaskStatus::Error(_) => "error",
        }
    }
}

/// One bot run owned by the panel
pub struct BotTask {
    pub id: String,
    pub config: BotConfig,
    pub started_at: DateTime<Utc>,
    pub status: parking_lot::RwLock<TaskStatus>,
    pub stopped_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    pub control: Arc<RunControl>,
    pub stats: Arc<TaskStats>,
    pub log: Arc<TaskLog>,
    handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BotTask {
    pub fn status(&self) -> TaskStatus {
        self.status.read().clone()
    }

    pub fn is_active(&self) -> bool {
        self.status.read().is_active()
    }
}

/// Serializable row for the panel table
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRow {
    pub id: String,
    pub status: String,
    pub error: Option<String>,
    pub url: String,
    pub button_text: String,
    pub site: String,
    pub debugger_address: Option<String>,
    pub auto_buy: AutoBuyRow,
    pub stats: TaskStatsSnapshot,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Auto-buy widget state for the panel row
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoBuyRow {
    pub awaiting_selection: bool,
    pub running: bool,
    pub paused: bool,
    pub categories: Vec<String>,
    pub selection: Option<Selection>,
}

/// Aggregated counters across all tasks
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSnapshot {
    pub active_tasks: usize,
    pub total_tasks: usize,
    pub total_refreshes: u64,
    pub total_clicks: u64,
    pub total_errors: u64,
}

/// Registry of all bot tasks, keyed by short id
#[derive(Default)]
pub struct TaskRegistry {
    tasks: DashMap<String, Arc<BotTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new bot task. Rejects invalid configs and duplicate
    /// debugger addresses among active tasks.
    pub async fn start(&self, config: BotConfig) -> Result<String, String> {
        let config = config.normalized();
        config.validate()?;

        if let Some(ref addr) = config.debugger_address {
            let in_use = self.tasks.iter().any(|entry| {
                entry.value().is_active()
                    && entry.value().config.debugger_address.as_deref() == Some(addr.as_str())
            });
            if in_use {
                return Err("debugger address already used by an active task".into());
            }
        }

        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let task = self.build_task(id.clone(), config);
        self.tasks.insert(id.clone(), task.clone());
        self.spawn_run(task).await;

        info!("Task {} started", id);
        Ok(id)
    }

    fn build_task(&self, id: String, mut config: BotConfig) -> Arc<BotTask> {
        // Launched browsers get a task-scoped profile dir so parallel tasks
        // do not trample each other
        if config.debugger_address.is_none() && config.user_data_dir.is_none() {
            config.user_data_dir = crate::browser::SessionConfig::for_task(&id).user_data_dir;
        }

        // Preset auto-buy selection when the config already carries one
        let preset = if config.auto_buy {
            config.ticket_category.as_ref().map(|category| Selection {
                category: category.clone(),
                quantity: bot::clamp_quantity(config.ticket_quantity),
            })
        } else {
            None
        };

        Arc::new(BotTask {
            id,
            config,
            started_at: Utc::now(),
            status: parking_lot::RwLock::new(TaskStatus::Starting),
            stopped_at: parking_lot::RwLock::new(None),
            control: Arc::new(RunControl::new(AutoBuy::with_preset(preset))),
            stats: Arc::new(TaskStats::new()),
            log: Arc::new(TaskLog::default()),
            handle: tokio::sync::Mutex::new(None),
        })
    }

    /// Run the bot on its own task, panic-safe: a panicking run marks the
    /// task errored instead of taking the panel down.
    async fn spawn_run(&self, task: Arc<BotTask>) {
        let task_for_run = task.clone();

        let handle = tokio::spawn(async move {
            use futures::FutureExt;

            *task_for_run.status.write() = TaskStatus::Running;

            let run = std::panic::AssertUnwindSafe(bot::run(
                task_for_run.config.clone(),
                task_for_run.control.clone(),
                task_for_run.stats.clone(),
                task_for_run.log.clone(),
            ));

            let new_status = match run.catch_unwind().await {
                Ok(Ok(RunOutcome::Handoff { url })) => {
                    info!("Task {} handed off at {}", task_for_run.id, url);
                    TaskStatus::Finished
                }
                Ok(Ok(RunOutcome::AttemptsExhausted)) => {
                    info!("Task {} exhausted its attempts", task_for_run.id);
                    TaskStatus::Finished
                }
                Ok(Ok(RunOutcome::Stopped)) => TaskStatus::Stopped,
                Ok(Err(e)) => {
                    warn!("Task {} failed: {}", task_for_run.id, e);
                    TaskStatus::Error(e.to_string())
                }
                Err(panic_info) => {
                    let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "unknown panic".to_string()
                    };
                    error!("Task {} panicked: {}", task_for_run.id, msg);
                    task_for_run.log.push(format!("panic: {}", msg));
                    TaskStatus::Error(msg)
                }
            };

            *task_for_run.status.write() = new_status;
            *task_for_run.stopped_at.write() = Some(Utc::now());
        });

        *task.handle.lock().await = Some(handle);
    }

    pub fn get(&self, id: &str) -> Option<Arc<BotTask>> {
        self.tasks.get(id).map(|t| t.value().clone())
    }

    /// Request a task to stop; the run loop observes the flag
    pub fn stop(&self, id: &str) -> Result<(), String> {
        let task = self.get(id).ok_or_else(|| format!("no task {}", id))?;
        if !task.is_active() {
            return Err(format!("task {} is not running", id));
        }
        *task.status.write() = TaskStatus::Stopping;
        task.control.request_stop();
        task.log.push("stop requested");
        Ok(())
    }

    /// Stop a task (if still active), wait briefly for it to wind down,
    /// then relaunch the same config under a fresh entry with the same id.
    pub async fn restart(&self, id: &str) -> Result<(), String> {
        let task = self.get(id).ok_or_else(|| format!("no task {}", id))?;

        if task.is_active() {
            *task.status.write() = TaskStatus::Stopping;
            task.control.request_stop();
        }

        if let Some(handle) = task.handle.lock().await.take() {
            let wind_down = tokio::time::timeout(std::time::Duration::from_secs(8), handle).await;
            if wind_down.is_err() {
                warn!("Task {} did not wind down in time, abandoning old run", id);
            }
        }

        let fresh = self.build_task(task.id.clone(), task.config.clone());
        fresh.log.push("restarted");
        self.tasks.insert(task.id.clone(), fresh.clone());
        self.spawn_run(fresh).await;

        info!("Task {} restarted", id);
        Ok(())
    }

    /// Remove an inactive task from the table
    pub fn delete(&self, id: &str) -> Result<(), String> {
        let task = self.get(id).ok_or_else(|| format!("no task {}", id))?;
        if task.is_active() {
            return Err(format!("task {} is still active, stop it first", id));
        }
        self.tasks.remove(id);
        if self.tasks.is_empty() {
            reset_bot_counter();
        }
        Ok(())
    }

    /// Set the auto-buy selection on a running task
    pub fn set_auto_buy(&self, id: &str, category: &str, quantity: u32) -> Result<(), String> {
        let task = self.get(id).ok_or_else(|| format!("no task {}", id))?;
        if !task.is_active() {
            return Err(format!("task {} is not running", id));
        }
        if !task.control.auto_buy.set_selection(category, quantity) {
            return Err("category must not be empty".into());
        }
        task.log.push(format!("auto-buy set: {} x{}", category, bot::clamp_quantity(quantity)));
        Ok(())
    }

    pub fn pause_auto_buy(&self, id: &str) -> Result<(), String> {
        let task = self.get(id).ok_or_else(|| format!("no task {}", id))?;
        if !task.control.auto_buy.pause() {
            return Err("auto-buy is not running".into());
        }
        task.log.push("auto-buy paused");
        Ok(())
    }

    pub fn resume_auto_buy(&self, id: &str) -> Result<(), String> {
        let task = self.get(id).ok_or_else(|| format!("no task {}", id))?;
        if !task.control.auto_buy.resume() {
            return Err("auto-buy is not running".into());
        }
        task.log.push("auto-buy resumed");
        Ok(())
    }

    /// Panel rows, newest first
    pub fn rows(&self) -> Vec<TaskRow> {
        let mut rows: Vec<TaskRow> = self
            .tasks
            .iter()
            .map(|entry| {
                let task = entry.value();
                let status = task.status();
                let error = match &status {
                    TaskStatus::Error(msg) => Some(msg.clone()),
                    _ => None,
                };
                TaskRow {
                    id: task.id.clone(),
                    status: status.label().to_string(),
                    error,
                    url: task.config.url.clone(),
                    button_text: task.config.button_text.clone(),
                    site: task.config.resolved_site().name().to_string(),
                    debugger_address: task.config.debugger_address.clone(),
                    auto_buy: AutoBuyRow {
                        awaiting_selection: task.control.auto_buy.is_awaiting_selection(),
                        running: task.control.auto_buy.is_running(),
                        paused: task.control.auto_buy.is_paused(),
                        categories: task.control.auto_buy.categories(),
                        selection: task.control.auto_buy.selection(),
                    },
                    stats: task.stats.snapshot(),
                    started_at: task.started_at,
                    stopped_at: *task.stopped_at.read(),
                }
            })
            .collect();

        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        rows
    }

    /// Log tail for a task
    pub fn log_tail(&self, id: &str, lines: usize) -> Result<String, String> {
        let task = self.get(id).ok_or_else(|| format!("no task {}", id))?;
        Ok(task.log.tail(lines))
    }

    /// Sum counters across every task
    pub fn global_snapshot(&self) -> GlobalSnapshot {
        let mut snapshot = GlobalSnapshot {
            active_tasks: 0,
            total_tasks: 0,
            total_refreshes: 0,
            total_clicks: 0,
            total_errors: 0,
        };

        for entry in self.tasks.iter() {
            let task = entry.value();
            snapshot.total_tasks += 1;
            if task.is_active() {
                snapshot.active_tasks += 1;
            }
            let stats = task.stats.snapshot();
            snapshot.total_refreshes += stats.refreshes;
            snapshot.total_clicks += stats.clicks;
            snapshot.total_errors += stats.errors;
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BotConfig {
        BotConfig {
            url: "https://www.loket.com/event/test".into(),
            button_text: "Beli Tiket".into(),
            ..Default::default()
        }
    }

    #[test]
    fn status_activity() {
        assert!(TaskStatus::Starting.is_active());
        assert!(TaskStatus::Running.is_active());
        assert!(TaskStatus::Stopping.is_active());
        assert!(!TaskStatus::Finished.is_active());
        assert!(!TaskStatus::Stopped.is_active());
        assert!(!TaskStatus::Error("x".into()).is_active());
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let registry = TaskRegistry::new();
        let err = registry.start(BotConfig::default()).await.unwrap_err();
        assert!(err.contains("url"));
    }

    #[test]
    fn preset_selection_flows_into_control() {
        let registry = TaskRegistry::new();
        let config = BotConfig {
            auto_buy: true,
            ticket_category: Some("VIP".into()),
            ticket_quantity: 9,
            ..test_config()
        };
        let task = registry.build_task("t1".into(), config);
        let selection = task.control.auto_buy.selection().unwrap();
        assert_eq!(selection.category, "VIP");
        assert_eq!(selection.quantity, 6);
    }

    #[test]
    fn stop_and_delete_rules() {
        let registry = TaskRegistry::new();
        let task = registry.build_task("t2".into(), test_config());
        registry.tasks.insert("t2".into(), task.clone());

        // active: stop ok, delete refused
        assert!(registry.stop("t2").is_ok());
        assert_eq!(task.status().label(), "stopping");
        assert!(registry.delete("t2").is_err());

        // inactive: stop refused, delete ok
        *task.status.write() = TaskStatus::Stopped;
        assert!(registry.stop("t2").is_err());
        assert!(registry.delete("t2").is_ok());
        assert!(registry.get("t2").is_none());
    }

    #[test]
    fn auto_buy_selection_requires_active_task() {
        let registry = TaskRegistry::new();
        let task = registry.build_task("t3".into(), test_config());
        registry.tasks.insert("t3".into(), task.clone());

        assert!(registry.set_auto_buy("t3", "VIP", 2).is_ok());
        assert_eq!(task.control.auto_buy.selection().unwrap().category, "VIP");

        *task.status.write() = TaskStatus::Finished;
        assert!(registry.set_auto_buy("t3", "CAT 1", 2).is_err());
    }

    #[test]
    fn rows_sort_newest_first_and_aggregate() {
        let registry = TaskRegistry::new();
        let older = registry.build_task("a1".into(), test_config());
        older.stats.record_click();
        registry.tasks.insert("a1".into(), older);

        std::thread::sleep(std::time::Duration::from_millis(5));
        let newer = registry.build_task("a2".into(), test_config());
        newer.stats.record_refresh();
        registry.tasks.insert("a2".into(), newer);

        let rows = registry.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "a2");

        let global = registry.global_snapshot();
        assert_eq!(global.total_tasks, 2);
        assert_eq!(global.active_tasks, 2);
        assert_eq!(global.total_clicks, 1);
        assert_eq!(global.total_refreshes, 1);
    }

    #[tokio::test]
    async fn duplicate_debugger_address_is_rejected() {
        let registry = TaskRegistry::new();
        let config = BotConfig {
            debugger_address: Some("127.0.0.1:9222".into()),
            ..test_config()
        };
        let task = registry.build_task("a4".into(), config.clone());
        registry.tasks.insert("a4".into(), task);

        let err = registry.start(config).await.unwrap_err();
        assert!(err.contains("debugger address"));
    }
}
