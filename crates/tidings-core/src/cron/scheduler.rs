//! Cron task scheduler
//!
//! One tokio task per enabled (plugin, schedule) pair. Each task sleeps until
//! the next firing of its expression, runs the plugin's condition check and
//! forwards the returned notifications to the gateway one at a time.


use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::expression::CronExpression;
use super::types::{CronError, CronSchedulerConfig, Result, TaskInfo};
use crate::clock::{SharedClock, SystemClock};
use crate::notification::{Notification, NotificationGateway};
use crate::plugin::{CheckContext, Plugin, PluginSchedule};

#[derive(Debug, Default)]
struct TaskState {
    paused: AtomicBool,
    runs: AtomicU64,
    next_run: Mutex<Option<DateTime<Utc>>>,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

struct CronTask {
    plugin: String,
    schedule: PluginSchedule,
    expression: CronExpression,
    state: Arc<TaskState>,
    handle: JoinHandle<()>,
}

impl CronTask {
    fn info(&self, name: &str) -> TaskInfo {
        TaskInfo {
            name: name.to_string(),
            plugin: self.plugin.clone(),
            schedule_id: self.schedule.schedule_id(),
            expression: self.expression.to_string(),
            description: self.schedule.description.clone(),
            paused: self.state.paused.load(Ordering::SeqCst),
            next_run: *lock(&self.state.next_run),
            last_run: *lock(&self.state.last_run),
            run_count: self.state.runs.load(Ordering::SeqCst),
        }
    }
}

/// Everything a firing needs, cloned into each task
#[derive(Clone)]
struct Dispatcher {
    gateway: Arc<dyn NotificationGateway>,
    clock: SharedClock,
    message_delay: Duration,
}

impl Dispatcher {
    /// Run one check in its own task so a panicking plugin only loses this
    /// firing. Returns the number of notifications delivered.
    async fn run_check(&self, plugin: Arc<dyn Plugin>, context: CheckContext) -> usize {
        let name = plugin.name().to_string();
        let schedule_id = context.schedule_id.clone();
        let check = tokio::spawn(async move { plugin.check_conditions(&context).await });

        let notifications = match check.await {
            Ok(Ok(notifications)) => notifications,
            Ok(Err(e)) => {
                error!(plugin = %name, schedule = %schedule_id, error = %e, "Plugin check failed");
                return 0;
            }
            Err(e) => {
                error!(plugin = %name, schedule = %schedule_id, error = %e, "Plugin check aborted");
                return 0;
            }
        };

        debug!(
            plugin = %name,
            schedule = %schedule_id,
            count = notifications.len(),
            "Plugin check complete"
        );
        self.deliver(&name, notifications).await
    }

    async fn deliver(&self, plugin: &str, notifications: Vec<Notification>) -> usize {
        let mut delivered = 0;
        for (i, notification) in notifications.iter().enumerate() {
            if i > 0 && !self.message_delay.is_zero() {
                tokio::time::sleep(self.message_delay).await;
            }
            match self.gateway.send(notification).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    plugin = %plugin,
                    title = %notification.title,
                    error = %e,
                    "Notification delivery failed"
                ),
            }
        }
        delivered
    }
}

/// Runs plugin checks on their declared cron cadences
pub struct CronTaskScheduler {
    dispatcher: Dispatcher,
    config: CronSchedulerConfig,
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
    tasks: Mutex<BTreeMap<String, CronTask>>,
    disabled_plugins: Mutex<HashSet<String>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl CronTaskScheduler {
    /// Create a scheduler on the wall clock
    pub fn new(
        plugins: Vec<Arc<dyn Plugin>>,
        gateway: Arc<dyn NotificationGateway>,
        config: CronSchedulerConfig,
    ) -> Self {
        Self::with_clock(plugins, gateway, config, Arc::new(SystemClock))
    }

    /// Create a scheduler reading time from `clock`
    pub fn with_clock(
        plugins: Vec<Arc<dyn Plugin>>,
        gateway: Arc<dyn NotificationGateway>,
        config: CronSchedulerConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            dispatcher: Dispatcher {
                gateway,
                clock,
                message_delay: config.message_delay,
            },
            config,
            plugins: RwLock::new(plugins),
            tasks: Mutex::new(BTreeMap::new()),
            disabled_plugins: Mutex::new(HashSet::new()),
            cancel: Mutex::new(None),
        }
    }

    /// Whether tasks are live
    pub fn is_running(&self) -> bool {
        lock(&self.cancel).is_some()
    }

    /// Names of the loaded plugins
    pub fn plugin_names(&self) -> Vec<String> {
        read(&self.plugins).iter().map(|p| p.name().to_string()).collect()
    }

    /// Create one task per enabled schedule. Returns the number created.
    ///
    /// Invalid expressions and duplicate task names are logged and skipped.
    pub fn start(&self) -> usize {
        let mut cancel_slot = lock(&self.cancel);
        if cancel_slot.is_some() {
            debug!("Cron scheduler already running");
            return 0;
        }
        let cancel = CancellationToken::new();

        let plugins = read(&self.plugins).clone();
        let disabled = lock(&self.disabled_plugins).clone();
        let mut tasks = lock(&self.tasks);

        for plugin in plugins {
            let plugin_name = plugin.name().to_string();
            for schedule in plugin.schedules() {
                if !schedule.enabled {
                    debug!(plugin = %plugin_name, schedule = %schedule.description, "Schedule disabled");
                    continue;
                }

                let name = schedule.task_name(&plugin_name);
                if tasks.contains_key(&name) {
                    warn!(task = %name, "Duplicate cron task name, skipping");
                    continue;
                }

                let expression = match CronExpression::parse(&schedule.expression) {
                    Ok(expression) => expression,
                    Err(e) => {
                        warn!(task = %name, error = %e, "Skipping schedule");
                        continue;
                    }
                };

                let state = Arc::new(TaskState::default());
                state
                    .paused
                    .store(disabled.contains(&plugin_name), Ordering::SeqCst);
                *lock(&state.next_run) =
                    expression.next_after(self.dispatcher.clock.now(), self.config.timezone);

                let handle = tokio::spawn(run_task(
                    self.dispatcher.clone(),
                    Arc::clone(&plugin),
                    schedule.clone(),
                    expression.clone(),
                    self.config.timezone,
                    Arc::clone(&state),
                    cancel.child_token(),
                ));

                info!(
                    task = %name,
                    expression = %expression,
                    timezone = %self.config.timezone,
                    "Cron task scheduled"
                );
                tasks.insert(
                    name,
                    CronTask {
                        plugin: plugin_name.clone(),
                        schedule,
                        expression,
                        state,
                        handle,
                    },
                );
            }
        }

        let created = tasks.len();
        *cancel_slot = Some(cancel);
        info!(tasks = created, "Cron scheduler started");
        created
    }

    /// Halt and discard every task
    pub fn stop(&self) {
        let Some(cancel) = lock(&self.cancel).take() else {
            return;
        };
        cancel.cancel();

        let tasks = std::mem::take(&mut *lock(&self.tasks));
        let count = tasks.len();
        for task in tasks.into_values() {
            task.handle.abort();
        }
        info!(tasks = count, "Cron scheduler stopped");
    }

    /// Skip firings of `name` until resumed
    pub fn pause(&self, name: &str) -> Result<()> {
        self.set_paused(name, true)
    }

    /// Resume a paused task
    pub fn resume(&self, name: &str) -> Result<()> {
        self.set_paused(name, false)
    }

    /// Flip a task's paused flag. Returns whether it is now active.
    pub fn toggle(&self, name: &str) -> Result<bool> {
        let tasks = lock(&self.tasks);
        let task = tasks
            .get(name)
            .ok_or_else(|| CronError::TaskNotFound(name.to_string()))?;
        let was_paused = task.state.paused.fetch_xor(true, Ordering::SeqCst);
        info!(task = %name, active = was_paused, "Cron task toggled");
        Ok(was_paused)
    }

    fn set_paused(&self, name: &str, paused: bool) -> Result<()> {
        let tasks = lock(&self.tasks);
        let task = tasks
            .get(name)
            .ok_or_else(|| CronError::TaskNotFound(name.to_string()))?;
        task.state.paused.store(paused, Ordering::SeqCst);
        info!(task = %name, paused, "Cron task updated");
        Ok(())
    }

    /// Run checks now, outside their cadence.
    ///
    /// With a plugin name only that plugin runs (even if disabled); without
    /// one every enabled plugin runs. Returns the notifications delivered.
    pub async fn execute_once_now(&self, plugin: Option<&str>) -> Result<usize> {
        let targets: Vec<Arc<dyn Plugin>> = {
            let plugins = read(&self.plugins);
            match plugin {
                Some(name) => {
                    let found = plugins
                        .iter()
                        .find(|p| p.name() == name)
                        .cloned()
                        .ok_or_else(|| CronError::PluginNotFound(name.to_string()))?;
                    vec![found]
                }
                None => {
                    let disabled = lock(&self.disabled_plugins);
                    plugins
                        .iter()
                        .filter(|p| !disabled.contains(p.name()))
                        .cloned()
                        .collect()
                }
            }
        };

        let mut delivered = 0;
        for target in targets {
            let context = CheckContext::manual(self.dispatcher.clock.now());
            info!(plugin = %target.name(), "Running plugin check on demand");
            delivered += self.dispatcher.run_check(target, context).await;
        }
        Ok(delivered)
    }

    /// Replace the plugin list, recreating every task
    pub fn reload(&self, plugins: Vec<Arc<dyn Plugin>>) -> usize {
        let was_running = self.is_running();
        self.stop();
        *write(&self.plugins) = plugins;
        info!(plugins = read(&self.plugins).len(), "Plugin list reloaded");
        if was_running {
            self.start()
        } else {
            0
        }
    }

    /// Pause or resume every task of a plugin. Returns the tasks affected.
    pub fn set_plugin_enabled(&self, plugin: &str, enabled: bool) -> Result<usize> {
        if !read(&self.plugins).iter().any(|p| p.name() == plugin) {
            return Err(CronError::PluginNotFound(plugin.to_string()));
        }

        {
            let mut disabled = lock(&self.disabled_plugins);
            if enabled {
                disabled.remove(plugin);
            } else {
                disabled.insert(plugin.to_string());
            }
        }

        let tasks = lock(&self.tasks);
        let mut affected = 0;
        for task in tasks.values().filter(|t| t.plugin == plugin) {
            task.state.paused.store(!enabled, Ordering::SeqCst);
            affected += 1;
        }
        info!(plugin = %plugin, enabled, tasks = affected, "Plugin toggled");
        Ok(affected)
    }

    /// Whether a plugin is currently enabled
    pub fn is_plugin_enabled(&self, plugin: &str) -> bool {
        !lock(&self.disabled_plugins).contains(plugin)
    }

    /// Snapshot of every task, ordered by name
    pub fn tasks(&self) -> Vec<TaskInfo> {
        lock(&self.tasks)
            .iter()
            .map(|(name, task)| task.info(name))
            .collect()
    }
}

impl Drop for CronTaskScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_task(
    dispatcher: Dispatcher,
    plugin: Arc<dyn Plugin>,
    schedule: PluginSchedule,
    expression: CronExpression,
    timezone: chrono_tz::Tz,
    state: Arc<TaskState>,
    cancel: CancellationToken,
) {
    let mut after = dispatcher.clock.now();
    loop {
        let Some(next) = expression.next_after(after, timezone) else {
            warn!(plugin = %plugin.name(), expression = %expression, "Cron expression has no future firings");
            return;
        };
        *lock(&state.next_run) = Some(next);

        let wait = (next - dispatcher.clock.now()).to_std().unwrap_or_default();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel.cancelled() => return,
        }
        after = next.max(dispatcher.clock.now());

        if state.paused.load(Ordering::SeqCst) {
            debug!(plugin = %plugin.name(), schedule = %schedule.description, "Cron task paused, skipping");
            continue;
        }

        let context = CheckContext::for_schedule(&schedule, next);
        let delivered = dispatcher.run_check(Arc::clone(&plugin), context).await;
        state.runs.fetch_add(1, Ordering::SeqCst);
        *lock(&state.last_run) = Some(next);
        debug!(plugin = %plugin.name(), schedule = %schedule.description, delivered, "Cron task fired");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
