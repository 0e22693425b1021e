//! Cron-driven plugin checks
//!
//! Plugins declare 5-field cron expressions; [`CronTaskScheduler`] runs one
//! task per schedule and forwards whatever the check returns to the
//! notification gateway. Nothing here is persisted: the task set is rebuilt
//! from the plugin list on every start.

mod expression;
mod scheduler;
mod types;

pub use expression::{parse_timezone, CronExpression};
pub use scheduler::CronTaskScheduler;
pub use types::{
    CronError, CronSchedulerConfig, Result as CronResult, TaskInfo, DEFAULT_MESSAGE_DELAY,
};
