//! Trading Engine
//!
//! Wires the workspace together: configuration, the application context,
//! the session runner and the dual-DST scheduler.

pub mod config;
pub mod context;
pub mod engine;
pub mod scheduler;

pub use config::{AppConfig, SchedulerConfig, StorageConfig, TriggerSpec};
pub use context::{AppContext, Stores};
pub use engine::{SessionReport, StopLossExit, TradingEngine};
pub use scheduler::{
    Admission, DailyGuard, DstRegime, JobKind, Schedule, Scheduler, SchedulerCommand,
    SchedulerHandle, SchedulerStatus,
};
