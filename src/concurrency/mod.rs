pub mod manager;
pub mod monitor;
pub mod options;

pub use manager::ConcurrencyManager;
pub use monitor::{MonitorStats, WorkerChannelMonitor};
pub use options::{
    launcher_env_overrides, resolve_options, ConcurrencyOptions, ConcurrencyOptionsConfig,
    EnvLookup, SystemCoreCount, SystemEnv, WorkerRuntime,
};
