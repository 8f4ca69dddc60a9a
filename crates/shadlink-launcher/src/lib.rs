pub mod config;
pub mod console;
pub mod console_log;
pub mod events;
pub mod log_relay;
pub mod spawner;
pub mod supervisor;

pub use config::LauncherConfig;
pub use console_log::ConsoleLog;
pub use events::LauncherEvent;
pub use spawner::{ProcessSpawner, Spawner, WorkerEvent, WorkerHandle};
pub use supervisor::Supervisor;
