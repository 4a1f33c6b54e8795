//! Core of a scripted idle game: player scripts run each tick in an isolated
//! Rhai context against a snapshot of the game, and the purchases they request
//! are applied back to the simulation.

pub mod actions;
pub mod config;
pub mod error;
pub mod fault;
pub mod file_watcher;
pub mod game_log;
pub mod perf;
pub mod persistence;
pub mod render;
pub mod scheduler;
pub mod scripting;
pub mod state;
pub mod upgrades;

pub use config::{load_config, GameConfig, SandboxLimits};
pub use error::{ErrorKind, PurchaseError, SaveError};
pub use scheduler::{HostCommand, HostHooks, Scheduler};
pub use state::SimulationState;
