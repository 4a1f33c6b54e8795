pub mod executor;
pub mod protocol;
pub mod sandbox;
pub mod snapshot;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::error::ErrorKind;

pub const DEFAULT_SCRIPT_DEADLINE_MS: u64 = 500;
pub const DEFAULT_RHAI_MAX_CALL_LEVELS: usize = 64;
pub const DEFAULT_RHAI_MAX_STRING_SIZE: usize = 64 * 1024;
pub const DEFAULT_RHAI_MAX_ARRAY_SIZE: usize = 10_000;
pub const DEFAULT_RHAI_MAX_MAP_SIZE: usize = 10_000;

pub use executor::{ExecutionPhase, IsolatedExecutor, RhaiExecutor, ScriptExecutor};
pub use sandbox::{RhaiSandbox, SandboxSpawner};
pub use snapshot::{build_snapshot, Primitive, Snapshot};

/// What a script produced in one successful run.
#[derive(Serialize, Clone, Debug, PartialEq, Default)]
pub struct ScriptOutput {
    /// Action stub invocations in call order, duplicates kept.
    pub actions: Vec<String>,
    pub log: Option<String>,
}

pub type ExecutionResult = Result<ScriptOutput, ErrorKind>;

/// Everything one execution needs. The executor owns it for the duration of the run.
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    pub code: String,
    pub variables: BTreeMap<String, Primitive>,
    pub action_names: Vec<String>,
    pub deadline: Duration,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, snapshot: Snapshot, deadline: Duration) -> Self {
        Self {
            code: code.into(),
            variables: snapshot.variables,
            action_names: snapshot.action_names,
            deadline,
        }
    }
}
