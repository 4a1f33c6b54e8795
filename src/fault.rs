//! Fault and backoff handling.
//!
//! Two failure categories suppress scripts differently. A simulated runtime
//! fault (an unaffordable purchase) pauses the script for a fixed number of
//! ticks and then resumes it. A script-level failure (raise, parse error,
//! deadline) disables the script until the player supplies new code.

use tracing::{info, warn};

use crate::error::{ErrorKind, PurchaseError};
use crate::game_log::{GameLog, LogKind};
use crate::state::SimulationState;

/// Starts a cooldown of `cooldown` ticks after a simulated runtime fault.
pub fn on_script_failure(
    state: &mut SimulationState,
    log: &mut GameLog,
    cooldown: u32,
    cause: &PurchaseError,
) {
    state.fault_cycles = cooldown;
    info!(
        "[scriptidle fault] Runtime fault at tick {}: {cause}; pausing for {cooldown} ticks",
        state.tick
    );
    log.push(
        state.tick,
        LogKind::RuntimeFault,
        format!("Runtime fault: {cause}. Halting for {cooldown} cycles."),
    );
}

/// Disables the script after it raised or ran out of time.
pub fn on_script_error(state: &mut SimulationState, log: &mut GameLog, error: &ErrorKind) {
    warn!("[scriptidle fault] Script disabled at tick {}: {error}", state.tick);
    state.code.clear();
    log.push(state.tick, LogKind::ScriptFault, error.to_string());
}

/// Consumes one cooldown cycle. Returns true while the tick must be skipped.
pub fn should_skip(state: &mut SimulationState) -> bool {
    if state.fault_cycles > 0 {
        state.fault_cycles -= 1;
        true
    } else {
        false
    }
}
