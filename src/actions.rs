//! Applies the actions a script recorded to the live simulation.

use tracing::debug;

use crate::error::PurchaseError;
use crate::fault;
use crate::game_log::{GameLog, LogKind};
use crate::scripting::ScriptOutput;
use crate::state::SimulationState;
use crate::upgrades::{UpgradeDef, UpgradeRegistry};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApplyReport {
    /// Actions that were purchased, in order.
    pub applied: Vec<String>,
    /// Unknown or currently unavailable action names.
    pub ignored: Vec<String>,
    /// The purchase that tripped a runtime fault, if any. Later actions were dropped.
    pub rejected: Option<PurchaseError>,
    pub dropped: usize,
}

/// Buys one level of `def` if every cost entry is affordable right now.
pub fn try_purchase(state: &mut SimulationState, def: &UpgradeDef) -> Result<(), PurchaseError> {
    if !def.is_available(state) {
        return Err(PurchaseError::NotAvailable(def.id.clone()));
    }
    let cost = state
        .upgrades
        .get(&def.id)
        .map_or_else(|| def.base_cost.clone(), |u| u.cost.clone());

    for (resource, &required) in &cost {
        let register = state
            .register(resource)
            .filter(|r| r.unlocked)
            .ok_or_else(|| PurchaseError::UnknownRegister {
                action: def.action_name(),
                resource: resource.clone(),
            })?;
        if register.value < required {
            return Err(PurchaseError::Unaffordable {
                action: def.action_name(),
                resource: resource.clone(),
                required,
                available: register.value,
            });
        }
    }

    for (resource, required) in &cost {
        if let Some(register) = state.register_mut(resource) {
            register.value -= required;
        }
    }
    def.effect.apply(state);

    let upgrade = state.upgrades.entry(def.id.clone()).or_default();
    upgrade.cost = cost;
    upgrade.level = upgrade.level.saturating_add(1);
    def.escalation.escalate(&mut upgrade.cost, upgrade.level);
    Ok(())
}

/// Appends the script log and applies recorded actions in order, re-checking
/// affordability before each one. The first failed purchase starts a fault
/// cooldown and drops the rest of the batch.
pub fn apply_actions(
    state: &mut SimulationState,
    registry: &UpgradeRegistry,
    output: &ScriptOutput,
    log: &mut GameLog,
    cooldown: u32,
) -> ApplyReport {
    if let Some(text) = output.log.as_deref() {
        if !text.trim().is_empty() {
            log.push(state.tick, LogKind::Script, text);
        }
    }

    let mut report = ApplyReport::default();
    for (idx, action) in output.actions.iter().enumerate() {
        let Some(def) = registry.lookup(action) else {
            debug!("[scriptidle actions] Ignoring unknown action '{action}'");
            report.ignored.push(action.clone());
            continue;
        };
        match try_purchase(state, def) {
            Ok(()) => report.applied.push(action.clone()),
            Err(PurchaseError::NotAvailable(_)) => {
                debug!("[scriptidle actions] Ignoring unavailable action '{action}'");
                report.ignored.push(action.clone());
            }
            Err(err) => {
                fault::on_script_failure(state, log, cooldown, &err);
                report.dropped = output.actions.len() - idx - 1;
                report.rejected = Some(err);
                break;
            }
        }
    }
    report
}
