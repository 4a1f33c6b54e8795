//! Primitive-only projection of the simulation handed to scripts each tick.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::state::SimulationState;
use crate::upgrades::UpgradeRegistry;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum Primitive {
    Number(f64),
    Text(String),
}

impl From<f64> for Primitive {
    fn from(value: f64) -> Self {
        Primitive::Number(value)
    }
}

impl From<&str> for Primitive {
    fn from(value: &str) -> Self {
        Primitive::Text(value.to_string())
    }
}

impl From<String> for Primitive {
    fn from(value: String) -> Self {
        Primitive::Text(value)
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Snapshot {
    pub variables: BTreeMap<String, Primitive>,
    /// Names of the action stubs, in upgrade definition order.
    pub action_names: Vec<String>,
    /// Variable names produced twice. The first value is kept.
    pub collisions: Vec<String>,
}

impl Snapshot {
    fn put(&mut self, name: String, value: impl Into<Primitive>) {
        if self.variables.contains_key(&name) {
            self.collisions.push(name);
        } else {
            self.variables.insert(name, value.into());
        }
    }
}

pub fn build_snapshot(state: &SimulationState, registry: &UpgradeRegistry) -> Snapshot {
    let mut snapshot = Snapshot::default();
    snapshot.put("tick".to_string(), state.tick as f64);

    for (name, register) in &state.registers {
        if !register.unlocked {
            continue;
        }
        snapshot.put(name.clone(), register.value);
        snapshot.put(format!("{name}Max"), register.capacity);
        snapshot.put(format!("{name}Incrementers"), register.incrementers as f64);
    }

    for def in registry.available(state) {
        let cost = state
            .upgrades
            .get(&def.id)
            .map_or(&def.base_cost, |u| &u.cost);
        if cost.len() == 1 {
            if let Some(amount) = cost.values().next() {
                snapshot.put(format!("next{}Cost", def.id), *amount);
            }
        } else {
            for (resource, amount) in cost {
                snapshot.put(format!("next{}Cost{resource}", def.id), *amount);
            }
        }
        snapshot.put(format!("{}Level", def.id), state.upgrade_level(&def.id) as f64);
        snapshot.action_names.push(def.action_name());
    }

    snapshot
}
