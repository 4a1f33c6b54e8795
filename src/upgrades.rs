//! Upgrade definitions and the action-name registry.
//!
//! Upgrades are game data: a cost table, an effect applied on purchase, a rule for
//! escalating the cost afterwards, and a predicate deciding when the upgrade shows
//! up as an action for scripts. Each upgrade is exposed to scripts as a
//! zero-argument function named `buy{id}Upgrade`.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::state::{Register, SimulationState, UpgradeState};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpgradeEffect {
    /// Adds one bit of width: capacity becomes `capacity * 2 + 1`.
    Widen { register: String },
    AddIncrementer {
        register: String,
        #[serde(default = "default_incrementer_amount")]
        amount: u32,
    },
    Unlock { register: String },
}

fn default_incrementer_amount() -> u32 {
    1
}

impl UpgradeEffect {
    pub fn apply(&self, state: &mut SimulationState) {
        match self {
            UpgradeEffect::Widen { register } => {
                if let Some(reg) = state.register_mut(register) {
                    reg.capacity = reg.capacity * 2.0 + 1.0;
                }
            }
            UpgradeEffect::AddIncrementer { register, amount } => {
                if let Some(reg) = state.register_mut(register) {
                    reg.incrementers = reg.incrementers.saturating_add(*amount);
                }
            }
            UpgradeEffect::Unlock { register } => {
                state
                    .registers
                    .entry(register.clone())
                    .or_insert_with(|| Register {
                        capacity: 3.0,
                        ..Register::default()
                    })
                    .unlocked = true;
            }
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CostEscalation {
    #[default]
    Fixed,
    Multiply { factor: f64 },
    /// Every cost entry becomes `ceil(base * factor^level)` for the new level.
    Geometric { base: f64, factor: f64 },
}

impl CostEscalation {
    pub fn escalate(&self, cost: &mut BTreeMap<String, f64>, level: u32) {
        match self {
            CostEscalation::Fixed => {}
            CostEscalation::Multiply { factor } => {
                for amount in cost.values_mut() {
                    *amount *= factor;
                }
            }
            CostEscalation::Geometric { base, factor } => {
                let next = (base * factor.powi(level.min(i32::MAX as u32) as i32)).ceil();
                for amount in cost.values_mut() {
                    *amount = next;
                }
            }
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnlockRule {
    #[default]
    Always,
    RegisterUnlocked { register: String },
    CapacityAtLeast { register: String, amount: f64 },
    UpgradeLevel { upgrade: String, level: u32 },
}

impl UnlockRule {
    pub fn is_met(&self, state: &SimulationState) -> bool {
        match self {
            UnlockRule::Always => true,
            UnlockRule::RegisterUnlocked { register } => state.is_unlocked(register),
            UnlockRule::CapacityAtLeast { register, amount } => state
                .register(register)
                .is_some_and(|r| r.unlocked && r.capacity >= *amount),
            UnlockRule::UpgradeLevel { upgrade, level } => state.upgrade_level(upgrade) >= *level,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UpgradeDef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub base_cost: BTreeMap<String, f64>,
    pub effect: UpgradeEffect,
    #[serde(default)]
    pub escalation: CostEscalation,
    #[serde(default)]
    pub unlock: UnlockRule,
    #[serde(default)]
    pub max_level: Option<u32>,
}

impl UpgradeDef {
    pub fn action_name(&self) -> String {
        action_name_for(&self.id)
    }

    pub fn is_available(&self, state: &SimulationState) -> bool {
        if let Some(max) = self.max_level {
            if state.upgrade_level(&self.id) >= max {
                return false;
            }
        }
        self.unlock.is_met(state)
    }
}

pub fn action_name_for(id: &str) -> String {
    format!("buy{id}Upgrade")
}

/// Maps action names to upgrade definitions, keeping definition order.
#[derive(Clone, Debug, Default)]
pub struct UpgradeRegistry {
    defs: Vec<UpgradeDef>,
    by_action: HashMap<String, usize>,
}

impl UpgradeRegistry {
    pub fn from_defs(defs: Vec<UpgradeDef>) -> Self {
        let mut kept: Vec<UpgradeDef> = Vec::with_capacity(defs.len());
        let mut by_action = HashMap::new();
        for def in defs {
            let action = def.action_name();
            if let Some(&idx) = by_action.get(&action) {
                warn!(
                    "[scriptidle upgrades] Duplicate upgrade id '{}', keeping the last definition",
                    def.id
                );
                kept[idx] = def;
                continue;
            }
            by_action.insert(action, kept.len());
            kept.push(def);
        }
        Self {
            defs: kept,
            by_action,
        }
    }

    pub fn lookup(&self, action_name: &str) -> Option<&UpgradeDef> {
        self.by_action.get(action_name).map(|&idx| &self.defs[idx])
    }

    pub fn get(&self, id: &str) -> Option<&UpgradeDef> {
        self.lookup(&action_name_for(id))
    }

    pub fn defs(&self) -> &[UpgradeDef] {
        &self.defs
    }

    pub fn available<'a>(
        &'a self,
        state: &'a SimulationState,
    ) -> impl Iterator<Item = &'a UpgradeDef> + 'a {
        self.defs.iter().filter(move |def| def.is_available(state))
    }

    /// Adds cost tables for upgrades the state has never seen, e.g. after loading
    /// a save written before the upgrade existed.
    pub fn reconcile(&self, state: &mut SimulationState) {
        for def in &self.defs {
            state
                .upgrades
                .entry(def.id.clone())
                .or_insert_with(|| UpgradeState {
                    cost: def.base_cost.clone(),
                    level: 0,
                });
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RegisterDef {
    pub name: String,
    pub capacity: f64,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub incrementers: u32,
    #[serde(default = "default_unlocked")]
    pub unlocked: bool,
}

fn default_unlocked() -> bool {
    true
}

/// Registers and upgrades that make up a game.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GameDefinition {
    pub registers: Vec<RegisterDef>,
    pub upgrades: Vec<UpgradeDef>,
}

const EMBEDDED_GAME_JSON: &str =
    include_str!(concat!(env!("OUT_DIR"), "/scriptidle_embedded_game.json"));

impl GameDefinition {
    /// The game definition baked in at build time, or the built-in one.
    pub fn embedded() -> Self {
        match serde_json::from_str::<GameDefinition>(EMBEDDED_GAME_JSON) {
            Ok(def) => def,
            Err(err) => {
                warn!("[scriptidle upgrades] Ignoring invalid embedded game definition: {err}");
                GameDefinition::default()
            }
        }
    }

    pub fn registry(&self) -> UpgradeRegistry {
        UpgradeRegistry::from_defs(self.upgrades.clone())
    }

    pub fn initial_state(&self) -> SimulationState {
        let mut state = SimulationState::default();
        for def in &self.registers {
            state.registers.insert(
                def.name.clone(),
                Register {
                    value: def.value,
                    capacity: def.capacity,
                    incrementers: def.incrementers,
                    unlocked: def.unlocked,
                },
            );
        }
        self.registry().reconcile(&mut state);
        state
    }
}

impl Default for GameDefinition {
    fn default() -> Self {
        let cost = |resource: &str, amount: f64| BTreeMap::from([(resource.to_string(), amount)]);
        Self {
            registers: vec![
                RegisterDef {
                    name: "AX".to_string(),
                    capacity: 3.0,
                    value: 0.0,
                    incrementers: 0,
                    unlocked: true,
                },
                RegisterDef {
                    name: "BX".to_string(),
                    capacity: 3.0,
                    value: 0.0,
                    incrementers: 0,
                    unlocked: false,
                },
            ],
            upgrades: vec![
                UpgradeDef {
                    id: "AXIncrementer".to_string(),
                    name: "AX incrementer".to_string(),
                    base_cost: cost("AX", 0.0),
                    effect: UpgradeEffect::AddIncrementer {
                        register: "AX".to_string(),
                        amount: 1,
                    },
                    escalation: CostEscalation::Geometric {
                        base: 10.0,
                        factor: 1.1,
                    },
                    unlock: UnlockRule::Always,
                    max_level: None,
                },
                UpgradeDef {
                    id: "AXWidth".to_string(),
                    name: "AX width".to_string(),
                    base_cost: cost("AX", 2.0),
                    effect: UpgradeEffect::Widen {
                        register: "AX".to_string(),
                    },
                    escalation: CostEscalation::Multiply { factor: 2.0 },
                    unlock: UnlockRule::Always,
                    max_level: None,
                },
                UpgradeDef {
                    id: "BXUnlock".to_string(),
                    name: "Unlock BX".to_string(),
                    base_cost: cost("AX", 15.0),
                    effect: UpgradeEffect::Unlock {
                        register: "BX".to_string(),
                    },
                    escalation: CostEscalation::Fixed,
                    unlock: UnlockRule::CapacityAtLeast {
                        register: "AX".to_string(),
                        amount: 15.0,
                    },
                    max_level: Some(1),
                },
                UpgradeDef {
                    id: "BXIncrementer".to_string(),
                    name: "BX incrementer".to_string(),
                    base_cost: cost("AX", 20.0),
                    effect: UpgradeEffect::AddIncrementer {
                        register: "BX".to_string(),
                        amount: 1,
                    },
                    escalation: CostEscalation::Geometric {
                        base: 20.0,
                        factor: 1.5,
                    },
                    unlock: UnlockRule::RegisterUnlocked {
                        register: "BX".to_string(),
                    },
                    max_level: None,
                },
                UpgradeDef {
                    id: "BXWidth".to_string(),
                    name: "BX width".to_string(),
                    base_cost: cost("BX", 2.0),
                    effect: UpgradeEffect::Widen {
                        register: "BX".to_string(),
                    },
                    escalation: CostEscalation::Multiply { factor: 2.0 },
                    unlock: UnlockRule::RegisterUnlocked {
                        register: "BX".to_string(),
                    },
                    max_level: None,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widen_doubles_plus_one() {
        let mut state = GameDefinition::default().initial_state();
        state.registers.get_mut("AX").unwrap().capacity = 7.0;
        UpgradeEffect::Widen {
            register: "AX".to_string(),
        }
        .apply(&mut state);
        assert_eq!(state.register("AX").unwrap().capacity, 15.0);
    }

    #[test]
    fn geometric_escalation_matches_incrementer_curve() {
        let mut cost = BTreeMap::from([("AX".to_string(), 0.0)]);
        let escalation = CostEscalation::Geometric {
            base: 10.0,
            factor: 1.1,
        };
        escalation.escalate(&mut cost, 1);
        assert_eq!(cost["AX"], 11.0);
        escalation.escalate(&mut cost, 2);
        assert_eq!(cost["AX"], 13.0);
    }

    #[test]
    fn registry_resolves_action_names_in_definition_order() {
        let registry = GameDefinition::default().registry();
        assert_eq!(
            registry.lookup("buyAXWidthUpgrade").map(|d| d.id.as_str()),
            Some("AXWidth")
        );
        assert!(registry.lookup("buyNothingUpgrade").is_none());

        let state = GameDefinition::default().initial_state();
        let available: Vec<_> = registry.available(&state).map(|d| d.id.clone()).collect();
        assert_eq!(available, vec!["AXIncrementer", "AXWidth"]);
    }

    #[test]
    fn unlock_rules_follow_state() {
        let def = GameDefinition::default();
        let registry = def.registry();
        let mut state = def.initial_state();
        state.registers.get_mut("AX").unwrap().capacity = 15.0;
        assert!(registry.get("BXUnlock").unwrap().is_available(&state));

        registry.get("BXUnlock").unwrap().effect.apply(&mut state);
        state.upgrades.get_mut("BXUnlock").unwrap().level = 1;
        assert!(!registry.get("BXUnlock").unwrap().is_available(&state));
        assert!(registry.get("BXWidth").unwrap().is_available(&state));
    }

    #[test]
    fn reconcile_adds_missing_cost_tables_only() {
        let def = GameDefinition::default();
        let registry = def.registry();
        let mut state = def.initial_state();
        state.upgrades.get_mut("AXWidth").unwrap().cost.insert("AX".to_string(), 64.0);
        state.upgrades.remove("BXWidth");

        registry.reconcile(&mut state);
        assert_eq!(state.upgrades["AXWidth"].cost["AX"], 64.0);
        assert_eq!(state.upgrades["BXWidth"].cost["BX"], 2.0);
    }

    #[test]
    fn duplicate_ids_keep_last_definition() {
        let mut defs = GameDefinition::default().upgrades;
        let mut dup = defs[1].clone();
        dup.name = "replacement".to_string();
        defs.push(dup);
        let registry = UpgradeRegistry::from_defs(defs);
        assert_eq!(registry.defs().len(), 5);
        assert_eq!(registry.get("AXWidth").unwrap().name, "replacement");
    }

    #[test]
    fn definition_parses_from_json_with_defaults() {
        let json = r#"{
            "registers": [{ "name": "AX", "capacity": 7 }],
            "upgrades": [{
                "id": "AXWidth",
                "base_cost": { "AX": 3 },
                "effect": { "type": "widen", "register": "AX" },
                "escalation": { "type": "multiply", "factor": 2.0 }
            }]
        }"#;
        let def: GameDefinition = serde_json::from_str(json).unwrap();
        assert!(def.registers[0].unlocked);
        assert_eq!(def.upgrades[0].unlock, UnlockRule::Always);
        let state = def.initial_state();
        assert_eq!(state.upgrades["AXWidth"].cost["AX"], 3.0);
    }
}
