use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A resource register. The value wraps to zero when it climbs past capacity.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Register {
    #[serde(default)]
    pub value: f64,
    pub capacity: f64,
    #[serde(default)]
    pub incrementers: u32,
    #[serde(default)]
    pub unlocked: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeState {
    pub cost: BTreeMap<String, f64>,
    #[serde(default)]
    pub level: u32,
}

/// Mutable root of the game. Owned by the scheduler and only touched between ticks.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SimulationState {
    pub registers: BTreeMap<String, Register>,
    #[serde(default)]
    pub upgrades: BTreeMap<String, UpgradeState>,
    #[serde(default)]
    pub fault_cycles: u32,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub tick: u64,
}

impl SimulationState {
    pub fn register(&self, name: &str) -> Option<&Register> {
        self.registers.get(name)
    }

    pub fn register_mut(&mut self, name: &str) -> Option<&mut Register> {
        self.registers.get_mut(name)
    }

    pub fn is_unlocked(&self, name: &str) -> bool {
        self.registers.get(name).is_some_and(|r| r.unlocked)
    }

    pub fn upgrade_level(&self, id: &str) -> u32 {
        self.upgrades.get(id).map_or(0, |u| u.level)
    }

    pub fn has_script(&self) -> bool {
        !self.code.trim().is_empty()
    }

    /// Advances every unlocked register by its incrementer count and returns the
    /// names of registers that overflowed back to zero.
    pub fn accumulate(&mut self) -> Vec<String> {
        let mut overflowed = Vec::new();
        for (name, register) in self.registers.iter_mut() {
            if !register.unlocked || register.incrementers == 0 {
                continue;
            }
            register.value += register.incrementers as f64;
            if register.value > register.capacity {
                register.value = 0.0;
                overflowed.push(name.clone());
            }
        }
        overflowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(value: f64, capacity: f64, incrementers: u32) -> SimulationState {
        let mut state = SimulationState::default();
        state.registers.insert(
            "AX".to_string(),
            Register {
                value,
                capacity,
                incrementers,
                unlocked: true,
            },
        );
        state
    }

    #[test]
    fn accumulate_adds_incrementers() {
        let mut state = state_with(1.0, 7.0, 2);
        assert!(state.accumulate().is_empty());
        assert_eq!(state.register("AX").unwrap().value, 3.0);
    }

    #[test]
    fn accumulate_overflows_past_capacity() {
        let mut state = state_with(7.0, 7.0, 1);
        assert_eq!(state.accumulate(), vec!["AX".to_string()]);
        assert_eq!(state.register("AX").unwrap().value, 0.0);
    }

    #[test]
    fn value_equal_to_capacity_does_not_overflow() {
        let mut state = state_with(6.0, 7.0, 1);
        state.accumulate();
        assert_eq!(state.register("AX").unwrap().value, 7.0);
    }

    #[test]
    fn locked_registers_do_not_accumulate() {
        let mut state = state_with(0.0, 7.0, 1);
        state.registers.get_mut("AX").unwrap().unlocked = false;
        state.accumulate();
        assert_eq!(state.register("AX").unwrap().value, 0.0);
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let mut state = state_with(1.0, 3.0, 0);
        state.fault_cycles = 2;
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["faultCycles"], 2);
        assert_eq!(json["registers"]["AX"]["capacity"], 3.0);
    }
}
