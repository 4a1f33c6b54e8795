//! Text projections of the simulation for the host, and a headless host that
//! writes them to the tracing output.

use serde::Serialize;
use tracing::info;

use crate::error::SaveError;
use crate::game_log::{GameLog, LogEntry};
use crate::perf::TickStats;
use crate::persistence::SaveStore;
use crate::scheduler::HostHooks;
use crate::state::SimulationState;
use crate::upgrades::UpgradeRegistry;

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct RegisterView {
    pub name: String,
    pub value: f64,
    pub capacity: f64,
    pub incrementers: u32,
}

impl RegisterView {
    /// `value / capacity`, floored.
    pub fn line(&self) -> String {
        format!("{}: {} / {}", self.name, self.value, self.capacity)
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct UpgradeView {
    pub id: String,
    pub name: String,
    pub action: String,
    pub level: u32,
    pub cost: Vec<(String, f64)>,
}

impl UpgradeView {
    pub fn label(&self) -> String {
        let cost = self
            .cost
            .iter()
            .map(|(resource, amount)| format!("{amount} {resource}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} ({cost})", self.name)
    }
}

/// What a host needs to redraw after a batch of ticks.
#[derive(Serialize, Clone, Debug)]
pub struct RenderView<'a> {
    pub tick: u64,
    pub fault_cycles: u32,
    pub script_loaded: bool,
    pub registers: Vec<RegisterView>,
    pub upgrades: Vec<UpgradeView>,
    /// Log entries appended since the previous render.
    pub new_log: &'a [LogEntry],
    pub stats: &'a TickStats,
}

impl<'a> RenderView<'a> {
    pub fn project(
        state: &SimulationState,
        registry: &UpgradeRegistry,
        log: &'a GameLog,
        since_seq: u64,
        stats: &'a TickStats,
    ) -> Self {
        let registers = state
            .registers
            .iter()
            .filter(|(_, r)| r.unlocked)
            .map(|(name, r)| RegisterView {
                name: name.clone(),
                value: r.value.floor(),
                capacity: r.capacity.floor(),
                incrementers: r.incrementers,
            })
            .collect();
        let upgrades = registry
            .available(state)
            .map(|def| {
                let cost = state
                    .upgrades
                    .get(&def.id)
                    .map_or(&def.base_cost, |u| &u.cost)
                    .iter()
                    .map(|(resource, amount)| (resource.clone(), amount.floor()))
                    .collect();
                UpgradeView {
                    id: def.id.clone(),
                    name: if def.name.is_empty() {
                        def.id.clone()
                    } else {
                        def.name.clone()
                    },
                    action: def.action_name(),
                    level: state.upgrade_level(&def.id),
                    cost,
                }
            })
            .collect();
        Self {
            tick: state.tick,
            fault_cycles: state.fault_cycles,
            script_loaded: state.has_script(),
            registers,
            upgrades,
            new_log: log.since(since_seq),
            stats,
        }
    }
}

/// Host without a display: registers and log lines go to the tracing output and
/// persistence goes to a save file.
pub struct HeadlessHost {
    store: SaveStore,
    render_every: u64,
    last_rendered_tick: u64,
}

impl HeadlessHost {
    pub fn new(store: SaveStore, render_every: u64) -> Self {
        Self {
            store,
            render_every: render_every.max(1),
            last_rendered_tick: 0,
        }
    }
}

impl HostHooks for HeadlessHost {
    fn render(&mut self, view: &RenderView<'_>) {
        for entry in view.new_log {
            info!("[scriptidle log] {}", entry.line());
        }
        if view.tick < self.last_rendered_tick + self.render_every {
            return;
        }
        self.last_rendered_tick = view.tick;
        let registers = view
            .registers
            .iter()
            .map(RegisterView::line)
            .collect::<Vec<_>>()
            .join("  ");
        info!(
            "[scriptidle] tick {} | {registers} | fault {} | script {}",
            view.tick,
            view.fault_cycles,
            if view.script_loaded { "on" } else { "off" }
        );
    }

    fn persist(&mut self, state: &SimulationState) {
        if let Err(err) = self.store.save(state) {
            tracing::warn!("[scriptidle save] Autosave failed: {err}");
        }
    }

    fn hard_reset(&mut self) -> Result<(), SaveError> {
        self.last_rendered_tick = 0;
        self.store.hard_reset()
    }
}
