//! Fixed-cadence tick loop.
//!
//! The scheduler owns the [`SimulationState`]. Each timer firing works out how
//! many logical ticks have elapsed and processes them one at a time, yielding to
//! the runtime between ticks. A tick runs at most one script execution and
//! awaits it before the next tick starts.

use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::actions::{apply_actions, try_purchase, ApplyReport};
use crate::config::GameConfig;
use crate::error::{ErrorKind, PurchaseError, SaveError};
use crate::fault;
use crate::game_log::{GameLog, LogKind};
use crate::perf::TickStats;
use crate::persistence::{export_save, import_save};
use crate::render::RenderView;
use crate::scripting::{build_snapshot, ExecutionRequest, ScriptExecutor};
use crate::state::SimulationState;
use crate::upgrades::{GameDefinition, UpgradeRegistry};

/// Outputs the scheduler drives but does not implement.
pub trait HostHooks {
    /// Called once after every drained batch of ticks.
    fn render(&mut self, view: &RenderView<'_>);
    /// Called on autosave and on shutdown.
    fn persist(&mut self, state: &SimulationState);
    /// Called on a hard reset, after the live state was replaced.
    fn hard_reset(&mut self) -> Result<(), SaveError> {
        Ok(())
    }
}

/// Requests from the host side, applied between tick batches.
pub enum HostCommand {
    SetCode(String, oneshot::Sender<()>),
    ClearCode(oneshot::Sender<()>),
    /// Manual purchase by upgrade id or action name. Never starts a fault cooldown.
    Purchase(String, oneshot::Sender<Result<(), PurchaseError>>),
    Export(oneshot::Sender<Result<String, SaveError>>),
    Import(String, oneshot::Sender<Result<(), String>>),
    HardReset(oneshot::Sender<Result<(), String>>),
    GetState(oneshot::Sender<SimulationState>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// Fault cooldown consumed this tick.
    Skipped,
    /// No script loaded.
    Idle,
    Executed(ApplyReport),
    ScriptFailed(ErrorKind),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    pub script_deadline: Duration,
    pub fault_cooldown_ticks: u32,
    pub autosave_interval_ticks: u64,
}

impl From<&GameConfig> for SchedulerSettings {
    fn from(config: &GameConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(config.tick_interval_ms.max(1)),
            script_deadline: Duration::from_millis(config.sandbox.deadline_ms.max(1)),
            fault_cooldown_ticks: config.fault_cooldown_ticks,
            autosave_interval_ticks: config.autosave_interval_ticks,
        }
    }
}

/// Wall-clock bookkeeping for the tick timer.
#[derive(Clone, Debug)]
pub struct TickClock {
    interval: Duration,
    last_fire: Instant,
    deadline: Instant,
}

impl TickClock {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_fire: now,
            deadline: now + interval,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Logical ticks since the previous firing: `round(elapsed / interval)`.
    pub fn fire(&mut self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.last_fire);
        self.last_fire = now;
        (elapsed.as_secs_f64() / self.interval.as_secs_f64()).round() as u64
    }

    /// Next deadline: one interval from `now`, minus whatever we overshot the
    /// previous deadline by.
    pub fn rearm(&mut self, now: Instant) -> Instant {
        let overshoot = now.saturating_duration_since(self.deadline);
        self.deadline = now + self.interval.saturating_sub(overshoot);
        self.deadline
    }
}

pub struct Scheduler<E, H> {
    state: SimulationState,
    definition: GameDefinition,
    registry: UpgradeRegistry,
    executor: E,
    hooks: H,
    log: GameLog,
    stats: TickStats,
    settings: SchedulerSettings,
    commands: Option<Receiver<HostCommand>>,
    shutdown: Option<watch::Receiver<bool>>,
    rendered_seq: u64,
    ticks_since_save: u64,
    snapshot_collisions: Vec<String>,
}

impl<E: ScriptExecutor, H: HostHooks> Scheduler<E, H> {
    pub fn new(
        config: &GameConfig,
        definition: GameDefinition,
        mut state: SimulationState,
        executor: E,
        hooks: H,
    ) -> Self {
        let registry = definition.registry();
        registry.reconcile(&mut state);
        Self {
            state,
            definition,
            registry,
            executor,
            hooks,
            log: GameLog::with_capacity(config.log_capacity),
            stats: TickStats::default(),
            settings: SchedulerSettings::from(config),
            commands: None,
            shutdown: None,
            rendered_seq: 0,
            ticks_since_save: 0,
            snapshot_collisions: Vec::new(),
        }
    }

    pub fn with_commands(mut self, commands: Receiver<HostCommand>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SimulationState {
        &mut self.state
    }

    pub fn log(&self) -> &GameLog {
        &self.log
    }

    pub fn stats(&self) -> &TickStats {
        &self.stats
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// One logical tick: cooldown check, accumulation, then snapshot, execute
    /// and apply when a script is loaded.
    pub async fn process_tick(&mut self) -> TickOutcome {
        self.state.tick += 1;
        self.stats.ticks += 1;

        if fault::should_skip(&mut self.state) {
            self.stats.skipped_ticks += 1;
            return TickOutcome::Skipped;
        }

        for name in self.state.accumulate() {
            debug!("[scriptidle] Register {name} overflowed at tick {}", self.state.tick);
        }

        if !self.state.has_script() {
            return TickOutcome::Idle;
        }

        let snapshot = build_snapshot(&self.state, &self.registry);
        if snapshot.collisions != self.snapshot_collisions {
            if !snapshot.collisions.is_empty() {
                warn!(
                    "[scriptidle] Script variables defined twice, keeping the first: {}",
                    snapshot.collisions.join(", ")
                );
            }
            self.snapshot_collisions = snapshot.collisions.clone();
        }
        let request = ExecutionRequest::new(
            self.state.code.clone(),
            snapshot,
            self.settings.script_deadline,
        );
        let start = Instant::now();
        let result = self.executor.execute(request).await;
        let elapsed_ms = start.elapsed().as_secs_f32() * 1000.0;

        match result {
            Ok(output) => {
                self.stats.record_execution(elapsed_ms, Ok(()));
                let report = apply_actions(
                    &mut self.state,
                    &self.registry,
                    &output,
                    &mut self.log,
                    self.settings.fault_cooldown_ticks,
                );
                self.stats.actions_applied += report.applied.len() as u64;
                if report.rejected.is_some() {
                    self.stats.runtime_faults += 1;
                }
                TickOutcome::Executed(report)
            }
            Err(err) => {
                self.stats.record_execution(elapsed_ms, Err(&err));
                fault::on_script_error(&mut self.state, &mut self.log, &err);
                TickOutcome::ScriptFailed(err)
            }
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Processes up to `ticks` logical ticks in order, then renders once. A
    /// shutdown request ends the batch before the next tick starts.
    pub async fn run_batch(&mut self, ticks: u64) {
        let start = Instant::now();
        let script_time_before = self.stats.script_time_ms;
        let mut processed = 0;
        while processed < ticks && !self.shutdown_requested() {
            self.process_tick().await;
            self.maybe_autosave();
            processed += 1;
            tokio::task::yield_now().await;
        }
        if processed < ticks {
            info!("[scriptidle] Shutdown requested, dropped {} pending ticks", ticks - processed);
        }
        let batch_ms = start.elapsed().as_secs_f32() * 1000.0;
        let script_ms = self.stats.script_time_ms - script_time_before;
        self.stats.history.push(processed, script_ms, batch_ms);
        self.render();
    }

    fn maybe_autosave(&mut self) {
        if self.settings.autosave_interval_ticks == 0 {
            return;
        }
        self.ticks_since_save += 1;
        if self.ticks_since_save >= self.settings.autosave_interval_ticks {
            self.ticks_since_save = 0;
            debug!("[scriptidle] Autosave at tick {}", self.state.tick);
            self.hooks.persist(&self.state);
        }
    }

    fn render(&mut self) {
        let view = RenderView::project(
            &self.state,
            &self.registry,
            &self.log,
            self.rendered_seq,
            &self.stats,
        );
        self.hooks.render(&view);
        self.rendered_seq = self.log.last_seq();
    }

    /// Applies every queued host command.
    pub fn drain_commands(&mut self) {
        let Some(commands) = self.commands.clone() else {
            return;
        };
        while let Ok(cmd) = commands.try_recv() {
            self.handle_command(cmd);
        }
    }

    pub fn handle_command(&mut self, cmd: HostCommand) {
        match cmd {
            HostCommand::SetCode(code, reply) => {
                info!("[scriptidle] Script updated ({} bytes)", code.len());
                self.state.code = code;
                let _ = reply.send(());
            }
            HostCommand::ClearCode(reply) => {
                self.state.code.clear();
                let _ = reply.send(());
            }
            HostCommand::Purchase(name, reply) => {
                let def = self
                    .registry
                    .lookup(&name)
                    .or_else(|| self.registry.get(&name));
                let result = match def {
                    Some(def) => try_purchase(&mut self.state, def),
                    None => Err(PurchaseError::NotAvailable(name)),
                };
                let _ = reply.send(result);
            }
            HostCommand::Export(reply) => {
                let _ = reply.send(export_save(&self.state));
            }
            HostCommand::Import(text, reply) => {
                let result = match import_save(&text) {
                    Ok(mut state) => {
                        self.registry.reconcile(&mut state);
                        self.state = state;
                        self.ticks_since_save = 0;
                        self.log.push(self.state.tick, LogKind::Notice, "Save imported");
                        Ok(())
                    }
                    Err(err) => {
                        warn!("[scriptidle save] Import rejected: {err}");
                        self.log
                            .push(self.state.tick, LogKind::Notice, format!("Import failed: {err}"));
                        Err(err.to_string())
                    }
                };
                let _ = reply.send(result);
            }
            HostCommand::HardReset(reply) => {
                self.state = self.definition.initial_state();
                self.ticks_since_save = 0;
                let result = self.hooks.hard_reset().map_err(|e| e.to_string());
                self.log.push(0, LogKind::Notice, "Game reset");
                let _ = reply.send(result);
            }
            HostCommand::GetState(reply) => {
                let _ = reply.send(self.state.clone());
            }
        }
    }

    /// Runs until `shutdown` flips to true (or its sender is dropped), then
    /// persists and returns the final state.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> SimulationState {
        self.shutdown = Some(shutdown.clone());
        let mut clock = TickClock::new(self.settings.tick_interval, Instant::now());
        info!(
            "[scriptidle] Scheduler started: tick {:?}, script deadline {:?}",
            self.settings.tick_interval, self.settings.script_deadline
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let deadline = tokio::time::Instant::from_std(clock.deadline());
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
            self.drain_commands();
            let ticks = clock.fire(Instant::now());
            self.run_batch(ticks).await;
            clock.rearm(Instant::now());
        }
        info!("[scriptidle] Scheduler stopped at tick {}", self.state.tick);
        self.hooks.persist(&self.state);
        self.state
    }
}
