use std::path::Path;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use scriptidle::file_watcher::ScriptWatcher;
use scriptidle::persistence::{export_save, import_save, SaveStore};
use scriptidle::render::HeadlessHost;
use scriptidle::scripting::RhaiExecutor;
use scriptidle::upgrades::GameDefinition;
use scriptidle::{load_config, GameConfig, Scheduler, SimulationState};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn load_state(store: &SaveStore, definition: &GameDefinition) -> SimulationState {
    match store.load() {
        Ok(Some(state)) => {
            info!("[scriptidle save] Loaded {}", store.path().display());
            state
        }
        Ok(None) => definition.initial_state(),
        Err(e) => {
            warn!("[scriptidle save] Ignoring unreadable save: {e}");
            definition.initial_state()
        }
    }
}

/// One-shot save management commands. Returns the exit code when one ran.
fn run_save_command(args: &[String], store: &SaveStore, definition: &GameDefinition) -> Option<i32> {
    if args.iter().any(|a| a == "--hard-reset") {
        return Some(match store.hard_reset() {
            Ok(()) => 0,
            Err(e) => {
                error!("[scriptidle save] Hard reset failed: {e}");
                1
            }
        });
    }
    if args.iter().any(|a| a == "--export") {
        return Some(match export_save(&load_state(store, definition)) {
            Ok(text) => {
                println!("{text}");
                0
            }
            Err(e) => {
                error!("[scriptidle save] Export failed: {e}");
                1
            }
        });
    }
    if let Some(pos) = args.iter().position(|a| a == "--import") {
        let Some(path) = args.get(pos + 1) else {
            error!("[scriptidle save] --import needs a file containing an exported save");
            return Some(2);
        };
        let imported = std::fs::read_to_string(Path::new(path))
            .map_err(|e| e.to_string())
            .and_then(|text| import_save(&text).map_err(|e| e.to_string()));
        return Some(match imported.and_then(|state| store.save(&state).map_err(|e| e.to_string())) {
            Ok(()) => {
                info!("[scriptidle save] Imported {path} into {}", store.path().display());
                0
            }
            Err(e) => {
                error!("[scriptidle save] Import failed: {e}");
                1
            }
        });
    }
    None
}

fn render_every(config: &GameConfig) -> u64 {
    (1000 / config.tick_interval_ms.max(1)).max(1)
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args: Vec<String> = std::env::args().collect();
    let config = load_config();
    let definition = config.game_definition();
    let store = SaveStore::new(config.save_path.clone());

    if let Some(code) = run_save_command(&args, &store, &definition) {
        std::process::exit(code);
    }

    let mut state = load_state(&store, &definition);
    let (command_tx, command_rx) = crossbeam_channel::unbounded();
    let _watcher = match config.script_path.clone() {
        Some(path) => {
            match std::fs::read_to_string(&path) {
                Ok(code) => state.code = code,
                Err(e) => warn!("[scriptidle] Cannot read script {}: {e}", path.display()),
            }
            match ScriptWatcher::spawn(path, command_tx.clone()) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!("[scriptidle watcher] Failed to watch script: {e}");
                    None
                }
            }
        }
        None => None,
    };

    let executor = RhaiExecutor::new(config.sandbox.clone());
    let host = HeadlessHost::new(store, render_every(&config));
    let scheduler =
        Scheduler::new(&config, definition, state, executor, host).with_commands(command_rx);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("[scriptidle] Shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!("[scriptidle] Ctrl-C handler unavailable: {e}");
                std::future::pending::<()>().await;
            }
        }
    });

    let final_state = scheduler.run(shutdown_rx).await;
    info!(
        "[scriptidle] Saved at tick {} ({} registers)",
        final_state.tick,
        final_state.registers.len()
    );
}
