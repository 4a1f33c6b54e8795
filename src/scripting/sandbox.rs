//! The isolated execution context: one worker thread running one fresh Rhai
//! engine per execution.
//!
//! The engine only sees the snapshot variables (as constants), the action stubs
//! and `log`. Module imports and `eval` are disabled. The host can stop a running
//! script at any time by raising the kill flag; the progress callback checks it
//! on every operation.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, ImmutableString, Scope, FLOAT, INT};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::config::SandboxLimits;
use crate::scripting::protocol::{encode_answer, WorkerMessage, WorkerRequest};
use crate::scripting::Primitive;

/// Starts an isolated context that serves exactly one request.
pub trait SandboxSpawner: Send + Sync {
    fn spawn(
        &self,
        requests: Receiver<WorkerRequest>,
        replies: UnboundedSender<WorkerMessage>,
        kill: Arc<AtomicBool>,
    ) -> std::io::Result<()>;
}

#[derive(Clone, Debug, Default)]
pub struct RhaiSandbox {
    pub limits: SandboxLimits,
}

impl RhaiSandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    pub fn spawn_worker(
        &self,
        requests: Receiver<WorkerRequest>,
        replies: UnboundedSender<WorkerMessage>,
        kill: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<()>> {
        let limits = self.limits.clone();
        std::thread::Builder::new()
            .name("scriptidle-sandbox".to_string())
            .spawn(move || run_worker(&limits, &requests, &replies, &kill))
    }
}

impl SandboxSpawner for RhaiSandbox {
    fn spawn(
        &self,
        requests: Receiver<WorkerRequest>,
        replies: UnboundedSender<WorkerMessage>,
        kill: Arc<AtomicBool>,
    ) -> std::io::Result<()> {
        // Detached: a killed script unwinds on its own at the next operation.
        self.spawn_worker(requests, replies, kill).map(|_| ())
    }
}

fn run_worker(
    limits: &SandboxLimits,
    requests: &Receiver<WorkerRequest>,
    replies: &UnboundedSender<WorkerMessage>,
    kill: &Arc<AtomicBool>,
) {
    let Ok(request) = requests.recv() else {
        debug!("[scriptidle sandbox] Host dropped the request channel before sending");
        return;
    };
    if replies.send(WorkerMessage::Started).is_err() {
        return;
    }

    let message = match evaluate(&request, limits, kill) {
        Ok(outcome) => match encode_answer(&outcome.actions) {
            Ok(answer) => WorkerMessage::Finished {
                answer,
                log: outcome.log,
            },
            Err(err) => WorkerMessage::Failed {
                message: err.to_string(),
            },
        },
        Err(message) => WorkerMessage::Failed { message },
    };

    if replies.send(message).is_err() {
        debug!("[scriptidle sandbox] Host stopped listening; late result discarded");
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct Evaluation {
    pub actions: Vec<String>,
    pub log: Option<String>,
}

/// Runs `request` to completion on the calling thread.
pub fn evaluate(
    request: &WorkerRequest,
    limits: &SandboxLimits,
    kill: &Arc<AtomicBool>,
) -> Result<Evaluation, String> {
    let actions = Rc::new(RefCell::new(Vec::<String>::new()));
    let log_lines = Rc::new(RefCell::new(Vec::<String>::new()));
    let engine = make_sandbox_engine(
        limits,
        kill,
        &request.functions,
        actions.clone(),
        log_lines.clone(),
    );

    let mut scope = Scope::new();
    for (name, value) in &request.variables {
        scope.push_constant_dynamic(name.as_str(), primitive_to_dynamic(value));
    }

    let ast = engine.compile(&request.code).map_err(|e| e.to_string())?;
    let returned = engine
        .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
        .map_err(|e| e.to_string())?;
    if !returned.is_unit() {
        log_lines.borrow_mut().push(returned.to_string());
    }

    let actions = std::mem::take(&mut *actions.borrow_mut());
    let lines = std::mem::take(&mut *log_lines.borrow_mut());
    Ok(Evaluation {
        actions,
        log: if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        },
    })
}

fn make_sandbox_engine(
    limits: &SandboxLimits,
    kill: &Arc<AtomicBool>,
    functions: &[String],
    actions: Rc<RefCell<Vec<String>>>,
    log_lines: Rc<RefCell<Vec<String>>>,
) -> Engine {
    let mut engine = Engine::new();
    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");
    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);

    let kill = kill.clone();
    engine.on_progress(move |_ops| {
        if kill.load(Ordering::Acquire) {
            Some("terminated by host".into())
        } else {
            None
        }
    });

    let sink = log_lines.clone();
    engine.on_print(move |text| sink.borrow_mut().push(text.to_string()));
    let sink = log_lines.clone();
    engine.on_debug(move |text, _source, _pos| sink.borrow_mut().push(text.to_string()));
    // The math package ships `log(FLOAT)`; typed overloads keep `log(AX)` a log call.
    let sink = log_lines.clone();
    engine.register_fn("log", move |value: FLOAT| {
        sink.borrow_mut().push(Dynamic::from_float(value).to_string());
    });
    let sink = log_lines.clone();
    engine.register_fn("log", move |value: INT| {
        sink.borrow_mut().push(value.to_string());
    });
    let sink = log_lines.clone();
    engine.register_fn("log", move |value: ImmutableString| {
        sink.borrow_mut().push(value.to_string());
    });
    let sink = log_lines;
    engine.register_fn("log", move |value: Dynamic| {
        sink.borrow_mut().push(value.to_string());
    });

    for name in functions {
        let recorded = actions.clone();
        let action = name.clone();
        engine.register_fn(name.as_str(), move || {
            recorded.borrow_mut().push(action.clone());
        });
    }

    engine
}

fn primitive_to_dynamic(value: &Primitive) -> Dynamic {
    match value {
        Primitive::Number(n) => Dynamic::from_float(*n),
        Primitive::Text(s) => s.as_str().into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn request(code: &str, vars: &[(&str, f64)], functions: &[&str]) -> WorkerRequest {
        WorkerRequest {
            code: code.to_string(),
            variables: vars
                .iter()
                .map(|(k, v)| (k.to_string(), Primitive::Number(*v)))
                .collect::<BTreeMap<_, _>>(),
            functions: functions.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn run(req: &WorkerRequest) -> Result<Evaluation, String> {
        evaluate(req, &SandboxLimits::default(), &Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn records_actions_and_log() {
        let req = request(
            r#"if AX >= nextAXWidthCost { buyAXWidthUpgrade(); } log("bought")"#,
            &[("AX", 5.0), ("AXMax", 7.0), ("nextAXWidthCost", 3.0)],
            &["buyAXWidthUpgrade"],
        );
        let out = run(&req).expect("script should run");
        assert_eq!(out.actions, vec!["buyAXWidthUpgrade"]);
        assert_eq!(out.log.as_deref(), Some("bought"));
    }

    #[test]
    fn duplicate_actions_are_preserved_in_order() {
        let req = request("buyB(); buyA(); buyB();", &[], &["buyA", "buyB"]);
        let out = run(&req).unwrap();
        assert_eq!(out.actions, vec!["buyB", "buyA", "buyB"]);
        assert_eq!(out.log, None);
    }

    #[test]
    fn top_level_return_value_is_logged() {
        let req = request("let x = AX * 2.0; return x;", &[("AX", 2.0)], &[]);
        let out = run(&req).unwrap();
        assert_eq!(out.log.as_deref(), Some("4.0"));
    }

    #[test]
    fn print_is_redirected_to_log() {
        let req = request(r#"print("a"); log(42);"#, &[], &[]);
        let out = run(&req).unwrap();
        assert_eq!(out.log.as_deref(), Some("a\n42"));
    }

    #[test]
    fn log_of_a_number_is_not_the_math_function() {
        let req = request("log(AX); log(3);", &[("AX", 100.0)], &[]);
        let out = run(&req).unwrap();
        assert_eq!(out.log.as_deref(), Some("100.0\n3"));
    }

    #[test]
    fn snapshot_values_are_read_only() {
        let req = request("AX = 100.0;", &[("AX", 5.0)], &[]);
        assert!(run(&req).is_err());
    }

    #[test]
    fn unknown_functions_and_imports_fail() {
        assert!(run(&request("buyEverything();", &[], &[])).is_err());
        assert!(run(&request(r#"import "std" as s;"#, &[], &[])).is_err());
        assert!(run(&request(r#"eval("1 + 1")"#, &[], &[])).is_err());
    }

    #[test]
    fn thrown_errors_carry_the_message() {
        let err = run(&request(r#"throw "out of ideas";"#, &[], &[])).unwrap_err();
        assert!(err.contains("out of ideas"), "unexpected error: {err}");
    }

    #[test]
    fn kill_flag_terminates_runaway_worker() {
        let sandbox = RhaiSandbox::default();
        let (req_tx, req_rx) = crossbeam_channel::bounded(1);
        let (reply_tx, mut reply_rx) = tokio::sync::mpsc::unbounded_channel();
        let kill = Arc::new(AtomicBool::new(false));
        let handle = sandbox
            .spawn_worker(req_rx, reply_tx, kill.clone())
            .expect("spawn worker");
        req_tx.send(request("while true {}", &[], &[])).unwrap();

        assert_eq!(reply_rx.blocking_recv(), Some(WorkerMessage::Started));
        std::thread::sleep(Duration::from_millis(50));
        kill.store(true, Ordering::Release);

        match reply_rx.blocking_recv() {
            Some(WorkerMessage::Failed { message }) => {
                assert!(message.to_lowercase().contains("terminated"), "{message}")
            }
            other => panic!("expected failure, got {other:?}"),
        }
        handle.join().expect("worker thread exits after kill");
    }
}
