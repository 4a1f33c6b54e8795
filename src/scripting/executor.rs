use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::debug;

use crate::config::SandboxLimits;
use crate::error::ErrorKind;
use crate::scripting::protocol::{decode_answer, WorkerMessage, WorkerRequest};
use crate::scripting::sandbox::{RhaiSandbox, SandboxSpawner};
use crate::scripting::{ExecutionRequest, ExecutionResult, ScriptOutput};

/// Runs player code against a snapshot and resolves once with the outcome.
pub trait ScriptExecutor {
    fn execute(&self, request: ExecutionRequest) -> impl Future<Output = ExecutionResult> + Send;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionPhase {
    Idle,
    Started,
    Completed,
    Failed,
    TimedOut,
    Disposed,
}

/// Executes each request in its own isolated context produced by `S`.
#[derive(Clone, Debug, Default)]
pub struct IsolatedExecutor<S> {
    sandbox: S,
}

pub type RhaiExecutor = IsolatedExecutor<RhaiSandbox>;

impl RhaiExecutor {
    pub fn new(limits: SandboxLimits) -> Self {
        Self {
            sandbox: RhaiSandbox::new(limits),
        }
    }
}

impl<S: SandboxSpawner> IsolatedExecutor<S> {
    pub fn with_sandbox(sandbox: S) -> Self {
        Self { sandbox }
    }

    fn start(&self, request: ExecutionRequest) -> Result<SandboxContext, ErrorKind> {
        let (request_tx, request_rx) = crossbeam_channel::bounded::<WorkerRequest>(1);
        let (reply_tx, reply_rx) = unbounded_channel::<WorkerMessage>();
        let kill = Arc::new(AtomicBool::new(false));

        // Build the guard first so a failed send still tears the context down.
        let context = SandboxContext {
            kill: kill.clone(),
            replies: reply_rx,
            phase: ExecutionPhase::Idle,
            deadline: request.deadline,
        };
        self.sandbox
            .spawn(request_rx, reply_tx, kill)
            .map_err(|e| ErrorKind::ScriptError(format!("Failed to start sandbox: {e}")))?;
        request_tx
            .send(WorkerRequest {
                code: request.code,
                variables: request.variables,
                functions: request.action_names,
            })
            .map_err(|_| {
                ErrorKind::ScriptError("Sandbox worker exited before receiving the script".into())
            })?;
        Ok(context)
    }
}

impl<S: SandboxSpawner> ScriptExecutor for IsolatedExecutor<S> {
    fn execute(&self, request: ExecutionRequest) -> impl Future<Output = ExecutionResult> + Send {
        let started = self.start(request);
        async move {
            match started {
                Ok(context) => context.run().await,
                Err(err) => Err(err),
            }
        }
    }
}

/// Host-side handle on one running context. Dropping it kills the worker and
/// stops accepting its messages.
struct SandboxContext {
    kill: Arc<AtomicBool>,
    replies: UnboundedReceiver<WorkerMessage>,
    phase: ExecutionPhase,
    deadline: Duration,
}

impl SandboxContext {
    async fn run(mut self) -> ExecutionResult {
        // The deadline is armed by the worker's start acknowledgement.
        loop {
            match self.replies.recv().await {
                Some(WorkerMessage::Started) => break,
                Some(other) => return self.resolve(Some(other)),
                None => return self.resolve(None),
            }
        }
        self.phase = ExecutionPhase::Started;

        match tokio::time::timeout(self.deadline, self.next_final()).await {
            Ok(message) => self.resolve(message),
            Err(_) => {
                self.phase = ExecutionPhase::TimedOut;
                Err(ErrorKind::DeadlineExceeded {
                    deadline_ms: self.deadline.as_millis() as u64,
                })
            }
        }
    }

    async fn next_final(&mut self) -> Option<WorkerMessage> {
        loop {
            match self.replies.recv().await {
                Some(WorkerMessage::Started) => continue,
                other => return other,
            }
        }
    }

    fn resolve(&mut self, message: Option<WorkerMessage>) -> ExecutionResult {
        let result = match message {
            Some(WorkerMessage::Finished { answer, log }) => {
                decode_answer(&answer).map(|actions| ScriptOutput { actions, log })
            }
            Some(WorkerMessage::Failed { message }) => Err(ErrorKind::ScriptError(message)),
            Some(WorkerMessage::Started) | None => Err(ErrorKind::ScriptError(
                "Sandbox worker exited without a result".to_string(),
            )),
        };
        self.phase = if result.is_ok() {
            ExecutionPhase::Completed
        } else {
            ExecutionPhase::Failed
        };
        result
    }
}

impl Drop for SandboxContext {
    fn drop(&mut self) {
        self.kill.store(true, Ordering::Release);
        self.replies.close();
        debug!("[scriptidle sandbox] Context disposed after {:?}", self.phase);
        self.phase = ExecutionPhase::Disposed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::snapshot::{Primitive, Snapshot};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Instant;

    fn request(code: &str, deadline_ms: u64) -> ExecutionRequest {
        let snapshot = Snapshot {
            variables: BTreeMap::from([
                ("AX".to_string(), Primitive::Number(5.0)),
                ("AXMax".to_string(), Primitive::Number(7.0)),
                ("nextAXWidthCost".to_string(), Primitive::Number(3.0)),
            ]),
            action_names: vec!["buyAXWidthUpgrade".to_string()],
            ..Snapshot::default()
        };
        ExecutionRequest::new(code, snapshot, Duration::from_millis(deadline_ms))
    }

    #[tokio::test]
    async fn completes_with_actions_and_log() {
        let executor = RhaiExecutor::new(SandboxLimits::default());
        let result = executor
            .execute(request(r#"buyAXWidthUpgrade(); log("bought")"#, 500))
            .await;
        assert_eq!(
            result,
            Ok(ScriptOutput {
                actions: vec!["buyAXWidthUpgrade".to_string()],
                log: Some("bought".to_string()),
            })
        );
    }

    #[tokio::test]
    async fn script_errors_resolve_as_values() {
        let executor = RhaiExecutor::new(SandboxLimits::default());
        let result = executor.execute(request("let x = ;", 500)).await;
        assert!(matches!(result, Err(ErrorKind::ScriptError(_))));
    }

    #[tokio::test]
    async fn runaway_script_hits_the_deadline() {
        let executor = RhaiExecutor::new(SandboxLimits::default());
        let started = Instant::now();
        let result = executor.execute(request("while(true){}", 200)).await;
        assert_eq!(result, Err(ErrorKind::DeadlineExceeded { deadline_ms: 200 }));
        assert!(started.elapsed() < Duration::from_millis(2_000));
    }

    /// Context that acknowledges, then tries to answer long after the deadline.
    #[derive(Clone, Default)]
    struct LateProbe {
        kill: Arc<Mutex<Option<Arc<AtomicBool>>>>,
        late_delivery_rejected: Arc<AtomicBool>,
        delay: Duration,
    }

    impl SandboxSpawner for LateProbe {
        fn spawn(
            &self,
            requests: crossbeam_channel::Receiver<WorkerRequest>,
            replies: tokio::sync::mpsc::UnboundedSender<WorkerMessage>,
            kill: Arc<AtomicBool>,
        ) -> std::io::Result<()> {
            *self.kill.lock().unwrap() = Some(kill);
            let rejected = self.late_delivery_rejected.clone();
            let delay = self.delay;
            std::thread::spawn(move || {
                let _ = requests.recv();
                let _ = replies.send(WorkerMessage::Started);
                std::thread::sleep(delay);
                let late = replies.send(WorkerMessage::Finished {
                    answer: r#"["buyAXWidthUpgrade"]"#.to_string(),
                    log: None,
                });
                rejected.store(late.is_err(), Ordering::SeqCst);
            });
            Ok(())
        }
    }

    #[tokio::test]
    async fn late_delivery_after_timeout_is_discarded() {
        let probe = LateProbe {
            delay: Duration::from_millis(300),
            ..LateProbe::default()
        };
        let executor = IsolatedExecutor::with_sandbox(probe.clone());
        let result = executor.execute(request("", 50)).await;
        assert_eq!(result, Err(ErrorKind::DeadlineExceeded { deadline_ms: 50 }));

        let kill = probe.kill.lock().unwrap().clone().expect("context spawned");
        assert!(kill.load(Ordering::SeqCst), "context not torn down");

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(probe.late_delivery_rejected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn context_is_torn_down_after_success() {
        let probe = LateProbe {
            delay: Duration::from_millis(0),
            ..LateProbe::default()
        };
        let executor = IsolatedExecutor::with_sandbox(probe.clone());
        let result = executor.execute(request("", 500)).await;
        assert_eq!(
            result.map(|out| out.actions),
            Ok(vec!["buyAXWidthUpgrade".to_string()])
        );
        let kill = probe.kill.lock().unwrap().clone().expect("context spawned");
        assert!(kill.load(Ordering::SeqCst));
    }

    struct ExitsSilently;

    impl SandboxSpawner for ExitsSilently {
        fn spawn(
            &self,
            requests: crossbeam_channel::Receiver<WorkerRequest>,
            replies: tokio::sync::mpsc::UnboundedSender<WorkerMessage>,
            _kill: Arc<AtomicBool>,
        ) -> std::io::Result<()> {
            std::thread::spawn(move || {
                let _ = requests.recv();
                let _ = replies.send(WorkerMessage::Started);
            });
            Ok(())
        }
    }

    #[tokio::test]
    async fn worker_exit_without_answer_is_a_script_error() {
        let executor = IsolatedExecutor::with_sandbox(ExitsSilently);
        let result = executor.execute(request("", 500)).await;
        assert!(matches!(result, Err(ErrorKind::ScriptError(msg)) if msg.contains("without a result")));
    }
}
