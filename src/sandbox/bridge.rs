//! Host-side proxy for the execution worker.
//!
//! The bridge owns the single long-lived worker, hands out a
//! promise-style `execute` API, and guarantees liveness even when the
//! worker hangs or dies: every call is guarded by a backup timeout
//! independent of the worker's internal deadline. Responses are
//! correlated by request id, never by arrival order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SandboxError};
use crate::module::Language;
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::protocol::{ExecOutcome, ExecRequest, WorkerMessage};
use crate::sandbox::worker;

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<ExecOutcome>>>>;

/// Live channel state; replaced wholesale on restart.
struct BridgeState {
    requests: mpsc::Sender<ExecRequest>,
    ready: watch::Receiver<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

/// Owns the worker lifecycle and multiplexes concurrent execution
/// requests over it.
pub struct WorkerBridge {
    config: SandboxConfig,
    pending: PendingMap,
    fault: Arc<Mutex<Option<String>>>,
    state: Mutex<Option<BridgeState>>,
}

impl WorkerBridge {
    /// Create the bridge and spawn the worker. Readiness resolves
    /// asynchronously; `execute` waits for it internally.
    pub fn start(config: SandboxConfig) -> Self {
        let bridge = Self::unstarted(config);
        bridge.spawn_worker();
        bridge
    }

    fn unstarted(config: SandboxConfig) -> Self {
        Self {
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
            fault: Arc::new(Mutex::new(None)),
            state: Mutex::new(None),
        }
    }

    fn spawn_worker(&self) {
        let handle = worker::spawn(self.config.clone());
        self.attach(handle.requests, handle.messages, vec![handle.task]);
    }

    /// Wire up channels to a (possibly fake, in tests) worker.
    fn attach(
        &self,
        requests: mpsc::Sender<ExecRequest>,
        messages: mpsc::Receiver<WorkerMessage>,
        mut tasks: Vec<tokio::task::JoinHandle<()>>,
    ) {
        let (ready_tx, ready_rx) = watch::channel(false);
        let dispatcher = tokio::spawn(dispatch_loop(
            messages,
            Arc::clone(&self.pending),
            Arc::clone(&self.fault),
            ready_tx,
        ));
        tasks.push(dispatcher);

        *self.state.lock().unwrap() = Some(BridgeState {
            requests,
            ready: ready_rx,
            tasks,
        });
    }

    #[cfg(test)]
    fn with_channels(
        config: SandboxConfig,
        requests: mpsc::Sender<ExecRequest>,
        messages: mpsc::Receiver<WorkerMessage>,
    ) -> Self {
        let bridge = Self::unstarted(config);
        bridge.attach(requests, messages, Vec::new());
        bridge
    }

    /// Execute `code` in the sandbox and resolve with its outcome.
    ///
    /// Timeouts — including total worker non-response past the backup
    /// deadline — resolve with `timed_out: true` rather than erroring,
    /// so callers have one uniform success/failure contract. `Err` is
    /// reserved for infrastructure failures (bridge terminated, worker
    /// channel gone).
    pub async fn execute(
        &self,
        language: Language,
        code: &str,
        stdin: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecOutcome> {
        let timeout = timeout.unwrap_or(self.config.timeout);
        let deadline = self.config.backup_deadline(timeout);

        let (requests, mut ready) = {
            let state = self.state.lock().unwrap();
            let state = state.as_ref().ok_or_else(|| {
                SandboxError::WorkerUnavailable("bridge is terminated".to_string())
            })?;
            (state.requests.clone(), state.ready.clone())
        };

        // Never dispatch before the worker's one-time ready signal.
        let became_ready = tokio::time::timeout(deadline, async {
            while !*ready.borrow_and_update() {
                if ready.changed().await.is_err() {
                    return false;
                }
            }
            true
        })
        .await;

        match became_ready {
            Ok(true) => {}
            Ok(false) => {
                return Err(SandboxError::WorkerUnavailable(
                    "worker exited before becoming ready".to_string(),
                ))
            }
            Err(_) => {
                self.mark_faulted("worker never became ready");
                warn!("worker not ready within backup deadline, resolving as timed out");
                return Ok(ExecOutcome::timed_out(Vec::new(), deadline));
            }
        }

        let mut request = ExecRequest::new(language, code, timeout);
        if let Some(stdin) = stdin {
            request = request.with_stdin(stdin);
        }
        let id = request.id;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, outcome_tx);

        if requests.send(request).await.is_err() {
            self.pending.lock().unwrap().remove(&id);
            self.mark_faulted("worker request channel closed");
            return Err(SandboxError::WorkerUnavailable(
                "worker request channel closed".to_string(),
            ));
        }

        // Backup timeout: independent of the worker's internal deadline,
        // guarding against the worker never responding at all. Scoped to
        // this await, so no timer outlives the call.
        match tokio::time::timeout(deadline, outcome_rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => {
                // Pending entry reclaimed by terminate().
                Err(SandboxError::WorkerUnavailable(
                    "worker terminated while request was in flight".to_string(),
                ))
            }
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                self.mark_faulted("no response within backup timeout");
                warn!(%id, ?deadline, "backup timeout expired, resolving as timed out");
                Ok(ExecOutcome::timed_out(Vec::new(), deadline))
            }
        }
    }

    /// Tear down the worker and fail any in-flight calls. Used on
    /// session cleanup and as the first half of a manual restart.
    pub fn terminate(&self) {
        if let Some(state) = self.state.lock().unwrap().take() {
            for task in state.tasks {
                task.abort();
            }
        }
        // Dropping the senders resolves in-flight receivers as faults.
        self.pending.lock().unwrap().clear();
        info!("worker bridge terminated");
    }

    /// Manual retry affordance: tear down whatever is left and bring up
    /// a fresh worker.
    pub fn restart(&self) {
        self.terminate();
        *self.fault.lock().unwrap() = None;
        self.spawn_worker();
        info!("worker bridge restarted");
    }

    /// Whether the bridge is in a retryable faulted state.
    pub fn is_faulted(&self) -> bool {
        self.fault.lock().unwrap().is_some()
    }

    /// The most recent fault description, if any.
    pub fn fault_message(&self) -> Option<String> {
        self.fault.lock().unwrap().clone()
    }

    /// Whether the worker has signalled ready.
    pub fn is_ready(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| *s.ready.borrow())
            .unwrap_or(false)
    }

    fn mark_faulted(&self, message: &str) {
        *self.fault.lock().unwrap() = Some(message.to_string());
    }
}

impl Drop for WorkerBridge {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Routes worker messages to their pending callers.
async fn dispatch_loop(
    mut messages: mpsc::Receiver<WorkerMessage>,
    pending: PendingMap,
    fault: Arc<Mutex<Option<String>>>,
    ready: watch::Sender<bool>,
) {
    while let Some(message) = messages.recv().await {
        match message {
            WorkerMessage::Ready => {
                let _ = ready.send(true);
            }
            WorkerMessage::Result { id, outcome } => {
                let sender = pending.lock().unwrap().remove(&id);
                match sender {
                    Some(sender) => {
                        // Caller may have hit its backup timeout between
                        // our remove and this send; that is fine.
                        let _ = sender.send(outcome);
                    }
                    None => {
                        debug!(%id, "dropping response for reclaimed request");
                    }
                }
            }
            WorkerMessage::Fault { message } => {
                // Worker-level fault, distinct from a failed run. Leaves
                // unrelated pending runs to their own timeouts.
                warn!(fault = %message, "worker reported fault");
                *fault.lock().unwrap() = Some(message);
            }
        }
    }
    debug!("worker message channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::protocol::LogLine;
    use crate::sandbox::worker::CHANNEL_DEPTH;

    fn test_config() -> SandboxConfig {
        SandboxConfig::builder()
            .timeout(Duration::from_millis(500))
            .build()
    }

    /// A fake worker that echoes each request's code back as a log line,
    /// after an optional per-request delay parsed from the code.
    fn spawn_echo_worker(
        mut requests: mpsc::Receiver<ExecRequest>,
        messages: mpsc::Sender<WorkerMessage>,
    ) {
        tokio::spawn(async move {
            messages.send(WorkerMessage::Ready).await.unwrap();
            while let Some(request) = requests.recv().await {
                let messages = messages.clone();
                tokio::spawn(async move {
                    let delay: u64 = request.code.parse().unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    let outcome = ExecOutcome::ok(
                        vec![LogLine::log(request.code.clone())],
                        Duration::from_millis(delay),
                    );
                    let _ = messages
                        .send(WorkerMessage::Result {
                            id: request.id,
                            outcome,
                        })
                        .await;
                });
            }
        });
    }

    fn echo_bridge() -> WorkerBridge {
        let (req_tx, req_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (msg_tx, msg_rx) = mpsc::channel(CHANNEL_DEPTH);
        spawn_echo_worker(req_rx, msg_tx);
        WorkerBridge::with_channels(test_config(), req_tx, msg_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_exactly_one_response_per_concurrent_request() {
        let bridge = Arc::new(echo_bridge());

        // Five concurrent calls with staggered completion so responses
        // arrive out of dispatch order.
        let delays = ["40", "10", "30", "0", "20"];
        let mut handles = Vec::new();
        for code in delays {
            let bridge = Arc::clone(&bridge);
            handles.push(tokio::spawn(async move {
                (
                    code,
                    bridge
                        .execute(Language::Python, code, None, None)
                        .await
                        .unwrap(),
                )
            }));
        }

        for handle in handles {
            let (code, outcome) = handle.await.unwrap();
            assert!(outcome.success);
            // Each call resolved with its own program's output.
            assert_eq!(outcome.logs, vec![LogLine::log(code)]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backup_timeout_resolves_not_rejects() {
        // A worker that signals ready but never answers.
        let (req_tx, mut req_rx) = mpsc::channel::<ExecRequest>(CHANNEL_DEPTH);
        let (msg_tx, msg_rx) = mpsc::channel(CHANNEL_DEPTH);
        tokio::spawn(async move {
            msg_tx.send(WorkerMessage::Ready).await.unwrap();
            while req_rx.recv().await.is_some() {}
        });
        let bridge = WorkerBridge::with_channels(test_config(), req_tx, msg_rx);

        let start = tokio::time::Instant::now();
        let outcome = bridge
            .execute(Language::Python, "while True: pass", None, None)
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.timed_out);
        // timeout (500ms) + clamped backup buffer (1s)
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
        assert!(bridge.is_faulted());
        // Entry was reclaimed; nothing left pending.
        assert!(bridge.pending.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_after_reclaim_is_dropped() {
        let (req_tx, mut req_rx) = mpsc::channel::<ExecRequest>(CHANNEL_DEPTH);
        let (msg_tx, msg_rx) = mpsc::channel(CHANNEL_DEPTH);
        let late_tx = msg_tx.clone();
        tokio::spawn(async move {
            msg_tx.send(WorkerMessage::Ready).await.unwrap();
        });
        let bridge = WorkerBridge::with_channels(test_config(), req_tx, msg_rx);

        let outcome = bridge
            .execute(Language::Python, "slow", None, None)
            .await
            .unwrap();
        assert!(outcome.timed_out);

        // The worker finally answers after the caller gave up; the
        // dispatcher must drop it without effect.
        let request = req_rx.recv().await.unwrap();
        late_tx
            .send(WorkerMessage::Result {
                id: request.id,
                outcome: ExecOutcome::ok(vec![], Duration::ZERO),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(bridge.pending.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_fails_in_flight_calls() {
        let (req_tx, mut req_rx) = mpsc::channel::<ExecRequest>(CHANNEL_DEPTH);
        let (msg_tx, msg_rx) = mpsc::channel(CHANNEL_DEPTH);
        tokio::spawn(async move {
            msg_tx.send(WorkerMessage::Ready).await.unwrap();
            while req_rx.recv().await.is_some() {}
        });
        let bridge = Arc::new(WorkerBridge::with_channels(test_config(), req_tx, msg_rx));

        let in_flight = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move {
                bridge.execute(Language::Python, "hang", None, None).await
            })
        };
        // Let the call reach its pending await before tearing down.
        tokio::time::sleep(Duration::from_millis(1)).await;

        bridge.terminate();

        let err = in_flight.await.unwrap().unwrap_err();
        assert!(err.is_worker_fault());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_after_terminate_is_an_error() {
        let bridge = echo_bridge();
        bridge.terminate();

        let err = bridge
            .execute(Language::Python, "print(1)", None, None)
            .await
            .unwrap_err();
        assert!(err.is_worker_fault());
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_fault_marks_bridge_retryable() {
        let (req_tx, _req_rx) = mpsc::channel::<ExecRequest>(CHANNEL_DEPTH);
        let (msg_tx, msg_rx) = mpsc::channel(CHANNEL_DEPTH);
        let bridge = WorkerBridge::with_channels(test_config(), req_tx, msg_rx);

        msg_tx
            .send(WorkerMessage::Fault {
                message: "engine init failed".to_string(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(bridge.is_faulted());
        assert_eq!(
            bridge.fault_message().as_deref(),
            Some("engine init failed")
        );
    }

    #[test]
    fn test_start_from_owned_runtime_via_block_on() {
        // `start` spawns tasks, so a synchronous caller (benches, CLI
        // hosts) must construct the bridge inside `block_on` rather
        // than merely holding a runtime.
        let rt = tokio::runtime::Runtime::new().unwrap();
        let config = SandboxConfig::builder()
            .interpreter_path(Language::Python, "assets/definitely-missing.wasm")
            .build();

        let bridge = rt.block_on(async { WorkerBridge::start(config) });
        let outcome = rt
            .block_on(bridge.execute(Language::Python, "print(1)", None, None))
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("interpreter unavailable"));
    }
}
