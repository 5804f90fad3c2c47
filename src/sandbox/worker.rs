//! The sandboxed execution worker.
//!
//! A long-lived task that owns the wasm engine and the compiled
//! interpreter modules. It receives [`ExecRequest`]s over a channel and
//! answers each with exactly one [`WorkerMessage::Result`] tagged with
//! the request id. A one-time [`WorkerMessage::Ready`] is emitted before
//! any work is accepted.
//!
//! Isolation model: the engine and compiled interpreters are reused
//! across runs (startup cost paid once), but every request executes in a
//! fresh [`Store`] with its own WASI context, memory, and global scope.
//! Nothing a previous run defined is visible to the next one.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wasmtime::{Engine, Linker, Module, Store};
use wasmtime_wasi::preview1;
use wasmtime_wasi::{I32Exit, WasiCtxBuilder};

use crate::error::parse_guest_exception;
use crate::module::Language;
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::interpreter::{InterpreterCache, SharedEngine};
use crate::sandbox::io::SandboxIo;
use crate::sandbox::limits::{RunStore, StoreLimiterExt};
use crate::sandbox::protocol::{ExecOutcome, ExecRequest, WorkerMessage};

/// Depth of the request and message queues between bridge and worker.
pub(crate) const CHANNEL_DEPTH: usize = 32;

/// Channel endpoints the bridge holds after spawning a worker.
pub(crate) struct WorkerHandle {
    pub requests: mpsc::Sender<ExecRequest>,
    pub messages: mpsc::Receiver<WorkerMessage>,
    pub task: tokio::task::JoinHandle<()>,
}

/// Spawn the worker task. The returned handle is the only way to talk
/// to it; dropping the request sender shuts the worker down.
pub(crate) fn spawn(config: SandboxConfig) -> WorkerHandle {
    let (req_tx, req_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (msg_tx, msg_rx) = mpsc::channel(CHANNEL_DEPTH);
    let task = tokio::spawn(run_loop(config, req_rx, msg_tx));
    WorkerHandle {
        requests: req_tx,
        messages: msg_rx,
        task,
    }
}

/// The worker main loop: init, ready signal, then serve requests until
/// the request channel closes.
async fn run_loop(
    config: SandboxConfig,
    mut requests: mpsc::Receiver<ExecRequest>,
    messages: mpsc::Sender<WorkerMessage>,
) {
    let engine = match SharedEngine::new(config.max_fuel.is_some()) {
        Ok(engine) => engine,
        Err(e) => {
            let _ = messages
                .send(WorkerMessage::Fault {
                    message: format!("engine init failed: {}", e),
                })
                .await;
            return;
        }
    };

    let cache = Arc::new(InterpreterCache::new());

    // Warm the cache so "ready" means runnable, not merely alive. A
    // missing interpreter is logged here and reported per-request later.
    for (&language, path) in &config.interpreter_paths {
        match cache.get_or_compile(engine.engine(), language, path) {
            Ok(_) => debug!(%language, "interpreter compiled"),
            Err(e) => warn!(%language, error = %e, "interpreter unavailable at startup"),
        }
    }

    if messages.send(WorkerMessage::Ready).await.is_err() {
        return;
    }
    info!("execution worker ready");

    while let Some(request) = requests.recv().await {
        let id = request.id;
        debug!(%id, language = %request.language, timeout = ?request.timeout, "executing request");

        let outcome = execute_request(&engine, &cache, &config, request).await;

        debug!(
            %id,
            success = outcome.success,
            timed_out = outcome.timed_out,
            duration = ?outcome.duration,
            "request finished"
        );

        if messages.send(WorkerMessage::Result { id, outcome }).await.is_err() {
            // Bridge went away; nobody left to report to.
            break;
        }
    }

    debug!("execution worker loop ended");
}

/// Execute one request to completion or timeout. Never panics the loop:
/// every failure mode folds into an `ExecOutcome`.
async fn execute_request(
    engine: &SharedEngine,
    cache: &Arc<InterpreterCache>,
    config: &SandboxConfig,
    request: ExecRequest,
) -> ExecOutcome {
    let started = Instant::now();

    let Some(path) = config.interpreter_paths.get(&request.language) else {
        return ExecOutcome::failed(
            format!("no interpreter configured for {}", request.language),
            Vec::new(),
            started.elapsed(),
        );
    };

    let module = match cache.get_or_compile(engine.engine(), request.language, path) {
        Ok(module) => module,
        Err(e) => {
            return ExecOutcome::failed(
                format!("interpreter unavailable: {}", e),
                Vec::new(),
                started.elapsed(),
            )
        }
    };

    let io = SandboxIo::new(request.stdin.as_deref());

    // Epoch ticker drives the in-store deadline.
    let tick = config.epoch_tick_interval;
    let ticker_engine = engine.clone();
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            ticker_engine.increment_epoch();
        }
    });

    // Budget in epoch ticks, rounded up so short timeouts still get one.
    let deadline_ticks =
        (request.timeout.as_millis() / tick.as_millis().max(1)).max(1) as u64 + 1;

    let exec_engine = engine.clone();
    let exec_io = io.clone();
    let language = request.language;
    let code = request.code;
    let max_memory = config.max_memory;
    let max_fuel = config.max_fuel;

    let mut exec = tokio::task::spawn_blocking(move || {
        run_guest(
            exec_engine.engine(),
            &module,
            language,
            &code,
            &exec_io,
            max_memory,
            max_fuel,
            deadline_ticks,
        )
    });

    // Race the guest against the wall clock. The epoch deadline should
    // fire first; the sleep is the fallback when it cannot.
    let run = tokio::select! {
        joined = &mut exec => {
            ticker.abort();
            match joined {
                Ok(run) => run,
                Err(e) => GuestRun::Error(format!("execution task panicked: {}", e)),
            }
        }
        _ = tokio::time::sleep(request.timeout) => {
            engine.increment_epoch(); // force the deadline trap
            // The guest may have started late on the blocking pool, in
            // which case one forced increment cannot reach its deadline.
            // The ticker keeps advancing the epoch until the guest
            // thread has actually trapped and joined.
            tokio::spawn(stop_ticker_on_join(exec, ticker));
            GuestRun::TimedOut
        }
    };

    let duration = started.elapsed();
    let logs = io.into_logs(config.max_log_lines);

    match run {
        GuestRun::Completed { exit_code: 0 } => ExecOutcome::ok(logs, duration),
        GuestRun::Completed { exit_code } => {
            let error = parse_guest_exception(&io.stderr_str())
                .map(|info| info.summary())
                .unwrap_or_else(|| format!("exited with code {}", exit_code));
            ExecOutcome::failed(error, logs, duration)
        }
        GuestRun::MemoryExceeded => {
            ExecOutcome::failed("memory limit exceeded", logs, duration)
        }
        GuestRun::TimedOut => ExecOutcome::timed_out(logs, duration),
        GuestRun::Error(message) => ExecOutcome::failed(message, logs, duration),
    }
}

/// Keeps the epoch ticker driving a timed-out guest until its blocking
/// thread joins, then stops the ticker.
async fn stop_ticker_on_join(
    exec: tokio::task::JoinHandle<GuestRun>,
    ticker: tokio::task::JoinHandle<()>,
) {
    let _ = exec.await;
    ticker.abort();
}

/// How a single guest run ended.
enum GuestRun {
    Completed { exit_code: i32 },
    MemoryExceeded,
    TimedOut,
    Error(String),
}

/// Interpreter invocation for each sandboxed language. The code is
/// passed as an inline-eval argument, never written to a filesystem the
/// guest could inspect.
fn interpreter_args(language: Language, code: &str) -> Vec<String> {
    match language {
        Language::Python => vec!["python".into(), "-c".into(), code.into()],
        Language::JavaScript => vec!["qjs".into(), "-e".into(), code.into()],
        // Routed to the remote backend by the orchestrator; if a request
        // lands here anyway the missing-interpreter branch reports it.
        Language::C => vec!["cc".into(), code.into()],
    }
}

/// Synchronous guest execution (runs on the blocking pool).
///
/// Builds a fresh store and instance per call — this is the per-run
/// isolation boundary.
#[allow(clippy::too_many_arguments)]
fn run_guest(
    engine: &Engine,
    module: &Module,
    language: Language,
    code: &str,
    io: &SandboxIo,
    max_memory: u64,
    max_fuel: Option<u64>,
    deadline_ticks: u64,
) -> GuestRun {
    let args = interpreter_args(language, code);

    // No preopened directories, no network, no inherited environment.
    let wasi_ctx = WasiCtxBuilder::new()
        .args(&args)
        .stdin(io.stdin_pipe())
        .stdout(io.stdout_pipe())
        .stderr(io.stderr_pipe())
        .build_p1();

    let store_data = RunStore::new(max_memory, wasi_ctx);
    let mut store = Store::new(engine, store_data);
    store.configure_limiter();

    store.epoch_deadline_trap();
    store.set_epoch_deadline(deadline_ticks);

    if let Some(fuel) = max_fuel {
        if let Err(e) = store.set_fuel(fuel) {
            return GuestRun::Error(format!("failed to set fuel: {}", e));
        }
    }

    let mut linker = Linker::new(engine);
    if let Err(e) = preview1::add_to_linker_sync(&mut linker, |data: &mut RunStore| &mut data.wasi)
    {
        return GuestRun::Error(format!("failed to link WASI: {}", e));
    }

    let instance = match linker.instantiate(&mut store, module) {
        Ok(instance) => instance,
        Err(e) => {
            if store.data().limiter.limit_exceeded() {
                return GuestRun::MemoryExceeded;
            }
            return GuestRun::Error(format!("failed to instantiate: {}", e));
        }
    };

    let start = match instance.get_typed_func::<(), ()>(&mut store, "_start") {
        Ok(start) => start,
        Err(e) => return GuestRun::Error(format!("failed to get _start function: {}", e)),
    };

    match start.call(&mut store, ()) {
        Ok(()) => GuestRun::Completed { exit_code: 0 },
        Err(e) => {
            if store.data().limiter.limit_exceeded() {
                return GuestRun::MemoryExceeded;
            }

            let text = e.to_string();
            if text.contains("epoch") || text.contains("interrupt") {
                return GuestRun::TimedOut;
            }
            if text.contains("fuel") {
                return GuestRun::TimedOut;
            }

            if let Some(exit) = e.downcast_ref::<I32Exit>() {
                GuestRun::Completed { exit_code: exit.0 }
            } else {
                GuestRun::Error(text)
            }
        }
    }
}
