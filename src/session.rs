//! The session supervisor: brings the reverse transport up, launches the far
//! side, waits for it to report itself live, and tears both down again on
//! `terminate()` or a caught `SIGINT`/`SIGTERM`.
//!
//! Grounded on `examples/original_source/.../core/session_client.py`: the
//! reverse RPC server (and its `set_server_status` handler) is started
//! *before* the far side is launched, startup/shutdown both block on the
//! same busy-poll-with-deadline wait, and `terminate` is idempotent so a
//! signal handler and an explicit call can race harmlessly.

use crate::callback::CallbackRegistry;
use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::library::LibraryProxy;
use crate::logging::{LogSink, SessionLog, Severity};
use crate::rpc::{self, InvokeCallbackResult, LogEmitParams};
use crate::transport::{RpcClient, RpcServer};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Brings a far-side worker up, forwards calls to it and tears it down
/// again. The specification names no concrete transport for *launching* a
/// worker process (that's the emulator/Wine layer this crate does not
/// implement) — this trait is the seam a real deployment plugs into;
/// [`crate::library::StubLibrary`]-backed callers use an in-process
/// implementation instead.
pub trait FarSideLauncher: Send + Sync {
    /// Starts the far side so that it serves the forward RPC surface on a
    /// loopback port and connects its own reverse client back to
    /// `reverse_port`. Returns the port the far side's forward server is
    /// listening on.
    fn launch(&self, config: &Config, reverse_port: u16) -> Result<u16>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum SessionState {
    Down = 0,
    Starting = 1,
    Up = 2,
    Stopping = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Starting,
            2 => Self::Up,
            3 => Self::Stopping,
            _ => Self::Down,
        }
    }
}

/// One bridge session: a configuration, a log, a reverse transport serving
/// callback dispatch and log lines, and a forward client the caller's
/// library proxies issue calls through.
pub struct Session {
    config: Mutex<Config>,
    log: Arc<SessionLog>,
    callbacks: CallbackRegistry,
    library: LibraryProxy,
    forward: Arc<RpcClient>,
    reverse: RpcServer,
    server_up: Arc<AtomicBool>,
    state: AtomicU8,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("state", &self.state.load(Ordering::Relaxed)).finish()
    }
}

impl Session {
    /// Starts a session: reverse transport first, then the far side, then
    /// waits up to `config.timeout_start` for it to report itself live.
    pub fn start(config: Config, far_side: Arc<dyn FarSideLauncher>) -> Result<Arc<Self>> {
        let log = Arc::new(SessionLog::new(config.id.clone(), config.log_write, config.log_level));
        log.emit(Severity::INFO, "session starting");

        let callbacks = CallbackRegistry::new();
        let server_up = Arc::new(AtomicBool::new(false));

        let reverse = RpcServer::new();
        {
            let server_up = server_up.clone();
            reverse.register(rpc::reverse::SET_SERVER_STATUS, move |params: serde_json::Value| {
                let status = params
                    .get("status")
                    .and_then(|v| v.as_bool())
                    .ok_or_else(|| BridgeError::Wire {
                        source: serde_json::Error::io(std::io::Error::other("malformed set_server_status")),
                    })?;
                server_up.store(status, Ordering::SeqCst);
                Ok(serde_json::Value::Null)
            });
        }
        {
            let callbacks = callbacks.clone();
            reverse.register(rpc::reverse::INVOKE_CALLBACK, move |params: serde_json::Value| {
                let params: rpc::InvokeCallbackParams = serde_json::from_value(params)?;
                let result = match callbacks.dispatch(params.handle_id, &params.argument_tree, &params.memory_list) {
                    Ok((return_value, memory_list)) => InvokeCallbackResult {
                        success: true,
                        return_value: Some(return_value),
                        memory_list,
                        exception: None,
                    },
                    Err(e) => InvokeCallbackResult {
                        success: false,
                        return_value: None,
                        memory_list: crate::argtree::MemoryList::new(),
                        exception: Some(e.to_string()),
                    },
                };
                Ok(serde_json::to_value(result)?)
            });
        }
        {
            let log = log.clone();
            reverse.register(rpc::reverse::LOG_EMIT, move |params: serde_json::Value| {
                let params: LogEmitParams = serde_json::from_value(params)?;
                log.emit(Severity(params.severity), &params.line);
                Ok(serde_json::Value::Null)
            });
        }

        let reverse_port = reverse.serve_in_thread()?;
        log.emit(Severity::DEBUG, &format!("reverse transport listening on port {reverse_port}"));

        let mut config = config;
        config.port_socket_unix = reverse_port;

        let forward_port = far_side.launch(&config, reverse_port)?;
        config.port_socket_wine = forward_port;

        wait_for_status(&server_up, true, Duration::from_secs(config.timeout_start))?;

        let forward = Arc::new(RpcClient::connect_with_timeout(
            &format!("127.0.0.1:{forward_port}"),
            Duration::from_secs(config.timeout_start),
        )?);

        let library = LibraryProxy::new(forward.clone(), callbacks.clone());

        log.emit(Severity::INFO, "session started");

        Ok(Arc::new(Self {
            config: Mutex::new(config),
            log,
            callbacks,
            library,
            forward,
            reverse,
            server_up,
            state: AtomicU8::new(SessionState::Up as u8),
        }))
    }

    pub fn config(&self) -> Config {
        self.config.lock().unwrap().clone()
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn library(&self) -> &LibraryProxy {
        &self.library
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Broadcasts a single configuration key/value to both sides: the far
    /// side via the forward RPC surface, and this process's own `Config` by
    /// merging the key into its JSON form and re-parsing it.
    pub fn set_parameter(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let params = rpc::SetParameterParams {
            key: key.to_string(),
            value: value.clone(),
        };
        self.forward
            .call(rpc::forward::SET_PARAMETER, serde_json::to_value(params)?)?;

        let mut config = self.config.lock().unwrap();
        let mut raw = serde_json::to_value(&*config)?;
        if let serde_json::Value::Object(map) = &mut raw {
            map.insert(key.to_string(), value);
        }
        *config = serde_json::from_value(raw)?;
        Ok(())
    }

    /// Idempotent: a signal handler and an explicit caller both racing here
    /// is harmless, the second one observes `Down`/`Stopping` and returns.
    pub fn terminate(&self) -> Result<()> {
        let state = SessionState::from_u8(self.state.load(Ordering::SeqCst));
        if matches!(state, SessionState::Down | SessionState::Stopping) {
            return Ok(());
        }
        self.state.store(SessionState::Stopping as u8, Ordering::SeqCst);
        self.log.emit(Severity::INFO, "session terminating");

        // A closed transport here means the far side is already gone;
        // that's success from our point of view, not a failure to report.
        let _ = self.forward.call(rpc::forward::TERMINATE, serde_json::Value::Null);

        let timeout_stop = self.config.lock().unwrap().timeout_stop;
        wait_for_status(&self.server_up, false, Duration::from_secs(timeout_stop))?;

        self.state.store(SessionState::Down as u8, Ordering::SeqCst);
        self.log.emit(Severity::INFO, "session terminated");
        Ok(())
    }

    /// Installs `SIGINT`/`SIGTERM` handlers that call [`Self::terminate`] on
    /// a dedicated signal-handling thread, mirroring a destructor registered
    /// for both normal exit and the two signals.
    pub fn install_signal_handlers(self: &Arc<Self>) -> Result<()> {
        let mut signals = signal_hook::iterator::Signals::new([
            signal_hook::consts::SIGINT,
            signal_hook::consts::SIGTERM,
        ])
        .map_err(BridgeError::from)?;
        let session = self.clone();
        std::thread::spawn(move || {
            for _ in signals.forever() {
                let _ = session.terminate();
                break;
            }
        });
        Ok(())
    }
}

fn wait_for_status(flag: &AtomicBool, target: bool, timeout: Duration) -> Result<()> {
    let started = Instant::now();
    while flag.load(Ordering::SeqCst) != target {
        if started.elapsed() >= timeout {
            return if target {
                Err(BridgeError::StartupTimeout {
                    waited_secs: started.elapsed().as_secs_f64(),
                    limit_secs: timeout.as_secs(),
                })
            } else {
                Err(BridgeError::ShutdownTimeout {
                    waited_secs: started.elapsed().as_secs_f64(),
                    limit_secs: timeout.as_secs(),
                })
            };
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}
