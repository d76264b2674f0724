//! A duplex RPC transport: length-prefixed JSON messages over a TCP
//! loopback socket, with request/response pairing by id rather than
//! arrival order.
//!
//! Two independent transports make up a session: the *forward* one
//! (caller calls procedures the far side serves) and the *reverse* one
//! (the far side calls procedures the caller serves, for callbacks, status
//! notifications and log lines). Both are instances of the same
//! `RpcClient`/`RpcServer` pair.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One RPC message: a request carries a procedure name and parameters, a
/// response carries a result or an error, paired to its request by `id`.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    id: u64,
    body: Body,
}

#[derive(Debug, Serialize, Deserialize)]
enum Body {
    Request {
        procedure: String,
        params: serde_json::Value,
    },
    Response {
        result: Option<serde_json::Value>,
        error: Option<String>,
    },
}

fn write_envelope(stream: &mut TcpStream, envelope: &Envelope) -> Result<()> {
    let payload = serde_json::to_vec(envelope)?;
    let len = (payload.len() as u32).to_be_bytes();
    stream.write_all(&len)?;
    stream.write_all(&payload)?;
    Ok(())
}

fn read_envelope(stream: &mut TcpStream) -> Result<Envelope> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(serde_json::from_slice(&payload)?)
}

/// The caller end of one RPC transport: submits requests in order on a
/// single writer stream, and pairs replies to their requests by id via a
/// background reader thread.
pub struct RpcClient {
    writer: Mutex<TcpStream>,
    next_id: Mutex<u64>,
    pending: Arc<Mutex<HashMap<u64, SyncSender<Result<serde_json::Value>>>>>,
    reader_handle: Option<std::thread::JoinHandle<()>>,
}

impl RpcClient {
    /// Connects to `addr`, retrying until `timeout` elapses. This is the
    /// client-side half of a session bring-up waiting on the far side's
    /// listener to exist yet.
    pub fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            match TcpStream::connect(addr) {
                Ok(stream) => return Ok(Self::new(stream)),
                Err(e) => {
                    if std::time::Instant::now() >= deadline {
                        return Err(BridgeError::Io { source: e });
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
    }

    pub fn new(stream: TcpStream) -> Self {
        let reader_stream = stream.try_clone().expect("clone tcp stream for rpc reader");
        let pending: Arc<Mutex<HashMap<u64, SyncSender<Result<serde_json::Value>>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();

        let reader_handle = std::thread::spawn(move || {
            let mut reader_stream = reader_stream;
            loop {
                let envelope = match read_envelope(&mut reader_stream) {
                    Ok(e) => e,
                    Err(_) => break,
                };
                let Body::Response { result, error } = envelope.body else {
                    continue;
                };
                if let Some(sender) = reader_pending.lock().unwrap().remove(&envelope.id) {
                    let outcome = match error {
                        Some(message) => Err(BridgeError::TransportClosed {
                            symbol: Some(message),
                        }),
                        None => Ok(result.unwrap_or(serde_json::Value::Null)),
                    };
                    let _ = sender.send(outcome);
                }
            }
            // Transport closed: fail every still-pending call.
            for (_, sender) in reader_pending.lock().unwrap().drain() {
                let _ = sender.send(Err(BridgeError::TransportClosed { symbol: None }));
            }
        });

        Self {
            writer: Mutex::new(stream),
            next_id: Mutex::new(1),
            pending,
            reader_handle: Some(reader_handle),
        }
    }

    /// Issues one RPC call and blocks the calling thread until the reply
    /// arrives (or the transport closes). Calls on a single client are
    /// delivered in submission order; the response may arrive out of that
    /// order and is paired back up by id.
    pub fn call(&self, procedure: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let id = {
            let mut next_id = self.next_id.lock().unwrap();
            let id = *next_id;
            *next_id += 1;
            id
        };

        let (tx, rx) = sync_channel(1);
        self.pending.lock().unwrap().insert(id, tx);

        let envelope = Envelope {
            id,
            body: Body::Request {
                procedure: procedure.to_string(),
                params,
            },
        };

        {
            let mut writer = self.writer.lock().unwrap();
            if let Err(e) = write_envelope(&mut writer, &envelope) {
                self.pending.lock().unwrap().remove(&id);
                return Err(e);
            }
        }

        rx.recv()
            .unwrap_or(Err(BridgeError::TransportClosed { symbol: Some(procedure.to_string()) }))
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_handle.take() {
            // Closing the socket (via the writer's drop, which happens
            // after this since `writer` is a sibling field) unblocks the
            // reader thread's blocking read; we don't join synchronously
            // to avoid deadlocking a caller that drops us from within a
            // dispatch callback.
            drop(handle);
        }
    }
}

type ProcedureHandler = dyn Fn(serde_json::Value) -> Result<serde_json::Value> + Send + Sync;

/// The far side of one RPC transport: accepts connections on a background
/// thread and dispatches each request to a registered procedure handler on
/// its own task, matching the "each side runs an RPC server on a dedicated
/// background thread that dispatches each incoming request on its own
/// task" concurrency rule.
#[derive(Clone)]
pub struct RpcServer {
    procedures: Arc<Mutex<HashMap<String, Arc<ProcedureHandler>>>>,
    local_addr: Arc<Mutex<Option<std::net::SocketAddr>>>,
}

impl Default for RpcServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcServer {
    pub fn new() -> Self {
        Self {
            procedures: Arc::new(Mutex::new(HashMap::new())),
            local_addr: Arc::new(Mutex::new(None)),
        }
    }

    pub fn register<F>(&self, name: &str, handler: F)
    where
        F: Fn(serde_json::Value) -> Result<serde_json::Value> + Send + Sync + 'static,
    {
        self.procedures
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::new(handler));
    }

    /// Binds a loopback listener on an OS-assigned port and serves forever
    /// on a background thread, one task (thread) per inbound connection's
    /// request. Returns the bound port so the caller can hand it to the
    /// far side via configuration (`port_socket_unix`/`port_socket_wine`).
    pub fn serve_in_thread(&self) -> Result<u16> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        *self.local_addr.lock().unwrap() = Some(listener.local_addr()?);

        let procedures = self.procedures.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let procedures = procedures.clone();
                std::thread::spawn(move || serve_connection(stream, procedures));
            }
        });

        Ok(port)
    }
}

fn serve_connection(stream: TcpStream, procedures: Arc<Mutex<HashMap<String, Arc<ProcedureHandler>>>>) {
    let mut stream = stream;
    loop {
        let envelope = match read_envelope(&mut stream) {
            Ok(e) => e,
            Err(_) => return,
        };
        let Body::Request { procedure, params } = envelope.body else {
            continue;
        };

        let handler = procedures.lock().unwrap().get(&procedure).cloned();
        let (result, error) = match handler {
            Some(handler) => match handler(params) {
                Ok(value) => (Some(value), None),
                Err(e) => (None, Some(e.to_string())),
            },
            None => (None, Some(format!("no such procedure: {procedure}"))),
        };

        let response = Envelope {
            id: envelope.id,
            body: Body::Response { result, error },
        };
        if write_envelope(&mut stream, &response).is_err() {
            return;
        }
    }
}
