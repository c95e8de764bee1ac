//! Telescope link client
//!
//! One TCP connection, one writer, one reader task. Each command takes the
//! writer lock for its whole round trip, so at most one request is in flight.
//! The reader task routes replies to waiters by id and forwards everything
//! else as device events.

use crate::error::{LinkError, LinkResult};
use crate::protocol::{self, methods, stages, Request, Response, ViewState};
use crate::{ConnectionState, LinkConfig};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, RwLock};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

type PendingTable = StdMutex<HashMap<u64, oneshot::Sender<Response>>>;

fn lock_pending(pending: &PendingTable) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Response>>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Waiters and liveness of one socket. Each reader task owns the state of
/// its own socket, so a late exit never touches a newer connection.
#[derive(Default)]
struct SocketState {
    pending: PendingTable,
    alive: AtomicBool,
}

impl SocketState {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Mark dead and drop every waiter, waking them with a closed-channel error
    fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        lock_pending(&self.pending).clear();
    }
}

/// Link event
#[derive(Debug, Clone)]
pub enum LinkEvent {
    StateChanged(ConnectionState),
    Reconnecting { attempt: u32 },
    /// Unsolicited message from the device (no `id`)
    Device(Value),
}

/// Connection snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub state: ConnectionState,
    pub firmware_version: Option<String>,
}

/// JSON-RPC client for one telescope
pub struct TelescopeLink {
    config: LinkConfig,
    info: RwLock<ConnectionInfo>,
    /// Write side of the socket. Held for a full request/reply round trip.
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// State of the current socket, replaced on every (re)connect
    socket: StdMutex<Arc<SocketState>>,
    next_id: AtomicU64,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
    event_tx: broadcast::Sender<LinkEvent>,
}

impl TelescopeLink {
    pub fn new(config: LinkConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            config,
            info: RwLock::new(ConnectionInfo::default()),
            writer: Mutex::new(None),
            socket: StdMutex::new(Arc::new(SocketState::default())),
            next_id: AtomicU64::new(1),
            reader_task: StdMutex::new(None),
            event_tx,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.event_tx.subscribe()
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        self.info.read().map(|i| i.clone()).unwrap_or_default()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection_info().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn firmware_version(&self) -> Option<String> {
        self.connection_info().firmware_version
    }

    fn update_info(&self, f: impl FnOnce(&mut ConnectionInfo)) {
        if let Ok(mut info) = self.info.write() {
            f(&mut info);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = match self.info.write() {
            Ok(mut info) => {
                let changed = info.state != state;
                info.state = state;
                changed
            }
            Err(_) => false,
        };
        if changed {
            let _ = self.event_tx.send(LinkEvent::StateChanged(state));
        }
    }

    fn current_socket(&self) -> Arc<SocketState> {
        self.socket
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn endpoint(&self) -> Option<(String, u16)> {
        let info = self.connection_info();
        Some((info.host?, info.port?))
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Connect to `host:port` and record the firmware version
    pub async fn connect(&self, host: &str, port: u16) -> LinkResult<()> {
        {
            let mut writer = self.writer.lock().await;
            if writer.is_some() {
                info!("Replacing existing telescope connection");
                self.teardown_socket(&mut writer).await;
            }

            self.update_info(|info| {
                info.host = Some(host.to_string());
                info.port = Some(port);
                info.firmware_version = None;
            });
            self.set_state(ConnectionState::Connecting);

            match self.open_socket(host, port).await {
                Ok(write_half) => *writer = Some(write_half),
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    return Err(e);
                }
            }
            self.set_state(ConnectionState::Connected);
        }

        info!("Connected to telescope at {}:{}", host, port);

        match self.get_state(&["device"]).await {
            Ok(state) => {
                let firmware = protocol::firmware_version(&state);
                info!("Telescope firmware: {}", firmware.as_deref().unwrap_or("unknown"));
                self.update_info(|info| info.firmware_version = firmware);
            }
            Err(e) => warn!("Device state query failed after connect: {}", e),
        }

        Ok(())
    }

    pub async fn disconnect(&self) -> LinkResult<()> {
        let mut writer = self.writer.lock().await;
        self.teardown_socket(&mut writer).await;
        self.update_info(|info| info.firmware_version = None);
        self.set_state(ConnectionState::Disconnected);
        info!("Disconnected from telescope");
        Ok(())
    }

    async fn open_socket(&self, host: &str, port: u16) -> LinkResult<OwnedWriteHalf> {
        let addr = format!("{}:{}", host, port);
        let connect_timeout = self.config.connect_timeout();

        let stream = match timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(LinkError::Connection {
                    addr,
                    cause: e.to_string(),
                })
            }
            Err(_) => {
                return Err(LinkError::ConnectTimeout {
                    addr,
                    duration: connect_timeout,
                })
            }
        };
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();

        let socket = Arc::new(SocketState {
            pending: StdMutex::new(HashMap::new()),
            alive: AtomicBool::new(true),
        });
        *self.socket.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = socket.clone();

        let handle = tokio::spawn(Self::reader_task(read_half, socket, self.event_tx.clone()));
        if let Ok(mut slot) = self.reader_task.lock() {
            if let Some(old) = slot.replace(handle) {
                old.abort();
            }
        }

        Ok(write_half)
    }

    /// Close the socket, stop the reader and fail every waiter
    async fn teardown_socket(&self, writer: &mut Option<OwnedWriteHalf>) {
        if let Some(mut w) = writer.take() {
            let _ = w.shutdown().await;
        }
        if let Ok(mut slot) = self.reader_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        self.current_socket().close();
    }

    /// Re-establish the socket after a failure. Returns the attempt that succeeded.
    async fn reconnect(&self, writer: &mut Option<OwnedWriteHalf>) -> LinkResult<u32> {
        let (host, port) = self.endpoint().ok_or(LinkError::NotConnected)?;
        self.teardown_socket(writer).await;
        self.set_state(ConnectionState::Connecting);

        let policy = &self.config.reconnection;
        let mut last_error = String::from("no attempts made");

        for attempt in 1..=policy.max_attempts {
            let _ = self.event_tx.send(LinkEvent::Reconnecting { attempt });
            info!("Reconnection attempt {}/{} to {}:{}", attempt, policy.max_attempts, host, port);

            match self.open_socket(&host, port).await {
                Ok(write_half) => {
                    *writer = Some(write_half);
                    self.set_state(ConnectionState::Connected);
                    info!("Reconnected to {}:{}", host, port);
                    return Ok(attempt);
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!("Reconnection attempt {} failed: {}", attempt, last_error);
                    if attempt < policy.max_attempts {
                        let delay = policy.calculate_delay(attempt);
                        debug!("Waiting {:?} before next reconnection attempt", delay);
                        sleep(delay).await;
                    }
                }
            }
        }

        error!(
            "Giving up on {}:{} after {} reconnection attempts",
            host, port, policy.max_attempts
        );
        self.update_info(|info| info.firmware_version = None);
        self.set_state(ConnectionState::Disconnected);
        Err(LinkError::ConnectionLost {
            attempts: policy.max_attempts,
            last_error,
        })
    }

    // =========================================================================
    // Reader
    // =========================================================================

    async fn reader_task(
        read_half: OwnedReadHalf,
        socket: Arc<SocketState>,
        event_tx: broadcast::Sender<LinkEvent>,
    ) {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => Self::dispatch(&line, &socket.pending, &event_tx),
                Ok(None) => {
                    debug!("Telescope closed the connection");
                    break;
                }
                Err(e) => {
                    warn!("Telescope read error: {}", e);
                    break;
                }
            }
        }

        socket.close();
    }

    fn dispatch(line: &str, pending: &PendingTable, event_tx: &broadcast::Sender<LinkEvent>) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!("Discarding malformed message: {}", e);
                return;
            }
        };

        let Some(id) = value.get("id").and_then(Value::as_u64) else {
            debug!("<- event {}", line);
            let _ = event_tx.send(LinkEvent::Device(value));
            return;
        };

        let Some(waiter) = lock_pending(pending).remove(&id) else {
            debug!("Discarding reply for unknown or expired request {}", id);
            return;
        };

        let response = serde_json::from_value::<Response>(value)
            .unwrap_or_else(|e| Response::malformed(id, format!("undecodable reply: {}", e)));
        let _ = waiter.send(response);
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Send one command and wait for its reply.
    ///
    /// A socket failure triggers reconnection; the command is re-sent once
    /// on the new socket.
    pub async fn send_command(&self, method: &str, params: Option<Value>) -> LinkResult<Value> {
        let mut writer = self.writer.lock().await;
        if writer.is_none() {
            return Err(LinkError::NotConnected);
        }

        if !self.current_socket().is_alive() {
            warn!("Connection dropped while idle, reconnecting before '{}'", method);
            self.reconnect(&mut writer).await?;
        }

        match self.round_trip(&mut writer, method, params.as_ref()).await {
            Err(e) if e.is_socket_level() => {
                warn!("Socket failure during '{}': {}", method, e);
                let attempts = self.reconnect(&mut writer).await?;
                match self.round_trip(&mut writer, method, params.as_ref()).await {
                    Err(e) if e.is_socket_level() => {
                        error!("'{}' failed again after reconnecting: {}", method, e);
                        self.teardown_socket(&mut writer).await;
                        self.set_state(ConnectionState::Disconnected);
                        Err(LinkError::ConnectionLost {
                            attempts,
                            last_error: e.to_string(),
                        })
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn round_trip(
        &self,
        writer: &mut Option<OwnedWriteHalf>,
        method: &str,
        params: Option<&Value>,
    ) -> LinkResult<Value> {
        let stream = writer.as_mut().ok_or(LinkError::NotConnected)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut line = serde_json::to_string(&Request { method, params, id })?;
        line.push('\n');

        let socket = self.current_socket();
        let (tx, rx) = oneshot::channel();
        lock_pending(&socket.pending).insert(id, tx);
        if !socket.is_alive() {
            lock_pending(&socket.pending).remove(&id);
            return Err(LinkError::Io("reader stopped".to_string()));
        }

        debug!("-> {}", line.trim_end());
        if let Err(e) = stream.write_all(line.as_bytes()).await {
            lock_pending(&socket.pending).remove(&id);
            return Err(e.into());
        }

        let command_timeout = self.config.command_timeout();
        match timeout(command_timeout, rx).await {
            Ok(Ok(response)) => {
                debug!("<- reply to '{}' ({})", method, id);
                response.into_result(method)
            }
            Ok(Err(_)) => Err(LinkError::Io(format!("connection closed while waiting for '{}'", method))),
            Err(_) => {
                lock_pending(&socket.pending).remove(&id);
                warn!("'{}' ({}) timed out after {:?}", method, id, command_timeout);
                Err(LinkError::CommandTimeout {
                    method: method.to_string(),
                    duration: command_timeout,
                })
            }
        }
    }

    /// Slew to J2000 coordinates and start live view
    pub async fn goto(&self, ra_hours: f64, dec_deg: f64, name: &str) -> LinkResult<Value> {
        self.send_command(
            methods::START_VIEW,
            Some(json!({
                "mode": "star",
                "target_ra_dec": [ra_hours, dec_deg],
                "target_name": name,
                "lp_filter": false,
            })),
        )
        .await
    }

    pub async fn stop_slew(&self) -> LinkResult<Value> {
        self.send_command(methods::STOP_VIEW, Some(json!({ "stage": stages::AUTO_GOTO })))
            .await
    }

    pub async fn start_imaging(&self, restart: bool) -> LinkResult<Value> {
        self.send_command(methods::START_STACK, Some(json!({ "restart": restart })))
            .await
    }

    pub async fn stop_imaging(&self) -> LinkResult<Value> {
        self.send_command(methods::STOP_VIEW, Some(json!({ "stage": stages::STACK })))
            .await
    }

    pub async fn auto_focus(&self) -> LinkResult<Value> {
        self.send_command(methods::AUTO_FOCUS, None).await
    }

    pub async fn park(&self) -> LinkResult<Value> {
        self.send_command(methods::PARK, None).await
    }

    /// Query selected sections of the device state
    pub async fn get_state(&self, keys: &[&str]) -> LinkResult<Value> {
        let params = if keys.is_empty() {
            None
        } else {
            Some(json!({ "keys": keys }))
        };
        self.send_command(methods::GET_DEVICE_STATE, params).await
    }

    pub async fn get_view_state(&self) -> LinkResult<ViewState> {
        let result = self.send_command(methods::GET_VIEW_STATE, None).await?;
        ViewState::from_result(&result)
    }

    pub async fn set_setting(&self, value: Value) -> LinkResult<Value> {
        self.send_command(methods::SET_SETTING, Some(value)).await
    }
}

impl Drop for TelescopeLink {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.reader_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}
