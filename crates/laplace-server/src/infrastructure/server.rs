//! The server: loop, lifecycle, and stop handshake.
//!
//! # Lifecycle
//!
//! ```text
//! Server::new ──► IDLE ──start()──► RUNNING ──STOP handled──► STOPPING ──teardown──► STOPPED
//! ```
//!
//! - [`Server::new`] validates the configuration.  Nothing is bound yet.
//! - [`Server::start`] spawns one worker thread.  The worker binds the `REP`
//!   socket and reports back; `start` returns once the socket is listening
//!   (or with the bind error).
//! - The worker polls with a bounded timeout, sleeps briefly when idle, and
//!   answers every request through the [`Dispatcher`].
//! - [`Server::stop`] connects to the server's own socket as a client, sends
//!   `STOP`, waits for the acknowledgement, then waits for the worker to reach
//!   `STOPPED`.  A `STOP` from any other client ends the loop the same way.
//!
//! # The stop ordering
//!
//! When `STOP` is handled the loop state becomes `STOPPING` *before* the reply
//! is sent, and the running flag is cleared *after* it.  The peer that asked
//! for the stop therefore always gets its acknowledgement before the socket
//! is torn down.
//!
//! A server cannot be restarted.  Create a new instance instead.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use laplace_core::{encode, Command, ConfigurationError, Device, Message, Payload};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Dispatch};

use crate::application::dispatch::{Dispatcher, FollowUp};
use crate::application::events::{handler, EventEmitter, EventKind, Registerable, ServerEvent};
use crate::domain::config::{ServerConfig, ServerSettings};
use crate::domain::store::DataStore;
use crate::infrastructure::client::{ClientError, RequestClient};
use crate::infrastructure::net::outbound_ipv4_or_loopback;
use crate::infrastructure::transport::{ReplyTransport, TransportError, ZmqReplyTransport};

/// `from` used by the stop handshake.
pub const LOCAL_SENDER: &str = "local";

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors raised while creating or starting a server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A construction parameter is invalid.
    #[error("invalid server configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    /// `start` was called a second time.
    #[error("server '{0}' was already started; create a new instance to serve again")]
    AlreadyStarted(String),

    /// The worker could not bind its socket.
    #[error("server could not start: {0}")]
    Bind(#[source] TransportError),

    /// The worker thread could not be spawned.
    #[error("failed to spawn server thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The worker thread ended without reporting whether it bound.
    #[error("server thread exited before reporting readiness")]
    WorkerExited,
}

/// Errors raised by [`Server::stop`].
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// The handshake client could not be created.
    #[error("cannot connect to {endpoint} for the stop handshake: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    /// `STOP` could not be sent, or no acknowledgement arrived in time.
    #[error("STOP request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: ClientError,
    },

    /// The worker did not reach `STOPPED` in time.
    #[error("server thread did not stop within {0:?}")]
    WorkerTimeout(Duration),
}

// ── Loop state ────────────────────────────────────────────────────────────────

/// Where the server is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Constructed, not started.
    Idle,
    /// Serving requests.
    Running,
    /// `STOP` accepted, acknowledgement in flight.
    Stopping,
    /// Socket and context released.  Terminal.
    Stopped,
}

impl LoopState {
    fn to_u8(self) -> u8 {
        match self {
            LoopState::Idle => 0,
            LoopState::Running => 1,
            LoopState::Stopping => 2,
            LoopState::Stopped => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LoopState::Idle,
            1 => LoopState::Running,
            2 => LoopState::Stopping,
            _ => LoopState::Stopped,
        }
    }
}

/// Running flag and loop state, shared by the worker and the owner.
#[derive(Debug)]
pub(crate) struct LoopStatus {
    running: AtomicBool,
    state: AtomicU8,
}

impl LoopStatus {
    pub(crate) fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            state: AtomicU8::new(LoopState::Idle.to_u8()),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn clear_running(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub(crate) fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: LoopState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    fn finish(&self) {
        self.clear_running();
        self.set_state(LoopState::Stopped);
    }
}

// ── The loop ──────────────────────────────────────────────────────────────────

/// Serves requests from `transport` until `STOP` is handled or the transport
/// is terminated.
pub(crate) fn run_loop<T: ReplyTransport>(
    transport: &mut T,
    dispatcher: &Dispatcher,
    status: &LoopStatus,
    poll_timeout: Duration,
    sleep_interval: Duration,
) {
    while status.is_running() {
        match transport.poll_request(poll_timeout) {
            Ok(true) => {}
            Ok(false) => {
                thread::sleep(sleep_interval);
                continue;
            }
            Err(TransportError::Terminated) => {
                warn!("transport terminated while polling");
                break;
            }
            Err(e) => {
                error!("poll failed: {e}");
                thread::sleep(sleep_interval);
                continue;
            }
        }

        let frame = match transport.recv_request() {
            Ok(frame) => frame,
            Err(TransportError::Terminated) => {
                warn!("transport terminated while receiving");
                break;
            }
            Err(e) => {
                error!("receive failed: {e}");
                continue;
            }
        };

        let outcome = dispatcher.dispatch(&frame);
        if outcome.follow_up == FollowUp::Stop {
            status.set_state(LoopState::Stopping);
        }

        match transport.send_reply(&encode_reply(&outcome.reply)) {
            Ok(()) => {}
            Err(TransportError::Terminated) => {
                warn!("transport terminated while replying to {}", outcome.reply.cmd);
                break;
            }
            Err(e) => error!("failed to send {} reply: {e}", outcome.reply.cmd),
        }

        match outcome.follow_up {
            FollowUp::Stop => status.clear_running(),
            other => dispatcher.after_reply(other),
        }
    }
}

fn encode_reply(reply: &Message) -> Vec<u8> {
    encode(reply).unwrap_or_else(|e| {
        error!("failed to encode {} reply: {e}", reply.cmd);
        let fallback = Message::error(&reply.from, &reply.to, &reply.cmd, &e.to_string());
        encode(&fallback).unwrap_or_default()
    })
}

/// Body of the worker thread: bind, report, serve, tear down.
fn worker_main(
    settings: &ServerSettings,
    dispatcher: &Dispatcher,
    status: &LoopStatus,
    ready: Sender<Result<(), TransportError>>,
) {
    let mut transport = match ZmqReplyTransport::bind(settings.address.as_str()) {
        Ok(transport) => transport,
        Err(e) => {
            error!("cannot start: {e}");
            status.finish();
            let _ = ready.send(Err(e));
            return;
        }
    };

    status.set_state(LoopState::Running);
    info!("listening on {}", transport.endpoint());
    let _ = ready.send(Ok(()));

    run_loop(
        &mut transport,
        dispatcher,
        status,
        settings.poll_timeout,
        settings.sleep_interval,
    );

    drop(transport);
    status.finish();
    info!("socket closed, server stopped");
}

// ── Server ────────────────────────────────────────────────────────────────────

struct Worker {
    thread: JoinHandle<()>,
    done: Receiver<()>,
}

/// A request/reply control server for one piece of equipment.
pub struct Server {
    settings: Arc<ServerSettings>,
    store: Arc<DataStore>,
    events: Arc<EventEmitter>,
    status: Arc<LoopStatus>,
    ip: Ipv4Addr,
    started: AtomicBool,
    worker: Mutex<Option<Worker>>,
    log_dispatch: Option<Dispatch>,
}

impl Server {
    /// Validates `config` and builds an idle server.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Configuration`] if the address, freedom, or
    /// device is invalid.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let settings = config.validate()?;
        let ip = outbound_ipv4_or_loopback();
        debug!(
            "server '{}' configured: device={}, freedom={}, address={}, client address={}",
            settings.name,
            settings.device,
            settings.freedom,
            settings.address,
            settings.address.for_client(ip)
        );

        Ok(Self {
            settings: Arc::new(settings),
            store: Arc::new(DataStore::new(config.data)),
            events: Arc::new(EventEmitter::new()),
            status: Arc::new(LoopStatus::new()),
            ip,
            started: AtomicBool::new(false),
            worker: Mutex::new(None),
            log_dispatch: None,
        })
    }

    /// Sends this server's log output to `dispatch` instead of the global
    /// default subscriber.
    pub fn with_log_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.log_dispatch = Some(dispatch);
        self
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Spawns the worker and waits until it is listening.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AlreadyStarted`] on a second call,
    /// [`ServerError::Bind`] if the address cannot be bound, and
    /// [`ServerError::Spawn`] / [`ServerError::WorkerExited`] if the thread
    /// could not run.
    pub fn start(&self) -> Result<(), ServerError> {
        self.in_log_scope(|| self.spawn_worker())
    }

    fn spawn_worker(&self) -> Result<(), ServerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted(self.settings.name.clone()));
        }
        // Held until the worker is recorded so a concurrent `stop` waits for it.
        let mut slot = self.worker();

        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.settings),
            Arc::clone(&self.store),
            Arc::clone(&self.events),
        );
        let settings = Arc::clone(&self.settings);
        let status = Arc::clone(&self.status);
        let log_dispatch = self.log_dispatch.clone();

        let thread = thread::Builder::new()
            .name(format!("laplace-server-{}", settings.name.replace('\0', "")))
            .spawn(move || {
                let _log_guard = log_dispatch.as_ref().map(tracing::dispatcher::set_default);
                let span = info_span!("server", name = %settings.name);
                let _enter = span.enter();
                worker_main(&settings, &dispatcher, &status, ready_tx);
                let _ = done_tx.send(());
            })
            .map_err(ServerError::Spawn)?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *slot = Some(Worker {
                    thread,
                    done: done_rx,
                });
                info!("server '{}' started", self.settings.name);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(ServerError::Bind(e))
            }
            Err(_) => {
                let _ = thread.join();
                self.status.finish();
                Err(ServerError::WorkerExited)
            }
        }
    }

    /// Stops the server through the `STOP` handshake and waits for the worker.
    ///
    /// A no-op when the server was never started or is already stopped.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError`] if the handshake fails while the loop is
    /// still running, or the worker does not finish within the stop timeout.
    /// The server stays stoppable after an error.
    pub fn stop(&self) -> Result<(), ShutdownError> {
        self.in_log_scope(|| self.stop_worker())
    }

    fn stop_worker(&self) -> Result<(), ShutdownError> {
        let mut slot = self.worker();
        let Some(worker) = slot.as_ref() else {
            debug!("stop: server '{}' is not running", self.settings.name);
            return Ok(());
        };

        if self.status.is_running() {
            if let Err(e) = self.send_stop() {
                if self.status.is_running() {
                    return Err(e);
                }
                // The loop ended on its own while the handshake was in flight.
                debug!("stop handshake raced with loop exit: {e}");
            }
        }

        let timeout = self.settings.stop_timeout;
        match worker.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => return Err(ShutdownError::WorkerTimeout(timeout)),
        }

        if let Some(worker) = slot.take() {
            if worker.thread.join().is_err() {
                error!("server '{}' thread panicked", self.settings.name);
            }
        }
        self.status.finish();
        info!("server '{}' stopped", self.settings.name);
        Ok(())
    }

    fn send_stop(&self) -> Result<(), ShutdownError> {
        let endpoint = self.settings.address.local_endpoint();
        debug!("sending STOP to {endpoint}");

        let client = RequestClient::connect(&endpoint, self.settings.stop_timeout).map_err(
            |source| ShutdownError::Connect {
                endpoint: endpoint.clone(),
                source,
            },
        )?;
        let reply = client
            .request(&Message::stop_request(LOCAL_SENDER, &self.settings.name))
            .map_err(|source| ShutdownError::Request {
                endpoint: endpoint.clone(),
                source,
            })?;

        if let Some(error_msg) = &reply.error_msg {
            warn!("STOP to {endpoint} answered with an error: {error_msg}");
        }
        Ok(())
    }

    // ── Data ──────────────────────────────────────────────────────────────────

    /// Replaces the whole data store.
    pub fn set_data(&self, data: Payload) {
        self.in_log_scope(|| self.store.set(data));
    }

    /// Returns a copy of the data store.
    pub fn get_data(&self) -> Payload {
        self.store.get()
    }

    /// Empties the data store.
    pub fn empty_data(&self) {
        self.in_log_scope(|| {
            self.store.clear();
            debug!("data store emptied");
        });
    }

    // ── Callbacks ─────────────────────────────────────────────────────────────

    /// Registers the `SAVE` callback, replacing any previous one.
    pub fn on_saving_path_changed<F>(&self, f: F)
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.events.register(
            EventKind::SavingPathChanged,
            handler(move |event| match event {
                ServerEvent::SavingPathChanged(path) => f(path.as_str()),
                _ => Ok(()),
            }),
        );
    }

    /// Registers the `SET` callback, replacing any previous one.
    pub fn on_position_changed<F>(&self, f: F)
    where
        F: Fn(&[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.events.register(
            EventKind::PositionChanged,
            handler(move |event| match event {
                ServerEvent::PositionChanged(positions) => f(positions.as_slice()),
                _ => Ok(()),
            }),
        );
    }

    /// Registers the `GET` callback, replacing any previous one.  It runs
    /// after the reply is sent and before the optional store clear.
    pub fn on_get<F>(&self, f: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.events.register(
            EventKind::Get,
            handler(move |event| match event {
                ServerEvent::Get => f(),
                _ => Ok(()),
            }),
        );
    }

    /// Registers the `INFO_OPT` callback, replacing any previous one.
    pub fn on_opt<F>(&self, f: F)
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.events.register(
            EventKind::OptChanged,
            handler(move |event| match event {
                ServerEvent::OptChanged(data) => f(data),
                _ => Ok(()),
            }),
        );
    }

    /// Removes the callback for `kind`.  Returns `true` if one was registered.
    pub fn clear_callback(&self, kind: EventKind) -> bool {
        self.events.clear(kind).is_some()
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// The bind address as configured.
    pub fn address(&self) -> &str {
        self.settings.address.as_str()
    }

    /// The detected outbound IPv4 address (loopback when there is no route).
    pub fn server_ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn server_port(&self) -> u16 {
        self.settings.address.port()
    }

    /// The address a remote client should connect to.
    pub fn address_for_client(&self) -> String {
        self.settings.address.for_client(self.ip)
    }

    pub fn capabilities(&self) -> &[Command] {
        &self.settings.capabilities
    }

    pub fn device(&self) -> Device {
        self.settings.device
    }

    pub fn freedom(&self) -> u32 {
        self.settings.freedom
    }

    /// `true` from construction until a `STOP` has been handled.
    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn state(&self) -> LoopState {
        self.status.state()
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_log_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.log_dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.settings.name)
            .field("address", &self.settings.address.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("server '{}' did not stop cleanly: {e}", self.settings.name);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::MockReplyTransport;
    use laplace_core::{decode, PROTOCOL_VERSION};
    use serde_json::json;
    use std::collections::VecDeque;

    const POLL: Duration = Duration::from_millis(1);
    const SLEEP: Duration = Duration::from_millis(1);

    fn dispatcher(events: Arc<EventEmitter>) -> Dispatcher {
        let settings = ServerConfig {
            name: "stage".to_string(),
            freedom: 2,
            ..ServerConfig::default()
        }
        .validate()
        .expect("valid fixture config");
        Dispatcher::new(Arc::new(settings), Arc::new(DataStore::default()), events)
    }

    fn frames(messages: &[Message]) -> VecDeque<Vec<u8>> {
        messages.iter().map(|m| encode(m).expect("encode fixture")).collect()
    }

    /// A mock that serves `requests` in order and records every reply.
    fn scripted_transport(
        mut requests: VecDeque<Vec<u8>>,
        sent: &Arc<Mutex<Vec<Vec<u8>>>>,
    ) -> MockReplyTransport {
        let count = requests.len();
        let sink = Arc::clone(sent);
        let mut mock = MockReplyTransport::new();
        mock.expect_poll_request().returning(|_| Ok(true));
        mock.expect_recv_request()
            .times(count)
            .returning(move || Ok(requests.pop_front().expect("script exhausted")));
        mock.expect_send_reply().times(count).returning(move |frame| {
            sink.lock().unwrap().push(frame.to_vec());
            Ok(())
        });
        mock
    }

    fn running_status() -> Arc<LoopStatus> {
        let status = Arc::new(LoopStatus::new());
        status.set_state(LoopState::Running);
        status
    }

    #[test]
    fn test_run_loop_sends_exactly_one_reply_per_request() {
        // Arrange
        let requests = [
            Message::info_request("ui", "stage"),
            Message::ping("ui", "stage"),
            Message::get_request("ui", "stage"),
            Message::save_request("ui", "stage", "/data"),
            Message::set_request("ui", "stage", vec![json!(1), json!(2)]),
            Message::opt_request("ui", "stage", json!({"lens": 3})),
            Message::stop_request("ui", "stage"),
        ];
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut transport = scripted_transport(frames(&requests), &sent);
        let status = running_status();

        // Act
        run_loop(&mut transport, &dispatcher(Arc::default()), &status, POLL, SLEEP);

        // Assert: the mock verifies the call counts on drop; check pairing too
        let replies: Vec<Message> = sent
            .lock()
            .unwrap()
            .iter()
            .map(|f| decode(f).expect("reply decodes"))
            .collect();
        assert_eq!(replies.len(), requests.len());
        for (request, reply) in requests.iter().zip(&replies) {
            assert_eq!(reply.cmd, request.cmd);
            assert!(!reply.is_error(), "{} got error {:?}", request.cmd, reply.error_msg);
            assert_eq!(reply.version, PROTOCOL_VERSION);
        }
        assert!(!status.is_running());
    }

    #[test]
    fn test_run_loop_answers_every_bad_request_and_keeps_serving() {
        // Arrange
        let mut requests = VecDeque::new();
        requests.push_back(b"{{{ not json".to_vec());
        requests.push_back(
            serde_json::to_vec(&json!({"from": "ui", "cmd": "PING", "payload": {}, "version": "9"}))
                .unwrap(),
        );
        requests.extend(frames(&[
            Message::new("DANCE", "ui", "stage", Payload::new()),
            Message::new("SAVE", "ui", "stage", Payload::new()),
            Message::stop_request("ui", "stage"),
        ]));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut transport = scripted_transport(requests, &sent);
        let status = running_status();

        // Act
        run_loop(&mut transport, &dispatcher(Arc::default()), &status, POLL, SLEEP);

        // Assert
        let replies: Vec<Message> = sent
            .lock()
            .unwrap()
            .iter()
            .map(|f| serde_json::from_slice(f).expect("reply is a message"))
            .collect();
        assert_eq!(replies.len(), 5);
        assert!(replies[..4].iter().all(Message::is_error));
        assert_eq!(replies[4].cmd, "STOP");
        assert!(!replies[4].is_error());
    }

    #[test]
    fn test_run_loop_clears_flag_only_after_stop_reply() {
        // Arrange
        let status = running_status();
        let observed = Arc::new(Mutex::new(None));
        let mut requests = frames(&[Message::stop_request("local", "stage")]);
        let mut transport = MockReplyTransport::new();
        transport.expect_poll_request().returning(|_| Ok(true));
        transport
            .expect_recv_request()
            .times(1)
            .returning(move || Ok(requests.pop_front().unwrap()));
        let (status_in_send, sink) = (Arc::clone(&status), Arc::clone(&observed));
        transport.expect_send_reply().times(1).returning(move |_| {
            *sink.lock().unwrap() = Some((status_in_send.is_running(), status_in_send.state()));
            Ok(())
        });

        // Act
        run_loop(&mut transport, &dispatcher(Arc::default()), &status, POLL, SLEEP);

        // Assert: while the reply was being sent the loop was STOPPING but still running
        assert_eq!(*observed.lock().unwrap(), Some((true, LoopState::Stopping)));
        assert!(!status.is_running());
    }

    #[test]
    fn test_run_loop_raises_get_event_after_reply() {
        // Arrange
        let order = Arc::new(Mutex::new(Vec::new()));
        let events = Arc::new(EventEmitter::new());
        let on_get = Arc::clone(&order);
        events.register(
            EventKind::Get,
            handler(move |_| {
                on_get.lock().unwrap().push("event");
                Ok(())
            }),
        );
        let mut requests = frames(&[
            Message::get_request("ui", "stage"),
            Message::stop_request("ui", "stage"),
        ]);
        let on_send = Arc::clone(&order);
        let mut transport = MockReplyTransport::new();
        transport.expect_poll_request().returning(|_| Ok(true));
        transport
            .expect_recv_request()
            .times(2)
            .returning(move || Ok(requests.pop_front().unwrap()));
        transport.expect_send_reply().times(2).returning(move |_| {
            on_send.lock().unwrap().push("reply");
            Ok(())
        });

        // Act
        run_loop(&mut transport, &dispatcher(events), &running_status(), POLL, SLEEP);

        // Assert
        assert_eq!(*order.lock().unwrap(), vec!["reply", "event", "reply"]);
    }

    #[test]
    fn test_run_loop_sleeps_and_repolls_when_idle() {
        // Arrange: two empty polls before the STOP arrives
        let mut polls = 0;
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let mut requests = frames(&[Message::stop_request("ui", "stage")]);
        let mut transport = MockReplyTransport::new();
        transport.expect_poll_request().times(3).returning(move |_| {
            polls += 1;
            Ok(polls > 2)
        });
        transport
            .expect_recv_request()
            .times(1)
            .returning(move || Ok(requests.pop_front().unwrap()));
        transport.expect_send_reply().times(1).returning(move |f| {
            sink.lock().unwrap().push(f.to_vec());
            Ok(())
        });

        // Act
        run_loop(&mut transport, &dispatcher(Arc::default()), &running_status(), POLL, SLEEP);

        // Assert
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_run_loop_exits_when_transport_terminated() {
        // Arrange
        let mut transport = MockReplyTransport::new();
        transport
            .expect_poll_request()
            .times(1)
            .returning(|_| Err(TransportError::Terminated));
        transport.expect_recv_request().never();
        transport.expect_send_reply().never();
        let status = running_status();

        // Act
        run_loop(&mut transport, &dispatcher(Arc::default()), &status, POLL, SLEEP);

        // Assert: the loop returned without a STOP; the flag is the worker's to clear
        assert!(status.is_running());
    }

    #[test]
    fn test_run_loop_survives_failed_send() {
        // Arrange: the first reply fails to send, the second (STOP) succeeds
        let mut requests = frames(&[
            Message::ping("ui", "stage"),
            Message::stop_request("ui", "stage"),
        ]);
        let mut sends = 0;
        let mut transport = MockReplyTransport::new();
        transport.expect_poll_request().returning(|_| Ok(true));
        transport
            .expect_recv_request()
            .times(2)
            .returning(move || Ok(requests.pop_front().unwrap()));
        transport.expect_send_reply().times(2).returning(move |_| {
            sends += 1;
            if sends == 1 {
                Err(TransportError::Io(zmq::Error::EINVAL))
            } else {
                Ok(())
            }
        });
        let status = running_status();

        // Act
        run_loop(&mut transport, &dispatcher(Arc::default()), &status, POLL, SLEEP);

        // Assert
        assert!(!status.is_running());
    }

    #[test]
    fn test_loop_state_round_trips_through_u8() {
        for state in [
            LoopState::Idle,
            LoopState::Running,
            LoopState::Stopping,
            LoopState::Stopped,
        ] {
            assert_eq!(LoopState::from_u8(state.to_u8()), state);
        }
    }

    #[test]
    fn test_new_server_is_idle_and_running() {
        // Arrange / Act
        let server = Server::new(ServerConfig::default()).expect("default config is valid");

        // Assert
        assert_eq!(server.state(), LoopState::Idle);
        assert!(server.is_running());
        assert_eq!(server.name(), "Unknown");
        assert_eq!(server.server_port(), 1234);
        assert_eq!(server.capabilities(), &Command::REQUESTS[..]);
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let server = Server::new(ServerConfig::default()).unwrap();
        assert!(server.stop().is_ok());
        assert_eq!(server.state(), LoopState::Idle);
        // The flag is true from construction and only a handled STOP clears it.
        assert!(server.is_running());
    }

    #[test]
    fn test_new_rejects_invalid_configuration() {
        let config = ServerConfig {
            device: "LASER".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(
            Server::new(config),
            Err(ServerError::Configuration(ConfigurationError::UnknownDevice { .. }))
        ));
    }

    #[test]
    fn test_address_for_client_substitutes_detected_ip() {
        let server = Server::new(ServerConfig {
            address: "tcp://*:4321".to_string(),
            ..ServerConfig::default()
        })
        .unwrap();
        assert_eq!(
            server.address_for_client(),
            format!("tcp://{}:4321", server.server_ip())
        );
    }

    #[test]
    fn test_callbacks_can_be_registered_and_cleared() {
        let server = Server::new(ServerConfig::default()).unwrap();
        server.on_get(|| Ok(()));
        assert!(server.clear_callback(EventKind::Get));
        assert!(!server.clear_callback(EventKind::Get));
    }

    #[test]
    fn test_data_accessors_copy_and_replace() {
        // Arrange
        let mut initial = Payload::new();
        initial.insert("a".to_string(), json!(1));
        let server = Server::new(ServerConfig {
            data: initial.clone(),
            ..ServerConfig::default()
        })
        .unwrap();

        // Act / Assert
        assert_eq!(server.get_data(), initial);
        server.empty_data();
        assert!(server.get_data().is_empty());
    }
}
