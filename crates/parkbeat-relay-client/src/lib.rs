use std::collections::HashMap;
use std::time::Duration;

use parkbeat_relay_types::SocketId;
use parkbeat_relay_types::events::{
    ClientEvent, ServerEvent, ServerEventKind, decode_server_frame, encode_client_frame,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tracing::{debug, warn};

pub mod backoff;
pub mod coalesce;
pub mod rooms;
pub mod transport;

use crate::backoff::{MAX_RECONNECT_ATTEMPTS, backoff_delay};
use crate::coalesce::{EmitOptions, EmitQueue, EmitTiming, QueuedEmit};
use crate::rooms::{RoomBook, RoomEntry, UNSUBSCRIBE_LINGER};
use crate::transport::{Connector, TransportPair, WsConnector};

pub const FLUSH_WINDOW: Duration = Duration::from_millis(1_000);
pub const PING_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
}

#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    pub flush_window: Duration,
    pub unsubscribe_linger: Duration,
    pub ping_interval: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for RelayClientConfig {
    fn default() -> Self {
        Self {
            flush_window: FLUSH_WINDOW,
            unsubscribe_linger: UNSUBSCRIBE_LINGER,
            ping_interval: PING_INTERVAL,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

enum Command {
    Emit {
        event: ClientEvent,
        options: EmitOptions,
    },
    Hook {
        kind: ServerEventKind,
        sender: mpsc::UnboundedSender<ServerEvent>,
    },
    RoomStates {
        reply: oneshot::Sender<Vec<RoomEntry>>,
    },
    SocketId {
        reply: oneshot::Sender<Option<SocketId>>,
    },
    Reconnect,
    Shutdown,
}

/// The process-wide connection manager. One transport, one owning task; UI
/// code talks to it through this handle (clone freely) instead of touching a
/// socket directly. Emits are coalesced and buffered across reconnects, and
/// inbound events are multiplexed onto per-kind hooks with last-payload
/// replay.
pub struct RelayClient {
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    task: tokio::task::JoinHandle<()>,
}

impl RelayClient {
    pub fn spawn<C: Connector>(connector: C, config: RelayClientConfig) -> RelayClient {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let task = ClientTask {
            connector,
            rooms: RoomBook::with_linger(config.unsubscribe_linger),
            config,
            commands: command_rx,
            state_tx,
            hooks: HashMap::new(),
            last_payload: HashMap::new(),
            delayed: EmitQueue::default(),
            delayed_deadline: None,
            buffered: Vec::new(),
            socket_id: None,
        };
        RelayClient {
            commands,
            state_rx,
            task: tokio::spawn(task.run()),
        }
    }

    pub fn connect_ws(url: impl Into<String>, config: RelayClientConfig) -> RelayClient {
        Self::spawn(WsConnector::new(url), config)
    }

    pub fn emit(&self, event: ClientEvent, options: EmitOptions) {
        let _ = self.commands.send(Command::Emit { event, options });
    }

    /// Registers interest in one event kind. The last payload seen for the
    /// kind is replayed immediately; everything later streams in live.
    pub fn hook(&self, kind: ServerEventKind) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = self.commands.send(Command::Hook { kind, sender });
        receiver
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Asks for another connect cycle after the backoff gave up.
    pub fn reconnect(&self) {
        let _ = self.commands.send(Command::Reconnect);
    }

    pub async fn room_states(&self) -> Vec<RoomEntry> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::RoomStates { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn socket_id(&self) -> Option<SocketId> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::SocketId { reply }).is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        let _ = self.task.await;
    }
}

enum LoopExit {
    TransportLost,
    Shutdown,
}

enum OfflineExit {
    Timer,
    Reconnect,
    Shutdown,
}

struct ClientTask<C> {
    connector: C,
    config: RelayClientConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    hooks: HashMap<ServerEventKind, Vec<mpsc::UnboundedSender<ServerEvent>>>,
    last_payload: HashMap<ServerEventKind, ServerEvent>,
    rooms: RoomBook,
    delayed: EmitQueue,
    delayed_deadline: Option<Instant>,
    buffered: Vec<QueuedEmit>,
    socket_id: Option<SocketId>,
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(3600)
}

impl<C: Connector> ClientTask<C> {
    async fn run(mut self) {
        let mut first_connect = true;
        loop {
            self.set_state(if first_connect {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            });

            let mut attempt: u32 = 0;
            let pair = loop {
                match self.connector.connect().await {
                    Ok(pair) => break pair,
                    Err(e) => {
                        attempt += 1;
                        warn!("Connect attempt {attempt} failed: {e}");
                        if attempt >= self.config.max_reconnect_attempts {
                            self.set_state(ConnectionState::Disconnected);
                            match self.serve_offline(None).await {
                                OfflineExit::Shutdown => return,
                                OfflineExit::Reconnect | OfflineExit::Timer => {
                                    self.set_state(ConnectionState::Reconnecting);
                                    attempt = 0;
                                }
                            }
                        } else if let OfflineExit::Shutdown =
                            self.serve_offline(Some(backoff_delay(attempt - 1))).await
                        {
                            return;
                        }
                    }
                }
            };

            first_connect = false;
            self.set_state(ConnectionState::Connected);
            match self.connected_loop(pair).await {
                LoopExit::Shutdown => return,
                LoopExit::TransportLost => debug!("Transport lost, reconnecting"),
            }
        }
    }

    async fn connected_loop(&mut self, mut pair: TransportPair) -> LoopExit {
        self.flush_buffered(&pair.outbound).await;
        let mut ping = interval(self.config.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let flush_at = self.delayed_deadline.unwrap_or_else(far_future);
            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => return LoopExit::Shutdown,
                    Some(Command::Reconnect) => {}
                    Some(command) => self.handle_command(command, Some(&pair.outbound)).await,
                },
                inbound = pair.inbound.recv() => match inbound {
                    None => return LoopExit::TransportLost,
                    Some(frame) => self.handle_frame(&frame),
                },
                _ = sleep_until(flush_at), if self.delayed_deadline.is_some() => {
                    self.flush_delayed(Some(&pair.outbound)).await;
                }
                _ = ping.tick() => {
                    self.send_now(
                        QueuedEmit { event: ClientEvent::Ping, options: EmitOptions::immediate() },
                        Some(&pair.outbound),
                    ).await;
                }
            }
        }
    }

    /// Keeps serving handle commands while there is no transport: emits get
    /// buffered or coalesced, hooks still register and replay.
    async fn serve_offline(&mut self, wait: Option<Duration>) -> OfflineExit {
        let deadline = wait.map(|d| Instant::now() + d);
        loop {
            let flush_at = self.delayed_deadline.unwrap_or_else(far_future);
            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => return OfflineExit::Shutdown,
                    Some(Command::Reconnect) => return OfflineExit::Reconnect,
                    Some(command) => self.handle_command(command, None).await,
                },
                _ = sleep_until(flush_at), if self.delayed_deadline.is_some() => {
                    self.flush_delayed(None).await;
                }
                _ = sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {
                    return OfflineExit::Timer;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command, outbound: Option<&mpsc::Sender<String>>) {
        match command {
            Command::Emit { event, options } => {
                self.rooms.observe(&event);
                match options.timing {
                    EmitTiming::Immediate => {
                        self.send_now(QueuedEmit { event, options }, outbound).await;
                    }
                    EmitTiming::Delayed => {
                        self.delayed.push(event, options);
                        if self.delayed.is_empty() {
                            // a cancelling pair may have emptied the queue
                            self.delayed_deadline = None;
                        } else if self.delayed_deadline.is_none() {
                            self.delayed_deadline = Some(Instant::now() + self.config.flush_window);
                        }
                    }
                }
            }
            Command::Hook { kind, sender } => {
                if let Some(last) = self.last_payload.get(&kind) {
                    let _ = sender.send(last.clone());
                }
                self.hooks.entry(kind).or_default().push(sender);
            }
            Command::RoomStates { reply } => {
                let _ = reply.send(self.rooms.entries());
            }
            Command::SocketId { reply } => {
                let _ = reply.send(self.socket_id.clone());
            }
            Command::Reconnect | Command::Shutdown => unreachable!("handled by the caller"),
        }
    }

    fn handle_frame(&mut self, frame: &str) {
        match decode_server_frame(frame) {
            Ok(event) => {
                if let ServerEvent::ProvideSocketId(id) = &event {
                    self.socket_id = Some(id.clone());
                }
                let kind = ServerEventKind::from(&event);
                self.last_payload.insert(kind, event.clone());
                if let Some(senders) = self.hooks.get_mut(&kind) {
                    senders.retain(|sender| sender.send(event.clone()).is_ok());
                }
            }
            Err(e) => debug!("Dropping inbound frame: {e}"),
        }
    }

    async fn send_now(&mut self, emit: QueuedEmit, outbound: Option<&mpsc::Sender<String>>) {
        match outbound {
            Some(outbound) => match encode_client_frame(&emit.event) {
                Ok(frame) => {
                    if outbound.send(frame).await.is_err() {
                        // transport just died; the connected loop notices via
                        // the inbound side, we only need to keep the event
                        self.buffered.push(emit);
                    }
                }
                Err(e) => warn!("Failed to encode {}: {e}", emit.event.kind()),
            },
            None => self.buffered.push(emit),
        }
    }

    async fn flush_delayed(&mut self, outbound: Option<&mpsc::Sender<String>>) {
        self.delayed_deadline = None;
        for emit in self.delayed.drain() {
            self.send_now(emit, outbound).await;
        }
    }

    /// Replays everything buffered while offline; subscription events are
    /// upgraded to immediate and go out first so rooms re-form before any
    /// queued mutations land.
    async fn flush_buffered(&mut self, outbound: &mpsc::Sender<String>) {
        if self.buffered.is_empty() {
            return;
        }
        let (subscriptions, rest): (Vec<QueuedEmit>, Vec<QueuedEmit>) = std::mem::take(&mut self.buffered)
            .into_iter()
            .partition(|queued| {
                matches!(
                    queued.event,
                    ClientEvent::Subscribe(_) | ClientEvent::SubscribeProject(_)
                )
            });
        for mut emit in subscriptions.into_iter().chain(rest) {
            emit.options.timing = EmitTiming::Immediate;
            self.send_now(emit, Some(outbound)).await;
        }
    }

    fn set_state(&self, state: ConnectionState) {
        debug!("Connection state: {state:?}");
        self.state_tx.send_replace(state);
    }
}
