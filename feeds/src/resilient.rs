//! Self-healing WebSocket connection
//!
//! All connection state lives in one worker task fed by a command queue;
//! callers and timers submit commands, never touch the socket directly.
//! Every socket carries a token; handlers and timers are closed over it,
//! so anything arriving from a superseded socket is silently dropped.

use crate::error::FeedError;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Produces the dial URL; called on every attempt so authentication can
/// be re-signed.
pub type UrlFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Maps the retry attempt number (1-based) to the delay before the next
/// dial.
pub type RetryDelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Connection behavior knobs.
#[derive(Clone)]
pub struct SocketConfig {
    /// URL provider, invoked per dial
    pub url_fn: UrlFn,
    /// Reconnect backoff schedule
    pub retry_delay_fn: RetryDelayFn,
    /// Interval between pings; `None` disables liveness probing
    pub ping_interval: Option<Duration>,
    /// How long a ping may stay unanswered before the socket is presumed
    /// dead
    pub pong_timeout: Duration,
    /// Grace period between the close frame and forced teardown
    pub abort_grace: Duration,
}

impl SocketConfig {
    /// Defaults for a fixed URL: doubling backoff capped at 30s, 30s
    /// pings with a 10s pong deadline, 5s abort grace.
    #[must_use]
    pub fn for_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            url_fn: Arc::new(move || url.clone()),
            retry_delay_fn: Arc::new(|attempt| {
                let exp = attempt.saturating_sub(1).min(6);
                Duration::from_millis(500 * (1 << exp)).min(Duration::from_secs(30))
            }),
            ping_interval: Some(Duration::from_secs(30)),
            pong_timeout: Duration::from_secs(10),
            abort_grace: Duration::from_secs(5),
        }
    }
}

/// Callbacks driven by the transport.
///
/// `on_message` fires on the reader task of the socket that produced the
/// message; late callbacks from superseded sockets never fire.
#[derive(Clone)]
pub struct SocketCallbacks {
    /// A socket completed its handshake
    pub on_new_connection: Arc<dyn Fn() + Send + Sync>,
    /// A data frame arrived
    pub on_message: Arc<dyn Fn(Message) + Send + Sync>,
    /// The transport failed; a retry is already scheduled
    pub on_connection_error: Arc<dyn Fn(FeedError) + Send + Sync>,
}

impl Default for SocketCallbacks {
    fn default() -> Self {
        Self {
            on_new_connection: Arc::new(|| {}),
            on_message: Arc::new(|_| {}),
            on_connection_error: Arc::new(|_| {}),
        }
    }
}

enum Command {
    Connect,
    Retry,
    KeepAlive { token: Uuid },
    CheckAlive { token: Uuid },
    Terminate { token: Option<Uuid> },
    Cleanup { token: Uuid },
    ResetRetries { token: Uuid },
    Pong { token: Uuid },
    Failed { token: Uuid, error: FeedError },
    Disconnected { token: Uuid },
    Send { message: Message, done: oneshot::Sender<Result<(), FeedError>> },
    Close { done: oneshot::Sender<()> },
}

struct Worker {
    config: SocketConfig,
    callbacks: SocketCallbacks,
    commands: mpsc::UnboundedSender<Command>,
    current_token: Arc<Mutex<Uuid>>,
    sink: Option<WsSink>,
    reader: Option<JoinHandle<()>>,
    pending_pong: bool,
    attempts: u32,
    closed: bool,
    close_waiters: Vec<oneshot::Sender<()>>,
}

impl Worker {
    fn schedule(&self, delay: Duration, command: Command) {
        let tx = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(command);
        });
    }

    fn token(&self) -> Uuid {
        *self.current_token.lock()
    }

    fn rotate_token(&self) -> Uuid {
        let fresh = Uuid::new_v4();
        *self.current_token.lock() = fresh;
        fresh
    }

    /// Drop the socket, reset liveness, and invalidate stale timers.
    fn cleanup_now(&mut self) {
        self.sink = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.pending_pong = false;
        self.rotate_token();
    }

    fn notify_closed(&mut self) {
        for waiter in self.close_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn after_teardown(&mut self) {
        if self.closed {
            self.notify_closed();
        } else {
            let _ = self.commands.send(Command::Retry);
        }
    }

    async fn connect(&mut self) {
        if self.closed || self.sink.is_some() {
            return;
        }
        let token = self.rotate_token();
        let url = (self.config.url_fn)();
        debug!(%url, attempt = self.attempts, "dialing");
        match connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                let (sink, mut stream) = socket.split();
                self.sink = Some(sink);
                self.pending_pong = false;

                let commands = self.commands.clone();
                let current = self.current_token.clone();
                let on_message = self.callbacks.on_message.clone();
                self.reader = Some(tokio::spawn(async move {
                    let mut first = true;
                    while let Some(frame) = stream.next().await {
                        if *current.lock() != token {
                            return;
                        }
                        match frame {
                            Ok(Message::Pong(_)) => {
                                let _ = commands.send(Command::Pong { token });
                            }
                            Ok(Message::Ping(_)) => {
                                // the transport queues the reply itself
                            }
                            Ok(Message::Close(_)) => {
                                let _ = commands.send(Command::Disconnected { token });
                                return;
                            }
                            Ok(message) => {
                                if first {
                                    first = false;
                                    let _ = commands.send(Command::ResetRetries { token });
                                }
                                on_message(message);
                            }
                            Err(err) => {
                                let _ = commands.send(Command::Failed {
                                    token,
                                    error: err.into(),
                                });
                                return;
                            }
                        }
                    }
                    let _ = commands.send(Command::Disconnected { token });
                }));

                info!(%url, "connected");
                (self.callbacks.on_new_connection)();
                if let Some(interval) = self.config.ping_interval {
                    self.schedule(interval, Command::KeepAlive { token });
                }
            }
            Err(err) => {
                warn!(%url, %err, "dial failed");
                (self.callbacks.on_connection_error)(err.into());
                let _ = self.commands.send(Command::Retry);
            }
        }
    }

    async fn keep_alive(&mut self, token: Uuid) {
        if token != self.token() || self.sink.is_none() {
            return;
        }
        let ping = Message::Ping(Vec::new());
        let sent = match self.sink.as_mut() {
            Some(sink) => sink.send(ping).await,
            None => return,
        };
        match sent {
            Ok(()) => {
                self.pending_pong = true;
                self.schedule(self.config.pong_timeout, Command::CheckAlive { token });
            }
            Err(err) => {
                (self.callbacks.on_connection_error)(err.into());
                self.terminate(Some(token)).await;
            }
        }
    }

    async fn terminate(&mut self, token: Option<Uuid>) {
        if let Some(token) = token {
            if token != self.token() {
                return;
            }
        }
        let token = self.token();
        if let Some(sink) = self.sink.as_mut() {
            let _ = sink.send(Message::Close(None)).await;
            self.schedule(self.config.abort_grace, Command::Cleanup { token });
        } else {
            // nothing to wind down
            self.cleanup_now();
            self.after_teardown();
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect().await,
            Command::Retry => {
                if self.closed {
                    return;
                }
                self.attempts += 1;
                let delay = (self.config.retry_delay_fn)(self.attempts);
                debug!(attempt = self.attempts, ?delay, "retry scheduled");
                self.schedule(delay, Command::Connect);
            }
            Command::KeepAlive { token } => self.keep_alive(token).await,
            Command::CheckAlive { token } => {
                if token != self.token() {
                    return;
                }
                if self.pending_pong {
                    warn!("pong missed, terminating socket");
                    self.terminate(Some(token)).await;
                } else if let Some(interval) = self.config.ping_interval {
                    self.schedule(interval, Command::KeepAlive { token });
                }
            }
            Command::Terminate { token } => self.terminate(token).await,
            Command::Cleanup { token } => {
                if token != self.token() {
                    return;
                }
                self.cleanup_now();
                self.after_teardown();
            }
            Command::ResetRetries { token } => {
                if token == self.token() {
                    self.attempts = 0;
                }
            }
            Command::Pong { token } => {
                if token == self.token() {
                    self.pending_pong = false;
                }
            }
            Command::Failed { token, error } => {
                if token != self.token() {
                    return;
                }
                (self.callbacks.on_connection_error)(error);
                self.cleanup_now();
                self.after_teardown();
            }
            Command::Disconnected { token } => {
                if token != self.token() {
                    return;
                }
                info!("socket closed by remote");
                self.cleanup_now();
                self.after_teardown();
            }
            Command::Send { message, done } => {
                let result = match self.sink.as_mut() {
                    None => Err(if self.closed {
                        FeedError::Closed
                    } else {
                        FeedError::NotConnected
                    }),
                    Some(sink) => sink.send(message).await.map_err(FeedError::from),
                };
                let _ = done.send(result);
            }
            Command::Close { done } => {
                self.closed = true;
                self.close_waiters.push(done);
                let _ = self.commands.send(Command::Terminate { token: None });
            }
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        // handle dropped without close(): tear the socket down
        self.cleanup_now();
    }
}

/// Handle to a self-healing WebSocket connection.
///
/// Cloning shares the same underlying connection.
#[derive(Clone)]
pub struct ResilientSocket {
    commands: mpsc::UnboundedSender<Command>,
}

impl ResilientSocket {
    /// Spawn the connection worker and begin dialing.
    #[must_use]
    pub fn connect(config: SocketConfig, callbacks: SocketCallbacks) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            config,
            callbacks,
            commands: tx.clone(),
            current_token: Arc::new(Mutex::new(Uuid::new_v4())),
            sink: None,
            reader: None,
            pending_pong: false,
            attempts: 0,
            closed: false,
            close_waiters: Vec::new(),
        };
        tokio::spawn(worker.run(rx));
        let _ = tx.send(Command::Connect);
        Self { commands: tx }
    }

    /// Send one frame on the live socket.
    pub async fn send(&self, message: Message) -> Result<(), FeedError> {
        let (done, result) = oneshot::channel();
        if self.commands.send(Command::Send { message, done }).is_err() {
            return Err(FeedError::Closed);
        }
        result.await.unwrap_or(Err(FeedError::Closed))
    }

    /// Close the connection for good and wait for the teardown.
    ///
    /// After this returns no socket is live and no reconnect will fire.
    pub async fn close(&self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Close { done }).is_err() {
            return;
        }
        let _ = finished.await;
    }
}
