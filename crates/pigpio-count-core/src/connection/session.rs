//! One open session with the pigpio daemon.
//!
//! A session is two TCP sockets:
//! - the command socket, owned by a command actor task that serializes
//!   requests and matches each one with its 16-byte response
//! - the notification socket, switched to report streaming with `NOIB` and
//!   read by a notification task that feeds the `Dispatcher`
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`.
//! Channel failures are mapped to `RequestError::SessionLost`.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pigpio_wire::{
    missed_between, CommandFrame, NotificationReport, ResponseFrame, COMMAND_LEN, REPORT_LEN,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::commands::SessionCommand;
use crate::config::{CounterOptions, DaemonConfig};
use crate::dispatch::{CallbackId, Dispatcher};
use crate::error::{ConnectionError, RequestError};

/// Command channel buffer size.
const COMMAND_BUFFER: usize = 64;

// ============================================================================
// Session
// ============================================================================

/// An open session: command channel, notification stream and callback table.
///
/// Obtained from [`DaemonConnection::acquire`](super::DaemonConnection::acquire).
/// The session is closed by the connection when its last user releases it.
#[derive(Debug)]
pub struct Session {
    sender: mpsc::Sender<SessionCommand>,
    dispatcher: Arc<Dispatcher>,
    state: Arc<SessionState>,
    notify_handle: u32,
    daemon_version: u32,
}

/// Liveness shared between the session and its two tasks.
#[derive(Debug)]
struct SessionState {
    /// Cleared when either socket fails.
    alive: AtomicBool,
    /// Cancelled on close or loss; both tasks exit on it.
    stop: CancellationToken,
}

impl SessionState {
    fn mark_lost(&self) {
        self.alive.store(false, Ordering::Release);
        self.stop.cancel();
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.stop.is_cancelled()
    }
}

impl Session {
    /// Connects both sockets, opens the notification stream and starts the
    /// session tasks. Must be called within a tokio runtime.
    pub(crate) async fn open(config: &DaemonConfig) -> Result<Self, ConnectionError> {
        let addr = config.address();
        debug!(addr = %addr, "Opening pigpio session");

        let (command_stream, notify_stream, notify_handle) =
            timeout(config.connect_timeout, connect_pair(&addr))
                .await
                .map_err(|_| ConnectionError::Timeout { addr: addr.clone() })??;

        let state = Arc::new(SessionState {
            alive: AtomicBool::new(true),
            stop: CancellationToken::new(),
        });
        let dispatcher = Arc::new(Dispatcher::new());
        let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);

        let actor = CommandActor {
            stream: command_stream,
            receiver,
            dispatcher: Arc::clone(&dispatcher),
            state: Arc::clone(&state),
            notify_handle,
            request_timeout: config.request_timeout,
        };
        tokio::spawn(actor.run());
        tokio::spawn(run_notifications(
            notify_stream,
            Arc::clone(&dispatcher),
            Arc::clone(&state),
        ));

        let mut session = Self {
            sender,
            dispatcher,
            state,
            notify_handle,
            daemon_version: 0,
        };

        session.daemon_version = match session.request(CommandFrame::daemon_version()).await {
            Ok(version) => version,
            Err(err) => {
                session.close();
                return Err(match err {
                    RequestError::Daemon { source, .. } => ConnectionError::Rejected { addr, source },
                    RequestError::Timeout { .. } => ConnectionError::Timeout { addr },
                    RequestError::SessionLost => ConnectionError::SessionLost,
                });
            }
        };

        info!(
            addr = %addr,
            notify_handle,
            daemon_version = session.daemon_version,
            "pigpio session opened"
        );
        Ok(session)
    }

    /// Handle of this session's notification stream on the daemon.
    pub fn notify_handle(&self) -> u32 {
        self.notify_handle
    }

    /// Version reported by the daemon when the session was opened.
    pub fn daemon_version(&self) -> u32 {
        self.daemon_version
    }

    /// Returns false once the session was closed or either socket failed.
    pub fn is_alive(&self) -> bool {
        self.state.is_alive()
    }

    /// Number of edge callbacks registered on this session.
    pub fn callback_count(&self) -> usize {
        self.dispatcher.len()
    }

    /// Reads the current levels of GPIO 0-31.
    pub async fn read_levels(&self) -> Result<u32, RequestError> {
        self.request(CommandFrame::read_bank_1()).await
    }

    /// Reads the board's hardware revision word.
    pub async fn hardware_version(&self) -> Result<u32, RequestError> {
        self.request(CommandFrame::hardware_version()).await
    }

    /// Sends one command and waits for its result word.
    pub(crate) async fn request(&self, frame: CommandFrame) -> Result<u32, RequestError> {
        if !self.is_alive() {
            return Err(RequestError::SessionLost);
        }

        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Request {
                frame,
                respond_to: tx,
            })
            .await
            .map_err(|_| RequestError::SessionLost)?;

        rx.await.map_err(|_| RequestError::SessionLost)?
    }

    /// Registers an edge callback for `pin` that increments `ticks`.
    ///
    /// Programs the glitch filter first if one is configured, samples the
    /// pin levels, adds the callback and pushes the new mask with `NB`. On
    /// failure, or if the returned future is dropped early, the callback is
    /// removed again.
    pub(crate) async fn register(
        &self,
        pin: u32,
        options: &CounterOptions,
        ticks: Arc<AtomicU64>,
    ) -> Result<CallbackId, RequestError> {
        if let Some(steady_us) = options.glitch_filter_us() {
            self.request(CommandFrame::glitch_filter(pin, steady_us))
                .await?;
            debug!(pin, steady_us, "Glitch filter set");
        }

        let levels = self.read_levels().await?;
        let mut pending = PendingCallback {
            session: self,
            id: self.dispatcher.insert(pin, options.edge, ticks, levels),
            committed: false,
        };

        let bits = self.sync_notify_bits().await?;
        pending.committed = true;
        debug!(
            pin,
            edge = %options.edge,
            callback = %pending.id,
            bits = format_args!("{bits:#010x}"),
            "Edge callback registered"
        );
        Ok(pending.id)
    }

    /// Removes a callback from the table. No further ticks are delivered to
    /// it once this returns.
    pub(crate) fn remove_callback(&self, id: CallbackId) -> bool {
        self.dispatcher.remove(id)
    }

    /// Pushes the current callback mask to the daemon and waits for the answer.
    pub(crate) async fn sync_notify_bits(&self) -> Result<u32, RequestError> {
        if !self.is_alive() {
            return Err(RequestError::SessionLost);
        }

        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::SyncNotifyBits {
                respond_to: Some(tx),
            })
            .await
            .map_err(|_| RequestError::SessionLost)?;

        rx.await.map_err(|_| RequestError::SessionLost)?
    }

    /// Queues a mask update without waiting. Used from `Drop`.
    pub(crate) fn sync_notify_bits_detached(&self) {
        if !self.is_alive() {
            return;
        }
        if let Err(err) = self
            .sender
            .try_send(SessionCommand::SyncNotifyBits { respond_to: None })
        {
            warn!(error = %err, "Could not queue notification mask update");
        }
    }

    /// Stops both session tasks. The command actor sends `NC` on the way out.
    pub(crate) fn close(&self) {
        self.state.stop.cancel();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.state.stop.cancel();
    }
}

/// Removes a callback that was added but not yet confirmed by the daemon.
struct PendingCallback<'a> {
    session: &'a Session,
    id: CallbackId,
    committed: bool,
}

impl Drop for PendingCallback<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.session.remove_callback(self.id);
            self.session.sync_notify_bits_detached();
        }
    }
}

// ============================================================================
// Connection Setup
// ============================================================================

async fn connect(addr: &str) -> Result<TcpStream, ConnectionError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| ConnectionError::Unreachable {
            addr: addr.to_string(),
            source,
        })?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Opens the command socket and the notification socket and performs the
/// `NOIB` handshake on the latter.
async fn connect_pair(addr: &str) -> Result<(TcpStream, TcpStream, u32), ConnectionError> {
    let command = connect(addr).await?;
    let mut notify = connect(addr).await?;

    let request = CommandFrame::notify_open_in_band();
    notify.write_all(&request.encode()).await?;
    let response = read_response(&mut notify).await?;
    let handle = response
        .status()
        .map_err(|source| ConnectionError::Rejected {
            addr: addr.to_string(),
            source,
        })?;

    Ok((command, notify, handle))
}

async fn read_response<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<ResponseFrame> {
    let mut buf = [0u8; COMMAND_LEN];
    reader.read_exact(&mut buf).await?;
    ResponseFrame::decode(&buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

async fn exchange(stream: &mut TcpStream, frame: &CommandFrame) -> io::Result<ResponseFrame> {
    stream.write_all(&frame.encode()).await?;
    read_response(stream).await
}

// ============================================================================
// Command Actor
// ============================================================================

/// Owns the command socket and processes [`SessionCommand`]s in order.
struct CommandActor {
    stream: TcpStream,
    receiver: mpsc::Receiver<SessionCommand>,
    dispatcher: Arc<Dispatcher>,
    state: Arc<SessionState>,
    notify_handle: u32,
    request_timeout: Duration,
}

impl CommandActor {
    async fn run(mut self) {
        debug!(notify_handle = self.notify_handle, "Command actor starting");

        loop {
            let cmd = tokio::select! {
                biased;
                _ = self.state.stop.cancelled() => None,
                cmd = self.receiver.recv() => cmd,
            };
            match cmd {
                Some(cmd) => self.handle_command(cmd).await,
                None => break,
            }
        }

        if self.state.alive.swap(false, Ordering::AcqRel) {
            self.close_notify().await;
        }
        self.state.stop.cancel();

        // Anything still queued gets SessionLost through the dropped responders.
        self.receiver.close();
        debug!(notify_handle = self.notify_handle, "Command actor stopped");
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Request { frame, respond_to } => {
                let result = self.round_trip(frame).await;
                // Ignore send error - the requester may have given up
                let _ = respond_to.send(result);
            }
            SessionCommand::SyncNotifyBits { respond_to } => {
                let bits = self.dispatcher.monitor_bits();
                let result = self
                    .round_trip(CommandFrame::notify_begin(self.notify_handle, bits))
                    .await
                    .map(|_| bits);
                match respond_to {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            warn!(error = %err, bits, "Notification mask update failed");
                        }
                    }
                }
            }
        }
    }

    /// Writes one frame and reads its response.
    ///
    /// A timeout or I/O failure leaves the socket out of step with the
    /// daemon, so the session is marked lost.
    async fn round_trip(&mut self, frame: CommandFrame) -> Result<u32, RequestError> {
        let command = frame.command;
        if !self.state.is_alive() {
            return Err(RequestError::SessionLost);
        }

        let exchange = exchange(&mut self.stream, &frame);
        let response = match timeout(self.request_timeout, exchange).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(command = %command, error = %err, "pigpio command socket failed");
                self.state.mark_lost();
                return Err(RequestError::SessionLost);
            }
            Err(_) => {
                warn!(command = %command, timeout = ?self.request_timeout, "pigpio command timed out");
                self.state.mark_lost();
                return Err(RequestError::Timeout { command });
            }
        };

        trace!(command = %command, p1 = frame.p1, p2 = frame.p2, result = response.result, "Round trip");

        if command.returns_raw_word() {
            return Ok(response.result);
        }
        response
            .status()
            .map_err(|source| RequestError::Daemon { command, source })
    }

    /// Best-effort `NC` for the notification handle.
    async fn close_notify(&mut self) {
        let frame = CommandFrame::notify_close(self.notify_handle);
        match timeout(self.request_timeout, exchange(&mut self.stream, &frame)).await {
            Ok(Ok(response)) => {
                if let Err(err) = response.status() {
                    debug!(error = %err, "NC rejected");
                }
            }
            Ok(Err(err)) => debug!(error = %err, "NC not delivered"),
            Err(_) => debug!("NC timed out"),
        }
        info!(notify_handle = self.notify_handle, "pigpio session closed");
    }
}

// ============================================================================
// Notification Task
// ============================================================================

/// Reads reports until the session stops or the socket fails.
async fn run_notifications(stream: TcpStream, dispatcher: Arc<Dispatcher>, state: Arc<SessionState>) {
    let mut reader = BufReader::new(stream);
    let mut last_seqno: Option<u16> = None;

    loop {
        let report = tokio::select! {
            _ = state.stop.cancelled() => break,
            result = next_report(&mut reader) => result,
        };

        match report {
            Ok(report) => {
                if let Some(previous) = last_seqno {
                    let missed = missed_between(previous, report.seqno);
                    if missed > 0 {
                        warn!(missed, seqno = report.seqno, "Notification reports dropped");
                    }
                }
                last_seqno = Some(report.seqno);

                if report.flags.is_keep_alive() {
                    trace!("Keep-alive report");
                    continue;
                }
                let delivered = dispatcher.dispatch(&report);
                trace!(seqno = report.seqno, level = report.level, delivered, "Report dispatched");
            }
            Err(err) => {
                if !state.stop.is_cancelled() {
                    warn!(error = %err, "pigpio notification stream closed");
                    state.mark_lost();
                }
                break;
            }
        }
    }

    debug!("Notification task stopped");
}

async fn next_report<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<NotificationReport> {
    let mut buf = [0u8; REPORT_LEN];
    reader.read_exact(&mut buf).await?;
    NotificationReport::decode(&buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
