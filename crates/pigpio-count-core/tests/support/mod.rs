//! In-process stand-in for `pigpiod`.
//!
//! Speaks the subset of the socket protocol the counter uses, keeps a
//! virtual level word for GPIO 0-31 and streams reports to every open
//! notification handle whose mask covers a pin that changed.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pigpio_count_core::DaemonConfig;
use pigpio_wire::{CommandCode, CommandFrame, NotificationReport, ResponseFrame, COMMAND_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Version the fake reports for `PIGPV`.
pub const FAKE_VERSION: u32 = 79;

/// Longest glitch filter the daemon accepts, in microseconds.
const MAX_GLITCH_US: u32 = 300_000;

/// Default wait used by [`wait_until`].
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Fake Daemon
// ============================================================================

struct Notifier {
    socket: u64,
    bits: u32,
    seqno: u16,
    out: mpsc::UnboundedSender<Vec<u8>>,
}

#[derive(Default)]
struct FakeState {
    levels: u32,
    tick: u32,
    next_handle: u32,
    next_socket: u64,
    open_sockets: usize,
    notifiers: HashMap<u32, Notifier>,
    failures: HashMap<CommandCode, i32>,
    glitch_filters: HashMap<u32, u32>,
    received: Vec<CommandFrame>,
    /// Cancelled by `disconnect_all`, then replaced.
    kick: CancellationToken,
}

pub struct FakeDaemon {
    addr: SocketAddr,
    state: Arc<Mutex<FakeState>>,
    shutdown: CancellationToken,
}

impl FakeDaemon {
    /// Binds on an ephemeral localhost port and starts accepting.
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake daemon");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(Mutex::new(FakeState::default()));
        let shutdown = CancellationToken::new();

        let accept_state = Arc::clone(&state);
        let accept_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_shutdown.cancelled() => break,
                    accepted = listener.accept() => {
                        if let Ok((stream, _)) = accepted {
                            tokio::spawn(serve(stream, Arc::clone(&accept_state), accept_shutdown.clone()));
                        }
                    }
                }
            }
        });

        Self {
            addr,
            state,
            shutdown,
        }
    }

    /// Client config pointing at this fake, with short timeouts.
    pub fn config(&self) -> DaemonConfig {
        DaemonConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_millis(500),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake state lock")
    }

    /// Drives `pin` to `high`, reporting to every handle watching it.
    pub fn set_level(&self, pin: u32, high: bool) {
        let mut state = self.lock();
        let mask = 1u32 << pin;
        let levels = if high {
            state.levels | mask
        } else {
            state.levels & !mask
        };
        if levels == state.levels {
            return;
        }
        state.levels = levels;
        state.tick = state.tick.wrapping_add(100);
        let tick = state.tick;

        for notifier in state.notifiers.values_mut() {
            if notifier.bits & mask == 0 {
                continue;
            }
            notifier.seqno = notifier.seqno.wrapping_add(1);
            let report = NotificationReport::level_change(notifier.seqno, tick, levels);
            let _ = notifier.out.send(report.encode().to_vec());
        }
    }

    /// `count` full low-high-low cycles on `pin`.
    pub fn pulse(&self, pin: u32, count: usize) {
        for _ in 0..count {
            self.set_level(pin, true);
            self.set_level(pin, false);
        }
    }

    /// Makes every later `command` fail with `status`.
    pub fn fail_command(&self, command: CommandCode, status: i32) {
        self.lock().failures.insert(command, status);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Closes every open socket. New connections are still accepted.
    pub fn disconnect_all(&self) {
        let mut state = self.lock();
        state.kick.cancel();
        state.kick = CancellationToken::new();
    }

    /// Union of the masks of all open notification handles.
    pub fn notify_bits(&self) -> u32 {
        self.lock().notifiers.values().fold(0, |bits, n| bits | n.bits)
    }

    /// Number of open notification handles.
    pub fn open_handles(&self) -> usize {
        self.lock().notifiers.len()
    }

    pub fn open_sockets(&self) -> usize {
        self.lock().open_sockets
    }

    pub fn glitch_filter(&self, pin: u32) -> Option<u32> {
        self.lock().glitch_filters.get(&pin).copied()
    }

    /// How many times `command` was received.
    pub fn received(&self, command: CommandCode) -> usize {
        self.lock()
            .received
            .iter()
            .filter(|frame| frame.command == command)
            .count()
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Serves one client socket until it closes or the fake shuts down.
async fn serve(stream: TcpStream, state: Arc<Mutex<FakeState>>, shutdown: CancellationToken) {
    let (mut reader, mut writer) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let (socket, kick) = {
        let mut state = state.lock().expect("fake state lock");
        state.next_socket += 1;
        state.open_sockets += 1;
        (state.next_socket, state.kick.clone())
    };

    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = out_rx.recv().await {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut buf = [0u8; COMMAND_LEN];
    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = kick.cancelled() => break,
            read = reader.read_exact(&mut buf) => read,
        };
        if read.is_err() {
            break;
        }
        let Ok(frame) = CommandFrame::decode(&buf) else {
            break;
        };
        let response = {
            let mut state = state.lock().expect("fake state lock");
            handle_command(&mut state, socket, &frame, &out_tx)
        };
        let _ = out_tx.send(response.encode().to_vec());
    }

    {
        let mut state = state.lock().expect("fake state lock");
        state.notifiers.retain(|_, n| n.socket != socket);
        state.open_sockets -= 1;
    }
    drop(out_tx);
    writer_task.abort();
}

fn handle_command(
    state: &mut FakeState,
    socket: u64,
    frame: &CommandFrame,
    out: &mpsc::UnboundedSender<Vec<u8>>,
) -> ResponseFrame {
    state.received.push(*frame);

    if let Some(status) = state.failures.get(&frame.command) {
        return ResponseFrame::with_status(frame, *status);
    }

    let status: i64 = match frame.command {
        CommandCode::NotifyOpenInBand => {
            let handle = state.next_handle;
            state.next_handle += 1;
            state.notifiers.insert(
                handle,
                Notifier {
                    socket,
                    bits: 0,
                    seqno: 0,
                    out: out.clone(),
                },
            );
            i64::from(handle)
        }
        CommandCode::NotifyBegin => match state.notifiers.get_mut(&frame.p1) {
            Some(notifier) => {
                notifier.bits = frame.p2;
                0
            }
            None => -25,
        },
        CommandCode::NotifyClose => match state.notifiers.remove(&frame.p1) {
            Some(_) => 0,
            None => -25,
        },
        CommandCode::ReadBank1 => i64::from(state.levels),
        CommandCode::DaemonVersion => i64::from(FAKE_VERSION),
        CommandCode::HardwareVersion => 0x00a0_2082,
        CommandCode::GlitchFilter => {
            if frame.p1 > 31 {
                -2
            } else if frame.p2 > MAX_GLITCH_US {
                -125
            } else {
                state.glitch_filters.insert(frame.p1, frame.p2);
                0
            }
        }
    };

    ResponseFrame::for_request(frame, status as u32)
}

// ============================================================================
// Helpers
// ============================================================================

/// Polls `condition` until it holds or [`WAIT_TIMEOUT`] passes.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let start = Instant::now();
    while start.elapsed() < WAIT_TIMEOUT {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}
