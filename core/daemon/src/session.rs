//! Pathfinder session: connection, handshake, read loop and reconnects.
//!
//! The read loop is the only writer of the shared selector state. Writes to
//! the panel go through `SessionHandle`, which the watchdog also holds so it
//! can resubscribe on the live connection.

use chrono::{DateTime, Utc};
use saemubox_protocol::{decode_line, trim_line, Command, Event, ProtocolError, MAX_LINE_BYTES};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::backoff::ReconnectBackoff;
use crate::config::PathfinderConfig;
use crate::error::BridgeError;
use crate::onair::OnAirSwitch;
use crate::state::SharedState;
use crate::watchdog::Resubscribe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Handshaking,
    Streaming,
    Failed,
}

/// Write side of the current Pathfinder connection.
pub struct SessionHandle {
    device: String,
    writer: Mutex<Option<TcpStream>>,
}

impl SessionHandle {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            writer: Mutex::new(None),
        }
    }

    fn attach(&self, stream: TcpStream) {
        if let Ok(mut writer) = self.writer.lock() {
            *writer = Some(stream);
        }
    }

    fn detach(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            *writer = None;
        }
    }

    /// Writes the commands back to back while holding the writer lock, so a
    /// resubscribe never interleaves with the handshake.
    pub fn send(&self, commands: &[Command]) -> io::Result<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "session writer lock poisoned"))?;
        let stream = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no Pathfinder connection"))?;
        for command in commands {
            debug!(command = %command.redacted(), "Writing to Pathfinder");
            stream.write_all(command.encode().as_bytes())?;
        }
        stream.flush()
    }
}

impl Resubscribe for SessionHandle {
    fn resubscribe(&self) -> io::Result<()> {
        self.send(&Command::resubscribe(&self.device))
    }
}

/// Applies classified events to the shared state and drives the on-air flag.
pub struct EventProcessor<S> {
    state: Arc<SharedState>,
    on_air: S,
    active: bool,
}

impl<S: OnAirSwitch> EventProcessor<S> {
    pub fn new(state: Arc<SharedState>, on_air: S) -> Self {
        Self {
            state,
            on_air,
            active: false,
        }
    }

    /// Records selector updates and calls the on-air switch only when the
    /// active flag flips.
    pub fn handle(&mut self, event: Event, now: DateTime<Utc>) {
        let Event::SelectorUpdate { selector, active } = event else {
            return;
        };
        if !self.state.record(selector, now) {
            return;
        }
        if active != self.active {
            self.active = active;
            info!(selector = %selector, on_air = active, "Studio source changed");
            let outcome = self.on_air.set_on_air(active);
            if !outcome.is_clean() {
                debug!(?outcome, "On-air update incomplete");
            }
        }
    }
}

/// Why a single connection ended.
#[derive(Debug)]
pub struct Disconnect {
    pub streamed: bool,
    pub cause: io::Error,
}

pub struct PathfinderSession<S> {
    config: PathfinderConfig,
    handle: Arc<SessionHandle>,
    processor: EventProcessor<S>,
    phase: SessionPhase,
}

impl<S: OnAirSwitch> PathfinderSession<S> {
    pub fn new(
        config: PathfinderConfig,
        handle: Arc<SessionHandle>,
        processor: EventProcessor<S>,
    ) -> Self {
        Self {
            config,
            handle,
            processor,
            phase: SessionPhase::Connecting,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            info!(from = ?self.phase, to = ?phase, "Pathfinder session phase");
            self.phase = phase;
        }
    }

    /// Runs sessions until authentication fails or reconnects are exhausted.
    pub fn run(&mut self, mut backoff: ReconnectBackoff) -> Result<(), BridgeError> {
        loop {
            let disconnect = self.run_once()?;
            self.handle.detach();
            self.set_phase(SessionPhase::Failed);
            if disconnect.streamed {
                backoff.reset();
            }

            match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        error = %disconnect.cause,
                        attempt = backoff.attempts(),
                        delay_secs = delay.as_secs(),
                        "Pathfinder connection lost; reconnecting"
                    );
                    thread::sleep(delay);
                }
                None => {
                    return Err(BridgeError::TransportRead {
                        attempts: backoff.attempts(),
                        source: disconnect.cause,
                    });
                }
            }
        }
    }

    /// One connect, handshake and read loop. Transport failures come back as
    /// `Ok(Disconnect)`; only a rejected login is an error.
    pub fn run_once(&mut self) -> Result<Disconnect, BridgeError> {
        self.set_phase(SessionPhase::Connecting);
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let stream = match connect_tcp(&self.config.address, connect_timeout) {
            Ok(stream) => stream,
            Err(cause) => {
                return Ok(Disconnect {
                    streamed: false,
                    cause,
                })
            }
        };
        info!(address = %self.config.address, "Connected to Pathfinder");

        let prepared = stream
            .set_read_timeout(self.config.read_timeout_secs.map(Duration::from_secs))
            .and_then(|_| stream.try_clone());
        match prepared {
            Ok(writer) => self.handle.attach(writer),
            Err(cause) => {
                return Ok(Disconnect {
                    streamed: false,
                    cause,
                })
            }
        }

        self.set_phase(SessionPhase::Handshaking);
        let handshake = Command::handshake(&self.config.credential, &self.config.device);
        if let Err(cause) = self.handle.send(&handshake) {
            return Ok(Disconnect {
                streamed: false,
                cause,
            });
        }

        self.read_loop(BufReader::new(stream))
    }

    fn read_loop<R: BufRead>(&mut self, mut reader: R) -> Result<Disconnect, BridgeError> {
        info!("Waiting for Pathfinder data");
        let mut streamed = false;
        let mut buffer = Vec::with_capacity(MAX_LINE_BYTES);

        loop {
            if let Err(cause) = read_frame(&mut reader, &mut buffer) {
                return Ok(Disconnect { streamed, cause });
            }
            info!(line = %trim_line(&buffer), "Received Pathfinder data");

            match decode_line(&buffer) {
                Ok(None) => {}
                Ok(Some(Event::LoginAck)) => {
                    streamed = true;
                    self.set_phase(SessionPhase::Streaming);
                }
                Ok(Some(event)) => self.processor.handle(event, Utc::now()),
                Err(ProtocolError::LoginRejected) => {
                    error!(device = %self.config.device, "Pathfinder rejected the login");
                    self.handle.detach();
                    self.set_phase(SessionPhase::Failed);
                    return Err(BridgeError::Authentication);
                }
            }
        }
    }
}

/// Reads one delimited line into `buffer`. EOF and over-long lines are errors.
fn read_frame<R: BufRead>(reader: &mut R, buffer: &mut Vec<u8>) -> io::Result<()> {
    buffer.clear();
    let read = reader
        .by_ref()
        .take(MAX_LINE_BYTES as u64 + 1)
        .read_until(b'\n', buffer)?;
    if read == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "Pathfinder closed the connection",
        ));
    }
    if buffer.len() > MAX_LINE_BYTES && buffer.last() != Some(&b'\n') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Pathfinder line exceeded {} bytes", MAX_LINE_BYTES),
        ));
    }
    Ok(())
}

/// Connects to the first resolved address that accepts within `timeout`.
pub fn connect_tcp(address: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in address.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{} did not resolve", address),
        )
    }))
}
