//! On-air flag control for the playout engine.
//!
//! Every transition opens a fresh connection to the control socket, sends the
//! templated command, reads one line, sends `quit`, reads one line and closes.
//! Failures are logged and never propagate: the read loop must keep going.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{ControlAddress, OnAirConfig, TEMPLATE_PLACEHOLDER};
use crate::error::{ConfigError, DownstreamError};
use crate::session::connect_tcp;

const QUIT_COMMAND: &str = "quit\n";
const MAX_RESPONSE_BYTES: u64 = 4096;

/// Receives on-air transitions from the Pathfinder read loop.
pub trait OnAirSwitch {
    fn set_on_air(&self, on_air: bool) -> OnAirOutcome;
}

#[derive(Debug)]
pub enum OnAirOutcome {
    Disabled,
    Unreachable(DownstreamError),
    Completed {
        response: Option<String>,
        failures: Vec<DownstreamError>,
    },
}

impl OnAirOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, OnAirOutcome::Completed { failures, .. } if failures.is_empty())
    }
}

pub struct OnAirController {
    /// `None` while the controller is disabled.
    address: Option<ControlAddress>,
    template: String,
    timeout: Duration,
}

impl OnAirController {
    pub fn from_config(config: &OnAirConfig) -> Result<Self, ConfigError> {
        let address = if config.enabled {
            Some(ControlAddress::parse(&config.address)?)
        } else {
            None
        };
        Ok(Self {
            address,
            template: config.command_template.clone(),
            timeout: config.timeout(),
        })
    }

    fn connect(&self, address: &ControlAddress) -> Result<ControlStream, DownstreamError> {
        let stream = match address {
            ControlAddress::Unix(path) => {
                let stream = UnixStream::connect(path)
                    .map_err(|err| DownstreamError::from_io("connect", err))?;
                stream
                    .set_read_timeout(Some(self.timeout))
                    .and_then(|_| stream.set_write_timeout(Some(self.timeout)))
                    .map_err(|err| DownstreamError::from_io("configure", err))?;
                ControlStream::Unix(stream)
            }
            ControlAddress::Tcp(address) => {
                let stream = connect_tcp(address, self.timeout)
                    .map_err(|err| DownstreamError::from_io("connect", err))?;
                stream
                    .set_read_timeout(Some(self.timeout))
                    .and_then(|_| stream.set_write_timeout(Some(self.timeout)))
                    .map_err(|err| DownstreamError::from_io("configure", err))?;
                ControlStream::Tcp(stream)
            }
        };
        Ok(stream)
    }
}

impl OnAirSwitch for OnAirController {
    fn set_on_air(&self, on_air: bool) -> OnAirOutcome {
        let Some(address) = &self.address else {
            return OnAirOutcome::Disabled;
        };

        let command = render_command(&self.template, on_air);
        let stream = match self.connect(address) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, ?address, "Failed to reach on-air control socket");
                return OnAirOutcome::Unreachable(err);
            }
        };

        let mut session = BufReader::new(stream);
        let mut failures = Vec::new();

        let response = match exchange(&mut session, &command, "command") {
            Ok(line) => {
                info!(on_air, response = %line, "On-air flag sent");
                Some(line)
            }
            Err(err) => {
                warn!(error = %err, on_air, "On-air command failed");
                failures.push(err);
                None
            }
        };

        if let Err(err) = exchange(&mut session, QUIT_COMMAND, "quit") {
            warn!(error = %err, "On-air control socket quit failed");
            failures.push(err);
        }

        OnAirOutcome::Completed { response, failures }
    }
}

pub fn render_command(template: &str, on_air: bool) -> String {
    let payload = if on_air { "True" } else { "False" };
    let mut command = template.replacen(TEMPLATE_PLACEHOLDER, payload, 1);
    if !command.ends_with('\n') {
        command.push('\n');
    }
    command
}

fn exchange(
    session: &mut BufReader<ControlStream>,
    command: &str,
    step: &'static str,
) -> Result<String, DownstreamError> {
    let stream = session.get_mut();
    stream
        .write_all(command.as_bytes())
        .and_then(|_| stream.flush())
        .map_err(|err| DownstreamError::from_io(step, err))?;

    let mut line = String::new();
    let read = session
        .by_ref()
        .take(MAX_RESPONSE_BYTES)
        .read_line(&mut line)
        .map_err(|err| DownstreamError::from_io(step, err))?;
    if read == 0 {
        return Err(DownstreamError::Closed { step });
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

enum ControlStream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Read for ControlStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ControlStream::Unix(stream) => stream.read(buf),
            ControlStream::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for ControlStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ControlStream::Unix(stream) => stream.write(buf),
            ControlStream::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ControlStream::Unix(stream) => stream.flush(),
            ControlStream::Tcp(stream) => stream.flush(),
        }
    }
}
