//! Pathfinder line protocol for the saemubox bridge.
//!
//! The panel speaks a line-oriented ASCII protocol over TCP. This crate turns
//! raw lines into classified events and builds the commands the bridge sends
//! upstream. It performs no I/O, so the daemon and its tests share the exact
//! same wire strings.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::fmt;

/// Longest upstream line accepted before the stream is treated as corrupt.
pub const MAX_LINE_BYTES: usize = 2048;

pub const LINE_DELIMITER: &str = "\r\n";

const LOGIN_SUCCESSFUL: &str = "login successful";
const LOGIN_FAILED: &str = "login failed";

static PIN_IS_LOW: Lazy<Regex> = Lazy::new(|| Regex::new(r"PinState=[lL]").unwrap());

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Pathfinder rejected the login")]
    LoginRejected,
}

/// Studio source selector forwarded to the automation device.
///
/// `Unknown` only means "nothing observed yet" and is never sent downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TargetSelector {
    #[default]
    Unknown = 0,
    Klangbecken = 1,
    StudioLive = 6,
}

impl TargetSelector {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => TargetSelector::Klangbecken,
            6 => TargetSelector::StudioLive,
            _ => TargetSelector::Unknown,
        }
    }

    pub fn is_known(self) -> bool {
        self != TargetSelector::Unknown
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// One classified upstream line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    LoginAck,
    LoginFailure,
    SelectorUpdate {
        selector: TargetSelector,
        active: bool,
    },
}

impl Event {
    /// Selector carried by the event; `Unknown` for login responses.
    pub fn selector(&self) -> TargetSelector {
        match self {
            Event::SelectorUpdate { selector, .. } => *selector,
            Event::LoginAck | Event::LoginFailure => TargetSelector::Unknown,
        }
    }

    /// True only for the line that selects the Klangbecken.
    pub fn is_active_transition(&self) -> bool {
        matches!(self, Event::SelectorUpdate { active: true, .. })
    }
}

/// Strips trailing NUL, CR and LF bytes.
pub fn trim_line(raw: &[u8]) -> Cow<'_, str> {
    let end = raw
        .iter()
        .rposition(|b| !matches!(b, b'\0' | b'\r' | b'\n'))
        .map(|index| index + 1)
        .unwrap_or(0);
    String::from_utf8_lossy(&raw[..end])
}

/// Classifies an already trimmed line.
///
/// Anything that is neither a login response nor an active pin state is
/// reported as studio live. The panel emits more status lines than we know
/// about, so this catch-all can produce spurious `StudioLive` updates.
pub fn classify(line: &str) -> Event {
    match line {
        LOGIN_SUCCESSFUL => Event::LoginAck,
        LOGIN_FAILED => Event::LoginFailure,
        _ if PIN_IS_LOW.is_match(line) => Event::SelectorUpdate {
            selector: TargetSelector::Klangbecken,
            active: true,
        },
        _ => Event::SelectorUpdate {
            selector: TargetSelector::StudioLive,
            active: false,
        },
    }
}

/// Trims and classifies a raw line. Blank lines yield `Ok(None)`.
pub fn decode_line(raw: &[u8]) -> Result<Option<Event>, ProtocolError> {
    let line = trim_line(raw);
    if line.is_empty() {
        return Ok(None);
    }
    match classify(&line) {
        Event::LoginFailure => Err(ProtocolError::LoginRejected),
        event => Ok(Some(event)),
    }
}

/// Commands sent to the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login(String),
    Sub(String),
    Get(String),
    Unsub(String),
}

impl Command {
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Login(_) => "LOGIN",
            Command::Sub(_) => "SUB",
            Command::Get(_) => "GET",
            Command::Unsub(_) => "UNSUB",
        }
    }

    pub fn argument(&self) -> &str {
        match self {
            Command::Login(arg) | Command::Sub(arg) | Command::Get(arg) | Command::Unsub(arg) => {
                arg.as_str()
            }
        }
    }

    pub fn encode(&self) -> String {
        format!("{} {}{}", self.verb(), self.argument(), LINE_DELIMITER)
    }

    /// Login and subscribe sequence sent right after connecting.
    pub fn handshake(credential: &str, device: &str) -> [Command; 3] {
        [
            Command::Login(credential.to_string()),
            Command::Sub(device.to_string()),
            Command::Get(device.to_string()),
        ]
    }

    /// Drops and re-establishes the subscription on a live connection.
    pub fn resubscribe(device: &str) -> [Command; 3] {
        [
            Command::Unsub(device.to_string()),
            Command::Sub(device.to_string()),
            Command::Get(device.to_string()),
        ]
    }

    /// Loggable form; the login credential is masked.
    pub fn redacted(&self) -> String {
        match self {
            Command::Login(_) => "LOGIN ***".to_string(),
            other => format!("{} {}", other.verb(), other.argument()),
        }
    }
}

/// Datagram payload for the automation device. `Unknown` is never sent.
pub fn encode_selector(selector: TargetSelector) -> Option<String> {
    selector
        .is_known()
        .then(|| format!("{}{}", selector, LINE_DELIMITER))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(line: &str) -> (TargetSelector, bool, bool) {
        match decode_line(line.as_bytes()) {
            Ok(Some(event)) => (event.selector(), event.is_active_transition(), false),
            Ok(None) => (TargetSelector::Unknown, false, false),
            Err(_) => (TargetSelector::Unknown, false, true),
        }
    }

    #[test]
    fn login_successful_is_an_ack_without_selector() {
        assert_eq!(classify("login successful"), Event::LoginAck);
        assert_eq!(
            outcome("login successful"),
            (TargetSelector::Unknown, false, false)
        );
    }

    #[test]
    fn login_failed_is_rejected() {
        assert_eq!(
            decode_line(b"login failed\r\n"),
            Err(ProtocolError::LoginRejected)
        );
        assert_eq!(outcome("login failed"), (TargetSelector::Unknown, false, true));
    }

    #[test]
    fn low_pin_selects_klangbecken() {
        assert_eq!(outcome("PinState=l"), (TargetSelector::Klangbecken, true, false));
        assert_eq!(outcome("PinState=L"), (TargetSelector::Klangbecken, true, false));
    }

    #[test]
    fn low_pin_matches_inside_longer_status_lines() {
        let event = classify("Event:GPO 1.2 PinState=lhhhh");
        assert_eq!(event.selector(), TargetSelector::Klangbecken);
    }

    #[test]
    fn anything_else_defaults_to_studio_live() {
        assert_eq!(outcome("PinState=h"), (TargetSelector::StudioLive, false, false));
        assert_eq!(outcome("pinstate=l"), (TargetSelector::StudioLive, false, false));
        assert_eq!(
            outcome("Login Successful"),
            (TargetSelector::StudioLive, false, false)
        );
    }

    #[test]
    fn trim_strips_nul_cr_lf_only_at_the_end() {
        assert_eq!(trim_line(b"login successful\r\n\0\0"), "login successful");
        assert_eq!(trim_line(b" PinState=l\n"), " PinState=l");
        assert_eq!(trim_line(b"\r\n"), "");
        assert_eq!(trim_line(b""), "");
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert_eq!(decode_line(b"\r\n"), Ok(None));
        assert_eq!(decode_line(b"\0\0\0"), Ok(None));
    }

    #[test]
    fn handshake_and_resubscribe_order() {
        let handshake: Vec<String> = Command::handshake("secret", "studio")
            .iter()
            .map(Command::encode)
            .collect();
        assert_eq!(
            handshake,
            vec!["LOGIN secret\r\n", "SUB studio\r\n", "GET studio\r\n"]
        );

        let resubscribe: Vec<String> = Command::resubscribe("studio")
            .iter()
            .map(Command::encode)
            .collect();
        assert_eq!(
            resubscribe,
            vec!["UNSUB studio\r\n", "SUB studio\r\n", "GET studio\r\n"]
        );
    }

    #[test]
    fn login_is_redacted_for_logging() {
        assert_eq!(Command::Login("secret".into()).redacted(), "LOGIN ***");
        assert_eq!(Command::Get("studio".into()).redacted(), "GET studio");
    }

    #[test]
    fn unknown_selector_is_never_encoded() {
        assert_eq!(encode_selector(TargetSelector::Unknown), None);
        assert_eq!(
            encode_selector(TargetSelector::Klangbecken).as_deref(),
            Some("1\r\n")
        );
        assert_eq!(
            encode_selector(TargetSelector::StudioLive).as_deref(),
            Some("6\r\n")
        );
    }

    #[test]
    fn selector_round_trips_through_u8() {
        assert_eq!(TargetSelector::from_u8(1), TargetSelector::Klangbecken);
        assert_eq!(TargetSelector::from_u8(6), TargetSelector::StudioLive);
        assert_eq!(TargetSelector::from_u8(42), TargetSelector::Unknown);
    }
}
