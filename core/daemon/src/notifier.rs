//! UDP forwarding of the current selector to the automation device.

use saemubox_protocol::{encode_selector, TargetSelector};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use tracing::{debug, warn};

use crate::error::DownstreamError;

pub struct TargetNotifier {
    socket: UdpSocket,
    target: SocketAddr,
}

impl TargetNotifier {
    /// Binds an ephemeral local port and connects it to the target.
    pub fn connect(address: &str) -> io::Result<Self> {
        let target = address.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("target address {} did not resolve", address),
            )
        })?;
        let local: SocketAddr = match target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(target)?;
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Sends one datagram. Returns `Ok(false)` when there is nothing to send yet.
    pub fn send(&self, selector: TargetSelector) -> Result<bool, DownstreamError> {
        let Some(payload) = encode_selector(selector) else {
            return Ok(false);
        };
        debug!(target_addr = %self.target, selector = %selector, "Writing to target");
        self.socket
            .send(payload.as_bytes())
            .map_err(|err| DownstreamError::from_io("udp send", err))?;
        Ok(true)
    }

    /// Fire-and-forget send for the ticker; failures are only logged.
    pub fn notify(&self, selector: TargetSelector) {
        if let Err(err) = self.send(selector) {
            warn!(error = %err, target_addr = %self.target, "Failed to notify target");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn receiver() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind receiver");
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("read timeout");
        socket
    }

    #[test]
    fn sends_selector_with_line_delimiter() {
        let receiver = receiver();
        let address = receiver.local_addr().expect("local addr").to_string();
        let notifier = TargetNotifier::connect(&address).expect("connect");

        assert!(notifier.send(TargetSelector::Klangbecken).expect("send"));
        let mut buffer = [0u8; 64];
        let n = receiver.recv(&mut buffer).expect("recv");
        assert_eq!(&buffer[..n], b"1\r\n");

        assert!(notifier.send(TargetSelector::StudioLive).expect("send"));
        let n = receiver.recv(&mut buffer).expect("recv");
        assert_eq!(&buffer[..n], b"6\r\n");
    }

    #[test]
    fn unknown_selector_is_not_sent() {
        let receiver = receiver();
        receiver
            .set_read_timeout(Some(Duration::from_millis(100)))
            .expect("read timeout");
        let address = receiver.local_addr().expect("local addr").to_string();
        let notifier = TargetNotifier::connect(&address).expect("connect");

        assert!(!notifier.send(TargetSelector::Unknown).expect("send"));
        let mut buffer = [0u8; 64];
        assert!(receiver.recv(&mut buffer).is_err());
    }

    #[test]
    fn unresolvable_target_fails_at_connect() {
        assert!(TargetNotifier::connect("not an address").is_err());
    }
}
