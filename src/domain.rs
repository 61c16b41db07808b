//! Domain-server check-in.
//!
//! The real domain/directory server and its node-roster protocol are out
//! of scope for this crate; this module only emits the periodic heartbeat
//! that announces the mixer's presence.

use std::net::SocketAddr;

use log::{debug, warn};

use crate::net::MixerSocket;

/// A minimal heartbeat payload: this mixer's own listen port, so the
/// domain server can record where to route clients.
fn heartbeat_payload(listen_port: u16) -> Vec<u8> {
    let mut buf = vec![crate::protocol::PacketType::Other(0).tag(), crate::protocol::PROTOCOL_VERSION];
    buf.extend_from_slice(&listen_port.to_le_bytes());
    buf
}

pub trait DomainClient: Send {
    fn check_in(&self, socket: &MixerSocket);
}

/// Sends a heartbeat datagram to a configured domain-server address. A
/// failed send is logged and retried on the next liveness tick rather than
/// treated as fatal — control traffic rides the liveness timer's own
/// cadence instead of an ack layer.
pub struct UdpDomainClient {
    domain_server_address: SocketAddr,
    listen_port: u16,
}

impl UdpDomainClient {
    pub fn new(domain_server_address: SocketAddr, listen_port: u16) -> Self {
        Self {
            domain_server_address,
            listen_port,
        }
    }
}

impl DomainClient for UdpDomainClient {
    fn check_in(&self, socket: &MixerSocket) {
        let payload = heartbeat_payload(self.listen_port);
        match socket.send_to(&payload, self.domain_server_address) {
            Ok(_) => debug!(target: "audio_mixer", "checked in with domain server at {}", self.domain_server_address),
            Err(err) => warn!(target: "audio_mixer", "domain server check-in failed: {err}"),
        }
    }
}

/// No domain server configured: check-in is a no-op.
pub struct NullDomainClient;

impl DomainClient for NullDomainClient {
    fn check_in(&self, _socket: &MixerSocket) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_payload_carries_listen_port() {
        let payload = heartbeat_payload(48100);
        let port = u16::from_le_bytes([payload[2], payload[3]]);
        assert_eq!(port, 48100);
    }
}
