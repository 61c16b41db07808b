//! Packet Router.
//!
//! Classifies inbound datagrams by their 1-byte type tag and routes
//! payloads into ring buffers or control handlers. Runs on the mixer
//! thread during the pump phase — the registry is never shared with the
//! network thread.

use std::net::SocketAddr;
use std::time::Instant;

use log::warn;

use crate::config::MixerConfig;
use crate::protocol::{Header, InjectAudioPacket, MicAudioPacket, PacketType, ParseError, PingPacket};
use crate::registry::NodeRegistry;
use crate::source::PositionalSource;
use crate::stats::MixerStats;

/// A fire-and-forget action for the caller to take after routing one
/// packet — currently only used for ping replies, which must be sent back
/// to the peer outside the router's own borrow of the registry.
pub enum RouterAction {
    None,
    SendPingReply { to: SocketAddr, timestamp: u64 },
}

pub fn route(
    registry: &mut NodeRegistry,
    config: &MixerConfig,
    stats: &MixerStats,
    data: &[u8],
    from: SocketAddr,
    now: Instant,
) -> RouterAction {
    let Some((header, body)) = Header::parse(data) else {
        MixerStats::inc(&stats.malformed_dropped);
        return RouterAction::None;
    };

    match header.kind {
        PacketType::MicAudioNoEcho | PacketType::MicAudioWithEcho => {
            handle_mic_audio(registry, config, stats, header.kind, body, from, now)
        }
        PacketType::InjectAudio => handle_inject_audio(registry, config, stats, body, from, now),
        PacketType::Ping => handle_ping(registry, stats, body, from, now),
        PacketType::PingReply => {
            touch_and_promote(registry, stats, from, now);
            RouterAction::None
        }
        PacketType::MixedAudio | PacketType::Other(_) => {
            // Non-mixer node-protocol traffic; delegated elsewhere and
            // ignored here.
            RouterAction::None
        }
    }
}

fn handle_mic_audio(
    registry: &mut NodeRegistry,
    config: &MixerConfig,
    stats: &MixerStats,
    kind: PacketType,
    body: &[u8],
    from: SocketAddr,
    now: Instant,
) -> RouterAction {
    let packet = match MicAudioPacket::parse(kind, body, config.frames_per_channel) {
        Ok(p) => p,
        Err(_) => {
            MixerStats::inc(&stats.malformed_dropped);
            return RouterAction::None;
        }
    };

    let node = registry.lookup_or_create(packet.uuid, now);
    node.last_heard = now;
    node.loopback_self = packet.echo;

    let mic = node.microphone.get_or_insert_with(|| {
        PositionalSource::new_microphone(config.ring_capacity(), config.frames_per_channel)
    });

    let orientation = glam::Quat::from_rotation_y((-packet.yaw_degrees).to_radians());
    mic.set_geometry(packet.position, orientation);
    match mic.write_pcm(&packet.pcm) {
        Ok(report) if report.overran => MixerStats::inc(&stats.overruns),
        Ok(_) => {}
        Err(_err) => {
            MixerStats::inc(&stats.malformed_dropped);
            return RouterAction::None;
        }
    }

    promote_if_needed(registry, stats, &packet.uuid, from);
    RouterAction::None
}

fn handle_inject_audio(
    registry: &mut NodeRegistry,
    config: &MixerConfig,
    stats: &MixerStats,
    body: &[u8],
    from: SocketAddr,
    now: Instant,
) -> RouterAction {
    let packet = match InjectAudioPacket::parse(body, config.frames_per_channel) {
        Ok(p) => p,
        Err(ParseError::TooShort) | Err(ParseError::NonFiniteFloat) | Err(ParseError::MalformedPayload) => {
            MixerStats::inc(&stats.malformed_dropped);
            return RouterAction::None;
        }
    };

    let node = registry.lookup_or_create(packet.uuid, now);
    node.last_heard = now;

    // Upsert by (UUID, injector-id): create on first sight.
    let injector = node.injectors.entry(packet.injector_id).or_insert_with(|| {
        PositionalSource::new_injector(config.ring_capacity(), config.frames_per_channel)
    });
    injector.set_geometry(packet.position, packet.orientation);
    injector.set_injector_params(packet.radius, packet.attenuation_ratio);
    match injector.write_pcm(&packet.pcm) {
        Ok(report) if report.overran => MixerStats::inc(&stats.overruns),
        Ok(_) => {}
        Err(_err) => {
            MixerStats::inc(&stats.malformed_dropped);
            return RouterAction::None;
        }
    }

    promote_if_needed(registry, stats, &packet.uuid, from);
    RouterAction::None
}

fn handle_ping(
    registry: &mut NodeRegistry,
    stats: &MixerStats,
    body: &[u8],
    from: SocketAddr,
    now: Instant,
) -> RouterAction {
    MixerStats::inc(&stats.pings_received);
    let ping = match PingPacket::parse(body) {
        Ok(p) => p,
        Err(_) => {
            MixerStats::inc(&stats.malformed_dropped);
            return RouterAction::None;
        }
    };
    touch_and_promote(registry, stats, from, now);
    RouterAction::SendPingReply {
        to: from,
        timestamp: ping.timestamp,
    }
}

fn touch_and_promote(registry: &mut NodeRegistry, stats: &MixerStats, from: SocketAddr, now: Instant) {
    if let Some(uuid) = registry.find_by_address(from) {
        let _ = registry.touch(&uuid, now);
        let _ = registry.bind_address(&uuid, from);
        let _ = stats; // reserved for future ping-specific counters
    }
}

/// Touches liveness and, if the sender's address is not yet the node's
/// active address, promotes it: a successful audio packet always refreshes
/// liveness, and the first address a node is heard from becomes its
/// standing active address.
fn promote_if_needed(registry: &mut NodeRegistry, stats: &MixerStats, uuid: &uuid::Uuid, from: SocketAddr) {
    match registry.bind_address(uuid, from) {
        Ok(_) => {}
        Err(_) => {
            warn!(target: "audio_mixer", "bind_address on unknown node {uuid}");
            MixerStats::inc(&stats.malformed_dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use uuid::Uuid;

    fn test_config() -> MixerConfig {
        MixerConfig {
            sample_rate: 24000,
            frames_per_channel: 4,
            jitter_buffer_ms: 12,
            silent_node_timeout_ms: 5000,
            ping_interval_ms: 1000,
            domain_server_address: None,
            listen_port: 0,
            inbound_queue_capacity: 16,
            max_packets_per_tick: 16,
            checkin_interval_ms: 1000,
            liveness_tick_ms: 1000,
        }
    }

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 4000))
    }

    fn mic_audio_packet(uuid: Uuid, frames: usize) -> Vec<u8> {
        let mut buf = vec![PacketType::MicAudioNoEcho.tag(), crate::protocol::PROTOCOL_VERSION];
        buf.extend_from_slice(uuid.as_bytes());
        buf.extend_from_slice(&0.0f32.to_le_bytes());
        buf.extend_from_slice(&0.0f32.to_le_bytes());
        buf.extend_from_slice(&0.0f32.to_le_bytes());
        buf.extend_from_slice(&0.0f32.to_le_bytes());
        for i in 0..frames {
            buf.extend_from_slice(&(i as i16).to_le_bytes());
        }
        buf
    }

    #[test]
    fn mic_audio_creates_node_and_writes_pcm() {
        let mut registry = NodeRegistry::new();
        let config = test_config();
        let stats = MixerStats::new();
        let uuid = Uuid::from_bytes([9u8; 16]);
        let now = Instant::now();

        let packet = mic_audio_packet(uuid, config.frames_per_channel);
        route(&mut registry, &config, &stats, &packet, addr(), now);

        let node = registry.get(&uuid).unwrap();
        assert!(node.microphone.is_some());
        assert_eq!(node.active_addr, Some(addr()));
        assert_eq!(MixerStats::get(&stats.malformed_dropped), 0);
    }

    #[test]
    fn unrecognized_type_tag_is_ignored_not_dropped() {
        let mut registry = NodeRegistry::new();
        let config = test_config();
        let stats = MixerStats::new();
        let buf = vec![200u8, 1u8, 0, 0, 0];
        route(&mut registry, &config, &stats, &buf, addr(), Instant::now());
        assert_eq!(MixerStats::get(&stats.malformed_dropped), 0);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn malformed_packet_bumps_counter_and_drops() {
        let mut registry = NodeRegistry::new();
        let config = test_config();
        let stats = MixerStats::new();
        let buf = vec![PacketType::MicAudioNoEcho.tag(), crate::protocol::PROTOCOL_VERSION];
        route(&mut registry, &config, &stats, &buf, addr(), Instant::now());
        assert_eq!(MixerStats::get(&stats.malformed_dropped), 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn ring_overrun_bumps_counter_instead_of_dropping() {
        let mut registry = NodeRegistry::new();
        let config = test_config();
        let stats = MixerStats::new();
        let uuid = Uuid::from_bytes([10u8; 16]);
        let now = Instant::now();

        // ring_capacity() = 10 * frames_per_channel; 11 packets of one frame
        // each overruns on the last write without ever yielding a parse error.
        let packet = mic_audio_packet(uuid, config.frames_per_channel);
        for _ in 0..11 {
            route(&mut registry, &config, &stats, &packet, addr(), now);
        }

        assert_eq!(MixerStats::get(&stats.malformed_dropped), 0);
        assert_eq!(MixerStats::get(&stats.overruns), 1);
    }

    #[test]
    fn ping_triggers_reply_action() {
        let mut registry = NodeRegistry::new();
        let config = test_config();
        let stats = MixerStats::new();
        let mut buf = vec![PacketType::Ping.tag(), crate::protocol::PROTOCOL_VERSION];
        buf.extend_from_slice(&42u64.to_le_bytes());
        let action = route(&mut registry, &config, &stats, &buf, addr(), Instant::now());
        match action {
            RouterAction::SendPingReply { to, timestamp } => {
                assert_eq!(to, addr());
                assert_eq!(timestamp, 42);
            }
            RouterAction::None => panic!("expected a ping reply action"),
        }
    }
}
