//! Startup configuration.
//!
//! Every option is settable on the command line or via environment
//! variable (`clap`'s `env` feature).

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

/// Frame timing is conceptually fixed per deployment, but kept configurable
/// here so the same binary can be retuned without a rebuild.
#[derive(Parser, Debug, Clone)]
#[command(name = "spatial-mixer", about = "Real-time spatial audio mixing server")]
pub struct MixerConfig {
    /// Samples per second.
    #[arg(long, env = "MIXER_SAMPLE_RATE", default_value_t = 24000)]
    pub sample_rate: u32,

    /// Samples per output channel per frame.
    #[arg(long, env = "MIXER_FRAMES_PER_CHANNEL", default_value_t = 256)]
    pub frames_per_channel: usize,

    /// Jitter prebuffer depth, in milliseconds.
    #[arg(long, env = "MIXER_JITTER_BUFFER_MS", default_value_t = 12)]
    pub jitter_buffer_ms: u32,

    /// Silence timeout before a node is evicted from the registry, in milliseconds.
    #[arg(long, env = "MIXER_SILENT_NODE_TIMEOUT_MS", default_value_t = 5000)]
    pub silent_node_timeout_ms: u64,

    /// Interval between pings of inactive nodes, in milliseconds.
    #[arg(long, env = "MIXER_PING_INTERVAL_MS", default_value_t = 1000)]
    pub ping_interval_ms: u64,

    /// Domain/directory server address used for check-in heartbeats.
    #[arg(long, env = "MIXER_DOMAIN_SERVER_ADDRESS")]
    pub domain_server_address: Option<SocketAddr>,

    /// Local UDP port to listen on.
    #[arg(long, env = "MIXER_LISTEN_PORT", default_value_t = 48100)]
    pub listen_port: u16,

    /// Capacity of the inbound parsed-payload queue, in packets.
    #[arg(long, env = "MIXER_INBOUND_QUEUE_CAPACITY", default_value_t = 4096)]
    pub inbound_queue_capacity: usize,

    /// Maximum number of inbound datagrams pumped per tick, bounding how
    /// long the pump phase can starve the tick (§4.F step 1).
    #[arg(long, env = "MIXER_MAX_PACKETS_PER_TICK", default_value_t = 512)]
    pub max_packets_per_tick: usize,

    /// Domain-server check-in interval, in milliseconds.
    #[arg(long, env = "MIXER_CHECKIN_INTERVAL_MS", default_value_t = 1000)]
    pub checkin_interval_ms: u64,

    /// Cadence of the liveness side loop (sweep / check-in / ping), in milliseconds.
    #[arg(long, env = "MIXER_LIVENESS_TICK_MS", default_value_t = 1000)]
    pub liveness_tick_ms: u64,
}

impl MixerConfig {
    /// Ring buffer capacity `C ≫ F`, here `C = 10·F`.
    pub fn ring_capacity(&self) -> usize {
        self.frames_per_channel * 10
    }

    /// Jitter prebuffer `J` in samples, `J = ⌈J_ms · S / 1000⌉`.
    pub fn jitter_samples(&self) -> usize {
        let samples = (self.jitter_buffer_ms as u64 * self.sample_rate as u64 + 999) / 1000;
        samples as usize
    }

    /// Output frame period `T = F / S`.
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(self.frames_per_channel as f64 / self.sample_rate as f64)
    }

    pub fn silent_node_timeout(&self) -> Duration {
        Duration::from_millis(self.silent_node_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn checkin_interval(&self) -> Duration {
        Duration::from_millis(self.checkin_interval_ms)
    }

    pub fn liveness_tick(&self) -> Duration {
        Duration::from_millis(self.liveness_tick_ms)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.listen_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> MixerConfig {
        MixerConfig {
            sample_rate: 24000,
            frames_per_channel: 256,
            jitter_buffer_ms: 12,
            silent_node_timeout_ms: 5000,
            ping_interval_ms: 1000,
            domain_server_address: None,
            listen_port: 48100,
            inbound_queue_capacity: 4096,
            max_packets_per_tick: 512,
            checkin_interval_ms: 1000,
            liveness_tick_ms: 1000,
        }
    }

    #[test]
    fn jitter_samples_matches_canonical_24khz_example() {
        let cfg = default_config();
        assert_eq!(cfg.jitter_samples(), 288);
    }

    #[test]
    fn ring_capacity_is_ten_times_frame() {
        let cfg = default_config();
        assert_eq!(cfg.ring_capacity(), 2560);
    }
}
