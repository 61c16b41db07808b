//! Mix Scheduler.
//!
//! A single-threaded control loop driving one "tick" per output frame
//! period `T`, plus a lower-frequency liveness side loop run on the same
//! thread between ticks. Frame scheduling is absolute — a fixed `startTime`
//! plus an ever-incrementing frame counter, never a relative sleep — so
//! isolated late frames do not slew the long-term cadence.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, info, warn};

use crate::config::MixerConfig;
use crate::domain::DomainClient;
use crate::kernel::{self, ListenerGeometry};
use crate::net::MixerSocket;
use crate::protocol::{self, PacketType, PingPacket};
use crate::registry::NodeRegistry;
use crate::router::{self, RouterAction};
use crate::stats::MixerStats;

struct InboundDatagram {
    data: Vec<u8>,
    from: SocketAddr,
}

/// Owns the registry and drives the frame clock. Not `Clone`/`Sync` —
/// there is exactly one `Mixer`, living on the mixer thread.
pub struct Mixer {
    config: MixerConfig,
    registry: NodeRegistry,
    stats: Arc<MixerStats>,
    socket: MixerSocket,
    domain_client: Box<dyn DomainClient>,
    running: Arc<AtomicBool>,
    inbound_rx: Receiver<InboundDatagram>,
    network_thread: Option<JoinHandle<()>>,
}

impl Mixer {
    pub fn new(
        config: MixerConfig,
        socket: MixerSocket,
        domain_client: Box<dyn DomainClient>,
        stats: Arc<MixerStats>,
    ) -> crate::error::MixerResult<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = crossbeam_channel::bounded(config.inbound_queue_capacity);

        let recv_socket = socket.try_clone()?;
        let network_thread = spawn_network_thread(recv_socket, tx, running.clone(), stats.clone());

        Ok(Self {
            config,
            registry: NodeRegistry::new(),
            stats,
            socket,
            domain_client,
            running,
            inbound_rx: rx,
            network_thread: Some(network_thread),
        })
    }

    /// Shared stop flag; cloning it out lets a separate signal-handling
    /// thread request shutdown without the `Mixer` itself crossing threads.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn run(&mut self) {
        let frame_period = self.config.frame_period();
        let start_time = Instant::now();
        let mut frame_number: u64 = 0;

        let mut next_checkin = start_time + self.config.checkin_interval();
        let mut next_sweep = start_time + self.config.liveness_tick();
        let mut next_ping = start_time + self.config.ping_interval();

        while self.running.load(Ordering::SeqCst) {
            self.pump_inbound();

            for node in self.registry.iter_mut() {
                if let Some(mic) = node.microphone.as_mut() {
                    mic.check_before_frame(self.config.jitter_samples());
                }
                for injector in node.injectors.values_mut() {
                    injector.check_before_frame(self.config.jitter_samples());
                }
            }

            self.mix_and_send_all_listeners();

            // Only a source that actually fed this frame's mix advances its
            // reader; advancing a starved or still-prebuffering source would
            // push `read_next` past `write_end` and falsely look replenished
            // to the next tick's `check_before_frame`.
            for node in self.registry.iter_mut() {
                if let Some(mic) = node.microphone.as_mut() {
                    if mic.started() {
                        mic.advance_frame();
                    }
                }
                for injector in node.injectors.values_mut() {
                    if injector.started() {
                        injector.advance_frame();
                    }
                }
            }

            let now = Instant::now();
            self.run_liveness_if_due(now, &mut next_checkin, &mut next_sweep, &mut next_ping);

            frame_number += 1;
            let next_boundary = start_time + frame_period * frame_number as u32;
            let now = Instant::now();
            if next_boundary > now {
                thread::sleep(next_boundary - now);
            } else {
                MixerStats::inc(&self.stats.deadline_missed);
            }
        }

        // Best-effort final drain before shutdown.
        self.pump_inbound();
        self.shutdown();
    }

    fn pump_inbound(&mut self) {
        let mut pending_replies = Vec::new();
        let now = Instant::now();
        let mut pumped = 0;
        while pumped < self.config.max_packets_per_tick {
            let datagram = match self.inbound_rx.try_recv() {
                Ok(d) => d,
                Err(_) => break,
            };
            let action = router::route(
                &mut self.registry,
                &self.config,
                &self.stats,
                &datagram.data,
                datagram.from,
                now,
            );
            if let RouterAction::SendPingReply { to, timestamp } = action {
                pending_replies.push((to, timestamp));
            }
            pumped += 1;
        }

        for (to, timestamp) in pending_replies {
            let reply = PingPacket { timestamp }.encode(PacketType::PingReply);
            if let Err(err) = self.socket.send_to(&reply, to) {
                debug!(target: "audio_mixer", "ping reply send failed: {err}");
            }
        }
    }

    fn mix_and_send_all_listeners(&mut self) {
        let frames = self.config.frames_per_channel;
        let listener_uuids: Vec<uuid::Uuid> = self
            .registry
            .iter()
            .filter(|n| n.is_listener())
            .map(|n| n.uuid)
            .collect();

        for listener_uuid in listener_uuids {
            let (listener_geometry, loopback_self, active_addr) = {
                let listener = match self.registry.get(&listener_uuid) {
                    Ok(l) => l,
                    Err(_) => continue,
                };
                let mic = match listener.microphone.as_ref() {
                    Some(m) => m,
                    None => continue,
                };
                let addr = match listener.active_addr {
                    Some(a) => a,
                    None => continue,
                };
                (
                    ListenerGeometry {
                        position: mic.position(),
                        orientation: mic.orientation(),
                    },
                    listener.loopback_self,
                    addr,
                )
            };

            let mut left = vec![0i16; frames];
            let mut right = vec![0i16; frames];

            for node in self.registry.iter() {
                let is_listeners_node = node.uuid == listener_uuid;

                if let Some(mic) = node.microphone.as_ref() {
                    if mic.started() {
                        if let Some(contribution) =
                            kernel::resolve_contribution(mic, is_listeners_node, loopback_self, &listener_geometry)
                        {
                            kernel::mix_into(mic, contribution, &mut left, &mut right);
                        }
                    }
                }
                for injector in node.injectors.values() {
                    if injector.started() {
                        if let Some(contribution) =
                            kernel::resolve_contribution(injector, false, false, &listener_geometry)
                        {
                            kernel::mix_into(injector, contribution, &mut left, &mut right);
                        }
                    }
                }
            }

            let datagram = protocol::encode_mixed_audio(&left, &right);
            if let Err(err) = self.socket.send_to(&datagram, active_addr) {
                debug!(target: "audio_mixer", "mixed audio send to {active_addr} failed: {err}");
            }
        }
    }

    fn run_liveness_if_due(
        &mut self,
        now: Instant,
        next_checkin: &mut Instant,
        next_sweep: &mut Instant,
        next_ping: &mut Instant,
    ) {
        if now >= *next_checkin {
            self.domain_client.check_in(&self.socket);
            *next_checkin = now + self.config.checkin_interval();
        }

        if now >= *next_sweep {
            let removed = self.registry.sweep_silent(now, self.config.silent_node_timeout());
            if !removed.is_empty() {
                for uuid in &removed {
                    MixerStats::inc(&self.stats.nodes_evicted);
                    debug!(target: "audio_mixer", "evicted silent node {uuid}");
                }
            }
            *next_sweep = now + self.config.liveness_tick();
        }

        if now >= *next_ping {
            self.ping_inactive_nodes();
            *next_ping = now + self.config.ping_interval();
        }
    }

    fn ping_inactive_nodes(&mut self) {
        let timestamp = now_millis();
        let ping = PingPacket { timestamp }.encode(PacketType::Ping);
        for node in self.registry.iter() {
            if let Some(addr) = node.active_addr {
                if let Err(err) = self.socket.send_to(&ping, addr) {
                    debug!(target: "audio_mixer", "ping send to {addr} failed: {err}");
                }
            }
        }
    }

    fn shutdown(&mut self) {
        info!(target: "audio_mixer", "mixer shutting down");
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.network_thread.take() {
            let _ = handle.join();
        }
    }
}

fn now_millis() -> u64 {
    // Monotonic counter for ping round-trip correlation only; not wall clock.
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    Instant::now().duration_since(start).as_millis() as u64
}

fn spawn_network_thread(
    socket: MixerSocket,
    tx: Sender<InboundDatagram>,
    running: Arc<AtomicBool>,
    stats: Arc<MixerStats>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = vec![0u8; 65536];
        while running.load(Ordering::SeqCst) {
            match socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    MixerStats::inc(&stats.packets_received);
                    let datagram = InboundDatagram {
                        data: buf[..len].to_vec(),
                        from,
                    };
                    match tx.try_send(datagram) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            // Backpressure: stale audio is worthless, drop at
                            // the read site rather than block the socket.
                            MixerStats::inc(&stats.queue_dropped);
                        }
                        Err(TrySendError::Disconnected(_)) => break,
                    }
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(ref err) if err.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(err) => {
                    warn!(target: "audio_mixer", "socket recv error, network thread exiting: {err}");
                    break;
                }
            }
        }
    })
}
