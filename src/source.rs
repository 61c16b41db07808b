//! Positional Source.
//!
//! `Microphone` and `Injector` sources share one ring-buffered shape and
//! differ only by a tag plus a couple of injector-only fields, rather than
//! by separate subclasses.

use glam::{Quat, Vec3};

use crate::ring::{AudioRingBuffer, RingBufferError, SourceState, WriteReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Microphone,
    Injector,
}

/// A ring buffer tagged with 3-D position/orientation and source kind.
pub struct PositionalSource {
    ring: AudioRingBuffer,
    position: Vec3,
    orientation: Quat,
    kind: SourceKind,
    /// Injector-only: 0 = point source.
    radius: f32,
    /// Injector-only: gain multiplier in [0, 1].
    attenuation_ratio: f32,
}

impl PositionalSource {
    pub fn new_microphone(capacity: usize, frames_per_channel: usize) -> Self {
        Self {
            ring: AudioRingBuffer::new(capacity, frames_per_channel),
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            kind: SourceKind::Microphone,
            radius: 0.0,
            attenuation_ratio: 1.0,
        }
    }

    pub fn new_injector(capacity: usize, frames_per_channel: usize) -> Self {
        Self {
            ring: AudioRingBuffer::new(capacity, frames_per_channel),
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            kind: SourceKind::Injector,
            radius: 0.0,
            attenuation_ratio: 1.0,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn orientation(&self) -> Quat {
        self.orientation
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn attenuation_ratio(&self) -> f32 {
        self.attenuation_ratio
    }

    /// Router-side ingest of geometry; orientation is normalized here.
    pub fn set_geometry(&mut self, position: Vec3, orientation: Quat) {
        self.position = position;
        self.orientation = crate::protocol::normalize_orientation(orientation);
    }

    pub fn set_injector_params(&mut self, radius: f32, attenuation_ratio: f32) {
        self.radius = radius.max(0.0);
        self.attenuation_ratio = attenuation_ratio.clamp(0.0, 1.0);
    }

    pub fn write_pcm(&mut self, samples: &[i16]) -> Result<WriteReport, RingBufferError> {
        self.ring.write(samples)
    }

    pub fn ring(&self) -> &AudioRingBuffer {
        &self.ring
    }

    pub fn started(&self) -> bool {
        self.ring.started()
    }

    pub fn check_before_frame(&mut self, jitter_samples: usize) {
        self.ring.check_before_frame(jitter_samples);
    }

    pub fn advance_frame(&mut self) {
        self.ring.advance_frame();
    }

    pub fn state(&self, jitter_samples: usize) -> SourceState {
        self.ring.state(jitter_samples)
    }
}

/// Exactly the Microphone source of a node.
pub struct Listener<'a> {
    pub microphone: &'a PositionalSource,
    pub loopback_self: bool,
}

impl<'a> Listener<'a> {
    pub fn position(&self) -> Vec3 {
        self.microphone.position()
    }

    pub fn orientation(&self) -> Quat {
        self.microphone.orientation()
    }
}
