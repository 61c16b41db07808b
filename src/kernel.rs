//! Spatialization Kernel.
//!
//! Computes one source's contribution to one listener's stereo accumulator:
//! distance attenuation, off-axis attenuation, inter-aural phase delay and
//! weak-channel amplitude.

use glam::Vec3;

use crate::source::{PositionalSource, SourceKind};

const GEOMETRIC_AMPLITUDE_SCALAR: f32 = 0.3; // G
const DISTANCE_LOG_BASE: f32 = 2.5; // B
const MIN_OFF_AXIS_ATTENUATION: f32 = 0.2;
const OFF_AXIS_ATTENUATION_STEP: f32 = 0.4;
const PHASE_DELAY_AT_90: f32 = 20.0; // D_max, samples
const WEAK_CHANNEL_AMPLITUDE_AT_90: f32 = 0.5; // W_min

/// Geometric degeneracy threshold: vectors shorter than this are treated
/// as zero-length (coincident positions / undefined direction).
const EPS: f32 = 1e-8;

pub struct ListenerGeometry {
    pub position: Vec3,
    pub orientation: glam::Quat,
}

/// A fully resolved per-sample plan for mixing one source into one listener.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contribution {
    pub attenuation: f32,
    pub delay_samples: usize,
    pub weak: f32,
    pub near_is_left: bool,
}

/// Computes steps 1–6 of the kernel: whether a source contributes at all,
/// and if so its attenuation/delay/weak/channel-routing parameters.
/// Step 7 (the sample loop) is applied separately by the caller, since it
/// needs direct ring-buffer access.
pub fn resolve_contribution(
    source: &PositionalSource,
    is_listeners_own_microphone: bool,
    loopback_self: bool,
    listener: &ListenerGeometry,
) -> Option<Contribution> {
    // Step 1 — self-test.
    if is_listeners_own_microphone && !loopback_self {
        return None;
    }

    let rel = source.position() - listener.position;
    let d2 = rel.length_squared();
    if !d2.is_finite() {
        // Non-finite geometry: zero contribution.
        return None;
    }

    let mut attenuation = 1.0f32;
    let radius = match source.kind() {
        SourceKind::Injector => source.radius(),
        SourceKind::Microphone => 0.0,
    };
    if source.kind() == SourceKind::Injector {
        attenuation *= source.attenuation_ratio();
    }

    if radius > 0.0 && d2 <= radius * radius {
        // Step 2, inside-sphere path: skip attenuation and delay entirely.
        return Some(Contribution {
            attenuation,
            delay_samples: 0,
            weak: 1.0,
            near_is_left: true,
        });
    }

    let rel_degenerate = d2 <= EPS;
    let effective_d2 = if radius > 0.0 {
        // Effective distance is to the sphere boundary; off-axis attenuation
        // does not apply to spherical injectors.
        (d2 - radius * radius).max(0.0)
    } else {
        if !rel_degenerate {
            attenuation *= off_axis_attenuation(source, rel);
        }
        d2
    };

    attenuation *= distance_coefficient(effective_d2);

    let (delay_samples, weak, near_is_left) = if rel_degenerate {
        (0, 1.0, true)
    } else {
        bearing_delay_and_channel(rel, listener)
    };

    Some(Contribution {
        attenuation,
        delay_samples,
        weak,
        near_is_left,
    })
}

fn off_axis_attenuation(source: &PositionalSource, rel: Vec3) -> f32 {
    let dir_to_listener = source.orientation().inverse() * rel;
    if dir_to_listener.length_squared() <= EPS {
        return 1.0;
    }
    let dir_to_listener = dir_to_listener.normalize();
    let cos_theta = Vec3::NEG_Z.dot(dir_to_listener).clamp(-1.0, 1.0);
    let theta_degrees = cos_theta.acos().to_degrees().clamp(0.0, 180.0);
    MIN_OFF_AXIS_ATTENUATION + OFF_AXIS_ATTENUATION_STEP * (theta_degrees / 90.0)
}

/// `distCoef = G^(log_B(B) + 0.5·log_B(d²) − 1)`, clamped to `[0, 1]` since
/// the exponent can exceed 1 for `d² < 1`.
fn distance_coefficient(d2: f32) -> f32 {
    if d2 <= EPS {
        return 1.0;
    }
    let log_base = DISTANCE_LOG_BASE.ln();
    let exponent = (DISTANCE_LOG_BASE.ln() / log_base) + 0.5 * (d2.ln() / log_base) - 1.0;
    GEOMETRIC_AMPLITUDE_SCALAR.powf(exponent).clamp(0.0, 1.0)
}

fn bearing_delay_and_channel(rel: Vec3, listener: &ListenerGeometry) -> (usize, f32, bool) {
    let rel_l = listener.orientation.inverse() * rel;
    let xz = Vec3::new(rel_l.x, 0.0, rel_l.z);
    if xz.length_squared() <= EPS {
        // Directly overhead/underfoot: no left-right difference.
        return (0, 1.0, true);
    }

    // Signed azimuth about the listener's up axis between (0,0,-1) and the
    // normalized bearing; equivalent to glm::orientedAngle(forward, dir, up)
    // for a Y-up, -Z-forward convention. φ > 0 ⇒ source is on the right.
    let phi_radians = xz.x.atan2(-xz.z);

    let k = phi_radians.sin().abs();
    let delay_samples = (PHASE_DELAY_AT_90 * k).round() as usize;
    let weak = 1.0 - (1.0 - WEAK_CHANNEL_AMPLITUDE_AT_90) * k;
    let near_is_left = phi_radians < 0.0;
    (delay_samples, weak, near_is_left)
}

/// Saturating accumulate: widens to `i32`, adds, clamps back to `i16` range.
/// Branch-free on the hot path beyond the unavoidable `clamp`.
#[inline]
pub fn saturating_accumulate(acc: i16, add: f32) -> i16 {
    let sum = acc as i32 + add.round() as i32;
    sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Applies step 7 (the sample loop) for one resolved contribution, adding
/// into `left`/`right` accumulators of length `frames_per_channel`.
pub fn mix_into(
    source: &PositionalSource,
    contribution: Contribution,
    left: &mut [i16],
    right: &mut [i16],
) {
    let frames = left.len();
    debug_assert_eq!(frames, right.len());

    let (near, far): (&mut [i16], &mut [i16]) = if contribution.near_is_left {
        (left, right)
    } else {
        (right, left)
    };

    let mut src = vec![0i16; frames];
    source.ring().read_frame(&mut src);

    let n_delay = contribution.delay_samples;
    let atten = contribution.attenuation;
    let weak = contribution.weak;

    for s in 0..frames {
        if s < n_delay {
            let earlier = source.ring().sample_before_read(n_delay - s);
            far[s] = saturating_accumulate(far[s], earlier as f32 * atten * weak);
        }

        let current = src[s] as f32 * atten;
        near[s] = saturating_accumulate(near[s], current);

        if s + n_delay < frames {
            far[s + n_delay] = saturating_accumulate(far[s + n_delay], current * weak);
        }
    }
}
