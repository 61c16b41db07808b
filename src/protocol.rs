//! Wire protocol.
//!
//! Every packet begins with a 1-byte type tag and a 1-byte protocol
//! version. All multi-byte fields are little-endian.

use uuid::Uuid;

pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 2;
pub const UUID_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    MicAudioNoEcho,
    MicAudioWithEcho,
    InjectAudio,
    MixedAudio,
    Ping,
    PingReply,
    Other(u8),
}

impl PacketType {
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            1 => PacketType::MicAudioNoEcho,
            2 => PacketType::MicAudioWithEcho,
            3 => PacketType::InjectAudio,
            4 => PacketType::MixedAudio,
            5 => PacketType::Ping,
            6 => PacketType::PingReply,
            other => PacketType::Other(other),
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            PacketType::MicAudioNoEcho => 1,
            PacketType::MicAudioWithEcho => 2,
            PacketType::InjectAudio => 3,
            PacketType::MixedAudio => 4,
            PacketType::Ping => 5,
            PacketType::PingReply => 6,
            PacketType::Other(tag) => tag,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub kind: PacketType,
    pub version: u8,
}

impl Header {
    pub fn parse(data: &[u8]) -> Option<(Self, &[u8])> {
        if data.len() < HEADER_LEN {
            return None;
        }
        let header = Header {
            kind: PacketType::from_tag(data[0]),
            version: data[1],
        };
        Some((header, &data[HEADER_LEN..]))
    }

    pub fn encode(self, buf: &mut Vec<u8>) {
        buf.push(self.kind.tag());
        buf.push(self.version);
    }
}

/// Error returned while parsing a packet body. Every variant is handled by
/// dropping the packet and bumping a counter — this type exists only so the
/// router can log a reason, never to be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    TooShort,
    NonFiniteFloat,
    MalformedPayload,
}

fn read_uuid(data: &[u8]) -> Result<(Uuid, &[u8]), ParseError> {
    if data.len() < UUID_LEN {
        return Err(ParseError::TooShort);
    }
    let mut bytes = [0u8; UUID_LEN];
    bytes.copy_from_slice(&data[..UUID_LEN]);
    Ok((Uuid::from_bytes(bytes), &data[UUID_LEN..]))
}

fn read_f32(data: &[u8]) -> Result<(f32, &[u8]), ParseError> {
    if data.len() < 4 {
        return Err(ParseError::TooShort);
    }
    let v = f32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if !v.is_finite() {
        return Err(ParseError::NonFiniteFloat);
    }
    Ok((v, &data[4..]))
}

fn read_vec3(data: &[u8]) -> Result<(glam::Vec3, &[u8]), ParseError> {
    let (x, data) = read_f32(data)?;
    let (y, data) = read_f32(data)?;
    let (z, data) = read_f32(data)?;
    Ok((glam::Vec3::new(x, y, z), data))
}

/// Body of a `MicAudioNoEcho` / `MicAudioWithEcho` packet.
pub struct MicAudioPacket {
    pub uuid: Uuid,
    pub position: glam::Vec3,
    pub yaw_degrees: f32,
    pub echo: bool,
    pub pcm: Vec<i16>,
}

impl MicAudioPacket {
    pub fn parse(kind: PacketType, data: &[u8], frames_per_channel: usize) -> Result<Self, ParseError> {
        let echo = matches!(kind, PacketType::MicAudioWithEcho);
        let (uuid, data) = read_uuid(data)?;
        let (position, data) = read_vec3(data)?;
        let (yaw_degrees, data) = read_f32(data)?;
        let pcm = parse_pcm(data, frames_per_channel)?;
        Ok(MicAudioPacket {
            uuid,
            position,
            yaw_degrees,
            echo,
            pcm,
        })
    }
}

/// Body of an `InjectAudio` packet.
pub struct InjectAudioPacket {
    pub uuid: Uuid,
    pub injector_id: Uuid,
    pub position: glam::Vec3,
    pub orientation: glam::Quat,
    pub radius: f32,
    pub attenuation_ratio: f32,
    pub pcm: Vec<i16>,
}

impl InjectAudioPacket {
    pub fn parse(data: &[u8], frames_per_channel: usize) -> Result<Self, ParseError> {
        let (uuid, data) = read_uuid(data)?;
        let (injector_id, data) = read_uuid(data)?;
        let (position, data) = read_vec3(data)?;
        let (qx, data) = read_f32(data)?;
        let (qy, data) = read_f32(data)?;
        let (qz, data) = read_f32(data)?;
        let (qw, data) = read_f32(data)?;
        let (radius, data) = read_f32(data)?;
        if radius < 0.0 {
            return Err(ParseError::MalformedPayload);
        }
        let (attenuation_ratio, data) = read_f32(data)?;
        if !(0.0..=1.0).contains(&attenuation_ratio) {
            return Err(ParseError::MalformedPayload);
        }
        let orientation = normalize_orientation(glam::Quat::from_xyzw(qx, qy, qz, qw));
        let pcm = parse_pcm(data, frames_per_channel)?;
        Ok(InjectAudioPacket {
            uuid,
            injector_id,
            position,
            orientation,
            radius,
            attenuation_ratio,
            pcm,
        })
    }
}

/// Normalizes a quaternion on ingest; a zero-length quaternion's inverse is
/// undefined, so it is treated as identity.
pub fn normalize_orientation(q: glam::Quat) -> glam::Quat {
    if q.length_squared() > f32::EPSILON {
        q.normalize()
    } else {
        glam::Quat::IDENTITY
    }
}

fn parse_pcm(data: &[u8], frames_per_channel: usize) -> Result<Vec<i16>, ParseError> {
    let expected_bytes = frames_per_channel * 2;
    if data.len() != expected_bytes {
        return Err(ParseError::MalformedPayload);
    }
    let mut pcm = Vec::with_capacity(frames_per_channel);
    for chunk in data.chunks_exact(2) {
        pcm.push(i16::from_le_bytes([chunk[0], chunk[1]]));
    }
    Ok(pcm)
}

/// Encodes a `MixedAudio` datagram: header ‖ interleaved stereo PCM.
pub fn encode_mixed_audio(left: &[i16], right: &[i16]) -> Vec<u8> {
    debug_assert_eq!(left.len(), right.len());
    let mut buf = Vec::with_capacity(HEADER_LEN + left.len() * 4);
    Header {
        kind: PacketType::MixedAudio,
        version: PROTOCOL_VERSION,
    }
    .encode(&mut buf);
    for (&l, &r) in left.iter().zip(right.iter()) {
        buf.extend_from_slice(&l.to_le_bytes());
        buf.extend_from_slice(&r.to_le_bytes());
    }
    buf
}

/// Body of a `Ping` / `PingReply` packet.
#[derive(Debug, Clone, Copy)]
pub struct PingPacket {
    pub timestamp: u64,
}

impl PingPacket {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < 8 {
            return Err(ParseError::TooShort);
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&data[..8]);
        Ok(PingPacket {
            timestamp: u64::from_le_bytes(bytes),
        })
    }

    pub fn encode(self, kind: PacketType) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + 8);
        Header {
            kind,
            version: PROTOCOL_VERSION,
        }
        .encode(&mut buf);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pcm(frames: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            bytes.extend_from_slice(&(i as i16).to_le_bytes());
        }
        bytes
    }

    #[test]
    fn mic_audio_round_trips_fields() {
        let uuid = Uuid::from_bytes([7u8; 16]);
        let mut body = Vec::new();
        body.extend_from_slice(uuid.as_bytes());
        body.extend_from_slice(&1.0f32.to_le_bytes());
        body.extend_from_slice(&2.0f32.to_le_bytes());
        body.extend_from_slice(&3.0f32.to_le_bytes());
        body.extend_from_slice(&45.0f32.to_le_bytes());
        body.extend_from_slice(&sample_pcm(4));

        let packet = MicAudioPacket::parse(PacketType::MicAudioNoEcho, &body, 4).unwrap();
        assert_eq!(packet.uuid, uuid);
        assert_eq!(packet.position, glam::Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(packet.yaw_degrees, 45.0);
        assert!(!packet.echo);
        assert_eq!(packet.pcm, vec![0, 1, 2, 3]);
    }

    #[test]
    fn mic_audio_wrong_pcm_length_is_malformed() {
        let uuid = Uuid::from_bytes([1u8; 16]);
        let mut body = Vec::new();
        body.extend_from_slice(uuid.as_bytes());
        body.extend_from_slice(&0.0f32.to_le_bytes());
        body.extend_from_slice(&0.0f32.to_le_bytes());
        body.extend_from_slice(&0.0f32.to_le_bytes());
        body.extend_from_slice(&0.0f32.to_le_bytes());
        body.extend_from_slice(&sample_pcm(3)); // expects 4

        let err = MicAudioPacket::parse(PacketType::MicAudioNoEcho, &body, 4).unwrap_err();
        assert_eq!(err, ParseError::MalformedPayload);
    }

    #[test]
    fn non_finite_float_is_rejected() {
        let uuid = Uuid::from_bytes([1u8; 16]);
        let mut body = Vec::new();
        body.extend_from_slice(uuid.as_bytes());
        body.extend_from_slice(&f32::NAN.to_le_bytes());
        body.extend_from_slice(&0.0f32.to_le_bytes());
        body.extend_from_slice(&0.0f32.to_le_bytes());
        body.extend_from_slice(&0.0f32.to_le_bytes());
        body.extend_from_slice(&sample_pcm(4));

        let err = MicAudioPacket::parse(PacketType::MicAudioNoEcho, &body, 4).unwrap_err();
        assert_eq!(err, ParseError::NonFiniteFloat);
    }

    #[test]
    fn zero_length_quaternion_normalizes_to_identity() {
        let q = normalize_orientation(glam::Quat::from_xyzw(0.0, 0.0, 0.0, 0.0));
        assert_eq!(q, glam::Quat::IDENTITY);
    }

    #[test]
    fn mixed_audio_encodes_header_and_interleaves_channels() {
        let left = vec![1i16, 2];
        let right = vec![10i16, 20];
        let buf = encode_mixed_audio(&left, &right);
        assert_eq!(buf[0], PacketType::MixedAudio.tag());
        assert_eq!(buf[1], PROTOCOL_VERSION);
        let body = &buf[HEADER_LEN..];
        assert_eq!(i16::from_le_bytes([body[0], body[1]]), 1);
        assert_eq!(i16::from_le_bytes([body[2], body[3]]), 10);
        assert_eq!(i16::from_le_bytes([body[4], body[5]]), 2);
        assert_eq!(i16::from_le_bytes([body[6], body[7]]), 20);
    }
}
