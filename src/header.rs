use crate::byte::ByteReader;
use crate::error::{ParseError, Result};

pub const MAGIC: &[u8; 8] = b"HL2DEMO\0";

/// A `Vector` or `QAngle` triple of floats.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    fn read(r: &mut ByteReader) -> Result<Self> {
        Ok(Self {
            x: r.read_f32_le()?,
            y: r.read_f32_le()?,
            z: r.read_f32_le()?,
        })
    }
}

/// One half of a `democmdinfo` record: a view snapshot and its resampled
/// copy, 76 bytes on the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitT {
    pub flags: i32,
    pub view_origin: Vec3,
    pub view_angles: Vec3,
    pub local_view_angles: Vec3,
    pub view_origin2: Vec3,
    pub view_angles2: Vec3,
    pub local_view_angles2: Vec3,
}

impl SplitT {
    fn read(r: &mut ByteReader) -> Result<Self> {
        Ok(Self {
            flags: r.read_i32_le()?,
            view_origin: Vec3::read(r)?,
            view_angles: Vec3::read(r)?,
            local_view_angles: Vec3::read(r)?,
            view_origin2: Vec3::read(r)?,
            view_angles2: Vec3::read(r)?,
            local_view_angles2: Vec3::read(r)?,
        })
    }
}

/// The 156-byte payload prefix attached to SIGNON and PACKET records.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoCmdInfo {
    pub splits: [SplitT; 2],
}

impl DemoCmdInfo {
    pub fn read(r: &mut ByteReader) -> Result<Self> {
        Ok(Self {
            splits: [SplitT::read(r)?, SplitT::read(r)?],
        })
    }
}

/// `demo_type` classification: whether the recording host looks like a
/// live IPv4 address-and-port (`0`) or a TV/relay source (`1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoType {
    Server = 0,
    Tv = 1,
}

/// Fixed 1072-byte prefix of every HL2DEMO file.
#[derive(Debug, Clone)]
pub struct DemoHeader {
    pub dem_prot: i32,
    pub net_prot: i32,
    pub host_name: String,
    pub client_name: String,
    pub map_name: String,
    pub game_dir: String,
    pub playback_time: f32,
    pub ticks: i32,
    pub frames: i32,
    pub signon_length: i32,
}

impl DemoHeader {
    pub fn read(r: &mut ByteReader) -> Result<Self> {
        let magic = r.read_bytes(8)?;
        if magic != MAGIC.as_slice() {
            return Err(ParseError::BadMagic { offset: 0 });
        }

        Ok(Self {
            dem_prot: r.read_i32_le()?,
            net_prot: r.read_i32_le()?,
            host_name: r.read_string(260)?,
            client_name: r.read_string(260)?,
            map_name: r.read_string(260)?,
            game_dir: r.read_string(260)?,
            playback_time: r.read_f32_le()?,
            ticks: r.read_i32_le()?,
            frames: r.read_i32_le()?,
            signon_length: r.read_i32_le()?,
        })
    }

    /// `floor(ticks / playback_time)`, or `0` if the playback time is
    /// non-positive.
    pub fn tickrate(&self) -> i32 {
        if self.playback_time > 0.0 {
            (self.ticks as f32 / self.playback_time) as i32
        } else {
            0
        }
    }

    pub fn demo_type(&self) -> DemoType {
        if is_good_ip_port_format(&self.host_name) {
            DemoType::Server
        } else {
            DemoType::Tv
        }
    }
}

/// Mirrors the original tooling's `IsGoodIPPORTFormat`: substitute a
/// leading "localhost" with "127.0.0.1", then require the address part to
/// parse as IPv4.
fn is_good_ip_port_format(host_name: &str) -> bool {
    let candidate = if let Some(rest) = host_name.strip_prefix("localhost") {
        format!("127.0.0.1{rest}")
    } else {
        host_name.to_string()
    };

    let addr = candidate.split(':').next().unwrap_or(&candidate);
    addr.parse::<std::net::Ipv4Addr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_header_bytes(host_name: &str, time: f32, ticks: i32) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&4i32.to_le_bytes()); // dem_prot
        bytes.extend_from_slice(&13800i32.to_le_bytes()); // net_prot

        let mut host = host_name.as_bytes().to_vec();
        host.resize(260, 0);
        bytes.extend_from_slice(&host);
        bytes.extend_from_slice(&[0u8; 260]); // client_name
        bytes.extend_from_slice(&[0u8; 260]); // map_name
        bytes.extend_from_slice(&[0u8; 260]); // game_dir

        bytes.extend_from_slice(&time.to_le_bytes());
        bytes.extend_from_slice(&ticks.to_le_bytes());
        bytes.extend_from_slice(&3900i32.to_le_bytes()); // frames
        bytes.extend_from_slice(&0i32.to_le_bytes()); // signon_length
        bytes
    }

    #[test]
    fn minimal_header_tickrate_and_demo_type() {
        let bytes = minimal_header_bytes("", 60.0, 3840);
        let mut r = ByteReader::new(&bytes);
        let header = DemoHeader::read(&mut r).unwrap();
        assert_eq!(header.tickrate(), 64);
        assert_eq!(header.demo_type(), DemoType::Tv);
    }

    #[test]
    fn ipv4_host_is_server_type() {
        let bytes = minimal_header_bytes("127.0.0.1:27015", 60.0, 3840);
        let mut r = ByteReader::new(&bytes);
        let header = DemoHeader::read(&mut r).unwrap();
        assert_eq!(header.demo_type(), DemoType::Server);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = minimal_header_bytes("", 60.0, 3840);
        bytes[0] = b'X';
        let mut r = ByteReader::new(&bytes);
        assert!(matches!(
            DemoHeader::read(&mut r),
            Err(ParseError::BadMagic { .. })
        ));
    }
}
