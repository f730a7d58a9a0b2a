//! TR60 bridge protocol implementation
//!
//! Packet format: [0xAA 0x55] [LEN] [CMD] [PAYLOAD] [CHECKSUM]
//!
//! LEN counts CMD + PAYLOAD + CHECKSUM. Checksum is the 16-bit wrapping
//! sum of CMD and all payload bytes, sent big-endian. The same framing is
//! used in both directions; the bridge streams STATUS frames at its own
//! cadence and PULSE frames as encoder edges arrive.

use crate::core::types::{TrackDrive, TrackSide};
use crate::error::{Error, Result};

/// Sync byte 1
pub const SYNC1: u8 = 0xAA;
/// Sync byte 2
pub const SYNC2: u8 = 0x55;

// ===== STATUS Frame (CMD=0x40, 11 bytes) Byte Offsets =====

/// Forward infrared ranger, raw ADC (u16 LE)
pub const OFFSET_INFRARED: usize = 0;
/// Light sensor, raw ADC (u16 LE)
pub const OFFSET_LIGHT: usize = 2;
/// Gyro yaw rate, signed raw ADC (i16 LE)
pub const OFFSET_GYRO: usize = 4;
/// Bit-packed flags: bit 0 tilt, bit 1 ultrasonic echo ready
pub const OFFSET_FLAGS: usize = 6;
/// Last ultrasonic range in millimeters (u16 LE), valid when bit 1 of flags is set
pub const OFFSET_US_MM: usize = 7;
/// Battery voltage in millivolts (u16 LE)
pub const OFFSET_BATTERY_MV: usize = 9;
/// STATUS payload length
pub const STATUS_PAYLOAD_LEN: usize = 11;

// ===== PULSE Frame (CMD=0x41, 3 bytes) =====

/// PULSE payload length: side (u8) + ticks (u16 LE)
pub const PULSE_PAYLOAD_LEN: usize = 3;

/// Calculate 2-byte checksum for a TR60 packet
///
/// 16-bit wrapping sum of CMD and every payload byte, big-endian on the
/// wire.
fn calculate_checksum(cmd_id: u8, payload: &[u8]) -> u16 {
    let mut checksum = cmd_id as u16;
    for &byte in payload {
        checksum = checksum.wrapping_add(byte as u16);
    }
    checksum
}

/// TR60 command IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandId {
    /// Set one track's H-bridge state
    SetTrack = 0x10,
    /// Set both PWM compare counts
    SetSpeedCounts = 0x11,
    /// Master enable for the drive stage
    DrivePower = 0x12,
    /// Enable or mask the transoptor edge interrupts
    PulseSense = 0x13,
    /// Aim the head servo
    HeadAngle = 0x20,
    /// Fold the sweep arms to the park position
    ParkArms = 0x21,
    /// Fire one ultrasonic measurement
    UltrasonicTrigger = 0x30,
    /// Periodic sensor snapshot (from bridge)
    Status = 0x40,
    /// Encoder edge report (from bridge)
    Pulse = 0x41,
}

/// Host-to-bridge commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tr60Command {
    /// Set one track's H-bridge state (CMD 0x10)
    SetTrack {
        /// Which track
        side: TrackSide,
        /// Requested bridge state
        drive: TrackDrive,
    },
    /// Set both PWM compare counts at once (CMD 0x11)
    SetSpeedCounts {
        /// Left track compare count
        left: u8,
        /// Right track compare count
        right: u8,
    },
    /// Master enable for the drive stage (CMD 0x12)
    DrivePower(bool),
    /// Enable or mask the transoptor edge interrupts (CMD 0x13)
    PulseSense(bool),
    /// Aim the head servo, degrees from center, positive right (CMD 0x20)
    HeadAngle(i8),
    /// Fold the sweep arms to the park position (CMD 0x21)
    ParkArms,
    /// Fire one ultrasonic measurement (CMD 0x30)
    UltrasonicTrigger,
}

impl Tr60Command {
    /// Get command ID
    pub fn cmd_id(&self) -> u8 {
        match self {
            Tr60Command::SetTrack { .. } => CommandId::SetTrack as u8,
            Tr60Command::SetSpeedCounts { .. } => CommandId::SetSpeedCounts as u8,
            Tr60Command::DrivePower(_) => CommandId::DrivePower as u8,
            Tr60Command::PulseSense(_) => CommandId::PulseSense as u8,
            Tr60Command::HeadAngle(_) => CommandId::HeadAngle as u8,
            Tr60Command::ParkArms => CommandId::ParkArms as u8,
            Tr60Command::UltrasonicTrigger => CommandId::UltrasonicTrigger as u8,
        }
    }

    /// Build payload for command
    fn build_payload(&self) -> Vec<u8> {
        match self {
            Tr60Command::SetTrack { side, drive } => {
                let side_byte = match side {
                    TrackSide::Left => 0x00,
                    TrackSide::Right => 0x01,
                };
                vec![side_byte, *drive as u8]
            }
            Tr60Command::SetSpeedCounts { left, right } => vec![*left, *right],
            Tr60Command::DrivePower(on) => vec![if *on { 0x01 } else { 0x00 }],
            Tr60Command::PulseSense(on) => vec![if *on { 0x01 } else { 0x00 }],
            Tr60Command::HeadAngle(angle) => vec![*angle as u8],
            Tr60Command::ParkArms => vec![0x00],
            Tr60Command::UltrasonicTrigger => vec![0x00],
        }
    }

    /// Encode command into packet bytes
    pub fn encode(&self) -> Vec<u8> {
        let cmd_id = self.cmd_id();
        let payload = self.build_payload();
        let checksum = calculate_checksum(cmd_id, &payload);

        let mut packet = Vec::with_capacity(6 + payload.len());
        packet.push(SYNC1);
        packet.push(SYNC2);
        // LEN = CMD (1) + PAYLOAD + CHECKSUM (2)
        packet.push((1 + payload.len() + 2) as u8);
        packet.push(cmd_id);
        packet.extend_from_slice(&payload);
        packet.extend_from_slice(&checksum.to_be_bytes());
        packet
    }
}

/// Parsed periodic sensor snapshot (CMD 0x40)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFrame {
    /// Forward infrared ranger, raw ADC
    pub infrared: u16,
    /// Light sensor, raw ADC
    pub light: u16,
    /// Gyro yaw rate, signed raw ADC
    pub gyro: i16,
    /// Tilt switch closed
    pub tilt: bool,
    /// An ultrasonic echo has completed since the last trigger
    pub us_ready: bool,
    /// Last ultrasonic range in millimeters
    pub us_mm: u16,
    /// Battery voltage in millivolts
    pub battery_mv: u16,
}

/// Bridge-to-host reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tr60Report {
    /// Periodic sensor snapshot
    Status(StatusFrame),
    /// Encoder edges accumulated since the previous report
    Pulse {
        /// Which track the edges came from
        side: TrackSide,
        /// Edge count, at least 1
        ticks: u16,
    },
}

impl Tr60Report {
    /// Parse a report from a verified CMD + payload
    fn from_payload(cmd_id: u8, payload: &[u8]) -> Result<Self> {
        if cmd_id == CommandId::Status as u8 {
            if payload.len() < STATUS_PAYLOAD_LEN {
                return Err(Error::InvalidPacket(format!(
                    "STATUS payload too short: {} bytes",
                    payload.len()
                )));
            }
            let flags = payload[OFFSET_FLAGS];
            Ok(Tr60Report::Status(StatusFrame {
                infrared: u16::from_le_bytes([
                    payload[OFFSET_INFRARED],
                    payload[OFFSET_INFRARED + 1],
                ]),
                light: u16::from_le_bytes([payload[OFFSET_LIGHT], payload[OFFSET_LIGHT + 1]]),
                gyro: i16::from_le_bytes([payload[OFFSET_GYRO], payload[OFFSET_GYRO + 1]]),
                tilt: flags & 0x01 != 0,
                us_ready: flags & 0x02 != 0,
                us_mm: u16::from_le_bytes([payload[OFFSET_US_MM], payload[OFFSET_US_MM + 1]]),
                battery_mv: u16::from_le_bytes([
                    payload[OFFSET_BATTERY_MV],
                    payload[OFFSET_BATTERY_MV + 1],
                ]),
            }))
        } else if cmd_id == CommandId::Pulse as u8 {
            if payload.len() < PULSE_PAYLOAD_LEN {
                return Err(Error::InvalidPacket(format!(
                    "PULSE payload too short: {} bytes",
                    payload.len()
                )));
            }
            let side = match payload[0] {
                0x00 => TrackSide::Left,
                0x01 => TrackSide::Right,
                other => {
                    return Err(Error::InvalidPacket(format!(
                        "PULSE side byte {:#04x}",
                        other
                    )))
                }
            };
            let ticks = u16::from_le_bytes([payload[1], payload[2]]);
            Ok(Tr60Report::Pulse { side, ticks })
        } else {
            Err(Error::InvalidPacket(format!(
                "Unknown report CMD {:#04x}",
                cmd_id
            )))
        }
    }

    /// Decode one report from a byte stream, searching for sync bytes.
    ///
    /// Returns `(bytes_consumed, report)` where `bytes_consumed` includes
    /// any garbage before the packet. A corrupt frame is skipped and the
    /// scan continues at the next sync candidate. `Err` means no complete
    /// valid packet is in the buffer yet; the caller keeps the bytes and
    /// retries after the next read.
    pub fn decode_with_sync(data: &[u8]) -> Result<(usize, Self)> {
        let mut search_offset = 0;
        while search_offset + 6 <= data.len() {
            let sync_pos = data[search_offset..]
                .windows(2)
                .position(|w| w[0] == SYNC1 && w[1] == SYNC2);

            let absolute_sync_pos = match sync_pos {
                Some(pos) => search_offset + pos,
                None => return Err(Error::InvalidPacket("No sync bytes found".into())),
            };

            let packet_data = &data[absolute_sync_pos..];
            if packet_data.len() < 6 {
                return Err(Error::InvalidPacket("Packet too short after sync".into()));
            }

            let length = packet_data[2] as usize;
            // LEN = CMD(1) + PAYLOAD + CHECKSUM(2)
            if length < 3 {
                search_offset = absolute_sync_pos + 2;
                continue;
            }
            let packet_size = 3 + length;
            if packet_data.len() < packet_size {
                return Err(Error::InvalidPacket("Incomplete packet".into()));
            }

            let cmd_id = packet_data[3];
            let payload_len = length - 3;
            let payload = &packet_data[4..4 + payload_len];

            let expected = calculate_checksum(cmd_id, payload);
            let received = u16::from_be_bytes([
                packet_data[4 + payload_len],
                packet_data[4 + payload_len + 1],
            ]);
            if received != expected {
                log::debug!(
                    "TR60: checksum mismatch at offset {}, expected {:#06x}, got {:#06x}",
                    absolute_sync_pos,
                    expected,
                    received
                );
                search_offset = absolute_sync_pos + 2;
                continue;
            }

            match Self::from_payload(cmd_id, payload) {
                Ok(report) => return Ok((absolute_sync_pos + packet_size, report)),
                Err(e) => {
                    log::debug!("TR60: dropping malformed frame: {}", e);
                    search_offset = absolute_sync_pos + packet_size;
                    continue;
                }
            }
        }
        Err(Error::InvalidPacket("No valid packet found".into()))
    }

    /// Decode a report that starts exactly at `data[0]`, rejecting checksum
    /// mismatches instead of resyncing.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 6 || data[0] != SYNC1 || data[1] != SYNC2 {
            return Err(Error::InvalidPacket("Missing sync bytes".into()));
        }
        let length = data[2] as usize;
        if length < 3 || data.len() < 3 + length {
            return Err(Error::InvalidPacket("Incomplete packet".into()));
        }
        let cmd_id = data[3];
        let payload = &data[4..4 + length - 3];
        let expected = calculate_checksum(cmd_id, payload);
        let actual = u16::from_be_bytes([data[1 + length], data[2 + length]]);
        if actual != expected {
            return Err(Error::ChecksumError { expected, actual });
        }
        Self::from_payload(cmd_id, payload)
    }
}

/// Encode a STATUS frame. The bridge side of CMD 0x40, used by the loopback
/// tests and the protocol simulator.
pub fn encode_status(frame: &StatusFrame) -> Vec<u8> {
    let mut payload = [0u8; STATUS_PAYLOAD_LEN];
    payload[OFFSET_INFRARED..OFFSET_INFRARED + 2].copy_from_slice(&frame.infrared.to_le_bytes());
    payload[OFFSET_LIGHT..OFFSET_LIGHT + 2].copy_from_slice(&frame.light.to_le_bytes());
    payload[OFFSET_GYRO..OFFSET_GYRO + 2].copy_from_slice(&frame.gyro.to_le_bytes());
    payload[OFFSET_FLAGS] =
        (frame.tilt as u8) | if frame.us_ready { 0x02 } else { 0x00 };
    payload[OFFSET_US_MM..OFFSET_US_MM + 2].copy_from_slice(&frame.us_mm.to_le_bytes());
    payload[OFFSET_BATTERY_MV..OFFSET_BATTERY_MV + 2]
        .copy_from_slice(&frame.battery_mv.to_le_bytes());
    encode_report(CommandId::Status as u8, &payload)
}

/// Encode a PULSE frame. The bridge side of CMD 0x41.
pub fn encode_pulse(side: TrackSide, ticks: u16) -> Vec<u8> {
    let side_byte = match side {
        TrackSide::Left => 0x00,
        TrackSide::Right => 0x01,
    };
    let ticks_bytes = ticks.to_le_bytes();
    encode_report(
        CommandId::Pulse as u8,
        &[side_byte, ticks_bytes[0], ticks_bytes[1]],
    )
}

fn encode_report(cmd_id: u8, payload: &[u8]) -> Vec<u8> {
    let checksum = calculate_checksum(cmd_id, payload);
    let mut packet = Vec::with_capacity(6 + payload.len());
    packet.push(SYNC1);
    packet.push(SYNC2);
    packet.push((1 + payload.len() + 2) as u8);
    packet.push(cmd_id);
    packet.extend_from_slice(payload);
    packet.extend_from_slice(&checksum.to_be_bytes());
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_calculation() {
        // CMD=0x12, PAYLOAD=[0x01]
        // checksum = 0x12 + 0x01 = 0x0013
        assert_eq!(calculate_checksum(0x12, &[0x01]), 0x0013);

        // CMD=0x11, PAYLOAD=[0xC8, 0xC4]
        // checksum = 0x11 + 0xC8 + 0xC4 = 0x019D
        assert_eq!(calculate_checksum(0x11, &[0xC8, 0xC4]), 0x019D);

        // Wrapping: 0xFF + 0xFF * many stays 16-bit
        let checksum = calculate_checksum(0xFF, &[0xFF; 300]);
        assert_eq!(checksum, (0xFFu16).wrapping_add(0xFFu16.wrapping_mul(300)));
    }

    #[test]
    fn test_drive_power_encoding() {
        let packet = Tr60Command::DrivePower(true).encode();
        assert_eq!(packet.len(), 7); // SYNC(2) + LEN(1) + CMD(1) + PAYLOAD(1) + CKSUM(2)
        assert_eq!(packet[0], 0xAA); // SYNC1
        assert_eq!(packet[1], 0x55); // SYNC2
        assert_eq!(packet[2], 0x04); // LEN = CMD(1) + PAYLOAD(1) + CKSUM(2)
        assert_eq!(packet[3], 0x12); // CMD (DrivePower)
        assert_eq!(packet[4], 0x01); // Payload (ON)
        assert_eq!(packet[5], 0x00); // Checksum high byte
        assert_eq!(packet[6], 0x13); // Checksum low byte
    }

    #[test]
    fn test_set_track_encoding() {
        let packet = Tr60Command::SetTrack {
            side: TrackSide::Right,
            drive: TrackDrive::Reverse,
        }
        .encode();
        assert_eq!(packet[2], 0x05); // LEN = CMD(1) + PAYLOAD(2) + CKSUM(2)
        assert_eq!(packet[3], 0x10);
        assert_eq!(packet[4], 0x01); // right
        assert_eq!(packet[5], 0x02); // reverse
    }

    #[test]
    fn test_head_angle_negative_encoding() {
        let packet = Tr60Command::HeadAngle(-60).encode();
        assert_eq!(packet[3], 0x20);
        assert_eq!(packet[4], (-60i8) as u8); // 0xC4, two's complement
        assert_eq!(packet[4] as i8, -60);
    }

    #[test]
    fn test_status_round_trip() {
        let frame = StatusFrame {
            infrared: 312,
            light: 845,
            gyro: -127,
            tilt: false,
            us_ready: true,
            us_mm: 245,
            battery_mv: 7420,
        };
        let bytes = encode_status(&frame);
        let (consumed, report) = Tr60Report::decode_with_sync(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(report, Tr60Report::Status(frame));
    }

    #[test]
    fn test_pulse_round_trip() {
        let bytes = encode_pulse(TrackSide::Left, 3);
        let report = Tr60Report::decode(&bytes).unwrap();
        assert_eq!(
            report,
            Tr60Report::Pulse {
                side: TrackSide::Left,
                ticks: 3
            }
        );
    }

    #[test]
    fn test_decode_skips_leading_garbage() {
        let mut stream = vec![0x00, 0xAA, 0x13, 0x55];
        let frame_start = stream.len();
        stream.extend_from_slice(&encode_pulse(TrackSide::Right, 1));
        let (consumed, report) = Tr60Report::decode_with_sync(&stream).unwrap();
        assert_eq!(consumed, frame_start + 9);
        assert_eq!(
            report,
            Tr60Report::Pulse {
                side: TrackSide::Right,
                ticks: 1
            }
        );
    }

    #[test]
    fn test_decode_resyncs_past_corrupt_frame() {
        let mut stream = encode_pulse(TrackSide::Left, 2);
        stream[5] ^= 0xFF; // corrupt the tick count, checksum now fails
        let good = encode_status(&StatusFrame {
            infrared: 100,
            light: 200,
            gyro: 0,
            tilt: false,
            us_ready: false,
            us_mm: 0,
            battery_mv: 8000,
        });
        stream.extend_from_slice(&good);
        let (consumed, report) = Tr60Report::decode_with_sync(&stream).unwrap();
        assert_eq!(consumed, stream.len());
        assert!(matches!(report, Tr60Report::Status(_)));
    }

    #[test]
    fn test_decode_incomplete_is_err() {
        let bytes = encode_pulse(TrackSide::Left, 2);
        assert!(Tr60Report::decode_with_sync(&bytes[..bytes.len() - 1]).is_err());
        assert!(Tr60Report::decode_with_sync(&[]).is_err());
    }

    #[test]
    fn test_strict_decode_reports_checksum() {
        let mut bytes = encode_pulse(TrackSide::Left, 2);
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        match Tr60Report::decode(&bytes) {
            Err(Error::ChecksumError { expected, actual }) => {
                assert_eq!(actual, expected ^ 0x01);
            }
            other => panic!("expected checksum error, got {:?}", other),
        }
    }
}
