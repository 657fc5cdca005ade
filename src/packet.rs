//! Transport packet accessors and PSI section reassembly (C1).
//!
//! A transport packet is always 188 bytes. This module never allocates a
//! packet on the heap by itself; callers own the buffers (read into from an
//! adapter, or synthesized in place by a rewriter).

use crate::error::{Error, Result};
use crc::{Crc, CRC_32_MPEG_2};

pub const PACKET_LEN: usize = 188;
pub const SYNC_BYTE: u8 = 0x47;

/// Sentinel PID meaning "all PIDs" (used by full-mux taps).
pub const PID_ALL: u16 = 8192;

const MPEG2_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// A validated, fixed-size transport packet.
///
/// Constructing one verifies the sync byte and PID range; everything
/// downstream can assume both hold.
#[derive(Clone, Copy)]
pub struct TransportPacket([u8; PACKET_LEN]);

impl TransportPacket {
    /// Parses and validates a packet. Fails if `bytes.len() != PACKET_LEN`,
    /// the sync byte isn't 0x47, or the PID exceeds 8191.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PACKET_LEN {
            return Err(Error::Protocol("packet length must be 188 bytes"));
        }
        let mut buf = [0u8; PACKET_LEN];
        buf.copy_from_slice(bytes);
        let pkt = TransportPacket(buf);
        if buf[0] != SYNC_BYTE {
            return Err(Error::Protocol("bad sync byte"));
        }
        if pkt.pid() > 8191 {
            return Err(Error::Protocol("PID out of range"));
        }
        Ok(pkt)
    }

    /// Builds a packet from exactly 188 bytes without re-validating; used by
    /// in-place rewriters that already know the header is well-formed.
    pub fn from_raw(buf: [u8; PACKET_LEN]) -> Self {
        TransportPacket(buf)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; PACKET_LEN] {
        &self.0
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8; PACKET_LEN] {
        &mut self.0
    }

    #[inline]
    pub fn transport_error(&self) -> bool {
        self.0[1] & 0x80 != 0
    }

    #[inline]
    pub fn has_payload_unit_start(&self) -> bool {
        self.0[1] & 0x40 != 0
    }

    #[inline]
    pub fn pid(&self) -> u16 {
        (((self.0[1] & 0x1F) as u16) << 8) | self.0[2] as u16
    }

    #[inline]
    pub fn scrambling(&self) -> u8 {
        (self.0[3] & 0xC0) >> 6
    }

    #[inline]
    pub fn adaptation_field_control(&self) -> u8 {
        (self.0[3] & 0x30) >> 4
    }

    #[inline]
    pub fn has_adaptation_field(&self) -> bool {
        matches!(self.adaptation_field_control(), 0b10 | 0b11)
    }

    #[inline]
    pub fn has_payload(&self) -> bool {
        matches!(self.adaptation_field_control(), 0b01 | 0b11)
    }

    #[inline]
    pub fn continuity(&self) -> u8 {
        self.0[3] & 0x0F
    }

    pub fn set_continuity(&mut self, n: u8) {
        self.0[3] = (self.0[3] & 0xF0) | (n & 0x0F);
    }

    /// Returns the payload bytes, honoring the adaptation field length if
    /// present. `None` if the packet carries no payload.
    pub fn payload_slice(&self) -> Option<&[u8]> {
        if !self.has_payload() {
            return None;
        }
        let start = if self.has_adaptation_field() {
            let af_len = self.0[4] as usize;
            5 + af_len
        } else {
            4
        };
        if start > PACKET_LEN {
            return None;
        }
        Some(&self.0[start..])
    }
}

/// Computes the next continuity counter value, wrapping modulo 16.
#[inline]
pub fn next_continuity(cc: u8) -> u8 {
    (cc + 1) & 0x0F
}

/// Computes MPEG-2 CRC-32 (polynomial 0x04C11DB7) over `data`.
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    MPEG2_CRC.checksum(data)
}

/// Maximum PSI section length this reassembler accepts; longer declared
/// lengths are treated as malformed (spec budget for §4.1).
const MAX_SECTION_LEN: usize = 1024;

/// Reassembles PSI sections out of a stream of packets sharing one PID.
///
/// Resets on transport-error or on a continuity-counter discontinuity
/// (a single repeated CC is tolerated as a legitimate duplicate).
pub struct SectionAssembler {
    buf: Vec<u8>,
    expected_len: Option<usize>,
    last_cc: Option<u8>,
    synced: bool,
}

impl Default for SectionAssembler {
    fn default() -> Self {
        SectionAssembler {
            buf: Vec::with_capacity(MAX_SECTION_LEN),
            expected_len: None,
            last_cc: None,
            synced: false,
        }
    }
}

impl SectionAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards any partially-assembled section and forgets continuity
    /// state. Called on tune, and automatically on discontinuity.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.expected_len = None;
        self.last_cc = None;
        self.synced = false;
    }

    /// Feeds one packet. Returns `Some(section_bytes)` (without the leading
    /// pointer field, CRC still included) the moment a complete, validly
    /// framed section is assembled. The caller must still CRC-check it.
    pub fn push(&mut self, pkt: &TransportPacket) -> Option<Vec<u8>> {
        if pkt.transport_error() {
            self.reset();
            return None;
        }

        let cc = pkt.continuity();
        if let Some(last) = self.last_cc {
            if cc == last {
                // legitimate duplicate (e.g. retransmitted packet); ignore
                return None;
            }
            if cc != next_continuity(last) {
                self.reset();
            }
        }
        self.last_cc = Some(cc);

        let payload = pkt.payload_slice()?;
        if payload.is_empty() {
            return None;
        }

        let mut data = payload;
        if pkt.has_payload_unit_start() {
            let pointer = data[0] as usize;
            if pointer + 1 > data.len() {
                self.reset();
                return None;
            }
            let (skip, rest) = data.split_at(pointer + 1);
            let mut completed = None;
            if self.synced && !self.buf.is_empty() {
                // `skip[1..]` (everything past the pointer_field byte
                // itself) is the tail of the still-pending previous
                // section, not stuffing to discard (spec.md §4.1: honor
                // the pointer-field offset).
                self.buf.extend_from_slice(&skip[1..]);
                if let Some(total) = self.expected_len {
                    if self.buf.len() >= total {
                        completed = Some(self.buf[..total].to_vec());
                    }
                }
            }
            self.buf.clear();
            self.expected_len = None;
            self.synced = true;
            data = rest;
            if completed.is_some() {
                self.buf.extend_from_slice(data);
                return completed;
            }
        } else if !self.synced {
            return None;
        }

        self.buf.extend_from_slice(data);

        if self.expected_len.is_none() && self.buf.len() >= 3 {
            let len = (((self.buf[1] & 0x0F) as usize) << 8) | self.buf[2] as usize;
            let total = 3 + len;
            if total > MAX_SECTION_LEN {
                self.reset();
                return None;
            }
            self.expected_len = Some(total);
        }

        if let Some(total) = self.expected_len {
            if self.buf.len() >= total {
                let section = self.buf[..total].to_vec();
                self.buf.drain(..total);
                self.expected_len = None;
                return Some(section);
            }
        }

        None
    }
}

/// Verifies the trailing CRC-32 of a fully assembled section (the CRC is
/// the last 4 bytes, big-endian, covering everything before it).
pub fn verify_section_crc(section: &[u8]) -> bool {
    if section.len() < 4 {
        return false;
    }
    let (body, crc_bytes) = section.split_at(section.len() - 4);
    let expected = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    crc32_mpeg2(body) == expected
}
