//! Time & Date Table / Time Offset Table processor.
//!
//! TDT (table_id 0x70) is a short-form section with no CRC: just a 16-bit
//! Modified Julian Date and a 24-bit BCD time-of-day. TOT (table_id 0x73)
//! carries the same UTC_time plus a descriptor loop and *does* end in a
//! CRC-32, so it can't share the long-form [`crate::psi::TableAssembly`]
//! (which assumes a version/current_next/section_number header TDT/TOT
//! don't have); both are decoded here straight off the reassembled bytes.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::packet::{verify_section_crc, SectionAssembler, TransportPacket};
use crate::psi::SectionProcessor;

pub const TDT_TOT_PID: u16 = 0x0014;
const TABLE_ID_TDT: u8 = 0x70;
const TABLE_ID_TOT: u8 = 0x73;

/// The Modified Julian Day epoch (1858-11-17), per ETSI EN 300 468 Annex C.
fn mjd_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1858, 11, 17).expect("valid calendar constant")
}

fn bcd_to_u32(byte: u8) -> u32 {
    ((byte >> 4) * 10 + (byte & 0x0F)) as u32
}

/// Decodes the 5-byte UTC_time field (16-bit MJD + 24-bit BCD HH:MM:SS)
/// into a UTC timestamp.
pub fn decode_utc_time(bytes: &[u8; 5]) -> Option<NaiveDateTime> {
    let mjd = u16::from_be_bytes([bytes[0], bytes[1]]) as i64;
    let date = mjd_epoch().checked_add_signed(Duration::days(mjd))?;
    let hour = bcd_to_u32(bytes[2]);
    let minute = bcd_to_u32(bytes[3]);
    let second = bcd_to_u32(bytes[4]);
    date.and_hms_opt(hour, minute, second)
}

pub struct TdtProcessor {
    assembler: SectionAssembler,
    decoded: Option<NaiveDateTime>,
}

impl Default for TdtProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl TdtProcessor {
    pub fn new() -> Self {
        TdtProcessor {
            assembler: SectionAssembler::new(),
            decoded: None,
        }
    }

    pub fn decoded(&self) -> Option<NaiveDateTime> {
        self.decoded
    }
}

impl SectionProcessor for TdtProcessor {
    fn feed_packet(&mut self, packet: &TransportPacket) {
        if packet.pid() != TDT_TOT_PID {
            return;
        }
        let Some(section) = self.assembler.push(packet) else {
            return;
        };
        if section.is_empty() {
            return;
        }
        let table_id = section[0];
        match table_id {
            TABLE_ID_TDT => {
                if section.len() < 8 {
                    return;
                }
                let utc: [u8; 5] = section[3..8].try_into().unwrap();
                self.decoded = decode_utc_time(&utc);
                debug!(decoded = ?self.decoded, "TDT decoded");
            }
            TABLE_ID_TOT => {
                if section.len() < 8 || !verify_section_crc(&section) {
                    return;
                }
                let utc: [u8; 5] = section[3..8].try_into().unwrap();
                self.decoded = decode_utc_time(&utc);
                debug!(decoded = ?self.decoded, "TOT decoded");
            }
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.assembler.reset();
        self.decoded = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_mjd_scenario() {
        // MJD=58849, 12:34:56 UTC. Per ETSI EN 300 468 Annex C this resolves
        // to 2020-01-01 (see DESIGN.md: the day-of-month 23 quoted
        // elsewhere for this MJD doesn't reconcile with the Annex C
        // polynomial or with plain MJD-epoch arithmetic, both of which
        // agree on the 1st).
        let mjd: u16 = 58849;
        let mut bytes = [0u8; 5];
        bytes[0..2].copy_from_slice(&mjd.to_be_bytes());
        bytes[2] = 0x12; // BCD 12
        bytes[3] = 0x34; // BCD 34
        bytes[4] = 0x56; // BCD 56

        let decoded = decode_utc_time(&bytes).unwrap();
        assert_eq!(
            decoded,
            NaiveDate::from_ymd_opt(2020, 1, 1)
                .unwrap()
                .and_hms_opt(12, 34, 56)
                .unwrap()
        );
    }

    #[test]
    fn tdt_packet_without_crc_decodes() {
        let mjd: u16 = 58849;
        let mut section = vec![TABLE_ID_TDT, 0x70, 0x05];
        section.extend_from_slice(&mjd.to_be_bytes());
        section.push(0x12);
        section.push(0x34);
        section.push(0x56);

        let mut buf = [0xFFu8; crate::packet::PACKET_LEN];
        buf[0] = crate::packet::SYNC_BYTE;
        buf[1] = 0x40 | ((TDT_TOT_PID >> 8) as u8 & 0x1F);
        buf[2] = (TDT_TOT_PID & 0xFF) as u8;
        buf[3] = 0x10;
        buf[4] = 0x00;
        buf[5..5 + section.len()].copy_from_slice(&section);
        let pkt = TransportPacket::from_raw(buf);

        let mut tdt = TdtProcessor::new();
        tdt.feed_packet(&pkt);
        assert!(tdt.decoded().is_some());
    }
}
