//! ATSC System Time Table processor: `system_time` (seconds since the GPS
//! epoch, 1980-01-06 00:00:00 UTC) minus `gps_utc_offset` (accumulated leap
//! seconds) yields a Unix timestamp.

use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::packet::TransportPacket;
use crate::psi::{SectionProcessor, TableAssembly};

/// ATSC PSIP base PID, carrying (among others) the STT.
pub const STT_PID: u16 = 0x1FFB;
const TABLE_ID_STT: u8 = 0xCD;

fn gps_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1980, 1, 6)
        .expect("valid calendar constant")
        .and_hms_opt(0, 0, 0)
        .expect("valid calendar constant")
}

/// Converts a raw `(system_time, gps_utc_offset)` pair to UTC.
pub fn decode_system_time(system_time: u32, gps_utc_offset: u8) -> NaiveDateTime {
    gps_epoch()
        + chrono::Duration::seconds(system_time as i64)
        - chrono::Duration::seconds(gps_utc_offset as i64)
}

pub struct SttProcessor {
    assembly: TableAssembly,
    decoded: Option<NaiveDateTime>,
}

impl Default for SttProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl SttProcessor {
    pub fn new() -> Self {
        SttProcessor {
            assembly: TableAssembly::new(),
            decoded: None,
        }
    }

    pub fn decoded(&self) -> Option<NaiveDateTime> {
        self.decoded
    }
}

impl SectionProcessor for SttProcessor {
    fn feed_packet(&mut self, packet: &TransportPacket) {
        if packet.pid() != STT_PID {
            return;
        }
        let mut scratch = Vec::new();
        let Some((header, start, end)) = self.assembly.push(packet, &mut scratch) else {
            return;
        };
        if header.table_id != TABLE_ID_STT {
            return;
        }
        let payload = &scratch[start..end];
        if payload.len() < 6 {
            return;
        }
        let system_time = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
        let gps_utc_offset = payload[5];
        self.decoded = Some(decode_system_time(system_time, gps_utc_offset));
        debug!(decoded = ?self.decoded, "STT decoded");
    }

    fn reset(&mut self) {
        self.assembly.reset();
        self.decoded = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_gps_epoch_offset() {
        let decoded = decode_system_time(0, 0);
        assert_eq!(decoded, gps_epoch());

        // one day later, with an 18-second GPS/UTC leap offset
        let decoded = decode_system_time(86400, 18);
        assert_eq!(
            decoded,
            gps_epoch() + chrono::Duration::days(1) - chrono::Duration::seconds(18)
        );
    }
}
