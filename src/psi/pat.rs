//! Program Association Table processor: learns (service_id → PMT PID) and
//! the transport_stream_id, notifying the Cache once a complete, CRC-valid
//! version has been assembled.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{Cache, ServiceId};
use crate::packet::TransportPacket;
use crate::psi::{SectionProcessor, TableAssembly};

pub const PAT_PID: u16 = 0x0000;

/// One decoded (service_id → pmt_pid) row, `0` service_id being the
/// network PID row which this processor ignores (it carries no PMT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub service_id: u16,
    pub pmt_pid: u16,
}

pub struct PatProcessor {
    cache: Arc<Cache>,
    assembly: TableAssembly,
    /// indexed by section_number; `None` until that section has arrived.
    by_section: Vec<Option<Vec<PatEntry>>>,
    tsid: Option<u16>,
}

impl PatProcessor {
    pub fn new(cache: Arc<Cache>) -> Self {
        PatProcessor {
            cache,
            assembly: TableAssembly::new(),
            by_section: Vec::new(),
            tsid: None,
        }
    }

    fn decode_payload(payload: &[u8]) -> Vec<PatEntry> {
        let mut entries = Vec::new();
        let mut i = 0;
        while i + 4 <= payload.len() {
            let service_id = u16::from_be_bytes([payload[i], payload[i + 1]]);
            let pid = u16::from_be_bytes([payload[i + 2], payload[i + 3]]) & 0x1FFF;
            i += 4;
            if service_id != 0 {
                entries.push(PatEntry {
                    service_id,
                    pmt_pid: pid,
                });
            }
            // service_id == 0 is the network PID row; no PMT, skip.
        }
        entries
    }

    fn publish(&mut self) {
        let Some(tsid) = self.tsid else { return };
        let mut all: Vec<PatEntry> = Vec::new();
        for section in self.by_section.iter().flatten() {
            all.extend(section.iter().copied());
        }
        debug!(tsid, programs = all.len(), "PAT decoded");

        let known: std::collections::HashSet<u16> = all.iter().map(|e| e.service_id).collect();
        for svc in self.cache.services() {
            if svc.multiplex == self.cache.current_multiplex().map(|m| m.id).unwrap_or(svc.multiplex)
                && !known.contains(&svc.service_id.0)
            {
                self.cache.remove_service(svc.service_id);
            }
        }
        for entry in &all {
            self.cache
                .set_pmt_pid(tsid, ServiceId(entry.service_id), entry.pmt_pid);
        }
    }
}

impl SectionProcessor for PatProcessor {
    fn feed_packet(&mut self, packet: &TransportPacket) {
        if packet.pid() != PAT_PID {
            return;
        }
        let mut scratch = Vec::new();
        let Some((header, start, end)) = self.assembly.push(packet, &mut scratch) else {
            return;
        };
        if header.table_id != 0x00 {
            warn!(table_id = header.table_id, "unexpected table_id on PAT PID");
            return;
        }

        if self.tsid != Some(header.table_id_extension) {
            self.tsid = Some(header.table_id_extension);
            self.by_section.clear();
        }

        let idx = header.section_number as usize;
        if self.by_section.len() <= idx {
            self.by_section.resize(idx + 1, None);
        }
        self.by_section[idx] = Some(Self::decode_payload(&scratch[start..end]));

        if self.assembly.complete() {
            self.publish();
        }
    }

    fn reset(&mut self) {
        self.assembly.reset();
        self.by_section.clear();
        self.tsid = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventbus::EventBus;
    use crate::packet::{crc32_mpeg2, PACKET_LEN, SYNC_BYTE};

    fn build_pat_packet(tsid: u16, version: u8, programs: &[(u16, u16)]) -> TransportPacket {
        let mut payload = Vec::new();
        for (sid, pid) in programs {
            payload.extend_from_slice(&sid.to_be_bytes());
            payload.extend_from_slice(&(0xE000 | pid).to_be_bytes());
        }
        let section_len = 5 + payload.len() + 4; // header tail + payload + crc
        let mut section = vec![0x00, 0xB0 | ((section_len >> 8) as u8 & 0x0F), section_len as u8];
        section.extend_from_slice(&tsid.to_be_bytes());
        section.push((version << 1) | 0x01); // current_next = 1
        section.push(0x00); // section_number
        section.push(0x00); // last_section_number
        section.extend_from_slice(&payload);
        let crc = crc32_mpeg2(&section);
        section.extend_from_slice(&crc.to_be_bytes());

        let mut buf = [0xFFu8; PACKET_LEN];
        buf[0] = SYNC_BYTE;
        buf[1] = 0x40; // PUSI, PID high bits = 0
        buf[2] = 0x00;
        buf[3] = 0x10;
        buf[4] = 0x00; // pointer field
        buf[5..5 + section.len()].copy_from_slice(&section);
        TransportPacket::from_raw(buf)
    }

    #[test]
    fn decodes_minimal_pat_and_notifies_cache() {
        let cache = Arc::new(Cache::new(Arc::new(EventBus::new())));
        cache.load(490_000_000);
        let mut pat = PatProcessor::new(cache.clone());

        let pkt = build_pat_packet(0x1234, 5, &[(0x0100, 0x0101), (0x0200, 0x0201)]);
        pat.feed_packet(&pkt);

        let svc = cache.get_service(ServiceId(0x0200)).unwrap();
        assert_eq!(svc.pmt_pid, Some(0x0201));
        assert_eq!(cache.current_multiplex().unwrap().tsid, Some(0x1234));
    }

    #[test]
    fn ignores_network_pid_row() {
        let cache = Arc::new(Cache::new(Arc::new(EventBus::new())));
        cache.load(490_000_000);
        let mut pat = PatProcessor::new(cache.clone());
        let pkt = build_pat_packet(0x1234, 0, &[(0x0000, 0x0010), (0x0100, 0x0101)]);
        pat.feed_packet(&pkt);
        assert!(cache.get_service(ServiceId(0)).is_none());
        assert!(cache.get_service(ServiceId(0x0100)).is_some());
    }
}
