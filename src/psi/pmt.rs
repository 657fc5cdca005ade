//! Program Map Table processor: one tracked handle per known service_id.
//! On a version change, publishes the new PCR PID and elementary-stream
//! PID list (with stream types) to the Cache.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::cache::{Cache, PidEntry, ServiceId};
use crate::packet::TransportPacket;
use crate::psi::{SectionProcessor, TableAssembly};

struct Handle {
    pmt_pid: u16,
    assembly: TableAssembly,
}

pub struct PmtProcessor {
    cache: Arc<Cache>,
    handles: HashMap<ServiceId, Handle>,
}

impl PmtProcessor {
    pub fn new(cache: Arc<Cache>) -> Self {
        PmtProcessor {
            cache,
            handles: HashMap::new(),
        }
    }

    /// Starts (or re-points) tracking of a service's PMT PID, as learned
    /// from the PAT. A PID change resets reassembly state for that handle.
    pub fn track(&mut self, service_id: ServiceId, pmt_pid: u16) {
        let handle = self.handles.entry(service_id).or_insert_with(|| Handle {
            pmt_pid,
            assembly: TableAssembly::new(),
        });
        if handle.pmt_pid != pmt_pid {
            handle.pmt_pid = pmt_pid;
            handle.assembly.reset();
        }
    }

    pub fn untrack(&mut self, service_id: ServiceId) {
        self.handles.remove(&service_id);
    }

    fn decode_payload(payload: &[u8]) -> (u16, Vec<PidEntry>) {
        let pcr_pid = u16::from_be_bytes([payload[0], payload[1]]) & 0x1FFF;
        let program_info_len = (u16::from_be_bytes([payload[2], payload[3]]) & 0x0FFF) as usize;
        let mut i = 4 + program_info_len;
        let mut pids = vec![PidEntry {
            pid: pcr_pid,
            stream_type: 0,
            subtype: 0,
        }];
        while i + 5 <= payload.len() {
            let stream_type = payload[i];
            let pid = u16::from_be_bytes([payload[i + 1], payload[i + 2]]) & 0x1FFF;
            let es_info_len = (u16::from_be_bytes([payload[i + 3], payload[i + 4]]) & 0x0FFF) as usize;
            i += 5 + es_info_len;
            pids.push(PidEntry {
                pid,
                stream_type,
                subtype: 0,
            });
        }
        (pcr_pid, pids)
    }
}

impl SectionProcessor for PmtProcessor {
    fn feed_packet(&mut self, packet: &TransportPacket) {
        let pid = packet.pid();
        let Some((&service_id, _)) = self
            .handles
            .iter()
            .find(|(_, h)| h.pmt_pid == pid)
        else {
            return;
        };

        let handle = self.handles.get_mut(&service_id).unwrap();
        let mut scratch = Vec::new();
        let Some((header, start, end)) = handle.assembly.push(packet, &mut scratch) else {
            return;
        };
        if header.table_id != 0x02 {
            return;
        }
        if header.table_id_extension != service_id.0 {
            return;
        }
        if !handle.assembly.complete() {
            return;
        }

        let (_pcr_pid, pids) = Self::decode_payload(&scratch[start..end]);
        debug!(service_id = service_id.0, version = header.version_number, pids = pids.len(), "PMT decoded");
        self.cache
            .update_pids(service_id, pids, header.version_number);
    }

    fn reset(&mut self) {
        for handle in self.handles.values_mut() {
            handle.assembly.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventbus::EventBus;
    use crate::packet::{crc32_mpeg2, PACKET_LEN, SYNC_BYTE};

    fn build_pmt_packet(program_number: u16, version: u8, pcr_pid: u16, es: &[(u8, u16)]) -> TransportPacket {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(0xE000 | pcr_pid).to_be_bytes());
        payload.extend_from_slice(&0xF000u16.to_be_bytes()); // program_info_length = 0
        for (stream_type, pid) in es {
            payload.push(*stream_type);
            payload.extend_from_slice(&(0xE000 | pid).to_be_bytes());
            payload.extend_from_slice(&0xF000u16.to_be_bytes()); // es_info_length = 0
        }

        let section_len = 5 + payload.len() + 4;
        let mut section = vec![0x02, 0xB0 | ((section_len >> 8) as u8 & 0x0F), section_len as u8];
        section.extend_from_slice(&program_number.to_be_bytes());
        section.push((version << 1) | 0x01);
        section.push(0x00);
        section.push(0x00);
        section.extend_from_slice(&payload);
        let crc = crc32_mpeg2(&section);
        section.extend_from_slice(&crc.to_be_bytes());

        let mut buf = [0xFFu8; PACKET_LEN];
        buf[0] = SYNC_BYTE;
        buf[1] = 0x40 | ((0x0201 >> 8) as u8 & 0x1F);
        buf[2] = (0x0201 & 0xFF) as u8;
        buf[3] = 0x10;
        buf[4] = 0x00;
        buf[5..5 + section.len()].copy_from_slice(&section);
        TransportPacket::from_raw(buf)
    }

    #[test]
    fn pmt_version_bump_updates_pids_monotonically() {
        let cache = Arc::new(Cache::new(Arc::new(EventBus::new())));
        cache.load(490_000_000);
        cache.add_service(0x1234, ServiceId(0x0200));

        let mut pmt = PmtProcessor::new(cache.clone());
        pmt.track(ServiceId(0x0200), 0x0201);

        let pkt1 = build_pmt_packet(0x0200, 1, 0x0300, &[(0x02, 0x0301), (0x04, 0x0302)]);
        pmt.feed_packet(&pkt1);
        let svc = cache.get_service(ServiceId(0x0200)).unwrap();
        assert_eq!(svc.pmt_version, Some(1));
        assert_eq!(
            svc.pids.iter().map(|e| e.pid).collect::<Vec<_>>(),
            vec![0x0300, 0x0301, 0x0302]
        );

        let pkt2 = build_pmt_packet(0x0200, 2, 0x0300, &[(0x02, 0x0301), (0x06, 0x0303)]);
        pmt.feed_packet(&pkt2);
        let svc = cache.get_service(ServiceId(0x0200)).unwrap();
        assert_eq!(svc.pmt_version, Some(2));
        assert_eq!(
            svc.pids.iter().map(|e| e.pid).collect::<Vec<_>>(),
            vec![0x0300, 0x0301, 0x0303]
        );
    }
}
