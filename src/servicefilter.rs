//! Service Filter (C7): a specialized [`Processor`] that selects one
//! service's PAT+PMT+PIDs and rewrites every PID-0 packet into a
//! synthesized single-program PAT, so a downstream decoder sees a valid
//! single-program transport stream.

use tracing::debug;

use crate::cache::{Cache, MultiplexId, ServiceId};
use crate::error::{Error, Result};
use crate::packet::{crc32_mpeg2, next_continuity, PACKET_LEN, SYNC_BYTE};
use crate::pidfilter::Processor;
use crate::psi::pat::PAT_PID;
use std::sync::Arc;

/// Selecting a service whose synthesized PAT section would not fit one
/// packet is impossible with a single program (spec.md §4.7), so this
/// never fires in practice; it exists to turn a future spec violation
/// into a loud failure rather than a truncated packet.
fn section_fits_one_packet(section_len: usize) -> bool {
    section_len <= PACKET_LEN - 4 - 1 // header + pointer field
}

pub struct ServiceFilter {
    cache: Arc<Cache>,
    pending_service: Option<ServiceId>,
    active_service: Option<ServiceId>,
    last_emitted: Option<(ServiceId, MultiplexId)>,
    version: u8,
    continuity: u8,
}

impl ServiceFilter {
    pub fn new(cache: Arc<Cache>, service_id: ServiceId) -> Self {
        ServiceFilter {
            cache,
            pending_service: Some(service_id),
            active_service: None,
            last_emitted: None,
            version: 0,
            continuity: 0,
        }
    }

    /// Requests a service switch. Takes effect on the next PAT packet
    /// observed (spec.md §4.7 "Service change semantics"); packets already
    /// in flight for the old service are unaffected.
    pub fn set_service(&mut self, service_id: ServiceId) {
        self.pending_service = Some(service_id);
    }

    pub fn active_service(&self) -> Option<ServiceId> {
        self.active_service
    }

    fn synthesize_pat(&mut self, tsid: u16, service_id: u16, pmt_pid: u16) -> Result<TransportPacketBytes> {
        let mut section = vec![0x00u8, 0x00, 0x00]; // table_id, length (filled below)
        section.extend_from_slice(&tsid.to_be_bytes());
        section.push(0xC0 | (self.version << 1) | 0x01); // reserved(2) + version(5) + current_next(1)
        section.push(0x00); // section_number
        section.push(0x00); // last_section_number
        section.extend_from_slice(&service_id.to_be_bytes());
        section.extend_from_slice(&(0xE000 | pmt_pid).to_be_bytes());

        let section_length = section.len() - 3 + 4; // tail after length field + CRC
        if !section_fits_one_packet(3 + section_length) {
            return Err(Error::Internal("synthesized PAT exceeds one packet"));
        }
        section[1] = 0xB0 | ((section_length >> 8) as u8 & 0x0F);
        section[2] = section_length as u8;

        let crc = crc32_mpeg2(&section);
        section.extend_from_slice(&crc.to_be_bytes());

        let mut buf = [0xFFu8; PACKET_LEN];
        buf[0] = SYNC_BYTE;
        buf[1] = 0x40; // payload_unit_start = 1, PID high bits = 0
        buf[2] = 0x00;
        self.continuity = next_continuity(self.continuity);
        buf[3] = 0x10 | self.continuity; // adaptation_field_control = 0x1 (payload only)
        buf[4] = 0x00; // pointer_field
        buf[5..5 + section.len()].copy_from_slice(&section);
        Ok(buf)
    }
}

type TransportPacketBytes = [u8; PACKET_LEN];

impl Processor for ServiceFilter {
    fn accepts(&self, pid: u16) -> bool {
        if pid == PAT_PID {
            return true;
        }
        let Some(sid) = self.active_service else {
            return false;
        };
        let Some(svc) = self.cache.get_service(sid) else {
            return false;
        };
        Some(pid) == svc.pmt_pid || svc.pids.iter().any(|e| e.pid == pid)
    }

    fn process(&mut self, packet: &crate::packet::TransportPacket) -> Option<crate::packet::TransportPacket> {
        if packet.pid() != PAT_PID {
            return Some(*packet);
        }

        if let Some(pending) = self.pending_service.take() {
            self.active_service = Some(pending);
        }
        let sid = self.active_service?;
        let svc = self.cache.get_service(sid)?;
        let mux = self.cache.current_multiplex()?;
        let pmt_pid = svc.pmt_pid?;

        let key = (sid, mux.id);
        if self.last_emitted.is_some() && self.last_emitted != Some(key) {
            self.version = (self.version + 1) % 32;
        }
        self.last_emitted = Some(key);

        let tsid = mux.tsid.unwrap_or(0);
        match self.synthesize_pat(tsid, sid.0, pmt_pid) {
            Ok(buf) => {
                debug!(service_id = sid.0, pmt_pid, version = self.version, "emitted single-program PAT");
                Some(crate::packet::TransportPacket::from_raw(buf))
            }
            Err(e) => {
                // §4.7: this is an internal invariant violation, not a
                // recoverable runtime condition.
                panic!("{e}");
            }
        }
    }

    fn reset(&mut self) {
        self.last_emitted = None;
        self.version = 0;
        self.continuity = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PidEntry;
    use crate::eventbus::EventBus;
    use crate::psi::{parse_header, SectionHeader};

    fn decoded_pat(packet: &crate::packet::TransportPacket) -> (SectionHeader, u16, u16) {
        let payload = packet.payload_slice().unwrap();
        let pointer = payload[0] as usize;
        let section = &payload[1 + pointer..];
        let (header, body) = parse_header(section).unwrap();
        let service_id = u16::from_be_bytes([body[0], body[1]]);
        let pmt_pid = u16::from_be_bytes([body[2], body[3]]) & 0x1FFF;
        (header, service_id, pmt_pid)
    }

    fn pat_packet(pid: u16) -> crate::packet::TransportPacket {
        let mut buf = [0xFFu8; PACKET_LEN];
        buf[0] = SYNC_BYTE;
        buf[1] = 0x40 | ((pid >> 8) as u8 & 0x1F);
        buf[2] = (pid & 0xFF) as u8;
        buf[3] = 0x10;
        crate::packet::TransportPacket::from_raw(buf)
    }

    #[test]
    fn scenario_a_minimal_pat_rewrite() {
        let cache = Arc::new(Cache::new(Arc::new(EventBus::new())));
        cache.load(490_000_000);
        cache.set_tsid(0x1234);
        cache.add_service(0x1234, ServiceId(0x0100));
        cache.set_pmt_pid(0x1234, ServiceId(0x0100), 0x0101);
        cache.add_service(0x1234, ServiceId(0x0200));
        cache.set_pmt_pid(0x1234, ServiceId(0x0200), 0x0201);

        let mut filter = ServiceFilter::new(cache, ServiceId(0x0200));
        let out = filter.process(&pat_packet(PAT_PID)).unwrap();

        let (header, service_id, pmt_pid) = decoded_pat(&out);
        assert_eq!(header.table_id_extension, 0x1234);
        assert_eq!(service_id, 0x0200);
        assert_eq!(pmt_pid, 0x0201);
        assert_eq!(filter.version, 0);
    }

    #[test]
    fn version_bumps_mod_32_on_service_change() {
        let cache = Arc::new(Cache::new(Arc::new(EventBus::new())));
        cache.load(490_000_000);
        cache.set_tsid(0x1234);
        cache.add_service(0x1234, ServiceId(0x0100));
        cache.set_pmt_pid(0x1234, ServiceId(0x0100), 0x0101);
        cache.add_service(0x1234, ServiceId(0x0200));
        cache.set_pmt_pid(0x1234, ServiceId(0x0200), 0x0201);

        let mut filter = ServiceFilter::new(cache.clone(), ServiceId(0x0100));
        filter.process(&pat_packet(PAT_PID));
        assert_eq!(filter.version, 0);

        filter.set_service(ServiceId(0x0200));
        filter.process(&pat_packet(PAT_PID));
        assert_eq!(filter.version, 1);
    }

    #[test]
    fn only_pat_and_selected_service_pids_pass() {
        let cache = Arc::new(Cache::new(Arc::new(EventBus::new())));
        cache.load(490_000_000);
        cache.set_tsid(0x1234);
        cache.add_service(0x1234, ServiceId(0x0200));
        cache.set_pmt_pid(0x1234, ServiceId(0x0200), 0x0201);
        cache.update_pids(
            ServiceId(0x0200),
            vec![PidEntry { pid: 0x0300, stream_type: 2, subtype: 0 }],
            1,
        );

        let mut filter = ServiceFilter::new(cache, ServiceId(0x0200));
        filter.process(&pat_packet(PAT_PID));

        assert!(filter.accepts(PAT_PID));
        assert!(filter.accepts(0x0201));
        assert!(filter.accepts(0x0300));
        assert!(!filter.accepts(0x0999));
    }
}
