//! Service Description Table processor: extracts the human-readable name
//! and provider for each service and pushes them into the Cache.

use std::sync::Arc;

use tracing::debug;

use crate::cache::{Cache, ServiceId};
use crate::packet::TransportPacket;
use crate::psi::{SectionProcessor, TableAssembly};

pub const SDT_PID: u16 = 0x0011;
const TABLE_ID_ACTUAL: u8 = 0x42;
const TABLE_ID_OTHER: u8 = 0x46;
const SERVICE_DESCRIPTOR_TAG: u8 = 0x48;

pub struct SdtProcessor {
    cache: Arc<Cache>,
    assembly: TableAssembly,
}

impl SdtProcessor {
    pub fn new(cache: Arc<Cache>) -> Self {
        SdtProcessor {
            cache,
            assembly: TableAssembly::new(),
        }
    }

    fn decode_service_descriptor(data: &[u8]) -> Option<(String, String)> {
        if data.is_empty() {
            return None;
        }
        let provider_len = data[1] as usize;
        let provider_start = 2;
        let provider_end = provider_start + provider_len;
        if provider_end > data.len() {
            return None;
        }
        let provider = String::from_utf8_lossy(&data[provider_start..provider_end]).into_owned();

        let name_len_pos = provider_end;
        if name_len_pos >= data.len() {
            return None;
        }
        let name_len = data[name_len_pos] as usize;
        let name_start = name_len_pos + 1;
        let name_end = name_start + name_len;
        if name_end > data.len() {
            return None;
        }
        let name = String::from_utf8_lossy(&data[name_start..name_end]).into_owned();
        Some((name, provider))
    }
}

impl SectionProcessor for SdtProcessor {
    fn feed_packet(&mut self, packet: &TransportPacket) {
        if packet.pid() != SDT_PID {
            return;
        }
        let mut scratch = Vec::new();
        let Some((header, start, end)) = self.assembly.push(packet, &mut scratch) else {
            return;
        };
        if header.table_id != TABLE_ID_ACTUAL && header.table_id != TABLE_ID_OTHER {
            return;
        }

        // payload = original_network_id(2) + reserved(1) + service loop
        let payload = &scratch[start..end];
        if payload.len() < 3 {
            return;
        }
        let mut i = 3;
        while i + 5 <= payload.len() {
            let service_id = u16::from_be_bytes([payload[i], payload[i + 1]]);
            let descriptors_loop_len =
                (u16::from_be_bytes([payload[i + 3], payload[i + 4]]) & 0x0FFF) as usize;
            let desc_start = i + 5;
            let desc_end = desc_start + descriptors_loop_len;
            if desc_end > payload.len() {
                break;
            }
            let mut d = desc_start;
            while d + 2 <= desc_end {
                let tag = payload[d];
                let len = payload[d + 1] as usize;
                let body_start = d + 2;
                let body_end = body_start + len;
                if body_end > desc_end {
                    break;
                }
                if tag == SERVICE_DESCRIPTOR_TAG {
                    if let Some((name, provider)) =
                        Self::decode_service_descriptor(&payload[body_start..body_end])
                    {
                        debug!(service_id, %name, "SDT service name");
                        self.cache
                            .update_service_name(ServiceId(service_id), name, provider);
                    }
                }
                d = body_end;
            }
            i = desc_end;
        }
    }

    fn reset(&mut self) {
        self.assembly.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventbus::EventBus;
    use crate::packet::{crc32_mpeg2, PACKET_LEN, SYNC_BYTE};

    fn build_sdt_packet(tsid: u16, service_id: u16, name: &str, provider: &str) -> TransportPacket {
        let mut descriptor = vec![0x01u8]; // service_type
        descriptor.push(provider.len() as u8);
        descriptor.extend_from_slice(provider.as_bytes());
        descriptor.push(name.len() as u8);
        descriptor.extend_from_slice(name.as_bytes());

        let mut desc_block = vec![SERVICE_DESCRIPTOR_TAG, descriptor.len() as u8];
        desc_block.extend_from_slice(&descriptor);

        let mut service_loop = Vec::new();
        service_loop.extend_from_slice(&service_id.to_be_bytes());
        service_loop.push(0xFC); // reserved + EIT flags
        service_loop.extend_from_slice(&(0xFC00 | desc_block.len() as u16).to_be_bytes());
        service_loop.extend_from_slice(&desc_block);

        let mut payload = Vec::new();
        payload.extend_from_slice(&0x0001u16.to_be_bytes()); // original_network_id
        payload.push(0xFF); // reserved
        payload.extend_from_slice(&service_loop);

        let section_len = 5 + payload.len() + 4;
        let mut section = vec![0x42, 0xB0 | ((section_len >> 8) as u8 & 0x0F), section_len as u8];
        section.extend_from_slice(&tsid.to_be_bytes());
        section.push(0x01); // version 0, current_next = 1
        section.push(0x00);
        section.push(0x00);
        section.extend_from_slice(&payload);
        let crc = crc32_mpeg2(&section);
        section.extend_from_slice(&crc.to_be_bytes());

        let mut buf = [0xFFu8; PACKET_LEN];
        buf[0] = SYNC_BYTE;
        buf[1] = 0x40 | ((SDT_PID >> 8) as u8 & 0x1F);
        buf[2] = (SDT_PID & 0xFF) as u8;
        buf[3] = 0x10;
        buf[4] = 0x00;
        buf[5..5 + section.len()].copy_from_slice(&section);
        TransportPacket::from_raw(buf)
    }

    #[test]
    fn sdt_updates_service_name_once() {
        let cache = Arc::new(Cache::new(Arc::new(EventBus::new())));
        cache.load(490_000_000);
        cache.add_service(0x1234, ServiceId(0x0200));

        let mut sdt = SdtProcessor::new(cache.clone());
        let pkt = build_sdt_packet(0x1234, 0x0200, "Test Channel", "Test Provider");
        sdt.feed_packet(&pkt);

        let svc = cache.find_service_by_name("Test Channel").unwrap();
        assert_eq!(svc.service_id, ServiceId(0x0200));
        assert_eq!(svc.provider, "Test Provider");
    }
}
