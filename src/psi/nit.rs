//! Network Information Table processor: decodes network-level metadata
//! (network id and the list of transport streams it describes). The core
//! only needs this to the extent that any well-formed NIT must assemble
//! cleanly; downstream consumption of the full descriptor loop is left to
//! external collaborators (spec.md §1).

use tracing::debug;

use crate::packet::TransportPacket;
use crate::psi::{SectionProcessor, TableAssembly};

pub const NIT_PID: u16 = 0x0010;
const TABLE_ID_ACTUAL: u8 = 0x40;
const TABLE_ID_OTHER: u8 = 0x41;

#[derive(Debug, Clone, Copy)]
pub struct TransportStreamRef {
    pub transport_stream_id: u16,
    pub original_network_id: u16,
}

#[derive(Debug, Clone)]
pub struct NetworkInformation {
    pub network_id: u16,
    pub transport_streams: Vec<TransportStreamRef>,
}

pub struct NitProcessor {
    assembly: TableAssembly,
    decoded: Option<NetworkInformation>,
}

impl Default for NitProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl NitProcessor {
    pub fn new() -> Self {
        NitProcessor {
            assembly: TableAssembly::new(),
            decoded: None,
        }
    }

    pub fn decoded(&self) -> Option<&NetworkInformation> {
        self.decoded.as_ref()
    }

    fn decode_payload(network_id: u16, payload: &[u8]) -> NetworkInformation {
        let mut transport_streams = Vec::new();
        if payload.len() < 2 {
            return NetworkInformation {
                network_id,
                transport_streams,
            };
        }
        let network_desc_len = (u16::from_be_bytes([payload[0], payload[1]]) & 0x0FFF) as usize;
        let mut i = 2 + network_desc_len;
        if i + 2 > payload.len() {
            return NetworkInformation {
                network_id,
                transport_streams,
            };
        }
        let ts_loop_len = (u16::from_be_bytes([payload[i], payload[i + 1]]) & 0x0FFF) as usize;
        i += 2;
        let loop_end = (i + ts_loop_len).min(payload.len());
        while i + 6 <= loop_end {
            let tsid = u16::from_be_bytes([payload[i], payload[i + 1]]);
            let onid = u16::from_be_bytes([payload[i + 2], payload[i + 3]]);
            let desc_len = (u16::from_be_bytes([payload[i + 4], payload[i + 5]]) & 0x0FFF) as usize;
            transport_streams.push(TransportStreamRef {
                transport_stream_id: tsid,
                original_network_id: onid,
            });
            i += 6 + desc_len;
        }
        NetworkInformation {
            network_id,
            transport_streams,
        }
    }
}

impl SectionProcessor for NitProcessor {
    fn feed_packet(&mut self, packet: &TransportPacket) {
        if packet.pid() != NIT_PID {
            return;
        }
        let mut scratch = Vec::new();
        let Some((header, start, end)) = self.assembly.push(packet, &mut scratch) else {
            return;
        };
        if header.table_id != TABLE_ID_ACTUAL && header.table_id != TABLE_ID_OTHER {
            return;
        }
        let info = Self::decode_payload(header.table_id_extension, &scratch[start..end]);
        debug!(network_id = info.network_id, streams = info.transport_streams.len(), "NIT decoded");
        self.decoded = Some(info);
    }

    fn reset(&mut self) {
        self.assembly.reset();
        self.decoded = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{crc32_mpeg2, PACKET_LEN, SYNC_BYTE};

    #[test]
    fn decodes_network_id_and_transport_streams() {
        let mut payload = vec![0xF0u8, 0x00]; // network_descriptors_length = 0
        let mut ts_loop = Vec::new();
        ts_loop.extend_from_slice(&0x1234u16.to_be_bytes());
        ts_loop.extend_from_slice(&0x0001u16.to_be_bytes());
        ts_loop.extend_from_slice(&0xF000u16.to_be_bytes()); // descriptors_length = 0
        payload.extend_from_slice(&(0xF000 | ts_loop.len() as u16).to_be_bytes());
        payload.extend_from_slice(&ts_loop);

        let section_len = 5 + payload.len() + 4;
        let mut section = vec![0x40, 0xB0 | ((section_len >> 8) as u8 & 0x0F), section_len as u8];
        section.extend_from_slice(&0x0001u16.to_be_bytes()); // network_id
        section.push(0x01);
        section.push(0x00);
        section.push(0x00);
        section.extend_from_slice(&payload);
        let crc = crc32_mpeg2(&section);
        section.extend_from_slice(&crc.to_be_bytes());

        let mut buf = [0xFFu8; PACKET_LEN];
        buf[0] = SYNC_BYTE;
        buf[1] = 0x40 | ((NIT_PID >> 8) as u8 & 0x1F);
        buf[2] = (NIT_PID & 0xFF) as u8;
        buf[3] = 0x10;
        buf[4] = 0x00;
        buf[5..5 + section.len()].copy_from_slice(&section);
        let pkt = TransportPacket::from_raw(buf);

        let mut nit = NitProcessor::new();
        nit.feed_packet(&pkt);
        let decoded = nit.decoded().unwrap();
        assert_eq!(decoded.network_id, 1);
        assert_eq!(decoded.transport_streams.len(), 1);
        assert_eq!(decoded.transport_streams[0].transport_stream_id, 0x1234);
    }
}
