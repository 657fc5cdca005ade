//! End-to-end composition test: PAT/PMT reassembly feeding the Cache,
//! with a TsFilter-driven ServiceFilter rewriting the live packet stream
//! for one selected service. Each stage is already covered in isolation
//! by its own module's inline tests; this is the one place they run
//! together through the real dispatch path (see DESIGN.md).

use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;

use dvbcore::cache::{Cache, PidEntry, ServiceId};
use dvbcore::error::Result;
use dvbcore::eventbus::EventBus;
use dvbcore::packet::{crc32_mpeg2, PACKET_LEN, SYNC_BYTE};
use dvbcore::pidfilter::{PidFilter, Sink};
use dvbcore::psi::pat::{PatProcessor, PAT_PID};
use dvbcore::psi::pmt::PmtProcessor;
use dvbcore::psi::SectionProcessor;
use dvbcore::tsfilter::{QueueSource, TsFilter};
use dvbcore::{ServiceFilter, TransportPacket};

const PMT_PID_A: u16 = 0x0101;
const PMT_PID_B: u16 = 0x0201;

/// A sink that hands every packet it receives to a shared buffer, so the
/// test can inspect what a filter emitted without reaching into
/// `TsFilter`'s private filter list.
#[derive(Clone, Default)]
struct RecordingSink {
    seen: Arc<Mutex<Vec<u16>>>,
}

impl Sink for RecordingSink {
    fn send_packet(&mut self, packet: &TransportPacket) -> Result<()> {
        self.seen.lock().unwrap().push(packet.pid());
        Ok(())
    }
}

fn null_packet(pid: u16) -> TransportPacket {
    let mut buf = [0xFFu8; PACKET_LEN];
    buf[0] = SYNC_BYTE;
    buf[1] = (pid >> 8) as u8 & 0x1F;
    buf[2] = (pid & 0xFF) as u8;
    buf[3] = 0x10;
    TransportPacket::from_raw(buf)
}

fn build_pat_packet(tsid: u16, programs: &[(u16, u16)]) -> TransportPacket {
    let mut payload = Vec::new();
    for (sid, pid) in programs {
        payload.extend_from_slice(&sid.to_be_bytes());
        payload.extend_from_slice(&(0xE000 | pid).to_be_bytes());
    }
    let section_len = 5 + payload.len() + 4;
    let mut section = vec![0x00, 0xB0 | ((section_len >> 8) as u8 & 0x0F), section_len as u8];
    section.extend_from_slice(&tsid.to_be_bytes());
    section.push(0x01); // version 0, current_next = 1
    section.push(0x00);
    section.push(0x00);
    section.extend_from_slice(&payload);
    let crc = crc32_mpeg2(&section);
    section.extend_from_slice(&crc.to_be_bytes());

    let mut buf = [0xFFu8; PACKET_LEN];
    buf[0] = SYNC_BYTE;
    buf[1] = 0x40;
    buf[2] = 0x00;
    buf[3] = 0x10;
    buf[4] = 0x00;
    buf[5..5 + section.len()].copy_from_slice(&section);
    TransportPacket::from_raw(buf)
}

fn build_pmt_packet(pmt_pid: u16, program_number: u16, pcr_pid: u16, streams: &[(u8, u16)]) -> TransportPacket {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(0xE000 | pcr_pid).to_be_bytes());
    payload.extend_from_slice(&[0xF0, 0x00]); // program_info_length = 0
    for (stream_type, pid) in streams {
        payload.push(*stream_type);
        payload.extend_from_slice(&(0xE000 | pid).to_be_bytes());
        payload.extend_from_slice(&[0xF0, 0x00]); // ES_info_length = 0
    }
    let section_len = 5 + payload.len() + 4;
    let mut section = vec![0x02, 0xB0 | ((section_len >> 8) as u8 & 0x0F), section_len as u8];
    section.extend_from_slice(&program_number.to_be_bytes());
    section.push(0x01);
    section.push(0x00);
    section.push(0x00);
    section.extend_from_slice(&payload);
    let crc = crc32_mpeg2(&section);
    section.extend_from_slice(&crc.to_be_bytes());

    let mut buf = [0xFFu8; PACKET_LEN];
    buf[0] = SYNC_BYTE;
    buf[1] = 0x40 | ((pmt_pid >> 8) as u8 & 0x1F);
    buf[2] = (pmt_pid & 0xFF) as u8;
    buf[3] = 0x10;
    buf[4] = 0x00;
    buf[5..5 + section.len()].copy_from_slice(&section);
    TransportPacket::from_raw(buf)
}

/// Simulates the composing application's PSI-feeding loop: PAT packets go
/// to the PatProcessor, and every packet is offered to the PmtProcessor,
/// which ignores PIDs it isn't tracking. Once the PAT names a service's
/// PMT PID, `pmt.track()` is called to start reassembly for it (spec.md
/// §5's Cache-mediated decoupling — see DESIGN.md's cache/eventbus note).
fn feed_psi(pat: &mut PatProcessor, pmt: &mut PmtProcessor, packet: &TransportPacket) {
    if packet.pid() == PAT_PID {
        pat.feed_packet(packet);
    }
    pmt.feed_packet(packet);
}

#[test]
fn full_pipeline_rewrites_selected_service_and_excludes_the_other() {
    let cache = Arc::new(Cache::new(Arc::new(EventBus::new())));
    cache.load(490_000_000);

    let mut pat = PatProcessor::new(cache.clone());
    let mut pmt = PmtProcessor::new(cache.clone());

    feed_psi(
        &mut pat,
        &mut pmt,
        &build_pat_packet(0x1234, &[(0x0100, PMT_PID_A), (0x0200, PMT_PID_B)]),
    );
    pmt.track(ServiceId(0x0100), PMT_PID_A);
    pmt.track(ServiceId(0x0200), PMT_PID_B);

    feed_psi(&mut pat, &mut pmt, &build_pmt_packet(PMT_PID_A, 0x0100, 0x0300, &[(4, 0x0301)]));
    feed_psi(&mut pat, &mut pmt, &build_pmt_packet(PMT_PID_B, 0x0200, 0x0400, &[(2, 0x0401)]));

    assert_eq!(cache.get_service(ServiceId(0x0100)).unwrap().pmt_pid, Some(PMT_PID_A));
    assert_eq!(cache.get_service(ServiceId(0x0200)).unwrap().pmt_pid, Some(PMT_PID_B));
    let pids_b = cache.get_service(ServiceId(0x0200)).unwrap().pids.clone();
    assert!(pids_b.iter().any(|e| e.pid == 0x0400));

    let sink = RecordingSink::default();
    let mut ts = TsFilter::new();
    ts.add_filter(PidFilter::new(
        "service",
        Box::new(ServiceFilter::new(cache.clone(), ServiceId(0x0200))),
        Box::new(sink.clone()),
    ));

    let mut source = QueueSource::new();
    source.push(null_packet(PAT_PID));
    source.push(null_packet(PMT_PID_A)); // belongs to the other service, must not pass
    source.push(null_packet(PMT_PID_B));
    source.push(null_packet(0x0400)); // selected service's PCR PID

    let n = ts.poll(&mut source, 10).unwrap();
    assert_eq!(n, 4);

    let seen = sink.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![PAT_PID, PMT_PID_B, 0x0400]);
}

#[test]
fn other_services_pmt_pid_is_dropped_once_a_service_is_selected() {
    let cache = Arc::new(Cache::new(Arc::new(EventBus::new())));
    cache.load(490_000_000);
    cache.set_tsid(0x1234);
    cache.add_service(0x1234, ServiceId(0x0100));
    cache.set_pmt_pid(0x1234, ServiceId(0x0100), PMT_PID_A);
    cache.add_service(0x1234, ServiceId(0x0200));
    cache.set_pmt_pid(0x1234, ServiceId(0x0200), PMT_PID_B);
    cache.update_pids(
        ServiceId(0x0200),
        vec![PidEntry { pid: 0x0400, stream_type: 2, subtype: 0 }],
        1,
    );

    let sink = RecordingSink::default();
    let mut ts = TsFilter::new();
    ts.add_filter(PidFilter::new(
        "service",
        Box::new(ServiceFilter::new(cache.clone(), ServiceId(0x0200))),
        Box::new(sink.clone()),
    ));

    let mut source = QueueSource::new();
    source.push(null_packet(PAT_PID));
    source.push(null_packet(0x0400));
    source.push(null_packet(PMT_PID_A)); // other service's PMT PID, must be dropped
    ts.poll(&mut source, 10).unwrap();

    assert_eq!(sink.seen.lock().unwrap().clone(), vec![PAT_PID, 0x0400]);
}
