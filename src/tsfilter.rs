//! TS Filter (C3): reads packets from a packet source, fans them out to an
//! ordered list of PID Filters, and tracks rolling bitrate.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::instrument;

use crate::error::Result;
use crate::packet::{TransportPacket, PACKET_LEN};
use crate::pidfilter::PidFilter;

/// Anything that can hand the TS Filter a batch of raw packets. The
/// Adapter (C2) is the production implementation; tests substitute an
/// in-memory queue.
pub trait PacketSource: Send {
    /// Reads up to `max` packets, appending them to `out`. Returns the
    /// number of packets read; 0 means "nothing available right now", not
    /// necessarily end of stream.
    fn read_packets(&mut self, max: usize, out: &mut Vec<TransportPacket>) -> Result<usize>;
}

/// A `PacketSource` backed by an in-memory queue, standing in for the
/// (out-of-scope) file-backed fake adapter in this crate's own tests.
#[derive(Default)]
pub struct QueueSource {
    queue: VecDeque<TransportPacket>,
}

impl QueueSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, packet: TransportPacket) {
        self.queue.push_back(packet);
    }
}

impl PacketSource for QueueSource {
    fn read_packets(&mut self, max: usize, out: &mut Vec<TransportPacket>) -> Result<usize> {
        let mut n = 0;
        while n < max {
            match self.queue.pop_front() {
                Some(p) => {
                    out.push(p);
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

const BITRATE_WINDOW: Duration = Duration::from_secs(1);

struct BitrateMeter {
    window_start: Instant,
    bytes_in_window: u64,
    last_bitrate: f64,
}

impl BitrateMeter {
    fn new() -> Self {
        BitrateMeter {
            window_start: Instant::now(),
            bytes_in_window: 0,
            last_bitrate: 0.0,
        }
    }

    fn record(&mut self, bytes: u64) {
        self.bytes_in_window += bytes;
        let elapsed = self.window_start.elapsed();
        if elapsed >= BITRATE_WINDOW {
            self.last_bitrate = (self.bytes_in_window as f64 * 8.0) / elapsed.as_secs_f64();
            self.bytes_in_window = 0;
            self.window_start = Instant::now();
        }
    }

    fn bits_per_second(&self) -> f64 {
        self.last_bitrate
    }
}

/// Owns the ordered list of [`PidFilter`]s and one read loop. The filter
/// list is guarded by a single mutex (spec.md §4.4); the read loop holds it
/// for the duration of one packet's dispatch across the whole list, so a
/// structural change (add/remove) is serialized against in-flight
/// dispatch but never held across a blocking read.
pub struct TsFilter {
    filters: Mutex<Vec<PidFilter>>,
    meter: Mutex<BitrateMeter>,
    batch: Vec<TransportPacket>,
}

impl Default for TsFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl TsFilter {
    pub fn new() -> Self {
        TsFilter {
            filters: Mutex::new(Vec::new()),
            meter: Mutex::new(BitrateMeter::new()),
            batch: Vec::new(),
        }
    }

    pub fn add_filter(&self, filter: PidFilter) {
        self.filters.lock().push(filter);
    }

    pub fn remove_filter(&self, name: &str) {
        self.filters.lock().retain(|f| f.name != name);
    }

    pub fn bits_per_second(&self) -> f64 {
        self.meter.lock().bits_per_second()
    }

    /// Runs one loop iteration per spec.md §4.3: read up to `max_batch`
    /// packets, then for each packet, for each enabled filter in insertion
    /// order, run predicate → processor → sink.
    #[instrument(skip(self, source))]
    pub fn poll(&mut self, source: &mut dyn PacketSource, max_batch: usize) -> Result<usize> {
        self.batch.clear();
        let n = source.read_packets(max_batch, &mut self.batch)?;

        if n > 0 {
            let mut filters = self.filters.lock();
            for packet in &self.batch {
                for filter in filters.iter_mut().filter(|f| f.enabled()) {
                    filter.dispatch(packet);
                }
            }
            drop(filters);
            self.meter.lock().record((n * PACKET_LEN) as u64);
        }

        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pidfilter::{NullSink, PidFilter, SimplePids};

    fn pkt(pid: u16) -> TransportPacket {
        let mut buf = [0xFFu8; PACKET_LEN];
        buf[0] = crate::packet::SYNC_BYTE;
        buf[1] = (pid >> 8) as u8 & 0x1F;
        buf[2] = (pid & 0xFF) as u8;
        buf[3] = 0x10;
        TransportPacket::from_raw(buf)
    }

    #[test]
    fn poll_dispatches_to_all_enabled_filters_in_order() {
        let mut ts = TsFilter::new();
        ts.add_filter(PidFilter::new(
            "a",
            Box::new(SimplePids::new([0x100])),
            Box::new(NullSink::default()),
        ));
        ts.add_filter(PidFilter::new(
            "b",
            Box::new(SimplePids::new([0x100, 0x200])),
            Box::new(NullSink::default()),
        ));

        let mut source = QueueSource::new();
        source.push(pkt(0x100));
        source.push(pkt(0x200));

        let n = ts.poll(&mut source, 10).unwrap();
        assert_eq!(n, 2);

        let filters = ts.filters.lock();
        assert_eq!(filters[0].stats().filtered, 1);
        assert_eq!(filters[1].stats().filtered, 2);
    }

    #[test]
    fn empty_source_is_a_no_op() {
        let mut ts = TsFilter::new();
        let mut source = QueueSource::new();
        assert_eq!(ts.poll(&mut source, 10).unwrap(), 0);
        assert_eq!(ts.bits_per_second(), 0.0);
    }
}
