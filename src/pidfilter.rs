//! Generic PID Filter record (C4): predicate → processor → sink, with
//! per-filter statistics. Per the "opaque C polymorphism" redesign note in
//! spec.md §9, sinks are expressed as one capability trait rather than a
//! fn-pointer table.

use crate::error::Result;
use crate::packet::TransportPacket;

/// Output capability for a PID Filter. `send_packet` receives whatever the
/// processor produced (possibly a rewritten or freshly synthesized
/// packet); sink errors are never fatal to the packet loop (spec.md §4.3).
pub trait Sink: Send {
    fn send_packet(&mut self, packet: &TransportPacket) -> Result<()>;
}

/// A sink that only counts bytes, useful for tests and for filters that
/// exist purely to drive a Processor (e.g. a PSI table with no pass-through
/// output).
#[derive(Default)]
pub struct NullSink {
    pub packets: u64,
}

impl Sink for NullSink {
    fn send_packet(&mut self, _packet: &TransportPacket) -> Result<()> {
        self.packets += 1;
        Ok(())
    }
}

/// A sink that appends every packet's bytes to an in-memory buffer, used by
/// the integration-test scenarios and by a would-be file sink.
#[derive(Default)]
pub struct VecSink {
    pub packets: Vec<TransportPacket>,
}

impl Sink for VecSink {
    fn send_packet(&mut self, packet: &TransportPacket) -> Result<()> {
        self.packets.push(*packet);
        Ok(())
    }
}

/// Predicate + rewrite step invoked for every packet a filter's predicate
/// accepted. The default is the identity pass-through.
pub trait Processor: Send {
    /// `true` if this PID is of interest at all (side-effect-free, per
    /// spec.md §4.3's contract invariant).
    fn accepts(&self, pid: u16) -> bool;

    /// Possibly rewrite/replace the packet. Returning `None` drops it
    /// (counted as processed but not output).
    fn process(&mut self, packet: &TransportPacket) -> Option<TransportPacket>;

    fn reset(&mut self) {}
}

/// A predicate that passes through unmodified any packet whose PID is in a
/// small fixed set (≤ 32 PIDs, per spec.md §4.4).
#[derive(Clone, Default)]
pub struct SimplePids {
    pids: Vec<u16>,
}

impl SimplePids {
    pub fn new(pids: impl IntoIterator<Item = u16>) -> Self {
        let pids: Vec<u16> = pids.into_iter().collect();
        debug_assert!(pids.len() <= 32, "SimplePids supports at most 32 PIDs");
        SimplePids { pids }
    }

    pub fn contains(&self, pid: u16) -> bool {
        self.pids.contains(&pid)
    }

    pub fn set(&mut self, pids: impl IntoIterator<Item = u16>) {
        self.pids = pids.into_iter().collect();
    }
}

impl Processor for SimplePids {
    fn accepts(&self, pid: u16) -> bool {
        self.contains(pid)
    }

    fn process(&mut self, packet: &TransportPacket) -> Option<TransportPacket> {
        Some(*packet)
    }
}

#[derive(Default, Debug, Clone, Copy)]
pub struct FilterStats {
    pub filtered: u64,
    pub processed: u64,
    pub output: u64,
}

/// Record as described in spec.md §3/§4.4: a predicate/processor/sink
/// triple, independently enable-able, carrying its own counters.
pub struct PidFilter {
    pub name: String,
    enabled: bool,
    processor: Box<dyn Processor>,
    sink: Box<dyn Sink>,
    stats: FilterStats,
}

impl PidFilter {
    pub fn new(name: impl Into<String>, processor: Box<dyn Processor>, sink: Box<dyn Sink>) -> Self {
        PidFilter {
            name: name.into(),
            enabled: true,
            processor,
            sink,
            stats: FilterStats::default(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    /// Dispatches one packet per the §4.3 contract: predicate → processor →
    /// sink, updating counters. No-op if disabled or the predicate rejects.
    pub fn dispatch(&mut self, packet: &TransportPacket) {
        if !self.enabled || !self.processor.accepts(packet.pid()) {
            return;
        }
        self.stats.filtered += 1;
        self.stats.processed += 1;
        if let Some(out) = self.processor.process(packet) {
            self.stats.output += 1;
            if let Err(e) = self.sink.send_packet(&out) {
                tracing::warn!(filter = %self.name, error = %e, "sink delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(pid: u16) -> TransportPacket {
        let mut buf = [0xFFu8; crate::packet::PACKET_LEN];
        buf[0] = crate::packet::SYNC_BYTE;
        buf[1] = (pid >> 8) as u8 & 0x1F;
        buf[2] = (pid & 0xFF) as u8;
        buf[3] = 0x10;
        TransportPacket::from_raw(buf)
    }

    #[test]
    fn dispatch_counts_filtered_processed_output() {
        let mut filter = PidFilter::new(
            "test",
            Box::new(SimplePids::new([0x100])),
            Box::new(NullSink::default()),
        );
        filter.dispatch(&pkt(0x100));
        filter.dispatch(&pkt(0x200));
        let stats = filter.stats();
        assert_eq!(stats.filtered, 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.output, 1);
    }

    #[test]
    fn disabled_filter_is_inert() {
        let mut filter = PidFilter::new(
            "test",
            Box::new(SimplePids::new([0x100])),
            Box::new(NullSink::default()),
        );
        filter.disable();
        filter.dispatch(&pkt(0x100));
        assert_eq!(filter.stats().filtered, 0);
    }
}
