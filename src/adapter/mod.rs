//! Adapter (C2): owns a tuner's frontend and demux devices, the hardware
//! PID filter slot pool, and the tune/lock state machine. The state
//! machine and filter-pool bookkeeping are hardware-agnostic; the real
//! ioctl plumbing lives in [`frontend`] and [`demux`], carried over from
//! the teacher crate this module is built from.

pub mod demux;
pub mod diseqc;
pub mod frontend;
pub mod properties;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::eventbus::EventBus;
use crate::tuning::{DeliverySystem, TuningParams};

pub const EVENT_SOURCE: &str = "DVBAdapter";

/// Default frontend lock-wait timeout (spec.md §5: "implementation-defined
/// timeout (default ≈ 3 s)").
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

/// Conservative hardware PID filter slot count assumed for a
/// hardware-restricted adapter when no chipset-specific probe is available
/// (see [`HardwareAdapter::open`]; recorded in DESIGN.md).
pub const DEFAULT_HW_FILTER_SLOTS: usize = 32;

/// PID value meaning "pass everything" (spec.md §3).
pub const PID_ALL: u16 = crate::packet::PID_ALL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Idle,
    Tuning,
    Locked,
    Unlocked,
    TuneFailed,
}

impl State {
    fn event_name(&self) -> &'static str {
        match self {
            State::Closed => "Closed",
            State::Idle => "Idle",
            State::Tuning => "Tuning",
            State::Locked => "Locked",
            State::Unlocked => "Unlocked",
            State::TuneFailed => "TuneFailed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AdapterStatus {
    pub locked: bool,
    pub ber: u64,
    pub signal: u16,
    pub snr: u16,
    pub uncorrected_blocks: u64,
}

/// A `TuneFailed` event payload (Scenario D: callers key on adapter index).
#[derive(Debug, Clone, Copy)]
pub struct TuneFailedPayload {
    pub adapter_index: u32,
}

/// Reference-counted pool of hardware demux filter slots. PID 8192
/// ([`PID_ALL`]) is exempt from the slot limit — it represents the
/// adapter's own full-TS tap, not a discrete hardware filter.
struct FilterPool {
    max_slots: Option<usize>,
    refcounts: HashMap<u16, u32>,
}

impl FilterPool {
    fn new(max_slots: Option<usize>) -> Self {
        FilterPool {
            max_slots,
            refcounts: HashMap::new(),
        }
    }

    fn used_slots(&self) -> usize {
        self.refcounts.len()
    }

    fn allocate(&mut self, pid: u16) -> Result<()> {
        if pid == PID_ALL {
            *self.refcounts.entry(pid).or_insert(0) += 1;
            return Ok(());
        }
        if let Some(count) = self.refcounts.get_mut(&pid) {
            *count += 1;
            return Ok(());
        }
        if let Some(max) = self.max_slots {
            if self.used_slots() >= max {
                return Err(Error::Busy(format!(
                    "no hardware filter slot available for pid {pid}"
                )));
            }
        }
        self.refcounts.insert(pid, 1);
        Ok(())
    }

    fn release(&mut self, pid: u16) -> Result<()> {
        match self.refcounts.get_mut(&pid) {
            Some(count) if *count > 1 => {
                *count -= 1;
                Ok(())
            }
            Some(_) => {
                self.refcounts.remove(&pid);
                Ok(())
            }
            None => Err(Error::NotFound(format!("pid {pid} not allocated"))),
        }
    }
}

/// The surface every adapter implementation exposes, matching spec.md §4.2.
/// Implemented by [`HardwareAdapter`] for real kernel devices and by
/// `MockAdapter` in tests in place of the out-of-scope file-backed fake
/// adapter.
pub trait Adapter: Send {
    fn tune(&self, delivery_system: DeliverySystem, params: TuningParams) -> Result<()>;
    fn set_active(&self, active: bool) -> Result<()>;
    fn allocate_filter(&self, pid: u16) -> Result<()>;
    fn release_filter(&self, pid: u16) -> Result<()>;
    fn status(&self) -> AdapterStatus;
    fn read_dvr(&self, buf: &mut [u8]) -> Result<usize>;
    fn supports(&self, delivery_system: DeliverySystem, key: &str, value: &str) -> bool;
    fn state(&self) -> State;
}

/// A real kernel DVB adapter: frontend + demux + DVR fds, behind the
/// state machine described in spec.md §4.2.
pub struct HardwareAdapter {
    index: u32,
    hw_restricted: bool,
    lnb_sharing: bool,
    events: Arc<EventBus>,
    state: Mutex<State>,
    pool: Mutex<FilterPool>,
    last_tune: Mutex<Option<(DeliverySystem, TuningParams)>>,
    status: Mutex<AdapterStatus>,
    zero_reads: AtomicBool,
    /// Present once `from_parts` is handed an already-open frontend; used
    /// for the real DiSEqC ioctl sequence and for `status()`. `None` keeps
    /// the adapter usable as a pure state machine (e.g. under `MockAdapter`
    /// -style unit tests that construct a `HardwareAdapter` directly).
    fe: Mutex<Option<frontend::FeDevice>>,
    /// The DVR character device `read_dvr` drains demultiplexed packets
    /// from; absent until a real tune has opened it.
    dvr: Mutex<Option<demux::DvrDevice>>,
}

impl HardwareAdapter {
    /// Opens frontend and DVR devices for `index`, probes capabilities via
    /// `FeDevice::open_rw`, and promotes to hardware-restricted mode if
    /// `hw_restricted_hint` is set (spec.md §4.2 `open`). The per-adapter
    /// hardware filter count isn't exposed by any ioctl this crate's `fe`/
    /// `dmx` bindings cover, so a restricted adapter is conservatively
    /// capped at [`DEFAULT_HW_FILTER_SLOTS`] (recorded as a DESIGN.md
    /// decision rather than invented per-chipset).
    pub fn open(index: u32, hw_restricted_hint: bool, events: Arc<EventBus>) -> Result<Self> {
        let fe = frontend::FeDevice::open_rw(index, 0)
            .map_err(Error::TunerHardware)?;
        let dvr = demux::DvrDevice::open_ro(index, 0).map_err(Error::TunerHardware)?;
        let max_slots = hw_restricted_hint.then_some(DEFAULT_HW_FILTER_SLOTS);
        let adapter = Self::from_parts(index, hw_restricted_hint, false, max_slots, events);
        *adapter.fe.lock() = Some(fe);
        *adapter.dvr.lock() = Some(dvr);
        Ok(adapter)
    }

    /// Constructs a `HardwareAdapter` state machine, optionally without any
    /// backing devices (used directly by tests in place of the out-of-scope
    /// file-backed fake adapter; production start-up goes through `open`).
    pub fn from_parts(
        index: u32,
        hw_restricted: bool,
        lnb_sharing: bool,
        max_filter_slots: Option<usize>,
        events: Arc<EventBus>,
    ) -> Self {
        HardwareAdapter {
            index,
            hw_restricted,
            lnb_sharing,
            events,
            state: Mutex::new(State::Idle),
            pool: Mutex::new(FilterPool::new(if hw_restricted {
                max_filter_slots
            } else {
                None
            })),
            last_tune: Mutex::new(None),
            status: Mutex::new(AdapterStatus::default()),
            zero_reads: AtomicBool::new(false),
            fe: Mutex::new(None),
            dvr: Mutex::new(None),
        }
    }

    fn transition(&self, next: State) {
        *self.state.lock() = next;
        self.events.fire(EVENT_SOURCE, next.event_name(), &self.index);
    }

    /// Drives the frontend-event → state transition. Called from the
    /// Input loop thread when the kernel reports a status change.
    pub fn on_frontend_status(&self, locked: bool) {
        let mut status = self.status.lock();
        status.locked = locked;
        drop(status);

        if locked {
            self.transition(State::Locked);
        } else if *self.state.lock() != State::Closed {
            self.transition(State::Unlocked);
        }
    }

    pub fn on_tune_timeout(&self) {
        self.transition(State::TuneFailed);
        self.events.fire(
            EVENT_SOURCE,
            "TuneFailed",
            &TuneFailedPayload {
                adapter_index: self.index,
            },
        );
        self.transition(State::Unlocked);
    }

    fn apply_satellite_sequence(&self, delivery_system: DeliverySystem, params: &TuningParams) {
        if !matches!(delivery_system, DeliverySystem::DvbS | DeliverySystem::DvbS2) {
            return;
        }
        if self.lnb_sharing {
            info!(adapter = self.index, "LNB-sharing adapter, skipping DiSEqC sequence");
            return;
        }
        match self.fe.lock().as_ref() {
            Some(fe) => {
                if let Err(e) = diseqc::run_sequence_on(fe, params) {
                    warn!(adapter = self.index, error = %e, "DiSEqC sequence failed");
                }
            }
            None => {
                debug!(adapter = self.index, "no frontend device wired, skipping DiSEqC ioctls");
            }
        }
    }
}

impl Adapter for HardwareAdapter {
    fn tune(&self, delivery_system: DeliverySystem, params: TuningParams) -> Result<()> {
        if *self.state.lock() == State::Closed {
            return Err(Error::Protocol("tune requested on a closed adapter"));
        }
        self.apply_satellite_sequence(delivery_system, &params);

        let props = properties::build_properties(delivery_system, &params)?;
        match self.fe.lock().as_ref() {
            Some(fe) => fe.set_properties(&props).map_err(Error::TunerHardware)?,
            None => debug!(adapter = self.index, "no frontend device wired, skipping tune ioctl"),
        }

        *self.last_tune.lock() = Some((delivery_system, params));
        self.transition(State::Tuning);
        // FE_SET_PROPERTY has already been issued above; the resulting
        // HAS_LOCK/TIMEDOUT wait is reported asynchronously by the Input
        // loop through `on_frontend_status`/`on_tune_timeout` (spec.md
        // §4.2: "returns immediately; lock state arrives as an event").
        Ok(())
    }

    fn set_active(&self, active: bool) -> Result<()> {
        if active {
            if let Some((ds, params)) = self.last_tune.lock().clone() {
                return self.tune(ds, params);
            }
            self.transition(State::Idle);
            Ok(())
        } else {
            self.transition(State::Idle);
            Ok(())
        }
    }

    fn allocate_filter(&self, pid: u16) -> Result<()> {
        self.pool.lock().allocate(pid)
    }

    fn release_filter(&self, pid: u16) -> Result<()> {
        self.pool.lock().release(pid)
    }

    fn status(&self) -> AdapterStatus {
        // Refresh from the real frontend if one is wired; otherwise fall
        // back to whatever `on_frontend_status`/`on_tune_timeout` last
        // recorded (e.g. under a `HardwareAdapter` built via `from_parts`
        // with no device, driven purely by simulated frontend events).
        if let Some(fe) = self.fe.lock().as_ref() {
            let mut status = self.status.lock();
            status.ber = fe.read_ber().unwrap_or(status.ber);
            status.signal = fe.read_signal_strength().unwrap_or(status.signal);
            status.snr = fe.read_snr().unwrap_or(status.snr);
            status.uncorrected_blocks = fe.read_unc().unwrap_or(status.uncorrected_blocks);
            return *status;
        }
        *self.status.lock()
    }

    fn read_dvr(&self, buf: &mut [u8]) -> Result<usize> {
        // A zero-byte read is not itself an error (spec.md §4.2 "Failure
        // semantics"); only a persistent run of them is worth a warning.
        if buf.is_empty() {
            return Ok(0);
        }
        let n = match self.dvr.lock().as_mut() {
            Some(dvr) => dvr.read(buf).map_err(Error::TunerHardware)?,
            None => 0,
        };
        if n == 0 {
            if self.zero_reads.swap(true, Ordering::Relaxed) {
                warn!(adapter = self.index, "repeated zero-byte DVR reads");
            }
        } else {
            self.zero_reads.store(false, Ordering::Relaxed);
        }
        Ok(n)
    }

    fn supports(&self, delivery_system: DeliverySystem, _key: &str, _value: &str) -> bool {
        matches!(
            delivery_system,
            DeliverySystem::DvbS
                | DeliverySystem::DvbS2
                | DeliverySystem::DvbC
                | DeliverySystem::DvbT
                | DeliverySystem::DvbT2
                | DeliverySystem::Atsc
                | DeliverySystem::IsdbT
        )
    }

    fn state(&self) -> State {
        *self.state.lock()
    }
}

#[cfg(test)]
pub struct MockAdapter {
    state: Mutex<State>,
    pool: Mutex<FilterPool>,
    events: Arc<EventBus>,
    locks_successfully: AtomicBool,
    status: Mutex<AdapterStatus>,
}

#[cfg(test)]
impl MockAdapter {
    pub fn new(max_slots: Option<usize>, events: Arc<EventBus>) -> Self {
        MockAdapter {
            state: Mutex::new(State::Idle),
            pool: Mutex::new(FilterPool::new(max_slots)),
            events,
            locks_successfully: AtomicBool::new(true),
            status: Mutex::new(AdapterStatus::default()),
        }
    }

    pub fn set_locks_successfully(&self, value: bool) {
        self.locks_successfully.store(value, Ordering::Relaxed);
    }
}

#[cfg(test)]
impl Adapter for MockAdapter {
    fn tune(&self, _delivery_system: DeliverySystem, _params: TuningParams) -> Result<()> {
        *self.state.lock() = State::Tuning;
        self.events.fire(EVENT_SOURCE, "Tuning", &0u32);
        if self.locks_successfully.load(Ordering::Relaxed) {
            *self.state.lock() = State::Locked;
            self.status.lock().locked = true;
            self.events.fire(EVENT_SOURCE, "Locked", &0u32);
        } else {
            *self.state.lock() = State::Unlocked;
            self.status.lock().locked = false;
            self.events.fire(
                EVENT_SOURCE,
                "TuneFailed",
                &TuneFailedPayload { adapter_index: 0 },
            );
        }
        Ok(())
    }

    fn set_active(&self, active: bool) -> Result<()> {
        *self.state.lock() = if active { State::Locked } else { State::Idle };
        Ok(())
    }

    fn allocate_filter(&self, pid: u16) -> Result<()> {
        self.pool.lock().allocate(pid)
    }

    fn release_filter(&self, pid: u16) -> Result<()> {
        self.pool.lock().release(pid)
    }

    fn status(&self) -> AdapterStatus {
        *self.status.lock()
    }

    fn read_dvr(&self, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }

    fn supports(&self, _delivery_system: DeliverySystem, _key: &str, _value: &str) -> bool {
        true
    }

    fn state(&self) -> State {
        *self.state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_restricted_pool_exhausts_and_recovers() {
        let events = Arc::new(EventBus::new());
        let adapter = MockAdapter::new(Some(4), events);

        for pid in [0x10, 0x11, 0x12, 0x13] {
            adapter.allocate_filter(pid).unwrap();
        }
        assert!(adapter.allocate_filter(0x14).is_err());

        adapter.release_filter(0x11).unwrap();
        adapter.allocate_filter(0x14).unwrap();

        // Re-allocating an already-held PID must not consume a new slot.
        adapter.allocate_filter(0x10).unwrap();
    }

    #[test]
    fn unrestricted_pool_has_no_limit() {
        let events = Arc::new(EventBus::new());
        let adapter = MockAdapter::new(None, events);
        for pid in 0..100u16 {
            adapter.allocate_filter(pid).unwrap();
        }
    }

    #[test]
    fn tune_failure_ends_in_unlocked_with_status_unlocked() {
        let events = Arc::new(EventBus::new());
        let adapter = MockAdapter::new(None, events);
        adapter.set_locks_successfully(false);

        adapter
            .tune(DeliverySystem::DvbT, TuningParams::new())
            .unwrap();

        assert_eq!(adapter.state(), State::Unlocked);
        assert!(!adapter.status().locked);
    }
}
