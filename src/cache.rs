//! In-memory authoritative model for the currently tuned multiplex (C6).
//!
//! Per the arena-of-ids redesign note in spec.md §9, `Multiplex` and
//! `Service` never hold back-pointers to each other; the `Cache` is the
//! arena and everything else carries stable `MultiplexId`/`ServiceId`
//! handles that are resolved against it on use. This survives re-tunes
//! (old ids simply fail to resolve) without reference-counted cycles.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, instrument, warn};

use crate::eventbus::EventBus;

/// Stable handle to a Multiplex record. Only ever compared, never
/// dereferenced directly; callers resolve through [`Cache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MultiplexId(pub u64);

/// 16-bit MPEG-2 program number, doubling as the Service handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(pub u16);

/// One elementary stream PID entry, as carried by a Service's PMT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidEntry {
    pub pid: u16,
    pub stream_type: u8,
    /// e.g. audio language type or subtitle variant; 0 when not signalled.
    pub subtype: u8,
}

#[derive(Debug, Clone)]
pub struct Multiplex {
    pub id: MultiplexId,
    pub frequency_hz: u32,
    /// Known once the PAT has been seen on this multiplex.
    pub tsid: Option<u16>,
}

/// A Service snapshot. `pids` is reference-counted so readers holding an
/// older snapshot remain valid while a writer installs a new one
/// (spec.md §4.6 Consistency).
#[derive(Debug, Clone)]
pub struct Service {
    pub multiplex: MultiplexId,
    pub service_id: ServiceId,
    pub source_id: Option<u16>,
    pub name: String,
    pub provider: String,
    pub pmt_pid: Option<u16>,
    pub pmt_version: Option<u8>,
    pub pids: Arc<Vec<PidEntry>>,
}

impl Service {
    fn new(multiplex: MultiplexId, service_id: ServiceId) -> Self {
        Service {
            multiplex,
            service_id,
            source_id: None,
            name: "Unknown".to_string(),
            provider: String::new(),
            pmt_pid: None,
            pmt_version: None,
            pids: Arc::new(Vec::new()),
        }
    }

    /// The PCR PID, i.e. the first entry in `pids` if signalled.
    pub fn pcr_pid(&self) -> Option<u16> {
        self.pids.first().map(|e| e.pid)
    }
}

#[derive(Debug, Clone)]
pub enum CacheEvent {
    MultiplexLoaded(MultiplexId),
    ServiceAdded(ServiceId),
    ServiceRemoved(ServiceId),
    ServiceNameChanged(ServiceId),
    ServiceIdChanged { old: ServiceId, new: ServiceId },
    PidsUpdated(ServiceId),
}

struct Inner {
    multiplex: Option<Multiplex>,
    services: HashMap<ServiceId, Service>,
    next_mux_id: u64,
}

/// Authoritative, RW-locked model of the current multiplex. Readers take a
/// shared lock and clone out a [`Service`]/[`Multiplex`] snapshot (cheap:
/// the PID list itself is `Arc`'d); writers take an exclusive lock, update,
/// then fire events *after* releasing it, per spec.md §4.8's rule that the
/// Cache never calls back into the Event Bus while holding its write lock.
pub struct Cache {
    inner: RwLock<Inner>,
    events: Arc<EventBus>,
}

impl Cache {
    pub fn new(events: Arc<EventBus>) -> Self {
        Cache {
            inner: RwLock::new(Inner {
                multiplex: None,
                services: HashMap::new(),
                next_mux_id: 1,
            }),
            events,
        }
    }

    fn fire(&self, event: CacheEvent) {
        let (source, name) = match &event {
            CacheEvent::MultiplexLoaded(_) => ("Cache", "MultiplexLoaded"),
            CacheEvent::ServiceAdded(_) => ("Cache", "ServiceAdded"),
            CacheEvent::ServiceRemoved(_) => ("Cache", "ServiceRemoved"),
            CacheEvent::ServiceNameChanged(_) => ("Cache", "ServiceNameChanged"),
            CacheEvent::ServiceIdChanged { .. } => ("Cache", "ServiceChanged"),
            CacheEvent::PidsUpdated(_) => ("Cache", "PIDsUpdated"),
        };
        self.events.fire(source, name, &event);
    }

    /// Populates the cache from a freshly tuned multiplex, discarding
    /// whatever was there before (invariant #1 — exactly one multiplex is
    /// current).
    #[instrument(skip(self))]
    pub fn load(&self, frequency_hz: u32) -> MultiplexId {
        let id = {
            let mut inner = self.inner.write();
            let id = MultiplexId(inner.next_mux_id);
            inner.next_mux_id += 1;
            inner.multiplex = Some(Multiplex {
                id,
                frequency_hz,
                tsid: None,
            });
            inner.services.clear();
            id
        };
        self.fire(CacheEvent::MultiplexLoaded(id));
        id
    }

    /// Clears the cache; persistence is out of scope for this crate, so
    /// this only drops the in-memory state.
    pub fn flush(&self) {
        let mut inner = self.inner.write();
        inner.multiplex = None;
        inner.services.clear();
    }

    pub fn current_multiplex(&self) -> Option<Multiplex> {
        self.inner.read().multiplex.clone()
    }

    pub fn set_tsid(&self, tsid: u16) {
        let mut inner = self.inner.write();
        if let Some(mux) = inner.multiplex.as_mut() {
            mux.tsid = Some(tsid);
        }
    }

    pub fn get_service(&self, id: ServiceId) -> Option<Service> {
        self.inner.read().services.get(&id).cloned()
    }

    pub fn find_service_by_name(&self, name: &str) -> Option<Service> {
        self.inner
            .read()
            .services
            .values()
            .find(|s| s.name == name)
            .cloned()
    }

    pub fn services(&self) -> Vec<Service> {
        self.inner.read().services.values().cloned().collect()
    }

    /// Creates a service discovered via PAT (or configuration import, out
    /// of scope here) if it doesn't already exist.
    #[instrument(skip(self))]
    pub fn add_service(&self, tsid: u16, service_id: ServiceId) {
        let added = {
            let mut inner = self.inner.write();
            if let Some(mux) = inner.multiplex.as_mut() {
                mux.tsid = Some(tsid);
            }
            let mux_id = inner.multiplex.as_ref().map(|m| m.id);
            let Some(mux_id) = mux_id else {
                warn!("add_service with no current multiplex");
                return;
            };
            if inner.services.contains_key(&service_id) {
                false
            } else {
                inner
                    .services
                    .insert(service_id, Service::new(mux_id, service_id));
                true
            }
        };
        if added {
            self.fire(CacheEvent::ServiceAdded(service_id));
        }
    }

    pub fn remove_service(&self, service_id: ServiceId) {
        let removed = self.inner.write().services.remove(&service_id).is_some();
        if removed {
            self.fire(CacheEvent::ServiceRemoved(service_id));
        }
    }

    /// Records the PMT PID a PAT associated with a service, creating the
    /// service if this is its first sighting.
    pub fn set_pmt_pid(&self, tsid: u16, service_id: ServiceId, pmt_pid: u16) {
        self.add_service(tsid, service_id);
        let mut inner = self.inner.write();
        if let Some(svc) = inner.services.get_mut(&service_id) {
            svc.pmt_pid = Some(pmt_pid);
        }
    }

    /// Atomically replaces a service's PID list (invariant #4: monotone
    /// `pmt_version` within the lifetime of one (tsid, service_id) pair).
    /// Silently ignores a version that isn't newer than what's cached,
    /// since PMT processors only call this once per completed version
    /// bump, but replays of the same section must stay idempotent.
    #[instrument(skip(self, pids))]
    pub fn update_pids(&self, service_id: ServiceId, pids: Vec<PidEntry>, version: u8) {
        let updated = {
            let mut inner = self.inner.write();
            let Some(svc) = inner.services.get_mut(&service_id) else {
                warn!(?service_id, "update_pids for unknown service");
                return;
            };
            if let Some(prev) = svc.pmt_version {
                if version == prev {
                    debug!(?service_id, version, "duplicate PMT version, ignoring");
                    return;
                }
            }
            svc.pids = Arc::new(pids);
            svc.pmt_version = Some(version);
            true
        };
        if updated {
            self.fire(CacheEvent::PidsUpdated(service_id));
        }
    }

    pub fn update_service_name(&self, service_id: ServiceId, name: String, provider: String) {
        let changed = {
            let mut inner = self.inner.write();
            let Some(svc) = inner.services.get_mut(&service_id) else {
                return;
            };
            if svc.name == name && svc.provider == provider {
                false
            } else {
                svc.name = name;
                svc.provider = provider;
                true
            }
        };
        if changed {
            self.fire(CacheEvent::ServiceNameChanged(service_id));
        }
    }

    /// Renames a service's identifying key (e.g. after a PAT program
    /// number change). Fails silently if the old id is unknown or the new
    /// id is already taken.
    pub fn update_service_id(&self, old: ServiceId, new: ServiceId) {
        let renamed = {
            let mut inner = self.inner.write();
            if inner.services.contains_key(&new) {
                return;
            }
            let Some(mut svc) = inner.services.remove(&old) else {
                return;
            };
            svc.service_id = new;
            inner.services.insert(new, svc);
            true
        };
        if renamed {
            self.fire(CacheEvent::ServiceIdChanged { old, new });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> Cache {
        Cache::new(Arc::new(EventBus::new()))
    }

    #[test]
    fn load_replaces_prior_multiplex() {
        let cache = cache();
        let first = cache.load(100_000_000);
        cache.add_service(0x1234, ServiceId(1));
        let second = cache.load(200_000_000);
        assert_ne!(first, second);
        assert!(cache.services().is_empty());
    }

    #[test]
    fn pmt_version_monotonic_updates_pids() {
        let cache = cache();
        cache.load(490_000_000);
        cache.add_service(0x1234, ServiceId(0x0200));

        cache.update_pids(
            ServiceId(0x0200),
            vec![
                PidEntry { pid: 0x0300, stream_type: 0, subtype: 0 },
                PidEntry { pid: 0x0301, stream_type: 0x02, subtype: 0 },
                PidEntry { pid: 0x0302, stream_type: 0x04, subtype: 0 },
            ],
            1,
        );
        let svc = cache.get_service(ServiceId(0x0200)).unwrap();
        assert_eq!(svc.pmt_version, Some(1));
        assert_eq!(svc.pids.iter().map(|e| e.pid).collect::<Vec<_>>(), vec![0x0300, 0x0301, 0x0302]);

        cache.update_pids(
            ServiceId(0x0200),
            vec![
                PidEntry { pid: 0x0300, stream_type: 0, subtype: 0 },
                PidEntry { pid: 0x0301, stream_type: 0x02, subtype: 0 },
                PidEntry { pid: 0x0303, stream_type: 0x06, subtype: 0 },
            ],
            2,
        );
        let svc = cache.get_service(ServiceId(0x0200)).unwrap();
        assert_eq!(svc.pmt_version, Some(2));
        assert_eq!(svc.pids.iter().map(|e| e.pid).collect::<Vec<_>>(), vec![0x0300, 0x0301, 0x0303]);
    }

    #[test]
    fn find_by_name_resolves_after_sdt_update() {
        let cache = cache();
        cache.load(490_000_000);
        cache.add_service(0x1234, ServiceId(0x0200));
        cache.update_service_name(ServiceId(0x0200), "Test Channel".into(), String::new());
        let svc = cache.find_service_by_name("Test Channel").unwrap();
        assert_eq!(svc.service_id, ServiceId(0x0200));
    }

    #[test]
    fn snapshot_survives_concurrent_write() {
        let cache = cache();
        cache.load(490_000_000);
        cache.add_service(0x1234, ServiceId(0x0200));
        cache.update_pids(ServiceId(0x0200), vec![PidEntry { pid: 0x300, stream_type: 2, subtype: 0 }], 1);

        let snapshot = cache.get_service(ServiceId(0x0200)).unwrap();
        cache.update_pids(ServiceId(0x0200), vec![PidEntry { pid: 0x301, stream_type: 2, subtype: 0 }], 2);

        assert_eq!(snapshot.pids[0].pid, 0x300);
        let fresh = cache.get_service(ServiceId(0x0200)).unwrap();
        assert_eq!(fresh.pids[0].pid, 0x301);
    }
}
