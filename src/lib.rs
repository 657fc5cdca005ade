//! DVB transport-stream demultiplexing, PSI/SI processing, and
//! service-filtered re-streaming core.
//!
//! Module map (see each module's docs for the component it implements):
//! [`packet`] and [`tsfilter`] (the PID demux/filter chain), [`psi`]
//! (section reassembly and table decoders), [`cache`] (the tuned
//! multiplex/service model), [`adapter`] (hardware tuner/demux
//! abstraction, DiSEqC sequencing), [`servicefilter`] (single-program PAT
//! rewrite), [`dispatcher`] and [`deferred`] (the threading model),
//! [`tuning`] and [`channels`] (structured tuning parameters and the
//! legacy channel-line formats that produce them), [`eventbus`]
//! (cross-component notifications), [`error`] (the crate-wide error type).

pub mod adapter;
pub mod cache;
pub mod channels;
pub mod deferred;
pub mod dispatcher;
pub mod error;
pub mod eventbus;
pub mod packet;
pub mod pidfilter;
pub mod psi;
pub mod servicefilter;
pub mod tsfilter;
pub mod tuning;

pub use adapter::{Adapter, AdapterStatus, HardwareAdapter};
pub use cache::{Cache, MultiplexId, Service, ServiceId};
pub use error::{Error, Result};
pub use eventbus::EventBus;
pub use packet::TransportPacket;
pub use servicefilter::ServiceFilter;
pub use tuning::{DeliverySystem, TuningParams};
