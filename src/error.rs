//! Crate-wide error kinds, following the taxonomy spec'd for the core:
//! hardware faults, tuning timeouts, malformed PSI sections, lookup
//! failures, resource conflicts, best-effort sink errors, and protocol
//! violations. Packet-loop errors never unwind past a `Downstream` or
//! `MalformedSection`; only `Internal` is meant to abort.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// ioctl or device-open failure. Fatal for the current adapter session.
    #[error("tuner hardware error: {0}")]
    TunerHardware(#[source] anyhow::Error),

    /// No lock within the implementation-defined window.
    #[error("tune timed out after {0:?}")]
    TuneTimeout(std::time::Duration),

    /// CRC mismatch, length overflow, or sync loss. Caller discards and
    /// counts; this is never propagated out of the packet loop.
    #[error("malformed PSI section: {0}")]
    MalformedSection(&'static str),

    /// A service / output / PID lookup found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Allocation would exceed the hardware filter count, or a duplicate
    /// output/service name was requested.
    #[error("busy or conflicting: {0}")]
    Busy(String),

    /// A sink write failed. Logged once per window by the caller, never
    /// propagated back into the packet loop.
    #[error("downstream sink error: {0}")]
    Downstream(#[source] anyhow::Error),

    /// Unexpected table_id or structural field in a PSI section; the
    /// owning processor resets and waits for the next section set.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// A specification invariant was violated (e.g. a synthesized PAT
    /// overflowing one packet). Indicates a bug, not a runtime condition;
    /// callers are expected to panic or abort rather than recover.
    #[error("internal invariant violated: {0}")]
    Internal(&'static str),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::TunerHardware(e.into())
    }
}
