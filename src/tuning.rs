//! Structured tuning parameters (spec.md §6): a key/value scalar document
//! recognized across delivery systems, independent of the frontend sys
//! bindings in [`crate::adapter::frontend::sys`]. Kept as a small, strongly
//! typed registry rather than a stringly-typed property tree, per the
//! "Dynamic properties tree" redesign note in spec.md §9 — only the
//! textual command surface and legacy channel-line parser need to go
//! through string keys at all.

use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliverySystem {
    DvbS,
    DvbS2,
    DvbC,
    DvbT,
    DvbT2,
    Atsc,
    IsdbT,
}

impl fmt::Display for DeliverySystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliverySystem::DvbS => "DVB-S",
            DeliverySystem::DvbS2 => "DVB-S2",
            DeliverySystem::DvbC => "DVB-C",
            DeliverySystem::DvbT => "DVB-T",
            DeliverySystem::DvbT2 => "DVB-T2",
            DeliverySystem::Atsc => "ATSC",
            DeliverySystem::IsdbT => "ISDB-T",
        };
        f.write_str(s)
    }
}

macro_rules! scalar_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(Error::Protocol("unrecognized scalar value")),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

scalar_enum!(Inversion {
    Off => "OFF",
    On => "ON",
    Auto => "AUTO",
});

scalar_enum!(Fec {
    None => "NONE",
    F1_2 => "1/2",
    F2_3 => "2/3",
    F3_4 => "3/4",
    F3_5 => "3/5",
    F4_5 => "4/5",
    F5_6 => "5/6",
    F6_7 => "6/7",
    F7_8 => "7/8",
    F8_9 => "8/9",
    F9_10 => "9/10",
    Auto => "AUTO",
});

scalar_enum!(Modulation {
    Qpsk => "QPSK",
    Psk8 => "8PSK",
    Qam16 => "QAM16",
    Qam32 => "QAM32",
    Qam64 => "QAM64",
    Qam128 => "QAM128",
    Qam256 => "QAM256",
    Vsb8 => "8VSB",
    Vsb16 => "16VSB",
    Dqpsk => "DQPSK",
    Apsk16 => "APSK16",
    Apsk32 => "APSK32",
    Auto => "AUTO",
});

scalar_enum!(GuardInterval {
    G1_32 => "1/32",
    G1_16 => "1/16",
    G1_8 => "1/8",
    G1_4 => "1/4",
    Auto => "AUTO",
});

scalar_enum!(TransmissionMode {
    T2000 => "2000",
    T8000 => "8000",
    Auto => "AUTO",
});

scalar_enum!(Hierarchy {
    None => "NONE",
    H1 => "1",
    H2 => "2",
    H4 => "4",
    Auto => "AUTO",
});

scalar_enum!(Polarisation {
    Horizontal => "Horizontal",
    Vertical => "Vertical",
    Left => "Left",
    Right => "Right",
});

scalar_enum!(RollOff {
    R0_20 => "0.20",
    R0_25 => "0.25",
    R0_35 => "0.35",
    Auto => "AUTO",
});

scalar_enum!(Pilot {
    On => "ON",
    Off => "OFF",
    Auto => "AUTO",
});

/// One recognized tuning key (spec.md §6). `Constellation` is kept as an
/// alias of `Modulation` for DVB-T channel lines, per the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Frequency,
    Inversion,
    Fec,
    FecHp,
    FecLp,
    SymbolRate,
    Bandwidth,
    Modulation,
    GuardInterval,
    TransmissionMode,
    Hierarchy,
    Polarisation,
    SatelliteNumber,
    RollOff,
    Pilot,
}

impl Key {
    pub fn name(&self) -> &'static str {
        match self {
            Key::Frequency => "Frequency",
            Key::Inversion => "Inversion",
            Key::Fec => "FEC",
            Key::FecHp => "FEC HP",
            Key::FecLp => "FEC LP",
            Key::SymbolRate => "Symbol Rate",
            Key::Bandwidth => "Bandwidth",
            Key::Modulation => "Modulation",
            Key::GuardInterval => "Guard Interval",
            Key::TransmissionMode => "Transmission Mode",
            Key::Hierarchy => "Hierarchy",
            Key::Polarisation => "Polarisation",
            Key::SatelliteNumber => "Satellite Number",
            Key::RollOff => "Roll Off",
            Key::Pilot => "Pilot",
        }
    }
}

/// A structured tuning document: an ordered set of recognized key/value
/// scalars (spec.md §6). Order is not semantically meaningful (Testable
/// property #5 is an order-irrelevant round trip), but insertion order is
/// preserved for a stable textual rendering.
#[derive(Debug, Clone, Default)]
pub struct TuningParams {
    entries: Vec<(Key, String)>,
}

/// Order-irrelevant per Testable property #5: two documents are equal iff
/// they carry the same key/value set, regardless of insertion order. A
/// derived `PartialEq` would compare the backing `Vec` positionally and
/// break that property the moment a round trip reorders entries.
impl PartialEq for TuningParams {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.get(*k) == Some(v.as_str()))
    }
}

impl Eq for TuningParams {}

impl TuningParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: Key, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
        self
    }

    pub fn get(&self, key: Key) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn frequency_hz(&self) -> Option<u32> {
        self.get(Key::Frequency).and_then(|v| v.parse().ok())
    }

    /// Serializes to an ordered list of (key-name, value) pairs — the same
    /// shape the legacy channel-line parser and command surface both
    /// produce and consume.
    pub fn to_entries(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.name().to_string(), v.clone()))
            .collect()
    }

    /// Parses a list of (key-name, value) pairs back into a document,
    /// ignoring unrecognized keys (spec.md §6 lists the recognized set;
    /// anything else is assumed to belong to a later protocol revision).
    pub fn from_entries(entries: &[(String, String)]) -> Self {
        let mut params = TuningParams::new();
        for (name, value) in entries {
            let key = match name.as_str() {
                "Frequency" => Key::Frequency,
                "Inversion" => Key::Inversion,
                "FEC" => Key::Fec,
                "FEC HP" => Key::FecHp,
                "FEC LP" => Key::FecLp,
                "Symbol Rate" => Key::SymbolRate,
                "Bandwidth" => Key::Bandwidth,
                "Modulation" | "Constellation" => Key::Modulation,
                "Guard Interval" => Key::GuardInterval,
                "Transmission Mode" => Key::TransmissionMode,
                "Hierarchy" => Key::Hierarchy,
                "Polarisation" => Key::Polarisation,
                "Satellite Number" => Key::SatelliteNumber,
                "Roll Off" => Key::RollOff,
                "Pilot" => Key::Pilot,
                _ => continue,
            };
            params.set(key, value.clone());
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_entries_order_irrelevant() {
        let mut params = TuningParams::new();
        params.set(Key::Frequency, "490000000");
        params.set(Key::Bandwidth, "8000000");
        params.set(Key::Modulation, "QAM64");

        let entries = params.to_entries();
        let mut shuffled = entries.clone();
        shuffled.reverse();

        let back = TuningParams::from_entries(&shuffled);
        assert_eq!(back, params);
    }

    #[test]
    fn constellation_aliases_modulation() {
        let params = TuningParams::from_entries(&[("Constellation".into(), "QAM64".into())]);
        assert_eq!(params.get(Key::Modulation), Some("QAM64"));
    }

    #[test]
    fn fec_scalar_round_trips() {
        assert_eq!(Fec::parse("2/3").unwrap(), Fec::F2_3);
        assert_eq!(Fec::F2_3.as_str(), "2/3");
    }
}
