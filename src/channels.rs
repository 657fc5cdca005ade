//! Legacy channel-line parsing (supplements spec.md §6, grounded on
//! `parsezap.c`): one pure function per delivery system line format, all
//! reachable through [`parse_channel_line`]. This module only parses a
//! line into a [`ParsedChannel`]; reading a channels file from disk and
//! feeding the cache is an external collaborator's job.

use crate::error::{Error, Result};
use crate::tuning::{
    DeliverySystem, Fec, GuardInterval, Hierarchy, Inversion, Key, Modulation, Polarisation,
    RollOff, TuningParams,
};

/// One line's worth of tuning data plus the fields the cache needs to
/// create the Service entry: a name, its MPEG-2 program/service id, and
/// (when present) the video/audio elementary stream PIDs the legacy
/// format carries directly rather than via PMT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedChannel {
    pub name: String,
    pub tuning: TuningParams,
    pub vpid: Option<u16>,
    pub apid: Option<u16>,
    pub service_id: u16,
}

fn fields(line: &str) -> Vec<&str> {
    line.trim_end_matches(['\r', '\n']).split(':').collect()
}

fn parse_u32(f: &str) -> Result<u32> {
    f.parse().map_err(|_| Error::Protocol("malformed channel line: expected a number"))
}

fn parse_u16(f: &str) -> Result<u16> {
    f.parse().map_err(|_| Error::Protocol("malformed channel line: expected a number"))
}

fn parse_pid(f: &str) -> Option<u16> {
    f.parse::<u16>().ok().filter(|pid| *pid != 0)
}

fn need(fields: &[&str], n: usize) -> Result<()> {
    if fields.len() < n {
        Err(Error::Protocol("malformed channel line: too few fields"))
    } else {
        Ok(())
    }
}

/// `name:freq_MHz:pol:sat_no:sym_rate_kSyms:vpid:apid:sid`
pub fn parse_dvbs_line(line: &str) -> Result<ParsedChannel> {
    let f = fields(line);
    need(&f, 8)?;

    let mut tuning = TuningParams::new();
    tuning.set(Key::Frequency, (parse_u32(f[1])? * 1000).to_string());
    tuning.set(Key::Inversion, Inversion::Auto.as_str());
    let polarisation = if f[2].starts_with('h') || f[2].starts_with('H') {
        Polarisation::Horizontal
    } else {
        Polarisation::Vertical
    };
    tuning.set(Key::Polarisation, polarisation.as_str());
    tuning.set(Key::SatelliteNumber, parse_u32(f[3])?.to_string());
    tuning.set(Key::SymbolRate, (parse_u32(f[4])? * 1000).to_string());
    tuning.set(Key::Fec, Fec::Auto.as_str());

    Ok(ParsedChannel {
        name: f[0].to_string(),
        tuning,
        vpid: parse_pid(f[5]),
        apid: parse_pid(f[6]),
        service_id: parse_u16(f[7])?,
    })
}

/// Decodes one letter-prefixed run (`C23`, `M998`, `O35`) from a VDR-style
/// combined parameter token, per `find_vdr_param` in `parsezap.c`.
fn vdr_take(chars: &[char], mut i: usize) -> (u8, i64, usize) {
    let tag = chars[i] as u8;
    i += 1;
    let start = i;
    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '-') {
        i += 1;
    }
    let value: i64 = chars[start..i].iter().collect::<String>().parse().unwrap_or(-1);
    (tag, value, i)
}

fn vdr_fec(value: i64) -> Fec {
    match value {
        0 => Fec::None,
        12 => Fec::F1_2,
        23 => Fec::F2_3,
        34 => Fec::F3_4,
        35 => Fec::F3_5,
        45 => Fec::F4_5,
        56 => Fec::F5_6,
        67 => Fec::F6_7,
        78 => Fec::F7_8,
        89 => Fec::F8_9,
        910 => Fec::F9_10,
        _ => Fec::Auto,
    }
}

fn vdr_modulation(value: i64) -> Modulation {
    match value {
        16 => Modulation::Qam16,
        32 => Modulation::Qam32,
        64 => Modulation::Qam64,
        128 => Modulation::Qam128,
        256 => Modulation::Qam256,
        2 => Modulation::Qpsk,
        5 => Modulation::Psk8,
        _ => Modulation::Auto,
    }
}

fn vdr_rolloff(value: i64) -> RollOff {
    match value {
        20 => RollOff::R0_20,
        25 => RollOff::R0_25,
        35 => RollOff::R0_35,
        _ => RollOff::Auto,
    }
}

/// Decodes the combined `C<fec>M<mod>O<rolloff>S<system>H|V|L|R` token a
/// VDR-style DVB-S2 line packs into a single field.
fn apply_vdr_params(tuning: &mut TuningParams, token: &str) {
    let chars: Vec<char> = token.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            'C' => {
                let (_, value, next) = vdr_take(&chars, i);
                tuning.set(Key::Fec, vdr_fec(value).as_str());
                i = next;
            }
            'M' => {
                let (_, value, next) = vdr_take(&chars, i);
                tuning.set(Key::Modulation, vdr_modulation(value).as_str());
                i = next;
            }
            'O' => {
                let (_, value, next) = vdr_take(&chars, i);
                tuning.set(Key::RollOff, vdr_rolloff(value).as_str());
                i = next;
            }
            'S' => {
                let (_, _value, next) = vdr_take(&chars, i);
                i = next;
            }
            'H' => {
                tuning.set(Key::Polarisation, Polarisation::Horizontal.as_str());
                i += 1;
            }
            'V' => {
                tuning.set(Key::Polarisation, Polarisation::Vertical.as_str());
                i += 1;
            }
            'L' => {
                tuning.set(Key::Polarisation, Polarisation::Left.as_str());
                i += 1;
            }
            'R' => {
                tuning.set(Key::Polarisation, Polarisation::Right.as_str());
                i += 1;
            }
            _ => i += 1,
        }
    }
}

/// `name:freq_MHz:params:sat_pos:sym_rate:vpid:apid:tpid:ca:sid:nid:tsid:radio_id`
pub fn parse_dvbs2_line(line: &str) -> Result<ParsedChannel> {
    let f = fields(line);
    need(&f, 13)?;

    let mut tuning = TuningParams::new();
    tuning.set(Key::Frequency, (parse_u32(f[1])? * 1000).to_string());
    tuning.set(Key::Inversion, Inversion::Auto.as_str());
    apply_vdr_params(&mut tuning, f[2]);
    tuning.set(Key::SatelliteNumber, parse_u32(f[3])?.to_string());
    tuning.set(Key::SymbolRate, parse_u32(f[4])?.to_string());

    Ok(ParsedChannel {
        name: f[0].to_string(),
        tuning,
        vpid: parse_pid(f[5]),
        apid: parse_pid(f[6]),
        service_id: parse_u16(f[9])?,
    })
}

fn lookup<'a>(table: &[(&'a str, &'a str)], token: &str) -> Option<&'a str> {
    table.iter().find(|(name, _)| *name == token).map(|(_, v)| *v)
}

const INVERSION: &[(&str, &str)] = &[
    ("INVERSION_OFF", "OFF"),
    ("INVERSION_ON", "ON"),
    ("INVERSION_AUTO", "AUTO"),
];

const FEC: &[(&str, &str)] = &[
    ("FEC_AUTO", "AUTO"),
    ("FEC_1_2", "1/2"),
    ("FEC_2_3", "2/3"),
    ("FEC_3_4", "3/4"),
    ("FEC_4_5", "4/5"),
    ("FEC_5_6", "5/6"),
    ("FEC_6_7", "6/7"),
    ("FEC_7_8", "7/8"),
    ("FEC_8_9", "8/9"),
    ("FEC_NONE", "NONE"),
];

const BANDWIDTH_HZ: &[(&str, &str)] = &[
    ("BANDWIDTH_6_MHZ", "6000000"),
    ("BANDWIDTH_7_MHZ", "7000000"),
    ("BANDWIDTH_8_MHZ", "8000000"),
];

const MODULATION: &[(&str, &str)] = &[
    ("QPSK", "QPSK"),
    ("QAM_16", "QAM16"),
    ("QAM_32", "QAM32"),
    ("QAM_64", "QAM64"),
    ("QAM_128", "QAM128"),
    ("QAM_256", "QAM256"),
    ("QAM_AUTO", "AUTO"),
    ("8VSB", "8VSB"),
    ("16VSB", "16VSB"),
];

const TRANSMISSION_MODE: &[(&str, &str)] = &[
    ("TRANSMISSION_MODE_2K", "2000"),
    ("TRANSMISSION_MODE_8K", "8000"),
    ("TRANSMISSION_MODE_AUTO", "AUTO"),
];

const GUARD: &[(&str, &str)] = &[
    ("GUARD_INTERVAL_1_16", "1/16"),
    ("GUARD_INTERVAL_1_32", "1/32"),
    ("GUARD_INTERVAL_1_4", "1/4"),
    ("GUARD_INTERVAL_1_8", "1/8"),
    ("GUARD_INTERVAL_AUTO", "AUTO"),
];

const HIERARCHY: &[(&str, &str)] = &[
    ("HIERARCHY_NONE", "NONE"),
    ("HIERARCHY_1", "1"),
    ("HIERARCHY_2", "2"),
    ("HIERARCHY_4", "4"),
    ("HIERARCHY_AUTO", "AUTO"),
];

fn lookup_or_err(table: &[(&str, &str)], token: &str) -> Result<&'static str> {
    lookup(table, token).ok_or(Error::Protocol("unrecognized channel line token"))
}

/// `name:freq_Hz:inversion:sym_rate:fec:qam:vpid:apid:sid`
pub fn parse_dvbc_line(line: &str) -> Result<ParsedChannel> {
    let f = fields(line);
    need(&f, 9)?;

    let mut tuning = TuningParams::new();
    tuning.set(Key::Frequency, parse_u32(f[1])?.to_string());
    tuning.set(Key::Inversion, lookup_or_err(INVERSION, f[2])?);
    tuning.set(Key::SymbolRate, parse_u32(f[3])?.to_string());
    tuning.set(Key::Fec, lookup_or_err(FEC, f[4])?);
    tuning.set(Key::Modulation, lookup_or_err(MODULATION, f[5])?);

    Ok(ParsedChannel {
        name: f[0].to_string(),
        tuning,
        vpid: parse_pid(f[6]),
        apid: parse_pid(f[7]),
        service_id: parse_u16(f[8])?,
    })
}

/// `name:freq:inversion:bw:fec_hp:fec_lp:qam:tmode:guard:hier:vpid:apid:sid`,
/// with `freq < 1_000_000` interpreted as kHz (spec.md §6).
pub fn parse_dvbt_line(line: &str) -> Result<ParsedChannel> {
    let f = fields(line);
    need(&f, 13)?;

    let mut freq = parse_u32(f[1])?;
    if freq < 1_000_000 {
        freq *= 1000;
    }

    let mut tuning = TuningParams::new();
    tuning.set(Key::Frequency, freq.to_string());
    tuning.set(Key::Inversion, lookup_or_err(INVERSION, f[2])?);
    tuning.set(Key::Bandwidth, lookup_or_err(BANDWIDTH_HZ, f[3])?);
    tuning.set(Key::FecHp, lookup_or_err(FEC, f[4])?);
    tuning.set(Key::FecLp, lookup_or_err(FEC, f[5])?);
    tuning.set(Key::Modulation, lookup_or_err(MODULATION, f[6])?);
    tuning.set(Key::TransmissionMode, lookup_or_err(TRANSMISSION_MODE, f[7])?);
    tuning.set(Key::GuardInterval, lookup_or_err(GUARD, f[8])?);
    tuning.set(Key::Hierarchy, lookup_or_err(HIERARCHY, f[9])?);

    Ok(ParsedChannel {
        name: f[0].to_string(),
        tuning,
        vpid: parse_pid(f[10]),
        apid: parse_pid(f[11]),
        service_id: parse_u16(f[12])?,
    })
}

/// `name:freq:modulation:vpid:apid:sid`
pub fn parse_atsc_line(line: &str) -> Result<ParsedChannel> {
    let f = fields(line);
    need(&f, 6)?;

    let mut tuning = TuningParams::new();
    tuning.set(Key::Frequency, parse_u32(f[1])?.to_string());
    tuning.set(Key::Modulation, lookup_or_err(MODULATION, f[2])?);

    Ok(ParsedChannel {
        name: f[0].to_string(),
        tuning,
        vpid: parse_pid(f[3]),
        apid: parse_pid(f[4]),
        service_id: parse_u16(f[5])?,
    })
}

/// Dispatches to the right line parser for `delivery_system`.
pub fn parse_channel_line(delivery_system: DeliverySystem, line: &str) -> Result<ParsedChannel> {
    match delivery_system {
        DeliverySystem::DvbS => parse_dvbs_line(line),
        DeliverySystem::DvbS2 => parse_dvbs2_line(line),
        DeliverySystem::DvbC => parse_dvbc_line(line),
        DeliverySystem::DvbT | DeliverySystem::DvbT2 => parse_dvbt_line(line),
        DeliverySystem::Atsc => parse_atsc_line(line),
        DeliverySystem::IsdbT => Err(Error::Protocol("no legacy channel-line format for ISDB-T")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_e_dvbt_line() {
        let line = "BBC ONE:490000000:INVERSION_AUTO:BANDWIDTH_8_MHZ:FEC_2_3:FEC_NONE:QAM_64:TRANSMISSION_MODE_8K:GUARD_INTERVAL_1_32:HIERARCHY_NONE:600:601:4164";
        let parsed = parse_channel_line(DeliverySystem::DvbT, line).unwrap();

        assert_eq!(parsed.name, "BBC ONE");
        assert_eq!(parsed.service_id, 4164);
        assert_eq!(parsed.vpid, Some(600));
        assert_eq!(parsed.apid, Some(601));
        assert_eq!(parsed.tuning.get(Key::Frequency), Some("490000000"));
        assert_eq!(parsed.tuning.get(Key::Bandwidth), Some("8000000"));
        assert_eq!(parsed.tuning.get(Key::FecHp), Some("2/3"));
        assert_eq!(parsed.tuning.get(Key::Modulation), Some("QAM64"));
        assert_eq!(parsed.tuning.get(Key::TransmissionMode), Some("8000"));
        assert_eq!(parsed.tuning.get(Key::GuardInterval), Some("1/32"));
        assert_eq!(parsed.tuning.get(Key::Hierarchy), Some("NONE"));
        assert_eq!(parsed.tuning.get(Key::Inversion), Some("AUTO"));
    }

    #[test]
    fn dvbt_frequency_below_one_mhz_is_treated_as_khz() {
        let line = "Mux:474000:INVERSION_AUTO:BANDWIDTH_8_MHZ:FEC_AUTO:FEC_AUTO:QAM_AUTO:TRANSMISSION_MODE_AUTO:GUARD_INTERVAL_AUTO:HIERARCHY_AUTO:0:0:1";
        let parsed = parse_channel_line(DeliverySystem::DvbT, line).unwrap();
        assert_eq!(parsed.tuning.get(Key::Frequency), Some("474000000"));
        assert_eq!(parsed.vpid, None);
    }

    #[test]
    fn dvbs_line_converts_mhz_and_ksyms_to_hz() {
        let line = "Astra:11700:h:0:27500:100:101:1";
        let parsed = parse_dvbs_line(line).unwrap();
        assert_eq!(parsed.tuning.get(Key::Frequency), Some("11700000"));
        assert_eq!(parsed.tuning.get(Key::SymbolRate), Some("27500000"));
        assert_eq!(parsed.tuning.get(Key::Polarisation), Some("Horizontal"));
    }

    #[test]
    fn dvbs2_line_decodes_combined_vdr_token() {
        let line = "Sky:11700:C23M998S1V:0:27500:100:101:102:0:1:2:3:0";
        let parsed = parse_dvbs2_line(line).unwrap();
        assert_eq!(parsed.tuning.get(Key::Fec), Some("2/3"));
        assert_eq!(parsed.tuning.get(Key::Modulation), Some("AUTO"));
        assert_eq!(parsed.tuning.get(Key::Polarisation), Some("Vertical"));
        assert_eq!(parsed.service_id, 1);
    }

    #[test]
    fn atsc_line_parses() {
        let line = "KABC:615000000:8VSB:49:52:3";
        let parsed = parse_atsc_line(line).unwrap();
        assert_eq!(parsed.tuning.get(Key::Modulation), Some("8VSB"));
        assert_eq!(parsed.service_id, 3);
    }

    #[test]
    fn rejects_lines_with_too_few_fields() {
        assert!(parse_channel_line(DeliverySystem::Atsc, "KABC:615000000").is_err());
    }
}
