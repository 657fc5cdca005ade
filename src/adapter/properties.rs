//! Translates a structured [`TuningParams`] document into the FE_SET_PROPERTY
//! command sequence the kernel expects, grounded on the property list
//! `DVBFrontEndTune` builds in `dvbadapter.c` before calling `FE_SET_PROPERTY`.

use crate::dtv_property;
use crate::error::{Error, Result};
use crate::tuning::{
    DeliverySystem, Fec, GuardInterval, Hierarchy, Inversion, Key, Modulation, Pilot, RollOff,
    TransmissionMode, TuningParams,
};

use super::frontend::sys::*;

fn parse_u32(params: &TuningParams, key: Key) -> Option<u32> {
    params.get(key).and_then(|v| v.parse().ok())
}

fn delivery_system(ds: DeliverySystem) -> fe_delivery_system {
    match ds {
        DeliverySystem::DvbS => fe_delivery_system::SYS_DVBS,
        DeliverySystem::DvbS2 => fe_delivery_system::SYS_DVBS2,
        DeliverySystem::DvbC => fe_delivery_system::SYS_DVBC_ANNEX_A,
        DeliverySystem::DvbT => fe_delivery_system::SYS_DVBT,
        DeliverySystem::DvbT2 => fe_delivery_system::SYS_DVBT2,
        DeliverySystem::Atsc => fe_delivery_system::SYS_ATSC,
        DeliverySystem::IsdbT => fe_delivery_system::SYS_ISDBT,
    }
}

fn modulation(m: Modulation) -> fe_modulation {
    match m {
        Modulation::Qpsk => fe_modulation::QPSK,
        Modulation::Psk8 => fe_modulation::PSK_8,
        Modulation::Qam16 => fe_modulation::QAM_16,
        Modulation::Qam32 => fe_modulation::QAM_32,
        Modulation::Qam64 => fe_modulation::QAM_64,
        Modulation::Qam128 => fe_modulation::QAM_128,
        Modulation::Qam256 => fe_modulation::QAM_256,
        Modulation::Vsb8 => fe_modulation::VSB_8,
        Modulation::Vsb16 => fe_modulation::VSB_16,
        Modulation::Dqpsk => fe_modulation::DQPSK,
        Modulation::Apsk16 => fe_modulation::APSK_16,
        Modulation::Apsk32 => fe_modulation::APSK_32,
        Modulation::Auto => fe_modulation::QAM_AUTO,
    }
}

fn fec(f: Fec) -> fe_code_rate {
    match f {
        Fec::None => fe_code_rate::FEC_NONE,
        Fec::F1_2 => fe_code_rate::FEC_1_2,
        Fec::F2_3 => fe_code_rate::FEC_2_3,
        Fec::F3_4 => fe_code_rate::FEC_3_4,
        Fec::F3_5 => fe_code_rate::FEC_3_5,
        Fec::F4_5 => fe_code_rate::FEC_4_5,
        Fec::F5_6 => fe_code_rate::FEC_5_6,
        Fec::F6_7 => fe_code_rate::FEC_6_7,
        Fec::F7_8 => fe_code_rate::FEC_7_8,
        Fec::F8_9 => fe_code_rate::FEC_8_9,
        Fec::F9_10 => fe_code_rate::FEC_9_10,
        Fec::Auto => fe_code_rate::FEC_AUTO,
    }
}

fn guard_interval(g: GuardInterval) -> fe_guard_interval {
    match g {
        GuardInterval::G1_32 => fe_guard_interval::GUARD_INTERVAL_1_32,
        GuardInterval::G1_16 => fe_guard_interval::GUARD_INTERVAL_1_16,
        GuardInterval::G1_8 => fe_guard_interval::GUARD_INTERVAL_1_8,
        GuardInterval::G1_4 => fe_guard_interval::GUARD_INTERVAL_1_4,
        GuardInterval::Auto => fe_guard_interval::GUARD_INTERVAL_AUTO,
    }
}

fn transmission_mode(t: TransmissionMode) -> fe_transmit_mode {
    match t {
        TransmissionMode::T2000 => fe_transmit_mode::TRANSMISSION_MODE_2K,
        TransmissionMode::T8000 => fe_transmit_mode::TRANSMISSION_MODE_8K,
        TransmissionMode::Auto => fe_transmit_mode::TRANSMISSION_MODE_AUTO,
    }
}

fn hierarchy(h: Hierarchy) -> fe_hierarchy {
    match h {
        Hierarchy::None => fe_hierarchy::HIERARCHY_NONE,
        Hierarchy::H1 => fe_hierarchy::HIERARCHY_1,
        Hierarchy::H2 => fe_hierarchy::HIERARCHY_2,
        Hierarchy::H4 => fe_hierarchy::HIERARCHY_4,
        Hierarchy::Auto => fe_hierarchy::HIERARCHY_AUTO,
    }
}

fn pilot(p: Pilot) -> fe_pilot {
    match p {
        Pilot::On => fe_pilot::PILOT_ON,
        Pilot::Off => fe_pilot::PILOT_OFF,
        Pilot::Auto => fe_pilot::PILOT_AUTO,
    }
}

fn rolloff(r: RollOff) -> fe_rolloff {
    match r {
        RollOff::R0_20 => fe_rolloff::ROLLOFF_20,
        RollOff::R0_25 => fe_rolloff::ROLLOFF_25,
        RollOff::R0_35 => fe_rolloff::ROLLOFF_35,
        RollOff::Auto => fe_rolloff::ROLLOFF_AUTO,
    }
}

fn inversion(i: Inversion) -> fe_spectral_inversion {
    match i {
        Inversion::Off => fe_spectral_inversion::INVERSION_OFF,
        Inversion::On => fe_spectral_inversion::INVERSION_ON,
        Inversion::Auto => fe_spectral_inversion::INVERSION_AUTO,
    }
}

fn scalar<T>(params: &TuningParams, key: Key, parse: fn(&str) -> Result<T>) -> Option<Result<T>> {
    params.get(key).map(parse)
}

/// Builds the property sequence for `FE_SET_PROPERTY`, covering the keys
/// spec.md §6 recognizes for the delivery systems this crate supports.
/// Missing optional keys (e.g. `Hierarchy` on a non-hierarchical DVB-T
/// mux) are simply omitted rather than defaulted, leaving the driver's
/// own default in place.
pub fn build_properties(
    delivery_system_value: DeliverySystem,
    params: &TuningParams,
) -> Result<Vec<DtvProperty>> {
    let mut props = vec![
        dtv_property!(DTV_DELIVERY_SYSTEM(delivery_system(delivery_system_value))),
        dtv_property!(DTV_INVERSION(
            scalar(params, Key::Inversion, Inversion::parse)
                .transpose()?
                .map(inversion)
                .unwrap_or(fe_spectral_inversion::INVERSION_AUTO)
        )),
    ];

    let frequency = parse_u32(params, Key::Frequency)
        .ok_or(Error::Protocol("tuning params missing Frequency"))?;
    props.push(dtv_property!(DTV_FREQUENCY(frequency)));

    if let Some(symbol_rate) = parse_u32(params, Key::SymbolRate) {
        props.push(dtv_property!(DTV_SYMBOL_RATE(symbol_rate)));
    }
    if let Some(bandwidth) = parse_u32(params, Key::Bandwidth) {
        props.push(dtv_property!(DTV_BANDWIDTH_HZ(bandwidth)));
    }
    if let Some(result) = scalar(params, Key::Modulation, Modulation::parse) {
        props.push(dtv_property!(DTV_MODULATION(modulation(result?))));
    }
    if let Some(result) = scalar(params, Key::Fec, Fec::parse) {
        props.push(dtv_property!(DTV_INNER_FEC(fec(result?))));
    }
    if let Some(result) = scalar(params, Key::FecHp, Fec::parse) {
        props.push(dtv_property!(DTV_CODE_RATE_HP(fec(result?))));
    }
    if let Some(result) = scalar(params, Key::FecLp, Fec::parse) {
        props.push(dtv_property!(DTV_CODE_RATE_LP(fec(result?))));
    }
    if let Some(result) = scalar(params, Key::GuardInterval, GuardInterval::parse) {
        props.push(dtv_property!(DTV_GUARD_INTERVAL(guard_interval(result?))));
    }
    if let Some(result) = scalar(params, Key::TransmissionMode, TransmissionMode::parse) {
        props.push(dtv_property!(DTV_TRANSMISSION_MODE(transmission_mode(
            result?
        ))));
    }
    if let Some(result) = scalar(params, Key::Hierarchy, Hierarchy::parse) {
        props.push(dtv_property!(DTV_HIERARCHY(hierarchy(result?))));
    }
    if let Some(result) = scalar(params, Key::RollOff, RollOff::parse) {
        props.push(dtv_property!(DTV_ROLLOFF(rolloff(result?))));
    }
    if let Some(result) = scalar(params, Key::Pilot, Pilot::parse) {
        props.push(dtv_property!(DTV_PILOT(pilot(result?))));
    }

    props.push(dtv_property!(DTV_TUNE(())));
    Ok(props)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dvbt_minimal_params_build_core_properties() {
        let mut params = TuningParams::new();
        params.set(Key::Frequency, "490000000");
        params.set(Key::Bandwidth, "8000000");
        params.set(Key::Modulation, "QAM64");

        let props = build_properties(DeliverySystem::DvbT, &params).unwrap();
        assert!(props
            .iter()
            .any(|p| matches!(p, DtvProperty::DTV_FREQUENCY(d) if d.get().unwrap() == 490_000_000)));
        assert!(props
            .iter()
            .any(|p| matches!(p, DtvProperty::DTV_BANDWIDTH_HZ(d) if d.get().unwrap() == 8_000_000)));
    }

    #[test]
    fn missing_frequency_is_rejected() {
        let params = TuningParams::new();
        assert!(build_properties(DeliverySystem::DvbT, &params).is_err());
    }
}
