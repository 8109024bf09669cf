//! Unit systems and conversion between them.
//!
//! Stations commonly report US customary units while the collection endpoint
//! expects metric values with wind in m/s and rain in mm. [`convert_record`]
//! is the pure transformation between systems: no I/O, total over any
//! well-formed record, null and unknown fields pass through untouched.

use serde::{Deserialize, Serialize};

use crate::record::Record;

/// The unit systems a record's values can be expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UnitSystem {
    /// US customary: degF, inHg, mph, inches of rain
    Us,
    /// Metric: degC, mbar, km/h, cm of rain
    Metric,
    /// Metric with wind in m/s and rain in mm
    MetricWx,
}

/// Physical quantity a field measures, inferred from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationKind {
    Temperature,
    Pressure,
    Speed,
    Rain,
    Percent,
    Direction,
}

/// Conventional field names and the quantity they carry.
const FIELD_KINDS: &[(&str, ObservationKind)] = &[
    ("outTemp", ObservationKind::Temperature),
    ("inTemp", ObservationKind::Temperature),
    ("dewpoint", ObservationKind::Temperature),
    ("windchill", ObservationKind::Temperature),
    ("heatindex", ObservationKind::Temperature),
    ("barometer", ObservationKind::Pressure),
    ("pressure", ObservationKind::Pressure),
    ("altimeter", ObservationKind::Pressure),
    ("windSpeed", ObservationKind::Speed),
    ("windGust", ObservationKind::Speed),
    ("rain", ObservationKind::Rain),
    ("rainRate", ObservationKind::Rain),
    ("outHumidity", ObservationKind::Percent),
    ("inHumidity", ObservationKind::Percent),
    ("windDir", ObservationKind::Direction),
    ("windGustDir", ObservationKind::Direction),
];

const INHG_TO_MBAR: f64 = 33.8639;
const MPH_TO_MPS: f64 = 0.44704;
const KPH_TO_MPS: f64 = 1.0 / 3.6;
const IN_TO_MM: f64 = 25.4;
const CM_TO_MM: f64 = 10.0;

/// Quantity carried by a conventional field name, if known.
pub fn kind_of(field: &str) -> Option<ObservationKind> {
    FIELD_KINDS
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, kind)| *kind)
}

/// Convert a single value between unit systems.
pub fn convert_value(kind: ObservationKind, value: f64, from: UnitSystem, to: UnitSystem) -> f64 {
    if from == to {
        return value;
    }
    from_metricwx(kind, to_metricwx(kind, value, from), to)
}

fn to_metricwx(kind: ObservationKind, value: f64, from: UnitSystem) -> f64 {
    match (from, kind) {
        (UnitSystem::MetricWx, _) => value,
        (UnitSystem::Us, ObservationKind::Temperature) => (value - 32.0) * 5.0 / 9.0,
        (UnitSystem::Us, ObservationKind::Pressure) => value * INHG_TO_MBAR,
        (UnitSystem::Us, ObservationKind::Speed) => value * MPH_TO_MPS,
        (UnitSystem::Us, ObservationKind::Rain) => value * IN_TO_MM,
        (UnitSystem::Metric, ObservationKind::Speed) => value * KPH_TO_MPS,
        (UnitSystem::Metric, ObservationKind::Rain) => value * CM_TO_MM,
        // Temperature and pressure already match, percent and direction are
        // dimensionless in every system
        _ => value,
    }
}

fn from_metricwx(kind: ObservationKind, value: f64, to: UnitSystem) -> f64 {
    match (to, kind) {
        (UnitSystem::MetricWx, _) => value,
        (UnitSystem::Us, ObservationKind::Temperature) => value * 9.0 / 5.0 + 32.0,
        (UnitSystem::Us, ObservationKind::Pressure) => value / INHG_TO_MBAR,
        (UnitSystem::Us, ObservationKind::Speed) => value / MPH_TO_MPS,
        (UnitSystem::Us, ObservationKind::Rain) => value / IN_TO_MM,
        (UnitSystem::Metric, ObservationKind::Speed) => value / KPH_TO_MPS,
        (UnitSystem::Metric, ObservationKind::Rain) => value / CM_TO_MM,
        _ => value,
    }
}

/// Convert every numeric field of `record` to the target unit system.
///
/// Null fields stay null, fields with unrecognized names are carried over
/// unchanged, and a record already in the target system is returned as-is.
pub fn convert_record(record: &Record, target: UnitSystem) -> Record {
    if record.units == target {
        return record.clone();
    }

    let fields = record
        .fields
        .iter()
        .map(|(name, value)| {
            let converted = value.map(|v| match kind_of(name) {
                Some(kind) => convert_value(kind, v, record.units, target),
                None => v,
            });
            (name.clone(), converted)
        })
        .collect();

    Record {
        id: record.id,
        timestamp: record.timestamp,
        units: target,
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_temperature_us_to_metricwx() {
        let c = convert_value(
            ObservationKind::Temperature,
            32.0,
            UnitSystem::Us,
            UnitSystem::MetricWx,
        );
        assert!((c - 0.0).abs() < EPS);

        let c = convert_value(
            ObservationKind::Temperature,
            212.0,
            UnitSystem::Us,
            UnitSystem::MetricWx,
        );
        assert!((c - 100.0).abs() < EPS);
    }

    #[test]
    fn test_speed_conversions() {
        let mps = convert_value(
            ObservationKind::Speed,
            10.0,
            UnitSystem::Us,
            UnitSystem::MetricWx,
        );
        assert!((mps - 4.4704).abs() < EPS);

        let mps = convert_value(
            ObservationKind::Speed,
            36.0,
            UnitSystem::Metric,
            UnitSystem::MetricWx,
        );
        assert!((mps - 10.0).abs() < EPS);
    }

    #[test]
    fn test_rain_conversions() {
        let mm = convert_value(ObservationKind::Rain, 1.0, UnitSystem::Us, UnitSystem::MetricWx);
        assert!((mm - 25.4).abs() < EPS);

        let mm = convert_value(
            ObservationKind::Rain,
            2.5,
            UnitSystem::Metric,
            UnitSystem::MetricWx,
        );
        assert!((mm - 25.0).abs() < EPS);
    }

    #[test]
    fn test_pressure_round_trip() {
        let mbar = convert_value(
            ObservationKind::Pressure,
            29.92,
            UnitSystem::Us,
            UnitSystem::MetricWx,
        );
        assert!((mbar - 29.92 * INHG_TO_MBAR).abs() < EPS);

        let back = convert_value(
            ObservationKind::Pressure,
            mbar,
            UnitSystem::MetricWx,
            UnitSystem::Us,
        );
        assert!((back - 29.92).abs() < EPS);
    }

    #[test]
    fn test_dimensionless_kinds_unchanged() {
        let pct = convert_value(
            ObservationKind::Percent,
            55.0,
            UnitSystem::Us,
            UnitSystem::MetricWx,
        );
        assert!((pct - 55.0).abs() < EPS);

        let deg = convert_value(
            ObservationKind::Direction,
            270.0,
            UnitSystem::Metric,
            UnitSystem::MetricWx,
        );
        assert!((deg - 270.0).abs() < EPS);
    }

    #[test]
    fn test_kind_of_lookup() {
        assert_eq!(kind_of("outTemp"), Some(ObservationKind::Temperature));
        assert_eq!(kind_of("windSpeed"), Some(ObservationKind::Speed));
        assert_eq!(kind_of("soilMoisture"), None);
    }

    #[test]
    fn test_convert_record_converts_known_fields() {
        let record = Record::new(UnitSystem::Us)
            .with_field("outTemp", Some(50.0))
            .with_field("outHumidity", Some(80.0));

        let converted = convert_record(&record, UnitSystem::MetricWx);

        assert_eq!(converted.units, UnitSystem::MetricWx);
        assert!((converted.value("outTemp").unwrap() - 10.0).abs() < EPS);
        assert!((converted.value("outHumidity").unwrap() - 80.0).abs() < EPS);
        assert_eq!(converted.id, record.id);
        assert_eq!(converted.timestamp, record.timestamp);
    }

    #[test]
    fn test_convert_record_preserves_null_and_unknown_fields() {
        let record = Record::new(UnitSystem::Us)
            .with_field("outTemp", None)
            .with_field("soilMoisture", Some(12.5));

        let converted = convert_record(&record, UnitSystem::MetricWx);

        assert_eq!(converted.value("outTemp"), None);
        assert!(converted.fields.contains_key("outTemp"));
        assert_eq!(converted.value("soilMoisture"), Some(12.5));
    }

    #[test]
    fn test_convert_record_identity_when_already_target() {
        let record = Record::new(UnitSystem::MetricWx).with_field("outTemp", Some(21.4));

        let converted = convert_record(&record, UnitSystem::MetricWx);

        assert_eq!(converted.value("outTemp"), Some(21.4));
        assert_eq!(converted.units, UnitSystem::MetricWx);
    }
}
