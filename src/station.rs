//! Simulated weather station for driving the pipeline end to end.
//!
//! Produces plausible readings in US units with a bounded random walk per
//! sensor, so the service can run against a real or dry-run endpoint without
//! hardware attached. Real deployments replace this producer with whatever
//! yields archive records.

use rand::Rng;

use crate::record::Record;
use crate::units::UnitSystem;

const TEMP_RANGE_F: (f64, f64) = (-22.0, 104.0);
const HUMIDITY_RANGE: (f64, f64) = (5.0, 100.0);
const BAROMETER_RANGE_INHG: (f64, f64) = (28.0, 31.5);
const WIND_RANGE_MPH: (f64, f64) = (0.0, 60.0);

/// A random-walk simulator over a small set of common sensors.
pub struct StationSimulator {
    temp_f: f64,
    humidity: f64,
    barometer_inhg: f64,
    wind_mph: f64,
}

impl StationSimulator {
    pub fn new() -> Self {
        Self {
            temp_f: 59.0,
            humidity: 60.0,
            barometer_inhg: 29.92,
            wind_mph: 5.0,
        }
    }

    /// Take one reading; each sensor drifts by a bounded random step.
    ///
    /// Humidity occasionally reports null to exercise the sensor-dropout
    /// path downstream.
    pub fn sample(&mut self) -> Record {
        let mut rng = rand::thread_rng();

        self.temp_f = step(self.temp_f, 0.8, TEMP_RANGE_F, &mut rng);
        self.humidity = step(self.humidity, 2.0, HUMIDITY_RANGE, &mut rng);
        self.barometer_inhg = step(self.barometer_inhg, 0.02, BAROMETER_RANGE_INHG, &mut rng);
        self.wind_mph = step(self.wind_mph, 1.5, WIND_RANGE_MPH, &mut rng);

        let humidity = if rng.gen_ratio(1, 20) {
            None
        } else {
            Some(self.humidity)
        };

        Record::new(UnitSystem::Us)
            .with_field("outTemp", Some(self.temp_f))
            .with_field("outHumidity", humidity)
            .with_field("barometer", Some(self.barometer_inhg))
            .with_field("windSpeed", Some(self.wind_mph))
    }
}

impl Default for StationSimulator {
    fn default() -> Self {
        Self::new()
    }
}

fn step(value: f64, max_step: f64, range: (f64, f64), rng: &mut impl Rng) -> f64 {
    (value + rng.gen_range(-max_step..=max_step)).clamp(range.0, range.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_stay_in_range() {
        let mut station = StationSimulator::new();

        for _ in 0..1_000 {
            let record = station.sample();
            let temp = record.value("outTemp").unwrap();
            assert!(temp >= TEMP_RANGE_F.0 && temp <= TEMP_RANGE_F.1);

            let pressure = record.value("barometer").unwrap();
            assert!(pressure >= BAROMETER_RANGE_INHG.0 && pressure <= BAROMETER_RANGE_INHG.1);

            let wind = record.value("windSpeed").unwrap();
            assert!(wind >= WIND_RANGE_MPH.0 && wind <= WIND_RANGE_MPH.1);
        }
    }

    #[test]
    fn test_samples_are_us_units_with_expected_fields() {
        let mut station = StationSimulator::new();
        let record = station.sample();

        assert_eq!(record.units, UnitSystem::Us);
        assert!(record.fields.contains_key("outTemp"));
        assert!(record.fields.contains_key("outHumidity"));
        assert!(record.fields.contains_key("barometer"));
        assert!(record.fields.contains_key("windSpeed"));
    }
}
