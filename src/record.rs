//! Record data model for station readings.
//!
//! A [`Record`] is one immutable snapshot of sensor readings: a timestamp,
//! the unit system the values were measured in, and a map of field name to
//! numeric-or-null value. Records are produced once by the station and never
//! mutated afterwards; the delivery pipeline either ships them or drops them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::units::UnitSystem;

/// A single snapshot of readings from the station.
///
/// Fields use the conventional archive names (`outTemp`, `barometer`,
/// `windSpeed`, ...). A `None` value models a sensor that reported null for
/// this snapshot, which downstream formatting treats the same as an absent
/// field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Client-generated id used to correlate log lines about this record
    pub id: Uuid,

    /// When the readings were taken
    pub timestamp: DateTime<Utc>,

    /// Unit system the values are expressed in
    pub units: UnitSystem,

    /// Field name to value; `None` is a null reading
    pub fields: HashMap<String, Option<f64>>,
}

impl Record {
    /// Create an empty record stamped with the current time.
    pub fn new(units: UnitSystem) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            units,
            fields: HashMap::new(),
        }
    }

    /// Override the timestamp. The station reports observation time, which is
    /// not necessarily the time the record was enqueued.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add or replace a field.
    pub fn with_field(mut self, name: impl Into<String>, value: Option<f64>) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Look up a field, folding null into absence.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied().flatten()
    }

    /// Age of the record relative to `now`, in whole seconds.
    ///
    /// Negative when the record timestamp is ahead of `now` (clock skew).
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds()
    }
}
