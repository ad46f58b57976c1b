//! # Record — Pricing Row Value Type and Normalization
//!
//! A `Record` is one (date, region, operating_system, instance_type) pricing
//! observation. `Record::normalize` turns the six raw table-cell strings the
//! Page Driver yields, plus the filter context the Worker was dispatched
//! with, into a validated `Record` or a `NormalizationError`.

use crate::error::EngineError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Canonical CSV column order. Loaded-bearing for the CSV round-trip law —
/// every CSV Sink write and the header line it emits must agree with this.
pub const FIELD_ORDER: [&str; 9] = [
    "date",
    "region",
    "operating_system",
    "instance_type",
    "cost_per_hour",
    "cpu_count",
    "ram_gib",
    "storage_description",
    "network_description",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub date: NaiveDate,
    pub region: String,
    pub operating_system: String,
    pub instance_type: String,
    pub cost_per_hour: f64,
    pub cpu_count: u32,
    pub ram_gib: f64,
    pub storage_description: String,
    pub network_description: String,
}

/// Raw six-cell row as yielded by the Page Driver, column order matching the
/// table's own order: instance type, hourly rate, vCPU, memory, storage,
/// network.
pub struct RawRow<'a> {
    pub instance_type: &'a str,
    pub cost_per_hour: &'a str,
    pub cpu_count: &'a str,
    pub ram: &'a str,
    pub storage_description: &'a str,
    pub network_description: &'a str,
}

impl Record {
    /// Normalize a raw row plus the filter context under which it was
    /// extracted. Fails with `NormalizationError` when any numeric cell
    /// cannot be parsed; remaining string cells pass through untouched (no
    /// case folding, matching §4.1).
    pub fn normalize(
        date: NaiveDate,
        region: &str,
        operating_system: &str,
        raw: RawRow<'_>,
    ) -> Result<Record, EngineError> {
        let cost_per_hour = parse_cost(raw.cost_per_hour).ok_or_else(|| {
            EngineError::Normalization(format!("unparseable cost_per_hour {:?}", raw.cost_per_hour))
        })?;
        let cpu_count: u32 = raw.cpu_count.trim().parse().map_err(|_| {
            EngineError::Normalization(format!("unparseable cpu_count {:?}", raw.cpu_count))
        })?;
        let ram_gib = parse_ram_gib(raw.ram).ok_or_else(|| {
            EngineError::Normalization(format!("unparseable ram {:?}", raw.ram))
        })?;

        Ok(Record {
            date,
            region: region.to_string(),
            operating_system: operating_system.to_string(),
            instance_type: raw.instance_type.to_string(),
            cost_per_hour,
            cpu_count,
            ram_gib,
            storage_description: raw.storage_description.to_string(),
            network_description: raw.network_description.to_string(),
        })
    }

    /// `date-region-os-instance_type`, the natural key enforced by the DB
    /// Sink's unique constraint. Built from the exact component forms, no
    /// case folding.
    pub fn primary_key(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.date, self.region, self.operating_system, self.instance_type
        )
    }

    /// Canonical CSV field values in `FIELD_ORDER`, as strings. Numeric
    /// fields are rendered with enough precision to round-trip within parse
    /// precision (the law in §8).
    pub fn csv_fields(&self) -> [String; 9] {
        [
            self.date.to_string(),
            self.region.clone(),
            self.operating_system.clone(),
            self.instance_type.clone(),
            self.cost_per_hour.to_string(),
            self.cpu_count.to_string(),
            self.ram_gib.to_string(),
            self.storage_description.clone(),
            self.network_description.clone(),
        ]
    }
}

/// Strip a leading currency sigil (`$`, `€`, `£`) and parse the remainder as
/// a positive real.
fn parse_cost(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let stripped = trimmed.trim_start_matches(['$', '€', '£']);
    stripped.parse::<f64>().ok().filter(|v| *v > 0.0)
}

/// Split "<n> GiB" on whitespace and parse the first token as a positive
/// real, per §4.1.
fn parse_ram_gib(raw: &str) -> Option<f64> {
    raw.trim()
        .split_whitespace()
        .next()?
        .parse::<f64>()
        .ok()
        .filter(|v| *v > 0.0)
}
