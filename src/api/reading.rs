use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Number of input registers the meter reports, starting at address 0.
pub const METERING_REGISTERS: u16 = 9;
pub const METERING_START: u16 = 0;

/// The closed set of quantities a reading can carry.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MeasurementKind {
    Voltage,
    Current,
    Power,
    Energy,
    Frequency,
    PowerFactor,
}

impl MeasurementKind {
    pub fn unit(self) -> Option<&'static str> {
        match self {
            MeasurementKind::Voltage => Some("V"),
            MeasurementKind::Current => Some("A"),
            MeasurementKind::Power => Some("W"),
            MeasurementKind::Energy => Some("kWh"),
            MeasurementKind::Frequency => Some("Hz"),
            MeasurementKind::PowerFactor => None,
        }
    }

    /// Decimal places the meter resolves.
    pub fn decimals(self) -> usize {
        match self {
            MeasurementKind::Voltage | MeasurementKind::Power | MeasurementKind::Frequency => 1,
            MeasurementKind::PowerFactor => 2,
            MeasurementKind::Current | MeasurementKind::Energy => 3,
        }
    }
}

/// One snapshot of the meter. Empty when the gather produced nothing usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reading(BTreeMap<MeasurementKind, f64>);

impl Reading {
    /// Scale the nine metering registers into physical values.
    ///
    /// 32-bit quantities are split low word first: the low half sits in the
    /// lower register address.
    pub fn from_registers(registers: &[u16]) -> Option<Self> {
        let &[voltage, current_lo, current_hi, power_lo, power_hi, energy_lo, energy_hi, frequency, power_factor] =
            registers
        else {
            return None;
        };

        let values = BTreeMap::from([
            (MeasurementKind::Voltage, f64::from(voltage) / 10.0),
            (
                MeasurementKind::Current,
                f64::from(word_pair(current_lo, current_hi)) / 1000.0,
            ),
            (
                MeasurementKind::Power,
                f64::from(word_pair(power_lo, power_hi)) / 10.0,
            ),
            (
                MeasurementKind::Energy,
                f64::from(word_pair(energy_lo, energy_hi)) / 1000.0,
            ),
            (MeasurementKind::Frequency, f64::from(frequency) / 10.0),
            (MeasurementKind::PowerFactor, f64::from(power_factor) / 100.0),
        ]);
        Some(Self(values))
    }

    pub fn get(&self, kind: MeasurementKind) -> Option<f64> {
        self.0.get(&kind).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MeasurementKind, f64)> + '_ {
        self.0.iter().map(|(kind, value)| (*kind, *value))
    }

    pub fn into_inner(self) -> BTreeMap<MeasurementKind, f64> {
        self.0
    }
}

fn word_pair(low: u16, high: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(empty)");
        }
        for (index, (kind, value)) in self.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{kind}={value:.*}", kind.decimals())?;
            if let Some(unit) = kind.unit() {
                write!(f, " {unit}")?;
            }
        }
        Ok(())
    }
}
