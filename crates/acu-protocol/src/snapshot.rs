use core::fmt;
use serde::Serialize;
use std::collections::BTreeMap;

/// Point-in-time copy of every operator command a send frame is built from.
///
/// Boolean command bits are keyed by `(byte, bit)`. Analog channels are keyed by the
/// byte offset their big-endian u16 lands on. Flag groups are keyed by bit index
/// inside their packed byte.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlSnapshot {
    pub command_bits: BTreeMap<(usize, u8), bool>,
    pub frequency: BTreeMap<usize, f64>,
    pub start_time: BTreeMap<usize, f64>,
    pub voltage: BTreeMap<usize, f64>,
    pub isolation: BTreeMap<u8, bool>,
    pub start: BTreeMap<u8, bool>,
    pub chu: BTreeMap<u8, bool>,
    pub redundant: BTreeMap<u8, bool>,
    pub battery_temperature: f64,
}

impl ControlSnapshot {
    pub fn bits(&self, field: BitField) -> &BTreeMap<(usize, u8), bool> {
        match field {
            BitField::CommandBits => &self.command_bits,
        }
    }

    pub fn analog(&self, channel: AnalogChannel) -> &BTreeMap<usize, f64> {
        match channel {
            AnalogChannel::Frequency => &self.frequency,
            AnalogChannel::StartTime => &self.start_time,
            AnalogChannel::Voltage => &self.voltage,
        }
    }

    pub fn flags(&self, group: FlagGroup) -> &BTreeMap<u8, bool> {
        match group {
            FlagGroup::Isolation => &self.isolation,
            FlagGroup::Start => &self.start,
            FlagGroup::Chu => &self.chu,
            FlagGroup::Redundant => &self.redundant,
        }
    }

    pub fn scalar(&self, field: ScalarField) -> f64 {
        match field {
            ScalarField::BatteryTemperature => self.battery_temperature,
        }
    }

    pub fn analog_mut(&mut self, channel: AnalogChannel) -> &mut BTreeMap<usize, f64> {
        match channel {
            AnalogChannel::Frequency => &mut self.frequency,
            AnalogChannel::StartTime => &mut self.start_time,
            AnalogChannel::Voltage => &mut self.voltage,
        }
    }

    pub fn flags_mut(&mut self, group: FlagGroup) -> &mut BTreeMap<u8, bool> {
        match group {
            FlagGroup::Isolation => &mut self.isolation,
            FlagGroup::Start => &mut self.start,
            FlagGroup::Chu => &mut self.chu,
            FlagGroup::Redundant => &mut self.redundant,
        }
    }
}

macro_rules! source_keys {
    ($ty:ident { $($variant:ident => $key:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            /// Key used for this source in template documents.
            pub fn key(self) -> &'static str {
                match self {
                    $($ty::$variant => $key),+
                }
            }

            pub fn from_key(key: &str) -> Option<Self> {
                match key {
                    $($key => Some($ty::$variant),)+
                    _ => None,
                }
            }

            pub(crate) fn expected_keys() -> String {
                Self::ALL.iter().map(|s| s.key()).collect::<Vec<_>>().join(", ")
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.key())
            }
        }
    };
}

/// `(byte, bit)`-keyed boolean maps.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BitField {
    CommandBits,
}

/// Offset-keyed analog values.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalogChannel {
    Frequency,
    StartTime,
    Voltage,
}

/// Bit-index-keyed booleans packed into a single byte.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagGroup {
    Isolation,
    Start,
    Chu,
    Redundant,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarField {
    BatteryTemperature,
}

source_keys!(BitField { CommandBits => "command_bits" });
source_keys!(AnalogChannel {
    Frequency => "frequency",
    StartTime => "start_time",
    Voltage => "voltage",
});
source_keys!(FlagGroup {
    Isolation => "isolation",
    Start => "start",
    Chu => "chu",
    Redundant => "redundant",
});
source_keys!(ScalarField { BatteryTemperature => "battery_temperature" });

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_keys_round_trip_through_documents() {
        for ch in AnalogChannel::ALL {
            assert_eq!(AnalogChannel::from_key(ch.key()), Some(*ch));
        }
        assert_eq!(FlagGroup::from_key("chu"), Some(FlagGroup::Chu));
        assert_eq!(FlagGroup::from_key("frequency"), None);
        assert_eq!(AnalogChannel::expected_keys(), "frequency, start_time, voltage");
    }

    #[test]
    fn accessors_select_the_matching_collection() {
        let mut snap = ControlSnapshot::default();
        snap.analog_mut(AnalogChannel::Voltage).insert(96, 600.0);
        snap.flags_mut(FlagGroup::Redundant).insert(2, true);
        snap.battery_temperature = 21.5;

        assert_eq!(snap.analog(AnalogChannel::Voltage).get(&96), Some(&600.0));
        assert!(snap.analog(AnalogChannel::Frequency).is_empty());
        assert_eq!(snap.flags(FlagGroup::Redundant).get(&2), Some(&true));
        assert_eq!(snap.scalar(ScalarField::BatteryTemperature), 21.5);
    }
}
