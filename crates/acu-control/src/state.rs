use acu_protocol::{AnalogChannel, ControlSnapshot, FlagGroup};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Operator command store shared between the editing front end and the frame builder.
///
/// All commands live behind one mutex, so a snapshot taken while another thread
/// applies an [`update`](Self::update) sees either none or all of that edit.
#[derive(Debug, Default)]
pub struct ControlState {
    commands: Mutex<ControlSnapshot>,
}

impl ControlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_commands(commands: ControlSnapshot) -> Self {
        Self {
            commands: Mutex::new(commands),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlSnapshot> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deep copy of every command collection at one instant.
    pub fn snapshot(&self) -> ControlSnapshot {
        self.lock().clone()
    }

    /// Apply a multi-field edit atomically with respect to [`snapshot`](Self::snapshot).
    pub fn update<R>(&self, edit: impl FnOnce(&mut ControlSnapshot) -> R) -> R {
        edit(&mut *self.lock())
    }

    pub fn reset(&self) {
        *self.lock() = ControlSnapshot::default();
    }

    pub fn set_command_bit(&self, byte: usize, bit: u8, on: bool) {
        self.lock().command_bits.insert((byte, bit), on);
    }

    pub fn set_analog(&self, channel: AnalogChannel, offset: usize, value: f64) {
        self.lock().analog_mut(channel).insert(offset, value);
    }

    pub fn set_frequency(&self, offset: usize, hz: f64) {
        self.set_analog(AnalogChannel::Frequency, offset, hz);
    }

    pub fn set_start_time(&self, offset: usize, seconds: f64) {
        self.set_analog(AnalogChannel::StartTime, offset, seconds);
    }

    pub fn set_voltage(&self, offset: usize, volts: f64) {
        self.set_analog(AnalogChannel::Voltage, offset, volts);
    }

    pub fn set_flag(&self, group: FlagGroup, index: u8, on: bool) {
        self.lock().flags_mut(group).insert(index, on);
    }

    pub fn set_isolation(&self, index: u8, on: bool) {
        self.set_flag(FlagGroup::Isolation, index, on);
    }

    pub fn set_start(&self, index: u8, on: bool) {
        self.set_flag(FlagGroup::Start, index, on);
    }

    pub fn set_chu(&self, index: u8, on: bool) {
        self.set_flag(FlagGroup::Chu, index, on);
    }

    pub fn set_redundant(&self, index: u8, on: bool) {
        self.set_flag(FlagGroup::Redundant, index, on);
    }

    pub fn set_battery_temperature(&self, celsius: f64) {
        self.lock().battery_temperature = celsius;
    }
}
