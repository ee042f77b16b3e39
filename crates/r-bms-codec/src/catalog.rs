//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "BMS protocol codecs and the decoded status model."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

/// Message identifiers understood by the monitor.
///
/// ```text
/// 0x356  volt/amp/temp       BMS -> inverter
/// 0x355  soc/soh             BMS -> inverter
/// 0x351  charge limits       BMS -> inverter
/// 0x354  serial (constant)   BMS -> inverter
/// 0x359  warnings/alarms     BMS -> inverter
/// 0x305  keep-alive          inverter -> BMS
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Pack voltage, current and temperature.
    VoltAmpTemp,
    /// State of charge and state of health.
    SocSoh,
    /// Charge voltage and current limits.
    Limits,
    /// Constant frame of unknown meaning, treated as a serial number.
    SerialNum,
    /// Keep-alive sent by the inverter side; echoed frames are ignored.
    KeepAlive,
    /// Warning and alarm bit fields.
    WarnAlarm,
}

impl MessageId {
    /// Every identifier in catalog order.
    pub const ALL: [MessageId; 6] = [
        MessageId::VoltAmpTemp,
        MessageId::SocSoh,
        MessageId::Limits,
        MessageId::SerialNum,
        MessageId::KeepAlive,
        MessageId::WarnAlarm,
    ];

    /// Map a raw 11 bit identifier onto the catalog.
    pub fn from_raw(id: u32) -> Option<Self> {
        match id {
            0x356 => Some(MessageId::VoltAmpTemp),
            0x355 => Some(MessageId::SocSoh),
            0x351 => Some(MessageId::Limits),
            0x354 => Some(MessageId::SerialNum),
            0x305 => Some(MessageId::KeepAlive),
            0x359 => Some(MessageId::WarnAlarm),
            _ => None,
        }
    }

    /// Raw identifier on the wire.
    pub const fn raw(self) -> u32 {
        match self {
            MessageId::VoltAmpTemp => 0x356,
            MessageId::SocSoh => 0x355,
            MessageId::Limits => 0x351,
            MessageId::SerialNum => 0x354,
            MessageId::KeepAlive => 0x305,
            MessageId::WarnAlarm => 0x359,
        }
    }

    /// Stable label used in logs and metric labels.
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageId::VoltAmpTemp => "VOLT_AMP_TEMP",
            MessageId::SocSoh => "SOC_SOH",
            MessageId::Limits => "LIMITS",
            MessageId::SerialNum => "SERIAL_NUM",
            MessageId::KeepAlive => "KEEP_ALIVE",
            MessageId::WarnAlarm => "WARN_ALARM",
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label attached to a bit mask in a warning or alarm word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitLabel {
    /// Label appended to the snapshot when the mask matches.
    pub label: &'static str,
    /// Mask tested against the little-endian word.
    pub mask: u16,
}

const fn bit(label: &'static str, mask: u16) -> BitLabel {
    BitLabel { label, mask }
}

/// Warning word (`ww WW` in `359 [8] ww WW aa AA 00 00 00 00`).
///
/// Decoding walks this table in order, so the order of labels in a snapshot
/// follows the table and not the bit position.
pub const WARNING_BITS: [BitLabel; 16] = [
    bit("WRN_ONLY_SUB_RELAY_COMMAND", 0x0001),
    bit("BATTERY_HIGH_VOLTAGE", 0x0002),
    bit("BATTERY_LOW_VOLTAGE", 0x0004),
    bit("BATTERY_HIGH_TEMP", 0x0008),
    bit("BATTERY_LOW_TEMP", 0x0010),
    bit("UNKNOWN_ww5", 0x0020),
    bit("UNKNOWN_ww6", 0x0040),
    bit("BATTERY_HIGH_CURRENT_DISCHARGE", 0x0080),
    bit("BATTERY_HIGH_CURRENT_CHARGE", 0x0100),
    bit("UNKNOWN_WW1", 0x0200),
    bit("UNKNOWN_WW2", 0x0400),
    bit("BMS_INTERNAL", 0x0800),
    bit("CELL_IMBALANCE", 0x1000),
    bit("ALARM_SUB_PACK2_ERROR", 0x2000),
    bit("ALARM_SUB_PACK1_ERROR", 0x4000),
    bit("UNKNOWN_WW7", 0x8000),
];

/// Alarm word (`aa AA`). The meaning of the individual bits is unknown, so a
/// single sentinel covers all of them.
pub const ALARM_BITS: [BitLabel; 1] = [bit("UNKNOWN_ALARM", 0xffff)];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_ids_round_trip_through_catalog() {
        for id in MessageId::ALL {
            assert_eq!(MessageId::from_raw(id.raw()), Some(id));
        }
        assert_eq!(MessageId::from_raw(0x123), None);
    }

    #[test]
    fn warning_masks_cover_every_bit_once() {
        let combined = WARNING_BITS.iter().fold(0u16, |acc, entry| {
            assert_eq!(acc & entry.mask, 0, "{} overlaps", entry.label);
            acc | entry.mask
        });
        assert_eq!(combined, 0xffff);
    }
}
