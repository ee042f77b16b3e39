//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "BMS protocol codecs and the decoded status model."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{BitLabel, MessageId, ALARM_BITS, WARNING_BITS};
use crate::frame::{CanFrame, FRAME_PAYLOAD_LEN};

/// Column header written as the first line of every datafile.
pub const CSV_HEADER: &str =
    "time,soc,soh,voltage,current,temp,maxVoltage,maxChargeCurrent,maxDischargeCurrent\n";

/// Timestamp layout of the first datafile column.
pub const RECORD_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Cumulative decoded state of the battery.
///
/// Every field starts at zero and is only overwritten when a frame carrying
/// it is decoded. The JSON form is what the query endpoint returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// State of charge in percent.
    pub soc: u16,
    /// State of health in percent.
    pub soh: u16,
    /// Pack voltage in volts.
    pub voltage: f32,
    /// Pack current in amperes, positive while charging.
    pub current: f32,
    /// Pack temperature in degrees Celsius.
    pub temp: f32,
    /// Charge voltage limit in volts (14S pack, 4.12 V per cell).
    pub max_voltage: f32,
    /// Charge current limit in amperes.
    pub max_charge_current: f32,
    /// Discharge current limit in amperes.
    pub max_discharge_current: f32,
    /// Active warning labels in table order.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Active alarm labels in table order.
    #[serde(default)]
    pub alarms: Vec<String>,
}

impl StatusSnapshot {
    /// Decode one frame into the snapshot.
    ///
    /// Only the fields carried by `id` change. Unknown identifiers leave the
    /// snapshot untouched and return `None`; known ones return their catalog
    /// entry, including the ones that carry nothing worth decoding.
    ///
    /// Warning and alarm labels are appended, so decoding the same
    /// `WARN_ALARM` frame twice lists its labels twice.
    pub fn decode(&mut self, id: u32, payload: &[u8; FRAME_PAYLOAD_LEN]) -> Option<MessageId> {
        let message = MessageId::from_raw(id)?;
        debug!(id = %format!("{id:03X}"), message = %message, payload = ?payload, "decoding frame");

        match message {
            MessageId::VoltAmpTemp => {
                self.voltage = f32::from(word(payload, 0)) / 100.0;
                self.current = f32::from(signed_word(payload, 2)) / 10.0;
                self.temp = f32::from(signed_word(payload, 4)) / 10.0;
                debug!(
                    voltage = self.voltage,
                    current = self.current,
                    temp = self.temp,
                    "volt/amp/temp updated"
                );
            }
            MessageId::SocSoh => {
                self.soc = word(payload, 0);
                self.soh = word(payload, 2);
                debug!(soc = self.soc, soh = self.soh, "state of charge/health updated");
            }
            MessageId::Limits => {
                self.max_voltage = f32::from(word(payload, 0)) / 10.0;
                self.max_charge_current = f32::from(word(payload, 2)) / 10.0;
                self.max_discharge_current = f32::from(word(payload, 4)) / 10.0;
                debug!(
                    max_voltage = self.max_voltage,
                    max_charge_current = self.max_charge_current,
                    max_discharge_current = self.max_discharge_current,
                    "charge limits updated"
                );
            }
            MessageId::SerialNum | MessageId::KeepAlive => {}
            MessageId::WarnAlarm => {
                collect_labels(word(payload, 0), &WARNING_BITS, &mut self.warnings);
                collect_labels(word(payload, 2), &ALARM_BITS, &mut self.alarms);
                debug!(warnings = ?self.warnings, alarms = ?self.alarms, "warnings/alarms updated");
            }
        }

        Some(message)
    }

    /// Decode a frame received from the bus.
    pub fn apply(&mut self, frame: &CanFrame) -> Option<MessageId> {
        self.decode(frame.id, &frame.data)
    }

    /// Render the snapshot as one datafile line matching [`CSV_HEADER`].
    pub fn csv_record(&self, timestamp: &NaiveDateTime) -> String {
        format!(
            "{},{},{},{:.2},{:.2},{:.1},{:.1},{:.1},{:.1}\n",
            timestamp.format(RECORD_TIME_FORMAT),
            self.soc,
            self.soh,
            self.voltage,
            self.current,
            self.temp,
            self.max_voltage,
            self.max_charge_current,
            self.max_discharge_current
        )
    }
}

fn word(payload: &[u8; FRAME_PAYLOAD_LEN], offset: usize) -> u16 {
    u16::from_le_bytes([payload[offset], payload[offset + 1]])
}

fn signed_word(payload: &[u8; FRAME_PAYLOAD_LEN], offset: usize) -> i16 {
    i16::from_le_bytes([payload[offset], payload[offset + 1]])
}

fn collect_labels(value: u16, table: &[BitLabel], into: &mut Vec<String>) {
    into.extend(
        table
            .iter()
            .filter(|entry| value & entry.mask != 0)
            .map(|entry| entry.label.to_owned()),
    );
}
