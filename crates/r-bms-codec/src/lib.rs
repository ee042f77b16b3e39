//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "BMS protocol codecs and the decoded status model."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Codec for the LG Resu 10 LV CAN protocol.
//!
//! The battery reports its state in a handful of fixed 8 byte frames. Each
//! frame carries a subset of the metrics, so decoding is cumulative: a
//! [`StatusSnapshot`] keeps whatever it learned from earlier frames and only
//! the fields carried by the current identifier are overwritten.
#![warn(missing_docs)]

pub mod catalog;
pub mod frame;
pub mod status;

/// Result alias used by the codec crate.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while building frames.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// A classic CAN frame carries at most eight data bytes.
    #[error("frame payload of {0} bytes exceeds the 8 byte CAN limit")]
    PayloadTooLong(usize),
}

pub use catalog::{BitLabel, MessageId, ALARM_BITS, WARNING_BITS};
pub use frame::{encode_keep_alive, CanFrame, FRAME_PAYLOAD_LEN};
pub use status::{StatusSnapshot, CSV_HEADER, RECORD_TIME_FORMAT};
