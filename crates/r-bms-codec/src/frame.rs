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

use serde::{Deserialize, Serialize};

use crate::catalog::MessageId;
use crate::{CodecError, Result};

/// Number of data bytes in a classic CAN frame.
pub const FRAME_PAYLOAD_LEN: usize = 8;

/// Classic CAN frame as exchanged with the bus transport.
///
/// `data` is always eight bytes wide; frames shorter than that are zero
/// padded and `len` records how many bytes were actually on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    /// Identifier of the frame.
    pub id: u32,
    /// Data length code.
    pub len: u8,
    /// Payload, zero padded to eight bytes.
    pub data: [u8; FRAME_PAYLOAD_LEN],
}

impl CanFrame {
    /// Build a frame from a payload of at most eight bytes.
    pub fn new(id: u32, payload: &[u8]) -> Result<Self> {
        if payload.len() > FRAME_PAYLOAD_LEN {
            return Err(CodecError::PayloadTooLong(payload.len()));
        }
        let mut data = [0u8; FRAME_PAYLOAD_LEN];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            id,
            len: payload.len() as u8,
            data,
        })
    }

    /// Build a full eight byte frame.
    pub const fn from_array(id: u32, data: [u8; FRAME_PAYLOAD_LEN]) -> Self {
        Self {
            id,
            len: FRAME_PAYLOAD_LEN as u8,
            data,
        }
    }

    /// Catalog entry for this frame, if the identifier is known.
    pub fn message_id(&self) -> Option<MessageId> {
        MessageId::from_raw(self.id)
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03X} [{}]", self.id, self.len)?;
        for byte in &self.data {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

/// Keep-alive frame the BMS expects from the inverter side.
///
/// Without it the battery opens its relay. The payload carries no
/// information, so this is a constant.
pub const fn encode_keep_alive() -> CanFrame {
    CanFrame::from_array(MessageId::KeepAlive.raw(), [0u8; FRAME_PAYLOAD_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_payload_is_zero_padded() {
        let frame = CanFrame::new(0x355, &[0x4d, 0x00]).unwrap();
        assert_eq!(frame.len, 2);
        assert_eq!(frame.data, [0x4d, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let err = CanFrame::new(0x355, &[0u8; 9]).unwrap_err();
        assert_eq!(err, CodecError::PayloadTooLong(9));
    }

    #[test]
    fn display_matches_candump_layout() {
        let frame = CanFrame::from_array(0x359, [0, 0, 0, 8, 0, 0, 0, 0]);
        assert_eq!(frame.to_string(), "359 [8] 00 00 00 08 00 00 00 00");
    }
}
