//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "SocketCAN transport for kernel CAN interfaces."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! SocketCAN binding.
//!
//! Two raw sockets are opened on the interface: a blocking one for the rare
//! outbound frames and a tokio one drained by a reader task that fans
//! inbound data frames out to subscribers.

use std::fmt;
use std::io;

use parking_lot::Mutex;
use r_bms_codec::{CanFrame, CodecError, FRAME_PAYLOAD_LEN};
use socketcan::{EmbeddedFrame, ExtendedId, Id, Socket, StandardId};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

use crate::bus::{BusError, CanBus};

const FRAME_CHANNEL_CAPACITY: usize = 256;
const MAX_STANDARD_ID: u32 = 0x7ff;

/// Kernel CAN interface (`can0`, `vcan0`, ...).
pub struct SocketCanBus {
    name: String,
    writer: Mutex<Option<socketcan::CanSocket>>,
    frames: Mutex<Option<broadcast::Sender<CanFrame>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SocketCanBus {
    /// Open `interface` and start its reader task. Needs a tokio runtime.
    pub fn open(interface: &str) -> Result<Self, BusError> {
        let open_error = |source: io::Error| BusError::Open {
            interface: interface.to_owned(),
            source,
        };
        let writer = socketcan::CanSocket::open(interface).map_err(open_error)?;
        let reader_socket = socketcan::tokio::CanSocket::open(interface).map_err(open_error)?;

        let (sender, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        let reader = tokio::spawn(read_frames(
            interface.to_owned(),
            reader_socket,
            sender.clone(),
        ));
        info!(bus = interface, "socketcan interface opened");

        Ok(Self {
            name: interface.to_owned(),
            writer: Mutex::new(Some(writer)),
            frames: Mutex::new(Some(sender)),
            reader: Mutex::new(Some(reader)),
        })
    }

    fn disconnected(&self) -> BusError {
        BusError::Disconnected {
            interface: self.name.clone(),
        }
    }
}

impl CanBus for SocketCanBus {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self) -> broadcast::Receiver<CanFrame> {
        match self.frames.lock().as_ref() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    fn publish(&self, frame: &CanFrame) -> Result<(), BusError> {
        let wire = to_wire_frame(frame).ok_or_else(|| BusError::Publish {
            interface: self.name.clone(),
            reason: format!("identifier {:#x} is not a valid CAN id", frame.id),
        })?;
        let guard = self.writer.lock();
        let socket = guard.as_ref().ok_or_else(|| self.disconnected())?;
        socket.write_frame(&wire).map_err(|err| BusError::Publish {
            interface: self.name.clone(),
            reason: err.to_string(),
        })?;
        trace!(bus = %self.name, %frame, "frame written");
        Ok(())
    }

    fn disconnect(&self) -> Result<(), BusError> {
        if self.writer.lock().take().is_none() {
            return Err(self.disconnected());
        }
        // Dropping both senders closes every subscriber stream.
        self.frames.lock().take();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        info!(bus = %self.name, "bus disconnected");
        Ok(())
    }
}

impl Drop for SocketCanBus {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

impl fmt::Debug for SocketCanBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketCanBus")
            .field("name", &self.name)
            .field("connected", &self.writer.lock().is_some())
            .finish_non_exhaustive()
    }
}

async fn read_frames(
    interface: String,
    socket: socketcan::tokio::CanSocket,
    frames: broadcast::Sender<CanFrame>,
) {
    loop {
        match socket.read_frame().await {
            Ok(socketcan::CanFrame::Data(wire)) => match from_wire_frame(&wire) {
                Ok(frame) => {
                    let _ = frames.send(frame);
                }
                Err(err) => warn!(bus = %interface, error = %err, "dropping malformed frame"),
            },
            Ok(_) => trace!(bus = %interface, "ignoring remote or error frame"),
            Err(err) => {
                error!(bus = %interface, error = %err, "CAN read failed; closing frame stream");
                return;
            }
        }
    }
}

fn raw_id(id: Id) -> u32 {
    match id {
        Id::Standard(id) => u32::from(id.as_raw()),
        Id::Extended(id) => id.as_raw(),
    }
}

fn from_wire_frame(wire: &impl EmbeddedFrame) -> Result<CanFrame, CodecError> {
    CanFrame::new(raw_id(wire.id()), wire.data())
}

fn to_wire_frame(frame: &CanFrame) -> Option<socketcan::CanFrame> {
    let id: Id = if frame.id <= MAX_STANDARD_ID {
        StandardId::new(u16::try_from(frame.id).ok()?)?.into()
    } else {
        ExtendedId::new(frame.id)?.into()
    };
    let len = usize::from(frame.len).min(FRAME_PAYLOAD_LEN);
    socketcan::CanFrame::new(id, &frame.data[..len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_bms_codec::encode_keep_alive;

    #[test]
    fn keep_alive_maps_to_a_standard_data_frame() {
        let wire = to_wire_frame(&encode_keep_alive()).unwrap();
        assert_eq!(raw_id(wire.id()), 0x305);
        assert!(matches!(wire.id(), Id::Standard(_)));
        assert_eq!(wire.data(), &[0u8; 8]);
    }

    #[test]
    fn short_wire_frames_are_zero_padded() {
        let wire = socketcan::CanFrame::new(StandardId::new(0x355).unwrap(), &[0x4d, 0x00]).unwrap();
        let frame = from_wire_frame(&wire).unwrap();
        assert_eq!(frame.id, 0x355);
        assert_eq!(frame.len, 2);
        assert_eq!(frame.data, [0x4d, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn extended_identifiers_keep_their_width() {
        let frame = CanFrame::from_array(0x1234_5678, [1, 2, 3, 4, 5, 6, 7, 8]);
        let wire = to_wire_frame(&frame).unwrap();
        assert!(matches!(wire.id(), Id::Extended(_)));
        assert_eq!(from_wire_frame(&wire).unwrap(), frame);
    }

    #[test]
    fn out_of_range_identifier_is_rejected() {
        let frame = CanFrame::from_array(0x2000_0000, [0; 8]);
        assert!(to_wire_frame(&frame).is_none());
    }
}
