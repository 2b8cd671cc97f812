//! Byte-driven parser for the device-to-host stream.
//!
//! The framer consumes the transport one byte at a time and emits fully
//! decoded [`Message`]s; partial frames never escape it. A byte with the top
//! bit set is a command byte, everything else is data belonging to the frame
//! in progress. Unknown command bytes and stray data bytes are silently
//! dropped so that a baud-rate mismatch degrades into a resynchronizing
//! stream instead of unwinding the receive thread.

use log::warn;

use crate::io::codec;
use crate::io::constants::*;
use crate::io::message::{
    AnalogMapping, AnalogPinMapping, AnalogState, BoardCapability, DigitalPortState, Firmware,
    I2cReply, Message, MessageBody, PinCapability, PinMode, PinModeId, PinState, ProtocolVersion,
    StringData, SysExMessage,
};

/// Upper bound on the scratch buffer; frames beyond it are discarded.
const SCRATCH_CAPACITY: usize = 2048;

/// Fixed-length frames awaiting their data bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pending {
    Analog { channel: u8 },
    DigitalPort { port: u8 },
    ProtocolVersion,
}

#[derive(Debug)]
enum State {
    /// Awaiting a command byte; data bytes are dropped.
    Idle,
    /// Accumulating `needed` data bytes for a fixed-length frame.
    Collecting { pending: Pending, needed: usize },
    /// Accumulating sysex payload bytes until the terminator.
    CollectingSysEx,
}

/// Stateful stream parser; emits one [`Message`] per completed frame.
#[derive(Debug)]
pub struct Framer {
    state: State,
    buf: Vec<u8>,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            buf: Vec::with_capacity(SCRATCH_CAPACITY),
        }
    }

    /// Drops any partial frame and returns to the idle state.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.buf.clear();
    }

    /// Feeds a single byte into the state machine.
    ///
    /// Returns a message when `byte` completes a frame. Never fails: garbage
    /// input only ever discards the frame in progress.
    pub fn push(&mut self, byte: u8) -> Option<Message> {
        if byte & 0x80 != 0 {
            return self.command_byte(byte);
        }
        match self.state {
            // Stream resync: data bytes with no active frame are dropped.
            State::Idle => None,
            State::Collecting { pending, needed } => {
                self.buf.push(byte);
                if self.buf.len() < needed {
                    return None;
                }
                let body = Self::decode_fixed(pending, &self.buf);
                self.reset();
                Some(Message::new(body))
            }
            State::CollectingSysEx => {
                if self.buf.len() >= SCRATCH_CAPACITY {
                    warn!(
                        "sysex frame exceeded {} bytes, discarding it",
                        SCRATCH_CAPACITY
                    );
                    self.reset();
                    return None;
                }
                self.buf.push(byte);
                None
            }
        }
    }

    fn command_byte(&mut self, byte: u8) -> Option<Message> {
        if byte == END_SYSEX {
            if matches!(self.state, State::CollectingSysEx) {
                let body = Self::decode_sysex(&self.buf);
                self.reset();
                return body.map(Message::new);
            }
            self.reset();
            return None;
        }

        // Any command byte abandons a partial frame.
        self.reset();
        match byte {
            ANALOG_MESSAGE..=ANALOG_MESSAGE_BOUND => {
                self.state = State::Collecting {
                    pending: Pending::Analog {
                        channel: byte & 0x0F,
                    },
                    needed: 2,
                };
            }
            DIGITAL_MESSAGE..=DIGITAL_MESSAGE_BOUND => {
                self.state = State::Collecting {
                    pending: Pending::DigitalPort { port: byte & 0x0F },
                    needed: 2,
                };
            }
            REPORT_VERSION => {
                self.state = State::Collecting {
                    pending: Pending::ProtocolVersion,
                    needed: 2,
                };
            }
            START_SYSEX => {
                self.state = State::CollectingSysEx;
            }
            // Unclassified command byte: stay idle (stream resync).
            _ => {}
        }
        None
    }

    fn decode_fixed(pending: Pending, data: &[u8]) -> MessageBody {
        match pending {
            Pending::Analog { channel } => MessageBody::AnalogState(AnalogState {
                channel,
                level: u16::from(data[0]) | (u16::from(data[1]) << 7),
            }),
            Pending::DigitalPort { port } => MessageBody::DigitalPortState(DigitalPortState {
                port,
                pins: (data[0] & 0x7F) | ((data[1] & 0x01) << 7),
            }),
            Pending::ProtocolVersion => MessageBody::ProtocolVersion(ProtocolVersion {
                major: data[0],
                minor: data[1],
            }),
        }
    }

    // ########################################
    // Sysex sub-decoders, selected by the first data byte after START_SYSEX.

    fn decode_sysex(buf: &[u8]) -> Option<MessageBody> {
        let (&command, payload) = buf.split_first()?;
        match command {
            ANALOG_MAPPING_RESPONSE => Some(Self::decode_analog_mapping(payload)),
            CAPABILITY_RESPONSE => Some(Self::decode_capability(payload)),
            PIN_STATE_RESPONSE => Self::decode_pin_state(payload),
            STRING_DATA => Self::decode_string_data(payload),
            I2C_REPLY => Self::decode_i2c_reply(payload),
            REPORT_FIRMWARE => Self::decode_firmware(payload),
            // User-defined commands carry opaque payloads; no unpacking.
            USER_COMMAND_START..=USER_COMMAND_END => Some(MessageBody::SysEx(SysExMessage {
                command,
                payload: payload.to_vec(),
            })),
            _ => {
                warn!(
                    "no decoder for sysex command 0x{:02X} ({} bytes), passing it through raw",
                    command,
                    payload.len()
                );
                Some(MessageBody::SysEx(SysExMessage {
                    command,
                    payload: payload.to_vec(),
                }))
            }
        }
    }

    fn decode_analog_mapping(payload: &[u8]) -> MessageBody {
        let entries = payload
            .iter()
            .enumerate()
            .filter(|(_, &channel)| channel != SYSEX_REALTIME)
            .map(|(pin, &channel)| AnalogPinMapping {
                pin: pin as u8,
                channel,
            })
            .collect();
        MessageBody::AnalogMapping(AnalogMapping { entries })
    }

    fn decode_capability(payload: &[u8]) -> MessageBody {
        let mut pins: Vec<PinCapability> = Vec::new();
        let mut modes: Vec<PinMode> = Vec::new();
        let mut i = 0;
        while i < payload.len() {
            if payload[i] == SYSEX_REALTIME {
                // Pin record complete.
                pins.push(PinCapability {
                    pin: pins.len() as u8,
                    modes: std::mem::take(&mut modes),
                });
                i += 1;
            } else if i + 1 < payload.len() {
                match PinModeId::from_u8(payload[i]) {
                    Ok(id) => modes.push(PinMode {
                        id,
                        resolution: payload[i + 1],
                    }),
                    Err(_) => warn!(
                        "capability response names unknown pin mode 0x{:02X}, skipping it",
                        payload[i]
                    ),
                }
                i += 2;
            } else {
                warn!("capability response ends mid-record, dropping the tail");
                break;
            }
        }
        MessageBody::BoardCapability(BoardCapability { pins })
    }

    fn decode_pin_state(payload: &[u8]) -> Option<MessageBody> {
        if payload.len() < 3 {
            warn!(
                "pin state response too short: {} bytes, need at least 3",
                payload.len()
            );
            return None;
        }
        let mode = match PinModeId::from_u8(payload[1]) {
            Ok(mode) => mode,
            Err(_) => {
                warn!(
                    "pin state response names unknown pin mode 0x{:02X}",
                    payload[1]
                );
                return None;
            }
        };
        let mut value: u64 = 0;
        for (k, &group) in payload[2..].iter().enumerate() {
            value |= u64::from(group & 0x7F) << (7 * k);
        }
        Some(MessageBody::PinState(PinState {
            pin: payload[0],
            mode,
            value,
        }))
    }

    fn decode_string_data(payload: &[u8]) -> Option<MessageBody> {
        let even = &payload[..payload.len() & !1];
        if even.len() != payload.len() {
            warn!(
                "string data has odd packed length {}, dropping the trailing byte",
                payload.len()
            );
        }
        let bytes = codec::unpack_14bit(even).ok()?;
        Some(MessageBody::StringData(StringData {
            text: String::from_utf8_lossy(&bytes).into_owned(),
        }))
    }

    fn decode_i2c_reply(payload: &[u8]) -> Option<MessageBody> {
        if payload.len() < 4 {
            warn!(
                "i2c reply too short: {} bytes, need at least 4",
                payload.len()
            );
            return None;
        }
        let data = payload[4..]
            .chunks_exact(2)
            .map(|pair| (pair[0] & 0x7F) | ((pair[1] & 0x01) << 7))
            .collect();
        if payload[4..].len() % 2 != 0 {
            warn!("i2c reply data has odd packed length, dropping the trailing byte");
        }
        Some(MessageBody::I2cReply(I2cReply {
            address: u16::from(payload[0]) | (u16::from(payload[1]) << 7),
            register: u16::from(payload[2]) | (u16::from(payload[3]) << 7),
            data,
        }))
    }

    fn decode_firmware(payload: &[u8]) -> Option<MessageBody> {
        if payload.len() < 2 {
            warn!(
                "firmware report too short: {} bytes, need at least 2",
                payload.len()
            );
            return None;
        }
        let name_bytes: Vec<u8> = payload[2..]
            .chunks_exact(2)
            .map(|pair| (pair[0] & 0x7F) | ((pair[1] & 0x01) << 7))
            .collect();
        let name = String::from_utf8_lossy(&name_bytes)
            .replace('\0', "")
            .to_string();
        Some(MessageBody::Firmware(Firmware {
            major: payload[0],
            minor: payload[1],
            name,
        }))
    }
}
