use std::fmt::{Display, Formatter};
use std::time::Instant;

use crate::errors::Error;

/// The protocol version reported by the device.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl Display for ProtocolVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The firmware name and version reported by the device.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Firmware {
    pub major: u8,
    pub minor: u8,
    pub name: String,
}

impl Display for Firmware {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}.{}", self.name, self.major, self.minor)
    }
}

/// The level of a single analog input channel (14-bit).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnalogState {
    pub channel: u8,
    pub level: u16,
}

/// The bitmap of a digital port (eight adjacent pins).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DigitalPortState {
    pub port: u8,
    pub pins: u8,
}

impl DigitalPortState {
    /// Whether the pin at `index` (0-7 within the port) is high.
    pub fn is_set(&self, index: u8) -> bool {
        (self.pins >> (index & 0x07)) & 0x01 != 0
    }
}

/// The mode and value of a single pin as reported by a pin state response.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinState {
    pub pin: u8,
    pub mode: PinModeId,
    /// Value assembled from little-endian 7-bit groups.
    pub value: u64,
}

/// A mode supported by a pin, together with its resolution in bits.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinMode {
    pub id: PinModeId,
    /// Resolution (number of bits) this mode uses.
    pub resolution: u8,
}

impl PinMode {
    /// Get the max value this mode can reach according to its resolution.
    pub fn max_possible_value(&self) -> u32 {
        (1 << self.resolution) - 1
    }
}

impl Display for PinMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// The full mode list of one pin from a capability response.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PinCapability {
    pub pin: u8,
    pub modes: Vec<PinMode>,
}

impl PinCapability {
    /// Verifies if the pin supports the given mode and returns it if it does.
    pub fn supports(&self, mode: PinModeId) -> Option<PinMode> {
        self.modes.iter().find(|m| m.id == mode).copied()
    }
}

/// Capabilities of every pin on the board; pin index implied by position.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoardCapability {
    pub pins: Vec<PinCapability>,
}

/// One pin-to-channel association from an analog mapping response.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnalogPinMapping {
    pub pin: u8,
    pub channel: u8,
}

/// The analog pin mapping of the board; pins without a channel are absent.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnalogMapping {
    pub entries: Vec<AnalogPinMapping>,
}

impl AnalogMapping {
    /// The analog channel attached to `pin`, if any.
    pub fn channel_for(&self, pin: u8) -> Option<u8> {
        self.entries
            .iter()
            .find(|entry| entry.pin == pin)
            .map(|entry| entry.channel)
    }

    /// The pin carrying analog `channel`, if any.
    pub fn pin_for(&self, channel: u8) -> Option<u8> {
        self.entries
            .iter()
            .find(|entry| entry.channel == channel)
            .map(|entry| entry.pin)
    }
}

/// Text sent by the device through a string-data sysex.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StringData {
    pub text: String,
}

/// Defines an I2C reply.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct I2cReply {
    pub address: u16,
    pub register: u16,
    pub data: Vec<u8>,
}

/// A raw system-exclusive message the framer has no dedicated decoder for.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SysExMessage {
    pub command: u8,
    pub payload: Vec<u8>,
}

// ########################################

/// Enumerates the possible modes for a pin.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[repr(u8)]
pub enum PinModeId {
    /// Same as INPUT defined in Arduino.h
    INPUT = 0,
    /// Same as OUTPUT defined in Arduino.h
    OUTPUT = 1,
    /// Analog pin in analogInput mode
    ANALOG = 2,
    /// Digital pin in PWM output mode
    PWM = 3,
    /// Digital pin in Servo output mode
    SERVO = 4,
    /// shiftIn/shiftOut mode
    SHIFT = 5,
    /// Pin included in I2C setup
    I2C = 6,
    /// Pin configured for 1-wire
    ONEWIRE = 7,
    /// Pin configured for stepper motor
    STEPPER = 8,
    /// Pin configured for rotary encoders
    ENCODER = 9,
    /// Pin configured for serial communication
    SERIAL = 0x0A,
    /// Enable internal pull-up resistor for pin
    PULLUP = 0x0B,
}

impl PinModeId {
    /// Converts a `u8` byte value into a `PinModeId`.
    ///
    /// # Errors
    /// * `UnknownPinMode` - the value does not match any known pin mode.
    pub fn from_u8(value: u8) -> Result<PinModeId, Error> {
        match value {
            0 => Ok(PinModeId::INPUT),
            1 => Ok(PinModeId::OUTPUT),
            2 => Ok(PinModeId::ANALOG),
            3 => Ok(PinModeId::PWM),
            4 => Ok(PinModeId::SERVO),
            5 => Ok(PinModeId::SHIFT),
            6 => Ok(PinModeId::I2C),
            7 => Ok(PinModeId::ONEWIRE),
            8 => Ok(PinModeId::STEPPER),
            9 => Ok(PinModeId::ENCODER),
            0x0A => Ok(PinModeId::SERIAL),
            0x0B => Ok(PinModeId::PULLUP),
            value => Err(Error::UnknownPinMode { value }),
        }
    }
}

impl From<PinModeId> for u8 {
    fn from(mode: PinModeId) -> u8 {
        mode as u8
    }
}

impl Display for PinModeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ########################################

/// One fully decoded message from the device.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum MessageBody {
    AnalogState(AnalogState),
    DigitalPortState(DigitalPortState),
    ProtocolVersion(ProtocolVersion),
    Firmware(Firmware),
    BoardCapability(BoardCapability),
    AnalogMapping(AnalogMapping),
    PinState(PinState),
    StringData(StringData),
    I2cReply(I2cReply),
    SysEx(SysExMessage),
}

/// A decoded message annotated with its receive timestamp.
#[derive(Clone, Debug)]
pub struct Message {
    pub body: MessageBody,
    pub received_at: Instant,
}

impl Message {
    pub(crate) fn new(body: MessageBody) -> Self {
        Self {
            body,
            received_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digital_port_bits() {
        let state = DigitalPortState {
            port: 2,
            pins: 0b1101_0101,
        };
        assert!(state.is_set(0));
        assert!(!state.is_set(1));
        assert!(state.is_set(2));
        assert!(state.is_set(7));
        // Index is taken modulo 8.
        assert!(state.is_set(8));
    }

    #[test]
    fn test_pin_capability_supports() {
        let capability = PinCapability {
            pin: 3,
            modes: vec![
                PinMode {
                    id: PinModeId::INPUT,
                    resolution: 1,
                },
                PinMode {
                    id: PinModeId::PWM,
                    resolution: 8,
                },
            ],
        };
        let pwm = capability.supports(PinModeId::PWM);
        assert!(pwm.is_some());
        assert_eq!(pwm.unwrap().max_possible_value(), 255);
        assert!(capability.supports(PinModeId::SERVO).is_none());
    }

    #[test]
    fn test_analog_mapping_lookup() {
        let mapping = AnalogMapping {
            entries: vec![
                AnalogPinMapping {
                    pin: 14,
                    channel: 0,
                },
                AnalogPinMapping {
                    pin: 15,
                    channel: 1,
                },
            ],
        };
        assert_eq!(mapping.channel_for(15), Some(1));
        assert_eq!(mapping.channel_for(2), None);
        assert_eq!(mapping.pin_for(0), Some(14));
        assert_eq!(mapping.pin_for(9), None);
    }

    #[test]
    fn test_pin_mode_id_conversions() {
        assert_eq!(PinModeId::from_u8(0).unwrap(), PinModeId::INPUT);
        assert_eq!(PinModeId::from_u8(1).unwrap(), PinModeId::OUTPUT);
        assert_eq!(PinModeId::from_u8(2).unwrap(), PinModeId::ANALOG);
        assert_eq!(PinModeId::from_u8(3).unwrap(), PinModeId::PWM);
        assert_eq!(PinModeId::from_u8(4).unwrap(), PinModeId::SERVO);
        assert_eq!(PinModeId::from_u8(5).unwrap(), PinModeId::SHIFT);
        assert_eq!(PinModeId::from_u8(6).unwrap(), PinModeId::I2C);
        assert_eq!(PinModeId::from_u8(7).unwrap(), PinModeId::ONEWIRE);
        assert_eq!(PinModeId::from_u8(8).unwrap(), PinModeId::STEPPER);
        assert_eq!(PinModeId::from_u8(9).unwrap(), PinModeId::ENCODER);
        assert_eq!(PinModeId::from_u8(0x0A).unwrap(), PinModeId::SERIAL);
        assert_eq!(PinModeId::from_u8(0x0B).unwrap(), PinModeId::PULLUP);

        let unknown = PinModeId::from_u8(0x42);
        assert!(unknown.is_err(), "{:?}", unknown);

        assert_eq!(u8::from(PinModeId::SERVO), 4);
    }

    #[test]
    fn test_display() {
        let version = ProtocolVersion { major: 2, minor: 5 };
        assert_eq!(version.to_string(), "2.5");

        let firmware = Firmware {
            major: 2,
            minor: 5,
            name: String::from("StandardFirmata"),
        };
        assert_eq!(firmware.to_string(), "StandardFirmata v2.5");

        assert_eq!(PinModeId::PULLUP.to_string(), "PULLUP");
    }

    #[test]
    fn test_message_timestamp() {
        let before = Instant::now();
        let message = Message::new(MessageBody::ProtocolVersion(ProtocolVersion {
            major: 2,
            minor: 5,
        }));
        assert!(message.received_at >= before);
    }
}
