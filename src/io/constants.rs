//! Firmata protocol constants
//!
//! Official documentation: <https://github.com/firmata/protocol>

// ########################################
// Protocol version implemented by this crate

/// For non-compatible changes
pub const PROTOCOL_MAJOR_VERSION: u8 = 2;
/// For backwards-compatible changes
pub const PROTOCOL_MINOR_VERSION: u8 = 5;

// ########################################
// Message command bytes (128-255/0x80-0xFF)

/// Send data for a digital port (collection of 8 pins)
pub const DIGITAL_MESSAGE: u8 = 0x90;
/// Digital message input range upper byte bound
pub const DIGITAL_MESSAGE_BOUND: u8 = 0x9F;
/// Send data for an analog pin (or PWM)
pub const ANALOG_MESSAGE: u8 = 0xE0;
/// Analog message input range upper byte bound
pub const ANALOG_MESSAGE_BOUND: u8 = 0xEF;
/// Enable analog input by channel #
pub const REPORT_ANALOG: u8 = 0xC0;
/// Enable digital input by port pair
pub const REPORT_DIGITAL: u8 = 0xD0;
/// Set a pin to INPUT/OUTPUT/PWM/etc
pub const SET_PIN_MODE: u8 = 0xF4;
/// Set value of an individual digital pin
pub const SET_DIGITAL_PIN_VALUE: u8 = 0xF5;
/// Report protocol version
pub const REPORT_VERSION: u8 = 0xF9;
/// Reset from MIDI
pub const SYSTEM_RESET: u8 = 0xFF;
/// Start a MIDI Sysex message
pub const START_SYSEX: u8 = 0xF0;
/// End a MIDI Sysex message
pub const END_SYSEX: u8 = 0xF7;

// ########################################
// Extended command set using sysex (0-127/0x00-0x7F)

/// First user-defined sysex command
pub const USER_COMMAND_START: u8 = 0x01;
/// Last user-defined sysex command
pub const USER_COMMAND_END: u8 = 0x0F;
/// Analog write (PWM, Servo, etc) to any pin
pub const EXTENDED_ANALOG: u8 = 0x6F;
/// Ask for mapping of analog to pin numbers
pub const ANALOG_MAPPING_QUERY: u8 = 0x69;
/// Reply with mapping info
pub const ANALOG_MAPPING_RESPONSE: u8 = 0x6A;
/// Ask for supported modes and resolution of all pins
pub const CAPABILITY_QUERY: u8 = 0x6B;
/// Reply with supported modes and resolution
pub const CAPABILITY_RESPONSE: u8 = 0x6C;
/// Ask for a pin's current mode and value
pub const PIN_STATE_QUERY: u8 = 0x6D;
/// Reply with pin's current mode and value
pub const PIN_STATE_RESPONSE: u8 = 0x6E;
/// Set max angle, minPulse, maxPulse, freq
pub const SERVO_CONFIG: u8 = 0x70;
/// String message with 14-bits per char
pub const STRING_DATA: u8 = 0x71;
/// Send an I2C read/write request
pub const I2C_REQUEST: u8 = 0x76;
/// Reply to an I2C read request
pub const I2C_REPLY: u8 = 0x77;
/// Config I2C settings such as delay times and power pins
pub const I2C_CONFIG: u8 = 0x78;
/// Report name and version of the firmware
pub const REPORT_FIRMWARE: u8 = 0x79;
/// Set the poll rate of the main loop
pub const SAMPLING_INTERVAL: u8 = 0x7A;
/// MIDI Reserved for realtime messages; also the 7-bit data mask
pub const SYSEX_REALTIME: u8 = 0x7F;

// ########################################
// I2C request mode bits

/// Read once from the addressed device
pub const I2C_READ_ONCE: u8 = 0x08;
/// Read continuously until told to stop
pub const I2C_READ_CONTINUOUSLY: u8 = 0x10;
/// Stop all continuous reads
pub const I2C_STOP_READING: u8 = 0x18;
/// Request uses 10-bit addressing
pub const I2C_10BIT_ADDRESS_MODE_MASK: u8 = 0x20;

// ########################################
// Argument bounds enforced at encode time

/// Highest addressable pin
pub const MAX_PIN: u8 = 0x7F;
/// Highest digital port index
pub const MAX_PORT: u8 = 0x0F;
/// Highest analog channel index
pub const MAX_CHANNEL: u8 = 0x0F;
/// Highest value representable in two 7-bit groups
pub const MAX_14BIT: u16 = 0x3FFF;
/// Highest i2c address (10-bit addressing)
pub const MAX_I2C_ADDRESS: u16 = 0x3FF;
