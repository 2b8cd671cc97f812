//! Encoders turning typed host operations into wire bytes.
//!
//! Every encoder validates its arguments before producing any byte: an
//! out-of-range value fails with [`Error::ArgumentRange`] and the transport
//! sees nothing. All data bytes inside a sysex envelope stay below 0x80.

use crate::errors::Error;
use crate::io::codec;
use crate::io::constants::*;
use crate::io::message::PinModeId;

fn ensure(name: &'static str, value: u32, max: u32) -> Result<(), Error> {
    match value <= max {
        true => Ok(()),
        false => Err(Error::ArgumentRange { name, value, max }),
    }
}

/// Resets the board to its power-up state.
pub fn system_reset() -> Vec<u8> {
    vec![SYSTEM_RESET]
}

/// Sets an individual digital pin high or low.
pub fn set_digital_pin_value(pin: u8, level: bool) -> Result<Vec<u8>, Error> {
    ensure("pin", pin.into(), MAX_PIN.into())?;
    Ok(vec![SET_DIGITAL_PIN_VALUE, pin, u8::from(level)])
}

/// Writes an analog level (PWM, servo position, ...) to a pin.
///
/// Pins up to 15 carrying values below 0x4000 use the two-byte analog
/// message; everything else uses the extended analog sysex, whose value
/// travels as little-endian 7-bit groups (at least three of them).
pub fn set_analog_pin_value(pin: u8, level: u32) -> Result<Vec<u8>, Error> {
    ensure("pin", pin.into(), MAX_PIN.into())?;
    if pin < 16 && level < 0x4000 {
        return Ok(vec![
            ANALOG_MESSAGE | pin,
            (level & 0x7F) as u8,
            ((level >> 7) & 0x7F) as u8,
        ]);
    }
    let mut payload = vec![START_SYSEX, EXTENDED_ANALOG, pin];
    let mut rest = level;
    let mut groups = 0;
    while rest > 0 || groups < 3 {
        payload.push((rest & 0x7F) as u8);
        rest >>= 7;
        groups += 1;
    }
    payload.push(END_SYSEX);
    Ok(payload)
}

/// Enables or disables periodic reporting for an analog channel.
pub fn report_analog_channel(channel: u8, enabled: bool) -> Result<Vec<u8>, Error> {
    ensure("channel", channel.into(), MAX_CHANNEL.into())?;
    Ok(vec![REPORT_ANALOG | channel, u8::from(enabled)])
}

/// Enables or disables periodic reporting for a digital port.
pub fn report_digital_port(port: u8, enabled: bool) -> Result<Vec<u8>, Error> {
    ensure("port", port.into(), MAX_PORT.into())?;
    Ok(vec![REPORT_DIGITAL | port, u8::from(enabled)])
}

/// Writes a whole digital port (eight pins) at once.
pub fn set_digital_port_value(port: u8, bitmap: u8) -> Result<Vec<u8>, Error> {
    ensure("port", port.into(), MAX_PORT.into())?;
    Ok(vec![
        DIGITAL_MESSAGE | port,
        bitmap & 0x7F,
        (bitmap >> 7) & 0x03,
    ])
}

/// Assigns a mode to a pin.
pub fn set_pin_mode(pin: u8, mode: PinModeId) -> Result<Vec<u8>, Error> {
    ensure("pin", pin.into(), MAX_PIN.into())?;
    Ok(vec![SET_PIN_MODE, pin, mode.into()])
}

/// Sets how often analog and i2c values are reported, in milliseconds.
pub fn set_sampling_interval(interval: u16) -> Result<Vec<u8>, Error> {
    ensure("interval", interval.into(), MAX_14BIT.into())?;
    Ok(vec![
        START_SYSEX,
        SAMPLING_INTERVAL,
        (interval & 0x7F) as u8,
        ((interval >> 7) & 0x7F) as u8,
        END_SYSEX,
    ])
}

/// Asks the device for its protocol version.
pub fn query_protocol_version() -> Vec<u8> {
    vec![REPORT_VERSION]
}

/// Asks the device for its firmware name and version.
pub fn query_firmware() -> Vec<u8> {
    vec![START_SYSEX, REPORT_FIRMWARE, END_SYSEX]
}

/// Asks the device for the supported modes and resolutions of all pins.
pub fn query_capabilities() -> Vec<u8> {
    vec![START_SYSEX, CAPABILITY_QUERY, END_SYSEX]
}

/// Asks the device for the mapping of analog channels to pin numbers.
pub fn query_analog_mapping() -> Vec<u8> {
    vec![START_SYSEX, ANALOG_MAPPING_QUERY, END_SYSEX]
}

/// Asks the device for the current mode and value of one pin.
pub fn query_pin_state(pin: u8) -> Result<Vec<u8>, Error> {
    ensure("pin", pin.into(), MAX_PIN.into())?;
    Ok(vec![START_SYSEX, PIN_STATE_QUERY, pin, END_SYSEX])
}

/// Configures the pulse range of a servo attached to `pin`.
pub fn configure_servo(pin: u8, min_pulse: u16, max_pulse: u16) -> Result<Vec<u8>, Error> {
    ensure("pin", pin.into(), MAX_PIN.into())?;
    ensure("max_pulse", max_pulse.into(), MAX_14BIT.into())?;
    ensure("min_pulse", min_pulse.into(), max_pulse.into())?;
    Ok(vec![
        START_SYSEX,
        SERVO_CONFIG,
        pin,
        (min_pulse & 0x7F) as u8,
        ((min_pulse >> 7) & 0x7F) as u8,
        (max_pulse & 0x7F) as u8,
        ((max_pulse >> 7) & 0x7F) as u8,
        END_SYSEX,
    ])
}

/// Sends text to the device; each code unit travels 14-bit-packed.
///
/// # Errors
/// * `ArgumentRange` - a character does not fit in 14 bits.
pub fn send_string(text: &str) -> Result<Vec<u8>, Error> {
    let mut payload = vec![START_SYSEX, STRING_DATA];
    for character in text.chars() {
        let code_unit = character as u32;
        ensure("code unit", code_unit, MAX_14BIT.into())?;
        payload.push((code_unit & 0x7F) as u8);
        payload.push(((code_unit >> 7) & 0x7F) as u8);
    }
    payload.push(END_SYSEX);
    Ok(payload)
}

/// Configures the delay between an i2c register write and the following
/// read, in microseconds.
pub fn set_i2c_read_interval(interval: u16) -> Result<Vec<u8>, Error> {
    ensure("interval", interval.into(), MAX_14BIT.into())?;
    Ok(vec![
        START_SYSEX,
        I2C_CONFIG,
        (interval & 0x7F) as u8,
        ((interval >> 7) & 0x7F) as u8,
        END_SYSEX,
    ])
}

fn i2c_mode_byte(address: u16) -> u8 {
    let mut mode = ((address >> 7) & 0x07) as u8;
    if address > 0x7F {
        mode |= I2C_10BIT_ADDRESS_MODE_MASK;
    }
    mode
}

/// Writes raw bytes to the i2c device at `address`.
pub fn i2c_write(address: u16, data: &[u8]) -> Result<Vec<u8>, Error> {
    ensure("address", address.into(), MAX_I2C_ADDRESS.into())?;
    let mut payload = vec![START_SYSEX, I2C_REQUEST, (address & 0x7F) as u8];
    payload.push(i2c_mode_byte(address));
    payload.extend(codec::pack_14bit(data));
    payload.push(END_SYSEX);
    Ok(payload)
}

/// Reads `count` bytes from the i2c device at `address`, optionally starting
/// at `register`; `continuous` keeps the device reporting until stopped.
pub fn i2c_read(
    address: u16,
    register: Option<u16>,
    count: u16,
    continuous: bool,
) -> Result<Vec<u8>, Error> {
    ensure("address", address.into(), MAX_I2C_ADDRESS.into())?;
    ensure("count", count.into(), MAX_14BIT.into())?;
    let mode = i2c_mode_byte(address)
        | match continuous {
            true => I2C_READ_CONTINUOUSLY,
            false => I2C_READ_ONCE,
        };
    let mut payload = vec![START_SYSEX, I2C_REQUEST, (address & 0x7F) as u8, mode];
    if let Some(register) = register {
        ensure("register", register.into(), MAX_14BIT.into())?;
        payload.push((register & 0x7F) as u8);
        payload.push(((register >> 7) & 0x7F) as u8);
    }
    payload.push((count & 0x7F) as u8);
    payload.push(((count >> 7) & 0x7F) as u8);
    payload.push(END_SYSEX);
    Ok(payload)
}

/// Stops every continuous i2c read.
///
/// Firmata specifies a per-query stop as well, but the reference firmware
/// never implemented it; only the stop-all form is provided here.
pub fn i2c_stop_reading() -> Vec<u8> {
    vec![START_SYSEX, I2C_REQUEST, 0x00, I2C_STOP_READING, END_SYSEX]
}

/// Wraps an arbitrary payload in a sysex envelope, verbatim.
///
/// # Errors
/// * `ArgumentRange` - the command or a payload byte has the top bit set.
pub fn send_sysex(command: u8, payload: &[u8]) -> Result<Vec<u8>, Error> {
    ensure("command", command.into(), SYSEX_REALTIME.into())?;
    for &byte in payload {
        ensure("payload byte", byte.into(), SYSEX_REALTIME.into())?;
    }
    let mut bytes = Vec::with_capacity(payload.len() + 3);
    bytes.push(START_SYSEX);
    bytes.push(command);
    bytes.extend_from_slice(payload);
    bytes.push(END_SYSEX);
    Ok(bytes)
}
