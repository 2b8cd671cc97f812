//! Binds a transport to the protocol engine and exposes the caller-facing
//! command and request/reply surface.

use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use log::{trace, warn};
use parking_lot::Mutex;

use crate::errors::Error;
use crate::io::commands;
use crate::io::{
    AnalogMapping, AnalogState, BoardCapability, DigitalPortState, Dispatcher, Firmware, Framer,
    I2cReply, ListenerId, Message, MessageBody, PinModeId, PinState, ProtocolVersion,
    Subscription, SysExMessage, Transport,
};

/// A live conversation with one Firmata device over one transport.
///
/// The transport's receive thread feeds the framer; decoded messages reach
/// listeners and the reply queue through the dispatcher. Callers block on the
/// request/reply methods (bounded by the session timeout) or subscribe to the
/// event streams. Sessions are single-use: once closed, build a new one.
///
/// If the session opened the transport itself, it closes it again when
/// dropped; a transport the caller opened stays open.
pub struct Session {
    transport: Box<dyn Transport>,
    framer: Arc<Mutex<Framer>>,
    dispatcher: Dispatcher,
    timeout: Option<Duration>,
    opened_here: bool,
}

impl Session {
    /// Creates a session over `transport` with no reply timeout (waits
    /// forever).
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self::from_transport(Box::new(transport), None)
    }

    /// Creates a session over `transport` that bounds every reply-wait by
    /// `timeout`.
    pub fn with_timeout<T: Transport + 'static>(transport: T, timeout: Duration) -> Self {
        Self::from_transport(Box::new(transport), Some(timeout))
    }

    /// Creates a session over an already boxed transport.
    pub fn from_transport(transport: Box<dyn Transport>, timeout: Option<Duration>) -> Self {
        let dispatcher = Dispatcher::new();
        dispatcher.set_staleness(timeout);
        Self {
            transport,
            framer: Arc::new(Mutex::new(Framer::new())),
            dispatcher,
            timeout,
            opened_here: false,
        }
    }

    /// Opens the transport (unless the caller already did) and wires the
    /// receive path up.
    pub fn open(&mut self) -> Result<(), Error> {
        if !self.transport.is_open() {
            self.transport.open()?;
            self.opened_here = true;
        }
        let framer = Arc::clone(&self.framer);
        let dispatcher = self.dispatcher.clone();
        self.transport.set_listener(Some(Box::new(move |bytes| {
            let mut framer = framer.lock();
            for &byte in bytes {
                if let Some(message) = framer.push(byte) {
                    dispatcher.dispatch(message);
                }
            }
        })));
        Ok(())
    }

    /// Detaches from the transport; closes it only if this session opened
    /// it. Idempotent.
    pub fn close(&mut self) -> Result<(), Error> {
        self.transport.set_listener(None);
        if self.opened_here && self.transport.is_open() {
            self.transport.close()?;
        }
        Ok(())
    }

    /// Closes and reopens the transport, dropping queued messages and any
    /// partial frame. Pending reply-waiters run into their timeout.
    pub fn clear(&mut self) -> Result<(), Error> {
        self.transport.close()?;
        self.dispatcher.clear();
        self.framer.lock().reset();
        self.transport.open()
    }

    /// The reply-wait timeout, `None` meaning wait forever.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Changes the reply-wait timeout for subsequent requests.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
        self.dispatcher.set_staleness(timeout);
    }

    /// The transport this session is bound to.
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    fn send(&self, bytes: Vec<u8>) -> Result<(), Error> {
        trace!("sending {:02X?}", bytes.as_slice());
        self.transport.write(&bytes)
    }

    fn wait<T>(&self, pick: impl FnMut(&Message) -> Option<T>) -> Result<T, Error> {
        self.dispatcher.wait_for(pick, self.timeout)
    }

    async fn wait_offloaded<T, F>(&self, pick: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnMut(&Message) -> Option<T> + Send + 'static,
    {
        let dispatcher = self.dispatcher.clone();
        let timeout = self.timeout;
        match tokio::task::spawn_blocking(move || dispatcher.wait_for(pick, timeout)).await {
            Ok(result) => result,
            Err(join_error) => Err(Error::TaskFailure {
                info: join_error.to_string(),
            }),
        }
    }

    // ########################################
    // Fire-and-forget commands

    /// Resets the board to its power-up state.
    pub fn reset(&self) -> Result<(), Error> {
        self.send(commands::system_reset())
    }

    /// Assigns a mode to a pin.
    pub fn set_pin_mode(&self, pin: u8, mode: PinModeId) -> Result<(), Error> {
        self.send(commands::set_pin_mode(pin, mode)?)
    }

    /// Sets an individual digital pin high or low.
    pub fn set_digital_pin(&self, pin: u8, level: bool) -> Result<(), Error> {
        self.send(commands::set_digital_pin_value(pin, level)?)
    }

    /// Writes an analog level (PWM, servo position, ...) to a pin.
    pub fn set_analog_pin(&self, pin: u8, level: u32) -> Result<(), Error> {
        self.send(commands::set_analog_pin_value(pin, level)?)
    }

    /// Writes a whole digital port (eight pins) at once.
    pub fn set_digital_port(&self, port: u8, bitmap: u8) -> Result<(), Error> {
        self.send(commands::set_digital_port_value(port, bitmap)?)
    }

    /// Enables or disables periodic reporting for an analog channel.
    pub fn report_analog(&self, channel: u8, enabled: bool) -> Result<(), Error> {
        self.send(commands::report_analog_channel(channel, enabled)?)
    }

    /// Enables or disables periodic reporting for a digital port.
    pub fn report_digital(&self, port: u8, enabled: bool) -> Result<(), Error> {
        self.send(commands::report_digital_port(port, enabled)?)
    }

    /// Sets how often analog and i2c values are reported (in ms).
    pub fn set_sampling_interval(&self, interval: u16) -> Result<(), Error> {
        self.send(commands::set_sampling_interval(interval)?)
    }

    /// Configures the pulse range of a servo attached to `pin`.
    pub fn configure_servo(&self, pin: u8, min_pulse: u16, max_pulse: u16) -> Result<(), Error> {
        self.send(commands::configure_servo(pin, min_pulse, max_pulse)?)
    }

    /// Sends text to the device (14-bit-packed code units).
    pub fn send_string(&self, text: &str) -> Result<(), Error> {
        self.send(commands::send_string(text)?)
    }

    /// Configures the i2c read delay (in µs).
    pub fn set_i2c_read_interval(&self, interval: u16) -> Result<(), Error> {
        self.send(commands::set_i2c_read_interval(interval)?)
    }

    /// Writes raw bytes to the i2c device at `address`.
    pub fn i2c_write(&self, address: u16, data: &[u8]) -> Result<(), Error> {
        self.send(commands::i2c_write(address, data)?)
    }

    /// Starts a continuous i2c read; replies flow to the i2c listeners and
    /// subscriptions until [`Session::i2c_stop_reading`] is called.
    pub fn i2c_read_continuous(
        &self,
        address: u16,
        register: Option<u16>,
        count: u16,
    ) -> Result<(), Error> {
        self.send(commands::i2c_read(address, register, count, true)?)
    }

    /// Stops every continuous i2c read. Firmata also specifies a per-query
    /// stop, but the reference firmware never implemented it, so only the
    /// stop-all form is exposed.
    pub fn i2c_stop_reading(&self) -> Result<(), Error> {
        self.send(commands::i2c_stop_reading())
    }

    /// Sends an arbitrary sysex payload, verbatim.
    pub fn send_sysex(&self, command: u8, payload: &[u8]) -> Result<(), Error> {
        self.send(commands::send_sysex(command, payload)?)
    }

    // ########################################
    // Request/reply

    /// Queries the protocol version and waits for the answer.
    pub fn get_protocol_version(&self) -> Result<ProtocolVersion, Error> {
        self.send(commands::query_protocol_version())?;
        self.wait(pick_protocol_version)
    }

    /// Queries the firmware name and version and waits for the answer.
    pub fn get_firmware(&self) -> Result<Firmware, Error> {
        self.send(commands::query_firmware())?;
        self.wait(pick_firmware)
    }

    /// Queries the capabilities of every pin and waits for the answer.
    pub fn get_capability(&self) -> Result<BoardCapability, Error> {
        self.send(commands::query_capabilities())?;
        self.wait(pick_capability)
    }

    /// Queries the analog channel mapping and waits for the answer.
    pub fn get_analog_mapping(&self) -> Result<AnalogMapping, Error> {
        self.send(commands::query_analog_mapping())?;
        self.wait(pick_analog_mapping)
    }

    /// Queries the current mode and value of `pin` and waits for the answer.
    pub fn get_pin_state(&self, pin: u8) -> Result<PinState, Error> {
        self.send(commands::query_pin_state(pin)?)?;
        self.wait(pick_pin_state(pin))
    }

    /// Reads `count` bytes once from the i2c device at `address` and waits
    /// for its reply.
    pub fn i2c_read_once(
        &self,
        address: u16,
        register: Option<u16>,
        count: u16,
    ) -> Result<I2cReply, Error> {
        self.send(commands::i2c_read(address, register, count, false)?)?;
        self.wait(pick_i2c_reply(address))
    }

    /// Sends a sysex command and waits for the reply carrying the same
    /// command byte.
    pub fn sysex_request(&self, command: u8, payload: &[u8]) -> Result<SysExMessage, Error> {
        self.send(commands::send_sysex(command, payload)?)?;
        self.wait(pick_sysex(command))
    }

    // ########################################
    // Request/reply, async twins (same semantics, wait offloaded)

    /// See [`Session::get_protocol_version`].
    pub async fn get_protocol_version_async(&self) -> Result<ProtocolVersion, Error> {
        self.send(commands::query_protocol_version())?;
        self.wait_offloaded(pick_protocol_version).await
    }

    /// See [`Session::get_firmware`].
    pub async fn get_firmware_async(&self) -> Result<Firmware, Error> {
        self.send(commands::query_firmware())?;
        self.wait_offloaded(pick_firmware).await
    }

    /// See [`Session::get_capability`].
    pub async fn get_capability_async(&self) -> Result<BoardCapability, Error> {
        self.send(commands::query_capabilities())?;
        self.wait_offloaded(pick_capability).await
    }

    /// See [`Session::get_analog_mapping`].
    pub async fn get_analog_mapping_async(&self) -> Result<AnalogMapping, Error> {
        self.send(commands::query_analog_mapping())?;
        self.wait_offloaded(pick_analog_mapping).await
    }

    /// See [`Session::get_pin_state`].
    pub async fn get_pin_state_async(&self, pin: u8) -> Result<PinState, Error> {
        self.send(commands::query_pin_state(pin)?)?;
        self.wait_offloaded(pick_pin_state(pin)).await
    }

    /// See [`Session::i2c_read_once`].
    pub async fn i2c_read_once_async(
        &self,
        address: u16,
        register: Option<u16>,
        count: u16,
    ) -> Result<I2cReply, Error> {
        self.send(commands::i2c_read(address, register, count, false)?)?;
        self.wait_offloaded(pick_i2c_reply(address)).await
    }

    /// See [`Session::sysex_request`].
    pub async fn sysex_request_async(
        &self,
        command: u8,
        payload: &[u8],
    ) -> Result<SysExMessage, Error> {
        self.send(commands::send_sysex(command, payload)?)?;
        self.wait_offloaded(pick_sysex(command)).await
    }

    // ########################################
    // Event listeners and subscriptions

    /// Registers a listener invoked for every decoded message.
    pub fn on_message(&self, callback: impl FnMut(&Message) + Send + 'static) -> ListenerId {
        self.dispatcher.on_message(callback)
    }

    /// Registers a listener for analog state messages.
    pub fn on_analog(&self, callback: impl FnMut(&AnalogState) + Send + 'static) -> ListenerId {
        self.dispatcher.on_analog(callback)
    }

    /// Registers a listener for digital port messages.
    pub fn on_digital(
        &self,
        callback: impl FnMut(&DigitalPortState) + Send + 'static,
    ) -> ListenerId {
        self.dispatcher.on_digital(callback)
    }

    /// Registers a listener for i2c replies.
    pub fn on_i2c(&self, callback: impl FnMut(&I2cReply) + Send + 'static) -> ListenerId {
        self.dispatcher.on_i2c(callback)
    }

    /// Unregisters a listener; unknown ids are ignored.
    pub fn unsubscribe(&self, id: ListenerId) {
        self.dispatcher.unregister(id)
    }

    /// Opens a long-lived subscription over analog state events.
    pub fn analog_events(&self) -> Subscription<AnalogState> {
        self.dispatcher.analog_events()
    }

    /// Opens a long-lived subscription over digital port events.
    pub fn digital_events(&self) -> Subscription<DigitalPortState> {
        self.dispatcher.digital_events()
    }

    /// Opens a long-lived subscription over i2c replies.
    pub fn i2c_events(&self) -> Subscription<I2cReply> {
        self.dispatcher.i2c_events()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("closing session transport failed: {}", e);
        }
    }
}

impl Display for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session({})", self.transport)
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.transport)
            .field("timeout", &self.timeout)
            .field("opened_here", &self.opened_here)
            .finish()
    }
}

// Predicates shared by the sync and async request/reply variants.

fn pick_protocol_version(message: &Message) -> Option<ProtocolVersion> {
    match &message.body {
        MessageBody::ProtocolVersion(version) => Some(*version),
        _ => None,
    }
}

fn pick_firmware(message: &Message) -> Option<Firmware> {
    match &message.body {
        MessageBody::Firmware(firmware) => Some(firmware.clone()),
        _ => None,
    }
}

fn pick_capability(message: &Message) -> Option<BoardCapability> {
    match &message.body {
        MessageBody::BoardCapability(capability) => Some(capability.clone()),
        _ => None,
    }
}

fn pick_analog_mapping(message: &Message) -> Option<AnalogMapping> {
    match &message.body {
        MessageBody::AnalogMapping(mapping) => Some(mapping.clone()),
        _ => None,
    }
}

fn pick_pin_state(pin: u8) -> impl FnMut(&Message) -> Option<PinState> {
    move |message| match &message.body {
        MessageBody::PinState(state) if state.pin == pin => Some(*state),
        _ => None,
    }
}

fn pick_i2c_reply(address: u16) -> impl FnMut(&Message) -> Option<I2cReply> {
    move |message| match &message.body {
        MessageBody::I2cReply(reply) if reply.address == address => Some(reply.clone()),
        _ => None,
    }
}

fn pick_sysex(command: u8) -> impl FnMut(&Message) -> Option<SysExMessage> {
    move |message| match &message.body {
        MessageBody::SysEx(sysex) if sysex.command == command => Some(sysex.clone()),
        _ => None,
    }
}
