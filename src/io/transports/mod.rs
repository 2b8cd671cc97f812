use std::fmt::{Debug, Display};
use std::time::Duration;

use dyn_clone::DynClone;

use crate::errors::Error;

pub mod serial;

dyn_clone::clone_trait_object!(Transport);

/// Callback invoked by the transport's receive thread as bytes arrive.
pub type BytesListener = Box<dyn FnMut(&[u8]) + Send>;

/// Byte-oriented full-duplex connection to the device.
///
/// Implementations own the dedicated receive thread: it is spawned on
/// [`Transport::open`], invokes the registered listener with every chunk of
/// incoming bytes, observes the closed transport and exits. Writes are
/// serialized internally, so the `write` call itself is the synchronization
/// boundary between caller threads.
pub trait Transport: DynClone + Send + Sync + Debug + Display {
    /// Opens the connection (in a blocking way) and starts the receive
    /// thread.
    fn open(&mut self) -> Result<(), Error>;

    /// Gracefully shuts the connection down; idempotent.
    fn close(&mut self) -> Result<(), Error>;

    /// Whether the connection is currently open.
    fn is_open(&self) -> bool;

    /// Sets the read timeout of the underlying connection.
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), Error>;

    /// Writes all bytes, in order; blocks until done. Concurrent writers are
    /// serialized at byte granularity.
    fn write(&self, bytes: &[u8]) -> Result<(), Error>;

    /// Reads the next byte directly; `None` means end of stream. Meant for
    /// hosts that poll instead of registering a listener; while a listener is
    /// active, the receive thread consumes the stream.
    fn read_byte(&self) -> Result<Option<u8>, Error>;

    /// Hint of how many bytes are buffered and readable right now.
    fn bytes_to_read(&self) -> Result<u32, Error>;

    /// Registers (or clears) the on-bytes-available callback. The listener
    /// survives close/reopen cycles.
    fn set_listener(&mut self, listener: Option<BytesListener>);

    /// The device name this transport is bound to.
    fn port_name(&self) -> String;

    /// The configured baud rate.
    fn baud_rate(&self) -> u32;
}
