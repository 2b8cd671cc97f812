use std::fmt::{Display, Formatter};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error};
use parking_lot::Mutex;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::errors::Error;
use crate::io::transports::{BytesListener, Transport};

/// Default baud rate for a generic serial connection.
pub const DEFAULT_BAUD_RATE: u32 = 9_600;

/// Baud rates a Firmata device may be configured for.
pub const SUPPORTED_BAUD_RATES: [u32; 10] = [
    2_400, 4_800, 9_600, 14_400, 19_200, 28_800, 31_250, 38_400, 57_600, 115_200,
];

/// How long the receive thread blocks on a read before rechecking whether it
/// should exit.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A [`Transport`] over a serial connection.
///
/// Uses the [serialport](https://crates.io/crates/serialport) crate. The
/// receive thread holds its own clone of the port handle, so reads never
/// contend with writers.
#[derive(Clone)]
pub struct Serial {
    port: String,
    baud_rate: u32,
    io: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
    listener: Arc<Mutex<Option<BytesListener>>>,
    running: Arc<AtomicBool>,
    reader: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for Serial {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Serial")
            .field("port", &self.port)
            .field("baud_rate", &self.baud_rate)
            .field("io", &self.io)
            .field("listener", &self.listener.lock().is_some())
            .field("running", &self.running)
            .field("reader", &self.reader)
            .finish()
    }
}

impl Serial {
    /// Constructs a new `Serial` transport for the specified port at the
    /// default baud rate.
    pub fn new<P: Into<String>>(port: P) -> Self {
        Self::with_baud_rate(port, DEFAULT_BAUD_RATE)
    }

    /// Constructs a new `Serial` transport for the specified port and baud
    /// rate.
    pub fn with_baud_rate<P: Into<String>>(port: P, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            io: Arc::new(Mutex::new(None)),
            listener: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            reader: Arc::new(Mutex::new(None)),
        }
    }

    fn spawn_reader(&self, mut handle: Box<dyn SerialPort>) {
        let listener = Arc::clone(&self.listener);
        let running = Arc::clone(&self.running);
        let port = self.port.clone();
        *self.reader.lock() = Some(std::thread::spawn(move || {
            let mut buf = [0u8; 256];
            while running.load(Ordering::Acquire) {
                match handle.read(&mut buf) {
                    // End of stream: the port went away under us.
                    Ok(0) => break,
                    Ok(count) => {
                        if let Some(callback) = listener.lock().as_mut() {
                            callback(&buf[..count]);
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        error!("receive thread for {} exiting: {}", port, e);
                        break;
                    }
                }
            }
            debug!("receive thread for {} done", port);
        }));
    }
}

impl Default for Serial {
    /// Creates a serial transport on the first available port, or an empty
    /// port name if none are available (which will fail on open).
    #[cfg(not(tarpaulin_include))]
    fn default() -> Self {
        let ports = serialport::available_ports().unwrap_or_else(|_| vec![]);
        match ports.first() {
            Some(port) => Self::new(&port.port_name),
            None => Self::new(""),
        }
    }
}

impl Display for Serial {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Serial({}@{}{})",
            self.port,
            self.baud_rate,
            if self.is_open() { " [*]" } else { "" }
        )
    }
}

impl Transport for Serial {
    #[cfg(not(tarpaulin_include))]
    fn open(&mut self) -> Result<(), Error> {
        if self.is_open() {
            return Ok(());
        }
        let connexion = serialport::new(self.port.clone(), self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(POLL_INTERVAL)
            .open()?;

        let reader_handle = connexion.try_clone()?;
        *self.io.lock() = Some(connexion);
        self.running.store(true, Ordering::Release);
        self.spawn_reader(reader_handle);
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.reader.lock().take() {
            let _ = handle.join();
        }
        *self.io.lock() = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.io.lock().is_some()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        self.io
            .lock()
            .as_mut()
            .ok_or(Error::NotConnected)?
            .set_timeout(timeout)
            .map_err(Error::from)
    }

    fn write(&self, bytes: &[u8]) -> Result<(), Error> {
        use std::io::Write;
        let mut lock = self.io.lock();
        lock.as_mut()
            .ok_or(Error::NotConnected)?
            .write_all(bytes)?;
        Ok(())
    }

    fn read_byte(&self) -> Result<Option<u8>, Error> {
        let mut byte = [0u8; 1];
        let mut lock = self.io.lock();
        let port = lock.as_mut().ok_or(Error::NotConnected)?;
        match port.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) => Err(e.into()),
        }
    }

    fn bytes_to_read(&self) -> Result<u32, Error> {
        self.io
            .lock()
            .as_ref()
            .ok_or(Error::NotConnected)?
            .bytes_to_read()
            .map_err(Error::from)
    }

    fn set_listener(&mut self, listener: Option<BytesListener>) {
        *self.listener.lock() = listener;
    }

    fn port_name(&self) -> String {
        self.port.clone()
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

impl From<serialport::Error> for Error {
    fn from(value: serialport::Error) -> Self {
        match value.kind() {
            serialport::ErrorKind::Io(kind) => std::io::Error::new(kind, value.description).into(),
            serialport::ErrorKind::NoDevice => Error::TransportIo {
                info: String::from("no such device"),
            },
            _ => Error::TransportIo {
                info: value.description,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_serial_transport() {
        let transport = Serial::new("/dev/ttyACM0");
        assert_eq!(transport.port_name(), "/dev/ttyACM0");
        assert_eq!(transport.baud_rate(), DEFAULT_BAUD_RATE);
        assert!(!transport.is_open());
    }

    #[test]
    fn test_with_baud_rate() {
        let transport = Serial::with_baud_rate("COM4", 57_600);
        assert_eq!(transport.port_name(), "COM4");
        assert_eq!(transport.baud_rate(), 57_600);
    }

    #[test]
    fn test_closed_transport_rejects_io() {
        let transport = Serial::new("/dev/ttyACM0");
        assert!(matches!(
            transport.write(&[1, 2, 3]),
            Err(Error::NotConnected)
        ));
        assert!(matches!(transport.read_byte(), Err(Error::NotConnected)));
        assert!(matches!(
            transport.bytes_to_read(),
            Err(Error::NotConnected)
        ));

        let mut transport = transport;
        assert!(matches!(
            transport.set_timeout(Duration::from_secs(1)),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut transport = Serial::new("/dev/ttyACM0");
        assert!(transport.close().is_ok());
        assert!(transport.close().is_ok());
    }

    #[test]
    fn test_from_serial_error() {
        let denied = serialport::Error {
            kind: serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied),
            description: String::from("access denied"),
        };
        assert!(matches!(Error::from(denied), Error::Unauthorized { .. }));

        let gone = serialport::Error {
            kind: serialport::ErrorKind::NoDevice,
            description: String::from("gone"),
        };
        assert!(matches!(Error::from(gone), Error::TransportIo { .. }));

        let unknown = serialport::Error {
            kind: serialport::ErrorKind::Unknown,
            description: String::from("test error"),
        };
        assert!(matches!(Error::from(unknown), Error::TransportIo { .. }));
    }

    #[test]
    fn test_display() {
        let transport = Serial::with_baud_rate("/dev/ttyUSB1", 57_600);
        assert_eq!(format!("{}", transport), "Serial(/dev/ttyUSB1@57600)");
    }
}
