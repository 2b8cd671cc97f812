use std::collections::VecDeque;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::errors::Error;
use crate::io::{BytesListener, Transport};

/// How a [`MockTransport`] should fail its next `open` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockOpenFailure {
    Unauthorized,
    Io,
}

#[derive(Default)]
struct MockState {
    open: bool,
    written: Vec<u8>,
    replies: VecDeque<Vec<u8>>,
    pending: VecDeque<u8>,
    opened_count: usize,
    closed_count: usize,
    refuse_open: Option<MockOpenFailure>,
}

/// A scripted [`Transport`]: captures everything written to it and can
/// answer writes with pre-programmed reply bytes, delivered synchronously
/// through the registered listener.
///
/// Clones share their state, so a test can keep a handle for inspection
/// after moving the transport into a session.
#[derive(Clone)]
pub struct MockTransport {
    name: String,
    baud_rate: u32,
    state: Arc<Mutex<MockState>>,
    listener: Arc<Mutex<Option<BytesListener>>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::named("mock", 57_600)
    }

    pub fn named<P: Into<String>>(name: P, baud_rate: u32) -> Self {
        Self {
            name: name.into(),
            baud_rate,
            state: Arc::new(Mutex::new(MockState::default())),
            listener: Arc::new(Mutex::new(None)),
        }
    }

    /// Queues reply bytes; each write consumes one queued reply and pushes
    /// it back through the listener.
    pub fn enqueue_reply(&self, bytes: &[u8]) {
        self.state.lock().replies.push_back(bytes.to_vec());
    }

    /// Makes the next `open` call fail.
    pub fn refuse_open(&self, failure: MockOpenFailure) {
        self.state.lock().refuse_open = Some(failure);
    }

    /// Pushes unsolicited bytes from the "device", as telemetry would
    /// arrive: through the listener when one is registered, buffered for
    /// `read_byte` otherwise.
    pub fn feed(&self, bytes: &[u8]) {
        let mut listener = self.listener.lock();
        match listener.as_mut() {
            Some(callback) => callback(bytes),
            None => self.state.lock().pending.extend(bytes),
        }
    }

    /// Everything written to the transport so far.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    pub fn opened_count(&self) -> usize {
        self.state.lock().opened_count
    }

    pub fn closed_count(&self) -> usize {
        self.state.lock().closed_count
    }
}

impl Display for MockTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockTransport({})", self.name)
    }
}

impl Debug for MockTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("name", &self.name)
            .field("baud_rate", &self.baud_rate)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<(), Error> {
        let mut state = self.state.lock();
        if let Some(failure) = state.refuse_open {
            return Err(match failure {
                MockOpenFailure::Unauthorized => Error::Unauthorized {
                    info: String::from("mock port is held by another process"),
                },
                MockOpenFailure::Io => Error::TransportIo {
                    info: String::from("mock i/o failure"),
                },
            });
        }
        state.open = true;
        state.opened_count += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.open = false;
        state.closed_count += 1;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn set_timeout(&mut self, _: Duration) -> Result<(), Error> {
        Ok(())
    }

    fn write(&self, bytes: &[u8]) -> Result<(), Error> {
        let reply = {
            let mut state = self.state.lock();
            if !state.open {
                return Err(Error::NotConnected);
            }
            state.written.extend_from_slice(bytes);
            state.replies.pop_front()
        };
        // The state lock is released before the listener runs.
        if let Some(reply) = reply {
            self.feed(&reply);
        }
        Ok(())
    }

    fn read_byte(&self) -> Result<Option<u8>, Error> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(Error::NotConnected);
        }
        Ok(state.pending.pop_front())
    }

    fn bytes_to_read(&self) -> Result<u32, Error> {
        Ok(self.state.lock().pending.len() as u32)
    }

    fn set_listener(&mut self, listener: Option<BytesListener>) {
        *self.listener.lock() = listener;
    }

    fn port_name(&self) -> String {
        self.name.clone()
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}
