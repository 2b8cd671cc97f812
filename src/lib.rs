#![doc(html_root_url = "https://docs.rs/firmata-link/0.1.0")]

//! # firmata-link
//!
//! A host-side client library for the [Firmata protocol](https://github.com/firmata/protocol):
//! talk to a microcontroller over a byte-oriented transport, decode its
//! interleaved telemetry into typed messages, and drive it through validated,
//! typed commands.
//!
//! # Features
//!
//! - A resilient byte-driven [`Framer`](io::Framer) that demultiplexes
//!   analog/digital telemetry, firmware and capability reports, i2c replies
//!   and raw sysex payloads, resynchronizing itself on garbage instead of
//!   failing.
//! - A [`Session`](session::Session) exposing blocking request/reply methods
//!   with per-session timeouts, their `async` twins, fire-and-forget
//!   commands, and listener/subscription event delivery.
//! - A [`Finder`](discovery::Finder) that probes serial ports across
//!   candidate baud rates until a responsive device turns up.
//!
//! # Getting started
//!
//! - Install [StandardFirmata](https://github.com/firmata/arduino) on your
//!   board (it ships with the Arduino IDE samples).
//!
//! - Add the following to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! firmata-link = "0.1.0"
//! ```
//!
//! - Find your board and start talking:
//! ```rust,no_run
//! use firmata_link::discovery::Finder;
//! use firmata_link::io::PinModeId;
//!
//! fn main() -> Result<(), firmata_link::errors::Error> {
//!     let session = Finder::new().find().expect("no Firmata device found");
//!
//!     let firmware = session.get_firmware()?;
//!     println!("found {}", firmware);
//!
//!     session.set_pin_mode(13, PinModeId::OUTPUT)?;
//!     session.set_digital_pin(13, true)?;
//!     Ok(())
//! }
//! ```
//!
//! # Feature flags
//!
//! - **libudev** -- (enabled by default) activates the `serialport` crate's
//!   _libudev_ feature under the hood (required on Linux for port listing).
//! - **serde** -- enables serialize/deserialize capabilities for the
//!   data-model types.
//! - **mocks** -- exports the scripted transport used by the test suite.

pub mod discovery;
pub mod errors;
pub mod io;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
pub mod session;

pub use session::Session;
