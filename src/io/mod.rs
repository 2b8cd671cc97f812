//! The Firmata protocol engine: codec, framer, dispatcher and command
//! encoders, plus the transport seam they plug into.

pub mod codec;
pub mod commands;
pub mod constants;
mod dispatcher;
mod framer;
mod message;
mod transports;

// Re-exports.
pub use dispatcher::*;
pub use framer::*;
pub use message::*;
pub use transports::serial::*;
pub use transports::*;
// --
