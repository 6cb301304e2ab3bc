//! The serial protocol towards the host computer
//!
//! Commands arrive as `Cnn|field|...` lines and are answered with `Rnn|...`
//! lines. Unsolicited reports (`S01`, `S02`, `S05`) are sent whenever the
//! engine overhears or answers something on its own.

#[cfg(feature = "defmt")]
use defmt::Format;

pub mod command;
pub mod processor;
pub mod response;

pub use command::{Command, ParseError};
pub use processor::{execute, handle};
pub use response::Line;

/// The host link could not take the bytes
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct BufferFull;

/// The outgoing side of the link to the host, usually a UART or USB CDC
/// transmit buffer
pub trait HostLink {
    /// Queues all of `bytes` for transmission, or none of them
    fn write(&mut self, bytes: &[u8]) -> Result<(), BufferFull>;

    /// Free space in the transmit buffer, if the link knows it
    ///
    /// Lines written in several parts check it first, so that they go out
    /// whole or not at all.
    fn available(&self) -> Option<usize> {
        None
    }
}

impl<T: HostLink + ?Sized> HostLink for &mut T {
    fn write(&mut self, bytes: &[u8]) -> Result<(), BufferFull> {
        (**self).write(bytes)
    }

    fn available(&self) -> Option<usize> {
        (**self).available()
    }
}
