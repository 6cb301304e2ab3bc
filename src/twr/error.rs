use core::fmt;
use core::fmt::{Display, Formatter};

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{frame::FrameError, radio::TxError};

/// An error that can occur during a ranging exchange
pub enum Error<E> {
    /// Error occured while talking to the radio
    Radio(E),

    /// A received frame was not the one the exchange expected
    MalformedFrame(FrameError),

    /// No frame arrived within the receive timeout or the poll budget
    Timeout,

    /// The receiver reported a PHY, FCS or synchronisation error
    RxFailed,

    /// A delayed transmission could not be started in time
    TxStartFailed,

    /// The computed distance was negative
    NegativeDistance,

    /// An outgoing line or frame did not fit its buffer
    BufferOverflow {
        /// Indicates how large a buffer would have been required
        required_len: usize,
    },

    /// The exchange would have this board range with itself
    IdentityConflict,
}

impl<E> Error<E> {
    /// Whether attempting the exchange again may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::MalformedFrame(_)
                | Error::Timeout
                | Error::RxFailed
                | Error::TxStartFailed
                | Error::NegativeDistance
        )
    }

    /// Short lowercase name, used in failure lines sent to the host
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Radio(_) => "radio",
            Error::MalformedFrame(_) => "malformed-frame",
            Error::Timeout => "timeout",
            Error::RxFailed => "rx-failed",
            Error::TxStartFailed => "tx-start-failed",
            Error::NegativeDistance => "negative-distance",
            Error::BufferOverflow { .. } => "buffer-overflow",
            Error::IdentityConflict => "identity-conflict",
        }
    }
}

impl<E> From<FrameError> for Error<E> {
    fn from(error: FrameError) -> Self {
        match error {
            FrameError::TooLong { len } => Error::BufferOverflow { required_len: len },
            error => Error::MalformedFrame(error),
        }
    }
}

impl<E> From<TxError<E>> for Error<E> {
    fn from(error: TxError<E>) -> Self {
        match error {
            TxError::Late => Error::TxStartFailed,
            TxError::Bus(error) => Error::Radio(error),
        }
    }
}

impl<E> Display for Error<E>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(feature = "std")]
impl<E> std::error::Error for Error<E> where E: fmt::Debug {}

// Not derived, so that `Error<E>` is `Debug` for any `E: Debug` without
// requiring more of it.
impl<E> fmt::Debug for Error<E>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Radio(error) => write!(f, "Radio({:?})", error),
            Error::MalformedFrame(error) => write!(f, "MalformedFrame({:?})", error),
            Error::Timeout => write!(f, "Timeout"),
            Error::RxFailed => write!(f, "RxFailed"),
            Error::TxStartFailed => write!(f, "TxStartFailed"),
            Error::NegativeDistance => write!(f, "NegativeDistance"),
            Error::BufferOverflow { required_len } => {
                write!(f, "BufferOverflow {{ required_len: {:?} }}", required_len)
            }
            Error::IdentityConflict => write!(f, "IdentityConflict"),
        }
    }
}

#[cfg(feature = "defmt")]
impl<E> Format for Error<E>
where
    E: defmt::Format,
{
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Radio(error) => defmt::write!(f, "Radio({:?})", error),
            Error::MalformedFrame(error) => defmt::write!(f, "MalformedFrame({:?})", error),
            Error::Timeout => defmt::write!(f, "Timeout"),
            Error::RxFailed => defmt::write!(f, "RxFailed"),
            Error::TxStartFailed => defmt::write!(f, "TxStartFailed"),
            Error::NegativeDistance => defmt::write!(f, "NegativeDistance"),
            Error::BufferOverflow { required_len } => {
                defmt::write!(f, "BufferOverflow {{ required_len: {:?} }}", required_len)
            }
            Error::IdentityConflict => defmt::write!(f, "IdentityConflict"),
        }
    }
}
