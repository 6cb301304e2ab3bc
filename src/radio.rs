//! The transceiver seen from the ranging engine
//!
//! The engine never touches registers. Everything it needs from the radio is
//! expressed by the [`Radio`] trait, to be implemented on top of a register
//! driver. Operations that complete asynchronously in hardware follow the
//! `nb` convention: they return `nb::Error::WouldBlock` until done and are
//! polled by the engine within a bounded budget.

use core::fmt;

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{configs::Config, time::Instant};

/// Specifies whether a transmission starts immediately or at a given instant
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum SendTime {
    /// Transmit as soon as possible
    Now,
    /// Transmit at the given device time
    ///
    /// Only the upper 31 bits of the instant are honoured, see
    /// [`Instant::delayed_tx_rounded`].
    Delayed(Instant),
}

/// Outcome of a finished reception
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum RxStatus {
    /// A frame with a good FCS was received and copied into the buffer
    ///
    /// `len` excludes the FCS.
    Frame {
        /// Number of bytes written to the buffer
        len: usize,
    },
    /// The frame wait or preamble detection timeout expired
    Timeout,
    /// PHY header, FCS, Reed Solomon or SFD error
    Error,
}

/// Error returned when starting a transmission
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TxError<E> {
    /// The instant of a delayed transmission had already passed
    ///
    /// Nothing was transmitted.
    Late,
    /// Error occured while talking to the radio
    Bus(E),
}

impl<E> From<E> for TxError<E> {
    fn from(error: E) -> Self {
        TxError::Bus(error)
    }
}

/// Raw receiver diagnostic registers of the last reception
///
/// Converted to physical units by [`Diagnostics`].
///
/// [`Diagnostics`]: crate::diagnostics::Diagnostics
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct RawDiagnostics {
    /// First path amplitude, point 1 (`FP_AMPL1`)
    pub fp_ampl1: u16,
    /// First path amplitude, point 2 (`FP_AMPL2`)
    pub fp_ampl2: u16,
    /// First path amplitude, point 3 (`FP_AMPL3`)
    pub fp_ampl3: u16,
    /// Channel impulse response power (`CIR_PWR`)
    pub cir_power: u16,
    /// Preamble accumulation count (`RXPACC`)
    pub rx_pacc: u16,
    /// Standard deviation of the noise (`STD_NOISE`)
    pub std_noise: u16,
    /// Carrier recovery integrator (`DRX_CAR_INT`), sign-extended
    pub carrier_integrator: i32,
}

/// A DW1000-class transceiver
///
/// Implementations own the SPI bus and whatever pins the chip needs. Besides
/// the methods below, the platform wires the radio interrupt to a
/// [`FrameProducer`](crate::dispatcher::FrameProducer); that is the only
/// way received frames reach the engine outside of an exchange.
pub trait Radio {
    /// Error of the underlying bus
    type Error: fmt::Debug;

    /// Applies the physical layer configuration
    fn configure(&mut self, config: &Config) -> Result<(), Self::Error>;

    /// Sets the antenna delays, in device time units
    fn set_antenna_delay(&mut self, rx_delay: u16, tx_delay: u16) -> Result<(), Self::Error>;

    /// Reads the `DEV_ID` register
    fn device_id(&mut self) -> Result<u32, Self::Error>;

    /// Aborts any ongoing transmission or reception
    fn force_idle(&mut self) -> Result<(), Self::Error>;

    /// Soft-resets the receiver after an error
    fn rx_reset(&mut self) -> Result<(), Self::Error>;

    /// Clears the TX/RX event and error flags of the status register
    fn clear_status(&mut self) -> Result<(), Self::Error>;

    /// Masks or unmasks the good frame received interrupt
    fn set_rx_interrupt(&mut self, enabled: bool) -> Result<(), Self::Error>;

    /// Delay between the end of a transmission sent with `response_expected`
    /// and the receiver turning on, in UWB microseconds
    fn set_rx_after_tx_delay(&mut self, delay_uus: u32) -> Result<(), Self::Error>;

    /// Frame wait timeout, in UWB microseconds. `0` disables it.
    fn set_rx_timeout(&mut self, timeout_uus: u32) -> Result<(), Self::Error>;

    /// Preamble detection timeout, in PACs. `0` disables it.
    fn set_preamble_timeout(&mut self, timeout_pacs: u16) -> Result<(), Self::Error>;

    /// Turns the receiver on immediately
    fn enable_rx(&mut self) -> Result<(), Self::Error>;

    /// Writes a frame into the TX buffer
    ///
    /// The radio appends the 2-byte FCS.
    fn write_tx_data(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Starts transmitting the frame in the TX buffer
    ///
    /// With `response_expected`, the receiver turns on automatically after
    /// the configured RX-after-TX delay.
    fn start_tx(
        &mut self,
        send_time: SendTime,
        response_expected: bool,
    ) -> Result<(), TxError<Self::Error>>;

    /// Wait for the transmission to finish
    ///
    /// Returns `nb::Error::WouldBlock` while the frame is on the air.
    fn tx_done(&mut self) -> nb::Result<(), Self::Error>;

    /// Wait for the reception to finish
    ///
    /// On a good frame, the data (without FCS) is copied into `buffer`.
    /// Returns `nb::Error::WouldBlock` while nothing happened yet.
    fn rx_done(&mut self, buffer: &mut [u8]) -> nb::Result<RxStatus, Self::Error>;

    /// Adjusted TX timestamp of the last transmitted frame
    fn tx_timestamp(&mut self) -> Result<Instant, Self::Error>;

    /// Adjusted RX timestamp of the last received frame
    fn rx_timestamp(&mut self) -> Result<Instant, Self::Error>;

    /// Diagnostic registers of the last received frame
    fn rx_diagnostics(&mut self) -> Result<RawDiagnostics, Self::Error>;

    /// Reads one complex sample of the channel impulse response accumulator
    ///
    /// Returns `(real, imaginary)`.
    fn cir_sample(&mut self, index: u16) -> Result<(i16, i16), Self::Error>;
}
