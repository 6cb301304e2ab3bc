//! The two-way ranging session engine
//!
//! [`TwrEngine`] bundles everything an exchange needs: the radio, a delay
//! source for polling, the host link, both configurations, the frame sequence
//! counter and the passive listening toggle. Exchanges borrow the engine
//! mutably, so only one can run at a time.
//!
//! An exchange either runs as initiator ([`TwrEngine::initiate`]), as
//! responder to a received POLL, or as passive listener to an exchange
//! between two other boards. Whatever the outcome, the radio is left with its
//! receiver armed and the RX interrupt enabled.

#[cfg(feature = "defmt")]
use defmt::{debug, info, warn};
use embedded_hal::delay::DelayNs;
#[cfg(not(feature = "defmt"))]
use log::{debug, info, warn};

use crate::{
    cir,
    configs::{Config, TwrConfig},
    frame::{self, Frame, FrameError, MAX_FRAME_LEN},
    host::{response::Line, HostLink},
    radio::{Radio, RxStatus, SendTime},
    time::Instant,
};

mod error;
mod initiator;
mod passive;
mod report;
mod responder;

pub use error::Error;
pub use report::{PassiveReport, RangingResult, Role};

/// Device ID every DW1000 reports
pub const DW1000_DEVICE_ID: u32 = 0xdeca_0130;

/// Outcome of a bounded wait on the receiver
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RadioEvent {
    /// A good frame of the given length was received
    FrameReceived(usize),
    /// Nothing arrived within the receive timeout or the poll budget
    TimedOut,
    /// The receiver reported an error
    Error,
}

/// Two-way ranging engine
pub struct TwrEngine<R, D, H> {
    radio: R,
    delay: D,
    host: H,
    config: Config,
    twr: TwrConfig,
    seq: u8,
    passive_listening: bool,
}

impl<R, D, H> TwrEngine<R, D, H>
where
    R: Radio,
    D: DelayNs,
    H: HostLink,
{
    /// Creates an engine
    ///
    /// Call [`TwrEngine::init`] before using it.
    pub fn new(radio: R, delay: D, host: H, config: Config, twr: TwrConfig) -> Self {
        TwrEngine {
            radio,
            delay,
            host,
            config,
            twr,
            seq: 0,
            passive_listening: false,
        }
    }

    /// Configures the radio and starts listening
    pub fn init(&mut self) -> Result<(), Error<R::Error>> {
        self.radio.configure(&self.config).map_err(Error::Radio)?;
        self.radio
            .set_antenna_delay(self.twr.rx_antenna_delay, self.twr.tx_antenna_delay)
            .map_err(Error::Radio)?;
        self.restore_radio(false).map_err(Error::Radio)?;
        info!("board {} listening", self.twr.board_id);
        Ok(())
    }

    /// Identity of this board
    pub fn board_id(&self) -> u8 {
        self.twr.board_id
    }

    /// The radio configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The ranging configuration
    pub fn twr_config(&self) -> &TwrConfig {
        &self.twr
    }

    /// Whether foreign exchanges are followed
    pub fn passive_listening(&self) -> bool {
        self.passive_listening
    }

    /// Enables or disables following foreign exchanges
    pub fn set_passive_listening(&mut self, enabled: bool) {
        debug!("passive listening: {}", enabled);
        self.passive_listening = enabled;
    }

    /// Access the radio
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Mutably access the radio
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Access the host link
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Mutably access the host link
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Gives back the radio, the delay and the host link
    pub fn release(self) -> (R, D, H) {
        (self.radio, self.delay, self.host)
    }

    /// Aborts whatever the radio is doing and goes back to listening
    pub fn idle(&mut self) -> Result<(), Error<R::Error>> {
        self.radio.force_idle().map_err(Error::Radio)?;
        self.restore_radio(false).map_err(Error::Radio)
    }

    /// Resets the receiver and the engine state, then initializes again
    pub fn reset(&mut self) -> Result<(), Error<R::Error>> {
        self.radio.force_idle().map_err(Error::Radio)?;
        self.radio.rx_reset().map_err(Error::Radio)?;
        self.seq = 0;
        self.passive_listening = false;
        self.init()
    }

    /// Reads the device ID of the radio
    ///
    /// A working DW1000 returns [`DW1000_DEVICE_ID`].
    pub fn self_test(&mut self) -> Result<u32, Error<R::Error>> {
        let id = self.radio.device_id().map_err(Error::Radio)?;
        if id != DW1000_DEVICE_ID {
            warn!("unexpected device ID {:x}", id);
        }
        Ok(id)
    }

    /// Sends a payload to every board in range as a DATA frame
    pub fn broadcast(&mut self, payload: &[u8]) -> Result<(), Error<R::Error>> {
        let seq = self.next_seq();
        let data = frame::encode_data(seq, self.twr.board_id, payload)?;
        self.with_radio_masked(|engine| {
            engine.transmit(&data, SendTime::Now, false)?;
            engine.wait_tx()
        })
    }

    /// Streams the channel impulse response of the last reception as `R10`
    pub fn report_cir(&mut self) -> Result<(), Error<R::Error>> {
        let mut samples = [0u32; cir::CIR_LEN];
        cir::read_cir(&mut self.radio, &mut samples).map_err(Error::Radio)?;
        cir::write_cir(&mut self.host, &samples).map_err(|_| Error::BufferOverflow {
            required_len: cir::CHUNK_CAPACITY,
        })
    }

    /// Sends a line to the host
    pub(crate) fn emit(&mut self, line: &Line) -> Result<(), Error<R::Error>> {
        let overflow = Error::BufferOverflow {
            required_len: line.required_len(),
        };
        if line.overflowed() {
            return Err(overflow);
        }
        self.host.write(line.as_bytes()).map_err(|_| overflow)
    }

    /// Sends an unsolicited report, which may be lost
    pub(crate) fn report(&mut self, line: &Line) {
        if self.emit(line).is_err() {
            warn!("host link full, report of {} bytes lost", line.required_len());
        }
    }

    /// Turns the receiver back on after a frame was handled
    pub(crate) fn rearm_receiver(&mut self) -> Result<(), Error<R::Error>> {
        self.radio.clear_status().map_err(Error::Radio)?;
        self.radio.enable_rx().map_err(Error::Radio)
    }

    fn next_seq(&mut self) -> u8 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    /// Runs `f` with the RX interrupt masked and the radio idle
    ///
    /// Afterwards, timeouts are reset, the receiver is re-armed (after an RX
    /// reset if `f` failed) and the interrupt is unmasked, on every path.
    fn with_radio_masked<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, Error<R::Error>>,
    ) -> Result<T, Error<R::Error>> {
        let result = match self.radio.set_rx_interrupt(false) {
            Ok(()) => self.radio.force_idle().map_err(Error::Radio).and_then(|_| f(self)),
            Err(error) => Err(Error::Radio(error)),
        };
        let restored = self.restore_radio(result.is_err());

        match (result, restored) {
            (Err(error), _) => Err(error),
            (Ok(_), Err(error)) => Err(Error::Radio(error)),
            (Ok(value), Ok(())) => Ok(value),
        }
    }

    fn restore_radio(&mut self, failed: bool) -> Result<(), R::Error> {
        let rearmed = self.reset_receiver(failed);
        let unmasked = self.radio.set_rx_interrupt(true);
        rearmed.and(unmasked)
    }

    fn reset_receiver(&mut self, failed: bool) -> Result<(), R::Error> {
        self.radio.force_idle()?;
        self.radio.set_rx_after_tx_delay(0)?;
        self.radio.set_rx_timeout(0)?;
        self.radio.set_preamble_timeout(0)?;
        self.radio.clear_status()?;
        if failed {
            self.radio.rx_reset()?;
        }
        self.radio.enable_rx()
    }

    fn transmit(
        &mut self,
        frame: &Frame,
        send_time: SendTime,
        response_expected: bool,
    ) -> Result<(), Error<R::Error>> {
        self.radio.write_tx_data(frame).map_err(Error::Radio)?;
        self.radio.start_tx(send_time, response_expected)?;
        Ok(())
    }

    fn wait_tx(&mut self) -> Result<(), Error<R::Error>> {
        for _ in 0..self.twr.max_polls {
            match self.radio.tx_done() {
                Ok(()) => return Ok(()),
                Err(nb::Error::WouldBlock) => self.delay.delay_us(self.twr.poll_interval_us),
                Err(nb::Error::Other(error)) => return Err(Error::Radio(error)),
            }
        }
        warn!("transmission not done after {} polls", self.twr.max_polls);
        Err(Error::Timeout)
    }

    fn wait_rx(&mut self, buffer: &mut [u8]) -> Result<RadioEvent, Error<R::Error>> {
        for _ in 0..self.twr.max_polls {
            match self.radio.rx_done(buffer) {
                Ok(RxStatus::Frame { len }) => return Ok(RadioEvent::FrameReceived(len)),
                Ok(RxStatus::Timeout) => return Ok(RadioEvent::TimedOut),
                Ok(RxStatus::Error) => return Ok(RadioEvent::Error),
                Err(nb::Error::WouldBlock) => self.delay.delay_us(self.twr.poll_interval_us),
                Err(nb::Error::Other(error)) => return Err(Error::Radio(error)),
            }
        }
        Ok(RadioEvent::TimedOut)
    }

    /// Waits for the next frame and checks it against `expected`
    ///
    /// Returns the frame and its RX timestamp.
    fn await_frame(
        &mut self,
        expected: &Frame,
        prefix_len: usize,
    ) -> Result<(Frame, Instant), Error<R::Error>> {
        let mut buffer = [0; MAX_FRAME_LEN];
        match self.wait_rx(&mut buffer)? {
            RadioEvent::FrameReceived(len) => {
                let received = &buffer[..len.min(MAX_FRAME_LEN)];
                if !frame::matches_expected(received, expected, prefix_len) {
                    debug!("unexpected frame of {} bytes", received.len());
                    return Err(Error::MalformedFrame(FrameError::Mismatch));
                }
                let rx_time = self.radio.rx_timestamp().map_err(Error::Radio)?;
                Ok((Frame::from_bytes(received)?, rx_time))
            }
            RadioEvent::TimedOut => Err(Error::Timeout),
            RadioEvent::Error => Err(Error::RxFailed),
        }
    }

    fn capture_tx_timestamp(&mut self) -> Result<Instant, Error<R::Error>> {
        self.radio.tx_timestamp().map_err(Error::Radio)
    }
}
