//! Scripted stand-ins for the radio and the host link
//!
//! [`ScriptedRadio`] replays queued receptions and records every
//! transmission, which is enough to drive whole exchanges without hardware.
//! [`VecLink`] collects everything sent to the host.

use std::{collections::VecDeque, convert::Infallible, string::String, vec::Vec};

use crate::{
    configs::Config,
    host::{BufferFull, HostLink},
    radio::{RawDiagnostics, Radio, RxStatus, SendTime, TxError},
    time::{Duration, Instant},
    twr::DW1000_DEVICE_ID,
};

/// Device time that passes with every transmission of the fallback clock
const TX_CLOCK_STEP: u64 = 100_000;

/// A transmission recorded by [`ScriptedRadio`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentFrame {
    /// The frame, without FCS
    pub data: Vec<u8>,
    /// When the frame was scheduled
    pub send_time: SendTime,
    /// Whether the receiver was to be turned on afterwards
    pub response_expected: bool,
    /// TX timestamp reported for the frame
    pub tx_time: Instant,
}

#[derive(Debug, Clone)]
enum Reception {
    Frame { data: Vec<u8>, rx_time: Instant },
    Error,
}

/// A radio that plays back a script
///
/// Receptions are handed out in order while the receiver is on. Once the
/// script is exhausted, the receiver times out if a frame wait timeout is
/// set, and never reports anything otherwise.
#[derive(Debug, Clone)]
pub struct ScriptedRadio {
    /// Every transmission started so far
    pub sent: Vec<SentFrame>,
    /// TX timestamps of upcoming immediate transmissions
    ///
    /// Once empty, an internal clock is used.
    pub tx_times: VecDeque<u64>,
    /// Whether the receiver is on
    pub rx_enabled: bool,
    /// Whether the RX interrupt is unmasked
    pub rx_interrupt: bool,
    /// The last configuration applied
    pub configured: Option<Config>,
    /// RX and TX antenna delay
    pub antenna_delay: (u16, u16),
    /// Reported device ID
    pub device_id: u32,
    /// Number of receiver resets
    pub rx_resets: u32,
    /// RX-after-TX delay, in UWB microseconds
    pub rx_after_tx_delay_uus: u32,
    /// Frame wait timeout, in UWB microseconds
    pub rx_timeout_uus: u32,
    /// Preamble detection timeout, in PACs
    pub preamble_timeout_pacs: u16,
    /// Number of times the receiver was polled
    pub rx_polls: u32,
    /// Diagnostics reported for every reception
    pub diagnostics: RawDiagnostics,
    /// Accumulator samples, zero past the end
    pub cir: Vec<(i16, i16)>,
    /// Whether delayed transmissions start too late
    pub late_delayed_tx: bool,
    receptions: VecDeque<Reception>,
    tx_buffer: Vec<u8>,
    clock: u64,
    last_tx: Instant,
    last_rx: Instant,
}

impl ScriptedRadio {
    /// Creates a radio with an empty script
    pub fn new() -> Self {
        ScriptedRadio {
            sent: Vec::new(),
            tx_times: VecDeque::new(),
            rx_enabled: false,
            rx_interrupt: false,
            configured: None,
            antenna_delay: (0, 0),
            device_id: DW1000_DEVICE_ID,
            rx_resets: 0,
            rx_after_tx_delay_uus: 0,
            rx_timeout_uus: 0,
            preamble_timeout_pacs: 0,
            rx_polls: 0,
            diagnostics: RawDiagnostics {
                fp_ampl1: 1000,
                fp_ampl2: 1000,
                fp_ampl3: 1000,
                cir_power: 1000,
                rx_pacc: 110,
                std_noise: 42,
                carrier_integrator: 0,
            },
            cir: Vec::new(),
            late_delayed_tx: false,
            receptions: VecDeque::new(),
            tx_buffer: Vec::new(),
            clock: 0,
            last_tx: Instant::default(),
            last_rx: Instant::default(),
        }
    }

    /// Queues a good frame, received at the given device time
    pub fn push_frame(&mut self, data: &[u8], rx_time: u64) {
        self.receptions.push_back(Reception::Frame {
            data: data.to_vec(),
            rx_time: Instant::from_register(rx_time),
        });
    }

    /// Queues a reception error
    pub fn push_rx_error(&mut self) {
        self.receptions.push_back(Reception::Error);
    }

    /// Number of receptions not handed out yet
    pub fn pending(&self) -> usize {
        self.receptions.len()
    }
}

impl Default for ScriptedRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl Radio for ScriptedRadio {
    type Error = Infallible;

    fn configure(&mut self, config: &Config) -> Result<(), Self::Error> {
        self.configured = Some(*config);
        Ok(())
    }

    fn set_antenna_delay(&mut self, rx_delay: u16, tx_delay: u16) -> Result<(), Self::Error> {
        self.antenna_delay = (rx_delay, tx_delay);
        Ok(())
    }

    fn device_id(&mut self) -> Result<u32, Self::Error> {
        Ok(self.device_id)
    }

    fn force_idle(&mut self) -> Result<(), Self::Error> {
        self.rx_enabled = false;
        Ok(())
    }

    fn rx_reset(&mut self) -> Result<(), Self::Error> {
        self.rx_resets += 1;
        Ok(())
    }

    fn clear_status(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_rx_interrupt(&mut self, enabled: bool) -> Result<(), Self::Error> {
        self.rx_interrupt = enabled;
        Ok(())
    }

    fn set_rx_after_tx_delay(&mut self, delay_uus: u32) -> Result<(), Self::Error> {
        self.rx_after_tx_delay_uus = delay_uus;
        Ok(())
    }

    fn set_rx_timeout(&mut self, timeout_uus: u32) -> Result<(), Self::Error> {
        self.rx_timeout_uus = timeout_uus;
        Ok(())
    }

    fn set_preamble_timeout(&mut self, timeout_pacs: u16) -> Result<(), Self::Error> {
        self.preamble_timeout_pacs = timeout_pacs;
        Ok(())
    }

    fn enable_rx(&mut self) -> Result<(), Self::Error> {
        self.rx_enabled = true;
        Ok(())
    }

    fn write_tx_data(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.tx_buffer = data.to_vec();
        Ok(())
    }

    fn start_tx(
        &mut self,
        send_time: SendTime,
        response_expected: bool,
    ) -> Result<(), TxError<Self::Error>> {
        let tx_time = match send_time {
            SendTime::Now => {
                let time = self.tx_times.pop_front().unwrap_or(self.clock);
                Instant::from_register(time)
            }
            SendTime::Delayed(_) if self.late_delayed_tx => return Err(TxError::Late),
            SendTime::Delayed(instant) => {
                instant + Duration::from_device_units(self.antenna_delay.1.into())
            }
        };
        self.clock = tx_time.value() + TX_CLOCK_STEP;

        self.sent.push(SentFrame {
            data: self.tx_buffer.clone(),
            send_time,
            response_expected,
            tx_time,
        });
        self.last_tx = tx_time;
        self.rx_enabled = response_expected;
        Ok(())
    }

    fn tx_done(&mut self) -> nb::Result<(), Self::Error> {
        Ok(())
    }

    fn rx_done(&mut self, buffer: &mut [u8]) -> nb::Result<RxStatus, Self::Error> {
        self.rx_polls += 1;
        if !self.rx_enabled {
            return Err(nb::Error::WouldBlock);
        }

        let status = match self.receptions.pop_front() {
            Some(Reception::Frame { data, rx_time }) => {
                let len = data.len().min(buffer.len());
                buffer[..len].copy_from_slice(&data[..len]);
                self.last_rx = rx_time;
                RxStatus::Frame { len }
            }
            Some(Reception::Error) => RxStatus::Error,
            None if self.rx_timeout_uus != 0 => RxStatus::Timeout,
            None => return Err(nb::Error::WouldBlock),
        };
        self.rx_enabled = false;
        Ok(status)
    }

    fn tx_timestamp(&mut self) -> Result<Instant, Self::Error> {
        Ok(self.last_tx)
    }

    fn rx_timestamp(&mut self) -> Result<Instant, Self::Error> {
        Ok(self.last_rx)
    }

    fn rx_diagnostics(&mut self) -> Result<RawDiagnostics, Self::Error> {
        Ok(self.diagnostics)
    }

    fn cir_sample(&mut self, index: u16) -> Result<(i16, i16), Self::Error> {
        Ok(self.cir.get(index as usize).copied().unwrap_or((0, 0)))
    }
}

/// A host link writing into a `Vec`
#[derive(Debug, Default, Clone)]
pub struct VecLink {
    /// Everything written so far
    pub output: Vec<u8>,
    /// Number of writes
    pub writes: usize,
    capacity: Option<usize>,
}

impl VecLink {
    /// A link that takes everything
    pub fn new() -> Self {
        Self::default()
    }

    /// A link that fails once `capacity` bytes were written
    pub fn with_capacity(capacity: usize) -> Self {
        VecLink {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// The output split into lines, without terminators
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.output)
            .split("\r\n")
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect()
    }
}

impl HostLink for VecLink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), BufferFull> {
        if let Some(capacity) = self.capacity {
            if self.output.len() + bytes.len() > capacity {
                return Err(BufferFull);
            }
        }
        self.output.extend_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }

    fn available(&self) -> Option<usize> {
        self.capacity
            .map(|capacity| capacity.saturating_sub(self.output.len()))
    }
}
