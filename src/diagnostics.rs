//! Receiver diagnostics and time-of-flight arithmetic
//!
//! Received power estimates follow section 4.7 of the DW1000 User Manual.
//! The time-of-flight formulas work on the 32-bit truncated timestamps that
//! ranging frames carry, so every subtraction wraps.

#[cfg(feature = "defmt")]
use defmt::Format;
#[allow(unused_imports)]
use num_traits::Float;

use crate::{
    configs::{Config, PulseRepetitionFrequency},
    radio::{Radio, RawDiagnostics},
    time::DWT_TIME_UNITS,
};

/// Speed of light in air, in metres per second
pub const SPEED_OF_LIGHT: f64 = 299_702_547.0;

/// Correction of the preamble accumulation count for the SFD
const N_ADJUSTMENT: i32 = -10;

/// Reception quality of one frame
///
/// This is also the diagnostics block embedded in FINAL frames.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Diagnostics {
    /// First path power, in dBm
    pub fpp_dbm: f32,
    /// Total received power, in dBm
    pub rxp_dbm: f32,
    /// Standard deviation of the noise, raw register value
    pub noise_std: u16,
    /// Clock skew of the remote transmitter relative to us
    ///
    /// Dimensionless, positive when the remote clock runs faster.
    /// Zero unless measured during a double-sided exchange.
    pub skew: f32,
}

impl Diagnostics {
    /// Converts the raw registers of one reception
    ///
    /// A preamble accumulation count at or below the adjustment yields
    /// infinite or NaN powers, which are reported as they are.
    pub fn from_raw(raw: &RawDiagnostics, prf: PulseRepetitionFrequency) -> Self {
        let a = prf.rx_power_constant();
        let n = (raw.rx_pacc as i32 + N_ADJUSTMENT) as f32;
        let n_squared = n * n;

        let f1 = raw.fp_ampl1 as f32;
        let f2 = raw.fp_ampl2 as f32;
        let f3 = raw.fp_ampl3 as f32;
        let fpp_dbm = 10.0 * ((f1 * f1 + f2 * f2 + f3 * f3) / n_squared).log10() - a;

        let rxp_dbm = 10.0 * (raw.cir_power as f32 * 131072.0 / n_squared).log10() - a;

        Diagnostics {
            fpp_dbm,
            rxp_dbm,
            noise_std: raw.std_noise,
            skew: 0.0,
        }
    }
}

/// Clock skew from the carrier recovery integrator
///
/// `-(integrator * multiplier / f_c)`, where the multiplier depends on the
/// bitrate and `f_c` is the center frequency of the channel.
pub fn clock_skew(carrier_integrator: i32, config: &Config) -> f32 {
    let offset_hz = carrier_integrator as f64 * config.bitrate.freq_offset_multiplier();
    (-(offset_hz / config.channel.center_frequency_hz())) as f32
}

/// Reads and converts the diagnostics of the last reception
///
/// The skew estimate is only computed when `with_skew` is set.
pub fn read_diagnostics<R: Radio>(
    radio: &mut R,
    config: &Config,
    with_skew: bool,
) -> Result<Diagnostics, R::Error> {
    let raw = radio.rx_diagnostics()?;
    let mut diagnostics = Diagnostics::from_raw(&raw, config.pulse_repetition_frequency);
    if with_skew {
        diagnostics.skew = clock_skew(raw.carrier_integrator, config);
    }
    Ok(diagnostics)
}

/// The six timestamps of an exchange, truncated to 32 bits
///
/// `tx1`/`rx2`/`rx3` are taken by the initiator, `rx1`/`tx2`/`tx3` by the
/// responder. Single-sided exchanges leave `tx3` and `rx3` at zero.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timestamps {
    /// POLL transmitted by the initiator
    pub tx1: u32,
    /// POLL received by the responder
    pub rx1: u32,
    /// RESPONSE (or single-sided FINAL) transmitted by the responder
    pub tx2: u32,
    /// RESPONSE (or single-sided FINAL) received by the initiator
    pub rx2: u32,
    /// FINAL transmitted by the responder
    pub tx3: u32,
    /// FINAL received by the initiator
    pub rx3: u32,
}

impl Timestamps {
    /// Time of flight of a single-sided exchange, in device time units
    ///
    /// `(Ra - Db) / 2` with `Ra = rx2 - tx1` and `Db = tx2 - rx1`.
    pub fn single_sided_tof(&self) -> f64 {
        let round_a = self.rx2.wrapping_sub(self.tx1) as f64;
        let delay_b = self.tx2.wrapping_sub(self.rx1) as f64;
        (round_a - delay_b) / 2.0
    }

    /// Time of flight of a double-sided exchange, in device time units
    ///
    /// `(Ra1 * Db2 - Ra2 * Db1) / (Ra2 + Db2)`, see DW1000 User Manual section
    /// 12.3.2 for the derivation.
    pub fn double_sided_tof(&self) -> f64 {
        let round_a1 = self.rx2.wrapping_sub(self.tx1) as f64;
        let round_a2 = self.rx3.wrapping_sub(self.rx2) as f64;
        let delay_b1 = self.tx2.wrapping_sub(self.rx1) as f64;
        let delay_b2 = self.tx3.wrapping_sub(self.tx2) as f64;
        (round_a1 * delay_b2 - round_a2 * delay_b1) / (round_a2 + delay_b2)
    }

    /// Time of flight of the given exchange variant
    pub fn time_of_flight(&self, double_sided: bool) -> f64 {
        if double_sided {
            self.double_sided_tof()
        } else {
            self.single_sided_tof()
        }
    }
}

/// Converts a time of flight in device time units into metres
pub fn time_of_flight_to_distance(tof: f64) -> f64 {
    tof * DWT_TIME_UNITS * SPEED_OF_LIGHT
}
