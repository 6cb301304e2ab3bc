#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{
    diagnostics::{Diagnostics, Timestamps},
    time::Instant,
};

/// The part this board played in an exchange
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Role {
    /// Sent the POLL
    Initiator,
    /// Answered the POLL
    Responder,
}

/// Outcome of a successful exchange
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RangingResult {
    /// The other participant
    pub neighbor: u8,
    /// Our part in the exchange
    pub role: Role,
    /// Whether the exchange was double-sided
    pub double_sided: bool,
    /// Time of flight, in device time units
    pub tof: f64,
    /// Distance, in metres
    pub distance: f64,
    /// The timestamps the time of flight was computed from
    pub timestamps: Timestamps,
    /// Our reception of the last frame of the other side
    pub local: Diagnostics,
    /// The other side's reception, as embedded in its FINAL
    pub peer: Diagnostics,
}

/// An exchange between two other boards, as overheard
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PassiveReport {
    /// Sender of the POLL
    pub initiator: u8,
    /// Addressee of the POLL
    pub target: u8,
    /// Whether the exchange was double-sided
    pub double_sided: bool,
    /// Whether the target was asked to measure too
    pub target_measures: bool,
    /// Local reception of POLL, RESPONSE, FINAL and second FINAL
    ///
    /// Frames the exchange does not contain stay at zero.
    pub local_rx: [Instant; 4],
    /// Timestamps embedded in the overheard FINAL frames
    pub remote: Timestamps,
    /// Diagnostics embedded in the target's FINAL
    pub target_diagnostics: Option<Diagnostics>,
    /// Diagnostics embedded in the initiator's FINAL
    pub initiator_diagnostics: Option<Diagnostics>,
    /// Whether every expected frame was overheard
    pub complete: bool,
}

impl PassiveReport {
    /// An empty report for the exchange a POLL announced
    pub fn new(initiator: u8, target: u8, double_sided: bool, target_measures: bool) -> Self {
        PassiveReport {
            initiator,
            target,
            double_sided,
            target_measures,
            local_rx: [Instant::default(); 4],
            remote: Timestamps::default(),
            target_diagnostics: None,
            initiator_diagnostics: None,
            complete: false,
        }
    }
}
