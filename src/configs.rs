//! Configuration structs for the radio and the ranging engine
//!
//! [`Config`] describes the physical layer the radio is brought up with.
//! [`TwrConfig`] holds the board identity and the timing of the two-way
//! ranging exchanges. Both have defaults that work together out of the box.

#[cfg(feature = "defmt")]
use defmt::Format;

/// Radio configuration
///
/// Passed to [`Radio::configure`] when the engine is initialized. The ranging
/// code also reads it to pick the constants of the diagnostic formulas.
///
/// [`Radio::configure`]: crate::Radio::configure
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// UWB channel used in both directions.
    pub channel: UwbChannel,
    /// Pulse repetition frequency.
    pub pulse_repetition_frequency: PulseRepetitionFrequency,
    /// Preamble length of outgoing frames.
    pub preamble_length: PreambleLength,
    /// Preamble acquisition chunk size used by the receiver.
    pub pac_size: PacSize,
    /// Preamble code used for transmission.
    pub tx_preamble_code: u8,
    /// Preamble code the receiver scans for.
    pub rx_preamble_code: u8,
    /// Start-of-frame delimiter.
    pub sfd_sequence: SfdSequence,
    /// Data rate of the payload.
    pub bitrate: BitRate,
    /// SFD detection timeout, in symbols.
    ///
    /// Preamble length + 1 + SFD length - PAC size.
    pub sfd_timeout: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            channel: Default::default(),
            pulse_repetition_frequency: Default::default(),
            preamble_length: Default::default(),
            pac_size: Default::default(),
            tx_preamble_code: 9,
            rx_preamble_code: 9,
            sfd_sequence: Default::default(),
            bitrate: Default::default(),
            sfd_timeout: 129,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Payload data rate
pub enum BitRate {
    /// 110 kbps
    Kbps110 = 0b00,
    /// 850 kbps
    Kbps850 = 0b01,
    /// 6.8 Mbps
    Kbps6800 = 0b10,
}

impl Default for BitRate {
    fn default() -> Self {
        BitRate::Kbps6800
    }
}

impl BitRate {
    /// Converts a carrier recovery integrator reading into hertz
    ///
    /// F_S / 2 / N_samples / 2^17, the 110 kbps mode integrates over 8 times
    /// as many samples.
    pub fn freq_offset_multiplier(&self) -> f64 {
        match self {
            BitRate::Kbps110 => 998.4e6 / 2.0 / 8192.0 / 131072.0,
            BitRate::Kbps850 | BitRate::Kbps6800 => 998.4e6 / 2.0 / 1024.0 / 131072.0,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Pulse repetition frequency
pub enum PulseRepetitionFrequency {
    /// 16 MHz
    Mhz16 = 0b01,
    /// 64 MHz
    Mhz64 = 0b10,
}

impl Default for PulseRepetitionFrequency {
    fn default() -> Self {
        PulseRepetitionFrequency::Mhz64
    }
}

impl PulseRepetitionFrequency {
    /// The constant `A` subtracted in the received power formulas, in dB
    ///
    /// Values are taken from section 4.7 of the DW1000 User Manual.
    pub fn rx_power_constant(&self) -> f32 {
        match self {
            PulseRepetitionFrequency::Mhz16 => 113.77,
            PulseRepetitionFrequency::Mhz64 => 121.74,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Preamble length, in symbols
///
/// The receiver budget of an exchange grows with it: every frame spends at
/// least the preamble on air before its timestamp is taken.
pub enum PreambleLength {
    /// Only usable at 6.8 Mbps
    Symbols64 = 0b0001,
    /// Not usable at 110 kbps
    Symbols128 = 0b0101,
    Symbols256 = 0b1001,
    Symbols512 = 0b1101,
    Symbols1024 = 0b0010,
    /// Only usable at 110 kbps
    Symbols1536 = 0b0110,
    /// Only usable at 110 kbps
    Symbols2048 = 0b1010,
    /// Only usable at 110 kbps
    Symbols4096 = 0b0011,
}

impl Default for PreambleLength {
    fn default() -> Self {
        PreambleLength::Symbols128
    }
}

impl PreambleLength {
    /// Number of preamble symbols
    pub fn symbols(&self) -> u16 {
        match self {
            PreambleLength::Symbols64 => 64,
            PreambleLength::Symbols128 => 128,
            PreambleLength::Symbols256 => 256,
            PreambleLength::Symbols512 => 512,
            PreambleLength::Symbols1024 => 1024,
            PreambleLength::Symbols1536 => 1536,
            PreambleLength::Symbols2048 => 2048,
            PreambleLength::Symbols4096 => 4096,
        }
    }

    /// PAC size to pair with this preamble length
    pub fn recommended_pac_size(&self) -> PacSize {
        // DW1000 User Manual, table 6
        match self {
            PreambleLength::Symbols64 | PreambleLength::Symbols128 => PacSize::Symbols8,
            PreambleLength::Symbols256 | PreambleLength::Symbols512 => PacSize::Symbols16,
            PreambleLength::Symbols1024 => PacSize::Symbols32,
            _ => PacSize::Symbols64,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Preamble acquisition chunk size
///
/// The preamble timeout of [`TwrConfig`] is counted in multiples of this.
pub enum PacSize {
    /// 8 symbols
    Symbols8 = 0b00,
    /// 16 symbols
    Symbols16 = 0b01,
    /// 32 symbols
    Symbols32 = 0b10,
    /// 64 symbols
    Symbols64 = 0b11,
}

impl Default for PacSize {
    fn default() -> Self {
        PacSize::Symbols8
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Start-of-frame delimiter sequence
pub enum SfdSequence {
    /// IEEE 802.15.4 SFD, suited to 6.8 Mbps
    Ieee = 0b00,
    /// Decawave's longer SFD, suited to the lower data rates
    Decawave = 0b01,
}

impl Default for SfdSequence {
    fn default() -> Self {
        SfdSequence::Ieee
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// UWB channel
///
/// See [`UwbChannel::center_frequency_hz`] for the carrier. Channels 4 and 7
/// are the wide-band variants of channels 2 and 5.
pub enum UwbChannel {
    Channel1 = 1,
    Channel2 = 2,
    Channel3 = 3,
    Channel4 = 4,
    Channel5 = 5,
    Channel7 = 7,
}

impl Default for UwbChannel {
    fn default() -> Self {
        UwbChannel::Channel2
    }
}

impl UwbChannel {
    /// Center frequency of the channel, in hertz
    pub fn center_frequency_hz(&self) -> f64 {
        match self {
            UwbChannel::Channel1 => 3494.4e6,
            UwbChannel::Channel2 | UwbChannel::Channel4 => 3993.6e6,
            UwbChannel::Channel3 => 4492.8e6,
            UwbChannel::Channel5 | UwbChannel::Channel7 => 6489.6e6,
        }
    }
}

/// Ranging engine configuration
///
/// All delays and timeouts are in UWB microseconds (1 UUS = 512/499.2 µs).
/// A timeout of zero disables the corresponding radio timeout.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TwrConfig {
    /// Identity of this board in every frame it sends or answers.
    pub board_id: u8,
    /// Initiator: delay between the end of the POLL and the receiver turning
    /// on for the answer.
    pub poll_tx_to_resp_rx_delay_uus: u32,
    /// Initiator: how long to wait for the RESPONSE (or the FINAL of a
    /// single-sided exchange).
    pub resp_rx_timeout_uus: u32,
    /// Single-sided responder: delay from the POLL reception to the FINAL
    /// transmission.
    pub poll_rx_to_final_tx_delay_uus: u32,
    /// Double-sided responder: delay from the RESPONSE transmission to the
    /// FINAL transmission.
    pub resp_tx_to_final_tx_delay_uus: u32,
    /// Delay between the end of a FINAL and the receiver turning on for the
    /// FINAL of the other side.
    pub final_tx_to_final_rx_delay_uus: u32,
    /// How long to wait for a FINAL.
    pub final_rx_timeout_uus: u32,
    /// How long a passive listener waits for each frame of an exchange.
    pub passive_rx_timeout_uus: u32,
    /// Preamble detection timeout, in multiples of the PAC size.
    pub preamble_timeout_pacs: u16,
    /// TX antenna delay, in device time units.
    pub tx_antenna_delay: u16,
    /// RX antenna delay, in device time units.
    pub rx_antenna_delay: u16,
    /// Number of status polls before a wait gives up.
    pub max_polls: u32,
    /// Pause between two status polls, in microseconds.
    pub poll_interval_us: u32,
    /// How many times a ranging command is attempted in total, at least once.
    pub max_attempts: u8,
    /// Stream the channel impulse response after each initiated exchange.
    pub output_cir: bool,
}

impl Default for TwrConfig {
    fn default() -> Self {
        TwrConfig {
            board_id: 0,
            poll_tx_to_resp_rx_delay_uus: 150,
            resp_rx_timeout_uus: 2000,
            poll_rx_to_final_tx_delay_uus: 450,
            resp_tx_to_final_tx_delay_uus: 500,
            final_tx_to_final_rx_delay_uus: 40,
            final_rx_timeout_uus: 600,
            passive_rx_timeout_uus: 2000,
            preamble_timeout_pacs: 8,
            tx_antenna_delay: 16436,
            rx_antenna_delay: 16436,
            max_polls: 10_000,
            poll_interval_us: 10,
            max_attempts: 10,
            output_cir: false,
        }
    }
}

impl TwrConfig {
    /// Returns the default configuration for the given board
    pub fn for_board(board_id: u8) -> Self {
        TwrConfig {
            board_id,
            ..Default::default()
        }
    }
}
