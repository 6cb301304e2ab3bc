//! Lines sent to the host
//!
//! Every line is a tag (`R05`, `S01`, ...) followed by `|`-separated fields
//! and terminated by `\r\n`. Numbers are written in decimal ASCII. The only
//! binary field is the payload of relayed DATA frames, which is prefixed
//! with its length as `u16` little-endian.

use core::fmt::{self, Display, Write};

use heapless::Vec;

use crate::{
    diagnostics::{Diagnostics, Timestamps},
    twr::{PassiveReport, RangingResult},
};

/// Capacity of a single line
pub const LINE_CAPACITY: usize = 256;

/// Ends every line
pub const TERMINATOR: &[u8] = b"\r\n";

/// A line under construction
///
/// Writes past the capacity are dropped and counted, see
/// [`Line::required_len`].
#[derive(Debug, Clone)]
pub struct Line {
    bytes: Vec<u8, LINE_CAPACITY>,
    required_len: usize,
}

impl Line {
    /// Starts a line with the given tag
    pub fn new(tag: &str) -> Self {
        let mut line = Line {
            bytes: Vec::new(),
            required_len: 0,
        };
        line.push(tag.as_bytes());
        line
    }

    /// Starts a failure line: `Rnn|FAIL|<reason>`
    pub fn failure(command: u8, reason: &str) -> Self {
        let mut line = Line::response(command);
        line.field("FAIL").field(reason);
        line
    }

    /// Starts the response line of a command: `Rnn`
    pub fn response(command: u8) -> Self {
        let mut line = Line::new("R");
        line.write(format_args!("{:02}", command));
        line
    }

    /// Appends `|` and the displayed value
    pub fn field(&mut self, value: impl Display) -> &mut Self {
        self.push(b"|");
        self.write(format_args!("{}", value));
        self
    }

    /// Appends `|` and raw bytes
    pub fn field_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.push(b"|");
        self.push(bytes);
        self
    }

    /// Appends the line terminator
    pub fn end(&mut self) -> &mut Self {
        self.push(TERMINATOR);
        self
    }

    /// The bytes of the line, as far as they fit
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length the line would have without the capacity limit
    pub fn required_len(&self) -> usize {
        self.required_len
    }

    /// Whether some of the line was dropped
    pub fn overflowed(&self) -> bool {
        self.required_len > self.bytes.len()
    }

    fn push(&mut self, bytes: &[u8]) {
        if !self.overflowed() {
            // Past the capacity nothing is appended, `overflowed` reports it
            let _ = self.bytes.extend_from_slice(bytes);
        }
        self.required_len += bytes.len();
    }

    fn write(&mut self, args: fmt::Arguments) {
        let _ = self.write_fmt(args);
    }
}

impl Write for Line {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push(s.as_bytes());
        Ok(())
    }
}

fn diagnostics_fields(line: &mut Line, diagnostics: &Diagnostics) {
    line.field(format_args!("{:.2}", diagnostics.fpp_dbm))
        .field(format_args!("{:.2}", diagnostics.rxp_dbm))
        .field(diagnostics.noise_std)
        .field(format_args!("{:e}", diagnostics.skew));
}

fn timestamp_fields(line: &mut Line, ts: &Timestamps) {
    line.field(ts.tx1)
        .field(ts.rx1)
        .field(ts.tx2)
        .field(ts.rx2)
        .field(ts.tx3)
        .field(ts.rx3);
}

fn ranging_fields(line: &mut Line, result: &RangingResult) {
    line.field(result.neighbor)
        .field(format_args!("{:.4}", result.distance));
    timestamp_fields(line, &result.timestamps);
    diagnostics_fields(line, &result.local);
    diagnostics_fields(line, &result.peer);
    line.end();
}

/// `R05|neighbor|distance|tx1|rx1|tx2|rx2|tx3|rx3|<local diagnostics>|<peer diagnostics>`
pub fn ranging_response(result: &RangingResult) -> Line {
    let mut line = Line::response(5);
    ranging_fields(&mut line, result);
    line
}

/// `S01|initiator|distance|...`, sent by a target that measured the range too
pub fn target_report(result: &RangingResult) -> Line {
    let mut line = Line::new("S01");
    ranging_fields(&mut line, result);
    line
}

/// `S02|initiator|target|<local rx x4>|<remote timestamps x6>|<diagnostics of each FINAL>`
///
/// Incomplete exchanges are reported as `S02|initiator|target`.
pub fn passive_report(report: &PassiveReport) -> Line {
    let mut line = Line::new("S02");
    line.field(report.initiator).field(report.target);
    if report.complete {
        for rx in &report.local_rx {
            line.field(rx.value());
        }
        timestamp_fields(&mut line, &report.remote);
        for diagnostics in [&report.target_diagnostics, &report.initiator_diagnostics]
            .into_iter()
            .flatten()
        {
            diagnostics_fields(&mut line, diagnostics);
        }
    }
    line.end();
    line
}

/// `S05|<len u16 LE><payload>`
pub fn data_relay(payload: &[u8]) -> Line {
    let mut line = Line::new("S05");
    // Payloads come from frames, far below u16::MAX
    let len = payload.len() as u16;
    line.field_bytes(&len.to_le_bytes());
    line.push(payload);
    line.end();
    line
}
