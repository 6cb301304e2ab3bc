//! Execution of host commands against the engine

#[cfg(feature = "defmt")]
use defmt::{debug, warn};
use embedded_hal::delay::DelayNs;
#[cfg(not(feature = "defmt"))]
use log::{debug, warn};

use super::{
    command::{Command, ParseError},
    response::{self, Line},
    HostLink,
};
use crate::{
    frame::MAX_FRAME_LEN,
    radio::Radio,
    twr::{Error, RangingResult, TwrEngine, DW1000_DEVICE_ID},
};

/// Executes a command and answers it on the host link
///
/// Failures are answered with `Rnn|FAIL|<reason>` and returned as well.
/// Ranging is attempted again on transient failures, for at most
/// [`TwrConfig::max_attempts`] attempts in total.
///
/// [`TwrConfig::max_attempts`]: crate::TwrConfig::max_attempts
pub fn execute<R, D, H>(
    engine: &mut TwrEngine<R, D, H>,
    command: &Command,
) -> Result<(), Error<R::Error>>
where
    R: Radio,
    D: DelayNs,
    H: HostLink,
{
    let number = command.number();
    let result = run(engine, command);

    if let Err(error) = &result {
        warn!("command {} failed: {}", number, error.reason());
        let mut line = Line::failure(number, error.reason());
        line.end();
        if engine.emit(&line).is_err() {
            warn!("host link full, failure of command {} lost", number);
        }
    }
    result
}

fn run<R, D, H>(engine: &mut TwrEngine<R, D, H>, command: &Command) -> Result<(), Error<R::Error>>
where
    R: Radio,
    D: DelayNs,
    H: HostLink,
{
    let mut line = Line::response(command.number());

    match *command {
        Command::Idle => engine.idle()?,
        Command::GetId => {
            line.field(engine.board_id());
        }
        Command::Reset => engine.reset()?,
        Command::SelfTest => {
            let id = engine.self_test()?;
            if id != DW1000_DEVICE_ID {
                let mut line = Line::failure(command.number(), "device-id");
                line.field(format_args!("{:x}", id)).end();
                return engine.emit(&line);
            }
            line.field(format_args!("{:x}", id));
        }
        Command::SetPassive(enabled) => {
            engine.set_passive_listening(enabled);
            line.field(enabled as u8);
        }
        Command::Range {
            target,
            target_measures,
            double_sided,
        } => {
            let result = range(engine, target, target_measures, double_sided)?;
            engine.emit(&response::ranging_response(&result))?;
            if engine.twr_config().output_cir {
                // The range is already answered, the dump is only a report
                if let Err(error) = engine.report_cir() {
                    warn!("impulse response not sent: {}", error.reason());
                }
            }
            return Ok(());
        }
        Command::Broadcast(payload) => engine.broadcast(payload)?,
        Command::MaxFrameLen => {
            line.field(MAX_FRAME_LEN);
        }
    }

    line.end();
    engine.emit(&line)
}

fn range<R, D, H>(
    engine: &mut TwrEngine<R, D, H>,
    target: u8,
    target_measures: bool,
    double_sided: bool,
) -> Result<RangingResult, Error<R::Error>>
where
    R: Radio,
    D: DelayNs,
    H: HostLink,
{
    let attempts = engine.twr_config().max_attempts.max(1) as u32;
    let mut attempt = 1;
    loop {
        match engine.initiate(target, target_measures, double_sided) {
            Err(error) if error.is_transient() && attempt < attempts => {
                debug!(
                    "attempt {} of {} failed: {}",
                    attempt,
                    attempts,
                    error.reason()
                );
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Decodes and executes every complete command at the start of `input`
///
/// Returns how many bytes were used. The rest, an incomplete command, should
/// be kept and passed again once more bytes arrived. Malformed commands are
/// answered with a failure line when their number is known, and skipped up
/// to the next line break.
pub fn handle<R, D, H>(engine: &mut TwrEngine<R, D, H>, input: &[u8]) -> usize
where
    R: Radio,
    D: DelayNs,
    H: HostLink,
{
    let mut consumed = 0;

    while consumed < input.len() {
        let rest = &input[consumed..];
        match Command::parse(rest) {
            Ok((command, len)) => {
                debug!("command {}", command.number());
                // Failures are already answered on the link
                let _ = execute(engine, &command);
                consumed += len;
            }
            Err(ParseError::Incomplete) => break,
            Err(error) => {
                warn!("dropping malformed command: {}", error.reason());
                if let Some(number) = error.command() {
                    let mut line = Line::failure(number, error.reason());
                    line.end();
                    engine.report(&line);
                }
                consumed += skip_line(rest);
            }
        }
    }

    consumed
}

/// Length of the line at the start of `input`, up to and including the line
/// break that ends it
fn skip_line(input: &[u8]) -> usize {
    // Skip the leading line breaks the parser skipped as well
    let start = input
        .iter()
        .position(|b| *b != b'\r' && *b != b'\n')
        .unwrap_or(input.len());
    input[start..]
        .iter()
        .position(|b| *b == b'\r' || *b == b'\n')
        .map_or(input.len(), |end| start + end + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cir::CIR_LEN,
        configs::TwrConfig,
        diagnostics::Diagnostics,
        frame::{encode_final, MessageType},
        sim::{
            fixtures::{engine, engine_with, instant, TestEngine},
            VecLink,
        },
    };

    fn push_reply(engine: &mut TestEngine) {
        engine.radio_mut().tx_times.push_back(0);
        let reply = encode_final(
            0,
            3,
            5,
            &[instant(1000), instant(1600)],
            &Diagnostics::default(),
        )
        .unwrap();
        engine.radio_mut().push_frame(&reply, 1700);
    }

    #[test]
    fn simple_commands() {
        let mut engine = engine(3);

        let consumed = handle(&mut engine, b"C00\r\nC01\r\nC04|1\r\nC07\r\n");

        assert_eq!(consumed, 22);
        assert_eq!(
            engine.host().lines(),
            ["R00", "R01|3", "R04|1", "R07|127"]
        );
        assert!(engine.passive_listening());
    }

    #[test]
    fn ranging_end_to_end() {
        let mut engine = engine(3);
        push_reply(&mut engine);

        handle(&mut engine, b"C05|5|0|0\r\n");

        let lines = engine.host().lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("R05|5|2.5797|0|1000|1600|1700|0|0|-96.97|"));
        assert!(lines[0].ends_with("|0.00|0.00|0|0e0"));
    }

    #[test]
    fn ranging_is_retried_on_transient_failure() {
        let mut engine = engine(3);
        engine.radio_mut().tx_times.push_back(0);
        engine.radio_mut().push_rx_error();
        push_reply(&mut engine);

        let command = Command::Range {
            target: 5,
            target_measures: false,
            double_sided: false,
        };
        execute(&mut engine, &command).unwrap();

        assert_eq!(engine.radio().sent.len(), 2);
        let lines = engine.host().lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("R05|5|2.5797|"));
    }

    #[test]
    fn ranging_gives_up_after_max_attempts() {
        let mut engine = engine(3);

        handle(&mut engine, b"C05|5|0|1\r\n");

        assert_eq!(engine.radio().sent.len(), 10);
        assert!(engine
            .radio()
            .sent
            .iter()
            .all(|sent| sent.data[2] == MessageType::Poll as u8));
        assert_eq!(engine.host().lines(), ["R05|FAIL|timeout"]);
        assert!(engine.radio().rx_enabled);
    }

    #[test]
    fn ranging_with_itself_is_not_retried() {
        let mut engine = engine(3);

        handle(&mut engine, b"C05|3|0|0\r\n");

        assert!(engine.radio().sent.is_empty());
        assert_eq!(engine.host().lines(), ["R05|FAIL|identity-conflict"]);
    }

    #[test]
    fn ranging_streams_cir_when_enabled() {
        let mut engine = engine_with(TwrConfig {
            output_cir: true,
            ..TwrConfig::for_board(3)
        });
        push_reply(&mut engine);

        handle(&mut engine, b"C05|5|0|0\r\n");

        let lines = engine.host().lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("R05|5|"));
        assert!(lines[1].starts_with("R10|"));
        assert_eq!(lines[1].matches('|').count(), CIR_LEN);
    }

    #[test]
    fn impulse_response_too_large_for_link_is_dropped() {
        let mut engine = engine_with(TwrConfig {
            output_cir: true,
            ..TwrConfig::for_board(3)
        });
        *engine.host_mut() = VecLink::with_capacity(402);
        push_reply(&mut engine);

        let command = Command::Range {
            target: 5,
            target_measures: false,
            double_sided: false,
        };
        assert!(execute(&mut engine, &command).is_ok());

        let lines = engine.host().lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("R05|5|2.5797|"));
        assert!(engine.host().output.ends_with(b"\r\n"));
    }

    #[test]
    fn zero_attempt_budget_still_ranges_once() {
        let mut engine = engine_with(TwrConfig {
            max_attempts: 0,
            ..TwrConfig::for_board(3)
        });

        handle(&mut engine, b"C05|5|0|0\r\n");

        assert_eq!(engine.radio().sent.len(), 1);
        assert_eq!(engine.host().lines(), ["R05|FAIL|timeout"]);
    }

    #[test]
    fn self_test_reports_device_id() {
        let mut engine = engine(3);

        handle(&mut engine, b"C03\r\n");
        engine.radio_mut().device_id = 0x1234;
        handle(&mut engine, b"C03\r\n");

        assert_eq!(
            engine.host().lines(),
            ["R03|deca0130", "R03|FAIL|device-id|1234"]
        );
    }

    #[test]
    fn broadcast_and_reset() {
        let mut engine = engine(3);
        engine.set_passive_listening(true);

        handle(&mut engine, b"C06|\x02\x00hi\r\nC02\r\n");

        assert_eq!(engine.radio().sent[0].data, b"\x41\x88\x0d\x00\x03\xffhi");
        assert_eq!(engine.host().lines(), ["R06", "R02"]);
        assert!(!engine.passive_listening());
    }

    #[test]
    fn incomplete_command_is_kept() {
        let mut engine = engine(3);

        let consumed = handle(&mut engine, b"C01\r\nC05|5|");

        assert_eq!(consumed, 5);
        assert_eq!(engine.host().lines(), ["R01|3"]);
    }

    #[test]
    fn malformed_commands_are_skipped() {
        let mut engine = engine(3);

        let consumed = handle(&mut engine, b"C42\r\nhello\r\nC04|x\r\nC01\r\n");

        assert_eq!(consumed, 24);
        assert_eq!(
            engine.host().lines(),
            ["R42|FAIL|unknown-command", "R04|FAIL|bad-field", "R01|3"]
        );
    }
}
