#[cfg(feature = "defmt")]
use defmt::{debug, info};
use embedded_hal::delay::DelayNs;
#[cfg(not(feature = "defmt"))]
use log::{debug, info};

use super::{Error, PassiveReport, TwrEngine};
use crate::{
    frame::{self, FinalView, MessageType, PollView, FINAL_PREFIX_LEN, RESPONSE_PREFIX_LEN},
    host::{response, HostLink},
    radio::Radio,
    time::Instant,
};

impl<R, D, H> TwrEngine<R, D, H>
where
    R: Radio,
    D: DelayNs,
    H: HostLink,
{
    /// Follows an exchange between two other boards, never transmitting
    ///
    /// Reports the overheard exchange as `S02`. If a frame is missed, a
    /// double-sided exchange is still reported with its participants only,
    /// a single-sided one not at all.
    pub(crate) fn listen_passively(
        &mut self,
        poll: &PollView,
        poll_rx: Instant,
    ) -> Result<PassiveReport, Error<R::Error>> {
        let mut report = PassiveReport::new(
            poll.header.initiator,
            poll.header.target,
            poll.double_sided,
            poll.target_measures,
        );
        report.local_rx[0] = poll_rx;

        debug!(
            "following exchange from {} to {}",
            report.initiator, report.target
        );
        let result = self.with_radio_masked(|engine| engine.overhear(&mut report));

        match result {
            Ok(()) => {
                report.complete = true;
                info!(
                    "overheard exchange from {} to {}",
                    report.initiator, report.target
                );
                self.report(&response::passive_report(&report));
                Ok(report)
            }
            Err(error) => {
                debug!("lost foreign exchange: {}", error.reason());
                if report.double_sided {
                    self.report(&response::passive_report(&report));
                }
                Err(error)
            }
        }
    }

    fn overhear(&mut self, report: &mut PassiveReport) -> Result<(), Error<R::Error>> {
        let initiator = report.initiator;
        let target = report.target;

        self.radio
            .set_rx_timeout(self.twr.passive_rx_timeout_uus)
            .map_err(Error::Radio)?;
        self.radio
            .set_preamble_timeout(self.twr.preamble_timeout_pacs)
            .map_err(Error::Radio)?;

        if report.double_sided {
            self.radio.enable_rx().map_err(Error::Radio)?;
            let expected = frame::expected(MessageType::Response, initiator, target);
            let (_, rx) = self.await_frame(&expected, RESPONSE_PREFIX_LEN)?;
            report.local_rx[1] = rx;
        }

        let expected = frame::expected(MessageType::Final, initiator, target);

        self.radio.enable_rx().map_err(Error::Radio)?;
        let (received, rx) = self.await_frame(&expected, FINAL_PREFIX_LEN)?;
        report.local_rx[2] = rx;
        let view = FinalView::decode(&received)?;
        // The target's FINAL carries rx1, tx2 and, double-sided, tx3
        report.remote.rx1 = view.timestamps[0];
        report.remote.tx2 = view.timestamps[1];
        report.remote.tx3 = view.timestamps[2];
        report.target_diagnostics = Some(view.diagnostics);

        if report.target_measures {
            self.radio.enable_rx().map_err(Error::Radio)?;
            let (received, rx) = self.await_frame(&expected, FINAL_PREFIX_LEN)?;
            report.local_rx[3] = rx;
            let view = FinalView::decode(&received)?;
            // The initiator's FINAL carries tx1, rx2 and, double-sided, rx3
            report.remote.tx1 = view.timestamps[0];
            report.remote.rx2 = view.timestamps[1];
            report.remote.rx3 = view.timestamps[2];
            report.initiator_diagnostics = Some(view.diagnostics);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        diagnostics::Diagnostics,
        frame::{encode_final, encode_poll, encode_response, PollView},
        sim::fixtures::{engine, instant},
        twr::Error,
    };

    #[test]
    fn foreign_poll_is_ignored_when_disabled() {
        let mut engine = engine(7);

        let result = engine
            .respond(&encode_poll(0, 3, 5, false, false), instant(100))
            .unwrap();

        assert!(result.is_none());
        assert!(engine.radio().sent.is_empty());
        assert!(engine.radio().rx_enabled);
        assert!(engine.host().output.is_empty());
    }

    #[test]
    fn single_sided_exchange_is_reported() {
        let mut engine = engine(7);
        engine.set_passive_listening(true);
        let target_final =
            encode_final(0, 3, 5, &[instant(1000), instant(1600)], &Diagnostics::default())
                .unwrap();
        engine.radio_mut().push_frame(&target_final, 700);

        let report = engine
            .listen_passively(
                &PollView::decode(&encode_poll(0, 3, 5, false, false)).unwrap(),
                instant(100),
            )
            .unwrap();

        assert!(report.complete);
        assert_eq!(report.local_rx[0], instant(100));
        assert_eq!(report.local_rx[2], instant(700));
        assert_eq!(report.remote.rx1, 1000);
        assert_eq!(report.remote.tx2, 1600);
        assert!(engine.radio().sent.is_empty());
        assert_eq!(
            engine.host().lines(),
            ["S02|3|5|100|0|700|0|0|1000|1600|0|0|0|0.00|0.00|0|0e0"]
        );
    }

    #[test]
    fn target_measures_exchange_needs_second_final() {
        let mut engine = engine(7);
        engine.set_passive_listening(true);
        let target_final =
            encode_final(0, 3, 5, &[instant(1000), instant(1600)], &Diagnostics::default())
                .unwrap();
        let initiator_final =
            encode_final(1, 3, 5, &[instant(0), instant(1700)], &Diagnostics::default()).unwrap();
        engine.radio_mut().push_frame(&target_final, 700);
        engine.radio_mut().push_frame(&initiator_final, 900);

        engine
            .respond(&encode_poll(0, 3, 5, true, false), instant(100))
            .unwrap();

        let lines = engine.host().lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("S02|3|5|100|0|700|900|0|1000|1600|1700|0|0|"));
        assert!(engine.radio().sent.is_empty());
    }

    #[test]
    fn double_sided_exchange_is_reported() {
        let mut engine = engine(7);
        engine.set_passive_listening(true);
        let target_final = encode_final(
            1,
            3,
            5,
            &[instant(1), instant(2), instant(3)],
            &Diagnostics::default(),
        )
        .unwrap();
        let initiator_final = encode_final(
            2,
            3,
            5,
            &[instant(10), instant(20), instant(30)],
            &Diagnostics::default(),
        )
        .unwrap();
        engine.radio_mut().push_frame(&encode_response(0, 3, 5), 400);
        engine.radio_mut().push_frame(&target_final, 700);
        engine.radio_mut().push_frame(&initiator_final, 900);

        let report = engine
            .listen_passively(
                &PollView::decode(&encode_poll(0, 3, 5, true, true)).unwrap(),
                instant(100),
            )
            .unwrap();

        assert!(report.complete);
        assert_eq!(
            report.local_rx,
            [instant(100), instant(400), instant(700), instant(900)]
        );
        assert_eq!(report.remote.tx3, 3);
        assert_eq!(report.remote.rx3, 30);
        assert!(report.initiator_diagnostics.is_some());
        assert!(engine.radio().sent.is_empty());
        assert_eq!(
            engine.host().lines(),
            ["S02|3|5|100|400|700|900|10|1|2|20|3|30|0.00|0.00|0|0e0|0.00|0.00|0|0e0"]
        );
    }

    #[test]
    fn incomplete_single_sided_exchange_is_not_reported() {
        let mut engine = engine(7);
        engine.set_passive_listening(true);

        let result = engine.respond(&encode_poll(0, 3, 5, false, false), instant(100));

        assert!(matches!(result, Err(Error::Timeout)));
        assert!(engine.host().output.is_empty());
        assert!(engine.radio().rx_enabled);
        assert!(engine.radio().rx_interrupt);
    }

    #[test]
    fn incomplete_double_sided_exchange_names_participants() {
        let mut engine = engine(7);
        engine.set_passive_listening(true);
        engine.radio_mut().push_frame(&encode_response(0, 3, 5), 400);

        let result = engine.respond(&encode_poll(0, 3, 5, false, true), instant(100));

        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(engine.host().lines(), ["S02|3|5"]);
    }

    #[test]
    fn frame_of_other_exchange_aborts() {
        let mut engine = engine(7);
        engine.set_passive_listening(true);
        engine.radio_mut().push_frame(&encode_response(0, 3, 6), 400);

        let result = engine.respond(&encode_poll(0, 3, 5, false, true), instant(100));

        assert!(matches!(result, Err(Error::MalformedFrame(_))));
        assert_eq!(engine.host().lines(), ["S02|3|5"]);
    }
}
