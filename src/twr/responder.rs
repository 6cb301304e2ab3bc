#[cfg(feature = "defmt")]
use defmt::{debug, info, warn};
use embedded_hal::delay::DelayNs;
#[cfg(not(feature = "defmt"))]
use log::{debug, info, warn};

use super::{Error, RangingResult, Role, TwrEngine};
use crate::{
    diagnostics::{read_diagnostics, time_of_flight_to_distance, Timestamps},
    frame::{
        self, FinalView, FrameError, MessageType, PollView, FINAL_PREFIX_LEN, POLL_PREFIX_LEN,
    },
    host::{response, HostLink},
    radio::{Radio, SendTime},
    time::{Duration, Instant},
};

impl<R, D, H> TwrEngine<R, D, H>
where
    R: Radio,
    D: DelayNs,
    H: HostLink,
{
    /// Answers a received POLL
    ///
    /// POLLs addressed to other boards are followed passively when passive
    /// listening is enabled, and ignored otherwise. Returns the result of the
    /// exchange if the initiator asked us to measure too.
    pub(crate) fn respond(
        &mut self,
        poll: &[u8],
        poll_rx: Instant,
    ) -> Result<Option<RangingResult>, Error<R::Error>> {
        let header = frame::decode_header(poll)?;
        let me = self.twr.board_id;
        let initiator = header.initiator;

        if initiator == me {
            warn!("received a POLL carrying our own ID");
            return Err(Error::IdentityConflict);
        }

        if header.target != me {
            if self.passive_listening {
                self.listen_passively(&PollView::decode(poll)?, poll_rx)?;
            } else {
                debug!("ignoring POLL from {} to {}", initiator, header.target);
            }
            return Ok(None);
        }

        let expected = frame::expected(MessageType::Poll, initiator, me);
        if !frame::matches_expected(poll, &expected, POLL_PREFIX_LEN) {
            debug!("frame from {} is not a POLL", initiator);
            return Err(Error::MalformedFrame(FrameError::Mismatch));
        }
        let view = PollView::decode(poll)?;

        debug!(
            "answering POLL from {} (double-sided: {})",
            initiator, view.double_sided
        );
        let result = self.with_radio_masked(|engine| engine.run_responder(&view, poll_rx))?;

        if let Some(result) = &result {
            info!("distance to {}: {} m", initiator, result.distance);
            self.report(&response::target_report(result));
        }
        Ok(result)
    }

    fn run_responder(
        &mut self,
        poll: &PollView,
        rx1: Instant,
    ) -> Result<Option<RangingResult>, Error<R::Error>> {
        let me = self.twr.board_id;
        let initiator = poll.header.initiator;
        let antenna_delay = Duration::from_device_units(self.twr.tx_antenna_delay.into());

        // Diagnostics of the POLL reception travel in our FINAL
        let poll_diagnostics = read_diagnostics(&mut self.radio, &self.config, poll.double_sided)
            .map_err(Error::Radio)?;

        self.radio
            .set_rx_after_tx_delay(self.twr.final_tx_to_final_rx_delay_uus)
            .map_err(Error::Radio)?;
        self.radio
            .set_rx_timeout(self.twr.final_rx_timeout_uus)
            .map_err(Error::Radio)?;
        self.radio
            .set_preamble_timeout(self.twr.preamble_timeout_pacs)
            .map_err(Error::Radio)?;

        let (final_at, own, count) = if poll.double_sided {
            let seq = self.next_seq();
            let response = frame::encode_response(seq, initiator, me);
            self.transmit(&response, SendTime::Now, false)?;
            self.wait_tx()?;
            let tx2 = self.capture_tx_timestamp()?;

            let final_at = (tx2 + Duration::from_uus(self.twr.resp_tx_to_final_tx_delay_uus))
                .delayed_tx_rounded();
            let tx3 = final_at + antenna_delay;
            (final_at, [rx1, tx2, tx3], 3)
        } else {
            let final_at = (rx1 + Duration::from_uus(self.twr.poll_rx_to_final_tx_delay_uus))
                .delayed_tx_rounded();
            let tx2 = final_at + antenna_delay;
            (final_at, [rx1, tx2, tx2], 2)
        };

        let seq = self.next_seq();
        let own_final =
            frame::encode_final(seq, initiator, me, &own[..count], &poll_diagnostics)?;
        self.transmit(
            &own_final,
            SendTime::Delayed(final_at),
            poll.target_measures,
        )?;
        self.wait_tx()?;

        if !poll.target_measures {
            return Ok(None);
        }

        let expected = frame::expected(MessageType::Final, initiator, me);
        let (received, _) = self.await_frame(&expected, FINAL_PREFIX_LEN)?;
        let local = read_diagnostics(&mut self.radio, &self.config, poll.double_sided)
            .map_err(Error::Radio)?;
        let view = FinalView::decode(&received)?;

        let [rx1, tx2, tx3] = own;
        let timestamps = Timestamps {
            tx1: view.timestamps[0],
            rx1: rx1.truncated(),
            tx2: tx2.truncated(),
            rx2: view.timestamps[1],
            tx3: if poll.double_sided { tx3.truncated() } else { 0 },
            rx3: view.timestamps[2],
        };

        let tof = timestamps.time_of_flight(poll.double_sided);
        let distance = time_of_flight_to_distance(tof);
        if !(distance >= 0.0) {
            warn!("invalid distance to {}: {} m", initiator, distance);
            return Err(Error::NegativeDistance);
        }

        Ok(Some(RangingResult {
            neighbor: initiator,
            role: Role::Responder,
            double_sided: poll.double_sided,
            tof,
            distance,
            timestamps,
            local,
            peer: view.diagnostics,
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        diagnostics::Diagnostics,
        frame::{encode_final, encode_poll, FinalView, FrameError, MessageType},
        radio::SendTime,
        sim::fixtures::{engine, instant},
        time::Duration,
        twr::{Error, Role},
    };

    #[test]
    fn single_sided_final_is_scheduled() {
        let mut engine = engine(5);
        let rx1 = instant(1_000_000);

        let result = engine
            .respond(&encode_poll(0, 3, 5, false, false), rx1)
            .unwrap();
        assert!(result.is_none());

        let sent = &engine.radio().sent;
        assert_eq!(sent.len(), 1);

        let delay = Duration::from_uus(engine.twr_config().poll_rx_to_final_tx_delay_uus);
        let final_at = (rx1 + delay).delayed_tx_rounded();
        assert_eq!(sent[0].send_time, SendTime::Delayed(final_at));

        let view = FinalView::decode(&sent[0].data).unwrap();
        assert_eq!(view.header.message_type, MessageType::Final);
        assert_eq!(view.header.initiator, 3);
        assert_eq!(view.header.target, 5);
        assert_eq!(
            view.timestamps,
            [
                rx1.truncated(),
                final_at.truncated() + engine.twr_config().tx_antenna_delay as u32,
                0
            ]
        );
        assert!(engine.host().output.is_empty());
        assert!(engine.radio().rx_enabled);
    }

    #[test]
    fn double_sided_sends_response_first() {
        let mut engine = engine(5);
        engine.radio_mut().tx_times.push_back(2_000_000);
        let rx1 = instant(1_000_000);

        engine
            .respond(&encode_poll(4, 3, 5, false, true), rx1)
            .unwrap();

        let sent = &engine.radio().sent;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].data, b"\x41\x88\x0b\x00\x03\x05");
        assert_eq!(sent[0].send_time, SendTime::Now);

        let view = FinalView::decode(&sent[1].data).unwrap();
        let delay = Duration::from_uus(engine.twr_config().resp_tx_to_final_tx_delay_uus);
        let final_at = (instant(2_000_000) + delay).delayed_tx_rounded();
        let antenna_delay = engine.twr_config().tx_antenna_delay as u32;
        assert_eq!(sent[1].send_time, SendTime::Delayed(final_at));
        assert_eq!(
            view.timestamps,
            [1_000_000, 2_000_000, final_at.truncated() + antenna_delay]
        );
        assert_eq!(view.header.seq, 1);
    }

    #[test]
    fn target_measures_reports_range() {
        let mut engine = engine(5);
        let rx1 = instant(1_000_000);
        let delay = Duration::from_uus(engine.twr_config().poll_rx_to_final_tx_delay_uus);
        let tx2 = (rx1 + delay).delayed_tx_rounded()
            + Duration::from_device_units(engine.twr_config().tx_antenna_delay.into());
        // Initiator clock: tx1 = 0, reply delay plus 2 * 1000 units of flight
        let rx2 = tx2.duration_since(rx1).value() + 2000;
        let initiator_final = encode_final(
            1,
            3,
            5,
            &[instant(0), instant(rx2)],
            &Diagnostics::default(),
        )
        .unwrap();
        engine.radio_mut().push_frame(&initiator_final, 9_000_000);

        let result = engine
            .respond(&encode_poll(0, 3, 5, true, false), rx1)
            .unwrap()
            .unwrap();

        assert_eq!(result.role, Role::Responder);
        assert_eq!(result.neighbor, 3);
        assert_eq!(result.tof, 1000.0);
        assert!(engine.radio().sent[0].response_expected);

        let output = engine.host().lines();
        assert_eq!(output.len(), 1);
        assert!(output[0].starts_with("S01|3|4.6903|0|1000000|"));
    }

    #[test]
    fn double_sided_target_measures_reports_range() {
        let mut engine = engine(5);
        let rx1 = instant(1_000_000);
        let tx2 = instant(2_000_000);
        engine.radio_mut().tx_times.push_back(tx2.value());
        let delay = Duration::from_uus(engine.twr_config().resp_tx_to_final_tx_delay_uus);
        let tx3 = (tx2 + delay).delayed_tx_rounded()
            + Duration::from_device_units(engine.twr_config().tx_antenna_delay.into());
        // Initiator clock: tx1 = 0, 1000 units of flight each way, no drift
        let rx2 = tx2.duration_since(rx1).value() + 2000;
        let rx3 = rx2 + tx3.duration_since(tx2).value();
        let initiator_final = encode_final(
            2,
            3,
            5,
            &[instant(0), instant(rx2), instant(rx3)],
            &Diagnostics::default(),
        )
        .unwrap();
        engine.radio_mut().push_frame(&initiator_final, 40_000_000);

        let result = engine
            .respond(&encode_poll(0, 3, 5, true, true), rx1)
            .unwrap()
            .unwrap();

        assert!(result.double_sided);
        assert_eq!(result.tof, 1000.0);
        assert_eq!(result.timestamps.tx2, tx2.truncated());
        assert_eq!(result.timestamps.tx3, tx3.truncated());
        assert_eq!(result.timestamps.rx3, rx3 as u32);

        let sent = &engine.radio().sent;
        assert_eq!(sent.len(), 2);
        assert!(!sent[0].response_expected);
        assert!(sent[1].response_expected);
        assert!(engine.host().lines()[0].starts_with("S01|3|4.6903|"));
    }

    #[test]
    fn frame_other_than_poll_is_rejected() {
        let mut engine = engine(5);
        let stray_final =
            encode_final(0, 3, 5, &[instant(1), instant(2)], &Diagnostics::default()).unwrap();

        let result = engine.respond(&stray_final, instant(1000));

        assert!(matches!(
            result,
            Err(Error::MalformedFrame(FrameError::Mismatch))
        ));
        assert!(engine.radio().sent.is_empty());
    }

    #[test]
    fn missing_initiator_final_times_out() {
        let mut engine = engine(5);
        let resets = engine.radio().rx_resets;

        let result = engine.respond(&encode_poll(0, 3, 5, true, true), instant(1000));

        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(engine.radio().rx_resets, resets + 1);
        assert!(engine.radio().rx_enabled);
        assert!(engine.radio().rx_interrupt);
        assert!(engine.host().output.is_empty());
    }

    #[test]
    fn poll_with_own_id_is_dropped() {
        let mut engine = engine(5);

        let result = engine.respond(&encode_poll(0, 5, 3, false, false), instant(1000));

        assert!(matches!(result, Err(Error::IdentityConflict)));
        assert!(engine.radio().sent.is_empty());
    }

    #[test]
    fn late_final_fails() {
        let mut engine = engine(5);
        engine.radio_mut().late_delayed_tx = true;

        let result = engine.respond(&encode_poll(0, 3, 5, false, false), instant(1000));

        assert!(matches!(result, Err(Error::TxStartFailed)));
        assert!(engine.radio().rx_enabled);
    }
}
