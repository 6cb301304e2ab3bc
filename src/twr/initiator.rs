#[cfg(feature = "defmt")]
use defmt::{debug, info, warn};
use embedded_hal::delay::DelayNs;
#[cfg(not(feature = "defmt"))]
use log::{debug, info, warn};

use super::{Error, RangingResult, Role, TwrEngine};
use crate::{
    diagnostics::{read_diagnostics, time_of_flight_to_distance, Timestamps},
    frame::{self, FinalView, MessageType, FINAL_PREFIX_LEN, RESPONSE_PREFIX_LEN},
    host::HostLink,
    radio::{Radio, SendTime},
};

impl<R, D, H> TwrEngine<R, D, H>
where
    R: Radio,
    D: DelayNs,
    H: HostLink,
{
    /// Ranges with `target`
    ///
    /// Sends a POLL and waits for the target's FINAL, preceded by a RESPONSE
    /// if `double_sided`. With `target_measures`, our own FINAL is sent back
    /// so that the target can compute the distance as well.
    ///
    /// Fails with [`Error::IdentityConflict`] without transmitting anything
    /// if `target` is this board.
    pub fn initiate(
        &mut self,
        target: u8,
        target_measures: bool,
        double_sided: bool,
    ) -> Result<RangingResult, Error<R::Error>> {
        if target == self.twr.board_id {
            warn!("refusing to range with ourselves");
            return Err(Error::IdentityConflict);
        }

        debug!(
            "ranging with {} (double-sided: {}, target measures: {})",
            target, double_sided, target_measures
        );
        let result = self.with_radio_masked(|engine| {
            engine.run_initiator(target, target_measures, double_sided)
        });

        match &result {
            Ok(result) => info!("distance to {}: {} m", target, result.distance),
            Err(error) => debug!("ranging with {} failed: {}", target, error.reason()),
        }
        result
    }

    fn run_initiator(
        &mut self,
        target: u8,
        target_measures: bool,
        double_sided: bool,
    ) -> Result<RangingResult, Error<R::Error>> {
        let me = self.twr.board_id;
        self.radio
            .set_rx_after_tx_delay(self.twr.poll_tx_to_resp_rx_delay_uus)
            .map_err(Error::Radio)?;
        self.radio
            .set_rx_timeout(self.twr.resp_rx_timeout_uus)
            .map_err(Error::Radio)?;
        self.radio
            .set_preamble_timeout(self.twr.preamble_timeout_pacs)
            .map_err(Error::Radio)?;

        let seq = self.next_seq();
        let poll = frame::encode_poll(seq, me, target, target_measures, double_sided);
        self.transmit(&poll, SendTime::Now, true)?;

        let expected_final = frame::expected(MessageType::Final, me, target);

        let (timestamps, peer, local, own) = if double_sided {
            let expected = frame::expected(MessageType::Response, me, target);
            let (_, rx2) = self.await_frame(&expected, RESPONSE_PREFIX_LEN)?;
            let tx1 = self.capture_tx_timestamp()?;

            self.radio
                .set_rx_timeout(self.twr.final_rx_timeout_uus)
                .map_err(Error::Radio)?;
            self.radio.enable_rx().map_err(Error::Radio)?;

            let (received, rx3) = self.await_frame(&expected_final, FINAL_PREFIX_LEN)?;
            let local = read_diagnostics(&mut self.radio, &self.config, true)
                .map_err(Error::Radio)?;
            let view = FinalView::decode(&received)?;

            let [rx1, tx2, tx3] = view.timestamps;
            let timestamps = Timestamps {
                tx1: tx1.truncated(),
                rx1,
                tx2,
                rx2: rx2.truncated(),
                tx3,
                rx3: rx3.truncated(),
            };
            (timestamps, view.diagnostics, local, [tx1, rx2, rx3])
        } else {
            let (received, rx2) = self.await_frame(&expected_final, FINAL_PREFIX_LEN)?;
            let tx1 = self.capture_tx_timestamp()?;
            let local = read_diagnostics(&mut self.radio, &self.config, false)
                .map_err(Error::Radio)?;
            let view = FinalView::decode(&received)?;

            let timestamps = Timestamps {
                tx1: tx1.truncated(),
                rx1: view.timestamps[0],
                tx2: view.timestamps[1],
                rx2: rx2.truncated(),
                ..Default::default()
            };
            (timestamps, view.diagnostics, local, [tx1, rx2, rx2])
        };

        if target_measures {
            let count = if double_sided { 3 } else { 2 };
            let seq = self.next_seq();
            let own_final = frame::encode_final(seq, me, target, &own[..count], &local)?;
            self.transmit(&own_final, SendTime::Now, false)?;
            self.wait_tx()?;
        }

        let tof = timestamps.time_of_flight(double_sided);
        let distance = time_of_flight_to_distance(tof);
        if !(distance >= 0.0) {
            warn!("invalid distance to {}: {} m", target, distance);
            return Err(Error::NegativeDistance);
        }

        Ok(RangingResult {
            neighbor: target,
            role: Role::Initiator,
            double_sided,
            tof,
            distance,
            timestamps,
            local,
            peer,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        diagnostics::Diagnostics,
        frame::{encode_final, encode_poll, encode_response, FinalView},
        sim::fixtures::{engine, instant},
        twr::{Error, Role},
    };

    fn peer_diagnostics() -> Diagnostics {
        Diagnostics {
            fpp_dbm: -85.0,
            rxp_dbm: -82.0,
            noise_std: 20,
            skew: 2e-6,
        }
    }

    #[test]
    fn single_sided_exchange() {
        let mut engine = engine(3);
        engine.radio_mut().tx_times.push_back(0);
        let reply = encode_final(0, 3, 5, &[instant(1000), instant(1600)], &peer_diagnostics())
            .unwrap();
        engine.radio_mut().push_frame(&reply, 1700);

        let result = engine.initiate(5, false, false).unwrap();

        assert_eq!(result.tof, 550.0);
        assert_eq!(result.neighbor, 5);
        assert_eq!(result.role, Role::Initiator);
        assert_eq!(result.timestamps.rx2, 1700);
        assert_eq!(result.peer, peer_diagnostics());
        assert!((result.distance - 2.5797).abs() < 1e-3);

        let sent = &engine.radio().sent;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].data, encode_poll(0, 3, 5, false, false).as_bytes());
        assert!(sent[0].response_expected);
        assert!(engine.radio().rx_enabled);
        assert!(engine.radio().rx_interrupt);
    }

    #[test]
    fn double_sided_exchange() {
        let mut engine = engine(3);
        engine.radio_mut().tx_times.push_back(0);
        engine.radio_mut().push_frame(&encode_response(0, 3, 5), 1100);
        let reply = encode_final(
            1,
            3,
            5,
            &[instant(0), instant(1000), instant(2000)],
            &peer_diagnostics(),
        )
        .unwrap();
        engine.radio_mut().push_frame(&reply, 2100);

        let result = engine.initiate(5, false, true).unwrap();

        assert_eq!(result.tof, 50.0);
        assert_eq!(result.timestamps.rx3, 2100);
        assert_eq!(result.timestamps.tx3, 2000);
        assert!(result.double_sided);
    }

    #[test]
    fn target_measures_sends_own_final() {
        let mut engine = engine(3);
        engine.radio_mut().tx_times.push_back(0);
        engine.radio_mut().tx_times.push_back(5000);
        let reply = encode_final(0, 3, 5, &[instant(1000), instant(1600)], &peer_diagnostics())
            .unwrap();
        engine.radio_mut().push_frame(&reply, 1700);

        engine.initiate(5, true, false).unwrap();

        let sent = &engine.radio().sent;
        assert_eq!(sent.len(), 2);
        let own = FinalView::decode(&sent[1].data).unwrap();
        assert_eq!(own.header.initiator, 3);
        assert_eq!(own.header.target, 5);
        assert_eq!(own.header.seq, 1);
        assert_eq!(own.timestamps, [0, 1700, 0]);
    }

    #[test]
    fn double_sided_target_measures_sends_three_timestamps() {
        let mut engine = engine(3);
        engine.radio_mut().tx_times.push_back(0);
        engine.radio_mut().tx_times.push_back(5000);
        engine.radio_mut().push_frame(&encode_response(0, 3, 5), 1100);
        let reply = encode_final(
            1,
            3,
            5,
            &[instant(0), instant(1000), instant(2000)],
            &peer_diagnostics(),
        )
        .unwrap();
        engine.radio_mut().push_frame(&reply, 2100);

        let result = engine.initiate(5, true, true).unwrap();

        assert_eq!(result.tof, 50.0);
        let sent = &engine.radio().sent;
        assert_eq!(sent.len(), 2);
        assert!(!sent[1].response_expected);
        let own = FinalView::decode(&sent[1].data).unwrap();
        assert_eq!(own.header.seq, 1);
        assert_eq!(own.timestamps, [0, 1100, 2100]);
    }

    #[test]
    fn undefined_double_sided_distance_fails() {
        let mut engine = engine(3);
        engine.radio_mut().tx_times.push_back(0);
        engine.radio_mut().push_frame(&encode_response(0, 3, 5), 1100);
        // Both replies at once: the double-sided formula divides zero by zero
        let reply = encode_final(
            1,
            3,
            5,
            &[instant(0), instant(1000), instant(1000)],
            &peer_diagnostics(),
        )
        .unwrap();
        engine.radio_mut().push_frame(&reply, 1100);

        let result = engine.initiate(5, false, true);

        assert!(matches!(result, Err(Error::NegativeDistance)));
    }

    #[test]
    fn refuses_to_range_with_itself() {
        let mut engine = engine(3);

        let result = engine.initiate(3, false, false);

        assert!(matches!(result, Err(Error::IdentityConflict)));
        assert!(engine.radio().sent.is_empty());
    }

    #[test]
    fn negative_distance_fails() {
        let mut engine = engine(3);
        engine.radio_mut().tx_times.push_back(0);
        // The responder claims to have held the POLL longer than our round trip
        let reply = encode_final(0, 3, 5, &[instant(1000), instant(3000)], &peer_diagnostics())
            .unwrap();
        engine.radio_mut().push_frame(&reply, 1700);

        let result = engine.initiate(5, false, false);

        assert!(matches!(result, Err(Error::NegativeDistance)));
        assert!(engine.radio().rx_enabled);
        assert!(engine.radio().rx_interrupt);
    }

    #[test]
    fn wrong_reply_is_malformed() {
        let mut engine = engine(3);
        engine.radio_mut().tx_times.push_back(0);
        // FINAL of an exchange with another board
        let reply = encode_final(0, 3, 6, &[instant(1000), instant(1600)], &peer_diagnostics())
            .unwrap();
        engine.radio_mut().push_frame(&reply, 1700);
        let resets = engine.radio().rx_resets;

        let result = engine.initiate(5, false, false);

        assert!(matches!(result, Err(Error::MalformedFrame(_))));
        assert_eq!(engine.radio().rx_resets, resets + 1);
        assert!(engine.radio().rx_enabled);
    }

    #[test]
    fn silence_times_out() {
        let mut engine = engine(3);

        let result = engine.initiate(5, false, true);

        assert!(matches!(result, Err(Error::Timeout)));
        assert!(engine.radio().rx_interrupt);
        assert_eq!(engine.radio().rx_timeout_uus, 0);
    }

    #[test]
    fn receiver_error_fails_exchange() {
        let mut engine = engine(3);
        engine.radio_mut().push_rx_error();

        let result = engine.initiate(5, false, false);

        assert!(matches!(result, Err(Error::RxFailed)));
    }
}
