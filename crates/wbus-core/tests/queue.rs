//! Tests for the transaction queue against a simulated controller

#[cfg(test)]
mod tests {
    use futures::future::join_all;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;
    use wbus_core::protocol::{
        Bus, LinkState, ProtocolError, Transaction, TransactionError, TransactionQueue,
        TransactionSettings,
    };
    use wbus_core::simulator::{HeaterSimulator, Reaction, SimEvent, SimulatorHandle};

    fn settings() -> TransactionSettings {
        TransactionSettings {
            timeout: Duration::from_millis(200),
            retries: 3,
            ..Default::default()
        }
    }

    fn start(sim: HeaterSimulator) -> (TransactionQueue, SimulatorHandle) {
        let (line, handle) = sim.spawn(0xf, 0x4);
        let queue = TransactionQueue::start(Bus::start(line, 0xf, 0x4), settings());
        (queue, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transactions_run_in_submission_order() {
        let mut sim = HeaterSimulator::new();
        for code in 1..=5u8 {
            sim = sim.on(&[0x51, code], Reaction::reply([0xd1, code, 0x10 + code]));
        }
        let (queue, heater) = start(sim);

        let results = join_all(
            (1..=5u8).map(|code| queue.submit(Transaction::request(vec![0x51, code], &[0xd1]))),
        )
        .await;

        for (code, result) in (1..=5u8).zip(results) {
            let frame = result.unwrap().expect("reply");
            assert_eq!(frame.payload, vec![0xd1, code, 0x10 + code]);
        }

        // each request is answered before the next one goes out
        let events = heater.events();
        assert_eq!(events.len(), 10);
        for (i, pair) in events.chunks(2).enumerate() {
            let code = i as u8 + 1;
            assert_eq!(pair[0], SimEvent::Request(vec![0x51, code]));
            assert_eq!(pair[1], SimEvent::Reply(vec![0xd1, code, 0x10 + code]));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_acknowledged_is_not_retried() {
        let (queue, heater) =
            start(HeaterSimulator::new().on(&[0x56], Reaction::reply([0x7f, 0x56])));

        let err = queue
            .submit(Transaction::request(vec![0x56, 0x01], &[0xd6]))
            .await
            .unwrap_err();

        assert_eq!(err.transaction(), Some(TransactionError::NotAcknowledged));
        assert_eq!(heater.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_response() {
        let (queue, _heater) = start(HeaterSimulator::new().on(&[0x38], Reaction::reply([0xd1])));

        let err = queue
            .submit(Transaction::request(vec![0x38], &[0xb8]))
            .await
            .unwrap_err();

        assert_eq!(
            err.transaction(),
            Some(TransactionError::UnrecognizedResponse(0xd1))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_answered() {
        let (queue, heater) = start(HeaterSimulator::new().on_sequence(
            &[0x38],
            vec![Reaction::Silence, Reaction::Silence, Reaction::reply([0xb8, 0x0b])],
        ));

        let frame = queue
            .submit(Transaction::request(vec![0x38], &[0xb8]))
            .await
            .unwrap()
            .expect("reply");

        assert_eq!(frame.payload, vec![0xb8, 0x0b]);
        assert_eq!(heater.requests(), vec![vec![0x38]; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_response_after_all_attempts() {
        let (queue, heater) = start(HeaterSimulator::new());

        let began = Instant::now();
        let err = queue
            .submit(Transaction::request(vec![0x51, 0x0a], &[0xd1]))
            .await
            .unwrap_err();

        assert_eq!(err.transaction(), Some(TransactionError::NoResponse));
        assert!(began.elapsed() >= Duration::from_millis(600));
        assert_eq!(heater.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_garbage_reply_counts_as_silence() {
        let (queue, heater) = start(HeaterSimulator::new().on_sequence(
            &[0x38],
            vec![
                Reaction::Raw(vec![0x4f, 0x02, 0xb8, 0x00]),
                Reaction::reply([0xb8, 0x01]),
            ],
        ));

        let frame = queue
            .submit(Transaction::request(vec![0x38], &[0xb8]))
            .await
            .unwrap()
            .expect("reply");

        assert_eq!(frame.payload, vec![0xb8, 0x01]);
        assert_eq!(heater.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_and_forget() {
        let (queue, heater) = start(HeaterSimulator::new());

        let reply = queue.submit(Transaction::new(vec![0x10])).await.unwrap();
        assert_eq!(reply, None);

        // give the simulator time to see the write
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(heater.requests(), vec![vec![0x10]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_does_not_stall_queue() {
        let (queue, _heater) = start(
            HeaterSimulator::new()
                .on(&[0x51, 0x0a], Reaction::Silence)
                .on(&[0x38], Reaction::reply([0xb8, 0x0b])),
        );
        let slow = Transaction::request(vec![0x51, 0x0a], &[0xd1])
            .with_timeout(Duration::from_secs(10));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let (cancelled, next) = tokio::join!(
            queue.submit_with_cancel(slow, cancel),
            queue.submit(Transaction::request(vec![0x38], &[0xb8])),
        );

        assert!(matches!(cancelled, Err(ProtocolError::Cancelled)));
        assert_eq!(next.unwrap().expect("reply").payload, vec![0xb8, 0x0b]);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_releases_queue() {
        let (queue, heater) = start(HeaterSimulator::new().on(&[0x38], Reaction::reply([0xb8])));
        let slow = Transaction::request(vec![0x51, 0x0a], &[0xd1])
            .with_timeout(Duration::from_secs(5));

        let gave_up = tokio::time::timeout(Duration::from_millis(100), queue.submit(slow)).await;
        assert!(gave_up.is_err());

        let began = Instant::now();
        let frame = queue
            .submit(Transaction::request(vec![0x38], &[0xb8]))
            .await
            .unwrap()
            .expect("reply");

        assert_eq!(frame.payload, vec![0xb8]);
        assert!(began.elapsed() < Duration::from_secs(1));
        assert_eq!(heater.requests(), vec![vec![0x51, 0x0a], vec![0x38]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_fails_session() {
        let (queue, heater) = start(HeaterSimulator::new().on(&[0x38], Reaction::reply([0xb8])));
        let mut link = queue.subscribe_link();

        queue
            .submit(Transaction::request(vec![0x38], &[0xb8]))
            .await
            .unwrap();

        heater.stop().await;

        let err = queue
            .submit(Transaction::request(vec![0x38], &[0xb8]))
            .await
            .unwrap_err();
        assert!(err.is_link_error(), "unexpected {:?}", err);

        let err = queue
            .submit(Transaction::request(vec![0x38], &[0xb8]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::LinkFailed(_)));

        link.wait_for(|state| matches!(state, LinkState::Failed(_)))
            .await
            .unwrap();
    }
}
