use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use ota_os::{BufferIndex, EventMailbox, MailboxError, OtaEvent, OtaEventMsg};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn ready(capacity: usize) -> EventMailbox<OtaEventMsg> {
    let mailbox = EventMailbox::new(capacity);
    mailbox.init();
    mailbox
}

fn block(i: u16) -> OtaEventMsg {
    OtaEventMsg::new(OtaEvent::ReceivedFileBlock).with_data(BufferIndex(i))
}

#[test]
fn test_full_mailbox_then_retry_after_receive() {
    let mailbox = ready(10);

    for i in 0..10 {
        mailbox.send(block(i), Duration::ZERO).unwrap();
    }
    assert_eq!(mailbox.len(), 10);

    let eleventh = block(10);
    assert_eq!(
        mailbox.send(eleventh, Duration::ZERO),
        Err(MailboxError::SendTimeout {
            timeout: Duration::ZERO
        })
    );

    assert_eq!(mailbox.receive(Duration::ZERO).unwrap(), block(0));
    mailbox.send(eleventh, Duration::ZERO).unwrap();

    let rest: Vec<OtaEventMsg> = (0..10)
        .map(|_| mailbox.receive(Duration::ZERO).unwrap())
        .collect();
    let expected: Vec<OtaEventMsg> = (1..=10).map(block).collect();
    assert_eq!(rest, expected);
}

#[test]
fn test_blocked_sender_released_mid_wait() {
    let mailbox = Arc::new(ready(1));
    mailbox.send(block(0), Duration::ZERO).unwrap();

    let sender = {
        let mailbox = mailbox.clone();
        thread::spawn(move || {
            let start = Instant::now();
            let result = mailbox.send(block(1), Duration::from_secs(2));
            (result, start.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert_eq!(mailbox.receive(Duration::ZERO).unwrap(), block(0));

    let (result, waited) = sender.join().unwrap();
    assert_eq!(result, Ok(()));
    assert!(waited < Duration::from_secs(1), "waited {:?}", waited);
    assert_eq!(mailbox.receive(Duration::from_millis(100)).unwrap(), block(1));
}

#[test]
fn test_empty_receive_waits_full_timeout() {
    let mailbox = ready(10);
    let timeout = Duration::from_millis(80);

    let start = Instant::now();
    let result = mailbox.receive(timeout);

    assert_eq!(result, Err(MailboxError::ReceiveTimeout { timeout }));
    assert!(start.elapsed() >= timeout);
    assert_eq!(mailbox.len(), 0);
    assert!(mailbox.is_initialized());
}

#[test]
fn test_reinit_recovers_previous_session() {
    let mailbox = ready(2);
    mailbox.send(block(0), Duration::ZERO).unwrap();
    mailbox.send(block(1), Duration::ZERO).unwrap();

    // a session that never deinitialized
    mailbox.init();

    assert_eq!(mailbox.len(), 0);
    mailbox.send(block(2), Duration::ZERO).unwrap();
    mailbox.send(block(3), Duration::ZERO).unwrap();
    assert_eq!(mailbox.receive(Duration::ZERO).unwrap(), block(2));
}

proptest! {
    #[test]
    fn test_fifo_for_any_sequence_within_capacity(
        capacity in 1usize..16,
        indices in prop::collection::vec(any::<u16>(), 0..16),
    ) {
        let mailbox = ready(capacity);
        let sent: Vec<OtaEventMsg> = indices.iter().take(capacity).copied().map(block).collect();

        for msg in &sent {
            prop_assert!(mailbox.send(*msg, Duration::ZERO).is_ok());
        }
        prop_assert_eq!(mailbox.len(), sent.len());

        let received: Vec<OtaEventMsg> = sent
            .iter()
            .map(|_| mailbox.receive(Duration::ZERO).unwrap())
            .collect();
        prop_assert_eq!(received, sent);
        prop_assert!(mailbox.is_empty());
    }
}
