use std::{sync::Arc, thread, time::Duration};

use ota_os::{
    Control, EventHandler, EventLoop, OsConfig, OtaEvent, OtaEventMsg, OtaOs, TimerId,
};
use pretty_assertions::assert_eq;

struct Recorder {
    seen: Vec<OtaEvent>,
    idle: usize,
}

impl EventHandler for Recorder {
    fn handle(&mut self, msg: OtaEventMsg) -> Control {
        self.seen.push(msg.event_id);
        match msg.event_id {
            OtaEvent::Shutdown => Control::Exit,
            _ => Control::Continue,
        }
    }

    fn on_idle(&mut self) -> Control {
        self.idle += 1;
        // bound the test if a timer never fires
        if self.idle > 200 {
            Control::Exit
        } else {
            Control::Continue
        }
    }
}

fn config(name: &str) -> OsConfig {
    OsConfig {
        mailbox_capacity: 10,
        receive_timeout: Duration::from_millis(20),
        timer_worker_name: name.to_string(),
        ..Default::default()
    }
}

#[test]
fn test_timer_expiries_reach_agent_loop() {
    let os = Arc::new(OtaOs::dedicated(config("agent-timers")).unwrap());

    os.timers()
        .start(
            TimerId::Request,
            "request",
            Duration::from_millis(30),
            os.timer_event_callback(OtaEvent::RequestTimer),
        )
        .unwrap();
    os.timers()
        .start(
            TimerId::Retry,
            "shutdown",
            Duration::from_millis(150),
            os.timer_event_callback(OtaEvent::Shutdown),
        )
        .unwrap();

    let mut agent = Recorder {
        seen: Vec::new(),
        idle: 0,
    };
    let stats = EventLoop::new(os.mailbox(), os.config().receive_timeout)
        .run(&mut agent)
        .unwrap();

    assert_eq!(agent.seen, vec![OtaEvent::RequestTimer, OtaEvent::Shutdown]);
    assert_eq!(stats.dispatched, 2);
    assert!(stats.idle_polls > 0);

    os.shutdown().unwrap();
    assert!(!os.timers().is_registered(TimerId::Request));
    assert!(!os.timers().is_registered(TimerId::Retry));
}

#[test]
fn test_many_producers_one_consumer() {
    let os = Arc::new(OtaOs::dedicated(config("agent-producers")).unwrap());
    let per_producer = 20;

    let producers: Vec<_> = (0..3)
        .map(|_| {
            let os = os.clone();
            thread::spawn(move || {
                for _ in 0..per_producer {
                    os.mailbox()
                        .send(OtaEvent::RequestFileBlock.into(), Duration::from_secs(2))
                        .unwrap();
                }
            })
        })
        .collect();

    let closer = {
        let os = os.clone();
        thread::spawn(move || {
            for producer in producers {
                producer.join().unwrap();
            }
            os.mailbox()
                .send(OtaEvent::Shutdown.into(), Duration::from_secs(2))
                .unwrap();
        })
    };

    let mut agent = Recorder {
        seen: Vec::new(),
        idle: 0,
    };
    EventLoop::new(os.mailbox(), Duration::from_millis(50))
        .run(&mut agent)
        .unwrap();
    closer.join().unwrap();

    let blocks = agent
        .seen
        .iter()
        .filter(|e| **e == OtaEvent::RequestFileBlock)
        .count();
    assert_eq!(blocks, 3 * per_producer);
    assert_eq!(agent.seen.last(), Some(&OtaEvent::Shutdown));
}
