use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use ota_os::{TimerCallback, TimerError, TimerId, TimerService, TokioScheduler};
use pretty_assertions::assert_eq;

type Fired = Arc<Mutex<Vec<(TimerId, Instant)>>>;

fn recorder() -> (Fired, TimerCallback) {
    let fired: Fired = Arc::new(Mutex::new(Vec::new()));
    let callback: TimerCallback = {
        let fired = fired.clone();
        Arc::new(move |id| fired.lock().unwrap().push((id, Instant::now())))
    };
    (fired, callback)
}

fn service(name: &str) -> TimerService<TokioScheduler> {
    TimerService::new(TokioScheduler::dedicated(name).unwrap())
}

#[test]
fn test_restart_fires_once_with_second_delay() {
    let timers = service("timer-restart");
    let (fired, callback) = recorder();

    let first_start = Instant::now();
    timers
        .start(TimerId::Retry, "retry", Duration::from_millis(500), callback.clone())
        .unwrap();
    thread::sleep(Duration::from_millis(100));
    timers
        .start(TimerId::Retry, "retry", Duration::from_millis(200), callback)
        .unwrap();

    thread::sleep(Duration::from_millis(800));

    let fired = fired.lock().unwrap();
    assert_eq!(fired.len(), 1, "expected exactly one expiry");
    let (id, at) = fired[0];
    assert_eq!(id, TimerId::Retry);
    let elapsed = at - first_start;
    assert!(elapsed >= Duration::from_millis(300), "fired at {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(500), "fired at {:?}", elapsed);
    assert!(!timers.is_armed(TimerId::Retry));
}

#[test]
fn test_stop_cancels_pending_expiry() {
    let timers = service("timer-stop");
    let (fired, callback) = recorder();

    timers
        .start(TimerId::Request, "request", Duration::from_millis(100), callback)
        .unwrap();
    timers.stop(TimerId::Request).unwrap();

    thread::sleep(Duration::from_millis(250));
    assert!(fired.lock().unwrap().is_empty());
    assert!(timers.is_registered(TimerId::Request));
}

#[test]
fn test_stop_unstarted_leaves_others_alone() {
    let timers = service("timer-stop-unstarted");
    let (fired, callback) = recorder();

    timers
        .start(TimerId::Request, "request", Duration::from_millis(50), callback)
        .unwrap();
    assert_eq!(
        timers.stop(TimerId::SelfTest),
        Err(TimerError::StopFailed {
            id: TimerId::SelfTest
        })
    );

    thread::sleep(Duration::from_millis(200));
    let ids: Vec<TimerId> = fired.lock().unwrap().iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![TimerId::Request]);
}

#[test]
fn test_delete_and_recreate_does_not_leak() {
    let timers = service("timer-delete");
    let (fired, callback) = recorder();

    for _ in 0..5 {
        timers
            .start(TimerId::SelfTest, "self-test", Duration::from_secs(10), callback.clone())
            .unwrap();
        assert_eq!(timers.scheduler().live_registrations(), 1);
        timers.delete(TimerId::SelfTest).unwrap();
        assert_eq!(timers.scheduler().live_registrations(), 0);
    }

    assert_eq!(
        timers.delete(TimerId::SelfTest),
        Err(TimerError::DeleteFailed {
            id: TimerId::SelfTest
        })
    );

    timers
        .start(TimerId::SelfTest, "self-test", Duration::from_millis(30), callback)
        .unwrap();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(fired.lock().unwrap().len(), 1);
}

#[test]
fn test_timers_fire_independently() {
    let timers = service("timer-independent");
    let (fired, callback) = recorder();

    timers
        .start(TimerId::Retry, "retry", Duration::from_millis(120), callback.clone())
        .unwrap();
    timers
        .start(TimerId::Request, "request", Duration::from_millis(20), callback)
        .unwrap();

    thread::sleep(Duration::from_millis(400));
    let ids: Vec<TimerId> = fired.lock().unwrap().iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![TimerId::Request, TimerId::Retry]);
}

#[test]
fn test_start_fails_when_scheduler_exhausted() {
    let scheduler = TokioScheduler::dedicated("timer-exhausted")
        .unwrap()
        .with_registration_limit(1);
    let timers = TimerService::new(scheduler);
    let (_, callback) = recorder();

    timers
        .start(TimerId::Request, "request", Duration::from_secs(10), callback.clone())
        .unwrap();
    let result = timers.start(TimerId::Retry, "retry", Duration::from_secs(10), callback);

    assert!(matches!(
        result,
        Err(TimerError::CreateFailed {
            id: TimerId::Retry,
            ..
        })
    ));
    assert!(!timers.is_registered(TimerId::Retry));
}
