use crate::sim::{Event, SimTime, Simulator};
use std::sync::{Arc, Mutex};

struct Push {
    id: u32,
    log: Arc<Mutex<Vec<u32>>>,
}

impl Event for Push {
    fn execute(self: Box<Self>, _sim: &Simulator) {
        let Push { id, log } = *self;
        log.lock().expect("log lock").push(id);
    }
}

struct PushThenScheduleNow {
    id: u32,
    next_id: u32,
    log: Arc<Mutex<Vec<u32>>>,
}

impl Event for PushThenScheduleNow {
    fn execute(self: Box<Self>, sim: &Simulator) {
        let PushThenScheduleNow { id, next_id, log } = *self;
        log.lock().expect("log lock").push(id);
        sim.schedule(sim.now(), Push { id: next_id, log });
    }
}

fn push(id: u32, log: &Arc<Mutex<Vec<u32>>>) -> Push {
    Push {
        id,
        log: Arc::clone(log),
    }
}

#[test]
fn scheduled_events_order_by_time_then_seq() {
    let log = Arc::new(Mutex::new(Vec::new()));

    let sim = Simulator::default();
    sim.schedule(SimTime(10), push(1, &log));
    sim.schedule(SimTime(5), push(2, &log));
    sim.schedule(SimTime(10), push(3, &log));
    sim.run();

    assert_eq!(&*log.lock().expect("log lock"), &[2, 1, 3]);
    assert_eq!(sim.now(), SimTime(10));
    assert_eq!(sim.pending(), 0);
}

#[test]
fn event_scheduled_at_same_time_inside_event_runs_after_current_event() {
    let log = Arc::new(Mutex::new(Vec::new()));

    let sim = Simulator::default();
    sim.schedule(
        SimTime::ZERO,
        PushThenScheduleNow {
            id: 1,
            next_id: 2,
            log: Arc::clone(&log),
        },
    );
    sim.run();

    assert_eq!(&*log.lock().expect("log lock"), &[1, 2]);
    assert_eq!(sim.now(), SimTime::ZERO);
}

#[test]
fn closures_are_events_and_schedule_after_is_relative_to_now() {
    let log = Arc::new(Mutex::new(Vec::new()));

    let sim = Simulator::default();
    let inner = Arc::clone(&log);
    sim.schedule(SimTime(7), move |sim: &Simulator| {
        inner.lock().expect("log lock").push(sim.now().as_nanos() as u32);
        sim.schedule_after(SimTime(3), push(99, &inner));
    });
    sim.run();

    assert_eq!(&*log.lock().expect("log lock"), &[7, 99]);
    assert_eq!(sim.now(), SimTime(10));
}

#[test]
fn events_in_the_past_run_at_current_time() {
    let log = Arc::new(Mutex::new(Vec::new()));

    let sim = Simulator::default();
    sim.run_until(SimTime(20));
    sim.schedule(SimTime(5), push(1, &log));
    sim.run();

    assert_eq!(&*log.lock().expect("log lock"), &[1]);
    assert_eq!(sim.now(), SimTime(20));
}

#[test]
fn run_until_skips_events_after_until_and_advances_time() {
    let log = Arc::new(Mutex::new(Vec::new()));

    let sim = Simulator::default();
    sim.schedule(SimTime::ZERO, push(1, &log));
    sim.schedule(SimTime(10), push(2, &log));

    sim.run_until(SimTime(5));
    assert_eq!(&*log.lock().expect("log lock"), &[1]);
    assert_eq!(sim.now(), SimTime(5));
    assert_eq!(sim.pending(), 1);

    sim.run();
    assert_eq!(&*log.lock().expect("log lock"), &[1, 2]);
    assert_eq!(sim.now(), SimTime(10));
}

#[test]
fn run_until_executes_events_scheduled_exactly_at_until() {
    let log = Arc::new(Mutex::new(Vec::new()));

    let sim = Simulator::default();
    sim.schedule(SimTime(5), push(1, &log));
    sim.run_until(SimTime(5));

    assert_eq!(&*log.lock().expect("log lock"), &[1]);
    assert_eq!(sim.now(), SimTime(5));
}

#[test]
fn run_until_advances_time_even_if_there_are_no_events() {
    let sim = Simulator::default();

    sim.run_until(SimTime(7));
    assert_eq!(sim.now(), SimTime(7));
}
