//! Relay shared between producer threads and a late consumer.

use std::sync::{Arc, Mutex};
use std::thread;

use tether_streams::{Relay, RelayError, RelayEvent, WriteOutcome};

#[test]
fn buffered_chunks_from_many_producers_are_replayed_once() {
    let relay: Relay<(usize, usize)> = Relay::new(true);

    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let relay = relay.clone();
            thread::spawn(move || {
                for seq in 0..250 {
                    assert_eq!(relay.write((producer, seq)), Ok(WriteOutcome::Buffered));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer thread");
    }
    assert_eq!(relay.buffered_len(), 1_000);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    relay.subscribe(move |event| {
        if let RelayEvent::Data(chunk) = event {
            sink.lock().unwrap().push(*chunk);
        }
    });
    relay.resume();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1_000, "none dropped or duplicated");
    for producer in 0..4 {
        let sequence: Vec<usize> = seen
            .iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, seq)| *seq)
            .collect();
        assert_eq!(sequence, (0..250).collect::<Vec<_>>(), "per-producer order kept");
    }
}

#[test]
fn late_subscriber_only_sees_what_follows_resume() {
    let relay: Relay<String> = Relay::new(false);
    relay.write("nobody listening".to_string()).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    relay.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

    relay.pause();
    relay.write("held".to_string()).unwrap();
    relay.resume();
    relay.terminate();
    assert_eq!(relay.write("rejected".to_string()), Err(RelayError::Closed));

    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[
            RelayEvent::Data("held".to_string()),
            RelayEvent::Error(RelayError::Closed)
        ]
    );
}

#[test]
fn concurrent_resumes_replay_in_buffer_order() {
    let relay: Relay<usize> = Relay::new(true);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    relay.subscribe(move |event| {
        if let RelayEvent::Data(n) = event {
            // Slow consumer widens the window between two replays.
            thread::sleep(std::time::Duration::from_micros(50));
            sink.lock().unwrap().push(*n);
        }
    });
    for n in 0..200 {
        relay.write(n).unwrap();
    }

    let barrier = Arc::new(std::sync::Barrier::new(4));
    let resumers: Vec<_> = (0..4)
        .map(|_| {
            let relay = relay.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                relay.resume();
            })
        })
        .collect();
    for resumer in resumers {
        resumer.join().expect("resume thread");
    }

    assert_eq!(*seen.lock().unwrap(), (0..200).collect::<Vec<_>>());
    assert!(!relay.is_paused());
}
