//! State-machine tests driving the broker core directly, no sockets.

use jobq::broker::{Broker, ClientId, JobState};
use jobq::protocol::{Request, Response};
use serde_json::{json, Value};

fn put(broker: &mut Broker, client: ClientId, queue: &str, priority: u64, payload: Value) -> u64 {
    let out = broker.handle(
        client,
        Request::Put {
            queue: queue.to_string(),
            priority,
            payload,
        },
    );
    match out.last() {
        Some((respondent, Response::Submitted { id })) if *respondent == client => *id,
        other => panic!("unexpected put outcome: {other:?}"),
    }
}

fn get(
    broker: &mut Broker,
    client: ClientId,
    queues: &[&str],
    wait: bool,
) -> Vec<(ClientId, Response)> {
    broker.handle(
        client,
        Request::Get {
            queues: queues.iter().map(|name| name.to_string()).collect(),
            wait,
        },
    )
}

fn assert_assigned(response: &Response, queue: &str, priority: u64, id: u64) {
    match response {
        Response::Assigned {
            queue: got_queue,
            priority: got_priority,
            id: got_id,
            ..
        } => {
            assert_eq!(got_queue, queue);
            assert_eq!(*got_priority, priority);
            assert_eq!(*got_id, id);
        }
        other => panic!("expected an assigned job, got {other:?}"),
    }
}

#[test]
fn test_job_ids_start_at_zero_and_increase() {
    let mut broker = Broker::new();
    let client = broker.connect();

    assert_eq!(put(&mut broker, client, "q", 1, json!(null)), 0);
    assert_eq!(put(&mut broker, client, "q", 1, json!(null)), 1);
    assert_eq!(put(&mut broker, client, "other", 9, json!(null)), 2);
}

#[test]
fn test_put_then_get_returns_payload() {
    let mut broker = Broker::new();
    let client = broker.connect();

    let id = put(&mut broker, client, "q", 5, json!({"x": 1}));
    let out = get(&mut broker, client, &["q"], false);

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].0, client);
    match &out[0].1 {
        Response::Assigned {
            queue,
            priority,
            id: got_id,
            payload,
        } => {
            assert_eq!(queue, "q");
            assert_eq!(*priority, 5);
            assert_eq!(*got_id, id);
            assert_eq!(*payload, json!({"x": 1}));
        }
        other => panic!("expected an assigned job, got {other:?}"),
    }
}

#[test]
fn test_higher_priority_wins() {
    let mut broker = Broker::new();
    let client = broker.connect();

    let low = put(&mut broker, client, "q", 1, json!("low"));
    let high = put(&mut broker, client, "q", 9, json!("high"));

    let out = get(&mut broker, client, &["q"], false);
    assert_assigned(&out[0].1, "q", 9, high);
    let out = get(&mut broker, client, &["q"], false);
    assert_assigned(&out[0].1, "q", 1, low);
}

#[test]
fn test_equal_priority_is_fifo_by_id() {
    let mut broker = Broker::new();
    let client = broker.connect();

    let first = put(&mut broker, client, "q", 7, json!("a"));
    let second = put(&mut broker, client, "q", 7, json!("b"));
    let third = put(&mut broker, client, "q", 7, json!("c"));

    for expected in [first, second, third] {
        let out = get(&mut broker, client, &["q"], false);
        assert_assigned(&out[0].1, "q", 7, expected);
    }
}

#[test]
fn test_get_from_unknown_queue_reports_no_job() {
    let mut broker = Broker::new();
    let client = broker.connect();

    let out = get(&mut broker, client, &["nowhere"], false);
    assert_eq!(out, vec![(client, Response::NoJob)]);
}

#[test]
fn test_get_picks_highest_across_queues() {
    let mut broker = Broker::new();
    let client = broker.connect();

    put(&mut broker, client, "a", 3, json!("a"));
    let best = put(&mut broker, client, "b", 8, json!("b"));

    let out = get(&mut broker, client, &["a", "b"], false);
    assert_assigned(&out[0].1, "b", 8, best);
}

#[test]
fn test_cross_queue_tie_prefers_first_listed() {
    let mut broker = Broker::new();
    let client = broker.connect();

    put(&mut broker, client, "a", 5, json!("a"));
    let in_b = put(&mut broker, client, "b", 5, json!("b"));

    let out = get(&mut broker, client, &["b", "a"], false);
    assert_assigned(&out[0].1, "b", 5, in_b);
}

#[test]
fn test_blocking_get_woken_by_put() {
    let mut broker = Broker::new();
    let consumer = broker.connect();
    let producer = broker.connect();

    let out = get(&mut broker, consumer, &["q"], true);
    assert!(out.is_empty(), "blocked get must produce no response yet");
    assert!(broker.is_waiting(consumer));

    let out = broker.handle(
        producer,
        Request::Put {
            queue: "q".to_string(),
            priority: 3,
            payload: json!("hi"),
        },
    );

    // Both the waiter's deferred response and the producer's ack arrive in
    // the same handling step.
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].0, consumer);
    assert_assigned(&out[0].1, "q", 3, 0);
    assert_eq!(out[1], (producer, Response::Submitted { id: 0 }));
    assert!(!broker.is_waiting(consumer));
}

#[test]
fn test_waiters_wake_in_fifo_order() {
    let mut broker = Broker::new();
    let first = broker.connect();
    let second = broker.connect();
    let producer = broker.connect();

    assert!(get(&mut broker, first, &["q"], true).is_empty());
    assert!(get(&mut broker, second, &["q"], true).is_empty());

    let out = broker.handle(
        producer,
        Request::Put {
            queue: "q".to_string(),
            priority: 1,
            payload: json!(1),
        },
    );
    assert_eq!(out[0].0, first, "earliest waiter wakes first");

    let out = broker.handle(
        producer,
        Request::Put {
            queue: "q".to_string(),
            priority: 1,
            payload: json!(2),
        },
    );
    assert_eq!(out[0].0, second);
}

#[test]
fn test_cross_queue_waiter_wakes_exactly_once() {
    let mut broker = Broker::new();
    let consumer = broker.connect();
    let producer = broker.connect();

    assert!(get(&mut broker, consumer, &["a", "b"], true).is_empty());
    assert_eq!(broker.waiting_count("a"), 1);
    assert_eq!(broker.waiting_count("b"), 1);

    let out = broker.handle(
        producer,
        Request::Put {
            queue: "a".to_string(),
            priority: 1,
            payload: json!("x"),
        },
    );
    assert_eq!(out[0].0, consumer);
    assert!(!broker.is_waiting(consumer));
    // Woken client left every waiter list it was on.
    assert_eq!(broker.waiting_count("a"), 0);
    assert_eq!(broker.waiting_count("b"), 0);

    // A later put to the other queue parks the job instead of re-waking.
    put(&mut broker, producer, "b", 1, json!("y"));
    assert_eq!(broker.pending_count("b"), 1);
    assert!(broker.client(consumer).is_some_and(|c| !c.is_waiting()));
}

#[test]
fn test_abort_requeues_with_original_priority() {
    let mut broker = Broker::new();
    let owner = broker.connect();
    let other = broker.connect();

    let id = put(&mut broker, owner, "q", 5, json!({"x": 1}));
    get(&mut broker, owner, &["q"], false);

    let out = broker.handle(owner, Request::Abort { id: id as i64 });
    assert_eq!(out, vec![(owner, Response::Ok)]);

    let out = get(&mut broker, other, &["q"], false);
    assert_assigned(&out[0].1, "q", 5, id);
}

#[test]
fn test_abort_by_non_owner_is_rejected() {
    let mut broker = Broker::new();
    let owner = broker.connect();
    let intruder = broker.connect();

    let id = put(&mut broker, owner, "q", 5, json!(null));
    get(&mut broker, owner, &["q"], false);

    let out = broker.handle(intruder, Request::Abort { id: id as i64 });
    assert_eq!(out, vec![(intruder, Response::NoJob)]);
    // Ownership is untouched: the owner can still abort.
    assert_eq!(broker.job(id).and_then(|job| job.owner()), Some(owner));
    let out = broker.handle(owner, Request::Abort { id: id as i64 });
    assert_eq!(out, vec![(owner, Response::Ok)]);
}

#[test]
fn test_abort_of_unknown_or_negative_id_is_rejected() {
    let mut broker = Broker::new();
    let client = broker.connect();

    let out = broker.handle(client, Request::Abort { id: 42 });
    assert_eq!(out, vec![(client, Response::NoJob)]);
    let out = broker.handle(client, Request::Abort { id: -3 });
    assert_eq!(out, vec![(client, Response::NoJob)]);
}

#[test]
fn test_delete_pending_job_and_idempotence() {
    let mut broker = Broker::new();
    let client = broker.connect();

    let id = put(&mut broker, client, "q", 2, json!(null));

    let out = broker.handle(client, Request::Delete { id: id as i64 });
    assert_eq!(out, vec![(client, Response::Ok)]);
    // Gone from the queue's pending view.
    let out = get(&mut broker, client, &["q"], false);
    assert_eq!(out, vec![(client, Response::NoJob)]);
    // Second delete misses.
    let out = broker.handle(client, Request::Delete { id: id as i64 });
    assert_eq!(out, vec![(client, Response::NoJob)]);
}

#[test]
fn test_delete_assigned_job_clears_ownership() {
    let mut broker = Broker::new();
    let owner = broker.connect();
    let deleter = broker.connect();

    let id = put(&mut broker, owner, "q", 5, json!(null));
    get(&mut broker, owner, &["q"], false);

    // Any client may delete any id.
    let out = broker.handle(deleter, Request::Delete { id: id as i64 });
    assert_eq!(out, vec![(deleter, Response::Ok)]);

    // A subsequent abort by the former owner misses.
    let out = broker.handle(owner, Request::Abort { id: id as i64 });
    assert_eq!(out, vec![(owner, Response::NoJob)]);
    assert!(broker.job(id).is_none());
}

#[test]
fn test_delete_leaves_tombstone_that_get_skips() {
    let mut broker = Broker::new();
    let client = broker.connect();

    let doomed = put(&mut broker, client, "q", 9, json!("doomed"));
    let survivor = put(&mut broker, client, "q", 1, json!("survivor"));

    broker.handle(client, Request::Delete { id: doomed as i64 });

    // The deleted high-priority entry is skipped, not returned.
    let out = get(&mut broker, client, &["q"], false);
    assert_assigned(&out[0].1, "q", 1, survivor);
    assert_eq!(broker.pending_count("q"), 0);
}

#[test]
fn test_disconnect_requeues_working_set() {
    let mut broker = Broker::new();
    let producer = broker.connect();
    let doomed = broker.connect();
    let survivor = broker.connect();

    let id = put(&mut broker, producer, "q", 7, json!(42));
    get(&mut broker, doomed, &["q"], false);

    let out = broker.disconnect(doomed);
    assert!(out.is_empty(), "no waiter, so the job parks as pending");

    let out = get(&mut broker, survivor, &["q"], false);
    assert_assigned(&out[0].1, "q", 7, id);
}

#[test]
fn test_disconnect_requeue_wakes_waiter() {
    let mut broker = Broker::new();
    let producer = broker.connect();
    let doomed = broker.connect();
    let waiter = broker.connect();

    let id = put(&mut broker, producer, "q", 7, json!(42));
    get(&mut broker, doomed, &["q"], false);
    assert!(get(&mut broker, waiter, &["q"], true).is_empty());

    let out = broker.disconnect(doomed);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].0, waiter);
    assert_assigned(&out[0].1, "q", 7, id);
}

#[test]
fn test_disconnect_while_blocked_removes_waiter() {
    let mut broker = Broker::new();
    let consumer = broker.connect();
    let producer = broker.connect();

    assert!(get(&mut broker, consumer, &["q"], true).is_empty());
    broker.disconnect(consumer);

    // The next put must not try to deliver to the dead client.
    let out = broker.handle(
        producer,
        Request::Put {
            queue: "q".to_string(),
            priority: 1,
            payload: json!(null),
        },
    );
    assert_eq!(out, vec![(producer, Response::Submitted { id: 0 })]);
    assert_eq!(broker.pending_count("q"), 1);
}

#[test]
fn test_abort_hands_job_to_waiter() {
    let mut broker = Broker::new();
    let owner = broker.connect();
    let waiter = broker.connect();

    let id = put(&mut broker, owner, "q", 4, json!("work"));
    get(&mut broker, owner, &["q"], false);
    assert!(get(&mut broker, waiter, &["q"], true).is_empty());

    let out = broker.handle(owner, Request::Abort { id: id as i64 });
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].0, waiter);
    assert_assigned(&out[0].1, "q", 4, id);
    assert_eq!(out[1], (owner, Response::Ok));
}

#[test]
fn test_working_sets_never_intersect() {
    let mut broker = Broker::new();
    let first = broker.connect();
    let second = broker.connect();

    put(&mut broker, first, "q", 1, json!(1));
    put(&mut broker, first, "q", 1, json!(2));

    get(&mut broker, first, &["q"], false);
    get(&mut broker, second, &["q"], false);

    let first_set = &broker.client(first).unwrap().working;
    let second_set = &broker.client(second).unwrap().working;
    assert!(first_set.is_disjoint(second_set));
    assert_eq!(first_set.len() + second_set.len(), 2);
}

#[test]
fn test_job_state_transitions() {
    let mut broker = Broker::new();
    let client = broker.connect();

    let id = put(&mut broker, client, "q", 1, json!(null));
    assert_eq!(broker.job(id).unwrap().state, JobState::Pending);

    get(&mut broker, client, &["q"], false);
    assert_eq!(broker.job(id).unwrap().state, JobState::Assigned(client));

    broker.handle(client, Request::Abort { id: id as i64 });
    assert_eq!(broker.job(id).unwrap().state, JobState::Pending);

    broker.handle(client, Request::Delete { id: id as i64 });
    assert!(broker.job(id).is_none());
}
