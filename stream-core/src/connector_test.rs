use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Connector, OverflowPolicy, PushError};

#[test]
fn test_push_pop_per_lane() {
    let connector = Connector::new(2, 4, OverflowPolicy::Drop);
    connector.push(0, "a").unwrap();
    connector.push(1, "b").unwrap();

    assert_eq!(connector.len(0), 1);
    assert_eq!(connector.pop(1), Some("b"));
    assert_eq!(connector.pop(1), None);
    assert_eq!(connector.pop(0), Some("a"));
    assert!(connector.is_empty());
}

#[test]
fn test_full_lane_returns_item() {
    let connector = Connector::new(1, 1, OverflowPolicy::Drop);
    connector.push(0, 1).unwrap();
    match connector.push(0, 2) {
        Err(PushError::Full(item)) => assert_eq!(item, 2),
        other => panic!("expected Full, got {:?}", other),
    }
}

#[test]
fn test_lane_for_is_sticky_modulo() {
    let connector: Connector<u8> = Connector::new(3, 4, OverflowPolicy::Drop);
    assert_eq!(connector.lanes(), 3);
    assert_eq!(connector.lane_for(0), 0);
    assert_eq!(connector.lane_for(4), 1);
    assert_eq!(connector.lane_for(5), 2);
    assert_eq!(connector.lane_for(6), 0);
}

#[test]
fn test_zero_sizes_are_raised_to_one() {
    let connector = Connector::new(0, 0, OverflowPolicy::Drop);
    assert_eq!(connector.lanes(), 1);
    connector.push(7, 'x').unwrap();
    assert_eq!(connector.pop(0), Some('x'));
}

#[test]
fn test_block_policy_gives_up_after_timeout() {
    let connector = Connector::new(
        1,
        1,
        OverflowPolicy::Block {
            timeout: Duration::from_millis(30),
        },
    );
    connector.push(0, 1).unwrap();

    let started = Instant::now();
    let result = connector.push_with_policy(0, 2);
    assert_eq!(result, Err(PushError::Full(2)));
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[test]
fn test_block_policy_succeeds_when_consumer_drains() {
    let connector = Arc::new(Connector::new(
        1,
        1,
        OverflowPolicy::Block {
            timeout: Duration::from_secs(2),
        },
    ));
    connector.push(0, 1).unwrap();

    let consumer = Arc::clone(&connector);
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        consumer.pop(0)
    });

    connector.push_with_policy(0, 2).unwrap();
    assert_eq!(handle.join().unwrap(), Some(1));
    assert_eq!(connector.pop(0), Some(2));
}

#[test]
fn test_pop_timeout_is_bounded() {
    let connector: Connector<u8> = Connector::new(1, 1, OverflowPolicy::Drop);
    let started = Instant::now();
    assert_eq!(connector.pop_timeout(0, Duration::from_millis(25)), None);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(25));
    assert!(elapsed < Duration::from_secs(1));
}
