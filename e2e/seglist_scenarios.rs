//! E2E Suite: segmented-list scenarios.
//!
//! End-to-end sequences over the public surface:
//! - push/iterate with a count-based fill and the expected segment shape
//! - the compression band around a five-segment chain
//! - deleting through an iterator mid-traversal

use keel::{Direction, SegList, Value, Whence};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 4: push-iterate with fill = 5
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn twelve_pushes_make_three_segments_of_five() {
    init_logging();
    let mut list = SegList::with_options(5, 0);
    for i in 0..12i64 {
        list.push_tail(i);
    }

    assert_eq!(list.count(), 12);
    assert_eq!(list.segments(), 3, "ceil(12/5) segments");

    let mut got = Vec::new();
    let mut it = list.iter(Direction::Forward);
    while let Some(e) = it.next() {
        got.push(e.into_value());
    }
    assert_eq!(got, (0..12).map(Value::Int).collect::<Vec<_>>());
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 5: compression band over five segments
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn interior_segments_compress_with_depth_one() {
    init_logging();
    let mut list = SegList::with_options(2, 1);
    for i in 0..10i64 {
        // Compressible payloads well past the small-segment floor.
        list.push_tail(format!("payload-{i:02}-").repeat(10).into_bytes());
    }

    assert_eq!(list.segments(), 5);
    assert_eq!(list.is_compressed(0), Some(false), "head stays raw");
    assert_eq!(list.is_compressed(4), Some(false), "tail stays raw");
    for pos in 1..4 {
        assert_eq!(list.is_compressed(pos), Some(true), "interior {pos}");
    }

    let mut got = Vec::new();
    let mut it = list.iter(Direction::Forward);
    while let Some(e) = it.next() {
        got.push(e.into_value());
    }
    drop(it);
    assert_eq!(got.len(), 10);
    for (i, v) in got.iter().enumerate() {
        assert_eq!(
            v,
            &Value::Bytes(format!("payload-{i:02}-").repeat(10).into_bytes())
        );
    }

    // Traversal restored the window behind itself.
    for pos in 1..4 {
        assert_eq!(list.is_compressed(pos), Some(true));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 6: deletion through a live iterator
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn deleting_mid_iteration_keeps_the_cursor_on_track() {
    init_logging();
    let mut list = SegList::with_options(2, 0);
    for v in ["a", "b", "c", "d", "e"] {
        list.push_tail(v);
    }
    assert_eq!(list.segments(), 3); // [a,b] [c,d] [e]

    let mut deleted_any = false;
    let mut seen_after_delete = Vec::new();
    {
        let mut it = list.iter(Direction::Forward);
        while let Some(e) = it.next() {
            if e.matches(b"b") || e.matches(b"d") {
                it.del_entry(&e);
                deleted_any = true;
            } else if deleted_any {
                seen_after_delete.push(e.into_value());
            }
        }
    }
    assert_eq!(
        seen_after_delete,
        vec![Value::Bytes(b"c".to_vec()), Value::Bytes(b"e".to_vec())],
        "traversal after the deletions yields the survivors in order"
    );

    let mut remaining = Vec::new();
    let mut it = list.iter(Direction::Forward);
    while let Some(e) = it.next() {
        remaining.push(e.into_value());
    }
    drop(it);
    assert_eq!(
        remaining,
        vec![
            Value::Bytes(b"a".to_vec()),
            Value::Bytes(b"c".to_vec()),
            Value::Bytes(b"e".to_vec())
        ]
    );

    // No segment was left empty behind the iterator.
    assert_eq!(list.count(), 3);
    assert!(list.segments() <= 2);
    assert!(list.pop(Whence::Tail).is_some());
}

// ─────────────────────────────────────────────────────────────────────────────
// Reverse deletion through an iterator
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn reverse_iterator_deletion_walks_toward_the_head() {
    init_logging();
    let mut list = SegList::with_options(2, 0);
    for i in 0..6i64 {
        list.push_tail(i);
    }

    // Delete every even element walking tail -> head.
    {
        let mut it = list.iter(Direction::Reverse);
        while let Some(e) = it.next() {
            if matches!(e.value(), Value::Int(n) if n % 2 == 0) {
                it.del_entry(&e);
            }
        }
    }

    let mut remaining = Vec::new();
    let mut it = list.iter(Direction::Forward);
    while let Some(e) = it.next() {
        remaining.push(e.into_value());
    }
    drop(it);
    assert_eq!(
        remaining,
        vec![Value::Int(1), Value::Int(3), Value::Int(5)]
    );
}
