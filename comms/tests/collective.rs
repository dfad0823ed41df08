use std::{
    sync::mpsc,
    thread,
    time::Duration,
};

use comms::{Collective, CollectiveErr, MemoryGroup, msg::Op};
use rand::Rng;

/// Runs `f` once per rank, each on its own thread, and returns the results ordered by rank.
fn run_group<T, F>(world_size: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(MemoryGroup) -> T + Send + Sync + Clone + 'static,
{
    let handles: Vec<_> = comms::in_memory(world_size)
        .unwrap()
        .into_iter()
        .map(|group| {
            let f = f.clone();
            thread::spawn(move || f(group))
        })
        .collect();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn reduce_sum_gives_every_rank_the_total() {
    let results = run_group(3, |mut group| {
        let rank = group.rank() as f32;
        let mut buf = [rank, 10.0 * rank, 1.0];
        group.reduce_sum(&mut buf).unwrap();
        buf
    });

    for buf in results {
        assert_eq!(buf, [3.0, 30.0, 3.0]);
    }
}

#[test]
fn reduce_sum_is_bit_identical_across_ranks() {
    let results = run_group(4, |mut group| {
        let mut rng = rand::rng();
        let mut buf: Vec<f32> = (0..257).map(|_| rng.random::<f32>() * 1e3).collect();
        group.reduce_sum(&mut buf).unwrap();
        buf
    });

    for buf in &results[1..] {
        assert_eq!(buf, &results[0]);
    }
}

#[test]
fn broadcast_from_a_peer_reaches_everyone() {
    let results = run_group(3, |mut group| {
        let mut buf = match group.rank() {
            2 => [4.0, 5.0],
            _ => [0.0, 0.0],
        };

        group.broadcast(&mut buf, 2).unwrap();
        buf
    });

    assert_eq!(results, vec![[4.0, 5.0]; 3]);
}

#[test]
fn scatter_splits_contiguously_in_rank_order() {
    let lens = [3, 2, 2];
    let results = run_group(3, move |mut group| {
        let rank = group.rank();
        let full: Vec<f32> = (0..7).map(|i| i as f32).collect();
        let full = (rank == 0).then_some(full.as_slice());
        group.scatter(full, lens[rank], 0).unwrap()
    });

    assert_eq!(results[0], vec![0.0, 1.0, 2.0]);
    assert_eq!(results[1], vec![3.0, 4.0]);
    assert_eq!(results[2], vec![5.0, 6.0]);
}

#[test]
fn scatter_from_a_peer_source() {
    let results = run_group(2, |mut group| {
        let full = [1.0, 2.0, 3.0];
        let (data, len) = match group.rank() {
            1 => (Some(&full[..]), 1),
            _ => (None, 2),
        };

        group.scatter(data, len, 1).unwrap()
    });

    assert_eq!(results[0], vec![1.0, 2.0]);
    assert_eq!(results[1], vec![3.0]);
}

#[test]
fn shape_mismatch_fails_every_rank() {
    let results = run_group(3, |mut group| {
        let len = if group.rank() == 2 { 4 } else { 3 };
        let mut buf = vec![1.0; len];
        group.reduce_sum(&mut buf)
    });

    assert!(matches!(
        results[0],
        Err(CollectiveErr::ShapeMismatch {
            op: Op::ReduceSum,
            rank: 2,
            got: 4,
            expected: 3,
        })
    ));

    assert!(matches!(results[1], Err(CollectiveErr::Aborted(_))));
    assert!(matches!(results[2], Err(CollectiveErr::Aborted(_))));
}

#[test]
fn scatter_lengths_must_cover_the_data() {
    let results = run_group(2, |mut group| {
        let full = [1.0, 2.0, 3.0];
        let data = (group.rank() == 0).then_some(&full[..]);
        group.scatter(data, 1, 0)
    });

    assert!(matches!(
        results[0],
        Err(CollectiveErr::ShapeMismatch { op: Op::Scatter, .. })
    ));
    assert!(matches!(results[1], Err(CollectiveErr::Aborted(_))));
}

#[test]
fn single_rank_group_is_local() {
    let mut group = comms::in_memory(1).unwrap().remove(0);

    let mut buf = [1.0, 2.0];
    group.reduce_sum(&mut buf).unwrap();
    assert_eq!(buf, [1.0, 2.0]);

    let shard = group.scatter(Some(&[7.0, 8.0]), 2, 0).unwrap();
    assert_eq!(shard, vec![7.0, 8.0]);
}

#[test]
fn only_the_source_may_hold_scatter_data() {
    let mut groups = comms::in_memory(2).unwrap();
    let mut peer = groups.pop().unwrap();

    let err = peer.scatter(Some(&[1.0]), 1, 0).unwrap_err();
    assert!(matches!(err, CollectiveErr::SourceMismatch { rank: 1, src: 0 }));
}

/// A rank that issues one collective more than the rest of the group blocks without bound. The
/// harness waits a bounded time to show the call is still pending, then tears the group down.
#[test]
fn unmatched_collective_blocks_until_the_group_is_torn_down() {
    const WAIT: Duration = Duration::from_millis(500);

    let mut groups = comms::in_memory(2).unwrap();
    let mut peer = groups.pop().unwrap();
    let mut hub = groups.pop().unwrap();

    let (release_tx, release_rx) = mpsc::channel::<()>();
    let hub_thread = thread::spawn(move || {
        let mut buf = [1.0];
        hub.reduce_sum(&mut buf).unwrap();

        // Keep the links open without issuing the second call.
        release_rx.recv().unwrap();
        drop(hub);
    });

    let (done_tx, done_rx) = mpsc::channel();
    let peer_thread = thread::spawn(move || {
        let mut buf = [1.0];
        peer.reduce_sum(&mut buf).unwrap();
        done_tx.send(("first", Ok(()))).unwrap();

        let second = peer.reduce_sum(&mut buf);
        done_tx.send(("second", second)).unwrap();
    });

    let (call, first) = done_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(call, "first");
    assert!(first.is_ok());

    assert!(matches!(
        done_rx.recv_timeout(WAIT),
        Err(mpsc::RecvTimeoutError::Timeout)
    ));

    release_tx.send(()).unwrap();
    hub_thread.join().unwrap();

    let (call, second) = done_rx.recv().unwrap();
    assert_eq!(call, "second");
    assert!(matches!(second, Err(CollectiveErr::Io(_))));

    peer_thread.join().unwrap();
}
