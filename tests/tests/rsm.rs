mod cluster;
mod lock_app;

use std::sync::Arc;

use futures::executor::block_on;
use uuid::Uuid;

use paxview::error::InvokeError;
use paxview::error::ReplicateError;
use paxview::fault::Breakpoints;
use paxview::fault::Checkpoint;
use paxview::Viewstamp;

use cluster::addr;
use cluster::LockReplica;
use cluster::Network;

fn acquire(replica: &LockReplica, lid: lock_app::LockId, owner: Uuid) -> Result<bool, InvokeError> {
    block_on(replica.invoke(lock_app::ACQUIRE, lock_app::acquire_args(lid, owner)))
        .map(|reply| lock_app::granted(&reply))
}

#[test]
fn bootstrapping_replica_is_sole_primary() {
    cluster::init_tracing();

    let network = Network::new();
    let a = cluster::spawn(&network, "a", None, None);

    cluster::await_view(&[&a], 1);

    let status = cluster::status(&a);
    assert!(status.is_primary());
    assert!(status.is_member);
    assert_eq!(status.view.members(), &[addr("a")]);

    assert_eq!(acquire(&a, 1, Uuid::new_v4()), Ok(true));
}

#[test]
fn joining_replicas_become_backups() {
    cluster::init_tracing();

    let network = Network::new();
    let replicas = cluster::form(&network, &["a", "b", "c"]);

    for replica in &replicas {
        let status = cluster::status(replica);

        assert_eq!(status.vid, 3);
        assert_eq!(status.view.members(), &[addr("a"), addr("b"), addr("c")]);
        assert_eq!(status.primary, Some(addr("a")));
    }

    assert_eq!(
        acquire(&replicas[1], 1, Uuid::new_v4()),
        Err(InvokeError::NotPrimary)
    );
}

#[test]
fn operations_are_numbered_without_gaps() {
    cluster::init_tracing();

    let network = Network::new();
    let replicas = cluster::form(&network, &["a", "b", "c"]);
    let owner = Uuid::new_v4();

    for lid in 1..=5 {
        assert_eq!(acquire(&replicas[0], lid, owner), Ok(true));
    }

    for replica in &replicas {
        let status = cluster::status(replica);

        assert_eq!(status.last_applied, Viewstamp::new(3, 5));
        assert_eq!(status.next_expected, Viewstamp::new(3, 6));
    }

    // a lock granted before is not granted to someone else
    assert_eq!(acquire(&replicas[0], 3, Uuid::new_v4()), Ok(false));
}

#[test]
fn state_is_transferred_to_joining_replicas() {
    cluster::init_tracing();

    let network = Network::new();
    let a = cluster::spawn(&network, "a", None, None);
    cluster::await_view(&[&a], 1);

    let owner = Uuid::new_v4();
    assert_eq!(acquire(&a, 1, owner), Ok(true));
    block_on(a.invoke(lock_app::RELEASE, lock_app::release_args(1, owner))).unwrap();
    assert_eq!(acquire(&a, 1, owner), Ok(true));

    let b = cluster::spawn(&network, "b", Some("a"), None);
    cluster::await_view(&[&a, &b], 2);
    let c = cluster::spawn(&network, "c", Some("a"), None);
    cluster::await_view(&[&a, &b, &c], 3);

    block_on(network.set_reachable(&addr("a"), false));
    assert_eq!(block_on(b.remove(&addr("a"))).unwrap(), 4);
    cluster::await_view(&[&b, &c], 4);

    assert!(cluster::status(&b).is_primary());

    let stat = block_on(b.invoke(lock_app::STAT, lock_app::stat_args(1))).unwrap();
    assert_eq!(lock_app::acquisitions(&stat), 2);
    assert_eq!(acquire(&b, 1, Uuid::new_v4()), Ok(false));
}

#[test]
fn operation_survives_primary_crash_after_replication() {
    cluster::init_tracing();

    let network = Network::new();
    let breakpoints = Arc::new(Breakpoints::new());

    let a = cluster::spawn(&network, "a", None, Some(Arc::clone(&breakpoints)));
    cluster::await_view(&[&a], 1);
    let b = cluster::spawn(&network, "b", Some("a"), None);
    cluster::await_view(&[&a, &b], 2);
    let c = cluster::spawn(&network, "c", Some("a"), None);
    cluster::await_view(&[&a, &b, &c], 3);

    breakpoints.arm(Checkpoint::AfterReplicate);

    let owner = Uuid::new_v4();
    assert_eq!(
        acquire(&a, 7, owner),
        Err(InvokeError::Crashed(Checkpoint::AfterReplicate))
    );

    // the primary is gone for good
    block_on(network.set_reachable(&addr("a"), false));

    assert_eq!(block_on(b.remove(&addr("a"))).unwrap(), 4);
    cluster::await_view(&[&b, &c], 4);

    let status = cluster::status(&c);
    assert_eq!(status.primary, Some(addr("b")));
    assert_eq!(status.view.members(), &[addr("b"), addr("c")]);

    // the backups executed the operation, so the lock stays with its owner
    assert_eq!(acquire(&b, 7, Uuid::new_v4()), Ok(false));
    assert_eq!(acquire(&b, 7, owner), Ok(true));
}

#[test]
fn further_view_change_restarts_stalled_sync() {
    cluster::init_tracing();

    let network = Network::new();
    let replicas = cluster::form(&network, &["a", "b", "c"]);
    let a = &replicas[0];

    block_on(network.set_reachable(&addr("c"), false));

    // c never completes its transfer for view 4
    let d = cluster::spawn(&network, "d", Some("a"), None);
    cluster::await_until("a to sync view 4", || {
        let status = cluster::status(a);
        status.vid == 4 && status.in_view_change && status.in_sync
    });
    assert_eq!(acquire(a, 1, Uuid::new_v4()), Err(InvokeError::Busy));

    assert_eq!(block_on(a.remove(&addr("c"))).unwrap(), 5);
    cluster::await_view(&[a, &replicas[1], &d], 5);

    assert_eq!(
        cluster::status(&d).view.members(),
        &[addr("a"), addr("b"), addr("d")]
    );
    assert_eq!(acquire(a, 1, Uuid::new_v4()), Ok(true));
}

#[test]
fn backup_refuses_out_of_order_operations() {
    cluster::init_tracing();

    let network = Network::new();
    let replicas = cluster::form(&network, &["a", "b"]);
    let (a, b) = (&replicas[0], &replicas[1]);

    let misordered = block_on(b.request_handler().handle_replicate(
        lock_app::ACQUIRE,
        Viewstamp::new(2, 5),
        lock_app::acquire_args(1, Uuid::new_v4()),
    ));
    assert_eq!(
        misordered,
        Err(ReplicateError::OrderingViolation {
            expected: Viewstamp::new(2, 1),
            received: Viewstamp::new(2, 5),
        })
    );

    // b executes the operation but a never learns of it
    block_on(network.set_packet_loss(&addr("b"), &addr("a"), 1.0));
    assert_eq!(acquire(a, 1, Uuid::new_v4()), Err(InvokeError::Busy));
    block_on(network.set_packet_loss(&addr("b"), &addr("a"), 0.0));

    assert_eq!(cluster::status(b).last_applied, Viewstamp::new(2, 1));

    // from now on a and b disagree on the next operation
    let last_applied = cluster::status(a).last_applied;
    assert_eq!(acquire(a, 1, Uuid::new_v4()), Err(InvokeError::Busy));
    assert_eq!(cluster::status(a).last_applied, last_applied);

    // the next view change resets b to the primary's state
    let c = cluster::spawn(&network, "c", Some("a"), None);
    cluster::await_view(&[a, b, &c], 3);

    let owner = Uuid::new_v4();
    assert_eq!(acquire(a, 1, owner), Ok(true));

    for replica in [a, b, &c] {
        assert_eq!(cluster::status(replica).last_applied, Viewstamp::new(3, 1));
    }
}

#[test]
fn operations_complete_despite_network_delays() {
    cluster::init_tracing();

    let network = Network::with_characteristics(
        0.0,
        Some(rand_distr::Normal::new(2.0, 1.0).unwrap()),
    );
    let replicas = cluster::form(&network, &["a", "b", "c"]);
    let owner = Uuid::new_v4();

    for lid in 1..=10 {
        assert_eq!(acquire(&replicas[0], lid, owner), Ok(true));
    }

    let stat = block_on(replicas[0].invoke(lock_app::STAT, lock_app::stat_args(10))).unwrap();
    assert_eq!(lock_app::acquisitions(&stat), 1);

    for replica in &replicas {
        assert_eq!(
            cluster::status(replica).last_applied,
            Viewstamp::new(3, 11)
        );
    }
}

#[test]
fn shut_down_replica_refuses_operations() {
    cluster::init_tracing();

    let network = Network::new();
    let a = cluster::spawn(&network, "a", None, None);
    cluster::await_view(&[&a], 1);

    block_on(a.shut_down());

    assert_eq!(acquire(&a, 1, Uuid::new_v4()), Err(InvokeError::ShutDown));
    assert!(block_on(a.status()).is_err());
}
