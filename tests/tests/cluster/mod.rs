#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use paxview::fault::Breakpoints;
use paxview::prototyping::DirectCommunicator;
use paxview::prototyping::DirectCommunicators;
use paxview::retry::RetrySettings;
use paxview::rsm::ReplicaStatus;
use paxview::rsm::Timeouts;
use paxview::view::ViewId;
use paxview::NodeAddr;
use paxview::Replica;
use paxview::View;

pub type Network = DirectCommunicators<View>;
pub type LockReplica = Replica<DirectCommunicator<View>>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

pub fn timeouts() -> Timeouts {
    Timeouts {
        call: Duration::from_millis(500),
        join: Duration::from_secs(5),
    }
}

pub fn retry() -> RetrySettings {
    RetrySettings {
        initial_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(100),
        multiplier: 2.0,
        max_elapsed: None,
    }
}

/// Spawns the replica `me`. It bootstraps if `contact` is `None` and joins
/// through `contact` otherwise.
pub fn spawn(
    network: &Network,
    me: &str,
    contact: Option<&str>,
    faults: Option<Arc<Breakpoints>>,
) -> LockReplica {
    let builder = paxview::replica_builder()
        .for_node(me)
        .working_ephemerally()
        .communicating_via(network.create_communicator_for(me))
        .executing(crate::lock_app::lock_service())
        .with_timeouts(timeouts())
        .with_retry(retry());

    let builder = match contact {
        Some(contact) => builder.joining_via(contact),
        None => builder.bootstrapping(),
    };
    let builder = match faults {
        Some(faults) => builder.with_faults(faults),
        None => builder,
    };

    let replica = builder.spawn().unwrap();

    register(network, &replica);

    replica
}

pub fn register(network: &Network, replica: &LockReplica) {
    network.register_acceptor(replica.me().clone(), replica.acceptor_request_handler());
    network.register_replica(replica.me().clone(), replica.request_handler());
}

pub fn status(replica: &LockReplica) -> ReplicaStatus {
    futures::executor::block_on(replica.status()).unwrap()
}

/// Polls `condition` until it holds, panics after a while.
pub fn await_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(20);

    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }

        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Waits until all `replicas` completed the change to view `vid`.
pub fn await_view(replicas: &[&LockReplica], vid: ViewId) {
    await_until(&format!("view {}", vid), || {
        replicas.iter().all(|r| {
            let s = status(r);
            s.vid == vid && !s.in_view_change
        })
    });
}

/// Spawns a bootstrapping replica and has the others join it one by one.
pub fn form(network: &Network, names: &[&str]) -> Vec<LockReplica> {
    let mut replicas: Vec<LockReplica> = Vec::new();

    for (i, name) in names.iter().enumerate() {
        let contact = if i == 0 { None } else { Some(names[0]) };

        replicas.push(spawn(network, name, contact, None));

        let all = replicas.iter().collect::<Vec<_>>();
        await_view(&all, i as ViewId + 1);
    }

    replicas
}

pub fn addr(name: &str) -> NodeAddr {
    NodeAddr::from(name)
}
