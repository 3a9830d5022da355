mod cluster;
mod lock_app;

use std::path::Path;

use futures::channel::mpsc;
use futures::executor::block_on;

use paxview::acceptor::Acceptor;
use paxview::acceptor::AcceptReply;
use paxview::acceptor::AcceptorHandle;
use paxview::acceptor::CommitListener;
use paxview::acceptor::DecideReply;
use paxview::acceptor::PrepareReply;
use paxview::acceptor::SpawnArgs;
use paxview::executor::StdThread;
use paxview::log::FileLog;
use paxview::NodeAddr;
use paxview::ProposalNum;

use cluster::LockReplica;
use cluster::Network;

fn spawn_acceptor<N: CommitListener<String>>(dir: &Path, listener: N) -> AcceptorHandle<String> {
    Acceptor::spawn(
        SpawnArgs {
            me: NodeAddr::from("n1"),
            log: FileLog::open(dir).unwrap(),
            listener,
            bootstrap: None,
        },
        &StdThread,
    )
    .unwrap()
}

fn n(round: u64, proposer: &str) -> ProposalNum {
    ProposalNum::new(round, NodeAddr::from(proposer))
}

#[test]
fn promises_and_acceptances_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let acceptor = spawn_acceptor(dir.path(), ());
    assert_eq!(
        block_on(acceptor.prepare(1, n(1, "n1"))).unwrap(),
        PrepareReply::Promise { accepted: None }
    );
    assert_eq!(
        block_on(acceptor.accept(1, n(1, "n1"), "a".to_owned())).unwrap(),
        AcceptReply::Accepted
    );
    block_on(acceptor.shut_down()).unwrap();

    let acceptor = spawn_acceptor(dir.path(), ());
    assert_eq!(
        block_on(acceptor.prepare(1, n(1, "n0"))).unwrap(),
        PrepareReply::Rejected {
            promised: n(1, "n1")
        }
    );
    assert_eq!(
        block_on(acceptor.prepare(1, n(2, "n2"))).unwrap(),
        PrepareReply::Promise {
            accepted: Some((n(1, "n1"), "a".to_owned()))
        }
    );
}

#[test]
fn decided_values_are_replayed_to_listener() {
    let dir = tempfile::tempdir().unwrap();

    let acceptor = spawn_acceptor(dir.path(), ());
    block_on(acceptor.prepare(1, n(1, "n1"))).unwrap();
    block_on(acceptor.accept(1, n(1, "n1"), "a".to_owned())).unwrap();
    assert_eq!(
        block_on(acceptor.decide(1, "a".to_owned())).unwrap(),
        DecideReply::Committed
    );
    assert_eq!(
        block_on(acceptor.decide(2, "b".to_owned())).unwrap(),
        DecideReply::Committed
    );
    block_on(acceptor.shut_down()).unwrap();

    let (sender, mut receiver) = mpsc::unbounded();
    let acceptor = spawn_acceptor(dir.path(), sender);

    assert_eq!(receiver.try_next().unwrap(), Some((1, "a".to_owned())));
    assert_eq!(receiver.try_next().unwrap(), Some((2, "b".to_owned())));
    assert_eq!(block_on(acceptor.status()).unwrap().highest, 2);
    assert_eq!(
        block_on(acceptor.decide(2, "b".to_owned())).unwrap(),
        DecideReply::AlreadyCommitted
    );
}

fn spawn_replica(network: &Network, me: &str, dir: &Path, contact: Option<&str>) -> LockReplica {
    let builder = paxview::replica_builder()
        .for_node(me)
        .working_in(dir)
        .communicating_via(network.create_communicator_for(me))
        .executing(lock_app::lock_service())
        .with_timeouts(cluster::timeouts())
        .with_retry(cluster::retry());

    let builder = match contact {
        Some(contact) => builder.joining_via(contact),
        None => builder.bootstrapping(),
    };

    let replica = builder.spawn().unwrap();
    cluster::register(network, &replica);

    replica
}

#[test]
fn replica_resumes_view_after_restart() {
    cluster::init_tracing();

    let network = Network::new();
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let a = spawn_replica(&network, "a", dir_a.path(), None);
    cluster::await_view(&[&a], 1);
    let b = spawn_replica(&network, "b", dir_b.path(), Some("a"));
    cluster::await_view(&[&a, &b], 2);

    block_on(b.shut_down());

    let b = spawn_replica(&network, "b", dir_b.path(), Some("a"));
    cluster::await_until("b to replay its view", || {
        let status = cluster::status(&b);
        status.is_member && status.vid == 2
    });

    // b completes its view change along with the next one
    let c = cluster::spawn(&network, "c", Some("a"), None);
    cluster::await_view(&[&a, &b, &c], 3);

    assert_eq!(cluster::status(&b).primary, Some(cluster::addr("a")));
}
