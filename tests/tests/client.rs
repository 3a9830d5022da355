mod cluster;
mod lock_app;

use std::time::Duration;

use futures::executor::block_on;
use uuid::Uuid;

use paxview::error::ClientError;
use paxview::error::ExecuteError;
use paxview::prototyping::DirectCommunicator;
use paxview::retry::RetrySettings;
use paxview::RsmClient;
use paxview::View;

use cluster::addr;
use cluster::Network;

fn client(network: &Network, members: &[&str]) -> RsmClient<DirectCommunicator<View>> {
    RsmClient::new(
        network.create_communicator_for("client"),
        members.iter().map(|m| addr(m)),
    )
    .with_call_timeout(Duration::from_secs(2))
    .with_retry(cluster::retry().giving_up_after(Duration::from_secs(20)))
}

#[test]
fn client_finds_primary() {
    cluster::init_tracing();

    let network = Network::new();
    let _replicas = cluster::form(&network, &["a", "b", "c"]);

    // c learns of the primary from whoever answers
    let mut client = client(&network, &["c"]);
    let owner = Uuid::new_v4();

    let args = lock_app::acquire_args(1, owner);
    let reply = block_on(client.invoke(lock_app::ACQUIRE, args)).unwrap();

    assert!(lock_app::granted(&reply));
    assert_eq!(client.primary(), Some(&addr("a")));
    assert_eq!(client.members(), &[addr("c"), addr("a"), addr("b")]);
}

#[test]
fn client_follows_primary_across_views() {
    cluster::init_tracing();

    let network = Network::new();
    let replicas = cluster::form(&network, &["a", "b", "c"]);

    let mut client = client(&network, &["a", "b", "c"]);
    let owner = Uuid::new_v4();

    let args = lock_app::acquire_args(1, owner);
    let reply = block_on(client.invoke(lock_app::ACQUIRE, args)).unwrap();
    assert!(lock_app::granted(&reply));

    block_on(network.set_reachable(&addr("a"), false));
    assert_eq!(block_on(replicas[1].remove(&addr("a"))).unwrap(), 4);
    cluster::await_view(&[&replicas[1], &replicas[2]], 4);

    let args = lock_app::acquire_args(1, Uuid::new_v4());
    let reply = block_on(client.invoke(lock_app::ACQUIRE, args)).unwrap();

    assert!(!lock_app::granted(&reply));
    assert_eq!(client.primary(), Some(&addr("b")));
}

#[test]
fn execution_errors_are_not_retried() {
    cluster::init_tracing();

    let network = Network::new();
    let _replicas = cluster::form(&network, &["a"]);

    let mut client = client(&network, &["a"]);

    // releasing a lock nobody holds fails in the state machine
    let args = lock_app::release_args(9, Uuid::new_v4());
    let r = block_on(client.invoke(lock_app::RELEASE, args));

    assert!(matches!(r, Err(ClientError::Execution(ExecuteError::Failed(_)))));
}

#[test]
fn client_gives_up_without_members() {
    let network = Network::new();

    let mut client = RsmClient::new(network.create_communicator_for("client"), Vec::new())
        .with_retry(RetrySettings::default().giving_up_after(Duration::from_millis(50)));

    let r = block_on(client.invoke(lock_app::STAT, lock_app::stat_args(1)));

    assert!(matches!(r, Err(ClientError::Exhausted)));
}
