use std::sync::mpsc;
use std::sync::Arc;
use std::sync::Mutex;

use futures::executor::block_on;
use futures::executor::ThreadPool;

use paxview::acceptor::Acceptor;
use paxview::acceptor::AcceptorHandle;
use paxview::acceptor::RequestHandler;
use paxview::acceptor::SpawnArgs;
use paxview::error::IoError;
use paxview::error::RunError;
use paxview::executor::Executor;
use paxview::executor::StdThread;
use paxview::fault::Breakpoints;
use paxview::fault::Checkpoint;
use paxview::fault::Faults;
use paxview::fault::Verdict;
use paxview::log::AcceptorLog;
use paxview::log::EphemeralLog;
use paxview::log::Replayed;
use paxview::prototyping::DirectCommunicator;
use paxview::prototyping::DirectCommunicators;
use paxview::NodeAddr;
use paxview::ProposalNum;
use paxview::Proposer;

type Network = DirectCommunicators<String>;

struct Site {
    addr: NodeAddr,
    acceptor: AcceptorHandle<String>,
}

impl Site {
    fn proposer(&self, network: &Network) -> Proposer<DirectCommunicator<String>> {
        Proposer::new(
            self.addr.clone(),
            self.acceptor.clone(),
            network.create_communicator_for(self.addr.clone()),
        )
    }

    fn decided(&self, instance: u64) -> Option<String> {
        block_on(self.acceptor.decided(instance)).unwrap()
    }
}

fn site<L: AcceptorLog<String>, E: Executor>(
    network: &Network,
    name: &str,
    log: L,
    executor: &E,
) -> Site {
    let addr = NodeAddr::from(name);
    let acceptor = Acceptor::spawn(
        SpawnArgs {
            me: addr.clone(),
            log,
            listener: (),
            bootstrap: None,
        },
        executor,
    )
    .unwrap();

    network.register_acceptor(addr.clone(), RequestHandler::new(acceptor.clone()));

    Site { addr, acceptor }
}

fn sites(network: &Network, names: &[&str]) -> (Vec<Site>, Vec<NodeAddr>) {
    let sites = names
        .iter()
        .map(|name| site(network, name, EphemeralLog::new(), &StdThread))
        .collect::<Vec<_>>();

    let addrs = sites.iter().map(|s| s.addr.clone()).collect();

    (sites, addrs)
}

/// Logs promises and acceptances but can't persist decisions.
struct FullDisk(EphemeralLog<String>);

impl AcceptorLog<String> for FullDisk {
    fn log_promise(&mut self, instance: u64, n: &ProposalNum) -> Result<(), IoError> {
        self.0.log_promise(instance, n)
    }

    fn log_accept(&mut self, instance: u64, n: &ProposalNum, value: &String) -> Result<(), IoError> {
        self.0.log_accept(instance, n, value)
    }

    fn log_commit(&mut self, _instance: u64, _value: &String) -> Result<(), IoError> {
        Err(IoError::new(
            "Failed to append to acceptor log.",
            std::io::Error::new(std::io::ErrorKind::Other, "no space left"),
        ))
    }

    fn replay(&mut self) -> Result<Replayed<String>, IoError> {
        self.0.replay()
    }
}

/// Holds a node at a checkpoint until released.
struct Gate {
    checkpoint: Checkpoint,
    reached: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl Gate {
    fn new(checkpoint: Checkpoint) -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (reached_send, reached_recv) = mpsc::channel();
        let (release_send, release_recv) = mpsc::channel();

        let gate = Self {
            checkpoint,
            reached: Mutex::new(Some(reached_send)),
            release: Mutex::new(release_recv),
        };

        (gate, reached_recv, release_send)
    }
}

impl Faults for Gate {
    fn at(&self, _node: &NodeAddr, checkpoint: Checkpoint) -> Verdict {
        if checkpoint == self.checkpoint {
            if let Some(reached) = self.reached.lock().unwrap().take() {
                reached.send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
        }

        Verdict::Proceed
    }
}

#[test]
fn three_acceptors_agree_on_first_proposal() {
    let network = Network::new();
    let (sites, nodes) = sites(&network, &["n1", "n2", "n3"]);

    let decided = block_on(sites[0].proposer(&network).run(1, &nodes, "viewA".to_owned()));

    assert_eq!(decided.unwrap(), "viewA");
    for site in &sites {
        assert_eq!(site.decided(1).as_deref(), Some("viewA"));
    }
}

#[test]
fn higher_proposal_prevails_over_interrupted_one() {
    let network = Network::new();
    let (sites, nodes) = sites(&network, &["n1", "n2", "n3"]);

    let (gate, reached, release) = Gate::new(Checkpoint::BeforeAccept);
    let p1 = sites[0].proposer(&network).with_faults(Arc::new(gate));

    let p1_nodes = nodes.clone();
    let first = {
        let p1 = p1.clone();
        std::thread::spawn(move || block_on(p1.run(1, &p1_nodes, "viewA".to_owned())))
    };

    // p1 holds promises from a majority
    reached.recv().unwrap();

    assert!(matches!(
        block_on(p1.run(1, &nodes, "viewA".to_owned())),
        Err(RunError::AlreadyRunning)
    ));

    // p2 gets a majority to accept its value but dies before deciding
    let breakpoints = Arc::new(Breakpoints::new());
    breakpoints.arm(Checkpoint::BeforeDecide);
    let p2 = sites[1].proposer(&network).with_faults(breakpoints);

    assert!(matches!(
        block_on(p2.run(1, &nodes, "viewB".to_owned())),
        Err(RunError::Crashed(Checkpoint::BeforeDecide))
    ));

    release.send(()).unwrap();

    match first.join().unwrap() {
        Err(RunError::RejectedProposal { promised }) => {
            assert_eq!(promised.proposer(), &NodeAddr::from("n2"));
        }
        r => panic!("expected rejection, got {:?}", r),
    }

    // trying again, p1 must adopt the accepted value
    let decided = block_on(p1.run(1, &nodes, "viewA".to_owned())).unwrap();
    assert_eq!(decided, "viewB");

    for site in &sites {
        assert_eq!(site.decided(1).as_deref(), Some("viewB"));
    }
}

#[test]
fn stale_proposer_learns_decided_value() {
    let network = Network::new();
    let (sites, nodes) = sites(&network, &["n1", "n2", "n3"]);

    block_on(network.set_reachable(&nodes[2], false));
    block_on(sites[0].proposer(&network).run(1, &nodes, "x".to_owned())).unwrap();
    block_on(network.set_reachable(&nodes[2], true));

    assert_eq!(sites[2].decided(1), None);

    let stale = block_on(sites[2].proposer(&network).run(1, &nodes, "y".to_owned()));

    assert!(matches!(stale, Err(RunError::StaleInstance { instance: 1 })));
    assert_eq!(sites[2].decided(1).as_deref(), Some("x"));
}

#[test]
fn failure_to_log_learned_decision_is_reported() {
    let network = Network::new();
    let (mut sites, mut nodes) = sites(&network, &["n1", "n2"]);
    let n3 = site(&network, "n3", FullDisk(EphemeralLog::new()), &StdThread);
    nodes.push(n3.addr.clone());
    sites.push(n3);

    block_on(network.set_reachable(&nodes[2], false));
    block_on(sites[0].proposer(&network).run(1, &nodes, "x".to_owned())).unwrap();
    block_on(network.set_reachable(&nodes[2], true));

    let r = block_on(sites[2].proposer(&network).run(1, &nodes, "y".to_owned()));

    assert!(matches!(r, Err(RunError::IoError(_))));
    assert_eq!(sites[2].decided(1), None);
}

#[test]
fn acceptors_run_on_thread_pool() {
    let pool = ThreadPool::builder().pool_size(2).create().unwrap();
    let network = Network::new();

    let sites = ["n1", "n2", "n3"]
        .iter()
        .map(|name| site(&network, name, EphemeralLog::new(), &pool))
        .collect::<Vec<_>>();
    let nodes = sites.iter().map(|s| s.addr.clone()).collect::<Vec<_>>();

    let p = sites[1].proposer(&network);
    assert_eq!(block_on(p.run(1, &nodes, "x".to_owned())).unwrap(), "x");
    assert_eq!(block_on(p.run(2, &nodes, "y".to_owned())).unwrap(), "y");

    for site in &sites {
        assert_eq!(site.decided(2).as_deref(), Some("y"));
    }
}

#[test]
fn lagging_acceptor_is_caught_up_on_decide() {
    let network = Network::new();
    let (sites, nodes) = sites(&network, &["n1", "n2", "n3"]);
    let p1 = sites[0].proposer(&network);

    block_on(network.set_reachable(&nodes[2], false));
    block_on(p1.run(1, &nodes, "x".to_owned())).unwrap();
    block_on(p1.run(2, &nodes, "y".to_owned())).unwrap();
    block_on(network.set_reachable(&nodes[2], true));

    block_on(p1.run(3, &nodes, "z".to_owned())).unwrap();

    assert_eq!(
        block_on(sites[2].acceptor.history(1)).unwrap(),
        vec![
            (1, "x".to_owned()),
            (2, "y".to_owned()),
            (3, "z".to_owned())
        ]
    );
}

#[test]
fn minority_cannot_decide() {
    let network = Network::new();
    let (sites, nodes) = sites(&network, &["n1", "n2", "n3"]);

    block_on(network.set_reachable(&nodes[1], false));
    block_on(network.set_reachable(&nodes[2], false));

    let r = block_on(sites[0].proposer(&network).run(1, &nodes, "x".to_owned()));

    assert!(matches!(
        r,
        Err(RunError::QuorumUnreachable {
            granted: 1,
            needed: 2,
            ..
        })
    ));
    assert_eq!(sites[0].decided(1), None);
}

#[test]
fn proposal_outbids_known_promises() {
    let network = Network::new();
    let (sites, nodes) = sites(&network, &["n1", "n2", "n3"]);

    for site in &sites {
        block_on(site.acceptor.prepare(1, ProposalNum::new(41, "n9".into()))).unwrap();
    }

    let decided = block_on(sites[0].proposer(&network).run(1, &nodes, "x".to_owned()));

    assert_eq!(decided.unwrap(), "x");
    for site in &sites {
        assert_eq!(site.decided(1).as_deref(), Some("x"));
    }
}
