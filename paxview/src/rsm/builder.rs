use std::path::PathBuf;
use std::sync::Arc;

use futures::channel::mpsc;

use crate::acceptor::Acceptor;
use crate::acceptor::SpawnArgs;
use crate::communicator::ReplicaCommunicator;
use crate::config::Config;
use crate::error::SpawnError;
use crate::executor::Executor;
use crate::executor::StdThread;
use crate::fault::Faults;
use crate::fault::NoFaults;
use crate::log::AcceptorLog;
use crate::log::EphemeralLog;
use crate::log::FileLog;
use crate::proposer::Proposer;
use crate::retry::RetrySettings;
use crate::state_machine::StateMachine;
use crate::view::NodeAddr;
use crate::view::View;

use super::handle::KeeperHandle;
use super::keeper::Keeper;
use super::recovery::Recovery;
use super::Replica;
use super::Timeouts;

/// Starts building a [`Replica`].
pub fn builder() -> ReplicaBuilderBlank {
    ReplicaBuilderBlank
}

#[derive(Default)]
pub struct ReplicaBuilderBlank;

impl ReplicaBuilderBlank {
    pub fn for_node(self, me: impl Into<NodeAddr>) -> ReplicaBuilderWithAddr {
        ReplicaBuilderWithAddr { me: me.into() }
    }
}

pub struct ReplicaBuilderWithAddr {
    me: NodeAddr,
}

enum LogSpec {
    WorkingDir(PathBuf),
    Given(Box<dyn AcceptorLog<View>>),
}

impl ReplicaBuilderWithAddr {
    /// Keeps the acceptor's log in `dir`.
    pub fn working_in(self, dir: impl AsRef<std::path::Path>) -> ReplicaBuilderWithLog {
        ReplicaBuilderWithLog {
            me: self.me,
            log: LogSpec::WorkingDir(dir.as_ref().to_path_buf()),
        }
    }

    /// Keeps the acceptor's log in memory. Everything is lost when the
    /// replica stops.
    pub fn working_ephemerally(self) -> ReplicaBuilderWithLog {
        self.logging_to(EphemeralLog::new())
    }

    pub fn logging_to<L: AcceptorLog<View>>(self, log: L) -> ReplicaBuilderWithLog {
        ReplicaBuilderWithLog {
            me: self.me,
            log: LogSpec::Given(Box::new(log)),
        }
    }
}

pub struct ReplicaBuilderWithLog {
    me: NodeAddr,
    log: LogSpec,
}

impl ReplicaBuilderWithLog {
    pub fn communicating_via<C: ReplicaCommunicator>(
        self,
        communicator: C,
    ) -> ReplicaBuilderWithCommunicator<C> {
        ReplicaBuilderWithCommunicator {
            me: self.me,
            log: self.log,
            communicator,
        }
    }
}

pub struct ReplicaBuilderWithCommunicator<C> {
    me: NodeAddr,
    log: LogSpec,
    communicator: C,
}

impl<C: ReplicaCommunicator> ReplicaBuilderWithCommunicator<C> {
    pub fn executing<M: StateMachine>(self, state_machine: M) -> ReplicaBuilder<C, M> {
        ReplicaBuilder {
            me: self.me,
            log: self.log,
            communicator: self.communicator,
            state_machine,

            start: Start::Joining(None),
            timeouts: Timeouts::default(),
            faults: Arc::new(NoFaults),
            retry: RetrySettings::default(),
        }
    }
}

enum Start {
    Bootstrapping,
    Joining(Option<NodeAddr>),
}

pub struct ReplicaBuilder<C, M> {
    me: NodeAddr,
    log: LogSpec,
    communicator: C,
    state_machine: M,

    start: Start,
    timeouts: Timeouts,
    faults: Arc<dyn Faults>,
    retry: RetrySettings,
}

impl<C: ReplicaCommunicator, M: StateMachine> ReplicaBuilder<C, M> {
    /// Makes this replica the sole member of view `1`, unless its log shows
    /// it took part in agreement before.
    pub fn bootstrapping(mut self) -> Self {
        self.start = Start::Bootstrapping;
        self
    }

    /// Has this replica join the view through `contact` whenever it is not a
    /// member.
    pub fn joining_via(mut self, contact: impl Into<NodeAddr>) -> Self {
        self.start = Start::Joining(Some(contact.into()));
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_faults<F: Faults>(mut self, faults: F) -> Self {
        self.faults = Arc::new(faults);
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// Spawns the replica's tasks on a thread each.
    pub fn spawn(self) -> Result<Replica<C>, SpawnError> {
        self.spawn_in(StdThread)
    }

    pub fn spawn_in<E: Executor>(self, executor: E) -> Result<Replica<C>, SpawnError> {
        let ReplicaBuilder {
            me,
            log,
            communicator,
            state_machine,

            start,
            timeouts,
            faults,
            retry,
        } = self;

        let log: Box<dyn AcceptorLog<View>> = match log {
            LogSpec::WorkingDir(dir) => {
                if dir.exists() && !dir.is_dir() {
                    return Err(SpawnError::InvalidWorkingDir(
                        dir,
                        "not a directory".into(),
                    ));
                }

                Box::new(FileLog::open(&dir)?)
            }
            LogSpec::Given(log) => log,
        };

        let (bootstrap, contact) = match start {
            Start::Bootstrapping => (Some(View::new([me.clone()])), None),
            Start::Joining(contact) => (None, contact),
        };

        // the keeper must be listening before the acceptor replays its log
        let (commit_sender, commit_receiver) = mpsc::unbounded();
        let (keeper_sender, keeper_receiver) = mpsc::channel(32);

        let keeper = Keeper::new(me.clone(), state_machine);
        executor
            .execute(keeper.run(keeper_receiver, commit_receiver))
            .map_err(|e| SpawnError::Executor(Box::new(e)))?;

        let acceptor = Acceptor::spawn(
            SpawnArgs {
                me: me.clone(),
                log,
                listener: commit_sender,
                bootstrap,
            },
            &executor,
        )?;

        let proposer = Proposer::new(me.clone(), acceptor, communicator.clone())
            .with_faults(Arc::clone(&faults))
            .with_call_timeout(timeouts.call);

        let replica = Replica {
            me,
            keeper: KeeperHandle::new(keeper_sender),
            config: Config::new(proposer),
            communicator,
            faults,
            timeouts,

            invoking: Arc::new(futures::lock::Mutex::new(())),
        };

        executor
            .execute(Recovery::new(replica.clone(), contact, retry).run())
            .map_err(|e| SpawnError::Executor(Box::new(e)))?;

        Ok(replica)
    }
}
