//! Defines the [`Executor`] trait and its [default implementation][StdThread].

use futures::FutureExt;

/// Runs a node's long-lived tasks, i.e. its actors and the recovery loop.
pub trait Executor: Clone + Send + 'static {
    /// Type of error yielded when a task cannot be executed.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Executes the given task.
    fn execute<F: std::future::Future<Output = ()> + Send + 'static>(
        &self,
        task: F,
    ) -> Result<(), Self::Error>;
}

impl<S: futures::task::Spawn + Clone + Send + 'static> Executor for S {
    type Error = futures::task::SpawnError;

    fn execute<F: std::future::Future<Output = ()> + Send + 'static>(
        &self,
        task: F,
    ) -> Result<(), Self::Error> {
        self.spawn_obj(futures::task::FutureObj::from(task.boxed()))
    }
}

/// Executor which spawns a new thread for each task.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdThread;

impl Executor for StdThread {
    type Error = std::io::Error;

    fn execute<F: std::future::Future<Output = ()> + Send + 'static>(
        &self,
        task: F,
    ) -> Result<(), Self::Error> {
        let thread_builder = std::thread::Builder::new();

        thread_builder
            .spawn(|| {
                futures::executor::block_on(task);
            })
            .map(|_| ())
    }
}
