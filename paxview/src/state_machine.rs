//! The replicated application.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::BoxError;
use crate::error::ExecuteError;
use crate::ProcId;

/// The application whose state is replicated.
///
/// Every replica executes the same operations in the same order, so
/// execution must be deterministic.
pub trait StateMachine: Send + 'static {
    /// Executes procedure `proc`.
    fn execute(&mut self, proc: ProcId, args: &[u8]) -> Result<Vec<u8>, ExecuteError>;

    /// Serializes the entire state.
    fn marshal_state(&self) -> Result<Vec<u8>, BoxError>;

    /// Replaces the entire state with one produced by `marshal_state`.
    fn unmarshal_state(&mut self, state: &[u8]) -> Result<(), BoxError>;
}

type Handler<S> = Box<dyn Fn(&mut S, &[u8]) -> Result<Vec<u8>, ExecuteError> + Send>;

/// A [`StateMachine`] that dispatches to handlers registered per procedure.
///
/// The state is marshalled with `bincode`.
pub struct Procedures<S> {
    state: S,
    handlers: HashMap<ProcId, Handler<S>>,
}

impl<S> Procedures<S>
where
    S: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(state: S) -> Self {
        Self {
            state,
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for `proc`, replacing any handler registered
    /// before.
    pub fn register<F>(mut self, proc: ProcId, handler: F) -> Self
    where
        F: Fn(&mut S, &[u8]) -> Result<Vec<u8>, ExecuteError> + Send + 'static,
    {
        self.handlers.insert(proc, Box::new(handler));
        self
    }

    pub fn state(&self) -> &S {
        &self.state
    }
}

impl<S> StateMachine for Procedures<S>
where
    S: Serialize + DeserializeOwned + Send + 'static,
{
    fn execute(&mut self, proc: ProcId, args: &[u8]) -> Result<Vec<u8>, ExecuteError> {
        match self.handlers.get(&proc) {
            Some(handler) => handler(&mut self.state, args),
            None => Err(ExecuteError::UnknownProc(proc)),
        }
    }

    fn marshal_state(&self) -> Result<Vec<u8>, BoxError> {
        Ok(bincode::serialize(&self.state)?)
    }

    fn unmarshal_state(&mut self, state: &[u8]) -> Result<(), BoxError> {
        self.state = bincode::deserialize(state)?;
        Ok(())
    }
}
