#![allow(dead_code)]

use std::collections::BTreeMap;

use paxview::error::ExecuteError;
use paxview::state_machine::Procedures;
use paxview::ProcId;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

pub type LockId = u64;

pub const ACQUIRE: ProcId = 1;
pub const RELEASE: ProcId = 2;
pub const STAT: ProcId = 3;

/// Locks and how often each was acquired.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct LockTable {
    held: BTreeMap<LockId, Uuid>,
    acquisitions: BTreeMap<LockId, u64>,
}

pub fn lock_service() -> Procedures<LockTable> {
    Procedures::new(LockTable::default())
        .register(ACQUIRE, |table, args| {
            let (lid, owner): (LockId, Uuid) = decode(args)?;

            let granted = match table.held.get(&lid) {
                Some(holder) => *holder == owner,
                None => {
                    table.held.insert(lid, owner);
                    *table.acquisitions.entry(lid).or_default() += 1;
                    true
                }
            };

            encode(&granted)
        })
        .register(RELEASE, |table, args| {
            let (lid, owner): (LockId, Uuid) = decode(args)?;

            match table.held.get(&lid) {
                Some(holder) if *holder == owner => {
                    table.held.remove(&lid);
                    encode(&())
                }
                _ => Err(ExecuteError::Failed(format!("lock {} is not held by {}", lid, owner))),
            }
        })
        .register(STAT, |table, args| {
            let lid: LockId = decode(args)?;

            encode(&table.acquisitions.get(&lid).copied().unwrap_or(0))
        })
}

pub fn acquire_args(lid: LockId, owner: Uuid) -> Vec<u8> {
    bincode::serialize(&(lid, owner)).unwrap()
}

pub fn release_args(lid: LockId, owner: Uuid) -> Vec<u8> {
    bincode::serialize(&(lid, owner)).unwrap()
}

pub fn stat_args(lid: LockId) -> Vec<u8> {
    bincode::serialize(&lid).unwrap()
}

pub fn granted(reply: &[u8]) -> bool {
    bincode::deserialize(reply).unwrap()
}

pub fn acquisitions(reply: &[u8]) -> u64 {
    bincode::deserialize(reply).unwrap()
}

fn decode<T: serde::de::DeserializeOwned>(args: &[u8]) -> Result<T, ExecuteError> {
    bincode::deserialize(args).map_err(|e| ExecuteError::MalformedArgs(e.to_string()))
}

fn encode<T: Serialize>(reply: &T) -> Result<Vec<u8>, ExecuteError> {
    bincode::serialize(reply).map_err(|e| ExecuteError::Failed(e.to_string()))
}
