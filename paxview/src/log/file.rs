use std::fs;
use std::io::Seek;
use std::io::SeekFrom;
use std::marker::PhantomData;
use std::path::Path;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::IoError;
use crate::proposal::Instance;
use crate::proposal::ProposalNum;
use crate::Value;

use super::io;
use super::AcceptorLog;
use super::Record;
use super::Replayed;

const MAGIC: &[u8; 8] = b"PXVWLOG1";
const FILE_NAME: &str = "acceptor.log";

const KIND_PROMISE: u32 = 1;
const KIND_ACCEPT: u32 = 2;
const KIND_COMMIT: u32 = 3;

/// Append-only acceptor log in a working directory.
///
/// Each record is laid out as `kind: u32 | len: u32 | payload | checksum`
/// where the payload is serialized with `bincode` and the checksum is the
/// blake3 hash of everything preceding it. Every append is synced before
/// returning. Replay drops an incomplete trailing record, a record whose
/// checksum doesn't match fails the replay.
#[derive(Debug)]
pub struct FileLog<V> {
    path: PathBuf,
    file: fs::File,
    _v: PhantomData<fn() -> V>,
}

impl<V: Value> FileLog<V> {
    /// Opens the log in `working_dir`, creating it if necessary.
    pub fn open(working_dir: impl AsRef<Path>) -> Result<Self, IoError> {
        let working_dir = working_dir.as_ref();

        fs::create_dir_all(working_dir).map_err(|e| {
            IoError::new(
                format!("Failed to create directory `{}`.", working_dir.display()),
                e,
            )
        })?;

        let path = working_dir.join(FILE_NAME);

        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(io::to_failed_to_open(&path))?;

        let len = file
            .metadata()
            .map_err(|e| IoError::new(format!("Failed to stat `{}`.", path.display()), e))?
            .len();

        if len == 0 {
            io::write_all_to(&path, &mut file, MAGIC)?;
            io::sync(&path, &mut file)?;
        } else {
            let mut magic = [0; 8];
            let read = io::try_read_exact_from(&path, &mut file, &mut magic)?;

            if read < magic.len() || magic != *MAGIC {
                return Err(IoError::invalid_data(
                    format!("`{}` is not an acceptor log.", path.display()),
                    "Magic number mismatch.",
                ));
            }
        }

        let mut log = Self {
            path,
            file,
            _v: PhantomData,
        };
        log.seek(SeekFrom::End(0))?;

        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, kind: u32, payload: &impl Serialize) -> Result<(), IoError> {
        let payload = bincode::serialize(payload).map_err(|e| {
            IoError::invalid_data(
                format!("Failed to serialize record for `{}`.", self.path.display()),
                e,
            )
        })?;

        let mut record = io::Checksumming::from(Vec::with_capacity(payload.len() + 40));
        io::write_u32_to(&self.path, &mut record, kind)?;
        io::write_len_as_u32_to(&self.path, &mut record, payload.len())?;
        io::write_all_to(&self.path, &mut record, &payload)?;
        let (mut record, checksum) = record.into_inner();
        record.extend_from_slice(&checksum);

        io::write_all_to(&self.path, &mut self.file, &record)?;
        io::sync(&self.path, &mut self.file)
    }

    fn seek(&mut self, target: SeekFrom) -> Result<u64, IoError> {
        self.file.seek(target).map_err(|e| {
            IoError::new(format!("Failed to seek in `{}`.", self.path.display()), e)
        })
    }

    fn remaining(&mut self) -> Result<u64, IoError> {
        let position = self.seek(SeekFrom::Current(0))?;
        let len = self
            .file
            .metadata()
            .map_err(|e| IoError::new(format!("Failed to stat `{}`.", self.path.display()), e))?
            .len();

        Ok(len.saturating_sub(position))
    }

    /// Reads the next complete record, `None` at the end of the log.
    fn read_record(&mut self) -> Result<Option<Record<V>>, IoError> {
        let remaining = self.remaining()?;
        let mut reader = io::Checksumming::from(&mut self.file);

        let kind = match io::try_read_u32_from(&self.path, &mut reader)? {
            Some(k) => k,
            None => return Ok(None),
        };
        let len = match io::try_read_u32_from(&self.path, &mut reader)? {
            Some(l) => l as usize,
            None => return Ok(None),
        };

        // kind and length precede the payload, a checksum follows it
        if len as u64 > remaining.saturating_sub(8) {
            return Ok(None);
        }

        let mut payload = vec![0; len];
        if io::try_read_exact_from(&self.path, &mut reader, &mut payload)? < len {
            return Ok(None);
        }

        let (file, expected_checksum) = reader.into_inner();
        if !io::try_read_and_verify_checksum_from(&self.path, file, &expected_checksum)? {
            return Ok(None);
        }

        let record = match kind {
            KIND_PROMISE => {
                let (instance, n) = deserialize(&self.path, &payload)?;
                Record::Promise { instance, n }
            }
            KIND_ACCEPT => {
                let (instance, n, value) = deserialize(&self.path, &payload)?;
                Record::Accept { instance, n, value }
            }
            KIND_COMMIT => {
                let (instance, value) = deserialize(&self.path, &payload)?;
                Record::Commit { instance, value }
            }
            k => {
                return Err(IoError::invalid_data(
                    format!("Log file `{}` was corrupted.", self.path.display()),
                    format!("Unknown record kind `{}`.", k),
                ))
            }
        };

        Ok(Some(record))
    }
}

fn deserialize<T: DeserializeOwned>(path: &Path, payload: &[u8]) -> Result<T, IoError> {
    bincode::deserialize(payload).map_err(|e| {
        IoError::invalid_data(
            format!("Record in `{}` could not be deserialized.", path.display()),
            e,
        )
    })
}

impl<V: Value> AcceptorLog<V> for FileLog<V> {
    fn log_promise(&mut self, instance: Instance, n: &ProposalNum) -> Result<(), IoError> {
        self.append(KIND_PROMISE, &(instance, n))
    }

    fn log_accept(
        &mut self,
        instance: Instance,
        n: &ProposalNum,
        value: &V,
    ) -> Result<(), IoError> {
        self.append(KIND_ACCEPT, &(instance, n, value))
    }

    fn log_commit(&mut self, instance: Instance, value: &V) -> Result<(), IoError> {
        self.append(KIND_COMMIT, &(instance, value))
    }

    fn replay(&mut self) -> Result<Replayed<V>, IoError> {
        let mut replayed = Replayed::default();

        let mut intact = self.seek(SeekFrom::Start(MAGIC.len() as u64))?;

        while let Some(record) = self.read_record()? {
            replayed.apply(record);
            intact = self.seek(SeekFrom::Current(0))?;
        }

        let len = self.seek(SeekFrom::End(0))?;
        if len > intact {
            tracing::warn!(
                "Dropping {} trailing bytes of `{}`.",
                len - intact,
                self.path.display()
            );

            self.file.set_len(intact).map_err(|e| {
                IoError::new(format!("Failed to truncate `{}`.", self.path.display()), e)
            })?;
            io::sync(&self.path, &mut self.file)?;
            self.seek(SeekFrom::End(0))?;
        }

        Ok(replayed)
    }
}
