use std::fs;
use std::io::Read;
use std::io::Write;
use std::path;

use crate::error::IoError;

pub fn to_failed_to_open(path: impl AsRef<path::Path>) -> impl FnOnce(std::io::Error) -> IoError {
    move |e| {
        IoError::new(
            format!("Failed to open `{}`.", path.as_ref().display()),
            e,
        )
    }
}

pub fn try_read_and_verify_checksum_from(
    path: impl AsRef<path::Path>,
    reader: &mut impl Read,
    expected_checksum: &[u8; 32],
) -> Result<bool, IoError> {
    let path = path.as_ref();
    let mut checksum = [0; 32];

    if try_read_exact_from(path, reader, &mut checksum)? < checksum.len() {
        return Ok(false);
    }

    if checksum == *expected_checksum {
        Ok(true)
    } else {
        Err(IoError::invalid_data(
            format!("Log file `{}` was corrupted.", path.display()),
            format!(
                "Checksum mismatch `{:?} != {:?}`.",
                checksum, expected_checksum
            ),
        ))
    }
}

pub fn try_read_u32_from(
    path: impl AsRef<path::Path>,
    reader: &mut impl Read,
) -> Result<Option<u32>, IoError> {
    const SIZE: usize = std::mem::size_of::<u32>();
    let mut buf = [0; SIZE];

    let read = try_read_exact_from(path, reader, &mut buf)?;

    if read == SIZE {
        Ok(Some(u32::from_be_bytes(buf)))
    } else {
        Ok(None)
    }
}

/// Reads until `buf` is full or the end of input is reached, returns the
/// number of bytes read.
pub fn try_read_exact_from(
    path: impl AsRef<path::Path>,
    reader: &mut impl Read,
    buf: &mut [u8],
) -> Result<usize, IoError> {
    let mut read = 0;

    while read < buf.len() {
        match reader.read(&mut buf[read..]).map_err(|e| {
            IoError::new(
                format!("Failed to read from `{}`.", path.as_ref().display()),
                e,
            )
        })? {
            0 => {
                break;
            }
            n => {
                read += n;
            }
        }
    }

    Ok(read)
}

pub fn write_u32_to(
    path: impl AsRef<path::Path>,
    writer: &mut impl Write,
    v: u32,
) -> Result<(), IoError> {
    write_all_to(path, writer, &v.to_be_bytes())
}

pub fn write_len_as_u32_to(
    path: impl AsRef<path::Path>,
    writer: &mut impl Write,
    len: usize,
) -> Result<(), IoError> {
    let len: u32 = len.try_into().map_err(|_| {
        IoError::invalid_data(
            format!("Failed to write to log file `{}`.", path.as_ref().display()),
            format!("Unsupported size of `{}`.", len),
        )
    })?;

    write_u32_to(path, writer, len)
}

pub fn write_all_to(
    path: impl AsRef<path::Path>,
    writer: &mut impl Write,
    buf: &[u8],
) -> Result<(), IoError> {
    writer.write_all(buf).map_err(|e| {
        IoError::new(
            format!("Failed to write to `{}`.", path.as_ref().display()),
            e,
        )
    })
}

pub fn sync(path: impl AsRef<path::Path>, file: &mut fs::File) -> Result<(), IoError> {
    file.flush()
        .map_err(|e| IoError::new(format!("Failed to flush `{}`.", path.as_ref().display()), e))?;

    file.sync_all()
        .map_err(|e| IoError::new(format!("Failed to sync `{}`.", path.as_ref().display()), e))
}

/// Hashes everything read from or written to `inner`.
pub struct Checksumming<I> {
    inner: I,
    hasher: blake3::Hasher,
}

impl<I> Checksumming<I> {
    pub fn into_inner(self) -> (I, [u8; 32]) {
        let hash = self.hasher.finalize();

        (self.inner, hash.into())
    }
}

impl<I> From<I> for Checksumming<I> {
    fn from(inner: I) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
        }
    }
}

impl<R: Read> Read for Checksumming<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let result = self.inner.read(buf);

        if let Ok(read) = result {
            self.hasher.update(&buf[0..read]);
        }

        result
    }
}

impl<W: Write> Write for Checksumming<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let result = self.inner.write(buf);

        if let Ok(written) = result {
            self.hasher.update(&buf[0..written]);
        }

        result
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
