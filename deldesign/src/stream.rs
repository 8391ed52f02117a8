//! Length-prefixed record streams used for design checkpoints and the final
//! library stream.
//!
//! Each record is a little-endian `u32` length followed by its bincode
//! payload. End of stream is a value, not an error: [`StreamReader::read`]
//! returns `Ok(None)` at a clean record boundary and fails on a torn frame.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;

/// Frames larger than this are treated as corruption rather than attempted.
const MAX_FRAME: u32 = 256 * 1024 * 1024;

/// Writes a homogeneous record stream.
pub struct StreamWriter<W: Write, T> {
    writer: BufWriter<W>,
    scratch: Vec<u8>,
    _record: PhantomData<T>,
}

impl<W: Write, T: Serialize> StreamWriter<W, T> {
    /// Wraps `writer` in a buffered record stream.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            scratch: Vec::new(),
            _record: PhantomData,
        }
    }

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Encoding or IO failures.
    pub fn write(&mut self, record: &T) -> Result<()> {
        self.scratch.clear();
        bincode::serialize_into(&mut self.scratch, record)?;
        let len = u32::try_from(self.scratch.len())
            .map_err(|_| Error::Stream("record exceeds the frame limit".into()))?;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(&self.scratch)?;
        Ok(())
    }

    /// Flushes buffered frames to the underlying writer.
    ///
    /// # Errors
    ///
    /// IO failures.
    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Reads a homogeneous record stream.
pub struct StreamReader<R: Read, T> {
    reader: BufReader<R>,
    _record: PhantomData<T>,
}

impl<R: Read, T: DeserializeOwned> StreamReader<R, T> {
    /// Wraps `reader` in a buffered record stream.
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            _record: PhantomData,
        }
    }

    /// Reads the next record, or `None` at a clean end of stream.
    ///
    /// # Errors
    ///
    /// [`Error::Stream`] on a torn or oversized frame, plus decoding and IO
    /// failures.
    pub fn read(&mut self) -> Result<Option<T>> {
        let mut len_bytes = [0u8; 4];
        match self.reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        let len = u32::from_le_bytes(len_bytes);
        if len > MAX_FRAME {
            return Err(Error::Stream(format!("frame of {len} bytes exceeds the limit")));
        }
        let mut payload = vec![0u8; len as usize];
        self.reader
            .read_exact(&mut payload)
            .map_err(|_| Error::Stream("torn frame at end of stream".into()))?;
        Ok(Some(bincode::deserialize(&payload)?))
    }

    /// Reads up to `limit` records into a batch.
    ///
    /// # Errors
    ///
    /// Same as [`StreamReader::read`].
    pub fn read_batch(&mut self, limit: usize) -> Result<Vec<T>> {
        let mut batch = Vec::new();
        while batch.len() < limit {
            match self.read()? {
                Some(record) => batch.push(record),
                None => break,
            }
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_and_reports_end_of_stream() {
        let mut bytes = Vec::new();
        {
            let mut writer = StreamWriter::new(&mut bytes);
            for record in [vec![1u32, 2, 3], vec![], vec![42]] {
                writer.write(&record).unwrap();
            }
            writer.finish().unwrap();
        }
        let mut reader: StreamReader<_, Vec<u32>> = StreamReader::new(bytes.as_slice());
        assert_eq!(reader.read().unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(reader.read_batch(10).unwrap(), vec![vec![], vec![42]]);
        assert_eq!(reader.read().unwrap(), None);
        // reading past the end stays at the end
        assert_eq!(reader.read().unwrap(), None);
    }

    #[test]
    fn torn_frame_is_an_error() {
        let mut bytes = Vec::new();
        {
            let mut writer = StreamWriter::new(&mut bytes);
            writer.write(&vec![7u32; 8]).unwrap();
            writer.finish().unwrap();
        }
        bytes.truncate(bytes.len() - 1);
        let mut reader: StreamReader<_, Vec<u32>> = StreamReader::new(bytes.as_slice());
        assert!(matches!(reader.read(), Err(Error::Stream(_))));
    }
}
