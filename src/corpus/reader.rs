//! Fixed-size chunked reads over a file.
//!
//! `ChunkReader` pulls windows of raw bytes at increasing offsets and knows
//! nothing about their content. `PrefetchReader` moves the reads onto a
//! background thread so the next chunk is fetched while the previous one is
//! being parsed; chunks are still delivered in strict offset order.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::mpsc;
use std::thread::JoinHandle;

/// Anything that hands out byte chunks in order. `Ok(None)` means end of input.
pub trait ChunkSource {
    fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// Sequential reader over one open file handle.
pub struct ChunkReader {
    file: Option<File>,
    chunk_size: usize,
    offset: u64,
}

impl ChunkReader {
    /// Open `path` for chunked reading. `chunk_size` of 0 is bumped to 1.
    pub fn open(path: &Path, chunk_size: usize) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            file: Some(file),
            chunk_size: chunk_size.max(1),
            offset: 0,
        })
    }

    /// Number of bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Release the file handle. Further reads report end of input.
    pub fn close(&mut self) {
        self.file = None;
    }
}

impl ChunkSource for ChunkReader {
    fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let Some(file) = self.file.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; self.chunk_size];
        let read = loop {
            match file.read(&mut buf) {
                Ok(n) => break n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        };

        if read == 0 {
            self.close();
            return Ok(None);
        }

        buf.truncate(read);
        self.offset += read as u64;
        Ok(Some(buf))
    }
}

/// Reads chunks one step ahead of the consumer on a background thread.
pub struct PrefetchReader {
    rx: Option<mpsc::Receiver<io::Result<Vec<u8>>>>,
    handle: Option<JoinHandle<()>>,
}

impl PrefetchReader {
    pub fn spawn(mut reader: ChunkReader) -> Self {
        // one chunk in flight while the consumer parses the previous one
        let (tx, rx) = mpsc::sync_channel::<io::Result<Vec<u8>>>(1);

        let handle = std::thread::spawn(move || loop {
            match reader.next_chunk() {
                Ok(Some(chunk)) => {
                    if tx.send(Ok(chunk)).is_err() {
                        // consumer went away
                        return;
                    }
                }
                Ok(None) => return,
                Err(err) => {
                    let _ = tx.send(Err(err));
                    return;
                }
            }
        });

        Self {
            rx: Some(rx),
            handle: Some(handle),
        }
    }

    fn finish(&mut self) {
        // dropping the receiver unblocks a sender waiting on a full channel
        self.rx = None;
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.join() {
                log::error!("prefetch reader thread panicked: {err:?}");
            }
        }
    }
}

impl ChunkSource for PrefetchReader {
    fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let Some(rx) = self.rx.as_ref() else {
            return Ok(None);
        };

        match rx.recv() {
            Ok(Ok(chunk)) => Ok(Some(chunk)),
            Ok(Err(err)) => {
                self.finish();
                Err(err)
            }
            Err(_) => {
                self.finish();
                Ok(None)
            }
        }
    }
}

impl Drop for PrefetchReader {
    fn drop(&mut self) {
        self.finish();
    }
}

impl<S: ChunkSource + ?Sized> ChunkSource for Box<S> {
    fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        (**self).next_chunk()
    }
}
