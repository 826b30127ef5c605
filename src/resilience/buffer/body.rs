//! Memory-then-disk body buffering.
//!
//! Bodies are kept in memory up to a threshold and spill to a temporary file
//! beyond it. The file is removed when the last handle to the buffered body
//! drops, whichever path the request takes.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use futures_util::StreamExt;
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::resilience::buffer::BufferError;

const READ_CHUNK: usize = 64 * 1024;

enum Storage {
    Memory(Vec<u8>),
    /// `temp` owns the path; `file` is the async write handle onto it.
    Disk { temp: NamedTempFile, file: File },
}

/// Accumulates a body with a memory threshold and an optional hard limit.
pub struct SpillBuffer {
    storage: Storage,
    len: u64,
    mem_limit: usize,
    max: Option<u64>,
}

impl SpillBuffer {
    pub fn new(mem_limit: usize, max: Option<u64>) -> Self {
        Self {
            storage: Storage::Memory(Vec::new()),
            len: 0,
            mem_limit,
            max,
        }
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), BufferError> {
        let new_len = self.len + chunk.len() as u64;
        if let Some(max) = self.max {
            if new_len > max {
                return Err(BufferError::Oversize { limit: max });
            }
        }
        let spilled = match &mut self.storage {
            Storage::Memory(mem) if mem.len() + chunk.len() <= self.mem_limit => {
                mem.extend_from_slice(chunk);
                None
            }
            Storage::Memory(mem) => Some(std::mem::take(mem)),
            Storage::Disk { file, .. } => {
                file.write_all(chunk).await?;
                None
            }
        };
        if let Some(mem) = spilled {
            let (temp, mut file) = spill_file().await?;
            file.write_all(&mem).await?;
            file.write_all(chunk).await?;
            tracing::debug!(bytes = new_len, "Body spilled to disk");
            self.storage = Storage::Disk { temp, file };
        }
        self.len = new_len;
        Ok(())
    }

    pub async fn finish(self) -> Result<Buffered, BufferError> {
        let storage = match self.storage {
            Storage::Memory(mem) => Stored::Memory(Bytes::from(mem)),
            Storage::Disk { temp, mut file } => {
                file.flush().await?;
                Stored::Disk(Arc::new(temp))
            }
        };
        Ok(Buffered {
            storage,
            len: self.len,
        })
    }
}

async fn spill_file() -> Result<(NamedTempFile, File), BufferError> {
    let created = tokio::task::spawn_blocking(|| -> std::io::Result<_> {
        let temp = NamedTempFile::new()?;
        let file = temp.as_file().try_clone()?;
        Ok((temp, file))
    })
    .await
    .map_err(std::io::Error::other)??;
    let (temp, file) = created;
    Ok((temp, File::from_std(file)))
}

#[derive(Debug, Clone)]
enum Stored {
    Memory(Bytes),
    Disk(Arc<NamedTempFile>),
}

/// A fully read body that can be replayed any number of times.
#[derive(Debug, Clone)]
pub struct Buffered {
    storage: Stored,
    len: u64,
}

impl Buffered {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_on_disk(&self) -> bool {
        matches!(self.storage, Stored::Disk(_))
    }

    /// A fresh body reading from the start.
    pub fn to_body(&self) -> Result<Body, BufferError> {
        match &self.storage {
            Stored::Memory(bytes) => Ok(Body::from(bytes.clone())),
            Stored::Disk(temp) => {
                // Each replay reads through its own handle and cursor.
                let file = tokio::fs::File::from_std(temp.reopen()?);
                let keep_alive = Arc::clone(temp);
                let stream = futures_util::stream::unfold(
                    (file, keep_alive),
                    |(mut file, keep_alive)| async move {
                        let mut buf = vec![0u8; READ_CHUNK];
                        match file.read(&mut buf).await {
                            Ok(0) => None,
                            Ok(n) => {
                                buf.truncate(n);
                                Some((Ok(Bytes::from(buf)), (file, keep_alive)))
                            }
                            Err(e) => Some((Err(e), (file, keep_alive))),
                        }
                    },
                );
                Ok(Body::from_stream(stream))
            }
        }
    }
}

/// Reads `body` into a [`Buffered`], failing with `Oversize` as soon as the
/// limit is crossed.
pub async fn read_body(body: Body, mem_limit: usize, max: Option<u64>) -> Result<Buffered, BufferError> {
    let mut buffer = SpillBuffer::new(mem_limit, max);
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| BufferError::Body(e.to_string()))?;
        buffer.write(&chunk).await?;
    }
    buffer.finish().await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(body: Body) -> Vec<u8> {
        axum::body::to_bytes(body, usize::MAX).await.unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_small_body_stays_in_memory() {
        let buffered = read_body(Body::from("hello"), 1024, None).await.unwrap();
        assert!(!buffered.is_on_disk());
        assert_eq!(buffered.len(), 5);
        assert_eq!(collect(buffered.to_body().unwrap()).await, b"hello");
    }

    #[tokio::test]
    async fn test_large_body_spills_and_replays() {
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let buffered = read_body(Body::from(payload.clone()), 1024, None).await.unwrap();
        assert!(buffered.is_on_disk());
        for _ in 0..3 {
            assert_eq!(collect(buffered.to_body().unwrap()).await, payload);
        }
    }

    #[tokio::test]
    async fn test_limit_enforced_while_reading() {
        let result = read_body(Body::from(vec![0u8; 100]), 10, Some(64)).await;
        assert!(matches!(result, Err(BufferError::Oversize { limit: 64 })));
    }

    #[tokio::test]
    async fn test_spill_keeps_chunk_order() {
        let mut buffer = SpillBuffer::new(4, None);
        for chunk in [&b"abc"[..], b"def", b"ghi"] {
            buffer.write(chunk).await.unwrap();
        }
        let buffered = buffer.finish().await.unwrap();
        assert!(buffered.is_on_disk());
        assert_eq!(buffered.len(), 9);
        assert_eq!(collect(buffered.to_body().unwrap()).await, b"abcdefghi");
    }
}
