//! Chunked byte streams handed back to the transport layer.
//!
//! A blocking producer reads the source in fixed-size chunks and pushes them
//! through a bounded channel. When the consumer drops the stream, the next
//! send fails and the producer stops, releasing any scratch file it owns.

use std::io::{self, Read};
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use flate2::read::GzDecoder;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::scratch::ScratchFile;

/// Size of each chunk read from disk.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Chunks buffered between producer and consumer.
const CHANNEL_DEPTH: usize = 4;

/// Stream of byte chunks.
#[derive(Debug)]
pub struct ByteStream {
    inner: ReceiverStream<io::Result<Bytes>>,
}

impl ByteStream {
    /// Collect the whole stream into memory.
    pub async fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.inner.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl Stream for ByteStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// A named download.
#[derive(Debug)]
pub struct Download {
    /// Suggested file name for the recipient.
    pub file_name: String,
    pub stream: ByteStream,
}

/// Stream the raw bytes of `path`.
///
/// `guard`, if any, is dropped (and its file removed) once the producer is
/// done, whether the stream was drained, failed or was abandoned.
pub(crate) async fn stream_file(path: &Path, guard: Option<ScratchFile>) -> io::Result<ByteStream> {
    let file = tokio::fs::File::open(path).await?.into_std().await;
    Ok(spawn_reader(file, guard))
}

/// Stream the decompressed content of the gzip file at `path`.
pub(crate) async fn stream_gunzip(path: &Path) -> io::Result<ByteStream> {
    let file = tokio::fs::File::open(path).await?.into_std().await;
    Ok(spawn_reader(GzDecoder::new(file), None))
}

fn spawn_reader<R>(mut reader: R, guard: Option<ScratchFile>) -> ByteStream
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);

    tokio::task::spawn_blocking(move || {
        let _guard = guard;
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let chunk = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
            let failed = chunk.is_err();
            if tx.blocking_send(chunk).is_err() {
                debug!("Download stream dropped by consumer");
                break;
            }
            if failed {
                break;
            }
        }
    });

    ByteStream {
        inner: ReceiverStream::new(rx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratch::ScratchDir;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_stream_file_in_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("big.bin");
        let content: Vec<u8> = (0..=255u8).cycle().take(CHUNK_SIZE * 2 + 10).collect();
        std::fs::write(&path, &content).unwrap();

        let mut stream = stream_file(&path, None).await.unwrap();
        let mut sizes = Vec::new();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            sizes.push(chunk.len());
            collected.extend_from_slice(&chunk);
        }

        assert!(sizes.iter().all(|&n| n <= CHUNK_SIZE));
        assert!(sizes.len() >= 3);
        assert_eq!(collected, content);
    }

    #[tokio::test]
    async fn test_stream_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let bytes = stream_file(&path, None).await.unwrap().into_bytes().await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_stream_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = stream_file(&temp_dir.path().join("nope"), None).await;

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_stream_gunzip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.txt.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"hello world").unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let bytes = stream_gunzip(&path).await.unwrap().into_bytes().await.unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[tokio::test]
    async fn test_stream_gunzip_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.gz");
        std::fs::write(&path, b"definitely not gzip").unwrap();

        let result = stream_gunzip(&path).await.unwrap().into_bytes().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_guard_released_after_drain() {
        let temp_dir = TempDir::new().unwrap();
        let scratch = ScratchDir::new(temp_dir.path()).unwrap();
        let guard = scratch.allocate(".zip").unwrap();
        let path = guard.path().to_path_buf();
        std::fs::write(&path, b"archive").unwrap();

        let bytes = stream_file(&path, Some(guard))
            .await
            .unwrap()
            .into_bytes()
            .await
            .unwrap();

        assert_eq!(bytes, b"archive");
        // The producer drops the guard before closing the channel.
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_guard_released_after_early_drop() {
        let temp_dir = TempDir::new().unwrap();
        let scratch = ScratchDir::new(temp_dir.path()).unwrap();
        let guard = scratch.allocate(".zip").unwrap();
        let path = guard.path().to_path_buf();
        std::fs::write(&path, vec![7u8; CHUNK_SIZE * 16]).unwrap();

        let mut stream = stream_file(&path, Some(guard)).await.unwrap();
        stream.next().await.unwrap().unwrap();
        drop(stream);

        for _ in 0..100 {
            if !path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!path.exists());
    }
}
