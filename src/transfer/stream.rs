//! Transforming byte stream with a completion barrier.
//!
//! A [`TransformStream`] wraps one byte source and applies, in this fixed
//! order, optional zstd decompression, a byte-counting digest tap, and
//! optional zstd compression.  Whoever drives `read()` to end-of-stream
//! fires the barrier; any other thread holding a [`CompletionHandle`] can
//! wait for that moment with a deadline and then read the final size and
//! digest.
//!
//! The barrier fires at most once.  It ends in one of three ways: the
//! stream reached EOF, a read failed, or the transfer was given up
//! (timeout, abort, or the consumer dropped the stream early).

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::codec::{is_codec_error, CompressingReader, DecompressingReader};
use super::headers::base32_lower;
use crate::errors::TransferError;

/// Digest computed by the tap.  Only SHA-256 is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
}

// -- Barrier ------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Failure {
    /// The consumer dropped the stream before EOF.
    Abandoned,
    TimedOut,
    Aborted,
    Read { codec: bool, message: String },
}

impl Failure {
    fn to_error(&self) -> TransferError {
        match self {
            Failure::Abandoned => TransferError::Internal(anyhow::anyhow!(
                "backend released the stream before reading it fully"
            )),
            Failure::TimedOut => {
                TransferError::OperationTimeout("transfer already timed out".to_string())
            }
            Failure::Aborted => TransferError::Internal(anyhow::anyhow!("transfer aborted")),
            Failure::Read {
                codec: true,
                message,
            } => TransferError::Codec(io::Error::new(io::ErrorKind::InvalidData, message.clone())),
            Failure::Read {
                codec: false,
                message,
            } => TransferError::Internal(anyhow::anyhow!("transfer stream interrupted: {message}")),
        }
    }

    fn to_io(&self) -> io::Error {
        match self {
            Failure::TimedOut => io::Error::new(io::ErrorKind::TimedOut, "transfer timed out"),
            Failure::Aborted | Failure::Abandoned => {
                io::Error::new(io::ErrorKind::ConnectionAborted, "transfer aborted")
            }
            Failure::Read { codec, message } => {
                let kind = if *codec {
                    io::ErrorKind::InvalidData
                } else {
                    io::ErrorKind::Other
                };
                io::Error::new(kind, message.clone())
            }
        }
    }
}

#[derive(Debug)]
enum Barrier {
    Pending,
    Completed {
        bytes: u64,
        digest: Option<[u8; 32]>,
    },
    Failed(Failure),
}

// -- Pipeline -----------------------------------------------------------------

#[derive(Default)]
struct TapState {
    bytes: u64,
    hasher: Option<Sha256>,
    digest: Option<[u8; 32]>,
}

/// Counts (and optionally hashes) the plaintext flowing through it.
struct DigestTap {
    inner: Box<dyn Read + Send>,
    state: Arc<Mutex<TapState>>,
}

impl Read for DigestTap {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if n == 0 && !buf.is_empty() {
            if let Some(hasher) = state.hasher.take() {
                state.digest = Some(hasher.finalize().into());
            }
        } else {
            state.bytes += n as u64;
            if let Some(hasher) = state.hasher.as_mut() {
                hasher.update(&buf[..n]);
            }
        }
        Ok(n)
    }
}

struct Pipeline {
    source: Option<Box<dyn Read + Send>>,
    chain: Option<Box<dyn Read + Send>>,
    decompress: bool,
    digest: Option<DigestAlgorithm>,
    compress: Option<i32>,
    tap: Arc<Mutex<TapState>>,
    finished: bool,
}

impl Pipeline {
    /// Assemble decompress -> tap -> compress on first use.
    fn chain(&mut self) -> io::Result<&mut Box<dyn Read + Send>> {
        if self.chain.is_none() {
            let source = self
                .source
                .take()
                .ok_or_else(|| io::Error::other("transfer source already consumed"))?;
            let mut reader = source;
            if self.decompress {
                reader = Box::new(DecompressingReader::new(reader).map_err(io::Error::other)?);
            }
            if self.digest == Some(DigestAlgorithm::Sha256) {
                self.tap.lock().unwrap_or_else(PoisonError::into_inner).hasher =
                    Some(Sha256::new());
            }
            reader = Box::new(DigestTap {
                inner: reader,
                state: self.tap.clone(),
            });
            if let Some(level) = self.compress {
                reader = Box::new(CompressingReader::new(reader, level).map_err(io::Error::other)?);
            }
            self.chain = Some(reader);
        }
        self.chain
            .as_mut()
            .ok_or_else(|| io::Error::other("transfer pipeline missing"))
    }
}

// -- Shared state -------------------------------------------------------------

struct Shared {
    barrier: Mutex<Barrier>,
    fired: Condvar,
    pipeline: Mutex<Pipeline>,
    started: AtomicBool,
}

impl Shared {
    fn barrier(&self) -> MutexGuard<'_, Barrier> {
        self.barrier.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pipeline(&self) -> io::Result<MutexGuard<'_, Pipeline>> {
        self.pipeline
            .lock()
            .map_err(|_| io::Error::other("transfer pipeline poisoned"))
    }

    /// Move the barrier out of `Pending`.  Returns false if it had already
    /// fired.
    fn fire(&self, outcome: Barrier) -> bool {
        let mut barrier = self.barrier();
        if !matches!(*barrier, Barrier::Pending) {
            return false;
        }
        *barrier = outcome;
        self.fired.notify_all();
        true
    }

    fn failure(&self) -> Option<Failure> {
        match &*self.barrier() {
            Barrier::Failed(failure) => Some(failure.clone()),
            _ => None,
        }
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(failure) = self.failure() {
            return Err(failure.to_io());
        }
        let mut pipeline = self.pipeline()?;
        if pipeline.finished {
            return Ok(0);
        }
        self.started.store(true, Ordering::Release);
        match pipeline.chain().and_then(|chain| chain.read(buf)) {
            Ok(0) if !buf.is_empty() => {
                pipeline.finished = true;
                let (bytes, digest) = {
                    let tap = pipeline.tap.lock().unwrap_or_else(PoisonError::into_inner);
                    (tap.bytes, tap.digest)
                };
                self.fire(Barrier::Completed { bytes, digest });
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(e),
            Err(e) => {
                pipeline.finished = true;
                self.fire(Barrier::Failed(Failure::Read {
                    codec: is_codec_error(&e),
                    message: e.to_string(),
                }));
                Err(e)
            }
        }
    }

    /// Read and discard whatever is left, stopping at `deadline`.
    fn drain_until(&self, deadline: Instant) -> u64 {
        self.fire(Barrier::Failed(Failure::Aborted));
        let Ok(mut pipeline) = self.pipeline() else {
            return 0;
        };
        if pipeline.finished {
            return 0;
        }
        let mut buf = vec![0u8; 64 * 1024];
        let mut drained = 0u64;
        while Instant::now() < deadline {
            // The raw source when nothing was built yet, so undecodable
            // bodies are still consumed.
            let reader = if pipeline.chain.is_some() {
                pipeline.chain.as_mut()
            } else {
                pipeline.source.as_mut()
            };
            let Some(reader) = reader else {
                break;
            };
            match reader.read(&mut buf) {
                Ok(0) => {
                    pipeline.finished = true;
                    break;
                }
                Ok(n) => drained += n as u64,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "drain stopped on read error");
                    break;
                }
            }
        }
        drained
    }
}

// -- Public API ---------------------------------------------------------------

/// A byte source with optional decompress/digest/compress stages and a
/// completion barrier.  Stages must be enabled before the first read.
pub struct TransformStream {
    shared: Arc<Shared>,
}

impl TransformStream {
    /// Wrap `source`; no transformation is active yet.
    pub fn new<R: Read + Send + 'static>(source: R) -> Self {
        let pipeline = Pipeline {
            source: Some(Box::new(source)),
            chain: None,
            decompress: false,
            digest: None,
            compress: None,
            tap: Arc::new(Mutex::new(TapState::default())),
            finished: false,
        };
        Self {
            shared: Arc::new(Shared {
                barrier: Mutex::new(Barrier::Pending),
                fired: Condvar::new(),
                pipeline: Mutex::new(pipeline),
                started: AtomicBool::new(false),
            }),
        }
    }

    fn configure(&mut self, apply: impl FnOnce(&mut Pipeline)) -> Result<(), TransferError> {
        if self.shared.started.load(Ordering::Acquire) {
            return Err(TransferError::InvalidState(
                "stream stages must be enabled before the first read",
            ));
        }
        let mut pipeline = self
            .shared
            .pipeline()
            .map_err(|e| TransferError::Internal(e.into()))?;
        apply(&mut *pipeline);
        Ok(())
    }

    /// Decompress zstd input before anything else sees it.
    pub fn enable_decompress(&mut self) -> Result<(), TransferError> {
        self.configure(|p| p.decompress = true)
    }

    /// Hash the (decompressed) plaintext; the value is final at EOF.
    pub fn enable_digest(&mut self, algorithm: DigestAlgorithm) -> Result<(), TransferError> {
        self.configure(|p| p.digest = Some(algorithm))
    }

    /// Compress the output as the outermost stage.  `level` 0 selects the
    /// zstd default.
    pub fn enable_compress(&mut self, level: i32) -> Result<(), TransferError> {
        self.configure(|p| p.compress = Some(level))
    }

    /// A handle for waiting on this stream from another thread.
    pub fn completion(&self) -> CompletionHandle {
        CompletionHandle {
            shared: self.shared.clone(),
        }
    }

    #[cfg(test)]
    fn digest_base32(&self) -> Result<String, TransferError> {
        self.completion().digest_base32()
    }
}

impl Read for TransformStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.shared.read(buf)
    }
}

impl Drop for TransformStream {
    fn drop(&mut self) {
        if self.shared.fire(Barrier::Failed(Failure::Abandoned)) {
            debug!("transfer stream dropped before end of stream");
        }
    }
}

impl std::fmt::Debug for TransformStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformStream")
            .field("barrier", &*self.shared.barrier())
            .finish()
    }
}

/// Waiting side of a [`TransformStream`].
#[derive(Clone)]
pub struct CompletionHandle {
    shared: Arc<Shared>,
}

impl CompletionHandle {
    /// Block until the stream has been fully read or `timeout` elapses.
    ///
    /// Returns the plaintext byte count.  A timeout fails the barrier, so
    /// a consumer that wakes up later gets an error on its next read.
    pub fn wait_for_completion(&self, timeout: Duration) -> Result<u64, TransferError> {
        let guard = self.shared.barrier();
        let (mut barrier, _) = self
            .shared
            .fired
            .wait_timeout_while(guard, timeout, |b| matches!(b, Barrier::Pending))
            .unwrap_or_else(PoisonError::into_inner);
        match &*barrier {
            Barrier::Completed { bytes, .. } => Ok(*bytes),
            Barrier::Failed(failure) => Err(failure.to_error()),
            Barrier::Pending => {
                *barrier = Barrier::Failed(Failure::TimedOut);
                self.shared.fired.notify_all();
                Err(TransferError::OperationTimeout(format!(
                    "backend did not consume the body within {} ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    /// True once the consumer has pulled at least once.
    pub fn has_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        matches!(*self.shared.barrier(), Barrier::Completed { .. })
    }

    /// Plaintext bytes read, once complete.
    #[cfg(test)]
    fn bytes_read(&self) -> Option<u64> {
        match &*self.shared.barrier() {
            Barrier::Completed { bytes, .. } => Some(*bytes),
            _ => None,
        }
    }

    /// Lowercase unpadded base32 of the digest.
    pub fn digest_base32(&self) -> Result<String, TransferError> {
        match &*self.shared.barrier() {
            Barrier::Completed {
                digest: Some(digest),
                ..
            } => Ok(base32_lower(digest)),
            Barrier::Completed { digest: None, .. } => {
                Err(TransferError::InvalidState("digest was not enabled"))
            }
            _ => Err(TransferError::InvalidState(
                "digest is only available after the stream completed",
            )),
        }
    }

    /// Give up on the transfer if it has not completed.  Later reads by
    /// the consumer fail.
    pub fn abort(&self) -> bool {
        self.shared.fire(Barrier::Failed(Failure::Aborted))
    }

    /// Abort, then discard the rest of the body on a helper thread for at
    /// most `max_wait`.  Returns the drained byte count when the helper
    /// finished in time.
    pub fn drain(&self, max_wait: Duration) -> Option<u64> {
        let shared = self.shared.clone();
        let span = tracing::Span::current();
        let deadline = Instant::now() + max_wait;
        let (tx, rx) = std::sync::mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name("transfer-drain".to_string())
            .spawn(move || {
                let _entered = span.enter();
                let _ = tx.send(shared.drain_until(deadline));
            });
        if let Err(e) = spawned {
            warn!(error = %e, "could not start drain thread");
            self.abort();
            return None;
        }
        match rx.recv_timeout(max_wait) {
            Ok(drained) => {
                debug!(drained, "request body drained");
                Some(drained)
            }
            Err(_) => {
                warn!(
                    max_wait_ms = max_wait.as_millis() as u64,
                    "request body not drained in time"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::thread;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    fn sha256_base32(data: &[u8]) -> String {
        base32_lower(&Sha256::digest(data))
    }

    #[test]
    fn test_plain_pass_through() {
        let mut stream = TransformStream::new(Cursor::new(b"ABC".to_vec()));
        let handle = stream.completion();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"ABC");
        assert_eq!(handle.bytes_read(), Some(3));
        assert!(handle.is_complete());
    }

    #[test]
    fn test_digest_matches_direct_hash() {
        for len in [0usize, 3, 1000, 200_000] {
            let data = sample(len);
            let mut stream = TransformStream::new(Cursor::new(data.clone()));
            stream.enable_digest(DigestAlgorithm::Sha256).unwrap();
            let mut out = Vec::new();
            stream.read_to_end(&mut out).unwrap();
            assert_eq!(out.len(), len);
            assert_eq!(stream.digest_base32().unwrap(), sha256_base32(&data), "len {len}");
        }
    }

    #[test]
    fn test_digest_over_decompressed_bytes() {
        let data = sample(50_000);
        let packed = zstd::encode_all(Cursor::new(data.clone()), 0).unwrap();
        let mut stream = TransformStream::new(Cursor::new(packed));
        stream.enable_decompress().unwrap();
        stream.enable_digest(DigestAlgorithm::Sha256).unwrap();
        let handle = stream.completion();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(handle.bytes_read(), Some(data.len() as u64));
        assert_eq!(handle.digest_base32().unwrap(), sha256_base32(&data));
    }

    #[test]
    fn test_all_stages_reproduce_input() {
        let data = sample(10_000);
        let packed = zstd::encode_all(Cursor::new(data.clone()), 0).unwrap();
        let mut stream = TransformStream::new(Cursor::new(packed));
        stream.enable_decompress().unwrap();
        stream.enable_digest(DigestAlgorithm::Sha256).unwrap();
        stream.enable_compress(0).unwrap();
        let handle = stream.completion();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(zstd::decode_all(Cursor::new(out)).unwrap(), data);
        assert_eq!(handle.bytes_read(), Some(10_000));
        assert_eq!(handle.digest_base32().unwrap(), sha256_base32(&data));
    }

    #[test]
    fn test_enable_after_read_is_rejected() {
        let mut stream = TransformStream::new(Cursor::new(b"hello".to_vec()));
        let mut buf = [0u8; 2];
        stream.read(&mut buf).unwrap();
        assert!(matches!(
            stream.enable_decompress(),
            Err(TransferError::InvalidState(_))
        ));
        assert!(matches!(
            stream.enable_compress(0),
            Err(TransferError::InvalidState(_))
        ));
    }

    #[test]
    fn test_digest_before_completion_is_state_error() {
        let mut stream = TransformStream::new(Cursor::new(b"hello".to_vec()));
        stream.enable_digest(DigestAlgorithm::Sha256).unwrap();
        assert!(matches!(
            stream.digest_base32(),
            Err(TransferError::InvalidState(_))
        ));
    }

    #[test]
    fn test_digest_not_enabled_is_state_error() {
        let mut stream = TransformStream::new(Cursor::new(b"hello".to_vec()));
        std::io::copy(&mut stream, &mut std::io::sink()).unwrap();
        assert!(matches!(
            stream.digest_base32(),
            Err(TransferError::InvalidState(_))
        ));
    }

    #[test]
    fn test_read_past_eof_is_noop() {
        let mut stream = TransformStream::new(Cursor::new(b"xy".to_vec()));
        let handle = stream.completion();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert_eq!(handle.bytes_read(), Some(2));
    }

    #[test]
    fn test_wait_across_threads() {
        let data = sample(300_000);
        let mut stream = TransformStream::new(Cursor::new(data.clone()));
        stream.enable_digest(DigestAlgorithm::Sha256).unwrap();
        let handle = stream.completion();
        let consumer = thread::spawn(move || {
            let mut buf = [0u8; 4096];
            let mut total = 0usize;
            loop {
                thread::sleep(Duration::from_micros(50));
                match stream.read(&mut buf).unwrap() {
                    0 => break,
                    n => total += n,
                }
            }
            total
        });
        let bytes = handle.wait_for_completion(Duration::from_secs(10)).unwrap();
        assert_eq!(bytes, data.len() as u64);
        assert_eq!(handle.digest_base32().unwrap(), sha256_base32(&data));
        assert_eq!(consumer.join().unwrap(), data.len());
    }

    #[test]
    fn test_zero_length_completes() {
        let mut stream = TransformStream::new(Cursor::new(Vec::new()));
        let handle = stream.completion();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(handle.wait_for_completion(Duration::from_millis(10)).unwrap(), 0);
    }

    #[test]
    fn test_timeout_when_consumer_stalls() {
        let mut stream = TransformStream::new(Cursor::new(sample(1000)));
        let handle = stream.completion();
        let mut buf = [0u8; 10];
        stream.read(&mut buf).unwrap();

        let started = Instant::now();
        let err = handle
            .wait_for_completion(Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, TransferError::OperationTimeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));

        // The stalled consumer is cut off on its next read.
        let err = stream.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(!handle.is_complete());
    }

    #[test]
    fn test_drop_before_eof_fails_waiter() {
        let mut stream = TransformStream::new(Cursor::new(sample(1000)));
        let handle = stream.completion();
        let mut buf = [0u8; 10];
        stream.read(&mut buf).unwrap();
        drop(stream);
        let started = Instant::now();
        let err = handle
            .wait_for_completion(Duration::from_secs(30))
            .unwrap_err();
        assert!(matches!(err, TransferError::Internal(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_codec_failure_reaches_waiter() {
        let mut stream = TransformStream::new(Cursor::new(b"not a zstd frame".to_vec()));
        stream.enable_decompress().unwrap();
        let handle = stream.completion();
        let mut out = Vec::new();
        assert!(stream.read_to_end(&mut out).is_err());
        let err = handle
            .wait_for_completion(Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, TransferError::Codec(_)));
    }

    #[test]
    fn test_drain_consumes_remaining_source() {
        let mut stream = TransformStream::new(Cursor::new(sample(100_000)));
        let handle = stream.completion();
        let mut buf = [0u8; 100];
        stream.read(&mut buf).unwrap();
        assert!(handle.has_started());
        assert_eq!(handle.drain(Duration::from_secs(5)), Some(99_900));
        assert!(stream.read(&mut buf).is_err());
    }

    #[test]
    fn test_abort_only_when_pending() {
        let mut stream = TransformStream::new(Cursor::new(b"abc".to_vec()));
        let handle = stream.completion();
        std::io::copy(&mut stream, &mut std::io::sink()).unwrap();
        assert!(!handle.abort());
        assert_eq!(handle.wait_for_completion(Duration::ZERO).unwrap(), 3);
    }
}
