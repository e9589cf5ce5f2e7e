//! Streaming zstd adapters.
//!
//! Both readers work through a fixed internal buffer and never hold the
//! whole payload.  Failures raised by the codec itself are tagged so they
//! can be told apart from failures of the underlying source (a client
//! hanging up mid-body is not a codec error).

use std::io::{self, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use zstd::stream::read::{Decoder, Encoder};

use crate::errors::TransferError;

#[derive(Debug, Error)]
#[error("zstd: {0}")]
struct CodecFailure(io::Error);

/// True when `err` was produced by a codec rather than by its source.
pub fn is_codec_error(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<CodecFailure>())
}

/// Remembers whether the wrapped source failed.
struct Watched<R> {
    inner: R,
    failed: Arc<AtomicBool>,
}

impl<R: Read> Read for Watched<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).inspect_err(|e| {
            if e.kind() != io::ErrorKind::Interrupted {
                self.failed.store(true, Ordering::Release);
            }
        })
    }
}

fn tag(err: io::Error, source_failed: &AtomicBool) -> io::Error {
    if err.kind() == io::ErrorKind::Interrupted || source_failed.load(Ordering::Acquire) {
        err
    } else {
        io::Error::new(io::ErrorKind::InvalidData, CodecFailure(err))
    }
}

/// Compresses its source on the fly.
pub struct CompressingReader<R: Read> {
    inner: Encoder<'static, BufReader<Watched<R>>>,
    source_failed: Arc<AtomicBool>,
}

impl<R: Read> CompressingReader<R> {
    /// `level` 0 selects the zstd default.
    pub fn new(source: R, level: i32) -> Result<Self, TransferError> {
        let source_failed = Arc::new(AtomicBool::new(false));
        let watched = Watched {
            inner: source,
            failed: source_failed.clone(),
        };
        let inner = Encoder::new(watched, level).map_err(TransferError::Codec)?;
        Ok(Self {
            inner,
            source_failed,
        })
    }
}

impl<R: Read> Read for CompressingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner
            .read(buf)
            .map_err(|e| tag(e, &self.source_failed))
    }
}

/// Decompresses a zstd source on the fly.
pub struct DecompressingReader<R: Read> {
    inner: Decoder<'static, BufReader<Watched<R>>>,
    source_failed: Arc<AtomicBool>,
}

impl<R: Read> DecompressingReader<R> {
    pub fn new(source: R) -> Result<Self, TransferError> {
        let source_failed = Arc::new(AtomicBool::new(false));
        let watched = Watched {
            inner: source,
            failed: source_failed.clone(),
        };
        let inner = Decoder::new(watched).map_err(TransferError::Codec)?;
        Ok(Self {
            inner,
            source_failed,
        })
    }
}

impl<R: Read> Read for DecompressingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner
            .read(buf)
            .map_err(|e| tag(e, &self.source_failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        CompressingReader::new(Cursor::new(data.to_vec()), 0)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_round_trip_sizes() {
        for len in [0usize, 1, 3, 4096, 300_000] {
            let data = sample(len);
            let packed = compress(&data);
            let mut out = Vec::new();
            DecompressingReader::new(Cursor::new(packed))
                .unwrap()
                .read_to_end(&mut out)
                .unwrap();
            assert_eq!(out, data, "length {len}");
        }
    }

    #[test]
    fn test_output_is_zstd_frame() {
        let packed = compress(b"hello");
        assert_eq!(&packed[..4], &[0x28, 0xb5, 0x2f, 0xfd]);
        assert_eq!(zstd::decode_all(Cursor::new(packed)).unwrap(), b"hello");
    }

    #[test]
    fn test_garbage_is_codec_error() {
        let mut out = Vec::new();
        let err = DecompressingReader::new(Cursor::new(b"definitely not zstd".to_vec()))
            .unwrap()
            .read_to_end(&mut out)
            .unwrap_err();
        assert!(is_codec_error(&err));
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"))
        }
    }

    #[test]
    fn test_source_failure_is_not_codec_error() {
        let mut out = Vec::new();
        let err = DecompressingReader::new(Broken)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap_err();
        assert!(!is_codec_error(&err));
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);

        let err = CompressingReader::new(Broken, 0)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap_err();
        assert!(!is_codec_error(&err));
    }
}
