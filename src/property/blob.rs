//! BLOB payload representation: inline bytes, zlib-compressed formats, and
//! the opaque handle used by the same-host fast path.

use std::fmt;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::core::{Error, Result};

/// Release callback invoked when the last reference to an attached payload
/// is dropped
type ReleaseFn = Box<dyn FnOnce() + Send>;

struct HandleInner {
    data: Bytes,
    release: Mutex<Option<ReleaseFn>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.release.lock() {
            if let Some(release) = guard.take() {
                release();
            }
        }
    }
}

/// Opaque handle to an out-of-band payload delivered over the fast path.
///
/// The transport that produced the payload (shared memory, passed file
/// descriptor) registers a release callback; it runs exactly once, when the
/// last clone of the handle is dropped. The rest of the system only ever
/// sees the bytes.
#[derive(Clone)]
pub struct BlobHandle(Arc<HandleInner>);

impl BlobHandle {
    /// Wraps a plain byte buffer with no release action
    pub fn new(data: Bytes) -> Self {
        BlobHandle(Arc::new(HandleInner {
            data,
            release: Mutex::new(None),
        }))
    }

    /// Wraps a byte buffer with an explicit release callback
    pub fn with_release(data: Bytes, release: impl FnOnce() + Send + 'static) -> Self {
        BlobHandle(Arc::new(HandleInner {
            data,
            release: Mutex::new(Some(Box::new(release))),
        }))
    }

    /// Returns the payload bytes
    pub fn bytes(&self) -> &Bytes {
        &self.0.data
    }
}

impl fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobHandle")
            .field("len", &self.0.data.len())
            .finish()
    }
}

impl PartialEq for BlobHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0.data == other.0.data
    }
}

/// How a BLOB's payload travels
#[derive(Debug, Clone, PartialEq)]
pub enum BlobData {
    /// Payload carried inline on the wire as base64
    Inline(Bytes),
    /// Payload delivered out-of-band; available no later than the end of the
    /// enclosing message
    Attached(BlobHandle),
}

impl BlobData {
    /// Returns the transport bytes regardless of delivery path
    pub fn bytes(&self) -> &Bytes {
        match self {
            BlobData::Inline(data) => data,
            BlobData::Attached(handle) => handle.bytes(),
        }
    }
}

/// A BLOB element value: payload plus the format/size metadata carried on
/// the wire
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    /// Dotted suffix chain describing the content, e.g. ".fits" or ".fits.z";
    /// a trailing ".z" means the payload bytes are zlib-compressed
    pub format: String,
    /// Uncompressed byte count
    pub size: usize,
    /// The payload as transported (compressed when format ends in ".z")
    pub data: BlobData,
}

impl Blob {
    /// Builds an uncompressed inline BLOB; `size` is taken from the data
    pub fn inline(format: impl Into<String>, data: Bytes) -> Self {
        Blob {
            format: format.into(),
            size: data.len(),
            data: BlobData::Inline(data),
        }
    }

    /// Builds a zlib-compressed inline BLOB from raw bytes; ".z" is appended
    /// to the format and `size` records the uncompressed length
    pub fn deflated(format: impl Into<String>, raw: &[u8]) -> Result<Self> {
        let format = format.into();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        let compressed = encoder
            .write_all(raw)
            .and_then(|_| encoder.finish())
            .map_err(|e| Error::blob(format!("zlib compression failed: {}", e)))?;
        Ok(Blob {
            format: format + ".z",
            size: raw.len(),
            data: BlobData::Inline(Bytes::from(compressed)),
        })
    }

    /// Builds a BLOB whose payload arrives out-of-band
    pub fn attached(format: impl Into<String>, size: usize, handle: BlobHandle) -> Self {
        Blob {
            format: format.into(),
            size,
            data: BlobData::Attached(handle),
        }
    }

    /// True when the payload is zlib-compressed per the format suffix
    pub fn is_compressed(&self) -> bool {
        self.format.ends_with(".z")
    }

    /// Returns the transport bytes (compressed form when applicable)
    pub fn payload(&self) -> &Bytes {
        self.data.bytes()
    }

    /// Returns the uncompressed payload, inflating ".z" data and checking
    /// the result against the declared size
    pub fn decompressed(&self) -> Result<Bytes> {
        if !self.is_compressed() {
            return Ok(self.payload().clone());
        }
        let mut decoder = ZlibDecoder::new(self.payload().as_ref());
        let mut raw = Vec::with_capacity(self.size);
        decoder
            .read_to_end(&mut raw)
            .map_err(|e| Error::blob(format!("zlib decompression failed: {}", e)))?;
        if raw.len() != self.size {
            return Err(Error::blob(format!(
                "decompressed length {} does not match declared size {}",
                raw.len(),
                self.size
            )));
        }
        Ok(Bytes::from(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_inline_blob() {
        let blob = Blob::inline(".fits", Bytes::from_static(b"SIMPLE  ="));
        assert_eq!(blob.size, 9);
        assert!(!blob.is_compressed());
        assert_eq!(blob.decompressed().unwrap().as_ref(), b"SIMPLE  =");
    }

    #[test]
    fn test_deflated_round_trip() {
        let raw = vec![0x55u8; 4096];
        let blob = Blob::deflated(".fits", &raw).unwrap();
        assert_eq!(blob.format, ".fits.z");
        assert_eq!(blob.size, 4096);
        assert!(blob.is_compressed());
        assert!(blob.payload().len() < raw.len());
        assert_eq!(blob.decompressed().unwrap().as_ref(), raw.as_slice());
    }

    #[test]
    fn test_decompressed_size_mismatch() {
        let mut blob = Blob::deflated(".fits", b"payload bytes").unwrap();
        blob.size += 1;
        assert!(matches!(blob.decompressed(), Err(Error::Blob(_))));
    }

    #[test]
    fn test_handle_release_runs_once_on_last_drop() {
        static RELEASED: AtomicBool = AtomicBool::new(false);
        RELEASED.store(false, Ordering::SeqCst);

        let handle = BlobHandle::with_release(Bytes::from_static(b"oob"), || {
            RELEASED.store(true, Ordering::SeqCst);
        });
        let clone = handle.clone();
        drop(handle);
        assert!(!RELEASED.load(Ordering::SeqCst));
        drop(clone);
        assert!(RELEASED.load(Ordering::SeqCst));
    }

    #[test]
    fn test_attached_blob_bytes() {
        let handle = BlobHandle::new(Bytes::from_static(b"fast"));
        let blob = Blob::attached(".fits", 4, handle);
        assert_eq!(blob.payload().as_ref(), b"fast");
    }
}
