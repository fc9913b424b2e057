use async_trait::async_trait;
use bytes::Bytes;

use super::ByteSource;
use crate::error::{Error, Result};

/// In-memory byte source.
///
/// Backs locally supplied buffers and full downloads of resources whose
/// origin cannot serve ranges. Reads are pure slices, so concurrent use
/// needs no coordination.
pub struct BufferSource {
    data: Bytes,
}

impl BufferSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl ByteSource for BufferSource {
    async fn read_range(&self, start: u64, end: u64) -> Result<Bytes> {
        let len = self.data.len() as u64;
        if end < start || end >= len {
            return Err(Error::OutOfBounds { start, end, len });
        }
        Ok(self.data.slice(start as usize..=end as usize))
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_inclusive_ranges() {
        let src = BufferSource::new(&b"0123456789"[..]);
        assert_eq!(src.len(), 10);
        let bytes = src.read_range(2, 5).await.unwrap();
        assert_eq!(&bytes[..], b"2345");
        let all = src.read_range(0, 9).await.unwrap();
        assert_eq!(&all[..], b"0123456789");
    }

    #[tokio::test]
    async fn rejects_out_of_bounds() {
        let src = BufferSource::new(&b"abc"[..]);
        assert!(matches!(
            src.read_range(0, 3).await,
            Err(Error::OutOfBounds { .. })
        ));
        assert!(matches!(
            src.read_range(2, 1).await,
            Err(Error::OutOfBounds { .. })
        ));
    }
}
