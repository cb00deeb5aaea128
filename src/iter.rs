use crate::chunk::{ChunkRef, SIGNATURE};
use crate::Error;

/// Chunks of an in-memory PNG. Stops quietly at the first malformed chunk.
pub struct ChunksIter<'a> {
    pub(crate) iter: ChunksIterFallible<'a>,
}

impl<'a> ChunksIter<'a> {
    /// `data` may start with the PNG signature, which is skipped
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            iter: ChunksIterFallible::new(data),
        }
    }
}

impl<'a> Iterator for ChunksIter<'a> {
    type Item = ChunkRef<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().and_then(|item| item.ok())
    }
}

/// Chunks of an in-memory PNG, reporting truncated or oversized chunks
pub struct ChunksIterFallible<'a> {
    pub(crate) data: &'a [u8],
}

impl<'a> ChunksIterFallible<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let data = data.strip_prefix(&SIGNATURE[..]).unwrap_or(data);
        Self { data }
    }
}

impl<'a> Iterator for ChunksIterFallible<'a> {
    type Item = Result<ChunkRef<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        let ch = match ChunkRef::new(self.data) {
            Ok(ch) => ch,
            Err(e) => {
                self.data = &[];
                return Some(Err(e));
            },
        };
        self.data = &self.data[ch.len() + 12..];
        Some(Ok(ch))
    }
}
