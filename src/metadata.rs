//! Storage for everything that isn't pixels.
//!
//! The codec doesn't interpret ancillary chunks. It checks where they appear,
//! validates their CRC, and hands their bytes to a [`MetadataStore`]. When
//! writing, it asks the store which chunks to emit and where.

use crate::chunk::ChunkTag;
use crate::error::{Error, ErrorKind, Warnings};
use fallible_collections::FallibleVec;
use rgb::{ComponentBytes, RGB8};
use std::fmt;

/// Chunks with a known meaning, in bit order of [`ChunkSet`]
pub const KNOWN_CHUNKS: [ChunkTag; 18] = [
    ChunkTag::PLTE,
    ChunkTag::gAMA, ChunkTag::cHRM, ChunkTag::sRGB, ChunkTag::iCCP, ChunkTag::sBIT,
    ChunkTag::tRNS, ChunkTag::bKGD, ChunkTag::hIST,
    ChunkTag::pHYs, ChunkTag::oFFs, ChunkTag::pCAL, ChunkTag::sCAL, ChunkTag::sPLT,
    ChunkTag::tIME, ChunkTag::tEXt, ChunkTag::zTXt, ChunkTag::iTXt,
];

/// Bit set of the known chunks a store holds
#[derive(Copy, Clone, PartialEq, Eq, Default, Hash)]
pub struct ChunkSet(u32);

impl ChunkSet {
    fn bit(tag: ChunkTag) -> Option<u32> {
        KNOWN_CHUNKS.iter().position(|&t| t == tag).map(|i| 1 << i)
    }

    /// Unknown tags are ignored
    pub fn insert(&mut self, tag: ChunkTag) {
        if let Some(bit) = Self::bit(tag) {
            self.0 |= bit;
        }
    }

    pub fn contains(&self, tag: ChunkTag) -> bool {
        Self::bit(tag).map_or(false, |bit| self.0 & bit != 0)
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = ChunkTag> + '_ {
        KNOWN_CHUNKS.iter().enumerate().filter(move |&(i, _)| self.0 & (1 << i) != 0).map(|(_, &t)| t)
    }
}

impl fmt::Debug for ChunkSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Which structural chunk a metadata chunk follows
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ChunkPosition {
    /// After IHDR, before PLTE
    IHDR = 0,
    /// After PLTE, before IDAT
    PLTE = 1,
    /// After IDAT, before IEND
    IDAT = 2,
}

/// Uncompressed Latin-1 text chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Text {
    pub key: Box<[u8]>,
    pub value: Box<[u8]>,
}

impl Text {
    /// Splits tEXt data at the first NUL
    pub fn from_chunk_data(data: &[u8]) -> Result<Self, Error> {
        let sep = data.iter().position(|&b| b == 0)
            .ok_or_else(|| Error::chunk(ErrorKind::InvalidKeyword, ChunkTag::tEXt, "missing keyword separator"))?;
        Ok(Self {
            key: data[..sep].into(),
            value: data[sep + 1..].into(),
        })
    }
}

/// Receives ancillary chunks from the decoder, and supplies them to the encoder.
pub trait MetadataStore {
    /// Stores chunk data that passed ordering and CRC checks
    fn set(&mut self, tag: ChunkTag, position: ChunkPosition, data: &[u8]) -> Result<(), Error>;

    /// Data of the `index`-th chunk with that tag
    fn get_nth(&self, tag: ChunkTag, index: usize) -> Option<&[u8]>;

    /// Data of the first chunk with that tag
    fn get(&self, tag: ChunkTag) -> Option<&[u8]> {
        self.get_nth(tag, 0)
    }

    /// Known chunks held
    fn present(&self) -> ChunkSet;

    /// tEXt chunks, in file order
    fn texts(&self) -> &[Text];

    /// Chunks to write after the structural chunk `position`, in order, as the tag
    /// and the index to pass to [`get_nth`](Self::get_nth). PLTE and tEXt aren't included.
    fn planned(&self, position: ChunkPosition) -> Vec<(ChunkTag, usize)>;
}

#[derive(Debug, Clone)]
struct StoredChunk {
    tag: ChunkTag,
    position: ChunkPosition,
    data: Box<[u8]>,
}

/// Default in-memory metadata store
#[derive(Debug, Clone, Default)]
pub struct Info {
    palette: Vec<RGB8>,
    chunks: Vec<StoredChunk>,
    texts: Vec<Text>,
    present: ChunkSet,
}

impl Info {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries of PLTE
    #[inline]
    pub fn palette(&self) -> &[RGB8] {
        &self.palette
    }

    /// Sets PLTE. At most 256 entries.
    pub fn set_palette(&mut self, palette: &[RGB8]) -> Result<(), Error> {
        if palette.is_empty() || palette.len() > 256 {
            return Err(Error::chunk(ErrorKind::InvalidPalette, ChunkTag::PLTE, "palette must have 1 to 256 entries"));
        }
        self.palette.clear();
        self.palette.extend_from_slice(palette);
        self.present.insert(ChunkTag::PLTE);
        Ok(())
    }

    /// Adds a tEXt chunk. Both strings must be Latin-1. The keyword is
    /// cleaned up when written.
    pub fn add_text(&mut self, key: &str, value: &str) -> Result<(), Error> {
        let key = latin1(key)?;
        if key.is_empty() {
            return Err(Error::new(ErrorKind::InvalidKeyword));
        }
        self.texts.push(Text { key, value: latin1(value)? });
        self.present.insert(ChunkTag::tEXt);
        Ok(())
    }

    /// Iterates `(key, value)` of tEXt chunks
    pub fn text_keys(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.texts.iter().map(|t| (&*t.key, &*t.value))
    }

    /// Raw chunk to be written after `position`. Chunks this store interprets
    /// (PLTE, tEXt) should be set with their dedicated methods.
    pub fn push_chunk(&mut self, position: ChunkPosition, tag: ChunkTag, data: &[u8]) -> Result<(), Error> {
        if !tag.is_valid() || tag.is_critical() {
            return Err(Error::chunk(ErrorKind::InvalidArgument, tag, "only ancillary chunks can be stored"));
        }
        self.set(tag, position, data)
    }

    /// Tags and data of raw chunks
    pub fn chunks(&self) -> impl Iterator<Item = (ChunkTag, ChunkPosition, &[u8])> {
        self.chunks.iter().map(|c| (c.tag, c.position, &*c.data))
    }
}

impl MetadataStore for Info {
    fn set(&mut self, tag: ChunkTag, position: ChunkPosition, data: &[u8]) -> Result<(), Error> {
        match tag {
            ChunkTag::PLTE => {
                if data.len() % 3 != 0 {
                    return Err(Error::chunk(ErrorKind::InvalidPalette, tag, "Invalid palette chunk"));
                }
                let palette: Vec<_> = data.chunks_exact(3).map(|c| RGB8::new(c[0], c[1], c[2])).collect();
                self.set_palette(&palette)?;
            },
            ChunkTag::tEXt => {
                self.texts.push(Text::from_chunk_data(data)?);
            },
            _ => {
                let mut copy = Vec::new();
                copy.try_extend_from_slice(data)?;
                self.chunks.push(StoredChunk { tag, position, data: copy.into_boxed_slice() });
            },
        }
        self.present.insert(tag);
        Ok(())
    }

    fn get_nth(&self, tag: ChunkTag, index: usize) -> Option<&[u8]> {
        if tag == ChunkTag::PLTE {
            return Some(self.palette.as_bytes()).filter(|p| index == 0 && !p.is_empty());
        }
        self.chunks.iter().filter(|c| c.tag == tag).nth(index).map(|c| &*c.data)
    }

    #[inline]
    fn present(&self) -> ChunkSet {
        self.present
    }

    #[inline]
    fn texts(&self) -> &[Text] {
        &self.texts
    }

    fn planned(&self, position: ChunkPosition) -> Vec<(ChunkTag, usize)> {
        self.chunks.iter().enumerate()
            .filter(|(_, c)| c.position == position)
            .map(|(i, c)| (c.tag, self.chunks[..i].iter().filter(|o| o.tag == c.tag).count()))
            .collect()
    }
}

fn latin1(s: &str) -> Result<Box<[u8]>, Error> {
    s.chars().map(|c| u8::try_from(u32::from(c)).map_err(|_| Error::msg(ErrorKind::InvalidArgument, "text must be Latin-1")))
        .collect()
}

/// Maximum keyword length of text chunks
pub const MAX_KEYWORD_LEN: usize = 79;

/// Cleans up a text keyword before writing.
///
/// Invalid characters become spaces, leading and trailing spaces are removed,
/// runs of spaces collapse to one, and the result is cut to 79 bytes. Each fix
/// is reported as a warning. Returns `None` if nothing is left.
pub(crate) fn sanitize_keyword(key: &[u8], warnings: &mut Warnings) -> Option<Vec<u8>> {
    if key.is_empty() {
        warnings.push(None, "Zero length keyword");
        return None;
    }

    let mut cleaned: Vec<u8> = key.iter().map(|&c| {
        if c < 0x20 || (0x7F..=0xA0).contains(&c) {
            warnings.push(None, format!("invalid keyword character 0x{:02X}", c));
            b' '
        } else {
            c
        }
    }).collect();

    if cleaned.last() == Some(&b' ') {
        warnings.push(None, "Trailing spaces removed from keyword");
        while cleaned.last() == Some(&b' ') {
            cleaned.pop();
        }
    }

    let leading = cleaned.iter().take_while(|&&c| c == b' ').count();
    if leading > 0 {
        warnings.push(None, "Leading spaces removed from keyword");
        cleaned.drain(..leading);
    }

    let before = cleaned.len();
    cleaned.dedup_by(|a, b| *a == b' ' && *b == b' ');
    if cleaned.len() != before {
        warnings.push(None, "Extra interior spaces removed from keyword");
    }

    if cleaned.is_empty() {
        warnings.push(None, "Zero length keyword");
        return None;
    }
    if cleaned.len() > MAX_KEYWORD_LEN {
        warnings.push(None, "keyword length must be 1 - 79 characters");
        cleaned.truncate(MAX_KEYWORD_LEN);
    }
    Some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_set() {
        let mut s = ChunkSet::default();
        s.insert(ChunkTag::gAMA);
        s.insert(ChunkTag::iTXt);
        s.insert(ChunkTag(*b"vpAg"));
        assert!(s.contains(ChunkTag::gAMA));
        assert!(!s.contains(ChunkTag::cHRM));
        assert!(!s.contains(ChunkTag(*b"vpAg")));
        assert_eq!(vec![ChunkTag::gAMA, ChunkTag::iTXt], s.iter().collect::<Vec<_>>());
    }

    #[test]
    fn store_and_plan() {
        let mut info = Info::new();
        info.set(ChunkTag::gAMA, ChunkPosition::IHDR, &[0, 0, 0xb1, 0x8f]).unwrap();
        info.set(ChunkTag::zTXt, ChunkPosition::IDAT, b"a\0\0x").unwrap();
        info.set(ChunkTag::zTXt, ChunkPosition::IDAT, b"b\0\0y").unwrap();
        info.set(ChunkTag::tEXt, ChunkPosition::PLTE, b"Title\0hello").unwrap();
        info.set(ChunkTag::PLTE, ChunkPosition::IHDR, &[1, 2, 3, 4, 5, 6]).unwrap();

        assert_eq!(Some(&[0, 0, 0xb1, 0x8f][..]), info.get(ChunkTag::gAMA));
        assert_eq!(Some(&b"b\0\0y"[..]), info.get_nth(ChunkTag::zTXt, 1));
        info.set(ChunkTag::zTXt, ChunkPosition::PLTE, b"c\0\0z").unwrap();
        assert_eq!(vec![(ChunkTag::gAMA, 0)], info.planned(ChunkPosition::IHDR));
        assert_eq!(vec![(ChunkTag::zTXt, 0), (ChunkTag::zTXt, 1)], info.planned(ChunkPosition::IDAT));
        assert_eq!(vec![(ChunkTag::zTXt, 2)], info.planned(ChunkPosition::PLTE));
        assert_eq!(&[RGB8::new(1, 2, 3), RGB8::new(4, 5, 6)], info.palette());
        assert_eq!(Some(&[1, 2, 3, 4, 5, 6][..]), info.get(ChunkTag::PLTE));
        assert_eq!(b"Title", &*info.texts()[0].key);
        assert_eq!(b"hello", &*info.texts()[0].value);
        assert!(info.present().contains(ChunkTag::PLTE));
        assert!(info.present().contains(ChunkTag::tEXt));
    }

    #[test]
    fn text_needs_separator() {
        assert!(Text::from_chunk_data(b"no separator").is_err());
        let t = Text::from_chunk_data(b"k\0").unwrap();
        assert!(t.value.is_empty());
    }

    #[test]
    fn add_text_latin1() {
        let mut info = Info::new();
        info.add_text("Author", "Zoë").unwrap();
        assert_eq!(b"Zo\xeb", &*info.texts()[0].value);
        assert!(info.add_text("Author", "日本").is_err());
        assert!(info.add_text("", "x").is_err());
    }

    fn clean(key: &[u8]) -> (Option<Vec<u8>>, usize) {
        let mut w = Warnings::default();
        let res = sanitize_keyword(key, &mut w);
        (res, w.as_slice().len())
    }

    #[test]
    fn keyword_cleanup() {
        assert_eq!((Some(b"Title".to_vec()), 0), clean(b"Title"));
        assert_eq!((Some(b"A B".to_vec()), 3), clean(b"  A   B "));
        assert_eq!((Some(b"a b".to_vec()), 1), clean(b"a\tb"));
        assert_eq!((Some(b"a b".to_vec()), 1), clean(b"a\x7fb"));
        assert_eq!((None, 1), clean(b""));
        // invalid char, trailing spaces, zero length
        assert_eq!((None, 3), clean(b"\n"));
        let long = [b'k'; 100];
        let (res, warnings) = clean(&long);
        assert_eq!(79, res.unwrap().len());
        assert_eq!(1, warnings);
    }
}
