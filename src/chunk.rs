//! Chunk records: tags, CRC-protected framing on the wire, and the CRC policy.

use crate::error::{Error, ErrorKind};
use crate::settings::CrcAction;
use flate2::Crc;
use std::fmt;
use std::io::{Read, Write};

/// The 8 bytes every PNG file starts with
pub const SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// Largest length a chunk may declare
pub const MAX_CHUNK_LEN: u32 = 0x7fff_ffff;

/// 4-byte chunk type, e.g. `IHDR`
///
/// Case of each letter carries meaning: bit 5 of the first byte marks
/// ancillary chunks, of the second private ones, of the fourth safe-to-copy ones.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkTag(pub [u8; 4]);

#[allow(non_upper_case_globals)]
impl ChunkTag {
    pub const IHDR: Self = Self(*b"IHDR");
    pub const PLTE: Self = Self(*b"PLTE");
    pub const IDAT: Self = Self(*b"IDAT");
    pub const IEND: Self = Self(*b"IEND");
    pub const gAMA: Self = Self(*b"gAMA");
    pub const cHRM: Self = Self(*b"cHRM");
    pub const sRGB: Self = Self(*b"sRGB");
    pub const iCCP: Self = Self(*b"iCCP");
    pub const sBIT: Self = Self(*b"sBIT");
    pub const tRNS: Self = Self(*b"tRNS");
    pub const bKGD: Self = Self(*b"bKGD");
    pub const hIST: Self = Self(*b"hIST");
    pub const pHYs: Self = Self(*b"pHYs");
    pub const oFFs: Self = Self(*b"oFFs");
    pub const pCAL: Self = Self(*b"pCAL");
    pub const sCAL: Self = Self(*b"sCAL");
    pub const sPLT: Self = Self(*b"sPLT");
    pub const tIME: Self = Self(*b"tIME");
    pub const tEXt: Self = Self(*b"tEXt");
    pub const zTXt: Self = Self(*b"zTXt");
    pub const iTXt: Self = Self(*b"iTXt");

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Optional chunk that a decoder may skip
    #[inline]
    pub fn is_ancillary(&self) -> bool {
        (self.0[0] & 32) != 0
    }

    #[inline]
    pub fn is_critical(&self) -> bool {
        !self.is_ancillary()
    }

    #[inline]
    pub fn is_private(&self) -> bool {
        (self.0[1] & 32) != 0
    }

    #[inline]
    pub fn is_safe_to_copy(&self) -> bool {
        (self.0[3] & 32) != 0
    }

    /// All four bytes are ASCII letters
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.0.iter().all(|b| b.is_ascii_alphabetic())
    }
}

/// Letters print as-is, anything else as `[XX]` hex
impl fmt::Display for ChunkTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_alphabetic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "[{:02X}]", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ChunkTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ChunkTag({})", self)
    }
}

impl From<[u8; 4]> for ChunkTag {
    #[inline]
    fn from(b: [u8; 4]) -> Self {
        Self(b)
    }
}

/// CRC32 over the type and data, as stored in the chunk trailer
pub fn chunk_crc(tag: ChunkTag, data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(&tag.0);
    crc.update(data);
    crc.sum()
}

/// Which CRC policy applies to a chunk.
///
/// PLTE of a non-palette image is only a suggestion, so it's checked as ancillary.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChunkClass {
    Critical,
    Ancillary,
}

impl ChunkClass {
    #[inline]
    pub fn of(tag: ChunkTag) -> Self {
        if tag.is_ancillary() { Self::Ancillary } else { Self::Critical }
    }
}

/// What to do with the data of a chunk after its CRC has been compared
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CrcVerdict {
    /// CRC matched, or mismatch is ignored silently
    Use,
    /// Mismatch, but the data is used anyway
    UseWithWarning,
    /// Mismatch, the chunk must be dropped
    Discard,
}

/// Applies the mismatch policy of the chunk's class.
pub fn crc_verdict(tag: ChunkTag, class: ChunkClass, matched: bool, critical: CrcAction, ancillary: CrcAction) -> Result<CrcVerdict, Error> {
    if matched {
        return Ok(CrcVerdict::Use);
    }
    let action = match class {
        ChunkClass::Critical => match critical {
            // critical data can't be thrown away
            CrcAction::Default | CrcAction::ErrorQuit | CrcAction::WarnDiscard => CrcAction::ErrorQuit,
            other => other,
        },
        ChunkClass::Ancillary => match ancillary {
            CrcAction::Default => CrcAction::WarnDiscard,
            other => other,
        },
    };
    match action {
        CrcAction::QuietUse => Ok(CrcVerdict::Use),
        CrcAction::WarnUse => Ok(CrcVerdict::UseWithWarning),
        CrcAction::WarnDiscard => Ok(CrcVerdict::Discard),
        CrcAction::Default | CrcAction::ErrorQuit => Err(Error::chunk(ErrorKind::Crc, tag, "CRC error")),
    }
}

/// Reads chunk records from a byte source, checksumming everything it passes through.
pub(crate) struct ChunkReader<R> {
    inner: R,
    crc: Crc,
    tag: ChunkTag,
    remaining: u32,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            crc: Crc::new(),
            tag: ChunkTag([0; 4]),
            remaining: 0,
        }
    }

    /// Checks the rest of the signature, after `already_read` bytes were consumed by the caller
    pub fn read_signature(&mut self, already_read: usize) -> Result<(), Error> {
        let already_read = already_read.min(8);
        let mut sig = [0u8; 8];
        sig[..already_read].copy_from_slice(&SIGNATURE[..already_read]);
        self.inner.read_exact(&mut sig[already_read..])?;
        if sig != SIGNATURE {
            if already_read < 4 && sig[..4] == SIGNATURE[..4] {
                return Err(Error::msg(ErrorKind::Signature, "PNG file corrupted by ASCII conversion"));
            }
            return Err(Error::msg(ErrorKind::Signature, "Not a PNG file"));
        }
        Ok(())
    }

    /// Reads length and type, and starts a new CRC over the type
    pub fn read_header(&mut self) -> Result<(ChunkTag, u32), Error> {
        let mut head = [0u8; 8];
        self.inner.read_exact(&mut head)?;
        let len = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
        let tag = ChunkTag([head[4], head[5], head[6], head[7]]);
        if len > MAX_CHUNK_LEN {
            return Err(Error::chunk(ErrorKind::ChunkTooLong, tag, "PNG unsigned integer out of range"));
        }
        if !tag.is_valid() {
            return Err(Error::chunk(ErrorKind::InvalidChunkType, tag, "invalid chunk type"));
        }
        self.crc.reset();
        self.crc.update(&tag.0);
        self.tag = tag;
        self.remaining = len;
        log::trace!("chunk {} ({} bytes)", tag, len);
        Ok((tag, len))
    }

    #[inline]
    pub fn tag(&self) -> ChunkTag {
        self.tag
    }

    /// Bytes of the current chunk's data not read yet
    #[inline]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Fills `buf` with chunk data. Can't read past the end of the chunk.
    pub fn read_data(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        if buf.len() > self.remaining as usize {
            return Err(Error::chunk(ErrorKind::InvalidState, self.tag, "read past the end of chunk"));
        }
        self.inner.read_exact(buf)?;
        self.crc.update(buf);
        self.remaining -= buf.len() as u32;
        Ok(())
    }

    /// Reads the whole rest of the chunk into a new buffer
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>, Error> {
        let mut data = Vec::new();
        fallible_collections::FallibleVec::try_resize(&mut data, self.remaining as usize, 0u8)?;
        self.read_data(&mut data)?;
        Ok(data)
    }

    /// Consumes the rest of the data, feeding it to the CRC
    pub fn skip_data(&mut self) -> Result<(), Error> {
        let mut scratch = [0u8; 1024];
        while self.remaining > 0 {
            let n = (self.remaining as usize).min(scratch.len());
            self.read_data(&mut scratch[..n])?;
        }
        Ok(())
    }

    /// Skips unread data, reads the stored CRC and returns whether it matched
    pub fn finish(&mut self) -> Result<bool, Error> {
        self.skip_data()?;
        let mut stored = [0u8; 4];
        self.inner.read_exact(&mut stored)?;
        let matched = u32::from_be_bytes(stored) == self.crc.sum();
        if !matched {
            log::debug!("{}: stored CRC {:08x} != computed {:08x}", self.tag, u32::from_be_bytes(stored), self.crc.sum());
        }
        Ok(matched)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes chunk records to a byte sink
pub(crate) struct ChunkWriter<W> {
    inner: W,
    crc: Crc,
    tag: ChunkTag,
    remaining: u32,
    open: bool,
}

impl<W: Write> ChunkWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            crc: Crc::new(),
            tag: ChunkTag([0; 4]),
            remaining: 0,
            open: false,
        }
    }

    pub fn write_signature(&mut self) -> Result<(), Error> {
        self.inner.write_all(&SIGNATURE)?;
        Ok(())
    }

    /// Writes length and type. Exactly `len` bytes of data must follow.
    pub fn begin(&mut self, tag: ChunkTag, len: usize) -> Result<(), Error> {
        if self.open {
            return Err(Error::chunk(ErrorKind::InvalidState, self.tag, "previous chunk not finished"));
        }
        if !tag.is_valid() {
            return Err(Error::chunk(ErrorKind::InvalidChunkType, tag, "invalid chunk type"));
        }
        let len = u32::try_from(len).ok().filter(|&l| l <= MAX_CHUNK_LEN)
            .ok_or_else(|| Error::chunk(ErrorKind::ChunkTooLong, tag, "chunk data too long"))?;
        self.inner.write_all(&len.to_be_bytes())?;
        self.inner.write_all(&tag.0)?;
        self.crc.reset();
        self.crc.update(&tag.0);
        self.tag = tag;
        self.remaining = len;
        self.open = true;
        Ok(())
    }

    pub fn write_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if !self.open || data.len() > self.remaining as usize {
            return Err(Error::chunk(ErrorKind::InvalidState, self.tag, "chunk data longer than declared"));
        }
        self.inner.write_all(data)?;
        self.crc.update(data);
        self.remaining -= data.len() as u32;
        Ok(())
    }

    /// Writes the CRC trailer
    pub fn end(&mut self) -> Result<(), Error> {
        if !self.open || self.remaining != 0 {
            return Err(Error::chunk(ErrorKind::InvalidState, self.tag, "chunk data shorter than declared"));
        }
        self.inner.write_all(&self.crc.sum().to_be_bytes())?;
        self.open = false;
        Ok(())
    }

    /// Whole chunk in one call
    pub fn write_chunk(&mut self, tag: ChunkTag, data: &[u8]) -> Result<(), Error> {
        log::trace!("writing {} ({} bytes)", tag, data.len());
        self.begin(tag, data.len())?;
        self.write_data(data)?;
        self.end()
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// A complete chunk borrowed from an in-memory PNG
#[derive(Copy, Clone)]
pub struct ChunkRef<'a> {
    data: &'a [u8],
}

impl<'a> ChunkRef<'a> {
    /// `data` starts at the chunk's length field and may continue past the chunk
    pub fn new(data: &'a [u8]) -> Result<Self, Error> {
        if data.len() < 12 {
            return Err(Error::new(ErrorKind::UnexpectedEof));
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let tag = ChunkTag([data[4], data[5], data[6], data[7]]);
        if len > MAX_CHUNK_LEN {
            return Err(Error::chunk(ErrorKind::ChunkTooLong, tag, "PNG unsigned integer out of range"));
        }
        let total = len as usize + 12;
        if data.len() < total {
            return Err(Error::chunk(ErrorKind::UnexpectedEof, tag, "chunk extends past the end of data"));
        }
        Ok(Self { data: &data[..total] })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - 12
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn tag(&self) -> ChunkTag {
        ChunkTag([self.data[4], self.data[5], self.data[6], self.data[7]])
    }

    /// Chunk contents without length, type or CRC
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        &self.data[8..self.data.len() - 4]
    }

    /// The CRC stored in the file
    pub fn crc(&self) -> u32 {
        let c = &self.data[self.data.len() - 4..];
        u32::from_be_bytes([c[0], c[1], c[2], c[3]])
    }

    pub fn check_crc(&self) -> bool {
        chunk_crc(self.tag(), self.data()) == self.crc()
    }

    /// Whole record including length and CRC
    #[inline]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }
}

impl fmt::Debug for ChunkRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ChunkRef").field("tag", &self.tag()).field("len", &self.len()).finish()
    }
}
