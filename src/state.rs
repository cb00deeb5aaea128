//! Which structural chunks have been seen, and whether the next one is allowed.

use crate::chunk::ChunkTag;
use crate::error::{Error, ErrorKind, Warnings};
use crate::header::{ColorType, ImageHeader};
use crate::metadata::ChunkSet;
use std::fmt;
use std::ops;

/// Bit flags that are only ever set during a session
#[derive(Copy, Clone, PartialEq, Eq, Default, Hash)]
pub struct Mode(u16);

impl Mode {
    pub const HAVE_IHDR: Self = Self(0x01);
    pub const HAVE_PLTE: Self = Self(0x02);
    pub const HAVE_IDAT: Self = Self(0x04);
    /// The compressed image data is complete
    pub const AFTER_IDAT: Self = Self(0x08);
    pub const HAVE_IEND: Self = Self(0x10);
    pub const HAVE_CHUNK_HEADER: Self = Self(0x100);
    /// Encoder wrote everything that goes before PLTE
    pub const WROTE_INFO_BEFORE_PLTE: Self = Self(0x400);
    pub const HAVE_SIGNATURE: Self = Self(0x1000);
    /// Some other chunk followed the IDAT run
    pub const HAVE_CHUNK_AFTER_IDAT: Self = Self(0x2000);

    const NAMES: [(Self, &'static str); 9] = [
        (Self::HAVE_IHDR, "HAVE_IHDR"),
        (Self::HAVE_PLTE, "HAVE_PLTE"),
        (Self::HAVE_IDAT, "HAVE_IDAT"),
        (Self::AFTER_IDAT, "AFTER_IDAT"),
        (Self::HAVE_IEND, "HAVE_IEND"),
        (Self::HAVE_CHUNK_HEADER, "HAVE_CHUNK_HEADER"),
        (Self::WROTE_INFO_BEFORE_PLTE, "WROTE_INFO_BEFORE_PLTE"),
        (Self::HAVE_SIGNATURE, "HAVE_SIGNATURE"),
        (Self::HAVE_CHUNK_AFTER_IDAT, "HAVE_CHUNK_AFTER_IDAT"),
    ];

    #[inline]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl ops::BitOr for Mode {
    type Output = Self;
    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut list = f.debug_set();
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                list.entry(&format_args!("{}", name));
            }
        }
        list.finish()
    }
}

/// Where a known ancillary chunk may appear
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Before PLTE and IDAT
    BeforePlte,
    /// After PLTE (if any), before IDAT
    AfterPlte,
    /// Before IDAT, either side of PLTE
    BeforeIdat,
    /// Anywhere after IHDR
    Anywhere,
}

impl Placement {
    /// Ordering rule of a known ancillary chunk, `None` for chunks this decoder doesn't know
    pub fn of(tag: ChunkTag) -> Option<Self> {
        Some(match &tag.0 {
            b"gAMA" | b"cHRM" | b"sRGB" | b"iCCP" | b"sBIT" => Self::BeforePlte,
            b"tRNS" | b"bKGD" | b"hIST" => Self::AfterPlte,
            b"pHYs" | b"oFFs" | b"pCAL" | b"sCAL" | b"sPLT" => Self::BeforeIdat,
            b"tEXt" | b"zTXt" | b"iTXt" | b"tIME" => Self::Anywhere,
            _ => return None,
        })
    }
}

/// Only the text chunks and suggested palettes may repeat
pub fn is_unique(tag: ChunkTag) -> bool {
    !matches!(&tag.0, b"tEXt" | b"zTXt" | b"iTXt" | b"sPLT")
}

/// Whether a chunk needs PLTE to have been seen first
fn needs_plte(tag: ChunkTag, color_type: ColorType) -> bool {
    match &tag.0 {
        b"hIST" => true,
        b"tRNS" | b"bKGD" => color_type == ColorType::PALETTE,
        _ => false,
    }
}

/// Outcome of an ordering check for a chunk that isn't fatal
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Pass the data on
    Accept,
    /// Read and CRC-check the data, then drop it
    Skip,
}

/// Session-long record of the structural chunks seen or written
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    mode: Mode,
    strict: bool,
}

impl StreamState {
    pub fn new(strict: bool) -> Self {
        Self { mode: Mode::default(), strict }
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[inline]
    pub fn has(&self, flag: Mode) -> bool {
        self.mode.contains(flag)
    }

    #[inline]
    pub fn set(&mut self, flag: Mode) {
        self.mode = self.mode | flag;
    }

    pub fn check_ihdr(&mut self, len: u32) -> Result<(), Error> {
        if self.has(Mode::HAVE_IHDR) {
            return Err(Error::chunk(ErrorKind::ChunkOrder, ChunkTag::IHDR, "Out of place IHDR"));
        }
        if len != 13 {
            return Err(Error::chunk(ErrorKind::InvalidHeader, ChunkTag::IHDR, "Invalid IHDR chunk"));
        }
        self.set(Mode::HAVE_IHDR);
        Ok(())
    }

    /// A PLTE after pixel data or a second PLTE are fatal. Malformed palettes are
    /// only fatal for palette images, other color types treat PLTE as a hint.
    pub(crate) fn check_plte(&mut self, header: Option<&ImageHeader>, len: u32, warnings: &mut Warnings) -> Result<Dispatch, Error> {
        let header = match header {
            Some(h) if self.has(Mode::HAVE_IHDR) => h,
            _ => return Err(Error::chunk(ErrorKind::ChunkOrder, ChunkTag::PLTE, "Missing IHDR before PLTE")),
        };
        if self.has(Mode::HAVE_IDAT) {
            return Err(Error::chunk(ErrorKind::ChunkOrder, ChunkTag::PLTE, "Invalid PLTE after IDAT"));
        }
        if self.has(Mode::HAVE_PLTE) {
            return Err(Error::chunk(ErrorKind::ChunkOrder, ChunkTag::PLTE, "Duplicate PLTE chunk"));
        }
        self.set(Mode::HAVE_PLTE);

        if header.color_type.is_grey() {
            warnings.push(Some(ChunkTag::PLTE), "Ignoring PLTE chunk in grayscale PNG");
            return Ok(Dispatch::Skip);
        }
        if len == 0 || len > 3 * 256 || len % 3 != 0 {
            if header.color_type.is_palette() {
                return Err(Error::chunk(ErrorKind::InvalidPalette, ChunkTag::PLTE, "Invalid palette chunk"));
            }
            warnings.push(Some(ChunkTag::PLTE), "Invalid palette chunk");
            return Ok(Dispatch::Skip);
        }
        Ok(Dispatch::Accept)
    }

    /// First IDAT of the image
    pub fn check_idat(&mut self, header: Option<&ImageHeader>) -> Result<(), Error> {
        let header = match header {
            Some(h) if self.has(Mode::HAVE_IHDR) => h,
            _ => return Err(Error::chunk(ErrorKind::ChunkOrder, ChunkTag::IDAT, "Missing IHDR before IDAT")),
        };
        if header.color_type.is_palette() && !self.has(Mode::HAVE_PLTE) {
            return Err(Error::chunk(ErrorKind::ChunkOrder, ChunkTag::IDAT, "Missing PLTE before IDAT"));
        }
        self.set(Mode::HAVE_IDAT);
        Ok(())
    }

    /// IDAT found after the pixel data has been decoded. Only empty ones directly
    /// following the run are tolerated.
    pub fn check_trailing_idat(&mut self, len: u32) -> Result<(), Error> {
        if len > 0 || self.has(Mode::HAVE_CHUNK_AFTER_IDAT) {
            return Err(Error::chunk(ErrorKind::ChunkOrder, ChunkTag::IDAT, "Too many IDATs found"));
        }
        Ok(())
    }

    pub(crate) fn check_iend(&mut self, len: u32, warnings: &mut Warnings) -> Result<(), Error> {
        if !self.has(Mode::HAVE_IHDR) || !self.has(Mode::HAVE_IDAT) {
            return Err(Error::chunk(ErrorKind::ChunkOrder, ChunkTag::IEND, "No image in file"));
        }
        self.set(Mode::AFTER_IDAT | Mode::HAVE_IEND);
        if len != 0 {
            warnings.push(Some(ChunkTag::IEND), "Incorrect IEND chunk length");
        }
        Ok(())
    }

    /// Ordering and duplicate rules for ancillary chunks. `present` lists the
    /// known chunks already stored.
    pub(crate) fn check_ancillary(&mut self, tag: ChunkTag, header: Option<&ImageHeader>, present: ChunkSet, warnings: &mut Warnings) -> Result<Dispatch, Error> {
        let header = match header {
            Some(h) if self.has(Mode::HAVE_IHDR) => h,
            _ => return Err(Error::chunk(ErrorKind::ChunkOrder, tag, format!("Missing IHDR before {}", tag))),
        };
        let placement = match Placement::of(tag) {
            Some(p) => p,
            None => {
                if self.has(Mode::HAVE_IDAT) {
                    self.set(Mode::AFTER_IDAT);
                }
                return Ok(Dispatch::Accept);
            },
        };

        if placement == Placement::Anywhere {
            if self.has(Mode::HAVE_IDAT) {
                self.set(Mode::AFTER_IDAT);
            }
        } else if self.has(Mode::HAVE_IDAT) {
            return self.misplaced(tag, format!("Invalid {} after IDAT", tag), warnings);
        } else if needs_plte(tag, header.color_type) && !self.has(Mode::HAVE_PLTE) {
            return self.misplaced(tag, format!("Missing PLTE before {}", tag), warnings);
        } else if placement == Placement::BeforePlte && self.has(Mode::HAVE_PLTE) {
            // can cope with it, the data is kept
            if self.strict {
                return Err(Error::chunk(ErrorKind::ChunkOrder, tag, format!("Out of place {} chunk", tag)));
            }
            warnings.push(Some(tag), format!("Out of place {} chunk", tag));
        }

        if is_unique(tag) && present.contains(tag) {
            return self.misplaced(tag, format!("Duplicate {} chunk", tag), warnings);
        }
        Ok(Dispatch::Accept)
    }

    fn misplaced(&self, tag: ChunkTag, message: String, warnings: &mut Warnings) -> Result<Dispatch, Error> {
        if self.strict {
            return Err(Error::chunk(ErrorKind::ChunkOrder, tag, message));
        }
        warnings.push(Some(tag), message);
        Ok(Dispatch::Skip)
    }

    /// Unknown critical chunks can't be skipped, in any state
    #[cold]
    pub fn unknown_critical(tag: ChunkTag) -> Error {
        debug_assert!(tag.is_critical());
        Error::chunk(ErrorKind::UnknownCriticalChunk, tag, "unknown critical chunk")
    }
}
