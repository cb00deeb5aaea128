use crate::chunk::ChunkTag;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::io;

/// What went wrong, without the details.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The stream doesn't start with the PNG signature
    Signature,
    /// Chunk type bytes outside `A-Za-z`
    InvalidChunkType,
    /// Chunk length above 2^31-1
    ChunkTooLong,
    /// Stored CRC doesn't match the chunk contents
    Crc,
    /// IHDR with bad dimensions, depth/color combination or methods
    InvalidHeader,
    /// A structural chunk appeared where it's not allowed
    ChunkOrder,
    /// Critical chunk this decoder doesn't know
    UnknownCriticalChunk,
    /// Palette is malformed or missing
    InvalidPalette,
    /// IDAT run ended before all scanlines were decoded
    NotEnoughImageData,
    /// Compressed stream ended with data left over
    ExtraCompressedData,
    /// INFLATE reported a corrupt stream
    Decompress,
    /// DEFLATE failed
    Compress,
    /// Text keyword is empty after cleanup
    InvalidKeyword,
    /// Caller passed buffers or settings that don't fit the image
    InvalidArgument,
    /// Method called at the wrong point of the session
    InvalidState,
    /// Image dimensions overflow addressable memory
    TooLarge,
    /// Allocation failed
    OutOfMemory,
    /// Transport ended early
    UnexpectedEof,
    /// Any other transport error
    Io(io::ErrorKind),
}

impl ErrorKind {
    /// Returns an English description of the error kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signature => "not a PNG file",
            Self::InvalidChunkType => "invalid chunk type",
            Self::ChunkTooLong => "chunk length exceeds 2^31-1",
            Self::Crc => "CRC error",
            Self::InvalidHeader => "invalid IHDR chunk",
            Self::ChunkOrder => "chunk out of order",
            Self::UnknownCriticalChunk => "unknown critical chunk",
            Self::InvalidPalette => "invalid palette",
            Self::NotEnoughImageData => "not enough image data",
            Self::ExtraCompressedData => "extra compressed data",
            Self::Decompress => "decompression error",
            Self::Compress => "compression error",
            Self::InvalidKeyword => "invalid text keyword",
            Self::InvalidArgument => "invalid argument",
            Self::InvalidState => "operation not valid at this point of the stream",
            Self::TooLarge => "image too large",
            Self::OutOfMemory => "out of memory",
            Self::UnexpectedEof => "unexpected end of file",
            Self::Io(_) => "I/O error",
        }
    }
}

/// Fatal condition that ends a read or write session.
///
/// When the error relates to a particular chunk, its tag is kept and printed
/// in front of the message, e.g. `IHDR: invalid IHDR chunk`.
#[derive(Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    chunk: Option<ChunkTag>,
    message: Option<Cow<'static, str>>,
}

impl Error {
    #[cold]
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, chunk: None, message: None }
    }

    #[cold]
    pub(crate) fn chunk(kind: ErrorKind, tag: ChunkTag, message: impl Into<Cow<'static, str>>) -> Self {
        Self { kind, chunk: Some(tag), message: Some(message.into()) }
    }

    #[cold]
    pub(crate) fn msg(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self { kind, chunk: None, message: Some(message.into()) }
    }

    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Tag of the chunk being processed when the error happened
    #[inline]
    pub fn chunk_tag(&self) -> Option<ChunkTag> {
        self.chunk
    }

    /// Returns an English description of the error.
    pub fn as_str(&self) -> &str {
        self.message.as_deref().unwrap_or_else(|| self.kind.as_str())
    }
}

impl From<ErrorKind> for Error {
    #[cold]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Debug for Error {
    #[cold]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({:?})", self, self.kind)
    }
}

impl fmt::Display for Error {
    #[cold]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(tag) = self.chunk {
            write!(f, "{}: ", tag)?;
        }
        f.write_str(self.as_str())
    }
}

impl error::Error for Error {}

#[doc(hidden)]
impl From<io::Error> for Error {
    #[cold]
    fn from(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::new(ErrorKind::UnexpectedEof),
            kind => Error::msg(ErrorKind::Io(kind), err.to_string()),
        }
    }
}

impl From<fallible_collections::TryReserveError> for Error {
    #[cold]
    fn from(_: fallible_collections::TryReserveError) -> Error {
        Error::new(ErrorKind::OutOfMemory)
    }
}

impl From<std::collections::TryReserveError> for Error {
    #[cold]
    fn from(_: std::collections::TryReserveError) -> Error {
        Error::new(ErrorKind::OutOfMemory)
    }
}

/// Non-fatal problem that was corrected and reading or writing went on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub chunk: Option<ChunkTag>,
    pub message: Cow<'static, str>,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(tag) = self.chunk {
            write!(f, "{}: ", tag)?;
        }
        f.write_str(&self.message)
    }
}

/// Warnings kept per session. Anything after that is dropped.
pub const MAX_WARNINGS: usize = 64;

/// Collects warnings of a session and forwards them to the `log` facade
#[derive(Debug, Default)]
pub(crate) struct Warnings {
    list: Vec<Warning>,
}

impl Warnings {
    #[cold]
    pub fn push(&mut self, chunk: Option<ChunkTag>, message: impl Into<Cow<'static, str>>) {
        if self.list.len() > MAX_WARNINGS {
            return;
        }
        let w = if self.list.len() == MAX_WARNINGS {
            Warning { chunk: None, message: "Too many warnings, ignoring the rest".into() }
        } else {
            Warning { chunk, message: message.into() }
        };
        log::warn!("{}", w);
        self.list.push(w);
    }

    #[inline]
    pub fn as_slice(&self) -> &[Warning] {
        &self.list
    }
}

#[test]
fn display_names_chunk() {
    let e = Error::chunk(ErrorKind::Crc, ChunkTag(*b"IDAT"), "CRC error");
    assert_eq!("IDAT: CRC error", e.to_string());
    let e = Error::chunk(ErrorKind::InvalidChunkType, ChunkTag([b'a', 0, b'B', 0xfe]), "invalid chunk type");
    assert_eq!("a[00]B[FE]: invalid chunk type", e.to_string());
    assert_eq!("not a PNG file", Error::new(ErrorKind::Signature).to_string());
}

#[test]
fn warnings_are_capped() {
    let mut w = Warnings::default();
    for _ in 0..10_000 {
        w.push(Some(ChunkTag(*b"quIT")), "Skipping unknown chunk");
    }
    assert_eq!(MAX_WARNINGS + 1, w.as_slice().len());
    assert_eq!("Skipping unknown chunk", w.as_slice()[MAX_WARNINGS - 1].message);
    assert_eq!(None, w.as_slice()[MAX_WARNINGS].chunk);
    assert_eq!("Too many warnings, ignoring the rest", w.as_slice()[MAX_WARNINGS].message);
}

#[test]
fn io_errors() {
    let e: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
    assert_eq!(ErrorKind::UnexpectedEof, e.kind());
    let e: Error = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
    assert_eq!(ErrorKind::Io(io::ErrorKind::PermissionDenied), e.kind());
}
