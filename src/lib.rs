//! Streaming PNG reader and writer.
//!
//! Chunks are read and written one at a time over any `Read`/`Write`, scanlines
//! go through INFLATE/DEFLATE a row at a time, and Adam7 images can be read pass
//! by pass. Ancillary chunks are kept in a [`MetadataStore`], and rows can be
//! rewritten on the way in or out by a [`TransformPipeline`].
//!
//! ```no_run
//! # fn main() -> Result<(), pngstream::Error> {
//! let image = pngstream::decode_file("in.png")?;
//! let h = image.header;
//! pngstream::encode_file("out.png", &image.buffer, h.width, h.height, h.color_type, h.bit_depth)?;
//! # Ok(()) }
//! ```
#![allow(clippy::needless_range_loop)]

pub mod adam7;
mod chunk;
mod decoder;
mod encoder;
mod error;
pub mod filter;
mod header;
mod iter;
mod metadata;
mod settings;
pub mod state;
pub mod transform;
mod zlib;

pub use crate::chunk::{chunk_crc, crc_verdict, ChunkClass, ChunkRef, ChunkTag, CrcVerdict, MAX_CHUNK_LEN, SIGNATURE};
pub use crate::decoder::{Combine, Decoder, PassRow};
pub use crate::encoder::Encoder;
pub use crate::error::{Error, ErrorKind, Warning, MAX_WARNINGS};
pub use crate::filter::{FilterSelector, FilterSet, FilterType, FilterWeights};
pub use crate::header::{bytes_per_pixel, rowbytes, ColorType, ImageHeader, Interlace, MAX_DIMENSION};
pub use crate::iter::{ChunksIter, ChunksIterFallible};
pub use crate::metadata::{ChunkPosition, ChunkSet, Info, MetadataStore, Text, KNOWN_CHUNKS, MAX_KEYWORD_LEN};
pub use crate::settings::{CompressSettings, CrcAction, DecoderSettings, EncoderSettings, FilterStrategy, ZBUF_SIZE};
pub use crate::state::{Mode, StreamState};
pub use crate::transform::{RowInfo, RowTransform, TransformPipeline};

use fallible_collections::FallibleVec;
use std::path::Path;

/// Decoded image, rows packed one after another without padding
#[derive(Debug, Clone)]
pub struct Image {
    pub header: ImageHeader,
    pub buffer: Vec<u8>,
    /// Ancillary chunks and palette
    pub info: Info,
    /// Problems that were corrected while reading
    pub warnings: Vec<Warning>,
}

impl Image {
    /// Bytes per row in `buffer`
    pub fn stride(&self) -> usize {
        rowbytes(self.header.pixel_depth(), self.header.width).unwrap_or(0)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        let stride = self.stride().max(1);
        self.buffer.chunks_exact(stride)
    }
}

/// Decodes a whole PNG held in memory, in the color type and bit depth it's stored in.
pub fn decode_memory(input: &[u8]) -> Result<Image, Error> {
    decode_with_settings(input, DecoderSettings::default())
}

pub fn decode_with_settings(input: &[u8], settings: DecoderSettings) -> Result<Image, Error> {
    let mut decoder = Decoder::with_settings(input, settings);
    let header = *decoder.read_info()?;
    let len = header.image_bytes()?;
    let mut buffer = Vec::new();
    buffer.try_resize(len, 0u8)?;
    decoder.read_image(&mut buffer)?;
    decoder.read_end()?;
    let warnings = decoder.warnings().to_vec();
    Ok(Image {
        header,
        buffer,
        info: decoder.into_metadata(),
        warnings,
    })
}

/// Loads a PNG file from disk and decodes it.
pub fn decode_file<P: AsRef<Path>>(filepath: P) -> Result<Image, Error> {
    decode_memory(&std::fs::read(filepath)?)
}

/// Encodes packed rows of `image` into a new PNG file in memory.
/// Palette images need a palette, use [`Encoder::with_metadata`] for them.
pub fn encode_memory(image: &[u8], w: u32, h: u32, colortype: ColorType, bitdepth: u8) -> Result<Vec<u8>, Error> {
    let header = ImageHeader::new(w, h, colortype, bitdepth);
    let mut encoder = Encoder::new(Vec::new(), header)?;
    encoder.write_info()?;
    encoder.write_image(image)?;
    encoder.finish()
}

/// Same as [`encode_memory`], but writes to a file
pub fn encode_file<P: AsRef<Path>>(filepath: P, image: &[u8], w: u32, h: u32, colortype: ColorType, bitdepth: u8) -> Result<(), Error> {
    let out = encode_memory(image, w, h, colortype, bitdepth)?;
    std::fs::write(filepath, out)?;
    Ok(())
}
