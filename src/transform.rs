//! Per-row pixel rewriting.
//!
//! The decoder runs the pipeline on each defiltered row before it's placed in the
//! caller's buffer, and the encoder runs it on each caller row before filtering.
//! Stages may change the pixel format, so each one reports what it produces.

use crate::error::{Error, ErrorKind};
use crate::header::{ColorType, ImageHeader};
use std::fmt;

/// Format of the pixels in one row
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RowInfo {
    /// Pixels in the row
    pub width: u32,
    pub color_type: ColorType,
    /// Bits per channel
    pub bit_depth: u8,
    pub channels: u8,
    /// Bits per pixel
    pub pixel_depth: u8,
    /// Bytes of packed pixels
    pub rowbytes: usize,
    /// Sub-byte pixels are packed starting at the least significant bit
    pub packswapped: bool,
}

impl RowInfo {
    pub fn new(width: u32, color_type: ColorType, bit_depth: u8) -> Self {
        Self::with_channels(width, color_type, color_type.channels(), bit_depth)
    }

    /// For stages that add or drop channels without a matching color type (filler bytes)
    pub fn with_channels(width: u32, color_type: ColorType, channels: u8, bit_depth: u8) -> Self {
        let pixel_depth = channels.saturating_mul(bit_depth);
        Self {
            width,
            color_type,
            bit_depth,
            channels,
            pixel_depth,
            rowbytes: crate::header::rowbytes(pixel_depth, width).unwrap_or(usize::MAX),
            packswapped: false,
        }
    }

    /// Full-width rows of the image as stored in the file
    pub fn from_header(header: &ImageHeader) -> Self {
        Self::new(header.width, header.color_type, header.bit_depth)
    }

    /// Same pixel format, different number of pixels
    #[must_use]
    pub fn with_width(&self, width: u32) -> Self {
        let mut info = Self::with_channels(width, self.color_type, self.channels, self.bit_depth);
        info.packswapped = self.packswapped;
        info
    }

    /// Same pixel layout, ignoring width
    pub fn same_format(&self, other: &Self) -> bool {
        self.color_type == other.color_type
            && self.bit_depth == other.bit_depth
            && self.channels == other.channels
            && self.packswapped == other.packswapped
    }
}

/// One stage of a [`TransformPipeline`]
pub trait RowTransform {
    /// Format of the rows this stage outputs for rows in `input` format
    fn output_info(&self, input: &RowInfo) -> RowInfo;

    /// Rewrites `row`, which holds `input.rowbytes` bytes. Afterwards it must be
    /// `self.output_info(input).rowbytes` long.
    fn transform(&self, row: &mut Vec<u8>, input: &RowInfo) -> Result<(), Error>;
}

/// Ordered list of row stages. Empty by default, which leaves rows untouched.
#[derive(Default)]
pub struct TransformPipeline {
    stages: Vec<Box<dyn RowTransform>>,
}

impl TransformPipeline {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage; stages run in the order they were added
    pub fn push<T: RowTransform + 'static>(&mut self, stage: T) -> &mut Self {
        self.stages.push(Box::new(stage));
        self
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Format that comes out of the last stage
    pub fn output_info(&self, input: &RowInfo) -> RowInfo {
        self.stages.iter().fold(*input, |info, stage| stage.output_info(&info))
    }

    /// Runs all stages over `row` and returns its final format
    pub fn run(&self, row: &mut Vec<u8>, input: &RowInfo) -> Result<RowInfo, Error> {
        let mut info = *input;
        for stage in &self.stages {
            let out = stage.output_info(&info);
            stage.transform(row, &info)?;
            if row.len() != out.rowbytes {
                return Err(Error::msg(ErrorKind::InvalidState, "row transform produced a row of the wrong length"));
            }
            info = out;
        }
        Ok(info)
    }
}

impl fmt::Debug for TransformPipeline {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TransformPipeline({} stages)", self.stages.len())
    }
}

/// Reverses the order of the `8 / depth` fields of each byte
const fn swap_table(depth: u32) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mask = (1u32 << depth) - 1;
    let per_byte = 8 / depth;
    let mut i = 0;
    while i < 256 {
        let mut out = 0u32;
        let mut k = 0;
        while k < per_byte {
            let field = (i as u32 >> (k * depth)) & mask;
            out |= field << (8 - depth - k * depth);
            k += 1;
        }
        table[i] = out as u8;
        i += 1;
    }
    table
}

static ONEBPP_SWAP: [u8; 256] = swap_table(1);
static TWOBPP_SWAP: [u8; 256] = swap_table(2);
static FOURBPP_SWAP: [u8; 256] = swap_table(4);

/// Switches packing of 1, 2 and 4 bit pixels between msb-first (PNG) and lsb-first.
/// Rows of 8 and 16 bit pixels pass unchanged.
#[derive(Debug, Copy, Clone, Default)]
pub struct PackSwap;

impl RowTransform for PackSwap {
    fn output_info(&self, input: &RowInfo) -> RowInfo {
        let mut out = *input;
        if input.bit_depth < 8 {
            out.packswapped = !input.packswapped;
        }
        out
    }

    fn transform(&self, row: &mut Vec<u8>, input: &RowInfo) -> Result<(), Error> {
        let table = match input.bit_depth {
            1 => &ONEBPP_SWAP,
            2 => &TWOBPP_SWAP,
            4 => &FOURBPP_SWAP,
            _ => return Ok(()),
        };
        for b in row.iter_mut() {
            *b = table[*b as usize];
        }
        Ok(())
    }
}

/// Inverts grey samples (black becomes white). Alpha is left alone, and other
/// color types pass unchanged.
#[derive(Debug, Copy, Clone, Default)]
pub struct Invert;

impl RowTransform for Invert {
    #[inline]
    fn output_info(&self, input: &RowInfo) -> RowInfo {
        *input
    }

    fn transform(&self, row: &mut Vec<u8>, input: &RowInfo) -> Result<(), Error> {
        match (input.color_type, input.bit_depth) {
            (ColorType::GREY, _) => row.iter_mut().for_each(|b| *b = !*b),
            (ColorType::GREY_ALPHA, 8) => row.chunks_exact_mut(2).for_each(|px| px[0] = !px[0]),
            (ColorType::GREY_ALPHA, 16) => row.chunks_exact_mut(4).for_each(|px| {
                px[0] = !px[0];
                px[1] = !px[1];
            }),
            _ => {},
        }
        Ok(())
    }
}

/// Swaps the two bytes of 16-bit samples, for little-endian sample access
#[derive(Debug, Copy, Clone, Default)]
pub struct Swap16;

impl RowTransform for Swap16 {
    #[inline]
    fn output_info(&self, input: &RowInfo) -> RowInfo {
        *input
    }

    fn transform(&self, row: &mut Vec<u8>, input: &RowInfo) -> Result<(), Error> {
        if input.bit_depth == 16 {
            row.chunks_exact_mut(2).for_each(|s| s.swap(0, 1));
        }
        Ok(())
    }
}
