//! Adam7 interlacing.
//!
//! Pass `p` holds the pixels at `(ADAM7_IX[p] + i * ADAM7_DX[p], ADAM7_IY[p] + j * ADAM7_DY[p])`.
//! Rows of a pass are packed and filtered like rows of a small standalone image.

use crate::header::rowbytes;
use crate::error::Error;

/// First column of each pass
pub const ADAM7_IX: [u32; 7] = [0, 4, 0, 2, 0, 1, 0];
/// First row of each pass
pub const ADAM7_IY: [u32; 7] = [0, 0, 4, 0, 2, 0, 1];
/// Column step of each pass
pub const ADAM7_DX: [u32; 7] = [8, 8, 4, 4, 2, 2, 1];
/// Row step of each pass
pub const ADAM7_DY: [u32; 7] = [8, 8, 8, 4, 4, 2, 2];

/// Columns of an 8-pixel group a pass owns, msb is the leftmost pixel
pub const PASS_MASK: [u8; 7] = [0x80, 0x08, 0x88, 0x22, 0xaa, 0x55, 0xff];
/// Columns a pass paints when each pixel is drawn as a block covering the
/// pixels of later passes
pub const PASS_DSP_MASK: [u8; 7] = [0xff, 0x0f, 0xff, 0x33, 0xff, 0x55, 0xff];
/// Rows the block of a pass pixel covers
pub const PASS_BLOCK_HEIGHT: [u32; 7] = [8, 8, 4, 4, 2, 2, 1];

/// Size of one pass of a `width` x `height` image
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PassInfo {
    pub index: u8,
    pub width: u32,
    pub height: u32,
}

impl PassInfo {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Pixels per row in `pass`
#[inline]
pub fn pass_width(pass: usize, width: u32) -> u32 {
    ((u64::from(width) + u64::from(ADAM7_DX[pass]) - 1 - u64::from(ADAM7_IX[pass])) / u64::from(ADAM7_DX[pass])) as u32
}

/// Rows in `pass`
#[inline]
pub fn pass_height(pass: usize, height: u32) -> u32 {
    ((u64::from(height) + u64::from(ADAM7_DY[pass]) - 1 - u64::from(ADAM7_IY[pass])) / u64::from(ADAM7_DY[pass])) as u32
}

/// Dimensions of all 7 passes. Passes of small images can be empty.
pub fn passes(width: u32, height: u32) -> [PassInfo; 7] {
    let mut out = [PassInfo { index: 0, width: 0, height: 0 }; 7];
    for (i, p) in out.iter_mut().enumerate() {
        *p = PassInfo {
            index: i as u8,
            width: pass_width(i, width),
            height: pass_height(i, height),
        };
    }
    out
}

/// Whether image row `y` has pixels in `pass`
#[inline]
pub fn row_in_pass(pass: usize, y: u32) -> bool {
    y >= ADAM7_IY[pass] && (y - ADAM7_IY[pass]) % ADAM7_DY[pass] == 0
}

/// Whether image row `y` is covered by the blocks of `pass` pixels
#[inline]
pub fn block_covers_row(pass: usize, y: u32) -> bool {
    y >= ADAM7_IY[pass] && (y - ADAM7_IY[pass]) % ADAM7_DY[pass] < PASS_BLOCK_HEIGHT[pass]
}

/// Position of image row `y` among the rows of `pass`
#[inline]
pub fn pass_row_index(pass: usize, y: u32) -> u32 {
    (y - ADAM7_IY[pass]) / ADAM7_DY[pass]
}

#[inline]
fn sub_byte_shift(x: usize, depth: usize, lsb_first: bool) -> usize {
    let bit = (x * depth) & 7;
    if lsb_first { bit } else { 8 - depth - bit }
}

/// Value of pixel `x` of a packed row of 1, 2 or 4 bit pixels
#[inline]
pub(crate) fn get_bits(row: &[u8], x: usize, depth: usize, lsb_first: bool) -> u8 {
    let mask = (1u8 << depth) - 1;
    (row[x * depth / 8] >> sub_byte_shift(x, depth, lsb_first)) & mask
}

#[inline]
pub(crate) fn set_bits(row: &mut [u8], x: usize, depth: usize, lsb_first: bool, value: u8) {
    let mask = (1u8 << depth) - 1;
    let shift = sub_byte_shift(x, depth, lsb_first);
    let b = &mut row[x * depth / 8];
    *b = (*b & !(mask << shift)) | ((value & mask) << shift);
}

/// Widens a row of `pass` so that each pixel is repeated `ADAM7_DX[pass]` times.
/// The result lines up with image columns, ready for [`combine_row`].
pub fn expand_row(src: &[u8], pass: usize, pass_width: u32, pixel_depth: u8, lsb_first: bool, out: &mut Vec<u8>) -> Result<(), Error> {
    let dx = ADAM7_DX[pass] as usize;
    let n = pass_width as usize;
    let len = rowbytes(pixel_depth, pass_width.saturating_mul(ADAM7_DX[pass]))?;
    out.clear();
    fallible_collections::FallibleVec::try_resize(out, len, 0u8)?;
    let depth = pixel_depth as usize;
    if depth < 8 {
        for i in 0..n {
            let v = get_bits(src, i, depth, lsb_first);
            for j in 0..dx {
                set_bits(out, i * dx + j, depth, lsb_first, v);
            }
        }
    } else {
        let bpp = depth / 8;
        for (px, dst) in src[..n * bpp].chunks_exact(bpp).zip(out.chunks_exact_mut(bpp * dx)) {
            for d in dst.chunks_exact_mut(bpp) {
                d.copy_from_slice(px);
            }
        }
    }
    Ok(())
}

/// Copies the pixels of `src` selected by `mask` into `dst`. Bit 7 of the mask
/// stands for column 0 of each 8-pixel group. Both rows are `width` pixels wide.
pub fn combine_row(dst: &mut [u8], src: &[u8], width: u32, pixel_depth: u8, mask: u8, lsb_first: bool) -> Result<(), Error> {
    let width = width as usize;
    if mask == 0xff {
        let len = rowbytes(pixel_depth, width as u32)?;
        dst[..len].copy_from_slice(&src[..len]);
        return Ok(());
    }
    let depth = pixel_depth as usize;
    if depth < 8 {
        for x in 0..width {
            if mask & (0x80 >> (x & 7)) != 0 {
                let v = get_bits(src, x, depth, lsb_first);
                set_bits(dst, x, depth, lsb_first, v);
            }
        }
    } else {
        let bpp = depth / 8;
        for x in (0..width).filter(|x| mask & (0x80 >> (x & 7)) != 0) {
            dst[x * bpp..(x + 1) * bpp].copy_from_slice(&src[x * bpp..(x + 1) * bpp]);
        }
    }
    Ok(())
}

/// Gathers the pixels of `pass` from a full-width image row
pub fn extract_pass_row(src: &[u8], pass: usize, width: u32, pixel_depth: u8, out: &mut Vec<u8>) -> Result<(), Error> {
    let n = pass_width(pass, width) as usize;
    let len = rowbytes(pixel_depth, n as u32)?;
    out.clear();
    fallible_collections::FallibleVec::try_resize(out, len, 0u8)?;
    let depth = pixel_depth as usize;
    let (ix, dx) = (ADAM7_IX[pass] as usize, ADAM7_DX[pass] as usize);
    if depth < 8 {
        for i in 0..n {
            set_bits(out, i, depth, false, get_bits(src, ix + i * dx, depth, false));
        }
    } else {
        let bpp = depth / 8;
        for (i, dst) in out.chunks_exact_mut(bpp).enumerate() {
            let x = ix + i * dx;
            dst.copy_from_slice(&src[x * bpp..(x + 1) * bpp]);
        }
    }
    Ok(())
}
