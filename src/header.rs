use crate::error::{Error, ErrorKind};
use crate::chunk::ChunkTag;

/// Type for `decode`, `encode`, etc. Same as standard PNG color types.
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColorType {
    /// greyscale: 1, 2, 4, 8, 16 bit
    GREY = 0,
    /// RGB: 8, 16 bit
    RGB = 2,
    /// palette: 1, 2, 4, 8 bit
    PALETTE = 3,
    /// greyscale with alpha: 8, 16 bit
    GREY_ALPHA = 4,
    /// RGB with alpha: 8, 16 bit
    RGBA = 6,
}

impl ColorType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::GREY,
            2 => Self::RGB,
            3 => Self::PALETTE,
            4 => Self::GREY_ALPHA,
            6 => Self::RGBA,
            _ => return None,
        })
    }

    /// Samples per pixel
    #[inline]
    pub fn channels(self) -> u8 {
        match self {
            Self::GREY | Self::PALETTE => 1,
            Self::GREY_ALPHA => 2,
            Self::RGB => 3,
            Self::RGBA => 4,
        }
    }

    /// Bits per pixel for the given bit depth
    #[inline]
    pub fn bpp(self, bitdepth: u8) -> u8 {
        self.channels() * bitdepth
    }

    #[inline]
    pub fn is_palette(self) -> bool {
        self == Self::PALETTE
    }

    #[inline]
    pub fn is_grey(self) -> bool {
        matches!(self, Self::GREY | Self::GREY_ALPHA)
    }

    #[inline]
    pub fn has_alpha(self) -> bool {
        matches!(self, Self::GREY_ALPHA | Self::RGBA)
    }

    /// Whether the PNG format allows this bit depth
    pub fn is_valid_depth(self, bitdepth: u8) -> bool {
        match self {
            Self::GREY => matches!(bitdepth, 1 | 2 | 4 | 8 | 16),
            Self::PALETTE => matches!(bitdepth, 1 | 2 | 4 | 8),
            Self::RGB | Self::GREY_ALPHA | Self::RGBA => matches!(bitdepth, 8 | 16),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Interlace {
    #[default]
    None = 0,
    Adam7 = 1,
}

/// Largest width or height a PNG can declare
pub const MAX_DIMENSION: u32 = 0x7fff_ffff;

/// Contents of the IHDR chunk
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: ColorType,
    pub interlace: Interlace,
}

impl ImageHeader {
    pub fn new(width: u32, height: u32, color_type: ColorType, bit_depth: u8) -> Self {
        Self {
            width,
            height,
            bit_depth,
            color_type,
            interlace: Interlace::None,
        }
    }

    /// Parses the 13 bytes of IHDR data
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.len() != 13 {
            return Err(Error::chunk(ErrorKind::InvalidHeader, ChunkTag::IHDR, "Invalid IHDR chunk"));
        }
        let width = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let height = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let bit_depth = data[8];
        let color_type = ColorType::from_u8(data[9])
            .ok_or_else(|| Error::chunk(ErrorKind::InvalidHeader, ChunkTag::IHDR, "Invalid color type in IHDR"))?;
        if data[10] != 0 {
            return Err(Error::chunk(ErrorKind::InvalidHeader, ChunkTag::IHDR, "Unknown compression method in IHDR"));
        }
        if data[11] != 0 {
            return Err(Error::chunk(ErrorKind::InvalidHeader, ChunkTag::IHDR, "Unknown filter method in IHDR"));
        }
        let interlace = match data[12] {
            0 => Interlace::None,
            1 => Interlace::Adam7,
            _ => return Err(Error::chunk(ErrorKind::InvalidHeader, ChunkTag::IHDR, "Unknown interlace method in IHDR")),
        };
        let header = Self { width, height, bit_depth, color_type, interlace };
        header.validate()?;
        Ok(header)
    }

    /// Serializes for the IHDR chunk
    pub fn to_bytes(&self) -> [u8; 13] {
        let mut out = [0u8; 13];
        out[0..4].copy_from_slice(&self.width.to_be_bytes());
        out[4..8].copy_from_slice(&self.height.to_be_bytes());
        out[8] = self.bit_depth;
        out[9] = self.color_type as u8;
        // compression and filter method are always 0
        out[12] = self.interlace as u8;
        out
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::chunk(ErrorKind::InvalidHeader, ChunkTag::IHDR, "Image width or height is zero in IHDR"));
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(Error::chunk(ErrorKind::InvalidHeader, ChunkTag::IHDR, "Invalid image size in IHDR"));
        }
        if !self.color_type.is_valid_depth(self.bit_depth) {
            return Err(Error::chunk(ErrorKind::InvalidHeader, ChunkTag::IHDR, "Invalid color type/bit depth combination in IHDR"));
        }
        Ok(())
    }

    #[inline]
    pub fn channels(&self) -> u8 {
        self.color_type.channels()
    }

    /// Bits per pixel
    #[inline]
    pub fn pixel_depth(&self) -> u8 {
        self.color_type.bpp(self.bit_depth)
    }

    /// Filter byte offset, at least 1
    #[inline]
    pub fn bytes_per_pixel(&self) -> usize {
        bytes_per_pixel(self.pixel_depth())
    }

    /// Bytes of one full-width row, without the filter byte
    pub fn rowbytes(&self) -> Result<usize, Error> {
        rowbytes(self.pixel_depth(), self.width)
    }

    /// Bytes of the whole image as packed rows
    pub fn image_bytes(&self) -> Result<usize, Error> {
        self.rowbytes()?.checked_mul(self.height as usize).ok_or(Error::new(ErrorKind::TooLarge))
    }

    #[inline]
    pub fn is_interlaced(&self) -> bool {
        self.interlace == Interlace::Adam7
    }
}

#[inline]
pub fn bytes_per_pixel(pixel_depth: u8) -> usize {
    ((pixel_depth as usize) + 7) >> 3
}

/// Bytes needed for `width` pixels of `pixel_depth` bits, rounded up to whole bytes
pub fn rowbytes(pixel_depth: u8, width: u32) -> Result<usize, Error> {
    let bits = (width as u64) * u64::from(pixel_depth);
    usize::try_from((bits + 7) >> 3).map_err(|_| Error::new(ErrorKind::TooLarge))
}

#[test]
fn header_bytes() {
    let mut h = ImageHeader::new(300, 2, ColorType::RGBA, 16);
    h.interlace = Interlace::Adam7;
    let bytes = h.to_bytes();
    assert_eq!(&[0, 0, 1, 44, 0, 0, 0, 2, 16, 6, 0, 0, 1], &bytes);
    assert_eq!(h, ImageHeader::from_bytes(&bytes).unwrap());
    assert_eq!(64, h.pixel_depth());
    assert_eq!(8, h.bytes_per_pixel());
    assert_eq!(2400, h.rowbytes().unwrap());
}

#[test]
fn header_rejects() {
    let good = ImageHeader::new(1, 1, ColorType::PALETTE, 8).to_bytes();
    ImageHeader::from_bytes(&good).unwrap();
    assert!(ImageHeader::from_bytes(&good[..12]).is_err());

    let mut bad = good;
    bad[8] = 16;
    assert_eq!(ErrorKind::InvalidHeader, ImageHeader::from_bytes(&bad).unwrap_err().kind());
    let mut bad = good;
    bad[3] = 0;
    assert!(ImageHeader::from_bytes(&bad).is_err());
    let mut bad = good;
    bad[0] = 0x80;
    assert!(ImageHeader::from_bytes(&bad).is_err());
    let mut bad = good;
    bad[9] = 1;
    assert!(ImageHeader::from_bytes(&bad).is_err());
    for i in 10..13 {
        let mut bad = good;
        bad[i] = 2;
        assert!(ImageHeader::from_bytes(&bad).is_err(), "{}", i);
    }
}

#[test]
fn sub_byte_rows() {
    assert_eq!(1, rowbytes(1, 8).unwrap());
    assert_eq!(2, rowbytes(1, 9).unwrap());
    assert_eq!(3, rowbytes(4, 5).unwrap());
    assert_eq!(1, bytes_per_pixel(2));
    assert_eq!(6, bytes_per_pixel(48));
}
