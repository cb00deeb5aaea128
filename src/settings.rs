use crate::filter::{FilterSet, FilterType, FilterWeights};

/// Size of the compressed-data scratch buffer, and so the largest IDAT the encoder emits
pub const ZBUF_SIZE: usize = 8192;

/// What to do when a chunk's stored CRC doesn't match its contents
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CrcAction {
    /// Fatal for critical chunks, warn and discard for ancillary ones
    #[default]
    Default,
    /// Always fatal
    ErrorQuit,
    /// Warn, then use the data
    WarnUse,
    /// Use the data without saying anything
    QuietUse,
    /// Warn, then drop the chunk. Not allowed for critical chunks (behaves like `ErrorQuit`).
    WarnDiscard,
}

#[derive(Clone, Debug)]
pub struct DecoderSettings {
    /// CRC policy for IHDR, IDAT, IEND and PLTE of palette images
    pub crc_critical: CrcAction,
    /// CRC policy for everything else
    pub crc_ancillary: CrcAction,
    /// Parse tEXt and keep zTXt/iTXt. If false, text chunks are skipped.
    pub read_text_chunks: bool,
    /// Keep unknown ancillary chunks in the metadata store instead of skipping them
    pub remember_unknown_chunks: bool,
    /// Treat misplaced and duplicated ancillary chunks as fatal
    pub strict_ordering: bool,
    /// How many compressed bytes are fed to the inflater at a time
    pub idat_buffer_size: usize,
    /// Number of signature bytes the caller has consumed already
    pub signature_bytes_read: u8,
}

impl DecoderSettings {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Policies for critical and ancillary chunks
    pub fn set_crc_action(&mut self, critical: CrcAction, ancillary: CrcAction) {
        if critical == CrcAction::WarnDiscard {
            log::warn!("Can't discard critical data on CRC error");
        }
        self.crc_critical = critical;
        self.crc_ancillary = ancillary;
    }
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            crc_critical: CrcAction::Default,
            crc_ancillary: CrcAction::Default,
            read_text_chunks: true,
            remember_unknown_chunks: false,
            strict_ordering: false,
            idat_buffer_size: ZBUF_SIZE,
            signature_bytes_read: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CompressSettings {
    level: u8,
    /// Base-2 log of the LZ77 window. Only honoured by zlib backends.
    pub window_bits: u8,
}

impl CompressSettings {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 0 (none) to 9 (best)
    pub fn set_level(&mut self, level: u8) {
        self.level = level.min(9);
    }

    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }
}

impl Default for CompressSettings {
    fn default() -> Self {
        Self {
            level: 6,
            window_bits: 15,
        }
    }
}

/// How the encoder picks the filter type of each scanline
#[derive(Clone, Debug, PartialEq)]
pub enum FilterStrategy {
    /// Every scanline uses filter 0
    Zero,
    /// Every scanline uses the same filter, no scoring
    Fixed(FilterType),
    /// Lowest sum of absolute differences among the enabled filters
    MinSum(FilterSet),
    /// Minimum sum scaled by how often each filter won recently and by its cost
    Weighted(FilterSet, FilterWeights),
    /// Filter type for each scanline, in the order they're written.
    /// Values past the end repeat the last one.
    Predefined(Box<[u8]>),
}

impl Default for FilterStrategy {
    fn default() -> Self {
        Self::MinSum(FilterSet::ALL)
    }
}

#[derive(Clone, Debug)]
pub struct EncoderSettings {
    /// Settings for the zlib compressor
    pub zlibsettings: CompressSettings,
    /// Use filter 0 for palette and sub-byte images, regardless of `filter_strategy`.
    pub filter_palette_zero: bool,
    /// Which filter type to use for each scanline
    pub filter_strategy: FilterStrategy,
    /// Size of the compressed-data buffer, emitted as one IDAT whenever it fills up
    pub idat_buffer_size: usize,
}

impl EncoderSettings {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_filter_strategy(&mut self, filter_strategy: FilterStrategy, filter_palette_zero: bool) {
        self.filter_strategy = filter_strategy;
        self.filter_palette_zero = filter_palette_zero;
    }

    pub fn set_level(&mut self, level: u8) {
        self.zlibsettings.set_level(level);
    }
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            zlibsettings: CompressSettings::default(),
            filter_palette_zero: true,
            filter_strategy: FilterStrategy::default(),
            idat_buffer_size: ZBUF_SIZE,
        }
    }
}
