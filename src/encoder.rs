use crate::adam7;
use crate::chunk::{ChunkTag, ChunkWriter};
use crate::error::{Error, ErrorKind, Warning, Warnings};
use crate::filter::FilterSelector;
use crate::header::ImageHeader;
use crate::metadata::{sanitize_keyword, ChunkPosition, Info, MetadataStore};
use crate::settings::EncoderSettings;
use crate::state::{Mode, StreamState};
use crate::transform::{RowInfo, TransformPipeline};
use crate::zlib::Deflater;
use fallible_collections::FallibleVec;
use std::io::Write;

/// Writes a PNG to a byte stream, row by row.
///
/// Call [`write_info`](Self::write_info), then [`write_row`](Self::write_row)
/// or [`write_image`](Self::write_image), then [`write_end`](Self::write_end)
/// or [`finish`](Self::finish). Any error ends the session.
pub struct Encoder<W, M = Info> {
    writer: ChunkWriter<W>,
    header: ImageHeader,
    settings: EncoderSettings,
    metadata: M,
    state: StreamState,
    warnings: Warnings,
    transforms: TransformPipeline,
    input_info: RowInfo,
    deflater: Deflater,
    selector: FilterSelector,
    /// `write_row` calls so far
    calls: u64,
    /// Previous filtered-from row of the pass
    prev: Vec<u8>,
    filtered: Vec<u8>,
    row: Vec<u8>,
    pass_row: Vec<u8>,
}

impl<W: Write> Encoder<W, Info> {
    pub fn new(writer: W, header: ImageHeader) -> Result<Self, Error> {
        Self::with_settings(writer, header, EncoderSettings::default())
    }

    pub fn with_settings(writer: W, header: ImageHeader, settings: EncoderSettings) -> Result<Self, Error> {
        Self::with_metadata(writer, header, settings, Info::new())
    }
}

impl<W: Write, M: MetadataStore> Encoder<W, M> {
    /// Ancillary chunks are taken from `metadata`
    pub fn with_metadata(writer: W, header: ImageHeader, settings: EncoderSettings, metadata: M) -> Result<Self, Error> {
        header.validate()?;
        let force_zero = settings.filter_palette_zero && (header.color_type.is_palette() || header.bit_depth < 8);
        let selector = FilterSelector::new(&settings.filter_strategy, force_zero)?;
        let mut prev = Vec::new();
        prev.try_resize(header.rowbytes()?, 0u8)?;
        Ok(Self {
            writer: ChunkWriter::new(writer),
            input_info: RowInfo::from_header(&header),
            deflater: Deflater::new(&settings.zlibsettings, settings.idat_buffer_size),
            selector,
            header,
            settings,
            metadata,
            state: StreamState::default(),
            warnings: Warnings::default(),
            transforms: TransformPipeline::new(),
            calls: 0,
            prev,
            filtered: Vec::new(),
            row: Vec::new(),
            pass_row: Vec::new(),
        })
    }

    #[inline]
    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    #[inline]
    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    #[inline]
    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    /// Chunks to be written. Changes after `write_info` only affect chunks
    /// that go after the image data.
    #[inline]
    pub fn metadata_mut(&mut self) -> &mut M {
        &mut self.metadata
    }

    /// Rows passed to `write_row` are in `input` format, and `pipeline` turns them
    /// into the image's format. Must be called before the first row.
    pub fn set_transforms(&mut self, pipeline: TransformPipeline, input: RowInfo) -> Result<(), Error> {
        if self.calls > 0 {
            return Err(Error::msg(ErrorKind::InvalidState, "transforms can't change after rows were written"));
        }
        let out = pipeline.output_info(&input);
        let expected = RowInfo::from_header(&self.header);
        if input.width != self.header.width || out.width != expected.width || !out.same_format(&expected) {
            return Err(Error::msg(ErrorKind::InvalidArgument, "transforms must produce rows in the image's format"));
        }
        self.transforms = pipeline;
        self.input_info = input;
        Ok(())
    }

    /// Format `write_row` expects
    #[inline]
    pub fn input_info(&self) -> &RowInfo {
        &self.input_info
    }

    /// `write_row` has to be called this many times for every row
    pub fn number_of_passes(&self) -> u8 {
        if self.header.is_interlaced() { 7 } else { 1 }
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.state.mode()
    }

    #[inline]
    pub fn warnings(&self) -> &[Warning] {
        self.warnings.as_slice()
    }

    /// Writes the signature and the chunks that go before the image data
    pub fn write_info(&mut self) -> Result<(), Error> {
        if self.state.has(Mode::HAVE_SIGNATURE) {
            return Err(Error::msg(ErrorKind::InvalidState, "write_info called twice"));
        }
        self.writer.write_signature()?;
        self.state.set(Mode::HAVE_SIGNATURE);
        self.writer.write_chunk(ChunkTag::IHDR, &self.header.to_bytes())?;
        self.state.set(Mode::HAVE_IHDR);

        self.write_planned(ChunkPosition::IHDR)?;
        self.state.set(Mode::WROTE_INFO_BEFORE_PLTE);

        self.write_plte()?;
        self.write_planned(ChunkPosition::PLTE)?;
        self.write_texts()?;
        Ok(())
    }

    fn write_plte(&mut self) -> Result<(), Error> {
        let palette = self.metadata.get(ChunkTag::PLTE).filter(|p| !p.is_empty());
        let color_type = self.header.color_type;
        let palette = match palette {
            Some(_) if color_type.is_grey() => {
                self.warnings.push(Some(ChunkTag::PLTE), "Ignoring request to write a PLTE chunk in grayscale PNG");
                return Ok(());
            },
            Some(p) => p,
            None if color_type.is_palette() => {
                return Err(Error::chunk(ErrorKind::InvalidPalette, ChunkTag::PLTE, "Valid palette required for paletted images"));
            },
            None => return Ok(()),
        };
        let entries = palette.len() / 3;
        let max = if color_type.is_palette() { 1usize << self.header.bit_depth } else { 256 };
        if palette.len() % 3 != 0 || entries > max {
            if color_type.is_palette() {
                return Err(Error::chunk(ErrorKind::InvalidPalette, ChunkTag::PLTE, "Invalid number of colors in palette"));
            }
            self.warnings.push(Some(ChunkTag::PLTE), "Invalid number of colors in palette");
            return Ok(());
        }
        self.writer.write_chunk(ChunkTag::PLTE, palette)?;
        self.state.set(Mode::HAVE_PLTE);
        Ok(())
    }

    fn write_planned(&mut self, position: ChunkPosition) -> Result<(), Error> {
        for (tag, index) in self.metadata.planned(position) {
            if let Some(data) = self.metadata.get_nth(tag, index) {
                self.writer.write_chunk(tag, data)?;
            }
        }
        Ok(())
    }

    fn write_texts(&mut self) -> Result<(), Error> {
        for text in self.metadata.texts() {
            let key = match sanitize_keyword(&text.key, &mut self.warnings) {
                Some(key) => key,
                None => {
                    self.warnings.push(Some(ChunkTag::tEXt), "Empty keyword in tEXt chunk");
                    continue;
                },
            };
            self.writer.begin(ChunkTag::tEXt, key.len() + 1 + text.value.len())?;
            self.writer.write_data(&key)?;
            self.writer.write_data(&[0])?;
            self.writer.write_data(&text.value)?;
            self.writer.end()?;
        }
        Ok(())
    }

    fn total_calls(&self) -> u64 {
        u64::from(self.header.height) * u64::from(self.number_of_passes())
    }

    /// Takes the next row, in the format of [`input_info`](Self::input_info).
    ///
    /// For interlaced images every row is passed once per pass, 7 times in total.
    /// Each time only the pixels that belong to the current pass are used.
    pub fn write_row(&mut self, row: &[u8]) -> Result<(), Error> {
        if !self.state.has(Mode::HAVE_IHDR) {
            return Err(Error::msg(ErrorKind::InvalidState, "write_info has to be called first"));
        }
        if self.calls >= self.total_calls() {
            return Err(Error::msg(ErrorKind::InvalidState, "all rows have been written"));
        }
        let len = self.input_info.rowbytes;
        if row.len() < len {
            return Err(Error::msg(ErrorKind::InvalidArgument, "row buffer too small"));
        }
        self.state.set(Mode::HAVE_IDAT);

        let height = u64::from(self.header.height);
        let pass = (self.calls / height) as usize;
        let y = (self.calls % height) as u32;
        if y == 0 {
            self.prev.iter_mut().for_each(|b| *b = 0);
        }

        let wanted = !self.header.is_interlaced()
            || (adam7::pass_width(pass, self.header.width) > 0 && adam7::row_in_pass(pass, y));
        if wanted {
            self.row.clear();
            self.row.try_extend_from_slice(&row[..len])?;
            self.transforms.run(&mut self.row, &self.input_info)?;
            if self.header.is_interlaced() {
                adam7::extract_pass_row(&self.row, pass, self.header.width, self.header.pixel_depth(), &mut self.pass_row)?;
                std::mem::swap(&mut self.row, &mut self.pass_row);
            }
            self.compress_row()?;
        }

        self.calls += 1;
        if self.calls == self.total_calls() {
            let writer = &mut self.writer;
            self.deflater.finish(&mut |data: &[u8]| writer.write_chunk(ChunkTag::IDAT, data))?;
            self.state.set(Mode::AFTER_IDAT);
        }
        Ok(())
    }

    /// Filters `self.row` and feeds it to the compressor
    fn compress_row(&mut self) -> Result<(), Error> {
        let len = self.row.len();
        self.selector.filter_row(&self.row, &self.prev[..len], self.header.bytes_per_pixel(), &mut self.filtered);
        self.prev[..len].copy_from_slice(&self.row);
        let writer = &mut self.writer;
        self.deflater.write_row(&self.filtered, &mut |data: &[u8]| writer.write_chunk(ChunkTag::IDAT, data))
    }

    /// Writes all rows. `pixels` holds `input_info().rowbytes * height` bytes, rows
    /// one after another.
    pub fn write_image(&mut self, pixels: &[u8]) -> Result<(), Error> {
        let stride = self.input_info.rowbytes;
        let needed = stride.checked_mul(self.header.height as usize).ok_or(Error::new(ErrorKind::TooLarge))?;
        if pixels.len() < needed {
            return Err(Error::msg(ErrorKind::InvalidArgument, "image buffer too small"));
        }
        for _ in 0..self.number_of_passes() {
            for row in pixels[..needed].chunks_exact(stride) {
                self.write_row(row)?;
            }
        }
        Ok(())
    }

    /// Writes the chunks that go after the image data, and IEND
    pub fn write_end(&mut self) -> Result<(), Error> {
        if self.state.has(Mode::HAVE_IEND) {
            return Err(Error::msg(ErrorKind::InvalidState, "write_end called twice"));
        }
        if self.calls < self.total_calls() {
            return Err(Error::msg(ErrorKind::InvalidState, "not all rows were written"));
        }
        self.write_planned(ChunkPosition::IDAT)?;
        self.writer.write_chunk(ChunkTag::IEND, &[])?;
        self.state.set(Mode::HAVE_IEND);
        self.writer.flush()
    }

    /// Ends the file if needed and gives back the stream
    pub fn finish(mut self) -> Result<W, Error> {
        if !self.state.has(Mode::HAVE_IEND) {
            self.write_end()?;
        }
        Ok(self.writer.into_inner())
    }
}
