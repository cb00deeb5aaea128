use crate::adam7;
use crate::chunk::{crc_verdict, ChunkClass, ChunkReader, ChunkTag, CrcVerdict};
use crate::error::{Error, ErrorKind, Warning, Warnings};
use crate::filter::defilter_row;
use crate::header::{rowbytes, ImageHeader};
use crate::metadata::{ChunkPosition, Info, MetadataStore, KNOWN_CHUNKS};
use crate::settings::DecoderSettings;
use crate::state::{Dispatch, Mode, StreamState};
use crate::transform::{RowInfo, TransformPipeline};
use crate::zlib::{IdatSource, Inflater};
use fallible_collections::FallibleVec;
use std::io::Read;

/// How rows of an interlaced image are merged into full-width rows by [`Decoder::read_row`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Combine {
    /// Only the pixels of the current pass are written, the rest of the row is left as it was
    #[default]
    Sparse,
    /// Every pixel is painted as a block over the pixels later passes will fill in,
    /// for progressive display
    Rectangle,
}

/// Row of one interlace pass, from [`Decoder::next_row`]
#[derive(Debug)]
pub struct PassRow<'a> {
    /// 0-6, or 0 for images that aren't interlaced
    pub pass: u8,
    /// Row number within the pass
    pub y: u32,
    /// Format of `data`, after the transform pipeline
    pub info: RowInfo,
    pub data: &'a [u8],
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
enum RowMode {
    #[default]
    Idle,
    Combined,
    Raw,
}

/// Buffers and position of the scanline loop
#[derive(Debug, Default)]
struct Rows {
    mode: RowMode,
    /// Current pass, 0 for non-interlaced images
    pass: usize,
    /// Image row for `read_row`, pass row for `next_row`
    y: u32,
    /// Rows decoded so far in the current pass
    pass_rows: u32,
    finished: bool,
    /// Filter byte and filtered bytes, as inflated
    filtered: Vec<u8>,
    /// Previous reconstructed row of the pass
    prev: Vec<u8>,
    /// Last row after defiltering and transforms
    row: Vec<u8>,
    row_info: Option<RowInfo>,
    /// `row` widened to image columns for combining
    expanded: Vec<u8>,
}

/// Reads a PNG from a byte stream, chunk by chunk and row by row.
///
/// Call [`read_info`](Self::read_info) first, then read the pixels with
/// [`read_row`](Self::read_row), [`read_image`](Self::read_image) or
/// [`next_row`](Self::next_row), and finish with [`read_end`](Self::read_end).
/// Any error ends the session.
pub struct Decoder<R, M = Info> {
    reader: ChunkReader<R>,
    settings: DecoderSettings,
    state: StreamState,
    warnings: Warnings,
    header: Option<ImageHeader>,
    metadata: M,
    transforms: TransformPipeline,
    inflater: Inflater,
    position: ChunkPosition,
    rows: Rows,
}

impl<R: Read> Decoder<R, Info> {
    pub fn new(reader: R) -> Self {
        Self::with_settings(reader, DecoderSettings::default())
    }

    pub fn with_settings(reader: R, settings: DecoderSettings) -> Self {
        Self::with_metadata(reader, settings, Info::new())
    }
}

impl<R: Read, M: MetadataStore> Decoder<R, M> {
    /// Ancillary chunks are handed to `metadata`
    pub fn with_metadata(reader: R, settings: DecoderSettings, metadata: M) -> Self {
        Self {
            reader: ChunkReader::new(reader),
            state: StreamState::new(settings.strict_ordering),
            inflater: Inflater::new(settings.idat_buffer_size),
            settings,
            warnings: Warnings::default(),
            header: None,
            metadata,
            transforms: TransformPipeline::new(),
            position: ChunkPosition::IHDR,
            rows: Rows::default(),
        }
    }

    /// Reads the signature and all chunks up to the first IDAT
    pub fn read_info(&mut self) -> Result<&ImageHeader, Error> {
        if self.state.has(Mode::HAVE_SIGNATURE) {
            return Err(Error::msg(ErrorKind::InvalidState, "read_info called twice"));
        }
        self.reader.read_signature(self.settings.signature_bytes_read.into())?;
        self.state.set(Mode::HAVE_SIGNATURE);

        loop {
            let (tag, len) = self.reader.read_header()?;
            log::debug!("{} ({} bytes)", tag, len);
            match tag {
                ChunkTag::IHDR => {
                    self.state.check_ihdr(len)?;
                    let data = self.reader.read_to_vec()?;
                    self.finish_chunk(ChunkClass::Critical)?;
                    let header = ImageHeader::from_bytes(&data)?;
                    log::debug!("{}x{} {:?} {}-bit {:?}", header.width, header.height, header.color_type, header.bit_depth, header.interlace);
                    self.header = Some(header);
                },
                ChunkTag::PLTE => self.handle_plte(len)?,
                ChunkTag::IDAT => {
                    self.state.check_idat(self.header.as_ref())?;
                    self.position = ChunkPosition::IDAT;
                    self.start_rows()?;
                    break;
                },
                ChunkTag::IEND => {
                    self.state.check_iend(len, &mut self.warnings)?;
                },
                _ if tag.is_critical() => return Err(StreamState::unknown_critical(tag)),
                _ => self.handle_ancillary(tag)?,
            }
        }
        self.header.as_ref().ok_or_else(|| Error::new(ErrorKind::InvalidState))
    }

    fn handle_plte(&mut self, len: u32) -> Result<(), Error> {
        let dispatch = self.state.check_plte(self.header.as_ref(), len, &mut self.warnings)?;
        // a palette is only a suggestion for truecolor images
        let class = match self.header {
            Some(h) if h.color_type.is_palette() => ChunkClass::Critical,
            _ => ChunkClass::Ancillary,
        };
        let data = if dispatch == Dispatch::Accept { self.reader.read_to_vec()? } else { Vec::new() };
        if self.finish_chunk(class)? && dispatch == Dispatch::Accept {
            self.metadata.set(ChunkTag::PLTE, self.position, &data)?;
        }
        self.position = ChunkPosition::PLTE;
        Ok(())
    }

    fn handle_ancillary(&mut self, tag: ChunkTag) -> Result<(), Error> {
        let dispatch = self.state.check_ancillary(tag, self.header.as_ref(), self.metadata.present(), &mut self.warnings)?;
        let wanted = match tag {
            ChunkTag::tEXt | ChunkTag::zTXt | ChunkTag::iTXt => self.settings.read_text_chunks,
            _ if KNOWN_CHUNKS.contains(&tag) => true,
            _ => {
                if !self.settings.remember_unknown_chunks {
                    self.warnings.push(Some(tag), "Skipping unknown chunk");
                }
                self.settings.remember_unknown_chunks
            },
        };
        let keep = wanted && dispatch == Dispatch::Accept;
        let data = if keep { self.reader.read_to_vec()? } else { Vec::new() };
        if !self.finish_chunk(ChunkClass::Ancillary)? || !keep {
            return Ok(());
        }
        if let Err(e) = self.metadata.set(tag, self.position, &data) {
            if e.kind() == ErrorKind::OutOfMemory {
                return Err(e);
            }
            // bad contents of an optional chunk only lose that chunk
            self.warnings.push(Some(tag), e.as_str().to_owned());
        }
        Ok(())
    }

    /// Reads the rest of the chunk and its CRC. Returns whether the data can be used.
    fn finish_chunk(&mut self, class: ChunkClass) -> Result<bool, Error> {
        finish_chunk(&mut self.reader, &self.settings, &mut self.warnings, class)
    }

    fn start_rows(&mut self) -> Result<(), Error> {
        let header = self.header.ok_or_else(|| Error::new(ErrorKind::InvalidState))?;
        let full = header.rowbytes()?;
        let rows = &mut self.rows;
        rows.prev.clear();
        rows.prev.try_resize(full, 0u8)?;
        rows.filtered.clear();
        rows.filtered.try_reserve(full + 1)?;
        rows.pass = 0;
        rows.y = 0;
        rows.pass_rows = 0;
        rows.finished = false;
        Ok(())
    }

    #[inline]
    pub fn header(&self) -> Option<&ImageHeader> {
        self.header.as_ref()
    }

    #[inline]
    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    /// Stages applied to every row. Must be set up before the first row is read.
    #[inline]
    pub fn transforms_mut(&mut self) -> &mut TransformPipeline {
        &mut self.transforms
    }

    /// Format of full-width rows written by [`read_row`](Self::read_row)
    pub fn output_info(&self) -> Result<RowInfo, Error> {
        let header = self.header.as_ref().ok_or_else(|| Error::msg(ErrorKind::InvalidState, "IHDR not read yet"))?;
        Ok(self.transforms.output_info(&RowInfo::from_header(header)))
    }

    /// How many times [`read_row`](Self::read_row) has to be called for each
    /// image row: 7 for interlaced images, otherwise 1
    pub fn number_of_passes(&self) -> u8 {
        match self.header {
            Some(h) if h.is_interlaced() => 7,
            _ => 1,
        }
    }

    /// Chunks seen so far
    #[inline]
    pub fn mode(&self) -> Mode {
        self.state.mode()
    }

    /// Problems that were corrected along the way
    #[inline]
    pub fn warnings(&self) -> &[Warning] {
        self.warnings.as_slice()
    }

    fn begin_rows(&mut self, mode: RowMode) -> Result<(), Error> {
        if !self.state.has(Mode::HAVE_IDAT) || self.state.has(Mode::AFTER_IDAT) {
            return Err(Error::msg(ErrorKind::InvalidState, "rows can only be read between read_info and read_end"));
        }
        if self.rows.mode == RowMode::Idle {
            self.rows.mode = mode;
        } else if self.rows.mode != mode {
            return Err(Error::msg(ErrorKind::InvalidState, "next_row and read_row can't be mixed"));
        }
        Ok(())
    }

    /// Pixels per row and rows of `pass`
    fn pass_size(header: &ImageHeader, pass: usize) -> (u32, u32) {
        if header.is_interlaced() {
            (adam7::pass_width(pass, header.width), adam7::pass_height(pass, header.height))
        } else {
            (header.width, header.height)
        }
    }

    fn next_pass(&mut self) {
        let passes = usize::from(self.number_of_passes());
        let rows = &mut self.rows;
        rows.pass += 1;
        rows.y = 0;
        rows.pass_rows = 0;
        rows.prev.iter_mut().for_each(|b| *b = 0);
        if rows.pass >= passes {
            rows.finished = true;
        }
    }

    /// Inflates, defilters and transforms the next row of `pass`
    fn decode_row(&mut self, header: &ImageHeader, pass: usize) -> Result<(), Error> {
        let (width, _) = Self::pass_size(header, pass);
        let len = rowbytes(header.pixel_depth(), width)?;
        let rows = &mut self.rows;
        rows.filtered.try_resize(len + 1, 0u8)?;
        {
            let mut src = IdatReader {
                reader: &mut self.reader,
                settings: &self.settings,
                warnings: &mut self.warnings,
            };
            self.inflater.read_row(&mut src, &mut rows.filtered)?;
        }
        defilter_row(&mut rows.filtered, &rows.prev[..len], header.bytes_per_pixel(), &mut self.warnings);
        rows.prev[..len].copy_from_slice(&rows.filtered[1..]);

        rows.row.clear();
        rows.row.try_extend_from_slice(&rows.filtered[1..])?;
        let info = RowInfo::from_header(header).with_width(width);
        let info = self.transforms.run(&mut rows.row, &info)?;
        rows.row_info = Some(info);
        rows.pass_rows += 1;

        if header.is_interlaced() {
            adam7::expand_row(&rows.row, pass, width, info.pixel_depth, info.packswapped, &mut rows.expanded)?;
        }
        Ok(())
    }

    /// Returns the next row of the next non-empty pass, as stored in the file.
    /// `None` once all rows were read.
    pub fn next_row(&mut self) -> Result<Option<PassRow<'_>>, Error> {
        self.begin_rows(RowMode::Raw)?;
        let header = self.header.ok_or_else(|| Error::new(ErrorKind::InvalidState))?;
        let pass = loop {
            if self.rows.finished {
                return Ok(None);
            }
            let (w, h) = Self::pass_size(&header, self.rows.pass);
            if w > 0 && self.rows.y < h {
                break self.rows.pass;
            }
            self.next_pass();
        };
        let y = self.rows.y;
        self.decode_row(&header, pass)?;
        self.rows.y += 1;
        let info = self.rows.row_info.ok_or_else(|| Error::new(ErrorKind::InvalidState))?;
        Ok(Some(PassRow {
            pass: pass as u8,
            y,
            info,
            data: &self.rows.row,
        }))
    }

    /// Reads the next full-width row into `out`, which has to hold
    /// `output_info().rowbytes` bytes.
    ///
    /// For interlaced images call this [`number_of_passes`](Self::number_of_passes)
    /// times for every row, pass after pass. Each call merges the pixels of the
    /// current pass into `out`, so give it the same row buffer every pass.
    pub fn read_row(&mut self, out: &mut [u8], combine: Combine) -> Result<(), Error> {
        self.begin_rows(RowMode::Combined)?;
        if self.rows.finished {
            return Err(Error::msg(ErrorKind::InvalidState, "all rows have been read"));
        }
        let needed = self.output_info()?.rowbytes;
        if out.len() < needed {
            return Err(Error::msg(ErrorKind::InvalidArgument, "row buffer too small"));
        }
        self.combined_step(Some(&mut out[..needed]), combine)
    }

    fn combined_step(&mut self, out: Option<&mut [u8]>, combine: Combine) -> Result<(), Error> {
        let header = self.header.ok_or_else(|| Error::new(ErrorKind::InvalidState))?;
        let pass = self.rows.pass;
        let y = self.rows.y;

        if !header.is_interlaced() {
            self.decode_row(&header, 0)?;
            if let Some(out) = out {
                out.copy_from_slice(&self.rows.row);
            }
        } else {
            let width = adam7::pass_width(pass, header.width);
            let decoded = width > 0 && adam7::row_in_pass(pass, y);
            if decoded {
                self.decode_row(&header, pass)?;
            }
            let mask = match combine {
                Combine::Sparse if decoded => Some(adam7::PASS_MASK[pass]),
                Combine::Rectangle if decoded || (self.rows.pass_rows > 0 && adam7::block_covers_row(pass, y)) => {
                    Some(adam7::PASS_DSP_MASK[pass])
                },
                _ => None,
            };
            if let (Some(out), Some(mask), Some(info)) = (out, mask, self.rows.row_info) {
                adam7::combine_row(out, &self.rows.expanded, header.width, info.pixel_depth, mask, info.packswapped)?;
            }
        }

        self.rows.y += 1;
        if self.rows.y >= header.height {
            self.next_pass();
        }
        Ok(())
    }

    /// Reads all rows into `out`, rows one after another with no padding.
    /// `out` has to hold `output_info().rowbytes * height` bytes.
    pub fn read_image(&mut self, out: &mut [u8]) -> Result<(), Error> {
        let header = self.header.ok_or_else(|| Error::msg(ErrorKind::InvalidState, "IHDR not read yet"))?;
        let stride = self.output_info()?.rowbytes;
        let needed = stride.checked_mul(header.height as usize).ok_or(Error::new(ErrorKind::TooLarge))?;
        if out.len() < needed {
            return Err(Error::msg(ErrorKind::InvalidArgument, "image buffer too small"));
        }
        for _ in 0..self.number_of_passes() {
            for row in out[..needed].chunks_exact_mut(stride) {
                self.read_row(row, Combine::Sparse)?;
            }
        }
        Ok(())
    }

    /// Decodes and throws away rows the caller didn't read
    fn drain_rows(&mut self) -> Result<(), Error> {
        let header = self.header.ok_or_else(|| Error::new(ErrorKind::InvalidState))?;
        if !self.rows.finished {
            log::debug!("skipping unread rows");
        }
        while !self.rows.finished {
            match self.rows.mode {
                RowMode::Combined => self.combined_step(None, Combine::Sparse)?,
                RowMode::Idle | RowMode::Raw => {
                    let (w, h) = Self::pass_size(&header, self.rows.pass);
                    if w > 0 && self.rows.y < h {
                        self.decode_row(&header, self.rows.pass)?;
                        self.rows.y += 1;
                    } else {
                        self.next_pass();
                    }
                },
            }
        }
        Ok(())
    }

    /// Checks the end of the image data and reads the chunks after it, up to and including IEND
    pub fn read_end(&mut self) -> Result<(), Error> {
        if !self.state.has(Mode::HAVE_IDAT) || self.state.has(Mode::AFTER_IDAT) {
            return Err(Error::msg(ErrorKind::InvalidState, "read_end needs read_info first, and only once"));
        }
        self.drain_rows()?;
        let extra = {
            let mut src = IdatReader {
                reader: &mut self.reader,
                settings: &self.settings,
                warnings: &mut self.warnings,
            };
            self.inflater.finish(&mut src)?
        };
        if extra {
            self.warnings.push(Some(ChunkTag::IDAT), "Extra compressed data");
        }
        // rest of the last IDAT
        self.finish_chunk(ChunkClass::Critical)?;
        self.state.set(Mode::AFTER_IDAT);

        loop {
            let (tag, len) = self.reader.read_header()?;
            log::debug!("{} ({} bytes)", tag, len);
            match tag {
                ChunkTag::IDAT => {
                    self.state.check_trailing_idat(len)?;
                    self.finish_chunk(ChunkClass::Critical)?;
                },
                ChunkTag::IEND => {
                    self.state.check_iend(len, &mut self.warnings)?;
                    self.finish_chunk(ChunkClass::Critical)?;
                    return Ok(());
                },
                _ => {
                    self.state.set(Mode::HAVE_CHUNK_AFTER_IDAT);
                    match tag {
                        ChunkTag::IHDR => self.state.check_ihdr(len)?,
                        ChunkTag::PLTE => self.handle_plte(len)?,
                        _ if tag.is_critical() => return Err(StreamState::unknown_critical(tag)),
                        _ => self.handle_ancillary(tag)?,
                    }
                },
            }
        }
    }

    #[inline]
    pub fn into_metadata(self) -> M {
        self.metadata
    }

    /// Gives back the stream, positioned after the last chunk read
    #[inline]
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

fn finish_chunk<R: Read>(reader: &mut ChunkReader<R>, settings: &DecoderSettings, warnings: &mut Warnings, class: ChunkClass) -> Result<bool, Error> {
    let tag = reader.tag();
    let matched = reader.finish()?;
    match crc_verdict(tag, class, matched, settings.crc_critical, settings.crc_ancillary)? {
        CrcVerdict::Use => Ok(true),
        CrcVerdict::UseWithWarning => {
            warnings.push(Some(tag), "CRC error");
            Ok(true)
        },
        CrcVerdict::Discard => {
            warnings.push(Some(tag), "CRC error");
            Ok(false)
        },
    }
}

/// Feeds the inflater from consecutive IDAT chunks
struct IdatReader<'a, R> {
    reader: &'a mut ChunkReader<R>,
    settings: &'a DecoderSettings,
    warnings: &'a mut Warnings,
}

impl<R: Read> IdatSource for IdatReader<'_, R> {
    fn read_idat(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        while self.reader.remaining() == 0 {
            finish_chunk(self.reader, self.settings, self.warnings, ChunkClass::Critical)?;
            let (tag, len) = self.reader.read_header()?;
            if tag != ChunkTag::IDAT {
                return Err(Error::chunk(ErrorKind::NotEnoughImageData, ChunkTag::IDAT, "Not enough image data"));
            }
            log::trace!("IDAT continues, {} bytes", len);
        }
        let n = buf.len().min(self.reader.remaining() as usize);
        self.reader.read_data(&mut buf[..n])?;
        Ok(n)
    }

    #[inline]
    fn idat_remaining(&self) -> u32 {
        self.reader.remaining()
    }
}
