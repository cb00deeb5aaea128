use crate::chunk::ChunkTag;
use crate::error::{Error, ErrorKind};
use crate::settings::CompressSettings;
use flate2::{Compress, CompressError, Compression, Decompress, DecompressError, FlushCompress, FlushDecompress, Status};

/// Compressed bytes of a run of consecutive IDAT chunks
pub(crate) trait IdatSource {
    /// Reads up to `buf.len()` bytes of image data, continuing into the next
    /// IDAT when the current one is used up. Fails rather than returning 0.
    fn read_idat(&mut self, buf: &mut [u8]) -> Result<usize, Error>;

    /// Bytes of the current IDAT not read yet
    fn idat_remaining(&self) -> u32;
}

#[cold]
fn inflate_error(err: DecompressError) -> Error {
    match err.message() {
        Some(msg) => Error::chunk(ErrorKind::Decompress, ChunkTag::IDAT, msg.to_owned()),
        None => Error::chunk(ErrorKind::Decompress, ChunkTag::IDAT, "Decompression error"),
    }
}

#[cold]
fn deflate_error(err: CompressError) -> Error {
    match err.message() {
        Some(msg) => Error::chunk(ErrorKind::Compress, ChunkTag::IDAT, msg.to_owned()),
        None => Error::chunk(ErrorKind::Compress, ChunkTag::IDAT, "zlib error"),
    }
}

/// Pulls scanlines out of the zlib stream spread over IDAT chunks
pub(crate) struct Inflater {
    z: Decompress,
    zbuf: Vec<u8>,
    start: usize,
    end: usize,
    finished: bool,
}

impl Inflater {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            z: Decompress::new(true),
            zbuf: vec![0; buffer_size.max(1)],
            start: 0,
            end: 0,
            finished: false,
        }
    }

    #[inline]
    fn refill(&mut self, src: &mut impl IdatSource) -> Result<(), Error> {
        let n = src.read_idat(&mut self.zbuf)?;
        if n == 0 {
            return Err(Error::chunk(ErrorKind::NotEnoughImageData, ChunkTag::IDAT, "Not enough image data"));
        }
        self.start = 0;
        self.end = n;
        Ok(())
    }

    /// Fills `out` completely with the next filtered scanline, filter byte included
    pub fn read_row(&mut self, src: &mut impl IdatSource, out: &mut [u8]) -> Result<(), Error> {
        if self.finished {
            return Err(Error::chunk(ErrorKind::ExtraCompressedData, ChunkTag::IDAT, "Extra compressed data"));
        }
        let mut filled = 0;
        while filled < out.len() {
            let in_before = self.z.total_in();
            let out_before = self.z.total_out();
            let status = self.z.decompress(&self.zbuf[self.start..self.end], &mut out[filled..], FlushDecompress::None)
                .map_err(inflate_error)?;
            let consumed = (self.z.total_in() - in_before) as usize;
            let produced = (self.z.total_out() - out_before) as usize;
            self.start += consumed;
            filled += produced;

            if status == Status::StreamEnd {
                self.finished = true;
                // the stream has to end exactly with the last scanline and the last IDAT byte
                if filled < out.len() || self.start != self.end || src.idat_remaining() != 0 {
                    return Err(Error::chunk(ErrorKind::ExtraCompressedData, ChunkTag::IDAT, "Extra compressed data"));
                }
                break;
            }
            // output held back by the inflater comes out before more input is needed
            if consumed == 0 && produced == 0 {
                if self.start != self.end {
                    return Err(Error::chunk(ErrorKind::Decompress, ChunkTag::IDAT, "Decompression error"));
                }
                self.refill(src)?;
            }
        }
        Ok(())
    }

    /// Called after the last scanline. Drives the stream to its end and resets
    /// for the next image. Returns `true` if data was left over.
    pub fn finish(&mut self, src: &mut impl IdatSource) -> Result<bool, Error> {
        let mut extra = false;
        if !self.finished {
            let mut one = [0u8; 1];
            // buffered input may already hold the end of the stream
            loop {
                let in_before = self.z.total_in();
                let out_before = self.z.total_out();
                let status = self.z.decompress(&self.zbuf[self.start..self.end], &mut one, FlushDecompress::Sync)
                    .map_err(inflate_error)?;
                let consumed = (self.z.total_in() - in_before) as usize;
                let produced = (self.z.total_out() - out_before) as usize;
                self.start += consumed;

                if produced > 0 {
                    extra = true;
                    break;
                }
                if status == Status::StreamEnd {
                    break;
                }
                if self.start == self.end {
                    self.refill(src)?;
                } else if consumed == 0 {
                    return Err(Error::chunk(ErrorKind::Decompress, ChunkTag::IDAT, "Decompression error"));
                }
            }
        }
        let extra = extra || self.start != self.end || src.idat_remaining() != 0;
        self.reset();
        Ok(extra)
    }

    pub fn reset(&mut self) {
        self.z.reset(true);
        self.start = 0;
        self.end = 0;
        self.finished = false;
    }
}

/// Compresses scanlines, handing out full buffers of zlib data as they fill
pub(crate) struct Deflater {
    z: Compress,
    zbuf: Vec<u8>,
    len: usize,
}

impl Deflater {
    pub fn new(settings: &CompressSettings, buffer_size: usize) -> Self {
        let level = settings.level();
        let level = if level == 0 {
            Compression::none()
        } else {
            Compression::new(level.min(9).into())
        };
        #[cfg(not(feature = "cfzlib"))]
        let z = {
            if settings.window_bits != 15 {
                log::debug!("window_bits {} needs a zlib backend, using 15", settings.window_bits);
            }
            Compress::new(level, true)
        };
        #[cfg(feature = "cfzlib")]
        let z = Compress::new_with_window_bits(level, true, settings.window_bits.clamp(9, 15));
        Self {
            z,
            zbuf: vec![0; buffer_size.max(1)],
            len: 0,
        }
    }

    /// Feeds one filtered scanline
    pub fn write_row(&mut self, row: &[u8], sink: &mut impl FnMut(&[u8]) -> Result<(), Error>) -> Result<(), Error> {
        self.run(row, FlushCompress::None, sink)
    }

    /// Ends the stream, hands out what's left and resets for the next image
    pub fn finish(&mut self, sink: &mut impl FnMut(&[u8]) -> Result<(), Error>) -> Result<(), Error> {
        self.run(&[], FlushCompress::Finish, sink)?;
        if self.len > 0 {
            sink(&self.zbuf[..self.len])?;
            self.len = 0;
        }
        self.z.reset();
        Ok(())
    }

    fn run(&mut self, mut input: &[u8], flush: FlushCompress, sink: &mut impl FnMut(&[u8]) -> Result<(), Error>) -> Result<(), Error> {
        loop {
            let in_before = self.z.total_in();
            let out_before = self.z.total_out();
            let status = self.z.compress(input, &mut self.zbuf[self.len..], flush).map_err(deflate_error)?;
            let consumed = (self.z.total_in() - in_before) as usize;
            let produced = (self.z.total_out() - out_before) as usize;
            input = &input[consumed..];
            self.len += produced;

            let full = self.len == self.zbuf.len();
            if full {
                sink(&self.zbuf)?;
                self.len = 0;
            }
            if flush == FlushCompress::Finish {
                if status == Status::StreamEnd {
                    return Ok(());
                }
            } else if input.is_empty() && !full {
                return Ok(());
            }
            if consumed == 0 && produced == 0 && !full {
                return Err(Error::chunk(ErrorKind::Compress, ChunkTag::IDAT, "zlib error"));
            }
        }
    }
}
