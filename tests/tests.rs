use pngstream::*;
use pngstream::transform::PackSwap;
use std::io::{Read, Write};

// top-level files create new executables, which is slower
mod roundtrip {
    mod roundtrip_test;
}

fn chunk(tag: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = (data.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(tag);
    out.extend_from_slice(data);
    out.extend_from_slice(&chunk_crc(ChunkTag(*tag), data).to_be_bytes());
    out
}

fn png(chunks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = SIGNATURE.to_vec();
    for c in chunks {
        out.extend_from_slice(c);
    }
    out
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut z = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    z.write_all(data).unwrap();
    z.finish().unwrap()
}

fn ihdr(w: u32, h: u32, color_type: ColorType, depth: u8) -> Vec<u8> {
    chunk(b"IHDR", &ImageHeader::new(w, h, color_type, depth).to_bytes())
}

/// 1x1 grey pixel with value 128
fn grey_idat() -> Vec<u8> {
    chunk(b"IDAT", &zlib(&[0, 128]))
}

fn iend() -> Vec<u8> {
    chunk(b"IEND", &[])
}

#[test]
fn single_grey_pixel() {
    let file = encode_memory(&[128], 1, 1, ColorType::GREY, 8).unwrap();
    assert_eq!(&SIGNATURE[..], &file[..8]);

    let chunks: Vec<_> = ChunksIter::new(&file).collect();
    let tags: Vec<_> = chunks.iter().map(|c| c.tag()).collect();
    assert_eq!(vec![ChunkTag::IHDR, ChunkTag::IDAT, ChunkTag::IEND], tags);
    assert!(chunks.iter().all(|c| c.check_crc()));
    assert_eq!(&[0, 0, 0, 1, 0, 0, 0, 1, 8, 0, 0, 0, 0], chunks[0].data());
    assert!(chunks[2].is_empty());

    let mut raw = Vec::new();
    flate2::read::ZlibDecoder::new(chunks[1].data()).read_to_end(&mut raw).unwrap();
    assert_eq!(vec![0, 0x80], raw);
}

#[test]
fn hand_made_file() {
    let file = png(&[ihdr(1, 1, ColorType::GREY, 8), grey_idat(), iend()]);
    let img = decode_memory(&file).unwrap();
    assert_eq!(vec![128], img.buffer);
    assert_eq!(1, img.header.width);
    assert!(img.warnings.is_empty());
}

#[test]
fn several_rows_in_one_idat() {
    let pixels: Vec<u8> = (0..16).collect();
    let file = encode_memory(&pixels, 4, 4, ColorType::GREY, 8).unwrap();
    assert_eq!(1, ChunksIter::new(&file).filter(|c| c.tag() == ChunkTag::IDAT).count());
    let img = decode_memory(&file).unwrap();
    assert_eq!(pixels, img.buffer);

    let mut raw = Vec::new();
    for y in 0..6u8 {
        raw.push(0);
        raw.extend((0..5).map(|x| x * 40 + y));
    }
    let file = png(&[ihdr(5, 6, ColorType::GREY, 8), chunk(b"IDAT", &zlib(&raw)), iend()]);
    let img = decode_memory(&file).unwrap();
    let expected: Vec<u8> = raw.chunks(6).flat_map(|r| r[1..].to_vec()).collect();
    assert_eq!(expected, img.buffer);
    assert!(img.warnings.is_empty());
}

#[test]
fn flood_of_unknown_chunks() {
    let mut chunks = vec![ihdr(1, 1, ColorType::GREY, 8)];
    chunks.extend((0..5000).map(|_| chunk(b"quIT", &[])));
    chunks.push(grey_idat());
    chunks.push(iend());
    let img = decode_memory(&png(&chunks)).unwrap();
    assert_eq!(vec![128], img.buffer);
    assert_eq!(MAX_WARNINGS + 1, img.warnings.len());
    assert_eq!("Skipping unknown chunk", img.warnings[0].message);
}

#[test]
fn every_chunk_crc_matches() {
    let mut info = Info::new();
    info.add_text("Title", "crc").unwrap();
    info.push_chunk(ChunkPosition::IHDR, ChunkTag::gAMA, &45455u32.to_be_bytes()).unwrap();
    info.push_chunk(ChunkPosition::IDAT, ChunkTag::tIME, &[7, 230, 1, 2, 3, 4, 5]).unwrap();
    let header = ImageHeader::new(17, 5, ColorType::RGB, 8);
    let mut enc = Encoder::with_metadata(Vec::new(), header, EncoderSettings::default(), info).unwrap();
    enc.write_info().unwrap();
    enc.write_image(&vec![33; 17 * 5 * 3]).unwrap();
    let file = enc.finish().unwrap();

    let mut count = 0;
    for c in ChunksIterFallible::new(&file) {
        let c = c.unwrap();
        assert!(c.check_crc(), "{:?}", c);
        assert_eq!(chunk_crc(c.tag(), c.data()), c.crc());
        count += 1;
    }
    assert_eq!(6, count);
}

#[test]
fn flipped_idat_crc() {
    let mut idat = grey_idat();
    let last = idat.len() - 1;
    idat[last] ^= 1;
    let file = png(&[ihdr(1, 1, ColorType::GREY, 8), idat, iend()]);
    let err = decode_memory(&file).unwrap_err();
    assert_eq!(ErrorKind::Crc, err.kind());
    assert_eq!(Some(ChunkTag::IDAT), err.chunk_tag());
}

#[test]
fn ancillary_crc_is_a_warning() {
    let mut gama = chunk(b"gAMA", &45455u32.to_be_bytes());
    let last = gama.len() - 1;
    gama[last] ^= 0x40;
    let file = png(&[ihdr(1, 1, ColorType::GREY, 8), gama, grey_idat(), iend()]);
    let img = decode_memory(&file).unwrap();
    assert_eq!(vec![128], img.buffer);
    assert!(img.info.get(ChunkTag::gAMA).is_none());
    assert!(img.warnings.iter().any(|w| w.chunk == Some(ChunkTag::gAMA)));

    let mut settings = DecoderSettings::new();
    settings.set_crc_action(CrcAction::Default, CrcAction::QuietUse);
    let img = decode_with_settings(&file, settings).unwrap();
    assert!(img.info.get(ChunkTag::gAMA).is_some());
    assert!(img.warnings.is_empty());
}

#[test]
fn critical_crc_can_be_ignored() {
    let mut idat = grey_idat();
    let last = idat.len() - 1;
    idat[last] ^= 1;
    let file = png(&[ihdr(1, 1, ColorType::GREY, 8), idat, iend()]);
    let mut settings = DecoderSettings::new();
    settings.set_crc_action(CrcAction::WarnUse, CrcAction::Default);
    let img = decode_with_settings(&file, settings).unwrap();
    assert_eq!(vec![128], img.buffer);
    assert_eq!(1, img.warnings.len());
}

#[track_caller]
fn assert_order_error(chunks: &[Vec<u8>]) {
    let err = decode_memory(&png(chunks)).unwrap_err();
    assert_eq!(ErrorKind::ChunkOrder, err.kind(), "{}", err);
}

#[test]
fn plte_after_idat() {
    assert_order_error(&[ihdr(1, 1, ColorType::RGB, 8), chunk(b"IDAT", &zlib(&[0, 1, 2, 3])), chunk(b"PLTE", &[1, 2, 3]), iend()]);
}

#[test]
fn duplicate_ihdr() {
    assert_order_error(&[ihdr(1, 1, ColorType::GREY, 8), ihdr(1, 1, ColorType::GREY, 8), grey_idat(), iend()]);
}

#[test]
fn idat_before_ihdr() {
    assert_order_error(&[grey_idat(), ihdr(1, 1, ColorType::GREY, 8), iend()]);
}

#[test]
fn palette_image_needs_plte() {
    assert_order_error(&[ihdr(1, 1, ColorType::PALETTE, 8), chunk(b"IDAT", &zlib(&[0, 0])), iend()]);
}

#[test]
fn idat_after_other_chunks() {
    let file = png(&[ihdr(1, 1, ColorType::GREY, 8), grey_idat(), chunk(b"tEXt", b"a\0b"), grey_idat(), iend()]);
    assert_eq!(ErrorKind::ChunkOrder, decode_memory(&file).unwrap_err().kind());
}

#[test]
fn unknown_critical_chunk() {
    let file = png(&[ihdr(1, 1, ColorType::GREY, 8), chunk(b"CRIT", &[1]), grey_idat(), iend()]);
    let err = decode_memory(&file).unwrap_err();
    assert_eq!(ErrorKind::UnknownCriticalChunk, err.kind());
    assert_eq!(Some(ChunkTag(*b"CRIT")), err.chunk_tag());
}

#[test]
fn bad_signature() {
    let mut file = png(&[ihdr(1, 1, ColorType::GREY, 8), grey_idat(), iend()]);
    file[1] = b'Q';
    assert_eq!(ErrorKind::Signature, decode_memory(&file).unwrap_err().kind());
}

#[test]
fn truncated_image_data() {
    let file = png(&[ihdr(1, 2, ColorType::GREY, 8), grey_idat(), iend()]);
    let err = decode_memory(&file).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NotEnoughImageData | ErrorKind::ExtraCompressedData), "{}", err);
}

#[test]
fn truncated_file() {
    let file = encode_memory(&[1, 2, 3, 4], 2, 2, ColorType::GREY, 8).unwrap();
    let err = decode_memory(&file[..file.len() - 6]).unwrap_err();
    assert_eq!(ErrorKind::UnexpectedEof, err.kind());
}

#[test]
fn signature_read_by_caller() {
    let file = encode_memory(&[9], 1, 1, ColorType::GREY, 8).unwrap();
    let mut settings = DecoderSettings::new();
    settings.signature_bytes_read = 8;
    let img = decode_with_settings(&file[8..], settings).unwrap();
    assert_eq!(vec![9], img.buffer);
}

#[test]
fn split_idat_chunks() {
    let data = zlib(&[0, 1, 2, 0, 3, 4]);
    let (a, b) = data.split_at(3);
    let file = png(&[ihdr(2, 2, ColorType::GREY, 8), chunk(b"IDAT", a), chunk(b"IDAT", &[]), chunk(b"IDAT", b), iend()]);
    let img = decode_memory(&file).unwrap();
    assert_eq!(vec![1, 2, 3, 4], img.buffer);
}

#[test]
fn trailing_empty_idat() {
    let file = png(&[ihdr(1, 1, ColorType::GREY, 8), grey_idat(), chunk(b"IDAT", &[]), iend()]);
    let mut dec = Decoder::new(&file[..]);
    dec.read_info().unwrap();
    let mut px = [0u8];
    dec.read_image(&mut px).unwrap();
    dec.read_end().unwrap();
    assert_eq!([128], px);
    assert!(dec.mode().contains(Mode::HAVE_IEND));
    assert!(dec.warnings().is_empty());
}

#[test]
fn extra_compressed_data() {
    let file = png(&[ihdr(1, 1, ColorType::GREY, 8), chunk(b"IDAT", &zlib(&[0, 128, 0, 5])), iend()]);
    let img = decode_memory(&file).unwrap();
    assert_eq!(vec![128], img.buffer);
    assert!(img.warnings.iter().any(|w| w.message == "Extra compressed data"));
}

#[test]
fn bad_filter_byte_is_repaired() {
    let file = png(&[ihdr(2, 1, ColorType::GREY, 8), chunk(b"IDAT", &zlib(&[9, 5, 6])), iend()]);
    let img = decode_memory(&file).unwrap();
    assert_eq!(vec![5, 6], img.buffer);
    assert_eq!(1, img.warnings.len());
}

#[test]
fn unread_rows_are_skipped() {
    let pixels: Vec<u8> = (0..30).collect();
    let file = encode_memory(&pixels, 3, 10, ColorType::GREY, 8).unwrap();
    let mut dec = Decoder::new(&file[..]);
    dec.read_info().unwrap();
    let mut row = [0u8; 3];
    dec.read_row(&mut row, Combine::Sparse).unwrap();
    assert_eq!([0, 1, 2], row);
    dec.read_end().unwrap();
    assert!(dec.mode().contains(Mode::AFTER_IDAT));
    assert!(dec.read_row(&mut row, Combine::Sparse).is_err());
}

#[test]
fn session_order_is_enforced() {
    let file = encode_memory(&[1], 1, 1, ColorType::GREY, 8).unwrap();
    let mut dec = Decoder::new(&file[..]);
    let mut px = [0u8];
    assert_eq!(ErrorKind::InvalidState, dec.read_row(&mut px, Combine::Sparse).unwrap_err().kind());
    dec.read_info().unwrap();
    assert_eq!(ErrorKind::InvalidState, dec.read_info().unwrap_err().kind());

    let mut enc = Encoder::new(Vec::new(), ImageHeader::new(1, 1, ColorType::GREY, 8)).unwrap();
    assert_eq!(ErrorKind::InvalidState, enc.write_row(&[1]).unwrap_err().kind());
    enc.write_info().unwrap();
    assert_eq!(ErrorKind::InvalidState, enc.write_end().unwrap_err().kind());
    enc.write_row(&[1]).unwrap();
    assert_eq!(ErrorKind::InvalidState, enc.write_row(&[1]).unwrap_err().kind());
    enc.write_end().unwrap();
}

#[test]
fn invalid_headers() {
    for (w, h, ct, depth) in [(0, 1, ColorType::GREY, 8), (1, 0, ColorType::RGB, 8), (1, 1, ColorType::RGB, 4), (1, 1, ColorType::PALETTE, 16)] {
        let err = Encoder::new(Vec::new(), ImageHeader::new(w, h, ct, depth)).err().unwrap();
        assert_eq!(ErrorKind::InvalidHeader, err.kind());
        let file = png(&[ihdr(w, h, ct, depth), grey_idat(), iend()]);
        assert_eq!(ErrorKind::InvalidHeader, decode_memory(&file).unwrap_err().kind());
    }
}

#[test]
fn text_chunks() {
    let longstr = "World 123456789_123456789_123456789_123456789_123456789_123456789_123456789_123456789_";
    let mut info = Info::new();
    info.add_text("  Hello   there ", longstr).unwrap();
    info.add_text("Comment", "second").unwrap();
    let mut enc = Encoder::with_metadata(Vec::new(), ImageHeader::new(1, 1, ColorType::GREY, 8), EncoderSettings::default(), info).unwrap();
    enc.write_info().unwrap();
    enc.write_row(&[0]).unwrap();
    assert_eq!(3, enc.warnings().len());
    let data = enc.finish().unwrap();

    assert!(data.windows(4).any(|w| w == b"tEXt"));
    let img = decode_memory(&data).unwrap();
    let texts: Vec<_> = img.info.text_keys().collect();
    assert_eq!(2, texts.len());
    assert_eq!(&b"Hello there"[..], texts[0].0);
    assert_eq!(longstr.as_bytes(), texts[0].1);
    assert_eq!((&b"Comment"[..], &b"second"[..]), texts[1]);

    let mut settings = DecoderSettings::new();
    settings.read_text_chunks = false;
    let img = decode_with_settings(&data, settings).unwrap();
    assert_eq!(0, img.info.text_keys().count());
}

#[test]
fn empty_keyword_is_dropped() {
    let mut info = Info::new();
    info.add_text("   ", "nothing").unwrap();
    let mut enc = Encoder::with_metadata(Vec::new(), ImageHeader::new(1, 1, ColorType::GREY, 8), EncoderSettings::default(), info).unwrap();
    enc.write_info().unwrap();
    assert!(enc.warnings().iter().any(|w| w.message == "Empty keyword in tEXt chunk"));
    enc.write_row(&[0]).unwrap();
    let data = enc.finish().unwrap();
    assert!(!data.windows(4).any(|w| w == b"tEXt"));
}

#[test]
fn text_before_and_after_image_data() {
    let file = png(&[
        ihdr(1, 1, ColorType::GREY, 8),
        chunk(b"tEXt", b"Title\0first"),
        grey_idat(),
        chunk(b"tEXt", b"Author\0second"),
        chunk(b"tIME", &[7, 230, 10, 19, 12, 0, 0]),
        iend(),
    ]);
    let img = decode_memory(&file).unwrap();
    let keys: Vec<_> = img.info.text_keys().map(|(k, _)| k).collect();
    assert_eq!(vec![&b"Title"[..], &b"Author"[..]], keys);
    let time: Vec<_> = img.info.chunks().filter(|c| c.0 == ChunkTag::tIME).collect();
    assert_eq!(1, time.len());
    assert_eq!(ChunkPosition::IDAT, time[0].1);
}

#[test]
fn misplaced_ancillary_chunks() {
    let gama = chunk(b"gAMA", &45455u32.to_be_bytes());
    let file = png(&[ihdr(1, 1, ColorType::GREY, 8), gama.clone(), gama.clone(), grey_idat(), gama, iend()]);
    let img = decode_memory(&file).unwrap();
    assert_eq!(1, img.info.chunks().filter(|c| c.0 == ChunkTag::gAMA).count());
    assert_eq!(2, img.warnings.len());

    let mut settings = DecoderSettings::new();
    settings.strict_ordering = true;
    let err = decode_with_settings(&file, settings).unwrap_err();
    assert_eq!(ErrorKind::ChunkOrder, err.kind());
}

#[test]
fn palette_image() {
    let palette = [rgb::RGB8::new(255, 0, 0), rgb::RGB8::new(0, 255, 0), rgb::RGB8::new(0, 0, 255)];
    let mut info = Info::new();
    info.set_palette(&palette).unwrap();
    let header = ImageHeader::new(5, 2, ColorType::PALETTE, 2);
    let pixels = [0b00_01_10_00, 0b01_000000, 0b10_10_10_10, 0b10_000000];
    let mut enc = Encoder::with_metadata(Vec::new(), header, EncoderSettings::default(), info).unwrap();
    enc.write_info().unwrap();
    enc.write_image(&pixels).unwrap();
    let file = enc.finish().unwrap();

    let tags: Vec<_> = ChunksIter::new(&file).map(|c| c.tag()).collect();
    assert_eq!(vec![ChunkTag::IHDR, ChunkTag::PLTE, ChunkTag::IDAT, ChunkTag::IEND], tags);

    let img = decode_memory(&file).unwrap();
    assert_eq!(&palette[..], img.info.palette());
    assert_eq!(&pixels[..], &img.buffer[..]);
    assert_eq!(2, img.stride());
}

#[test]
fn palette_required() {
    let header = ImageHeader::new(1, 1, ColorType::PALETTE, 8);
    let mut enc = Encoder::new(Vec::new(), header).unwrap();
    assert_eq!(ErrorKind::InvalidPalette, enc.write_info().unwrap_err().kind());
}

#[test]
fn palette_ignored_for_grey() {
    let mut info = Info::new();
    info.set_palette(&[rgb::RGB8::new(1, 2, 3)]).unwrap();
    let mut enc = Encoder::with_metadata(Vec::new(), ImageHeader::new(1, 1, ColorType::GREY, 8), EncoderSettings::default(), info).unwrap();
    enc.write_info().unwrap();
    assert_eq!(1, enc.warnings().len());
    enc.write_row(&[0]).unwrap();
    let file = enc.finish().unwrap();
    assert!(ChunksIter::new(&file).all(|c| c.tag() != ChunkTag::PLTE));
}

#[test]
fn suggested_palette_for_truecolor() {
    let file = png(&[ihdr(1, 1, ColorType::RGB, 8), chunk(b"PLTE", &[1, 2, 3, 4, 5, 6]), chunk(b"IDAT", &zlib(&[0, 7, 8, 9])), iend()]);
    let img = decode_memory(&file).unwrap();
    assert_eq!(2, img.info.palette().len());
    assert_eq!(vec![7, 8, 9], img.buffer);
}

#[test]
fn unknown_chunks() {
    let file = png(&[ihdr(1, 1, ColorType::GREY, 8), chunk(b"prVt", b"hello"), grey_idat(), chunk(b"afTr", b"bye"), iend()]);

    let img = decode_memory(&file).unwrap();
    assert_eq!(0, img.info.chunks().count());
    assert_eq!(2, img.warnings.len());

    let mut settings = DecoderSettings::new();
    settings.remember_unknown_chunks = true;
    let img = decode_with_settings(&file, settings).unwrap();
    assert!(img.warnings.is_empty());
    let chunks: Vec<_> = img.info.chunks().collect();
    assert_eq!(vec![
        (ChunkTag(*b"prVt"), ChunkPosition::IHDR, &b"hello"[..]),
        (ChunkTag(*b"afTr"), ChunkPosition::IDAT, &b"bye"[..]),
    ], chunks);

    // written back in the same places
    let mut enc = Encoder::with_metadata(Vec::new(), img.header, EncoderSettings::default(), img.info).unwrap();
    enc.write_info().unwrap();
    enc.write_image(&img.buffer).unwrap();
    let out = enc.finish().unwrap();
    let tags: Vec<_> = ChunksIter::new(&out).map(|c| c.tag()).collect();
    assert_eq!(vec![ChunkTag::IHDR, ChunkTag(*b"prVt"), ChunkTag::IDAT, ChunkTag(*b"afTr"), ChunkTag::IEND], tags);
}

fn interlaced(w: u32, h: u32, color_type: ColorType, depth: u8, pixels: &[u8]) -> Vec<u8> {
    let mut header = ImageHeader::new(w, h, color_type, depth);
    header.interlace = Interlace::Adam7;
    let mut enc = Encoder::new(Vec::new(), header).unwrap();
    enc.write_info().unwrap();
    assert_eq!(7, enc.number_of_passes());
    enc.write_image(pixels).unwrap();
    enc.finish().unwrap()
}

#[test]
fn raw_pass_rows() {
    let pixels = [0b1010_1010u8, 0b0101_0101, 0xff, 0, 0b1100_0011, 0x0f, 0xf0, 0x81];
    let file = interlaced(8, 8, ColorType::GREY, 1, &pixels);
    let mut dec = Decoder::new(&file[..]);
    dec.read_info().unwrap();

    let mut seen = Vec::new();
    while let Some(row) = dec.next_row().unwrap() {
        seen.push((row.pass, row.y, row.info.width, row.data.to_vec()));
    }
    let shape: Vec<_> = seen.iter().map(|r| (r.0, r.1, r.2)).collect();
    assert_eq!(vec![
        (0, 0, 1),
        (1, 0, 1),
        (2, 0, 2),
        (3, 0, 2), (3, 1, 2),
        (4, 0, 4), (4, 1, 4),
        (5, 0, 4), (5, 1, 4), (5, 2, 4), (5, 3, 4),
        (6, 0, 8), (6, 1, 8), (6, 2, 8), (6, 3, 8),
    ], shape);
    // pass 6 holds the odd rows whole
    assert_eq!(vec![pixels[1]], seen[11].3);
    assert_eq!(vec![pixels[7]], seen[14].3);
    // pass 0 is pixel (0,0)
    assert_eq!(vec![0x80], seen[0].3);
    dec.read_end().unwrap();
}

#[test]
fn raw_rows_skip_empty_passes() {
    let file = interlaced(1, 1, ColorType::RGB, 8, &[1, 2, 3]);
    let mut dec = Decoder::new(&file[..]);
    dec.read_info().unwrap();
    let row = dec.next_row().unwrap().unwrap();
    assert_eq!((0, 0, &[1u8, 2, 3][..]), (row.pass, row.y, row.data));
    assert!(dec.next_row().unwrap().is_none());
    let mut buf = [0u8; 3];
    assert_eq!(ErrorKind::InvalidState, dec.read_row(&mut buf, Combine::Sparse).unwrap_err().kind());
    dec.read_end().unwrap();
}

#[test]
fn interlaced_rows_by_pass() {
    let pixels: Vec<u8> = (1..=64).collect();
    let file = interlaced(8, 8, ColorType::GREY, 8, &pixels);

    let mut dec = Decoder::new(&file[..]);
    dec.read_info().unwrap();
    let mut image = vec![0u8; 64];
    for row in image.chunks_exact_mut(8) {
        dec.read_row(row, Combine::Sparse).unwrap();
    }
    // only pass 0 so far
    assert_eq!(1, image[0]);
    assert!(image[1..].iter().all(|&p| p == 0));

    let mut rect = Decoder::new(&file[..]);
    rect.read_info().unwrap();
    let mut blocks = vec![0u8; 64];
    for row in blocks.chunks_exact_mut(8) {
        rect.read_row(row, Combine::Rectangle).unwrap();
    }
    assert!(blocks.iter().all(|&p| p == 1));

    // pass 1 paints the right half
    for row in blocks.chunks_exact_mut(8) {
        rect.read_row(row, Combine::Rectangle).unwrap();
    }
    for row in blocks.chunks_exact(8) {
        assert_eq!([1, 1, 1, 1, 5, 5, 5, 5], row);
    }

    for _ in 2..7 {
        for (a, b) in image.chunks_exact_mut(8).zip(blocks.chunks_exact_mut(8)) {
            // one pass behind
            dec.read_row(a, Combine::Sparse).unwrap();
            rect.read_row(b, Combine::Rectangle).unwrap();
        }
    }
    for row in image.chunks_exact_mut(8) {
        dec.read_row(row, Combine::Sparse).unwrap();
    }
    assert_eq!(pixels, image);
    assert_eq!(pixels, blocks);
    dec.read_end().unwrap();
    rect.read_end().unwrap();
}

#[test]
fn packswap_on_read_and_write() {
    let pixels = [0b1000_0001u8, 0b0100_0000, 0b0000_0011, 0b1110_0000];
    let file = encode_memory(&pixels, 11, 2, ColorType::GREY, 1).unwrap();

    let mut dec = Decoder::new(&file[..]);
    dec.read_info().unwrap();
    dec.transforms_mut().push(PackSwap);
    let info = dec.output_info().unwrap();
    assert!(info.packswapped);
    let mut out = [0u8; 4];
    dec.read_image(&mut out).unwrap();
    dec.read_end().unwrap();
    assert_eq!([0b1000_0001, 0b0000_0010, 0b1100_0000, 0b0000_0111], out);

    // lsb-first rows in, same file out
    let header = ImageHeader::new(11, 2, ColorType::GREY, 1);
    let mut enc = Encoder::new(Vec::new(), header).unwrap();
    let mut input = RowInfo::new(11, ColorType::GREY, 1);
    input.packswapped = true;
    let mut pipeline = TransformPipeline::new();
    pipeline.push(PackSwap);
    enc.set_transforms(pipeline, input).unwrap();
    enc.write_info().unwrap();
    enc.write_image(&out).unwrap();
    let again = decode_memory(&enc.finish().unwrap()).unwrap();
    assert_eq!(&pixels[..], &again.buffer[..]);
}

#[test]
fn packswap_interlaced() {
    let pixels = [0b1011_0001u8, 0b0110_1001, 0b0000_1111, 0b1111_0000, 0b1010_0101, 0b0101_1010];
    let file = interlaced(8, 6, ColorType::GREY, 1, &pixels);
    let mut dec = Decoder::new(&file[..]);
    dec.read_info().unwrap();
    dec.transforms_mut().push(PackSwap);
    let mut out = [0u8; 6];
    dec.read_image(&mut out).unwrap();
    let expected: Vec<u8> = pixels.iter().map(|b| b.reverse_bits()).collect();
    assert_eq!(&expected[..], &out[..]);
}

#[test]
fn transforms_must_match_header() {
    let header = ImageHeader::new(4, 1, ColorType::GREY, 1);
    let mut enc = Encoder::new(Vec::new(), header).unwrap();
    let mut pipeline = TransformPipeline::new();
    pipeline.push(PackSwap);
    let err = enc.set_transforms(pipeline, RowInfo::new(4, ColorType::GREY, 1)).unwrap_err();
    assert_eq!(ErrorKind::InvalidArgument, err.kind());
}

#[test]
fn stream_transport() {
    let pixels: Vec<u8> = (0..200u8).collect();
    let file = encode_memory(&pixels, 10, 10, ColorType::GREY_ALPHA, 8).unwrap();

    // a reader that hands out a few bytes at a time
    struct Trickle<'a>(&'a [u8]);
    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.0.len()).min(3);
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    let mut dec = Decoder::new(Trickle(&file));
    let header = *dec.read_info().unwrap();
    assert_eq!(ColorType::GREY_ALPHA, header.color_type);
    let mut out = vec![0u8; pixels.len()];
    dec.read_image(&mut out).unwrap();
    dec.read_end().unwrap();
    assert_eq!(pixels, out);
    assert!(dec.into_inner().0.is_empty());
}

#[test]
fn small_idat_buffers() {
    let mut seed = 1u32;
    let pixels: Vec<u8> = (0..3000).map(|_| {
        seed = 1103515245u32.wrapping_mul(seed).wrapping_add(12345);
        (seed >> 17) as u8
    }).collect();
    let mut settings = EncoderSettings::new();
    settings.idat_buffer_size = 64;
    settings.set_level(9);
    let mut enc = Encoder::with_settings(Vec::new(), ImageHeader::new(50, 20, ColorType::RGB, 8), settings).unwrap();
    enc.write_info().unwrap();
    enc.write_image(&pixels).unwrap();
    let file = enc.finish().unwrap();
    let idats = ChunksIter::new(&file).filter(|c| c.tag() == ChunkTag::IDAT).count();
    assert!(idats > 1);
    assert!(ChunksIter::new(&file).all(|c| c.len() <= 64));

    let mut dec_settings = DecoderSettings::new();
    dec_settings.idat_buffer_size = 5;
    assert_eq!(pixels, decode_with_settings(&file, dec_settings).unwrap().buffer);
}

#[test]
fn files_on_disk() {
    let path = std::env::temp_dir().join(format!("pngstream-test-{}.png", std::process::id()));
    let pixels = [10u8, 20, 30, 40, 50, 60];
    encode_file(&path, &pixels, 2, 1, ColorType::RGB, 8).unwrap();
    let img = decode_file(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert_eq!(&pixels[..], &img.buffer[..]);
}
