#![no_main]
#[macro_use] extern crate libfuzzer_sys;

use pngstream::*;

fuzz_target!(|data: &[u8]| {
    if data.len() < 5 {
        return;
    }
    let (seed, data) = data.split_at(3);
    let (colortype, bitdepth) = match seed[1] % 8 {
        0 => (ColorType::GREY, 1),
        1 => (ColorType::GREY, 4),
        2 => (ColorType::GREY, 8),
        3 => (ColorType::GREY, 16),
        4 => (ColorType::RGB, 8),
        5 => (ColorType::GREY_ALPHA, 8),
        6 => (ColorType::RGBA, 8),
        _ => (ColorType::RGBA, 16),
    };
    let width = 1 + u32::from(seed[0]);
    let mut header = ImageHeader::new(width, 1, colortype, bitdepth);
    if seed[2] & 1 != 0 {
        header.interlace = Interlace::Adam7;
    }
    let stride = header.rowbytes().unwrap();
    let height = data.len() / stride;
    if height < 1 {
        return;
    }
    header.height = height as u32;
    let mut pixels = data[..stride * height].to_vec();
    let used = (width as usize * header.pixel_depth() as usize) % 8;
    if used != 0 {
        for row in pixels.chunks_exact_mut(stride) {
            row[stride - 1] &= 0xff << (8 - used);
        }
    }

    let mut settings = EncoderSettings::new();
    settings.set_level(seed[2] >> 4);
    settings.set_filter_strategy(FilterStrategy::Predefined(pixels.iter().take(height).map(|&f| f % 5).collect()), false);
    let mut encoder = Encoder::with_settings(Vec::new(), header, settings).unwrap();
    encoder.write_info().unwrap();
    encoder.write_image(&pixels).unwrap();
    let file = encoder.finish().unwrap();

    let img = decode_memory(&file).unwrap();
    assert_eq!(header, img.header);
    assert_eq!(pixels, img.buffer);
});
