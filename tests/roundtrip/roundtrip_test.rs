use pngstream::*;

#[test]
fn roundtrip_grey() {
    roundtrip_color(ColorType::GREY, &[8, 16]);
}

#[test]
fn roundtrip_rgb() {
    roundtrip_color(ColorType::RGB, &[8, 16]);
}

#[test]
fn roundtrip_rgba() {
    roundtrip_color(ColorType::RGBA, &[8, 16]);
}

#[test]
fn roundtrip_grey_alpha() {
    roundtrip_color(ColorType::GREY_ALPHA, &[8, 16]);
}

#[test]
fn roundtrip_low_bpp() {
    roundtrip_color(ColorType::GREY, &[1, 2, 4]);
    roundtrip_color(ColorType::PALETTE, &[1, 2, 4, 8]);
}

const SIZES: [u32; 12] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 15, 17, 33];

#[track_caller]
fn roundtrip_color(colortype: ColorType, bitdepths: &[u8]) {
    let filter_strategies = [
        FilterStrategy::Zero,
        FilterStrategy::MinSum(FilterSet::ALL),
        FilterStrategy::Weighted(FilterSet::ALL, FilterWeights::default()),
        FilterStrategy::Fixed(FilterType::Paeth),
        FilterStrategy::MinSum(FilterSet::SUB | FilterSet::AVERAGE),
    ];
    let mut n = 0;
    let mut data = vec![0; 256 + 33 * 33 * 8];
    for &bitdepth in bitdepths {
        for width in SIZES {
            randomize(&mut data);
            for height in SIZES {
                for interlace in [Interlace::None, Interlace::Adam7] {
                    for predefined in [false, true] {
                        let strategy = if predefined {
                            let (f, _) = data.split_at(height as usize);
                            FilterStrategy::Predefined(f.iter().map(|&f| f % 5).collect())
                        } else {
                            filter_strategies[n % filter_strategies.len()].clone()
                        };
                        n += 1;
                        roundtrip_data(&data[256..], width, height, interlace, colortype, bitdepth, strategy);
                    }
                }
            }
        }
    }
}

fn randomize(data: &mut [u8]) {
    let mut seed = u32::from(data[0]);
    for b in data {
        seed = 1103515245u32.wrapping_mul(seed).wrapping_add(12345);
        *b ^= (seed >> 17) as u8;
    }
}

/// Clears the unused bits at the end of each row of sub-byte pixels
fn clear_padding(pixels: &mut [u8], stride: usize, width: u32, pixel_depth: u8) {
    let used = (width as usize * pixel_depth as usize) % 8;
    if used == 0 {
        return;
    }
    for row in pixels.chunks_exact_mut(stride) {
        row[stride - 1] &= 0xff << (8 - used);
    }
}

#[track_caller]
fn roundtrip_data(data: &[u8], width: u32, height: u32, interlace: Interlace, colortype: ColorType, bitdepth: u8, strategy: FilterStrategy) {
    let mut header = ImageHeader::new(width, height, colortype, bitdepth);
    header.interlace = interlace;
    let stride = header.rowbytes().unwrap();
    let mut pixels = data[..stride * height as usize].to_vec();
    clear_padding(&mut pixels, stride, width, header.pixel_depth());

    let mut info = Info::new();
    if colortype == ColorType::PALETTE {
        let palette: Vec<_> = (0..1usize << bitdepth).map(|i| rgb::RGB8::new(i as u8, 255 - i as u8, 7)).collect();
        info.set_palette(&palette).unwrap();
    }

    let mut settings = EncoderSettings::new();
    settings.set_filter_strategy(strategy.clone(), false);
    let mut encoder = Encoder::with_metadata(Vec::new(), header, settings, info).unwrap();
    encoder.write_info().unwrap();
    encoder.write_image(&pixels).unwrap();
    assert!(encoder.warnings().is_empty());
    let file = encoder.finish().unwrap();

    let img = decode_memory(&file).unwrap();
    assert_eq!(header, img.header);
    assert!(img.warnings.is_empty(), "{:?}", img.warnings);
    if pixels != img.buffer {
        panic!("{}x{} {:?} {}-bit {:?} {:?} differs", width, height, colortype, bitdepth, interlace, strategy);
    }

    // same pixels through the pass-by-pass reader
    let mut dec = Decoder::new(&file[..]);
    dec.read_info().unwrap();
    let mut rows = 0;
    while let Some(row) = dec.next_row().unwrap() {
        assert!(row.data.len() <= stride);
        rows += 1;
    }
    dec.read_end().unwrap();
    let expected: u32 = if interlace == Interlace::Adam7 {
        adam7::passes(width, height).iter().filter(|p| !p.is_empty()).map(|p| p.height).sum()
    } else {
        height
    };
    assert_eq!(expected, rows);
}
