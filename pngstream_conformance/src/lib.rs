//! Glue for checking `pngstream` output against the `png` crate, and the other way round.

use pngstream::{ColorType, ImageHeader, Interlace};

pub fn to_png_color(color_type: ColorType) -> png::ColorType {
    match color_type {
        ColorType::GREY => png::ColorType::Grayscale,
        ColorType::RGB => png::ColorType::Rgb,
        ColorType::PALETTE => png::ColorType::Indexed,
        ColorType::GREY_ALPHA => png::ColorType::GrayscaleAlpha,
        ColorType::RGBA => png::ColorType::Rgba,
    }
}

pub fn to_png_depth(bit_depth: u8) -> Option<png::BitDepth> {
    png::BitDepth::from_u8(bit_depth)
}

/// Decodes with the `png` crate, keeping samples as stored in the file
pub fn png_decode(file: &[u8]) -> Result<(ImageHeader, Vec<u8>), png::DecodingError> {
    let mut decoder = png::Decoder::new(file);
    decoder.set_transformations(png::Transformations::IDENTITY);
    let mut reader = decoder.read_info()?;
    let mut buffer = vec![0; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut buffer)?;
    buffer.truncate(frame.buffer_size());

    let info = reader.info();
    let color_type = ColorType::from_u8(info.color_type as u8)
        .ok_or_else(|| png::DecodingError::LimitsExceeded)?;
    let mut header = ImageHeader::new(info.width, info.height, color_type, info.bit_depth as u8);
    if info.interlaced {
        header.interlace = Interlace::Adam7;
    }
    Ok((header, buffer))
}

/// Encodes with the `png` crate. `pixels` holds packed rows, like `pngstream` takes them.
pub fn png_encode(header: &ImageHeader, pixels: &[u8], palette: Option<&[u8]>, texts: &[(&str, &str)]) -> Result<Vec<u8>, png::EncodingError> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, header.width, header.height);
        encoder.set_color(to_png_color(header.color_type));
        if let Some(depth) = to_png_depth(header.bit_depth) {
            encoder.set_depth(depth);
        }
        if let Some(palette) = palette {
            encoder.set_palette(palette.to_vec());
        }
        for &(key, value) in texts {
            encoder.add_text_chunk(key.to_owned(), value.to_owned())?;
        }
        let mut writer = encoder.write_header()?;
        writer.write_image_data(pixels)?;
        writer.finish()?;
    }
    Ok(out)
}
