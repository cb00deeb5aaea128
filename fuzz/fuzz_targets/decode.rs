#![no_main]
#[macro_use] extern crate libfuzzer_sys;

fuzz_target!(|data: &[u8]| {
    let mut settings = pngstream::DecoderSettings::new();
    settings.remember_unknown_chunks = true;
    if let Ok(img) = pngstream::decode_with_settings(data, settings) {
        assert_eq!(img.buffer.len(), img.stride() * img.header.height as usize);
    }
});
