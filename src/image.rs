//! C9: slice-to-PNG image encoding (spec §4.9). Four encoding modes are
//! selected by element dtype and display range, matching the Python
//! prototype's `make_image.py`.

use crate::error::Result;
use crate::volume::Dtype;
use ::image::{DynamicImage, GenericImage, GrayImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMode {
    Grayscale,
    BlackAndWhite,
    ColorCoded,
    ColorCodedFixed,
}

/// First 10 non-zero fixed-palette colors (0xRRGGBB), used by
/// `ColorCodedFixed` to map low phase values to recognizable colors.
const FIXED_PALETTE: [u32; 11] = [
    0, 0x00ff00, 0x0000ff, 0xff0000, 0x00ffff, 0xffff00, 0x007f00, 0x00007f, 0x7f0000, 0x007f7f,
    0x7f7f00,
];

/// Bit-shuffle translation: input bit `i` (0..15) maps to output RGB bit
/// `BIT_MAP[i]`, spreading label bits across color channels to increase
/// visual contrast between adjacent phase values.
const BIT_MAP: [u32; 15] = [7, 15, 23, 6, 14, 22, 5, 13, 21, 4, 12, 20, 3, 11, 19];

/// Picks the encoding mode for a slice, given its source dtype and the
/// display-range high bound (spec §4.9's mode-selection table).
pub fn select_mode(dtype: Dtype, hi: f64) -> ImageMode {
    match dtype {
        Dtype::U8 => {
            if hi <= 1.0 {
                ImageMode::BlackAndWhite
            } else {
                ImageMode::ColorCodedFixed
            }
        }
        Dtype::U16 => ImageMode::Grayscale,
        Dtype::I32 => ImageMode::ColorCoded,
        Dtype::F32 => ImageMode::Grayscale,
    }
}

fn convert_grayscale(data: &[f64], mask: &[bool], rows: u32, cols: u32, lo: f64, hi: f64) -> GrayImage {
    let f = 0xffffu32 as f64 / (hi - lo) / 256.0;
    let mut img = GrayImage::new(cols, rows);
    for (i, px) in img.pixels_mut().enumerate() {
        let v = ((data[i].max(lo) - lo) * f).min(255.0) as u8;
        let v = v | if mask[i] { 80 } else { 0 };
        px.0 = [v];
    }
    img
}

fn convert_black_and_white(data: &[f64], mask: &[bool], rows: u32, cols: u32) -> GrayImage {
    let mut img = GrayImage::new(cols, rows);
    for (i, px) in img.pixels_mut().enumerate() {
        let base = if data[i] > 0.0 { 0xff } else { 0 };
        let v = (base | if mask[i] { 80 } else { 0 }) as u8;
        px.0 = [v];
    }
    img
}

fn convert_color_coded(data: &[f64], mask: &[bool], rows: u32, cols: u32, use_fixed: bool) -> RgbaImage {
    let mut img = RgbaImage::new(cols, rows);
    for (i, px) in img.pixels_mut().enumerate() {
        let mut value = data[i] as i64 & 0xffff;
        let mut bits: u32 = 0xff000000;
        if mask[i] {
            bits |= 0x505050;
        }

        if use_fixed {
            if value > 0 && (value as usize) < FIXED_PALETTE.len() {
                bits |= FIXED_PALETTE[value as usize];
            }
            if (value as usize) < FIXED_PALETTE.len() {
                value = 0;
            }
        }

        for (i_bit, &out_bit) in BIT_MAP.iter().enumerate() {
            let bit = (value >> i_bit) & 1;
            bits |= (bit as u32) << out_bit;
        }

        let [a, r, g, b] = bits.to_be_bytes();
        *px = Rgba([r, g, b, a]);
    }
    img
}

/// Encodes one 2-D slice (`rows * cols` row-major samples) as PNG bytes.
/// Entries equal to `mask_val` are rendered as masked rather than data.
/// `thumb_size`, if given, resizes the result to that `(width, height)`
/// before encoding.
pub fn make_image(
    data: &[f64],
    rows: u32,
    cols: u32,
    lo: f64,
    hi: f64,
    mask_val: f64,
    mode: ImageMode,
    thumb_size: Option<(u32, u32)>,
) -> Result<Vec<u8>> {
    let mask: Vec<bool> = data.iter().map(|&v| v == mask_val).collect();
    let masked_data: Vec<f64> = data
        .iter()
        .zip(&mask)
        .map(|(&v, &m)| if m { 0.0 } else { v })
        .collect();

    let mut image = match mode {
        ImageMode::Grayscale => {
            DynamicImage::ImageLuma8(convert_grayscale(&masked_data, &mask, rows, cols, lo, hi))
        }
        ImageMode::BlackAndWhite => {
            DynamicImage::ImageLuma8(convert_black_and_white(&masked_data, &mask, rows, cols))
        }
        ImageMode::ColorCoded => {
            DynamicImage::ImageRgba8(convert_color_coded(&masked_data, &mask, rows, cols, false))
        }
        ImageMode::ColorCodedFixed => {
            DynamicImage::ImageRgba8(convert_color_coded(&masked_data, &mask, rows, cols, true))
        }
    };

    if let Some((w, h)) = thumb_size {
        image = image.resize(w, h, ::image::imageops::FilterType::Triangle);
    }

    let mut out = Vec::new();
    image.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

/// Produces a placeholder gray PNG, used by `--mock-slices` to skip real
/// data reads while still exercising the output pipeline. A diagonal
/// stripe stands in for the prototype's rendered caption text, since
/// drawing text needs a font rasterizer this crate does not otherwise
/// depend on.
pub fn make_dummy(width: u32, height: u32) -> Result<Vec<u8>> {
    let mut img = DynamicImage::new_rgb8(width, height).to_rgb8();
    for (x, y, px) in img.enumerate_pixels_mut() {
        *px = ::image::Rgb([128, 128, 128]);
        if x == y || x + 1 == y || x == y + 1 {
            *px = ::image::Rgb([32, 32, 32]);
        }
    }
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img).write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_selection_matches_table() {
        assert_eq!(select_mode(Dtype::U8, 0.0), ImageMode::BlackAndWhite);
        assert_eq!(select_mode(Dtype::U8, 5.0), ImageMode::ColorCodedFixed);
        assert_eq!(select_mode(Dtype::U16, 100.0), ImageMode::Grayscale);
        assert_eq!(select_mode(Dtype::I32, 100.0), ImageMode::ColorCoded);
        assert_eq!(select_mode(Dtype::F32, 100.0), ImageMode::Grayscale);
    }

    #[test]
    fn grayscale_encoding_produces_valid_png() {
        let data = vec![0.0, 1000.0, 2000.0, 65535.0];
        let png = make_image(&data, 2, 2, 0.0, 65535.0, 0xffff as f64, ImageMode::Grayscale, None)
            .unwrap();
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    }

    #[test]
    fn thumbnail_resizes_output() {
        let data = vec![0.0; 16];
        let png = make_image(
            &data,
            4,
            4,
            0.0,
            1.0,
            0xffff as f64,
            ImageMode::Grayscale,
            Some((2, 2)),
        )
        .unwrap();
        assert!(!png.is_empty());
    }

    #[test]
    fn dummy_image_is_valid_png() {
        let png = make_dummy(32, 32).unwrap();
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    }
}
