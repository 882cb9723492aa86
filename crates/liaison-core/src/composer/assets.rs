//! Logo and stamp images embedded in every letter

use crate::error::{LiaisonError, Result};
use png::{BitDepth, ColorType};
use std::io::Cursor;
use std::path::Path;

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_SOI: &[u8] = &[0xFF, 0xD8];
const MAX_DECODED_BYTES: usize = 64 * 1024 * 1024;

/// Pixel payload ready to be placed in an image XObject
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageData {
    /// 8-bit RGB, with an 8-bit alpha plane when the source was not opaque
    Rgb { pixels: Vec<u8>, alpha: Option<Vec<u8>> },
    /// Baseline JPEG stream embedded unchanged (DCTDecode)
    Jpeg { data: Vec<u8>, components: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub width: u32,
    pub height: u32,
    pub data: ImageData,
}

impl ImageAsset {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| LiaisonError::Asset(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_bytes(&bytes)
            .map_err(|e| LiaisonError::Asset(format!("{}: {}", path.display(), e)))
    }

    /// Decode PNG or JPEG bytes, sniffed from the signature
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.starts_with(PNG_SIGNATURE) {
            decode_png(bytes)
        } else if bytes.starts_with(JPEG_SOI) {
            let (width, height, components) = jpeg_dimensions(bytes)?;
            Ok(Self {
                width,
                height,
                data: ImageData::Jpeg {
                    data: bytes.to_vec(),
                    components,
                },
            })
        } else {
            Err(LiaisonError::Asset("unsupported image format (expected PNG or JPEG)".to_string()))
        }
    }

    /// Largest (width, height) with this aspect ratio that fits the box
    pub fn fit_within(&self, max_width: f32, max_height: f32) -> (f32, f32) {
        let scale = (max_width / self.width as f32).min(max_height / self.height as f32);
        (self.width as f32 * scale, self.height as f32 * scale)
    }
}

fn decode_png(bytes: &[u8]) -> Result<ImageAsset> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder
        .read_info()
        .map_err(|e| LiaisonError::Asset(format!("png decode header failed: {}", e)))?;

    let output_size = reader.output_buffer_size();
    if output_size > MAX_DECODED_BYTES {
        return Err(LiaisonError::Asset(format!(
            "png decoded buffer exceeds maximum size ({} bytes)",
            output_size
        )));
    }

    let mut buf = vec![0u8; output_size];
    let info = reader
        .next_frame(&mut buf)
        .map_err(|e| LiaisonError::Asset(format!("png decode frame failed: {}", e)))?;
    let bytes = &buf[..info.buffer_size()];

    if info.width == 0 || info.height == 0 {
        return Err(LiaisonError::Asset("png has zero width/height".to_string()));
    }

    let pixel_count = info.width as usize * info.height as usize;
    let mut pixels = Vec::with_capacity(pixel_count * 3);
    let mut alpha = Vec::with_capacity(pixel_count);

    match (info.color_type, info.bit_depth) {
        (ColorType::Rgba, BitDepth::Eight) => {
            for chunk in bytes.chunks_exact(4) {
                pixels.extend_from_slice(&chunk[..3]);
                alpha.push(chunk[3]);
            }
        }
        (ColorType::Rgb, BitDepth::Eight) => pixels.extend_from_slice(bytes),
        (ColorType::Grayscale, BitDepth::Eight) => {
            for &g in bytes {
                pixels.extend_from_slice(&[g, g, g]);
            }
        }
        (ColorType::GrayscaleAlpha, BitDepth::Eight) => {
            for chunk in bytes.chunks_exact(2) {
                pixels.extend_from_slice(&[chunk[0], chunk[0], chunk[0]]);
                alpha.push(chunk[1]);
            }
        }
        (ct, bd) => {
            return Err(LiaisonError::Asset(format!(
                "unsupported png output format: color={:?} depth={:?}",
                ct, bd
            )))
        }
    }

    let alpha = if alpha.iter().any(|&a| a != u8::MAX) {
        Some(alpha)
    } else {
        None
    };

    Ok(ImageAsset {
        width: info.width,
        height: info.height,
        data: ImageData::Rgb { pixels, alpha },
    })
}

/// Read width, height and component count from the first SOF marker
fn jpeg_dimensions(bytes: &[u8]) -> Result<(u32, u32, u8)> {
    let truncated = || LiaisonError::Asset("truncated jpeg header".to_string());
    let mut pos = 2;

    loop {
        // Skip fill bytes before the marker code
        while bytes.get(pos) == Some(&0xFF) && bytes.get(pos + 1) == Some(&0xFF) {
            pos += 1;
        }
        if bytes.get(pos) != Some(&0xFF) {
            return Err(LiaisonError::Asset("malformed jpeg marker".to_string()));
        }
        let marker = *bytes.get(pos + 1).ok_or_else(truncated)?;
        pos += 2;

        // Standalone markers carry no length
        if marker == 0x01 || (0xD0..=0xD9).contains(&marker) {
            continue;
        }

        let length = bytes
            .get(pos..pos + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
            .ok_or_else(truncated)?;

        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            let segment = bytes.get(pos + 2..pos + 8).ok_or_else(truncated)?;
            let height = u16::from_be_bytes([segment[1], segment[2]]) as u32;
            let width = u16::from_be_bytes([segment[3], segment[4]]) as u32;
            let components = segment[5];
            if width == 0 || height == 0 {
                return Err(LiaisonError::Asset("jpeg has zero width/height".to_string()));
            }
            return Ok((width, height, components));
        }

        pos += length;
    }
}

/// Logo and stamp, loaded once at startup
#[derive(Debug, Clone)]
pub struct LetterAssets {
    pub logo: ImageAsset,
    pub stamp: ImageAsset,
}

impl LetterAssets {
    /// Both files must exist and decode; a failure here is fatal at startup
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(logo: P, stamp: Q) -> Result<Self> {
        let assets = Self {
            logo: ImageAsset::load(logo.as_ref())?,
            stamp: ImageAsset::load(stamp.as_ref())?,
        };
        log::info!(
            "Loaded letter assets: logo {}x{}, stamp {}x{}",
            assets.logo.width,
            assets.logo.height,
            assets.stamp.width,
            assets.stamp.height
        );
        Ok(assets)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use png::{BitDepth, ColorType};

    /// Encode a solid-color RGBA PNG
    pub fn solid_png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(ColorType::Rgba);
            encoder.set_depth(BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            let data: Vec<u8> = rgba.iter().copied().cycle().take((width * height * 4) as usize).collect();
            writer.write_image_data(&data).unwrap();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::solid_png;
    use super::*;

    #[test]
    fn test_opaque_png_has_no_alpha_plane() {
        let asset = ImageAsset::from_bytes(&solid_png(4, 2, [10, 20, 30, 255])).unwrap();
        assert_eq!((asset.width, asset.height), (4, 2));
        match asset.data {
            ImageData::Rgb { pixels, alpha } => {
                assert_eq!(pixels.len(), 4 * 2 * 3);
                assert_eq!(&pixels[..3], &[10, 20, 30]);
                assert!(alpha.is_none());
            }
            other => panic!("unexpected image data: {:?}", other),
        }
    }

    #[test]
    fn test_translucent_png_keeps_alpha() {
        let asset = ImageAsset::from_bytes(&solid_png(3, 3, [200, 0, 0, 128])).unwrap();
        match asset.data {
            ImageData::Rgb { alpha: Some(alpha), .. } => assert!(alpha.iter().all(|&a| a == 128)),
            other => panic!("expected alpha plane, got {:?}", other),
        }
    }

    #[test]
    fn test_jpeg_header_dimensions() {
        // SOI, APP0 (length 4, two payload bytes), SOF0 for 640x480 with 3 components
        let bytes: Vec<u8> = vec![
            0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00, 0xFF, 0xC0, 0x00, 0x11, 0x08, 0x01,
            0xE0, 0x02, 0x80, 0x03,
        ];
        let asset = ImageAsset::from_bytes(&bytes).unwrap();
        assert_eq!((asset.width, asset.height), (640, 480));
        assert!(matches!(asset.data, ImageData::Jpeg { components: 3, .. }));
    }

    #[test]
    fn test_unknown_format_rejected() {
        let err = ImageAsset::from_bytes(b"GIF89a").unwrap_err();
        assert!(matches!(err, LiaisonError::Asset(_)));
    }

    #[test]
    fn test_missing_file_is_asset_error() {
        let err = LetterAssets::load("/nonexistent/logo.png", "/nonexistent/cachet.png").unwrap_err();
        assert!(matches!(err, LiaisonError::Asset(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_fit_within_preserves_aspect() {
        let asset = ImageAsset::from_bytes(&solid_png(200, 100, [0, 0, 0, 255])).unwrap();
        let (w, h) = asset.fit_within(100.0, 100.0);
        assert!((w - 100.0).abs() < 1e-3);
        assert!((h - 50.0).abs() < 1e-3);
    }
}
