//! Page decoding boundary.
//!
//! The pipeline only needs a page rendered to BGRA8 at the label's pixel
//! size. [`ImageDecoder`] covers raster image files; other document formats
//! plug in through [`PageDecoder`].

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, Rgba, RgbaImage};
use tracing::debug;

use crate::consts::DEFAULT_EXTENSIONS;
use crate::error::{PrintError, Result};

/// One rendered page: premultiplied BGRA8, `width * height * 4` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPage {
    pub width: u32,
    pub height: u32,
    pub bgra: Vec<u8>,
}

pub trait PageDecoder: Send + Sync {
    /// Number of pages in the document at `path`.
    fn page_count(&self, path: &Path) -> Result<usize>;

    /// Render `page_index` scaled to exactly `width` x `height` pixels.
    fn decode(&self, path: &Path, page_index: usize, width: u32, height: u32)
        -> Result<DecodedPage>;

    /// File extensions (lowercase, no dot) this decoder accepts.
    fn extensions(&self) -> &[&str];
}

/// Single-page raster images via the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder;

impl ImageDecoder {
    fn load(path: &Path) -> Result<DynamicImage> {
        ImageReader::open(path)
            .map_err(|e| PrintError::decode(format!("cannot open {}: {}", path.display(), e)))?
            .with_guessed_format()
            .map_err(|e| PrintError::decode(format!("cannot read {}: {}", path.display(), e)))?
            .decode()
            .map_err(|e| PrintError::decode(format!("cannot decode {}: {}", path.display(), e)))
    }
}

impl PageDecoder for ImageDecoder {
    fn page_count(&self, _path: &Path) -> Result<usize> {
        Ok(1)
    }

    fn decode(
        &self,
        path: &Path,
        page_index: usize,
        width: u32,
        height: u32,
    ) -> Result<DecodedPage> {
        let pages = self.page_count(path)?;
        if page_index >= pages {
            return Err(PrintError::decode(format!(
                "page {} out of range, {} has {} page(s)",
                page_index,
                path.display(),
                pages
            )));
        }

        let img = Self::load(path)?;
        debug!(
            path = %path.display(),
            src_w = img.width(),
            src_h = img.height(),
            width,
            height,
            "decoded page"
        );
        let scaled = img.resize_exact(width, height, FilterType::Triangle).to_rgba8();
        Ok(DecodedPage {
            width,
            height,
            bgra: to_bgra_on_white(&scaled),
        })
    }

    fn extensions(&self) -> &[&str] {
        DEFAULT_EXTENSIONS
    }
}

/// Composite onto white and reorder to BGRA; the output is fully opaque,
/// so premultiplied and straight alpha coincide.
fn to_bgra_on_white(img: &RgbaImage) -> Vec<u8> {
    let mut out = Vec::with_capacity(img.as_raw().len());
    for &Rgba([r, g, b, a]) in img.pixels() {
        let over_white = |c: u8| -> u8 {
            let a = a as u32;
            ((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8
        };
        out.extend_from_slice(&[over_white(b), over_white(g), over_white(r), 255]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};

    #[test]
    fn test_transparent_becomes_white() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0]));
        assert_eq!(to_bgra_on_white(&img), vec![255, 255, 255, 255]);
    }

    #[test]
    fn test_opaque_channels_reordered() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([10, 20, 30, 255]));
        assert_eq!(to_bgra_on_white(&img), vec![30, 20, 10, 255]);
    }

    #[test]
    fn test_decode_scales_to_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        ImageBuffer::from_pixel(4, 2, Luma([0u8])).save(&path).unwrap();

        let page = ImageDecoder.decode(&path, 0, 16, 8).unwrap();
        assert_eq!((page.width, page.height), (16, 8));
        assert_eq!(page.bgra.len(), 16 * 8 * 4);
        assert!(page.bgra.chunks(4).all(|px| px == [0, 0, 0, 255]));
    }

    #[test]
    fn test_page_index_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        ImageBuffer::from_pixel(2, 2, Luma([255u8])).save(&path).unwrap();

        assert!(matches!(
            ImageDecoder.decode(&path, 1, 2, 2),
            Err(PrintError::Decode(_))
        ));
    }

    #[test]
    fn test_unreadable_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();

        assert!(matches!(
            ImageDecoder.decode(&path, 0, 8, 8),
            Err(PrintError::Decode(_))
        ));
    }
}
