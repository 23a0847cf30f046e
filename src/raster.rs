use crate::decode::DecodedPage;

/// BT.601 integer luminance of one pixel.
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}

/// Ink iff strictly darker than the threshold.
pub fn is_ink(luma: u8, threshold: u8) -> bool {
    luma < threshold
}

/// 1-bit image, row-major, MSB-first, rows padded to whole bytes.
/// A set bit is ink (black); wire polarity is applied by the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitonalBitmap {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl BitonalBitmap {
    /// Blank (all paper) bitmap.
    pub fn new(width: u32, height: u32) -> Self {
        let bpr = ((width + 7) / 8) as usize;
        Self {
            width,
            height,
            data: vec![0u8; bpr * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn row_bytes(&self) -> usize {
        ((self.width + 7) / 8) as usize
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn set_ink(&mut self, x: u32, y: u32) {
        debug_assert!(x < self.width && y < self.height);
        let idx = y as usize * self.row_bytes() + (x as usize / 8);
        self.data[idx] |= 1 << (7 - (x as usize % 8));
    }

    pub fn is_ink(&self, x: u32, y: u32) -> bool {
        let idx = y as usize * self.row_bytes() + (x as usize / 8);
        self.data[idx] & (1 << (7 - (x as usize % 8))) != 0
    }

    /// Classify every BGRA8 pixel of a decoded page against `threshold`.
    pub fn from_page(page: &DecodedPage, threshold: u8) -> Self {
        let mut bitmap = Self::new(page.width, page.height);
        let stride = page.width as usize * 4;

        for (y, row) in page.bgra.chunks_exact(stride).enumerate() {
            for (x, px) in row.chunks_exact(4).enumerate() {
                // BGRA byte order
                if is_ink(luminance(px[2], px[1], px[0]), threshold) {
                    bitmap.set_ink(x as u32, y as u32);
                }
            }
        }
        bitmap
    }
}
