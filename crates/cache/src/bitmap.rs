//! Rendered page bitmaps and the keys they are cached under.

use std::sync::Arc;

/// Bytes per pixel of an RGBA8 bitmap.
pub const BYTES_PER_PIXEL: usize = 4;

/// Identifies one rendered bitmap: a whole page at a target width, or a tile
/// of that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BitmapKey {
    /// Page index within the document
    pub page_index: usize,

    /// Target width the page was rasterized at, in pixels
    pub width: u32,

    /// Tile coordinates, or `None` for a whole-page bitmap
    pub tile: Option<(u32, u32)>,
}

impl BitmapKey {
    /// Key for a whole-page bitmap.
    pub fn page(page_index: usize, width: u32) -> Self {
        Self {
            page_index,
            width,
            tile: None,
        }
    }

    /// Key for one tile of a page.
    pub fn tile(page_index: usize, width: u32, tile_x: u32, tile_y: u32) -> Self {
        Self {
            page_index,
            width,
            tile: Some((tile_x, tile_y)),
        }
    }
}

/// An RGBA8 bitmap produced by the rasterizer.
///
/// Cloning is cheap: the pixel buffer is shared. The cache counts the buffer
/// once per entry regardless of how many clones are alive outside of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Arc<Vec<u8>>,
}

impl Bitmap {
    /// Wrap an RGBA8 pixel buffer.
    ///
    /// Returns `None` when the buffer length does not match `width * height * 4`.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(BYTES_PER_PIXEL)?;
        (pixels.len() == expected).then(|| Self {
            width,
            height,
            pixels: Arc::new(pixels),
        })
    }

    /// Allocate a zeroed bitmap.
    pub fn blank(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * BYTES_PER_PIXEL;
        Self {
            width,
            height,
            pixels: Arc::new(vec![0; len]),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Size of the pixel buffer in bytes, used for cache accounting.
    pub fn byte_count(&self) -> usize {
        self.pixels.len()
    }
}
