//! Raster output — grayscale pixel canvas and PNG encoding.
//!
//! Pages are stacked vertically into one image. The PNG container holds a
//! single IHDR, one zlib-compressed IDAT and IEND.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::glyphs::{Pen, TextAnchor};
use super::Canvas;
use crate::error::DrawError;

/// Page pixels are CSS pixels; this is the dpi at which they map 1:1.
pub const BASE_DPI: f64 = 96.0;
/// Largest image the raster pen will allocate.
pub const MAX_RASTER_PIXELS: u64 = 64 * 1024 * 1024;

const PAPER: u8 = 0xFF;
const INK: u8 = 0x1A;
const PAGE_GAP_COLOR: u8 = 0xC8;

// ═══════════════════════════════════════════════════════════════════════
// Pixel canvas
// ═══════════════════════════════════════════════════════════════════════

/// 8-bit grayscale image, row-major.
#[derive(Debug, Clone)]
pub struct GrayImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl GrayImage {
    pub fn new(width: u32, height: u32, fill: u8) -> Self {
        Self { width, height, pixels: vec![fill; width as usize * height as usize] }
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x < self.width && y < self.height {
            Some(self.pixels[y as usize * self.width as usize + x as usize])
        } else {
            None
        }
    }

    fn put(&mut self, x: i64, y: i64, value: u8) {
        if x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height {
            self.pixels[y as usize * self.width as usize + x as usize] = value;
        }
    }

    fn fill_rect(&mut self, x0: f64, y0: f64, x1: f64, y1: f64, value: u8) {
        let (xa, xb) = (x0.min(x1).floor() as i64, x0.max(x1).ceil() as i64);
        let (ya, yb) = (y0.min(y1).floor() as i64, y0.max(y1).ceil() as i64);
        for y in ya..yb.max(ya + 1) {
            for x in xa..xb.max(xa + 1) {
                self.put(x, y, value);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Bitmap font (5x7, digits and capitals)
// ═══════════════════════════════════════════════════════════════════════

fn glyph_rows(c: char) -> Option<[u8; 7]> {
    let rows = match c.to_ascii_uppercase() {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        _ => return None,
    };
    Some(rows)
}

// ═══════════════════════════════════════════════════════════════════════
// RasterPen
// ═══════════════════════════════════════════════════════════════════════

pub struct RasterPen {
    image: GrayImage,
    scale: f64,
    page_height: f64,
    origin_y: f64,
    open_page: Option<u32>,
}

impl RasterPen {
    /// Allocate an image tall enough for every page at the canvas dpi.
    pub fn for_canvas(canvas: &Canvas) -> Result<Self, DrawError> {
        let scale = canvas.dpi as f64 / BASE_DPI;
        let pages = canvas.page_count.max(1) as f64;
        let width = (canvas.page_width * scale).ceil() as u64;
        let height = (canvas.page_height * pages * scale).ceil() as u64;
        if width * height > MAX_RASTER_PIXELS {
            return Err(DrawError(format!(
                "raster of {width}x{height} pixels exceeds the {MAX_RASTER_PIXELS} pixel limit"
            )));
        }
        Ok(Self {
            image: GrayImage::new(width as u32, height as u32, PAPER),
            scale,
            page_height: canvas.page_height,
            origin_y: 0.0,
            open_page: None,
        })
    }

    fn px(&self, x: f64, y: f64) -> (f64, f64) {
        (x * self.scale, (y + self.origin_y) * self.scale)
    }
}

impl Pen for RasterPen {
    fn begin_page(&mut self, number: u32) -> Result<(), DrawError> {
        if let Some(open) = self.open_page {
            return Err(DrawError(format!("page {number} started before page {open} was closed")));
        }
        self.origin_y = (number.max(1) - 1) as f64 * self.page_height;
        if number > 1 {
            // Hairline between stacked pages.
            let (_, y) = self.px(0.0, 0.0);
            let w = self.image.width as f64;
            self.image.fill_rect(0.0, y, w, y + 1.0, PAGE_GAP_COLOR);
        }
        self.open_page = Some(number);
        Ok(())
    }

    fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, width: f64) {
        let (ax, ay) = self.px(x1, y1);
        let (bx, by) = self.px(x2, y2);
        let half = (width * self.scale / 2.0).max(0.5);
        let length = ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt();
        let steps = (length * 2.0).ceil().max(1.0) as u32;
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let (x, y) = (ax + (bx - ax) * t, ay + (by - ay) * t);
            self.image.fill_rect(x - half, y - half, x + half, y + half, INK);
        }
    }

    fn ellipse(&mut self, cx: f64, cy: f64, rx: f64, ry: f64, filled: bool) {
        let (cx, cy) = self.px(cx, cy);
        let (rx, ry) = ((rx * self.scale).max(0.5), (ry * self.scale).max(0.5));
        let stroke = 1.6 * self.scale;
        let (inner_rx, inner_ry) = ((rx - stroke).max(0.0), (ry - stroke).max(0.0));
        for py in (cy - ry).floor() as i64..=(cy + ry).ceil() as i64 {
            for px in (cx - rx).floor() as i64..=(cx + rx).ceil() as i64 {
                let dx = px as f64 + 0.5 - cx;
                let dy = py as f64 + 0.5 - cy;
                let outer = (dx / rx).powi(2) + (dy / ry).powi(2);
                if outer > 1.0 {
                    continue;
                }
                let inside_hole = !filled
                    && inner_rx > 0.0
                    && inner_ry > 0.0
                    && (dx / inner_rx).powi(2) + (dy / inner_ry).powi(2) < 1.0;
                if !inside_hole {
                    self.image.put(px, py, INK);
                }
            }
        }
    }

    fn text(&mut self, x: f64, y: f64, content: &str, size: f64, anchor: TextAnchor) {
        let cell = (size / 7.0) * self.scale; // one font pixel
        let advance = 6.0 * cell;
        let glyphs: Vec<char> = content.chars().collect();
        let total = glyphs.len() as f64 * advance - cell;
        let (mut gx, baseline) = self.px(x, y);
        if anchor == TextAnchor::Middle {
            gx -= total / 2.0;
        }
        let top = baseline - 7.0 * cell;
        for c in glyphs {
            if let Some(rows) = glyph_rows(c) {
                for (r, bits) in rows.iter().enumerate() {
                    for col in 0..5 {
                        if bits & (0x10 >> col) != 0 {
                            let px = gx + col as f64 * cell;
                            let py = top + r as f64 * cell;
                            self.image.fill_rect(px, py, px + cell, py + cell, INK);
                        }
                    }
                }
            }
            gx += advance;
        }
    }

    fn end_page(&mut self) -> Result<(), DrawError> {
        if self.open_page.take().is_none() {
            return Err(DrawError("no page to close".into()));
        }
        Ok(())
    }

    fn finish(self) -> Result<Vec<u8>, DrawError> {
        if let Some(open) = self.open_page {
            return Err(DrawError(format!("page {open} was never closed")));
        }
        encode_png(&self.image)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// PNG encoding
// ═══════════════════════════════════════════════════════════════════════

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Encode a grayscale image as PNG.
pub fn encode_png(image: &GrayImage) -> Result<Vec<u8>, DrawError> {
    let mut out = Vec::with_capacity(image.pixels.len() / 8 + 1024);
    out.extend_from_slice(&PNG_SIGNATURE);

    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&image.width.to_be_bytes());
    ihdr.extend_from_slice(&image.height.to_be_bytes());
    ihdr.extend_from_slice(&[8, 0, 0, 0, 0]); // bit depth 8, grayscale, deflate, no filter, no interlace
    write_chunk(&mut out, b"IHDR", &ihdr);

    // Each scanline is prefixed with filter type 0 (none).
    let row = image.width as usize;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    for line in image.pixels.chunks(row.max(1)) {
        encoder
            .write_all(&[0])
            .and_then(|_| encoder.write_all(line))
            .map_err(|e| DrawError(format!("failed to compress image data: {e}")))?;
    }
    let idat = encoder.finish().map_err(|e| DrawError(format!("failed to compress image data: {e}")))?;
    write_chunk(&mut out, b"IDAT", &idat);
    write_chunk(&mut out, b"IEND", &[]);
    Ok(out)
}

fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    let start = out.len();
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    let crc = crc32fast::hash(&out[start..]);
    out.extend_from_slice(&crc.to_be_bytes());
}
