//! SVG builder — accumulates SVG elements and produces the final string.
//!
//! Pages are stacked top to bottom in one document, each in its own
//! translated group.

use super::glyphs::{Pen, TextAnchor, NOTEHEAD_RX};
use super::Canvas;
use crate::error::DrawError;

const NOTE_COLOR: &str = "#1a1a1a";
const PAGE_COLOR: &str = "white";
/// Vertical gap between stacked pages.
pub(super) const PAGE_GAP: f64 = 20.0;

// ═══════════════════════════════════════════════════════════════════════
// SvgBuilder
// ═══════════════════════════════════════════════════════════════════════

pub struct SvgBuilder {
    elements: Vec<String>,
    width: f64,
    height: f64,
    page_height: f64,
    open_page: Option<u32>,
}

impl SvgBuilder {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            elements: Vec::new(),
            width,
            height,
            page_height: height,
            open_page: None,
        }
    }

    /// Size the document to hold every page of the canvas.
    pub fn for_canvas(canvas: &Canvas) -> Self {
        let pages = canvas.page_count.max(1) as f64;
        let height = pages * canvas.page_height + (pages - 1.0) * PAGE_GAP;
        Self {
            page_height: canvas.page_height,
            ..Self::new(canvas.page_width, height)
        }
    }

    pub fn build(self) -> String {
        let mut svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="{}" height="{}" style="font-family: 'Georgia', 'Times New Roman', serif;">"#,
            self.width, self.height, self.width, self.height
        );
        svg.push('\n');
        for el in &self.elements {
            svg.push_str("  ");
            svg.push_str(el);
            svg.push('\n');
        }
        svg.push_str("</svg>\n");
        svg
    }

    fn rect(&mut self, x: f64, y: f64, w: f64, h: f64, fill: &str) {
        self.elements.push(format!(
            r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"/>"#,
            x, y, w, h, fill
        ));
    }
}

fn escape(content: &str) -> String {
    content
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

impl Pen for SvgBuilder {
    fn begin_page(&mut self, number: u32) -> Result<(), DrawError> {
        if let Some(open) = self.open_page {
            return Err(DrawError(format!("page {number} started before page {open} was closed")));
        }
        let offset = (number.max(1) - 1) as f64 * (self.page_height + PAGE_GAP);
        self.elements.push(format!(
            r#"<g class="page" data-page="{}" transform="translate(0,{:.1})">"#,
            number, offset
        ));
        self.rect(0.0, 0.0, self.width, self.page_height, PAGE_COLOR);
        self.open_page = Some(number);
        Ok(())
    }

    fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, width: f64) {
        self.elements.push(format!(
            r#"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="{}" stroke-width="{:.1}" stroke-linecap="round"/>"#,
            x1, y1, x2, y2, NOTE_COLOR, width
        ));
    }

    fn ellipse(&mut self, cx: f64, cy: f64, rx: f64, ry: f64, filled: bool) {
        // Noteheads are tilted; other ellipses are drawn upright.
        let tilt = if rx == NOTEHEAD_RX {
            format!(r#" transform="rotate(-15,{:.1},{:.1})""#, cx, cy)
        } else {
            String::new()
        };
        if filled {
            self.elements.push(format!(
                r#"<ellipse cx="{:.1}" cy="{:.1}" rx="{:.1}" ry="{:.1}" fill="{}" stroke="none"{}/>"#,
                cx, cy, rx, ry, NOTE_COLOR, tilt
            ));
        } else {
            let sw = 1.6;
            self.elements.push(format!(
                r#"<ellipse cx="{:.1}" cy="{:.1}" rx="{:.1}" ry="{:.1}" fill="none" stroke="{}" stroke-width="{:.1}"{}/>"#,
                cx, cy, rx - sw / 2.0, ry - sw / 2.0, NOTE_COLOR, sw, tilt
            ));
        }
    }

    fn text(&mut self, x: f64, y: f64, content: &str, size: f64, anchor: TextAnchor) {
        let anchor = match anchor {
            TextAnchor::Start => "start",
            TextAnchor::Middle => "middle",
        };
        self.elements.push(format!(
            r#"<text x="{:.1}" y="{:.1}" font-size="{:.0}" fill="{}" text-anchor="{}">{}</text>"#,
            x, y, size, NOTE_COLOR, anchor, escape(content)
        ));
    }

    fn end_page(&mut self) -> Result<(), DrawError> {
        if self.open_page.take().is_none() {
            return Err(DrawError("no page to close".into()));
        }
        self.elements.push("</g>".into());
        Ok(())
    }

    fn finish(self) -> Result<Vec<u8>, DrawError> {
        if let Some(open) = self.open_page {
            return Err(DrawError(format!("page {open} was never closed")));
        }
        Ok(self.build().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_stack_with_gap() {
        let canvas = Canvas { page_width: 400.0, page_height: 300.0, page_count: 2, dpi: 96 };
        let mut svg = SvgBuilder::for_canvas(&canvas);
        svg.begin_page(1).unwrap();
        svg.end_page().unwrap();
        svg.begin_page(2).unwrap();
        svg.end_page().unwrap();
        let out = String::from_utf8(svg.finish().unwrap()).unwrap();
        assert!(out.contains(r#"viewBox="0 0 400 620""#));
        assert!(out.contains(r#"transform="translate(0,320.0)""#));
    }

    #[test]
    fn text_is_escaped() {
        let mut svg = SvgBuilder::new(100.0, 100.0);
        svg.begin_page(1).unwrap();
        svg.text(0.0, 0.0, "Rock & <Roll>", 12.0, TextAnchor::Start);
        svg.end_page().unwrap();
        let out = String::from_utf8(svg.finish().unwrap()).unwrap();
        assert!(out.contains("Rock &amp; &lt;Roll&gt;"));
    }

    #[test]
    fn unbalanced_pages_fail() {
        let mut svg = SvgBuilder::new(100.0, 100.0);
        svg.begin_page(1).unwrap();
        assert!(svg.begin_page(2).is_err());
        assert!(svg.finish().is_err());
    }
}
