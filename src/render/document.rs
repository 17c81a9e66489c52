//! Paged document output (PDF 1.4).
//!
//! Each page gets its own content stream. Drawing commands are emitted in
//! page pixels under a transform that flips the y axis and scales pixels
//! (1/96 in) to points (1/72 in).

use std::fmt::Write as _;

use super::glyphs::{Pen, TextAnchor};
use super::Canvas;
use crate::error::DrawError;

const PX_TO_PT: f64 = 0.75;
/// Bezier control distance for a quarter ellipse.
const KAPPA: f64 = 0.552_284_8;
/// Helvetica averages roughly half an em per glyph.
const AVG_GLYPH_WIDTH: f64 = 0.5;

pub struct DocumentPen {
    page_width: f64,
    page_height: f64,
    pages: Vec<String>,
    current: Option<String>,
}

impl DocumentPen {
    pub fn for_canvas(canvas: &Canvas) -> Self {
        Self {
            page_width: canvas.page_width,
            page_height: canvas.page_height,
            pages: Vec::with_capacity(canvas.page_count as usize),
            current: None,
        }
    }

    fn ops(&mut self) -> Option<&mut String> {
        self.current.as_mut()
    }
}

/// Escape a string for a PDF literal. Only ASCII survives the
/// standard font encoding.
fn pdf_string(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for c in content.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

impl Pen for DocumentPen {
    fn begin_page(&mut self, number: u32) -> Result<(), DrawError> {
        if self.current.is_some() {
            return Err(DrawError(format!("page {number} started before the previous page was closed")));
        }
        let mut ops = String::new();
        let _ = writeln!(ops, "{PX_TO_PT} 0 0 -{PX_TO_PT} 0 {:.2} cm", self.page_height * PX_TO_PT);
        ops.push_str("0.1 g 0.1 G 1 J\n");
        self.current = Some(ops);
        Ok(())
    }

    fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, width: f64) {
        if let Some(ops) = self.ops() {
            let _ = writeln!(ops, "{width:.2} w {x1:.2} {y1:.2} m {x2:.2} {y2:.2} l S");
        }
    }

    fn ellipse(&mut self, cx: f64, cy: f64, rx: f64, ry: f64, filled: bool) {
        let Some(ops) = self.ops() else { return };
        let (kx, ky) = (rx * KAPPA, ry * KAPPA);
        let _ = writeln!(ops, "1.6 w {:.2} {:.2} m", cx + rx, cy);
        let _ = writeln!(ops, "{:.2} {:.2} {:.2} {:.2} {:.2} {:.2} c", cx + rx, cy + ky, cx + kx, cy + ry, cx, cy + ry);
        let _ = writeln!(ops, "{:.2} {:.2} {:.2} {:.2} {:.2} {:.2} c", cx - kx, cy + ry, cx - rx, cy + ky, cx - rx, cy);
        let _ = writeln!(ops, "{:.2} {:.2} {:.2} {:.2} {:.2} {:.2} c", cx - rx, cy - ky, cx - kx, cy - ry, cx, cy - ry);
        let _ = writeln!(ops, "{:.2} {:.2} {:.2} {:.2} {:.2} {:.2} c", cx + kx, cy - ry, cx + rx, cy - ky, cx + rx, cy);
        ops.push_str(if filled { "f\n" } else { "S\n" });
    }

    fn text(&mut self, x: f64, y: f64, content: &str, size: f64, anchor: TextAnchor) {
        let Some(ops) = self.ops() else { return };
        let x = match anchor {
            TextAnchor::Start => x,
            TextAnchor::Middle => x - content.chars().count() as f64 * size * AVG_GLYPH_WIDTH / 2.0,
        };
        // Text matrix flips back so glyphs are upright under the page transform.
        let _ = writeln!(
            ops,
            "BT /F1 {size:.1} Tf 1 0 0 -1 {x:.2} {y:.2} Tm ({}) Tj ET",
            pdf_string(content)
        );
    }

    fn end_page(&mut self) -> Result<(), DrawError> {
        let ops = self.current.take().ok_or_else(|| DrawError("no page to close".into()))?;
        self.pages.push(ops);
        Ok(())
    }

    fn finish(self) -> Result<Vec<u8>, DrawError> {
        if self.current.is_some() {
            return Err(DrawError("last page was never closed".into()));
        }
        if self.pages.is_empty() {
            return Err(DrawError("document has no pages".into()));
        }
        Ok(write_pdf(&self.pages, self.page_width * PX_TO_PT, self.page_height * PX_TO_PT))
    }
}

/// Serialize content streams into a PDF file.
///
/// Object layout: 1 catalog, 2 page tree, 3 font, then a page object and
/// its content stream for each page.
fn write_pdf(pages: &[String], width_pt: f64, height_pt: f64) -> Vec<u8> {
    let page_obj = |i: usize| 4 + 2 * i;
    let mut objects: Vec<Vec<u8>> = Vec::with_capacity(3 + 2 * pages.len());

    objects.push(b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());
    let kids: Vec<String> = (0..pages.len()).map(|i| format!("{} 0 R", page_obj(i))).collect();
    objects.push(format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), pages.len()).into_bytes());
    objects.push(b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_vec());

    for (i, content) in pages.iter().enumerate() {
        objects.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {width_pt:.2} {height_pt:.2}] \
                 /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
                page_obj(i) + 1
            )
            .into_bytes(),
        );
        let mut stream = format!("<< /Length {} >>\nstream\n", content.len()).into_bytes();
        stream.extend_from_slice(content.as_bytes());
        stream.extend_from_slice(b"\nendstream");
        objects.push(stream);
    }

    let mut out = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!("trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref}\n%%EOF\n", objects.len() + 1).as_bytes(),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas(pages: u32) -> Canvas {
        Canvas { page_width: 800.0, page_height: 1000.0, page_count: pages, dpi: 96 }
    }

    fn as_text(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    #[test]
    fn one_page_object_per_page() {
        let mut pen = DocumentPen::for_canvas(&canvas(2));
        for n in 1..=2 {
            pen.begin_page(n).unwrap();
            pen.line(0.0, 0.0, 10.0, 10.0, 1.0);
            pen.end_page().unwrap();
        }
        let pdf = as_text(&pen.finish().unwrap());
        assert!(pdf.starts_with("%PDF-1.4"));
        assert!(pdf.contains("/Count 2"));
        assert_eq!(pdf.matches("/Type /Page ").count(), 2);
        assert!(pdf.contains("/MediaBox [0 0 600.00 750.00]"));
        assert!(pdf.trim_end().ends_with("%%EOF"));
    }

    #[test]
    fn xref_offsets_point_at_objects() {
        let mut pen = DocumentPen::for_canvas(&canvas(1));
        pen.begin_page(1).unwrap();
        pen.text(10.0, 10.0, "Title", 12.0, TextAnchor::Start);
        pen.end_page().unwrap();
        let bytes = pen.finish().unwrap();
        // The binary comment line is not UTF-8, so offsets are checked on bytes.
        let tail = as_text(&bytes[bytes.len() - 32..]);
        let xref_at: usize = tail.rsplit("startxref\n").next().unwrap().lines().next().unwrap().parse().unwrap();
        assert!(bytes[xref_at..].starts_with(b"xref"));
        let table = as_text(&bytes[xref_at..]);
        let first_entry = table.lines().nth(3).unwrap();
        let offset: usize = first_entry[..10].parse().unwrap();
        assert!(bytes[offset..].starts_with(b"1 0 obj"));
    }

    #[test]
    fn literal_strings_are_escaped() {
        assert_eq!(pdf_string("a(b)\\c"), "a\\(b\\)\\\\c");
        assert_eq!(pdf_string("café"), "caf?");
    }

    #[test]
    fn empty_document_is_an_error() {
        assert!(DocumentPen::for_canvas(&canvas(0)).finish().is_err());
    }
}
