//! Markdown to PDF rendering for improved CVs.
//!
//! Layout is deliberately plain: one font family, A4, fixed margins, greedy
//! wrapping from static metrics, new page when the cursor reaches the
//! bottom margin.

pub mod font_metrics;
pub mod markdown;
pub mod pdf;

use font_metrics::Font;
use markdown::{parse_blocks, Block};
use pdf::{write_pdf, TextLine, A4_HEIGHT_PT, A4_WIDTH_PT};

const MARGIN_PT: f32 = 56.0;
const BODY_SIZE_PT: f32 = 10.5;
const LINE_HEIGHT: f32 = 1.35;
const BULLET_INDENT_PT: f32 = 14.0;
const BLOCK_GAP_PT: f32 = 4.0;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("document has no printable content")]
    EmptyDocument,
}

pub fn render_markdown_pdf(markdown: &str) -> Result<Vec<u8>, RenderError> {
    let blocks = parse_blocks(markdown);
    if blocks.iter().all(|b| matches!(b, Block::Rule)) {
        return Err(RenderError::EmptyDocument);
    }

    let mut layout = PageLayout::new();
    for block in &blocks {
        match block {
            Block::Heading { level, text } => {
                let size = match level {
                    1 => 18.0,
                    2 => 13.5,
                    _ => 11.5,
                };
                layout.gap(if *level == 1 { 0.0 } else { BLOCK_GAP_PT * 2.0 });
                layout.paragraph(text, Font::Bold, size, 0.0, None);
            }
            Block::Bullet(text) => {
                layout.paragraph(text, Font::Regular, BODY_SIZE_PT, BULLET_INDENT_PT, Some("\u{2022}"));
            }
            Block::Paragraph(text) => {
                layout.paragraph(text, Font::Regular, BODY_SIZE_PT, 0.0, None);
                layout.gap(BLOCK_GAP_PT);
            }
            Block::Rule => layout.gap(BLOCK_GAP_PT * 2.0),
        }
    }

    Ok(write_pdf(&layout.finish()))
}

struct PageLayout {
    pages: Vec<Vec<TextLine>>,
    current: Vec<TextLine>,
    cursor_y: f32,
}

impl PageLayout {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: Vec::new(),
            cursor_y: A4_HEIGHT_PT - MARGIN_PT,
        }
    }

    fn text_width() -> f32 {
        A4_WIDTH_PT - 2.0 * MARGIN_PT
    }

    fn gap(&mut self, pt: f32) {
        if !self.current.is_empty() {
            self.cursor_y -= pt;
        }
    }

    fn paragraph(&mut self, text: &str, font: Font, size: f32, indent: f32, marker: Option<&str>) {
        let width_em = (Self::text_width() - indent) / size;
        for (i, line) in font.metrics().wrap(text, width_em).into_iter().enumerate() {
            self.line(font, size, MARGIN_PT + indent, line);
            if i == 0 {
                if let Some(marker) = marker {
                    let y = self.cursor_y + size * LINE_HEIGHT;
                    self.current.push(TextLine {
                        font,
                        size_pt: size,
                        x: MARGIN_PT + indent / 3.0,
                        y: y - size,
                        text: marker.to_string(),
                    });
                }
            }
        }
    }

    fn line(&mut self, font: Font, size: f32, x: f32, text: String) {
        let advance = size * LINE_HEIGHT;
        if self.cursor_y - advance < MARGIN_PT {
            self.pages.push(std::mem::take(&mut self.current));
            self.cursor_y = A4_HEIGHT_PT - MARGIN_PT;
        }
        self.current.push(TextLine {
            font,
            size_pt: size,
            x,
            y: self.cursor_y - size,
            text,
        });
        self.cursor_y -= advance;
    }

    fn finish(mut self) -> Vec<Vec<TextLine>> {
        if !self.current.is_empty() {
            self.pages.push(self.current);
        }
        self.pages
    }
}
