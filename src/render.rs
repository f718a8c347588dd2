//! Renderer - one spread in, one single-page PDF out
//!
//! Draws the previous stage's image, the ladder chrome and static text,
//! adds one AcroForm widget per field and writes the page's provenance
//! twice as hidden text.

use chrono::Utc;
use pdf_writer::types::{AnnotationFlags, FieldFlags, FieldType, TextRenderingMode};
use pdf_writer::{Content, Filter, Name, Pdf, Rect as PdfRect, Ref, Str, TextStr};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::codec::{CodecError, ProvenanceCodec};
use crate::geometry::{Dimension, Rect};
use crate::pagedata::{Comment, PageData};
use crate::properties::Align;
use crate::spread::Spread;

const FONT: Name<'static> = Name(b"Helv");
const FIELD_APPEARANCE: &[u8] = b"/Helv 10 Tf 0 g";
const COMMENT_FONT_SIZE: f32 = 8.0;
const COMMENT_ROW_HEIGHT: f32 = COMMENT_FONT_SIZE * 1.4;
const COMMENT_MARGIN: f32 = 4.0;
const MARKER_FONT_SIZE: f32 = 6.0;
const HIDDEN_FONT_SIZE: f32 = 0.1;
/// Rough Helvetica advance, for alignment only
const AVERAGE_GLYPH_WIDTH: f32 = 0.5;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Cannot read image asset {}: {source}", path.display())]
    AssetRead { path: PathBuf, source: std::io::Error },

    #[error("Cannot decode image asset {}: {source}", path.display())]
    AssetDecode { path: PathBuf, source: image::ImageError },

    #[error("Cannot create field {id:?}: {reason}")]
    Field { id: String, reason: String },

    #[error("Cannot encode page data: {0}")]
    Encode(#[from] CodecError),
}

/// Per-page inputs that are not part of the template.
#[derive(Debug, Clone, Default)]
pub struct DynamicContent {
    /// field id -> value, overriding the template prefill
    pub prefills: HashMap<String, String>,
    /// field id -> options, overriding the template list
    pub choices: HashMap<String, Vec<String>>,
    /// new comments for this page
    pub comments: Vec<Comment>,
    pub page_data: PageData,
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub bytes: Vec<u8>,
    pub dim: Dimension,
    /// The history embedded in `bytes`
    pub page_data: PageData,
}

impl RenderedPage {
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        fs::write(path, &self.bytes)
    }
}

struct Refs(i32);

impl Refs {
    fn next(&mut self) -> Ref {
        let r = Ref::new(self.0);
        self.0 += 1;
        r
    }
}

/// Latin-1 bytes for the standard font; anything else becomes `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

pub struct Renderer {
    codec: Arc<ProvenanceCodec>,
}

struct Page<'s> {
    spread: &'s Spread,
    height: f32,
    content: Content,
    x_objects: Vec<(String, Ref)>,
    embedded: HashMap<PathBuf, String>,
}

impl<'s> Page<'s> {
    /// PDF user-space rectangle (bottom-up) for a page rectangle (top-down).
    fn flip(&self, rect: Rect) -> (f32, f32, f32, f32) {
        let w = rect.dim.width as f32;
        let h = rect.dim.height as f32;
        (rect.corner.x as f32, self.height - rect.corner.y as f32 - h, w, h)
    }

    fn draw_image(
        &mut self,
        pdf: &mut Pdf,
        refs: &mut Refs,
        path: &Path,
        rect: Rect,
    ) -> Result<(), RenderError> {
        let name = match self.embedded.get(path) {
            Some(name) => name.clone(),
            None => {
                let xobj = embed_image(pdf, refs, path)?;
                let name = format!("Im{}", self.x_objects.len() + 1);
                self.x_objects.push((name.clone(), xobj));
                self.embedded.insert(path.to_path_buf(), name.clone());
                name
            }
        };
        let (x, y, w, h) = self.flip(rect);
        self.content
            .save_state()
            .transform([w, 0.0, 0.0, h, x, y])
            .x_object(Name(name.as_bytes()))
            .restore_state();
        Ok(())
    }

    fn draw_text(&mut self, x: f32, y: f32, size: f32, text: &str) {
        self.content
            .begin_text()
            .set_font(FONT, size)
            .next_line(x, y)
            .show(Str(&win_ansi(text)))
            .end_text();
    }

    fn draw_prefills(&mut self) {
        let spread = self.spread;
        for prefill in &spread.prefills {
            let style = &prefill.paragraph.style;
            let size = style.font_size as f32;
            let (x, y, w, h) = self.flip(spread.place(prefill.rect));
            let glyphs = prefill.paragraph.text.chars().count() as f32;
            let text_width = glyphs * size * AVERAGE_GLYPH_WIDTH;
            let x = match style.align {
                Align::Left => x,
                Align::Center => x + (w - text_width) / 2.0,
                Align::Right => x + w - text_width,
            };
            let [r, g, b] = style.color;
            self.content.save_state().set_fill_rgb(r, g, b);
            self.draw_text(x, y + h - size, size, &prefill.paragraph.text);
            self.content.restore_state();
        }
    }

    /// Rows stack upwards from the bottom margin, above the rows of earlier
    /// passes; each comment also gets its label at its own position.
    fn draw_comments(&mut self, earlier: usize, comments: &[Comment]) {
        self.content.save_state().set_fill_rgb(0.8, 0.0, 0.0);
        for (i, comment) in comments.iter().enumerate() {
            let row = (earlier + i) as f32;
            let y = COMMENT_MARGIN + row * COMMENT_ROW_HEIGHT;
            let row_text = format!("{}: {}", comment.label, comment.text);
            self.draw_text(COMMENT_MARGIN, y, COMMENT_FONT_SIZE, &row_text);

            let marker_y = self.height - comment.position.y as f32;
            let marker = format!("[{}]", comment.label);
            self.draw_text(comment.position.x as f32, marker_y, MARKER_FONT_SIZE, &marker);
        }
        self.content.restore_state();
    }

    /// One copy off the media box, one on the page at negligible size; both
    /// invisible.
    fn draw_provenance(&mut self, encoded: &str) {
        let width = self.spread.dim.width as f32;
        self.content.save_state();
        for (x, y, size) in [(-width - 100.0, 0.0, 1.0), (1.0, 1.0, HIDDEN_FONT_SIZE)] {
            self.content
                .begin_text()
                .set_text_rendering_mode(TextRenderingMode::Invisible)
                .set_font(FONT, size)
                .next_line(x, y)
                .show(Str(encoded.as_bytes()))
                .end_text();
        }
        self.content.restore_state();
    }
}

fn embed_image(pdf: &mut Pdf, refs: &mut Refs, path: &Path) -> Result<Ref, RenderError> {
    let data = fs::read(path)
        .map_err(|source| RenderError::AssetRead { path: path.to_path_buf(), source })?;
    let decode_err = |source| RenderError::AssetDecode { path: path.to_path_buf(), source };
    let format = image::guess_format(&data).map_err(decode_err)?;
    let decoded = image::load_from_memory_with_format(&data, format).map_err(decode_err)?;
    let (width, height) = (decoded.width() as i32, decoded.height() as i32);
    let xobj_ref = refs.next();

    // scans are mostly JPEG already; pass those through untouched
    if format == image::ImageFormat::Jpeg {
        let gray = matches!(decoded.color(), image::ColorType::L8);
        if gray || matches!(decoded.color(), image::ColorType::Rgb8) {
            let mut xobj = pdf.image_xobject(xobj_ref, &data);
            xobj.filter(Filter::DctDecode);
            xobj.width(width);
            xobj.height(height);
            if gray {
                xobj.color_space().device_gray();
            } else {
                xobj.color_space().device_rgb();
            }
            xobj.bits_per_component(8);
            return Ok(xobj_ref);
        }
    }

    let rgba = decoded.to_rgba8();
    let rgb: Vec<u8> = rgba.pixels().flat_map(|p| [p.0[0], p.0[1], p.0[2]]).collect();
    let smask = if rgba.pixels().any(|p| p.0[3] < 255) {
        let alpha: Vec<u8> = rgba.pixels().map(|p| p.0[3]).collect();
        let compressed = miniz_oxide::deflate::compress_to_vec_zlib(&alpha, 6);
        let mask_ref = refs.next();
        let mut mask = pdf.image_xobject(mask_ref, &compressed);
        mask.filter(Filter::FlateDecode);
        mask.width(width);
        mask.height(height);
        mask.color_space().device_gray();
        mask.bits_per_component(8);
        Some(mask_ref)
    } else {
        None
    };

    let compressed = miniz_oxide::deflate::compress_to_vec_zlib(&rgb, 6);
    let mut xobj = pdf.image_xobject(xobj_ref, &compressed);
    xobj.filter(Filter::FlateDecode);
    xobj.width(width);
    xobj.height(height);
    xobj.color_space().device_rgb();
    xobj.bits_per_component(8);
    if let Some(mask_ref) = smask {
        xobj.s_mask(mask_ref);
    }
    Ok(xobj_ref)
}

fn check_field(id: &str, rect: &Rect, seen: &mut HashSet<String>) -> Result<(), RenderError> {
    let reason = if id.is_empty() {
        Some("empty field name")
    } else if !rect.is_finite() || rect.dim.width <= 0.0 || rect.dim.height <= 0.0 {
        Some("degenerate rectangle")
    } else if !seen.insert(id.to_string()) {
        Some("duplicate field name on page")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(RenderError::Field { id: id.to_string(), reason: reason.to_string() }),
        None => Ok(()),
    }
}

impl Renderer {
    pub fn new(codec: Arc<ProvenanceCodec>) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &ProvenanceCodec {
        &self.codec
    }

    pub fn render(
        &self,
        spread: &Spread,
        dynamic: DynamicContent,
    ) -> Result<RenderedPage, RenderError> {
        let DynamicContent { prefills, choices, comments, mut page_data } = dynamic;

        let mut pdf = Pdf::new();
        let mut refs = Refs(1);
        let catalog_id = refs.next();
        let pages_id = refs.next();
        let page_id = refs.next();
        let content_id = refs.next();
        let font_id = refs.next();

        let mut page = Page {
            spread,
            height: spread.dim.height as f32,
            content: Content::new(),
            x_objects: Vec::new(),
            embedded: HashMap::new(),
        };

        if let Some(previous) = &spread.previous {
            page.draw_image(&mut pdf, &mut refs, &previous.filename, previous.rect())?;
        }
        for chrome in &spread.images {
            page.draw_image(&mut pdf, &mut refs, &chrome.filename, spread.place(chrome.rect()))?;
        }
        page.draw_prefills();

        let earlier = page_data.current.comments.len();
        let comments: Vec<Comment> = comments
            .into_iter()
            .enumerate()
            .map(|(i, mut c)| {
                if c.label.is_empty() {
                    c.label = (earlier + i + 1).to_string();
                }
                c
            })
            .collect();
        page.draw_comments(earlier, &comments);
        page_data.current.comments.extend(comments);

        self.codec.prune(&mut page_data, Utc::now());
        let encoded = self.codec.encode(&page_data)?;
        page.draw_provenance(&encoded);

        let mut seen = HashSet::new();
        let mut widgets = Vec::new();
        for tf in spread.fields_in_tab_order() {
            let rect = spread.place(tf.rect);
            check_field(&tf.id, &rect, &mut seen)?;
            let value = prefills.get(&tf.id).unwrap_or(&tf.prefill);
            let widget_id = refs.next();
            let mut field = pdf.form_field(widget_id);
            field.partial_name(TextStr(&tf.id)).field_type(FieldType::Text);
            if !value.is_empty() {
                field.text_value(TextStr(value));
            }
            field.vartext_default_appearance(Str(FIELD_APPEARANCE));
            let (x, y, w, h) = page.flip(rect);
            let mut annot = field.into_annotation();
            annot.rect(PdfRect::new(x, y, x + w, y + h)).flags(AnnotationFlags::PRINT);
            annot.pair(Name(b"P"), page_id);
            widgets.push(widget_id);
        }

        for cb in &spread.combo_boxes {
            let rect = spread.place(cb.rect);
            check_field(&cb.id, &rect, &mut seen)?;
            let options = choices.get(&cb.id).unwrap_or(&cb.options);
            let widget_id = refs.next();
            let mut field = pdf.form_field(widget_id);
            field
                .partial_name(TextStr(&cb.id))
                .field_type(FieldType::Choice)
                .field_flags(FieldFlags::COMBO | FieldFlags::EDIT);
            {
                let mut list = field.choice_options();
                for option in options {
                    list.option(TextStr(option));
                }
            }
            if let Some(value) = prefills.get(&cb.id) {
                field.choice_value(Some(TextStr(value)));
            }
            field.vartext_default_appearance(Str(FIELD_APPEARANCE));
            let (x, y, w, h) = page.flip(rect);
            let mut annot = field.into_annotation();
            annot.rect(PdfRect::new(x, y, x + w, y + h)).flags(AnnotationFlags::PRINT);
            annot.pair(Name(b"P"), page_id);
            widgets.push(widget_id);
        }

        pdf.type1_font(font_id)
            .base_font(Name(b"Helvetica"))
            .pair(Name(b"Encoding"), Name(b"WinAnsiEncoding"));

        let Page { content, x_objects, .. } = page;
        let raw = content.finish();
        let compressed = miniz_oxide::deflate::compress_to_vec_zlib(&raw, 6);
        pdf.stream(content_id, &compressed).filter(Filter::FlateDecode);

        {
            let mut catalog = pdf.catalog(catalog_id);
            catalog.pages(pages_id);
            if !widgets.is_empty() {
                let mut form = catalog.form();
                form.fields(widgets.iter().copied());
                form.pair(Name(b"NeedAppearances"), true);
                form.pair(Name(b"DA"), Str(FIELD_APPEARANCE));
                form.insert(Name(b"DR")).dict().insert(Name(b"Font")).dict().pair(FONT, font_id);
            }
        }
        pdf.pages(pages_id).kids([page_id]).count(1);

        let dim = spread.dim;
        {
            let mut pdf_page = pdf.page(page_id);
            pdf_page
                .media_box(PdfRect::new(0.0, 0.0, dim.width as f32, dim.height as f32))
                .parent(pages_id)
                .contents(content_id);
            if !widgets.is_empty() {
                pdf_page.annotations(widgets.iter().copied());
            }
            let mut resources = pdf_page.resources();
            resources.fonts().pair(FONT, font_id);
            if !x_objects.is_empty() {
                let mut xobjects = resources.x_objects();
                for (name, xobj) in &x_objects {
                    xobjects.pair(Name(name.as_bytes()), *xobj);
                }
            }
        }

        tracing::debug!(
            spread = %spread.name,
            fields = widgets.len(),
            images = x_objects.len(),
            page = %page_data.current.uuid,
            "rendered page"
        );
        Ok(RenderedPage { bytes: pdf.finish(), dim, page_data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use crate::pagedata::{FileDetail, ItemDetail, PageDetail, ProcessDetail};
    use crate::spread::ImageInsert;
    use crate::templates::{ComboBox, TextField};

    fn spread(dir: &Path) -> Spread {
        let chrome = dir.join("chrome.png");
        image::RgbaImage::from_pixel(10, 10, image::Rgba([0, 0, 0, 128])).save(&chrome).unwrap();
        Spread {
            name: "mark".into(),
            dim: Dimension::fixed(300.0, 400.0),
            extra_width: 0.0,
            dynamic_from_x: None,
            previous: None,
            images: vec![ImageInsert { filename: chrome, corner: Point::new(5.0, 5.0), dim: Dimension::fixed(50.0, 50.0) }],
            text_fields: vec![
                TextField { rect: Rect::new(15.0, 15.0, 20.0, 20.0), id: "page-ok-2".into(), prefill: String::new(), tab_order: 2 },
                TextField { rect: Rect::new(15.0, 40.0, 20.0, 20.0), id: "page-bad-1".into(), prefill: "x".into(), tab_order: 1 },
            ],
            prefills: Vec::new(),
            combo_boxes: vec![ComboBox {
                rect: Rect::new(15.0, 70.0, 40.0, 12.0),
                id: "grade".into(),
                properties: String::new(),
                options: vec!["A".into(), "B".into()],
            }],
            ladders: vec!["mark-sidebar".into()],
        }
    }

    fn page_data() -> PageData {
        let own = FileDetail { path: "s.pdf".into(), uuid: "f".into(), number: 1, of: 1 };
        PageData::new(PageDetail::root(ProcessDetail::new("mark", "m", "", ""), own, ItemDetail::default()))
    }

    #[test]
    fn test_win_ansi_replaces_wide_chars() {
        assert_eq!(win_ansi("a\u{e9}\u{2713}"), vec![b'a', 0xe9, b'?']);
    }

    #[test]
    fn test_check_field_rules() {
        let mut seen = HashSet::new();
        assert!(check_field("a", &Rect::new(0.0, 0.0, 1.0, 1.0), &mut seen).is_ok());
        assert!(check_field("a", &Rect::new(0.0, 0.0, 1.0, 1.0), &mut seen).is_err());
        assert!(check_field("b", &Rect::new(0.0, 0.0, 0.0, 1.0), &mut seen).is_err());
        assert!(check_field("", &Rect::new(0.0, 0.0, 1.0, 1.0), &mut seen).is_err());
    }

    #[test]
    fn test_render_appends_comments_to_history() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Renderer::new(Arc::new(ProvenanceCodec::default()));
        let mut data = page_data();
        data.current.comments.push(Comment { text: "earlier".into(), label: "1".into(), ..Default::default() });
        let dynamic = DynamicContent {
            comments: vec![Comment { position: Point::new(100.0, 100.0), text: "check total".into(), ..Default::default() }],
            page_data: data,
            ..Default::default()
        };

        let page = renderer.render(&spread(dir.path()), dynamic).unwrap();
        assert!(page.bytes.starts_with(b"%PDF"));
        assert_eq!(page.page_data.current.comments.len(), 2);
        assert_eq!(page.page_data.current.comments[1].label, "2");
    }

    #[test]
    fn test_missing_asset_names_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = spread(dir.path());
        s.images[0].filename = dir.path().join("gone.png");
        let renderer = Renderer::new(Arc::new(ProvenanceCodec::default()));
        let dynamic = DynamicContent { page_data: page_data(), ..Default::default() };
        match renderer.render(&s, dynamic) {
            Err(RenderError::AssetRead { path, .. }) => assert!(path.ends_with("gone.png")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_field_is_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = spread(dir.path());
        s.combo_boxes[0].id = "page-ok-2".into();
        let renderer = Renderer::new(Arc::new(ProvenanceCodec::default()));
        let dynamic = DynamicContent { page_data: page_data(), ..Default::default() };
        assert!(matches!(renderer.render(&s, dynamic), Err(RenderError::Field { .. })));
    }
}
