//! Spread Assembly - one layout + one stage = one render-ready page
//!
//! A spread gathers every ladder whose layout key mentions the spread name,
//! translates their fields into page space and sizes the slot that holds
//! the previous stage's image.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::geometry::{Dimension, Point, Rect};
use crate::templates::{ComboBox, Layout, TemplateError, TemplateRegistry, TextField, TextPrefill};

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("Layout {layout:?} has no page size for spread {spread:?}")]
    MissingPageSize { layout: String, spread: String },

    #[error("Spread {spread:?} cannot load ladder {ladder:?}: {source}")]
    Ladder { spread: String, ladder: String, source: TemplateError },

    #[error("Cannot read previous image {}: {source}", path.display())]
    PreviousImage { path: PathBuf, source: image::ImageError },

    #[error("Previous image {} has no pixels", path.display())]
    EmptyImage { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageInsert {
    pub filename: PathBuf,
    pub corner: Point,
    pub dim: Dimension,
}

impl ImageInsert {
    pub fn rect(&self) -> Rect {
        Rect { corner: self.corner, dim: self.dim }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spread {
    pub name: String,
    /// Final page size, including `extra_width`
    pub dim: Dimension,
    pub extra_width: f64,
    /// Left edge of the region pushed right by `extra_width`
    pub dynamic_from_x: Option<f64>,
    /// The previous stage's output; never shifted
    pub previous: Option<ImageInsert>,
    /// Ladder chrome
    pub images: Vec<ImageInsert>,
    pub text_fields: Vec<TextField>,
    pub prefills: Vec<TextPrefill>,
    pub combo_boxes: Vec<ComboBox>,
    pub ladders: Vec<String>,
}

impl Spread {
    pub fn in_dynamic_region(&self, corner: Point) -> bool {
        self.extra_width > 0.0 && self.dynamic_from_x.is_some_and(|x| corner.x >= x)
    }

    /// Where an authored rectangle ends up on the widened page.
    pub fn place(&self, rect: Rect) -> Rect {
        if self.in_dynamic_region(rect.corner) {
            rect.translate(Point::new(self.extra_width, 0.0))
        } else {
            rect
        }
    }

    /// Text fields in visiting order; ties keep template order.
    pub fn fields_in_tab_order(&self) -> Vec<&TextField> {
        let mut fields: Vec<&TextField> = self.text_fields.iter().collect();
        fields.sort_by_key(|f| f.tab_order);
        fields
    }
}

/// Whether a layout key takes part in a spread. Matching is by substring,
/// so `mark` selects both `mark-header` and `mark-sidebar`.
pub fn spread_matches(key: &str, spread_name: &str) -> bool {
    !spread_name.is_empty() && key.contains(spread_name)
}

/// Layout key of the slot holding the previous stage's image.
pub fn previous_image_key(spread_name: &str) -> String {
    format!("previous-{spread_name}")
}

/// Size a `width_px` x `height_px` image for `slot`.
///
/// Dynamic slots take the slot height and whatever width follows from the
/// aspect ratio. Static slots fit inside the box: height first, width if
/// height-fitting would overflow.
pub fn scale_into(width_px: u32, height_px: u32, slot: Dimension, dynamic: bool) -> Dimension {
    let aspect = f64::from(width_px) / f64::from(height_px);
    let height_fit = slot.height * aspect;
    if dynamic || height_fit <= slot.width {
        Dimension { width: height_fit, height: slot.height, dynamic_width: dynamic }
    } else {
        Dimension::fixed(slot.width, slot.width / aspect)
    }
}

pub struct SpreadAssembler {
    registry: Arc<TemplateRegistry>,
}

impl SpreadAssembler {
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    fn sibling(base_dir: &Path, basename: &str, extension: &str) -> PathBuf {
        let mut path = base_dir.join(basename);
        if path.extension().is_none() {
            path.set_extension(extension);
        }
        path
    }

    pub fn assemble(
        &self,
        layout: &Layout,
        base_dir: &Path,
        spread_name: &str,
        previous_image: Option<&Path>,
    ) -> Result<Spread, AssemblyError> {
        let page = layout.page_dims.get(spread_name).copied().ok_or_else(|| {
            AssemblyError::MissingPageSize {
                layout: layout.id.clone(),
                spread: spread_name.to_string(),
            }
        })?;
        let config = self.registry.config();

        let mut spread = Spread {
            name: spread_name.to_string(),
            dim: page,
            extra_width: 0.0,
            dynamic_from_x: None,
            previous: None,
            images: Vec::new(),
            text_fields: Vec::new(),
            prefills: Vec::new(),
            combo_boxes: Vec::new(),
            ladders: Vec::new(),
        };

        let ladders = layout.filenames.iter().filter(|(k, _)| spread_matches(k, spread_name));
        for (key, basename) in ladders {
            let path = Self::sibling(base_dir, basename, &config.ladder_extension);
            let ladder = self.registry.load_ladder(&path).map_err(|source| AssemblyError::Ladder {
                spread: spread_name.to_string(),
                ladder: key.clone(),
                source,
            })?;
            // unanchored ladders sit at the page origin
            let offset = layout.anchors.get(key).copied().unwrap_or_default();

            spread.text_fields.extend(ladder.text_fields.iter().map(|tf| TextField {
                rect: tf.rect.translate(offset),
                ..tf.clone()
            }));
            spread.prefills.extend(ladder.prefills.iter().map(|p| TextPrefill {
                rect: p.rect.translate(offset),
                ..p.clone()
            }));
            spread.combo_boxes.extend(ladder.combo_boxes.iter().map(|c| ComboBox {
                rect: c.rect.translate(offset),
                ..c.clone()
            }));
            spread.images.push(ImageInsert {
                filename: path.with_extension(&config.chrome_extension),
                corner: offset.offset_from(ladder.anchor),
                dim: ladder.dim,
            });
            spread.ladders.push(key.clone());
        }

        if let Some(path) = previous_image {
            let (width_px, height_px) = image::image_dimensions(path).map_err(|source| {
                AssemblyError::PreviousImage { path: path.to_path_buf(), source }
            })?;
            if width_px == 0 || height_px == 0 {
                return Err(AssemblyError::EmptyImage { path: path.to_path_buf() });
            }

            let key = previous_image_key(spread_name);
            let slot = layout.image_dims.get(&key).copied().unwrap_or(page);
            let dynamic = page.dynamic_width || slot.dynamic_width;
            let corner = layout.anchors.get(&key).copied().unwrap_or_default();
            let dim = scale_into(width_px, height_px, slot, dynamic);

            if dynamic {
                spread.extra_width = dim.width;
                spread.dynamic_from_x = Some(corner.x);
                spread.dim = Dimension { dynamic_width: true, ..page.widen(dim.width) };
            }
            spread.previous = Some(ImageInsert { filename: path.to_path_buf(), corner, dim });
        }

        tracing::debug!(
            spread = spread_name,
            ladders = spread.ladders.len(),
            text_fields = spread.text_fields.len(),
            extra_width = spread.extra_width,
            "assembled spread"
        );
        Ok(spread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::parse_layout;
    use std::fs;

    const LAYOUT: &str = r#"<svg xmlns="http://www.w3.org/2000/svg"
        xmlns:inkscape="http://www.inkscape.org/namespaces/inkscape"
        width="300pt" height="400pt" id="mark-layout">
      <g inkscape:label="anchors">
        <circle cx="5" cy="5" r="1"><title>mark-sidebar</title><desc>sidebar</desc></circle>
        <circle cx="0" cy="0" r="1"><title>previous-mark</title></circle>
      </g>
      <g inkscape:label="pages">
        <rect width="300" height="400"><title>dynamic-mark</title></rect>
        <rect width="300" height="400"><title>static-check</title></rect>
      </g>
      <g inkscape:label="images">
        <rect width="200" height="100"><title>previous-check</title></rect>
      </g>
    </svg>"#;

    const SIDEBAR: &str = r#"<svg xmlns="http://www.w3.org/2000/svg"
        xmlns:inkscape="http://www.inkscape.org/namespaces/inkscape"
        width="50pt" height="400pt" id="sidebar">
      <g inkscape:label="textfields">
        <rect x="10" y="10" width="20" height="20"><title>page-ok</title></rect>
      </g>
    </svg>"#;

    fn fixture() -> (tempfile::TempDir, Layout, SpreadAssembler) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sidebar.svg"), SIDEBAR).unwrap();
        let registry = Arc::new(TemplateRegistry::default());
        let layout = parse_layout(LAYOUT.as_bytes(), registry.config()).unwrap();
        (dir, layout, SpreadAssembler::new(registry))
    }

    #[test]
    fn test_spread_matches_substring() {
        assert!(spread_matches("mark-header", "mark"));
        assert!(!spread_matches("check-header", "moderate"));
        assert!(!spread_matches("check-header", "mark"));
        assert!(!spread_matches("anything", ""));
    }

    #[test]
    fn test_spread_name_inside_other_word_also_matches() {
        assert!(spread_matches("remark-notes", "mark"));
    }

    #[test]
    fn test_scale_static_prefers_height() {
        let d = scale_into(100, 200, Dimension::fixed(200.0, 100.0), false);
        assert_eq!((d.width, d.height), (50.0, 100.0));
    }

    #[test]
    fn test_scale_static_falls_back_to_width() {
        let d = scale_into(400, 100, Dimension::fixed(200.0, 100.0), false);
        assert_eq!((d.width, d.height), (200.0, 50.0));
    }

    #[test]
    fn test_scale_dynamic_takes_height() {
        let d = scale_into(400, 100, Dimension::fixed(200.0, 100.0), true);
        assert_eq!((d.width, d.height), (400.0, 100.0));
        assert!(d.dynamic_width);
    }

    #[test]
    fn test_missing_page_size_is_fatal() {
        let (dir, layout, assembler) = fixture();
        let err = assembler.assemble(&layout, dir.path(), "moderate", None).unwrap_err();
        assert!(matches!(err, AssemblyError::MissingPageSize { .. }));
    }

    #[test]
    fn test_fields_translated_by_anchor() {
        let (dir, layout, assembler) = fixture();
        let spread = assembler.assemble(&layout, dir.path(), "mark", None).unwrap();
        assert_eq!(spread.ladders, vec!["mark-sidebar"]);
        assert_eq!(spread.text_fields[0].rect.corner, Point::new(15.0, 15.0));
        assert_eq!(spread.images[0].filename, dir.path().join("sidebar.png"));
        assert_eq!(spread.extra_width, 0.0);
        assert_eq!(spread.dim.width, 300.0);
    }

    #[test]
    fn test_dynamic_previous_image_widens_page() {
        let (dir, layout, assembler) = fixture();
        let scan = dir.path().join("scan.png");
        image::RgbImage::new(300, 400).save(&scan).unwrap();

        let spread = assembler.assemble(&layout, dir.path(), "mark", Some(&scan)).unwrap();
        let extra = 400.0 * 300.0 / 400.0;
        assert!((spread.extra_width - extra).abs() < 1e-9);
        assert!((spread.dim.width - (300.0 + extra)).abs() < 1e-9);
        let placed = spread.place(spread.text_fields[0].rect);
        assert!((placed.corner.x - (15.0 + extra)).abs() < 1e-9);
        let previous = spread.previous.unwrap();
        assert_eq!(previous.corner, Point::default());
    }

    #[test]
    fn test_static_slot_does_not_widen() {
        let (dir, layout, assembler) = fixture();
        let scan = dir.path().join("scan.png");
        image::RgbImage::new(400, 100).save(&scan).unwrap();

        let spread = assembler.assemble(&layout, dir.path(), "check", Some(&scan)).unwrap();
        assert_eq!(spread.extra_width, 0.0);
        assert_eq!(spread.dim.width, 300.0);
        let previous = spread.previous.unwrap();
        assert_eq!((previous.dim.width, previous.dim.height), (200.0, 50.0));
        assert!(spread.ladders.is_empty());
    }

    #[test]
    fn test_unreadable_ladder_names_it() {
        let (_dir, layout, assembler) = fixture();
        let elsewhere = tempfile::tempdir().unwrap();
        match assembler.assemble(&layout, elsewhere.path(), "mark", None) {
            Err(AssemblyError::Ladder { ladder, .. }) => assert_eq!(ladder, "mark-sidebar"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
