//! Template System - SVG layouts and ladders
//!
//! A layout describes a whole output page style: where each ladder is
//! anchored, how big each named spread is and where the previous stage's
//! image goes. A ladder is a reusable block of form fields. Both are authored
//! in Inkscape; everything the engine needs is read from named layers and the
//! `<title>`/`<desc>` of each element, never from the drawing itself.

use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

use crate::geometry::{split_length, Dimension, Point, Rect, Unit};
use crate::properties::{parse_options, parse_paragraph, Paragraph, PropertyError};

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static TEMPLATE_PARSE_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_template_parse_count() -> u32 {
    TEMPLATE_PARSE_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_template_parse_count() {
    TEMPLATE_PARSE_COUNT.store(0, Ordering::SeqCst);
}

const INKSCAPE_NS: &str = "http://www.inkscape.org/namespaces/inkscape";
const SODIPODI_NS: &str = "http://sodipodi.sourceforge.net/DTD/sodipodi-0.dtd";

/// Anchor title marking a template's own reference point.
pub const REF_ANCHOR: &str = "ref-anchor";

const ANCHOR_TAGS: &[&str] = &["circle", "ellipse", "rect", "path"];
const RECT_TAGS: &[&str] = &["rect"];

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("Malformed template markup: {0}")]
    Markup(#[from] roxmltree::Error),

    #[error("{element} is missing attribute {attribute}")]
    MissingAttribute { element: String, attribute: String },

    #[error("{element} has unparsable {attribute}: {value:?}")]
    InvalidNumber { element: String, attribute: String, value: String },

    #[error("{element} declares unsupported unit {unit:?}")]
    UnsupportedUnit { element: String, unit: String },

    #[error("{element} uses unsupported transform {transform:?}")]
    UnsupportedTransform { element: String, transform: String },

    #[error("{element} has invalid properties: {source}")]
    Properties { element: String, source: PropertyError },

    #[error("Failed to read template {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },
}

/// Names of the layers the parser looks for, matched case-insensitively
/// against `inkscape:label` (or `id` when unlabelled).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateConfig {
    #[serde(default = "default_anchors_layer")]
    pub anchors_layer: String,
    #[serde(default = "default_pages_layer")]
    pub pages_layer: String,
    #[serde(default = "default_images_layer")]
    pub images_layer: String,
    #[serde(default = "default_textfields_layer")]
    pub textfields_layer: String,
    #[serde(default = "default_prefills_layer")]
    pub prefills_layer: String,
    #[serde(default = "default_comboboxes_layer")]
    pub comboboxes_layer: String,
    /// Extension appended to ladder basenames
    #[serde(default = "default_ladder_extension")]
    pub ladder_extension: String,
    /// Extension of the raster export of each ladder's chrome
    #[serde(default = "default_chrome_extension")]
    pub chrome_extension: String,
}

fn default_anchors_layer() -> String { "anchors".into() }
fn default_pages_layer() -> String { "pages".into() }
fn default_images_layer() -> String { "images".into() }
fn default_textfields_layer() -> String { "textfields".into() }
fn default_prefills_layer() -> String { "prefills".into() }
fn default_comboboxes_layer() -> String { "comboboxes".into() }
fn default_ladder_extension() -> String { "svg".into() }
fn default_chrome_extension() -> String { "png".into() }

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            anchors_layer: default_anchors_layer(),
            pages_layer: default_pages_layer(),
            images_layer: default_images_layer(),
            textfields_layer: default_textfields_layer(),
            prefills_layer: default_prefills_layer(),
            comboboxes_layer: default_comboboxes_layer(),
            ladder_extension: default_ladder_extension(),
            chrome_extension: default_chrome_extension(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    pub anchor: Point,
    pub dim: Dimension,
    pub id: String,
    pub anchors: BTreeMap<String, Point>,
    pub page_dims: BTreeMap<String, Dimension>,
    pub image_dims: BTreeMap<String, Dimension>,
    pub filenames: BTreeMap<String, String>,
    /// Unit of every stored length; `Pt` once normalized
    pub unit: Unit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextField {
    pub rect: Rect,
    pub id: String,
    pub prefill: String,
    pub tab_order: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextPrefill {
    pub rect: Rect,
    pub id: String,
    pub properties: String,
    pub paragraph: Paragraph,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComboBox {
    pub rect: Rect,
    pub id: String,
    pub properties: String,
    pub options: Vec<String>,
}

/// A sub-template. Element rectangles are relative to `anchor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ladder {
    pub anchor: Point,
    pub dim: Dimension,
    pub id: String,
    pub text_fields: Vec<TextField>,
    pub prefills: Vec<TextPrefill>,
    pub combo_boxes: Vec<ComboBox>,
    pub unit: Unit,
}

/// Switch `unit` to points and return the factor the stored values need.
fn take_point_factor(unit: &mut Unit) -> f64 {
    let factor = unit.to_points();
    *unit = Unit::Pt;
    factor
}

impl Layout {
    /// Rescale every stored length to points. Running it twice is a no-op.
    pub fn normalize(&mut self) {
        let f = take_point_factor(&mut self.unit);
        if f == 1.0 {
            return;
        }
        self.anchor = self.anchor.scale(f);
        self.dim = self.dim.scale(f);
        for p in self.anchors.values_mut() {
            *p = p.scale(f);
        }
        for d in self.page_dims.values_mut().chain(self.image_dims.values_mut()) {
            *d = d.scale(f);
        }
    }
}

impl Ladder {
    /// Rescale every stored length to points. Running it twice is a no-op.
    pub fn normalize(&mut self) {
        let f = take_point_factor(&mut self.unit);
        if f == 1.0 {
            return;
        }
        self.anchor = self.anchor.scale(f);
        self.dim = self.dim.scale(f);
        for tf in &mut self.text_fields {
            tf.rect = tf.rect.scale(f);
        }
        for p in &mut self.prefills {
            p.rect = p.rect.scale(f);
        }
        for c in &mut self.combo_boxes {
            c.rect = c.rect.scale(f);
        }
    }
}

/// Visiting order from the trailing digits of a field id (`mark-q03` -> 3).
///
/// Ids without a numeric tag, or with one that overflows, get order 0. The
/// order is cosmetic so this is never an error.
pub fn tab_order(id: &str) -> i32 {
    let digits = id.len() - id.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    id[id.len() - digits..].parse().unwrap_or(0)
}

/// Strip a `dynamic-`/`static-` sizing prefix, returning the key and
/// whether the width is dynamic.
pub fn split_sizing_prefix(name: &str) -> (String, bool) {
    if let Some(rest) = name.strip_prefix("dynamic-") {
        (rest.to_string(), true)
    } else if let Some(rest) = name.strip_prefix("static-") {
        (rest.to_string(), false)
    } else {
        (name.to_string(), false)
    }
}

fn is_tag(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn child_text(node: Node, name: &str) -> Option<String> {
    node.children()
        .find(|c| is_tag(c, name))
        .and_then(|c| c.text())
        .map(|t| t.trim().to_string())
}

fn parse_list(raw: &str) -> Vec<&str> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect()
}

/// One parsed SVG document plus the root-level facts every element needs.
struct Scan<'a, 'input> {
    doc: &'a Document<'input>,
    unit: Unit,
    dim: Dimension,
    id: String,
    /// declared units per user unit (from the viewBox)
    user_scale: f64,
    /// subtracts the viewBox origin
    origin: Point,
}

impl<'a, 'input> Scan<'a, 'input> {
    fn new(doc: &'a Document<'input>) -> Result<Self, TemplateError> {
        let root = doc.root_element();
        let element = describe(root);
        let length = |attribute: &str| -> Result<(f64, Unit), TemplateError> {
            let raw = root.attribute(attribute).ok_or_else(|| TemplateError::MissingAttribute {
                element: element.clone(),
                attribute: attribute.to_string(),
            })?;
            let (value, unit) = split_length(raw);
            let unit = Unit::from_token(unit).ok_or_else(|| TemplateError::UnsupportedUnit {
                element: element.clone(),
                unit: unit.to_string(),
            })?;
            let value: f64 = value.parse().map_err(|_| TemplateError::InvalidNumber {
                element: element.clone(),
                attribute: attribute.to_string(),
                value: raw.to_string(),
            })?;
            Ok((value, unit))
        };

        let (width, unit) = length("width")?;
        let (height, height_unit) = length("height")?;
        let height = height * height_unit.to_points() / unit.to_points();

        let (user_scale, origin) = match root.attribute("viewBox") {
            Some(raw) => {
                let parts: Vec<f64> = parse_list(raw)
                    .iter()
                    .map(|s| s.parse::<f64>())
                    .collect::<Result<_, _>>()
                    .map_err(|_| TemplateError::InvalidNumber {
                        element: element.clone(),
                        attribute: "viewBox".into(),
                        value: raw.to_string(),
                    })?;
                match parts.as_slice() {
                    [min_x, min_y, vb_width, _] if *vb_width > 0.0 => {
                        (width / vb_width, Point::new(-min_x, -min_y))
                    }
                    _ => {
                        return Err(TemplateError::InvalidNumber {
                            element,
                            attribute: "viewBox".into(),
                            value: raw.to_string(),
                        })
                    }
                }
            }
            None => (1.0, Point::default()),
        };

        Ok(Self {
            doc,
            unit,
            dim: Dimension::fixed(width, height),
            id: root.attribute("id").unwrap_or_default().to_string(),
            user_scale,
            origin,
        })
    }

    fn layer(&self, label: &str) -> Option<Node<'a, 'input>> {
        self.doc.descendants().find(|n| {
            is_tag(n, "g")
                && n.attribute((INKSCAPE_NS, "label"))
                    .or_else(|| n.attribute("id"))
                    .is_some_and(|l| l.eq_ignore_ascii_case(label))
        })
    }

    fn elements(&self, label: &str, tags: &'static [&'static str]) -> Vec<Node<'a, 'input>> {
        match self.layer(label) {
            Some(layer) => layer
                .descendants()
                .filter(|n| tags.iter().any(|t| is_tag(n, t)))
                .collect(),
            None => {
                tracing::debug!(layer = label, template = %self.id, "layer not present");
                Vec::new()
            }
        }
    }

    fn number(&self, node: Node, attribute: &str) -> Result<Option<f64>, TemplateError> {
        self.number_ns(node, None, attribute)
    }

    fn number_ns(
        &self,
        node: Node,
        ns: Option<&str>,
        attribute: &str,
    ) -> Result<Option<f64>, TemplateError> {
        let raw = match ns {
            Some(ns) => node.attribute((ns, attribute)),
            None => node.attribute(attribute),
        };
        let Some(raw) = raw else { return Ok(None) };
        let (value, unit) = split_length(raw);
        let parsed = if unit.is_empty() || unit == "px" { value.parse::<f64>().ok() } else { None };
        parsed.map(Some).ok_or_else(|| TemplateError::InvalidNumber {
            element: describe(node),
            attribute: attribute.to_string(),
            value: raw.to_string(),
        })
    }

    fn required(&self, node: Node, attribute: &str) -> Result<f64, TemplateError> {
        self.number(node, attribute)?.ok_or_else(|| TemplateError::MissingAttribute {
            element: describe(node),
            attribute: attribute.to_string(),
        })
    }

    /// Sum of every translation from the element up to the root, in user units.
    fn translation(&self, node: Node) -> Result<Point, TemplateError> {
        let mut total = Point::default();
        for n in node.ancestors().filter(|n| n.is_element()) {
            if let Some(transform) = n.attribute("transform") {
                let unsupported = || TemplateError::UnsupportedTransform {
                    element: describe(n),
                    transform: transform.to_string(),
                };
                let t = parse_translate(transform).ok_or_else(unsupported)?;
                total = total.translate(t);
            }
        }
        Ok(total)
    }

    fn to_declared(&self, user: Point) -> Point {
        user.translate(self.origin).scale(self.user_scale)
    }

    fn rect_of(&self, node: Node) -> Result<Rect, TemplateError> {
        let x = self.number(node, "x")?.unwrap_or(0.0);
        let y = self.number(node, "y")?.unwrap_or(0.0);
        let width = self.required(node, "width")?;
        let height = self.required(node, "height")?;
        let corner = self.to_declared(Point::new(x, y).translate(self.translation(node)?));
        Ok(Rect {
            corner,
            dim: Dimension::fixed(width * self.user_scale, height * self.user_scale),
        })
    }

    fn point_of(&self, node: Node) -> Result<Point, TemplateError> {
        let local = match node.tag_name().name() {
            "rect" => Point::new(
                self.number(node, "x")?.unwrap_or(0.0),
                self.number(node, "y")?.unwrap_or(0.0),
            ),
            "path" => {
                let cx = self.number_ns(node, Some(SODIPODI_NS), "cx")?;
                let cy = self.number_ns(node, Some(SODIPODI_NS), "cy")?;
                match (cx, cy) {
                    (Some(x), Some(y)) => Point::new(x, y),
                    _ => {
                        return Err(TemplateError::MissingAttribute {
                            element: describe(node),
                            attribute: "sodipodi:cx/cy".into(),
                        })
                    }
                }
            }
            _ => Point::new(self.required(node, "cx")?, self.required(node, "cy")?),
        };
        Ok(self.to_declared(local.translate(self.translation(node)?)))
    }

    fn name(&self, node: Node) -> Result<String, TemplateError> {
        child_text(node, "title")
            .filter(|t| !t.is_empty())
            .or_else(|| node.attribute((INKSCAPE_NS, "label")).map(str::to_string))
            .or_else(|| node.attribute("id").map(str::to_string))
            .ok_or_else(|| TemplateError::MissingAttribute {
                element: describe(node),
                attribute: "title".into(),
            })
    }

    fn desc(&self, node: Node) -> String {
        child_text(node, "desc").unwrap_or_default()
    }
}

fn describe(node: Node) -> String {
    let tag = node.tag_name().name();
    let name = child_text(node, "title")
        .filter(|t| !t.is_empty())
        .or_else(|| node.attribute("id").map(str::to_string));
    match name {
        Some(name) => format!("<{tag}> {name:?}"),
        None => format!("<{tag}> (unnamed)"),
    }
}

/// Parse a transform made only of translations (`translate(..)` or an
/// identity-scaled `matrix(..)`).
fn parse_translate(transform: &str) -> Option<Point> {
    let mut total = Point::default();
    for func in transform.split(')').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, args) = func.split_once('(')?;
        let args = parse_list(args)
            .iter()
            .map(|s| s.parse::<f64>().ok())
            .collect::<Option<Vec<_>>>()?;
        let step = match (name.trim(), args.as_slice()) {
            ("translate", [x]) => Point::new(*x, 0.0),
            ("translate", [x, y]) => Point::new(*x, *y),
            ("matrix", [a, b, c, d, e, f]) if *a == 1.0 && *b == 0.0 && *c == 0.0 && *d == 1.0 => {
                Point::new(*e, *f)
            }
            _ => return None,
        };
        total = total.translate(step);
    }
    Some(total)
}

fn parse_document(bytes: &[u8]) -> Result<Document<'_>, TemplateError> {
    let text = std::str::from_utf8(bytes)?;
    Ok(Document::parse(text)?)
}

/// Parse a top-level layout template and normalize it to points.
pub fn parse_layout(bytes: &[u8], config: &TemplateConfig) -> Result<Layout, TemplateError> {
    let doc = parse_document(bytes)?;
    let scan = Scan::new(&doc)?;

    let mut layout = Layout {
        anchor: Point::default(),
        dim: scan.dim,
        id: scan.id.clone(),
        anchors: BTreeMap::new(),
        page_dims: BTreeMap::new(),
        image_dims: BTreeMap::new(),
        filenames: BTreeMap::new(),
        unit: scan.unit,
    };

    for node in scan.elements(&config.anchors_layer, ANCHOR_TAGS) {
        let name = scan.name(node)?;
        let point = scan.point_of(node)?;
        if name == REF_ANCHOR {
            layout.anchor = point;
            continue;
        }
        let file = scan.desc(node);
        if !file.is_empty() {
            layout.filenames.insert(name.clone(), file);
        }
        layout.anchors.insert(name, point);
    }

    for node in scan.elements(&config.pages_layer, RECT_TAGS) {
        let rect = scan.rect_of(node)?;
        let (key, dynamic_width) = split_sizing_prefix(&scan.name(node)?);
        layout.page_dims.insert(key, Dimension { dynamic_width, ..rect.dim });
    }

    for node in scan.elements(&config.images_layer, RECT_TAGS) {
        let rect = scan.rect_of(node)?;
        let (key, dynamic_width) = split_sizing_prefix(&scan.name(node)?);
        layout.image_dims.insert(key.clone(), Dimension { dynamic_width, ..rect.dim });
        layout.anchors.entry(key).or_insert(rect.corner);
    }

    layout.normalize();
    tracing::debug!(
        layout = %layout.id,
        spreads = layout.page_dims.len(),
        ladders = layout.filenames.len(),
        "parsed layout"
    );
    Ok(layout)
}

/// Parse a ladder sub-template and normalize it to points.
pub fn parse_ladder(bytes: &[u8], config: &TemplateConfig) -> Result<Ladder, TemplateError> {
    let doc = parse_document(bytes)?;
    let scan = Scan::new(&doc)?;

    let mut anchor = Point::default();
    for node in scan.elements(&config.anchors_layer, ANCHOR_TAGS) {
        if scan.name(node)? == REF_ANCHOR {
            anchor = scan.point_of(node)?;
        }
    }
    let local = |rect: Rect| Rect { corner: rect.corner.offset_from(anchor), dim: rect.dim };

    let mut ladder = Ladder {
        anchor,
        dim: scan.dim,
        id: scan.id.clone(),
        text_fields: Vec::new(),
        prefills: Vec::new(),
        combo_boxes: Vec::new(),
        unit: scan.unit,
    };

    for node in scan.elements(&config.textfields_layer, RECT_TAGS) {
        let id = scan.name(node)?;
        ladder.text_fields.push(TextField {
            rect: local(scan.rect_of(node)?),
            tab_order: tab_order(&id),
            prefill: scan.desc(node),
            id,
        });
    }

    for node in scan.elements(&config.prefills_layer, RECT_TAGS) {
        let id = scan.name(node)?;
        let properties = scan.desc(node);
        let paragraph = parse_paragraph(&properties)
            .map_err(|source| TemplateError::Properties { element: describe(node), source })?;
        let rect = local(scan.rect_of(node)?);
        ladder.prefills.push(TextPrefill { rect, id, properties, paragraph });
    }

    for node in scan.elements(&config.comboboxes_layer, RECT_TAGS) {
        let id = scan.name(node)?;
        let properties = scan.desc(node);
        let options = parse_options(&properties);
        let rect = local(scan.rect_of(node)?);
        ladder.combo_boxes.push(ComboBox { rect, id, properties, options });
    }

    ladder.normalize();
    tracing::debug!(
        ladder = %ladder.id,
        text_fields = ladder.text_fields.len(),
        prefills = ladder.prefills.len(),
        combo_boxes = ladder.combo_boxes.len(),
        "parsed ladder"
    );
    Ok(ladder)
}

/// Template registry - parses templates once and shares them between renders
pub struct TemplateRegistry {
    config: TemplateConfig,
    layouts: RwLock<HashMap<PathBuf, Arc<Layout>>>,
    ladders: RwLock<HashMap<PathBuf, Arc<Ladder>>>,
}

impl TemplateRegistry {
    pub fn new(config: TemplateConfig) -> Self {
        Self {
            config,
            layouts: RwLock::new(HashMap::new()),
            ladders: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TemplateConfig {
        &self.config
    }

    fn read(path: &Path) -> Result<Vec<u8>, TemplateError> {
        #[cfg(feature = "test-hooks")]
        TEMPLATE_PARSE_COUNT.fetch_add(1, Ordering::SeqCst);

        fs::read(path).map_err(|source| TemplateError::Io { path: path.to_path_buf(), source })
    }

    pub fn load_layout(&self, path: &Path) -> Result<Arc<Layout>, TemplateError> {
        if let Some(layout) = self.get_layout(path) {
            return Ok(layout);
        }
        let layout = Arc::new(parse_layout(&Self::read(path)?, &self.config)?);
        self.register_layout(path, Arc::clone(&layout));
        Ok(layout)
    }

    pub fn load_ladder(&self, path: &Path) -> Result<Arc<Ladder>, TemplateError> {
        let cached = self
            .ladders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned();
        if let Some(ladder) = cached {
            return Ok(ladder);
        }
        let ladder = Arc::new(parse_ladder(&Self::read(path)?, &self.config)?);
        self.ladders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), Arc::clone(&ladder));
        Ok(ladder)
    }

    pub fn get_layout(&self, path: &Path) -> Option<Arc<Layout>> {
        self.layouts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub fn register_layout(&self, path: &Path, layout: Arc<Layout>) {
        self.layouts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), layout);
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new(TemplateConfig::default())
    }
}
