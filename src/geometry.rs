//! Geometry Primitives - Points, Dimensions, Units
//!
//! Everything is stored in PDF points once a template has been normalized.
//! The y axis points down, as authored in the templates.

use serde::{Deserialize, Serialize};

pub const PT_PER_MM: f64 = 72.0 / 25.4;
pub const PT_PER_CM: f64 = 720.0 / 25.4;
pub const PT_PER_PX: f64 = 0.75;
pub const PT_PER_IN: f64 = 72.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn translate(self, by: Point) -> Self {
        Self { x: self.x + by.x, y: self.y + by.y }
    }

    pub fn offset_from(self, origin: Point) -> Self {
        Self { x: self.x - origin.x, y: self.y - origin.y }
    }

    pub fn scale(self, factor: f64) -> Self {
        Self { x: self.x * factor, y: self.y * factor }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimension {
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub dynamic_width: bool,
}

impl Dimension {
    pub fn fixed(width: f64, height: f64) -> Self {
        Self { width, height, dynamic_width: false }
    }

    pub fn dynamic(width: f64, height: f64) -> Self {
        Self { width, height, dynamic_width: true }
    }

    pub fn scale(self, factor: f64) -> Self {
        Self {
            width: self.width * factor,
            height: self.height * factor,
            dynamic_width: self.dynamic_width,
        }
    }

    pub fn widen(self, extra: f64) -> Self {
        Self { width: self.width + extra, ..self }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub corner: Point,
    pub dim: Dimension,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            corner: Point::new(x, y),
            dim: Dimension::fixed(width, height),
        }
    }

    pub fn translate(self, by: Point) -> Self {
        Self { corner: self.corner.translate(by), dim: self.dim }
    }

    pub fn scale(self, factor: f64) -> Self {
        Self { corner: self.corner.scale(factor), dim: self.dim.scale(factor) }
    }

    pub fn is_finite(&self) -> bool {
        self.corner.x.is_finite()
            && self.corner.y.is_finite()
            && self.dim.width.is_finite()
            && self.dim.height.is_finite()
    }
}

/// Length units a template may declare on its root element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Mm,
    Cm,
    #[default]
    Px,
    Pt,
    In,
}

impl Unit {
    /// Unitless lengths are CSS pixels.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim() {
            "" | "px" => Some(Unit::Px),
            "mm" => Some(Unit::Mm),
            "cm" => Some(Unit::Cm),
            "pt" => Some(Unit::Pt),
            "in" => Some(Unit::In),
            _ => None,
        }
    }

    pub fn to_points(self) -> f64 {
        match self {
            Unit::Mm => PT_PER_MM,
            Unit::Cm => PT_PER_CM,
            Unit::Px => PT_PER_PX,
            Unit::Pt => 1.0,
            Unit::In => PT_PER_IN,
        }
    }
}

/// Split a length such as `210mm` into its value and unit.
pub fn split_length(raw: &str) -> (&str, &str) {
    let raw = raw.trim();
    let idx = raw
        .find(|c: char| c.is_ascii_alphabetic() || c == '%')
        .unwrap_or(raw.len());
    (raw[..idx].trim(), &raw[idx..])
}
