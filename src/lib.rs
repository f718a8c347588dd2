//! ScriptFlow Core - Exam Script Staging
//!
//! Scanned exam pages move through marking stages. At each stage a page is
//! rebuilt from an SVG layout (the previous image plus that stage's form
//! fields) and carries its whole processing history forward as hidden,
//! checksummed text.
//!
//! Flow: templates -> spread -> render, then later audit -> links.

pub mod geometry;
pub mod properties;
pub mod templates;
pub mod spread;
pub mod render;
pub mod pagedata;
pub mod hashing;
pub mod codec;
pub mod links;
pub mod pdftext;
pub mod forms;
pub mod audit;
pub mod pipeline;
pub mod config;

pub use geometry::{Dimension, Point, Rect, Unit};
pub use templates::{Ladder, Layout, TemplateConfig, TemplateError, TemplateRegistry};
pub use spread::{AssemblyError, Spread, SpreadAssembler};
pub use render::{DynamicContent, RenderError, RenderedPage, Renderer};
pub use pagedata::{Comment, PageData, PageDetail};
pub use codec::{Candidate, CodecConfig, ProvenanceCodec};
pub use links::{check, link, Link};
pub use audit::{audit, AuditReport};
pub use pipeline::{BatchConfig, BatchReport, FileJob, PageJob, PipelineError, StagePipeline};
pub use config::EngineConfig;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
