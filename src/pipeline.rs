//! Stage Pipeline - Single Entry Point
//!
//! Every page goes template -> spread -> render. Pages of one file are
//! rendered in order; files of a batch run in parallel and fail alone.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::audit::{self, AuditReport};
use crate::codec::ProvenanceCodec;
use crate::config::EngineConfig;
use crate::pdftext::{LopdfText, TextError};
use crate::render::{DynamicContent, RenderError, RenderedPage, Renderer};
use crate::spread::{AssemblyError, SpreadAssembler};
use crate::templates::{TemplateError, TemplateRegistry};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Page text error: {0}")]
    Text(#[from] TextError),

    #[error("Page {page} ({spread}): {source}")]
    Page { page: usize, spread: String, source: Box<PipelineError> },

    #[error("Cannot write {}: {source}", path.display())]
    Output { path: PathBuf, source: std::io::Error },

    #[error("Cannot start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConfig {
    /// Worker threads; available parallelism when unset
    #[serde(default)]
    pub workers: Option<usize>,
}

impl BatchConfig {
    pub fn worker_count(&self) -> usize {
        self.workers
            .filter(|&n| n > 0)
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PageJob {
    pub spread: String,
    /// The previous stage's image of this page, if any
    pub previous_image: Option<PathBuf>,
    pub content: DynamicContent,
}

#[derive(Debug, Clone, Default)]
pub struct FileJob {
    /// Output basename, also used in failure reports
    pub name: String,
    pub layout: PathBuf,
    pub pages: Vec<PageJob>,
    /// Write `<name>-<page:03>.pdf` here when set
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub file: String,
    pub spread: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// Names of files rendered in full, in job order
    pub completed: Vec<String>,
    pub errors: Vec<FileFailure>,
    pub failed: usize,
    pub pages: usize,
}

/// Output path for one page of a file.
pub fn page_output_path(dir: &Path, name: &str, page: usize) -> PathBuf {
    dir.join(format!("{name}-{page:03}.pdf"))
}

pub struct StagePipeline {
    assembler: SpreadAssembler,
    renderer: Renderer,
    batch: BatchConfig,
}

impl StagePipeline {
    pub fn new(config: EngineConfig) -> Self {
        let EngineConfig { template, codec, batch } = config;
        Self::with_parts(
            Arc::new(TemplateRegistry::new(template)),
            Arc::new(ProvenanceCodec::new(codec)),
            batch,
        )
    }

    pub fn with_parts(
        registry: Arc<TemplateRegistry>,
        codec: Arc<ProvenanceCodec>,
        batch: BatchConfig,
    ) -> Self {
        Self {
            assembler: SpreadAssembler::new(registry),
            renderer: Renderer::new(codec),
            batch,
        }
    }

    pub fn registry(&self) -> &TemplateRegistry {
        self.assembler.registry()
    }

    pub fn codec(&self) -> &ProvenanceCodec {
        self.renderer.codec()
    }

    fn render_page(
        &self,
        job: &FileJob,
        number: usize,
        page: &PageJob,
    ) -> Result<RenderedPage, PipelineError> {
        let layout = self.registry().load_layout(&job.layout)?;
        let base_dir = job.layout.parent().unwrap_or_else(|| Path::new("."));
        let spread = self
            .assembler
            .assemble(&layout, base_dir, &page.spread, page.previous_image.as_deref())?;
        let rendered = self.renderer.render(&spread, page.content.clone())?;

        if let Some(dir) = &job.output_dir {
            let path = page_output_path(dir, &job.name, number);
            rendered
                .write_to(&path)
                .map_err(|source| PipelineError::Output { path, source })?;
        }
        Ok(rendered)
    }

    /// Render every page of one file, in order. Stops at the first failing
    /// page.
    pub fn render_file(&self, job: &FileJob) -> Result<Vec<RenderedPage>, PipelineError> {
        let mut rendered = Vec::with_capacity(job.pages.len());
        for (i, page) in job.pages.iter().enumerate() {
            let number = i + 1;
            let out = self.render_page(job, number, page).map_err(|e| PipelineError::Page {
                page: number,
                spread: page.spread.clone(),
                source: Box::new(e),
            })?;
            rendered.push(out);
        }
        tracing::debug!(file = %job.name, pages = rendered.len(), "rendered file");
        Ok(rendered)
    }

    /// Render files in parallel. A failing file is reported and skipped; the
    /// rest of the batch carries on.
    pub fn run_batch(&self, jobs: &[FileJob]) -> Result<BatchReport, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.batch.worker_count())
            .build()?;
        let results: Vec<_> = pool.install(|| {
            jobs.par_iter()
                .map(|job| (job, self.render_file(job).map(|pages| pages.len())))
                .collect()
        });

        let mut report = BatchReport::default();
        for (job, result) in results {
            match result {
                Ok(pages) => {
                    report.pages += pages;
                    report.completed.push(job.name.clone());
                }
                Err(e) => {
                    let spread = match &e {
                        PipelineError::Page { spread, .. } => Some(spread.clone()),
                        _ => None,
                    };
                    tracing::warn!(file = %job.name, spread = ?spread, error = %e, "file failed");
                    report.errors.push(FileFailure {
                        file: job.name.clone(),
                        spread,
                        error: e.to_string(),
                    });
                }
            }
        }
        report.failed = report.errors.len();

        tracing::info!(
            completed = report.completed.len(),
            failed = report.failed,
            pages = report.pages,
            "batch finished"
        );
        Ok(report)
    }

    /// Decode and link-check every page of a PDF.
    pub fn audit_pdf(&self, bytes: &[u8]) -> Result<AuditReport, PipelineError> {
        let source = LopdfText::from_bytes(bytes)?;
        Ok(audit::audit(&source, self.codec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_output_path() {
        assert_eq!(page_output_path(Path::new("/out"), "B123", 7), PathBuf::from("/out/B123-007.pdf"));
    }

    #[test]
    fn test_worker_count_defaults() {
        assert_eq!(BatchConfig { workers: Some(3) }.worker_count(), 3);
        assert!(BatchConfig { workers: Some(0) }.worker_count() >= 1);
        assert!(BatchConfig::default().worker_count() >= 1);
    }

    #[test]
    fn test_missing_layout_fails_file_not_batch() {
        let pipeline = StagePipeline::new(EngineConfig::default());
        let job = FileJob {
            name: "ghost".into(),
            layout: PathBuf::from("/nonexistent/layout.svg"),
            pages: vec![PageJob { spread: "mark".into(), ..Default::default() }],
            output_dir: None,
        };
        let report = pipeline.run_batch(&[job]).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors[0].spread.as_deref(), Some("mark"));
        assert!(report.completed.is_empty());
    }

    #[test]
    fn test_empty_file_completes() {
        let pipeline = StagePipeline::new(EngineConfig::default());
        let job = FileJob { name: "empty".into(), ..Default::default() };
        let report = pipeline.run_batch(&[job]).unwrap();
        assert_eq!(report.completed, vec!["empty"]);
        assert_eq!(report.pages, 0);
    }
}
