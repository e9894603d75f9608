//! PDF Image Optimizer Library
//!
//! Pulls every raster unit out of a PDF (bitmap images, plus forms and
//! shadings cropped from a page render), recompresses them, and writes them
//! back over the original image XObjects. Shared between CLI and WASM targets.
//!
//! The extraction side replays each page's operators through a transform
//! stack and a clip stack ([`scanner`]), handing paint operators to the
//! [`extract::ExtractionEngine`]. The reconstruction side pairs records with
//! image XObjects by page and pixel dimensions ([`reconstruct`]) and patches
//! the document through the narrow [`graph::ObjectGraph`] interface.

#[cfg(target_arch = "wasm32")]
pub mod wasm;

pub mod codec;
pub mod error;
pub mod extract;
pub mod geometry;
pub mod graph;
pub mod operators;
pub mod optimize;
pub mod reconstruct;
pub mod scanner;
pub mod session;
pub mod source;

pub use error::{Error, Result};
pub use extract::{ExtractOptions, ExtractedImage, ImageKind};
pub use graph::{LopdfGraph, ObjectGraph};
pub use optimize::{OptimizeOptions, OptimizeSummary, OutputFormat};
pub use reconstruct::{reconstruct_pdf, ReconstructionSummary};
pub use session::{EditorSession, ExtractionReport};
pub use source::{BlankRenderer, LopdfSource, PageRenderer, SourceDocument};

/// Options for the full extract, optimize and reconstruct pipeline
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub extract: ExtractOptions,
    pub optimize: OptimizeOptions,
}

/// Result of a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    pub extraction: ExtractionReport,
    pub optimization: OptimizeSummary,
    pub reconstruction: ReconstructionSummary,
}

/// Extract every image record from PDF bytes
pub fn extract_pdf_images(
    input_bytes: &[u8],
    options: &ExtractOptions,
) -> Result<(Vec<ExtractedImage>, ExtractionReport)> {
    let mut session = EditorSession::new();
    session.load(input_bytes.to_vec())?;
    let report = session.extract_with(options)?;
    Ok((session.images().to_vec(), report))
}

/// Optimize PDF from bytes and return the rebuilt PDF bytes
pub fn optimize_pdf_bytes(
    input_bytes: &[u8],
    options: &PipelineOptions,
) -> Result<(Vec<u8>, PipelineResult)> {
    options.extract.validate()?;
    options.optimize.validate()?;

    let mut session = EditorSession::new();
    session.load(input_bytes.to_vec())?;
    let extraction = session.extract_with(&options.extract)?;
    let optimization = session.optimize_all(&options.optimize)?;
    let (output_bytes, reconstruction) = session.reconstruct()?;

    Ok((
        output_bytes,
        PipelineResult {
            extraction,
            optimization,
            reconstruction,
        },
    ))
}

#[cfg(not(target_arch = "wasm32"))]
pub mod file_ops {
    use super::*;
    use std::path::{Path, PathBuf};

    /// Optimize PDF from file path to file path
    pub fn optimize_pdf_file(
        input_path: &Path,
        output_path: &Path,
        options: &PipelineOptions,
    ) -> Result<PipelineResult> {
        let input_bytes = std::fs::read(input_path)?;
        let (output_bytes, result) = optimize_pdf_bytes(&input_bytes, options)?;
        std::fs::write(output_path, output_bytes)?;
        log::info!("Wrote {}", output_path.display());
        Ok(result)
    }

    /// File name for a record: index, page and a filesystem-safe source name
    pub fn image_file_name(image: &ExtractedImage) -> String {
        let name: String = image
            .source_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!("{:04}-page{}-{}.png", image.index, image.page_number, name)
    }

    /// Write each record's extracted raster as PNG into `dir`
    pub fn write_images(dir: &Path, images: &[ExtractedImage]) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        images
            .iter()
            .map(|image| -> Result<PathBuf> {
                let path = dir.join(image_file_name(image));
                std::fs::write(&path, &image.raster_data)?;
                Ok(path)
            })
            .collect()
    }
}
