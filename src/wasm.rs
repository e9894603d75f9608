//! WebAssembly bindings for PDF Image Optimizer

use crate::{
    extract_pdf_images, optimize_pdf_bytes, ExtractOptions, OptimizeOptions, OutputFormat,
    PipelineOptions,
};
use wasm_bindgen::prelude::*;

/// Initialize panic hook for better error messages in browser console
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

fn pipeline_options(quality: Option<u8>, format: Option<String>) -> Result<PipelineOptions, JsError> {
    let format = match format {
        Some(name) => name
            .parse::<OutputFormat>()
            .map_err(|e| JsError::new(&e.to_string()))?,
        None => OutputFormat::Auto,
    };
    Ok(PipelineOptions {
        extract: ExtractOptions::default(),
        optimize: OptimizeOptions {
            quality: quality.unwrap_or(75),
            format,
            ..OptimizeOptions::default()
        },
    })
}

/// Recompress every image in a PDF
///
/// # Arguments
/// * `pdf_bytes` - The input PDF file as a byte array
/// * `quality` - JPEG quality 1-100 (default: 75)
/// * `format` - "auto", "jpeg" or "png" (default: "auto")
///
/// # Returns
/// An `OptimizeResultJs` object containing the rebuilt PDF and statistics
#[wasm_bindgen]
pub fn optimize_pdf(
    pdf_bytes: &[u8],
    quality: Option<u8>,
    format: Option<String>,
) -> Result<OptimizeResultJs, JsError> {
    let options = pipeline_options(quality, format)?;
    let (output_bytes, result) =
        optimize_pdf_bytes(pdf_bytes, &options).map_err(|e| JsError::new(&e.to_string()))?;

    Ok(OptimizeResultJs {
        pdf_bytes: output_bytes,
        extracted_images: result.extraction.extracted,
        optimized_images: result.optimization.optimized,
        replaced_images: result.reconstruction.replaced,
        unmatched_images: result.reconstruction.unmatched,
    })
}

/// List the images a PDF would yield, as a JSON array string
#[wasm_bindgen]
pub fn list_pdf_images(pdf_bytes: &[u8]) -> Result<String, JsError> {
    let (images, _report) = extract_pdf_images(pdf_bytes, &ExtractOptions::default())
        .map_err(|e| JsError::new(&e.to_string()))?;

    let json: Vec<serde_json::Value> = images
        .iter()
        .map(|img| {
            serde_json::json!({
                "index": img.index,
                "page": img.page_number,
                "name": img.source_name,
                "kind": img.kind.as_str(),
                "width": img.pixel_width,
                "height": img.pixel_height,
                "size": img.original_byte_size
            })
        })
        .collect();

    serde_json::to_string(&json).map_err(|e| JsError::new(&e.to_string()))
}

/// Result of PDF optimization with statistics
#[wasm_bindgen]
pub struct OptimizeResultJs {
    pdf_bytes: Vec<u8>,
    extracted_images: usize,
    optimized_images: usize,
    replaced_images: usize,
    unmatched_images: usize,
}

#[wasm_bindgen]
impl OptimizeResultJs {
    /// Get the rebuilt PDF bytes
    #[wasm_bindgen(getter)]
    pub fn pdf_bytes(&self) -> Vec<u8> {
        self.pdf_bytes.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn extracted_images(&self) -> usize {
        self.extracted_images
    }

    #[wasm_bindgen(getter)]
    pub fn optimized_images(&self) -> usize {
        self.optimized_images
    }

    /// Get the number of image XObjects that were replaced
    #[wasm_bindgen(getter)]
    pub fn replaced_images(&self) -> usize {
        self.replaced_images
    }

    #[wasm_bindgen(getter)]
    pub fn unmatched_images(&self) -> usize {
        self.unmatched_images
    }
}
