//! Error types for PDF image extraction and reconstruction

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the optimizer library
#[derive(Error, Debug)]
pub enum Error {
    /// PDF object graph error
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// Image decoding or encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JPEG encoding error
    #[error("JPEG encoding error: {0}")]
    Jpeg(#[from] jpeg_encoder::EncodingError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Quality must be between 1 and 100")]
    InvalidQuality,

    /// Render scale is not a finite value in (0, MAX_RENDER_SCALE]
    #[error("Invalid render scale: {0}")]
    InvalidRenderScale(f64),

    /// Reconstruction was requested before any document was loaded
    #[error("No source document loaded")]
    MissingSource,

    #[error("Source document is empty")]
    EmptySource,

    /// The document could not be parsed at all
    #[error("Failed to load PDF: {0}")]
    Load(String),

    /// A page could not be rendered or its operators could not be read
    #[error("Page {page} could not be loaded: {reason}")]
    Page { page: u32, reason: String },

    #[error("Unsupported image data: {0}")]
    UnsupportedImage(String),

    #[error("No extracted image with index {0}")]
    UnknownImage(usize),

    /// General processing error
    #[error("Processing error: {0}")]
    Processing(String),
}

impl Error {
    pub(crate) fn page(page: u32, reason: impl std::fmt::Display) -> Self {
        Error::Page {
            page,
            reason: reason.to_string(),
        }
    }
}
