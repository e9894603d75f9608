//! Extraction engine: turns paint operators into extracted raster records.
//!
//! Bitmaps are re-encoded losslessly at their native size. Form XObjects and
//! shadings have no bitmap of their own, so their on-page region is copied out
//! of the full-page render.

use crate::codec;
use crate::error::{Error, Result};
use crate::geometry::{ClipBounds, Matrix};
use crate::operators::OpCode;
use crate::source::LoadedPage;
use image::{imageops, RgbaImage};
use std::collections::HashSet;

/// Largest accepted full-page render scale
pub const MAX_RENDER_SCALE: f64 = 16.0;

/// Form bounding box used when a form carries no /BBox
const DEFAULT_FORM_BBOX: [f64; 4] = [0.0, 0.0, 100.0, 100.0];

/// Options for extraction
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Full-page render scale, in pixels per PDF unit
    pub render_scale: f64,
    /// Abort the whole document on the first page that fails to load
    pub stop_on_page_error: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            render_scale: 2.0,
            stop_on_page_error: false,
        }
    }
}

impl ExtractOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.render_scale.is_finite()
            || self.render_scale <= 0.0
            || self.render_scale > MAX_RENDER_SCALE
        {
            return Err(Error::InvalidRenderScale(self.render_scale));
        }
        Ok(())
    }
}

/// Where an extracted raster came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    BitmapImage,
    RasterizedForm,
    RasterizedShading,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::BitmapImage => "bitmap-image",
            ImageKind::RasterizedForm => "rasterized-form",
            ImageKind::RasterizedShading => "rasterized-shading",
        }
    }
}

/// One raster unit pulled from the source document
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedImage {
    /// Document-wide extraction sequence number
    pub index: usize,
    /// 1-based source page
    pub page_number: u32,
    /// Object name this record was derived from
    pub source_name: String,
    pub kind: ImageKind,
    pub pixel_width: u32,
    pub pixel_height: u32,
    /// PNG payload as extracted
    pub raster_data: Vec<u8>,
    pub original_byte_size: usize,
    pub optimized_data: Option<Vec<u8>>,
    pub optimized_byte_size: usize,
    pub is_optimized: bool,
    pub applied_quality: Option<u8>,
    /// Whether reconstruction may write this record over an image XObject.
    /// Crops of a blank page render are not.
    pub replaceable: bool,
    source_dimensions: (u32, u32),
}

impl ExtractedImage {
    pub fn new(
        index: usize,
        page_number: u32,
        source_name: impl Into<String>,
        kind: ImageKind,
        pixel_width: u32,
        pixel_height: u32,
        raster_data: Vec<u8>,
    ) -> Self {
        let original_byte_size = raster_data.len();
        ExtractedImage {
            index,
            page_number,
            source_name: source_name.into(),
            kind,
            pixel_width,
            pixel_height,
            raster_data,
            original_byte_size,
            optimized_data: None,
            optimized_byte_size: 0,
            is_optimized: false,
            applied_quality: None,
            replaceable: true,
            source_dimensions: (pixel_width, pixel_height),
        }
    }

    /// Pixel dimensions at extraction time, unaffected by resize edits
    pub fn source_dimensions(&self) -> (u32, u32) {
        self.source_dimensions
    }

    /// The bytes that should end up in the document
    pub fn payload(&self) -> &[u8] {
        self.optimized_data.as_deref().unwrap_or(&self.raster_data)
    }

    pub fn set_optimized(&mut self, data: Vec<u8>, quality: Option<u8>) {
        self.optimized_byte_size = data.len();
        self.optimized_data = Some(data);
        self.is_optimized = true;
        self.applied_quality = quality;
    }

    /// Store a resized payload; dimensions change together with the data
    pub fn set_resized(&mut self, data: Vec<u8>, width: u32, height: u32, quality: Option<u8>) {
        self.pixel_width = width;
        self.pixel_height = height;
        self.set_optimized(data, quality);
    }

    /// Drop any optimization and go back to the extracted raster
    pub fn reset_optimization(&mut self) {
        self.optimized_data = None;
        self.optimized_byte_size = 0;
        self.is_optimized = false;
        self.applied_quality = None;
        (self.pixel_width, self.pixel_height) = self.source_dimensions;
    }

    /// Bytes saved by the optimized payload, negative when it grew
    pub fn bytes_saved(&self) -> i64 {
        if self.is_optimized {
            self.original_byte_size as i64 - self.optimized_byte_size as i64
        } else {
            0
        }
    }
}

/// Per-page extraction state
pub struct ExtractionEngine<'p> {
    page_number: u32,
    page: &'p LoadedPage,
    scale: f64,
    next_index: usize,
    seen: HashSet<String>,
    shading_count: usize,
    images: Vec<ExtractedImage>,
}

impl<'p> ExtractionEngine<'p> {
    pub fn new(page_number: u32, page: &'p LoadedPage, scale: f64, first_index: usize) -> Self {
        ExtractionEngine {
            page_number,
            page,
            scale,
            next_index: first_index,
            seen: HashSet::new(),
            shading_count: 0,
            images: Vec::new(),
        }
    }

    /// Extract whatever a paint-image, paint-inline-image or paint-form operator painted
    pub fn extract_from_paint_op(&mut self, name: &str, op: OpCode, transform: &Matrix) {
        if self.seen.contains(name) {
            log::debug!(
                "Page {}: {} already extracted, skipping repeat paint",
                self.page_number,
                name
            );
            return;
        }

        let extracted = match self.rasterize_paint_op(name, op, transform) {
            Ok(extracted) => extracted,
            Err(e) => {
                log::warn!(
                    "Page {}: failed to extract {}: {}",
                    self.page_number,
                    name,
                    e
                );
                return;
            }
        };

        if let Some((kind, raster)) = extracted {
            self.emit(name.to_string(), kind, raster);
        }
    }

    /// Extract the region a shading fill covers, bounded by the current clip
    pub fn extract_from_shading_fill(&mut self, clip: Option<ClipBounds>, transform: &Matrix) {
        let Some(clip) = clip else {
            log::debug!(
                "Page {}: shading fill without clip bounds, skipping",
                self.page_number
            );
            return;
        };

        let bounds = clip.transformed(transform);
        let width = bounds.width() * self.scale;
        let height = bounds.height() * self.scale;
        if width <= 1.0 || height <= 1.0 {
            log::debug!(
                "Page {}: degenerate shading region {:.1}x{:.1}",
                self.page_number,
                width,
                height
            );
            return;
        }

        let x = self.canvas_x(bounds.min_x);
        let y = self.flipped_y(bounds.min_y, height);
        match copy_region(&self.page.render, x, y, width, height) {
            Some(raster) => {
                let name = format!(
                    "page-{}-shading-{}",
                    self.page_number,
                    self.shading_count + 1
                );
                if self.emit(name, ImageKind::RasterizedShading, raster) {
                    self.shading_count += 1;
                }
            }
            None => log::debug!(
                "Page {}: shading region lies outside the render",
                self.page_number
            ),
        }
    }

    /// Records extracted so far, in paint order
    pub fn images(&self) -> &[ExtractedImage] {
        &self.images
    }

    pub fn finish(self) -> Vec<ExtractedImage> {
        self.images
    }

    fn rasterize_paint_op(
        &self,
        name: &str,
        op: OpCode,
        transform: &Matrix,
    ) -> Result<Option<(ImageKind, RgbaImage)>> {
        let Some(object) = self.page.objects.get(name) else {
            log::debug!("Page {}: {} was never loaded", self.page_number, name);
            return Ok(None);
        };

        if let Some(bitmap) = object.bitmap() {
            // Fresh transparent surface at native size
            let mut surface = RgbaImage::new(bitmap.width(), bitmap.height());
            imageops::replace(&mut surface, &bitmap.to_rgba8(), 0, 0);
            return Ok(Some((ImageKind::BitmapImage, surface)));
        }

        if op != OpCode::PaintFormBegin {
            log::debug!(
                "Page {}: {} has no bitmap and is not a form",
                self.page_number,
                name
            );
            return Ok(None);
        }

        let [x0, y0, x1, y1] = object.bbox().unwrap_or(DEFAULT_FORM_BBOX);
        // Shear and rotation are ignored for sizing
        let width = transform.a.abs() * (x1 - x0).abs() * self.scale;
        let height = transform.d.abs() * (y1 - y0).abs() * self.scale;
        if width <= 1.0 || height <= 1.0 {
            log::debug!(
                "Page {}: form {} is degenerate ({:.1}x{:.1})",
                self.page_number,
                name,
                width,
                height
            );
            return Ok(None);
        }

        let x = self.canvas_x(transform.e);
        let y = self.flipped_y(transform.f, height);
        match copy_region(&self.page.render, x, y, width, height) {
            Some(raster) => Ok(Some((ImageKind::RasterizedForm, raster))),
            None => {
                log::debug!(
                    "Page {}: form {} lies outside the render",
                    self.page_number,
                    name
                );
                Ok(None)
            }
        }
    }

    fn canvas_x(&self, doc_x: f64) -> f64 {
        (doc_x - self.page.origin.0) * self.scale
    }

    /// Document y (bottom-left origin) to render-canvas top edge (top-left origin)
    fn flipped_y(&self, doc_y: f64, pixel_height: f64) -> f64 {
        self.page.render.height() as f64 - (doc_y - self.page.origin.1) * self.scale - pixel_height
    }

    fn emit(&mut self, name: String, kind: ImageKind, raster: RgbaImage) -> bool {
        let png = match codec::encode_png(&raster) {
            Ok(png) => png,
            Err(e) => {
                log::warn!(
                    "Page {}: could not encode {}: {}",
                    self.page_number,
                    name,
                    e
                );
                return false;
            }
        };

        let mut record = ExtractedImage::new(
            self.next_index,
            self.page_number,
            name.clone(),
            kind,
            raster.width(),
            raster.height(),
            png,
        );
        record.replaceable = kind == ImageKind::BitmapImage || !self.page.blank_render;
        log::debug!(
            "Page {}: extracted {} #{} ({}, {}x{})",
            self.page_number,
            name,
            record.index,
            kind.as_str(),
            record.pixel_width,
            record.pixel_height
        );
        self.next_index += 1;
        self.seen.insert(name);
        self.images.push(record);
        true
    }
}

/// Copy a pixel rectangle out of the render, clamped to its bounds
fn copy_region(render: &RgbaImage, x: f64, y: f64, width: f64, height: f64) -> Option<RgbaImage> {
    let max_x = render.width() as f64;
    let max_y = render.height() as f64;
    let left = x.round().clamp(0.0, max_x);
    let top = y.round().clamp(0.0, max_y);
    let right = (x + width).round().clamp(0.0, max_x);
    let bottom = (y + height).round().clamp(0.0, max_y);
    if right - left < 1.0 || bottom - top < 1.0 {
        return None;
    }
    Some(
        imageops::crop_imm(
            render,
            left as u32,
            top as u32,
            (right - left) as u32,
            (bottom - top) as u32,
        )
        .to_image(),
    )
}
