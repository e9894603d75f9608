//! Editing session: one loaded document and the images extracted from it.
//!
//! The session owns the source bytes and the record collection. Loading a new
//! document or clearing the session discards every record at once.

use crate::error::{Error, Result};
use crate::extract::{ExtractOptions, ExtractedImage};
use crate::optimize::{self, OptimizeOptions, OptimizeSummary};
use crate::reconstruct::{self, ReconstructionSummary};
use crate::scanner::scan_page;
use crate::source::{LopdfSource, SourceDocument};

/// Outcome of extracting a whole document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub pages: u32,
    pub extracted: usize,
    /// Pages that could not be loaded, in page order
    pub failed_pages: Vec<u32>,
}

#[derive(Debug, Default)]
pub struct EditorSession {
    source: Option<Vec<u8>>,
    images: Vec<ExtractedImage>,
    failed_pages: Vec<u32>,
}

impl EditorSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current document; fails without touching the session if
    /// the bytes are empty or do not parse
    pub fn load(&mut self, bytes: Vec<u8>) -> Result<()> {
        if bytes.is_empty() {
            return Err(Error::EmptySource);
        }
        LopdfSource::load_mem(&bytes)?;
        self.clear();
        self.source = Some(bytes);
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.source.is_some()
    }

    pub fn source(&self) -> Option<&[u8]> {
        self.source.as_deref()
    }

    pub fn extract(&mut self) -> Result<ExtractionReport> {
        self.extract_with(&ExtractOptions::default())
    }

    pub fn extract_with(&mut self, options: &ExtractOptions) -> Result<ExtractionReport> {
        let bytes = self.source.as_deref().ok_or(Error::MissingSource)?;
        let source = LopdfSource::load_mem(bytes)?;
        self.extract_from(&source, options)
    }

    /// Extract every page of `doc`, replacing the current records.
    ///
    /// Indices run on across pages. A page that fails to load is recorded and
    /// skipped, or with `stop_on_page_error` ends extraction with that error;
    /// records from earlier pages are kept either way.
    pub fn extract_from<D: SourceDocument + ?Sized>(
        &mut self,
        doc: &D,
        options: &ExtractOptions,
    ) -> Result<ExtractionReport> {
        options.validate()?;
        self.images.clear();
        self.failed_pages.clear();

        let pages = doc.page_count();
        for page_number in 1..=pages {
            let page = match doc.load_page(page_number, options.render_scale) {
                Ok(page) => page,
                Err(e) => {
                    log::warn!("Skipping page {}: {}", page_number, e);
                    self.failed_pages.push(page_number);
                    if options.stop_on_page_error {
                        return Err(e);
                    }
                    continue;
                }
            };
            let records = scan_page(page_number, &page, options.render_scale, self.images.len());
            log::debug!("Page {}: {} images extracted", page_number, records.len());
            self.images.extend(records);
        }

        log::info!(
            "Extracted {} images from {} pages ({} failed)",
            self.images.len(),
            pages,
            self.failed_pages.len()
        );
        Ok(ExtractionReport {
            pages,
            extracted: self.images.len(),
            failed_pages: self.failed_pages.clone(),
        })
    }

    pub fn images(&self) -> &[ExtractedImage] {
        &self.images
    }

    pub fn failed_pages(&self) -> &[u32] {
        &self.failed_pages
    }

    pub fn image(&self, index: usize) -> Result<&ExtractedImage> {
        self.images
            .iter()
            .find(|image| image.index == index)
            .ok_or(Error::UnknownImage(index))
    }

    pub fn image_mut(&mut self, index: usize) -> Result<&mut ExtractedImage> {
        self.images
            .iter_mut()
            .find(|image| image.index == index)
            .ok_or(Error::UnknownImage(index))
    }

    pub fn optimize_all(&mut self, options: &OptimizeOptions) -> Result<OptimizeSummary> {
        optimize::optimize_all(&mut self.images, options)
    }

    pub fn optimize(&mut self, index: usize, options: &OptimizeOptions) -> Result<()> {
        optimize::optimize_image(self.image_mut(index)?, options)
    }

    pub fn resize(
        &mut self,
        index: usize,
        width: u32,
        height: u32,
        options: &OptimizeOptions,
    ) -> Result<()> {
        optimize::resize_image(self.image_mut(index)?, width, height, options)
    }

    /// Undo optimization of one record
    pub fn reset(&mut self, index: usize) -> Result<()> {
        self.image_mut(index)?.reset_optimization();
        Ok(())
    }

    /// Bytes saved over all optimized records, negative when they grew
    pub fn bytes_saved(&self) -> i64 {
        self.images.iter().map(ExtractedImage::bytes_saved).sum()
    }

    /// Rebuild the loaded document with the optimized records substituted
    pub fn reconstruct(&self) -> Result<(Vec<u8>, ReconstructionSummary)> {
        let bytes = self.source.as_deref().ok_or(Error::MissingSource)?;
        reconstruct::reconstruct_pdf(bytes, &self.images)
    }

    pub fn clear(&mut self) {
        self.source = None;
        self.images.clear();
        self.failed_pages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::operators::{OpCode, OperatorList, Operand};
    use crate::source::{LoadedObject, LoadedPage, ObjectTable};
    use image::{DynamicImage, Rgba, RgbaImage};

    /// Every page paints one 40x30 bitmap; listed pages fail to load
    struct FakeSource {
        pages: u32,
        broken: Vec<u32>,
    }

    impl SourceDocument for FakeSource {
        fn page_count(&self) -> u32 {
            self.pages
        }

        fn load_page(&self, page_number: u32, _scale: f64) -> Result<LoadedPage> {
            if self.broken.contains(&page_number) {
                return Err(Error::page(page_number, "render failed"));
            }
            let mut objects = ObjectTable::new();
            objects.insert(
                "Im1",
                LoadedObject::Bitmap(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                    40,
                    30,
                    Rgba([20, 40, 60, 255]),
                ))),
            );
            Ok(LoadedPage {
                render: RgbaImage::new(100, 100),
                origin: (0.0, 0.0),
                blank_render: false,
                operators: OperatorList::new().with(OpCode::PaintImage, vec![Operand::name("Im1")]),
                objects,
            })
        }
    }

    #[test]
    fn test_indices_run_across_pages() {
        let mut session = EditorSession::new();
        let report = session
            .extract_from(
                &FakeSource {
                    pages: 3,
                    broken: vec![],
                },
                &ExtractOptions::default(),
            )
            .unwrap();

        assert_eq!(report.extracted, 3);
        let indices: Vec<(usize, u32)> = session
            .images()
            .iter()
            .map(|image| (image.index, image.page_number))
            .collect();
        assert_eq!(indices, vec![(0, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn test_page_fault_continues_by_default() {
        let mut session = EditorSession::new();
        let source = FakeSource {
            pages: 3,
            broken: vec![2],
        };
        let report = session
            .extract_from(&source, &ExtractOptions::default())
            .unwrap();

        assert_eq!(report.failed_pages, vec![2]);
        assert_eq!(session.failed_pages(), &[2]);
        let pages: Vec<u32> = session.images().iter().map(|i| i.page_number).collect();
        assert_eq!(pages, vec![1, 3]);
    }

    #[test]
    fn test_page_fault_can_abort() {
        let mut session = EditorSession::new();
        let source = FakeSource {
            pages: 3,
            broken: vec![2],
        };
        let options = ExtractOptions {
            stop_on_page_error: true,
            ..ExtractOptions::default()
        };
        let result = session.extract_from(&source, &options);

        assert!(matches!(result, Err(Error::Page { page: 2, .. })));
        // page 1 is still usable
        assert_eq!(session.images().len(), 1);
        assert_eq!(session.images()[0].page_number, 1);
    }

    #[test]
    fn test_edits_by_index() {
        let mut session = EditorSession::new();
        session
            .extract_from(
                &FakeSource {
                    pages: 2,
                    broken: vec![],
                },
                &ExtractOptions::default(),
            )
            .unwrap();

        let options = OptimizeOptions::default();
        session.optimize(1, &options).unwrap();
        assert!(session.image(1).unwrap().is_optimized);
        assert!(!session.image(0).unwrap().is_optimized);

        session.resize(0, 20, 15, &options).unwrap();
        let resized = session.image(0).unwrap();
        assert_eq!((resized.pixel_width, resized.pixel_height), (20, 15));
        assert_eq!(resized.source_dimensions(), (40, 30));

        session.reset(0).unwrap();
        assert!(!session.image(0).unwrap().is_optimized);
        assert_eq!(session.image(0).unwrap().pixel_width, 40);

        assert!(matches!(
            session.optimize(7, &options),
            Err(Error::UnknownImage(7))
        ));
    }

    #[test]
    fn test_optimize_all_over_session() {
        let mut session = EditorSession::new();
        session
            .extract_from(
                &FakeSource {
                    pages: 2,
                    broken: vec![],
                },
                &ExtractOptions::default(),
            )
            .unwrap();
        let summary = session.optimize_all(&OptimizeOptions::default()).unwrap();
        assert_eq!(summary.optimized, 2);
        for image in session.images() {
            let data = image.optimized_data.as_ref().unwrap();
            assert_eq!(codec::sniff_format(data), Some(image::ImageFormat::Jpeg));
        }
    }

    #[test]
    fn test_invalid_scale_rejected_before_extraction() {
        let mut session = EditorSession::new();
        let source = FakeSource {
            pages: 2,
            broken: vec![],
        };
        session
            .extract_from(&source, &ExtractOptions::default())
            .unwrap();

        let options = ExtractOptions {
            render_scale: 1000.0,
            ..ExtractOptions::default()
        };
        assert!(matches!(
            session.extract_from(&source, &options),
            Err(Error::InvalidRenderScale(_))
        ));
        // earlier records survive
        assert_eq!(session.images().len(), 2);
    }

    #[test]
    fn test_reconstruct_requires_source() {
        let session = EditorSession::new();
        assert!(matches!(session.reconstruct(), Err(Error::MissingSource)));
    }

    #[test]
    fn test_load_rejects_bad_input() {
        let mut session = EditorSession::new();
        assert!(matches!(session.load(Vec::new()), Err(Error::EmptySource)));
        assert!(matches!(
            session.load(b"not a pdf".to_vec()),
            Err(Error::Load(_))
        ));
        assert!(!session.is_loaded());
        assert!(matches!(session.extract(), Err(Error::MissingSource)));
    }

    #[test]
    fn test_clear_discards_everything() {
        let mut session = EditorSession::new();
        session
            .extract_from(
                &FakeSource {
                    pages: 1,
                    broken: vec![],
                },
                &ExtractOptions::default(),
            )
            .unwrap();
        session.clear();
        assert!(session.images().is_empty());
        assert!(!session.is_loaded());
    }
}
