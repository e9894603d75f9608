//! Operator scanner: one linear pass over a page's operator list.
//!
//! Operators are processed strictly in emitted order since every state change
//! affects the operators after it.

use crate::extract::{ExtractedImage, ExtractionEngine};
use crate::geometry::{ClipTracker, Matrix, TransformTracker};
use crate::operators::{NameArg, OpCode, Operand};
use crate::source::LoadedPage;

/// Scan state for one page
pub struct OperatorScanner<'p> {
    page_number: u32,
    transforms: TransformTracker,
    clips: ClipTracker,
    last_dependency: Option<String>,
    engine: ExtractionEngine<'p>,
}

impl<'p> OperatorScanner<'p> {
    pub fn new(page_number: u32, page: &'p LoadedPage, scale: f64, first_index: usize) -> Self {
        OperatorScanner {
            page_number,
            transforms: TransformTracker::new(),
            clips: ClipTracker::new(),
            last_dependency: None,
            engine: ExtractionEngine::new(page_number, page, scale, first_index),
        }
    }

    pub fn transforms(&self) -> &TransformTracker {
        &self.transforms
    }

    pub fn clips(&self) -> &ClipTracker {
        &self.clips
    }

    /// Dispatch a single operator
    pub fn process(&mut self, op: OpCode, args: &[Operand]) {
        match op {
            OpCode::Save => {
                self.transforms.push();
                self.clips.push();
            }
            OpCode::Restore => {
                self.transforms.pop();
                self.clips.pop();
            }
            OpCode::Transform => {
                let values: Option<Vec<f64>> = args.iter().map(Operand::as_number).collect();
                match values.as_deref().and_then(Matrix::from_slice) {
                    Some(matrix) => self.transforms.apply(&matrix),
                    None => log::warn!(
                        "Page {}: ignoring malformed transform {:?}",
                        self.page_number,
                        args
                    ),
                }
            }
            OpCode::ConstructPath => {
                if let Some(Operand::Numbers(points)) = args.first() {
                    self.clips.construct_path(points);
                }
            }
            // Bounds from the preceding path are already current
            OpCode::Clip => {}
            OpCode::ShadingFill => {
                let transform = self.transforms.current();
                self.engine
                    .extract_from_shading_fill(self.clips.current(), &transform);
            }
            OpCode::Dependency => {
                if let NameArg::Named(name) = NameArg::of(args) {
                    self.last_dependency = Some(name.to_string());
                }
            }
            OpCode::PaintImage | OpCode::PaintInlineImage | OpCode::PaintFormBegin => {
                self.paint(op, args);
            }
            OpCode::PaintFormEnd | OpCode::Other => {}
        }
    }

    fn paint(&mut self, op: OpCode, args: &[Operand]) {
        let name = match NameArg::of(args) {
            NameArg::Named(name) => name.to_string(),
            NameArg::Missing if op == OpCode::PaintFormBegin => match &self.last_dependency {
                Some(dependency) => {
                    log::warn!(
                        "Page {}: form paint without a name, falling back to dependency {}",
                        self.page_number,
                        dependency
                    );
                    dependency.clone()
                }
                None => {
                    log::warn!(
                        "Page {}: form paint without a name and no prior dependency",
                        self.page_number
                    );
                    return;
                }
            },
            NameArg::Missing | NameArg::Invalid => {
                log::warn!(
                    "Page {}: skipping {:?} with unusable name argument {:?}",
                    self.page_number,
                    op,
                    args.first()
                );
                return;
            }
        };

        let transform = self.transforms.current();
        self.engine.extract_from_paint_op(&name, op, &transform);
    }

    pub fn finish(self) -> Vec<ExtractedImage> {
        self.engine.finish()
    }
}

/// Scan a loaded page and return its extracted records in paint order.
///
/// Indices are assigned sequentially starting at `first_index`.
pub fn scan_page(
    page_number: u32,
    page: &LoadedPage,
    scale: f64,
    first_index: usize,
) -> Vec<ExtractedImage> {
    let mut scanner = OperatorScanner::new(page_number, page, scale, first_index);
    for (op, args) in page.operators.iter() {
        scanner.process(op, args);
    }
    scanner.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ImageKind;
    use crate::operators::OperatorList;
    use crate::source::{LoadedObject, ObjectTable};
    use image::{DynamicImage, RgbImage, RgbaImage};

    fn numbers(values: &[f64]) -> Vec<Operand> {
        values.iter().map(|v| Operand::Number(*v)).collect()
    }

    fn bitmap(width: u32, height: u32) -> LoadedObject {
        LoadedObject::Bitmap(DynamicImage::ImageRgb8(RgbImage::new(width, height)))
    }

    fn page(operators: OperatorList, objects: ObjectTable) -> LoadedPage {
        LoadedPage {
            render: RgbaImage::new(400, 400),
            origin: (0.0, 0.0),
            blank_render: false,
            operators,
            objects,
        }
    }

    #[test]
    fn test_single_bitmap_page() {
        let mut objects = ObjectTable::new();
        objects.insert("Im1", bitmap(300, 200));
        let ops = OperatorList::new()
            .with(OpCode::Save, vec![])
            .with(OpCode::Transform, numbers(&[300.0, 0.0, 0.0, 200.0, 50.0, 50.0]))
            .with(OpCode::PaintImage, vec![Operand::name("Im1")])
            .with(OpCode::Restore, vec![]);
        let page = page(ops, objects);

        let images = scan_page(1, &page, 1.0, 0);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].page_number, 1);
        assert_eq!(images[0].source_name, "Im1");
        assert_eq!((images[0].pixel_width, images[0].pixel_height), (300, 200));
    }

    #[test]
    fn test_rewrapped_image_extracted_once() {
        let mut objects = ObjectTable::new();
        objects.insert("Im1", bitmap(20, 20));
        objects.insert("Fm1", LoadedObject::Form { bbox: Some([0.0, 0.0, 50.0, 50.0]) });
        let ops = OperatorList::new()
            .with(OpCode::PaintImage, vec![Operand::name("Im1")])
            .with(OpCode::Dependency, vec![Operand::name("Fm1")])
            .with(OpCode::Save, vec![])
            .with(OpCode::PaintFormBegin, vec![Operand::name("Fm1")])
            .with(OpCode::PaintImage, vec![Operand::name("Im1")])
            .with(OpCode::PaintFormEnd, vec![])
            .with(OpCode::Restore, vec![]);
        let page = page(ops, objects);

        let images = scan_page(1, &page, 1.0, 0);
        let im1_count = images.iter().filter(|i| i.source_name == "Im1").count();
        assert_eq!(im1_count, 1);
        assert_eq!(images.len(), 2);
        assert_eq!(images[1].kind, ImageKind::RasterizedForm);
    }

    #[test]
    fn test_form_paint_without_name_uses_last_dependency() {
        let mut objects = ObjectTable::new();
        objects.insert("Fm7", LoadedObject::Form { bbox: Some([0.0, 0.0, 40.0, 40.0]) });
        let ops = OperatorList::new()
            .with(OpCode::Dependency, vec![Operand::name("Fm7")])
            .with(OpCode::PaintFormBegin, vec![Operand::Null]);
        let page = page(ops, objects);

        let images = scan_page(1, &page, 1.0, 0);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].source_name, "Fm7");
    }

    #[test]
    fn test_image_paint_without_name_does_not_fall_back() {
        let mut objects = ObjectTable::new();
        objects.insert("Im1", bitmap(20, 20));
        let ops = OperatorList::new()
            .with(OpCode::Dependency, vec![Operand::name("Im1")])
            .with(OpCode::PaintImage, vec![Operand::Null]);
        let page = page(ops, objects);
        assert!(scan_page(1, &page, 1.0, 0).is_empty());
    }

    #[test]
    fn test_invalid_name_skipped_without_aborting_page() {
        let mut objects = ObjectTable::new();
        objects.insert("Im2", bitmap(8, 8));
        let ops = OperatorList::new()
            .with(OpCode::PaintImage, vec![Operand::Number(12.0)])
            .with(OpCode::PaintImage, vec![Operand::Object { name: None }])
            .with(
                OpCode::PaintInlineImage,
                vec![Operand::Object {
                    name: Some("Im2".to_string()),
                }],
            );
        let page = page(ops, objects);

        let images = scan_page(1, &page, 1.0, 0);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].source_name, "Im2");
    }

    #[test]
    fn test_degenerate_form_produces_nothing() {
        let mut objects = ObjectTable::new();
        objects.insert("Fm1", LoadedObject::Form { bbox: Some([0.0, 0.0, 1.0, 1.0]) });
        let ops = OperatorList::new()
            .with(OpCode::Transform, numbers(&[1.0, 0.0, 0.0, 300.0, 0.0, 0.0]))
            .with(OpCode::PaintFormBegin, vec![Operand::name("Fm1")]);
        let page = page(ops, objects);
        assert!(scan_page(1, &page, 1.0, 0).is_empty());
    }

    #[test]
    fn test_shading_uses_clip_from_current_scope() {
        let ops = OperatorList::new()
            .with(OpCode::Save, vec![])
            .with(
                OpCode::ConstructPath,
                vec![Operand::Numbers(vec![10.0, 10.0, 110.0, 60.0])],
            )
            .with(OpCode::Clip, vec![])
            .with(OpCode::ShadingFill, vec![Operand::name("Sh0")])
            .with(OpCode::Restore, vec![])
            // clip scope is gone again
            .with(OpCode::ShadingFill, vec![Operand::name("Sh0")]);
        let page = page(ops, ObjectTable::new());

        let images = scan_page(4, &page, 1.0, 0);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].source_name, "page-4-shading-1");
        assert_eq!((images[0].pixel_width, images[0].pixel_height), (100, 50));
    }

    #[test]
    fn test_indices_follow_paint_order() {
        let mut objects = ObjectTable::new();
        objects.insert("ImA", bitmap(4, 4));
        objects.insert("ImB", bitmap(6, 6));
        let ops = OperatorList::new()
            .with(OpCode::PaintImage, vec![Operand::name("ImB")])
            .with(OpCode::PaintImage, vec![Operand::name("ImA")]);
        let page = page(ops, objects);

        let images = scan_page(1, &page, 1.0, 10);
        let order: Vec<(usize, &str)> = images
            .iter()
            .map(|i| (i.index, i.source_name.as_str()))
            .collect();
        assert_eq!(order, vec![(10, "ImB"), (11, "ImA")]);
    }

    #[test]
    fn test_rescanning_is_idempotent() {
        let mut objects = ObjectTable::new();
        objects.insert("Im1", bitmap(30, 20));
        objects.insert("Fm1", LoadedObject::Form { bbox: Some([0.0, 0.0, 60.0, 60.0]) });
        let ops = OperatorList::new()
            .with(OpCode::PaintImage, vec![Operand::name("Im1")])
            .with(OpCode::Save, vec![])
            .with(OpCode::Transform, numbers(&[2.0, 0.0, 0.0, 2.0, 10.0, 10.0]))
            .with(OpCode::PaintFormBegin, vec![Operand::name("Fm1")])
            .with(OpCode::Restore, vec![]);
        let page = page(ops, objects);

        let first = scan_page(1, &page, 1.0, 0);
        let second = scan_page(1, &page, 1.0, 0);
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn test_scanner_state_balanced_after_nested_scopes() {
        let page = page(OperatorList::new(), ObjectTable::new());
        let mut scanner = OperatorScanner::new(1, &page, 1.0, 0);
        scanner.process(OpCode::Transform, &numbers(&[1.0, 0.0, 0.0, 1.0, 3.0, 4.0]));
        scanner.process(OpCode::ConstructPath, &[Operand::Numbers(vec![0.0, 0.0, 5.0, 5.0])]);
        let matrix = scanner.transforms().current();
        let clip = scanner.clips().current();

        for depth in 0..4 {
            scanner.process(OpCode::Save, &[]);
            let k = depth as f64 + 1.5;
            scanner.process(OpCode::Transform, &numbers(&[k, 0.0, 0.0, k, 1.0, 1.0]));
            scanner.process(OpCode::ConstructPath, &[Operand::Numbers(vec![k, k, 9.0, 9.0])]);
        }
        for _ in 0..4 {
            scanner.process(OpCode::Restore, &[]);
        }

        assert_eq!(scanner.transforms().current(), matrix);
        assert_eq!(scanner.clips().current(), clip);
    }
}
