//! Document-loading side: what the extraction core needs from a parsed PDF.
//!
//! A [`SourceDocument`] hands out one [`LoadedPage`] at a time: a full-page
//! render, the page's operator list and the table of objects those operators
//! name. [`LopdfSource`] builds all three from raw bytes with lopdf; rendering
//! is delegated to a [`PageRenderer`].

use crate::codec::{self, decompress_stream, name_of, object_to_f64};
use crate::error::{Error, Result};
use crate::geometry::Matrix;
use crate::operators::{OpCode, OperatorList, Operand};
use image::{DynamicImage, RgbaImage};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::{HashMap, HashSet};

/// An object the page's operators can refer to by name
#[derive(Debug, Clone)]
pub enum LoadedObject {
    /// Decoded raster, at its native pixel dimensions
    Bitmap(DynamicImage),
    /// Form XObject; `bbox` is `[x0, y0, x1, y1]` in form space
    Form { bbox: Option<[f64; 4]> },
}

impl LoadedObject {
    pub fn bitmap(&self) -> Option<&DynamicImage> {
        match self {
            LoadedObject::Bitmap(img) => Some(img),
            LoadedObject::Form { .. } => None,
        }
    }

    pub fn bbox(&self) -> Option<[f64; 4]> {
        match self {
            LoadedObject::Form { bbox } => *bbox,
            LoadedObject::Bitmap(_) => None,
        }
    }
}

/// Name-keyed objects loaded for one page
#[derive(Debug, Clone, Default)]
pub struct ObjectTable {
    objects: HashMap<String, LoadedObject>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, object: LoadedObject) {
        self.objects.insert(name.into(), object);
    }

    pub fn get(&self, name: &str) -> Option<&LoadedObject> {
        self.objects.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Everything needed to scan one page
#[derive(Debug, Clone)]
pub struct LoadedPage {
    /// Full-page render; top-left origin, `scale` pixels per PDF unit
    pub render: RgbaImage,
    /// Lower-left corner of the MediaBox, in PDF units
    pub origin: (f64, f64),
    /// The render carries no painted content, so crops from it are empty
    pub blank_render: bool,
    pub operators: OperatorList,
    pub objects: ObjectTable,
}

/// A parsed document that can produce pages for extraction
pub trait SourceDocument {
    fn page_count(&self) -> u32;

    /// Render and decode one page (1-based).
    ///
    /// Errors are page-level faults: they do not affect other pages.
    fn load_page(&self, page_number: u32, scale: f64) -> Result<LoadedPage>;
}

/// Rasterizes a whole page at a given scale
pub trait PageRenderer {
    fn render(&self, doc: &Document, page_id: ObjectId, scale: f64) -> Result<RgbaImage>;

    /// Whether renders never contain page content
    fn is_blank(&self) -> bool {
        false
    }
}

/// Largest page canvas a renderer may allocate (8192 x 8192)
pub const MAX_CANVAS_PIXELS: f64 = 67_108_864.0;

/// Produces a transparent canvas the size of the page's MediaBox.
///
/// Forms and shadings cropped from it come out blank; plug in a real
/// renderer to capture vector content.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlankRenderer;

impl PageRenderer for BlankRenderer {
    fn render(&self, doc: &Document, page_id: ObjectId, scale: f64) -> Result<RgbaImage> {
        let [x0, y0, x1, y1] = media_box(doc, page_id);
        let width = ((x1 - x0).abs() * scale).round().max(1.0);
        let height = ((y1 - y0).abs() * scale).round().max(1.0);
        let pixels = width * height;
        if pixels.is_nan() || pixels > MAX_CANVAS_PIXELS {
            return Err(Error::Processing(format!(
                "page canvas {}x{} exceeds {} pixels",
                width, height, MAX_CANVAS_PIXELS
            )));
        }
        Ok(RgbaImage::new(width as u32, height as u32))
    }

    fn is_blank(&self) -> bool {
        true
    }
}

/// Page MediaBox, walking up the page tree; US Letter when absent
fn media_box(doc: &Document, page_id: ObjectId) -> [f64; 4] {
    let mut current = Some(page_id);
    let mut visited = HashSet::new();
    while let Some(id) = current {
        if !visited.insert(id) {
            break;
        }
        let dict = match doc.get_object(id).and_then(Object::as_dict) {
            Ok(d) => d,
            Err(_) => break,
        };
        if let Some(rect) = dict.get(b"MediaBox").ok().and_then(|o| parse_rect(doc, o)) {
            return rect;
        }
        current = match dict.get(b"Parent") {
            Ok(Object::Reference(parent)) => Some(*parent),
            _ => None,
        };
    }
    [0.0, 0.0, 612.0, 792.0]
}

fn parse_rect(doc: &Document, obj: &Object) -> Option<[f64; 4]> {
    let arr = match obj {
        Object::Array(arr) => arr,
        Object::Reference(id) => return parse_rect(doc, doc.get_object(*id).ok()?),
        _ => return None,
    };
    if arr.len() < 4 {
        return None;
    }
    Some([
        object_to_f64(&arr[0])?,
        object_to_f64(&arr[1])?,
        object_to_f64(&arr[2])?,
        object_to_f64(&arr[3])?,
    ])
}

/// Parse a transformation matrix from a dictionary's /Matrix entry
fn parse_matrix_from_dict(dict: &Dictionary) -> Matrix {
    dict.get(b"Matrix")
        .ok()
        .and_then(|m| match m {
            Object::Array(arr) => {
                let values: Option<Vec<f64>> = arr.iter().map(object_to_f64).collect();
                Matrix::from_slice(&values?)
            }
            _ => None,
        })
        .unwrap_or_default()
}

/// Resolve a reference to get the actual object
fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        _ => Some(obj),
    }
}

/// Get resources for a page, checking parent pages if needed
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Object> {
    let mut current = Some(page_id);
    let mut visited = HashSet::new();
    while let Some(id) = current {
        if !visited.insert(id) {
            return None;
        }
        let dict = doc.get_object(id).and_then(Object::as_dict).ok()?;
        if let Ok(resources) = dict.get(b"Resources") {
            return Some(resources);
        }
        current = match dict.get(b"Parent") {
            Ok(Object::Reference(parent)) => Some(*parent),
            _ => None,
        };
    }
    None
}

/// Get XObjects from resources (name -> object ID)
fn xobjects_from_resources(doc: &Document, resources: Option<&Object>) -> HashMap<String, ObjectId> {
    let mut result = HashMap::new();

    let res_dict = match resources.and_then(|r| resolve(doc, r)) {
        Some(Object::Dictionary(d)) => d,
        _ => return result,
    };

    let xobj_dict = match res_dict.get(b"XObject").ok().and_then(|x| resolve(doc, x)) {
        Some(Object::Dictionary(d)) => d,
        _ => return result,
    };

    for (name, value) in xobj_dict.iter() {
        if let Object::Reference(obj_id) = value {
            result.insert(String::from_utf8_lossy(name).to_string(), *obj_id);
        }
    }

    result
}

/// lopdf-backed source document
pub struct LopdfSource<R = BlankRenderer> {
    doc: Document,
    pages: Vec<ObjectId>,
    renderer: R,
}

impl LopdfSource<BlankRenderer> {
    pub fn load_mem(bytes: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(bytes).map_err(|e| Error::Load(e.to_string()))?;
        Ok(Self::with_renderer(doc, BlankRenderer))
    }
}

impl<R: PageRenderer> LopdfSource<R> {
    pub fn with_renderer(doc: Document, renderer: R) -> Self {
        let pages = doc.get_pages().into_values().collect();
        LopdfSource {
            doc,
            pages,
            renderer,
        }
    }

    fn page_id(&self, page_number: u32) -> Result<ObjectId> {
        page_number
            .checked_sub(1)
            .and_then(|i| self.pages.get(i as usize))
            .copied()
            .ok_or_else(|| Error::page(page_number, "no such page"))
    }
}

impl<R: PageRenderer> SourceDocument for LopdfSource<R> {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn load_page(&self, page_number: u32, scale: f64) -> Result<LoadedPage> {
        let page_id = self.page_id(page_number)?;

        let render = self
            .renderer
            .render(&self.doc, page_id, scale)
            .map_err(|e| Error::page(page_number, format!("render failed: {}", e)))?;

        let content_bytes = self
            .doc
            .get_page_content(page_id)
            .map_err(|e| Error::page(page_number, format!("unreadable content: {}", e)))?;
        let content = Content::decode(&content_bytes)
            .map_err(|e| Error::page(page_number, format!("undecodable content: {}", e)))?;

        let [x0, y0, x1, y1] = media_box(&self.doc, page_id);
        let xobjects = xobjects_from_resources(&self.doc, page_resources(&self.doc, page_id));
        let mut walker = PageWalker::new(&self.doc, &xobjects);
        walker.walk(&content.operations, &xobjects, None);

        log::debug!(
            "Page {}: {} operators, {} objects loaded",
            page_number,
            walker.ops.len(),
            walker.objects.len()
        );

        Ok(LoadedPage {
            render,
            origin: (x0.min(x1), y0.min(y1)),
            blank_render: self.renderer.is_blank(),
            operators: walker.ops,
            objects: walker.objects,
        })
    }
}

fn is_path_operator(op: &str) -> bool {
    matches!(op, "m" | "l" | "c" | "v" | "y" | "h" | "re")
}

/// Translates lopdf content operations into an operator list, inlining forms
struct PageWalker<'a> {
    doc: &'a Document,
    ops: OperatorList,
    objects: ObjectTable,
    /// Object ID -> name it is known by on this page
    names: HashMap<ObjectId, String>,
    active_forms: HashSet<ObjectId>,
    path: Option<Vec<f64>>,
}

impl<'a> PageWalker<'a> {
    fn new(doc: &'a Document, page_xobjects: &HashMap<String, ObjectId>) -> Self {
        let names = page_xobjects
            .iter()
            .map(|(name, id)| (*id, name.clone()))
            .collect();
        PageWalker {
            doc,
            ops: OperatorList::new(),
            objects: ObjectTable::new(),
            names,
            active_forms: HashSet::new(),
            path: None,
        }
    }

    fn walk(
        &mut self,
        operations: &[Operation],
        xobjects: &HashMap<String, ObjectId>,
        scope: Option<&str>,
    ) {
        for op in operations {
            let operator = op.operator.as_str();
            if is_path_operator(operator) {
                self.extend_path(operator, &op.operands);
                continue;
            }
            self.flush_path();

            match operator {
                "q" => self.ops.push(OpCode::Save, vec![]),
                "Q" => self.ops.push(OpCode::Restore, vec![]),
                "cm" => {
                    let args = op
                        .operands
                        .iter()
                        .map(|o| object_to_f64(o).map_or(Operand::Null, Operand::Number))
                        .collect();
                    self.ops.push(OpCode::Transform, args);
                }
                "W" | "W*" => self.ops.push(OpCode::Clip, vec![]),
                "sh" => {
                    let name = op.operands.first().and_then(name_of);
                    self.ops
                        .push(OpCode::ShadingFill, name.into_iter().map(Operand::Name).collect());
                }
                "Do" => match op.operands.first().and_then(name_of) {
                    Some(name) => self.paint_xobject(&name, xobjects, scope),
                    None => self.ops.push(OpCode::PaintImage, vec![Operand::Null]),
                },
                _ => {}
            }
        }
        self.flush_path();
    }

    fn extend_path(&mut self, operator: &str, operands: &[Object]) {
        let nums: Vec<f64> = operands.iter().filter_map(object_to_f64).collect();
        let path = self.path.get_or_insert_with(Vec::new);
        match operator {
            "re" if nums.len() >= 4 => {
                let (x, y, w, h) = (nums[0], nums[1], nums[2], nums[3]);
                path.extend_from_slice(&[x, y, x + w, y + h]);
            }
            "re" => {}
            _ => {
                let even = nums.len() - nums.len() % 2;
                path.extend_from_slice(&nums[..even]);
            }
        }
    }

    fn flush_path(&mut self) {
        if let Some(points) = self.path.take() {
            self.ops
                .push(OpCode::ConstructPath, vec![Operand::Numbers(points)]);
        }
    }

    /// Name an XObject as it should appear in the object table
    fn qualified_name(&mut self, id: Option<ObjectId>, name: &str, scope: Option<&str>) -> String {
        if let Some(known) = id.and_then(|id| self.names.get(&id)) {
            return known.clone();
        }
        let qualified = match scope {
            Some(form) => format!("{}/{}", form, name),
            None => name.to_string(),
        };
        if let Some(id) = id {
            self.names.insert(id, qualified.clone());
        }
        qualified
    }

    fn paint_xobject(
        &mut self,
        name: &str,
        xobjects: &HashMap<String, ObjectId>,
        scope: Option<&str>,
    ) {
        let doc = self.doc;
        let id = xobjects.get(name).copied();
        let qualified = self.qualified_name(id, name, scope);

        let stream = match id.and_then(|id| doc.get_object(id).ok()) {
            Some(Object::Stream(s)) => s,
            _ => {
                log::debug!("XObject {} is not a loadable stream", qualified);
                self.ops.push(OpCode::PaintImage, vec![Operand::Name(qualified)]);
                return;
            }
        };

        match stream.dict.get(b"Subtype").ok().and_then(name_of).as_deref() {
            Some("Image") => {
                if !self.objects.contains(&qualified) {
                    match codec::decode_image_xobject(stream, doc) {
                        Ok(img) => self.objects.insert(qualified.clone(), LoadedObject::Bitmap(img)),
                        Err(e) => log::warn!("Could not decode image {}: {}", qualified, e),
                    }
                }
                self.ops.push(OpCode::PaintImage, vec![Operand::Name(qualified)]);
            }
            Some("Form") => {
                if let Some(form_id) = id {
                    self.paint_form(form_id, stream, qualified, xobjects);
                }
            }
            other => log::debug!("Ignoring XObject {} with subtype {:?}", qualified, other),
        }
    }

    fn paint_form(
        &mut self,
        form_id: ObjectId,
        stream: &'a lopdf::Stream,
        name: String,
        parent_xobjects: &HashMap<String, ObjectId>,
    ) {
        // Avoid infinite recursion
        if !self.active_forms.insert(form_id) {
            log::warn!("Skipping recursive form {}", name);
            return;
        }

        let bbox = stream
            .dict
            .get(b"BBox")
            .ok()
            .and_then(|b| parse_rect(self.doc, b));
        self.objects.insert(name.clone(), LoadedObject::Form { bbox });

        let m = parse_matrix_from_dict(&stream.dict);
        self.ops.push(OpCode::Dependency, vec![Operand::Name(name.clone())]);
        self.ops.push(OpCode::Save, vec![]);
        self.ops.push(
            OpCode::Transform,
            [m.a, m.b, m.c, m.d, m.e, m.f]
                .into_iter()
                .map(Operand::Number)
                .collect(),
        );
        self.ops
            .push(OpCode::PaintFormBegin, vec![Operand::Name(name.clone())]);

        let form_xobjects = match stream.dict.get(b"Resources") {
            Ok(resources) => xobjects_from_resources(self.doc, Some(resources)),
            Err(_) => parent_xobjects.clone(),
        };
        match Content::decode(&decompress_stream(stream)) {
            Ok(content) => self.walk(&content.operations, &form_xobjects, Some(name.as_str())),
            Err(e) => log::warn!("Could not decode content of form {}: {}", name, e),
        }

        self.ops.push(OpCode::PaintFormEnd, vec![]);
        self.ops.push(OpCode::Restore, vec![]);
        self.active_forms.remove(&form_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    fn ops(list: &[(&str, Vec<Object>)]) -> Vec<u8> {
        let operations: Vec<_> = list
            .iter()
            .map(|(op, operands)| Operation::new(op, operands.clone()))
            .collect();
        Content { operations }.encode().unwrap()
    }

    /// One Letter page painting a 30x20 image, then a form that clips and
    /// paints the same image again
    fn sample_document() -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 30,
                "Height" => 20,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            vec![128u8; 30 * 20 * 3],
        ));

        let form_content = ops(&[
            ("m", vec![0.into(), 0.into()]),
            ("l", vec![10.into(), 0.into()]),
            ("l", vec![10.into(), 10.into()]),
            ("h", vec![]),
            ("W", vec![]),
            ("n", vec![]),
            ("Do", vec!["Im1".into()]),
        ]);
        let form_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), 50.into(), 50.into()],
                "Resources" => dictionary! { "XObject" => dictionary! { "Im1" => image_id } },
            },
            form_content,
        ));

        let page_content = ops(&[
            ("q", vec![]),
            ("cm", vec![150.into(), 0.into(), 0.into(), 100.into(), 50.into(), 600.into()]),
            ("Do", vec!["Im1".into()]),
            ("Q", vec![]),
            ("q", vec![]),
            ("cm", vec![1.into(), 0.into(), 0.into(), 1.into(), 100.into(), 100.into()]),
            ("Do", vec!["Fm1".into()]),
            ("Q", vec![]),
        ]);
        let content_id = doc.add_object(Stream::new(dictionary! {}, page_content));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im1" => image_id, "Fm1" => form_id },
            },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::from(page_id)],
                "Count" => 1i64,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    #[test]
    fn test_walker_emits_operator_sequence() {
        let source = LopdfSource::with_renderer(sample_document(), BlankRenderer);
        assert_eq!(source.page_count(), 1);
        let page = source.load_page(1, 1.0).unwrap();

        let codes: Vec<OpCode> = page.operators.iter().map(|(op, _)| op).collect();
        assert_eq!(
            codes,
            vec![
                OpCode::Save,
                OpCode::Transform,
                OpCode::PaintImage,
                OpCode::Restore,
                OpCode::Save,
                OpCode::Transform,
                OpCode::Dependency,
                OpCode::Save,
                OpCode::Transform,
                OpCode::PaintFormBegin,
                OpCode::ConstructPath,
                OpCode::Clip,
                OpCode::PaintImage,
                OpCode::PaintFormEnd,
                OpCode::Restore,
                OpCode::Restore,
            ]
        );

        let (_, path) = page.operators.iter().nth(10).unwrap();
        assert_eq!(
            path,
            &[Operand::Numbers(vec![0.0, 0.0, 10.0, 0.0, 10.0, 10.0])][..]
        );
    }

    #[test]
    fn test_nested_reference_reuses_page_name() {
        let source = LopdfSource::with_renderer(sample_document(), BlankRenderer);
        let page = source.load_page(1, 1.0).unwrap();

        let painted: Vec<&[Operand]> = page
            .operators
            .iter()
            .filter(|(op, _)| *op == OpCode::PaintImage)
            .map(|(_, args)| args)
            .collect();
        assert_eq!(painted.len(), 2);
        assert_eq!(painted[0], painted[1]);
        assert_eq!(painted[0][0], Operand::name("Im1"));
        assert_eq!(page.objects.len(), 2);
    }

    #[test]
    fn test_objects_are_decoded() {
        let source = LopdfSource::with_renderer(sample_document(), BlankRenderer);
        let page = source.load_page(1, 2.0).unwrap();

        let bitmap = page.objects.get("Im1").and_then(LoadedObject::bitmap).unwrap();
        assert_eq!((bitmap.width(), bitmap.height()), (30, 20));
        assert_eq!(
            page.objects.get("Fm1").and_then(LoadedObject::bbox),
            Some([0.0, 0.0, 50.0, 50.0])
        );
        // MediaBox inherited from the page tree, scaled
        assert_eq!(page.render.dimensions(), (1224, 1584));
    }

    #[test]
    fn test_missing_page_is_page_fault() {
        let source = LopdfSource::with_renderer(sample_document(), BlankRenderer);
        assert!(matches!(
            source.load_page(2, 1.0),
            Err(Error::Page { page: 2, .. })
        ));
        assert!(matches!(
            source.load_page(0, 1.0),
            Err(Error::Page { page: 0, .. })
        ));
    }

    #[test]
    fn test_unparseable_bytes_fail_to_load() {
        assert!(matches!(
            LopdfSource::load_mem(b"not a pdf"),
            Err(Error::Load(_))
        ));
    }

    fn with_media_box(rect: [i64; 4]) -> Document {
        let mut doc = sample_document();
        let page_id = doc.get_pages()[&1];
        doc.get_object_mut(page_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("MediaBox", rect.iter().map(|v| Object::Integer(*v)).collect::<Vec<_>>());
        doc
    }

    #[test]
    fn test_page_origin_and_blank_flag() {
        let source = LopdfSource::with_renderer(with_media_box([100, 50, 400, 250]), BlankRenderer);
        let page = source.load_page(1, 2.0).unwrap();
        assert_eq!(page.origin, (100.0, 50.0));
        assert!(page.blank_render);
        assert_eq!(page.render.dimensions(), (600, 400));
    }

    #[test]
    fn test_oversized_canvas_is_page_fault() {
        // 14400pt square at 2x would need about 830 million pixels
        let source = LopdfSource::with_renderer(with_media_box([0, 0, 14400, 14400]), BlankRenderer);
        assert!(matches!(
            source.load_page(1, 2.0),
            Err(Error::Page { page: 1, .. })
        ));
    }
}
