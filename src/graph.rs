//! Destination-document object graph, behind a narrow interface.
//!
//! Reconstruction only needs to list a page's XObjects, overwrite a stream
//! in place, embed a new raster, repoint an XObject name and serialize.
//! [`LopdfGraph`] provides that over a mutable `lopdf::Document`.

use crate::codec::{self, dict_u32, name_of};
use crate::error::{Error, Result};
use image::RgbaImage;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::{BTreeMap, HashSet};

/// One entry of a page's /XObject resource dictionary
#[derive(Debug, Clone, PartialEq)]
pub struct XObjectEntry {
    pub key: String,
    /// Indirect reference of the XObject; `None` if it is not a reachable indirect stream
    pub reference: Option<ObjectId>,
    pub subtype: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// The operations reconstruction performs on a destination document
pub trait ObjectGraph {
    /// 1-based page numbers, ascending
    fn page_numbers(&self) -> Vec<u32>;

    /// Entries of the page's XObject dictionary, in dictionary order
    fn xobjects(&self, page_number: u32) -> Result<Vec<XObjectEntry>>;

    /// Replace an existing stream's dictionary and bytes, keeping its object ID
    fn overwrite_stream(
        &mut self,
        reference: ObjectId,
        dict: Dictionary,
        content: Vec<u8>,
    ) -> Result<()>;

    /// Add a new image XObject (with SMask when translucent) and return its reference
    fn embed_rgba(&mut self, image: &RgbaImage) -> Result<ObjectId>;

    /// Point a page's XObject name at another object
    fn set_xobject(&mut self, page_number: u32, key: &str, reference: ObjectId) -> Result<()>;

    /// Write the document out, without object streams
    fn serialize(&mut self) -> Result<Vec<u8>>;
}

/// A value after at most one level of indirection
#[derive(Debug, Clone, Copy)]
pub enum Resolved<'a> {
    /// Inline value that is not a dictionary
    Direct(&'a Object),
    /// Indirect object that is not a dictionary, typically a stream
    Reference(ObjectId, &'a Object),
    /// A dictionary, with the ID of the object holding it when reached indirectly
    Dictionary(&'a Dictionary, Option<ObjectId>),
}

/// Resolve one level of indirection; `None` for a dangling reference
pub fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<Resolved<'a>> {
    match obj {
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(Object::Dictionary(dict)) => Some(Resolved::Dictionary(dict, Some(*id))),
            Ok(target) => Some(Resolved::Reference(*id, target)),
            Err(_) => None,
        },
        Object::Dictionary(dict) => Some(Resolved::Dictionary(dict, None)),
        other => Some(Resolved::Direct(other)),
    }
}

/// Where a dictionary lives, so it can be borrowed mutably later
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DictLocation {
    /// The dictionary is an indirect object
    Indirect(ObjectId),
    /// The dictionary is inline under a key of another object's dictionary
    Inline(ObjectId),
}

/// lopdf-backed destination document
pub struct LopdfGraph {
    doc: Document,
    pages: BTreeMap<u32, ObjectId>,
}

impl LopdfGraph {
    pub fn new(doc: Document) -> Self {
        let pages = doc.get_pages();
        LopdfGraph { doc, pages }
    }

    pub fn load_mem(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::EmptySource);
        }
        let doc = Document::load_mem(bytes).map_err(|e| Error::Load(e.to_string()))?;
        Ok(Self::new(doc))
    }

    fn page_id(&self, page_number: u32) -> Result<ObjectId> {
        self.pages
            .get(&page_number)
            .copied()
            .ok_or_else(|| Error::Processing(format!("no page {}", page_number)))
    }

    /// Locate the page's Resources dictionary, following /Parent inheritance
    fn resources_location(&self, page_number: u32) -> Result<DictLocation> {
        let mut current = Some(self.page_id(page_number)?);
        let mut visited = HashSet::new();
        while let Some(id) = current {
            if !visited.insert(id) {
                break;
            }
            let dict = self.doc.get_object(id)?.as_dict()?;
            if let Ok(resources) = dict.get(b"Resources") {
                return match resolve(&self.doc, resources) {
                    Some(Resolved::Dictionary(_, Some(res_id))) => Ok(DictLocation::Indirect(res_id)),
                    Some(Resolved::Dictionary(_, None)) => Ok(DictLocation::Inline(id)),
                    _ => Err(Error::Processing(format!(
                        "page {} has unresolvable resources",
                        page_number
                    ))),
                };
            }
            current = match dict.get(b"Parent") {
                Ok(Object::Reference(parent)) => Some(*parent),
                _ => None,
            };
        }
        Err(Error::Processing(format!("page {} has no resources", page_number)))
    }

    fn dict_at(&self, location: DictLocation, key: &[u8]) -> Result<&Dictionary> {
        match location {
            DictLocation::Indirect(id) => Ok(self.doc.get_object(id)?.as_dict()?),
            DictLocation::Inline(holder) => {
                Ok(self.doc.get_object(holder)?.as_dict()?.get(key)?.as_dict()?)
            }
        }
    }

    fn dict_at_mut(&mut self, location: DictLocation, key: &[u8]) -> Result<&mut Dictionary> {
        match location {
            DictLocation::Indirect(id) => Ok(self.doc.get_object_mut(id)?.as_dict_mut()?),
            DictLocation::Inline(holder) => Ok(self
                .doc
                .get_object_mut(holder)?
                .as_dict_mut()?
                .get_mut(key)?
                .as_dict_mut()?),
        }
    }

    /// XObject dictionary of a page, plus whether it is indirect
    fn xobject_dict(&self, page_number: u32) -> Result<(&Dictionary, Option<ObjectId>)> {
        let resources = self.dict_at(self.resources_location(page_number)?, b"Resources")?;
        let xobjects = resources.get(b"XObject")?;
        match resolve(&self.doc, xobjects) {
            Some(Resolved::Dictionary(dict, id)) => Ok((dict, id)),
            _ => Err(Error::Processing(format!(
                "page {} has an unresolvable XObject dictionary",
                page_number
            ))),
        }
    }

    fn entry_for(&self, key: &[u8], value: &Object) -> XObjectEntry {
        let key = String::from_utf8_lossy(key).to_string();
        let (reference, dict) = match resolve(&self.doc, value) {
            Some(Resolved::Reference(id, Object::Stream(stream))) => (Some(id), Some(&stream.dict)),
            Some(Resolved::Direct(Object::Stream(stream))) => (None, Some(&stream.dict)),
            _ => (None, None),
        };
        XObjectEntry {
            key,
            reference,
            subtype: dict.and_then(|d| d.get(b"Subtype").ok()).and_then(name_of),
            width: dict.and_then(|d| dict_u32(d, b"Width")),
            height: dict.and_then(|d| dict_u32(d, b"Height")),
        }
    }
}

impl ObjectGraph for LopdfGraph {
    fn page_numbers(&self) -> Vec<u32> {
        self.pages.keys().copied().collect()
    }

    fn xobjects(&self, page_number: u32) -> Result<Vec<XObjectEntry>> {
        let (dict, _) = self.xobject_dict(page_number)?;
        Ok(dict
            .iter()
            .map(|(key, value)| self.entry_for(key, value))
            .collect())
    }

    fn overwrite_stream(
        &mut self,
        reference: ObjectId,
        mut dict: Dictionary,
        content: Vec<u8>,
    ) -> Result<()> {
        self.doc.get_object(reference)?.as_stream()?;
        dict.set("Length", Object::Integer(content.len() as i64));
        self.doc
            .objects
            .insert(reference, Object::Stream(Stream::new(dict, content)));
        Ok(())
    }

    fn embed_rgba(&mut self, image: &RgbaImage) -> Result<ObjectId> {
        let (mut main, smask) = codec::rgba_image_streams(image)?;
        if let Some(smask) = smask {
            let smask_id = self.doc.add_object(Object::Stream(smask));
            main.dict.set("SMask", Object::Reference(smask_id));
        }
        Ok(self.doc.add_object(Object::Stream(main)))
    }

    fn set_xobject(&mut self, page_number: u32, key: &str, reference: ObjectId) -> Result<()> {
        let (_, xobject_id) = self.xobject_dict(page_number)?;
        let target = match xobject_id {
            Some(id) => self.doc.get_object_mut(id)?.as_dict_mut()?,
            None => {
                let resources = self.resources_location(page_number)?;
                self.dict_at_mut(resources, b"Resources")?
                    .get_mut(b"XObject")?
                    .as_dict_mut()?
            }
        };
        target.set(key, Object::Reference(reference));
        Ok(())
    }

    fn serialize(&mut self) -> Result<Vec<u8>> {
        let pruned = self.doc.prune_objects();
        if !pruned.is_empty() {
            log::debug!("Pruned {} unreferenced objects", pruned.len());
        }
        self.doc.compress();
        // save_to writes a classic cross-reference table, no object streams
        let mut output = Vec::new();
        self.doc.save_to(&mut output)?;
        Ok(output)
    }
}
