//! Reconstruction: match optimized records back to the document's image
//! XObjects and patch them in.
//!
//! Matching is by page and exact pixel dimensions only. Two same-sized images
//! on one page are paired in processing order, first unmatched record wins.

use crate::codec::{self, flate_compress, image_dictionary};
use crate::error::{Error, Result};
use crate::extract::ExtractedImage;
use crate::graph::{LopdfGraph, ObjectGraph};
use image::{DynamicImage, ImageFormat};
use lopdf::ObjectId;
use std::collections::{BTreeMap, HashSet};

/// An original image XObject paired with the record that replaces it
#[derive(Debug, Clone, PartialEq)]
pub struct ReplacementCandidate<'a> {
    pub page_number: u32,
    pub xobject_key: String,
    pub xobject_reference: ObjectId,
    pub width: u32,
    pub height: u32,
    pub image: &'a ExtractedImage,
}

/// Output of the matcher
#[derive(Debug, Clone, Default)]
pub struct ReplacementPlan<'a> {
    pub replacements: Vec<ReplacementCandidate<'a>>,
    /// Image XObjects seen across all pages
    pub total_xobjects: usize,
    /// (page, key) of image XObjects left without a record
    pub unmatched: Vec<(u32, String)>,
}

/// How a replacement was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchMethod {
    /// New object embedded and the page's XObject name repointed
    Embedded,
    /// Existing object's dictionary and bytes overwritten
    InPlace,
}

/// Outcome of a reconstruction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconstructionSummary {
    pub total_xobjects: usize,
    pub planned: usize,
    pub replaced: usize,
    /// Matched, but the record was never optimized
    pub unchanged: usize,
    pub failed: usize,
    pub unmatched: usize,
}

/// Pair each image XObject of `graph` with at most one record of `images`
pub fn build_replacement_plan<'a, G: ObjectGraph + ?Sized>(
    graph: &G,
    images: &'a [ExtractedImage],
) -> ReplacementPlan<'a> {
    let mut by_page: BTreeMap<u32, Vec<&'a ExtractedImage>> = BTreeMap::new();
    for image in images {
        by_page.entry(image.page_number).or_default().push(image);
    }

    let mut consumed: HashSet<(u32, usize)> = HashSet::new();
    let mut plan = ReplacementPlan::default();

    for page_number in graph.page_numbers() {
        let entries = match graph.xobjects(page_number) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("Page {}: no XObjects to match ({})", page_number, e);
                continue;
            }
        };
        let candidates = by_page.get(&page_number).map(Vec::as_slice).unwrap_or(&[]);

        for entry in entries {
            if entry.subtype.as_deref() != Some("Image") {
                continue;
            }
            let (Some(width), Some(height), Some(reference)) =
                (entry.width, entry.height, entry.reference)
            else {
                log::warn!(
                    "Page {}: image XObject {} has no usable reference or size",
                    page_number,
                    entry.key
                );
                continue;
            };
            plan.total_xobjects += 1;

            let matched = candidates.iter().find(|image| {
                image.replaceable
                    && !consumed.contains(&(page_number, image.index))
                    && image.source_dimensions() == (width, height)
            });

            match matched {
                Some(image) => {
                    consumed.insert((page_number, image.index));
                    plan.replacements.push(ReplacementCandidate {
                        page_number,
                        xobject_key: entry.key,
                        xobject_reference: reference,
                        width,
                        height,
                        image,
                    });
                }
                None => {
                    log::debug!(
                        "Page {}: no record matches {} ({}x{})",
                        page_number,
                        entry.key,
                        width,
                        height
                    );
                    plan.unmatched.push((page_number, entry.key));
                }
            }
        }
    }

    plan
}

fn overwrite_flate<G: ObjectGraph + ?Sized>(
    graph: &mut G,
    reference: ObjectId,
    decoded: &DynamicImage,
) -> Result<()> {
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    let compressed = flate_compress(rgb.as_raw())?;
    let dict = image_dictionary(width, height, "DeviceRGB", "FlateDecode");
    graph.overwrite_stream(reference, dict, compressed)
}

/// Write one replacement into the graph
pub fn apply_replacement<G: ObjectGraph + ?Sized>(
    graph: &mut G,
    candidate: &ReplacementCandidate<'_>,
) -> Result<PatchMethod> {
    let payload = candidate.image.payload();

    match codec::sniff_format(payload) {
        Some(ImageFormat::Png) => {
            let decoded = image::load_from_memory_with_format(payload, ImageFormat::Png)?;
            let embedded = graph.embed_rgba(&decoded.to_rgba8()).and_then(|new_ref| {
                graph.set_xobject(candidate.page_number, &candidate.xobject_key, new_ref)
            });
            match embedded {
                Ok(()) => Ok(PatchMethod::Embedded),
                Err(e) => {
                    log::debug!(
                        "Embedding {} failed ({}), overwriting in place",
                        candidate.xobject_key,
                        e
                    );
                    overwrite_flate(graph, candidate.xobject_reference, &decoded)?;
                    Ok(PatchMethod::InPlace)
                }
            }
        }
        Some(ImageFormat::Jpeg) => {
            let decoded = image::load_from_memory_with_format(payload, ImageFormat::Jpeg)?;
            let color_space = match decoded.color().channel_count() {
                1 => "DeviceGray",
                _ => "DeviceRGB",
            };
            let dict = image_dictionary(
                decoded.width(),
                decoded.height(),
                color_space,
                "DCTDecode",
            );
            graph.overwrite_stream(candidate.xobject_reference, dict, payload.to_vec())?;
            Ok(PatchMethod::InPlace)
        }
        Some(_) => {
            let decoded = image::load_from_memory(payload)?;
            overwrite_flate(graph, candidate.xobject_reference, &decoded)?;
            Ok(PatchMethod::InPlace)
        }
        None => Err(Error::UnsupportedImage(format!(
            "unrecognized payload for {}",
            candidate.xobject_key
        ))),
    }
}

/// Apply every planned replacement; failures are logged and skipped
pub fn apply_replacements<G: ObjectGraph + ?Sized>(
    graph: &mut G,
    plan: &ReplacementPlan<'_>,
) -> ReconstructionSummary {
    let mut summary = ReconstructionSummary {
        total_xobjects: plan.total_xobjects,
        planned: plan.replacements.len(),
        unmatched: plan.unmatched.len(),
        ..ReconstructionSummary::default()
    };

    for candidate in &plan.replacements {
        if !candidate.image.is_optimized {
            summary.unchanged += 1;
            continue;
        }
        match apply_replacement(graph, candidate) {
            Ok(method) => {
                log::debug!(
                    "Page {}: replaced {} with #{} ({:?})",
                    candidate.page_number,
                    candidate.xobject_key,
                    candidate.image.index,
                    method
                );
                summary.replaced += 1;
            }
            Err(e) => {
                log::warn!(
                    "Page {}: could not replace {}: {}",
                    candidate.page_number,
                    candidate.xobject_key,
                    e
                );
                summary.failed += 1;
            }
        }
    }

    summary
}

/// Match, patch and serialize in a single pass over one graph
pub fn reconstruct<G: ObjectGraph + ?Sized>(
    graph: &mut G,
    images: &[ExtractedImage],
) -> Result<(Vec<u8>, ReconstructionSummary)> {
    let plan = build_replacement_plan(&*graph, images);
    let summary = apply_replacements(graph, &plan);
    let bytes = graph.serialize()?;
    log::info!(
        "Replaced {} of {} image XObjects ({} failed, {} unchanged, {} unmatched)",
        summary.replaced,
        summary.total_xobjects,
        summary.failed,
        summary.unchanged,
        summary.unmatched
    );
    Ok((bytes, summary))
}

/// Load `source` and rebuild it with the optimized records substituted
pub fn reconstruct_pdf(
    source: &[u8],
    images: &[ExtractedImage],
) -> Result<(Vec<u8>, ReconstructionSummary)> {
    let mut graph = LopdfGraph::load_mem(source)?;
    reconstruct(&mut graph, images)
}
