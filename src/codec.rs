//! Raster codecs: PDF image streams in, PNG/JPEG payloads and PDF image streams out.

use crate::error::{Error, Result};
use flate2::read::ZlibDecoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::{
    DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, Rgb, RgbImage, RgbaImage,
};
use lopdf::{Dictionary, Document, Object, Stream};
use std::io::{Cursor, Read, Write};

/// Read a non-negative integer entry, accepting reals written by sloppy producers
pub(crate) fn dict_u32(dict: &Dictionary, key: &[u8]) -> Option<u32> {
    match dict.get(key).ok()? {
        Object::Integer(n) if *n >= 0 && *n <= u32::MAX as i64 => Some(*n as u32),
        Object::Real(n) if *n >= 0.0 => Some(*n as u32),
        _ => None,
    }
}

pub(crate) fn object_to_f64(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(n) => Some(*n as f64),
        Object::Real(n) => Some(*n as f64),
        _ => None,
    }
}

pub(crate) fn name_of(obj: &Object) -> Option<String> {
    match obj {
        Object::Name(n) => Some(String::from_utf8_lossy(n).to_string()),
        _ => None,
    }
}

/// Filter names of a stream, in application order
fn filter_names(stream: &Stream) -> Vec<String> {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(n)) => vec![String::from_utf8_lossy(n).to_string()],
        Ok(Object::Array(arr)) => arr.iter().filter_map(name_of).collect(),
        _ => Vec::new(),
    }
}

/// Decompress a stream's content, returning it untouched when the filter is unknown
pub(crate) fn decompress_stream(stream: &Stream) -> Vec<u8> {
    let mut data = stream.content.clone();

    for filter_name in filter_names(stream) {
        match filter_name.as_str() {
            "FlateDecode" => {
                let mut decoder = ZlibDecoder::new(&data[..]);
                let mut decoded = Vec::new();
                if decoder.read_to_end(&mut decoded).is_ok() {
                    data = decoded;
                } else {
                    return stream.content.clone();
                }
            }
            // Unknown filter, return as-is
            _ => return data,
        }
    }

    data
}

/// Get color space name from PDF object
fn color_space_name(obj: &Object, doc: &Document) -> String {
    match obj {
        Object::Name(name) => String::from_utf8_lossy(name).to_string(),
        Object::Array(arr) => arr
            .first()
            .and_then(name_of)
            .unwrap_or_else(|| "Unknown".to_string()),
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(resolved) => color_space_name(resolved, doc),
            Err(_) => "Unknown".to_string(),
        },
        _ => "Unknown".to_string(),
    }
}

fn inflate(content: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(content);
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded)?;
    Ok(decoded)
}

fn short_data(kind: &str, got: usize, expected: usize) -> Error {
    Error::UnsupportedImage(format!(
        "{} data too short: got {} bytes, expected {}",
        kind, got, expected
    ))
}

/// Decode an image XObject into a bitmap, applying its SMask as alpha when present
pub fn decode_image_xobject(stream: &Stream, doc: &Document) -> Result<DynamicImage> {
    let width = dict_u32(&stream.dict, b"Width").unwrap_or(0);
    let height = dict_u32(&stream.dict, b"Height").unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(Error::UnsupportedImage("invalid image dimensions".to_string()));
    }

    let img = decode_image_stream(stream, doc, width, height)?;

    let smask = match stream.dict.get(b"SMask") {
        Ok(Object::Reference(id)) => doc.get_object(*id).ok().and_then(|o| o.as_stream().ok()),
        _ => None,
    };

    match smask {
        Some(smask_stream) => match decode_smask_stream(smask_stream, width, height) {
            Ok(alpha) => Ok(apply_alpha(&img, &alpha)),
            Err(e) => {
                log::debug!("Ignoring undecodable SMask: {}", e);
                Ok(img)
            }
        },
        None => Ok(img),
    }
}

fn apply_alpha(img: &DynamicImage, alpha: &[u8]) -> DynamicImage {
    let mut rgba = img.to_rgba8();
    for (pixel, a) in rgba.pixels_mut().zip(alpha.iter()) {
        pixel.0[3] = *a;
    }
    DynamicImage::ImageRgba8(rgba)
}

/// Decode an SMask stream (grayscale alpha channel)
fn decode_smask_stream(stream: &Stream, width: u32, height: u32) -> Result<Vec<u8>> {
    let decoded = match filter_names(stream).first().map(String::as_str) {
        Some("FlateDecode") => inflate(&stream.content)?,
        Some("DCTDecode") => image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg)?
            .to_luma8()
            .into_raw(),
        None => stream.content.clone(),
        Some(other) => {
            return Err(Error::UnsupportedImage(format!(
                "unsupported SMask filter: {}",
                other
            )))
        }
    };

    let expected = (width as usize) * (height as usize);
    if decoded.len() < expected {
        return Err(short_data("SMask", decoded.len(), expected));
    }
    Ok(decoded[..expected].to_vec())
}

/// Decode a PDF image stream into raw pixel data
fn decode_image_stream(
    stream: &Stream,
    doc: &Document,
    width: u32,
    height: u32,
) -> Result<DynamicImage> {
    let color_space = stream
        .dict
        .get(b"ColorSpace")
        .ok()
        .map(|cs| color_space_name(cs, doc))
        .unwrap_or_else(|| "DeviceRGB".to_string());
    let bits_per_component = dict_u32(&stream.dict, b"BitsPerComponent").unwrap_or(8);

    let data = match filter_names(stream).first().map(String::as_str) {
        Some("FlateDecode") => inflate(&stream.content)?,
        Some("DCTDecode") => {
            return Ok(image::load_from_memory_with_format(
                &stream.content,
                ImageFormat::Jpeg,
            )?)
        }
        Some("JPXDecode") => return Ok(image::load_from_memory(&stream.content)?),
        None => stream.content.clone(),
        Some(other) => {
            return Err(Error::UnsupportedImage(format!(
                "unsupported filter: {}",
                other
            )))
        }
    };

    if bits_per_component != 8 {
        return Err(Error::UnsupportedImage(format!(
            "{} bits per component",
            bits_per_component
        )));
    }

    let pixels = (width as usize) * (height as usize);
    match color_space.as_str() {
        "DeviceRGB" | "RGB" | "CalRGB" => {
            if data.len() < pixels * 3 {
                return Err(short_data("RGB", data.len(), pixels * 3));
            }
            RgbImage::from_raw(width, height, data[..pixels * 3].to_vec())
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| Error::UnsupportedImage("bad RGB buffer".to_string()))
        }
        "DeviceGray" | "Gray" | "CalGray" => {
            if data.len() < pixels {
                return Err(short_data("grayscale", data.len(), pixels));
            }
            image::GrayImage::from_raw(width, height, data[..pixels].to_vec())
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| Error::UnsupportedImage("bad grayscale buffer".to_string()))
        }
        "DeviceCMYK" | "CMYK" => {
            if data.len() < pixels * 4 {
                return Err(short_data("CMYK", data.len(), pixels * 4));
            }
            let mut rgb = RgbImage::new(width, height);
            for (pixel, chunk) in rgb.pixels_mut().zip(data.chunks_exact(4)) {
                let k = 1.0 - chunk[3] as f32 / 255.0;
                let channel = |v: u8| ((1.0 - v as f32 / 255.0) * k * 255.0) as u8;
                *pixel = Rgb([channel(chunk[0]), channel(chunk[1]), channel(chunk[2])]);
            }
            Ok(DynamicImage::ImageRgb8(rgb))
        }
        "ICCBased" => {
            // Guess the component count from the data size
            if data.len() >= pixels * 3 {
                RgbImage::from_raw(width, height, data[..pixels * 3].to_vec())
                    .map(DynamicImage::ImageRgb8)
                    .ok_or_else(|| Error::UnsupportedImage("bad ICCBased buffer".to_string()))
            } else if data.len() >= pixels {
                image::GrayImage::from_raw(width, height, data[..pixels].to_vec())
                    .map(DynamicImage::ImageLuma8)
                    .ok_or_else(|| Error::UnsupportedImage("bad ICCBased buffer".to_string()))
            } else {
                Err(Error::UnsupportedImage(
                    "could not determine ICCBased component count".to_string(),
                ))
            }
        }
        other => Err(Error::UnsupportedImage(format!(
            "unsupported color space: {}",
            other
        ))),
    }
}

/// Check if an image has meaningful alpha
pub fn has_alpha(img: &DynamicImage) -> bool {
    match img {
        DynamicImage::ImageRgba8(rgba) => {
            let sample_rate = std::cmp::max(1, rgba.pixels().len() / 10000);
            rgba.pixels().step_by(sample_rate).any(|p| p.0[3] < 255)
        }
        DynamicImage::ImageLumaA8(la) => {
            let sample_rate = std::cmp::max(1, la.pixels().len() / 10000);
            la.pixels().step_by(sample_rate).any(|p| p.0[1] < 255)
        }
        other if other.color().has_alpha() => has_alpha(&DynamicImage::ImageRgba8(other.to_rgba8())),
        _ => false,
    }
}

/// Composite over a white background, dropping alpha
pub fn flatten_on_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut rgb = RgbImage::new(width, height);
    for (out, px) in rgb.pixels_mut().zip(rgba.pixels()) {
        let alpha = px.0[3] as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
        *out = Rgb([blend(px.0[0]), blend(px.0[1]), blend(px.0[2])]);
    }
    rgb
}

/// Lossless PNG used at extraction time
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut png_bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)?;
    Ok(png_bytes)
}

/// PNG tuned for size, keeping alpha only when the image uses it
pub fn encode_png_compact(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut out, CompressionType::Best, PngFilterType::Adaptive);
    if has_alpha(img) {
        let rgba = img.to_rgba8();
        encoder.write_image(
            rgba.as_raw(),
            rgba.width(),
            rgba.height(),
            ExtendedColorType::Rgba8,
        )?;
    } else {
        let rgb = img.to_rgb8();
        encoder.write_image(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        )?;
    }
    Ok(out)
}

/// Baseline JPEG with 4:2:0 chroma subsampling
pub fn encode_jpeg(rgb: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let (width, height) = rgb.dimensions();
    if width > u16::MAX as u32 || height > u16::MAX as u32 {
        return Err(Error::UnsupportedImage(format!(
            "{}x{} exceeds JPEG dimension limits",
            width, height
        )));
    }

    let mut jpeg_bytes = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut jpeg_bytes, quality);
    encoder.set_sampling_factor(jpeg_encoder::SamplingFactor::R_4_2_0);
    encoder.encode(
        rgb.as_raw(),
        width as u16,
        height as u16,
        jpeg_encoder::ColorType::Rgb,
    )?;
    Ok(jpeg_bytes)
}

/// Identify an encoded payload by its magic bytes
pub fn sniff_format(data: &[u8]) -> Option<ImageFormat> {
    image::guess_format(data).ok()
}

pub(crate) fn flate_compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::best());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Minimal 8-bit image XObject dictionary
pub fn image_dictionary(width: u32, height: u32, color_space: &str, filter: &str) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Image".to_vec()));
    dict.set("Width", Object::Integer(width as i64));
    dict.set("Height", Object::Integer(height as i64));
    dict.set("BitsPerComponent", Object::Integer(8));
    dict.set("ColorSpace", Object::Name(color_space.as_bytes().to_vec()));
    dict.set("Filter", Object::Name(filter.as_bytes().to_vec()));
    dict
}

/// Split RGBA pixels into a Flate RGB image stream plus a Flate DeviceGray SMask.
///
/// The SMask is omitted when every pixel is opaque.
pub fn rgba_image_streams(rgba: &RgbaImage) -> Result<(Stream, Option<Stream>)> {
    let (width, height) = rgba.dimensions();
    let pixels = (width as usize) * (height as usize);
    let mut rgb_data = Vec::with_capacity(pixels * 3);
    let mut alpha_data = Vec::with_capacity(pixels);

    for chunk in rgba.as_raw().chunks_exact(4) {
        rgb_data.extend_from_slice(&chunk[..3]);
        alpha_data.push(chunk[3]);
    }

    let compressed_rgb = flate_compress(&rgb_data)?;
    let mut dict = image_dictionary(width, height, "DeviceRGB", "FlateDecode");
    dict.set("Length", Object::Integer(compressed_rgb.len() as i64));
    let main_stream = Stream::new(dict, compressed_rgb);

    if alpha_data.iter().all(|a| *a == 255) {
        return Ok((main_stream, None));
    }

    let compressed_alpha = flate_compress(&alpha_data)?;
    let mut smask_dict = image_dictionary(width, height, "DeviceGray", "FlateDecode");
    smask_dict.set("Length", Object::Integer(compressed_alpha.len() as i64));
    Ok((main_stream, Some(Stream::new(smask_dict, compressed_alpha))))
}
