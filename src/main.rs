//! PDF Image Optimizer CLI
//!
//! Command-line interface for extracting and recompressing images in PDFs.

use clap::{Parser, ValueEnum};
use pdf_image_optimizer::{
    extract_pdf_images,
    file_ops::{optimize_pdf_file, write_images},
    ExtractOptions, OptimizeOptions, OutputFormat, PipelineOptions,
};
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    /// PNG for images with transparency, JPEG otherwise
    Auto,
    Jpeg,
    Png,
}

impl From<FormatArg> for OutputFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Auto => OutputFormat::Auto,
            FormatArg::Jpeg => OutputFormat::Jpeg,
            FormatArg::Png => OutputFormat::Png,
        }
    }
}

/// Extract, recompress and re-embed the images of a PDF
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input PDF file path
    #[arg(short, long)]
    input: PathBuf,

    /// Output PDF file path
    #[arg(short, long, required_unless_present_any = ["list", "extract_dir"])]
    output: Option<PathBuf>,

    /// JPEG quality (1-100, only affects images encoded as JPEG)
    #[arg(short, long, default_value = "75")]
    quality: u8,

    /// Output encoding for optimized images
    #[arg(long, value_enum, default_value = "auto")]
    format: FormatArg,

    /// Page render scale used to crop forms and shadings
    #[arg(long, default_value = "2.0")]
    scale: f64,

    /// Downscale images so neither side exceeds this many pixels
    #[arg(long)]
    max_dimension: Option<u32>,

    /// Write every extracted image as PNG into this directory
    #[arg(long)]
    extract_dir: Option<PathBuf>,

    /// List extracted images without writing a PDF
    #[arg(long)]
    list: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let options = PipelineOptions {
        extract: ExtractOptions {
            render_scale: args.scale,
            ..ExtractOptions::default()
        },
        optimize: OptimizeOptions {
            quality: args.quality,
            format: args.format.into(),
            max_dimension: args.max_dimension,
        },
    };

    println!("PDF Image Optimizer");
    println!("===================");

    if args.list || args.extract_dir.is_some() {
        let bytes = std::fs::read(&args.input)?;
        let (images, report) = extract_pdf_images(&bytes, &options.extract)?;

        if args.list {
            for image in &images {
                println!(
                    "#{:<4} page {:<4} {:<20} {:>5}x{:<5} {:>9} bytes  {}",
                    image.index,
                    image.page_number,
                    image.kind.as_str(),
                    image.pixel_width,
                    image.pixel_height,
                    image.original_byte_size,
                    image.source_name
                );
            }
        }
        if let Some(dir) = &args.extract_dir {
            let written = write_images(dir, &images)?;
            println!("Wrote {} images to {:?}", written.len(), dir);
        }
        println!(
            "\n{} images on {} pages ({} pages failed)",
            report.extracted,
            report.pages,
            report.failed_pages.len()
        );
    }

    if let Some(output) = &args.output {
        let result = optimize_pdf_file(&args.input, output, &options)?;
        let optimization = &result.optimization;
        let reconstruction = &result.reconstruction;

        println!(
            "\nDone! Optimized {} images ({} failed): {} -> {} bytes",
            optimization.optimized,
            optimization.failed,
            optimization.bytes_before,
            optimization.bytes_after
        );
        println!(
            "Replaced {} of {} image XObjects ({} unmatched)",
            reconstruction.replaced, reconstruction.total_xobjects, reconstruction.unmatched
        );
        println!("Output saved to: {:?}", output);
    }

    Ok(())
}
