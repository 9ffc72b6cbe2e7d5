//! Drives the image codec: probes source dimensions, applies the
//! shared pre-processing once, and renders one re-encoded derivative
//! per planned size.
//!
//! Decoding, resizing and encoding are CPU-bound, so they run on the
//! blocking thread pool. The pre-processed source is frozen behind an
//! [`Arc`] before the per-size tasks start; each task resizes into
//! its own buffer and never touches the shared image.

use crate::error::{Error, Result};
use crate::plan::SizeSpec;
use anyhow::anyhow;
use bytes::Bytes;
use image::error::{EncodingError, ImageFormatHint};
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageError, ImageFormat, ImageReader};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Default JPEG quality.
pub const DEFAULT_QUALITY: u8 = 80;

/// The filter used for every resize.
const RESIZE_FILTER: FilterType = FilterType::Lanczos3;

/// The closed set of formats derivatives can be encoded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
    Webp,
    Gif,
}

impl OutputFormat {
    pub fn image_format(self) -> ImageFormat {
        match self {
            OutputFormat::Jpeg => ImageFormat::Jpeg,
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Webp => ImageFormat::WebP,
            OutputFormat::Gif => ImageFormat::Gif,
        }
    }

    /// The format name as reported by the format probe.
    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Gif => "gif",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            "webp" => Ok(OutputFormat::Webp),
            "gif" => Ok(OutputFormat::Gif),
            other => Err(anyhow!("unknown output format {:?}", other)),
        }
    }
}

/// Encoder settings shared by every derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOptions {
    pub format: OutputFormat,
    /// JPEG quality, 1 to 100. Ignored by the other encoders.
    pub quality: u8,
    /// Write progressive rather than baseline JPEG. Ignored by the
    /// other encoders.
    pub progressive: bool,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Jpeg,
            quality: DEFAULT_QUALITY,
            progressive: true,
        }
    }
}

/// A whole-image transform applied once to the decoded source, before
/// any resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreOperation {
    /// Apply the EXIF orientation of the source, if any.
    AutoOrient,
    Rotate90,
    Rotate180,
    Rotate270,
    FlipHorizontal,
    FlipVertical,
    Grayscale,
}

impl PreOperation {
    /// Parse a comma-separated list of operations. Blank entries are
    /// ignored, so an empty string means no pre-processing.
    pub fn parse_list(list: &str) -> anyhow::Result<Vec<Self>> {
        list.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::parse)
            .collect()
    }

    fn apply(self, image: DynamicImage, orientation: Orientation) -> DynamicImage {
        match self {
            PreOperation::AutoOrient => {
                let mut image = image;
                image.apply_orientation(orientation);
                image
            }
            PreOperation::Rotate90 => image.rotate90(),
            PreOperation::Rotate180 => image.rotate180(),
            PreOperation::Rotate270 => image.rotate270(),
            PreOperation::FlipHorizontal => image.fliph(),
            PreOperation::FlipVertical => image.flipv(),
            PreOperation::Grayscale => image.grayscale(),
        }
    }

    /// Whether this operation exchanges the width and height of an
    /// image with the given orientation.
    fn swaps_axes(self, orientation: Orientation) -> bool {
        match self {
            PreOperation::AutoOrient => matches!(
                orientation,
                Orientation::Rotate90
                    | Orientation::Rotate270
                    | Orientation::Rotate90FlipH
                    | Orientation::Rotate270FlipH
            ),
            PreOperation::Rotate90 | PreOperation::Rotate270 => true,
            _ => false,
        }
    }
}

impl FromStr for PreOperation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto_orient" | "rotate" => Ok(PreOperation::AutoOrient),
            "rotate90" => Ok(PreOperation::Rotate90),
            "rotate180" => Ok(PreOperation::Rotate180),
            "rotate270" => Ok(PreOperation::Rotate270),
            "flip_horizontal" => Ok(PreOperation::FlipHorizontal),
            "flip_vertical" => Ok(PreOperation::FlipVertical),
            "grayscale" => Ok(PreOperation::Grayscale),
            other => Err(anyhow!("unknown pre-operation {:?}", other)),
        }
    }
}

impl fmt::Display for PreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PreOperation::AutoOrient => "auto_orient",
            PreOperation::Rotate90 => "rotate90",
            PreOperation::Rotate180 => "rotate180",
            PreOperation::Rotate270 => "rotate270",
            PreOperation::FlipHorizontal => "flip_horizontal",
            PreOperation::FlipVertical => "flip_vertical",
            PreOperation::Grayscale => "grayscale",
        };
        f.write_str(name)
    }
}

/// Dimensions read from the header of a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceDimensions {
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
}

impl SourceDimensions {
    /// The dimensions the image will have once `operations` ran.
    pub fn after(&self, operations: &[PreOperation]) -> (u32, u32) {
        operations
            .iter()
            .fold((self.width, self.height), |(width, height), op| {
                if op.swaps_axes(self.orientation) {
                    (height, width)
                } else {
                    (width, height)
                }
            })
    }
}

/// Errors found while reading the source are input errors.
fn input_error(e: ImageError) -> Error {
    Error::InvalidImageInput(e.to_string())
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Codec(ImageError::IoError(std::io::Error::new(
        std::io::ErrorKind::Other,
        e,
    )))
}

fn decoder(bytes: &[u8]) -> Result<impl ImageDecoder + '_> {
    if bytes.is_empty() {
        return Err(Error::InvalidImageInput(String::from("source image is empty")));
    }
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| Error::InvalidImageInput(e.to_string()))?
        .into_decoder()
        .map_err(input_error)
}

/// Probe the dimensions and orientation of an encoded image without
/// decoding its pixels.
pub fn measure(bytes: &[u8]) -> Result<SourceDimensions> {
    let mut decoder = decoder(bytes)?;
    let (width, height) = decoder.dimensions();
    let orientation = decoder.orientation().map_err(input_error)?;
    Ok(SourceDimensions {
        width,
        height,
        orientation,
    })
}

/// Name an image format the way the content-type table expects.
pub fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => String::from("jpeg"),
        ImageFormat::Png => String::from("png"),
        ImageFormat::WebP => String::from("webp"),
        ImageFormat::Gif => String::from("gif"),
        other => format!("{:?}", other).to_lowercase(),
    }
}

/// Probe the format of an encoded stream.
pub fn probe_format(bytes: &[u8]) -> Result<String> {
    image::guess_format(bytes)
        .map(format_name)
        .map_err(|_| Error::UnsupportedFormat(String::from("unknown")))
}

fn jpeg_error(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> ImageError {
    ImageError::Encoding(EncodingError::new(
        ImageFormatHint::Exact(ImageFormat::Jpeg),
        e,
    ))
}

/// Encode to JPEG. The alpha channel, if any, is dropped.
fn encode_jpeg(
    image: &DynamicImage,
    quality: u8,
    progressive: bool,
) -> Result<Vec<u8>, ImageError> {
    let rgb = image.to_rgb8();
    let width = u16::try_from(rgb.width()).map_err(jpeg_error)?;
    let height = u16::try_from(rgb.height()).map_err(jpeg_error)?;
    let mut buffer = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut buffer, quality);
    encoder.set_progressive(progressive);
    encoder
        .encode(rgb.as_raw(), width, height, jpeg_encoder::ColorType::Rgb)
        .map_err(jpeg_error)?;
    Ok(buffer)
}

fn encode(image: &DynamicImage, options: CodecOptions) -> Result<Vec<u8>, ImageError> {
    match options.format {
        OutputFormat::Jpeg => encode_jpeg(image, options.quality, options.progressive),
        other => {
            let mut buffer = Cursor::new(Vec::new());
            DynamicImage::ImageRgba8(image.to_rgba8()).write_to(&mut buffer, other.image_format())?;
            Ok(buffer.into_inner())
        }
    }
}

/// One encoded derivative.
#[derive(Debug, Clone)]
pub struct RenderedDerivative {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    /// The format probed from the encoded bytes.
    pub format: String,
    pub bytes: Bytes,
}

/// The decoded source after pre-processing. Read-only.
#[derive(Debug, Clone)]
pub struct SharedSource(Arc<DynamicImage>);

impl SharedSource {
    /// Decode `bytes` and run `operations` over the result, in order.
    pub fn prepare(bytes: &[u8], operations: &[PreOperation]) -> Result<Self> {
        let mut decoder = decoder(bytes)?;
        let orientation = decoder.orientation().map_err(input_error)?;
        let image = DynamicImage::from_decoder(decoder).map_err(input_error)?;
        let image = operations
            .iter()
            .fold(image, |image, op| op.apply(image, orientation));
        Ok(SharedSource(Arc::new(image)))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.0.width(), self.0.height())
    }

    /// Resize a private copy of the source to `size` and encode it.
    pub fn derive(&self, size: SizeSpec, options: CodecOptions) -> Result<RenderedDerivative> {
        let resized = self.0.resize_exact(size.width, size.height, RESIZE_FILTER);
        let bytes = encode(&resized, options)?;
        let format = probe_format(&bytes)?;
        debug!(
            label = size.label,
            width = size.width,
            height = size.height,
            format = %format,
            bytes = bytes.len(),
            "Rendered derivative"
        );
        Ok(RenderedDerivative {
            label: size.label,
            width: size.width,
            height: size.height,
            format,
            bytes: Bytes::from(bytes),
        })
    }
}

/// Renders derivatives with fixed pre-processing and encoder settings.
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    pub pre_operations: Vec<PreOperation>,
    pub options: CodecOptions,
}

impl Renderer {
    pub fn new(pre_operations: Vec<PreOperation>, options: CodecOptions) -> Self {
        Self {
            pre_operations,
            options,
        }
    }

    /// Render one derivative per size, in the order of `sizes`. Every
    /// per-size task is awaited; the first failure in plan order fails
    /// the batch.
    #[instrument(skip(self, bytes, sizes), fields(bytes = bytes.len(), sizes = sizes.len()))]
    pub async fn render(
        &self,
        bytes: Bytes,
        sizes: &[SizeSpec],
    ) -> Result<Vec<RenderedDerivative>> {
        if bytes.is_empty() {
            return Err(Error::InvalidImageInput(String::from("source image is empty")));
        }
        let operations = self.pre_operations.clone();
        let source = tokio::task::spawn_blocking(move || SharedSource::prepare(&bytes, &operations))
            .await
            .map_err(join_error)??;

        let handles: Vec<_> = sizes
            .iter()
            .map(|&size| {
                let source = source.clone();
                let options = self.options;
                tokio::task::spawn_blocking(move || source.derive(size, options))
            })
            .collect();

        let mut rendered = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for handle in handles {
            match handle.await.map_err(join_error).and_then(|result| result) {
                Ok(derivative) => rendered.push(derivative),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(rendered),
        }
    }
}
