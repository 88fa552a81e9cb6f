//! Default image collaborator: resize, composite and encode icons.

use image::imageops::FilterType;
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::Path;

use crate::transform::color::parse_color;
use crate::transform::{IconSpec, IconType, TransformError};

/// Produces one encoded image per spec from a source image.
pub trait ImageCompositor: Send + Sync {
    /// Decode `source` once and render every spec.
    ///
    /// The outer error means the source itself is unusable; per-spec failures
    /// are reported in the returned list, index-aligned with `specs`.
    fn composite(
        &self,
        source: &Path,
        specs: &[IconSpec],
    ) -> Result<Vec<Result<Vec<u8>, TransformError>>, TransformError>;
}

/// The favicon set linked from HTML documents.
pub fn default_favicons() -> Vec<IconSpec> {
    vec![
        IconSpec::square("favicon-16x16.png", 16).with_rel("icon"),
        IconSpec::square("favicon-32x32.png", 32).with_rel("icon"),
        IconSpec::square("apple-touch-icon.png", 180).with_background("#ffffff").with_rel("apple-touch-icon"),
    ]
}

/// The icon sizes appended to a web manifest.
pub fn default_manifest_icons() -> Vec<IconSpec> {
    vec![IconSpec::square("icon-192x192.png", 192), IconSpec::square("icon-512x512.png", 512)]
}

/// `image`-crate compositor.
#[derive(Debug, Clone, Default)]
pub struct RasterCompositor;

impl RasterCompositor {
    /// Create the compositor.
    pub fn new() -> Self {
        Self
    }

    /// Fit `source` inside the spec's box, centred over its background.
    pub fn render(source: &DynamicImage, spec: &IconSpec) -> Result<RgbaImage, TransformError> {
        if spec.width == 0 || spec.height == 0 {
            return Err(TransformError::Other(format!("{}: icon size must be non-zero", spec.name)));
        }
        let background = match &spec.background {
            Some(color) => parse_color(color)
                .map_err(|e| TransformError::Other(format!("{}: background {}: {}", spec.name, color, e)))?,
            None => Rgba([0, 0, 0, 0]),
        };
        let fitted = source.resize(spec.width, spec.height, FilterType::Lanczos3).to_rgba8();
        let mut canvas = RgbaImage::from_pixel(spec.width, spec.height, background);
        let x = (spec.width.saturating_sub(fitted.width()) / 2) as i64;
        let y = (spec.height.saturating_sub(fitted.height()) / 2) as i64;
        image::imageops::overlay(&mut canvas, &fitted, x, y);
        Ok(canvas)
    }

    /// Encode a rendered icon in the spec's type.
    pub fn encode(image: RgbaImage, kind: IconType) -> Result<Vec<u8>, TransformError> {
        let format = match kind {
            IconType::Png => ImageOutputFormat::Png,
            IconType::Ico => ImageOutputFormat::Ico,
        };
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image).write_to(&mut Cursor::new(&mut bytes), format)?;
        Ok(bytes)
    }
}

impl ImageCompositor for RasterCompositor {
    fn composite(
        &self,
        source: &Path,
        specs: &[IconSpec],
    ) -> Result<Vec<Result<Vec<u8>, TransformError>>, TransformError> {
        let image = image::open(source)?;
        Ok(specs
            .iter()
            .map(|spec| Self::render(&image, spec).and_then(|rendered| Self::encode(rendered, spec.kind)))
            .collect())
    }
}
