//! Layer compositing - the default [`Renderer`].
//!
//! Stacks each selected asset onto a canvas of the configured format and
//! writes `<images>/<edition>.png`. Only separable blend modes are drawn;
//! anything else falls back to source-over.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::config::{BackgroundOptions, EngineConfig};
use crate::error::{EngineError, EngineResult};
use crate::render::{RenderJob, Renderer};

/// Canvas composite operation applied when a layer is drawn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BlendMode {
    #[default]
    SourceOver,
    Multiply,
    Screen,
    Darken,
    Lighten,
    Difference,
    /// A canvas operation this renderer does not implement.
    Other(String),
}

impl From<String> for BlendMode {
    fn from(name: String) -> Self {
        match name.as_str() {
            "source-over" => BlendMode::SourceOver,
            "multiply" => BlendMode::Multiply,
            "screen" => BlendMode::Screen,
            "darken" => BlendMode::Darken,
            "lighten" => BlendMode::Lighten,
            "difference" => BlendMode::Difference,
            _ => BlendMode::Other(name),
        }
    }
}

impl From<BlendMode> for String {
    fn from(mode: BlendMode) -> Self {
        match mode {
            BlendMode::SourceOver => "source-over".into(),
            BlendMode::Multiply => "multiply".into(),
            BlendMode::Screen => "screen".into(),
            BlendMode::Darken => "darken".into(),
            BlendMode::Lighten => "lighten".into(),
            BlendMode::Difference => "difference".into(),
            BlendMode::Other(name) => name,
        }
    }
}

impl BlendMode {
    /// Blend one normalized backdrop channel with one source channel.
    fn mix(&self, backdrop: f32, source: f32) -> f32 {
        match self {
            BlendMode::SourceOver | BlendMode::Other(_) => source,
            BlendMode::Multiply => backdrop * source,
            BlendMode::Screen => backdrop + source - backdrop * source,
            BlendMode::Darken => backdrop.min(source),
            BlendMode::Lighten => backdrop.max(source),
            BlendMode::Difference => (backdrop - source).abs(),
        }
    }
}

/// Composite `layer` onto `canvas` with the given mode and opacity.
pub fn blend_onto(canvas: &mut RgbaImage, layer: &RgbaImage, mode: &BlendMode, opacity: f32) {
    for (dst, src) in canvas.pixels_mut().zip(layer.pixels()) {
        *dst = blend_pixel(*dst, *src, mode, opacity);
    }
}

fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>, mode: &BlendMode, opacity: f32) -> Rgba<u8> {
    let to_unit = |v: u8| f32::from(v) / 255.0;
    let a_s = to_unit(src[3]) * opacity;
    let a_b = to_unit(dst[3]);
    let a_o = a_s + a_b * (1.0 - a_s);
    if a_o <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let cs = to_unit(src[c]);
        let cb = to_unit(dst[c]);
        let premultiplied =
            cs * a_s * (1.0 - a_b) + mode.mix(cb, cs) * a_s * a_b + cb * a_b * (1.0 - a_s);
        out[c] = to_byte(premultiplied / a_o);
    }
    out[3] = to_byte(a_o);
    Rgba(out)
}

fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// `#rrggbb` or `#rrggbbaa`.
pub fn parse_hex_color(raw: &str) -> Option<Rgba<u8>> {
    let hex = raw.strip_prefix('#').unwrap_or(raw);
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        6 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, 255])),
        8 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, channel(6)?])),
        _ => None,
    }
}

/// Fully saturated HSL colour; `lightness` in 0..=1.
pub fn hsl_color(hue: f32, lightness: f32) -> Rgba<u8> {
    let l = lightness.clamp(0.0, 1.0);
    let chroma = 1.0 - (2.0 * l - 1.0).abs();
    let h = (hue.rem_euclid(360.0)) / 60.0;
    let x = chroma * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    let m = l - chroma / 2.0;
    Rgba([to_byte(r + m), to_byte(g + m), to_byte(b + m), 255])
}

fn parse_percentage(raw: &str) -> Option<f32> {
    let value: f32 = raw.trim().trim_end_matches('%').parse().ok()?;
    Some(value / 100.0)
}

pub struct ImageRenderer {
    images_dir: PathBuf,
    width: u32,
    height: u32,
    background: BackgroundOptions,
}

impl ImageRenderer {
    pub fn new(
        images_dir: impl Into<PathBuf>,
        width: u32,
        height: u32,
        background: BackgroundOptions,
    ) -> Self {
        Self {
            images_dir: images_dir.into(),
            width,
            height,
            background,
        }
    }

    pub fn from_config(config: &EngineConfig, images_dir: impl Into<PathBuf>) -> Self {
        Self::new(images_dir, config.format.width, config.format.height, config.background.clone())
    }

    pub fn output_path(&self, edition: u32) -> PathBuf {
        self.images_dir.join(format!("{}.png", edition))
    }

    fn background_color(&self) -> Rgba<u8> {
        if self.background.fixed {
            return parse_hex_color(&self.background.default_color).unwrap_or_else(|| {
                warn!(
                    color = %self.background.default_color,
                    "unparsable background color, using black"
                );
                Rgba([0, 0, 0, 255])
            });
        }
        let lightness = parse_percentage(&self.background.brightness).unwrap_or(0.8);
        let hue = rand::thread_rng().gen_range(0..360) as f32;
        hsl_color(hue, lightness)
    }

    /// Compose the job into an in-memory canvas.
    pub fn compose(&self, job: &RenderJob) -> EngineResult<RgbaImage> {
        let mut canvas = if self.background.generate {
            RgbaImage::from_pixel(self.width, self.height, self.background_color())
        } else {
            RgbaImage::new(self.width, self.height)
        };

        for layer in &job.layers {
            let mut asset = image::open(&layer.element.path)
                .map_err(|e| {
                    EngineError::render(
                        job.edition,
                        format!("cannot load {}: {}", layer.element.path.display(), e),
                    )
                })?
                .to_rgba8();
            if asset.dimensions() != (self.width, self.height) {
                asset = imageops::resize(&asset, self.width, self.height, FilterType::Triangle);
            }
            if let BlendMode::Other(name) = &layer.blend {
                warn!(
                    layer = %layer.name,
                    blend = %name,
                    "unsupported blend mode, drawing source-over"
                );
            }
            blend_onto(&mut canvas, &asset, &layer.blend, layer.opacity);
        }
        Ok(canvas)
    }
}

impl Renderer for ImageRenderer {
    fn render(&self, job: &RenderJob) -> EngineResult<()> {
        let canvas = self.compose(job)?;
        let path = self.output_path(job.edition);
        canvas.save(&path).map_err(|e| {
            EngineError::render(
                job.edition,
                format!("cannot write {}: {}", path.display(), e),
            )
        })?;
        debug!(edition = job.edition, path = %path.display(), "image written");
        Ok(())
    }
}
