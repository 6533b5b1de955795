//! Offline backends for the `dryrun` provider. Both write real PNGs so the
//! whole chat flow, including outpainting the result, works without keys.

use std::fs;
use std::path::{Path, PathBuf};

use easel_contracts::jobs::{GenerationRequest, OutpaintRequest, StoredImage};
use image::{imageops, Rgba, RgbaImage};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{EngineError, Result};
use crate::generation::ImageGenerator;
use crate::outpaint::{OutpaintOutcome, OutpaintProgress, OutpaintState, Outpainter};

#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunGenerator;

impl ImageGenerator for DryrunGenerator {
    fn generate(
        &self,
        request: &GenerationRequest,
        out_dir: &Path,
        file_prefix: &str,
    ) -> Result<Vec<PathBuf>> {
        let (width, height) = parse_dims(&request.size);
        let (r, g, b) = color_from_prompt(&request.prompt, 0);
        fs::create_dir_all(out_dir)?;
        let mut written = Vec::new();
        for index in 0..request.count.max(1) {
            let name = format!(
                "{file_prefix}_{index}_{}.png",
                short_id(&request.prompt, u64::from(index))
            );
            let path = out_dir.join(name);
            RgbaImage::from_pixel(width, height, Rgba([r, g, b, 255]))
                .save(&path)
                .map_err(|err| EngineError::GenerationFailed(format!("{}: {err}", path.display())))?;
            written.push(path);
        }
        info!(count = written.len(), "dryrun images written");
        Ok(written)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunOutpainter;

impl Outpainter for DryrunOutpainter {
    fn outpaint(
        &self,
        request: &OutpaintRequest,
        out_dir: &Path,
        progress: &mut dyn FnMut(OutpaintProgress),
    ) -> Result<OutpaintOutcome> {
        request
            .scales
            .validate()
            .map_err(|reason| EngineError::SubmissionFailed(format!("invalid scales: {reason}")))?;
        let task_id = format!("dryrun-{}", short_id(&request.prompt, 0));
        progress(OutpaintProgress::Submitted {
            task_id: task_id.clone(),
        });

        let source = image::open(&request.source)
            .map_err(|err| EngineError::OutpaintFailed(format!("{}: {err}", request.source.display())))?
            .to_rgba8();
        let canvas = expand_canvas(&source, request)?;

        fs::create_dir_all(out_dir)?;
        let local_path = out_dir.join(format!("{task_id}.png"));
        canvas
            .save(&local_path)
            .map_err(|err| EngineError::OutpaintFailed(format!("{}: {err}", local_path.display())))?;
        let size_bytes = fs::metadata(&local_path)?.len();
        Ok(OutpaintOutcome {
            task_id,
            state: OutpaintState::Downloaded,
            image: StoredImage {
                source_url: format!("dryrun://{}", local_path.display()),
                local_path,
                size_bytes,
            },
            polls: 0,
            waits: 0,
            poll_retries: 0,
            download_attempts: 0,
        })
    }
}

/// Largest canvas side the dry-run backend will allocate.
const MAX_CANVAS_SIDE: u32 = 16_384;

/// Padding for one edge, or `None` when it cannot fit the canvas bound.
fn edge_pixels(length: u32, scale: f64) -> Option<u32> {
    let pixels = (f64::from(length) * (scale - 1.0)).round().max(0.0);
    (pixels <= f64::from(MAX_CANVAS_SIDE)).then_some(pixels as u32)
}

fn padded_side(length: u32, before: Option<u32>, after: Option<u32>) -> Option<u32> {
    length
        .checked_add(before?)?
        .checked_add(after?)
        .filter(|side| *side <= MAX_CANVAS_SIDE)
}

/// Pads the source on each edge by `(scale - 1) * side length`, filling the
/// new area with the prompt colour.
fn expand_canvas(source: &RgbaImage, request: &OutpaintRequest) -> Result<RgbaImage> {
    let (width, height) = source.dimensions();
    let scales = &request.scales;
    let left = edge_pixels(width, scales.left);
    let top = edge_pixels(height, scales.top);
    let (Some(canvas_width), Some(canvas_height), Some(left), Some(top)) = (
        padded_side(width, left, edge_pixels(width, scales.right)),
        padded_side(height, top, edge_pixels(height, scales.bottom)),
        left,
        top,
    ) else {
        return Err(EngineError::OutpaintFailed(format!(
            "expanded canvas would exceed {MAX_CANVAS_SIDE}px per side"
        )));
    };
    let (r, g, b) = color_from_prompt(&request.prompt, request.seed.unwrap_or_default() as u64);
    let mut canvas = RgbaImage::from_pixel(canvas_width, canvas_height, Rgba([r, g, b, 255]));
    imageops::replace(&mut canvas, source, i64::from(left), i64::from(top));
    Ok(canvas)
}

fn parse_dims(size: &str) -> (u32, u32) {
    let raw = size.trim().to_ascii_lowercase();
    if let Some((w, h)) = raw.split_once(['*', 'x']) {
        let width = w.trim().parse::<u32>().unwrap_or(512);
        let height = h.trim().parse::<u32>().unwrap_or(512);
        return (width.clamp(1, 4096), height.clamp(1, 4096));
    }
    (512, 512)
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn short_id(prompt: &str, idx: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(idx.to_be_bytes());
    hex::encode(&hasher.finalize()[..4])
}
