use anyhow::{Context as _, Result};
use clap::Args;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};
use video_capture::RawFrame;

use super::CaptureArgs;

#[derive(Args)]
pub struct DecodeCommand {
    #[command(flatten)]
    capture: CaptureArgs,

    /// Write frames as PNG into this directory
    #[arg(long, value_name = "DIR")]
    dump: Option<PathBuf>,

    /// Dump every Nth frame (with --dump)
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
    every: u64,

    /// Stop after this many frames
    #[arg(long)]
    max_frames: Option<u64>,
}

impl DecodeCommand {
    pub fn execute(self) -> Result<()> {
        let mut capture = self.capture.open()?;
        let (width, height) = capture
            .get_frame_size()
            .context("Capture closed right after opening")?;

        if let Some(dir) = &self.dump {
            std::fs::create_dir_all(dir).context("Failed to create dump directory")?;
        }

        let start = Instant::now();
        let mut frame = RawFrame::new();
        let mut decoded: u64 = 0;
        let mut dumped: u64 = 0;

        while self.max_frames.map_or(true, |max| decoded < max) && capture.read_frame(&mut frame) {
            if let Some(dir) = &self.dump {
                if decoded % self.every == 0 {
                    let path = dir.join(format!("frame_{decoded:06}.png"));
                    save_png(&frame, width, height, &path)?;
                    dumped += 1;
                }
            }
            debug!("Frame {decoded}: pts {:.3}s", frame.pts);
            decoded += 1;
        }

        let elapsed = start.elapsed();
        #[allow(clippy::cast_precision_loss)]
        let fps = decoded as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
        info!(
            "Decoded {decoded} frames in {:.3}s ({fps:.1} fps, {:?})",
            elapsed.as_secs_f64(),
            capture.decode_support()
        );
        if let Some(dir) = &self.dump {
            info!("Wrote {dumped} PNG files to {}", dir.display());
        }
        Ok(())
    }
}

/// Packed BGR24 to packed RGB24
fn bgr_to_rgb(bgr: &[u8]) -> Vec<u8> {
    bgr.chunks_exact(3)
        .flat_map(|px| [px[2], px[1], px[0]])
        .collect()
}

#[allow(clippy::cast_sign_loss)]
fn save_png(frame: &RawFrame, width: i32, height: i32, path: &Path) -> Result<()> {
    let image = RgbImage::from_raw(width as u32, height as u32, bgr_to_rgb(&frame.data))
        .context("Frame buffer does not match its dimensions")?;
    image
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}
