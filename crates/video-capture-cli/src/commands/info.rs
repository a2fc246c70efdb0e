use anyhow::{Context as _, Result};
use clap::Args;
use serde::Serialize;
use video_capture::{DecodeSupport, StreamInfo};

use super::CaptureArgs;

#[derive(Args)]
pub struct InfoCommand {
    #[command(flatten)]
    capture: CaptureArgs,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct InfoReport<'a> {
    input: &'a str,
    decode_support: DecodeSupport,
    #[serde(flatten)]
    stream: &'a StreamInfo,
    estimated_frame_count: i64,
    frame_size_in_bytes: usize,
}

impl InfoCommand {
    pub fn execute(self) -> Result<()> {
        let capture = self.capture.open()?;
        let stream = capture
            .stream_info()
            .context("Capture closed right after opening")?;

        let report = InfoReport {
            input: &self.capture.input,
            decode_support: capture.decode_support(),
            stream,
            estimated_frame_count: stream.estimated_frame_count(),
            frame_size_in_bytes: stream.frame_size_in_bytes(),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialize report")?
            );
        } else {
            print!("{}", render_text(&report));
        }
        Ok(())
    }
}

fn render_text(report: &InfoReport<'_>) -> String {
    let stream = report.stream;
    let mut out = String::new();
    out.push_str(&format!("Input:        {}\n", report.input));
    out.push_str(&format!("Stream:       #{} ({})\n", stream.stream_index, stream.codec));
    out.push_str(&format!("Resolution:   {}x{}\n", stream.width, stream.height));
    out.push_str(&format!("Frame rate:   {:.3} fps\n", stream.fps));
    out.push_str(&format!("Duration:     {:.3} s\n", stream.duration));
    match stream.frame_count {
        Some(count) => out.push_str(&format!("Frames:       {count}\n")),
        None => out.push_str(&format!("Frames:       ~{} (estimated)\n", report.estimated_frame_count)),
    }
    out.push_str(&format!(
        "Time base:    {}/{}\n",
        stream.time_base.0, stream.time_base.1
    ));
    out.push_str(&format!("Frame bytes:  {}\n", report.frame_size_in_bytes));
    out.push_str(&format!("Decoding:     {:?}\n", report.decode_support));
    out
}
