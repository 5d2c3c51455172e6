use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use qwatch::scene::Scene;
use qwatch::{EngineConfig, Frame, HistogramExtractor};

/// Replays a detections file through the resolution engine and prints one
/// JSON frame report per line.
///
/// No image frames are read, so appearance matching never runs and every
/// reported `id` is the tracker's own ID.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Detections file, one `<frame>:<json array>` per line ("-" for stdin)
    #[arg(short, long)]
    input: String,

    /// Engine config as JSON; defaults are used for missing fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stream name, only used in log output
    #[arg(short, long, default_value = "default")]
    stream: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let reader: Box<dyn BufRead> = if args.input == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(&args.input).with_context(|| format!("opening {}", args.input))?;
        Box::new(BufReader::new(file))
    };

    let mut scene = Scene::new(config, std::sync::Arc::new(HistogramExtractor::default()))?;
    let mut out = BufWriter::new(io::stdout().lock());

    let (mut processed, mut skipped) = (0usize, 0usize);

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let lineno = idx + 1;
        let frame = match Frame::from_dets_line(&line, lineno as u64) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("[{}] line {}: {}", args.stream, lineno, err);
                skipped += 1;
                continue;
            }
        };

        match scene.process(&frame, None) {
            Ok(report) => {
                serde_json::to_writer(&mut out, &report)?;
                writeln!(out)?;
                processed += 1;
            }
            Err(err) => {
                warn!("[{}] frame {} rejected: {}", args.stream, frame.number, err);
                skipped += 1;
            }
        }
    }

    out.flush()?;

    info!(
        "[{}] {} frames processed, {} skipped, {} tracks held",
        args.stream,
        processed,
        skipped,
        scene.store().len()
    );

    Ok(())
}
