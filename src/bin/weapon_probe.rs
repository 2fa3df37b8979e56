//! weapon_probe - check that the configured model loads and classifies.
//!
//! Runs the startup self-test (a black frame) and optionally classifies an
//! image file. Prints JSON. Exits non-zero when the model does not load.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

use weapon_watch::codec::decode_image_bytes;
use weapon_watch::context::run_self_test;
use weapon_watch::{InferenceAdapter, ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Probe the weapon classifier")]
struct Args {
    #[arg(long, env = "WEAPON_WATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Image file to classify.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Confidence threshold for the image file.
    #[arg(long)]
    threshold: Option<f32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServerConfig::load_from(args.config.as_deref())?;
    let model = InferenceAdapter::load(&config.model);
    let info = model
        .model_info()
        .ok_or_else(|| anyhow!("model could not be loaded from {}", config.model.path.display()))?;

    let self_test = run_self_test(&model, &config);

    let image = match &args.image {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to read image {}", path.display()))?;
            let frame = decode_image_bytes(&bytes)
                .with_context(|| format!("failed to decode image {}", path.display()))?;
            let threshold = args
                .threshold
                .unwrap_or(config.detection.request_threshold);
            let result = model.classify(&frame, threshold);
            Some(json!({
                "path": path.display().to_string(),
                "threshold": threshold,
                "width": frame.width(),
                "height": frame.height(),
                "result": result,
            }))
        }
        None => None,
    };

    let report = json!({
        "model": info,
        "self_test": self_test,
        "image": image,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
