//! weaponwatchd - weapon detection webcam service
//!
//! Loads the classifier, opens the startup camera and serves the dashboard
//! API (MJPEG streams, detection endpoints, SSE alerts) until Ctrl-C.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use actix_web::web;
use weapon_watch::{api, AppContext, ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Webcam weapon detection service")]
struct Args {
    /// Config file (TOML, or JSON with a .json extension).
    #[arg(long, env = "WEAPON_WATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file.
    #[arg(long)]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = ServerConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.addr = addr;
    }

    let ctx = web::Data::new(AppContext::build(config)?);
    if !ctx.model.is_loaded() {
        log::error!("running without a model: detection endpoints will return empty results");
    }
    ctx.open_startup_camera();

    let result = actix_web::rt::System::new().block_on(api::serve(ctx.clone()));

    ctx.cameras.release_all();
    log::info!("weaponwatchd stopped");
    result
}
