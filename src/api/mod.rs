//! HTTP surface.
//!
//! JSON endpoints for detection, camera control and history, MJPEG streams
//! per camera, and an SSE push channel. Blocking work (decoding, inference,
//! device access, SQLite) runs on the actix blocking pool.

use actix_cors::Cors;
use actix_web::error::InternalError;
use actix_web::{web, App, HttpResponse, HttpServer};
use anyhow::{Context, Result};
use serde_json::json;

mod camera;
mod detect;
pub mod error;
mod events;
mod history;

pub use error::ApiError;

use crate::context::AppContext;

/// Register every route. Shared by the server and the tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    let json_config = web::JsonConfig::default()
        .limit(16 * 1024 * 1024)
        .error_handler(|err, _req| {
            let response = bad_request(format!("Invalid request body: {}", err));
            InternalError::from_response(err, response).into()
        });
    let query_config = web::QueryConfig::default().error_handler(|err, _req| {
        let response = bad_request(format!("Invalid query: {}", err));
        InternalError::from_response(err, response).into()
    });
    let path_config = web::PathConfig::default().error_handler(|err, _req| {
        let response = bad_request(format!("Invalid path: {}", err));
        InternalError::from_response(err, response).into()
    });

    cfg.app_data(json_config)
        .app_data(query_config)
        .app_data(path_config)
        .service(detect::health)
        .service(detect::detect)
        .service(detect::detect_stream)
        .service(detect::test_detection)
        .service(detect::model_info)
        .service(detect::model_status)
        .service(camera::initialize)
        .service(camera::stop)
        .service(camera::check)
        .service(camera::stream_default)
        .service(camera::stream_index)
        .service(events::events)
        .service(events::request_status)
        .service(history::history)
        .service(history::weapon_distribution)
        .service(history::screenshot);
}

fn bad_request(message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({ "error": message }))
}

/// Serve until the system is stopped (Ctrl-C).
pub async fn serve(ctx: web::Data<AppContext>) -> Result<()> {
    let addr = ctx.config.addr.clone();
    let server = HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(ctx.clone())
            .configure(configure)
    })
    .bind(&addr)
    .with_context(|| format!("failed to bind {}", addr))?;
    log::info!("weaponwatchd listening on http://{}", addr);
    server.run().await.context("http server failed")?;
    Ok(())
}
