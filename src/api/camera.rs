use actix_web::http::header;
use actix_web::web::Bytes;
use actix_web::{get, post, web, HttpResponse};
use futures::StreamExt;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;

use super::error::ApiError;
use crate::codec::multipart_content_type;
use crate::context::AppContext;
use crate::pipeline::spawn_stream;

#[post("/api/camera/initialize/{index}")]
pub async fn initialize(
    ctx: web::Data<AppContext>,
    path: web::Path<u32>,
) -> Result<HttpResponse, ApiError> {
    let index = path.into_inner();
    let worker = ctx.clone();
    let success = match web::block(move || worker.cameras.open(index)).await? {
        Ok(_) => true,
        Err(err) => {
            log::warn!("camera {} failed to initialize: {}", index, err);
            false
        }
    };
    let message = if success {
        format!("Camera {} initialized", index)
    } else {
        format!("Failed to initialize camera {}", index)
    };
    Ok(HttpResponse::Ok().json(json!({ "success": success, "message": message })))
}

#[post("/api/camera/stop/{index}")]
pub async fn stop(ctx: web::Data<AppContext>, path: web::Path<u32>) -> Result<HttpResponse, ApiError> {
    let index = path.into_inner();
    let success = ctx.cameras.close(index)?;
    let message = if success {
        format!("Camera {} stopped", index)
    } else {
        format!("Camera {} not found", index)
    };
    Ok(HttpResponse::Ok().json(json!({ "success": success, "message": message })))
}

#[get("/api/camera/check/{index}")]
pub async fn check(ctx: web::Data<AppContext>, path: web::Path<u32>) -> Result<HttpResponse, ApiError> {
    let index = path.into_inner();
    let worker = ctx.clone();
    let available = web::block(move || worker.cameras.probe(index)).await?;
    Ok(HttpResponse::Ok().json(json!({ "available": available, "camera_index": index })))
}

#[get("/stream")]
pub async fn stream_default(ctx: web::Data<AppContext>) -> Result<HttpResponse, ApiError> {
    mjpeg_response(ctx, 0)
}

#[get("/stream/{index}")]
pub async fn stream_index(
    ctx: web::Data<AppContext>,
    path: web::Path<u32>,
) -> Result<HttpResponse, ApiError> {
    mjpeg_response(ctx, path.into_inner())
}

/// Each response gets its own worker. Dropping the response body stops it.
fn mjpeg_response(ctx: web::Data<AppContext>, index: u32) -> Result<HttpResponse, ApiError> {
    let rx = spawn_stream(ctx.into_inner(), index)?;
    let body = ReceiverStream::new(rx).map(|chunk| Ok::<Bytes, actix_web::Error>(Bytes::from(chunk)));
    Ok(HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .content_type(multipart_content_type())
        .streaming(body))
}
