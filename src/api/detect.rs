use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::{ApiError, INVALID_IMAGE, NO_CAMERA_FRAME, NO_FRAMES, NO_IMAGE, NO_MODEL};
use crate::codec::decode_base64_image;
use crate::context::AppContext;
use crate::detect::{ClassProbability, Detection};

const MODEL_TYPE: &str = "classification";
const TEST_DETECTION_THRESHOLD: f32 = 0.1;

#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    image: Option<String>,
    confidence_threshold: Option<f32>,
    timestamp: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct DetectStreamRequest {
    frames: Option<Vec<StreamFrame>>,
    confidence_threshold: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct StreamFrame {
    image: Option<String>,
    frame_id: Option<Value>,
    timestamp: Option<Value>,
}

#[derive(Debug, Serialize)]
struct FrameDimensions {
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
struct DetectResponse {
    detections: Vec<Detection>,
    all_predictions: Vec<ClassProbability>,
    frame_dimensions: FrameDimensions,
    timestamp: Option<Value>,
    total_detections: usize,
    model_type: &'static str,
}

#[derive(Debug, Serialize)]
struct StreamResult {
    frame_id: Option<Value>,
    detections: Vec<Detection>,
    all_predictions: Vec<ClassProbability>,
    timestamp: Option<Value>,
}

fn request_threshold(ctx: &AppContext, requested: Option<f32>) -> Result<f32, ApiError> {
    let threshold = requested.unwrap_or(ctx.config.detection.request_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ApiError::bad_request(
            "confidence_threshold must be within [0, 1]",
        ));
    }
    Ok(threshold)
}

#[get("/health")]
pub async fn health(ctx: web::Data<AppContext>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "model_loaded": ctx.model.is_loaded(),
    }))
}

#[post("/detect")]
pub async fn detect(
    ctx: web::Data<AppContext>,
    body: web::Json<DetectRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let image = body
        .image
        .filter(|image| !image.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(NO_IMAGE))?;
    let threshold = request_threshold(&ctx, body.confidence_threshold)?;

    let response = web::block(move || -> Result<DetectResponse, ApiError> {
        let frame = decode_base64_image(&image).map_err(|err| {
            log::warn!("rejecting /detect payload: {}", err);
            ApiError::bad_request(INVALID_IMAGE)
        })?;
        let result = ctx.model.classify(&frame, threshold);
        Ok(DetectResponse {
            total_detections: result.detections.len(),
            detections: result.detections,
            all_predictions: result.all_predictions,
            frame_dimensions: FrameDimensions {
                width: frame.width(),
                height: frame.height(),
            },
            timestamp: body.timestamp,
            model_type: MODEL_TYPE,
        })
    })
    .await??;
    Ok(HttpResponse::Ok().json(response))
}

#[post("/detect_stream")]
pub async fn detect_stream(
    ctx: web::Data<AppContext>,
    body: web::Json<DetectStreamRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let frames = body.frames.ok_or_else(|| ApiError::bad_request(NO_FRAMES))?;
    let threshold = request_threshold(&ctx, body.confidence_threshold)?;

    let results = web::block(move || {
        frames
            .into_iter()
            .filter_map(|frame| {
                let image = frame.image.as_deref()?;
                let decoded = match decode_base64_image(image) {
                    Ok(decoded) => decoded,
                    Err(err) => {
                        log::warn!("skipping undecodable stream frame: {}", err);
                        return None;
                    }
                };
                let result = ctx.model.classify(&decoded, threshold);
                Some(StreamResult {
                    frame_id: frame.frame_id,
                    detections: result.detections,
                    all_predictions: result.all_predictions,
                    timestamp: frame.timestamp,
                })
            })
            .collect::<Vec<_>>()
    })
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "results": results,
        "model_type": MODEL_TYPE,
    })))
}

#[get("/test-detection")]
pub async fn test_detection(ctx: web::Data<AppContext>) -> Result<HttpResponse, ApiError> {
    ctx.model.require_loaded()?;
    let worker = ctx.clone();
    let (result, dimensions) = web::block(move || -> Result<_, ApiError> {
        let frame = worker.cameras.read(0).map_err(|err| {
            log::warn!("test detection without frame: {}", err);
            ApiError::Unavailable(NO_CAMERA_FRAME.to_string())
        })?;
        let result = worker.model.classify(&frame, TEST_DETECTION_THRESHOLD);
        let dimensions = FrameDimensions {
            width: frame.width(),
            height: frame.height(),
        };
        Ok((result, dimensions))
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({
        "detections": result.detections,
        "all_predictions": result.all_predictions,
        "frame_dimensions": dimensions,
        "model_classes": ctx.model.classes(),
    })))
}

#[get("/model_info")]
pub async fn model_info(ctx: web::Data<AppContext>) -> Result<HttpResponse, ApiError> {
    let info = ctx
        .model
        .model_info()
        .ok_or_else(|| ApiError::Unavailable(NO_MODEL.to_string()))?;
    Ok(HttpResponse::Ok().json(info))
}

#[get("/api/model-status")]
pub async fn model_status(ctx: web::Data<AppContext>) -> Result<HttpResponse, ApiError> {
    let camera_ctx = ctx.clone();
    // Probing leaves a stopped camera stopped.
    let camera_connected = web::block(move || camera_ctx.cameras.probe(0)).await?;
    let loaded = ctx.model.is_loaded();
    let classes = ctx.model.classes();
    Ok(HttpResponse::Ok().json(json!({
        "status": if loaded { "loaded" } else { "error" },
        "model_loaded": loaded,
        "camera_status": if camera_connected { "connected" } else { "disconnected" },
        "classes": classes,
        "num_classes": classes.len(),
        "connected_clients": ctx.events.connected_clients(),
    })))
}
