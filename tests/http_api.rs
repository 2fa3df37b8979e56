use std::io::Cursor;
use std::sync::Arc;

use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use base64::Engine;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};

use weapon_watch::config::{CameraBackendKind, ModelBackendKind, ServerConfig};
use weapon_watch::ingest::SyntheticBackend;
use weapon_watch::pipeline::AlertCandidate;
use weapon_watch::{api, timestamp_now, AppContext, DetectionHistory, InferenceAdapter};

fn config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.model.backend = ModelBackendKind::Stub;
    config.model.stub_output = vec![0.1, 0.05, 0.85];
    config.model.input_size = 16;
    config.camera.backend = CameraBackendKind::Synthetic;
    config.camera.capture.width = 64;
    config.camera.capture.height = 48;
    config
}

fn context(loaded: bool) -> web::Data<AppContext> {
    let config = config();
    let model = if loaded {
        InferenceAdapter::load(&config.model)
    } else {
        InferenceAdapter::unloaded(config.model.classes.clone(), "No Weapon")
    };
    web::Data::new(AppContext::from_parts(
        config,
        model,
        Arc::new(SyntheticBackend::new(vec![0, 1])),
        DetectionHistory::in_memory(50),
    ))
}

fn png_base64(width: u32, height: u32) -> String {
    let frame = RgbImage::from_pixel(width, height, Rgb([120, 30, 200]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(frame)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("encode png");
    base64::engine::general_purpose::STANDARD.encode(buf)
}

macro_rules! app {
    ($ctx:expr) => {
        test::init_service(App::new().app_data($ctx.clone()).configure(api::configure)).await
    };
}

#[actix_rt::test]
async fn health_reports_model_state() {
    let app = app!(context(true));
    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({ "status": "healthy", "model_loaded": true }));

    let app = app!(context(false));
    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["model_loaded"], false);
}

#[actix_rt::test]
async fn detect_classifies_a_png() {
    let app = app!(context(true));
    let req = test::TestRequest::post()
        .uri("/detect")
        .set_json(json!({
            "image": format!("data:image/png;base64,{}", png_base64(40, 30)),
            "confidence_threshold": 0.3,
            "timestamp": "client-ts",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;

    assert_eq!(body["total_detections"], 1);
    assert_eq!(body["detections"][0]["class_name"], "Gun");
    assert_eq!(body["detections"][0]["bbox"], json!([0, 0, 40, 30]));
    assert_eq!(body["detections"][0]["classification_type"], "full_image");
    assert_eq!(body["all_predictions"].as_array().map(Vec::len), Some(3));
    assert_eq!(body["frame_dimensions"], json!({ "width": 40, "height": 30 }));
    assert_eq!(body["timestamp"], "client-ts");
    assert_eq!(body["model_type"], "classification");
}

#[actix_rt::test]
async fn detect_uses_request_threshold_by_default() {
    let app = app!(context(true));
    let req = test::TestRequest::post()
        .uri("/detect")
        .set_json(json!({ "image": png_base64(8, 8) }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["total_detections"], 1);

    let req = test::TestRequest::post()
        .uri("/detect")
        .set_json(json!({ "image": png_base64(8, 8), "confidence_threshold": 0.9 }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["total_detections"], 0);
    assert_eq!(body["all_predictions"].as_array().map(Vec::len), Some(3));
}

#[actix_rt::test]
async fn detect_rejects_bad_payloads() {
    let app = app!(context(true));

    let req = test::TestRequest::post()
        .uri("/detect")
        .set_json(json!({ "image": "not-base64!!" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "error": "Invalid image data" }));

    let req = test::TestRequest::post()
        .uri("/detect")
        .set_json(json!({ "confidence_threshold": 0.5 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "No image data provided");

    let req = test::TestRequest::post()
        .uri("/detect")
        .set_json(json!({ "image": png_base64(8, 8), "confidence_threshold": 1.5 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri("/detect")
        .insert_header(ContentType::json())
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"].is_string());
}

#[actix_rt::test]
async fn detect_stream_skips_undecodable_frames() {
    let app = app!(context(true));
    let req = test::TestRequest::post()
        .uri("/detect_stream")
        .set_json(json!({
            "frames": [
                { "image": png_base64(8, 8), "frame_id": 1, "timestamp": 10 },
                { "image": "garbage", "frame_id": 2, "timestamp": 11 },
            ],
        }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let results = body["results"].as_array().expect("results array");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["frame_id"], 1);
    assert_eq!(body["model_type"], "classification");

    let req = test::TestRequest::post()
        .uri("/detect_stream")
        .set_json(json!({}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "No frame data provided");
}

#[actix_rt::test]
async fn model_info_requires_a_model() {
    let app = app!(context(false));
    let req = test::TestRequest::get().uri("/model_info").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "No model loaded");

    let req = test::TestRequest::get().uri("/test-detection").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let app = app!(context(true));
    let req = test::TestRequest::get().uri("/model_info").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["num_classes"], 3);
    assert_eq!(body["model_type"], "classification");
    assert_eq!(body["input_shape"], json!([1, 16, 16, 3]));
}

#[actix_rt::test]
async fn test_detection_reads_camera_zero() {
    let app = app!(context(true));
    let req = test::TestRequest::get().uri("/test-detection").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["frame_dimensions"], json!({ "width": 64, "height": 48 }));
    assert_eq!(body["model_classes"], json!(["No Weapon", "Knife", "Gun"]));
    assert_eq!(body["detections"][0]["class_name"], "Gun");
}

#[actix_rt::test]
async fn camera_lifecycle() {
    let ctx = context(true);
    let app = app!(ctx);

    let req = test::TestRequest::post().uri("/api/camera/initialize/1").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({ "success": true, "message": "Camera 1 initialized" }));
    assert!(ctx.cameras.is_open(1));

    let req = test::TestRequest::get().uri("/api/camera/check/1").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({ "available": true, "camera_index": 1 }));

    let req = test::TestRequest::post().uri("/api/camera/stop/1").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["success"], true);

    let req = test::TestRequest::post().uri("/api/camera/stop/1").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({ "success": false, "message": "Camera 1 not found" }));

    let req = test::TestRequest::post().uri("/api/camera/initialize/7").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["success"], false);

    let req = test::TestRequest::get().uri("/api/camera/check/7").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["available"], false);
}

#[actix_rt::test]
async fn history_lists_recorded_alerts() {
    let ctx = context(true);
    let app = app!(ctx);
    for weapon in ["Gun", "Knife", "Gun"] {
        let alert = AlertCandidate {
            camera_index: 0,
            weapon_type: weapon.to_string(),
            confidence: 0.9,
            timestamp: timestamp_now(),
        };
        ctx.record_alert(&alert, &RgbImage::new(8, 8));
    }

    let req = test::TestRequest::get().uri("/api/history").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["total"], 3);
    assert_eq!(body["detections"][0]["weapon_type"], "Gun");
    assert_eq!(body["detections"][0]["location"], "Camera 0");

    let req = test::TestRequest::get().uri("/api/history?limit=1").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["detections"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["total"], 3);

    let req = test::TestRequest::get()
        .uri("/api/analysis/weapon-distribution")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({ "labels": ["Gun", "Knife"], "data": [2, 1] }));
}

#[actix_rt::test]
async fn status_endpoints_report_clients_and_camera() {
    let ctx = context(true);
    let app = app!(ctx);

    let req = test::TestRequest::get().uri("/api/model-status").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "loaded");
    assert_eq!(body["camera_status"], "connected");
    assert_eq!(body["num_classes"], 3);
    assert!(!ctx.cameras.is_open(0));

    let mut sub = ctx.events.subscribe();
    let req = test::TestRequest::post().uri("/api/request-status").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["model_loaded"], true);
    assert_eq!(body["connected_clients"], 1);
    let event = sub.receiver.try_recv().expect("status_update broadcast");
    assert_eq!(event.name(), "status_update");
}

#[actix_rt::test]
async fn event_stream_tracks_connected_clients() {
    let ctx = context(true);
    let app = app!(ctx);

    let req = test::TestRequest::get().uri("/events").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );
    assert_eq!(ctx.events.connected_clients(), 1);
    drop(resp);
    assert_eq!(ctx.events.connected_clients(), 0);
}

#[actix_rt::test]
async fn stream_endpoint_serves_multipart() {
    let app = app!(context(true));
    let req = test::TestRequest::get().uri("/stream/1").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").and_then(|v| v.to_str().ok()),
        Some("multipart/x-mixed-replace; boundary=frame")
    );
}

#[actix_rt::test]
async fn screenshot_names_are_checked() {
    let app = app!(context(true));
    let req = test::TestRequest::get().uri("/screenshots/missing.jpg").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::get().uri("/screenshots/.hidden").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
