use std::time::Duration;

use actix_web::http::header;
use actix_web::web::Bytes;
use actix_web::{get, post, web, HttpResponse};
use async_stream::stream;
use tokio::sync::broadcast::error::RecvError;

use crate::context::AppContext;
use crate::events::{PushEvent, KEEP_ALIVE_FRAME};

const KEEP_ALIVE_AFTER: Duration = Duration::from_secs(15);

/// Server-Sent Events push channel.
///
/// Sends `status` on connect, then every published event. The client count
/// drops when the response stream is dropped.
#[get("/events")]
pub async fn events(ctx: web::Data<AppContext>) -> HttpResponse {
    let mut subscription = ctx.events.subscribe();
    let greeting = PushEvent::Status(ctx.connection_status());

    let body = stream! {
        match greeting.to_sse_frame() {
            Ok(frame) => yield Ok::<Bytes, actix_web::Error>(Bytes::from(frame)),
            Err(err) => log::error!("failed to encode status event: {:#}", err),
        }
        loop {
            match tokio::time::timeout(KEEP_ALIVE_AFTER, subscription.receiver.recv()).await {
                Ok(Ok(event)) => match event.to_sse_frame() {
                    Ok(frame) => yield Ok(Bytes::from(frame)),
                    Err(err) => log::error!("failed to encode {} event: {:#}", event.name(), err),
                },
                Ok(Err(RecvError::Lagged(skipped))) => {
                    log::warn!("event client lagged, skipped {} events", skipped);
                }
                Ok(Err(RecvError::Closed)) => break,
                Err(_) => yield Ok(Bytes::from_static(KEEP_ALIVE_FRAME.as_bytes())),
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .streaming(body)
}

/// Broadcast a `status_update` to every client and return it.
#[post("/api/request-status")]
pub async fn request_status(ctx: web::Data<AppContext>) -> HttpResponse {
    let snapshot = ctx.status_snapshot();
    ctx.events.publish(PushEvent::StatusUpdate(snapshot.clone()));
    HttpResponse::Ok().json(snapshot)
}
