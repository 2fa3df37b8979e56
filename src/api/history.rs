use actix_files::NamedFile;
use actix_web::{get, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use super::error::ApiError;
use crate::context::AppContext;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<usize>,
}

#[get("/api/history")]
pub async fn history(
    ctx: web::Data<AppContext>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, ApiError> {
    let limit = query.limit;
    let (detections, total) = web::block(move || -> anyhow::Result<_> {
        let detections = ctx.history.list(limit)?;
        let total = ctx.history.total()?;
        Ok((detections, total))
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({ "detections": detections, "total": total })))
}

#[get("/api/analysis/weapon-distribution")]
pub async fn weapon_distribution(ctx: web::Data<AppContext>) -> Result<HttpResponse, ApiError> {
    let distribution = web::block(move || ctx.history.distribution()).await??;
    let (labels, data): (Vec<String>, Vec<usize>) = distribution.into_iter().unzip();
    Ok(HttpResponse::Ok().json(json!({ "labels": labels, "data": data })))
}

#[get("/screenshots/{file}")]
pub async fn screenshot(
    req: HttpRequest,
    ctx: web::Data<AppContext>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let file = ctx.screenshots.resolve(&path.into_inner())?;
    let named = NamedFile::open_async(&file)
        .await
        .map_err(|_| ApiError::NotFound("screenshot not found".to_string()))?;
    Ok(named.into_response(&req))
}
