use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// GET /health
pub async fn health_handler() -> Json<Health> {
    Json(Health {
        status: "ok",
        service: "hireflow-api",
        version: env!("CARGO_PKG_VERSION"),
    })
}
