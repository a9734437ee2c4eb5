use crate::{types::HealthResponse, Ctx};
use axum::{extract::State, Json};

pub(super) async fn health_check(State(ctx): State<Ctx>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        model_loaded: ctx.caption_model.is_loaded(),
    })
}
