use crate::{
    error::{ApiError, ApiResult},
    types::CaptionResponse,
    upload::read_caption_form,
    Ctx, MAX_UPLOAD_BYTES,
};
use ai::{ImageCaptionInput, DEFAULT_MAX_LENGTH};
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    Json,
};
use std::time::Instant;

pub(super) async fn generate_caption(
    State(ctx): State<Ctx>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<CaptionResponse>> {
    let form = read_caption_form(multipart?, MAX_UPLOAD_BYTES)
        .await
        .inspect_err(|e| tracing::debug!("rejected upload: {}", e))?;

    tracing::info!(
        "captioning {:?} ({} bytes)",
        form.file_name.as_deref().unwrap_or("<unnamed>"),
        form.image.len()
    );

    let input = ImageCaptionInput::new(form.image)
        .with_max_length(form.max_length.unwrap_or(DEFAULT_MAX_LENGTH));

    let start = Instant::now();
    let caption = ctx
        .caption_model
        .process_single(input)
        .await
        .map_err(|e| {
            tracing::error!("failed to caption image: {:#}", e);
            ApiError::Processing(e)
        })?;
    tracing::info!("caption generated in {:?}: {}", start.elapsed(), caption);

    Ok(Json(CaptionResponse {
        caption,
        success: true,
        message: Some("Caption generated successfully".to_string()),
    }))
}
