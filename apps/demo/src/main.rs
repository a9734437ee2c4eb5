use ai::{ImageCaptionInput, ImageCaptionModel};
use anyhow::Context;
use api_server::{
    config::{load_caption_model, ModelArgs},
    standalone::shutdown_signal,
    types::ErrorResponse,
    MAX_UPLOAD_BYTES,
};
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tower_http::trace::TraceLayer;

const PLACEHOLDER: &str = "Please upload an image";

#[derive(Parser, Debug)]
#[command(name = "demo", version, about = "Upload an image and get a caption")]
struct DemoArgs {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 7860)]
    port: u16,

    #[arg(long, env = "LOCAL_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Serialize, Deserialize, Debug)]
struct PredictResponse {
    caption: String,
}

type DemoError = (StatusCode, Json<ErrorResponse>);

fn demo_error(status: StatusCode, detail: impl ToString) -> DemoError {
    (
        status,
        Json(ErrorResponse {
            detail: detail.to_string(),
        }),
    )
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../assets/index.html"))
}

async fn predict(
    State(caption_model): State<ImageCaptionModel>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>, DemoError> {
    let mut multipart = multipart.map_err(|e| demo_error(StatusCode::BAD_REQUEST, e.body_text()))?;

    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| demo_error(StatusCode::BAD_REQUEST, e.body_text()))?
    {
        if matches!(field.name(), Some("image") | Some("file")) {
            let data = field
                .bytes()
                .await
                .map_err(|e| demo_error(StatusCode::BAD_REQUEST, e.body_text()))?;
            image = Some(data);
            break;
        }
    }

    let image = match image {
        Some(image) if !image.is_empty() => image,
        _ => {
            return Ok(Json(PredictResponse {
                caption: PLACEHOLDER.to_string(),
            }))
        }
    };

    let caption = caption_model
        .process_single(ImageCaptionInput::new(image.to_vec()))
        .await
        .map_err(|e| {
            tracing::error!("failed to caption image: {:#}", e);
            demo_error(StatusCode::INTERNAL_SERVER_ERROR, e)
        })?;

    Ok(Json(PredictResponse { caption }))
}

fn app(caption_model: ImageCaptionModel) -> Router {
    Router::new()
        .route("/", get(index))
        .route(
            "/predict",
            post(predict).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(caption_model)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        println!("Could not load .env file: {e}");
    }

    let args = DemoArgs::parse();
    match &args.log_dir {
        Some(log_dir) => analytics_tracing::init_tracing_to_file("demo", "info", log_dir.clone()),
        None => analytics_tracing::init_tracing_to_stdout("demo", "info"),
    }

    let caption_model = load_caption_model(&args.model)
        .await
        .context("failed to load caption model")?;

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", args.host, args.port))?;
    tracing::info!("demo running on http://{}", listener.local_addr()?);

    axum::serve(listener, app(caption_model.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    caption_model.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai::{AIModel, Model};
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    struct Fixed;

    impl Model for Fixed {
        type Item = ImageCaptionInput;
        type Output = String;

        fn process(&mut self, item: ImageCaptionInput) -> anyhow::Result<String> {
            if item.image.starts_with(b"bad") {
                anyhow::bail!("Error generating caption: broken image");
            }
            Ok("a photo of a cat".to_string())
        }
    }

    async fn test_app() -> Router {
        let model = AIModel::new("fixed", || async { Ok(Fixed) }, 1)
            .await
            .unwrap();
        app(model)
    }

    fn predict_request(field: &str, data: &str) -> Request<Body> {
        let body = format!(
            "--b\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"cat.png\"\r\nContent-Type: image/png\r\n\r\n{}\r\n--b--\r\n",
            field, data
        );
        Request::post("/predict")
            .header("content-type", "multipart/form-data; boundary=b")
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test_log::test(tokio::test)]
    async fn test_predict() {
        let (status, body) = send(test_app().await, predict_request("image", "png")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["caption"], "a photo of a cat");
    }

    #[test_log::test(tokio::test)]
    async fn test_predict_without_image() {
        let (status, body) = send(test_app().await, predict_request("image", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["caption"], PLACEHOLDER);

        let (_, body) = send(test_app().await, predict_request("other", "png")).await;
        assert_eq!(body["caption"], PLACEHOLDER);
    }

    #[test_log::test(tokio::test)]
    async fn test_predict_failure() {
        let (status, body) = send(test_app().await, predict_request("file", "bad")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "Error generating caption: broken image");
    }

    #[test_log::test(tokio::test)]
    async fn test_index_page() {
        let response = test_app()
            .await
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&body).contains("/predict"));
    }
}
