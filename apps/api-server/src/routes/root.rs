use axum::Json;
use serde_json::{json, Value};

pub(super) async fn index() -> Json<Value> {
    Json(json!({
        "message": "Image Captioning API",
        "docs": "/docs",
        "health": "/api/health",
    }))
}

pub(super) async fn docs() -> Json<Value> {
    Json(json!({
        "title": "Image Captioning API",
        "description": "AI-powered image captioning using BLIP model",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            {
                "method": "GET",
                "path": "/",
                "summary": "Service information",
            },
            {
                "method": "GET",
                "path": "/api/health",
                "summary": "Health check, reports whether the model is loaded",
            },
            {
                "method": "POST",
                "path": "/api/caption",
                "summary": "Generate a caption for an uploaded image",
                "request": {
                    "content_type": "multipart/form-data",
                    "fields": {
                        "file": "image file (JPG, PNG, etc.), at most 10MB",
                        "max_length": "optional, integer between 2 and 512, default 50",
                    },
                },
            },
        ],
    }))
}
