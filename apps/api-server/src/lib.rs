use ai::ImageCaptionModel;

pub mod config;
pub mod error;
pub mod routes;
pub mod standalone;
pub mod types;
mod upload;

pub use upload::MAX_UPLOAD_BYTES;

/// Shared by every handler. Cloning only clones handles.
#[derive(Clone)]
pub struct Ctx {
    pub caption_model: ImageCaptionModel,
}

impl Ctx {
    pub fn new(caption_model: ImageCaptionModel) -> Self {
        Self { caption_model }
    }
}
