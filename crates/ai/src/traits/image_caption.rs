use super::AIModel;

/// Caption length used when the caller does not ask for one.
pub const DEFAULT_MAX_LENGTH: usize = 50;

#[derive(Clone)]
pub struct ImageCaptionInput {
    /// encoded image, any format the `image` crate can guess
    pub image: Vec<u8>,
    pub max_length: usize,
}

impl ImageCaptionInput {
    pub fn new(image: impl Into<Vec<u8>>) -> Self {
        Self {
            image: image.into(),
            max_length: DEFAULT_MAX_LENGTH,
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }
}

impl std::fmt::Debug for ImageCaptionInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCaptionInput")
            .field("image_bytes", &self.image.len())
            .field("max_length", &self.max_length)
            .finish()
    }
}

pub type ImageCaptionOutput = String;
pub type ImageCaptionModel = AIModel<ImageCaptionInput, ImageCaptionOutput>;
