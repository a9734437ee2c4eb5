use thiserror::Error;

pub type CaptionResult<T> = std::result::Result<T, CaptionError>;

#[derive(Error, Debug)]
pub enum CaptionError {
    #[error("failed to read image: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("{0}")]
    Candle(#[from] candle_core::Error),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("max_length must be between 2 and {max}, got {value}")]
    InvalidMaxLength { value: usize, max: usize },

    #[error("{0} weights are not published for this model variant")]
    UnsupportedWeights(String),
}
