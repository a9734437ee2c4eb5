mod beam_search;
mod config;
mod image_processor;

pub use beam_search::BeamSearch;
pub use config::*;
pub use image_processor::{decode_rgb, load_image_from_bytes, IMAGE_SIZE};

use crate::traits::{ImageCaptionInput, ImageCaptionModel, ImageCaptionOutput};
use crate::{AIModel, CaptionError, CaptionResult, DevicePreference, Model};
use anyhow::anyhow;
use candle_core::{DType, Device, Tensor, D};
use candle_transformers::models::{blip, quantized_blip};
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::{debug, info};

/// Decoder start token (`[DEC]`).
const BOS_TOKEN_ID: u32 = 30522;
const SEP_TOKEN_ID: u32 = 102;
const NUM_BEAMS: usize = 5;

enum BLIPWeights {
    Full(blip::BlipForConditionalGeneration),
    Quantized(quantized_blip::BlipForConditionalGeneration),
}

impl BLIPWeights {
    fn embed_image(&self, image: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Full(m) => image.apply(m.vision_model()),
            Self::Quantized(m) => image.apply(m.vision_model()),
        }
    }

    /// Runs the whole sequence from an empty cache, beams do not share one.
    fn decode(&mut self, input_ids: &Tensor, image_embeds: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Full(m) => {
                let decoder = m.text_decoder();
                decoder.reset_kv_cache();
                decoder.forward(input_ids, image_embeds)
            }
            Self::Quantized(m) => {
                let decoder = m.text_decoder();
                decoder.reset_kv_cache();
                decoder.forward(input_ids, image_embeds)
            }
        }
    }
}

pub struct BLIP {
    tokenizer: Tokenizer,
    model: BLIPWeights,
    device: Device,
    max_position_embeddings: usize,
}

impl Model for BLIP {
    type Item = ImageCaptionInput;
    type Output = ImageCaptionOutput;

    fn process(&mut self, item: Self::Item) -> anyhow::Result<Self::Output> {
        self.get_caption(&item)
            .map_err(|e| anyhow!("Error generating caption: {}", e))
    }
}

impl BLIP {
    /// Resolves (and if needed downloads) the artifacts, then loads them.
    pub async fn new(options: &BLIPOptions) -> anyhow::Result<Self> {
        let artifacts = options.resolve_artifacts().await?;
        Self::from_files(
            &artifacts.model_path,
            &artifacts.tokenizer_path,
            options.model,
            options.weights,
            options.device,
        )
    }

    pub fn from_files(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        model_type: BLIPModel,
        weights: WeightFormat,
        device: DevicePreference,
    ) -> anyhow::Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow!("failed to initialize tokenizer: {}", e))?;

        let config = model_type.config();
        let device = device.select()?;
        info!(
            "loading BLIP {} ({}) from {} on {:?}",
            model_type,
            weights,
            model_path.as_ref().display(),
            device
        );

        let model = match weights {
            WeightFormat::Safetensors => {
                // SAFETY: the weights file is not modified while mapped
                let vb = unsafe {
                    candle_nn::VarBuilder::from_mmaped_safetensors(
                        &[model_path.as_ref()],
                        DType::F32,
                        &device,
                    )?
                };
                BLIPWeights::Full(blip::BlipForConditionalGeneration::new(&config, vb)?)
            }
            WeightFormat::Gguf => {
                let vb = quantized_blip::VarBuilder::from_gguf(model_path, &device)?;
                BLIPWeights::Quantized(quantized_blip::BlipForConditionalGeneration::new(
                    &config, vb,
                )?)
            }
        };

        Ok(Self {
            tokenizer,
            model,
            device,
            max_position_embeddings: config.text_config.max_position_embeddings,
        })
    }

    pub fn get_caption(&mut self, input: &ImageCaptionInput) -> CaptionResult<String> {
        if input.max_length < 2 || input.max_length > self.max_position_embeddings {
            return Err(CaptionError::InvalidMaxLength {
                value: input.max_length,
                max: self.max_position_embeddings,
            });
        }
        debug!(
            "generating caption for {} bytes, max_length {}",
            input.image.len(),
            input.max_length
        );

        let image = load_image_from_bytes(&input.image)?.to_device(&self.device)?;
        let image_embeds = self.model.embed_image(&image.unsqueeze(0)?)?;

        let search = BeamSearch::new(NUM_BEAMS, input.max_length, SEP_TOKEN_ID)
            .with_early_stopping(true);

        let device = &self.device;
        let model = &mut self.model;
        let token_ids = search.generate(&[BOS_TOKEN_ID], |tokens| {
            let input_ids = Tensor::new(tokens, device)?.unsqueeze(0)?;
            let logits = model.decode(&input_ids, &image_embeds)?;
            let logits = logits.squeeze(0)?;
            let logits = logits.get(logits.dim(0)? - 1)?;
            candle_nn::ops::log_softmax(&logits, D::Minus1)?
                .to_dtype(DType::F32)?
                .to_vec1::<f32>()
        })?;

        let caption = self
            .tokenizer
            .decode(&token_ids, true)
            .map_err(|e| CaptionError::Tokenizer(e.to_string()))?;
        debug!("caption: {}", caption);

        Ok(caption.trim().to_string())
    }
}

/// Starts the worker thread that owns a [`BLIP`] and waits for it to load.
pub async fn image_caption_model(
    options: BLIPOptions,
    queue_capacity: usize,
) -> anyhow::Result<ImageCaptionModel> {
    let model_id = format!("blip-{}-{}", options.model, options.weights);
    AIModel::new(
        model_id,
        move || async move { BLIP::new(&options).await },
        queue_capacity,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test)]
    #[ignore = "downloads the BLIP base weights"]
    async fn test_caption() {
        use image::{ImageFormat, Rgba, RgbaImage};

        let model = image_caption_model(
            BLIPOptions {
                device: DevicePreference::Cpu,
                resources_dir: std::env::temp_dir().join("blip-test-resources"),
                ..Default::default()
            },
            4,
        )
        .await
        .expect("load blip");

        let mut png = std::io::Cursor::new(Vec::new());
        RgbaImage::from_pixel(1, 1, Rgba([200, 30, 30, 128]))
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();
        let input = ImageCaptionInput::new(png.into_inner());

        let start = std::time::Instant::now();
        let first = model.process_single(input.clone()).await.unwrap();
        tracing::info!("caption {:?} in {:?}", first, start.elapsed());
        assert!(!first.is_empty());

        let second = model.process_single(input).await.unwrap();
        assert_eq!(first, second);

        let err = model
            .process_single(ImageCaptionInput::new(b"not an image".to_vec()))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Error generating caption:"));

        model.shutdown().await.unwrap();
    }
}
