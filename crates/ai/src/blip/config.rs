use crate::{CaptionError, DevicePreference};
use candle_transformers::models::blip::VisionConfig;
use candle_transformers::models::{blip, blip_text};
use file_downloader::{FileDownload, FileDownloadConfig};
use std::path::PathBuf;
use strum_macros::{AsRefStr, Display, EnumString};

/// Repo with the quantized gguf exports.
pub const GGUF_REPO: &str = "lmz/candle-blip";
const GGUF_REVISION: &str = "main";
const SAFETENSORS_FILE: &str = "model.safetensors";
const TOKENIZER_FILE: &str = "tokenizer.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BLIPModel {
    #[default]
    Base,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum WeightFormat {
    /// full precision
    #[default]
    Safetensors,
    /// q4k quantized
    Gguf,
}

impl BLIPModel {
    pub fn repo_id(&self) -> &'static str {
        match self {
            BLIPModel::Base => "Salesforce/blip-image-captioning-base",
            BLIPModel::Large => "Salesforce/blip-image-captioning-large",
        }
    }

    pub fn gguf_file(&self) -> Option<&'static str> {
        match self {
            BLIPModel::Base => None,
            BLIPModel::Large => Some("blip-image-captioning-large-q4k.gguf"),
        }
    }

    pub fn config(&self) -> blip::Config {
        match self {
            BLIPModel::Base => blip_base_config(),
            BLIPModel::Large => blip::Config::image_captioning_large(),
        }
    }
}

fn blip_base_config() -> blip::Config {
    let text_config = blip_text::Config {
        vocab_size: 30524,
        hidden_size: 768,
        encoder_hidden_size: 768,
        intermediate_size: 3072,
        projection_dim: 768,
        num_hidden_layers: 12,
        num_attention_heads: 12,
        max_position_embeddings: 512,
        hidden_act: candle_nn::Activation::Gelu,
        layer_norm_eps: 1e-12,
        is_decoder: true,
    };
    let vision_config = VisionConfig {
        hidden_size: 768,
        intermediate_size: 3072,
        projection_dim: 512,
        num_hidden_layers: 12,
        num_attention_heads: 12,
        image_size: 384,
        patch_size: 16,
        hidden_act: candle_nn::Activation::Gelu,
        layer_norm_eps: 1e-5,
    };

    blip::Config {
        text_config,
        vision_config,
        projection_dim: 512,
        image_text_hidden_size: 256,
    }
}

/// Everything needed to build a [`super::BLIP`].
#[derive(Debug, Clone)]
pub struct BLIPOptions {
    pub model: BLIPModel,
    pub weights: WeightFormat,
    /// hub revision of the Salesforce repo
    pub revision: String,
    /// local weights, skips the download
    pub model_path: Option<PathBuf>,
    /// local tokenizer.json, skips the download
    pub tokenizer_path: Option<PathBuf>,
    pub resources_dir: PathBuf,
    pub device: DevicePreference,
}

impl Default for BLIPOptions {
    fn default() -> Self {
        Self {
            model: BLIPModel::default(),
            weights: WeightFormat::default(),
            revision: "main".to_string(),
            model_path: None,
            tokenizer_path: None,
            resources_dir: PathBuf::from("resources"),
            device: DevicePreference::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BLIPArtifacts {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
}

impl BLIPOptions {
    /// Local paths win, anything missing is fetched into `resources_dir`.
    pub async fn resolve_artifacts(&self) -> anyhow::Result<BLIPArtifacts> {
        let gguf_file = match self.weights {
            WeightFormat::Gguf => Some(self.model.gguf_file().ok_or_else(|| {
                CaptionError::UnsupportedWeights(format!("{} {}", self.weights, self.model))
            })?),
            WeightFormat::Safetensors => None,
        };

        let download = FileDownload::new(FileDownloadConfig {
            resources_dir: self.resources_dir.clone(),
            ..Default::default()
        });

        let model_path = match (&self.model_path, gguf_file) {
            (Some(path), _) => path.clone(),
            (None, Some(file)) => {
                download
                    .download_hub_file_if_not_exists(GGUF_REPO, GGUF_REVISION, file)
                    .await?
            }
            (None, None) => {
                download
                    .download_hub_file_if_not_exists(
                        self.model.repo_id(),
                        &self.revision,
                        SAFETENSORS_FILE,
                    )
                    .await?
            }
        };

        let tokenizer_path = match &self.tokenizer_path {
            Some(path) => path.clone(),
            None => {
                download
                    .download_hub_file_if_not_exists(
                        self.model.repo_id(),
                        &self.revision,
                        TOKENIZER_FILE,
                    )
                    .await?
            }
        };

        Ok(BLIPArtifacts {
            model_path,
            tokenizer_path,
        })
    }
}
