use ai::{
    blip::{self, BLIPModel, BLIPOptions, WeightFormat},
    DevicePreference, ImageCaptionModel,
};
use clap::{Args, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "api-server", version, about = "AI-powered image captioning using BLIP model")]
pub struct ServerArgs {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// comma separated list of origins allowed to call the api
    #[arg(
        long,
        env = "CORS_ALLOWED_ORIGINS",
        value_delimiter = ',',
        default_values = ["http://localhost:4200", "http://localhost:3000"]
    )]
    pub cors_origins: Vec<String>,

    /// write logs to `<dir>/api-server.log` instead of stdout
    #[arg(long, env = "LOCAL_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(flatten)]
    pub model: ModelArgs,
}

/// Model flags, shared with the demo.
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// base or large
    #[arg(long = "model", env = "CAPTION_MODEL", default_value = "base")]
    pub model: BLIPModel,

    /// safetensors or gguf (large only)
    #[arg(long, env = "CAPTION_WEIGHTS", default_value = "safetensors")]
    pub weights: WeightFormat,

    #[arg(long, env = "CAPTION_MODEL_REVISION", default_value = "main")]
    pub revision: String,

    #[arg(long, env = "CAPTION_MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    #[arg(long, env = "CAPTION_TOKENIZER_PATH")]
    pub tokenizer_path: Option<PathBuf>,

    #[arg(long, env = "LOCAL_RESOURCES_DIR", default_value = "resources")]
    pub resources_dir: PathBuf,

    /// auto, cpu, cuda or metal
    #[arg(long, env = "CAPTION_DEVICE", default_value = "auto")]
    pub device: DevicePreference,

    /// requests waiting for the model before callers are held back
    #[arg(long, env = "CAPTION_QUEUE_CAPACITY", default_value_t = 32)]
    pub queue_capacity: usize,
}

impl ModelArgs {
    pub fn to_options(&self) -> BLIPOptions {
        BLIPOptions {
            model: self.model,
            weights: self.weights,
            revision: self.revision.clone(),
            model_path: self.model_path.clone(),
            tokenizer_path: self.tokenizer_path.clone(),
            resources_dir: self.resources_dir.clone(),
            device: self.device,
        }
    }
}

/// Loads the captioning model and waits until it is ready.
pub async fn load_caption_model(args: &ModelArgs) -> anyhow::Result<ImageCaptionModel> {
    tracing::info!(
        "loading caption model {} ({}, device {})",
        args.model,
        args.weights,
        args.device
    );
    blip::image_caption_model(args.to_options(), args.queue_capacity).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = ServerArgs::try_parse_from(["api-server"]).unwrap();
        assert_eq!(args.port, 8000);
        assert_eq!(args.host, "0.0.0.0");
        assert_eq!(
            args.cors_origins,
            vec!["http://localhost:4200", "http://localhost:3000"]
        );
        assert_eq!(args.model.model, BLIPModel::Base);
        assert_eq!(args.model.weights, WeightFormat::Safetensors);
        assert_eq!(args.model.device, DevicePreference::Auto);
        assert_eq!(args.model.queue_capacity, 32);
        assert_eq!(args.model.resources_dir, PathBuf::from("resources"));
    }

    #[test]
    fn test_flags() {
        let args = ServerArgs::try_parse_from([
            "api-server",
            "--port",
            "9000",
            "--model",
            "large",
            "--weights",
            "gguf",
            "--device",
            "cpu",
            "--cors-origins",
            "http://a.test,http://b.test",
            "--model-path",
            "/models/blip.gguf",
        ])
        .unwrap();
        assert_eq!(args.port, 9000);
        assert_eq!(args.cors_origins, vec!["http://a.test", "http://b.test"]);

        let options = args.model.to_options();
        assert_eq!(options.model, BLIPModel::Large);
        assert_eq!(options.weights, WeightFormat::Gguf);
        assert_eq!(options.device, DevicePreference::Cpu);
        assert_eq!(options.model_path, Some(PathBuf::from("/models/blip.gguf")));
        assert_eq!(options.tokenizer_path, None);
    }

    #[test]
    fn test_rejects_unknown_model() {
        assert!(ServerArgs::try_parse_from(["api-server", "--model", "huge"]).is_err());
    }
}
