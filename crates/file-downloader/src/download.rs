use std::path::{Path, PathBuf};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::info;

pub struct FileDownloadConfig {
    pub url: String,
    pub resources_dir: PathBuf,
    /// sent as bearer token, needed for gated repos
    pub token: Option<String>,
}

pub struct FileDownload {
    url: String,
    resources_dir: PathBuf,
    token: Option<String>,
    client: reqwest::Client,
}

impl Default for FileDownloadConfig {
    fn default() -> Self {
        Self {
            url: "https://huggingface.co".to_string(),
            resources_dir: PathBuf::from("resources"),
            token: std::env::var("HF_TOKEN").ok().filter(|v| !v.is_empty()),
        }
    }
}

impl FileDownload {
    pub fn new(config: FileDownloadConfig) -> Self {
        Self {
            url: config.url.trim_end_matches('/').to_string(),
            resources_dir: config.resources_dir,
            token: config.token,
            client: reqwest::Client::new(),
        }
    }

    pub fn resources_dir(&self) -> &Path {
        &self.resources_dir
    }

    pub async fn download_to_path_if_not_exists(
        &self,
        uri: &str,
        file_path: impl AsRef<Path>,
    ) -> anyhow::Result<PathBuf> {
        let file_path = file_path.as_ref().to_path_buf();
        info!("check file path: {:?}", file_path);
        if file_path.exists() {
            return Ok(file_path);
        }

        let temp_download_path = file_path.with_extension("temp");
        let download_url = format!("{}/{}", self.url, uri.trim_start_matches('/'));
        info!("downloading {}", download_url);

        let mut request = self.client.get(&download_url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let mut response = request.send().await?.error_for_status()?;

        // create parent folder
        if let Some(parent_dir) = file_path.parent() {
            fs::create_dir_all(parent_dir).await?;
        }

        let written = async {
            let mut file = File::create(&temp_download_path).await?;
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            anyhow::Ok(())
        }
        .await;
        if let Err(e) = written {
            // drop the partial file
            let _ = fs::remove_file(&temp_download_path).await;
            return Err(e.context(format!("failed to download {}", download_url)));
        }
        fs::rename(&temp_download_path, &file_path).await?;

        info!("file {:?} downloaded", file_path);

        Ok(file_path)
    }

    /// Fetch `filename` of a hub repo at `revision`, stored as
    /// `<resources_dir>/<repo>/<revision>/<filename>`.
    pub async fn download_hub_file_if_not_exists(
        &self,
        repo: &str,
        revision: &str,
        filename: &str,
    ) -> anyhow::Result<PathBuf> {
        let file_path = self.hub_file_path(repo, revision, filename);
        let uri = hub_uri(repo, revision, filename);
        self.download_to_path_if_not_exists(&uri, file_path).await
    }

    pub fn hub_file_path(&self, repo: &str, revision: &str, filename: &str) -> PathBuf {
        // revisions like `refs/pr/18` become nested dirs, which is fine
        self.resources_dir.join(repo).join(revision).join(filename)
    }
}

pub fn hub_uri(repo: &str, revision: &str, filename: &str) -> String {
    format!("{}/resolve/{}/{}", repo, revision, filename)
}
