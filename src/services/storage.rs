// Subtitle file storage
//
// Converted WebVTT files are kept either under the upload directory or as raw
// resources on Cloudinary. The database stores the relative path or public id.

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::config::{AppConfig, StorageBackend};

const CLOUDINARY_API_BASE: &str = "https://api.cloudinary.com/v1_1";
const CLOUDINARY_DELIVERY_BASE: &str = "https://res.cloudinary.com";

#[derive(Clone)]
pub enum Storage {
    Local { root: PathBuf },
    Cloudinary(CloudinaryClient),
}

impl Storage {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        match config.storage.backend {
            StorageBackend::Local => Ok(Self::local(config.paths.upload_dir.clone())),
            StorageBackend::Cloudinary => {
                let storage = &config.storage;
                let (Some(cloud_name), Some(api_key), Some(api_secret)) = (
                    storage.cloudinary_cloud_name.clone(),
                    storage.cloudinary_api_key.clone(),
                    storage.cloudinary_api_secret.clone(),
                ) else {
                    bail!("Cloudinary storage selected but CLOUDINARY_CLOUD_NAME, CLOUDINARY_API_KEY or CLOUDINARY_API_SECRET is missing");
                };
                Ok(Self::Cloudinary(CloudinaryClient::new(
                    cloud_name,
                    api_key,
                    api_secret,
                    storage.subtitles_folder.clone(),
                )))
            }
        }
    }

    pub fn local(root: PathBuf) -> Self {
        Self::Local { root }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::Cloudinary(_) => "cloudinary",
        }
    }

    /// Store a converted subtitle, returning the path to record in the database
    pub async fn save(&self, content_id: &str, vtt: &str) -> Result<String> {
        let file_name = format!("{}.vtt", Uuid::new_v4());
        let folder = safe_content_id(content_id);

        match self {
            Self::Local { root } => {
                let relative = format!("{}/{}", folder, file_name);
                let full = resolve_local(root, &relative)?;
                if let Some(dir) = full.parent() {
                    tokio::fs::create_dir_all(dir)
                        .await
                        .with_context(|| format!("Failed to create {}", dir.display()))?;
                }
                tokio::fs::write(&full, vtt)
                    .await
                    .context("Failed to write subtitle file")?;
                tracing::info!("Saved subtitle to local storage: {}", relative);
                Ok(relative)
            }
            Self::Cloudinary(client) => {
                let public_id = format!("{}/{}/{}", client.folder, folder, file_name);
                client.upload(&public_id, vtt).await?;
                tracing::info!("Uploaded subtitle to Cloudinary: {}", public_id);
                Ok(public_id)
            }
        }
    }

    pub async fn read(&self, path: &str) -> Result<String> {
        match self {
            Self::Local { root } => {
                let full = resolve_local(root, path)?;
                tokio::fs::read_to_string(&full)
                    .await
                    .with_context(|| format!("Local subtitle file not found: {}", path))
            }
            Self::Cloudinary(client) => client.fetch(path).await,
        }
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        match self {
            Self::Local { root } => {
                let full = resolve_local(root, path)?;
                match tokio::fs::remove_file(&full).await {
                    Ok(()) => {
                        tracing::info!("Deleted local file: {}", full.display());
                        Ok(())
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e).with_context(|| format!("Failed to delete {}", full.display())),
                }
            }
            Self::Cloudinary(client) => client.destroy(path).await,
        }
    }
}

/// Content ids become a single directory name: `tt1:2:3` -> `tt1_2_3`.
/// Anything other than ASCII letters, digits, `-` and `_` is replaced.
pub fn safe_content_id(content_id: &str) -> String {
    let folder: String = content_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if folder.is_empty() {
        "unknown".to_string()
    } else {
        folder
    }
}

/// Stored paths are relative and must stay inside the upload directory
fn resolve_local(root: &Path, relative: &str) -> Result<PathBuf> {
    let path = Path::new(relative);
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        bail!("Invalid subtitle path: {}", relative);
    }
    Ok(root.join(path))
}

#[derive(Clone)]
pub struct CloudinaryClient {
    client: Client,
    cloud_name: String,
    api_key: String,
    api_secret: String,
    folder: String,
}

#[derive(Debug, Deserialize)]
struct CloudinaryResponse {
    public_id: Option<String>,
    result: Option<String>,
    error: Option<CloudinaryError>,
}

#[derive(Debug, Deserialize)]
struct CloudinaryError {
    message: String,
}

impl CloudinaryClient {
    pub fn new(cloud_name: String, api_key: String, api_secret: String, folder: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            cloud_name,
            api_key,
            api_secret,
            folder,
        }
    }

    /// Sign request parameters: sorted `k=v` pairs joined by `&`, then the secret
    fn sign(&self, params: &[(&str, String)]) -> String {
        let mut sorted: Vec<&(&str, String)> = params.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        let joined = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let mut hasher = Sha1::new();
        hasher.update(joined.as_bytes());
        hasher.update(self.api_secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    async fn signed_post(
        &self,
        action: &str,
        mut params: Vec<(&'static str, String)>,
        extra: Vec<(&'static str, String)>,
    ) -> Result<CloudinaryResponse> {
        params.push(("timestamp", chrono::Utc::now().timestamp().to_string()));
        let signature = self.sign(&params);

        let mut form = params;
        form.extend(extra);
        form.push(("api_key", self.api_key.clone()));
        form.push(("signature", signature));

        let url = format!("{}/{}/raw/{}", CLOUDINARY_API_BASE, self.cloud_name, action);
        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .with_context(|| format!("Cloudinary {} request failed", action))?;

        let status = response.status();
        let body: CloudinaryResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse Cloudinary {} response", action))?;

        if let Some(err) = body.error.as_ref() {
            bail!("Cloudinary {} failed ({}): {}", action, status, err.message);
        }
        if !status.is_success() {
            bail!("Cloudinary {} failed with status {}", action, status);
        }
        Ok(body)
    }

    async fn upload(&self, public_id: &str, vtt: &str) -> Result<()> {
        let data_uri = format!("data:text/vtt;base64,{}", STANDARD.encode(vtt.as_bytes()));
        let response = self
            .signed_post(
                "upload",
                vec![("public_id", public_id.to_string())],
                vec![("file", data_uri)],
            )
            .await?;
        if response.public_id.is_none() {
            return Err(anyhow!("Cloudinary upload returned no public_id"));
        }
        Ok(())
    }

    fn delivery_url(&self, public_id: &str) -> String {
        format!(
            "{}/{}/raw/upload/{}",
            CLOUDINARY_DELIVERY_BASE, self.cloud_name, public_id
        )
    }

    async fn fetch(&self, public_id: &str) -> Result<String> {
        let response = self
            .client
            .get(self.delivery_url(public_id))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("Failed to fetch subtitle from Cloudinary")?
            .error_for_status()
            .context("Cloudinary returned an error for subtitle fetch")?;
        response.text().await.context("Failed to read Cloudinary response")
    }

    async fn destroy(&self, public_id: &str) -> Result<()> {
        let response = self
            .signed_post("destroy", vec![("public_id", public_id.to_string())], Vec::new())
            .await?;
        tracing::info!(
            "Deleted Cloudinary resource {}: {}",
            public_id,
            response.result.as_deref().unwrap_or("unknown")
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_save_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::local(dir.path().to_path_buf());

        let path = storage.save("tt1234:1:2", "WEBVTT\n\n").await.unwrap();
        assert!(path.starts_with("tt1234_1_2/"));
        assert!(path.ends_with(".vtt"));
        assert!(dir.path().join(&path).exists());

        assert_eq!(storage.read(&path).await.unwrap(), "WEBVTT\n\n");

        storage.delete(&path).await.unwrap();
        assert!(!dir.path().join(&path).exists());
        // Already gone
        storage.delete(&path).await.unwrap();
        assert!(storage.read(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_save_keeps_hostile_ids_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("uploads");
        let storage = Storage::local(root.clone());

        for content_id in ["../../escaped", "..\\x", "/etc/passwd", "..", ""] {
            let path = storage.save(content_id, "WEBVTT\n\n").await.unwrap();
            assert_eq!(Path::new(&path).components().count(), 2, "{}", path);
            assert!(root.join(&path).exists());
            assert_eq!(storage.read(&path).await.unwrap(), "WEBVTT\n\n");
        }
        assert!(!dir.path().join("escaped").exists());
        assert_eq!(safe_content_id("../../escaped"), "______escaped");
        assert_eq!(safe_content_id("kitsu:1:2"), "kitsu_1_2");
    }

    #[tokio::test]
    async fn test_local_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::local(dir.path().to_path_buf());
        assert!(storage.read("../etc/passwd").await.is_err());
        assert!(storage.read("/etc/passwd").await.is_err());
    }

    #[test]
    fn test_cloudinary_signature() {
        let client = CloudinaryClient::new(
            "demo".into(),
            "key".into(),
            "abcd".into(),
            "community_subtitles".into(),
        );
        // sha1("public_id=sample&timestamp=1315060510abcd")
        let signature = client.sign(&[
            ("timestamp", "1315060510".to_string()),
            ("public_id", "sample".to_string()),
        ]);
        let mut hasher = Sha1::new();
        hasher.update(b"public_id=sample&timestamp=1315060510abcd");
        assert_eq!(signature, hex::encode(hasher.finalize()));
        assert_eq!(
            client.delivery_url("community_subtitles/tt1/x.vtt"),
            "https://res.cloudinary.com/demo/raw/upload/community_subtitles/tt1/x.vtt"
        );
    }

    #[test]
    fn test_from_config_requires_cloudinary_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::for_tests(dir.path());
        assert_eq!(Storage::from_config(&config).unwrap().backend_name(), "local");

        config.storage.backend = StorageBackend::Cloudinary;
        assert!(Storage::from_config(&config).is_err());

        config.storage.cloudinary_cloud_name = Some("demo".into());
        config.storage.cloudinary_api_key = Some("key".into());
        config.storage.cloudinary_api_secret = Some("secret".into());
        assert_eq!(Storage::from_config(&config).unwrap().backend_name(), "cloudinary");
    }
}
