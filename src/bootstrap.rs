use std::path::Path;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use tracing::{info, warn};

use crate::{
    config::{Artifact, Config},
    error::StartupError,
};

async fn download_file(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
    token: Option<&str>,
) -> Result<(), StartupError> {
    info!(path = %path.display(), url, "Downloading artifact");

    let mut header_map = HeaderMap::new();
    if let Some(token) = token {
        match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(value) => {
                header_map.insert(AUTHORIZATION, value);
            }
            Err(_) => warn!("GITHUB_TOKEN is not a valid header value, downloading without it"),
        }
    }
    header_map.insert(ACCEPT, HeaderValue::from_static("application/octet-stream"));

    let download_error = |source| StartupError::Download {
        url: url.to_string(),
        source,
    };
    let response = client
        .get(url)
        .headers(header_map)
        .send()
        .await
        .map_err(download_error)?;

    if !response.status().is_success() {
        return Err(StartupError::DownloadStatus {
            url: url.to_string(),
            status: response.status(),
        });
    }

    let bytes = response.bytes().await.map_err(download_error)?;
    let write_error = |source| StartupError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
    }
    tokio::fs::write(path, &bytes).await.map_err(write_error)?;

    info!(path = %path.display(), size = bytes.len(), "Artifact downloaded");
    Ok(())
}

/// Makes sure the model and both tables exist on disk, downloading any that
/// are missing from their configured URL.
pub async fn ensure_artifacts(config: &Config) -> Result<(), StartupError> {
    info!("Checking model artifacts");
    let client = reqwest::Client::new();

    for artifact in [&config.model, &config.class_names, &config.disease_info] {
        ensure_artifact(&client, artifact, config.download_token.as_deref()).await?;
    }
    Ok(())
}

async fn ensure_artifact(
    client: &reqwest::Client,
    artifact: &Artifact,
    token: Option<&str>,
) -> Result<(), StartupError> {
    if artifact.path.exists() {
        return Ok(());
    }
    match &artifact.url {
        Some(url) => download_file(client, url, &artifact.path, token).await,
        None => Err(StartupError::MissingArtifact(artifact.path.clone())),
    }
}
