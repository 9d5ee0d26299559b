use std::{env, path::PathBuf, str::FromStr};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} must be a valid {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Where a startup artifact lives and, optionally, where to fetch it from.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub body_limit_bytes: usize,
    pub model: Artifact,
    pub class_names: Artifact,
    pub disease_info: Artifact,
    pub input_op: String,
    pub output_op: String,
    pub upload_dir: PathBuf,
    pub inference_workers: usize,
    pub cors_permissive: bool,
    pub download_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());
        let artifact = |path_var: &str, default: &str, url_var: &str| Artifact {
            path: PathBuf::from(var(path_var, default)),
            url: lookup(url_var).filter(|url| !url.is_empty()),
        };

        let body_limit_mb: usize = parse(&lookup, "BODY_LIMIT_MB", "integer", 20)?;
        let default_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let inference_workers: usize =
            parse(&lookup, "INFERENCE_WORKERS", "integer", default_workers)?;
        if inference_workers == 0 {
            return Err(ConfigError::Invalid {
                name: "INFERENCE_WORKERS",
                expected: "integer greater than zero",
                value: "0".into(),
            });
        }

        Ok(Config {
            port: parse(&lookup, "PORT", "port number between 0 and 65535", 8000)?,
            body_limit_bytes: body_limit_mb * 1024 * 1024,
            model: artifact("MODEL_PATH", "./model/frozen_graph.pb", "MODEL_URL"),
            class_names: artifact(
                "CLASS_NAMES_PATH",
                "./model/class_names.json",
                "CLASS_NAMES_URL",
            ),
            disease_info: artifact(
                "DISEASE_INFO_PATH",
                "./model/disease_info.json",
                "DISEASE_INFO_URL",
            ),
            input_op: var("MODEL_INPUT_OP", "x"),
            output_op: var("MODEL_OUTPUT_OP", "Identity"),
            upload_dir: PathBuf::from(var("UPLOAD_DIR", "uploads")),
            inference_workers,
            cors_permissive: parse(&lookup, "CORS_PERMISSIVE", "boolean", true)?,
            download_token: lookup("GITHUB_TOKEN").filter(|token| !token.is_empty()),
        })
    }
}

fn parse<F, T>(
    lookup: &F,
    name: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            expected,
            value,
        }),
    }
}
