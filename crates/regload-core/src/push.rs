//! Image push: health check, pull, optional inspect, tag, push.
//!
//! Each push gets its own `DOCKER_CONFIG` directory holding a `config.json`
//! with an `auths` entry for the registry host. The directory is a
//! [`tempfile::TempDir`], so it is removed when the guard drops on every
//! exit path.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::config::ImageConfig;
use crate::container::{CommandOutput, ContainerCommand, ContainerTool};
use crate::error::ContainerError;

/// Scoped credential directory for one push.
pub struct CredentialGuard {
    dir: TempDir,
}

impl CredentialGuard {
    /// Write `config.json` authenticating `username`/`password` against `host`.
    pub fn create(host: &str, username: &str, password: &str) -> Result<Self, ContainerError> {
        let dir = tempfile::Builder::new()
            .prefix("regload-docker-")
            .tempdir()
            .map_err(|e| ContainerError::Credentials(e.to_string()))?;

        let auth = STANDARD.encode(format!("{username}:{password}"));
        let mut auths = serde_json::Map::new();
        auths.insert(host.to_string(), json!({ "auth": auth }));
        let config = json!({ "auths": auths });
        let raw = serde_json::to_vec_pretty(&config)
            .map_err(|e| ContainerError::Credentials(e.to_string()))?;
        std::fs::write(dir.path().join("config.json"), raw)
            .map_err(|e| ContainerError::Credentials(e.to_string()))?;

        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Target of one push.
#[derive(Debug, Clone, PartialEq)]
pub struct PushPlan {
    pub source_image: String,
    pub target_image: String,
    pub registry_host: String,
    pub inspect_size: bool,
}

impl PushPlan {
    pub fn new(image: &ImageConfig, registry_host: &str, repo: &str) -> Self {
        Self {
            source_image: image.reference.clone(),
            target_image: format!(
                "{registry_host}/{repo}/{}:{}",
                image.target_name, image.target_tag
            ),
            registry_host: registry_host.to_string(),
            inspect_size: image.inspect_size,
        }
    }
}

/// What a successful push reports.
#[derive(Debug, Clone, PartialEq)]
pub struct PushReport {
    pub target_image: String,
    /// Local image size in bytes, when inspect ran and parsed.
    pub image_size: Option<u64>,
}

/// Run the push sequence. The first non-zero exit stops the sequence.
pub async fn push_image(
    tool: &dyn ContainerTool,
    plan: &PushPlan,
    username: &str,
    password: &str,
) -> Result<PushReport, ContainerError> {
    let guard = CredentialGuard::create(&plan.registry_host, username, password)?;
    let config_dir = guard.path().to_path_buf();
    let run = |args: Vec<String>| {
        let command = ContainerCommand::new(args).with_config_dir(config_dir.clone());
        async move { checked(tool, &command).await }
    };

    run(vec!["info".to_string()]).await?;
    run(vec!["pull".to_string(), plan.source_image.clone()]).await?;

    let image_size = if plan.inspect_size {
        let output = run(vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.Size}}".to_string(),
            plan.source_image.clone(),
        ])
        .await?;
        output.stdout.trim().parse::<u64>().ok()
    } else {
        None
    };

    run(vec![
        "tag".to_string(),
        plan.source_image.clone(),
        plan.target_image.clone(),
    ])
    .await?;
    run(vec!["push".to_string(), plan.target_image.clone()]).await?;

    info!(image = %plan.target_image, size = ?image_size, "Image pushed");
    drop(guard);

    Ok(PushReport {
        target_image: plan.target_image.clone(),
        image_size,
    })
}

async fn checked(
    tool: &dyn ContainerTool,
    command: &ContainerCommand,
) -> Result<CommandOutput, ContainerError> {
    let output = tool.run(command).await?;
    if !output.success() {
        return Err(ContainerError::NonZeroExit {
            subcommand: command.subcommand().to_string(),
            code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    debug!(subcommand = command.subcommand(), "ok");
    Ok(output)
}
