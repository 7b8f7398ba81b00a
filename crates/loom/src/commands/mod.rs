//! CLI command handlers.

pub mod compute;
pub mod config;
pub mod serve;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use loom_config::{ComputeConfig, ConfigSource, LoadedConfig};
use loom_session::{KubeComputeApi, ManifestTemplate, Provisioner};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Explicit config file, bypassing discovery.
    pub config_path: Option<PathBuf>,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Load configuration, printing any warnings to stderr.
    pub fn load_config(&self) -> Result<LoadedConfig> {
        let loaded = match &self.config_path {
            Some(path) => {
                let config = loom_config::load_config_file(path)?;
                LoadedConfig {
                    config,
                    sources: vec![ConfigSource {
                        path: path.clone(),
                        loaded: true,
                    }],
                    warnings: Vec::new(),
                }
            }
            None => loom_config::load_config(None)?,
        };

        for warning in &loaded.warnings {
            eprintln!("warning: {}", warning);
        }

        if self.verbose {
            let sources = loaded.loaded_from();
            if sources.is_empty() {
                println!("No config files found, using defaults + CLI args");
            } else {
                for source in sources {
                    println!("Loaded config: {}", source.display());
                }
            }
        }

        Ok(loaded)
    }
}

/// Build a provisioner talking to the configured orchestration API.
pub fn build_provisioner(compute: &ComputeConfig) -> Result<Provisioner> {
    let Some(api_url) = compute.api_url.as_deref() else {
        bail!("compute.api_url is not configured");
    };

    let mut builder = KubeComputeApi::builder()
        .base_url(api_url)
        .namespace(&compute.namespace);
    if let Some(token) = compute.resolve_token() {
        builder = builder.token(token);
    }
    let api = builder
        .build()
        .context("failed to build compute API client")?;

    let template = ManifestTemplate::new(&compute.image, &compute.namespace, &compute.domain)
        .with_container_port(compute.container_port);
    Ok(Provisioner::new(Arc::new(api), template))
}
