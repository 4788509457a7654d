//! Sandbox configuration loader and backend factory.
//!
//! Reads `exprbox.toml` and deserializes it into [`SandboxConfig`]. Falls
//! back to defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use exprbox_core::bridge::{BoxBridge, BridgeFactory};
use exprbox_core::store::DataStore;
use exprbox_types::bridge::BridgeKind;
use exprbox_types::config::SandboxConfig;

use crate::bridge::{InProcessBridge, IsolateBridge, WorkerBridge};
use crate::process::ProcessBridge;

pub const CONFIG_FILE_NAME: &str = "exprbox.toml";

/// `{config_dir}/exprbox/exprbox.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("exprbox").join(CONFIG_FILE_NAME))
}

/// Load the sandbox configuration from `path`.
///
/// - If the file does not exist, returns [`SandboxConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_sandbox_config(path: &Path) -> SandboxConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {} found, using defaults", path.display());
            return SandboxConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return SandboxConfig::default();
        }
    };

    match toml::from_str::<SandboxConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            SandboxConfig::default()
        }
    }
}

/// Build an uninitialized bridge of `kind` over `store`.
///
/// # Errors
///
/// Refuses the unconfined backends (`isolate`, `worker`, `in_process`)
/// unless `config.allow_unconfined` is set: they cannot cap memory or stop
/// a runaway execution, so they are only fit for trusted input and tests.
pub fn build_bridge(
    kind: BridgeKind,
    config: &SandboxConfig,
    store: Arc<DataStore>,
) -> anyhow::Result<BoxBridge> {
    ensure_permitted(kind, config)?;
    Ok(construct(kind, config, store))
}

/// Factory producing fresh bridges of the configured backend, all sharing `store`.
///
/// # Errors
///
/// Same policy as [`build_bridge`], checked once up front.
pub fn bridge_factory(config: SandboxConfig, store: Arc<DataStore>) -> anyhow::Result<BridgeFactory> {
    ensure_permitted(config.backend, &config)?;
    Ok(Arc::new(move || {
        construct(config.backend, &config, Arc::clone(&store))
    }))
}

fn ensure_permitted(kind: BridgeKind, config: &SandboxConfig) -> anyhow::Result<()> {
    if kind.is_confined() || config.allow_unconfined {
        return Ok(());
    }
    anyhow::bail!(
        "backend '{kind}' enforces neither the memory limit nor forced cancellation; \
         use the 'process' backend or set allow_unconfined = true for trusted input"
    )
}

fn construct(kind: BridgeKind, config: &SandboxConfig, store: Arc<DataStore>) -> BoxBridge {
    let bridge = config.bridge.clone();
    match kind {
        BridgeKind::InProcess => BoxBridge::new(InProcessBridge::new(bridge, store)),
        BridgeKind::Isolate => BoxBridge::new(IsolateBridge::new(bridge, store)),
        BridgeKind::Worker => BoxBridge::new(WorkerBridge::new(bridge, store)),
        BridgeKind::Process => {
            BoxBridge::new(ProcessBridge::new(bridge, config.runner.clone(), store))
        }
    }
}
