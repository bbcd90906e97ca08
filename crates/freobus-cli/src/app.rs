//! Application root: configuration lookup and service wiring.

use anyhow::{Context, Result};
use freobus_core::{
    Ed25519MessageSigner, Ed25519MessageVerifier, FreobusConfig, Origin, PhysicalClock,
    SystemClock,
};
use freobus_recovery::{ErrorContext, ErrorRecoveryService, OnlineFlag};
use freobus_session::{
    FileSnapshotStore, LocalBroadcastHub, SessionEvent, SessionManager, SessionValidator,
    WalletSessionRegistry,
};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const CONFIG_ENV: &str = "FREOBUS_CONFIG";

/// Configuration together with where it came from
pub struct LoadedConfig {
    pub config: FreobusConfig,
    pub source: Option<PathBuf>,
}

/// `--config`, then `FREOBUS_CONFIG`, then `<config dir>/freobus/config.toml`
/// if it exists.
pub fn resolve_config_path(
    explicit: Option<PathBuf>,
    env_value: Option<OsString>,
    config_dir: Option<PathBuf>,
) -> Option<PathBuf> {
    explicit
        .or_else(|| env_value.filter(|v| !v.is_empty()).map(PathBuf::from))
        .or_else(|| {
            config_dir
                .map(|dir| dir.join("freobus").join("config.toml"))
                .filter(|path| path.exists())
        })
}

pub fn load_config(explicit: Option<PathBuf>) -> Result<LoadedConfig> {
    let source = resolve_config_path(explicit, std::env::var_os(CONFIG_ENV), dirs::config_dir());
    load_from(source)
}

fn load_from(source: Option<PathBuf>) -> Result<LoadedConfig> {
    let config = match &source {
        Some(path) => FreobusConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => FreobusConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    debug!(source = ?source, "configuration loaded");
    Ok(LoadedConfig { config, source })
}

/// One validator, session manager, grant registry and recovery service for
/// the wallet context, plus the hub other simulated contexts join.
pub struct App {
    config: FreobusConfig,
    hub: LocalBroadcastHub,
    clock: Arc<dyn PhysicalClock>,
    pub wallet: Arc<SessionManager>,
    pub grants: WalletSessionRegistry,
    pub recovery: Arc<ErrorRecoveryService>,
    pub online: OnlineFlag,
    forwarders: Vec<JoinHandle<()>>,
}

impl App {
    pub async fn start(config: FreobusConfig, snapshot: Option<&Path>) -> Result<Self> {
        let hub = LocalBroadcastHub::new();
        let clock: Arc<dyn PhysicalClock> = Arc::new(SystemClock);

        let wallet = Arc::new(
            open_context(&config, &hub, &clock, "chrome-extension://freobus-wallet", snapshot)
                .await?,
        );

        let online = OnlineFlag::new(true);
        let recovery = Arc::new(
            ErrorRecoveryService::builder()
                .config(config.recovery.clone())
                .clock(clock.clone())
                .session_revalidator(wallet.clone())
                .connectivity_probe(Arc::new(online.clone()))
                .build(),
        );

        let grants = WalletSessionRegistry::new(clock.clone());
        let mut app = Self {
            config,
            hub,
            clock,
            wallet,
            grants,
            recovery,
            online,
            forwarders: Vec::new(),
        };
        let wallet = app.wallet.clone();
        app.forward_errors(&wallet);
        Ok(app)
    }

    /// Another browser context on the same channel
    pub async fn join(&mut self, origin: &str) -> Result<Arc<SessionManager>> {
        let context =
            Arc::new(open_context(&self.config, &self.hub, &self.clock, origin, None).await?);
        self.forward_errors(&context);
        Ok(context)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn config(&self) -> &FreobusConfig {
        &self.config
    }

    /// Report broadcast failures of `manager` to the recovery service
    fn forward_errors(&mut self, manager: &SessionManager) {
        let mut events = manager.subscribe();
        let recovery = self.recovery.clone();
        let origin = manager.origin().clone();
        self.forwarders.push(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Error { message }) => {
                        let context = ErrorContext::default().with_extra("origin", origin.as_str());
                        let recovered = recovery.handle_error("network", message, context).await;
                        info!(origin = %origin, recovered, "broadcast failure handled");
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(origin = %origin, skipped, "event forwarder lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    pub async fn shutdown(self) {
        for task in &self.forwarders {
            task.abort();
        }
        self.wallet.shutdown().await;
    }
}

async fn open_context(
    config: &FreobusConfig,
    hub: &LocalBroadcastHub,
    clock: &Arc<dyn PhysicalClock>,
    origin: &str,
    snapshot: Option<&Path>,
) -> Result<SessionManager> {
    let signer = Ed25519MessageSigner::generate();
    debug!(origin, signer = %signer.address(), "opening context");
    let validator = Arc::new(SessionValidator::new(
        &config.nonce,
        Arc::new(Ed25519MessageVerifier),
        clock.clone(),
    ));

    let mut builder = SessionManager::authenticated(
        Origin::from(origin),
        Arc::new(hub.open(config.channel.name.clone())),
        Arc::new(signer),
        validator,
    )
    .config(config.session.clone())
    .clock(clock.clone())
    .nonce_sweep_interval(config.nonce.sweep_interval());
    if let Some(path) = snapshot {
        builder = builder.snapshot_store(Arc::new(FileSnapshotStore::new(path)));
    }
    builder
        .build()
        .await
        .with_context(|| format!("starting session manager for {origin}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        let path = resolve_config_path(
            Some(PathBuf::from("/tmp/explicit.toml")),
            Some(OsString::from("/tmp/env.toml")),
            None,
        );
        assert_eq!(path, Some(PathBuf::from("/tmp/explicit.toml")));
    }

    #[test]
    fn env_then_existing_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            resolve_config_path(None, Some(OsString::from("/tmp/env.toml")), None),
            Some(PathBuf::from("/tmp/env.toml"))
        );
        assert_eq!(
            resolve_config_path(None, Some(OsString::new()), Some(dir.path().to_path_buf())),
            None
        );

        let default = dir.path().join("freobus").join("config.toml");
        std::fs::create_dir_all(default.parent().unwrap()).unwrap();
        std::fs::write(&default, "").unwrap();
        assert_eq!(
            resolve_config_path(None, None, Some(dir.path().to_path_buf())),
            Some(default)
        );
    }

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session]\nmax_concurrent_sessions = 2\n").unwrap();

        let loaded = load_from(Some(path.clone())).unwrap();
        assert_eq!(loaded.config.session.max_concurrent_sessions, 2);
        assert_eq!(loaded.source, Some(path));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_from(Some(dir.path().join("absent.toml"))).is_err());
    }
}
