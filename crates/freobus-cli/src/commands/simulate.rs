//! `freobus simulate`

use crate::app::App;
use anyhow::Result;
use clap::Args;
use freobus_core::{FreobusConfig, UnifiedSession};
use freobus_recovery::RecoveryEvent;
use freobus_session::{Account, DAppPermissions, PermissionsUpdate, ShareRequest};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

const TAB_ORIGIN: &str = "https://dapp.example";
const DEMO_WALLET: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of dApp origins the wallet context attaches
    #[arg(long, default_value_t = 2)]
    pub dapps: usize,

    /// Persist the wallet context's session to this file
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// Close the tab's channel before it registers, exercising recovery
    #[arg(long)]
    pub fail_broadcast: bool,

    /// Report the network as unreachable to the recovery service
    #[arg(long)]
    pub offline: bool,
}

pub async fn run(args: SimulateArgs, config: FreobusConfig) -> Result<()> {
    let mut app = App::start(config, args.snapshot.as_deref()).await?;
    let mut recovery_events = app.recovery.subscribe();
    app.online.set(!args.offline);
    let tab = app.join(TAB_ORIGIN).await?;

    let session = match app.wallet.get_active_session().await {
        Some(restored) => {
            info!(session_id = %restored.id, "continuing restored session");
            restored
        }
        None => {
            let grant = app.grants.create_session(
                TAB_ORIGIN,
                vec![Account {
                    address: DEMO_WALLET.to_string(),
                    name: "Account 1".to_string(),
                    index: 0,
                    balances: Default::default(),
                    balance: None,
                }],
                "0x1",
                DAppPermissions {
                    can_read_accounts: true,
                    allowed_methods: vec!["eth_accounts".to_string(), "eth_chainId".to_string()],
                    allowed_networks: vec!["0x1".to_string()],
                    ..DAppPermissions::default()
                },
            );
            UnifiedSession::new(
                "user-1",
                DEMO_WALLET,
                grant.id,
                app.now_ms(),
                app.config().session.max_session_duration_ms,
            )?
            .with_chain_id("0x1")
        }
    };

    for n in 0..args.dapps {
        let origin = format!("https://dapp{n}.example");
        share_grant(&app, &session.wallet_session_id, &origin);
        app.wallet.register_dapp(origin, session.clone()).await?;
    }

    if args.fail_broadcast {
        tab.shutdown().await;
    }
    tab.register_dapp(TAB_ORIGIN, session.clone()).await?;
    let validated = tab.validate_session(&session.id, TAB_ORIGIN).await;

    // Let the contexts' listeners drain the channel.
    tokio::time::sleep(Duration::from_millis(50)).await;

    if args.fail_broadcast {
        let outcome = tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                match recovery_events.recv().await {
                    Ok(RecoveryEvent::RecoverySucceeded(record)) => break Some((true, record.id)),
                    Ok(RecoveryEvent::RecoveryFailed { error, .. }) => break Some((false, error.id)),
                    Ok(_) => continue,
                    Err(_) => break None,
                }
            }
        })
        .await;
        match outcome {
            Ok(Some((recovered, id))) => info!(error_id = %id, recovered, "recovery finished"),
            Ok(None) | Err(_) => warn!("no recovery outcome observed"),
        }
    }

    let report = json!({
        "wallet": app.wallet.get_state(),
        "tab": tab.get_state(),
        "validated": validated,
        "walletSession": app.grants.get_session(&session.wallet_session_id),
        "activeErrors": app.recovery.get_active_errors(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    tab.unregister_dapp(TAB_ORIGIN).await;
    tab.shutdown().await;
    app.shutdown().await;
    Ok(())
}

/// Extend the tab's grant to `origin`, read-only
fn share_grant(app: &App, grant_id: &str, origin: &str) {
    let request = ShareRequest {
        target_origin: origin.into(),
        session_id: grant_id.to_string(),
        permissions: PermissionsUpdate {
            can_sign_transactions: Some(false),
            ..PermissionsUpdate::default()
        },
    };
    match app.grants.share_session(&request) {
        Ok(grant) => info!(origin, grant_id = %grant.id, "wallet grant shared"),
        Err(err) => warn!(origin, grant_id, error = %err, "wallet grant not shared"),
    }
}
