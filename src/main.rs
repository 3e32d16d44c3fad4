//! smtpd-tls binary entry point.
//!
//! Loads configuration and credentials, builds the TLS contexts, links to
//! the trust authority and runs the session gate until interrupted.
//!
//! Accepting SMTP connections belongs to the protocol engine embedding this
//! library. It opens sessions with `TlsBootstrap::start_handshake`, which
//! feeds `GateEvent::HandshakeFinished` into the gate's event channel, and
//! reports disconnects as `GateEvent::Closed`. Standalone, this binary only
//! serves verdicts and timeouts for that channel.

use std::process::ExitCode;
use std::time::Instant;

use smtpd_tls::config::{ConfigLoader, CredentialFileValidator};
use smtpd_tls::ipc::AuthorityLink;
use smtpd_tls::session::GateEvent;
use smtpd_tls::TlsBootstrap;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "/etc/mail/smtpd-tls.toml";

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting smtpd-tls");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let settings = match ConfigLoader::with_defaults()
        .with_validator(CredentialFileValidator::new())
        .load(&config_path)
    {
        Ok(settings) => settings,
        Err(e) => {
            error!(path = %config_path, error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        },
    };

    let bootstrap = match TlsBootstrap::from_settings(settings) {
        Ok(bootstrap) => bootstrap,
        Err(e) => {
            error!(error = %e, "Failed to initialize TLS");
            return ExitCode::FAILURE;
        },
    };

    let (mut gate, requests) = bootstrap.gate();
    let (events_tx, mut events) = mpsc::unbounded_channel::<GateEvent>();

    let link = AuthorityLink::new(&bootstrap.settings().authority.socket_path);
    let verdicts = events_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = link.run(requests, verdicts).await {
            warn!(error = %e, "Trust authority link down");
        }
    });

    info!(
        inbound = bootstrap.server_context().is_some(),
        inbound_verification = bootstrap.settings().verification.inbound_required,
        outbound_verification = bootstrap.settings().verification.outbound_required,
        "Ready"
    );

    loop {
        let deadline = gate.next_deadline();
        let wait_for_deadline = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    gate.handle(event);
                },
                None => {
                    warn!("Event channel closed");
                    break;
                },
            },
            () = wait_for_deadline => {
                for session in gate.expire_stale(Instant::now()) {
                    info!(session = %session, "Verification timed out");
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            },
        }
    }

    drop(events_tx);
    let stats = bootstrap.stats().snapshot();
    info!(
        handshakes_succeeded = stats.handshakes_succeeded,
        handshakes_failed = stats.handshakes_failed,
        sessions_trusted = stats.sessions_trusted,
        sessions_rejected = stats.sessions_rejected,
        "Stopped"
    );

    ExitCode::SUCCESS
}
