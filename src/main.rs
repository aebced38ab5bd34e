//! letter-tutor-daemon: Background daemon for Arabic letter learning
//!
//! This daemon sequences a lesson and provides:
//! - Explicit state machine walking each letter through Listen, Repeat,
//!   Recognize, Write and Completed
//! - Spoken guidance and speech capture, delegated to the connected front end
//! - Handwriting verification against a remote service
//! - IPC server for the front end (learner actions in, tutor events out)
//!
//! Out of scope:
//! - Rendering, audio playback and microphone access (front end)
//! - Persisting progress across runs

mod config;
mod curriculum;
mod drawing;
mod events;
mod guidance;
mod ipc;
mod lifecycle;
mod state;
mod verify;
mod voice;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::curriculum::Curriculum;
use crate::events::TutorEvent;
use crate::ipc::{Server, ServerLinks, TutorStatus};
use crate::lifecycle::ShutdownSignal;
use crate::state::{Services, StageController};
use crate::verify::HttpVerifier;
use crate::voice::{ClientRelay, SpeechSynthesizer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "letter-tutor-daemon starting"
    );

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        verify_url = %config.verification.endpoint,
        fail_open = config.verification.fail_open,
        "configuration loaded"
    );

    let mut shutdown = ShutdownSignal::new()?;

    // IPC server -> stage controller
    let (action_tx, action_rx) = mpsc::channel(32);
    // Stage controller, relay and cue -> IPC clients
    let (event_tx, _event_rx) = broadcast::channel::<TutorEvent>(256);

    let relay = Arc::new(ClientRelay::new(event_tx.clone(), config.voice.answer_timeout));
    let verifier =
        HttpVerifier::new(&config.verification).context("failed to build verification client")?;

    let curriculum = Curriculum::arabic();
    let status = TutorStatus::new(curriculum.len(), curriculum.letter(0).glyph);

    let mut controller = StageController::new(
        curriculum,
        Services {
            synth: relay.clone(),
            recognizer: relay.clone(),
            verifier: Arc::new(verifier),
        },
        &config,
        event_tx.clone(),
    );

    let server = Server::new(
        &config.socket_path,
        ServerLinks {
            actions: action_tx,
            relay: Arc::clone(&relay),
            events: event_tx.clone(),
        },
        status,
    )?;

    // Keeps the server's status snapshot in step with the controller
    let mut status_rx = event_tx.subscribe();
    let server_for_events = &server;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        _ = controller.run(action_rx) => {
            info!("stage controller exited");
        }

        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        _ = async {
            loop {
                match status_rx.recv().await {
                    Ok(event) => server_for_events.apply_event(&event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "status event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("status event handler exited");
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!("shutting down...");

    relay.stop();
    server.shutdown().await;

    info!("letter-tutor-daemon stopped");

    Ok(())
}
