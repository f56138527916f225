//! Service start/stop with the session lifecycle and status flags kept in
//! step.

use chrono::Utc;
use metrics::counter;
use tracing::{info, warn};
use tracker_log::SessionStatus;
use tracker_supervisor::{ControlOutcome, ServiceName};

use crate::metrics::IDLE_STOPS_TOTAL;
use crate::server::AppState;

/// Start `name`, exporting the current session directory to it and marking
/// that session as recording.
pub async fn start_service(state: &AppState, name: ServiceName) -> ControlOutcome {
    let session = state.sessions.current().await.ok();
    let outcome = state
        .supervisor
        .start(name, session.as_ref().map(|dir| dir.path.as_path()));
    if !outcome.success {
        return outcome;
    }

    state.status.set(name, true);
    if let Some(dir) = &session {
        let updated = state
            .sessions
            .update_meta(dir, |meta| meta.status = SessionStatus::Recording)
            .await;
        if let Err(e) = updated {
            warn!(session = %dir.id, error = %e, "failed to mark session recording");
        }
    }
    outcome
}

/// Stop `name`. Once nothing is left running the recording session is
/// marked completed.
pub async fn stop_service(state: &AppState, name: ServiceName) -> ControlOutcome {
    let outcome = state.supervisor.stop(name);
    state.status.set(name, false);
    if state.supervisor.running().is_empty() {
        complete_recording(state).await;
    }
    outcome
}

/// Stop everything after the last channel client left.
pub async fn idle_stop(state: &AppState) {
    let flags = state.status.snapshot();
    if state.supervisor.running().is_empty() && !flags.audio && !flags.vision {
        return;
    }
    info!("no channel clients left, stopping services");
    counter!(IDLE_STOPS_TOTAL).increment(1);
    state.supervisor.shutdown().await;
    state.status.clear_services();
    complete_recording(state).await;
}

async fn complete_recording(state: &AppState) {
    let Ok(dir) = state.sessions.current().await else {
        return;
    };
    match state.sessions.meta(&dir).await {
        Ok(meta) if meta.status == SessionStatus::Recording => {
            if let Err(e) = state.sessions.complete(&dir, Utc::now()).await {
                warn!(session = %dir.id, error = %e, "failed to complete session");
            }
        }
        Ok(_) => {}
        Err(e) => warn!(session = %dir.id, error = %e, "failed to read session meta"),
    }
}
