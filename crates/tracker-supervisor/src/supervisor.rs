//! Process-group supervisor for the external services.
//!
//! Each service runs as the leader of a fresh process group (pgid == pid), so
//! a stop signal reaches everything the service forked. A service stays
//! recorded as running until its whole group is gone, not just the leader.
//! Bookkeeping records intent: a stop clears the entry before signalling, and
//! a failed signal is never allowed to leave a stale "running" entry behind.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::Pid;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tracker_settings::{ServiceCommand, ServiceSettings};

use crate::errors::SupervisorError;

/// Environment variable carrying the active session directory.
pub const SESSION_DIR_ENV: &str = "SESSION_DIR";

/// How often a group whose leader exited is checked for survivors.
const GROUP_POLL: Duration = Duration::from_millis(250);

/// A supervised service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceName {
    /// Speech recognition.
    Audio,
    /// Screen capture agent.
    Vision,
}

impl ServiceName {
    /// Both services.
    pub const ALL: [ServiceName; 2] = [ServiceName::Vision, ServiceName::Audio];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Vision => "vision",
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceName {
    type Err = SupervisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(Self::Audio),
            "vision" => Ok(Self::Vision),
            other => Err(SupervisorError::UnknownService(other.to_owned())),
        }
    }
}

/// Result of a start or stop request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ControlOutcome {
    /// Whether the request took effect.
    pub success: bool,
    /// Human-readable detail.
    pub message: String,
}

impl ControlOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Default)]
struct Table {
    running: HashMap<ServiceName, i32>,
    /// Groups sent SIGTERM whose exit has not been forced yet.
    draining: Vec<i32>,
}

/// Starts and stops the audio and vision services.
pub struct Supervisor {
    commands: HashMap<ServiceName, ServiceCommand>,
    grace: Duration,
    table: Arc<Mutex<Table>>,
}

impl Supervisor {
    /// Build from the configured service commands.
    pub fn new(settings: &ServiceSettings) -> Self {
        let mut commands = HashMap::new();
        let _ = commands.insert(ServiceName::Audio, settings.audio.clone());
        let _ = commands.insert(ServiceName::Vision, settings.vision.clone());
        Self {
            commands,
            grace: settings.stop_grace(),
            table: Arc::new(Mutex::new(Table::default())),
        }
    }

    /// Start `name` in its own process group. Fails without spawning when
    /// the service is already recorded as running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, name: ServiceName, session_dir: Option<&Path>) -> ControlOutcome {
        let mut table = self.table.lock();
        if let Some(pgid) = table.running.get(&name) {
            return ControlOutcome::failed(format!("{name} already running (pgid {pgid})"));
        }

        match self.spawn_group(name, session_dir) {
            Ok(pgid) => {
                let _ = table.running.insert(name, pgid);
                info!(service = %name, pgid, "service started");
                ControlOutcome::ok(format!("{name} started"))
            }
            Err(e) => {
                warn!(service = %name, error = %e, "service failed to start");
                ControlOutcome::failed(e.to_string())
            }
        }
    }

    fn spawn_group(
        &self,
        name: ServiceName,
        session_dir: Option<&Path>,
    ) -> Result<i32, SupervisorError> {
        let launch = self
            .commands
            .get(&name)
            .ok_or_else(|| SupervisorError::UnknownService(name.to_string()))?;

        let mut command = tokio::process::Command::new(&launch.program);
        let _ = command
            .args(&launch.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .process_group(0);
        if let Some(cwd) = &launch.cwd {
            let _ = command.current_dir(cwd);
        }
        if let Some(dir) = session_dir {
            let _ = command.env(SESSION_DIR_ENV, dir);
        }

        let mut child = command.spawn().map_err(|source| SupervisorError::Spawn {
            name: name.to_string(),
            source,
        })?;
        let pgid = child
            .id()
            .and_then(|pid| i32::try_from(pid).ok())
            .ok_or_else(|| SupervisorError::NoPid(name.to_string()))?;

        let table = Arc::clone(&self.table);
        drop(tokio::spawn(async move {
            let status = child.wait().await;
            debug!(service = %name, pgid, ?status, "service leader exited");
            // Forked members keep the group, and the service slot, alive
            while owns(&table, name, pgid) && group_alive(pgid) {
                tokio::time::sleep(GROUP_POLL).await;
            }
            let mut table = table.lock();
            if table.running.get(&name) == Some(&pgid) {
                let _ = table.running.remove(&name);
                debug!(service = %name, pgid, "service group gone");
            }
        }));

        Ok(pgid)
    }

    /// Stop `name` by signalling its process group with SIGTERM.
    ///
    /// Bookkeeping is cleared before signalling. Stopping a service that is
    /// not running, or whose group is already gone, succeeds.
    pub fn stop(&self, name: ServiceName) -> ControlOutcome {
        let Some(pgid) = self.table.lock().running.remove(&name) else {
            return ControlOutcome::ok(format!("{name} not running"));
        };

        match terminate(pgid) {
            Ok(true) => {
                self.table.lock().draining.push(pgid);
                info!(service = %name, pgid, "service stopped");
                ControlOutcome::ok(format!("{name} stopped"))
            }
            Ok(false) => ControlOutcome::ok(format!("{name} already exited")),
            Err(errno) => {
                let err = SupervisorError::Signal {
                    name: name.to_string(),
                    errno,
                };
                warn!(service = %name, pgid, error = %err, "stop signal failed");
                ControlOutcome::failed(err.to_string())
            }
        }
    }

    /// Stop every running service.
    pub fn stop_all(&self) -> Vec<(ServiceName, ControlOutcome)> {
        ServiceName::ALL
            .into_iter()
            .filter(|name| self.is_running(*name))
            .map(|name| (name, self.stop(name)))
            .collect()
    }

    /// Stop everything, wait out the grace period, then SIGKILL any group
    /// that is still alive.
    pub async fn shutdown(&self) {
        let _ = self.stop_all();
        if self.table.lock().draining.is_empty() {
            return;
        }
        tokio::time::sleep(self.grace).await;
        let killed = self.force_kill_draining();
        if killed > 0 {
            warn!(groups = killed, "force-killed services that ignored SIGTERM");
        }
    }

    /// SIGKILL every group stopped earlier. Returns how many were still alive.
    pub fn force_kill_draining(&self) -> usize {
        let draining = std::mem::take(&mut self.table.lock().draining);
        draining
            .into_iter()
            .filter(|&pgid| killpg(Pid::from_raw(pgid), Signal::SIGKILL).is_ok())
            .count()
    }

    /// Whether `name` is recorded as running.
    pub fn is_running(&self, name: ServiceName) -> bool {
        self.table.lock().running.contains_key(&name)
    }

    /// Process group of `name`, when running.
    pub fn pgid(&self, name: ServiceName) -> Option<i32> {
        self.table.lock().running.get(&name).copied()
    }

    /// Services recorded as running.
    pub fn running(&self) -> Vec<ServiceName> {
        ServiceName::ALL
            .into_iter()
            .filter(|name| self.is_running(*name))
            .collect()
    }
}

fn owns(table: &Mutex<Table>, name: ServiceName, pgid: i32) -> bool {
    table.lock().running.get(&name) == Some(&pgid)
}

/// Whether any member of the group is still around.
fn group_alive(pgid: i32) -> bool {
    killpg(Pid::from_raw(pgid), None).is_ok()
}

/// SIGTERM the group, falling back to the leader alone. `Ok(false)` means
/// nothing was left to signal.
fn terminate(pgid: i32) -> Result<bool, Errno> {
    let pid = Pid::from_raw(pgid);
    match killpg(pid, Signal::SIGTERM) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(group_err) => {
            debug!(pgid, error = %group_err, "group signal failed, signalling leader");
            match kill(pid, Signal::SIGTERM) {
                Ok(()) => Ok(true),
                Err(Errno::ESRCH) => Ok(false),
                Err(e) => Err(e),
            }
        }
    }
}
