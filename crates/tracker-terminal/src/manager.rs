//! Terminal session registry.
//!
//! State per token: `absent → running → exited | closed`. A running session
//! owns its shell exclusively; it leaves the registry either when its owning
//! connection goes away ([`TerminalManager::close_owner`], which kills the
//! shell's process group) or when the shell exits on its own (the session's
//! I/O thread reports the exit and an `exit` frame is pushed if the owner is
//! still listening).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use metrics::gauge;
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use parking_lot::Mutex;
use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracker_core::ids::ConnectionId;
use tracker_settings::TerminalSettings;

use crate::errors::TerminalError;
use crate::protocol::ServerFrame;

const READ_BUF: usize = 4096;

/// Where a session's frames go: the owning connection's outbound queue.
pub type FrameSink = mpsc::Sender<ServerFrame>;

/// Result of [`TerminalManager::init`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitOutcome {
    /// A new shell was started.
    Created,
    /// The caller already owns a running session with this token.
    Existing,
}

struct TerminalSession {
    owner: ConnectionId,
    generation: u64,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
    sink: FrameSink,
}

impl TerminalSession {
    fn terminate(&mut self, token: &str) {
        if let Err(e) = self.killer.kill() {
            debug!(session = token, error = %e, "pty kill failed");
        }
        let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) else {
            return;
        };
        // The shell leads its own session, so its pid is also its group id
        match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!(session = token, pid, error = %e, "failed to kill terminal process group"),
        }
    }
}

/// Registry of live terminal sessions.
pub struct TerminalManager {
    sessions: Mutex<HashMap<String, TerminalSession>>,
    settings: TerminalSettings,
    shell: String,
    next_generation: AtomicU64,
    this: Weak<TerminalManager>,
}

impl TerminalManager {
    /// Create a manager spawning `settings`' shell.
    pub fn new(settings: &TerminalSettings) -> Arc<Self> {
        let shell = settings.resolved_shell();
        Arc::new_cyclic(|this| Self {
            sessions: Mutex::new(HashMap::new()),
            settings: settings.clone(),
            shell,
            next_generation: AtomicU64::new(1),
            this: this.clone(),
        })
    }

    /// Start a shell for `token`, owned by `owner`, streaming to `sink`.
    ///
    /// Re-initializing a token the caller already owns leaves the running
    /// shell untouched. A token owned by another connection is refused.
    pub fn init(
        &self,
        token: &str,
        owner: &ConnectionId,
        size: Option<(u16, u16)>,
        sink: FrameSink,
    ) -> Result<InitOutcome, TerminalError> {
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(token) {
            return if existing.owner == *owner {
                Ok(InitOutcome::Existing)
            } else {
                Err(TerminalError::TokenInUse(token.to_owned()))
            };
        }

        let (cols, rows) = size.unwrap_or((self.settings.cols, self.settings.rows));
        let pair = native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&self.shell);
        cmd.env("TERM", "xterm-256color");
        if let Ok(home) = std::env::var("HOME") {
            cmd.cwd(home);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TerminalError::Spawn {
                program: self.shell.clone(),
                message: e.to_string(),
            })?;
        drop(pair.slave);

        let (reader, writer) = match open_streams(pair.master.as_ref()) {
            Ok(streams) => streams,
            Err(e) => {
                let _ = child.kill();
                return Err(e);
            }
        };

        let pid = child.process_id();
        let killer = child.clone_killer();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let io_token = token.to_owned();
        let io_sink = sink.clone();
        let manager = self.this.clone();
        let io = std::thread::Builder::new()
            .name(format!("pty-{token}"))
            .spawn(move || {
                pump_output(reader, &io_token, &io_sink);
                let exit_code = match child.wait() {
                    Ok(status) => i32::try_from(status.exit_code()).unwrap_or(-1),
                    Err(e) => {
                        debug!(session = %io_token, error = %e, "wait on shell failed");
                        -1
                    }
                };
                if let Some(manager) = manager.upgrade() {
                    manager.on_exit(&io_token, generation, exit_code);
                }
            });
        if let Err(e) = io {
            let mut killer = killer;
            let _ = killer.kill();
            return Err(TerminalError::Io(e));
        }

        let _ = sessions.insert(
            token.to_owned(),
            TerminalSession {
                owner: owner.clone(),
                generation,
                master: pair.master,
                writer,
                killer,
                pid,
                sink,
            },
        );
        gauge!("terminal_sessions_active").set(sessions.len() as f64);
        info!(session = token, conn_id = %owner, pid = ?pid, cols, rows, "terminal session started");
        Ok(InitOutcome::Created)
    }

    /// Forward keystrokes from `owner`. Unknown tokens and tokens owned by
    /// another connection are ignored.
    pub fn input(&self, token: &str, owner: &ConnectionId, data: &[u8]) {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(token).filter(|s| s.owner == *owner) else {
            debug!(session = token, conn_id = %owner, "input for a terminal session this connection does not own");
            return;
        };
        if let Err(e) = session
            .writer
            .write_all(data)
            .and_then(|()| session.writer.flush())
        {
            warn!(session = token, error = %e, "failed to write terminal input");
        }
    }

    /// Change geometry on behalf of `owner`; failures, unknown tokens and
    /// tokens owned elsewhere are logged only.
    pub fn resize(&self, token: &str, owner: &ConnectionId, cols: u16, rows: u16) {
        let sessions = self.sessions.lock();
        let Some(session) = sessions.get(token).filter(|s| s.owner == *owner) else {
            debug!(session = token, conn_id = %owner, "resize for a terminal session this connection does not own");
            return;
        };
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        if let Err(e) = session.master.resize(size) {
            warn!(session = token, cols, rows, error = %e, "terminal resize failed");
        }
    }

    /// Kill and forget every session owned by `owner`. Returns how many.
    pub fn close_owner(&self, owner: &ConnectionId) -> usize {
        let mut removed = {
            let mut sessions = self.sessions.lock();
            let tokens: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| s.owner == *owner)
                .map(|(t, _)| t.clone())
                .collect();
            let removed: Vec<(String, TerminalSession)> = tokens
                .into_iter()
                .filter_map(|t| sessions.remove(&t).map(|s| (t, s)))
                .collect();
            gauge!("terminal_sessions_active").set(sessions.len() as f64);
            removed
        };
        for (token, session) in &mut removed {
            session.terminate(token);
            info!(session = %token, conn_id = %owner, "terminal session closed");
        }
        removed.len()
    }

    /// Kill every session.
    pub fn shutdown_all(&self) {
        let drained: Vec<(String, TerminalSession)> = self.sessions.lock().drain().collect();
        gauge!("terminal_sessions_active").set(0.0);
        for (token, mut session) in drained {
            session.terminate(&token);
        }
    }

    fn on_exit(&self, token: &str, generation: u64, exit_code: i32) {
        let session = {
            let mut sessions = self.sessions.lock();
            match sessions.get(token) {
                Some(s) if s.generation == generation => {}
                _ => return,
            }
            let session = sessions.remove(token);
            gauge!("terminal_sessions_active").set(sessions.len() as f64);
            session
        };
        let Some(session) = session else {
            return;
        };
        info!(session = token, exit_code, "terminal shell exited");
        let _ = session.sink.try_send(ServerFrame::Exit {
            session: token.to_owned(),
            exit_code,
        });
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Whether `token` names a live session.
    pub fn contains(&self, token: &str) -> bool {
        self.sessions.lock().contains_key(token)
    }

    /// Process id of the shell behind `token`.
    pub fn pid(&self, token: &str) -> Option<u32> {
        self.sessions.lock().get(token).and_then(|s| s.pid)
    }
}

fn open_streams(
    master: &dyn MasterPty,
) -> Result<(Box<dyn Read + Send>, Box<dyn Write + Send>), TerminalError> {
    let reader = master
        .try_clone_reader()
        .map_err(|e| TerminalError::Pty(e.to_string()))?;
    let writer = master
        .take_writer()
        .map_err(|e| TerminalError::Pty(e.to_string()))?;
    Ok((reader, writer))
}

/// Copy PTY output to `sink` until EOF or the owner stops listening.
fn pump_output(mut reader: Box<dyn Read + Send>, token: &str, sink: &FrameSink) {
    let mut buf = [0u8; READ_BUF];
    let mut carry = Utf8Carry::default();
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let data = carry.push(&buf[..n]);
        if data.is_empty() {
            continue;
        }
        let frame = ServerFrame::Output {
            session: token.to_owned(),
            data,
        };
        if sink.blocking_send(frame).is_err() {
            break;
        }
    }
}

/// Splits a byte stream into UTF-8 text without breaking multi-byte
/// sequences across reads.
#[derive(Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(s) => {
                let out = s.to_owned();
                self.pending.clear();
                out
            }
            Err(e) if e.error_len().is_none() => {
                let tail = self.pending.split_off(e.valid_up_to());
                let out = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending = tail;
                out
            }
            Err(_) => {
                let out = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                out
            }
        }
    }
}
