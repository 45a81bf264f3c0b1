// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host-local sandbox.
//!
//! Runs tenant processes directly on the host under `sh -c`, each in its own
//! process group so a kill takes the whole pipeline down. Output goes to
//! `{root}/logs/{process_id}.stdout|stderr`. Absolute paths are host paths;
//! relative paths resolve against the sandbox root. A local sandbox never
//! hibernates.
//!
//! Only the most recent [`MAX_EXITED_PROCESSES`] exited processes are
//! remembered; older ones are forgotten and their logs deleted when a new
//! process starts.

use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use sandkeep_core::sandbox::{
    ProcessInfo, ProcessLogs, ProcessStatus, Result, Sandbox, SandboxError,
};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const PORT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exited processes (and their logs) kept for inspection.
pub const MAX_EXITED_PROCESSES: usize = 32;

fn sequence(process_id: &str) -> u64 {
    process_id
        .trim_start_matches("proc-")
        .parse::<u64>()
        .unwrap_or(0)
}

struct LocalProcess {
    command: String,
    pid: Option<u32>,
    status: watch::Receiver<Option<i32>>,
}

impl LocalProcess {
    fn info(&self, id: &str) -> ProcessInfo {
        let exit_code = *self.status.borrow();
        ProcessInfo {
            id: id.to_string(),
            command: self.command.clone(),
            status: if exit_code.is_some() {
                ProcessStatus::Exited
            } else {
                ProcessStatus::Running
            },
            exit_code,
        }
    }
}

/// Sandbox backed by host processes and the host filesystem.
pub struct LocalSandbox {
    id: String,
    root: PathBuf,
    next_id: AtomicU64,
    processes: Mutex<HashMap<String, LocalProcess>>,
}

impl LocalSandbox {
    /// Create a sandbox rooted at `root`. The directory is created on first
    /// process start.
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
            next_id: AtomicU64::new(1),
            processes: Mutex::new(HashMap::new()),
        }
    }

    /// Sandbox root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn log_path(&self, process_id: &str, stream: &str) -> PathBuf {
        self.root.join("logs").join(format!("{}.{}", process_id, stream))
    }

    fn lookup(&self, process_id: &str) -> Result<(Option<u32>, watch::Receiver<Option<i32>>)> {
        let processes = self.processes.lock().unwrap_or_else(|e| e.into_inner());
        processes
            .get(process_id)
            .map(|p| (p.pid, p.status.clone()))
            .ok_or_else(|| SandboxError::NotFound(format!("process {}", process_id)))
    }

    /// Forget the oldest exited processes beyond [`MAX_EXITED_PROCESSES`]
    /// and delete their logs.
    async fn prune_exited(&self) {
        let pruned: Vec<String> = {
            let mut processes = self.processes.lock().unwrap_or_else(|e| e.into_inner());
            let mut exited: Vec<String> = processes
                .iter()
                .filter(|(_, p)| p.status.borrow().is_some())
                .map(|(id, _)| id.clone())
                .collect();
            if exited.len() <= MAX_EXITED_PROCESSES {
                return;
            }
            exited.sort_by_key(|id| sequence(id));
            exited.truncate(exited.len() - MAX_EXITED_PROCESSES);
            for id in &exited {
                processes.remove(id);
            }
            exited
        };

        for id in &pruned {
            for stream in ["stdout", "stderr"] {
                let path = self.log_path(id, stream);
                if let Err(e) = tokio::fs::remove_file(&path).await
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(
                        process_id = %id,
                        path = %path.display(),
                        error = %e,
                        "Failed to delete process log"
                    );
                }
            }
        }
        debug!(sandbox_id = %self.id, pruned = pruned.len(), "Forgot exited processes");
    }
}

fn not_found(path: &str, e: std::io::Error) -> SandboxError {
    if e.kind() == std::io::ErrorKind::NotFound {
        SandboxError::NotFound(path.to_string())
    } else {
        SandboxError::Io(e)
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn sandbox_id(&self) -> &str {
        &self.id
    }

    async fn list_processes(&self) -> Result<Vec<ProcessInfo>> {
        let processes = self.processes.lock().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<ProcessInfo> = processes.iter().map(|(id, p)| p.info(id)).collect();
        list.sort_by_key(|p| sequence(&p.id));
        Ok(list)
    }

    async fn start_process(
        &self,
        command: &str,
        env: &HashMap<String, String>,
    ) -> Result<ProcessInfo> {
        self.prune_exited().await;
        let process_id = format!("proc-{}", self.next_id.fetch_add(1, Ordering::SeqCst));

        tokio::fs::create_dir_all(self.root.join("logs")).await?;
        let stdout = std::fs::File::create(self.log_path(&process_id, "stdout"))?;
        let stderr = std::fs::File::create(self.log_path(&process_id, "stderr"))?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .envs(env)
            .env("SANDKEEP_SANDBOX_ID", &self.id)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .kill_on_drop(false);

        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::StartFailed(format!("{}: {}", command, e)))?;
        let pid = child.id();

        let (tx, rx) = watch::channel(None);
        let reaper_id = process_id.clone();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status
                    .code()
                    .or_else(|| status.signal().map(|s| 128 + s))
                    .unwrap_or(-1),
                Err(e) => {
                    warn!(process_id = %reaper_id, error = %e, "Failed to wait for process");
                    -1
                }
            };
            debug!(process_id = %reaper_id, exit_code = code, "Process exited");
            let _ = tx.send(Some(code));
        });

        info!(
            sandbox_id = %self.id,
            process_id = %process_id,
            pid = ?pid,
            command = %command,
            "Started process"
        );

        let process = LocalProcess {
            command: command.to_string(),
            pid,
            status: rx,
        };
        let info = process.info(&process_id);
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(process_id, process);
        Ok(info)
    }

    async fn kill_process(&self, process_id: &str) -> Result<()> {
        let (pid, status) = self.lookup(process_id)?;
        if status.borrow().is_some() {
            return Ok(());
        }
        let Some(pid) = pid else {
            return Ok(());
        };

        match signal::killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => {
                debug!(process_id = %process_id, pid = pid, "Sent SIGKILL to process group");
                Ok(())
            }
            Err(nix::errno::Errno::ESRCH) => {
                debug!(process_id = %process_id, pid = pid, "Process already dead (ESRCH)");
                Ok(())
            }
            Err(e) => Err(SandboxError::Other(format!(
                "kill {} (pid {}): {}",
                process_id, pid, e
            ))),
        }
    }

    async fn wait_for_exit(&self, process_id: &str, timeout: Duration) -> Result<ProcessInfo> {
        let (_, mut status) = self.lookup(process_id)?;
        tokio::time::timeout(timeout, status.wait_for(|code| code.is_some()))
            .await
            .map_err(|_| SandboxError::Timeout(timeout))?
            .map_err(|_| SandboxError::Other(format!("process {} reaper stopped", process_id)))?;

        let processes = self.processes.lock().unwrap_or_else(|e| e.into_inner());
        processes
            .get(process_id)
            .map(|p| p.info(process_id))
            .ok_or_else(|| SandboxError::NotFound(format!("process {}", process_id)))
    }

    async fn get_logs(&self, process_id: &str) -> Result<ProcessLogs> {
        self.lookup(process_id)?;
        let read = |stream: &'static str| {
            let path = self.log_path(process_id, stream);
            async move {
                match tokio::fs::read(&path).await {
                    Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
                    Err(e) => Err(SandboxError::Io(e)),
                }
            }
        };
        Ok(ProcessLogs {
            stdout: read("stdout").await?,
            stderr: read("stderr").await?,
        })
    }

    async fn wait_for_port(&self, port: u16, timeout: Duration) -> Result<()> {
        let attempt = async {
            loop {
                match TcpStream::connect(("127.0.0.1", port)).await {
                    Ok(_) => return,
                    Err(_) => tokio::time::sleep(PORT_POLL_INTERVAL).await,
                }
            }
        };
        tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| SandboxError::ConnectionRefused(format!("port {}", port)))
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        tokio::fs::read_to_string(self.resolve(path))
            .await
            .map_err(|e| not_found(path, e))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.resolve(path)).await?;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        tokio::fs::remove_file(self.resolve(path))
            .await
            .map_err(|e| not_found(path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resolve(path)).await?)
    }
}

impl Drop for LocalSandbox {
    fn drop(&mut self) {
        let processes = self.processes.get_mut().unwrap_or_else(|e| e.into_inner());
        for (id, process) in processes.iter() {
            if process.status.borrow().is_none()
                && let Some(pid) = process.pid
            {
                debug!(process_id = %id, pid = pid, "Killing process on sandbox drop");
                let _ = signal::killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_paths_resolve_under_root() {
        let sandbox = LocalSandbox::new("acme", "/srv/sandboxes/acme");
        assert_eq!(
            sandbox.resolve("logs/a.stdout"),
            PathBuf::from("/srv/sandboxes/acme/logs/a.stdout")
        );
        assert_eq!(sandbox.resolve("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[tokio::test]
    async fn test_unknown_process_is_not_found() {
        let sandbox = LocalSandbox::new("acme", std::env::temp_dir());
        let err = sandbox.kill_process("proc-99").await.unwrap_err();
        assert!(matches!(err, SandboxError::NotFound(_)));
    }
}
