// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock sandbox for testing.
//!
//! Simulates a sandbox without a real compute unit: an in-memory filesystem,
//! scripted processes and a tiny interpreter for the commands the engine
//! issues (`echo`, `find`, `rsync`). Anything else is treated as a
//! long-running service process.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{ProcessInfo, ProcessLogs, ProcessStatus, Result, Sandbox, SandboxError};

/// Sandbox operations that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// `list_processes`
    ListProcesses,
    /// `start_process`
    StartProcess,
    /// `kill_process`
    Kill,
    /// `wait_for_exit`
    WaitForExit,
    /// `get_logs`
    GetLogs,
    /// `wait_for_port`
    WaitForPort,
    /// `read_file`
    ReadFile,
    /// `write_file`
    WriteFile,
    /// `mkdir`
    Mkdir,
    /// `delete_file`
    DeleteFile,
    /// `exists`
    Exists,
}

#[derive(Debug, Clone)]
struct MockProcess {
    id: String,
    command: String,
    logs: ProcessLogs,
    /// `None` for processes that never exit on their own.
    finishes_at: Option<Instant>,
    exit_code: i32,
    killed: bool,
}

impl MockProcess {
    fn info(&self, now: Instant) -> ProcessInfo {
        let exited = self.killed || self.finishes_at.is_some_and(|t| t <= now);
        ProcessInfo {
            id: self.id.clone(),
            command: self.command.clone(),
            status: if exited {
                ProcessStatus::Exited
            } else {
                ProcessStatus::Running
            },
            exit_code: if self.killed {
                Some(137)
            } else if exited {
                Some(self.exit_code)
            } else {
                None
            },
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
    processes: Vec<MockProcess>,
    next_pid: u64,
    failures: HashMap<MockOp, VecDeque<SandboxError>>,
    delays: Vec<(String, Duration)>,
    exit_overrides: Vec<(String, i32)>,
    commands: Vec<String>,
    open_ports: HashSet<u16>,
    ports_on_start: Vec<u16>,
    health_failures: u32,
    unresponsive: bool,
    stalled: bool,
    hibernating: bool,
}

impl MockState {
    fn take_failure(&mut self, op: MockOp) -> Option<SandboxError> {
        self.failures.get_mut(&op).and_then(|q| q.pop_front())
    }

    fn path_exists(&self, path: &str) -> bool {
        let trimmed = path.trim_end_matches('/');
        let prefix = format!("{}/", trimmed);
        self.files.contains_key(trimmed)
            || self.dirs.contains(trimmed)
            || self.files.keys().any(|k| k.starts_with(&prefix))
    }

    fn files_under(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.files
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect()
    }

    fn find_process(&self, process_id: &str) -> Result<&MockProcess> {
        self.processes
            .iter()
            .find(|p| p.id == process_id)
            .ok_or_else(|| SandboxError::NotFound(format!("process {}", process_id)))
    }
}

/// Mock sandbox for testing.
pub struct MockSandbox {
    id: String,
    state: Mutex<MockState>,
}

impl MockSandbox {
    /// Create an empty mock sandbox.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or replace a file.
    pub fn set_file(&self, path: &str, content: &str) {
        self.state()
            .files
            .insert(path.to_string(), content.to_string());
    }

    /// Remove a file.
    pub fn remove_file(&self, path: &str) {
        self.state().files.remove(path);
    }

    /// Read a file without going through the trait (no failure injection).
    pub fn file(&self, path: &str) -> Option<String> {
        self.state().files.get(path).cloned()
    }

    /// Paths of all files below `dir`.
    pub fn files_under(&self, dir: &str) -> Vec<String> {
        self.state().files_under(dir)
    }

    /// Queue an error to be returned by the next call of `op`.
    pub fn fail_next(&self, op: MockOp, error: SandboxError) {
        self.state()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Commands starting with `prefix` take `delay` to exit.
    pub fn set_command_delay(&self, prefix: &str, delay: Duration) {
        self.state().delays.push((prefix.to_string(), delay));
    }

    /// Commands starting with `prefix` exit with `code` (after their effects).
    pub fn set_exit_code(&self, prefix: &str, code: i32) {
        self.state().exit_overrides.push((prefix.to_string(), code));
    }

    /// The next `n` health commands (`echo`) fail.
    pub fn set_health_failures(&self, n: u32) {
        self.state().health_failures = n;
    }

    /// When set, `echo` commands never exit.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.state().unresponsive = unresponsive;
    }

    /// When set, every trait call hangs until cleared.
    pub fn set_stalled(&self, stalled: bool) {
        self.state().stalled = stalled;
    }

    /// When set, every call except `start_process` fails with `Hibernating`.
    /// Starting a process wakes the sandbox.
    pub fn set_hibernating(&self, hibernating: bool) {
        self.state().hibernating = hibernating;
    }

    /// Open `port` whenever a long-running process starts.
    pub fn open_port_on_start(&self, port: u16) {
        self.state().ports_on_start.push(port);
    }

    /// Add an already-running process, bypassing the command log.
    pub fn spawn_running(&self, command: &str) -> String {
        let mut state = self.state();
        state.next_pid += 1;
        let id = format!("proc-{}", state.next_pid);
        state.processes.push(MockProcess {
            id: id.clone(),
            command: command.to_string(),
            logs: ProcessLogs::default(),
            finishes_at: None,
            exit_code: 0,
            killed: false,
        });
        id
    }

    /// Make a running process exit with `code` and `stderr`.
    pub fn exit_process(&self, process_id: &str, code: i32, stderr: &str) {
        let now = Instant::now();
        let mut state = self.state();
        if let Some(p) = state.processes.iter_mut().find(|p| p.id == process_id) {
            p.finishes_at = Some(now);
            p.exit_code = code;
            p.logs.stderr = stderr.to_string();
        }
    }

    /// Every command passed to `start_process`, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Number of started commands beginning with `prefix`.
    pub fn count_commands(&self, prefix: &str) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    async fn respond(&self) {
        loop {
            let stalled = self.state().stalled;
            if !stalled {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn guard(&self, state: &mut MockState, op: MockOp) -> Result<()> {
        if let Some(err) = state.take_failure(op) {
            return Err(err);
        }
        if state.hibernating {
            return Err(SandboxError::Hibernating);
        }
        Ok(())
    }
}

/// Effects of an interpreted command.
struct Outcome {
    stdout: String,
    stderr: String,
    exit_code: i32,
    long_running: bool,
}

impl Outcome {
    fn exited(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            long_running: false,
        }
    }
}

fn tokens(command: &str) -> Vec<String> {
    command
        .split_whitespace()
        .map(|t| t.trim_matches('\'').trim_matches('"').to_string())
        .collect()
}

fn unquote(value: &str) -> String {
    value.trim_matches('\'').trim_matches('"').to_string()
}

fn excluded(rel: &str, excludes: &[String]) -> bool {
    let name = rel.rsplit('/').next().unwrap_or(rel);
    excludes.iter().any(|pattern| match pattern.strip_prefix('*') {
        Some(suffix) => name.ends_with(suffix),
        None => name == pattern,
    })
}

fn interpret_echo(state: &mut MockState, command: &str) -> Outcome {
    if state.unresponsive {
        return Outcome {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            long_running: true,
        };
    }
    if state.health_failures > 0 {
        state.health_failures -= 1;
        return Outcome::exited(1, String::new(), "sandbox not responding".into());
    }
    let text = command.trim_start_matches("echo").trim();
    Outcome::exited(0, format!("{}\n", text.trim_matches('\'')), String::new())
}

fn interpret_find(state: &MockState, command: &str) -> Outcome {
    let args = tokens(command);
    let Some(dir) = args.get(1) else {
        return Outcome::exited(1, String::new(), "find: missing path".into());
    };
    let files = state.files_under(dir);

    if command.contains("| wc -l") {
        return Outcome::exited(0, format!("{}\n", files.len()), String::new());
    }
    if !state.path_exists(dir) {
        return Outcome::exited(
            1,
            String::new(),
            format!("find: '{}': No such file or directory", dir),
        );
    }
    let mut stdout = files.join("\n");
    if !stdout.is_empty() {
        stdout.push('\n');
    }
    Outcome::exited(0, stdout, String::new())
}

fn interpret_rsync(state: &mut MockState, command: &str) -> Outcome {
    let mut delete = false;
    let mut excludes = Vec::new();
    let mut files_from = None;
    let mut paths = Vec::new();

    for arg in tokens(command).into_iter().skip(1) {
        if arg == "--delete" {
            delete = true;
        } else if let Some(p) = arg.strip_prefix("--exclude=") {
            excludes.push(unquote(p));
        } else if let Some(p) = arg.strip_prefix("--files-from=") {
            files_from = Some(unquote(p));
        } else if !arg.starts_with('-') {
            paths.push(arg);
        }
    }

    let [src, dest] = paths.as_slice() else {
        return Outcome::exited(1, String::new(), "rsync: syntax or usage error".into());
    };
    let src = src.trim_end_matches('/').to_string();
    let dest = dest.trim_end_matches('/').to_string();

    if !state.path_exists(&src) {
        return Outcome::exited(
            23,
            String::new(),
            format!("rsync: change_dir \"{}\" failed: No such file or directory", src),
        );
    }

    let allowed: Option<HashSet<String>> = match files_from {
        Some(list) => match state.files.get(&list) {
            Some(content) => Some(
                content
                    .lines()
                    .map(|l| l.trim().trim_start_matches("./").to_string())
                    .filter(|l| !l.is_empty())
                    .collect(),
            ),
            None => {
                return Outcome::exited(
                    23,
                    String::new(),
                    format!("rsync: failed to open files-from file {}", list),
                );
            }
        },
        None => None,
    };

    let src_prefix = format!("{}/", src);
    let source: Vec<(String, String)> = state
        .files
        .iter()
        .filter_map(|(path, content)| {
            let rel = path.strip_prefix(&src_prefix)?;
            if excluded(rel, &excludes) {
                return None;
            }
            if let Some(allowed) = &allowed
                && !allowed.contains(rel)
            {
                return None;
            }
            Some((rel.to_string(), content.clone()))
        })
        .collect();

    if delete {
        let keep: HashSet<&str> = source.iter().map(|(rel, _)| rel.as_str()).collect();
        let dest_prefix = format!("{}/", dest);
        let stale: Vec<String> = state
            .files
            .keys()
            .filter(|path| {
                path.strip_prefix(&dest_prefix)
                    .is_some_and(|rel| !keep.contains(rel) && !excluded(rel, &excludes))
            })
            .cloned()
            .collect();
        for path in stale {
            state.files.remove(&path);
        }
    }

    for (rel, content) in source {
        state.files.insert(format!("{}/{}", dest, rel), content);
    }
    state.dirs.insert(dest);

    Outcome::exited(0, String::new(), String::new())
}

#[async_trait]
impl Sandbox for MockSandbox {
    fn sandbox_id(&self) -> &str {
        &self.id
    }

    async fn list_processes(&self) -> Result<Vec<ProcessInfo>> {
        self.respond().await;
        let now = Instant::now();
        let mut state = self.state();
        self.guard(&mut state, MockOp::ListProcesses)?;
        Ok(state.processes.iter().map(|p| p.info(now)).collect())
    }

    async fn start_process(
        &self,
        command: &str,
        _env: &HashMap<String, String>,
    ) -> Result<ProcessInfo> {
        self.respond().await;
        let now = Instant::now();
        let mut state = self.state();
        state.commands.push(command.to_string());
        if let Some(err) = state.take_failure(MockOp::StartProcess) {
            return Err(err);
        }
        state.hibernating = false;

        let mut outcome = if command.starts_with("echo ") {
            interpret_echo(&mut state, command)
        } else if command.starts_with("find ") {
            interpret_find(&state, command)
        } else if command.starts_with("rsync ") {
            interpret_rsync(&mut state, command)
        } else {
            Outcome {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
                long_running: true,
            }
        };

        if let Some((_, code)) = state
            .exit_overrides
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
        {
            outcome.exit_code = *code;
        }

        let finishes_at = if outcome.long_running {
            let ports = state.ports_on_start.clone();
            state.open_ports.extend(ports);
            None
        } else {
            let delay = state
                .delays
                .iter()
                .find(|(prefix, _)| command.starts_with(prefix.as_str()))
                .map(|(_, d)| *d)
                .unwrap_or_default();
            Some(now + delay)
        };

        state.next_pid += 1;
        let process = MockProcess {
            id: format!("proc-{}", state.next_pid),
            command: command.to_string(),
            logs: ProcessLogs {
                stdout: outcome.stdout,
                stderr: outcome.stderr,
            },
            finishes_at,
            exit_code: outcome.exit_code,
            killed: false,
        };
        // Report the state a caller sees right after spawning.
        let info = ProcessInfo {
            id: process.id.clone(),
            command: process.command.clone(),
            status: ProcessStatus::Starting,
            exit_code: None,
        };
        state.processes.push(process);
        Ok(info)
    }

    async fn kill_process(&self, process_id: &str) -> Result<()> {
        self.respond().await;
        let mut state = self.state();
        self.guard(&mut state, MockOp::Kill)?;
        let process = state
            .processes
            .iter_mut()
            .find(|p| p.id == process_id)
            .ok_or_else(|| SandboxError::NotFound(format!("process {}", process_id)))?;
        process.killed = true;
        Ok(())
    }

    async fn wait_for_exit(&self, process_id: &str, timeout: Duration) -> Result<ProcessInfo> {
        self.respond().await;
        let now = Instant::now();
        let finishes_at = {
            let mut state = self.state();
            self.guard(&mut state, MockOp::WaitForExit)?;
            let process = state.find_process(process_id)?;
            if process.killed {
                return Ok(process.info(now));
            }
            process.finishes_at
        };

        match finishes_at {
            Some(t) if t <= now + timeout => {
                tokio::time::sleep_until(t).await;
                let now = Instant::now();
                let state = self.state();
                Ok(state.find_process(process_id)?.info(now))
            }
            _ => {
                tokio::time::sleep(timeout).await;
                Err(SandboxError::Timeout(timeout))
            }
        }
    }

    async fn get_logs(&self, process_id: &str) -> Result<ProcessLogs> {
        self.respond().await;
        let mut state = self.state();
        self.guard(&mut state, MockOp::GetLogs)?;
        Ok(state.find_process(process_id)?.logs.clone())
    }

    async fn wait_for_port(&self, port: u16, timeout: Duration) -> Result<()> {
        self.respond().await;
        let open = {
            let mut state = self.state();
            self.guard(&mut state, MockOp::WaitForPort)?;
            state.open_ports.contains(&port)
        };
        if open {
            return Ok(());
        }
        tokio::time::sleep(timeout).await;
        Err(SandboxError::ConnectionRefused(format!("port {}", port)))
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        self.respond().await;
        let mut state = self.state();
        self.guard(&mut state, MockOp::ReadFile)?;
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| SandboxError::NotFound(path.to_string()))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.respond().await;
        let mut state = self.state();
        self.guard(&mut state, MockOp::WriteFile)?;
        state.files.insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        self.respond().await;
        let mut state = self.state();
        self.guard(&mut state, MockOp::Mkdir)?;
        state.dirs.insert(path.trim_end_matches('/').to_string());
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.respond().await;
        let mut state = self.state();
        self.guard(&mut state, MockOp::DeleteFile)?;
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| SandboxError::NotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.respond().await;
        let mut state = self.state();
        self.guard(&mut state, MockOp::Exists)?;
        Ok(state.path_exists(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_long_running_process_stays_running() {
        let sandbox = MockSandbox::new("t");
        let started = sandbox
            .start_process("start-service.sh", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(started.status, ProcessStatus::Starting);

        let processes = sandbox.list_processes().await.unwrap();
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0].status, ProcessStatus::Running);

        sandbox.kill_process(&started.id).await.unwrap();
        let processes = sandbox.list_processes().await.unwrap();
        assert_eq!(processes[0].status, ProcessStatus::Exited);
        assert_eq!(processes[0].exit_code, Some(137));
    }

    #[tokio::test]
    async fn test_mock_rsync_mirrors_and_deletes() {
        let sandbox = MockSandbox::new("t");
        sandbox.set_file("/src/a.json", "a");
        sandbox.set_file("/src/sub/b.txt", "b");
        sandbox.set_file("/src/app.lock", "lock");
        sandbox.set_file("/dst/stale.txt", "old");

        let p = sandbox
            .start_process(
                "rsync -r --no-times --delete --exclude='*.lock' /src/ /dst/",
                &HashMap::new(),
            )
            .await
            .unwrap();
        let done = sandbox
            .wait_for_exit(&p.id, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(done.exit_code, Some(0));
        assert_eq!(sandbox.file("/dst/a.json").as_deref(), Some("a"));
        assert_eq!(sandbox.file("/dst/sub/b.txt").as_deref(), Some("b"));
        assert!(sandbox.file("/dst/app.lock").is_none());
        assert!(sandbox.file("/dst/stale.txt").is_none());
    }

    #[tokio::test]
    async fn test_mock_find_counts_files() {
        let sandbox = MockSandbox::new("t");
        sandbox.set_file("/d/1", "");
        sandbox.set_file("/d/2/3", "");

        let p = sandbox
            .start_process("find /d -type f 2>/dev/null | wc -l", &HashMap::new())
            .await
            .unwrap();
        let logs = sandbox.get_logs(&p.id).await.unwrap();
        assert_eq!(logs.stdout.trim(), "2");
    }

    #[tokio::test]
    async fn test_mock_hibernation_cleared_by_start() {
        let sandbox = MockSandbox::new("t");
        sandbox.set_hibernating(true);

        assert!(matches!(
            sandbox.list_processes().await,
            Err(SandboxError::Hibernating)
        ));

        sandbox
            .start_process("start-service.sh", &HashMap::new())
            .await
            .unwrap();
        assert!(sandbox.list_processes().await.is_ok());
    }
}
