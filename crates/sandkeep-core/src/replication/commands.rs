// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shell commands issued inside the sandbox during replication.

use crate::sandbox::ProcessInfo;

/// Single-quote `value` for `sh`.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn dir_arg(dir: &str) -> String {
    shell_quote(&format!("{}/", dir.trim_end_matches('/')))
}

/// One-way mirror of `src` into `dest`, deleting extraneous files and
/// without preserving timestamps.
pub(crate) fn mirror(src: &str, dest: &str, excludes: &[String]) -> String {
    let mut command = String::from("rsync -r --no-times --delete");
    for pattern in excludes {
        command.push_str(" --exclude=");
        command.push_str(&shell_quote(pattern));
    }
    command.push(' ');
    command.push_str(&dir_arg(src));
    command.push(' ');
    command.push_str(&dir_arg(dest));
    command
}

/// Copy only the files listed (relative to `src`) in `list_path`.
pub(crate) fn mirror_subset(src: &str, dest: &str, list_path: &str) -> String {
    format!(
        "rsync -r --no-times --files-from={} {} {}",
        shell_quote(list_path),
        dir_arg(src),
        dir_arg(dest)
    )
}

/// List regular files below `dir`, one path per line.
pub(crate) fn list_files(dir: &str) -> String {
    format!("find {} -type f", shell_quote(dir.trim_end_matches('/')))
}

/// Count regular files below `dir`. Prints 0 if `dir` is missing.
pub(crate) fn count_files(dir: &str) -> String {
    format!(
        "find {} -type f 2>/dev/null | wc -l",
        shell_quote(dir.trim_end_matches('/'))
    )
}

/// True if `process` is a live mirror writing below `dest_prefix`.
pub(crate) fn is_mirror_into(process: &ProcessInfo, dest_prefix: &str) -> bool {
    process.is_alive()
        && process.command.trim_start().starts_with("rsync")
        && process.command.contains(dest_prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ProcessStatus;

    #[test]
    fn test_mirror_command() {
        let command = mirror(
            "/root/.gateway",
            "/data/durable/tenants/a/config/",
            &["*.lock".to_string(), "*.log".to_string()],
        );
        assert_eq!(
            command,
            "rsync -r --no-times --delete --exclude='*.lock' --exclude='*.log' \
             '/root/.gateway/' '/data/durable/tenants/a/config/'"
        );
    }

    #[test]
    fn test_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_is_mirror_into() {
        let mut process = ProcessInfo {
            id: "p1".into(),
            command: mirror_subset("/root/.gateway", "/data/durable/tenants/a/config", "/tmp/l"),
            status: ProcessStatus::Running,
            exit_code: None,
        };
        assert!(is_mirror_into(&process, "/data/durable/tenants/a/"));
        assert!(!is_mirror_into(&process, "/data/durable/tenants/b/"));

        process.status = ProcessStatus::Exited;
        assert!(!is_mirror_into(&process, "/data/durable/tenants/a/"));
    }
}
