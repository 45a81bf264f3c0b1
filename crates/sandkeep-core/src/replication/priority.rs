// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Path classification for replication.
//!
//! Priorities select the critical subset and feed diagnostics. They do not
//! reorder the full mirror pass.

/// Primary configuration filename.
pub const PRIMARY_CONFIG_FILE: &str = "gateway.json";
/// Marker file written once a tenant's service has registered.
pub const REGISTRATION_MARKER_FILE: &str = ".registered";
/// Per-channel configuration filename.
pub const CHANNEL_CONFIG_FILE: &str = "config.json";
/// Directory holding credentials.
pub const CREDENTIALS_DIR: &str = "credentials";
/// Directory holding channel definitions.
pub const CHANNELS_DIR: &str = "channels";

/// Priority of a path that matches no pattern.
pub const DEFAULT_PRIORITY: u32 = 10;

/// A path pattern in the priority table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPattern {
    /// A directory component equal to the name.
    Dir(&'static str),
    /// The final component equal to the name.
    File(&'static str),
    /// Both a directory component and the final component.
    DirAndFile(&'static str, &'static str),
}

impl PathPattern {
    /// Whether `path` matches.
    pub fn matches(&self, path: &str) -> bool {
        match *self {
            PathPattern::Dir(dir) => has_dir(path, dir),
            PathPattern::File(name) => file_name(path) == name,
            PathPattern::DirAndFile(dir, name) => has_dir(path, dir) && file_name(path) == name,
        }
    }
}

/// Priority table, highest first. The first matching pattern wins.
pub const PATH_PRIORITIES: &[(PathPattern, u32)] = &[
    (PathPattern::Dir(CREDENTIALS_DIR), 100),
    (PathPattern::File(PRIMARY_CONFIG_FILE), 90),
    (PathPattern::File(REGISTRATION_MARKER_FILE), 80),
    (PathPattern::DirAndFile(CHANNELS_DIR, CHANNEL_CONFIG_FILE), 70),
    (PathPattern::Dir("memory"), 50),
    (PathPattern::Dir("knowledge"), 40),
    (PathPattern::Dir("skills"), 30),
    (PathPattern::Dir("scripts"), 20),
];

fn file_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

fn has_dir(path: &str, dir: &str) -> bool {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, _)) => parent.split('/').any(|segment| segment == dir),
        None => false,
    }
}

/// Priority of `path` according to [`PATH_PRIORITIES`].
pub fn get_path_priority(path: &str) -> u32 {
    PATH_PRIORITIES
        .iter()
        .find(|(pattern, _)| pattern.matches(path))
        .map(|(_, priority)| *priority)
        .unwrap_or(DEFAULT_PRIORITY)
}

/// True for paths mirrored by the critical pass: credentials, the primary
/// config, the registration marker, and channel configs.
pub fn is_critical_path(path: &str) -> bool {
    has_dir(path, CREDENTIALS_DIR)
        || file_name(path) == PRIMARY_CONFIG_FILE
        || file_name(path) == REGISTRATION_MARKER_FILE
        || (has_dir(path, CHANNELS_DIR) && file_name(path) == CHANNEL_CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_precedence() {
        let cases = [
            ("/root/.gateway/credentials/gateway.json", 100),
            ("/root/.gateway/gateway.json", 90),
            ("/root/.gateway/.registered", 80),
            ("/root/.gateway/channels/telegram/config.json", 70),
            ("/root/workspace/memory/2025-01-01.md", 50),
            ("/root/workspace/knowledge/faq.md", 40),
            ("/root/workspace/skills/search/SKILL.md", 30),
            ("/root/workspace/scripts/deploy.sh", 20),
            ("/root/workspace/notes.txt", DEFAULT_PRIORITY),
        ];
        for (path, expected) in cases {
            assert_eq!(get_path_priority(path), expected, "{}", path);
        }
    }

    #[test]
    fn test_first_match_wins() {
        // Credentials outrank every other rule the same path matches.
        assert_eq!(
            get_path_priority("/root/.gateway/credentials/channels/config.json"),
            100
        );
        assert_eq!(get_path_priority("/root/workspace/memory/scripts/run.sh"), 50);
    }

    #[test]
    fn test_segments_must_match_exactly() {
        assert_eq!(
            get_path_priority("/root/workspace/memory-notes/a.md"),
            DEFAULT_PRIORITY
        );
        assert_eq!(
            get_path_priority("/root/.gateway/old-gateway.json"),
            DEFAULT_PRIORITY
        );
        // A file named like a directory is not a directory segment.
        assert_eq!(get_path_priority("/root/workspace/credentials"), DEFAULT_PRIORITY);
    }

    #[test]
    fn test_is_critical_path() {
        assert!(is_critical_path("/root/.gateway/credentials/token.json"));
        assert!(is_critical_path("credentials/oauth/refresh"));
        assert!(is_critical_path("/root/.gateway/gateway.json"));
        assert!(is_critical_path("/root/.gateway/.registered"));
        assert!(is_critical_path("/root/.gateway/channels/slack/config.json"));

        assert!(!is_critical_path("/root/.gateway/channels/slack/state.json"));
        assert!(!is_critical_path("/root/.gateway/config.json"));
        assert!(!is_critical_path("/root/workspace/memory/today.md"));
        assert!(!is_critical_path(""));
    }
}
