// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common fixtures for sandkeep-environment integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use sandkeep_core::sandbox::{MockSandbox, Sandbox};
use sandkeep_environment::error::Error;
use sandkeep_environment::tenants::SandboxProvider;

/// Write a valid configuration tree into a mock sandbox.
pub fn seed(sandbox: &MockSandbox) {
    sandbox.set_file(
        "/root/.gateway/gateway.json",
        r#"{"gateway": {"port": 18789}, "agents": {"default": "main"}}"#,
    );
    sandbox.set_file("/root/.gateway/credentials/slack.json", r#"{"token": "xoxb"}"#);
    sandbox.set_file("/root/workspace/memory/notes.md", "# notes");
}

/// Provider handing out seeded mock sandboxes and remembering them.
#[derive(Default)]
pub struct MockProvider {
    created: Mutex<Vec<Arc<MockSandbox>>>,
}

impl MockProvider {
    pub fn sandbox(&self, tenant_id: &str) -> Arc<MockSandbox> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.sandbox_id() == tenant_id)
            .cloned()
            .expect("sandbox should have been created")
    }
}

impl SandboxProvider for MockProvider {
    fn sandbox_for(&self, tenant_id: &str) -> Result<Arc<dyn Sandbox>, Error> {
        let sandbox = Arc::new(MockSandbox::new(tenant_id));
        seed(&sandbox);
        self.created.lock().unwrap().push(sandbox.clone());
        Ok(sandbox)
    }
}
