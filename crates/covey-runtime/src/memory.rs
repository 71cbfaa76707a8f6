// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use tracing::warn;

use crate::hooks::{HookSubscriber, RunEndEvent};

/// Appends one durable line per completed run to a per-agent memory file.
///
/// The file format is deliberately plain (`<timestamp>\t<status>\t<first
/// output line>`): memory files are read back into system prompts by the
/// hosting application, and plain lines survive format drift.
pub struct MemoryCapture {
    root: PathBuf,
}

impl MemoryCapture {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn append_line(&self, agent_id: &str, line: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.root.join(format!("{agent_id}.log"));
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(f, "{line}")
    }
}

impl HookSubscriber for MemoryCapture {
    fn name(&self) -> &str {
        "memory-capture"
    }

    fn run_end(&self, ev: &mut RunEndEvent<'_>) {
        let first_line = ev.output.lines().next().unwrap_or("");
        let line = format!(
            "{}\t{}\t{}",
            chrono::Utc::now().to_rfc3339(),
            ev.status,
            first_line
        );
        if let Err(e) = self.append_line(ev.agent_id, &line) {
            warn!(agent_id = %ev.agent_id, error = %e, "memory capture append failed");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_line_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let capture = MemoryCapture::new(dir.path());

        for i in 0..2 {
            let mut out = format!("run {i} output\nsecond line");
            let mut ev = crate::hooks::RunEndEvent {
                run_id: "r",
                agent_id: "scribe",
                status: "completed",
                duration_ms: 1,
                output: &mut out,
            };
            capture.run_end(&mut ev);
        }

        let content = std::fs::read_to_string(dir.path().join("scribe.log")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("run 0 output"));
        assert!(lines[1].contains("completed"));
    }

    #[test]
    fn separate_agents_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let capture = MemoryCapture::new(dir.path());
        for agent in ["a", "b"] {
            let mut out = "x".to_string();
            let mut ev = crate::hooks::RunEndEvent {
                run_id: "r",
                agent_id: agent,
                status: "completed",
                duration_ms: 1,
                output: &mut out,
            };
            capture.run_end(&mut ev);
        }
        assert!(dir.path().join("a.log").exists());
        assert!(dir.path().join("b.log").exists());
    }
}
