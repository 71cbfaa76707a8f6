// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use crate::hooks::{HookSubscriber, ResponseStreamEvent, RunEndEvent};

const MASK: &str = "[redacted]";

/// Masks configured secret values in every outbound string.
///
/// Secret values live only in memory — they are passed in at construction
/// and never serialized.  Redaction is plain substring replacement: the
/// placeholder substitution in tool arguments means the literal values can
/// surface in model output, and masking on the way out is the last line of
/// defence before text reaches logs or the user.
pub struct SecretRedactor {
    secrets: Vec<String>,
}

impl SecretRedactor {
    pub fn new(secrets: Vec<String>) -> Self {
        // Empty strings would make `replace` loop over every position.
        let secrets = secrets.into_iter().filter(|s| !s.is_empty()).collect();
        Self { secrets }
    }

    pub fn mask(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.secrets {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), MASK);
            }
        }
        out
    }
}

impl HookSubscriber for SecretRedactor {
    fn name(&self) -> &str {
        "secret-redactor"
    }

    fn response_stream(&self, ev: &mut ResponseStreamEvent<'_>) {
        let masked = self.mask(ev.chunk);
        if masked != *ev.chunk {
            *ev.chunk = masked;
        }
    }

    fn run_end(&self, ev: &mut RunEndEvent<'_>) {
        let masked = self.mask(ev.output);
        if masked != *ev.output {
            *ev.output = masked;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
