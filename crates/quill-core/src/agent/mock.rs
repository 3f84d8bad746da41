// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Mutex;

use super::{AgentDriver, AgentError, AgentInvocation, AgentOutcome};

/// One scripted behaviour for the mock driver.
pub enum MockBehaviour {
    /// Write the given files (relative to the working directory) and
    /// report them as created, with the given answer.
    CreateFiles {
        files: Vec<(String, String)>,
        answer: String,
    },
    /// Answer without touching the tree.
    Answer(String),
    /// Fail with the given error.
    Fail(fn() -> AgentError),
}

/// Scripted agent driver for service-level tests.  Each run pops the next
/// behaviour; when the script is exhausted, runs answer with a fixed
/// marker.
pub struct MockAgentDriver {
    behaviours: Mutex<Vec<MockBehaviour>>,
    /// Invocations seen, for assertions.
    pub invocations: Mutex<Vec<AgentInvocation>>,
}

impl MockAgentDriver {
    pub fn new(behaviours: Vec<MockBehaviour>) -> Self {
        Self {
            behaviours: Mutex::new(behaviours),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Driver that creates one note file per run.
    pub fn creating(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(vec![MockBehaviour::CreateFiles {
            files: vec![(path.into(), content.into())],
            answer: "note saved".into(),
        }])
    }

    /// Driver that only answers.
    pub fn answering(text: impl Into<String>) -> Self {
        Self::new(vec![MockBehaviour::Answer(text.into())])
    }
}

#[async_trait::async_trait]
impl AgentDriver for MockAgentDriver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn run(&self, invocation: AgentInvocation) -> Result<AgentOutcome, AgentError> {
        let behaviour = {
            let mut scripts = self.behaviours.lock().unwrap();
            if scripts.is_empty() {
                MockBehaviour::Answer("[no more scripts]".into())
            } else {
                scripts.remove(0)
            }
        };

        let result = match behaviour {
            MockBehaviour::Answer(answer) => Ok(AgentOutcome {
                answer,
                iterations: 1,
                ..Default::default()
            }),
            MockBehaviour::CreateFiles { files, answer } => {
                let prefix = invocation
                    .working_dir
                    .strip_prefix(&invocation.kb_root)
                    .unwrap_or_else(|_| std::path::Path::new(""))
                    .to_path_buf();
                let mut created = Vec::new();
                for (rel, content) in files {
                    let abs = invocation.working_dir.join(&rel);
                    if let Some(parent) = abs.parent() {
                        std::fs::create_dir_all(parent)
                            .map_err(|e| AgentError::Io(e.to_string()))?;
                    }
                    std::fs::write(&abs, content).map_err(|e| AgentError::Io(e.to_string()))?;
                    created.push(prefix.join(&rel).to_string_lossy().to_string());
                }
                Ok(AgentOutcome {
                    answer,
                    files_created: created,
                    iterations: 1,
                    ..Default::default()
                })
            }
            MockBehaviour::Fail(make) => Err(make()),
        };

        self.invocations.lock().unwrap().push(invocation);
        result
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
