// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Built-in tools, grouped by concern.  Availability per service mode:
//!
//! | tool | note | ask | task |
//! |---|---|---|---|
//! | file_create / file_edit / file_move | ✓ | | ✓ |
//! | folder_create / folder_move | ✓ | | ✓ |
//! | file_delete / folder_delete | | | ✓ |
//! | kb_read | ✓ | ✓ | ✓ |
//! | kb_list | | ✓ | ✓ |
//! | kb_vector_search / web_search | ✓ | ✓ | ✓ |
//! | mcp_memory_store / list_categories | ✓ | | ✓ |
//! | mcp_memory_retrieve | ✓ | ✓ | ✓ |
//! | git_command / github_api / plan_todo | | | ✓ |

mod folders;
mod fs_tools;
mod git_cmd;
mod github;
mod hub_tools;
mod kb_read;
mod plan;
mod web_search;

pub use folders::{FolderCreateTool, FolderDeleteTool, FolderMoveTool};
pub use fs_tools::{FileCreateTool, FileDeleteTool, FileEditTool, FileMoveTool};
pub use git_cmd::GitCommandTool;
pub use github::GithubApiTool;
pub use hub_tools::{
    KbVectorSearchTool, MemoryListCategoriesTool, MemoryRetrieveTool, MemoryStoreTool,
};
pub use kb_read::{KbListTool, KbReadTool};
pub use plan::PlanTodoTool;
pub use web_search::WebSearchTool;

use quill_config::ServiceMode;

pub(crate) const ALL_MODES: &[ServiceMode] =
    &[ServiceMode::Note, ServiceMode::Ask, ServiceMode::Task];
pub(crate) const NOTE_TASK: &[ServiceMode] = &[ServiceMode::Note, ServiceMode::Task];
pub(crate) const ASK_TASK: &[ServiceMode] = &[ServiceMode::Ask, ServiceMode::Task];
pub(crate) const TASK_ONLY: &[ServiceMode] = &[ServiceMode::Task];
