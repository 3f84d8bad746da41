// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The chat boundary.
//!
//! Platform events are converted to [`IncomingEvent`] DTOs at the first
//! boundary; everything downstream works with ids and primitive fields and
//! never sees a platform message object.  Outbound traffic goes through
//! the minimal [`ChatPort`] trait (send, edit, document, delete), which a
//! concrete transport implements.

pub mod command;
pub mod console;
pub mod event;
pub mod memory;
pub mod port;

pub use command::{parse_command, Command, CredsAction, McpAction};
pub use console::ConsolePort;
pub use event::{ContentType, ForwardOrigin, IncomingEvent, MediaKind, MediaRef};
pub use memory::InMemoryChatPort;
pub use port::{ChatError, ChatPort};
