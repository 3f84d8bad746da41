// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// quill — chat-driven, Git-backed Markdown knowledge base.
#[derive(Parser, Debug)]
#[command(name = "quill", version, about)]
pub struct Cli {
    /// Explicit config file (merged over the discovered layers).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr in addition to the log file.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the bot: console transport, aggregator, router, and (unless an
    /// external hub URL is configured) a bundled MCP hub child process.
    Run,

    /// Run the MCP hub standalone.
    ///
    /// This is also what the bot spawns in bundled mode.  The hub owns the
    /// per-user memory stores, the vector indexes, the external-server
    /// registry, and writes its own client-config artifacts at startup.
    Hub {
        /// Port to listen on (127.0.0.1 only).
        #[arg(long, default_value_t = 8765)]
        port: u16,
        /// Data directory root.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
        /// Log directory.
        #[arg(long, default_value = "logs")]
        log_dir: PathBuf,
    },

    /// Validate the configuration layers and print the effective settings.
    CheckConfig,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
