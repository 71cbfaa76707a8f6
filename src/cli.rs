// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "covey", about = "Agent execution core: single agents, squads, sub-agents")]
pub struct Cli {
    /// Path to the config file (default: ~/.config/covey/config.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr (honours RUST_LOG filtering)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one agent turn and print the assistant reply
    Run {
        /// Agent id from the config file
        #[arg(long)]
        agent: String,
        /// Grant privileged tools (shell) for this run
        #[arg(long)]
        grant_access: bool,
        /// The user prompt
        prompt: Vec<String>,
    },
    /// Drive a squad toward a goal
    Squad {
        /// Squad id from the config file
        #[arg(long)]
        squad: String,
        /// Grant privileged tools to workers for this session
        #[arg(long)]
        grant_access: bool,
        /// The user request handed to the director
        goal: Vec<String>,
    },
    /// List persisted sub-agent runs
    Runs,
    /// Print the resolved configuration
    ShowConfig,
    /// Print the bundled model catalog
    ListModels {
        /// Only list models for one provider
        #[arg(long)]
        provider: Option<String>,
    },
}
