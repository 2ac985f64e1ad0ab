// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the quorum CLI

pub mod config;
pub mod events;
pub mod run;
pub mod status;
pub mod workflow;

pub use self::config::ConfigCommand;
pub use self::events::EventsCommand;
pub use self::run::RunArgs;
pub use self::status::StatusCommand;
pub use self::workflow::WorkflowCommand;
