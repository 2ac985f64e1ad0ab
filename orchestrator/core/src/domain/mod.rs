// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Pure coordination types and state machines. Nothing in this layer performs
//! I/O or spawns tasks.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Messages, routing targets, events, snapshots, workflows

pub mod agent;
pub mod config;
pub mod delivery;
pub mod events;
pub mod message;
pub mod phase;
pub mod repository;
pub mod status;
pub mod topic;
pub mod workflow;
