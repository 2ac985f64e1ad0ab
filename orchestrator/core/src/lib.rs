// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Quorum Core
//!
//! Communication and coordination substrate for fleets of autonomous agents:
//! routing, reliable delivery, request/response correlation, an append-only
//! event store with replay, status snapshot synchronization and workflow
//! sequencing with rollback.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** `domain` holds pure types and state machines,
//!   `application` the coordinating services, `infrastructure` the event
//!   store, transports, file watching, parsers and repositories

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
pub use application::{CoordinationHub, HubError, Submitted};
