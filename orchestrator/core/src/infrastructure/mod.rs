// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_journal;
pub mod event_store;
pub mod repositories;
pub mod status_parser;
pub mod status_watcher;
pub mod transport;
pub mod workflow_parser;

pub use event_store::{EventHandler, EventStore, EventStoreError, EventSubscription, OffsetTracker};
pub use transport::{InMemoryTransport, Mailbox};
