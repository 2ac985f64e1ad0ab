// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod correlation;
pub mod delivery;
pub mod dispatch;
pub mod hub;
pub mod router;
pub mod status_sync;
pub mod workflow_coordinator;

// Re-export services for convenience
pub use correlation::{CorrelationError, CorrelationTracker, ResponseWaiter};
pub use delivery::{DeliveryError, DeliveryManager, DeliverySettings, DeliveryTicket};
pub use dispatch::{DispatchError, Dispatched, Dispatcher};
pub use hub::{CoordinationHub, HubError, Submitted};
pub use router::{MessageRouter, RegistrySnapshot, RoutingError};
pub use status_sync::StatusSynchronizer;
pub use workflow_coordinator::{CoordinatorError, WorkflowCoordinator};
