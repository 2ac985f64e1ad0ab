// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Dispatcher - route then deliver
//!
//! The one outbound path for messages entering the fabric, shared by the hub
//! and the workflow coordinator.

use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;

use crate::application::delivery::{DeliveryError, DeliveryManager, DeliveryTicket};
use crate::application::router::{MessageRouter, RoutingError};
use crate::domain::agent::AgentId;
use crate::domain::delivery::{DeliveryOutcome, ResolvedTarget};
use crate::domain::message::{AgentMessage, MessageError, MessageId};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Invalid(#[from] MessageError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Accepted message: its resolved targets and one ticket per target
pub struct Dispatched {
    pub message_id: MessageId,
    pub targets: Vec<ResolvedTarget>,
    pub tickets: Vec<DeliveryTicket>,
}

impl Dispatched {
    /// Wait for every target's terminal outcome
    pub async fn outcomes(self) -> Vec<(AgentId, DeliveryOutcome)> {
        join_all(self.tickets.into_iter().map(|ticket| async move {
            let target = ticket.target().clone();
            (target, ticket.outcome().await)
        }))
        .await
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    router: Arc<MessageRouter>,
    delivery: DeliveryManager,
}

impl Dispatcher {
    pub fn new(router: Arc<MessageRouter>, delivery: DeliveryManager) -> Self {
        Self { router, delivery }
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn delivery(&self) -> &DeliveryManager {
        &self.delivery
    }

    /// Validate, route and hand every resolved target to the delivery
    /// manager. `UnknownAgent` fails here, before any attempt.
    pub fn dispatch(&self, message: AgentMessage) -> Result<Dispatched, DispatchError> {
        message.validate()?;
        let targets = self.router.route(&message)?;

        let message = Arc::new(message);
        let tickets = targets
            .iter()
            .map(|target| self.delivery.deliver(message.clone(), target.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Dispatched {
            message_id: message.id,
            targets,
            tickets,
        })
    }
}
