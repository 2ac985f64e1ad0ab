// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository abstractions defined in
//! the domain layer, following the Repository pattern from DDD.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve workflow aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **InMemoryWorkflowDefinitionRepository** - Definition cache
//! - **InMemoryWorkflowInstanceRepository** - Instance state retained for audit

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::repository::{
    RepositoryError, WorkflowDefinitionRepository, WorkflowInstanceRepository,
};
use crate::domain::workflow::{
    WorkflowDefinition, WorkflowDefinitionId, WorkflowInstance, WorkflowInstanceId, WorkflowStatus,
};

#[derive(Clone, Default)]
pub struct InMemoryWorkflowDefinitionRepository {
    definitions: Arc<RwLock<HashMap<WorkflowDefinitionId, WorkflowDefinition>>>,
}

impl InMemoryWorkflowDefinitionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowDefinitionRepository for InMemoryWorkflowDefinitionRepository {
    async fn save(&self, definition: &WorkflowDefinition) -> Result<(), RepositoryError> {
        self.definitions
            .write()
            .insert(definition.id.clone(), definition.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &WorkflowDefinitionId,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.definitions.read().get(id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut definitions: Vec<_> = self.definitions.read().values().cloned().collect();
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(definitions)
    }

    async fn delete(&self, id: &WorkflowDefinitionId) -> Result<(), RepositoryError> {
        self.definitions
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryWorkflowInstanceRepository {
    instances: Arc<RwLock<HashMap<WorkflowInstanceId, WorkflowInstance>>>,
}

impl InMemoryWorkflowInstanceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowInstanceRepository for InMemoryWorkflowInstanceRepository {
    async fn save(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError> {
        self.instances.write().insert(instance.id, instance.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: WorkflowInstanceId,
    ) -> Result<Option<WorkflowInstance>, RepositoryError> {
        Ok(self.instances.read().get(&id).cloned())
    }

    async fn find_by_status(
        &self,
        status: WorkflowStatus,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        Ok(self
            .instances
            .read()
            .values()
            .filter(|i| i.status == status)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let mut instances: Vec<_> = self.instances.read().values().cloned().collect();
        instances.sort_by_key(|i| i.created_at);
        Ok(instances)
    }

    async fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let mut instances = self.instances.write();
        let before = instances.len();
        instances.retain(|_, i| {
            !(i.status.is_terminal() && i.ended_at.is_some_and(|ended| ended < older_than))
        });
        Ok(before - instances.len())
    }
}
