// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the workflow aggregates: one repository per
//! aggregate, interface defined in the domain layer, implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `WorkflowDefinitionRepository` | `WorkflowDefinition` | `InMemoryWorkflowDefinitionRepository` |
//! | `WorkflowInstanceRepository` | `WorkflowInstance` | `InMemoryWorkflowInstanceRepository` |
//!
//! Finished instances are retained for audit until `purge_finished` is
//! called by whatever retention policy the operator runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::workflow::{
    WorkflowDefinition, WorkflowDefinitionId, WorkflowInstance, WorkflowInstanceId, WorkflowStatus,
};

#[async_trait]
pub trait WorkflowDefinitionRepository: Send + Sync {
    /// Save definition (create or replace)
    async fn save(&self, definition: &WorkflowDefinition) -> Result<(), RepositoryError>;

    async fn find_by_id(
        &self,
        id: &WorkflowDefinitionId,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError>;

    async fn delete(&self, id: &WorkflowDefinitionId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait WorkflowInstanceRepository: Send + Sync {
    /// Save instance (create or update)
    async fn save(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError>;

    async fn find_by_id(
        &self,
        id: WorkflowInstanceId,
    ) -> Result<Option<WorkflowInstance>, RepositoryError>;

    async fn find_by_status(
        &self,
        status: WorkflowStatus,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<WorkflowInstance>, RepositoryError>;

    /// Delete terminal instances that ended before `older_than`; returns the
    /// number removed.
    async fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<usize, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
