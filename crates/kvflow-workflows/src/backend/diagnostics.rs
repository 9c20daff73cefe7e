//! Read-only introspection for operator tooling

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::Backend;
use crate::error::{BackendError, StorageResultExt};
use crate::model::{
    EventAttributes, HistoryEvent, Queue, WorkflowInstance, WorkflowInstanceState,
};
use crate::store::WorkflowInstanceRecord;

/// Summary of one instance execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstanceRef {
    pub instance: WorkflowInstance,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub state: WorkflowInstanceState,
    pub queue: Queue,
}

impl From<WorkflowInstanceRecord> for WorkflowInstanceRef {
    fn from(record: WorkflowInstanceRecord) -> Self {
        Self {
            instance: record.instance,
            created_at: record.created_at,
            completed_at: record.finished_at,
            state: record.state,
            queue: record.queue,
        }
    }
}

/// An execution with the sub-workflows it scheduled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstanceTree {
    #[serde(flatten)]
    pub instance: WorkflowInstanceRef,
    /// Name from the execution-started event, empty if history is gone
    pub workflow_name: String,
    pub children: Vec<WorkflowInstanceTree>,
}

#[async_trait]
pub trait DiagnosticsBackend: Send + Sync {
    async fn get_workflow_instance(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<WorkflowInstanceRef, BackendError>;

    /// Page through executions newest first, starting after `after`
    /// (instance id, execution id)
    async fn get_workflow_instances(
        &self,
        after: Option<(&str, &str)>,
        count: usize,
    ) -> Result<Vec<WorkflowInstanceRef>, BackendError>;

    async fn get_workflow_tree(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<WorkflowInstanceTree, BackendError>;

    /// Pending events not yet visible, e.g. timers that have not fired
    async fn get_future_events(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<Vec<HistoryEvent>, BackendError>;
}

impl Backend {
    fn build_tree<'a>(
        &'a self,
        instance: &'a WorkflowInstance,
    ) -> BoxFuture<'a, Result<WorkflowInstanceTree, BackendError>> {
        async move {
            let root = self.get_workflow_instance(instance).await?;
            let history = self.instance_history(instance, None).await?;

            let mut workflow_name = String::new();
            let mut children = Vec::new();
            for event in &history {
                match &event.attributes {
                    EventAttributes::WorkflowExecutionStarted { name, .. } => {
                        workflow_name = name.clone();
                    }
                    EventAttributes::SubWorkflowScheduled {
                        sub_workflow_instance,
                        ..
                    } => match self.build_tree(sub_workflow_instance).await {
                        Ok(child) => children.push(child),
                        // removed children are simply absent from the tree
                        Err(BackendError::InstanceNotFound) => {}
                        Err(err) => return Err(err),
                    },
                    _ => {}
                }
            }

            Ok(WorkflowInstanceTree {
                instance: root,
                workflow_name,
                children,
            })
        }
        .boxed()
    }
}

#[async_trait]
impl DiagnosticsBackend for Backend {
    async fn get_workflow_instance(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<WorkflowInstanceRef, BackendError> {
        self.store
            .instances
            .get(&instance.instance_id, &instance.execution_id)
            .exec_opt()
            .await
            .context("get workflow instance")?
            .map(WorkflowInstanceRef::from)
            .ok_or(BackendError::InstanceNotFound)
    }

    #[instrument(skip(self))]
    async fn get_workflow_instances(
        &self,
        after: Option<(&str, &str)>,
        count: usize,
    ) -> Result<Vec<WorkflowInstanceRef>, BackendError> {
        let records = self
            .store
            .instances
            .get_all()
            .exec()
            .await
            .context("get all workflow instances")?;

        let start = match after {
            Some((iid, eid)) => records
                .iter()
                .position(|r| r.instance.instance_id == iid && r.instance.execution_id == eid)
                .map_or(0, |idx| idx + 1),
            None => 0,
        };

        Ok(records
            .into_iter()
            .skip(start)
            .take(count)
            .map(WorkflowInstanceRef::from)
            .collect())
    }

    #[instrument(skip(self), fields(instance = %instance))]
    async fn get_workflow_tree(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<WorkflowInstanceTree, BackendError> {
        self.build_tree(instance).await
    }

    async fn get_future_events(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<Vec<HistoryEvent>, BackendError> {
        let now = Utc::now();
        let pending = self
            .store
            .pending_events
            .get_sorted(&instance.instance_id, &instance.execution_id)
            .await
            .context("get future events")?;
        Ok(pending
            .into_iter()
            .map(|record| record.event)
            .filter(|event| !event.is_visible_at(now))
            .collect())
    }
}
