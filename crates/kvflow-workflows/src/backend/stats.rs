use chrono::Utc;
use tracing::instrument;

use super::Backend;
use crate::error::{BackendError, StorageResultExt};
use crate::model::Stats;

impl Backend {
    /// Point-in-time scan; nothing here is a maintained counter
    #[instrument(skip(self))]
    pub(super) async fn collect_stats(&self) -> Result<Stats, BackendError> {
        let now = Utc::now();
        let mut stats = Stats::default();

        let items = self
            .store
            .workflow_queue
            .get_all()
            .exec()
            .await
            .context("get queued workflow instances")?;
        // every queued instance is active
        stats.active_workflow_instances = items.len() as i64;

        for item in &items {
            let (iid, eid) = (&item.instance.instance_id, &item.instance.execution_id);
            let locked = self
                .store
                .workflow_locks
                .exists(iid, eid)
                .exec()
                .await
                .context("check workflow instance lock")?;
            if locked {
                continue;
            }

            let events = self
                .store
                .pending_events
                .get_by_execution(iid, eid)
                .exec()
                .await
                .context("get pending events")?;
            if events.iter().any(|record| record.event.is_visible_at(now)) {
                *stats
                    .pending_workflow_tasks
                    .entry(item.queue.clone())
                    .or_default() += 1;
            }
        }

        let activities = self
            .store
            .activity_queue
            .get_all()
            .exec()
            .await
            .context("get queued activities")?;
        for activity in activities {
            *stats.pending_activity_tasks.entry(activity.queue).or_default() += 1;
        }

        Ok(stats)
    }
}
