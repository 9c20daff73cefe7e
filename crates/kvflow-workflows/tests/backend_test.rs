//! Backend behaviour against the in-memory store
//!
//! Run with: cargo test -p kvflow-workflows --test backend_test

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kvflow_storage::MemoryKv;
use serde_json::json;

use kvflow_workflows::prelude::*;

fn backend(kv: &Arc<MemoryKv>, worker_id: &str) -> Backend {
    Backend::new(kv.clone(), BackendOptions::new("test", worker_id))
}

fn started(name: &str, queue: &str) -> HistoryEvent {
    HistoryEvent::new(EventAttributes::WorkflowExecutionStarted {
        name: name.to_string(),
        queue: Queue::new(queue),
        metadata: Default::default(),
        inputs: vec![json!({"n": 1})],
    })
}

fn signal(name: &str) -> HistoryEvent {
    HistoryEvent::new(EventAttributes::SignalReceived {
        name: name.to_string(),
        arg: None,
    })
}

/// New events of `task` followed by `extra`, numbered after the task's
/// last sequence id
fn sequenced(task: &WorkflowTask, extra: Vec<HistoryEvent>) -> Vec<HistoryEvent> {
    task.new_events
        .iter()
        .cloned()
        .chain(extra)
        .enumerate()
        .map(|(idx, event)| event.with_sequence_id(task.last_sequence_id + 1 + idx as i64))
        .collect()
}

async fn create(backend: &Backend, instance_id: &str) -> WorkflowInstance {
    let instance = WorkflowInstance::start(instance_id);
    backend
        .create_workflow_instance(&instance, &started("wf", Queue::DEFAULT))
        .await
        .unwrap();
    instance
}

async fn claim(backend: &Backend) -> WorkflowTask {
    backend
        .get_workflow_task(&[Queue::default()])
        .await
        .unwrap()
        .expect("expected a workflow task")
}

/// Apply the task's new events and move the instance to `state`
async fn complete(backend: &Backend, task: &WorkflowTask, state: WorkflowInstanceState) {
    backend
        .complete_workflow_task(task, state, &sequenced(task, vec![]), &[], &[], &[])
        .await
        .unwrap();
}

// ============================================
// Lifecycle
// ============================================

#[test_log::test(tokio::test)]
async fn test_create_rejects_second_active_execution() {
    let kv = Arc::new(MemoryKv::new());
    let backend = backend(&kv, "w1");
    let instance = create(&backend, "wf-1").await;

    let again = WorkflowInstance::start("wf-1");
    let err = backend
        .create_workflow_instance(&again, &started("wf", Queue::DEFAULT))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InstanceAlreadyExists));

    let state = backend.get_workflow_instance_state(&instance).await.unwrap();
    assert_eq!(state, WorkflowInstanceState::Active);
}

#[test_log::test(tokio::test)]
async fn test_create_requires_start_event() {
    let kv = Arc::new(MemoryKv::new());
    let backend = backend(&kv, "w1");

    let err = backend
        .create_workflow_instance(&WorkflowInstance::start("wf-1"), &signal("go"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidEvent(kind) if kind == "signal_received"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_have_one_winner() {
    let kv = Arc::new(MemoryKv::new());
    let backend = Arc::new(backend(&kv, "w1"));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let backend = backend.clone();
            tokio::spawn(async move {
                backend
                    .create_workflow_instance(
                        &WorkflowInstance::start("wf-1"),
                        &started("wf", Queue::DEFAULT),
                    )
                    .await
            })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => created += 1,
            Err(BackendError::InstanceAlreadyExists) => {}
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    assert_eq!(created, 1);

    let records = backend
        .store()
        .instances
        .get_by_instance_id("wf-1")
        .exec()
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_cancel_and_signal() {
    let kv = Arc::new(MemoryKv::new());
    let backend = backend(&kv, "w1");

    let missing = WorkflowInstance::start("nope");
    let cancel = HistoryEvent::new(EventAttributes::WorkflowExecutionCanceled);
    assert!(matches!(
        backend.cancel_workflow_instance(&missing, &cancel).await,
        Err(BackendError::InstanceNotFound)
    ));
    assert!(matches!(
        backend.signal_workflow("nope", &signal("go")).await,
        Err(BackendError::InstanceNotFound)
    ));

    let instance = create(&backend, "wf-1").await;
    backend.signal_workflow("wf-1", &signal("go")).await.unwrap();
    backend
        .cancel_workflow_instance(&instance, &cancel)
        .await
        .unwrap();

    let task = claim(&backend).await;
    let kinds: Vec<_> = task.new_events.iter().map(HistoryEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![
            "workflow_execution_started",
            "signal_received",
            "workflow_execution_canceled"
        ]
    );
}

#[test_log::test(tokio::test)]
async fn test_history_resumes_from_watermark() {
    let kv = Arc::new(MemoryKv::new());
    let backend = backend(&kv, "w1");
    let instance = create(&backend, "wf-1").await;

    let task = claim(&backend).await;
    assert_eq!(task.last_sequence_id, 0);
    let executed = sequenced(&task, vec![signal("local")]);
    backend
        .complete_workflow_task(&task, WorkflowInstanceState::Active, &executed, &[], &[], &[])
        .await
        .unwrap();

    let all = backend
        .get_workflow_instance_history(&instance, None)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].sequence_id, 1);

    let rest = backend
        .get_workflow_instance_history(&instance, Some(1))
        .await
        .unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].sequence_id, 2);
}

#[test_log::test(tokio::test)]
async fn test_remove_instance() {
    let kv = Arc::new(MemoryKv::new());
    let backend = backend(&kv, "w1");

    assert!(matches!(
        backend
            .remove_workflow_instance(&WorkflowInstance::start("nope"))
            .await,
        Err(BackendError::InstanceNotFound)
    ));

    let instance = create(&backend, "wf-1").await;
    assert!(matches!(
        backend.remove_workflow_instance(&instance).await,
        Err(BackendError::InstanceNotFinished)
    ));

    let task = claim(&backend).await;
    complete(&backend, &task, WorkflowInstanceState::Finished).await;
    backend.remove_workflow_instance(&instance).await.unwrap();

    assert!(matches!(
        backend.get_workflow_instance_state(&instance).await,
        Err(BackendError::InstanceNotFound)
    ));
    let history = backend
        .get_workflow_instance_history(&instance, None)
        .await
        .unwrap();
    assert!(history.is_empty());

    // the instance id is free again
    create(&backend, "wf-1").await;
}

#[test_log::test(tokio::test)]
async fn test_bulk_remove_skips_active_instances() {
    let kv = Arc::new(MemoryKv::new());
    let backend = backend(&kv, "w1");
    for id in ["wf-a", "wf-b", "wf-c"] {
        create(&backend, id).await;
    }
    for _ in 0..2 {
        let task = claim(&backend).await;
        complete(&backend, &task, WorkflowInstanceState::Finished).await;
    }

    let past = Utc::now() - chrono::Duration::hours(1);
    let removed = backend
        .remove_workflow_instances(RemovalOptions::default().with_finished_before(past))
        .await
        .unwrap();
    assert_eq!(removed, 0);

    let removed = backend
        .remove_workflow_instances(RemovalOptions::default().with_batch_size(1))
        .await
        .unwrap();
    assert_eq!(removed, 2);

    let remaining = backend.store().instances.get_all().exec().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].instance.instance_id, "wf-c");
    assert_eq!(remaining[0].state, WorkflowInstanceState::Active);
}

// ============================================
// Dispatch
// ============================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_one_winner() {
    let kv = Arc::new(MemoryKv::new());
    create(&backend(&kv, "creator"), "wf-1").await;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let worker = backend(&kv, &format!("w{i}"));
            tokio::spawn(async move { worker.get_workflow_task(&[Queue::default()]).await })
        })
        .collect();

    let mut claimed = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_some() {
            claimed += 1;
        }
    }
    assert_eq!(claimed, 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_expired_lock_frees_instance() {
    let kv = Arc::new(MemoryKv::new());
    let options = |worker: &str| {
        BackendOptions::new("test", worker)
            .with_workflow_lock_timeout(Duration::from_secs(10))
            .with_sticky_timeout(Duration::from_secs(5))
    };
    let a = Backend::new(kv.clone(), options("a"));
    let b = Backend::new(kv.clone(), options("b"));
    create(&a, "wf-1").await;

    let task = claim(&a).await;
    assert!(b.get_workflow_task(&[Queue::default()]).await.unwrap().is_none());

    tokio::time::advance(Duration::from_secs(11)).await;

    let stolen = claim(&b).await;
    assert_eq!(stolen.instance, task.instance);
    assert_eq!(stolen.new_events, task.new_events);

    // a no longer holds the claim and must not commit
    assert!(matches!(
        a.complete_workflow_task(
            &task,
            WorkflowInstanceState::Active,
            &sequenced(&task, vec![]),
            &[],
            &[],
            &[]
        )
        .await,
        Err(BackendError::LockLost(_))
    ));
    assert!(matches!(
        a.extend_workflow_task(&task).await,
        Err(BackendError::LockLost(_))
    ));
}

#[test_log::test(tokio::test)]
async fn test_duplicate_completion_is_rejected() {
    let kv = Arc::new(MemoryKv::new());
    let backend = backend(&kv, "w1");
    let instance = create(&backend, "wf-1").await;

    let task = claim(&backend).await;
    backend.extend_workflow_task(&task).await.unwrap();
    complete(&backend, &task, WorkflowInstanceState::Active).await;

    let executed = sequenced(&task, vec![]);
    let err = backend
        .complete_workflow_task(&task, WorkflowInstanceState::Active, &executed, &[], &[], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::LockLost(_)));

    let history = backend
        .get_workflow_instance_history(&instance, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_sticky_routing_keeps_instance_on_worker() {
    let kv = Arc::new(MemoryKv::new());
    let a = backend(&kv, "a");
    let b = backend(&kv, "b");
    let queue = Queue::new("q");
    let instance = WorkflowInstance::new("wf-1", "exec-1");
    a.create_workflow_instance(&instance, &started("wf", "q"))
        .await
        .unwrap();

    let task = a.get_workflow_task(&[queue.clone()]).await.unwrap().unwrap();
    assert_eq!(task.queue, queue);
    assert!(task.new_events[0].attributes.starts_execution());
    a.complete_workflow_task(
        &task,
        WorkflowInstanceState::Active,
        &sequenced(&task, vec![]),
        &[],
        &[],
        &[],
    )
    .await
    .unwrap();

    assert!(b.get_workflow_task(&[queue.clone()]).await.unwrap().is_none());

    a.signal_workflow("wf-1", &signal("next")).await.unwrap();
    assert!(b.get_workflow_task(&[queue.clone()]).await.unwrap().is_none());

    let next = a.get_workflow_task(&[queue]).await.unwrap().unwrap();
    assert_eq!(next.last_sequence_id, 1);
    assert_eq!(next.new_events.len(), 1);
    assert_eq!(next.new_events[0].kind(), "signal_received");
}

#[test_log::test(tokio::test)]
async fn test_restarted_worker_reclaims_its_locks() {
    let kv = Arc::new(MemoryKv::new());
    let before_restart = backend(&kv, "w1");
    let after_restart = backend(&kv, "w1");
    let other = backend(&kv, "w2");
    create(&before_restart, "wf-1").await;

    let task = claim(&before_restart).await;
    assert!(other.get_workflow_task(&[Queue::default()]).await.unwrap().is_none());

    let reclaimed = claim(&after_restart).await;
    assert_eq!(reclaimed.instance, task.instance);

    assert!(matches!(
        before_restart.extend_workflow_task(&task).await,
        Err(BackendError::LockLost(_))
    ));
    complete(&after_restart, &reclaimed, WorkflowInstanceState::Finished).await;
}

#[test_log::test(tokio::test)]
async fn test_scan_budget_limits_dispatch() {
    let kv = Arc::new(MemoryKv::new());
    let unbounded = backend(&kv, "p");
    let bounded = Backend::new(
        kv.clone(),
        BackendOptions::new("test", "q").with_max_scan_items(1),
    );
    create(&unbounded, "a").await;
    create(&unbounded, "b").await;

    let first = claim(&unbounded).await;
    assert_eq!(first.instance.instance_id, "a");

    assert!(bounded.get_workflow_task(&[Queue::default()]).await.unwrap().is_none());
    let second = claim(&backend(&kv, "r")).await;
    assert_eq!(second.instance.instance_id, "b");
}

// ============================================
// Completion
// ============================================

#[test_log::test(tokio::test)]
async fn test_activity_round_trip() {
    let kv = Arc::new(MemoryKv::new());
    let backend = backend(&kv, "w1");
    let other = self::backend(&kv, "w2");
    let instance = create(&backend, "wf-1").await;

    let task = claim(&backend).await;
    let scheduled = HistoryEvent::new(EventAttributes::ActivityScheduled {
        name: "charge".into(),
        queue: Queue::unset(),
        inputs: vec![],
    })
    .with_schedule_event_id(2);
    let executed = sequenced(&task, vec![scheduled.clone()]);
    backend
        .complete_workflow_task(
            &task,
            WorkflowInstanceState::Active,
            &executed,
            &[scheduled.clone()],
            &[],
            &[],
        )
        .await
        .unwrap();

    let stats = backend.get_stats().await.unwrap();
    assert_eq!(stats.pending_activity_tasks.get(&Queue::default()), Some(&1));

    let activity = other
        .get_activity_task(&[Queue::default()])
        .await
        .unwrap()
        .expect("expected an activity task");
    assert_eq!(activity.activity_id, scheduled.id);
    assert_eq!(activity.queue, Queue::default());
    assert!(activity.instance.same_execution(&instance));
    assert!(backend
        .get_activity_task(&[Queue::default()])
        .await
        .unwrap()
        .is_none());

    other.extend_activity_task(&activity).await.unwrap();
    let result = HistoryEvent::new(EventAttributes::ActivityCompleted {
        result: Some(json!("ok")),
    })
    .with_schedule_event_id(2);
    other.complete_activity_task(&activity, &result).await.unwrap();

    assert!(matches!(
        other.complete_activity_task(&activity, &result).await,
        Err(BackendError::ActivityNotFound(_))
    ));

    let next = claim(&backend).await;
    assert_eq!(next.new_events, vec![result]);
    assert_eq!(next.last_sequence_id, 2);
}

#[test_log::test(tokio::test)]
async fn test_future_timer_is_not_dispatched() {
    let kv = Arc::new(MemoryKv::new());
    let backend = backend(&kv, "w1");
    let instance = create(&backend, "wf-1").await;

    let task = claim(&backend).await;
    let fire_at = Utc::now() + chrono::Duration::hours(1);
    let timer = HistoryEvent::new(EventAttributes::TimerFired { at: fire_at })
        .with_visible_at(fire_at)
        .with_schedule_event_id(2);
    backend
        .complete_workflow_task(
            &task,
            WorkflowInstanceState::Active,
            &sequenced(&task, vec![]),
            &[],
            &[timer.clone()],
            &[],
        )
        .await
        .unwrap();

    assert!(backend
        .get_workflow_task(&[Queue::default()])
        .await
        .unwrap()
        .is_none());

    let stats = backend.get_stats().await.unwrap();
    assert_eq!(stats.active_workflow_instances, 1);
    assert_eq!(stats.pending_workflow_tasks_total(), 0);

    let future = backend.get_future_events(&instance).await.unwrap();
    assert_eq!(future, vec![timer]);
}

#[test_log::test(tokio::test)]
async fn test_timer_cancellation_clears_pending_timer() {
    let kv = Arc::new(MemoryKv::new());
    let backend = backend(&kv, "w1");
    let instance = create(&backend, "wf-1").await;

    let task = claim(&backend).await;
    let fire_at = Utc::now() + chrono::Duration::hours(1);
    let timer = HistoryEvent::new(EventAttributes::TimerFired { at: fire_at })
        .with_visible_at(fire_at)
        .with_schedule_event_id(7);
    backend
        .complete_workflow_task(
            &task,
            WorkflowInstanceState::Active,
            &sequenced(&task, vec![]),
            &[],
            &[timer],
            &[],
        )
        .await
        .unwrap();

    backend.signal_workflow("wf-1", &signal("stop")).await.unwrap();
    let task = claim(&backend).await;
    let canceled = HistoryEvent::new(EventAttributes::TimerCanceled).with_schedule_event_id(7);
    backend
        .complete_workflow_task(
            &task,
            WorkflowInstanceState::Active,
            &sequenced(&task, vec![canceled]),
            &[],
            &[],
            &[],
        )
        .await
        .unwrap();

    assert!(backend.get_future_events(&instance).await.unwrap().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_duplicate_sub_workflow_fails_back_to_parent() {
    let kv = Arc::new(MemoryKv::new());
    let backend = backend(&kv, "w1");
    let parent = create(&backend, "parent").await;
    let child_start = || started("child", "children");
    let child = |execution_id: &str| {
        WorkflowInstance::new("child", execution_id).with_parent(ParentInstance {
            instance_id: parent.instance_id.clone(),
            execution_id: parent.execution_id.clone(),
            event_id: 2,
        })
    };

    let task = claim(&backend).await;
    let scheduled = HistoryEvent::new(EventAttributes::SubWorkflowScheduled {
        sub_workflow_instance: child("c-1"),
        name: "child".into(),
        inputs: vec![],
    });
    backend
        .complete_workflow_task(
            &task,
            WorkflowInstanceState::Active,
            &sequenced(&task, vec![scheduled]),
            &[],
            &[],
            &[WorkflowEvent::new(child("c-1"), child_start())],
        )
        .await
        .unwrap();

    let child_task = backend
        .get_workflow_task(&[Queue::new("children")])
        .await
        .unwrap()
        .expect("expected the child task");
    assert_eq!(child_task.instance.instance_id, "child");
    assert_eq!(child_task.instance.parent.as_ref().map(|p| p.event_id), Some(2));

    backend.signal_workflow("parent", &signal("again")).await.unwrap();
    let task = claim(&backend).await;
    backend
        .complete_workflow_task(
            &task,
            WorkflowInstanceState::Active,
            &sequenced(&task, vec![]),
            &[],
            &[],
            &[WorkflowEvent::new(child("c-2"), child_start())],
        )
        .await
        .unwrap();

    let task = claim(&backend).await;
    assert_eq!(task.new_events.len(), 1);
    let failure = &task.new_events[0];
    assert_eq!(failure.schedule_event_id, 2);
    match &failure.attributes {
        EventAttributes::SubWorkflowFailed { error } => {
            assert_eq!(error, "workflow instance already exists");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let children = backend
        .store()
        .instances
        .get_by_instance_id("child")
        .exec()
        .await
        .unwrap();
    assert_eq!(children.len(), 1);

    let tree = backend.get_workflow_tree(&parent).await.unwrap();
    assert_eq!(tree.workflow_name, "wf");
    assert_eq!(tree.children.len(), 1);
    assert_eq!(tree.children[0].instance.queue, Queue::new("children"));
}

#[test_log::test(tokio::test)]
async fn test_same_child_started_twice_in_one_completion() {
    let kv = Arc::new(MemoryKv::new());
    let backend = backend(&kv, "w1");
    let parent = create(&backend, "parent").await;
    let child = |execution_id: &str, event_id: i64| {
        WorkflowInstance::new("child", execution_id).with_parent(ParentInstance {
            instance_id: parent.instance_id.clone(),
            execution_id: parent.execution_id.clone(),
            event_id,
        })
    };

    let task = claim(&backend).await;
    backend
        .complete_workflow_task(
            &task,
            WorkflowInstanceState::Active,
            &sequenced(&task, vec![]),
            &[],
            &[],
            &[
                WorkflowEvent::new(child("c-1", 2), started("child", "children")),
                WorkflowEvent::new(child("c-2", 3), started("child", "children")),
            ],
        )
        .await
        .unwrap();

    let children = backend
        .store()
        .instances
        .get_by_instance_id("child")
        .exec()
        .await
        .unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].instance.execution_id, "c-1");

    let task = claim(&backend).await;
    assert_eq!(task.new_events.len(), 1);
    assert_eq!(task.new_events[0].schedule_event_id, 3);
    assert!(matches!(
        task.new_events[0].attributes,
        EventAttributes::SubWorkflowFailed { .. }
    ));
}

#[test_log::test(tokio::test)]
async fn test_continue_as_new_starts_next_execution() {
    let kv = Arc::new(MemoryKv::new());
    let backend = backend(&kv, "w1");
    let first = create(&backend, "wf-1").await;

    let task = claim(&backend).await;
    let next = first.continued();
    backend
        .complete_workflow_task(
            &task,
            WorkflowInstanceState::ContinuedAsNew,
            &sequenced(&task, vec![]),
            &[],
            &[],
            &[WorkflowEvent::new(next.clone(), started("wf", Queue::DEFAULT))],
        )
        .await
        .unwrap();

    assert_eq!(
        backend.get_workflow_instance_state(&first).await.unwrap(),
        WorkflowInstanceState::ContinuedAsNew
    );
    let record = backend.get_workflow_instance(&first).await.unwrap();
    assert!(record.completed_at.is_some());
    assert_eq!(
        backend.get_workflow_instance_state(&next).await.unwrap(),
        WorkflowInstanceState::Active
    );

    let task = claim(&backend).await;
    assert!(task.instance.same_execution(&next));
    assert_eq!(task.last_sequence_id, 0);

    let page = backend.get_workflow_instances(None, 10).await.unwrap();
    assert_eq!(page.len(), 2);
    assert!(page[0].instance.same_execution(&next));
    let rest = backend
        .get_workflow_instances(Some(("wf-1", next.execution_id.as_str())), 10)
        .await
        .unwrap();
    assert_eq!(rest.len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_continue_as_new_can_drop_previous_execution() {
    let kv = Arc::new(MemoryKv::new());
    let backend = Backend::new(
        kv.clone(),
        BackendOptions::new("test", "w1").with_remove_continued_as_new_instances(true),
    );
    let first = create(&backend, "wf-1").await;

    let task = claim(&backend).await;
    let next = first.continued();
    backend
        .complete_workflow_task(
            &task,
            WorkflowInstanceState::ContinuedAsNew,
            &sequenced(&task, vec![]),
            &[],
            &[],
            &[WorkflowEvent::new(next.clone(), started("wf", Queue::DEFAULT))],
        )
        .await
        .unwrap();

    assert!(matches!(
        backend.get_workflow_instance_state(&first).await,
        Err(BackendError::InstanceNotFound)
    ));
    assert_eq!(
        backend.get_workflow_instance_state(&next).await.unwrap(),
        WorkflowInstanceState::Active
    );
}

#[test_log::test(tokio::test)]
async fn test_completion_of_removed_instance_fails() {
    let kv = Arc::new(MemoryKv::new());
    let backend = backend(&kv, "w1");
    let instance = create(&backend, "wf-1").await;
    let task = claim(&backend).await;

    backend
        .store()
        .instances
        .delete(&instance.instance_id, &instance.execution_id)
        .exec()
        .await
        .unwrap();

    assert!(matches!(
        backend
            .complete_workflow_task(&task, WorkflowInstanceState::Active, &[], &[], &[], &[])
            .await,
        Err(BackendError::InstanceNotFound)
    ));
}

// ============================================
// Stats
// ============================================

#[test_log::test(tokio::test)]
async fn test_stats_count_claimable_work() {
    let kv = Arc::new(MemoryKv::new());
    let backend = backend(&kv, "w1");
    create(&backend, "wf-a").await;
    create(&backend, "wf-b").await;
    backend
        .create_workflow_instance(&WorkflowInstance::start("wf-c"), &started("wf", "other"))
        .await
        .unwrap();

    claim(&backend).await;

    let stats = backend.get_stats().await.unwrap();
    assert_eq!(stats.active_workflow_instances, 3);
    assert_eq!(stats.pending_workflow_tasks.get(&Queue::default()), Some(&1));
    assert_eq!(stats.pending_workflow_tasks.get(&Queue::new("other")), Some(&1));
    assert_eq!(stats.pending_activity_tasks_total(), 0);
}
