//! Integration tests for box lifecycle (create, start, stop, pause, get, remove).

use std::time::Duration;

use boxlite::{BoxOptions, BoxStatus, BoxliteError, BoxliteOptions, ExitReason, ExitStatus};
use boxlite_test_utils::{BackendCall, TestContext};

fn alpine() -> BoxOptions {
    BoxOptions::new("alpine").with_cpus(1).with_memory_mib(256)
}

// ============================================================================
// CREATE / GET
// ============================================================================

#[tokio::test]
async fn get_after_create_is_created_without_pid() {
    let ctx = TestContext::new();
    let created = ctx.runtime.create(alpine()).unwrap();

    let info = ctx.runtime.get(&created.id).await.unwrap();
    assert_eq!(info.status, BoxStatus::Created);
    assert_eq!(info.pid, None);
    assert_eq!(info.image, "alpine");
    assert_eq!(info.cpus, 1);
    assert_eq!(info.memory_mib, 256);
    assert!(info.usage.is_none());
    assert!(info.started_at.is_none());
}

#[tokio::test]
async fn create_generates_unique_ulid_ids() {
    let ctx = TestContext::new();
    let a = ctx.runtime.create(alpine()).unwrap();
    let b = ctx.runtime.create(alpine()).unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!(a.id.as_str().len(), 26);
    assert!(a.id < b.id);
}

#[tokio::test]
async fn create_applies_resource_defaults() {
    let ctx = TestContext::new();
    let info = ctx.runtime.create(BoxOptions::new("alpine")).unwrap();
    assert_eq!(info.cpus, 1);
    assert_eq!(info.memory_mib, 512);
}

#[tokio::test]
async fn create_rejects_invalid_spec() {
    let ctx = TestContext::new();

    for options in [
        alpine().with_cpus(0),
        alpine().with_memory_mib(0),
        BoxOptions::new(""),
    ] {
        let err = ctx.runtime.create(options).unwrap_err();
        assert!(matches!(err, BoxliteError::InvalidSpec(_)), "{err}");
    }
    assert!(ctx.runtime.list_info().await.unwrap().is_empty());
}

#[tokio::test]
async fn get_unknown_id_is_not_found() {
    let ctx = TestContext::new();
    let err = ctx.runtime.get("01HJK4TNRPQSXYZ8WM6NCVT9R5").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn name_resolves_like_id() {
    let ctx = TestContext::new();
    let created = ctx.runtime.create(alpine().with_name("web")).unwrap();

    ctx.runtime.start("web").await.unwrap();
    let info = ctx.runtime.get("web").await.unwrap();
    assert_eq!(info.id, created.id);
    assert_eq!(info.name.as_deref(), Some("web"));
    assert_eq!(info.status, BoxStatus::Running);

    let err = ctx.runtime.create(alpine().with_name("web")).unwrap_err();
    assert!(matches!(err, BoxliteError::InvalidSpec(_)));
}

// ============================================================================
// START / STOP
// ============================================================================

#[tokio::test]
async fn alpine_scenario_start_list_stop() {
    let ctx = TestContext::new();
    let created = ctx.runtime.create(alpine()).unwrap();
    ctx.runtime.start(&created.id).await.unwrap();

    let boxes = ctx.runtime.list_info().await.unwrap();
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].status, BoxStatus::Running);
    assert!(boxes[0].pid.is_some());
    assert!(boxes[0].usage.is_some());

    ctx.runtime
        .stop(&created.id, Duration::from_secs(5))
        .await
        .unwrap();

    let boxes = ctx.runtime.list_info().await.unwrap();
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].status, BoxStatus::Stopped);
    assert_eq!(boxes[0].pid, None);
    assert!(boxes[0].usage.is_none());
    assert_eq!(
        boxes[0].exit_reason,
        Some(ExitReason::Stopped {
            forced: false,
            exit_code: None
        })
    );
}

#[tokio::test]
async fn start_passes_launch_spec_to_backend() {
    let ctx = TestContext::new();
    let created = ctx
        .runtime
        .create(
            alpine()
                .with_args(["sleep", "60"])
                .with_env("MODE", "test"),
        )
        .unwrap();
    ctx.runtime.start(&created.id).await.unwrap();

    let launched = ctx.backend.launched();
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].box_id, created.id);
    assert_eq!(launched[0].image, "alpine");
    assert_eq!(launched[0].memory_mib, 256);
    assert_eq!(launched[0].args, vec!["sleep", "60"]);
    assert_eq!(
        launched[0].env,
        vec![("MODE".to_string(), "test".to_string())]
    );
}

#[tokio::test]
async fn start_on_running_box_is_invalid_transition_and_leaves_box_unchanged() {
    let ctx = TestContext::new();
    let created = ctx.runtime.create(alpine()).unwrap();
    ctx.runtime.start(&created.id).await.unwrap();
    let before = ctx.runtime.get(&created.id).await.unwrap();

    let err = ctx.runtime.start(&created.id).await.unwrap_err();
    assert!(err.is_invalid_transition(), "{err}");

    let after = ctx.runtime.get(&created.id).await.unwrap();
    assert_eq!(after.status, BoxStatus::Running);
    assert_eq!(after.pid, before.pid);
    assert_eq!(after.started_at, before.started_at);
    assert_eq!(ctx.backend.launched().len(), 1);
}

#[tokio::test]
async fn stop_on_created_box_is_invalid_transition() {
    let ctx = TestContext::new();
    let created = ctx.runtime.create(alpine()).unwrap();

    let err = ctx
        .runtime
        .stop(&created.id, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(err.is_invalid_transition());
    assert_eq!(
        ctx.runtime.get(&created.id).await.unwrap().status,
        BoxStatus::Created
    );
}

#[tokio::test]
async fn start_failure_marks_box_failed() {
    let ctx = TestContext::new();
    ctx.backend.fail_launches("image not found");
    let created = ctx.runtime.create(alpine()).unwrap();

    let err = ctx.runtime.start(&created.id).await.unwrap_err();
    assert!(matches!(err, BoxliteError::StartFailed(ref m) if m.contains("image not found")));

    let info = ctx.runtime.get(&created.id).await.unwrap();
    assert_eq!(info.status, BoxStatus::Failed);
    assert_eq!(info.pid, None);
    assert!(matches!(info.exit_reason, Some(ExitReason::StartFailed { .. })));
}

#[tokio::test]
async fn start_timeout_marks_box_failed() {
    let ctx = TestContext::with_options(|options| BoxliteOptions {
        start_timeout: Duration::from_millis(50),
        ..options
    });
    ctx.backend.delay_launches(Duration::from_secs(5));
    let created = ctx.runtime.create(alpine()).unwrap();

    let err = ctx.runtime.start(&created.id).await.unwrap_err();
    assert!(matches!(err, BoxliteError::StartFailed(_)));
    assert_eq!(
        ctx.runtime.get(&created.id).await.unwrap().status,
        BoxStatus::Failed
    );
}

#[tokio::test]
async fn backend_panic_during_launch_marks_box_failed() {
    let ctx = TestContext::new();
    ctx.backend.panic_on_launch();
    let created = ctx.runtime.create(alpine()).unwrap();

    let err = ctx.runtime.start(&created.id).await.unwrap_err();
    assert!(matches!(err, BoxliteError::StartFailed(_)));
    assert_eq!(
        ctx.runtime.get(&created.id).await.unwrap().status,
        BoxStatus::Failed
    );
}

#[tokio::test]
async fn stop_escalates_to_forced_kill_after_timeout() {
    let ctx = TestContext::new();
    ctx.backend.ignore_sigterm();
    let created = ctx.runtime.create(alpine()).unwrap();
    ctx.runtime.start(&created.id).await.unwrap();
    let pid = ctx.runtime.get(&created.id).await.unwrap().pid.unwrap();

    ctx.runtime
        .stop(&created.id, Duration::from_millis(100))
        .await
        .unwrap();

    let info = ctx.runtime.get(&created.id).await.unwrap();
    assert_eq!(info.status, BoxStatus::Stopped);
    assert_eq!(info.pid, None);
    assert!(matches!(
        info.exit_reason,
        Some(ExitReason::Stopped { forced: true, .. })
    ));
    assert!(!ctx.backend.is_alive(pid));

    let calls = ctx.backend.calls();
    assert!(calls.contains(&BackendCall::Terminate { pid, force: false }));
    assert!(calls.contains(&BackendCall::Terminate { pid, force: true }));
}

#[tokio::test]
async fn rejected_kill_is_stop_failed_and_keeps_box_running() {
    let ctx = TestContext::new();
    ctx.backend.ignore_sigterm();
    ctx.backend.refuse_kill(true);
    let created = ctx.runtime.create(alpine()).unwrap();
    ctx.runtime.start(&created.id).await.unwrap();
    let pid = ctx.runtime.get(&created.id).await.unwrap().pid.unwrap();

    let err = ctx
        .runtime
        .stop(&created.id, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, BoxliteError::StopFailed(_)));

    let info = ctx.runtime.get(&created.id).await.unwrap();
    assert_eq!(info.status, BoxStatus::Running);
    assert_eq!(info.pid, Some(pid));

    // The exit watch is re-armed, so a later natural exit is still seen.
    ctx.backend.exit(pid, ExitStatus::exited(0));
    let info = ctx
        .wait_for_status(created.id.as_str(), BoxStatus::Exited)
        .await;
    assert_eq!(info.exit_reason, Some(ExitReason::Exited { code: 0 }));
}

// ============================================================================
// EXIT WATCH
// ============================================================================

#[tokio::test]
async fn natural_exit_is_recorded_as_exited() {
    let ctx = TestContext::new();
    let created = ctx.runtime.create(alpine()).unwrap();
    ctx.runtime.start(&created.id).await.unwrap();
    let pid = ctx.runtime.get(&created.id).await.unwrap().pid.unwrap();

    ctx.backend.exit(pid, ExitStatus::exited(3));

    let info = ctx
        .wait_for_status(created.id.as_str(), BoxStatus::Exited)
        .await;
    assert_eq!(info.pid, None);
    assert_eq!(info.exit_reason, Some(ExitReason::Exited { code: 3 }));
    assert!(info.ended_at.is_some());
}

#[tokio::test]
async fn crash_is_recorded_as_failed() {
    let ctx = TestContext::new();
    let created = ctx.runtime.create(alpine()).unwrap();
    ctx.runtime.start(&created.id).await.unwrap();
    let pid = ctx.runtime.get(&created.id).await.unwrap().pid.unwrap();

    ctx.backend.exit(pid, ExitStatus::signaled(11));

    let info = ctx
        .wait_for_status(created.id.as_str(), BoxStatus::Failed)
        .await;
    assert_eq!(
        info.exit_reason,
        Some(ExitReason::Crashed { signal: Some(11) })
    );
}

#[tokio::test]
async fn lost_process_is_recorded_as_backend_error() {
    let ctx = TestContext::new();
    let created = ctx.runtime.create(alpine()).unwrap();
    ctx.runtime.start(&created.id).await.unwrap();
    let pid = ctx.runtime.get(&created.id).await.unwrap().pid.unwrap();

    ctx.backend.lose(pid);

    let info = ctx
        .wait_for_status(created.id.as_str(), BoxStatus::Failed)
        .await;
    assert!(matches!(
        info.exit_reason,
        Some(ExitReason::BackendError { .. })
    ));
}

// ============================================================================
// PAUSE / RESUME
// ============================================================================

#[tokio::test]
async fn pause_and_resume_keep_pid() {
    let ctx = TestContext::new();
    let created = ctx.runtime.create(alpine()).unwrap();
    ctx.runtime.start(&created.id).await.unwrap();
    let pid = ctx.runtime.get(&created.id).await.unwrap().pid.unwrap();

    ctx.runtime.pause(&created.id).await.unwrap();
    let info = ctx.runtime.get(&created.id).await.unwrap();
    assert_eq!(info.status, BoxStatus::Paused);
    assert_eq!(info.pid, Some(pid));
    assert!(info.usage.is_none());
    assert!(ctx.backend.is_paused(pid));

    let err = ctx.runtime.pause(&created.id).await.unwrap_err();
    assert!(err.is_invalid_transition());

    ctx.runtime.resume(&created.id).await.unwrap();
    let info = ctx.runtime.get(&created.id).await.unwrap();
    assert_eq!(info.status, BoxStatus::Running);
    assert_eq!(info.pid, Some(pid));
    assert!(!ctx.backend.is_paused(pid));
}

#[tokio::test]
async fn stop_while_paused_resumes_then_stops() {
    let ctx = TestContext::new();
    let created = ctx.runtime.create(alpine()).unwrap();
    ctx.runtime.start(&created.id).await.unwrap();
    let pid = ctx.runtime.get(&created.id).await.unwrap().pid.unwrap();
    ctx.runtime.pause(&created.id).await.unwrap();

    ctx.runtime
        .stop(&created.id, Duration::from_secs(1))
        .await
        .unwrap();

    let info = ctx.runtime.get(&created.id).await.unwrap();
    assert_eq!(info.status, BoxStatus::Stopped);
    assert_eq!(info.pid, None);

    let calls = ctx.backend.calls();
    let resumed = calls.iter().position(|c| *c == BackendCall::Resume(pid));
    let terminated = calls
        .iter()
        .position(|c| *c == BackendCall::Terminate { pid, force: false });
    assert!(resumed.is_some() && resumed < terminated);
}

#[tokio::test]
async fn exit_while_paused_is_recorded_as_stopped() {
    let ctx = TestContext::new();
    let created = ctx.runtime.create(alpine()).unwrap();
    ctx.runtime.start(&created.id).await.unwrap();
    let pid = ctx.runtime.get(&created.id).await.unwrap().pid.unwrap();
    ctx.runtime.pause(&created.id).await.unwrap();

    ctx.backend.exit(pid, ExitStatus::signaled(9));

    let info = ctx
        .wait_for_status(created.id.as_str(), BoxStatus::Stopped)
        .await;
    assert_eq!(
        info.exit_reason,
        Some(ExitReason::Terminated {
            code: None,
            signal: Some(9)
        })
    );
}

// ============================================================================
// SNAPSHOTS
// ============================================================================

#[tokio::test]
async fn get_twice_yields_same_state_and_pid() {
    let ctx = TestContext::new();
    let created = ctx.runtime.create(alpine()).unwrap();
    ctx.runtime.start(&created.id).await.unwrap();

    let first = ctx.runtime.get(&created.id).await.unwrap();
    let second = ctx.runtime.get(&created.id).await.unwrap();
    assert_eq!(first.status, second.status);
    assert_eq!(first.pid, second.pid);
    assert_eq!(first.last_updated, second.last_updated);
}

#[tokio::test]
async fn unavailable_sample_falls_back_to_last_known_value() {
    let ctx = TestContext::new();
    let created = ctx.runtime.create(alpine()).unwrap();
    ctx.runtime.start(&created.id).await.unwrap();

    let sampled = ctx.runtime.get(&created.id).await.unwrap().usage.unwrap();
    assert_eq!(sampled.memory_mib, 64);

    ctx.sampler.set_unavailable(true);
    let cached = ctx.runtime.get(&created.id).await.unwrap().usage.unwrap();
    assert_eq!(cached, sampled);
}

#[tokio::test]
async fn unavailable_first_sample_is_zero() {
    let ctx = TestContext::new();
    ctx.sampler.set_unavailable(true);
    let created = ctx.runtime.create(alpine()).unwrap();
    ctx.runtime.start(&created.id).await.unwrap();

    let info = ctx.runtime.get(&created.id).await.unwrap();
    assert_eq!(info.usage, Some(Default::default()));
}

#[tokio::test]
async fn snapshot_is_not_a_live_view() {
    let ctx = TestContext::new();
    let created = ctx.runtime.create(alpine()).unwrap();
    ctx.runtime.start(&created.id).await.unwrap();

    let listed = ctx.runtime.list_info().await.unwrap();
    ctx.runtime
        .stop(&created.id, Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(listed[0].status, BoxStatus::Running);
    assert!(listed[0].pid.is_some());
}

// ============================================================================
// REMOVE
// ============================================================================

#[tokio::test]
async fn remove_requires_terminal_state() {
    let ctx = TestContext::new();
    let created = ctx.runtime.create(alpine()).unwrap();

    let err = ctx.runtime.remove(&created.id, false).await.unwrap_err();
    assert!(err.is_invalid_transition());

    ctx.runtime.start(&created.id).await.unwrap();
    let err = ctx.runtime.remove(&created.id, false).await.unwrap_err();
    assert!(err.is_invalid_transition());

    ctx.runtime
        .stop(&created.id, Duration::from_secs(1))
        .await
        .unwrap();
    ctx.runtime.remove(&created.id, false).await.unwrap();

    assert!(ctx.runtime.get(&created.id).await.unwrap_err().is_not_found());
    assert!(ctx.runtime.list_info().await.unwrap().is_empty());
}

#[tokio::test]
async fn remove_unknown_id_is_not_found() {
    let ctx = TestContext::new();
    let err = ctx.runtime.remove("no-such-box", false).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn removed_box_frees_its_name() {
    let ctx = TestContext::new();
    ctx.backend.fail_launches("boom");
    let first = ctx.runtime.create(alpine().with_name("job")).unwrap();
    let _ = ctx.runtime.start("job").await;
    ctx.runtime.remove("job", false).await.unwrap();

    let second = ctx.runtime.create(alpine().with_name("job")).unwrap();
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn force_remove_kills_active_boxes() {
    let ctx = TestContext::new();
    let running = ctx.runtime.create(alpine().with_name("web")).unwrap();
    let paused = ctx.runtime.create(alpine()).unwrap();
    let idle = ctx.runtime.create(alpine()).unwrap();
    ctx.runtime.start(&running.id).await.unwrap();
    ctx.runtime.start(&paused.id).await.unwrap();
    ctx.runtime.pause(&paused.id).await.unwrap();
    let running_pid = ctx.runtime.get(&running.id).await.unwrap().pid.unwrap();
    let paused_pid = ctx.runtime.get(&paused.id).await.unwrap().pid.unwrap();

    ctx.runtime.remove("web", true).await.unwrap();
    ctx.runtime.remove(&paused.id, true).await.unwrap();
    ctx.runtime.remove(&idle.id, true).await.unwrap();

    assert!(!ctx.backend.is_alive(running_pid));
    assert!(!ctx.backend.is_alive(paused_pid));
    let calls = ctx.backend.calls();
    assert!(calls.contains(&BackendCall::Terminate { pid: running_pid, force: true }));
    assert!(!calls.contains(&BackendCall::Terminate { pid: running_pid, force: false }));
    assert!(calls.contains(&BackendCall::Release(running_pid)));

    assert!(ctx.runtime.list_info().await.unwrap().is_empty());
    let metrics = ctx.runtime.metrics();
    assert_eq!(metrics.boxes_stopped_total(), 2);
    assert_eq!(metrics.boxes_removed_total(), 3);
    assert_eq!(metrics.num_active_boxes(), 0);
}

#[tokio::test]
async fn force_remove_keeps_box_when_kill_is_rejected() {
    let ctx = TestContext::new();
    ctx.backend.refuse_kill(true);
    let info = ctx.runtime.create(alpine()).unwrap();
    ctx.runtime.start(&info.id).await.unwrap();
    let pid = ctx.runtime.get(&info.id).await.unwrap().pid.unwrap();

    let err = ctx.runtime.remove(&info.id, true).await.unwrap_err();
    assert!(matches!(err, BoxliteError::StopFailed(_)));

    let kept = ctx.runtime.get(&info.id).await.unwrap();
    assert_eq!(kept.status, BoxStatus::Running);
    assert_eq!(kept.pid, Some(pid));

    // The exit watch is still armed
    ctx.backend.exit(pid, ExitStatus::exited(0));
    ctx.wait_for_status(info.id.as_str(), BoxStatus::Exited).await;
}

#[tokio::test]
async fn exists_matches_ids_and_names() {
    let ctx = TestContext::new();
    let info = ctx.runtime.create(alpine().with_name("db")).unwrap();

    assert!(ctx.runtime.exists(&info.id).unwrap());
    assert!(ctx.runtime.exists("db").unwrap());
    assert!(!ctx.runtime.exists("cache").unwrap());

    ctx.runtime.remove("db", true).await.unwrap();
    assert!(!ctx.runtime.exists(&info.id).unwrap());
    assert!(!ctx.runtime.exists("db").unwrap());
}

#[tokio::test]
async fn terminal_boxes_release_their_pid() {
    let ctx = TestContext::new();
    let stopped = ctx.runtime.create(alpine()).unwrap();
    let exited = ctx.runtime.create(alpine()).unwrap();
    ctx.runtime.start(&stopped.id).await.unwrap();
    ctx.runtime.start(&exited.id).await.unwrap();
    let stopped_pid = ctx.runtime.get(&stopped.id).await.unwrap().pid.unwrap();
    let exited_pid = ctx.runtime.get(&exited.id).await.unwrap().pid.unwrap();

    ctx.runtime
        .stop(&stopped.id, Duration::from_secs(1))
        .await
        .unwrap();
    ctx.backend.exit(exited_pid, ExitStatus::exited(0));
    ctx.wait_for_status(exited.id.as_str(), BoxStatus::Exited).await;

    let released: Vec<_> = ctx
        .backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, BackendCall::Release(_)))
        .collect();
    assert_eq!(
        released,
        vec![BackendCall::Release(stopped_pid), BackendCall::Release(exited_pid)]
    );
}

#[tokio::test]
async fn id_shaped_name_is_rejected() {
    let ctx = TestContext::new();
    let first = ctx.runtime.create(alpine()).unwrap();

    let err = ctx
        .runtime
        .create(alpine().with_name(first.id.as_str()))
        .unwrap_err();
    assert!(matches!(err, BoxliteError::InvalidSpec(_)));
    assert_eq!(ctx.runtime.list_info().await.unwrap().len(), 1);
}

#[tokio::test]
async fn list_preserves_creation_order() {
    let ctx = TestContext::new();
    let ids: Vec<_> = (0..5)
        .map(|_| ctx.runtime.create(alpine()).unwrap().id)
        .collect();

    let listed: Vec<_> = ctx
        .runtime
        .list_info()
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(listed, ids);
}
