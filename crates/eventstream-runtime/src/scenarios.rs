//! End-to-end runs of the spawned controller against recording fakes.
//!
//! Tests run on paused time: `settle` only returns once the controller task
//! has drained everything queued so far.

use std::{sync::Arc, time::Duration};

use eventstream_core::{
    ControllerEvent, ControllerState, EventStream, MessageNotification, NotificationChannel,
    NotificationContent, RoomEventKind, SessionEventKind, StoreReadiness, StreamCommand,
    UiPresence,
};
use eventstream_platform::{InMemoryPlatform, PlatformServices};

use crate::{
    config::ControllerConfig,
    controller::{ControllerHandle, spawn_controller},
    test_support::{FakeDirectory, FakeSession, SessionCall, call_event, message, room},
};

const ALICE: &str = "@alice:example.org";
const BOB: &str = "@bob:example.org";
const CAROL: &str = "@carol:example.org";
const GARDEN: &str = "!garden:example.org";
const HARBOR: &str = "!harbor:example.org";

fn test_config() -> ControllerConfig {
    ControllerConfig {
        catchup_reissue_delay_ms: 100,
        catchup_reissue_max_delay_ms: 400,
        max_catchup_reissues: 3,
        ..ControllerConfig::default()
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

struct Harness {
    platform: InMemoryPlatform,
    directory: Arc<FakeDirectory>,
    handle: ControllerHandle,
    events: EventStream,
}

impl Harness {
    fn new(sessions: &[&Arc<FakeSession>]) -> Self {
        Self::with_platform(sessions, InMemoryPlatform::default())
    }

    fn with_platform(sessions: &[&Arc<FakeSession>], platform: InMemoryPlatform) -> Self {
        let directory = FakeDirectory::with(sessions);
        let handle = spawn_controller(
            test_config(),
            directory.clone(),
            PlatformServices::in_memory(&platform),
        );
        let events = handle.subscribe();
        Self {
            platform,
            directory,
            handle,
            events,
        }
    }

    async fn send(&self, command: StreamCommand) {
        self.handle
            .send(command)
            .await
            .expect("command should enqueue");
        settle().await;
    }

    async fn start(&self, account_ids: &[&str]) {
        self.send(StreamCommand::Start {
            account_ids: Some(account_ids.iter().map(|id| (*id).to_owned()).collect()),
        })
        .await;
    }

    fn drain_events(&mut self) -> Vec<ControllerEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    fn posted_messages(&self) -> Vec<MessageNotification> {
        self.platform
            .post_log()
            .into_iter()
            .filter_map(|posted| match posted.content {
                NotificationContent::Message(message) => Some(message),
                NotificationContent::Call(_) => None,
            })
            .collect()
    }
}

fn rejection_codes(events: &[ControllerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ControllerEvent::CommandRejected { code, .. } => Some(code.clone()),
            _ => None,
        })
        .collect()
}

fn state_changes(events: &[ControllerEvent]) -> Vec<ControllerState> {
    events
        .iter()
        .filter_map(|event| match event {
            ControllerEvent::StateChanged { state } => Some(*state),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn viewed_room_is_silent_and_background_bing_is_tagged_multi_account() {
    let alice = FakeSession::ready(ALICE);
    let bob = FakeSession::ready(BOB);
    let mut h = Harness::new(&[&alice, &bob]);
    h.start(&[ALICE, BOB]).await;

    h.handle.set_ui_presence(UiPresence::viewing(ALICE, GARDEN));
    alice.emit_bing(message("$a1", GARDEN, CAROL, "look at this"), room(GARDEN, "Garden"));
    alice.emit(SessionEventKind::BatchComplete);
    settle().await;

    assert!(h.platform.post_log().is_empty());
    assert_eq!(h.handle.unread_total(), 0);

    h.handle.set_ui_presence(UiPresence::background());
    bob.emit_bing(message("$b1", HARBOR, CAROL, "boat is in"), room(HARBOR, "Harbor"));
    bob.emit(SessionEventKind::BatchComplete);
    settle().await;

    assert_eq!(h.handle.unread_total(), 1);
    let posted = h.posted_messages();
    assert_eq!(posted.len(), 1);
    assert!(posted[0].multi_account);
    assert_eq!(posted[0].account_id, BOB);
    assert_eq!(posted[0].title(), format!("Harbor ({BOB})"));
    assert_eq!(h.platform.badge(), 1);

    let events = h.drain_events();
    assert!(events.contains(&ControllerEvent::NotificationPosted {
        notification_id: "message".into(),
        channel: NotificationChannel::Message,
    }));
    assert!(events.contains(&ControllerEvent::BadgeUpdated { total: 1 }));
}

#[tokio::test(start_paused = true)]
async fn loading_store_defers_stream_start_until_ready() {
    let carol = FakeSession::new(CAROL, StoreReadiness::Loading);
    let h = Harness::new(&[&carol]);
    h.start(&[CAROL]).await;

    assert_eq!(h.handle.current_state(), ControllerState::Started);
    assert_eq!(carol.start_count(), 0);
    assert!(carol.fake_store().has_watcher());

    assert!(carol.fake_store().finish_loading(StoreReadiness::Ready));
    settle().await;
    assert_eq!(carol.start_count(), 1);

    assert!(!carol.fake_store().finish_loading(StoreReadiness::Ready));
    carol.emit(SessionEventKind::StoreReadiness(StoreReadiness::Ready));
    settle().await;
    assert_eq!(carol.start_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn corrupted_store_warns_and_still_starts_exactly_once() {
    let carol = FakeSession::new(CAROL, StoreReadiness::Loading);
    let mut h = Harness::new(&[&carol]);
    h.start(&[CAROL]).await;

    carol.fake_store().finish_loading(StoreReadiness::Corrupted);
    settle().await;
    carol.emit(SessionEventKind::StoreReadiness(StoreReadiness::Ready));
    settle().await;

    assert_eq!(carol.start_count(), 1);
    assert_eq!(h.platform.corrupted_accounts(), vec![CAROL.to_owned()]);
    assert!(h.drain_events().contains(&ControllerEvent::StoreCorrupted {
        account_id: CAROL.into()
    }));
}

#[tokio::test(start_paused = true)]
async fn readiness_from_before_stop_does_not_start_a_stream() {
    let carol = FakeSession::new(CAROL, StoreReadiness::Loading);
    let h = Harness::new(&[&carol]);
    h.start(&[CAROL]).await;
    h.send(StreamCommand::Stop).await;

    carol.fake_store().finish_loading(StoreReadiness::Ready);
    settle().await;

    assert_eq!(carol.start_count(), 0);
    assert_eq!(h.handle.current_state(), ControllerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn catchup_is_reissued_only_while_a_call_is_active() {
    let alice = FakeSession::ready(ALICE);
    let h = Harness::new(&[&alice]);
    h.start(&[ALICE]).await;
    h.send(StreamCommand::Pause).await;
    h.send(StreamCommand::Catchup).await;
    assert_eq!(alice.catchup_count(), 1);

    alice.set_active_calls(true);
    alice.emit(SessionEventKind::BatchComplete);
    settle().await;
    assert_eq!(alice.catchup_count(), 1);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(alice.catchup_count(), 2);

    alice.set_active_calls(false);
    alice.emit(SessionEventKind::BatchComplete);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(alice.catchup_count(), 2);
    assert_eq!(h.handle.current_state(), ControllerState::Catchup);
}

#[tokio::test(start_paused = true)]
async fn catchup_reissue_stops_at_the_configured_bound() {
    let alice = FakeSession::ready(ALICE);
    alice.set_active_calls(true);
    let h = Harness::new(&[&alice]);
    h.start(&[ALICE]).await;
    h.send(StreamCommand::Pause).await;
    h.send(StreamCommand::Catchup).await;

    for _ in 0..6 {
        alice.emit(SessionEventKind::BatchComplete);
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert_eq!(alice.catchup_count(), 1 + 3);

    h.send(StreamCommand::Catchup).await;
    assert_eq!(alice.catchup_count(), 5);
    alice.emit(SessionEventKind::BatchComplete);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(alice.catchup_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn stop_wins_over_a_queued_catchup_completion() {
    let alice = FakeSession::ready(ALICE);
    alice.set_active_calls(true);
    let h = Harness::new(&[&alice]);
    h.start(&[ALICE]).await;
    h.send(StreamCommand::Pause).await;
    h.send(StreamCommand::Catchup).await;

    alice.emit(SessionEventKind::BatchComplete);
    h.send(StreamCommand::Stop).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(alice.catchup_count(), 1);
    let calls = alice.calls();
    assert_eq!(calls[calls.len() - 2..], [SessionCall::Stop, SessionCall::Detach]);
    assert!(!alice.is_attached());
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_a_scheduled_catchup_reissue() {
    let alice = FakeSession::ready(ALICE);
    alice.set_active_calls(true);
    let h = Harness::new(&[&alice]);
    h.start(&[ALICE]).await;
    h.send(StreamCommand::Pause).await;
    h.send(StreamCommand::Catchup).await;

    alice.emit(SessionEventKind::BatchComplete);
    settle().await;
    h.send(StreamCommand::Stop).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(alice.catchup_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn resume_cancels_a_scheduled_catchup_reissue() {
    let alice = FakeSession::ready(ALICE);
    alice.set_active_calls(true);
    let h = Harness::new(&[&alice]);
    h.start(&[ALICE]).await;
    h.send(StreamCommand::Pause).await;
    h.send(StreamCommand::Catchup).await;

    alice.emit(SessionEventKind::BatchComplete);
    settle().await;
    h.send(StreamCommand::Resume { account_ids: None }).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(alice.catchup_count(), 1);
    assert_eq!(alice.count(|call| *call == SessionCall::Resume), 1);
}

#[tokio::test(start_paused = true)]
async fn burst_of_events_posts_one_message_with_cumulative_counts() {
    let alice = FakeSession::ready(ALICE);
    let mut h = Harness::new(&[&alice]);
    h.start(&[ALICE]).await;
    h.drain_events();

    for (i, room_id) in [GARDEN, GARDEN, HARBOR, GARDEN, HARBOR].iter().enumerate() {
        alice.emit_bing(
            message(&format!("$m{i}"), room_id, CAROL, &format!("message {i}")),
            room(room_id, "Somewhere"),
        );
    }
    alice.emit(SessionEventKind::BatchComplete);
    settle().await;

    let posted = h.posted_messages();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].body, "message 4");
    assert_eq!(posted[0].total_unread, 5);
    assert_eq!(posted[0].sender_unread, 2);
    assert!(!posted[0].multi_account);

    let posted_events = h
        .drain_events()
        .into_iter()
        .filter(|event| matches!(event, ControllerEvent::NotificationPosted { .. }))
        .count();
    assert_eq!(posted_events, 1);
    assert!(!h.platform.wake_lock_held());
}

#[tokio::test(start_paused = true)]
async fn call_and_message_notifications_never_cancel_each_other() {
    let alice = FakeSession::ready(ALICE);
    let mut h = Harness::new(&[&alice]);
    h.start(&[ALICE]).await;

    alice.emit_bing(
        call_event("$c1", HARBOR, CAROL, RoomEventKind::CallInvite, "call-1"),
        room(HARBOR, "Harbor"),
    );
    alice.emit(SessionEventKind::BatchComplete);
    settle().await;
    assert!(h.handle.is_call_notification_active("call-1"));

    alice.emit_bing(message("$m1", GARDEN, CAROL, "hello"), room(GARDEN, "Garden"));
    alice.emit(SessionEventKind::BatchComplete);
    settle().await;
    assert!(h.platform.is_shown("call:call-1"));
    assert!(h.platform.is_shown("message"));

    alice.emit(SessionEventKind::LiveEvent {
        event: call_event("$c2", HARBOR, CAROL, RoomEventKind::CallHangup, "call-1"),
        room: room(HARBOR, "Harbor"),
    });
    settle().await;

    assert!(!h.handle.is_call_notification_active("call-1"));
    assert!(!h.platform.is_shown("call:call-1"));
    assert!(h.platform.is_shown("message"));
    assert!(!h.handle.on_hangup("call-1"));
    assert!(h.drain_events().contains(&ControllerEvent::CallNotificationDismissed {
        call_id: "call-1".into()
    }));
}

#[tokio::test(start_paused = true)]
async fn answer_from_another_device_dismisses_the_call_once() {
    let alice = FakeSession::ready(ALICE);
    let h = Harness::new(&[&alice]);
    h.start(&[ALICE]).await;

    alice.emit_bing(
        call_event("$c1", HARBOR, CAROL, RoomEventKind::CallInvite, "call-1"),
        room(HARBOR, "Harbor"),
    );
    alice.emit(SessionEventKind::BatchComplete);
    settle().await;

    alice.emit(SessionEventKind::LiveEvent {
        event: call_event("$c2", HARBOR, ALICE, RoomEventKind::CallAnswer, "call-1"),
        room: room(HARBOR, "Harbor"),
    });
    settle().await;

    assert!(!h.platform.is_shown("call:call-1"));
    assert!(!h.handle.on_answer_elsewhere("call-1"));
    assert_eq!(h.platform.cancel_log(), vec!["call:call-1".to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn dismissal_only_applies_to_the_last_notified_room() {
    let alice = FakeSession::ready(ALICE);
    let mut h = Harness::new(&[&alice]);
    h.start(&[ALICE]).await;
    alice.emit_bing(message("$m1", GARDEN, CAROL, "hello"), room(GARDEN, "Garden"));
    alice.emit(SessionEventKind::BatchComplete);
    settle().await;
    h.drain_events();

    assert!(!h.handle.dismiss_notifications(Some(HARBOR)));
    assert!(h.platform.is_shown("message"));
    assert_eq!(h.handle.unread_total(), 1);
    assert!(h.drain_events().is_empty());

    assert!(h.handle.dismiss_notifications(Some(GARDEN)));
    assert!(!h.platform.is_shown("message"));
    assert_eq!(h.handle.unread_total(), 0);
    assert_eq!(h.platform.badge(), 0);
    assert_eq!(
        h.drain_events(),
        vec![
            ControllerEvent::NotificationsDismissed {
                room_id: Some(GARDEN.into())
            },
            ControllerEvent::BadgeUpdated { total: 0 },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn dismissing_everything_also_clears_a_ringing_call() {
    let alice = FakeSession::ready(ALICE);
    let h = Harness::new(&[&alice]);
    h.start(&[ALICE]).await;
    alice.emit_bing(
        call_event("$c1", HARBOR, CAROL, RoomEventKind::CallInvite, "call-9"),
        room(HARBOR, "Harbor"),
    );
    alice.emit(SessionEventKind::BatchComplete);
    settle().await;
    assert!(h.platform.is_shown("call:call-9"));

    assert!(h.handle.dismiss_notifications(None));

    assert!(!h.platform.is_shown("call:call-9"));
    assert!(!h.handle.is_call_notification_active("call-9"));
}

#[tokio::test(start_paused = true)]
async fn foreground_bing_in_another_room_notifies_without_counting() {
    let alice = FakeSession::ready(ALICE);
    let h = Harness::new(&[&alice]);
    h.start(&[ALICE]).await;

    h.handle.set_ui_presence(UiPresence::viewing(ALICE, GARDEN));
    alice.emit_bing(message("$m1", HARBOR, CAROL, "over here"), room(HARBOR, "Harbor"));
    alice.emit(SessionEventKind::BatchComplete);
    settle().await;

    assert_eq!(h.handle.unread_total(), 0);
    assert_eq!(h.platform.badge(), 0);
    let posted = h.posted_messages();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].total_unread, 0);
}

#[tokio::test(start_paused = true)]
async fn invalid_transitions_are_reported_and_leave_state_unchanged() {
    let alice = FakeSession::ready(ALICE);
    let mut h = Harness::new(&[&alice]);

    h.send(StreamCommand::Pause).await;
    h.start(&[ALICE]).await;
    h.send(StreamCommand::Start { account_ids: None }).await;
    h.handle.set_ui_presence(UiPresence::viewing(ALICE, GARDEN));
    h.send(StreamCommand::Catchup).await;
    h.send(StreamCommand::Pause).await;
    h.send(StreamCommand::Pause).await;
    h.send(StreamCommand::Catchup).await;
    h.send(StreamCommand::Resume { account_ids: None }).await;
    h.send(StreamCommand::Stop).await;
    h.send(StreamCommand::Stop).await;
    h.send(StreamCommand::Pause).await;
    h.send(StreamCommand::Start { account_ids: None }).await;
    h.start(&[ALICE]).await;

    let events = h.drain_events();
    assert_eq!(
        state_changes(&events),
        vec![
            ControllerState::Started,
            ControllerState::Paused,
            ControllerState::Catchup,
            ControllerState::Started,
            ControllerState::Stopped,
            ControllerState::Started,
        ]
    );
    assert_eq!(
        rejection_codes(&events),
        vec![
            "invalid_state_transition",
            "invalid_state_transition",
            "invalid_state_transition",
            "invalid_state_transition",
            "invalid_state_transition",
            "no_accounts",
        ]
    );
    assert_eq!(alice.start_count(), 2);
    assert_eq!(alice.count(|call| *call == SessionCall::Attach(2)), 1);
}

#[tokio::test(start_paused = true)]
async fn resume_resets_unread_counts() {
    let alice = FakeSession::ready(ALICE);
    let h = Harness::new(&[&alice]);
    h.start(&[ALICE]).await;
    alice.emit_bing(message("$m1", GARDEN, CAROL, "hello"), room(GARDEN, "Garden"));
    alice.emit(SessionEventKind::BatchComplete);
    settle().await;
    assert_eq!(h.platform.badge(), 1);

    h.send(StreamCommand::Pause).await;
    assert_eq!(h.handle.unread_total(), 1);
    h.send(StreamCommand::Resume { account_ids: None }).await;

    assert_eq!(h.handle.unread_total(), 0);
    assert_eq!(h.platform.badge(), 0);
}

#[tokio::test(start_paused = true)]
async fn push_status_update_toggles_foreground_presence_only() {
    let alice = FakeSession::ready(ALICE);
    let mut h = Harness::new(&[&alice]);
    h.start(&[ALICE]).await;
    assert!(h.platform.foreground_held());

    h.platform.set_push_active(true);
    h.send(StreamCommand::PushStatusUpdate).await;
    assert!(!h.platform.foreground_held());
    assert_eq!(h.handle.current_state(), ControllerState::Started);

    h.platform.set_push_active(false);
    h.send(StreamCommand::PushStatusUpdate).await;
    assert!(h.platform.foreground_held());

    h.send(StreamCommand::Stop).await;
    assert!(!h.platform.foreground_held());
    assert_eq!(h.platform.foreground_acquisitions(), 2);

    let presence = h
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            ControllerEvent::ForegroundPresenceChanged { held } => Some(held),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(presence, vec![true, false, true, false]);
}

#[tokio::test(start_paused = true)]
async fn push_delivery_means_no_foreground_presence_at_all() {
    let alice = FakeSession::ready(ALICE);
    let h = Harness::with_platform(&[&alice], InMemoryPlatform::with_push_active(true));
    h.start(&[ALICE]).await;

    assert!(!h.platform.foreground_held());
    assert_eq!(h.platform.foreground_acquisitions(), 0);
}

#[tokio::test(start_paused = true)]
async fn accounts_can_be_added_and_removed_while_running() {
    let alice = FakeSession::ready(ALICE);
    let bob = FakeSession::ready(BOB);
    let mut h = Harness::new(&[&alice]);

    h.send(StreamCommand::AddAccount {
        account_id: BOB.into(),
    })
    .await;

    h.start(&[ALICE]).await;
    h.send(StreamCommand::Pause).await;
    h.directory.insert(Arc::clone(&bob));
    h.send(StreamCommand::AddAccount {
        account_id: BOB.into(),
    })
    .await;
    assert_eq!(
        bob.calls(),
        vec![
            SessionCall::Attach(2),
            SessionCall::Start(Some("s72594_4483_1934".into())),
            SessionCall::Pause,
        ]
    );

    h.send(StreamCommand::AddAccount {
        account_id: BOB.into(),
    })
    .await;
    h.send(StreamCommand::RemoveAccount {
        account_id: BOB.into(),
    })
    .await;
    h.send(StreamCommand::RemoveAccount {
        account_id: BOB.into(),
    })
    .await;

    assert!(!bob.is_attached());
    assert_eq!(bob.count(|call| *call == SessionCall::Stop), 1);
    assert!(!bob.emit(SessionEventKind::BatchComplete));
    assert!(alice.is_attached());
    assert_eq!(
        rejection_codes(&h.drain_events()),
        vec![
            "invalid_state_transition",
            "account_already_registered",
            "unknown_account",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn added_account_turns_on_multi_account_labels() {
    let alice = FakeSession::ready(ALICE);
    let bob = FakeSession::ready(BOB);
    let h = Harness::new(&[&alice, &bob]);
    h.start(&[ALICE]).await;
    h.send(StreamCommand::AddAccount {
        account_id: BOB.into(),
    })
    .await;

    alice.emit_bing(message("$m1", GARDEN, CAROL, "hello"), room(GARDEN, "Garden"));
    alice.emit(SessionEventKind::BatchComplete);
    settle().await;

    let posted = h.posted_messages();
    assert_eq!(posted.len(), 1);
    assert!(posted[0].multi_account);
}

#[tokio::test(start_paused = true)]
async fn sessions_dropped_by_their_owner_are_skipped() {
    let alice = FakeSession::ready(ALICE);
    let bob = FakeSession::ready(BOB);
    let h = Harness::new(&[&alice, &bob]);
    h.start(&[ALICE, BOB]).await;

    h.directory.remove(BOB);
    drop(bob);
    h.send(StreamCommand::Pause).await;

    assert_eq!(h.handle.current_state(), ControllerState::Paused);
    assert_eq!(alice.count(|call| *call == SessionCall::Pause), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_post_is_reported_and_wake_lock_released() {
    let alice = FakeSession::ready(ALICE);
    let mut h = Harness::new(&[&alice]);
    h.platform.set_fail_posts(true);
    h.start(&[ALICE]).await;

    alice.emit_bing(message("$m1", GARDEN, CAROL, "hello"), room(GARDEN, "Garden"));
    alice.emit(SessionEventKind::BatchComplete);
    settle().await;

    assert!(!h.platform.wake_lock_held());
    assert_eq!(h.platform.wake_lock_acquisitions(), 1);
    assert!(h.drain_events().iter().any(|event| matches!(
        event,
        ControllerEvent::NotificationFlushFailed { code, .. } if code == "notification_post_failed"
    )));
    assert_eq!(h.handle.current_state(), ControllerState::Started);
}
