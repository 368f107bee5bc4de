mod logging;
mod simulated;

use std::{process::ExitCode, time::Duration};

use eventstream_core::{
    ControllerChannelError, ControllerError, ControllerEvent, ControllerState, EventStream,
    StoreReadiness, StreamCommand, UiPresence,
};
use eventstream_platform::{InMemoryPlatform, PlatformServices};
use eventstream_runtime::{ControllerConfig, ControllerHandle, spawn_controller};
use simulated::{SimulatedDirectory, SimulatedSession};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use uuid::Uuid;

const ALICE: &str = "@alice:example.org";
const BOB: &str = "@bob:example.org";
const CAROL: &str = "@carol:example.org";
const GARDEN: &str = "!garden:example.org";
const HARBOR: &str = "!harbor:example.org";

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    info!("starting eventstream-smoke");

    let config = match ControllerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            let err = ControllerError::from(err);
            error!(code = %err.code, error = %err.message, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "smoke run aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ControllerConfig) -> Result<(), ControllerChannelError> {
    let reissue_delay = Duration::from_millis(config.catchup_reissue_delay_ms);
    let platform = InMemoryPlatform::default();
    let alice = SimulatedSession::new(ALICE, StoreReadiness::Ready);
    let bob = SimulatedSession::new(BOB, StoreReadiness::Loading);
    let directory = SimulatedDirectory::new(&[&alice, &bob]);
    let handle = spawn_controller(config, directory, PlatformServices::in_memory(&platform));
    let observer = tokio::spawn(log_events(handle.subscribe()));

    command(
        &handle,
        StreamCommand::Start {
            account_ids: Some(vec![ALICE.to_owned(), BOB.to_owned()]),
        },
        ControllerState::Started,
    )
    .await?;
    tokio::time::sleep(Duration::from_millis(400)).await;

    handle.set_ui_presence(UiPresence::viewing(ALICE, GARDEN));
    alice.deliver_message(GARDEN, "Garden", CAROL, "visible on screen, no notification");
    alice.complete_batch();

    handle.set_ui_presence(UiPresence::background());
    for body in ["boat is in", "bring rope", "and snacks"] {
        bob.deliver_message(HARBOR, "Harbor", CAROL, body);
    }
    bob.complete_batch();
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!(unread = handle.unread_total(), "after background burst");

    command(&handle, StreamCommand::Pause, ControllerState::Paused).await?;

    let call_id = Uuid::new_v4().to_string();
    alice.ring(GARDEN, CAROL, &call_id);
    command(&handle, StreamCommand::Catchup, ControllerState::Catchup).await?;
    tokio::time::sleep(reissue_delay * 2).await;
    info!(
        ringing = handle.is_call_notification_active(&call_id),
        "call notification state"
    );

    alice.hang_up(GARDEN, CAROL, &call_id);
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.dismiss_notifications(Some(HARBOR));

    command(&handle, StreamCommand::Stop, ControllerState::Stopped).await?;

    info!(
        posted = platform.post_log().len(),
        still_shown = platform.shown().len(),
        badge = platform.badge(),
        wake_locks = platform.wake_lock_acquisitions(),
        "smoke run finished"
    );
    observer.abort();
    Ok(())
}

async fn command(
    handle: &ControllerHandle,
    command: StreamCommand,
    expected: ControllerState,
) -> Result<(), ControllerChannelError> {
    info!(command = command.kind(), "sending command");
    handle.send_and_wait(command, expected).await
}

async fn log_events(mut events: EventStream) {
    loop {
        match events.recv().await {
            Ok(ControllerEvent::CommandRejected { code, message }) => {
                warn!(%code, %message, "command rejected")
            }
            Ok(event) => info!(event = ?event, "controller event"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event observer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
