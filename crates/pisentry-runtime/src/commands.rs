//! Operator commands over Telegram.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use pisentry_core::{CaptureMode, CaptureRequest, OperatorCommand};

use crate::alarm::{AlarmCommand, AlarmStateMachine};
use crate::camera::{Camera, CaptureLock, blocking, capture_request};
use crate::notifier::{Notifier, send_files};
use crate::store::ChannelStore;
use crate::telegram::TelegramClient;

/// Long-poll duration for `getUpdates`.
const LONG_POLL: Duration = Duration::from_secs(30);

/// Pause after a failed poll.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Result of handling one inbound message.
#[derive(Debug)]
pub enum Handled {
    /// Not from the operator, or not a command.
    Ignored,
    Replied,
    /// An ad-hoc capture is running and will send its own files.
    Capturing(JoinHandle<()>),
}

pub struct CommandListener<C, N> {
    alarm: Arc<AlarmStateMachine>,
    store: Arc<ChannelStore>,
    notifier: Arc<N>,
    camera: Arc<C>,
    lock: CaptureLock,
    gif_length: u32,
}

impl<C: Camera + 'static, N: Notifier> CommandListener<C, N> {
    pub fn new(
        alarm: Arc<AlarmStateMachine>,
        store: Arc<ChannelStore>,
        notifier: Arc<N>,
        camera: Arc<C>,
        lock: CaptureLock,
        gif_length: u32,
    ) -> Self {
        Self {
            alarm,
            store,
            notifier,
            camera,
            lock,
            gif_length,
        }
    }

    pub async fn handle_message(&self, chat_id: i64, text: &str) -> Handled {
        tracing::debug!("received message from chat {chat_id}: {text}");

        match self.store.get() {
            None => {
                let store = Arc::clone(&self.store);
                match tokio::task::spawn_blocking(move || store.remember(chat_id)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::error!("failed to save operator channel: {e}"),
                    Err(e) => tracing::error!("operator channel write task failed: {e}"),
                }
            }
            Some(operator) if operator != chat_id => {
                tracing::warn!("ignoring message from unknown chat {chat_id}");
                return Handled::Ignored;
            }
            Some(_) => {}
        }

        let Some(command) = OperatorCommand::parse(text) else {
            tracing::debug!("not a command: {text}");
            return Handled::Ignored;
        };

        let reply = match command {
            OperatorCommand::Help => OperatorCommand::HELP_TEXT.to_string(),
            OperatorCommand::Status => self.status_text(),
            OperatorCommand::Enable => {
                let state = self.alarm.apply_command(AlarmCommand::Enable).state();
                format!("Alarm enabled, now *{state}*")
            }
            OperatorCommand::Disable => {
                let state = self.alarm.apply_command(AlarmCommand::Disable).state();
                format!("Alarm is now *{state}*")
            }
            OperatorCommand::Photo => return self.spawn_capture(CaptureMode::Photo, 1),
            OperatorCommand::Gif => return self.spawn_capture(CaptureMode::Gif, self.gif_length),
        };

        if let Err(e) = self.notifier.send_text(&reply).await {
            tracing::warn!("failed to reply to operator: {e}");
        }
        Handled::Replied
    }

    /// Alarm state and the last sighting of each trusted device.
    pub fn status_text(&self) -> String {
        let mut text = format!("*Alarm state:* {}\n*Trusted devices:*", self.alarm.current());
        for (mac, seen) in self.alarm.presence().snapshot() {
            match seen {
                Some(at) => {
                    let at = at.format("%Y-%m-%d %H:%M:%S UTC");
                    let _ = write!(text, "\n`{mac}` last seen {at}");
                }
                None => {
                    let _ = write!(text, "\n`{mac}` not seen yet");
                }
            }
        }
        text
    }

    fn spawn_capture(&self, mode: CaptureMode, count: u32) -> Handled {
        let request = capture_request(self.alarm.presence().now(), mode, count);
        let camera = Arc::clone(&self.camera);
        let lock = self.lock.clone();
        let notifier = Arc::clone(&self.notifier);
        Handled::Capturing(tokio::spawn(adhoc_capture(camera, lock, notifier, request)))
    }
}

/// Capture on operator request regardless of alarm state, then send the files.
async fn adhoc_capture<C: Camera + 'static, N: Notifier>(
    camera: Arc<C>,
    lock: CaptureLock,
    notifier: Arc<N>,
    request: CaptureRequest,
) {
    tracing::info!("operator requested {}", request.mode);
    let result = lock
        .exclusive(blocking(move || {
            camera.stop_motion_analysis()?;
            camera.capture(&request)
        }))
        .await;

    let sent = match result {
        Ok(artifact) => send_files(&*notifier, &artifact).await,
        Err(e) => {
            tracing::warn!("ad-hoc capture failed: {e}");
            notifier.send_text("Capture failed").await
        }
    };
    if let Err(e) = sent {
        tracing::warn!("failed to send ad-hoc capture: {e}");
    }
}

/// Poll Telegram for messages forever, handing each to `listener`.
pub async fn run_command_loop<C: Camera + 'static, N: Notifier>(
    client: Arc<TelegramClient>,
    listener: CommandListener<C, N>,
) {
    let mut offset: Option<i64> = None;
    loop {
        match client.get_updates(offset, LONG_POLL).await {
            Ok(updates) => {
                for update in updates {
                    offset = Some(update.update_id + 1);
                    let Some(message) = update.message else {
                        continue;
                    };
                    let Some(text) = message.text else {
                        continue;
                    };
                    listener.handle_message(message.chat.id, &text).await;
                }
            }
            Err(e) => {
                tracing::warn!("telegram poll failed: {e}");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}
