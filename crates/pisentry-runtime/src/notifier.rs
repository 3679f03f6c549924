//! Outbound operator notifications.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use pisentry_core::CaptureArtifact;

use crate::store::ChannelStore;
use crate::telegram::{TelegramClient, TelegramError};

/// Text sent ahead of the files of a confirmed capture.
pub const MOTION_TEXT: &str = "Motion detected";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("no operator channel yet; send the bot a message first")]
    NoChannel,

    #[error(transparent)]
    Telegram(#[from] TelegramError),
}

/// Delivery to the operator.
pub trait Notifier: Send + Sync + 'static {
    fn send_text(&self, text: &str) -> impl Future<Output = Result<(), NotifyError>> + Send;

    fn send_file(&self, path: &Path) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// Send the motion text, then every file of `artifact`, stopping at the first failure.
pub async fn forward_artifact<N: Notifier>(
    notifier: &N,
    artifact: &CaptureArtifact,
) -> Result<(), NotifyError> {
    notifier.send_text(MOTION_TEXT).await?;
    send_files(notifier, artifact).await
}

pub async fn send_files<N: Notifier>(
    notifier: &N,
    artifact: &CaptureArtifact,
) -> Result<(), NotifyError> {
    for path in &artifact.paths {
        notifier.send_file(path).await?;
    }
    Ok(())
}

/// Telegram delivery to the persisted operator channel.
pub struct TelegramNotifier {
    client: Arc<TelegramClient>,
    store: Arc<ChannelStore>,
}

impl TelegramNotifier {
    pub fn new(client: Arc<TelegramClient>, store: Arc<ChannelStore>) -> Self {
        Self { client, store }
    }

    fn channel(&self) -> Result<i64, NotifyError> {
        self.store.get().ok_or(NotifyError::NoChannel)
    }
}

impl Notifier for TelegramNotifier {
    async fn send_text(&self, text: &str) -> Result<(), NotifyError> {
        let chat = self.channel()?;
        self.client.send_message(chat, text).await?;
        Ok(())
    }

    async fn send_file(&self, path: &Path) -> Result<(), NotifyError> {
        let chat = self.channel()?;
        self.client.send_media(chat, path).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use pisentry_core::{AlarmState, CaptureMode};

    use crate::alarm::AlarmStateMachine;
    use crate::presence::tests::ts;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Sent {
        Text(String),
        File(PathBuf),
    }

    /// Records everything sent; optionally fails every call. With an alarm
    /// attached it also records the alarm state at each send.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        sent: Mutex<Vec<Sent>>,
        states: Mutex<Vec<AlarmState>>,
        alarm: Option<Arc<AlarmStateMachine>>,
        fail: bool,
    }

    impl RecordingNotifier {
        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub(crate) fn watching(mut self, alarm: Arc<AlarmStateMachine>) -> Self {
            self.alarm = Some(alarm);
            self
        }

        pub(crate) fn sent(&self) -> Vec<Sent> {
            self.sent.lock().expect("lock").clone()
        }

        /// Alarm state at each send attempt.
        pub(crate) fn states(&self) -> Vec<AlarmState> {
            self.states.lock().expect("lock").clone()
        }

        fn record(&self, sent: Sent) -> Result<(), NotifyError> {
            if let Some(alarm) = &self.alarm {
                self.states.lock().expect("lock").push(alarm.current());
            }
            if self.fail {
                return Err(NotifyError::NoChannel);
            }
            self.sent.lock().expect("lock").push(sent);
            Ok(())
        }
    }

    impl Notifier for RecordingNotifier {
        async fn send_text(&self, text: &str) -> Result<(), NotifyError> {
            self.record(Sent::Text(text.to_string()))
        }

        async fn send_file(&self, path: &Path) -> Result<(), NotifyError> {
            self.record(Sent::File(path.to_path_buf()))
        }
    }

    #[tokio::test]
    async fn forward_sends_text_then_files() {
        let notifier = RecordingNotifier::default();
        let artifact = CaptureArtifact::new(
            vec![PathBuf::from("/tmp/a-1.jpeg"), PathBuf::from("/tmp/a-2.jpeg")],
            ts("2026-10-14T12:00:00Z"),
            CaptureMode::Photo,
        );

        forward_artifact(&notifier, &artifact).await.expect("sent");

        assert_eq!(
            notifier.sent(),
            vec![
                Sent::Text(MOTION_TEXT.to_string()),
                Sent::File(PathBuf::from("/tmp/a-1.jpeg")),
                Sent::File(PathBuf::from("/tmp/a-2.jpeg")),
            ]
        );
    }

    #[tokio::test]
    async fn telegram_notifier_requires_channel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(ChannelStore::load(dir.path().join("data.json")));
        let client = Arc::new(TelegramClient::new("123:abc").expect("client"));
        let notifier = TelegramNotifier::new(client, store);

        assert!(matches!(
            notifier.send_text("hello").await,
            Err(NotifyError::NoChannel)
        ));
        assert!(matches!(
            notifier.send_file(Path::new("/tmp/x.gif")).await,
            Err(NotifyError::NoChannel)
        ));
    }
}
