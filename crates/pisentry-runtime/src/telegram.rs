//! Minimal Telegram Bot API client.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

const API_BASE: &str = "https://api.telegram.org";

/// Per-request timeout for uploads and short calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error: {0}")]
    Api(String),

    #[error("unsupported media file: {0}")]
    UnsupportedMedia(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<T, TelegramError> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(TelegramError::Api(
                self.description
                    .unwrap_or_else(|| "request failed without description".to_string()),
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: i64,
}

/// Upload method for a capture file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Document,
    Video,
}

impl MediaKind {
    pub fn method(self) -> &'static str {
        match self {
            Self::Photo => "sendPhoto",
            Self::Document => "sendDocument",
            Self::Video => "sendVideo",
        }
    }

    /// Multipart field carrying the file.
    pub fn field(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Document => "document",
            Self::Video => "video",
        }
    }
}

/// GIFs go as documents so Telegram keeps the animation.
pub fn media_kind(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpeg" | "jpg" => Some(MediaKind::Photo),
        "gif" => Some(MediaKind::Document),
        "mp4" => Some(MediaKind::Video),
        _ => None,
    }
}

pub struct TelegramClient {
    http: reqwest::Client,
    base: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self, TelegramError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base: format!("{API_BASE}/bot{token}"),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.base)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TelegramError> {
        let response: ApiResponse<T> = request.send().await?.json().await?;
        response.into_result()
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let request = self
            .http
            .post(self.url("sendMessage"))
            .timeout(REQUEST_TIMEOUT)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "Markdown",
            }));
        self.call::<serde_json::Value>(request).await?;
        Ok(())
    }

    pub async fn send_media(&self, chat_id: i64, path: &Path) -> Result<(), TelegramError> {
        let kind =
            media_kind(path).ok_or_else(|| TelegramError::UnsupportedMedia(path.to_path_buf()))?;
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "capture".to_string());

        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part(
                kind.field(),
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );
        let request = self
            .http
            .post(self.url(kind.method()))
            .timeout(REQUEST_TIMEOUT)
            .multipart(form);
        self.call::<serde_json::Value>(request).await?;
        tracing::debug!("sent {} via {}", path.display(), kind.method());
        Ok(())
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        long_poll: Duration,
    ) -> Result<Vec<Update>, TelegramError> {
        let mut query = vec![("timeout", long_poll.as_secs().to_string())];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }
        let request = self
            .http
            .get(self.url("getUpdates"))
            .timeout(long_poll + Duration::from_secs(10))
            .query(&query);
        self.call(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_routing_by_extension() {
        assert_eq!(media_kind(Path::new("/tmp/a.jpeg")), Some(MediaKind::Photo));
        assert_eq!(media_kind(Path::new("/tmp/a.JPG")), Some(MediaKind::Photo));
        assert_eq!(media_kind(Path::new("/tmp/a.gif")), Some(MediaKind::Document));
        assert_eq!(media_kind(Path::new("/tmp/a.mp4")), Some(MediaKind::Video));
        assert_eq!(media_kind(Path::new("/tmp/a.png")), None);
        assert_eq!(media_kind(Path::new("/tmp/noext")), None);
        assert_eq!(MediaKind::Document.method(), "sendDocument");
        assert_eq!(MediaKind::Video.field(), "video");
    }

    #[test]
    fn parse_updates_response() {
        let body = r#"{"ok":true,"result":[
            {"update_id":10,"message":{"message_id":1,"chat":{"id":42,"type":"private"},"text":"/status"}},
            {"update_id":11,"edited_message":{"message_id":1,"chat":{"id":42}}}
        ]}"#;
        let resp: ApiResponse<Vec<Update>> = serde_json::from_str(body).expect("parses");
        let updates = resp.into_result().expect("ok");
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].update_id, 10);
        let msg = updates[0].message.as_ref().expect("message");
        assert_eq!(msg.chat.id, 42);
        assert_eq!(msg.text.as_deref(), Some("/status"));
        assert_eq!(updates[1].message, None);
    }

    #[test]
    fn api_error_carries_description() {
        let body = r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#;
        let resp: ApiResponse<Vec<Update>> = serde_json::from_str(body).expect("parses");
        match resp.into_result() {
            Err(TelegramError::Api(desc)) => assert_eq!(desc, "Unauthorized"),
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsupported_media_fails_before_upload() {
        let client = TelegramClient::new("123:abc").expect("client");
        let result = client.send_media(1, Path::new("/tmp/capture.png")).await;
        assert!(matches!(result, Err(TelegramError::UnsupportedMedia(_))));
    }
}
