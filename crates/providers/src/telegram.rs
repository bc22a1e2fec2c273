use crate::{
    Emphasis, OutgoingMedia, ProgressFn, ProviderError, RemoteDirectory, SentMessage, TargetInfo,
    TransferEngine, UploadPayload, UploadedFile,
};
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

const STREAM_CHUNK: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_base: String,
    pub token: Option<String>,
    pub session_file: PathBuf,
}

pub struct TelegramBot {
    client: Client,
    cfg: TelegramConfig,
    token: RwLock<Option<String>>,
}

#[derive(Serialize, Deserialize)]
struct SessionFile {
    token: String,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct User {
    id: i64,
    username: Option<String>,
}

#[derive(Deserialize)]
struct Chat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
    title: Option<String>,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

impl Chat {
    fn into_target(self) -> TargetInfo {
        let title = self
            .title
            .or_else(|| {
                let full = [self.first_name, self.last_name]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                (!full.is_empty()).then_some(full)
            })
            .or(self.username)
            .unwrap_or_default();
        TargetInfo {
            id: self.id,
            kind: self.kind,
            title,
        }
    }
}

#[derive(Deserialize)]
struct Message {
    message_id: i64,
    chat: Option<Chat>,
}

#[derive(Deserialize)]
struct ChatMemberUpdated {
    chat: Chat,
}

#[derive(Deserialize)]
struct Update {
    message: Option<Message>,
    channel_post: Option<Message>,
    my_chat_member: Option<ChatMemberUpdated>,
}

impl TelegramBot {
    pub fn new(cfg: TelegramConfig) -> Self {
        let token = cfg.token.clone().or_else(|| load_session(&cfg.session_file));
        Self {
            client: Client::new(),
            cfg,
            token: RwLock::new(token),
        }
    }

    fn method_url(&self, token: &str, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.cfg.api_base.trim_end_matches('/'),
            token,
            method
        )
    }

    async fn token(&self) -> Result<String, ProviderError> {
        self.token
            .read()
            .await
            .clone()
            .ok_or(ProviderError::NotAuthorized)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        token: &str,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T, ProviderError> {
        let resp = self
            .client
            .post(self.method_url(token, method))
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        parse_response(resp).await
    }

    async fn call_multipart<T: DeserializeOwned>(
        &self,
        token: &str,
        method: &str,
        form: Form,
    ) -> Result<T, ProviderError> {
        let resp = self
            .client
            .post(self.method_url(token, method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        parse_response(resp).await
    }
}

async fn parse_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ProviderError> {
    let parsed: ApiResponse<T> = resp
        .json()
        .await
        .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
    match parsed {
        ApiResponse {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        ApiResponse {
            error_code,
            description,
            ..
        } => Err(ProviderError::Api {
            code: error_code.unwrap_or_default(),
            description: description.unwrap_or_else(|| "empty response".into()),
        }),
    }
}

fn load_session(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<SessionFile>(&raw) {
        Ok(session) => Some(session.token),
        Err(e) => {
            warn!("ignoring unreadable session file {}: {}", path.display(), e);
            None
        }
    }
}

fn save_session(path: &Path, token: &str) -> Result<(), ProviderError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let body = serde_json::to_string_pretty(&SessionFile {
        token: token.to_string(),
    })
    .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
    std::fs::write(path, body)?;
    Ok(())
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn text_body(chat_id: i64, text: &str, emphasis: Emphasis) -> serde_json::Value {
    match emphasis {
        Emphasis::Plain => serde_json::json!({ "chat_id": chat_id, "text": text }),
        Emphasis::Bold => serde_json::json!({
            "chat_id": chat_id,
            "text": format!("<b>{}</b>", escape_html(text)),
            "parse_mode": "HTML",
        }),
    }
}

pub async fn stream_file(path: &Path, progress: ProgressFn) -> Result<UploadedFile, ProviderError> {
    let file = tokio::fs::File::open(path).await?;
    let total = file.metadata().await?.len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut sent = 0u64;
    progress(0, total);
    let stream = ReaderStream::with_capacity(file, STREAM_CHUNK).map_ok(move |chunk: Bytes| {
        sent += chunk.len() as u64;
        progress(sent, total);
        chunk
    });
    Ok(UploadedFile {
        name,
        size: total,
        payload: UploadPayload::Stream(reqwest::Body::wrap_stream(stream)),
    })
}

#[async_trait::async_trait]
impl TransferEngine for TelegramBot {
    async fn upload(
        &self,
        path: &Path,
        progress: ProgressFn,
    ) -> Result<UploadedFile, ProviderError> {
        stream_file(path, progress).await
    }
}

#[async_trait::async_trait]
impl RemoteDirectory for TelegramBot {
    async fn is_authorized(&self) -> Result<bool, ProviderError> {
        let Some(token) = self.token.read().await.clone() else {
            return Ok(false);
        };
        match self
            .call::<User>(&token, "getMe", &serde_json::json!({}))
            .await
        {
            Ok(_) => Ok(true),
            Err(ProviderError::Api { code: 401, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn credential_prompt(&self) -> &str {
        "Please enter your bot token"
    }

    async fn authenticate(&self, credential: &str) -> Result<bool, ProviderError> {
        let token = credential.trim();
        if token.is_empty() {
            return Ok(false);
        }
        let me = match self
            .call::<User>(token, "getMe", &serde_json::json!({}))
            .await
        {
            Ok(me) => me,
            Err(ProviderError::Api { code, description }) => {
                warn!("authentication rejected ({code}): {description}");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        info!(
            bot = me.id,
            username = me.username.as_deref().unwrap_or(""),
            "authenticated"
        );
        save_session(&self.cfg.session_file, token)?;
        *self.token.write().await = Some(token.to_string());
        Ok(true)
    }

    async fn resolve_target(&self, id: i64) -> Result<TargetInfo, ProviderError> {
        let token = self.token().await?;
        match self
            .call::<Chat>(&token, "getChat", &serde_json::json!({ "chat_id": id }))
            .await
        {
            Ok(chat) => Ok(chat.into_target()),
            Err(ProviderError::Api {
                code: 400,
                description,
            }) => Err(ProviderError::TargetNotFound(format!("{id}: {description}"))),
            Err(e) => Err(e),
        }
    }

    async fn list_targets(&self) -> Result<Vec<TargetInfo>, ProviderError> {
        let token = self.token().await?;
        let updates: Vec<Update> = self
            .call(
                &token,
                "getUpdates",
                &serde_json::json!({
                    "allowed_updates": ["message", "channel_post", "my_chat_member"]
                }),
            )
            .await?;
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for update in updates {
            let chat = update
                .message
                .and_then(|m| m.chat)
                .or_else(|| update.channel_post.and_then(|m| m.chat))
                .or_else(|| update.my_chat_member.map(|m| m.chat));
            if let Some(chat) = chat {
                if seen.insert(chat.id) {
                    targets.push(chat.into_target());
                }
            }
        }
        Ok(targets)
    }

    async fn send_file(
        &self,
        target: &TargetInfo,
        media: OutgoingMedia,
    ) -> Result<SentMessage, ProviderError> {
        let token = self.token().await?;
        let file_name = media.file_name().to_string();
        let video = media
            .video_attribute()
            .filter(|_| media.supports_streaming);
        let (method, field) = if video.is_some() {
            ("sendVideo", "video")
        } else {
            ("sendDocument", "document")
        };

        let mut form = Form::new()
            .text("chat_id", target.id.to_string())
            .text("caption", media.caption.clone());

        form = match media.file.payload {
            UploadPayload::Stream(body) => {
                let part = Part::stream_with_length(body, media.file.size)
                    .file_name(file_name)
                    .mime_str(&media.mime_type)
                    .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
                form.part(field, part)
            }
            UploadPayload::Remote(id) => form.text(field, id),
        };

        if let Some((width, height, duration)) = video {
            form = form
                .text("width", width.to_string())
                .text("height", height.to_string())
                .text("duration", duration.to_string())
                .text("supports_streaming", "true");
        }

        if let Some(thumb) = &media.thumbnail {
            match tokio::fs::read(thumb).await {
                Ok(bytes) => {
                    let part = Part::bytes(bytes)
                        .file_name("thumb.jpg")
                        .mime_str("image/jpeg")
                        .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
                    form = form.part("thumbnail", part);
                }
                Err(e) => debug!("thumbnail {} unreadable: {}", thumb.display(), e),
            }
        }

        let message: Message = self.call_multipart(&token, method, form).await?;
        Ok(SentMessage {
            id: message.message_id,
        })
    }

    async fn send_text(
        &self,
        target: &TargetInfo,
        text: &str,
        emphasis: Emphasis,
    ) -> Result<(), ProviderError> {
        let token = self.token().await?;
        let body = text_body(target.id, text, emphasis);
        let _: Message = self.call(&token, "sendMessage", &body).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ProviderError> {
        debug!("telegram session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_title_falls_back_to_person_name() {
        let chat: Chat = serde_json::from_value(serde_json::json!({
            "id": 42,
            "type": "private",
            "first_name": "Ada",
            "last_name": "Lovelace"
        }))
        .unwrap();
        let target = chat.into_target();
        assert_eq!(target.title, "Ada Lovelace");
        assert_eq!(target.kind, "private");
    }

    #[test]
    fn session_round_trips_through_disk() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested").join("session.json");
        save_session(&path, "123:abc").unwrap();
        assert_eq!(load_session(&path).as_deref(), Some("123:abc"));
    }

    #[test]
    fn bold_text_is_escaped() {
        assert_eq!(escape_html("a<b>&c"), "a&lt;b&gt;&amp;c");
    }

    #[test]
    fn headers_use_html_bold_only_when_emphasised() {
        let bold = text_body(-100, "Q&A <2024>", Emphasis::Bold);
        assert_eq!(bold["text"], "<b>Q&amp;A &lt;2024&gt;</b>");
        assert_eq!(bold["parse_mode"], "HTML");
        assert_eq!(bold["chat_id"], -100);

        let plain = text_body(-100, "Q&A/*raw*", Emphasis::Plain);
        assert_eq!(plain["text"], "Q&A/*raw*");
        assert!(plain.get("parse_mode").is_none());
    }

    #[test]
    fn configured_token_wins_over_session_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("session.json");
        save_session(&path, "from-disk").unwrap();
        let bot = TelegramBot::new(TelegramConfig {
            api_base: "https://example.invalid/".into(),
            token: Some("from-config".into()),
            session_file: path,
        });
        assert_eq!(
            bot.method_url("t", "getMe"),
            "https://example.invalid/bott/getMe"
        );
        let token = bot.token.try_read().unwrap().clone();
        assert_eq!(token.as_deref(), Some("from-config"));
    }
}
