//! Posting a sheet's images and caption to a chat.
//!
//! ## Message Layout
//!
//! * **Several images** — one album (`sendMediaGroup`) per ten images, each
//!   image attached to the multipart body under its own name and referenced
//!   as `attach://<name>` from the JSON `media` list. A trailing single
//!   image that cannot form an album goes out as a plain photo. The caption
//!   follows as one text message (`sendMessage`), split if it exceeds the
//!   message limit. The albums themselves carry no caption, so the text is
//!   never posted twice.
//! * **One image** — a single `sendPhoto` with the caption attached. If the
//!   caption is too long for a photo it is sent as a text message instead.
//!
//! Nothing is retried: a rejected call fails the sheet.

use crate::error::{ApiError, SheetError};
use crate::pipeline::chunk::RowWindow;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Album size limits of the Bot API.
pub const MAX_ALBUM_ITEMS: usize = 10;
/// Longest caption a photo may carry.
pub const MAX_CAPTION_CHARS: usize = 1024;
/// Longest text message.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// A rasterised, trimmed image ready to be posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedImage {
    pub path: PathBuf,
    /// File name shown in the chat, e.g. `Jan_1-40.png`.
    pub file_name: String,
    /// Rows covered; `None` for a whole-sheet export.
    pub window: Option<RowWindow>,
}

impl ExportedImage {
    pub fn new(path: impl Into<PathBuf>, window: Option<RowWindow>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            file_name,
            window,
        }
    }

    /// Multipart field name: the file stem reduced to `[A-Za-z0-9_]`.
    pub fn attach_name(&self) -> String {
        let stem = Path::new(&self.file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        stem.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

/// One entry of an album's `media` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub media: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// A file to upload under a multipart field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub field: String,
    pub file_name: String,
    pub path: PathBuf,
}

/// The subset of the chat Bot API the publisher needs.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn send_media_group(
        &self,
        chat_id: &str,
        media: &[MediaItem],
        attachments: &[Attachment],
    ) -> Result<(), ApiError>;

    async fn send_photo(
        &self,
        chat_id: &str,
        photo: &Attachment,
        caption: Option<&str>,
    ) -> Result<(), ApiError>;

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ApiError>;
}

/// Build the `media` list and attachments for one album.
///
/// Attachment field names are made unique by suffixing the position when
/// two stems sanitise to the same name. `caption`, if any, rides on the
/// first item.
pub fn album_items(images: &[ExportedImage], caption: Option<&str>) -> (Vec<MediaItem>, Vec<Attachment>) {
    let mut media = Vec::with_capacity(images.len());
    let mut attachments: Vec<Attachment> = Vec::with_capacity(images.len());

    for (i, img) in images.iter().enumerate() {
        let mut field = img.attach_name();
        if field.is_empty() || attachments.iter().any(|a| a.field == field) {
            field = format!("{field}_{i}");
        }
        media.push(MediaItem {
            kind: "photo".to_string(),
            media: format!("attach://{field}"),
            caption: if i == 0 {
                caption.filter(|c| !c.is_empty()).map(str::to_string)
            } else {
                None
            },
        });
        attachments.push(Attachment {
            field,
            file_name: img.file_name.clone(),
            path: img.path.clone(),
        });
    }
    (media, attachments)
}

/// Split text into messages of at most `limit` characters, on line breaks
/// where possible.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split('\n') {
        let mut rest: Vec<char> = line.chars().collect();
        loop {
            let sep = usize::from(!current.is_empty());
            if current_len + sep + rest.len() <= limit {
                if sep == 1 {
                    current.push('\n');
                }
                current.extend(rest.iter());
                current_len += sep + rest.len();
                break;
            }
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
                current_len = 0;
                continue;
            }
            // A single line longer than the limit is cut hard.
            let tail = rest.split_off(limit);
            parts.push(rest.into_iter().collect());
            rest = tail;
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Post a sheet's images and caption. Returns the number of API calls made.
pub async fn publish_sheet(
    api: &dyn ChatApi,
    chat_id: &str,
    images: &[ExportedImage],
    caption: &str,
) -> Result<usize, SheetError> {
    let fail = |e: ApiError| SheetError::PublishFailed {
        detail: e.to_string(),
    };
    let mut calls = 0;

    match images {
        [] => {
            return Err(SheetError::PublishFailed {
                detail: "no images to publish".into(),
            })
        }
        [only] => {
            let (_, attachments) = album_items(std::slice::from_ref(only), None);
            let fits = caption.chars().count() <= MAX_CAPTION_CHARS;
            let inline = (fits && !caption.is_empty()).then_some(caption);
            api.send_photo(chat_id, &attachments[0], inline)
                .await
                .map_err(fail)?;
            calls += 1;
            debug!("Sent photo {}", only.file_name);
            if fits {
                return Ok(calls);
            }
        }
        many => {
            for batch in many.chunks(MAX_ALBUM_ITEMS) {
                let (media, attachments) = album_items(batch, None);
                if let [single] = attachments.as_slice() {
                    api.send_photo(chat_id, single, None).await.map_err(fail)?;
                } else {
                    api.send_media_group(chat_id, &media, &attachments)
                        .await
                        .map_err(fail)?;
                }
                calls += 1;
                debug!("Sent album of {} images", batch.len());
            }
        }
    }

    for part in split_message(caption, MAX_MESSAGE_CHARS) {
        api.send_message(chat_id, &part).await.map_err(fail)?;
        calls += 1;
    }
    info!("Published {} images in {} calls", images.len(), calls);
    Ok(calls)
}

// ── Telegram Bot API client ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BotResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// [`ChatApi`] over the Telegram Bot API.
pub struct TelegramClient {
    http: reqwest::Client,
    base: Url,
    token: String,
}

impl fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramClient")
            .field("base", &self.base.as_str())
            .field("token", &"<redacted>")
            .finish()
    }
}

impl TelegramClient {
    pub fn new(http: reqwest::Client, base: &str, token: impl Into<String>) -> Result<Self, ApiError> {
        let base = Url::parse(base).map_err(|e| ApiError::Transport(format!("base URL: {e}")))?;
        Ok(Self {
            http,
            base,
            token: token.into(),
        })
    }

    fn method_url(&self, method: &str) -> Result<Url, ApiError> {
        // Never put this URL in a log line: it embeds the bot token.
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Transport("bot API base cannot be a base URL".into()))?
            .pop_if_empty()
            .push(&format!("bot{}", self.token))
            .push(method);
        Ok(url)
    }

    async fn check(response: reqwest::Response) -> Result<(), ApiError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::from_response(response).await);
        }
        let body: BotResponse = response.json().await?;
        if !body.ok {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: body.description.unwrap_or_else(|| "ok=false".into()),
            });
        }
        Ok(())
    }

    async fn file_part(attachment: &Attachment) -> Result<Part, ApiError> {
        let bytes = tokio::fs::read(&attachment.path).await.map_err(|e| {
            ApiError::Transport(format!("reading {}: {e}", attachment.path.display()))
        })?;
        Part::bytes(bytes)
            .file_name(attachment.file_name.clone())
            .mime_str("image/png")
            .map_err(ApiError::from)
    }
}

#[async_trait]
impl ChatApi for TelegramClient {
    async fn send_media_group(
        &self,
        chat_id: &str,
        media: &[MediaItem],
        attachments: &[Attachment],
    ) -> Result<(), ApiError> {
        let media_json =
            serde_json::to_string(media).map_err(|e| ApiError::Decode(e.to_string()))?;
        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("media", media_json);
        for attachment in attachments {
            form = form.part(attachment.field.clone(), Self::file_part(attachment).await?);
        }
        let response = self
            .http
            .post(self.method_url("sendMediaGroup")?)
            .multipart(form)
            .send()
            .await?;
        Self::check(response).await
    }

    async fn send_photo(
        &self,
        chat_id: &str,
        photo: &Attachment,
        caption: Option<&str>,
    ) -> Result<(), ApiError> {
        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", Self::file_part(photo).await?);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }
        let response = self
            .http
            .post(self.method_url("sendPhoto")?)
            .multipart(form)
            .send()
            .await?;
        Self::check(response).await
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.method_url("sendMessage")?)
            .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await?;
        Self::check(response).await
    }
}
