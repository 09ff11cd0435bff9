//! WhatsApp Business Cloud API delivery adapter.
//!
//! Uses the official WhatsApp Business Platform (Cloud API) for messaging.
//! Local media files are uploaded to `/{phone_number_id}/media` first and
//! then sent by media id. Requires: Access Token + Phone Number ID from Meta
//! Business Suite.
//!
//! The Cloud API has no typing indicator and no custom quoted-reply cards:
//! presence updates are no-ops and broadcast quote decorations are dropped.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use relaycast_core::config::WhatsAppConfig;
use relaycast_core::error::{RelayError, Result};
use relaycast_core::traits::DeliveryAdapter;
use relaycast_core::types::{InboundMessage, LinkPreview, MediaKind, MediaMessage, Presence};
use sha2::Sha256;
use std::path::Path;

const GRAPH_URL: &str = "https://graph.facebook.com";

/// WhatsApp Cloud API adapter.
pub struct WhatsAppCloudAdapter {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

impl WhatsAppCloudAdapter {
    pub fn new(config: WhatsAppConfig) -> Result<Self> {
        if config.access_token.is_empty() {
            return Err(RelayError::Config("WhatsApp access_token not configured".into()));
        }
        if config.phone_number_id.is_empty() {
            return Err(RelayError::Config("WhatsApp phone_number_id not configured".into()));
        }
        Ok(Self {
            config,
            client: reqwest::Client::new(),
        })
    }

    fn endpoint(&self, resource: &str) -> String {
        format!(
            "{GRAPH_URL}/{}/{}/{resource}",
            self.config.api_version, self.config.phone_number_id
        )
    }

    /// POST a message payload. Returns the message id.
    async fn post_message(&self, body: serde_json::Value) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint("messages"))
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Delivery(format!("WhatsApp API request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RelayError::Delivery(format!(
                "WhatsApp API error {status}: {error_text}"
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RelayError::Delivery(format!("Invalid WhatsApp response: {e}")))?;
        let msg_id = result["messages"][0]["id"]
            .as_str()
            .unwrap_or("unknown")
            .to_string();
        tracing::debug!("WhatsApp message sent: {msg_id} → {}", body["to"]);
        Ok(msg_id)
    }

    /// Upload a local file and return its media id.
    async fn upload(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RelayError::Delivery(format!("file not found {}: {e}", path.display())))?;
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".into());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime.as_ref())
            .map_err(|e| RelayError::Delivery(format!("bad mime type {mime}: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .text("type", mime.to_string())
            .part("file", part);

        let response = self
            .client
            .post(self.endpoint("media"))
            .bearer_auth(&self.config.access_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RelayError::Delivery(format!("WhatsApp upload failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RelayError::Delivery(format!(
                "WhatsApp upload error {status}: {error_text}"
            )));
        }
        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RelayError::Delivery(format!("Invalid upload response: {e}")))?;
        result["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| RelayError::Delivery("upload response without media id".into()))
    }
}

/// Cloud API addresses people by bare phone number; accept the
/// `<number>@s.whatsapp.net` / `<number>@c.us` forms too.
pub fn to_wa_id(recipient: &str) -> &str {
    recipient
        .strip_suffix("@s.whatsapp.net")
        .or_else(|| recipient.strip_suffix("@c.us"))
        .unwrap_or(recipient)
}

pub fn text_payload(to: &str, text: &str, preview_url: bool) -> serde_json::Value {
    serde_json::json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to_wa_id(to),
        "type": "text",
        "text": {
            "preview_url": preview_url,
            "body": text
        }
    })
}

/// `kind` is one of the Cloud API media types: image, video, audio.
pub fn media_payload(to: &str, kind: &str, media_id: &str, caption: Option<&str>) -> serde_json::Value {
    let mut media = serde_json::json!({ "id": media_id });
    if let Some(caption) = caption.filter(|c| !c.trim().is_empty()) {
        media["caption"] = serde_json::Value::String(caption.to_string());
    }
    let mut body = serde_json::json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to_wa_id(to),
        "type": kind,
    });
    body[kind] = media;
    body
}

pub fn contact_payload(to: &str, phone_number: &str, display_name: &str) -> serde_json::Value {
    let wa_id: String = phone_number.chars().filter(|c| c.is_ascii_digit()).collect();
    serde_json::json!({
        "messaging_product": "whatsapp",
        "to": to_wa_id(to),
        "type": "contacts",
        "contacts": [{
            "name": {
                "formatted_name": display_name,
                "first_name": display_name
            },
            "phones": [{
                "phone": phone_number,
                "wa_id": wa_id,
                "type": "CELL"
            }]
        }]
    })
}

#[async_trait]
impl DeliveryAdapter for WhatsAppCloudAdapter {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        self.post_message(text_payload(to, text, false)).await?;
        Ok(())
    }

    async fn send_media(&self, to: &str, media: &MediaMessage) -> Result<()> {
        let media_id = self.upload(&media.path).await?;
        let kind = match media.kind {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        };
        if media.quote.is_some() {
            tracing::debug!("WhatsApp: quote decoration not supported, sending plain {kind}");
        }
        let caption = media.caption.as_deref();
        self.post_message(media_payload(to, kind, &media_id, caption))
            .await?;
        Ok(())
    }

    async fn send_audio(
        &self,
        to: &str,
        path: &Path,
        voice_note: bool,
        caption: Option<&str>,
    ) -> Result<()> {
        if let Some(note) = voice_note_downgrade(voice_note) {
            tracing::debug!("WhatsApp: {note} ({})", path.display());
        }
        let media_id = self.upload(path).await?;
        self.post_message(media_payload(to, "audio", &media_id, None))
            .await?;
        // Audio messages carry no caption on the Cloud API.
        if let Some(caption) = caption.filter(|c| !c.trim().is_empty()) {
            self.send_text(to, caption).await?;
        }
        Ok(())
    }

    async fn send_contact(&self, to: &str, phone_number: &str, display_name: &str) -> Result<()> {
        self.post_message(contact_payload(to, phone_number, display_name))
            .await?;
        Ok(())
    }

    async fn send_link_preview(&self, to: &str, link: &LinkPreview) -> Result<()> {
        // The preview card is generated by WhatsApp from the URL in the body.
        let mut body = link.text.clone();
        if !link.source_url.is_empty() && !body.contains(&link.source_url) {
            body = format!("{body}\n{}", link.source_url);
        }
        self.post_message(text_payload(to, &body, true)).await?;
        Ok(())
    }

    async fn set_presence(&self, to: &str, presence: Presence) -> Result<()> {
        tracing::debug!("WhatsApp: presence '{presence}' for {to} not supported by Cloud API");
        Ok(())
    }
}

/// Uploaded audio is always delivered as a plain audio file; a push-to-talk
/// voice note cannot be requested through the Cloud API.
fn voice_note_downgrade(voice_note: bool) -> Option<&'static str> {
    voice_note.then_some("voice notes not supported, sending plain audio")
}

// ─── Inbound webhook ───────────────────────────────────────

/// Extract text messages from a Cloud API webhook payload
/// (`entry[].changes[].value.messages[]`). Status callbacks are ignored.
pub fn parse_webhook(payload: &serde_json::Value) -> Vec<InboundMessage> {
    let mut out = Vec::new();
    let Some(entries) = payload["entry"].as_array() else {
        return out;
    };
    for entry in entries {
        let Some(changes) = entry["changes"].as_array() else {
            continue;
        };
        for change in changes {
            let Some(messages) = change["value"]["messages"].as_array() else {
                continue;
            };
            for msg in messages {
                let text = match msg["type"].as_str().unwrap_or("") {
                    "text" => msg["text"]["body"].as_str(),
                    "button" => msg["button"]["text"].as_str(),
                    "interactive" => msg["interactive"]["button_reply"]["title"]
                        .as_str()
                        .or_else(|| msg["interactive"]["list_reply"]["title"].as_str()),
                    _ => None,
                };
                let from = msg["from"].as_str().unwrap_or("");
                let Some(text) = text.filter(|t| !t.is_empty()) else {
                    continue;
                };
                if from.is_empty() {
                    continue;
                }
                out.push(InboundMessage {
                    chat_id: from.to_string(),
                    sender_id: from.to_string(),
                    text: text.to_string(),
                    is_group: false,
                    from_me: false,
                    timestamp: parse_timestamp(&msg["timestamp"]),
                });
            }
        }
    }
    out
}

fn parse_timestamp(value: &serde_json::Value) -> DateTime<Utc> {
    value
        .as_str()
        .and_then(|s| s.parse::<i64>().ok())
        .or_else(|| value.as_i64())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now)
}

/// Check Meta's `X-Hub-Signature-256: sha256=<hex>` header against the raw
/// request body. An empty app secret disables the check.
pub fn verify_signature(app_secret: &str, body: &[u8], header: Option<&str>) -> bool {
    if app_secret.is_empty() {
        return true;
    }
    let Some(digest_hex) = header.and_then(|h| h.trim().strip_prefix("sha256=")) else {
        return false;
    };
    let Some(expected) = decode_hex(digest_hex) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn decode_hex(value: &str) -> Option<Vec<u8>> {
    if value.is_empty() || value.len() % 2 != 0 {
        return None;
    }
    (0..value.len())
        .step_by(2)
        .map(|i| value.get(i..i + 2).and_then(|b| u8::from_str_radix(b, 16).ok()))
        .collect()
}
