//! Discord REST implementation of [`Platform`].
//!
//! Only the REST surface lives here. Voice occupancy comes from an
//! [`OccupancyCache`] fed by voice-state events that the gateway relay posts
//! to the interaction route.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};

use super::{
    ChannelId, MessageId, MessageRef, OccupancyCache, Platform, PostedMessage, UserId,
    VoiceChannelSpec,
};
use crate::config::DiscordConfig;
use crate::error::{PlatformError, PlatformResult};
use crate::ui::{Announcement, ButtonStyle, Component, EmbedField, Reply, SelectOption};

const VIEW_CHANNEL: u64 = 1 << 10;
const CONNECT: u64 = 1 << 20;
const SPEAK: u64 = 1 << 21;
const VOICE_ACCESS: u64 = VIEW_CHANNEL | CONNECT | SPEAK;

const CHANNEL_TYPE_VOICE: u8 = 2;
const CHANNEL_TYPE_CATEGORY: u8 = 4;

const OVERWRITE_ROLE: u8 = 0;
const OVERWRITE_MEMBER: u8 = 1;

const FLAG_EPHEMERAL: u64 = 1 << 6;

const ROW_WIDTH: usize = 5;

pub struct DiscordRest {
    client: reqwest::Client,
    api_base: String,
    token: String,
    application_id: String,
    guild_id: String,
    occupancy: OccupancyCache,
}

#[derive(Debug, Deserialize)]
struct ChannelPayload {
    id: ChannelId,
    #[serde(rename = "type")]
    kind: u8,
}

#[derive(Debug, Deserialize)]
struct AuthorPayload {
    id: UserId,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EmbedPayload {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    color: u32,
    #[serde(default)]
    fields: Vec<FieldPayload>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FieldPayload {
    name: String,
    value: String,
    #[serde(default)]
    inline: bool,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    id: MessageId,
    #[serde(default)]
    content: String,
    author: AuthorPayload,
    #[serde(default)]
    embeds: Vec<EmbedPayload>,
    #[serde(default)]
    components: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    message: String,
}

impl DiscordRest {
    pub fn new(config: &DiscordConfig, occupancy: OccupancyCache) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(
                "DiscordBot (https://github.com/silvabyte/rallycall, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            application_id: config.application_id.to_string(),
            guild_id: config.guild_id.to_string(),
            occupancy,
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> PlatformResult<T> {
        let text = self.send(method, path, body).await?;
        serde_json::from_str(&text)
            .with_context(|| format!("Unexpected response body from {path}"))
            .map_err(PlatformError::from)
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> PlatformResult<String> {
        let url = format!("{}{}", self.api_base, path);
        debug!("Discord {} {}", method, path);

        let mut builder = self
            .client
            .request(method, &url)
            .header("Authorization", format!("Bot {}", self.token));
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status == StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound);
        }
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorPayload>(&text)
                .map(|e| e.message)
                .unwrap_or(text);
            error!("Discord request {} failed with {}: {}", path, status, message);
            return Err(PlatformError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(text)
    }

    async fn set_member_overwrite(
        &self,
        channel: ChannelId,
        user: UserId,
        allow: u64,
        deny: u64,
    ) -> PlatformResult<()> {
        let body = json!({
            "type": OVERWRITE_MEMBER,
            "allow": allow.to_string(),
            "deny": deny.to_string(),
        });
        self.send(
            Method::PUT,
            &format!("/channels/{channel}/permissions/{user}"),
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn get_channel(&self, channel: ChannelId) -> PlatformResult<ChannelPayload> {
        self.request(Method::GET, &format!("/channels/{channel}"), None)
            .await
    }
}

fn button_style_code(style: ButtonStyle) -> u8 {
    match style {
        ButtonStyle::Primary => 1,
        ButtonStyle::Success => 3,
        ButtonStyle::Danger => 4,
    }
}

fn button_style_from_code(code: u64) -> ButtonStyle {
    match code {
        3 => ButtonStyle::Success,
        4 => ButtonStyle::Danger,
        _ => ButtonStyle::Primary,
    }
}

fn component_json(component: &Component) -> Value {
    match component {
        Component::Button {
            custom_id,
            label,
            style,
            disabled,
        } => json!({
            "type": 2,
            "custom_id": custom_id,
            "label": label,
            "style": button_style_code(*style),
            "disabled": disabled,
        }),
        Component::Select {
            custom_id,
            placeholder,
            options,
            min_values,
            max_values,
        } => json!({
            "type": 3,
            "custom_id": custom_id,
            "placeholder": placeholder,
            "min_values": min_values,
            "max_values": max_values,
            "options": options
                .iter()
                .map(|o| json!({ "label": o.label, "value": o.value }))
                .collect::<Vec<_>>(),
        }),
    }
}

/// Lay components out in action rows. Selects take a full row.
fn action_rows(components: &[Component]) -> Vec<Value> {
    let mut rows: Vec<Vec<Value>> = Vec::new();
    let mut buttons: Vec<Value> = Vec::new();

    for component in components {
        match component {
            Component::Select { .. } => {
                if !buttons.is_empty() {
                    rows.push(std::mem::take(&mut buttons));
                }
                rows.push(vec![component_json(component)]);
            }
            Component::Button { .. } => {
                buttons.push(component_json(component));
                if buttons.len() == ROW_WIDTH {
                    rows.push(std::mem::take(&mut buttons));
                }
            }
        }
    }
    if !buttons.is_empty() {
        rows.push(buttons);
    }

    rows.into_iter()
        .map(|row| json!({ "type": 1, "components": row }))
        .collect()
}

fn parse_component(value: &Value) -> Option<Component> {
    let custom_id = value.get("custom_id")?.as_str()?.to_string();
    match value.get("type")?.as_u64()? {
        2 => Some(Component::Button {
            custom_id,
            label: value.get("label")?.as_str().unwrap_or_default().to_string(),
            style: button_style_from_code(value.get("style")?.as_u64()?),
            disabled: value.get("disabled").and_then(Value::as_bool).unwrap_or(false),
        }),
        3 => Some(Component::Select {
            custom_id,
            placeholder: value
                .get("placeholder")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            options: value
                .get("options")
                .and_then(Value::as_array)
                .map(|opts| {
                    opts.iter()
                        .filter_map(|o| {
                            Some(SelectOption {
                                label: o.get("label")?.as_str()?.to_string(),
                                value: o.get("value")?.as_str()?.to_string(),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default(),
            min_values: value.get("min_values").and_then(Value::as_u64).unwrap_or(1) as u8,
            max_values: value.get("max_values").and_then(Value::as_u64).unwrap_or(1) as u8,
        }),
        _ => None,
    }
}

fn flatten_rows(rows: &[Value]) -> Vec<Component> {
    rows.iter()
        .filter_map(|row| row.get("components").and_then(Value::as_array))
        .flatten()
        .filter_map(parse_component)
        .collect()
}

fn announcement_json(announcement: &Announcement) -> Value {
    let embed = EmbedPayload {
        title: announcement.title.clone(),
        description: announcement.description.clone(),
        color: announcement.color,
        fields: announcement
            .fields
            .iter()
            .map(|f| FieldPayload {
                name: f.name.clone(),
                value: f.value.clone(),
                inline: false,
            })
            .collect(),
    };
    json!({
        "content": announcement.content,
        "embeds": [embed],
        "components": action_rows(&announcement.controls),
        "allowed_mentions": { "parse": ["roles", "users"] },
    })
}

fn announcement_from(message: MessagePayload) -> PlatformResult<Announcement> {
    let embed = message
        .embeds
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Announcement {} has no embed", message.id))?;
    Ok(Announcement {
        content: message.content,
        title: embed.title,
        description: embed.description,
        color: embed.color,
        fields: embed
            .fields
            .into_iter()
            .map(|f| EmbedField {
                name: f.name,
                value: f.value,
            })
            .collect(),
        controls: flatten_rows(&message.components),
    })
}

fn reply_json(reply: &Reply) -> Value {
    let mut body = json!({
        "content": reply.content,
        "components": action_rows(&reply.components),
    });
    if reply.ephemeral {
        body["flags"] = json!(FLAG_EPHEMERAL);
    }
    body
}

#[async_trait]
impl Platform for DiscordRest {
    async fn resolve_category(&self, category: ChannelId) -> PlatformResult<()> {
        let channel = self.get_channel(category).await?;
        if channel.kind == CHANNEL_TYPE_CATEGORY {
            Ok(())
        } else {
            Err(PlatformError::NotFound)
        }
    }

    async fn create_voice_channel(&self, spec: &VoiceChannelSpec) -> PlatformResult<ChannelId> {
        // The @everyone role shares the guild's id.
        let body = json!({
            "name": spec.name,
            "type": CHANNEL_TYPE_VOICE,
            "parent_id": spec.category.to_string(),
            "permission_overwrites": [
                {
                    "id": self.guild_id,
                    "type": OVERWRITE_ROLE,
                    "allow": "0",
                    "deny": (VIEW_CHANNEL | CONNECT).to_string(),
                },
                {
                    "id": spec.owner.to_string(),
                    "type": OVERWRITE_MEMBER,
                    "allow": VOICE_ACCESS.to_string(),
                    "deny": "0",
                },
            ],
        });
        let channel: ChannelPayload = self
            .request(
                Method::POST,
                &format!("/guilds/{}/channels", self.guild_id),
                Some(body),
            )
            .await?;
        Ok(channel.id)
    }

    async fn delete_channel(&self, channel: ChannelId) -> PlatformResult<()> {
        self.send(Method::DELETE, &format!("/channels/{channel}"), None)
            .await?;
        self.occupancy.clear_channel(channel);
        Ok(())
    }

    async fn grant_voice_access(&self, channel: ChannelId, user: UserId) -> PlatformResult<()> {
        self.set_member_overwrite(channel, user, VOICE_ACCESS, 0).await
    }

    async fn revoke_voice_access(&self, channel: ChannelId, user: UserId) -> PlatformResult<()> {
        self.set_member_overwrite(channel, user, 0, VOICE_ACCESS).await
    }

    async fn voice_occupants(&self, channel: ChannelId) -> PlatformResult<usize> {
        self.get_channel(channel).await?;
        Ok(self.occupancy.count(channel))
    }

    async fn send_announcement(
        &self,
        channel: ChannelId,
        announcement: &Announcement,
    ) -> PlatformResult<MessageId> {
        let message: MessagePayload = self
            .request(
                Method::POST,
                &format!("/channels/{channel}/messages"),
                Some(announcement_json(announcement)),
            )
            .await?;
        Ok(message.id)
    }

    async fn edit_announcement(
        &self,
        at: MessageRef,
        announcement: &Announcement,
    ) -> PlatformResult<()> {
        self.send(
            Method::PATCH,
            &format!("/channels/{}/messages/{}", at.channel, at.message),
            Some(announcement_json(announcement)),
        )
        .await?;
        Ok(())
    }

    async fn fetch_announcement(&self, at: MessageRef) -> PlatformResult<Announcement> {
        let message: MessagePayload = self
            .request(
                Method::GET,
                &format!("/channels/{}/messages/{}", at.channel, at.message),
                None,
            )
            .await?;
        announcement_from(message)
    }

    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: usize,
    ) -> PlatformResult<Vec<PostedMessage>> {
        let messages: Vec<MessagePayload> = self
            .request(
                Method::GET,
                &format!("/channels/{channel}/messages?limit={}", limit.clamp(1, 100)),
                None,
            )
            .await?;
        Ok(messages
            .into_iter()
            .map(|m| PostedMessage {
                id: m.id,
                from_self: m.author.id.to_string() == self.application_id,
                control_ids: flatten_rows(&m.components)
                    .iter()
                    .map(|c| c.custom_id().to_string())
                    .collect(),
            })
            .collect())
    }

    async fn send_message(&self, channel: ChannelId, reply: &Reply) -> PlatformResult<MessageId> {
        let message: MessagePayload = self
            .request(
                Method::POST,
                &format!("/channels/{channel}/messages"),
                Some(reply_json(reply)),
            )
            .await?;
        Ok(message.id)
    }

    async fn send_followup(&self, token: &str, reply: &Reply) -> PlatformResult<()> {
        self.send(
            Method::POST,
            &format!("/webhooks/{}/{}", self.application_id, token),
            Some(reply_json(reply)),
        )
        .await?;
        Ok(())
    }

    fn observe_voice_state(&self, user: UserId, channel: Option<ChannelId>) {
        self.occupancy.update(user, channel);
    }
}
