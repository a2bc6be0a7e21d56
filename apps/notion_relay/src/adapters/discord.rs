use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryError;
use crate::models::{
    AllowedMentions, DeliveryTarget, Embed, EmbedField, EmbedFooter, FieldSet,
    OutboundNotification, UserId,
};
use crate::utils::format::{clamp_chars, human_date, render_placeholders};

const CONTENT_LIMIT: usize = 2000;
const EMBED_TITLE_LIMIT: usize = 256;
const EMBED_DESCRIPTION_LIMIT: usize = 4096;
const FIELD_NAME_LIMIT: usize = 256;
const FIELD_VALUE_LIMIT: usize = 1024;
const FOOTER_LIMIT: usize = 2048;

pub const DEBUG_COLOR: u32 = 16711680;

/// Data-driven shape of one relay's notification.
///
/// Text fields accept `{name}`, `{title}`, `{date}`, `{category}`, `{url}` and `{mention}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationTemplate {
    pub greeting: String,
    #[serde(default = "default_true")]
    pub mention: bool,
    #[serde(default)]
    pub embed: Option<EmbedTemplate>,
    #[serde(default)]
    pub fallbacks: FieldFallbacks,
    #[serde(default = "default_success_message")]
    pub success_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbedTemplate {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub color: u32,
    #[serde(default)]
    pub fields: Vec<RowTemplate>,
    #[serde(default)]
    pub footer: Option<String>,
    #[serde(default)]
    pub timestamp: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RowTemplate {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

/// Labels rendered in place of absent fields, so no row ever disappears.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldFallbacks {
    pub title: String,
    pub person: String,
    pub date: String,
    pub category: String,
    pub url: String,
}

impl Default for FieldFallbacks {
    fn default() -> Self {
        Self {
            title: "Untitled".to_string(),
            person: "there".to_string(),
            date: "No Date Set".to_string(),
            category: "N/A".to_string(),
            url: "N/A".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_success_message() -> String {
    "Notification sent.".to_string()
}

pub fn mention_token(user_id: &UserId) -> String {
    format!("<@{user_id}>")
}

pub fn build(
    fields: &FieldSet,
    target: &DeliveryTarget,
    template: &NotificationTemplate,
) -> OutboundNotification {
    build_at(fields, target, template, Utc::now())
}

/// Same as [`build`] with an explicit clock for the embed timestamp.
pub fn build_at(
    fields: &FieldSet,
    target: &DeliveryTarget,
    template: &NotificationTemplate,
    now: DateTime<Utc>,
) -> OutboundNotification {
    let fallbacks = &template.fallbacks;
    let mentioned = target.recipient().filter(|_| template.mention);

    let name = fields.person_name.as_deref().unwrap_or(&fallbacks.person);
    let title = fields.title.as_deref().unwrap_or(&fallbacks.title);
    let date = fields
        .date_iso
        .as_deref()
        .map(human_date)
        .unwrap_or_else(|| fallbacks.date.clone());
    let category = fields
        .category_label
        .as_deref()
        .unwrap_or(&fallbacks.category);
    let url = fields.source_url.as_deref().unwrap_or(&fallbacks.url);
    let mention = mentioned.map(mention_token);

    let vars = [
        ("name", name),
        ("title", title),
        ("date", date.as_str()),
        ("category", category),
        ("url", url),
        ("mention", mention.as_deref().unwrap_or(name)),
    ];
    let render = |text: &str| render_placeholders(text, &vars);

    let mut content = render(&template.greeting);
    if let Some(token) = &mention {
        if !template.greeting.contains("{mention}") {
            content = format!("{token} {content}");
        }
    }

    let embeds = template
        .embed
        .as_ref()
        .map(|embed| Embed {
            title: clamp_chars(&render(&embed.title), EMBED_TITLE_LIMIT),
            url: fields.source_url.clone(),
            description: embed
                .description
                .as_deref()
                .map(|text| clamp_chars(&render(text), EMBED_DESCRIPTION_LIMIT)),
            color: embed.color,
            fields: embed
                .fields
                .iter()
                .map(|row| EmbedField {
                    name: clamp_chars(&render(&row.name), FIELD_NAME_LIMIT),
                    value: clamp_chars(&render(&row.value), FIELD_VALUE_LIMIT),
                    inline: row.inline,
                })
                .collect(),
            timestamp: embed
                .timestamp
                .then(|| now.to_rfc3339_opts(SecondsFormat::Secs, true)),
            footer: embed.footer.as_deref().map(|text| EmbedFooter {
                text: clamp_chars(&render(text), FOOTER_LIMIT),
            }),
        })
        .into_iter()
        .collect();

    OutboundNotification {
        content: clamp_chars(&content, CONTENT_LIMIT),
        embeds,
        allowed_mentions: AllowedMentions {
            parse: Vec::new(),
            users: mentioned.cloned().into_iter().collect::<BTreeSet<_>>(),
        },
    }
}

/// Red notice posted to the debug webhook after a failed delivery.
pub fn debug_notice(
    relay: &str,
    fields: &FieldSet,
    error: &DeliveryError,
    now: DateTime<Utc>,
) -> OutboundNotification {
    let mut rows = vec![
        EmbedField {
            name: "Relay".to_string(),
            value: relay.to_string(),
            inline: true,
        },
        EmbedField {
            name: "Failure".to_string(),
            value: error.kind().to_string(),
            inline: true,
        },
    ];
    if let Some(status) = error.status() {
        rows.push(EmbedField {
            name: "Status".to_string(),
            value: status.to_string(),
            inline: true,
        });
    }
    rows.push(EmbedField {
        name: "Detail".to_string(),
        value: clamp_chars(&error.to_string(), FIELD_VALUE_LIMIT),
        inline: false,
    });
    rows.push(EmbedField {
        name: "Record".to_string(),
        value: clamp_chars(
            fields.title.as_deref().unwrap_or("Unknown record"),
            FIELD_VALUE_LIMIT,
        ),
        inline: false,
    });

    OutboundNotification {
        content: format!("Delivery failed for relay `{relay}`"),
        embeds: vec![Embed {
            title: "Notification delivery failed".to_string(),
            url: fields.source_url.clone(),
            description: None,
            color: DEBUG_COLOR,
            fields: rows,
            timestamp: Some(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
            footer: None,
        }],
        allowed_mentions: AllowedMentions::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use insta::assert_json_snapshot;

    fn caster_template() -> NotificationTemplate {
        NotificationTemplate {
            greeting: "Hi {name}, you have been assigned to a broadcast!".to_string(),
            mention: true,
            embed: Some(EmbedTemplate {
                title: "Casting Assignment".to_string(),
                description: None,
                color: 10181046,
                fields: vec![
                    RowTemplate {
                        name: "Broadcast Name".to_string(),
                        value: "{title}".to_string(),
                        inline: false,
                    },
                    RowTemplate {
                        name: "Game".to_string(),
                        value: "{category}".to_string(),
                        inline: true,
                    },
                    RowTemplate {
                        name: "Date".to_string(),
                        value: "{date}".to_string(),
                        inline: true,
                    },
                ],
                footer: Some("Good luck with the cast!".to_string()),
                timestamp: false,
            }),
            fallbacks: FieldFallbacks {
                title: "Untitled Broadcast".to_string(),
                category: "Unknown Game".to_string(),
                ..FieldFallbacks::default()
            },
            success_message: "Caster notified!".to_string(),
        }
    }

    fn full_fields() -> FieldSet {
        FieldSet {
            title: Some("Grand Finals".to_string()),
            person_name: Some("Brody Moore".to_string()),
            date_iso: Some("2024-01-01".to_string()),
            category_label: Some("Valorant".to_string()),
            source_url: Some("https://notion.so/x".to_string()),
        }
    }

    fn dm_target() -> DeliveryTarget {
        DeliveryTarget::DirectMessage(UserId::new("101740777587089408"))
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn builds_direct_message_with_mention() {
        let notification = build_at(&full_fields(), &dm_target(), &caster_template(), fixed_now());
        assert_json_snapshot!(notification, @r#"
        {
          "content": "<@101740777587089408> Hi Brody Moore, you have been assigned to a broadcast!",
          "embeds": [
            {
              "title": "Casting Assignment",
              "url": "https://notion.so/x",
              "color": 10181046,
              "fields": [
                {
                  "name": "Broadcast Name",
                  "value": "Grand Finals",
                  "inline": false
                },
                {
                  "name": "Game",
                  "value": "Valorant",
                  "inline": true
                },
                {
                  "name": "Date",
                  "value": "Mon Jan 01 2024",
                  "inline": true
                }
              ],
              "footer": {
                "text": "Good luck with the cast!"
              }
            }
          ],
          "allowed_mentions": {
            "parse": [],
            "users": [
              "101740777587089408"
            ]
          }
        }
        "#);
    }

    #[test]
    fn absent_fields_render_fallbacks_without_dropping_rows() {
        let fields = FieldSet {
            person_name: Some("Brody Moore".to_string()),
            ..FieldSet::default()
        };
        let notification = build_at(&fields, &dm_target(), &caster_template(), fixed_now());
        let embed = &notification.embeds[0];
        assert_eq!(embed.url, None);
        let values: Vec<&str> = embed.fields.iter().map(|row| row.value.as_str()).collect();
        assert_eq!(values, ["Untitled Broadcast", "Unknown Game", "No Date Set"]);
    }

    #[test]
    fn mention_placeholder_is_used_in_place() {
        let mut template = caster_template();
        template.greeting = "{mention} please pick up {title}".to_string();
        let notification = build_at(&full_fields(), &dm_target(), &template, fixed_now());
        assert_eq!(
            notification.content,
            "<@101740777587089408> please pick up Grand Finals"
        );
    }

    #[test]
    fn mentions_disabled_leaves_allow_list_empty() {
        let mut template = caster_template();
        template.mention = false;
        let notification = build_at(&full_fields(), &dm_target(), &template, fixed_now());
        assert!(notification.mentioned_users().is_empty());
        assert!(!notification.content.contains("<@"));
        let body = serde_json::to_value(&notification).expect("json");
        assert_eq!(
            body["allowed_mentions"],
            serde_json::json!({ "parse": [], "users": [] })
        );
    }

    #[test]
    fn everyone_in_content_is_not_allowed_to_ping() {
        let fields = FieldSet {
            title: Some("@everyone free pizza".to_string()),
            ..full_fields()
        };
        let target = DeliveryTarget::Channel {
            webhook_url: "https://discord.test/hook".to_string(),
            mention: None,
        };
        let mut template = caster_template();
        template.greeting = "New task: {title}".to_string();
        let notification = build_at(&fields, &target, &template, fixed_now());
        assert_eq!(notification.content, "New task: @everyone free pizza");
        let body = serde_json::to_value(&notification).expect("json");
        assert_eq!(
            body["allowed_mentions"],
            serde_json::json!({ "parse": [], "users": [] })
        );
    }

    #[test]
    fn channel_without_recipient_has_no_mention() {
        let target = DeliveryTarget::Channel {
            webhook_url: "https://discord.test/hook".to_string(),
            mention: None,
        };
        let notification = build_at(&full_fields(), &target, &caster_template(), fixed_now());
        assert!(notification.mentioned_users().is_empty());
        assert_eq!(
            notification.content,
            "Hi Brody Moore, you have been assigned to a broadcast!"
        );
    }

    #[test]
    fn channel_with_recipient_allow_lists_exactly_that_user() {
        let target = DeliveryTarget::Channel {
            webhook_url: "https://discord.test/hook".to_string(),
            mention: Some(UserId::new("222")),
        };
        let notification = build_at(&full_fields(), &target, &caster_template(), fixed_now());
        let users: Vec<&str> = notification
            .mentioned_users()
            .iter()
            .map(UserId::as_str)
            .collect();
        assert_eq!(users, ["222"]);
        assert!(notification.content.starts_with("<@222> "));
    }

    #[test]
    fn build_is_deterministic() {
        let first = serde_json::to_vec(&build_at(
            &full_fields(),
            &dm_target(),
            &caster_template(),
            fixed_now(),
        ))
        .expect("json");
        let second = serde_json::to_vec(&build_at(
            &full_fields(),
            &dm_target(),
            &caster_template(),
            fixed_now(),
        ))
        .expect("json");
        assert_eq!(first, second);
    }

    #[test]
    fn timestamp_comes_from_the_clock() {
        let mut template = caster_template();
        if let Some(embed) = template.embed.as_mut() {
            embed.timestamp = true;
        }
        let notification = build_at(&full_fields(), &dm_target(), &template, fixed_now());
        assert_eq!(
            notification.embeds[0].timestamp.as_deref(),
            Some("2024-01-01T12:00:00Z")
        );
    }

    #[test]
    fn long_values_are_clamped() {
        let fields = FieldSet {
            title: Some("x".repeat(3000)),
            ..full_fields()
        };
        let mut template = caster_template();
        template.greeting = "{title}".to_string();
        let notification = build_at(&fields, &dm_target(), &template, fixed_now());
        assert_eq!(notification.content.chars().count(), CONTENT_LIMIT);
        assert_eq!(
            notification.embeds[0].fields[0].value.chars().count(),
            FIELD_VALUE_LIMIT
        );
    }

    #[test]
    fn template_defaults_from_json() {
        let template: NotificationTemplate =
            serde_json::from_str(r#"{"greeting":"New task: {title}"}"#).expect("template");
        assert!(template.mention);
        assert!(template.embed.is_none());
        assert_eq!(template.fallbacks, FieldFallbacks::default());
        assert_eq!(template.success_message, "Notification sent.");
    }

    #[test]
    fn debug_notice_is_red_and_carries_status() {
        let error = DeliveryError::UpstreamRejected {
            status: 401,
            body: "401: Unauthorized".to_string(),
        };
        let notice = debug_notice("caster", &full_fields(), &error, fixed_now());
        let embed = &notice.embeds[0];
        assert_eq!(embed.color, DEBUG_COLOR);
        assert!(notice.mentioned_users().is_empty());
        assert!(embed
            .fields
            .iter()
            .any(|row| row.name == "Status" && row.value == "401"));
    }
}
