use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::adapters::{
    EmbedTemplate, FieldFallbacks, FieldPathSchema, FieldShape, FieldSpec, NotificationTemplate,
    PayloadRoot, RowTemplate,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Channel,
    DirectMessage,
}

/// One inbound route: how to read the page and how to notify about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    pub mode: DeliveryMode,
    #[serde(default = "default_true")]
    pub resolve_recipient: bool,
    pub schema: FieldPathSchema,
    pub template: NotificationTemplate,
}

impl RelayConfig {
    /// Direct messages always need a mapped recipient.
    pub fn requires_recipient(&self) -> bool {
        self.mode == DeliveryMode::DirectMessage || self.resolve_recipient
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RelayFile {
    relays: BTreeMap<String, RelayConfig>,
}

fn default_true() -> bool {
    true
}

pub fn load_relays(path: &Path) -> anyhow::Result<BTreeMap<String, RelayConfig>> {
    let raw = std::fs::read(path)
        .with_context(|| format!("reading relay config {}", path.display()))?;
    parse_relays(&raw).with_context(|| format!("parsing relay config {}", path.display()))
}

pub fn parse_relays(raw: &[u8]) -> anyhow::Result<BTreeMap<String, RelayConfig>> {
    let file: RelayFile = serde_json::from_slice(raw)?;
    validate_relays(&file.relays)?;
    Ok(file.relays)
}

fn validate_relays(relays: &BTreeMap<String, RelayConfig>) -> anyhow::Result<()> {
    if relays.is_empty() {
        bail!("at least one relay must be configured");
    }
    for name in relays.keys() {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            bail!("invalid relay name {name:?}: use letters, digits, '-' or '_'");
        }
    }
    Ok(())
}

/// Relays used when no config file is given.
pub fn preset_relays() -> BTreeMap<String, RelayConfig> {
    BTreeMap::from([
        ("task".to_string(), task_preset()),
        ("caster".to_string(), caster_preset()),
    ])
}

fn task_preset() -> RelayConfig {
    RelayConfig {
        mode: DeliveryMode::DirectMessage,
        resolve_recipient: true,
        schema: FieldPathSchema {
            root: PayloadRoot::Event,
            title: vec![
                FieldSpec::new("Task", FieldShape::Title),
                FieldSpec::new("Name", FieldShape::Title),
            ],
            person: vec![FieldSpec::new("Assignee", FieldShape::People)],
            date: vec![FieldSpec::new("Due", FieldShape::Date)],
            category: vec![
                FieldSpec::new("Status", FieldShape::Status),
                FieldSpec::new("Status", FieldShape::Select),
            ],
            source_url: vec![FieldSpec::new("url", FieldShape::Url)],
        },
        template: NotificationTemplate {
            greeting: "Hi {name}, you have a new task: {title}".to_string(),
            mention: true,
            embed: Some(EmbedTemplate {
                title: "{title}".to_string(),
                description: None,
                color: 5814783,
                fields: vec![
                    RowTemplate {
                        name: "Status".to_string(),
                        value: "{category}".to_string(),
                        inline: true,
                    },
                    RowTemplate {
                        name: "Due".to_string(),
                        value: "{date}".to_string(),
                        inline: true,
                    },
                    RowTemplate {
                        name: "Link".to_string(),
                        value: "[Open in Notion]({url})".to_string(),
                        inline: false,
                    },
                ],
                footer: None,
                timestamp: true,
            }),
            fallbacks: FieldFallbacks {
                title: "Unknown Task".to_string(),
                ..FieldFallbacks::default()
            },
            success_message: "Assignee notified!".to_string(),
        },
    }
}

fn caster_preset() -> RelayConfig {
    RelayConfig {
        mode: DeliveryMode::DirectMessage,
        resolve_recipient: true,
        schema: FieldPathSchema {
            root: PayloadRoot::Data,
            title: vec![FieldSpec::new("Name", FieldShape::Title)],
            person: vec![FieldSpec::new("Caster", FieldShape::People)],
            date: vec![FieldSpec::new("Date", FieldShape::Date)],
            category: vec![
                FieldSpec::new("Game", FieldShape::Select),
                FieldSpec::new("Game", FieldShape::Relation),
            ],
            source_url: vec![FieldSpec::new("url", FieldShape::Url)],
        },
        template: NotificationTemplate {
            greeting: "Hi {name}, you have been assigned to a broadcast!".to_string(),
            mention: true,
            embed: Some(EmbedTemplate {
                title: "🎙️ Casting Assignment".to_string(),
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
                    RowTemplate {
                        name: "Notes".to_string(),
                        value: "[Click to view details in Notion]({url})".to_string(),
                        inline: false,
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
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_cover_task_and_caster() {
        let relays = preset_relays();
        assert_eq!(relays.keys().collect::<Vec<_>>(), ["caster", "task"]);
        assert!(validate_relays(&relays).is_ok());
        assert_eq!(relays["caster"].schema.root, PayloadRoot::Data);
        assert_eq!(relays["task"].schema.root, PayloadRoot::Event);
    }

    #[test]
    fn parses_relay_file() {
        let raw = br#"{
            "relays": {
                "standup": {
                    "mode": "channel",
                    "resolve_recipient": false,
                    "schema": {
                        "title": [{ "property": "Name", "shape": "title" }],
                        "source_url": [{ "property": "url", "shape": "url" }]
                    },
                    "template": { "greeting": "New entry: {title}", "mention": false }
                }
            }
        }"#;
        let relays = parse_relays(raw).expect("relays");
        let standup = &relays["standup"];
        assert_eq!(standup.mode, DeliveryMode::Channel);
        assert!(!standup.requires_recipient());
        assert_eq!(standup.template.success_message, "Notification sent.");
    }

    #[test]
    fn direct_message_always_requires_recipient() {
        let mut relay = task_preset();
        relay.resolve_recipient = false;
        assert!(relay.requires_recipient());
    }

    #[test]
    fn sample_relay_file_parses() {
        let relays = parse_relays(include_bytes!("../../../config/relays.sample.json"))
            .expect("sample relays");
        assert_eq!(relays["caster"], {
            let mut caster = caster_preset();
            caster.template.embed.as_mut().expect("embed").title =
                "Casting Assignment".to_string();
            caster
        });
        assert_eq!(relays["board"].mode, DeliveryMode::Channel);
    }

    #[test]
    fn rejects_empty_relay_map() {
        let err = parse_relays(br#"{ "relays": {} }"#).expect_err("empty");
        assert!(err.to_string().contains("at least one relay"));
    }

    #[test]
    fn rejects_bad_relay_name() {
        let raw = br#"{
            "relays": {
                "a/b": {
                    "mode": "channel",
                    "schema": {},
                    "template": { "greeting": "hi" }
                }
            }
        }"#;
        let err = parse_relays(raw).expect_err("bad name");
        assert!(err.to_string().contains("invalid relay name"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let raw = br#"{
            "relays": {
                "x": {
                    "mode": "channel",
                    "schema": {},
                    "template": { "greeting": "hi" },
                    "retries": 3
                }
            }
        }"#;
        assert!(parse_relays(raw).is_err());
    }
}
