use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::FieldSet;

/// Where the page record sits inside the webhook body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadRoot {
    /// The body is the page itself.
    #[default]
    Event,
    /// The page is wrapped in a `data` field.
    Data,
}

impl PayloadRoot {
    fn locate<'a>(&self, event: &'a Value) -> Option<&'a Value> {
        match self {
            PayloadRoot::Event => Some(event),
            PayloadRoot::Data => event.get("data"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldShape {
    Title,
    RichText,
    People,
    Date,
    Select,
    Status,
    Relation,
    /// Top-level string on the record, such as the page `url`.
    Url,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub property: String,
    pub shape: FieldShape,
}

impl FieldSpec {
    pub fn new(property: impl Into<String>, shape: FieldShape) -> Self {
        Self {
            property: property.into(),
            shape,
        }
    }
}

/// Property paths for one deployment. Each field lists candidates tried in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldPathSchema {
    #[serde(default)]
    pub root: PayloadRoot,
    #[serde(default)]
    pub title: Vec<FieldSpec>,
    #[serde(default)]
    pub person: Vec<FieldSpec>,
    #[serde(default)]
    pub date: Vec<FieldSpec>,
    #[serde(default)]
    pub category: Vec<FieldSpec>,
    #[serde(default)]
    pub source_url: Vec<FieldSpec>,
}

pub fn extract(event: &Value, schema: &FieldPathSchema) -> FieldSet {
    let record = schema.root.locate(event);
    FieldSet {
        title: first_present(record, &schema.title),
        person_name: first_present(record, &schema.person),
        date_iso: first_present(record, &schema.date),
        category_label: first_present(record, &schema.category),
        source_url: first_present(record, &schema.source_url),
    }
}

fn first_present(record: Option<&Value>, candidates: &[FieldSpec]) -> Option<String> {
    let record = record?;
    candidates
        .iter()
        .find_map(|spec| read_field(record, spec))
        .map(String::from)
}

fn read_field<'a>(record: &'a Value, spec: &FieldSpec) -> Option<&'a str> {
    let value = match spec.shape {
        FieldShape::Url => record.get(&spec.property),
        shape => record
            .get("properties")
            .and_then(|value| value.get(&spec.property))
            .and_then(|property| read_property(property, shape)),
    };
    value
        .and_then(|value| value.as_str())
        .filter(|text| !text.is_empty())
}

fn read_property(property: &Value, shape: FieldShape) -> Option<&Value> {
    match shape {
        FieldShape::Title => property
            .get("title")
            .and_then(|runs| runs.get(0))
            .and_then(|run| run.get("plain_text")),
        FieldShape::RichText => property
            .get("rich_text")
            .and_then(|runs| runs.get(0))
            .and_then(|run| run.get("plain_text")),
        FieldShape::People => property
            .get("people")
            .and_then(|people| people.get(0))
            .and_then(|person| person.get("name")),
        FieldShape::Date => property
            .get("date")
            .and_then(|date| date.get("start")),
        FieldShape::Select => property
            .get("select")
            .and_then(|select| select.get("name")),
        FieldShape::Status => property
            .get("status")
            .and_then(|status| status.get("name")),
        // Only the related page id is available without a second lookup.
        FieldShape::Relation => property
            .get("relation")
            .and_then(|relations| relations.get(0))
            .and_then(|relation| relation.get("id")),
        FieldShape::Url => None,
    }
}
