mod discord;
mod notion;

pub use discord::{
    build, debug_notice, EmbedTemplate, FieldFallbacks, NotificationTemplate, RowTemplate,
};
pub use notion::{extract, FieldPathSchema, FieldShape, FieldSpec, PayloadRoot};
