//! Structured JSON records for run and stage events.
use serde_json::json;
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Field prefix that marks an event as part of the run audit trail.
pub(crate) const FIELD_PREFIX: &str = "bulletin.";

/// Re-emits events carrying `bulletin.*` fields as one flat JSON object per line on stderr.
pub(crate) struct StructuredLogLayer;

impl<S: Subscriber> Layer<S> for StructuredLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let has_prefixed_field = event
            .metadata()
            .fields()
            .iter()
            .any(|field| field.name().starts_with(FIELD_PREFIX));
        if !has_prefixed_field {
            return;
        }

        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);
        eprintln!("{}", render(event.metadata().level().as_str(), visitor.values));
    }
}

#[derive(Default)]
struct JsonVisitor {
    values: serde_json::Map<String, serde_json::Value>,
}

impl tracing::field::Visit for JsonVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.values
            .insert(field.name().to_string(), json!(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.values.insert(field.name().to_string(), json!(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.values.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.values.insert(field.name().to_string(), json!(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.values.insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.values.insert(field.name().to_string(), json!(value));
    }
}

fn render(level: &str, mut fields: serde_json::Map<String, serde_json::Value>) -> String {
    let message = fields.remove("message").unwrap_or_default();
    let entry = json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "level": level,
        "message": message,
        "fields": fields,
    });
    serde_json::to_string(&entry).unwrap_or_default()
}
