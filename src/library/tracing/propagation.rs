use opentelemetry::{global, Context};
use serde_json::Value;
use std::collections::HashMap;

/// Moves trace contexts in and out of JSON objects so they can travel inside message payloads
pub struct ContextPropagator;

impl ContextPropagator {
    /// Injects the context into a fresh carrier map using the globally registered propagator
    pub fn inject(context: &Context) -> HashMap<String, String> {
        let mut carrier = HashMap::new();

        global::get_text_map_propagator(|propagator| {
            propagator.inject_context(context, &mut carrier)
        });

        carrier
    }

    /// Extracts a context from a carrier map, returns an empty context if nothing could be found
    pub fn extract(carrier: &HashMap<String, String>) -> Context {
        global::get_text_map_propagator(|propagator| propagator.extract(carrier))
    }

    /// Serializes the context into a JSON object of string values
    pub fn serialize(context: &Context) -> Value {
        let carrier = Self::inject(context)
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect();

        Value::Object(carrier)
    }

    /// Reads a carrier map back from a JSON object, non-string members are skipped
    pub fn deserialize(value: &Value) -> Option<HashMap<String, String>> {
        let object = value.as_object()?;

        Some(
            object
                .iter()
                .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_owned())))
                .collect(),
        )
    }
}
