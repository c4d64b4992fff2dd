use super::Subject;
use chrono::DateTime;
use lazy_static::lazy_static;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

lazy_static! {
    static ref EVENT_TYPE_PATTERN: Regex =
        Regex::new(r"^[a-zA-Z0-9]+([_\-.][a-zA-Z0-9]+)*$").unwrap();
    static ref EVENT_TYPE_VERSION_PATTERN: Regex = Regex::new(r"^[a-zA-Z0-9]+$").unwrap();
    static ref EVENT_ID_PATTERN: Regex = Regex::new(r"^[a-zA-Z0-9_\-]+$").unwrap();
}

/// Names of the event fields as they are reported in validation errors
pub mod fields {
    /// Environment of the event source
    pub const SOURCE_ENVIRONMENT: &str = "source.environment";
    /// Namespace of the event source
    pub const SOURCE_NAMESPACE: &str = "source.namespace";
    /// Type of the event source
    pub const SOURCE_TYPE: &str = "source.type";
    /// Event type
    pub const EVENT_TYPE: &str = "event-type";
    /// Event type version
    pub const EVENT_TYPE_VERSION: &str = "event-type-version";
    /// Event identifier
    pub const EVENT_ID: &str = "event-id";
    /// Event time
    pub const EVENT_TIME: &str = "event-time";
}

/// Coordinates of the system which emitted an event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct EventSource {
    /// Environment the source lives in
    pub environment: String,
    /// Namespace of the source within its environment
    pub namespace: String,
    /// Kind of system
    #[serde(rename = "type")]
    pub source_type: String,
}

/// Field of an event which failed validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Required field is absent or empty
    #[error("missing field {field}")]
    MissingField {
        /// Name of the field
        field: String,
    },
    /// Field is present but its value is malformed
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Name of the field
        field: String,
        /// Description of the expected format
        reason: &'static str,
    },
}

impl ValidationError {
    /// Name of the offending field
    pub fn field(&self) -> &str {
        match self {
            ValidationError::MissingField { field } => field,
            ValidationError::InvalidField { field, .. } => field,
        }
    }

    fn missing(field: &str) -> Self {
        ValidationError::MissingField {
            field: field.to_owned(),
        }
    }

    fn invalid(field: &str, reason: &'static str) -> Self {
        ValidationError::InvalidField {
            field: field.to_owned(),
            reason,
        }
    }
}

/// Normalized event as it travels through the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventEnvelope {
    /// System which emitted the event
    pub source: EventSource,
    /// Type of the event
    pub event_type: String,
    /// Version of the event type
    pub event_type_version: String,
    /// Unique identifier of the event
    pub event_id: String,
    /// Time at which the event occurred in RFC 3339 format
    pub event_time: String,
    /// Opaque payload
    #[serde(default)]
    pub data: Value,
    /// Additional metadata like the trace context
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl EventEnvelope {
    /// Parses and validates a serialized envelope
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let envelope: Self = serde_json::from_slice(payload).ok()?;
        envelope.validate().ok()?;
        Some(envelope)
    }

    /// Subject on which the event is published
    pub fn subject(&self) -> Subject {
        Subject::encode(&self.source, &self.event_type, &self.event_type_version)
    }

    /// Checks that all required fields are present and well-formed
    pub fn validate(&self) -> Result<(), ValidationError> {
        require(fields::SOURCE_ENVIRONMENT, &self.source.environment)?;
        require(fields::SOURCE_NAMESPACE, &self.source.namespace)?;
        require(fields::SOURCE_TYPE, &self.source.source_type)?;
        check_event_type(&self.event_type)?;
        check_event_type_version(&self.event_type_version)?;
        check_event_time(&self.event_time)?;
        check_event_id(&self.event_id)?;

        Ok(())
    }

    /// Looks up an extension by name
    pub fn extension(&self, name: &str) -> Option<&Value> {
        self.extensions.get(name)
    }

    /// Adds or replaces an extension
    pub fn set_extension(&mut self, name: &str, value: Value) {
        self.extensions.insert(name.to_owned(), value);
    }
}

/// Event source as sent by producers, all fields may be absent
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawEventSource {
    /// Environment the source lives in
    pub environment: Option<String>,
    /// Namespace of the source within its environment
    pub namespace: Option<String>,
    /// Kind of system
    #[serde(rename = "type")]
    pub source_type: Option<String>,
}

/// Location from which the event source has been read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOrigin {
    /// Request body
    Body,
    /// Request headers, the field names are the names of the respective headers
    Headers {
        /// Header carrying the environment
        environment: &'static str,
        /// Header carrying the namespace
        namespace: &'static str,
        /// Header carrying the type
        source_type: &'static str,
    },
}

/// Request body of the ingestion endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PublishRequest {
    /// System which emitted the event, read from headers when absent
    pub source: Option<RawEventSource>,
    /// Type of the event
    pub event_type: Option<String>,
    /// Version of the event type
    pub event_type_version: Option<String>,
    /// Unique identifier, generated when absent
    pub event_id: Option<String>,
    /// Time at which the event occurred
    pub event_time: Option<String>,
    /// Opaque payload
    #[serde(default)]
    pub data: Value,
}

impl PublishRequest {
    /// Validates the request and turns it into an envelope.
    ///
    /// The fallback source is used when the body does not carry one. Missing identifiers are
    /// replaced by a random UUID.
    pub fn into_envelope(
        self,
        fallback_source: Option<(RawEventSource, SourceOrigin)>,
    ) -> Result<EventEnvelope, ValidationError> {
        let (source, origin) = match self.source {
            Some(source) => (source, SourceOrigin::Body),
            None => fallback_source.unwrap_or((RawEventSource::default(), SourceOrigin::Body)),
        };

        let (environment_field, namespace_field, type_field) = match origin {
            SourceOrigin::Body => (
                fields::SOURCE_ENVIRONMENT,
                fields::SOURCE_NAMESPACE,
                fields::SOURCE_TYPE,
            ),
            SourceOrigin::Headers {
                environment,
                namespace,
                source_type,
            } => (environment, namespace, source_type),
        };

        let source = EventSource {
            environment: required(environment_field, source.environment)?,
            namespace: required(namespace_field, source.namespace)?,
            source_type: required(type_field, source.source_type)?,
        };

        let event_type = required(fields::EVENT_TYPE, self.event_type)?;
        check_event_type(&event_type)?;

        let event_type_version = required(fields::EVENT_TYPE_VERSION, self.event_type_version)?;
        check_event_type_version(&event_type_version)?;

        let event_time = required(fields::EVENT_TIME, self.event_time)?;
        check_event_time(&event_time)?;

        let event_id = match self.event_id.filter(|id| !id.is_empty()) {
            Some(id) => {
                check_event_id(&id)?;
                id
            }
            None => Uuid::new_v4().to_string(),
        };

        Ok(EventEnvelope {
            source,
            event_type,
            event_type_version,
            event_id,
            event_time,
            data: self.data,
            extensions: Map::new(),
        })
    }
}

fn required(field: &str, value: Option<String>) -> Result<String, ValidationError> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ValidationError::missing(field)),
    }
}

fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        Err(ValidationError::missing(field))
    } else {
        Ok(())
    }
}

fn check_event_type(value: &str) -> Result<(), ValidationError> {
    require(fields::EVENT_TYPE, value)?;

    if EVENT_TYPE_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::invalid(
            fields::EVENT_TYPE,
            "expected alphanumeric segments separated by '.', '_' or '-'",
        ))
    }
}

fn check_event_type_version(value: &str) -> Result<(), ValidationError> {
    require(fields::EVENT_TYPE_VERSION, value)?;

    if EVENT_TYPE_VERSION_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::invalid(
            fields::EVENT_TYPE_VERSION,
            "expected alphanumeric characters",
        ))
    }
}

fn check_event_time(value: &str) -> Result<(), ValidationError> {
    require(fields::EVENT_TIME, value)?;

    DateTime::parse_from_rfc3339(value)
        .map(|_| ())
        .map_err(|_| ValidationError::invalid(fields::EVENT_TIME, "expected an RFC 3339 timestamp"))
}

fn check_event_id(value: &str) -> Result<(), ValidationError> {
    require(fields::EVENT_ID, value)?;

    if EVENT_ID_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::invalid(
            fields::EVENT_ID,
            "expected alphanumeric characters, '_' or '-'",
        ))
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const HEADERS: SourceOrigin = SourceOrigin::Headers {
        environment: "Source-Environment",
        namespace: "Source-Namespace",
        source_type: "Source-Type",
    };

    fn request(body: Value) -> PublishRequest {
        serde_json::from_value(body).unwrap()
    }

    fn valid_body() -> Value {
        json!({
            "source": { "environment": "test", "namespace": "local.kyma.commerce", "type": "ec" },
            "event-type": "order.created",
            "event-type-version": "v1",
            "event-time": "2018-11-02T22:08:41+00:00",
            "data": "hello"
        })
    }

    #[test]
    fn build_envelope_from_valid_request() {
        let envelope = request(valid_body()).into_envelope(None).unwrap();

        assert_eq!(
            envelope.source,
            EventSource {
                environment: "test".into(),
                namespace: "local.kyma.commerce".into(),
                source_type: "ec".into(),
            }
        );
        assert_eq!(envelope.data, json!("hello"));
        assert!(Uuid::parse_str(&envelope.event_id).is_ok());
        assert!(envelope.validate().is_ok());
    }

    #[test]
    fn keep_provided_event_ids() {
        let mut body = valid_body();
        body["event-id"] = json!("31109198-4d69-4ae0-972d-76117f3748c8");

        let envelope = request(body).into_envelope(None).unwrap();
        assert_eq!(envelope.event_id, "31109198-4d69-4ae0-972d-76117f3748c8");
    }

    #[test]
    fn default_missing_data_to_null() {
        let mut body = valid_body();
        body.as_object_mut().unwrap().remove("data");

        let envelope = request(body).into_envelope(None).unwrap();
        assert_eq!(envelope.data, Value::Null);
    }

    #[test]
    fn report_missing_fields() {
        for field in &["event-type", "event-type-version", "event-time"] {
            let mut body = valid_body();
            body.as_object_mut().unwrap().remove(*field);

            let error = request(body).into_envelope(None).unwrap_err();
            assert_eq!(
                error,
                ValidationError::MissingField {
                    field: field.to_string()
                }
            );
        }
    }

    #[test]
    fn report_missing_source_fields() {
        let mut body = valid_body();
        body["source"] = json!({ "environment": "test", "type": "ec" });

        let error = request(body).into_envelope(None).unwrap_err();
        assert_eq!(error.field(), fields::SOURCE_NAMESPACE);
    }

    #[test]
    fn report_invalid_fields() {
        let cases = vec![
            ("event-type", json!("order created")),
            ("event-type-version", json!("v.1")),
            ("event-time", json!("yesterday")),
            ("event-id", json!("not an id!")),
        ];

        for (field, value) in cases {
            let mut body = valid_body();
            body[field] = value;

            match request(body).into_envelope(None) {
                Err(ValidationError::InvalidField { field: f, .. }) => assert_eq!(f, field),
                other => panic!("expected invalid {}, got {:?}", field, other),
            }
        }
    }

    #[test]
    fn fall_back_to_header_source() {
        let mut body = valid_body();
        body.as_object_mut().unwrap().remove("source");

        let headers = RawEventSource {
            environment: Some("prod".into()),
            namespace: Some("commerce".into()),
            source_type: Some("ec".into()),
        };

        let envelope = request(body).into_envelope(Some((headers, HEADERS))).unwrap();
        assert_eq!(envelope.source.environment, "prod");
    }

    #[test]
    fn name_headers_in_source_errors() {
        let mut body = valid_body();
        body.as_object_mut().unwrap().remove("source");

        let headers = RawEventSource {
            environment: Some("prod".into()),
            namespace: None,
            source_type: Some("ec".into()),
        };

        let error = request(body)
            .into_envelope(Some((headers, HEADERS)))
            .unwrap_err();
        assert_eq!(error.field(), "Source-Namespace");
    }

    #[test]
    fn prefer_body_source_over_headers() {
        let headers = RawEventSource {
            environment: Some("prod".into()),
            namespace: Some("commerce".into()),
            source_type: Some("ec".into()),
        };

        let envelope = request(valid_body())
            .into_envelope(Some((headers, HEADERS)))
            .unwrap();
        assert_eq!(envelope.source.environment, "test");
    }

    #[test]
    fn parse_serialized_envelopes() {
        let mut envelope = request(valid_body()).into_envelope(None).unwrap();
        envelope.set_extension("trace-context", json!({ "traceparent": "00-1-2-01" }));

        let payload = serde_json::to_vec(&envelope).unwrap();
        let parsed = EventEnvelope::parse(&payload).unwrap();

        assert_eq!(parsed, envelope);
        assert!(parsed.extension("trace-context").is_some());
    }

    #[test]
    fn reject_foreign_payloads() {
        assert!(EventEnvelope::parse(b"\"hello\"").is_none());
        assert!(EventEnvelope::parse(b"not json").is_none());

        let mut invalid = serde_json::to_value(request(valid_body()).into_envelope(None).unwrap())
            .unwrap();
        invalid["event-time"] = json!("yesterday");
        assert!(EventEnvelope::parse(invalid.to_string().as_bytes()).is_none());
    }
}
