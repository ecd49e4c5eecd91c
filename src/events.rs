//! Domain and notification event types.
//!
//! Inbound domain events arrive as UTF-8 JSON. The queue a message was
//! consumed from selects the variant; payloads carry no type tag. Upstream
//! producers publish camelCase field names, so each field also accepts its
//! snake_case alias.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Errors raised while decoding an inbound message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("required field '{0}' is empty")]
    EmptyField(&'static str),
}

/// The four input queues, used as the variant discriminator for decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputQueue {
    UserCreated,
    SessionStarted,
    PasswordResetRequested,
    PasswordUpdated,
}

impl InputQueue {
    pub const ALL: [InputQueue; 4] = [
        InputQueue::UserCreated,
        InputQueue::SessionStarted,
        InputQueue::PasswordResetRequested,
        InputQueue::PasswordUpdated,
    ];

    /// Fixed routing key binding this queue to the topic exchange.
    pub fn routing_key(self) -> &'static str {
        match self {
            InputQueue::UserCreated => "usuarios.created",
            InputQueue::SessionStarted => "sesiones.iniciada",
            InputQueue::PasswordResetRequested => "password.reset.requested",
            InputQueue::PasswordUpdated => "password.updated",
        }
    }
}

/// A user account was created upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct UserCreated {
    #[serde(alias = "usuarioId", alias = "usuario_id")]
    pub user_id: String,
    pub email: String,
    #[serde(alias = "nombre")]
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(alias = "activationToken", alias = "activation_token")]
    pub activation_token: Option<String>,
    #[serde(alias = "baseUrl", alias = "base_url")]
    pub base_url: Option<String>,
}

/// A login session was started.
///
/// The subject identifier is numeric for this variant only; the upstream
/// session service publishes it as an integer.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionStarted {
    #[serde(alias = "usuarioId", alias = "usuario_id")]
    pub user_id: i64,
    pub email: String,
    #[serde(alias = "nombre")]
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(alias = "ipAddress", alias = "ip_address")]
    pub ip_address: Option<String>,
    #[serde(alias = "userAgent", alias = "user_agent")]
    pub user_agent: Option<String>,
    #[serde(alias = "deviceInfo", alias = "device_info")]
    pub device_info: Option<String>,
    pub location: Option<String>,
}

/// A password reset was requested.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordResetRequested {
    #[serde(alias = "usuarioId", alias = "usuario_id")]
    pub user_id: String,
    pub email: String,
    #[serde(alias = "nombre")]
    pub name: String,
    pub token: String,
    #[serde(alias = "fechaSolicitud", alias = "fecha_solicitud")]
    pub requested_at: DateTime<Utc>,
}

/// A password was changed.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordUpdated {
    #[serde(alias = "usuarioId", alias = "usuario_id")]
    pub user_id: String,
    pub email: String,
    #[serde(alias = "nombre")]
    pub name: String,
    #[serde(alias = "fechaActualizacion", alias = "fecha_actualizacion")]
    pub updated_at: DateTime<Utc>,
}

/// A domain event consumed from one of the input queues.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    UserCreated(UserCreated),
    SessionStarted(SessionStarted),
    PasswordResetRequested(PasswordResetRequested),
    PasswordUpdated(PasswordUpdated),
}

impl DomainEvent {
    fn recipient(&self) -> (&str, &str) {
        match self {
            DomainEvent::UserCreated(e) => (&e.email, &e.name),
            DomainEvent::SessionStarted(e) => (&e.email, &e.name),
            DomainEvent::PasswordResetRequested(e) => (&e.email, &e.name),
            DomainEvent::PasswordUpdated(e) => (&e.email, &e.name),
        }
    }
}

/// Decode raw message bytes into the variant the queue carries.
///
/// Unknown fields are ignored. Missing required fields and malformed JSON
/// surface as [`DecodeError`]; so does an empty email or name, which the
/// notification pipeline has no use for.
pub fn decode(queue: InputQueue, payload: &[u8]) -> Result<DomainEvent, DecodeError> {
    let event = match queue {
        InputQueue::UserCreated => DomainEvent::UserCreated(serde_json::from_slice(payload)?),
        InputQueue::SessionStarted => DomainEvent::SessionStarted(serde_json::from_slice(payload)?),
        InputQueue::PasswordResetRequested => {
            DomainEvent::PasswordResetRequested(serde_json::from_slice(payload)?)
        }
        InputQueue::PasswordUpdated => {
            DomainEvent::PasswordUpdated(serde_json::from_slice(payload)?)
        }
    };

    let (email, name) = event.recipient();
    if email.is_empty() {
        return Err(DecodeError::EmptyField("email"));
    }
    if name.is_empty() {
        return Err(DecodeError::EmptyField("name"));
    }
    Ok(event)
}

/// Notification kind, the downstream-facing event discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    UserWelcome,
    LoginNotification,
    PasswordReset,
    PasswordUpdated,
}

/// The normalized event published to the delivery queue.
///
/// `additional_data` is omitted from the wire entirely when there is no
/// enrichment data, never serialized as an empty object.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub email: String,
    pub user_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<Map<String, Value>>,
}
