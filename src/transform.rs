//! Domain event to notification event transformation.
//!
//! Pure functions; everything reaching this stage has already been
//! validated by the decoder.

use chrono::Utc;
use serde_json::{Map, Value};

use crate::events::{
    DomainEvent, NotificationEvent, NotificationKind, PasswordResetRequested, PasswordUpdated,
    SessionStarted, UserCreated,
};

/// Placeholder for session metadata the producer did not supply.
const UNKNOWN: &str = "unknown";

/// Map a domain event onto its notification shape.
pub fn transform(event: DomainEvent) -> NotificationEvent {
    match event {
        DomainEvent::UserCreated(e) => user_welcome(e),
        DomainEvent::SessionStarted(e) => login_notification(e),
        DomainEvent::PasswordResetRequested(e) => password_reset(e),
        DomainEvent::PasswordUpdated(e) => password_updated(e),
    }
}

/// Welcome notification for a freshly created account.
///
/// Stamped with the processing time, not the event's own timestamp;
/// downstream consumers rely on this.
fn user_welcome(event: UserCreated) -> NotificationEvent {
    let mut data = Map::new();
    if let Some(token) = non_empty(event.activation_token) {
        data.insert("activationToken".to_string(), Value::String(token));
    }
    if let Some(url) = non_empty(event.base_url) {
        data.insert("baseUrl".to_string(), Value::String(url));
    }

    NotificationEvent {
        kind: NotificationKind::UserWelcome,
        email: event.email,
        user_name: event.name,
        timestamp: Utc::now(),
        additional_data: if data.is_empty() { None } else { Some(data) },
    }
}

/// New-login notification. Session metadata keys are always present,
/// falling back to a placeholder when the producer omitted them.
fn login_notification(event: SessionStarted) -> NotificationEvent {
    let mut data = Map::new();
    data.insert("ipAddress".to_string(), or_unknown(event.ip_address));
    data.insert("userAgent".to_string(), or_unknown(event.user_agent));
    data.insert("deviceInfo".to_string(), or_unknown(event.device_info));
    data.insert("location".to_string(), or_unknown(event.location));

    NotificationEvent {
        kind: NotificationKind::LoginNotification,
        email: event.email,
        user_name: event.name,
        timestamp: event.timestamp,
        additional_data: Some(data),
    }
}

fn password_reset(event: PasswordResetRequested) -> NotificationEvent {
    let mut data = Map::new();
    data.insert("resetToken".to_string(), Value::String(event.token));

    NotificationEvent {
        kind: NotificationKind::PasswordReset,
        email: event.email,
        user_name: event.name,
        timestamp: event.requested_at,
        additional_data: Some(data),
    }
}

fn password_updated(event: PasswordUpdated) -> NotificationEvent {
    NotificationEvent {
        kind: NotificationKind::PasswordUpdated,
        email: event.email,
        user_name: event.name,
        timestamp: event.updated_at,
        additional_data: None,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn or_unknown(value: Option<String>) -> Value {
    Value::String(non_empty(value).unwrap_or_else(|| UNKNOWN.to_string()))
}
