//! Validation for the session, mirror, channel, and relay sections.

use crate::schema::NbshareConfig;

use super::helpers::{validate_non_empty, validate_range};

/// Validate session constraints.
pub(crate) fn validate_session(errors: &mut Vec<String>, config: &NbshareConfig) {
    validate_non_empty(errors, "session.service_name", &config.session.service_name);
    validate_range(
        errors,
        "session.request_timeout_ms",
        config.session.request_timeout_ms,
        100,
        600_000,
    );
    validate_range(
        errors,
        "session.guest_retry_attempts",
        config.session.guest_retry_attempts,
        0,
        20,
    );
    validate_range(
        errors,
        "session.guest_retry_delay_ms",
        config.session.guest_retry_delay_ms,
        0,
        60_000,
    );
}

/// Validate mirror naming.
pub(crate) fn validate_mirror(errors: &mut Vec<String>, config: &NbshareConfig) {
    validate_non_empty(errors, "mirror.view_type_prefix", &config.mirror.view_type_prefix);
    validate_non_empty(errors, "mirror.friendly_id_key", &config.mirror.friendly_id_key);
}

/// Validate channel buffer sizes.
pub(crate) fn validate_channel(errors: &mut Vec<String>, config: &NbshareConfig) {
    validate_range(errors, "channel.capacity", config.channel.capacity, 8, 65_536);
}

/// Validate the relay URL scheme.
pub(crate) fn validate_relay(errors: &mut Vec<String>, config: &NbshareConfig) {
    let url = &config.relay.url;
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        errors.push(format!("relay.url = {url:?} must start with ws:// or wss://"));
    }
}
