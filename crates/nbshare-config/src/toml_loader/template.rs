//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# nbshare configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[session]
# service_name = "nbshare-live"
# request_timeout_ms = 30000     # 100-600000
# guest_retry_attempts = 3       # 0-20
# guest_retry_delay_ms = 500     # 0-60000

[mirror]
# view_type_prefix = "mirror-"
# friendly_id_key = "friendlyId"

[channel]
# capacity = 256                 # 8-65536

[relay]
# url = "ws://127.0.0.1:8080"
# auto_connect = false

[logging]
# level = "INFO"                 # DEBUG, INFO, WARNING, ERROR
"##
    .to_string()
}
