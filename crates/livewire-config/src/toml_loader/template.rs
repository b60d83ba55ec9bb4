//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# Livewire Configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[realtime]
# url = "ws://localhost:4000/realtime/v1/websocket"
# api_key = ""
# access_token = ""
# socket_heartbeat_secs = 25   # 5-120
# connect_timeout_secs = 15    # 1-120
# channel_buffer = 256         # 16-65536
# history_capacity = 100       # 0-10000

[presence]
# heartbeat_interval_secs = 30 # 1-3600
# stale_after_secs = 60        # defaults to 2 x heartbeat_interval_secs

[reconnect]
# base_delay_ms = 1000
# max_delay_ms = 30000
# jitter = 0.2                 # 0.0-1.0
# max_attempts = 10            # 1-1000

[cache]
# default_ttl_secs = 300
# max_entries = 500            # advisory only
# sweep_interval_secs = 60
# key_prefix = "cache_"

[logging]
# filter = "livewire=info"
"##
    .to_string()
}
