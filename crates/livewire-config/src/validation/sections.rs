//! Per-section validators.

use crate::schema::LivewireConfig;

use super::helpers::{validate_range, validate_range_f64};

pub(crate) fn validate_realtime(errors: &mut Vec<String>, config: &LivewireConfig) {
    let rt = &config.realtime;
    if rt.url.trim().is_empty() {
        errors.push("realtime.url must not be empty".into());
    } else if !(rt.url.starts_with("ws://") || rt.url.starts_with("wss://")) {
        errors.push(format!("realtime.url = {} must be a ws:// or wss:// URL", rt.url));
    }
    validate_range(errors, "realtime.socket_heartbeat_secs", rt.socket_heartbeat_secs, 5, 120);
    validate_range(errors, "realtime.connect_timeout_secs", rt.connect_timeout_secs, 1, 120);
    validate_range(errors, "realtime.channel_buffer", rt.channel_buffer as u64, 16, 65_536);
    validate_range(errors, "realtime.history_capacity", rt.history_capacity as u64, 0, 10_000);
}

pub(crate) fn validate_presence(errors: &mut Vec<String>, config: &LivewireConfig) {
    let p = &config.presence;
    validate_range(errors, "presence.heartbeat_interval_secs", p.heartbeat_interval_secs, 1, 3_600);
    if let Some(stale) = p.stale_after_secs {
        if stale < p.heartbeat_interval_secs {
            errors.push(format!(
                "presence.stale_after_secs = {stale} must be >= heartbeat_interval_secs = {}",
                p.heartbeat_interval_secs
            ));
        }
    }
}

pub(crate) fn validate_reconnect(errors: &mut Vec<String>, config: &LivewireConfig) {
    let r = &config.reconnect;
    validate_range(errors, "reconnect.base_delay_ms", r.base_delay_ms, 1, 600_000);
    validate_range(errors, "reconnect.max_attempts", r.max_attempts as u64, 1, 1_000);
    validate_range_f64(errors, "reconnect.jitter", r.jitter, 0.0, 1.0);
    if r.max_delay_ms < r.base_delay_ms {
        errors.push(format!(
            "reconnect.max_delay_ms = {} must be >= base_delay_ms = {}",
            r.max_delay_ms, r.base_delay_ms
        ));
    }
}

pub(crate) fn validate_cache(errors: &mut Vec<String>, config: &LivewireConfig) {
    let c = &config.cache;
    validate_range(errors, "cache.default_ttl_secs", c.default_ttl_secs, 1, 31_536_000);
    validate_range(errors, "cache.sweep_interval_secs", c.sweep_interval_secs, 1, 86_400);
    if c.key_prefix.is_empty() {
        errors.push("cache.key_prefix must not be empty".into());
    }
}

pub(crate) fn validate_logging(errors: &mut Vec<String>, config: &LivewireConfig) {
    if config.logging.filter.trim().is_empty() {
        errors.push("logging.filter must not be empty".into());
    }
}
