//! Tracing subscriber setup for composition roots.

use tracing_subscriber::EnvFilter;

/// Fallback directive when the configured one does not parse.
pub const DEFAULT_DIRECTIVE: &str = "livewire=info";

/// Install a `fmt` subscriber filtered by `RUST_LOG` plus `directive`.
///
/// Returns `false` if a global subscriber is already installed, so libraries
/// and tests can call this freely.
pub fn init_tracing(directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(directive))
        .try_init()
        .is_ok()
}

fn build_filter(directive: &str) -> EnvFilter {
    let parsed = directive.parse().or_else(|_| DEFAULT_DIRECTIVE.parse());
    match parsed {
        Ok(d) => EnvFilter::from_default_env().add_directive(d),
        Err(_) => EnvFilter::from_default_env(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_directive_falls_back() {
        let filter = build_filter("not a [valid directive");
        assert!(filter.to_string().contains("livewire=info"));
    }

    #[test]
    fn second_init_is_harmless() {
        let _ = init_tracing("livewire=debug");
        assert!(!init_tracing("livewire=debug"));
    }
}
