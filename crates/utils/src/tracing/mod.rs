use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, span, trace, warn, Level, Span};

/// Default filter directive when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize the tracing system
///
/// Installs a registry with an `EnvFilter` (honouring `RUST_LOG`, `info`
/// otherwise) and a compact formatter on stderr. ANSI colours are only
/// enabled when stderr is a terminal.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(is_tty())
        .compact()
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Initialize tracing for tests
///
/// Output goes through the libtest capture writer. Safe to call from every
/// test: only the first call installs a subscriber.
pub fn init_for_tests() {
    let fmt_layer = fmt::layer().with_test_writer().compact();

    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .try_init();
}

/// Check if we're running in a TTY environment
fn is_tty() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stderr())
}

/// Create a span wrapping a single cache operation
pub fn operation_span(operation: &str, key: &str) -> Span {
    span!(Level::DEBUG, "cache_operation", operation = %operation, key = %key)
}

/// Emit a structured event for a backend lookup
pub fn cache_event(backend: &str, key: &str, hit: bool) {
    if hit {
        debug!(backend = %backend, key = %key, "cache_hit");
    } else {
        debug!(backend = %backend, key = %key, "cache_miss");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_for_tests_is_idempotent() {
        init_for_tests();
        init_for_tests();
        cache_event("memory", "clients", true);
        let _guard = operation_span("fetch", "clients").entered();
    }
}
