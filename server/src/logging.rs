//! Logging setup for the server binary.
//!
//! Installs a `tracing-subscriber` registry and bridges `log` records from the
//! library's worker pool and sweeper into it.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use mdbconv::Settings;

/// Initializes global logging. `RUST_LOG` overrides the configured level.
pub fn init(settings: &Settings) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(&settings.log_level)))?;

    tracing_log::LogTracer::init()?;

    if settings.log_json {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_current_span(true));
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true));
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

/// Filter applying `level` to our crates and `warn` to dependencies.
fn default_directive(level: &str) -> String {
    let level = match level {
        "trace" | "debug" | "info" | "warn" | "error" => level,
        _ => "info",
    };
    format!(
        "warn,mdbconv={level},mdbconv_server={level},tower_http={level}",
        level = level
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_scopes_level() {
        assert_eq!(
            default_directive("debug"),
            "warn,mdbconv=debug,mdbconv_server=debug,tower_http=debug"
        );
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        assert!(default_directive("verbose").contains("mdbconv=info"));
    }
}
