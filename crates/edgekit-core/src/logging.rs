//! Logging bootstrap for EdgeKit services.

use crate::config::env_vars;

/// Output format for the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, compact output for development
    #[default]
    Compact,
    /// One JSON object per line for production/container environments
    Json,
}

impl LogFormat {
    /// Pick the format from `EDGEKIT_LOG_JSON` (`1`/`true` selects JSON).
    pub fn from_env() -> Self {
        let json = std::env::var(env_vars::LOG_JSON)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if json { Self::Json } else { Self::Compact }
    }
}

/// Install the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise `edgekit=info`.
/// Returns `false` if a global subscriber was already installed.
pub fn init(format: LogFormat) -> bool {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("edgekit=info")
            .add_directive(tracing::Level::INFO.into())
    });

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()
            .is_ok(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .compact()
            .try_init()
            .is_ok(),
    }
}
