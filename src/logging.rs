use crate::config::EngineSettings;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(settings: &EngineSettings) -> anyhow::Result<()> {
    let directive = std::env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| format!("procurement_ledger={}", settings.log_level));
    let filter = EnvFilter::try_new(&directive)?;

    let installed = if settings.log_json {
        fmt().with_env_filter(filter).json().try_init()
    } else {
        fmt().with_env_filter(filter).try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_error() {
        let settings = EngineSettings::load(None).unwrap();
        // another test may have installed one already
        let _ = init_tracing(&settings);
        assert!(init_tracing(&settings).is_err());
    }
}
