use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingSettings};
use crate::error::{Error, Result};

/// Install the global subscriber. `RUST_LOG` overrides `settings.level`.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(settings: &LoggingSettings) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let installed = match settings.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init(),
    };
    installed.map_err(|e| Error::Config(format!("logging: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_fails() {
        let settings = LoggingSettings::default();
        // May already be installed by another test in this binary.
        let _ = init_logging(&settings);
        assert!(matches!(init_logging(&settings), Err(Error::Config(_))));
    }
}
