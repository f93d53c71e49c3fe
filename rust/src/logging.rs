// Process-wide tracing setup. Later calls are no-ops.

const DEFAULT_FILTER: &str = "chatsite_core=debug,info";

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER))
}

/// os_log on iOS, logcat on Android, stderr `fmt` elsewhere. `RUST_LOG`
/// overrides the default filter on every platform.
pub fn init_logging(data_dir: &str) {
    #[cfg(target_os = "ios")]
    {
        use tracing_subscriber::prelude::*;

        let _ = tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_oslog::OsLogger::new("com.chatsite.core", "default"))
            .try_init();
    }

    #[cfg(target_os = "android")]
    {
        use tracing_subscriber::prelude::*;

        let _ = tracing_subscriber::registry()
            .with(paranoid_android::layer("chatsite").with_filter(env_filter()))
            .try_init();
    }

    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_writer(std::io::stderr)
            .try_init();
    }

    tracing::debug!(data_dir, "logging initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();
        init_logging(data_dir);
        init_logging(data_dir);
        // No log file is written next to app data.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
