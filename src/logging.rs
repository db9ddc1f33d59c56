use std::sync::Once;

/// Logger configuration.
///
/// `filter` uses the `env_logger` syntax, e.g. `"info"` or
/// `"penumbra=debug,wgpu_core=warn"`. When unset, `RUST_LOG` is honoured.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            write_style: env_logger::WriteStyle::Auto,
        }
    }
}

static INIT: Once = Once::new();

/// Installs the global logger. Later calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();
        match config.filter {
            Some(filter) => {
                builder.parse_filters(&filter);
            }
            None => match std::env::var("RUST_LOG") {
                Ok(filter) => {
                    builder.parse_filters(&filter);
                }
                Err(_) => {
                    builder
                        .filter_level(log::LevelFilter::Warn)
                        .filter_module("penumbra", log::LevelFilter::Info);
                }
            },
        }
        builder.write_style(config.write_style);
        // Tests may have installed a logger already.
        let _ = builder.try_init();
        log::debug!("logging initialized");
    });
}
