mod settings;

pub(crate) use settings::with_credential;
pub use settings::{
    ClientConfig, LogFormat, ReconnectConfig, Settings, TailConfig, TelemetryConfig,
};
