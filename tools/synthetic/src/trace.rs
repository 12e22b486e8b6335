//! tracing configuration
use anyhow::{Context, Result};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{
        self,
        format::{Format, PrettyFields},
    },
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

/// How log lines are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Standard,
    Json,
    Pretty,
}

impl LogFormat {
    /// unknown formats fall back to standard
    pub fn parse(raw: &str) -> Self {
        match raw {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::Standard,
        }
    }
}

/// Install the global subscriber. `level` accepts anything `RUST_LOG` does,
/// falling back to `info` when it doesn't parse.
pub fn init(level: &str, format: &str) -> Result<LogFormat> {
    let filter = EnvFilter::try_new(level).or_else(|_| EnvFilter::try_new("info"))?;
    let format = LogFormat::parse(format);

    // logs go to stderr so the report on stdout stays machine readable
    let res = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(Format::default().pretty().with_source_location(false))
                    .fmt_fields(PrettyFields::new())
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Standard => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    res.context("failed to install tracing subscriber")?;

    Ok(format)
}
