use clap::ValueEnum;
use color_eyre::Result;
use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{Layer as _, fmt::MakeWriter, layer::SubscriberExt as _};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum WhenColor {
    Always,
    Never,
    Auto,
}

/// Build the subscriber stack, honoring `-v`/`-q` verbosity and `THRIFTY_LOG`.
///
/// `verbosity` is `-v` occurrences minus `-q` occurrences; 0 is `info`, each
/// `-v` raises a level and each `-q` lowers one.
pub fn make_logger<W>(writer: W, verbosity: i8, color: WhenColor) -> Result<impl tracing::Subscriber>
where
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    let default_directive = match verbosity {
        i8::MIN..=-2 => "error",
        -1 => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let logger = tracing_subscriber::registry().with(ErrorLayer::default()).with({
        let layer = tracing_subscriber::fmt::layer()
            .with_level(true)
            .with_target(true)
            .with_span_events(FmtSpan::NONE)
            .with_writer(writer);
        match color {
            WhenColor::Always => layer.with_ansi(true),
            WhenColor::Never => layer.with_ansi(false),
            WhenColor::Auto => layer,
        }
        .with_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_directive.parse().expect("valid default directive"))
                .with_env_var("THRIFTY_LOG")
                .from_env_lossy(),
        )
    });

    Ok(logger)
}
