use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

/// Emit an event inside a span named after the area of the worker it came
/// from. A leading `job = <id>` attaches the queue job id to the span.
#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, job = $job:expr, $($msg:tt)+) => {{
        let span = $crate::tracing::span!($level, $span, job_id = %$job);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg)+)
    }};

    ($level:expr, $span:expr, $($msg:tt)+) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg)+)
    }};
}

/// Something the worker pushed out: an acknowledgement to the queue or a
/// message handed to SMTP.
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:tt)+) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg)+)
    };

    ($($msg:tt)+) => {
        $crate::outgoing!(level = TRACE, $($msg)+)
    };
}

/// Something the worker pulled in from the queue.
#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:tt)+) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", $($msg)+)
    };

    ($($msg:tt)+) => {
        $crate::incoming!(level = TRACE, $($msg)+)
    };
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:tt)+) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg)+)
    };

    ($($msg:tt)+) => {
        $crate::internal!(level = TRACE, $($msg)+)
    };
}

/// Level used when `LOG_LEVEL` is not set.
const fn default_level(verbose: bool) -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
}

/// Install the process-wide subscriber.
///
/// `LOG_LEVEL` takes precedence over `verbose`. Only events from `smtpw*`
/// targets are written, so SMTP and TLS library chatter stays out of the log.
pub fn init(verbose: bool) {
    let default = default_level(verbose);

    let level = std::env::var("LOG_LEVEL").map_or(default, |level| {
        LevelFilter::from_str(level.as_str()).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    });

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("smtpw")
                })),
        )
        .init();
}
