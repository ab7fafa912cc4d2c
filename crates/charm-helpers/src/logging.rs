use std::{
    io::{Sink, sink},
    path::PathBuf,
};

use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{
        MakeWriter,
        writer::{EitherWriter, MakeWriterExt as _},
    },
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Initializes `tracing` logging with options from the environment variable
/// given in the `env` parameter.
///
/// We encourage the variable to be the charm name plus `_LOG`, e.g. `HAPROXY_CHARM_LOG`.
/// If the variable is not set (or invalid), the maximum log level is INFO.
///
/// Log output goes to stderr, because hook tools and Juju own stdout. It can be copied to a
/// file by setting `{env}_DIRECTORY` (e.g. `HAPROXY_CHARM_LOG_DIRECTORY`) to a directory path.
/// This file will be rotated regularly.
///
/// Initialization is skipped if a global subscriber has already been installed.
pub fn initialize_logging(env: &str, app_name: &str) {
    let filter = EnvFilter::try_from_env(env)
        .unwrap_or_else(|_| EnvFilter::new(tracing::Level::INFO.to_string()));

    let file_appender_directory = std::env::var_os(format!("{env}_DIRECTORY")).map(PathBuf::from);
    let file_appender = OptionalMakeWriter::from(file_appender_directory.as_deref().and_then(
        |log_dir| {
            RollingFileAppender::builder()
                .filename_suffix(format!("{app_name}.log"))
                .max_log_files(6)
                .build(log_dir)
                .inspect_err(|error| eprintln!("failed to initialize rolling file appender: {error}"))
                .ok()
        },
    ));

    let fmt = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(std::io::stderr.and(file_appender));
    if Registry::default().with(filter).with(fmt).try_init().is_err() {
        return;
    }

    // need to delay logging until after tracing is initialized
    match file_appender_directory {
        Some(dir) => tracing::info!(directory = %dir.display(), "file logging enabled"),
        None => tracing::debug!("file logging disabled, because no log directory set"),
    }
}

/// Like [`EitherWriter`] but implements [`MakeWriter`] instead of [`std::io::Write`].
/// For selecting writers depending on dynamic configuration.
enum EitherMakeWriter<A, B> {
    A(A),
    B(B),
}

impl<'a, A, B> MakeWriter<'a> for EitherMakeWriter<A, B>
where
    A: MakeWriter<'a>,
    B: MakeWriter<'a>,
{
    type Writer = EitherWriter<A::Writer, B::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        match self {
            Self::A(a) => EitherWriter::A(a.make_writer()),
            Self::B(b) => EitherWriter::B(b.make_writer()),
        }
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        match self {
            Self::A(a) => EitherWriter::A(a.make_writer_for(meta)),
            Self::B(b) => EitherWriter::B(b.make_writer_for(meta)),
        }
    }
}

type OptionalMakeWriter<T> = EitherMakeWriter<T, fn() -> Sink>;

impl<T> From<Option<T>> for OptionalMakeWriter<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(t) => Self::A(t),
            None => Self::B(sink),
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing::{debug, error, info};

    // Either run
    //      cargo test default_tracing -- --nocapture
    // to see the ERROR and INFO messages, or
    //      CHARM_HELPERS_TEST_LOG=debug cargo test default_tracing -- --nocapture
    // to see them all.
    #[test]
    fn default_tracing_level_is_set_to_info() {
        super::initialize_logging("CHARM_HELPERS_TEST_LOG", "test");
        // A second call must not panic.
        super::initialize_logging("CHARM_HELPERS_TEST_LOG", "test");

        error!("ERROR level messages should be seen.");
        info!("INFO level messages should also be seen by default.");
        debug!("DEBUG level messages should be seen only if you set the CHARM_HELPERS_TEST_LOG env var.");
    }
}
