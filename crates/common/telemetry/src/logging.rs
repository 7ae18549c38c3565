// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Process-wide `tracing` setup: stdout, an hourly rolling log file and an
//! error-only companion file.

use std::{
    env,
    io::IsTerminal,
    sync::{LazyLock, Once},
};

use bon::Builder;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, de};
use smart_default::SmartDefault;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, Layer, Registry, filter, layer::SubscriberExt};

/// Deserializes a string value, using `Default::default()` if the string is
/// empty.
///
/// # Errors
/// Returns an error if the non-empty string does not name a `T`.
pub fn empty_string_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(T::default())
    } else {
        T::deserialize(de::value::StrDeserializer::new(&s)).map_err(|e: de::value::Error| {
            de::Error::custom(format!("invalid value, expect empty string, err: {e}"))
        })
    }
}

/// Directory used for log files when a config names none explicitly.
pub const DEFAULT_LOGGING_DIR: &str = "logs";

/// Fallback filter when neither [`LoggingOptions::level`] nor `RUST_LOG` is
/// set.
const DEFAULT_LOG_TARGETS: &str = "info";

/// Configuration of the logging system.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory for rolling log files. Empty disables file logging.
    #[default = ""]
    #[builder(default, into)]
    pub dir: String,

    /// Filter string such as `"info"` or `"info,logship_queue=debug"`.
    ///
    /// Falls back to `RUST_LOG`, then to `"info"`.
    #[builder(into)]
    pub level: Option<String>,

    #[serde(default, deserialize_with = "empty_string_as_default")]
    #[builder(default)]
    pub log_format: LogFormat,

    /// Rotated files kept per log kind. Files rotate hourly, so the default
    /// keeps 30 days.
    #[default = 720]
    #[builder(default = 720)]
    pub max_log_files: usize,

    /// Also write logs to stdout.
    #[default = true]
    #[builder(default = true)]
    pub append_stdout: bool,
}

/// Log line encoding.
#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per line, with span context.
    Json,
    /// Human-readable lines.
    #[default]
    Text,
}

/// Keeps the unit-test writers alive for the whole test binary.
static GLOBAL_UT_LOG_GUARD: LazyLock<Mutex<Option<Vec<WorkerGuard>>>> =
    LazyLock::new(|| Mutex::new(None));

/// Initializes file logging for unit tests.
///
/// Reads `UNITTEST_LOG_DIR` (default `/tmp/__unittest_logs`) and
/// `UNITTEST_LOG_LEVEL`. Safe to call from every test; only the first call
/// does anything.
pub fn init_default_ut_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        let dir =
            env::var("UNITTEST_LOG_DIR").unwrap_or_else(|_| "/tmp/__unittest_logs".to_string());
        let level = env::var("UNITTEST_LOG_LEVEL")
            .unwrap_or_else(|_| "debug,logship_queue=info".to_string());

        let opts = LoggingOptions::builder()
            .dir(dir.clone())
            .level(level)
            .append_stdout(false)
            .build();
        *GLOBAL_UT_LOG_GUARD.lock() = Some(init_global_logging("unittest", &opts));

        tracing::info!("logs dir = {}", dir);
    });
}

/// Installs the global subscriber.
///
/// Returned guards flush the non-blocking writers when dropped and must live
/// as long as logging is needed. Only the first call in a process installs
/// anything; later calls return no guards.
///
/// # Panics
/// Panics if the log directory cannot be used, the level string does not
/// parse, or another global subscriber is already installed.
pub fn init_global_logging(app_name: &str, opts: &LoggingOptions) -> Vec<WorkerGuard> {
    static START: Once = Once::new();
    let mut guards = vec![];

    START.call_once(|| {
        LogTracer::init().expect("log tracer must be valid");

        let stdout_logging_layer = opts.append_stdout.then(|| {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            guards.push(guard);
            let ansi = std::io::stdout().is_terminal();

            match opts.log_format {
                LogFormat::Json => tracing_subscriber::fmt::Layer::new()
                    .json()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .with_current_span(true)
                    .with_span_list(true)
                    .boxed(),
                LogFormat::Text => tracing_subscriber::fmt::Layer::new()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .boxed(),
            }
        });

        let file_logging_layer = (!opts.dir.is_empty()).then(|| {
            let (writer, guard) =
                tracing_appender::non_blocking(rolling_appender(app_name.to_string(), opts));
            guards.push(guard);

            match opts.log_format {
                LogFormat::Json => tracing_subscriber::fmt::Layer::new()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_current_span(true)
                    .with_span_list(true)
                    .boxed(),
                LogFormat::Text => tracing_subscriber::fmt::Layer::new()
                    .with_writer(writer)
                    .with_ansi(false)
                    .boxed(),
            }
        });

        let err_file_logging_layer = (!opts.dir.is_empty()).then(|| {
            let (writer, guard) =
                tracing_appender::non_blocking(rolling_appender(format!("{app_name}-err"), opts));
            guards.push(guard);

            match opts.log_format {
                LogFormat::Json => tracing_subscriber::fmt::Layer::new()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(filter::LevelFilter::ERROR)
                    .boxed(),
                LogFormat::Text => tracing_subscriber::fmt::Layer::new()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(filter::LevelFilter::ERROR)
                    .boxed(),
            }
        });

        let filter = opts
            .level
            .as_deref()
            .or(env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
            .unwrap_or(DEFAULT_LOG_TARGETS)
            .parse::<filter::Targets>()
            .expect("error parsing log level string");

        let subscriber = Registry::default()
            .with(filter)
            .with(stdout_logging_layer)
            .with(file_logging_layer)
            .with(err_file_logging_layer);

        tracing::subscriber::set_global_default(subscriber)
            .expect("error setting global tracing subscriber");
    });

    guards
}

fn rolling_appender(prefix: String, opts: &LoggingOptions) -> RollingFileAppender {
    RollingFileAppender::builder()
        .rotation(Rotation::HOURLY)
        .filename_prefix(prefix)
        .max_log_files(opts.max_log_files)
        .build(&opts.dir)
        .unwrap_or_else(|e| {
            panic!(
                "initializing rolling file appender at {} failed: {}",
                &opts.dir, e
            )
        })
}
