// Copyright 2020 The Bitnode Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Log output setup for the whole workspace. The `log` macros are the
//! only interface the other crates see; this module stands up the log4rs
//! backend behind them, one console sink and one (optionally rotating)
//! file sink, each with its own threshold. Panics are routed into the log
//! so a crashed node leaves a trace in the file.

use std::panic::{self, PanicInfo};
use std::sync::Once;
use std::thread;

use backtrace::Backtrace;
use log::{LevelFilter, Record};
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::Append;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::filter::threshold::ThresholdFilter;
use log4rs::filter::{Filter, Response};

use crate::types::LoggingConfig;

const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {h({l})} {M} {m}{n}";

// How many rotated log archives to keep around before the oldest is
// overwritten.
const ROLLED_FILES_KEPT: u32 = 32;

// The logging backend can only ever be installed once per process; both
// entry points funnel through this.
static INIT: Once = Once::new();

// Keeps records from dependencies out of the node's log; only the
// workspace's own crates, all named bitnode*, get through.
#[derive(Debug)]
struct WorkspaceFilter;

impl Filter for WorkspaceFilter {
	fn filter(&self, record: &Record<'_>) -> Response {
		match record.module_path() {
			Some(path) if path.starts_with("bitnode") => Response::Neutral,
			_ => Response::Reject,
		}
	}
}

fn encoder() -> Box<PatternEncoder> {
	Box::new(PatternEncoder::new(LOG_PATTERN))
}

fn sink(name: &str, level: LevelFilter, append: Box<dyn Append>) -> Appender {
	Appender::builder()
		.filter(Box::new(ThresholdFilter::new(level)))
		.filter(Box::new(WorkspaceFilter))
		.build(name, append)
}

// The file sink, rotating through gzipped archives when a maximum size is
// configured. Returns None (with a note on stderr) when the file cannot
// be set up, leaving the console sink as the fallback.
fn file_sink(config: &LoggingConfig) -> Option<Box<dyn Append>> {
	let appender: Result<Box<dyn Append>, String> = match config.log_max_size {
		Some(size) => {
			let archives = format!("{}.{{}}.gz", config.log_file_path);
			FixedWindowRoller::builder()
				.build(&archives, ROLLED_FILES_KEPT)
				.map_err(|e| format!("{}", e))
				.and_then(|roller| {
					let policy = CompoundPolicy::new(
						Box::new(SizeTrigger::new(size)),
						Box::new(roller),
					);
					RollingFileAppender::builder()
						.append(config.log_file_append)
						.encoder(encoder())
						.build(&config.log_file_path, Box::new(policy))
						.map(|a| Box::new(a) as Box<dyn Append>)
						.map_err(|e| format!("{}", e))
				})
		}
		None => FileAppender::builder()
			.append(config.log_file_append)
			.encoder(encoder())
			.build(&config.log_file_path)
			.map(|a| Box::new(a) as Box<dyn Append>)
			.map_err(|e| format!("{}", e)),
	};
	match appender {
		Ok(a) => Some(a),
		Err(e) => {
			eprintln!("Cannot log to {}: {}", config.log_file_path, e);
			None
		}
	}
}

/// Installs the logging backend described by the config. Safe to call
/// more than once; only the first call has any effect.
pub fn init_logger(config: &LoggingConfig) {
	INIT.call_once(|| {
		let mut appenders = vec![];
		let mut root = Root::builder();
		// the root threshold must admit the most verbose enabled sink,
		// the per-sink thresholds narrow from there
		let mut verbosity = LevelFilter::Off;

		if config.log_to_stdout {
			let console = Box::new(ConsoleAppender::builder().encoder(encoder()).build());
			let level = config.stdout_log_level.to_filter();
			appenders.push(sink("stdout", level, console));
			root = root.appender("stdout");
			verbosity = verbosity.max(level);
		}

		if config.log_to_file {
			if let Some(file) = file_sink(config) {
				let level = config.file_log_level.to_filter();
				appenders.push(sink("file", level, file));
				root = root.appender("file");
				verbosity = verbosity.max(level);
			}
		}

		match Config::builder()
			.appenders(appenders)
			.build(root.build(verbosity))
		{
			Ok(backend) => {
				let _ = log4rs::init_config(backend);
				info!("Logging ready at verbosity {}", verbosity);
			}
			Err(e) => eprintln!("Failed to assemble the logger: {}", e),
		}

		let crash_hint = if config.log_to_file {
			Some(config.log_file_path.clone())
		} else {
			None
		};
		log_panics(crash_hint);
	});
}

/// Console-only debug logging for unit and integration tests. Safe to
/// call from every test; the first caller wins.
pub fn init_test_logger() {
	INIT.call_once(|| {
		let console = Box::new(ConsoleAppender::builder().encoder(encoder()).build());
		let built = Config::builder()
			.appender(sink("stdout", LevelFilter::Debug, console))
			.build(Root::builder().appender("stdout").build(LevelFilter::Debug));
		if let Ok(backend) = built {
			let _ = log4rs::init_config(backend);
		}
	});
}

// Replaces the default panic output so the crash lands in the log file as
// well as on stderr, with enough context (thread, location, backtrace) to
// diagnose it after the process is gone.
fn log_panics(log_file: Option<String>) {
	panic::set_hook(Box::new(move |info: &PanicInfo<'_>| {
		let trace = Backtrace::new();
		let current = thread::current();
		let thread_name = current.name().unwrap_or("<unnamed>");
		let reason = panic_reason(info);
		let location = match info.location() {
			Some(at) => format!("{}:{}", at.file(), at.line()),
			None => "<unknown location>".to_owned(),
		};

		error!(
			"thread '{}' panicked at {}: {}\n{:?}",
			thread_name, location, reason, trace
		);
		match &log_file {
			Some(path) => eprintln!(
				"bitnode panicked on thread '{}': {} (details in {})",
				thread_name, reason, path
			),
			None => eprintln!("bitnode panicked on thread '{}': {}", thread_name, reason),
		}
	}));
}

fn panic_reason(info: &PanicInfo<'_>) -> String {
	if let Some(s) = info.payload().downcast_ref::<&str>() {
		(*s).to_owned()
	} else if let Some(s) = info.payload().downcast_ref::<String>() {
		s.clone()
	} else {
		"<opaque panic payload>".to_owned()
	}
}
