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

//! Types configuring the node's log output. They deserialize straight out
//! of the configuration file's `[logging]` section.

use log::LevelFilter;

/// Verbosity steps exposed in the configuration file, one per sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LogLevel {
	/// Failures only
	Error,
	/// Failures and anomalies worth an operator's attention
	Warning,
	/// Normal operational narrative
	Info,
	/// Wordy, for troubleshooting
	Debug,
	/// Everything, including per-message noise
	Trace,
}

impl LogLevel {
	/// The log4rs filter this level translates to.
	pub fn to_filter(&self) -> LevelFilter {
		match *self {
			LogLevel::Error => LevelFilter::Error,
			LogLevel::Warning => LevelFilter::Warn,
			LogLevel::Info => LevelFilter::Info,
			LogLevel::Debug => LevelFilter::Debug,
			LogLevel::Trace => LevelFilter::Trace,
		}
	}
}

/// Which sinks the node logs to and how chatty each one is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
	/// Mirror log records to stdout
	pub log_to_stdout: bool,
	/// Verbosity of the stdout mirror
	pub stdout_log_level: LogLevel,
	/// Keep a log file
	pub log_to_file: bool,
	/// Verbosity of the log file
	pub file_log_level: LogLevel,
	/// Where the log file lives
	pub log_file_path: String,
	/// Continue an existing log file rather than truncating it
	pub log_file_append: bool,
	/// Rotate the file once it grows past this many bytes, never when
	/// unset
	pub log_max_size: Option<u64>,
}

impl Default for LoggingConfig {
	fn default() -> LoggingConfig {
		LoggingConfig {
			log_to_stdout: true,
			stdout_log_level: LogLevel::Warning,
			log_to_file: true,
			file_log_level: LogLevel::Info,
			log_file_path: "bitnode.log".to_owned(),
			log_file_append: true,
			log_max_size: Some(16 * 1024 * 1024),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn levels_translate_in_order() {
		assert!(LogLevel::Error.to_filter() < LogLevel::Warning.to_filter());
		assert!(LogLevel::Warning.to_filter() < LogLevel::Info.to_filter());
		assert!(LogLevel::Info.to_filter() < LogLevel::Trace.to_filter());
	}
}
