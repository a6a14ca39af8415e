use colored::{ColoredString, Colorize};
use log::{Level, LevelFilter, Metadata, Record};
use std::io::{self, IsTerminal, Write};

/// Writes log records to stderr, clearing a progress line drawn there first.
pub struct Logger;

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let stderr = io::stderr();
        let clear = if stderr.is_terminal() { "\r\x1B[2K" } else { "" };
        let mut handle = stderr.lock();

        let _ = match log::max_level() {
            LevelFilter::Off => Ok(()),
            LevelFilter::Error | LevelFilter::Warn | LevelFilter::Info => match record.level() {
                Level::Info => writeln!(handle, "{}{}", clear, record.args()),
                _ => writeln!(handle, "{}{} {}", clear, label(record.level()), record.args()),
            },
            LevelFilter::Debug | LevelFilter::Trace => {
                let location = match (record.file(), record.line()) {
                    (Some(file), Some(line)) => format!("[{}:{}]", file, line).dimmed(),
                    _ => "[unk]".dimmed(),
                };

                writeln!(
                    handle,
                    "{}{} {} {} {}",
                    clear,
                    label(record.level()),
                    record.target().dimmed(),
                    location,
                    record.args()
                )
            }
        };
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

fn label(level: Level) -> ColoredString {
    match level {
        Level::Debug => "[DEBUG]".bold().blue(),
        Level::Error => "[ERROR]".bold().red(),
        Level::Info => "[INFO]".bold().green(),
        Level::Trace => "[TRACE]".bold().purple(),
        Level::Warn => "[WARN]".bold().yellow(),
    }
}

/// Maps `-q` and repeated `-v` flags to a level filter.
pub fn level_filter(quiet: bool, verbose: u8) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }

    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}
