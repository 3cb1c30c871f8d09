//! Colorized console output
//!
//! One line per message: dimmed timestamp, fixed-width colored tag, level,
//! then the message. Broken pipes exit quietly so piping through `head`
//! does not produce a panic backtrace.

use super::config::LogLevel;
use super::tags::LogTag;
use chrono::Local;
use colored::*;
use std::io::{stdout, ErrorKind, Write};

const TAG_WIDTH: usize = 9;

pub fn format_and_log(tag: &LogTag, level: LogLevel, message: &str) {
    let time = Local::now().format("%H:%M:%S").to_string();
    let line = format!(
        "{} [{}] [{}] {}",
        time.dimmed(),
        colorize_tag(tag),
        colorize_level(level),
        message
    );
    print_stdout_safe(&line);
}

fn colorize_tag(tag: &LogTag) -> ColoredString {
    let padded = format!("{:<width$}", tag.as_str(), width = TAG_WIDTH);
    match tag {
        LogTag::Gateway => padded.bright_green().bold(),
        LogTag::Cache => padded.bright_cyan().bold(),
        LogTag::Coalescer => padded.bright_magenta().bold(),
        LogTag::RateLimit => padded.bright_yellow().bold(),
        LogTag::Batch => padded.bright_blue().bold(),
        LogTag::Http => padded.bright_white().bold(),
        LogTag::Config => padded.white().bold(),
    }
}

fn colorize_level(level: LogLevel) -> ColoredString {
    let padded = format!("{:<5}", level.as_str());
    match level {
        LogLevel::Error => padded.bright_red().bold(),
        LogLevel::Warning => padded.bright_yellow(),
        LogLevel::Info => padded.white(),
        LogLevel::Debug => padded.dimmed(),
    }
}

fn print_stdout_safe(message: &str) {
    if let Err(e) = writeln!(stdout(), "{}", message) {
        if e.kind() == ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
    }
    let _ = stdout().flush();
}
