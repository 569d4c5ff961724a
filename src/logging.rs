//! Single-line log output with timestamps, source locations, and optional
//! ANSI colour.
//!
//! Provides the [`hlog!`] macro, which writes lines shaped like:
//!
//! ```text
//! 20261019T09:14:03.512 - src/messages.rs:88 - send: a-3f9c2e1 -> c-81d0a4b (text)
//! ```
//!
//! When stderr is a terminal, timestamps and source locations are dimmed and
//! actor/conversation ids get a stable colour derived from their content.
//! Call [`set_writer`] to redirect output (file, test buffer, ...); doing so
//! also disables colour.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::SystemTime;

static COLOUR_ENABLED: AtomicBool = AtomicBool::new(false);

static LOG_WRITER: LazyLock<Mutex<Box<dyn Write + Send>>> =
    LazyLock::new(|| Mutex::new(Box::new(io::stderr())));

/// Initialize logging. Call once at startup; detects colour support on stderr.
pub fn init() {
    COLOUR_ENABLED.store(io::stderr().is_terminal(), Ordering::Relaxed);
}

/// Replace the log writer. All subsequent [`hlog!`] output goes to `w`.
pub fn set_writer(w: Box<dyn Write + Send>) {
    COLOUR_ENABLED.store(false, Ordering::Relaxed);
    if let Ok(mut guard) = LOG_WRITER.lock() {
        *guard = w;
    }
}

pub fn colour_enabled() -> bool {
    COLOUR_ENABLED.load(Ordering::Relaxed)
}

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

const ID_COLOURS: &[&str] = &[
    "\x1b[91m", "\x1b[92m", "\x1b[93m", "\x1b[94m", "\x1b[95m", "\x1b[96m", "\x1b[31m",
    "\x1b[32m", "\x1b[33m", "\x1b[34m", "\x1b[35m", "\x1b[36m",
];

fn hash_colour(id: &str) -> &'static str {
    let hash: u32 = id
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    ID_COLOURS[(hash as usize) % ID_COLOURS.len()]
}

const LOG_ID_TRUNCATE_LEN: usize = 7;

fn truncate_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(LOG_ID_TRUNCATE_LEN)
        .map(|(i, _)| i)
        .unwrap_or(id.len());
    &id[..end]
}

fn tagged_id(tag: &str, id: &str) -> String {
    let short = truncate_id(id);
    if colour_enabled() {
        format!("{}{tag}-{short}{RESET}", hash_colour(id))
    } else {
        format!("{tag}-{short}")
    }
}

/// Format an actor (profile) id, e.g. `a-3f9c2e1`.
pub fn actor_id(id: &str) -> String {
    tagged_id("a", id)
}

/// Format a conversation id, e.g. `c-81d0a4b`.
pub fn conv_id(id: &str) -> String {
    tagged_id("c", id)
}

/// Format an ephemeral content or post id, e.g. `e-0b77aa2`.
pub fn content_id(id: &str) -> String {
    tagged_id("e", id)
}

/// Format the current wall-clock time as `YYYYMMDDTHH:MM:SS.mmm` (UTC).
pub fn format_timestamp() -> String {
    let duration = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    let time_secs = secs % 86400;
    let hours = time_secs / 3600;
    let minutes = (time_secs % 3600) / 60;
    let seconds = time_secs % 60;

    // Civil date from days since epoch (Howard Hinnant's algorithm).
    let days = (secs / 86400) as i64;
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };

    format!(
        "{:04}{:02}{:02}T{:02}:{:02}:{:02}.{:03}",
        y, m, d, hours, minutes, seconds, millis
    )
}

/// Write one log line. Called by [`hlog!`]; not intended for direct use.
pub fn emit(file: &str, line: u32, msg: &str) {
    let ts = format_timestamp();
    let formatted = if colour_enabled() {
        format!("{DIM}{ts}{RESET} {DIM}{file}:{line}{RESET} {msg}")
    } else {
        format!("{ts} - {file}:{line} - {msg}")
    };
    if let Ok(mut writer) = LOG_WRITER.lock() {
        let _ = writeln!(*writer, "{formatted}");
    }
}

/// Emit a log line with timestamp and source location.
///
/// ```ignore
/// hlog!("send: {} -> {}", logging::actor_id(&sender), logging::conv_id(&conv));
/// ```
#[macro_export]
macro_rules! hlog {
    ($($arg:tt)*) => {{
        $crate::logging::emit(file!(), line!(), &format!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_truncated_and_tagged() {
        assert_eq!(actor_id("3f9c2e1d-aaaa-bbbb"), "a-3f9c2e1");
        assert_eq!(conv_id("abc"), "c-abc");
        assert_eq!(content_id("0123456789"), "e-0123456");
    }

    #[test]
    fn timestamp_shape() {
        let ts = format_timestamp();
        assert_eq!(ts.len(), "20261019T09:14:03.512".len());
        assert_eq!(&ts[8..9], "T");
    }
}
