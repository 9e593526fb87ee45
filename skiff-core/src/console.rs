use std::env;
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

/// Optional session log, enabled once via `init_logging`. Lines carry the
/// seconds elapsed since the sink was opened.
struct LogSink {
    file: Mutex<File>,
    started: Instant,
}

static LOG: OnceLock<LogSink> = OnceLock::new();

#[derive(Clone, Copy)]
enum Tone {
    Muted,
    Accent,
    Good,
    Caution,
    Bad,
}

impl Tone {
    fn code(self) -> &'static str {
        match self {
            Tone::Muted => "2",
            Tone::Accent => "36",
            Tone::Good => "32",
            Tone::Caution => "33",
            Tone::Bad => "31",
        }
    }
}

fn colors_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| env::var_os("NO_COLOR").is_none() && io::stderr().is_terminal())
}

fn tint(tone: Tone, text: &str) -> String {
    if colors_enabled() {
        format!("\u{1b}[{}m{}\u{1b}[0m", tone.code(), text)
    } else {
        text.to_string()
    }
}

pub fn stdout_is_tty() -> bool {
    io::stdout().is_terminal()
}

pub fn init_logging(path: &Path) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    let sink = LogSink {
        file: Mutex::new(file),
        started: Instant::now(),
    };

    if LOG.set(sink).is_ok() {
        log("INFO", "--- session start ---");
    }

    Ok(())
}

pub fn is_logging_enabled() -> bool {
    LOG.get().is_some()
}

fn log(level: &str, message: &str) {
    let Some(sink) = LOG.get() else {
        return;
    };

    let elapsed = sink.started.elapsed().as_secs_f64();

    if let Ok(mut file) = sink.file.lock() {
        let _ = writeln!(file, "{elapsed:9.3}s {level:<5} {message}");
    }
}

/// Diagnostic detail; only ever lands in the session log.
pub fn verbose(message: &str) {
    log("DEBUG", message);
}

pub fn heading(command: &str, version: &str) {
    let line = format!("skiff {command} v{version}");
    eprintln!("{}", tint(Tone::Muted, &line));
    log("INFO", &line);
}

/// One numbered pipeline step: `[2/4] Fetching packages...`.
pub fn step(current: usize, total: usize, message: &str) {
    eprintln!("{} {message}", tint(Tone::Muted, &format!("[{current}/{total}]")));
    log("STEP", &format!("[{current}/{total}] {message}"));
}

/// Transient in-place counter; only drawn on a terminal.
pub fn progress(message: &str, current: usize, total: usize) {
    if !io::stderr().is_terminal() {
        return;
    }

    eprint!(
        "\r\u{1b}[K{} {}",
        tint(Tone::Muted, message),
        tint(Tone::Accent, &format!("{current}/{total}"))
    );
    let _ = io::stderr().flush();
}

pub fn clear_line() {
    if io::stderr().is_terminal() {
        eprint!("\r\u{1b}[K");
        let _ = io::stderr().flush();
    }
}

pub fn success(message: &str) {
    eprintln!("{} {message}", tint(Tone::Good, "done"));
    log("INFO", message);
}

pub fn warn(message: &str) {
    eprintln!("{} {message}", tint(Tone::Caution, "warning"));
    log("WARN", message);
}

pub fn error(message: &str) {
    eprintln!("{} {message}", tint(Tone::Bad, "error"));
    log("ERROR", message);
}

pub fn info(message: &str) {
    println!("{message}");
    log("INFO", message);
}

/// A shell command the user may want to run next.
pub fn command(text: &str) {
    println!("{}", tint(Tone::Accent, &format!("  $ {text}")));
    log("INFO", &format!("suggested: {text}"));
}

pub fn added(name: &str, version: &str, dev: bool) {
    let suffix = if dev {
        tint(Tone::Muted, " (dev)")
    } else {
        String::new()
    };

    println!(
        "{} {name}{}{suffix}",
        tint(Tone::Good, "+"),
        tint(Tone::Muted, &format!("@{version}"))
    );
    log(
        "INFO",
        &format!("saved {name}@{version}{}", if dev { " (dev)" } else { "" }),
    );
}

pub fn summary(count: usize, seconds: f32) {
    let noun = if count == 1 { "package" } else { "packages" };
    let took = if seconds < 1.0 {
        format!("{:.0}ms", seconds * 1000.0)
    } else {
        format!("{seconds:.2}s")
    };

    println!();
    println!(
        "{} {noun} installed in {took}",
        tint(Tone::Accent, &count.to_string())
    );
    log("INFO", &format!("installed {count} {noun} in {took}"));
}
