//! Logger setup: `env_logger` writing every record to stderr and to the log file.

use std::fmt::Display;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use env_logger::{Builder, Env, Target};

/// Writes to `primary`, then best-effort to `secondary`
pub struct Tee<A, B> {
    primary: A,
    secondary: B,
}

impl<A: Write, B: Write> Tee<A, B> {
    pub fn new(primary: A, secondary: B) -> Self {
        Self { primary, secondary }
    }
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.primary.write_all(buf)?;
        // A full disk must not take the console log down with it
        let _ = self.secondary.write_all(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.secondary.flush();
        self.primary.flush()
    }
}

/// Install the global logger. Default filter is `info`, `RUST_LOG` overrides it.
/// Without a log path (or if it can't be opened) records only go to stderr.
pub fn init(log_path: Option<&Path>) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        let timestamp = buf.timestamp_seconds();
        format_record(buf, timestamp, record)
    });

    let mut file_error = None;
    if let Some(path) = log_path {
        match open_log_file(path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(Tee::new(io::stderr(), file))));
            }
            Err(e) => file_error = Some(e),
        }
    }

    if let Err(e) = builder.try_init() {
        eprintln!("Logger already initialized: {}", e);
        return;
    }

    match (log_path, file_error) {
        (Some(path), Some(e)) => log::warn!("Cannot open log file {}: {}", path.display(), e),
        (Some(path), None) => log::debug!("Logging to {}", path.display()),
        _ => {}
    }
}

/// `timestamp [LEVEL] target: message`, identical on stderr and in the file
fn format_record(out: &mut impl Write, timestamp: impl Display, record: &log::Record) -> io::Result<()> {
    writeln!(
        out,
        "{} [{}] {}: {}",
        timestamp,
        record.level(),
        record.target(),
        record.args()
    )
}

fn open_log_file(path: &Path) -> io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }
    }

    #[test]
    fn test_tee_writes_both() {
        let mut tee = Tee::new(Vec::new(), Vec::new());
        write!(tee, "sync done").unwrap();
        assert_eq!(tee.primary, b"sync done");
        assert_eq!(tee.secondary, b"sync done");
    }

    #[test]
    fn test_tee_ignores_secondary_failure() {
        let mut tee = Tee::new(Vec::new(), Broken);
        tee.write_all(b"line\n").unwrap();
        tee.flush().unwrap();
        assert_eq!(tee.primary, b"line\n");
    }

    #[test]
    fn test_record_layout() {
        let mut out = Vec::new();
        format_record(
            &mut out,
            "2026-10-18T09:30:00Z",
            &log::Record::builder()
                .level(log::Level::Warn)
                .target("scribe_sync_lib::sync::manager")
                .args(format_args!("Sync: pass failed"))
                .build(),
        )
        .unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "2026-10-18T09:30:00Z [WARN] scribe_sync_lib::sync::manager: Sync: pass failed\n"
        );
    }

    #[test]
    fn test_open_log_file_appends() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logs").join("scribe-sync.log");

        open_log_file(&path).unwrap().write_all(b"one\n").unwrap();
        open_log_file(&path).unwrap().write_all(b"two\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }
}
