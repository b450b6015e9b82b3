use log::{self, Level, LevelFilter, Log, Metadata, Record};

#[derive(Debug, Clone, Copy)]
enum LogColor {
    Red = 31,
    Yellow = 33,
    Green = 32,
    Blue = 34,
    White = 37,
}

impl LogColor {
    fn val(&self) -> u8 {
        *self as u8
    }

    fn from_level(level: Level) -> Self {
        match level {
            Level::Error => LogColor::Red,
            Level::Warn => LogColor::Yellow,
            Level::Info => LogColor::Green,
            Level::Debug => LogColor::Blue,
            Level::Trace => LogColor::White,
        }
    }
}

struct Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = LogColor::from_level(record.level());
        eprintln!(
            "\x1b[{}m{:<5}\x1b[0m [{}] {}",
            color.val(),
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: Logger = Logger;

fn parse_level(level: &str) -> Option<LevelFilter> {
    match level {
        "off" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warn" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}

/// `level` wins over the `LOG` environment variable; default is warn
pub fn init(level: Option<&str>) {
    let filter = level
        .map(str::to_owned)
        .or_else(|| std::env::var("LOG").ok())
        .and_then(|l| parse_level(&l.to_ascii_lowercase()))
        .unwrap_or(LevelFilter::Warn);
    // a logger may already be installed when embedded in tests
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(filter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names() {
        assert_eq!(parse_level("debug"), Some(LevelFilter::Debug));
        assert_eq!(parse_level("off"), Some(LevelFilter::Off));
        assert_eq!(parse_level("loud"), None);
    }
}
