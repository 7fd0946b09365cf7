use anyhow::Context;
use log::{LevelFilter, Log, Metadata, Record};
use std::net::UdpSocket;

/// Installs the process-wide logger. Every line also goes to `udp_sink`
/// (`host:port`) when one is configured.
pub fn init(max_level: LevelFilter, udp_sink: Option<&str>) -> anyhow::Result<()> {
    let udp = udp_sink.map(UdpSink::connect).transpose()?;
    let logger = Logger { max_level, udp };
    log::set_boxed_logger(Box::new(logger)).context("a logger was already installed")?;
    log::set_max_level(max_level);
    Ok(())
}

/// The level used when no verbosity flags are given: `Debug` in debug builds,
/// `Info` otherwise. Each `-v` raises it by one step; `-q` drops to warnings.
pub fn level_filter(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Warn;
    }

    #[cfg(debug_assertions)]
    let base = 4usize;
    #[cfg(not(debug_assertions))]
    let base = 3usize;

    match base + usize::from(verbose) {
        0..=3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

#[derive(Debug)]
struct Logger {
    max_level: LevelFilter,
    udp: Option<UdpSink>,
}

#[derive(Debug)]
struct UdpSink {
    socket: UdpSocket,
}

fn format_line(record: &Record<'_>) -> String {
    static LEVEL_STRS: [&str; 5] = ["[x]", "[!]", "[i]", "[?]", "[.]"];
    let level = LEVEL_STRS[record.level() as usize - 1];
    format!("{level} {}: {}", record.target(), record.args())
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format_line(record);
        println!("{line}");
        if let Some(ref udp) = self.udp {
            udp.send(&line);
        }
    }

    fn flush(&self) {}
}

// === impl UdpSink ===

impl UdpSink {
    fn connect(addr: &str) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind UDP log socket")?;
        socket
            .connect(addr)
            .with_context(|| format!("failed to resolve UDP log sink {addr}"))?;
        Ok(Self { socket })
    }

    fn send(&self, line: &str) {
        // logging must never fail the caller, and there is nowhere left to
        // report the error
        let _ = self.socket.send(line.as_bytes());
    }
}
