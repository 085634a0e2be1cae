//! Log output for both subcommands.
//!
//! Events go to stderr through `tracing-subscriber`. When the controller is
//! drawing a spinner, each line is written with the spinner suspended so the
//! two never interleave.

use std::io::{self, Write};

use indicatif::MultiProgress;
use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

/// INFO by default, one step chattier per `-v`.
pub fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Installs the global subscriber. Later calls are ignored.
pub fn init(verbosity: u8, progress: Option<MultiProgress>) {
    let writer = match progress {
        Some(progress) => BoxMakeWriter::new(ProgressWriter { progress }),
        None => BoxMakeWriter::new(io::stderr),
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(level_for(verbosity))
        .with_target(false)
        .with_writer(writer)
        .try_init();
}

/// Writes to stderr while the progress bars are hidden.
#[derive(Clone)]
pub struct ProgressWriter {
    progress: MultiProgress,
}

impl ProgressWriter {
    pub fn new(progress: MultiProgress) -> Self {
        Self { progress }
    }
}

impl Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.progress.suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for ProgressWriter {
    type Writer = ProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indicatif::ProgressDrawTarget;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_for(0), Level::INFO);
        assert_eq!(level_for(1), Level::DEBUG);
        assert_eq!(level_for(2), Level::TRACE);
        assert_eq!(level_for(9), Level::TRACE);
    }

    #[test]
    fn progress_writer_passes_bytes_through() {
        let progress = MultiProgress::with_draw_target(ProgressDrawTarget::hidden());
        let mut writer = ProgressWriter::new(progress).make_writer();

        assert_eq!(writer.write(b"hello\n").unwrap(), 6);
        writer.flush().unwrap();
    }
}
