use std::fs::File;
use std::io::{self, LineWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tracing_subscriber::fmt::writer::MakeWriter;

/// Copies every formatted event to stdout and, when a log path was given, to a line-buffered file.
///
/// A failing seed can then be replayed and diffed against the saved log.
#[derive(Clone, Default)]
pub(crate) struct TeeWriter {
    file: Option<Arc<Mutex<LineWriter<File>>>>,
}

impl TeeWriter {
    pub(crate) fn open(path: Option<&Path>) -> io::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let file = LineWriter::new(File::create(path)?);
        Ok(Self {
            file: Some(Arc::new(Mutex::new(file))),
        })
    }

    fn with_file(&self, f: impl FnOnce(&mut LineWriter<File>) -> io::Result<()>) -> io::Result<()> {
        match &self.file {
            Some(file) => f(&mut file.lock().unwrap_or_else(PoisonError::into_inner)),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for TeeWriter {
    type Writer = TeeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().lock().write_all(buf)?;
        self.with_file(|file| file.write_all(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        self.with_file(Write::flush)
    }
}
