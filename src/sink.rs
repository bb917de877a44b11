//! Destinations for values emitted by `PRINT`.

use std::io::{self, Write};

/// Receives every value the machine prints.
pub trait Sink {
    fn emit(&mut self, value: i64) -> io::Result<()>;
}

/// Captures values in memory.
impl Sink for Vec<i64> {
    fn emit(&mut self, value: i64) -> io::Result<()> {
        self.push(value);
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn emit(&mut self, value: i64) -> io::Result<()> {
        (**self).emit(value)
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn emit(&mut self, value: i64) -> io::Result<()> {
        (**self).emit(value)
    }
}

/// Writes one value per line to any writer.
#[derive(Debug, Default)]
pub struct WriterSink<W> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        WriterSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Sink for WriterSink<W> {
    fn emit(&mut self, value: i64) -> io::Result<()> {
        writeln!(self.writer, "{}", value)
    }
}

/// The default sink: standard output.
pub type StdoutSink = WriterSink<io::Stdout>;

impl StdoutSink {
    pub fn stdout() -> Self {
        WriterSink::new(io::stdout())
    }
}
