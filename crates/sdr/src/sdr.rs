//! SDR sink adapter.
//!
//! Every back-end offers the same narrow contract to the generator:
//! initialize against a configuration (creating the sample buffer pool
//! sized for the device), start streaming, adjust TX gain and close.
//! Back-ends differ in sample width, preferred transfer size and
//! amplitude headroom; those properties are advertised through the
//! trait so neither the generator nor the pool needs to know the
//! device.
//!
//! The file sink is the reference consumer: it drains the pool from its
//! own writer thread and appends the raw interleaved I/Q samples to
//! disk. Hardware back-ends are external collaborators implementing the
//! same trait.

use std::{
    io::Write,
    path::PathBuf,
    sync::Arc,
    thread::JoinHandle,
};

use fifo::{Fifo, SampleKind, Samples};

/// Errors raised by sink back-ends.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested sink name is not registered.
    #[error("SDR type '{0}' not recognized; supported SDR types are: {1}")]
    UnknownSink(String, &'static str),
    /// An operation was attempted before `init`.
    #[error("sink is not initialized")]
    NotInitialized,
    /// The sample buffer pool could not be created.
    #[error("sink buffer pool: {0}")]
    BufferPool(#[from] fifo::CreateError),
    /// The sink could not open or write its output.
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration handed to a sink's `init`.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Output path for file-backed sinks.
    pub output_file: Option<PathBuf>,
    /// Sample width of the stream.
    pub sample_kind: SampleKind,
    /// Number of pool buffers to preallocate.
    pub buffer_count: usize,
    /// Interleaved I/Q values per pool buffer.
    pub buffer_len: usize,
    /// Initial TX gain in dB, meaningful to hardware back-ends.
    pub tx_gain: i32,
    /// Oscillator offset in parts per billion, meaningful to hardware
    /// back-ends.
    pub ppb: i32,
    /// Device URI for network-attached front-ends.
    pub uri: Option<String>,
    /// Device hostname for network-attached front-ends.
    pub hostname: Option<String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            output_file: None,
            sample_kind: SampleKind::I8,
            buffer_count: 8,
            buffer_len: 0,
            tx_gain: 0,
            ppb: 0,
            uri: None,
            hostname: None,
        }
    }
}

/// The contract every SDR back-end offers the core.
pub trait SdrSink: std::fmt::Debug {
    /// Prepares the sink and creates the sample pool it will consume
    /// from.
    fn init(&mut self, config: &SinkConfig) -> Result<Arc<Fifo>, Error>;

    /// Begins streaming. May return immediately; consumption happens on
    /// the sink's own thread.
    fn run(&mut self) -> Result<(), Error>;

    /// Adjusts the TX gain, returning the gain actually applied.
    fn set_gain(&mut self, gain_db: i32) -> Result<i32, Error>;

    /// Stops streaming and releases the device. Halts the pool so both
    /// sides unblock.
    fn close(&mut self);

    /// Sample width this sink consumes.
    fn sample_kind(&self) -> SampleKind;

    /// Preferred number of filled interleaved values per enqueued
    /// buffer; `None` means one buffer per generator epoch.
    fn transfer_len(&self) -> Option<usize> {
        None
    }

    /// Amplitude multiplier the generator should apply for this sink's
    /// dynamic range.
    fn gain_headroom(&self) -> f64 {
        1.0
    }
}

/// Names accepted by [`create_sink`].
const SUPPORTED: &str = "iqfile";

/// Builds the sink registered under `name`.
///
/// Hardware back-ends (HackRF, ADALM-Pluto) are external collaborators;
/// only the file sink ships here.
pub fn create_sink(name: &str) -> Result<Box<dyn SdrSink>, Error> {
    match name.to_ascii_lowercase().as_str() {
        "iqfile" => Ok(Box::new(IqFileSink::new())),
        other => Err(Error::UnknownSink(other.to_string(), SUPPORTED)),
    }
}

/// File sink: writes every dequeued buffer to disk from its own
/// thread.
#[derive(Debug)]
pub struct IqFileSink {
    fifo: Option<Arc<Fifo>>,
    output_file: PathBuf,
    sample_kind: SampleKind,
    writer: Option<JoinHandle<()>>,
}

impl Default for IqFileSink {
    fn default() -> Self {
        Self::new()
    }
}

impl IqFileSink {
    pub fn new() -> Self {
        Self {
            fifo: None,
            output_file: PathBuf::from("iqdata.bin"),
            sample_kind: SampleKind::I8,
            writer: None,
        }
    }

    /// Drains the pool into the file until the pool is halted.
    fn writer_loop(fifo: &Fifo, mut file: std::io::BufWriter<std::fs::File>) {
        while let Some(buf) = fifo.dequeue() {
            let result = match &buf.samples {
                Samples::I8(data) => {
                    let bytes: Vec<u8> =
                        data[..buf.valid].iter().map(|&v| v as u8).collect();
                    file.write_all(&bytes)
                }
                Samples::I16(data) => {
                    let mut bytes = Vec::with_capacity(buf.valid * 2);
                    for v in &data[..buf.valid] {
                        bytes.extend_from_slice(&v.to_le_bytes());
                    }
                    file.write_all(&bytes)
                }
            };
            fifo.release(buf);

            if let Err(e) = result {
                tracing::error!("error writing IQ data file: {e}");
                fifo.halt();
                return;
            }
        }
        if let Err(e) = file.flush() {
            tracing::error!("error flushing IQ data file: {e}");
        }
    }
}

impl SdrSink for IqFileSink {
    fn init(&mut self, config: &SinkConfig) -> Result<Arc<Fifo>, Error> {
        if let Some(path) = &config.output_file {
            self.output_file = path.clone();
        }
        self.sample_kind = config.sample_kind;
        let fifo = Arc::new(Fifo::create(
            config.buffer_count,
            config.buffer_len,
            config.sample_kind,
        )?);
        self.fifo = Some(Arc::clone(&fifo));
        Ok(fifo)
    }

    fn run(&mut self) -> Result<(), Error> {
        let fifo = self.fifo.as_ref().ok_or(Error::NotInitialized)?;
        let file = std::fs::File::create(&self.output_file)?;
        let writer = std::io::BufWriter::new(file);

        let fifo = Arc::clone(fifo);
        self.writer = Some(
            std::thread::Builder::new()
                .name("iqfile-writer".into())
                .spawn(move || Self::writer_loop(&fifo, writer))?,
        );
        Ok(())
    }

    fn set_gain(&mut self, gain_db: i32) -> Result<i32, Error> {
        // A file has no TX chain; accept and report the value.
        Ok(gain_db)
    }

    fn close(&mut self) {
        if let Some(fifo) = &self.fifo {
            fifo.halt();
        }
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
        self.fifo = None;
    }

    fn sample_kind(&self) -> SampleKind {
        self.sample_kind
    }
}
