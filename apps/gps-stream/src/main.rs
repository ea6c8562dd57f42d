//! Command line front-end of the real-time GPS signal simulator.
//!
//! Maps the command line onto the generator builder, wires the
//! generator thread to the selected SDR sink through the sample buffer
//! pool and supervises the run: wait for the generator to come up,
//! start streaming only once it is, stream until the scenario ends or
//! an interrupt arrives, then drain and shut down.

use std::{
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, atomic::Ordering, mpsc},
    time::Duration,
};

use clap::Parser;
use sdr::{SdrSink, SinkConfig};
use tracing_subscriber::{EnvFilter, prelude::*};

/// Real-time GPS L1 C/A signal simulator.
///
/// Generates a baseband I/Q sample stream for the satellites visible
/// from a chosen position at a chosen time and feeds it to an SDR
/// sink. A receiver in the radiated field obtains a position solution
/// matching the simulated scenario.
#[derive(Debug, Parser)]
#[command(version, about, long_about)]
struct Args {
    /// RINEX navigation file with broadcast ephemerides (v2 or v3,
    /// plain or gzipped)
    #[arg(short = 'e', long = "nav-file")]
    nav_file: Option<PathBuf>,

    /// Fetch the current broadcast ephemerides from a remote archive
    /// instead of reading a local file
    #[arg(short = 'f', long)]
    fetch: bool,

    /// Use RINEX v3 data when fetching from a remote archive
    #[arg(short = '3', long)]
    rinex3: bool,

    /// Monitoring station providing the remote navigation data
    #[arg(long)]
    station: Option<String>,

    /// Static location as lat,lon,height (degrees and meters)
    #[arg(short = 'l', long, value_delimiter = ',')]
    location: Option<Vec<f64>>,

    /// Static location as ECEF x,y,z meters
    #[arg(short = 'c', long, value_delimiter = ',')]
    location_ecef: Option<Vec<f64>>,

    /// Scenario start as Y/M/D,h:m:s or "now"
    #[arg(short = 's', long)]
    start: Option<String>,

    /// Shift the ephemeris timestamps onto the scenario start
    #[arg(short = 'T', long)]
    time_override: bool,

    /// Scenario duration in seconds
    #[arg(short = 'd', long)]
    duration: Option<f64>,

    /// User motion file of t,x,y,z ECEF rows at 10 Hz
    #[arg(short = 'm', long = "motion-file")]
    motion_file: Option<PathBuf>,

    /// User motion file of t,lat,lon,height rows at 10 Hz
    #[arg(long)]
    motion_llh: Option<PathBuf>,

    /// NMEA GGA sentence stream as motion input
    #[arg(long)]
    nmea_gga: Option<PathBuf>,

    /// Steer the receiver interactively from the initial position
    #[arg(short = 'i', long)]
    interactive: bool,

    /// Initial target offset as distance,bearing-millideg,height
    #[arg(short = 't', long, value_delimiter = ',')]
    target: Option<Vec<f64>>,

    /// Disable ionospheric delay modeling
    #[arg(short = 'I', long = "disable-iono")]
    disable_iono: bool,

    /// SEM almanac file filling the subframe 4/5 almanac pages
    #[arg(long)]
    almanac: Option<PathBuf>,

    /// Leave the almanac pages empty
    #[arg(long)]
    disable_almanac: bool,

    /// Base week added to the almanac's 8-bit week number
    #[arg(long, default_value_t = 2048)]
    week_rollover: i32,

    /// Scheduled leap second event as wnlsf,dn,dtlsf
    #[arg(short = 'L', long, value_delimiter = ',')]
    leap: Option<Vec<i32>>,

    /// Sampling frequency in Hz
    #[arg(long, default_value_t = 2_600_000)]
    sample_freq: usize,

    /// Emit 16-bit instead of 8-bit I/Q samples
    #[arg(long)]
    iq16: bool,

    /// Hold every channel at a fixed level instead of modeling path
    /// loss (units of 1/128 full scale)
    #[arg(long)]
    fixed_gain: Option<i32>,

    /// SDR back-end consuming the stream
    #[arg(short = 'r', long = "radio", default_value = "iqfile")]
    radio: String,

    /// Output file for the iqfile sink
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// TX gain in dB for hardware back-ends
    #[arg(short = 'g', long, default_value_t = 0)]
    tx_gain: i32,

    /// Enable the TX amplifier of hardware back-ends
    #[arg(short = 'a', long)]
    tx_amp: bool,

    /// Oscillator offset in parts per billion
    #[arg(short = 'p', long, default_value_t = 0)]
    ppb: i32,

    /// Device URI for network-attached front-ends
    #[arg(short = 'U', long)]
    uri: Option<String>,

    /// Device hostname for network-attached front-ends
    #[arg(short = 'N', long)]
    hostname: Option<String>,

    /// Append the log to this file in addition to stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Verbose output with per-channel status
    #[arg(short = 'v', long)]
    verbose: bool,
}

/// Installs the stderr logger and the optional file layer. The guard
/// must stay alive for the whole run.
fn init_logging(
    args: &Args,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if args.verbose { "debug" } else { "info" })
    });

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    if let Some(path) = &args.log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let name = path.file_name().map_or_else(
            || std::ffi::OsString::from("gps-stream.log"),
            std::ffi::OsStr::to_os_string,
        );
        let appender = tracing_appender::rolling::never(dir, name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false);
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        None
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.fetch {
        // Remote retrieval is a collaborator concern; the station and
        // format options only shape its request.
        tracing::info!(
            station = args.station.as_deref().unwrap_or("random"),
            rinex3 = args.rinex3,
            "remote navigation data requested"
        );
        return Err(Box::new(gps::Error::RemoteFetchUnavailable));
    }
    if args.nav_file.is_none() {
        return Err(Box::new(gps::Error::NavigationNotSet));
    }

    let mut sink = sdr::create_sink(&args.radio)?;
    if args.tx_amp {
        tracing::info!("TX amplifier request is handled by hardware sinks");
    }

    // "Y/M/D,h:m:s" to the builder's timestamp form; "now" passes
    // through.
    let start = args.start.map(|s| {
        if s.eq_ignore_ascii_case("now") {
            s
        } else {
            s.replace('/', "-").replace(',', " ") + "-00"
        }
    });

    let iq_bits = if args.iq16 { 16 } else { 8 };
    let mut generator = gps::SignalGeneratorBuilder::default()
        .navigation_file(args.nav_file)?
        .almanac_file(args.almanac)
        .almanac_disable(Some(args.disable_almanac))
        .week_rollover(Some(args.week_rollover))
        .location(args.location)?
        .location_ecef(args.location_ecef)?
        .user_motion_file(args.motion_file)?
        .user_motion_llh_file(args.motion_llh)?
        .user_motion_nmea_gga_file(args.nmea_gga)?
        .interactive(Some(args.interactive))
        .target(args.target)
        .time(start)?
        .time_override(Some(args.time_override))
        .duration(args.duration)
        .frequency(Some(args.sample_freq))?
        .data_format(Some(iq_bits))?
        .ionospheric_disable(Some(args.disable_iono))
        .leap(args.leap)
        .path_loss(args.fixed_gain)
        .gain_headroom(Some(sink.gain_headroom()))
        .output_file(args.output)
        .verbose(Some(args.verbose))
        .build()?;

    generator.initialize()?;

    let config = SinkConfig {
        output_file: generator.output_file.clone(),
        sample_kind: generator.data_format.sample_kind(),
        buffer_count: 8,
        buffer_len: generator.samples_per_epoch() * 2,
        tx_gain: args.tx_gain,
        ppb: args.ppb,
        uri: args.uri,
        hostname: args.hostname,
    };
    let fifo = sink.init(&config)?;
    sink.set_gain(args.tx_gain)?;

    let transfer_len = sink.transfer_len();
    let exit_flag = generator.exit_flag();
    let (init_tx, init_rx) = mpsc::sync_channel(1);
    let producer_fifo = Arc::clone(&fifo);
    let generator_thread = std::thread::Builder::new()
        .name("gps-gen".into())
        .spawn(move || {
            let result =
                generator.run_streaming(&producer_fifo, transfer_len, Some(init_tx));
            if result.is_err() {
                // Unblock the consumer on a producer failure.
                producer_fifo.halt();
            }
            result
        })?;

    // An interrupt requests a cooperative exit and wakes every pool
    // waiter, so both threads unwind and the sink is closed instead of
    // being abandoned mid-transmission.
    {
        let exit_flag = Arc::clone(&exit_flag);
        let halt_fifo = Arc::clone(&fifo);
        ctrlc::set_handler(move || {
            tracing::info!("caught termination signal, shutting down");
            exit_flag.store(true, Ordering::Relaxed);
            halt_fifo.halt();
        })?;
    }

    // Wait for the generator to signal that sample production is up
    // before streaming starts.
    if init_rx.recv_timeout(Duration::from_secs(30)).is_err() {
        tracing::warn!("time out waiting for GPS thread, running?");
    }

    // The generator may already be gone (failed, or a scenario shorter
    // than the start-up wait); don't begin streaming for it.
    if generator_thread.is_finished() {
        let producer_result = generator_thread
            .join()
            .unwrap_or_else(|_| Err(gps::Error::msg("generator thread panicked")));
        fifo.halt();
        sink.close();
        producer_result?;
        tracing::warn!("generator finished before streaming started");
        return Ok(());
    }

    if let Err(e) = sink.run() {
        tracing::error!("starting SDR streaming failed: {e}");
        exit_flag.store(true, Ordering::Relaxed);
        fifo.halt();
        let _ = generator_thread.join();
        return Err(Box::new(e));
    }

    let producer_result = generator_thread
        .join()
        .unwrap_or_else(|_| Err(gps::Error::msg("generator thread panicked")));

    // Let the sink drain what was produced, then shut down.
    fifo.wait_empty();
    sink.close();

    producer_result?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _log_guard = init_logging(&args);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
