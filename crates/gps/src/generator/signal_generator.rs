//! Scheduler and real-time sample producer.
//!
//! The generator advances simulated time in 100 ms epochs. Each epoch
//! refreshes every active channel's range, NCO rates and gain, then
//! runs the per-sample inner loop that mixes all channels into
//! interleaved I/Q accumulators and pushes them into buffers acquired
//! from the shared pool. Every 30 seconds the navigation message is
//! regenerated, the ephemeris set may advance and channel allocation is
//! re-run against the current visibility.

use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
        mpsc::SyncSender,
    },
};

use constants::{
    ANT_PAT_DB, EPHEM_ARRAY_SIZE, LAMBDA_L1, MAX_CHAN, MAX_SAT, R2D,
    SECONDS_IN_HOUR,
};
use fifo::{Fifo, IqBuf};
use geometry::{Azel, Ecef, LocalTangent, Location, Neu};

use crate::{
    Error,
    almanac::Almanac,
    channel::Channel,
    code::generate_ca_code,
    datetime::GpsTime,
    ephemeris::Ephemeris,
    generator::utils::MotionMode,
    io::DataFormat,
    ionoutc::IonoUtc,
    range::{check_sat_visibility, compute_range},
    subframe::eph_to_subframes,
};

/// Steerable receiver state for interactive scenarios. A UI
/// collaborator may update it while the generator runs; the scheduler
/// integrates it once per epoch.
#[derive(Debug, Default, Clone)]
pub struct Target {
    /// Heading in millidegrees, clockwise from North.
    pub bearing: f64,
    /// Initial offset distance from the reference location, meters.
    pub distance: f64,
    /// Current geodetic position, degrees and meters.
    pub lat: f64,
    pub lon: f64,
    /// Initial offset height / current height, meters.
    pub height: f64,
    /// Ground speed, m/s.
    pub velocity: f64,
    /// Vertical speed, m/s.
    pub vertical_speed: f64,
    /// An initial offset was configured.
    pub valid: bool,
}

/// The signal generator: ephemeris and almanac stores, channel array,
/// allocation map and the streaming scheduler.
pub struct SignalGenerator {
    /// Ephemeris sets indexed by time set and satellite.
    pub ephemerides: Box<[[Ephemeris; MAX_SAT]; EPHEM_ARRAY_SIZE]>,
    /// Number of valid sets in the store.
    pub ephemerides_count: usize,
    /// Index of the set bracketing the current simulated time.
    pub valid_ephemerides_index: usize,
    /// Ionosphere and UTC parameters.
    pub ionoutc: IonoUtc,
    /// Almanac filling subframe 4/5 pages.
    pub almanac: Almanac,
    /// Receiver positions: one for static, per-epoch for dynamic.
    pub positions: Vec<Ecef>,
    /// Number of 100 ms epochs to generate.
    pub simulation_step_count: usize,
    /// GPS time at which the simulation starts.
    pub receiver_gps_time: GpsTime,
    /// Receiver antenna gain per 5 degree boresight step.
    pub antenna_pattern: [f64; 37],
    /// Receiver motion mode.
    pub mode: MotionMode,
    /// Elevation mask in degrees for channel allocation.
    pub elevation_mask: f64,
    /// Sampling frequency, Hz.
    pub sample_frequency: f64,
    /// Epoch step, seconds.
    pub sample_rate: f64,
    /// I/Q sample width.
    pub data_format: DataFormat,
    /// Fixed gain overriding path loss, 1/128 full scale.
    pub fixed_gain: Option<i32>,
    /// Amplitude multiplier for sinks with extra headroom.
    pub gain_headroom: f64,
    /// Path the file sink should write to.
    pub output_file: Option<PathBuf>,
    /// Emit per-channel status while running.
    pub verbose: bool,
    /// Shared steerable state for interactive scenarios.
    pub(crate) target: Arc<Mutex<Target>>,
    /// Cooperative exit flag checked at epoch boundaries.
    pub(crate) exit: Arc<AtomicBool>,
    /// One channel slot per simulated satellite.
    pub(crate) channels: Box<[Channel; MAX_CHAN]>,
    /// Satellite to channel slot assignment.
    pub(crate) allocated_sat: [Option<usize>; MAX_SAT],
    /// Local tangent frame at the initial position, for interactive
    /// integration.
    pub(crate) tmat: Option<LocalTangent>,
    /// Channels were allocated and the generator is ready to stream.
    pub(crate) initialized: bool,
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self {
            ephemerides: Box::new(std::array::from_fn(|_| {
                std::array::from_fn(|_| Ephemeris::default())
            })),
            ephemerides_count: 0,
            valid_ephemerides_index: 0,
            ionoutc: IonoUtc::default(),
            almanac: Almanac::default(),
            positions: Vec::new(),
            simulation_step_count: 0,
            receiver_gps_time: GpsTime::default(),
            antenna_pattern: [0.0; 37],
            mode: MotionMode::Static,
            elevation_mask: 0.0,
            sample_frequency: 2_600_000.0,
            sample_rate: 0.1,
            data_format: DataFormat::Bits8,
            fixed_gain: None,
            gain_headroom: 1.0,
            output_file: None,
            verbose: false,
            target: Arc::new(Mutex::new(Target::default())),
            exit: Arc::new(AtomicBool::new(false)),
            channels: Box::new(std::array::from_fn(|_| Channel::default())),
            allocated_sat: [None; MAX_SAT],
            tmat: None,
            initialized: false,
        }
    }
}

impl SignalGenerator {
    /// Number of I/Q sample pairs produced per epoch.
    pub fn samples_per_epoch(&self) -> usize {
        (self.sample_frequency * self.sample_rate) as usize
    }

    /// Handle to the cooperative exit flag. Setting it makes the
    /// generator leave its epoch loop at the next boundary.
    pub fn exit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.exit)
    }

    /// Handle to the shared steerable target state.
    pub fn target_handle(&self) -> Arc<Mutex<Target>> {
        Arc::clone(&self.target)
    }

    /// Replaces the steerable target state.
    pub(crate) fn set_target(&mut self, target: Target) {
        self.target = Arc::new(Mutex::new(target));
    }

    /// Channels currently carrying a satellite, with PRN and direction.
    pub fn active_channels(&self) -> Vec<(usize, Azel)> {
        self.channels
            .iter()
            .filter(|c| c.is_active())
            .map(|c| (c.prn, c.azel))
            .collect()
    }

    /// Prepares the generator for streaming: verifies the almanac age,
    /// derives the antenna pattern and allocates channels for the
    /// satellites visible at the start time.
    ///
    /// # Errors
    /// * `Error::InvalidAlmanacTime` - the almanac reference time is
    ///   more than four weeks from the scenario start
    pub fn initialize(&mut self) -> Result<(), Error> {
        // An almanac that far off would describe a different
        // constellation; refuse before any buffer is produced.
        self.almanac.check_toa(&self.receiver_gps_time)?;

        // Receiver antenna gain pattern, dB to amplitude.
        for (gain, db) in self.antenna_pattern.iter_mut().zip(ANT_PAT_DB) {
            *gain = 10.0_f64.powf(-db / 20.0);
        }

        for chan in self.channels.iter_mut() {
            chan.clear();
        }
        self.allocated_sat = [None; MAX_SAT];

        let llh = Location::from(&self.positions[0]);
        self.tmat = Some(LocalTangent::new(&llh));

        let grx = self.receiver_gps_time.add_secs(0.0);
        let xyz = self.positions[0];
        self.allocate_channels(&grx, &xyz);

        let (lat, lon, hgt) = llh.to_degrees();
        tracing::info!(
            week = grx.week,
            sec = grx.sec,
            lat,
            lon,
            hgt,
            satellites = self.active_channels().len(),
            "scenario initialized"
        );
        self.log_channels();

        self.initialized = true;
        Ok(())
    }

    /// Emits the per-channel status table at debug level.
    fn log_channels(&self) {
        for chan in self.channels.iter().filter(|c| c.is_active()) {
            tracing::debug!(
                prn = chan.prn,
                az = chan.azel.az * R2D,
                el = chan.azel.el * R2D,
                distance = chan.rho0.d,
                iono = chan.rho0.iono_delay,
                "channel"
            );
        }
    }

    /// Sweeps all satellites once: visible unallocated satellites take
    /// the first free channel slot, allocated satellites that dropped
    /// below the mask release theirs. Returns the number of visible
    /// satellites.
    fn allocate_channels(&mut self, grx: &GpsTime, xyz: &Ecef) -> usize {
        let ieph = self.valid_ephemerides_index;
        let mut nsat = 0;

        let ref_xyz = Ecef::default();

        for sv in 0..MAX_SAT {
            let eph = &self.ephemerides[ieph][sv];
            match check_sat_visibility(eph, grx, xyz, self.elevation_mask) {
                Some(azel) => {
                    nsat += 1;

                    if self.allocated_sat[sv].is_none() {
                        // Visible but not allocated; take a free slot.
                        let Some(i) =
                            self.channels.iter().position(|c| !c.is_active())
                        else {
                            continue;
                        };
                        let chan = &mut self.channels[i];
                        chan.prn = sv + 1;
                        chan.azel = azel;

                        // C/A code generation
                        chan.ca = generate_ca_code(chan.prn);

                        // Generate subframes and the data bit stream
                        eph_to_subframes(
                            eph,
                            &self.ionoutc,
                            &self.almanac,
                            &mut chan.sbf,
                        );
                        chan.generate_nav_msg(grx, true);

                        // Initialize pseudorange
                        let rho =
                            compute_range(eph, &self.ionoutc, grx, xyz);
                        let r_xyz = rho.range;
                        chan.rho0 = rho;

                        // Initialize carrier phase relative to the ECEF
                        // origin so the phase difference between two
                        // simulated receivers stays geometrically
                        // consistent.
                        let r_ref =
                            compute_range(eph, &self.ionoutc, grx, &ref_xyz)
                                .range;
                        let phase_ini = (2.0 * r_ref - r_xyz) / LAMBDA_L1;
                        chan.carr_phase = phase_ini - phase_ini.floor();

                        self.allocated_sat[sv] = Some(i);
                    }
                }
                None => {
                    if let Some(i) = self.allocated_sat[sv].take() {
                        // Not visible anymore; release the slot.
                        self.channels[i].clear();
                    }
                }
            }
        }

        nsat
    }

    /// Integrates the interactive target state over one epoch and
    /// returns the new receiver position.
    fn integrate_target(&self, current: &Ecef) -> Ecef {
        let Some(tmat) = &self.tmat else {
            return *current;
        };
        let target = self
            .target
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let dir = (target.bearing / 1000.0) / R2D;
        let neu = Neu::new(
            target.velocity * dir.cos() * self.sample_rate,
            target.velocity * dir.sin() * self.sample_rate,
            target.vertical_speed * self.sample_rate,
        );
        *current + tmat.neu_to_ecef(&neu)
    }

    /// Runs the streaming scenario, producing interleaved I/Q buffers
    /// into the pool until the configured number of epochs has been
    /// generated, the exit flag is raised or the pool is halted.
    ///
    /// `transfer_len` bounds the filled sample count per enqueued
    /// buffer for sinks that consume fixed transfer blocks; `None`
    /// enqueues one buffer per epoch. `init_done` is signalled once the
    /// generator enters its epoch loop.
    ///
    /// # Errors
    /// * `Error::Msg` when called before [`SignalGenerator::initialize`]
    #[allow(clippy::too_many_lines)]
    pub fn run_streaming(
        &mut self,
        fifo: &Arc<Fifo>,
        transfer_len: Option<usize>,
        mut init_done: Option<SyncSender<()>>,
    ) -> Result<(), Error> {
        if !self.initialized {
            return Err(Error::msg("generator is not initialized"));
        }

        let delt = 1.0 / self.sample_frequency;
        let num_iq_samples = self.samples_per_epoch();
        let g0 = self.receiver_gps_time.clone();
        let mut grx = g0.add_secs(self.sample_rate);
        let mut gain = [0.0f64; MAX_CHAN];
        let mut current_pos = self.positions[0];

        // First block of the pool for the transfer buffer.
        let mut iq: Option<IqBuf> = fifo.acquire();
        if iq.is_none() {
            return Ok(()); // halted before the first epoch
        }

        // Signal that generation is up and running.
        if let Some(tx) = init_done.take() {
            let _ = tx.try_send(());
        }

        for iumd in 1..=self.simulation_step_count {
            if self.exit.load(Ordering::Relaxed) {
                tracing::info!("exit requested, leaving the epoch loop");
                break;
            }

            let pos = match self.mode {
                MotionMode::Static => self.positions[0],
                MotionMode::Dynamic => {
                    self.positions[iumd.min(self.positions.len() - 1)]
                }
                MotionMode::Interactive => self.integrate_target(&current_pos),
            };
            current_pos = pos;

            // Refresh code phase, Doppler and gain of every channel.
            let ieph = self.valid_ephemerides_index;
            for (i, chan) in self
                .channels
                .iter_mut()
                .enumerate()
                .filter(|(_, c)| c.is_active())
            {
                let sv = chan.prn - 1;
                let rho = compute_range(
                    &self.ephemerides[ieph][sv],
                    &self.ionoutc,
                    &grx,
                    &pos,
                );
                chan.azel = rho.azel;

                // Update code phase and data bit counters
                chan.compute_code_phase(rho, self.sample_rate);

                let level = if let Some(fixed) = self.fixed_gain {
                    f64::from(fixed) / 128.0
                } else {
                    // Free-space path loss and receiver antenna gain.
                    let path_loss = 20_200_000.0 / chan.rho0.d;
                    let ibs =
                        ((90.0 - chan.azel.el * R2D) / 5.0) as usize;
                    path_loss * self.antenna_pattern[ibs]
                };
                gain[i] = level * self.gain_headroom;
            }

            // Per-sample inner loop: mix all channels into the I/Q
            // accumulators and stream them out.
            for _ in 0..num_iq_samples {
                let mut i_acc = 0i32;
                let mut q_acc = 0i32;

                for (i, chan) in self
                    .channels
                    .iter_mut()
                    .enumerate()
                    .filter(|(_, c)| c.is_active())
                {
                    let (ip, qp) = chan.sample(delt);
                    i_acc += (f64::from(ip) * gain[i]) as i32;
                    q_acc += (f64::from(qp) * gain[i]) as i32;
                }

                let Some(buf) = iq.as_mut() else { break };
                buf.push_iq(i_acc, q_acc);

                let boundary =
                    transfer_len.is_some_and(|len| buf.valid >= len);
                if boundary || buf.is_full() {
                    // Hand the filled block to the consumer and keep
                    // filling into a fresh one.
                    if let Some(full) = iq.take() {
                        fifo.enqueue(full);
                    }
                    iq = fifo.acquire();
                }
            }

            if iq.is_none() {
                // Pool was halted mid-epoch.
                break;
            }

            // Whole-epoch sinks take one buffer per epoch.
            if transfer_len.is_none() {
                if let Some(full) = iq.take() {
                    fifo.enqueue(full);
                }
                iq = fifo.acquire();
                if iq.is_none() {
                    break;
                }
            }

            // Update navigation message and channel allocation every
            // 30 seconds.
            let igrx = (grx.sec * 10.0 + 0.5) as i64;
            if igrx % 300 == 0 {
                for chan in
                    self.channels.iter_mut().filter(|c| c.is_active())
                {
                    chan.generate_nav_msg(&grx, false);
                }

                self.advance_ephemeris_set(&grx);
                self.allocate_channels(&grx, &pos);

                if self.verbose {
                    let llh = Location::from(&pos);
                    let (lat, lon, hgt) = llh.to_degrees();
                    tracing::info!(
                        week = grx.week,
                        sec = grx.sec,
                        lat,
                        lon,
                        hgt,
                        elapsed = grx.diff_secs(&g0),
                        "epoch"
                    );
                    self.log_channels();
                }
            }

            // Update receiver time
            grx = grx.add_secs(self.sample_rate);
        }

        // Flush the partial block, or hand an untouched one back.
        if let Some(buf) = iq.take() {
            if buf.valid > 0 {
                fifo.enqueue(buf);
            } else {
                fifo.release(buf);
            }
        }

        tracing::info!(
            elapsed = grx.diff_secs(&g0) - self.sample_rate,
            "simulation complete"
        );
        Ok(())
    }

    /// Moves to the next ephemeris set once its clock reference comes
    /// within an hour of the current time, regenerating the subframes
    /// of every active channel.
    fn advance_ephemeris_set(&mut self, grx: &GpsTime) {
        let ieph = self.valid_ephemerides_index;
        if ieph + 1 >= self.ephemerides_count {
            return;
        }

        for sv in 0..MAX_SAT {
            if self.ephemerides[ieph + 1][sv].vflg {
                let dt = self.ephemerides[ieph + 1][sv].toc.diff_secs(grx);
                if dt < SECONDS_IN_HOUR {
                    self.valid_ephemerides_index = ieph + 1;

                    for chan in
                        self.channels.iter_mut().filter(|c| c.is_active())
                    {
                        // Generate new subframes if allocated
                        eph_to_subframes(
                            &self.ephemerides[ieph + 1][chan.prn - 1],
                            &self.ionoutc,
                            &self.almanac,
                            &mut chan.sbf,
                        );
                    }
                    tracing::info!(set = ieph + 1, "ephemeris set advanced");
                }
                break;
            }
        }
    }
}
