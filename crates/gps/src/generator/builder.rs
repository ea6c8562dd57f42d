use std::path::PathBuf;

use constants::{EPHEM_ARRAY_SIZE, MAX_SAT, R2D, SECONDS_IN_HOUR, USER_MOTION_SIZE};
use geometry::{Ecef, LocalTangent, Location, Neu};
use parsing::{read_nmea_gga, read_user_motion, read_user_motion_llh};

use crate::{
    Error,
    almanac::Almanac,
    datetime::{DateTime, GpsTime},
    ephemeris::Ephemeris,
    generator::{
        signal_generator::{SignalGenerator, Target},
        utils::{MotionMode, read_navigation_data},
    },
    io::DataFormat,
    ionoutc::IonoUtc,
};

/// Type alias for ephemeris-related data used in the builder.
///
/// This tuple contains:
/// - The number of valid ephemeris sets
/// - Ionospheric and UTC parameters
/// - A 2D array of ephemeris data organized by time set and satellite PRN
type EphemerisRelatedData = (
    usize,
    IonoUtc,
    Box<[[Ephemeris; MAX_SAT]; EPHEM_ARRAY_SIZE]>,
);

/// Builder for creating and configuring a `SignalGenerator`.
///
/// This struct implements the builder pattern for creating a
/// `SignalGenerator` with a fluent API. It allows setting various
/// simulation parameters through method chaining, with reasonable
/// defaults for optional parameters.
///
/// # Example
/// ```no_run
/// use std::path::PathBuf;
///
/// use gps::SignalGeneratorBuilder;
///
/// let builder = SignalGeneratorBuilder::default()
///     .navigation_file(Some(PathBuf::from("brdc0010.22n")))
///     .unwrap()
///     .location(Some(vec![35.6813, 139.7662, 10.0]))
///     .unwrap()
///     .duration(Some(60.0))
///     .data_format(Some(8))
///     .unwrap();
///
/// let mut generator = builder.build().unwrap();
/// generator.initialize().unwrap();
/// ```
#[derive(Default)]
pub struct SignalGeneratorBuilder {
    /// Path of the I/Q file the file sink should write to
    output_file: Option<PathBuf>,
    /// Ephemeris data, ionospheric parameters, and UTC parameters
    ephemerides_data: Option<EphemerisRelatedData>,
    /// Path to a SEM almanac file
    almanac_file: Option<PathBuf>,
    /// Whether almanac pages are populated at all
    almanac_disable: Option<bool>,
    /// Base week added to the almanac's truncated week number
    week_rollover: Option<i32>,
    /// Leap second parameters [week, day, `delta_t`]
    leap: Option<Vec<i32>>,
    /// Receiver positions (static or dynamic)
    positions: Option<Vec<Ecef>>,
    /// Time step between simulation updates in seconds
    sample_rate: Option<f64>,
    /// Motion mode (static, dynamic or interactive)
    mode: Option<MotionMode>,
    /// Simulation duration in seconds
    duration: Option<f64>,
    /// Sampling frequency in Hz
    frequency: Option<f64>,
    /// Whether to override ephemeris time with simulation start time
    time_override: Option<bool>,
    /// GPS time at which the simulation starts
    receiver_gps_time: Option<GpsTime>,
    /// I/Q sample data format (8 or 16 bits)
    data_format: Option<DataFormat>,
    /// Fixed gain value to override path loss calculations
    path_loss: Option<i32>,
    /// Amplitude multiplier for sinks with extra headroom
    gain_headroom: Option<f64>,
    /// Whether to disable ionospheric delay modeling
    ionospheric_disable: Option<bool>,
    /// Elevation mask in degrees for channel allocation
    elevation_mask: Option<f64>,
    /// Initial target offset [distance m, bearing millidegrees, height m]
    target: Option<Vec<f64>>,
    /// Whether the receiver is steered interactively
    interactive: Option<bool>,
    /// Whether to enable verbose output
    verbose: Option<bool>,
}

impl SignalGeneratorBuilder {
    /// Parses a datetime string into a timestamp.
    ///
    /// # Arguments
    /// * `value` - A string representing a date and time in the format
    ///   "YYYY-MM-DD HH:MM:SS"
    fn parse_datetime(value: &str) -> Result<jiff::Timestamp, jiff::Error> {
        let time: jiff::Timestamp = value.parse()?;
        Ok(time)
    }

    /// Sets the RINEX navigation file for GPS ephemerides.
    ///
    /// This file contains satellite orbit and clock parameters needed
    /// for the simulation. The function reads and processes the
    /// navigation data, extracting ephemeris sets and ionospheric/UTC
    /// parameters. Version 2 and 3 files are accepted, plain or
    /// gzip-compressed.
    ///
    /// # Errors
    /// * `Error::NoEphemeris` - If no valid ephemeris data was found in
    ///   the file
    /// * Other errors if the file cannot be read or parsed
    pub fn navigation_file(
        mut self, navigation_file: Option<PathBuf>,
    ) -> Result<Self, Error> {
        // Read ephemeris
        if let Some(file) = navigation_file {
            let (count, iono_utc, ephemerides) = read_navigation_data(&file)
                .map_err(|_| {
                    Error::msg("ERROR: ephemeris file not found or error.")
                })?;
            if count == 0 {
                return Err(Error::NoEphemeris);
            }
            self.ephemerides_data = Some((count, iono_utc, ephemerides));
        }
        Ok(self)
    }

    /// Sets the SEM almanac file filling the almanac pages of
    /// subframes 4 and 5.
    ///
    /// The file is read during [`SignalGeneratorBuilder::build`] so
    /// that the configured week rollover base is applied. Fetching a
    /// current almanac from a remote source is a collaborator concern;
    /// only local files are read here.
    pub fn almanac_file(mut self, almanac_file: Option<PathBuf>) -> Self {
        self.almanac_file = almanac_file;
        self
    }

    /// Disables almanac pages entirely, leaving the dummy filler pages
    /// in subframes 4 and 5.
    pub fn almanac_disable(mut self, disable: Option<bool>) -> Self {
        self.almanac_disable = disable;
        self
    }

    /// Sets the base week added to the almanac's truncated week number.
    ///
    /// SEM almanacs carry the GPS week as an eight-bit modulus. The
    /// base (2048 by default) reconstructs a full week number in the
    /// current era. This is a bug-compatibility knob for data sources
    /// that already encode a different base, not a correctness
    /// requirement.
    pub fn week_rollover(mut self, base: Option<i32>) -> Self {
        self.week_rollover = base;
        self
    }

    /// Sets whether to override ephemeris time with the simulation
    /// start time.
    ///
    /// When enabled, this option shifts the ephemeris data to match the
    /// simulation start time, allowing the use of ephemeris data that
    /// would otherwise be out of range. The scenario then plays back
    /// with current RF timestamps while using whatever orbit geometry
    /// the file provides.
    pub fn time_override(mut self, time_override: Option<bool>) -> Self {
        self.time_override = time_override;
        self
    }

    /// Sets the simulation start time.
    ///
    /// The time can be specified as a string in the format "YYYY-MM-DD
    /// HH:MM:SS" or as the special value "now" to use the current
    /// system time.
    ///
    /// # Errors
    /// * Returns an error if the time string format is invalid
    pub fn time(mut self, time: Option<String>) -> Result<Self, Error> {
        if let Some(time) = time {
            let time_parsed = match time.to_lowercase().as_str() {
                "now" => jiff::Timestamp::now().in_tz("UTC"),
                time => Self::parse_datetime(time)?.in_tz("UTC"),
            }?;
            let time = DateTime {
                y: i32::from(time_parsed.year()),
                m: i32::from(time_parsed.month()),
                d: i32::from(time_parsed.day()),
                hh: i32::from(time_parsed.hour()),
                mm: i32::from(time_parsed.minute()),
                sec: f64::from(time_parsed.second()),
            };
            self.receiver_gps_time = Some(GpsTime::from(&time));
        }
        Ok(self)
    }

    /// Sets the simulation duration in seconds.
    ///
    /// For static positioning this determines how many 100 ms epochs to
    /// generate. For dynamic positioning the motion file length bounds
    /// the duration.
    pub fn duration(mut self, duration: Option<f64>) -> Self {
        self.duration = duration;
        self
    }

    /// Controls whether ionospheric correction is disabled.
    ///
    /// When disabled the pseudoranges carry no ionospheric delay at
    /// all; when enabled without valid broadcast parameters, a nominal
    /// delay scaled by the obliquity factor substitutes for the
    /// Klobuchar model.
    pub fn ionospheric_disable(mut self, disable: Option<bool>) -> Self {
        self.ionospheric_disable = disable;
        self
    }

    /// Sets leap second parameters for UTC-GPS time conversion.
    ///
    /// # Arguments
    /// * `leap` - Optional vector containing [week number, day number,
    ///   delta time in seconds]
    ///   - week number: GPS week number when the leap second becomes
    ///     effective
    ///   - day number: Day of week (1-7, where 1 is Sunday) when the
    ///     leap second becomes effective
    ///   - delta time: Difference between GPS time and UTC after the
    ///     event in seconds
    pub fn leap(mut self, leap: Option<Vec<i32>>) -> Self {
        if let Some(leap_values) = &leap {
            // Preliminary check for early warnings; build() validates
            // the same rules fatally.
            if leap_values.len() >= 3 {
                let week_number = leap_values[0];
                let day_number = leap_values[1];
                let delta_time = leap_values[2];

                if week_number < 0 {
                    tracing::warn!("invalid GPS week number: {week_number}");
                }
                if !(1..=7).contains(&day_number) {
                    tracing::warn!("invalid GPS day number: {day_number}");
                }
                if !(-128..=127).contains(&delta_time) {
                    tracing::warn!("invalid delta leap second: {delta_time}");
                }
            }
        }
        self.leap = leap;
        self
    }

    /// Sets the I/Q sample data format.
    ///
    /// # Arguments
    /// * `data_format` - Optional bit depth (8 or 16)
    ///
    /// # Errors
    /// * Returns an error if the data format is not 8 or 16 bits
    pub fn data_format(
        mut self, data_format: Option<usize>,
    ) -> Result<Self, Error> {
        match data_format {
            Some(8) => self.data_format = Some(DataFormat::Bits8),
            Some(16) => self.data_format = Some(DataFormat::Bits16),
            None => {}
            _ => return Err(Error::invalid_data_format()),
        }
        Ok(self)
    }

    /// Sets the output file path the file sink writes the generated
    /// I/Q samples to.
    pub fn output_file(mut self, file: Option<PathBuf>) -> Self {
        self.output_file = file;
        self
    }

    /// Sets the sampling frequency for the generated I/Q samples.
    ///
    /// # Arguments
    /// * `frequency` - Optional sampling frequency in Hz (must be at
    ///   least 1 MHz)
    ///
    /// # Errors
    /// * Returns an error if the frequency is less than 1 MHz
    pub fn frequency(
        mut self, frequency: Option<usize>,
    ) -> Result<Self, Error> {
        match frequency {
            Some(freq) if freq >= 1_000_000 => {
                self.frequency = Some(freq as f64);
            }
            None => {}
            _ => return Err(Error::invalid_sampling_frequency()),
        }
        Ok(self)
    }

    /// Sets a static location in ECEF (Earth-Centered, Earth-Fixed)
    /// coordinates.
    ///
    /// # Errors
    /// * Returns an error if another positioning method was already set
    ///   (duplicate position)
    pub fn location_ecef(
        mut self, location: Option<Vec<f64>>,
    ) -> Result<Self, Error> {
        if self.positions.is_some() && location.is_some() {
            return Err(Error::duplicate_position());
        }
        if let Some(location) = location {
            self.mode = Some(MotionMode::Static);
            let location = Ecef::from(&[location[0], location[1], location[2]]);
            self.positions = Some(vec![location]);
        }
        Ok(self)
    }

    /// Sets a static location in LLH (Latitude, Longitude, Height)
    /// coordinates, in degrees and meters.
    ///
    /// # Errors
    /// * Returns an error if another positioning method was already set
    ///   (duplicate position)
    /// * Returns an error for out-of-range latitude or longitude
    pub fn location(
        mut self, location: Option<Vec<f64>>,
    ) -> Result<Self, Error> {
        if self.positions.is_some() && location.is_some() {
            return Err(Error::duplicate_position());
        }
        if let Some(location) = location {
            self.mode = Some(MotionMode::Static);
            let llh =
                Location::from_degrees(location[0], location[1], location[2])?;
            self.positions = Some(vec![Ecef::from(&llh)]);
        }
        Ok(self)
    }

    /// Controls whether to enable verbose output during simulation.
    pub fn verbose(mut self, verbose: Option<bool>) -> Self {
        self.verbose = verbose;
        self
    }

    /// Sets a fixed gain value to override path loss calculations.
    ///
    /// Normally the per-channel amplitude follows the free-space path
    /// loss and the receiver antenna pattern. A fixed value (in units
    /// of 1/128 full scale) holds every channel at the same level.
    pub fn path_loss(mut self, loss: Option<i32>) -> Self {
        self.path_loss = loss;
        self
    }

    /// Sets the amplitude multiplier for sinks whose sample type has
    /// extra headroom (wide-DAC front-ends want twice the drive).
    pub fn gain_headroom(mut self, headroom: Option<f64>) -> Self {
        self.gain_headroom = headroom;
        self
    }

    /// Sets the elevation mask in degrees below which satellites are
    /// not allocated a channel.
    pub fn elevation_mask(mut self, mask: Option<f64>) -> Self {
        self.elevation_mask = mask;
        self
    }

    /// Places the simulated receiver at a distance and bearing from the
    /// configured location.
    ///
    /// # Arguments
    /// * `target` - Optional vector containing [distance in meters,
    ///   bearing in millidegrees, height in meters]
    pub fn target(mut self, target: Option<Vec<f64>>) -> Self {
        self.target = target;
        self
    }

    /// Enables interactive motion: the receiver integrates the shared
    /// target state (heading, speed, vertical speed) every 100 ms
    /// epoch. A user interface may update that state while the
    /// generator runs.
    pub fn interactive(mut self, interactive: Option<bool>) -> Self {
        self.interactive = interactive;
        self
    }

    /// Sets a user motion file in ECEF coordinates for dynamic
    /// positioning, CSV rows of `t,x,y,z` at a 10 Hz cadence.
    ///
    /// # Errors
    /// * Returns an error if another positioning method was already set
    /// * Returns parsing errors if the file cannot be read
    pub fn user_motion_file(
        mut self, file: Option<PathBuf>,
    ) -> Result<Self, Error> {
        if self.positions.is_some() && file.is_some() {
            return Err(Error::duplicate_position());
        }
        if let Some(file) = file {
            self.mode = Some(MotionMode::Dynamic);
            self.positions = Some(read_user_motion(&file).map_err(|e| {
                Error::ParsingError(format!("User motion file error: {e}"))
            })?);
        }
        Ok(self)
    }

    /// Sets a user motion file in LLH coordinates for dynamic
    /// positioning, CSV rows of `t,lat,lon,height`.
    ///
    /// # Errors
    /// * Returns an error if another positioning method was already set
    /// * Returns parsing errors if the file cannot be read
    pub fn user_motion_llh_file(
        mut self, file: Option<PathBuf>,
    ) -> Result<Self, Error> {
        if self.positions.is_some() && file.is_some() {
            return Err(Error::duplicate_position());
        }
        if let Some(file) = file {
            self.mode = Some(MotionMode::Dynamic);
            self.positions =
                Some(read_user_motion_llh(&file).map_err(|e| {
                    Error::ParsingError(format!(
                        "User motion LLH file error: {e}"
                    ))
                })?);
        }
        Ok(self)
    }

    /// Sets a NMEA GGA sentence stream for dynamic positioning.
    ///
    /// # Errors
    /// * Returns an error if another positioning method was already set
    /// * Returns parsing errors if the file cannot be read
    pub fn user_motion_nmea_gga_file(
        mut self, file: Option<PathBuf>,
    ) -> Result<Self, Error> {
        if self.positions.is_some() && file.is_some() {
            return Err(Error::duplicate_position());
        }
        if let Some(file) = file {
            self.mode = Some(MotionMode::Dynamic);
            self.positions = Some(read_nmea_gga(&file).map_err(|e| {
                Error::ParsingError(format!("NMEA GGA file error: {e}"))
            })?);
        }
        Ok(self)
    }

    /// Sets the time step between simulation updates.
    ///
    /// The default is 0.1 seconds (10 Hz update rate); the navigation
    /// message cadence and the motion file format assume it.
    pub fn sample_rate(mut self, rate: Option<f64>) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Builds the `SignalGenerator` with the configured settings.
    ///
    /// Validates the configuration, selects the ephemeris set
    /// bracketing the start time, loads the almanac and applies the
    /// optional target offset.
    ///
    /// # Errors
    /// * `Error::NavigationNotSet` - If no navigation file was provided
    /// * `Error::InvalidStartTime` - If the start time is outside the
    ///   ephemeris range
    /// * `Error::NoCurrentEphemerides` - If no valid ephemeris brackets
    ///   the start time
    /// * `Error::DataFormatNotSet` - If no data format was specified
    /// * Validation errors for leap parameters, positions and duration
    #[allow(clippy::too_many_lines)]
    pub fn build(mut self) -> Result<SignalGenerator, Error> {
        // ensure navigation data is read
        let Some((count, mut ionoutc, mut ephemerides)) = self.ephemerides_data
        else {
            return Err(Error::navigation_not_set());
        };
        // leap setting
        if let Some(leap) = self.leap {
            ionoutc.leapen = 1;
            ionoutc.wnlsf = leap[0];
            ionoutc.day_number = leap[1];
            ionoutc.dtlsf = leap[2];
            if !(1..=7).contains(&ionoutc.day_number) {
                return Err(Error::invalid_gps_day());
            }
            if ionoutc.wnlsf < 0 {
                return Err(Error::invalid_gps_week());
            }
            if !(-128..=127).contains(&ionoutc.dtlsf) {
                return Err(Error::invalid_delta_leap_second());
            }
        }
        // positions
        let mut positions = if let Some(positions) = self.positions {
            if positions.is_empty() {
                return Err(Error::wrong_positions());
            }
            positions
        } else {
            // Default static location; Tokyo
            let llh = [35.681_298 / R2D, 139.766_247 / R2D, 10.0];
            self.mode = Some(MotionMode::Static);
            vec![Ecef::from(&Location::from(&llh))]
        };
        // interactive steering starts from a static position
        if self.interactive.unwrap_or(false) {
            if self.mode == Some(MotionMode::Dynamic) {
                tracing::warn!(
                    "user motion file supplied, interactive mode disabled"
                );
            } else {
                self.mode = Some(MotionMode::Interactive);
            }
        }
        // sample_rate, default is 0.1s/10Hz
        let sample_rate = self.sample_rate.unwrap_or(0.1);
        // mode
        let mode = self.mode.unwrap_or(MotionMode::Static);
        // check duration
        if self
            .duration
            .is_some_and(|d| d < 0.0 || d > USER_MOTION_SIZE as f64 / 10.0)
        {
            return Err(Error::invalid_duration());
        }
        let simulation_step_count = if let Some(duration) = self.duration {
            let duration_count = (duration * 10.0 + 0.5) as usize;
            if matches!(mode, MotionMode::Dynamic) {
                // bounded by the motion file length
                positions.len().min(duration_count)
            } else {
                duration_count
            }
        } else if matches!(mode, MotionMode::Dynamic) {
            positions.len()
        } else {
            USER_MOTION_SIZE
        };
        // frequency
        let sample_frequency = self.frequency.unwrap_or(2_600_000.0);

        let mut gpstime_min = GpsTime::default();
        let mut gpstime_max = GpsTime::default();
        // get min time of ephemerides
        for sv in 0..MAX_SAT {
            if ephemerides[0][sv].vflg {
                gpstime_min = ephemerides[0][sv].toc.clone();
                break;
            }
        }
        // get max time of ephemerides
        for sv in 0..MAX_SAT {
            if ephemerides[count - 1][sv].vflg {
                gpstime_max = ephemerides[count - 1][sv].toc.clone();
                break;
            }
        }
        let time_override = self.time_override.unwrap_or(false);
        let receiver_gps_time = if let Some(gps_time_0) = self.receiver_gps_time
        {
            // Scenario start time has been set.
            if time_override {
                // Shift every stored toc/toe so the scenario plays back
                // with the requested timestamps while keeping the orbit
                // geometry of the file. The shift is anchored on the
                // start time rounded down to the 2 hour broadcast
                // cadence; the set selection below still applies.
                let mut gtmp = GpsTime {
                    week: gps_time_0.week,
                    sec: f64::from((gps_time_0.sec as i32) / 7200 * 7200),
                };
                let dsec = gtmp.diff_secs(&gpstime_min);
                // Overwrite the UTC reference week number
                ionoutc.week_number = gtmp.week;
                ionoutc.tot = gtmp.sec as i32;
                for sv in 0..MAX_SAT {
                    for i_eph in ephemerides.iter_mut().take(count) {
                        if i_eph[sv].vflg {
                            gtmp = i_eph[sv].toc.add_secs(dsec);
                            let ttmp = DateTime::from(&gtmp);
                            i_eph[sv].toc = gtmp.clone();
                            i_eph[sv].t = ttmp;
                            gtmp = i_eph[sv].toe.add_secs(dsec);
                            i_eph[sv].toe = gtmp;
                        }
                    }
                }
            } else if gps_time_0.diff_secs(&gpstime_min) < 0.0
                || gpstime_max.diff_secs(&gps_time_0) < 0.0f64
            {
                return Err(Error::invalid_start_time());
            }
            gps_time_0
        } else {
            gpstime_min
        };
        let mut valid_ephemerides_index = None;

        // Select the current set of ephemerides
        for (i, eph_item) in ephemerides.iter().enumerate().take(count) {
            for e in eph_item.iter().take(MAX_SAT) {
                if e.vflg {
                    let dt = receiver_gps_time.diff_secs(&e.toc);
                    if (-SECONDS_IN_HOUR..SECONDS_IN_HOUR).contains(&dt) {
                        valid_ephemerides_index = Some(i);
                        break;
                    }
                }
            }
            if valid_ephemerides_index.is_some() {
                break;
            }
        }

        // If no valid ephemerides found and time_override is true, use
        // the first set
        if valid_ephemerides_index.is_none() && time_override && count > 0 {
            valid_ephemerides_index = Some(0);
        }

        let Some(valid_ephemerides_index) = valid_ephemerides_index else {
            return Err(Error::no_current_ephemerides());
        };

        ionoutc.enable = !self.ionospheric_disable.unwrap_or(false);
        let Some(data_format) = self.data_format else {
            return Err(Error::data_format_not_set());
        };

        // Almanac pages are optional; without a file the dummy filler
        // pages stay in place.
        let almanac =
            match (&self.almanac_file, self.almanac_disable.unwrap_or(false)) {
                (Some(path), false) => Almanac::from_sem_file(
                    path,
                    self.week_rollover.unwrap_or(2048),
                )?,
                _ => Almanac::default(),
            };

        // Initial target offset in the local tangent frame of the
        // configured location.
        let mut target = Target::default();
        if let Some(t) = self.target {
            target.distance = t[0];
            target.bearing = t[1];
            target.height = t[2];
            target.valid = true;

            if !matches!(mode, MotionMode::Dynamic) {
                let start = positions[0];
                let llh = Location::from(&start);
                let tmat = LocalTangent::new(&llh);
                let dir = (target.bearing / 1000.0) / R2D;
                let neu = Neu::new(
                    target.distance * dir.cos(),
                    target.distance * dir.sin(),
                    target.height,
                );
                positions[0] = start + tmat.neu_to_ecef(&neu);
            }
        }

        let mut generator = SignalGenerator {
            ephemerides,
            ephemerides_count: count,
            valid_ephemerides_index,
            ionoutc,
            almanac,
            positions,
            simulation_step_count,
            receiver_gps_time,
            mode,
            elevation_mask: self.elevation_mask.unwrap_or(0.0),
            sample_frequency,
            sample_rate,
            data_format,
            fixed_gain: self.path_loss,
            gain_headroom: self.gain_headroom.unwrap_or(1.0),
            output_file: self.output_file,
            verbose: self.verbose.unwrap_or(false),
            ..SignalGenerator::default()
        };
        generator.set_target(target);
        Ok(generator)
    }
}
