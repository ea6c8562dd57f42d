//! GPS almanac store and SEM file parsing.
//!
//! The almanac carries a reduced orbital parameter set for the whole
//! constellation, good for weeks. It fills the almanac pages of
//! subframes 4 and 5. Remote refresh is a collaborator concern; this
//! store only reads a local SEM file as distributed by the reference
//! sources.

use std::{f64::consts::PI, fs, path::Path};

use constants::{MAX_SAT, SECONDS_IN_WEEK};

use crate::{Error, datetime::GpsTime};

/// Almanac entry of a single satellite.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AlmanacSv {
    /// User range accuracy lookup code, 0..=15.
    pub ura: u8,
    /// Six-bit health code; 0 is healthy.
    pub health: u8,
    /// Configuration code; 9 and above means anti-spoofing is on.
    pub config: u8,
    /// GPS SV id / PRN number, 1..=32.
    pub svid: u16,
    /// Satellite vehicle number.
    pub svn: u16,
    /// Validity of this entry.
    pub valid: bool,
    /// Eccentricity.
    pub e: f64,
    /// Inclination at reference time, rad.
    pub delta_i: f64,
    /// Rate of right ascension, rad/s.
    pub omgdot: f64,
    /// Square root of semi-major axis, m^(1/2).
    pub sqrta: f64,
    /// Longitude of ascending node at weekly epoch, rad.
    pub omg0: f64,
    /// Argument of perigee, rad.
    pub aop: f64,
    /// Mean anomaly at reference time, rad.
    pub m0: f64,
    /// Clock bias, s.
    pub af0: f64,
    /// Clock drift, s/s.
    pub af1: f64,
    /// Time of applicability.
    pub toa: GpsTime,
}

/// Almanac of the full constellation.
#[derive(Debug, Clone, PartialEq)]
pub struct Almanac {
    /// At least one entry parsed successfully.
    pub valid: bool,
    pub sv: [AlmanacSv; MAX_SAT],
}

impl Default for Almanac {
    fn default() -> Self {
        Self {
            valid: false,
            sv: std::array::from_fn(|_| AlmanacSv::default()),
        }
    }
}

/// Pulls the next whitespace token parsed as `T`.
fn next_token<'a, T: std::str::FromStr>(
    tokens: &mut impl Iterator<Item = &'a str>,
) -> Result<T, Error> {
    let tok = tokens
        .next()
        .ok_or_else(|| Error::ParsingError("unexpected end of almanac file".into()))?;
    tok.parse()
        .map_err(|_| Error::ParsingError(format!("bad almanac field '{tok}'")))
}

impl Almanac {
    /// Reads a SEM almanac file.
    ///
    /// The SEM week field carries only the low bits of the GPS week;
    /// `week_rollover` is the base added to recover a full week number
    /// from the 8-bit modulus. The conventional value for the current
    /// era is 2048.
    pub fn from_sem_file(path: &Path, week_rollover: i32) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        let mut tokens = contents.split_whitespace();

        let n_sv: usize = next_token(&mut tokens)?;
        // Record title, unused.
        let _title: String = next_token(&mut tokens)?;
        let week: i32 = next_token(&mut tokens)?;
        let toa_sec: u32 = next_token(&mut tokens)?;

        let toa = GpsTime {
            week: (week & 0xFF) + week_rollover,
            sec: f64::from(toa_sec),
        };

        let mut almanac = Self::default();
        for _ in 0..n_sv.min(MAX_SAT) {
            let svid: u16 = next_token(&mut tokens)?;
            if svid == 0 || svid as usize > MAX_SAT {
                return Err(Error::ParsingError(format!("bad almanac PRN {svid}")));
            }
            let entry = &mut almanac.sv[svid as usize - 1];
            entry.svid = svid;
            entry.toa = toa.clone();

            entry.svn = next_token(&mut tokens)?;
            let ura: u32 = next_token(&mut tokens)?;
            entry.ura = ura.min(15) as u8;
            entry.e = next_token(&mut tokens)?;
            // Inclination offset from the 0.30 semicircle reference.
            let delta_i: f64 = next_token(&mut tokens)?;
            entry.delta_i = (0.30 + delta_i) * PI;
            entry.omgdot = next_token::<f64>(&mut tokens)? * PI;
            entry.sqrta = next_token(&mut tokens)?;
            entry.omg0 = next_token::<f64>(&mut tokens)? * PI;
            entry.aop = next_token::<f64>(&mut tokens)? * PI;
            entry.m0 = next_token::<f64>(&mut tokens)? * PI;
            entry.af0 = next_token(&mut tokens)?;
            entry.af1 = next_token(&mut tokens)?;
            let health: u32 = next_token(&mut tokens)?;
            entry.health = health.min(63) as u8;
            let config: u32 = next_token(&mut tokens)?;
            entry.config = config.min(15) as u8;
            entry.valid = true;
        }

        almanac.valid = almanac.sv.iter().any(|sv| sv.valid);
        if !almanac.valid {
            return Err(Error::ParsingError("almanac file holds no entries".into()));
        }
        Ok(almanac)
    }

    /// Verifies the time of applicability against the scenario start.
    /// An almanac further than four weeks away cannot describe the
    /// simulated constellation.
    pub fn check_toa(&self, g0: &GpsTime) -> Result<(), Error> {
        if !self.valid {
            return Ok(());
        }
        for sv in &self.sv {
            if sv.valid {
                let dt = sv.toa.diff_secs(g0);
                if !(-4.0 * SECONDS_IN_WEEK..=4.0 * SECONDS_IN_WEEK).contains(&dt) {
                    return Err(Error::InvalidAlmanacTime);
                }
            }
        }
        Ok(())
    }
}
