//! Pseudorange observation between a satellite and the receiver.

use constants::{OMEGA_EARTH, R2D, SPEED_OF_LIGHT};
use geometry::{Azel, Ecef, LocalTangent, Location};

use crate::{datetime::GpsTime, ephemeris::Ephemeris, ionoutc::IonoUtc};

/// One range observation: pseudorange, range rate, geometric distance,
/// direction and ionospheric delay at a given GPS time.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Range {
    /// Time of application.
    pub g: GpsTime,
    /// Pseudorange, meters.
    pub range: f64,
    /// Range rate, m/s.
    pub rate: f64,
    /// Geometric distance, meters.
    pub d: f64,
    /// Direction of the satellite from the receiver.
    pub azel: Azel,
    /// Ionospheric delay applied to the pseudorange, meters.
    pub iono_delay: f64,
}

/// Computes the range observation for one satellite.
///
/// The satellite state is solved at reception time, extrapolated
/// backwards by the light-travel time and corrected for the earth
/// rotation during signal flight. The pseudorange removes the satellite
/// clock bias and adds the ionospheric delay.
pub fn compute_range(
    eph: &Ephemeris,
    ionoutc: &IonoUtc,
    g: &GpsTime,
    xyz: &Ecef,
) -> Range {
    // SV position at time of the pseudorange observation.
    let (mut pos, vel, clk) = eph.satpos(g);

    // Receiver to satellite vector and light-time.
    let mut los = pos - *xyz;
    let tau = los.norm() / SPEED_OF_LIGHT;

    // Extrapolate the satellite position backwards to the transmission
    // time.
    pos.x -= vel.x * tau;
    pos.y -= vel.y * tau;
    pos.z -= vel.z * tau;

    // Earth rotation correction. The change in velocity can be
    // neglected.
    let xrot = pos.x + pos.y * OMEGA_EARTH * tau;
    let yrot = pos.y - pos.x * OMEGA_EARTH * tau;
    pos.x = xrot;
    pos.y = yrot;

    // New observer to satellite vector and satellite range.
    los = pos - *xyz;
    let range = los.norm();

    // Azimuth and elevation angles.
    let llh = Location::from(xyz);
    let tmat = LocalTangent::new(&llh);
    let neu = tmat.ecef_to_neu(&los);
    let azel = neu.azel();

    let mut rho = Range {
        g: g.clone(),
        d: range,
        // Pseudorange with the satellite clock bias removed.
        range: range - SPEED_OF_LIGHT * clk[0],
        // Relative velocity of SV and receiver.
        rate: vel.dot(&los) / range,
        azel,
        iono_delay: 0.0,
    };

    rho.iono_delay = ionoutc.ionospheric_delay(g, &llh, &rho.azel);
    rho.range += rho.iono_delay;
    rho
}

/// Checks whether a satellite stands above the elevation mask (in
/// degrees) as seen from `xyz`. Returns the direction when visible,
/// `None` for invalid ephemerides or masked satellites.
pub fn check_sat_visibility(
    eph: &Ephemeris,
    g: &GpsTime,
    xyz: &Ecef,
    elv_mask: f64,
) -> Option<Azel> {
    if !eph.vflg {
        return None;
    }

    let llh = Location::from(xyz);
    let tmat = LocalTangent::new(&llh);

    let (pos, _, _) = eph.satpos(g);
    let los = pos - *xyz;
    let azel = tmat.ecef_to_neu(&los).azel();

    (azel.el * R2D > elv_mask).then_some(azel)
}
