//! Broadcast ephemeris model.
//!
//! One [`Ephemeris`] holds the Keplerian elements, harmonic corrections
//! and clock polynomial of a single satellite, valid for roughly two
//! hours around its time of ephemeris. Satellite position, velocity and
//! clock offset follow the broadcast model of IS-GPS-200 including the
//! relativistic correction term.

use constants::{
    GM_EARTH, OMEGA_EARTH, SECONDS_IN_HALF_WEEK, SECONDS_IN_WEEK,
};
use geometry::Ecef;

use crate::datetime::{DateTime, GpsTime};

/// Relativistic clock correction constant `F`, s/m^(1/2).
const REL_F: f64 = -4.442_807_633e-10;

/// Broadcast ephemeris of one satellite. Immutable after load; the
/// trailing working variables are derived once by
/// [`Ephemeris::update_working_variables`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Ephemeris {
    /// Valid flag; false slots are skipped everywhere.
    pub vflg: bool,
    /// SV accuracy (URA index).
    pub sva: i32,
    /// SV health.
    pub svh: i32,
    /// Codes on L2 channel.
    pub code: i32,
    /// L2 P data flag.
    pub flag: i32,
    /// Fit interval, hours.
    pub fit: f64,
    /// Calendar form of the time of clock.
    pub t: DateTime,
    /// Time of clock.
    pub toc: GpsTime,
    /// Time of ephemeris.
    pub toe: GpsTime,
    /// Issue of data, clock.
    pub iodc: i32,
    /// Issue of data, ephemeris.
    pub iode: i32,
    /// Mean motion difference, rad/s.
    pub deltan: f64,
    /// Latitude harmonic corrections, rad.
    pub cuc: f64,
    pub cus: f64,
    /// Inclination harmonic corrections, rad.
    pub cic: f64,
    pub cis: f64,
    /// Radius harmonic corrections, m.
    pub crc: f64,
    pub crs: f64,
    /// Eccentricity.
    pub ecc: f64,
    /// Square root of semi-major axis, m^(1/2).
    pub sqrta: f64,
    /// Mean anomaly at reference time, rad.
    pub m0: f64,
    /// Longitude of ascending node, rad.
    pub omg0: f64,
    /// Inclination at reference time, rad.
    pub inc0: f64,
    /// Argument of perigee, rad.
    pub aop: f64,
    /// Rate of right ascension, rad/s.
    pub omgdot: f64,
    /// Rate of inclination, rad/s.
    pub idot: f64,
    /// Clock bias, s.
    pub af0: f64,
    /// Clock drift, s/s.
    pub af1: f64,
    /// Clock drift rate, s/s^2.
    pub af2: f64,
    /// Group delay, s.
    pub tgd: f64,
    // Working variables follow.
    /// Corrected mean motion, rad/s.
    pub n: f64,
    /// sqrt(1 - e^2).
    pub sq1e2: f64,
    /// Semi-major axis, m.
    pub a: f64,
    /// Node rate relative to the rotating earth, rad/s.
    pub omgkdot: f64,
}

/// Solves Kepler's equation `M = E - e sin(E)` for the eccentric
/// anomaly, iterating until the update falls below 1e-14 rad. Returns
/// the anomaly and the number of iterations taken.
pub(crate) fn solve_eccentric_anomaly(mk: f64, ecc: f64) -> (f64, u32) {
    let mut ek = mk;
    let mut ekold = ek + 1.0;
    let mut iterations = 0;

    while (ek - ekold).abs() > 1.0e-14 {
        ekold = ek;
        let one_minus_ecos_e = 1.0 - ecc * ekold.cos();
        ek += (mk - ekold + ecc * ekold.sin()) / one_minus_ecos_e;
        iterations += 1;
    }
    (ek, iterations)
}

impl Ephemeris {
    /// Derives the cached working variables from the loaded elements.
    pub fn update_working_variables(&mut self) {
        self.a = self.sqrta * self.sqrta;
        self.n = (GM_EARTH / (self.a * self.a * self.a)).sqrt() + self.deltan;
        self.sq1e2 = (1.0 - self.ecc * self.ecc).sqrt();
        self.omgkdot = self.omgdot - OMEGA_EARTH;
    }

    /// Computes satellite position and velocity in ECEF plus the clock
    /// bias and drift at GPS time `g`.
    ///
    /// Velocity follows the broadcast-ephemeris differentiation of the
    /// position equations; the clock correction carries the
    /// relativistic term `F e sqrt(a) sin(E)` and removes the group
    /// delay.
    pub fn satpos(&self, g: &GpsTime) -> (Ecef, Ecef, [f64; 2]) {
        let mut tk = g.sec - self.toe.sec;
        if tk > SECONDS_IN_HALF_WEEK {
            tk -= SECONDS_IN_WEEK;
        } else if tk < -SECONDS_IN_HALF_WEEK {
            tk += SECONDS_IN_WEEK;
        }

        let mk = self.m0 + self.n * tk;
        let (ek, _) = solve_eccentric_anomaly(mk, self.ecc);
        let sek = ek.sin();
        let cek = ek.cos();
        let one_minus_ecos_e = 1.0 - self.ecc * cek;

        let ekdot = self.n / one_minus_ecos_e;

        let relativistic = REL_F * self.ecc * self.sqrta * sek;

        let pk = (self.sq1e2 * sek).atan2(cek - self.ecc) + self.aop;
        let pkdot = self.sq1e2 * ekdot / one_minus_ecos_e;

        let s2pk = (2.0 * pk).sin();
        let c2pk = (2.0 * pk).cos();

        let uk = pk + self.cus * s2pk + self.cuc * c2pk;
        let suk = uk.sin();
        let cuk = uk.cos();
        let ukdot = pkdot * (1.0 + 2.0 * (self.cus * c2pk - self.cuc * s2pk));

        let rk = self.a * one_minus_ecos_e + self.crc * c2pk + self.crs * s2pk;
        let rkdot = self.a * self.ecc * sek * ekdot
            + 2.0 * pkdot * (self.crs * c2pk - self.crc * s2pk);

        let ik = self.inc0 + self.idot * tk + self.cic * c2pk + self.cis * s2pk;
        let sik = ik.sin();
        let cik = ik.cos();
        let ikdot = self.idot + 2.0 * pkdot * (self.cis * c2pk - self.cic * s2pk);

        let xpk = rk * cuk;
        let ypk = rk * suk;
        let xpkdot = rkdot * cuk - ypk * ukdot;
        let ypkdot = rkdot * suk + xpk * ukdot;

        let ok = self.omg0 + tk * self.omgkdot - OMEGA_EARTH * self.toe.sec;
        let sok = ok.sin();
        let cok = ok.cos();

        let pos = Ecef {
            x: xpk * cok - ypk * cik * sok,
            y: xpk * sok + ypk * cik * cok,
            z: ypk * sik,
        };

        let tmp = ypkdot * cik - ypk * sik * ikdot;

        let vel = Ecef {
            x: -self.omgkdot * pos.y + xpkdot * cok - tmp * sok,
            y: self.omgkdot * pos.x + xpkdot * sok + tmp * cok,
            z: ypk * cik * ikdot + ypkdot * sik,
        };

        // Satellite clock correction.
        let mut tk = g.sec - self.toc.sec;
        if tk > SECONDS_IN_HALF_WEEK {
            tk -= SECONDS_IN_WEEK;
        } else if tk < -SECONDS_IN_HALF_WEEK {
            tk += SECONDS_IN_WEEK;
        }

        let clk = [
            self.af0 + tk * (self.af1 + tk * self.af2) + relativistic - self.tgd,
            self.af1 + 2.0 * tk * self.af2,
        ];

        (pos, vel, clk)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    /// A plausible mid-constellation ephemeris for unit testing.
    fn sample_ephemeris() -> Ephemeris {
        let mut eph = Ephemeris {
            vflg: true,
            toc: GpsTime {
                week: 2190,
                sec: 518_400.0,
            },
            toe: GpsTime {
                week: 2190,
                sec: 518_400.0,
            },
            iode: 61,
            iodc: 61,
            deltan: 4.416_255_417_38e-9,
            m0: 1.125_329_114_17,
            cuc: -8.057_802_915_57e-7,
            cus: 7.942_318_916_32e-6,
            crc: 244.093_75,
            crs: -13.75,
            cic: 7.823_109_626_77e-8,
            cis: -7.450_580_596_92e-9,
            ecc: 0.011_236_703_721_8,
            sqrta: 5153.697_032_93,
            omg0: -2.594_579_549_49,
            inc0: 0.958_725_348_908,
            aop: 0.829_880_519_449,
            omgdot: -8.034_976_126_53e-9,
            idot: 4.039_453_972_09e-10,
            af0: 4.429_616_034_03e-4,
            af1: 1.023_181_539_5e-12,
            af2: 0.0,
            tgd: 4.656_612_873_08e-10,
            ..Ephemeris::default()
        };
        eph.update_working_variables();
        eph
    }

    #[test]
    fn satellite_sits_at_orbital_radius() {
        let eph = sample_ephemeris();
        let (pos, vel, clk) = eph.satpos(&eph.toe);

        // Orbit radius close to the semi-major axis, speed close to the
        // circular orbital speed, clock bias within a millisecond.
        let r = pos.norm();
        assert!((r - eph.a).abs() < eph.a * 0.02, "radius {r}");
        let v = vel.norm();
        assert!((3000.0..4500.0).contains(&v), "speed {v}");
        assert!(clk[0].abs() < 1e-3);
    }

    #[test]
    fn position_is_continuous_over_time() {
        let eph = sample_ephemeris();
        let g0 = eph.toe.clone();
        let g1 = g0.add_secs(0.1);
        let (p0, v0, _) = eph.satpos(&g0);
        let (p1, _, _) = eph.satpos(&g1);

        // Finite difference against the analytic velocity.
        let dx = (p1.x - p0.x) / 0.1;
        let dy = (p1.y - p0.y) / 0.1;
        let dz = (p1.z - p0.z) / 0.1;
        assert!((dx - v0.x).abs() < 0.5);
        assert!((dy - v0.y).abs() < 0.5);
        assert!((dz - v0.z).abs() < 0.5);
    }

    #[test_case(0.0; "circular")]
    #[test_case(0.001; "near circular")]
    #[test_case(0.02; "max broadcast eccentricity")]
    fn kepler_converges_quickly(ecc: f64) {
        for k in 0..8 {
            let mk = f64::from(k) * 0.7853;
            let (ek, iterations) = solve_eccentric_anomaly(mk, ecc);
            assert!(iterations <= 10, "{iterations} iterations at M={mk}");
            assert!((ek - ecc * ek.sin() - mk).abs() < 1e-12);
        }
    }

    #[test]
    fn clock_polynomial_tracks_drift() {
        let mut eph = sample_ephemeris();
        eph.af1 = 1e-11;
        let g = eph.toc.add_secs(1000.0);
        let (_, _, clk) = eph.satpos(&g);
        let expected = eph.af0 + 1000.0 * eph.af1;
        assert!((clk[0] - expected).abs() < 1e-9);
        assert!((clk[1] - eph.af1).abs() < 1e-15);
    }

    #[test]
    fn half_week_wrap_applies_to_time_from_ephemeris() {
        let mut eph = sample_ephemeris();
        eph.toe.sec = 10.0;
        eph.toc.sec = 10.0;
        // Observation time late in the previous week wraps to a small
        // negative tk instead of almost a full week.
        let g = GpsTime {
            week: 2190,
            sec: SECONDS_IN_WEEK - 10.0,
        };
        let (pos_wrapped, _, _) = eph.satpos(&g);
        let g_near = GpsTime {
            week: 2190,
            sec: 10.0 - 20.0,
        };
        let (pos_near, _, _) = eph.satpos(&g_near);
        assert!((pos_wrapped.x - pos_near.x).abs() < 1e-6);
        assert!((pos_wrapped.y - pos_near.y).abs() < 1e-6);
        assert!((pos_wrapped.z - pos_near.z).abs() < 1e-6);
    }
}
