//! Ionosphere and UTC parameters with the Klobuchar delay model.

use std::f64::consts::PI;

use constants::{SECONDS_IN_DAY, SPEED_OF_LIGHT};
use geometry::{Azel, Location};

use crate::datetime::GpsTime;

/// Ionospheric correction coefficients and UTC conversion parameters,
/// as carried in subframe 4 page 18.
#[derive(Debug, Clone, PartialEq)]
pub struct IonoUtc {
    /// Apply ionospheric delay to the pseudoranges.
    pub enable: bool,
    /// All four iono/UTC header blocks were read from the file.
    pub vflg: bool,
    pub alpha0: f64,
    pub alpha1: f64,
    pub alpha2: f64,
    pub alpha3: f64,
    pub beta0: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub beta3: f64,
    /// UTC polynomial bias and drift.
    pub a0: f64,
    pub a1: f64,
    /// Current leap seconds.
    pub dtls: i32,
    /// UTC reference time, seconds of week.
    pub tot: i32,
    /// UTC reference week number.
    pub week_number: i32,
    /// Leap seconds after the scheduled event.
    pub dtlsf: i32,
    /// Day of week of the scheduled leap event, 1..=7.
    pub day_number: i32,
    /// Week number of the scheduled leap event.
    pub wnlsf: i32,
    /// Leap event parameters were supplied by the operator.
    pub leapen: i32,
}

impl Default for IonoUtc {
    fn default() -> Self {
        Self {
            enable: true,
            vflg: false,
            alpha0: 0.0,
            alpha1: 0.0,
            alpha2: 0.0,
            alpha3: 0.0,
            beta0: 0.0,
            beta1: 0.0,
            beta2: 0.0,
            beta3: 0.0,
            a0: 0.0,
            a1: 0.0,
            dtls: 0,
            tot: 0,
            week_number: 0,
            // Last scheduled leap second event of the source data:
            // 2016/12/31, end of day 7 of week 1929, going to 18 s.
            dtlsf: 18,
            day_number: 7,
            wnlsf: 1929,
            leapen: 0,
        }
    }
}

impl IonoUtc {
    /// Ionospheric delay along the path to a satellite, meters.
    ///
    /// Uses the broadcast Klobuchar model when the coefficients are
    /// valid; otherwise falls back to the nominal 5 ns zenith delay
    /// scaled by the obliquity factor. Returns zero when ionospheric
    /// modeling is disabled.
    pub fn ionospheric_delay(&self, g: &GpsTime, llh: &Location, azel: &Azel) -> f64 {
        if !self.enable {
            return 0.0; // No ionospheric delay
        }

        let e = azel.el / PI;
        // Obliquity factor
        let f = 1.0 + 16.0 * (0.53 - e).powi(3);

        if !self.vflg {
            return f * 5.0e-9 * SPEED_OF_LIGHT;
        }

        let phi_u = llh.lat / PI;
        let lam_u = llh.lon / PI;

        // Earth's central angle between the user position and the earth
        // projection of the ionospheric intersection point (semi-circles)
        let psi = 0.0137 / (e + 0.11) - 0.022;

        // Geodetic latitude of the earth projection of the ionospheric
        // intersection point (semi-circles)
        let phi_i = (phi_u + psi * azel.az.cos()).clamp(-0.416, 0.416);

        // Geodetic longitude of the earth projection of the ionospheric
        // intersection point (semi-circles)
        let lam_i = lam_u + psi * azel.az.sin() / (phi_i * PI).cos();

        // Geomagnetic latitude of the earth projection of the
        // ionospheric intersection point (mean ionospheric height
        // assumed 350 km) (semi-circles)
        let phi_m = phi_i + 0.064 * ((lam_i - 1.617) * PI).cos();
        let phi_m2 = phi_m * phi_m;
        let phi_m3 = phi_m2 * phi_m;

        let amp = (self.alpha0
            + self.alpha1 * phi_m
            + self.alpha2 * phi_m2
            + self.alpha3 * phi_m3)
            .max(0.0);

        let per = (self.beta0 + self.beta1 * phi_m + self.beta2 * phi_m2 + self.beta3 * phi_m3)
            .max(72000.0);

        // Local time (sec)
        let mut t = SECONDS_IN_DAY / 2.0 * lam_i + g.sec;
        while t >= SECONDS_IN_DAY {
            t -= SECONDS_IN_DAY;
        }
        while t < 0.0 {
            t += SECONDS_IN_DAY;
        }

        // Phase (radians)
        let x = 2.0 * PI * (t - 50400.0) / per;

        if x.abs() < 1.57 {
            let x2 = x * x;
            let x4 = x2 * x2;
            f * (5.0e-9 + amp * (1.0 - x2 / 2.0 + x4 / 24.0)) * SPEED_OF_LIGHT
        } else {
            f * 5.0e-9 * SPEED_OF_LIGHT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokyo() -> Location {
        Location::new(
            35.681_298_f64.to_radians(),
            139.766_247_f64.to_radians(),
            10.0,
        )
    }

    fn zenithish() -> Azel {
        Azel {
            az: 1.0,
            el: 80.0_f64.to_radians(),
        }
    }

    fn broadcast_iono() -> IonoUtc {
        IonoUtc {
            vflg: true,
            alpha0: 0.1118e-7,
            alpha1: 0.2235e-7,
            alpha2: -0.5960e-7,
            alpha3: -0.1192e-6,
            beta0: 0.1167e6,
            beta1: 0.1802e6,
            beta2: -0.1311e6,
            beta3: -0.4588e6,
            ..IonoUtc::default()
        }
    }

    #[test]
    fn disabled_model_returns_zero() {
        let iono = IonoUtc {
            enable: false,
            ..broadcast_iono()
        };
        let g = GpsTime {
            week: 2190,
            sec: 43200.0,
        };
        assert_eq!(iono.ionospheric_delay(&g, &tokyo(), &zenithish()), 0.0);
    }

    #[test]
    fn invalid_parameters_reduce_to_obliquity_fallback() {
        let iono = IonoUtc::default();
        assert!(!iono.vflg);
        let g = GpsTime {
            week: 2190,
            sec: 43200.0,
        };
        let azel = zenithish();
        let e = azel.el / PI;
        let f = 1.0 + 16.0 * (0.53 - e).powi(3);
        let expected = f * 5.0e-9 * SPEED_OF_LIGHT;
        let delay = iono.ionospheric_delay(&g, &tokyo(), &azel);
        assert!((delay - expected).abs() < 1e-9);
    }

    #[test]
    fn low_elevation_delay_exceeds_zenith_delay() {
        let iono = broadcast_iono();
        let g = GpsTime {
            week: 2190,
            sec: 50400.0,
        };
        let high = iono.ionospheric_delay(&g, &tokyo(), &zenithish());
        let low = iono.ionospheric_delay(
            &g,
            &tokyo(),
            &Azel {
                az: 1.0,
                el: 10.0_f64.to_radians(),
            },
        );
        assert!(low > high);
        // Plausible L1 delays: meters, not kilometers.
        assert!(high > 0.5 && high < 30.0, "zenith delay {high}");
        assert!(low < 100.0, "slant delay {low}");
    }
}
