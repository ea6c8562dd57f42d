//! Navigation data loading helpers for the generator.

use std::path::Path;

use constants::{EPHEM_ARRAY_SIZE, MAX_SAT, SECONDS_IN_HOUR};

use crate::{
    Error,
    datetime::{DateTime, GpsTime},
    ephemeris::Ephemeris,
    ionoutc::IonoUtc,
};

/// Receiver motion mode of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionMode {
    /// Fixed position for the whole run.
    Static,
    /// Position scripted by a motion file at the epoch cadence.
    Dynamic,
    /// Position integrated from heading, speed and vertical speed.
    Interactive,
}

/// Ephemeris-related data loaded from a navigation file: number of
/// valid sets, ionosphere/UTC parameters and the per-set, per-satellite
/// ephemeris grid.
pub type Data = (
    usize,
    IonoUtc,
    Box<[[Ephemeris; MAX_SAT]; EPHEM_ARRAY_SIZE]>,
);

/// Reads a RINEX navigation file into time-grouped ephemeris sets.
///
/// Records are grouped by their time of clock: whenever an epoch moves
/// more than one hour past the first epoch of the current set, a new
/// set starts, up to the store capacity. A positive health word below
/// 32 has its summary bit raised so the transmitted health matches the
/// six-bit field convention.
pub fn read_navigation_data(path: &Path) -> Result<Data, Error> {
    let nav = rinex::parse_nav_file(path)?;

    let ionoutc = IonoUtc {
        vflg: nav.header.iono_utc_complete(),
        alpha0: nav.header.alpha[0],
        alpha1: nav.header.alpha[1],
        alpha2: nav.header.alpha[2],
        alpha3: nav.header.alpha[3],
        beta0: nav.header.beta[0],
        beta1: nav.header.beta[1],
        beta2: nav.header.beta[2],
        beta3: nav.header.beta[3],
        a0: nav.header.a0,
        a1: nav.header.a1,
        tot: nav.header.tot,
        week_number: nav.header.wnt,
        dtls: nav.header.dtls,
        ..IonoUtc::default()
    };

    let mut ephemerides: Box<[[Ephemeris; MAX_SAT]; EPHEM_ARRAY_SIZE]> = Box::new(
        std::array::from_fn(|_| std::array::from_fn(|_| Ephemeris::default())),
    );

    let mut ieph = 0usize;
    let mut g0: Option<GpsTime> = None;

    for rec in &nav.records {
        let t = DateTime {
            y: rec.epoch.y,
            m: rec.epoch.m,
            d: rec.epoch.d,
            hh: rec.epoch.hh,
            mm: rec.epoch.mm,
            sec: rec.epoch.sec,
        };
        let g = GpsTime::from(&t);

        match &g0 {
            None => g0 = Some(g.clone()),
            Some(first) => {
                if g.diff_secs(first) > SECONDS_IN_HOUR {
                    g0 = Some(g.clone());
                    ieph += 1;
                    if ieph >= EPHEM_ARRAY_SIZE {
                        break;
                    }
                }
            }
        }

        let sv = rec.prn - 1;
        let eph = &mut ephemerides[ieph][sv];

        eph.t = t;
        eph.toc = g;
        eph.af0 = rec.af0;
        eph.af1 = rec.af1;
        eph.af2 = rec.af2;
        eph.iode = rec.iode;
        eph.crs = rec.crs;
        eph.deltan = rec.deltan;
        eph.m0 = rec.m0;
        eph.cuc = rec.cuc;
        eph.ecc = rec.ecc;
        eph.cus = rec.cus;
        eph.sqrta = rec.sqrta;
        eph.toe = GpsTime {
            week: rec.toe_week,
            sec: rec.toe_sec,
        };
        eph.cic = rec.cic;
        eph.omg0 = rec.omg0;
        eph.cis = rec.cis;
        eph.inc0 = rec.inc0;
        eph.crc = rec.crc;
        eph.aop = rec.aop;
        eph.omgdot = rec.omgdot;
        eph.idot = rec.idot;
        eph.code = rec.code;
        eph.flag = rec.flag;
        eph.sva = rec.sva;
        eph.svh = if rec.svh > 0 && rec.svh < 32 {
            rec.svh + 32 // raise the summary bit
        } else {
            rec.svh
        };
        eph.tgd = rec.tgd;
        eph.iodc = rec.iodc;
        eph.fit = rec.fit;
        eph.vflg = true;

        eph.update_working_variables();
    }

    let count = if g0.is_some() {
        ieph.min(EPHEM_ARRAY_SIZE - 1) + 1
    } else {
        0
    };
    Ok((count, ionoutc, ephemerides))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn nav_file(epochs: &[(i32, i32)]) -> std::path::PathBuf {
        // Minimal v2 file with one PRN 1 block per requested epoch
        // (day, hour).
        let mut contents = String::from(
            "     2.10           N: GPS NAV DATA                         RINEX VERSION / TYPE\n\
             \u{20}                                                           END OF HEADER\n",
        );
        for &(d, hh) in epochs {
            contents.push_str(&format!(
                " 1 22  1 {d:2} {hh:2}  0  0.0 0.442961603403D-03 0.102318153950D-11 0.000000000000D+00\n"
            ));
            contents.push_str(
                "    0.610000000000D+02-0.137500000000D+02 0.441625541738D-08 0.112532911417D+01\n\
                 \u{20}  -0.805780291557D-06 0.112367037218D-01 0.794231891632D-05 0.515369703293D+04\n\
                 \u{20}   0.518400000000D+06 0.782310962677D-07-0.259457954949D+01-0.745058059692D-08\n\
                 \u{20}   0.958725348908D+00 0.244093750000D+03 0.829880519449D+00-0.803497612653D-08\n\
                 \u{20}   0.403945397209D-09 0.100000000000D+01 0.219000000000D+04 0.000000000000D+00\n\
                 \u{20}   0.200000000000D+01 0.100000000000D+02 0.465661287308D-09 0.610000000000D+02\n\
                 \u{20}   0.518400000000D+06 0.400000000000D+01 0.000000000000D+00 0.000000000000D+00\n",
            );
        }
        let path = std::env::temp_dir().join(format!("nav_sets_{}.rnx", epochs.len()));
        std::fs::File::create(&path)
            .unwrap()
            .write_all(contents.as_bytes())
            .unwrap();
        path
    }

    #[test]
    fn epochs_an_hour_apart_split_into_sets() {
        let path = nav_file(&[(1, 0), (1, 2), (1, 4)]);
        let (count, _, ephemerides) = read_navigation_data(&path).unwrap();
        assert_eq!(count, 3);
        assert!(ephemerides[0][0].vflg);
        assert!(ephemerides[1][0].vflg);
        assert!(ephemerides[2][0].vflg);
        assert!(!ephemerides[3][0].vflg);
    }

    #[test]
    fn same_epoch_records_share_a_set() {
        let path = nav_file(&[(1, 0)]);
        let (count, _, ephemerides) = read_navigation_data(&path).unwrap();
        assert_eq!(count, 1);
        let eph = &ephemerides[0][0];
        // Derived working variables were cached.
        assert!((eph.a - eph.sqrta * eph.sqrta).abs() < 1e-6);
        assert!(eph.n > 1.4e-4 && eph.n < 1.5e-4);
        assert!((eph.sq1e2 - (1.0 - eph.ecc * eph.ecc).sqrt()).abs() < 1e-15);
    }

    #[test]
    fn low_health_words_get_summary_bit() {
        // The fixture writes svh = 10 into orbit line 6.
        let path = nav_file(&[(1, 0)]);
        let (_, _, ephemerides) = read_navigation_data(&path).unwrap();
        assert_eq!(ephemerides[0][0].svh, 42);
    }

    #[test]
    fn missing_iono_blocks_leave_model_on_fallback() {
        let path = nav_file(&[(1, 0)]);
        let (_, ionoutc, _) = read_navigation_data(&path).unwrap();
        // Invalid parameters select the nominal-delay fallback; the
        // model itself stays enabled unless the operator disables it.
        assert!(!ionoutc.vflg);
        assert!(ionoutc.enable);
    }
}
