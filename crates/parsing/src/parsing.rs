//! Receiver motion input parsers.
//!
//! A motion file scripts the simulated receiver trajectory at a 10 Hz
//! cadence, one position per 100 ms epoch; the file length bounds the
//! scenario duration. Three encodings are accepted: CSV rows of
//! `t,x,y,z` in ECEF meters, CSV rows of `t,lat,lon,height` in degrees
//! and meters, and NMEA GGA sentence streams.

use std::{fs::File, io::BufRead, io::BufReader, path::Path};

use constants::USER_MOTION_SIZE;
use geometry::{Ecef, Location};

/// Errors raised while reading motion input files.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("motion file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("motion file error: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed record at line {0}")]
    Malformed(usize),
    #[error("motion file contains no positions")]
    Empty,
}

/// Reads a user motion file of `t,x,y,z` rows, ECEF meters.
pub fn read_user_motion(path: &Path) -> Result<Vec<Ecef>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut positions = Vec::new();
    for (i, row) in reader.records().enumerate() {
        if positions.len() >= USER_MOTION_SIZE {
            break;
        }
        let row = row?;
        if row.len() < 4 {
            return Err(Error::Malformed(i + 1));
        }
        let mut xyz = [0.0; 3];
        for (k, v) in xyz.iter_mut().enumerate() {
            *v = row[k + 1].parse().map_err(|_| Error::Malformed(i + 1))?;
        }
        positions.push(Ecef::from(&xyz));
    }

    if positions.is_empty() {
        return Err(Error::Empty);
    }
    Ok(positions)
}

/// Reads a user motion file of `t,lat,lon,height` rows, degrees and
/// meters, converting each position to ECEF.
pub fn read_user_motion_llh(path: &Path) -> Result<Vec<Ecef>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut positions = Vec::new();
    for (i, row) in reader.records().enumerate() {
        if positions.len() >= USER_MOTION_SIZE {
            break;
        }
        let row = row?;
        if row.len() < 4 {
            return Err(Error::Malformed(i + 1));
        }
        let lat: f64 = row[1].parse().map_err(|_| Error::Malformed(i + 1))?;
        let lon: f64 = row[2].parse().map_err(|_| Error::Malformed(i + 1))?;
        let hgt: f64 = row[3].parse().map_err(|_| Error::Malformed(i + 1))?;
        let llh = Location::new(lat.to_radians(), lon.to_radians(), hgt);
        positions.push(Ecef::from(&llh));
    }

    if positions.is_empty() {
        return Err(Error::Empty);
    }
    Ok(positions)
}

/// Reads a stream of NMEA GGA sentences, converting each fix to ECEF.
/// Sentences other than GGA are skipped.
pub fn read_nmea_gga(path: &Path) -> Result<Vec<Ecef>, Error> {
    let reader = BufReader::new(File::open(path)?);

    let mut positions = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        if positions.len() >= USER_MOTION_SIZE {
            break;
        }
        let line = line?;
        if let Some(llh) = parse_gga(&line).transpose().map_err(|()| Error::Malformed(i + 1))? {
            positions.push(Ecef::from(&llh));
        }
    }

    if positions.is_empty() {
        return Err(Error::Empty);
    }
    Ok(positions)
}

/// Parses one GGA sentence into a geodetic position. Returns `None`
/// for non-GGA sentences, `Some(Err)` for GGA sentences with malformed
/// fields.
fn parse_gga(line: &str) -> Option<Result<Location, ()>> {
    let sentence = line.trim();
    if !sentence.starts_with("$GP") || !sentence.get(3..6).is_some_and(|id| id == "GGA") {
        return None;
    }

    // Strip the checksum before splitting the fields.
    let body = sentence.split('*').next().unwrap_or(sentence);
    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() < 12 {
        return Some(Err(()));
    }

    let lat = match parse_ddmm(fields[2], fields[3] == "S") {
        Some(v) => v,
        None => return Some(Err(())),
    };
    let lon = match parse_ddmm(fields[4], fields[5] == "W") {
        Some(v) => v,
        None => return Some(Err(())),
    };
    let alt: f64 = match fields[9].parse() {
        Ok(v) => v,
        Err(_) => return Some(Err(())),
    };
    // Ellipsoidal height = orthometric altitude + geoid separation.
    let sep: f64 = fields[11].parse().unwrap_or(0.0);

    Some(Ok(Location::new(
        lat.to_radians(),
        lon.to_radians(),
        alt + sep,
    )))
}

/// Converts NMEA ddmm.mmmm (or dddmm.mmmm) to signed decimal degrees.
fn parse_ddmm(field: &str, negative: bool) -> Option<f64> {
    let value: f64 = field.parse().ok()?;
    let degrees = (value / 100.0).floor();
    let minutes = value - degrees * 100.0;
    let out = degrees + minutes / 60.0;
    Some(if negative { -out } else { out })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use test_case::test_case;

    use super::*;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        std::fs::File::create(&path)
            .unwrap()
            .write_all(contents.as_bytes())
            .unwrap();
        path
    }

    #[test]
    fn ecef_motion_rows_parse_in_order() {
        let path = write_temp(
            "motion_ecef.csv",
            "0.0,-3813477.954,3554276.552,3662785.237\n\
             0.1,-3813478.954,3554276.552,3662785.237\n",
        );
        let positions = read_user_motion(&path).unwrap();
        assert_eq!(positions.len(), 2);
        assert!((positions[0].x + 3_813_477.954).abs() < 1e-6);
        assert!((positions[1].x + 3_813_478.954).abs() < 1e-6);
    }

    #[test]
    fn llh_motion_rows_convert_to_ecef() {
        let path = write_temp(
            "motion_llh.csv",
            "0.0,35.681298,139.766247,10.0\n0.1,35.681298,139.766247,10.0\n",
        );
        let positions = read_user_motion_llh(&path).unwrap();
        assert_eq!(positions.len(), 2);

        let llh = Location::new(
            35.681_298_f64.to_radians(),
            139.766_247_f64.to_radians(),
            10.0,
        );
        let expected = Ecef::from(&llh);
        assert!((positions[0].x - expected.x).abs() < 1e-6);
        assert!((positions[0].y - expected.y).abs() < 1e-6);
        assert!((positions[0].z - expected.z).abs() < 1e-6);
    }

    #[test]
    fn gga_sentences_convert_to_ecef() {
        let path = write_temp(
            "motion.nmea",
            "$GPGSV,3,1,11,18,87,050,48*4A\n\
             $GPGGA,055216.00,3540.8785,N,13945.9758,E,1,09,0.9,10.0,M,39.0,M,,*40\n\
             $GPGGA,055216.10,3540.8785,N,13945.9758,E,1,09,0.9,10.0,M,39.0,M,,*41\n",
        );
        let positions = read_nmea_gga(&path).unwrap();
        assert_eq!(positions.len(), 2);

        let llh = Location::new(
            (35.0 + 40.8785 / 60.0_f64).to_radians(),
            (139.0 + 45.9758 / 60.0_f64).to_radians(),
            49.0,
        );
        let expected = Ecef::from(&llh);
        assert!((positions[0].x - expected.x).abs() < 1e-3);
        assert!((positions[0].y - expected.y).abs() < 1e-3);
        assert!((positions[0].z - expected.z).abs() < 1e-3);
    }

    #[test]
    fn southern_western_hemispheres_are_signed() {
        let path = write_temp(
            "motion_south.nmea",
            "$GPGGA,000000.00,3352.0800,S,15112.5400,W,1,08,1.0,58.0,M,0.0,M,,*5C\n",
        );
        let positions = read_nmea_gga(&path).unwrap();
        let llh = Location::from(&positions[0]);
        let (lat, lon, _) = llh.to_degrees();
        assert!(lat < 0.0);
        assert!(lon < 0.0);
    }

    #[test_case("empty.csv", ""; "empty file")]
    #[test_case("short.csv", "0.0,1.0\n"; "too few fields")]
    #[test_case("alpha.csv", "0.0,a,b,c\n"; "non numeric fields")]
    fn malformed_motion_files_are_rejected(name: &str, contents: &str) {
        let path = write_temp(name, contents);
        assert!(read_user_motion(&path).is_err());
    }
}
