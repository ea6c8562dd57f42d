//! RINEX navigation file parsing.
//!
//! Reads GPS broadcast ephemerides from RINEX version 2 or 3 navigation
//! files, plain or gzip-compressed. The format is fixed-column; numeric
//! fields may use 'D' or 'd' as the exponent designator, which is
//! treated identically to 'E'. The parser produces raw records; turning
//! them into time-indexed ephemeris sets is the consumer's concern.

use std::{
    fs::File,
    io::{BufRead, BufReader, Read},
    path::Path,
};

use flate2::read::GzDecoder;

/// Errors raised while reading a navigation file.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("navigation file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a navigation data file")]
    NotNavigationData,
    #[error("unsupported RINEX version {0}")]
    UnsupportedVersion(f64),
    #[error("missing RINEX header")]
    MissingHeader,
}

/// Navigation file format generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V2,
    V3,
}

/// Calendar epoch of one broadcast record, as written in the file.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct NavEpoch {
    pub y: i32,
    pub m: i32,
    pub d: i32,
    pub hh: i32,
    pub mm: i32,
    pub sec: f64,
}

/// One satellite broadcast record: the eight-line ephemeris block.
///
/// Field names follow the RINEX "BROADCAST ORBIT" layout. Angles are in
/// radians, times in seconds, distances in meters.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NavRecord {
    /// PRN number, 1-32.
    pub prn: usize,
    pub epoch: NavEpoch,
    /// Clock bias, drift and drift rate.
    pub af0: f64,
    pub af1: f64,
    pub af2: f64,
    pub iode: i32,
    pub crs: f64,
    pub deltan: f64,
    pub m0: f64,
    pub cuc: f64,
    pub ecc: f64,
    pub cus: f64,
    pub sqrta: f64,
    /// Time of ephemeris, seconds of GPS week.
    pub toe_sec: f64,
    pub cic: f64,
    pub omg0: f64,
    pub cis: f64,
    pub inc0: f64,
    pub crc: f64,
    pub aop: f64,
    pub omgdot: f64,
    pub idot: f64,
    /// Codes on L2 channel.
    pub code: i32,
    /// GPS week of the time of ephemeris.
    pub toe_week: i32,
    /// L2 P data flag.
    pub flag: i32,
    /// SV accuracy (URA index). Not delivered by version 3 records.
    pub sva: i32,
    /// SV health.
    pub svh: i32,
    /// Group delay.
    pub tgd: f64,
    pub iodc: i32,
    /// Fit interval.
    pub fit: f64,
}

/// Ionosphere and UTC parameters collected from the header.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NavHeader {
    pub version: f64,
    /// "PGM / RUN BY / DATE" creation stamp.
    pub produced: String,
    pub alpha: [f64; 4],
    pub beta: [f64; 4],
    pub a0: f64,
    pub a1: f64,
    /// UTC reference time, seconds of week.
    pub tot: i32,
    /// UTC reference week number.
    pub wnt: i32,
    /// Current leap seconds.
    pub dtls: i32,
    /// Bit set tracking which of the four iono/UTC header blocks were
    /// seen (alpha, beta, UTC, leap).
    flags: u8,
}

impl NavHeader {
    /// True when every ionosphere/UTC block was present and consistent.
    /// The UTC block only counts when `tot` sits on a 4096 s boundary,
    /// which is what the subframe 4 page 18 field can carry.
    pub fn iono_utc_complete(&self) -> bool {
        self.flags == 0x0F
    }
}

/// A parsed navigation file: header parameters plus the broadcast
/// records in file order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NavData {
    pub header: NavHeader,
    pub records: Vec<NavRecord>,
}

/// Extracts a fixed-column field, tolerating short lines.
fn column(line: &str, range: std::ops::Range<usize>) -> &str {
    let start = range.start.min(line.len());
    let end = range.end.min(line.len());
    &line[start..end]
}

/// Parses a fixed-column float. 'D'/'d' exponent designators are
/// rewritten to 'E'; blank fields read as zero, matching the lenient
/// numeric handling broadcast files have always received.
fn parse_float(line: &str, range: std::ops::Range<usize>) -> f64 {
    let field = column(line, range).trim();
    if field.is_empty() {
        return 0.0;
    }
    let cleaned: String = field
        .chars()
        .map(|c| if c == 'D' || c == 'd' { 'E' } else { c })
        .collect();
    cleaned.parse().unwrap_or(0.0)
}

/// Parses a fixed-column integer field, blank reading as zero.
fn parse_int(line: &str, range: std::ops::Range<usize>) -> i32 {
    let field = column(line, range).trim();
    if field.is_empty() {
        return 0;
    }
    field.parse().unwrap_or_else(|_| parse_float_as_int(field))
}

/// Integer fields are occasionally written in floating form
/// (e.g. "6.100000000000E+01" for an IODE of 61).
fn parse_float_as_int(field: &str) -> i32 {
    let cleaned: String = field
        .chars()
        .map(|c| if c == 'D' || c == 'd' { 'E' } else { c })
        .collect();
    cleaned.parse::<f64>().unwrap_or(0.0) as i32
}

/// Opens a navigation file, transparently decompressing gzip content.
fn open_reader(path: &Path) -> Result<Box<dyn BufRead>, Error> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    let n = file.read(&mut magic)?;
    let file = File::open(path)?;
    if n == 2 && magic == [0x1F, 0x8B] {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Reads a whole RINEX navigation file.
///
/// The format generation is taken from the "RINEX VERSION / TYPE"
/// header line; versions up to 2.x parse as fixed-column v2 bodies,
/// 3.x as v3 bodies with the `Gnn` satellite prefix.
pub fn parse_nav_file(path: &Path) -> Result<NavData, Error> {
    let mut lines = open_reader(path)?.lines();
    let header = parse_header(&mut lines)?;
    let version = if header.version < 3.0 { Version::V2 } else { Version::V3 };

    let mut records = Vec::new();
    loop {
        let Some(line) = lines.next() else { break };
        let line = line?;
        match parse_record(&line, &mut lines, version) {
            Some(record) => records.push(record),
            // Trailing partial blocks and non-GPS records are skipped.
            None => continue,
        }
    }

    Ok(NavData { header, records })
}

/// Consumes header lines up to "END OF HEADER".
fn parse_header(
    lines: &mut std::io::Lines<Box<dyn BufRead>>,
) -> Result<NavHeader, Error> {
    let mut header = NavHeader::default();
    let mut saw_version = false;

    for line in lines.by_ref() {
        let line = line?;
        let label = column(&line, 60..80);

        if label.starts_with("COMMENT") {
            continue;
        } else if label.starts_with("END OF HEADER") {
            if !saw_version {
                return Err(Error::MissingHeader);
            }
            return Ok(header);
        } else if label.starts_with("RINEX VERSION / TYPE") {
            header.version = parse_float(&line, 0..9);
            saw_version = true;
            if header.version < 2.0 || header.version >= 4.0 {
                return Err(Error::UnsupportedVersion(header.version));
            }
            let file_type = line.chars().nth(20);
            let system = line.chars().nth(40);
            if file_type != Some('N') && system != Some('G') {
                return Err(Error::NotNavigationData);
            }
        } else if label.starts_with("PGM / RUN BY / DATE") {
            header.produced = column(&line, 40..60).trim().to_string();
        } else if label.starts_with("ION ALPHA") {
            for (i, a) in header.alpha.iter_mut().enumerate() {
                *a = parse_float(&line, 2 + 12 * i..14 + 12 * i);
            }
            header.flags |= 0x1;
        } else if label.starts_with("ION BETA") {
            for (i, b) in header.beta.iter_mut().enumerate() {
                *b = parse_float(&line, 2 + 12 * i..14 + 12 * i);
            }
            header.flags |= 0x1 << 1;
        } else if label.starts_with("DELTA-UTC") {
            header.a0 = parse_float(&line, 3..22);
            header.a1 = parse_float(&line, 22..41);
            header.tot = parse_int(&line, 41..50);
            header.wnt = parse_int(&line, 50..59);
            if header.tot % 4096 == 0 {
                header.flags |= 0x1 << 2;
            }
        } else if label.starts_with("IONOSPHERIC CORR") {
            if line.starts_with("GPSA") {
                for (i, a) in header.alpha.iter_mut().enumerate() {
                    *a = parse_float(&line, 5 + 12 * i..17 + 12 * i);
                }
                header.flags |= 0x1;
            } else if line.starts_with("GPSB") {
                for (i, b) in header.beta.iter_mut().enumerate() {
                    *b = parse_float(&line, 5 + 12 * i..17 + 12 * i);
                }
                header.flags |= 0x1 << 1;
            }
        } else if label.starts_with("TIME SYSTEM CORR") && line.starts_with("GPUT") {
            header.a0 = parse_float(&line, 5..22);
            header.a1 = parse_float(&line, 22..38);
            header.tot = parse_int(&line, 38..45);
            header.wnt = parse_int(&line, 45..51);
            if header.tot % 4096 == 0 {
                header.flags |= 0x1 << 2;
            }
        } else if label.starts_with("LEAP SECONDS") {
            header.dtls = parse_int(&line, 0..6);
            header.flags |= 0x1 << 3;
        }
    }

    Err(Error::MissingHeader)
}

/// Parses one eight-line broadcast block starting at `first`. Returns
/// `None` for records of other systems and for blocks truncated by the
/// end of the file.
fn parse_record(
    first: &str,
    lines: &mut std::io::Lines<Box<dyn BufRead>>,
    version: Version,
) -> Option<NavRecord> {
    let mut rec = NavRecord::default();

    // Column offset of the first numeric field on each line.
    let ofs = match version {
        Version::V2 => {
            rec.prn = column(first, 0..2).trim().parse().ok()?;
            rec.epoch = NavEpoch {
                y: parse_int(first, 3..5) + 2000,
                m: parse_int(first, 6..8),
                d: parse_int(first, 9..11),
                hh: parse_int(first, 12..14),
                mm: parse_int(first, 15..17),
                sec: parse_float(first, 18..22),
            };
            rec.af0 = parse_float(first, 22..41);
            rec.af1 = parse_float(first, 41..60);
            rec.af2 = parse_float(first, 60..79);
            3
        }
        Version::V3 => {
            if !first.starts_with('G') {
                return None;
            }
            rec.prn = column(first, 1..3).trim().parse().ok()?;
            rec.epoch = NavEpoch {
                y: parse_int(first, 4..8),
                m: parse_int(first, 9..11),
                d: parse_int(first, 12..14),
                hh: parse_int(first, 15..17),
                mm: parse_int(first, 18..20),
                sec: parse_float(first, 21..23),
            };
            rec.af0 = parse_float(first, 23..42);
            rec.af1 = parse_float(first, 42..61);
            rec.af2 = parse_float(first, 61..80);
            4
        }
    };
    if rec.prn == 0 || rec.prn > 32 {
        return None;
    }

    let mut next = || -> Option<String> { lines.next()?.ok() };

    // BROADCAST ORBIT - 1
    let line = next()?;
    rec.iode = parse_int(&line, ofs..ofs + 19);
    rec.crs = parse_float(&line, ofs + 19..ofs + 38);
    rec.deltan = parse_float(&line, ofs + 38..ofs + 57);
    rec.m0 = parse_float(&line, ofs + 57..ofs + 76);

    // BROADCAST ORBIT - 2
    let line = next()?;
    rec.cuc = parse_float(&line, ofs..ofs + 19);
    rec.ecc = parse_float(&line, ofs + 19..ofs + 38);
    rec.cus = parse_float(&line, ofs + 38..ofs + 57);
    rec.sqrta = parse_float(&line, ofs + 57..ofs + 76);

    // BROADCAST ORBIT - 3
    let line = next()?;
    rec.toe_sec = parse_float(&line, ofs..ofs + 19);
    rec.cic = parse_float(&line, ofs + 19..ofs + 38);
    rec.omg0 = parse_float(&line, ofs + 38..ofs + 57);
    rec.cis = parse_float(&line, ofs + 57..ofs + 76);

    // BROADCAST ORBIT - 4
    let line = next()?;
    rec.inc0 = parse_float(&line, ofs..ofs + 19);
    rec.crc = parse_float(&line, ofs + 19..ofs + 38);
    rec.aop = parse_float(&line, ofs + 38..ofs + 57);
    rec.omgdot = parse_float(&line, ofs + 57..ofs + 76);

    // BROADCAST ORBIT - 5
    let line = next()?;
    rec.idot = parse_float(&line, ofs..ofs + 19);
    rec.code = parse_int(&line, ofs + 19..ofs + 38);
    rec.toe_week = parse_int(&line, ofs + 38..ofs + 57);
    rec.flag = parse_int(&line, ofs + 57..ofs + 76);

    // BROADCAST ORBIT - 6
    let line = next()?;
    if version == Version::V2 {
        rec.sva = parse_int(&line, ofs..ofs + 19);
    }
    rec.svh = parse_int(&line, ofs + 19..ofs + 38);
    rec.tgd = parse_float(&line, ofs + 38..ofs + 57);
    rec.iodc = parse_int(&line, ofs + 57..ofs + 76);

    // BROADCAST ORBIT - 7
    let line = next()?;
    rec.fit = parse_float(&line, ofs + 19..ofs + 38);

    Some(rec)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use test_case::test_case;

    use super::*;

    const V2_HEADER: &str = "\
     2.10           N: GPS NAV DATA                         RINEX VERSION / TYPE
CCRINEXN V1.6.0 UX  CDDIS               03-JAN-22 00:07     PGM / RUN BY / DATE
    0.1118D-07  0.2235D-07 -0.5960D-07 -0.1192D-06          ION ALPHA
    0.1167D+06  0.1802D+06 -0.1311D+06 -0.4588D+06          ION BETA
    0.931322574615D-09 0.621724893790D-14   319488     2190 DELTA-UTC: A0,A1,T,W
    18                                                      LEAP SECONDS
                                                            END OF HEADER
";

    const V2_BLOCK_TRUNCATED: &str = "\
 1 22  1  1  0  0  0.0 0.442961603403D-03 0.102318153950D-11 0.000000000000D+00
    0.610000000000D+02-0.137500000000D+02 0.441625541738D-08 0.112532911417D+01
   -0.805780291557D-06 0.112367037218D-01 0.794231891632D-05 0.515369703293D+04
";

    fn v2_block(exp: char) -> String {
        let block = "\
 1 22  1  1  0  0  0.0 0.442961603403E-03 0.102318153950E-11 0.000000000000E+00
    0.610000000000E+02-0.137500000000E+02 0.441625541738E-08 0.112532911417E+01
   -0.805780291557E-06 0.112367037218E-01 0.794231891632E-05 0.515369703293E+04
    0.518400000000E+06 0.782310962677E-07-0.259457954949E+01-0.745058059692E-08
    0.958725348908E+00 0.244093750000E+03 0.829880519449E+00-0.803497612653E-08
    0.403945397209E-09 0.100000000000E+01 0.219000000000E+04 0.000000000000E+00
    0.200000000000E+01 0.000000000000E+00 0.465661287308E-09 0.610000000000E+02
    0.518400000000E+06 0.400000000000E+01 0.000000000000E+00 0.000000000000E+00
";
        block.replace('E', &exp.to_string())
    }

    fn write_temp(name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        std::fs::File::create(&path)
            .unwrap()
            .write_all(contents)
            .unwrap();
        path
    }

    #[test_case('E'; "standard exponents")]
    #[test_case('D'; "fortran exponents")]
    #[test_case('d'; "lowercase fortran exponents")]
    fn v2_exponent_designators_are_equivalent(exp: char) {
        let contents = format!("{V2_HEADER}{}", v2_block(exp));
        let path = write_temp(&format!("nav_v2_{exp}.rnx"), contents.as_bytes());
        let nav = parse_nav_file(&path).unwrap();

        assert_eq!(nav.records.len(), 1);
        let rec = &nav.records[0];
        assert_eq!(rec.prn, 1);
        assert_eq!(rec.epoch.y, 2022);
        assert!((rec.af0 - 0.442_961_603_403e-3).abs() < 1e-18);
        assert_eq!(rec.iode, 61);
        assert!((rec.crs + 13.75).abs() < 1e-9);
        assert!((rec.ecc - 0.011_236_703_721_8).abs() < 1e-15);
        assert!((rec.sqrta - 5153.697_032_93).abs() < 1e-6);
        assert!((rec.toe_sec - 518_400.0).abs() < 1e-6);
        assert_eq!(rec.toe_week, 2190);
        assert_eq!(rec.svh, 0);
        assert_eq!(rec.iodc, 61);
        assert!((rec.fit - 4.0).abs() < 1e-9);
    }

    #[test]
    fn v2_header_iono_utc_is_complete() {
        let contents = format!("{V2_HEADER}{}", v2_block('D'));
        let path = write_temp("nav_v2_header.rnx", contents.as_bytes());
        let nav = parse_nav_file(&path).unwrap();

        assert!(nav.header.iono_utc_complete());
        assert!((nav.header.alpha[0] - 0.1118e-7).abs() < 1e-18);
        assert!((nav.header.beta[3] + 0.4588e6).abs() < 1e-3);
        assert_eq!(nav.header.tot, 319_488);
        assert_eq!(nav.header.wnt, 2190);
        assert_eq!(nav.header.dtls, 18);
    }

    #[test]
    fn missing_leap_seconds_leaves_iono_utc_incomplete() {
        let header: String = V2_HEADER
            .lines()
            .filter(|l| !l.contains("LEAP SECONDS"))
            .map(|l| format!("{l}\n"))
            .collect();
        let contents = format!("{header}{}", v2_block('E'));
        let path = write_temp("nav_v2_noleap.rnx", contents.as_bytes());
        let nav = parse_nav_file(&path).unwrap();
        assert!(!nav.header.iono_utc_complete());
    }

    #[test]
    fn truncated_trailing_block_is_dropped_silently() {
        let contents = format!("{V2_HEADER}{V2_BLOCK_TRUNCATED}");
        let path = write_temp("nav_v2_trunc.rnx", contents.as_bytes());
        let nav = parse_nav_file(&path).unwrap();
        assert!(nav.records.is_empty());
    }

    #[test]
    fn gzip_content_parses_transparently() {
        let contents = format!("{V2_HEADER}{}", v2_block('D'));
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        enc.write_all(contents.as_bytes()).unwrap();
        let path = write_temp("nav_v2.rnx.gz", &enc.finish().unwrap());

        let nav = parse_nav_file(&path).unwrap();
        assert_eq!(nav.records.len(), 1);
        assert_eq!(nav.records[0].toe_week, 2190);
    }

    #[test]
    fn v3_records_parse_with_system_prefix() {
        let contents = "\
     3.04           N: GNSS NAV DATA    G: GPS              RINEX VERSION / TYPE
GPSA   0.1118E-07  0.2235E-07 -0.5960E-07 -0.1192E-06       IONOSPHERIC CORR
GPSB   0.1167E+06  0.1802E+06 -0.1311E+06 -0.4588E+06       IONOSPHERIC CORR
GPUT  0.9313225746E-09 0.621724894E-14 319488 2190          TIME SYSTEM CORR
    18                                                      LEAP SECONDS
                                                            END OF HEADER
G01 2022 01 01 00 00 00 0.442961603403E-03 0.102318153950E-11 0.000000000000E+00
     0.610000000000E+02-0.137500000000E+02 0.441625541738E-08 0.112532911417E+01
    -0.805780291557E-06 0.112367037218E-01 0.794231891632E-05 0.515369703293E+04
     0.518400000000E+06 0.782310962677E-07-0.259457954949E+01-0.745058059692E-08
     0.958725348908E+00 0.244093750000E+03 0.829880519449E+00-0.803497612653E-08
     0.403945397209E-09 0.100000000000E+01 0.219000000000E+04 0.000000000000E+00
     0.200000000000E+01 0.000000000000E+00 0.465661287308E-09 0.610000000000E+02
     0.518400000000E+06 0.400000000000E+01 0.000000000000E+00 0.000000000000E+00
R01 2022 01 01 00 00 00 0.0 0.0 0.0
";
        let path = write_temp("nav_v3.rnx", contents.as_bytes());
        let nav = parse_nav_file(&path).unwrap();

        assert!(nav.header.iono_utc_complete());
        assert_eq!(nav.records.len(), 1);
        let rec = &nav.records[0];
        assert_eq!(rec.prn, 1);
        assert_eq!(rec.epoch.y, 2022);
        assert_eq!(rec.toe_week, 2190);
        // Version 3 does not deliver the accuracy index.
        assert_eq!(rec.sva, 0);
    }

    #[test]
    fn observation_files_are_rejected() {
        let contents = "\
     2.10           O: OBSERVATION DATA                     RINEX VERSION / TYPE
                                                            END OF HEADER
";
        let path = write_temp("obs_v2.rnx", contents.as_bytes());
        assert!(matches!(
            parse_nav_file(&path),
            Err(Error::NotNavigationData)
        ));
    }
}
