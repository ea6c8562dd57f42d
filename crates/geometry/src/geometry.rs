//! Geodetic coordinate transformations for GPS signal simulation.
//!
//! Provides the WGS-84 conversions between Earth-centered Earth-fixed
//! (ECEF) and geodetic coordinates, the local-tangent frame used to turn
//! a line-of-sight vector into azimuth and elevation, and the small
//! vector helpers the range computations build on.

use std::f64::consts::PI;

use constants::{WGS84_ECCENTRICITY, WGS84_RADIUS};

/// Errors reported when validating externally supplied coordinates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Geodetic latitude outside [-90, 90] degrees.
    #[error("latitude {0} is outside [-90, 90] degrees")]
    InvalidLatitude(f64),
    /// Geodetic longitude outside [-180, 180] degrees.
    #[error("longitude {0} is outside [-180, 180] degrees")]
    InvalidLongitude(f64),
}

/// Position or vector in Earth-centered Earth-fixed coordinates, meters.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Ecef {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Ecef {
    /// Creates an ECEF vector from its components.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm of the vector.
    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Dot product with another vector.
    pub fn dot(&self, other: &Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }
}

impl std::ops::Sub for Ecef {
    type Output = Ecef;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

impl std::ops::Add for Ecef {
    type Output = Ecef;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            z: self.z + rhs.z,
        }
    }
}

impl From<&[f64; 3]> for Ecef {
    fn from(xyz: &[f64; 3]) -> Self {
        Self::new(xyz[0], xyz[1], xyz[2])
    }
}

/// Geodetic position: latitude and longitude in radians, height in
/// meters above the WGS-84 ellipsoid.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub hgt: f64,
}

impl Location {
    /// Creates a location from latitude/longitude in radians.
    pub const fn new(lat: f64, lon: f64, hgt: f64) -> Self {
        Self { lat, lon, hgt }
    }

    /// Creates a location from latitude/longitude in degrees, with range
    /// validation.
    pub fn from_degrees(lat: f64, lon: f64, hgt: f64) -> Result<Self, Error> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(Error::InvalidLatitude(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(Error::InvalidLongitude(lon));
        }
        Ok(Self::new(lat.to_radians(), lon.to_radians(), hgt))
    }

    /// Latitude and longitude in degrees, height in meters.
    pub fn to_degrees(self) -> (f64, f64, f64) {
        (self.lat.to_degrees(), self.lon.to_degrees(), self.hgt)
    }
}

impl From<&[f64; 3]> for Location {
    fn from(llh: &[f64; 3]) -> Self {
        Self::new(llh[0], llh[1], llh[2])
    }
}

impl From<&Location> for Ecef {
    /// Converts geodetic coordinates to ECEF.
    fn from(llh: &Location) -> Self {
        let a = WGS84_RADIUS;
        let e = WGS84_ECCENTRICITY;
        let e2 = e * e;

        let clat = llh.lat.cos();
        let slat = llh.lat.sin();
        let clon = llh.lon.cos();
        let slon = llh.lon.sin();
        let d = e * slat;

        let n = a / (1.0 - d * d).sqrt();
        let nph = n + llh.hgt;

        let tmp = nph * clat;
        Self {
            x: tmp * clon,
            y: tmp * slon,
            z: ((1.0 - e2) * n + llh.hgt) * slat,
        }
    }
}

impl From<&Ecef> for Location {
    /// Converts ECEF coordinates to geodetic coordinates by iterating on
    /// the ellipsoidal height correction until it settles below one
    /// millimeter.
    fn from(xyz: &Ecef) -> Self {
        let a = WGS84_RADIUS;
        let e = WGS84_ECCENTRICITY;
        let e2 = e * e;
        let eps = 1.0e-3;

        if xyz.norm() < eps {
            // Invalid ECEF vector
            return Self::new(0.0, 0.0, -a);
        }

        let rho2 = xyz.x * xyz.x + xyz.y * xyz.y;
        let mut dz = e2 * xyz.z;
        let (mut zdz, mut nh, mut n);

        loop {
            zdz = xyz.z + dz;
            nh = (rho2 + zdz * zdz).sqrt();
            let slat = zdz / nh;
            n = a / (1.0 - e2 * slat * slat).sqrt();
            let dz_new = n * e2 * slat;

            if (dz - dz_new).abs() < eps {
                break;
            }
            dz = dz_new;
        }

        Self {
            lat: zdz.atan2(rho2.sqrt()),
            lon: xyz.y.atan2(xyz.x),
            hgt: nh - n,
        }
    }
}

/// Line-of-sight vector expressed in the local North-East-Up frame.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Neu {
    pub n: f64,
    pub e: f64,
    pub u: f64,
}

impl Neu {
    pub const fn new(n: f64, e: f64, u: f64) -> Self {
        Self { n, e, u }
    }

    /// Converts the vector to azimuth and elevation. Azimuth is measured
    /// clockwise from North and normalized to [0, 2*pi).
    pub fn azel(&self) -> Azel {
        let mut az = self.e.atan2(self.n);
        if az < 0.0 {
            az += 2.0 * PI;
        }
        let ne = (self.n * self.n + self.e * self.e).sqrt();
        Azel {
            az,
            el: self.u.atan2(ne),
        }
    }
}

/// Azimuth and elevation angles in radians.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Azel {
    pub az: f64,
    pub el: f64,
}

/// Rotation matrix from ECEF into the local North-East-Up tangent frame
/// at a given geodetic position.
#[derive(Debug, Clone, Copy)]
pub struct LocalTangent {
    t: [[f64; 3]; 3],
}

impl LocalTangent {
    /// Builds the tangent-frame basis at `llh`.
    pub fn new(llh: &Location) -> Self {
        let slat = llh.lat.sin();
        let clat = llh.lat.cos();
        let slon = llh.lon.sin();
        let clon = llh.lon.cos();

        Self {
            t: [
                [-slat * clon, -slat * slon, clat],
                [-slon, clon, 0.0],
                [clat * clon, clat * slon, slat],
            ],
        }
    }

    /// Rotates an ECEF vector into the local NEU frame.
    pub fn ecef_to_neu(&self, v: &Ecef) -> Neu {
        let t = &self.t;
        Neu {
            n: t[0][0] * v.x + t[0][1] * v.y + t[0][2] * v.z,
            e: t[1][0] * v.x + t[1][1] * v.y + t[1][2] * v.z,
            u: t[2][0] * v.x + t[2][1] * v.y + t[2][2] * v.z,
        }
    }

    /// Rotates a local NEU offset back into an ECEF displacement. Used
    /// to advance the receiver by a heading/speed step or to place a
    /// target at distance and bearing from the reference position.
    pub fn neu_to_ecef(&self, neu: &Neu) -> Ecef {
        let t = &self.t;
        Ecef {
            x: t[0][0] * neu.n + t[1][0] * neu.e + t[2][0] * neu.u,
            y: t[0][1] * neu.n + t[1][1] * neu.e + t[2][1] * neu.u,
            z: t[0][2] * neu.n + t[1][2] * neu.e + t[2][2] * neu.u,
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(35.681_298, 139.766_247, 10.0; "tokyo")]
    #[test_case(0.0, 0.0, 0.0; "equator prime meridian")]
    #[test_case(-33.868, 151.209, 58.0; "sydney")]
    #[test_case(89.9, -135.0, 2000.0; "near north pole")]
    #[test_case(-89.9, 45.0, -400.0; "near south pole")]
    #[test_case(51.477, 0.0, 10_000.0; "high altitude")]
    fn llh_ecef_round_trip(lat: f64, lon: f64, hgt: f64) {
        let llh = Location::from_degrees(lat, lon, hgt).unwrap();
        let xyz = Ecef::from(&llh);
        let back = Location::from(&xyz);

        // Sub-millimeter agreement after the round trip.
        let north_err = (back.lat - llh.lat).abs() * WGS84_RADIUS;
        let east_err = (back.lon - llh.lon).abs() * WGS84_RADIUS;
        assert!(north_err < 1e-3, "latitude error {north_err} m");
        assert!(east_err < 1e-3, "longitude error {east_err} m");
        assert!((back.hgt - llh.hgt).abs() < 1e-3);
    }

    #[test]
    fn degenerate_ecef_maps_to_ellipsoid_center() {
        let llh = Location::from(&Ecef::default());
        assert_eq!(llh.lat, 0.0);
        assert_eq!(llh.lon, 0.0);
        assert_eq!(llh.hgt, -WGS84_RADIUS);
    }

    #[test_case(1.0, 0.0, 0.0, 0.0; "due north")]
    #[test_case(0.0, 1.0, 0.0, 90.0; "due east")]
    #[test_case(-1.0, 0.0, 0.0, 180.0; "due south")]
    #[test_case(0.0, -1.0, 0.0, 270.0; "due west")]
    fn azimuth_is_normalized(n: f64, e: f64, u: f64, expected_deg: f64) {
        let azel = Neu::new(n, e, u).azel();
        assert!((azel.az.to_degrees() - expected_deg).abs() < 1e-9);
        assert!(azel.az >= 0.0 && azel.az < 2.0 * PI);
    }

    #[test]
    fn zenith_elevation() {
        let azel = Neu::new(0.0, 0.0, 1.0).azel();
        assert!((azel.el - PI / 2.0).abs() < 1e-12);
    }

    #[test]
    fn tangent_frame_round_trips_vectors() {
        let llh = Location::from_degrees(48.0, 11.0, 500.0).unwrap();
        let t = LocalTangent::new(&llh);
        let v = Ecef::new(123.0, -456.0, 789.0);
        let neu = t.ecef_to_neu(&v);
        let back = t.neu_to_ecef(&neu);
        assert!((back.x - v.x).abs() < 1e-9);
        assert!((back.y - v.y).abs() < 1e-9);
        assert!((back.z - v.z).abs() < 1e-9);
    }

    #[test]
    fn up_axis_points_away_from_earth() {
        let llh = Location::from_degrees(35.0, 139.0, 0.0).unwrap();
        let xyz = Ecef::from(&llh);
        let t = LocalTangent::new(&llh);
        let neu = t.ecef_to_neu(&xyz);
        // At the surface the position vector is almost entirely "up";
        // the small north residual is the geodetic/geocentric latitude
        // difference over the ellipsoid.
        assert!(neu.u > 6.3e6);
        assert!(neu.n.abs() < 2.5e4);
        assert!(neu.e.abs() < 1e-6);
    }

    #[test]
    fn invalid_degrees_are_rejected() {
        assert!(Location::from_degrees(91.0, 0.0, 0.0).is_err());
        assert!(Location::from_degrees(0.0, 181.0, 0.0).is_err());
    }
}
