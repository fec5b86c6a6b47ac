//! Geographic primitives: points, polygons and GPS positions.
//!
//! Geometry is stored in the local cache as a compact little-endian blob:
//!
//! | bytes | content |
//! |-------|---------|
//! | 0 | tag (`0x01` point, `0x03` polygon) |
//! | point | `x` = longitude (f64), `y` = latitude (f64) |
//! | polygon | vertex count (u32), then `count` points |

use bytes::{Buf, BufMut};
use time::OffsetDateTime;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

const TAG_POINT: u8 = 0x01;
const TAG_POLYGON: u8 = 0x03;
const POINT_BYTES: usize = 16;

/// A WGS84 coordinate pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point {
    /// Latitude in degrees, positive north.
    pub latitude: f64,
    /// Longitude in degrees, positive east.
    pub longitude: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check the coordinate is on the globe.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to `other` in meters (haversine).
    ///
    /// ```
    /// use wm_types::Point;
    ///
    /// let a = Point::new(44.9, -93.2);
    /// assert_eq!(a.distance_to(&a), 0.0);
    /// let b = Point::new(45.9, -93.2);
    /// assert!((a.distance_to(&b) - 111_195.0).abs() < 100.0);
    /// ```
    #[must_use]
    pub fn distance_to(&self, other: &Point) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.put_f64_le(self.longitude);
        buf.put_f64_le(self.latitude);
    }

    fn read(buf: &mut &[u8]) -> ParseResult<Self> {
        if buf.remaining() < POINT_BYTES {
            return Err(ParseError::InsufficientBytes {
                expected: POINT_BYTES,
                actual: buf.remaining(),
            });
        }
        let longitude = buf.get_f64_le();
        let latitude = buf.get_f64_le();
        Ok(Self::new(latitude, longitude))
    }
}

/// Geometry attached to a feature.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "type", content = "coordinates", rename_all = "snake_case")
)]
pub enum Geometry {
    /// A single location.
    Point(Point),
    /// A closed ring; the closing vertex may be omitted.
    Polygon(Vec<Point>),
}

impl Geometry {
    /// Representative point: the point itself, or the vertex mean of a ring.
    #[must_use]
    pub fn centroid(&self) -> Option<Point> {
        match self {
            Geometry::Point(p) => Some(*p),
            Geometry::Polygon(ring) if ring.is_empty() => None,
            Geometry::Polygon(ring) => {
                let n = ring.len() as f64;
                let lat = ring.iter().map(|p| p.latitude).sum::<f64>() / n;
                let lon = ring.iter().map(|p| p.longitude).sum::<f64>() / n;
                Some(Point::new(lat, lon))
            }
        }
    }

    /// Whether `point` lies inside the geometry (always false for points).
    #[must_use]
    pub fn contains(&self, point: &Point) -> bool {
        let Geometry::Polygon(ring) = self else {
            return false;
        };
        if ring.len() < 3 {
            return false;
        }

        // Ray casting in lon/lat space.
        let (x, y) = (point.longitude, point.latitude);
        let mut inside = false;
        let mut j = ring.len() - 1;
        for i in 0..ring.len() {
            let (xi, yi) = (ring[i].longitude, ring[i].latitude);
            let (xj, yj) = (ring[j].longitude, ring[j].latitude);
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// Distance in meters from `point` to the geometry; zero when inside a polygon.
    ///
    /// Polygon edges are measured in a local equirectangular projection
    /// centred on `point`, which is accurate at fence scale.
    #[must_use]
    pub fn distance_to(&self, point: &Point) -> f64 {
        match self {
            Geometry::Point(p) => p.distance_to(point),
            Geometry::Polygon(ring) => {
                if ring.is_empty() {
                    return f64::INFINITY;
                }
                if self.contains(point) {
                    return 0.0;
                }
                let project = |p: &Point| -> (f64, f64) {
                    let x = (p.longitude - point.longitude).to_radians()
                        * point.latitude.to_radians().cos()
                        * EARTH_RADIUS_M;
                    let y = (p.latitude - point.latitude).to_radians() * EARTH_RADIUS_M;
                    (x, y)
                };
                let mut best = f64::INFINITY;
                for (i, a) in ring.iter().enumerate() {
                    let b = &ring[(i + 1) % ring.len()];
                    best = best.min(origin_to_segment(project(a), project(b)));
                }
                best
            }
        }
    }

    /// Encode as a geometry blob.
    #[must_use]
    pub fn to_blob(&self) -> Vec<u8> {
        match self {
            Geometry::Point(p) => {
                let mut buf = Vec::with_capacity(1 + POINT_BYTES);
                buf.put_u8(TAG_POINT);
                p.write(&mut buf);
                buf
            }
            Geometry::Polygon(ring) => {
                let mut buf = Vec::with_capacity(5 + POINT_BYTES * ring.len());
                buf.put_u8(TAG_POLYGON);
                buf.put_u32_le(ring.len() as u32);
                for p in ring {
                    p.write(&mut buf);
                }
                buf
            }
        }
    }

    /// Decode a geometry blob produced by [`Geometry::to_blob`].
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InsufficientBytes`] for truncated input and
    /// [`ParseError::UnknownGeometryTag`] for an unrecognised tag.
    pub fn from_blob(data: &[u8]) -> ParseResult<Self> {
        let mut buf = data;
        if !buf.has_remaining() {
            return Err(ParseError::InsufficientBytes {
                expected: 1,
                actual: 0,
            });
        }
        match buf.get_u8() {
            TAG_POINT => Ok(Geometry::Point(Point::read(&mut buf)?)),
            TAG_POLYGON => {
                if buf.remaining() < 4 {
                    return Err(ParseError::InsufficientBytes {
                        expected: 5,
                        actual: data.len(),
                    });
                }
                let count = buf.get_u32_le() as usize;
                let expected = count * POINT_BYTES;
                if buf.remaining() < expected {
                    return Err(ParseError::InsufficientBytes {
                        expected: 5 + expected,
                        actual: data.len(),
                    });
                }
                let ring = (0..count)
                    .map(|_| Point::read(&mut buf))
                    .collect::<ParseResult<Vec<_>>>()?;
                Ok(Geometry::Polygon(ring))
            }
            tag => Err(ParseError::UnknownGeometryTag(tag)),
        }
    }
}

fn origin_to_segment(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (-(a.0 * dx + a.1 * dy) / len2).clamp(0.0, 1.0)
    };
    let (px, py) = (a.0 + t * dx, a.1 + t * dy);
    (px * px + py * py).sqrt()
}

/// A GPS fix delivered to the geofence monitor.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Position {
    /// Reported location.
    pub point: Point,
    /// Horizontal accuracy in meters, if the receiver reports one.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub accuracy: Option<f64>,
    /// When the fix was taken.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

impl Position {
    /// A fix at `point` taken now.
    #[must_use]
    pub fn now(point: Point) -> Self {
        Self {
            point,
            accuracy: None,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn square() -> Geometry {
        Geometry::Polygon(vec![
            Point::new(44.0, -94.0),
            Point::new(44.0, -93.0),
            Point::new(45.0, -93.0),
            Point::new(45.0, -94.0),
        ])
    }

    #[test]
    fn test_point_blob_roundtrip() {
        let g = Geometry::Point(Point::new(44.9, -93.2));
        let blob = g.to_blob();
        assert_eq!(blob.len(), 17);
        assert_eq!(blob[0], TAG_POINT);
        assert_eq!(Geometry::from_blob(&blob).unwrap(), g);
    }

    #[test]
    fn test_polygon_blob_roundtrip() {
        let g = square();
        assert_eq!(Geometry::from_blob(&g.to_blob()).unwrap(), g);
    }

    #[test]
    fn test_blob_truncated() {
        let blob = Geometry::Point(Point::new(1.0, 2.0)).to_blob();
        let err = Geometry::from_blob(&blob[..10]).unwrap_err();
        assert!(matches!(err, ParseError::InsufficientBytes { .. }));
        assert!(Geometry::from_blob(&[]).is_err());
    }

    #[test]
    fn test_blob_unknown_tag() {
        assert_eq!(
            Geometry::from_blob(&[0x7F, 0, 0]),
            Err(ParseError::UnknownGeometryTag(0x7F))
        );
    }

    #[test]
    fn test_polygon_contains() {
        let g = square();
        assert!(g.contains(&Point::new(44.5, -93.5)));
        assert!(!g.contains(&Point::new(46.0, -93.5)));
        assert_eq!(g.distance_to(&Point::new(44.5, -93.5)), 0.0);
    }

    #[test]
    fn test_polygon_edge_distance() {
        // One hundredth of a degree of latitude north of the top edge.
        let g = square();
        let d = g.distance_to(&Point::new(45.01, -93.5));
        assert!((d - 1112.0).abs() < 5.0, "distance was {d}");
    }

    #[test]
    fn test_centroid() {
        assert_eq!(square().centroid(), Some(Point::new(44.5, -93.5)));
        assert_eq!(Geometry::Polygon(vec![]).centroid(), None);
    }

    #[test]
    fn test_point_validity() {
        assert!(Point::new(44.9, -93.2).is_valid());
        assert!(!Point::new(91.0, 0.0).is_valid());
        assert!(!Point::new(f64::NAN, 0.0).is_valid());
    }

    proptest! {
        #[test]
        fn distance_is_symmetric(
            lat1 in -89.0f64..89.0, lon1 in -179.0f64..179.0,
            lat2 in -89.0f64..89.0, lon2 in -179.0f64..179.0,
        ) {
            let a = Point::new(lat1, lon1);
            let b = Point::new(lat2, lon2);
            prop_assert!((a.distance_to(&b) - b.distance_to(&a)).abs() < 1e-6);
            prop_assert!(a.distance_to(&b) >= 0.0);
        }
    }
}
