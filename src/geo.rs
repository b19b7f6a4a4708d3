//! Geohash encoding and range-query bounds for radius searches.
//!
//! A radius search is answered by issuing one `[start, end]` string-range
//! query per bound pair and then discarding the false positives that share a
//! hash prefix but lie outside the radius (`distance_between`).

use crate::model::Coordinates;

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";
const BITS_PER_CHAR: u32 = 5;
const DEFAULT_PRECISION: usize = 10;
const MAXIMUM_BITS_PRECISION: f64 = 22.0 * BITS_PER_CHAR as f64;
const EARTH_MERI_CIRCUMFERENCE: f64 = 40_007_860.0;
const METERS_PER_DEGREE_LATITUDE: f64 = 110_574.0;
const EARTH_EQ_RADIUS: f64 = 6_378_137.0;
const EARTH_MEAN_RADIUS_KM: f64 = 6_371.0;
const E2: f64 = 0.006_694_478_197_99;
const EPSILON: f64 = 1e-12;

pub type GeohashBound = (String, String);

pub fn geohash_for_location(location: Coordinates) -> String {
    geohash_with_precision(location, DEFAULT_PRECISION)
}

pub fn geohash_with_precision(location: Coordinates, precision: usize) -> String {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lng_range = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(precision);
    let mut value = 0usize;
    let mut bits = 0u32;
    let mut even = true;

    while hash.len() < precision {
        let (val, range) = if even {
            (location.lng, &mut lng_range)
        } else {
            (location.lat, &mut lat_range)
        };
        let mid = (range.0 + range.1) / 2.0;
        if val > mid {
            value = (value << 1) + 1;
            range.0 = mid;
        } else {
            value <<= 1;
            range.1 = mid;
        }
        even = !even;
        bits += 1;
        if bits == BITS_PER_CHAR {
            hash.push(BASE32[value] as char);
            bits = 0;
            value = 0;
        }
    }
    hash
}

/// Great-circle distance in kilometres.
pub fn distance_between(a: Coordinates, b: Coordinates) -> f64 {
    let lat_delta = (b.lat - a.lat).to_radians();
    let lng_delta = (b.lng - a.lng).to_radians();
    let h = (lat_delta / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (lng_delta / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_MEAN_RADIUS_KM * c
}

/// Range bounds covering a circle of `radius_m` metres around `center`.
/// Usually four pairs, at most nine; duplicates are removed.
pub fn geohash_query_bounds(center: Coordinates, radius_m: f64) -> Vec<GeohashBound> {
    let query_bits = bounding_box_bits(center, radius_m).max(1);
    let precision = (query_bits as f64 / BITS_PER_CHAR as f64).ceil() as usize;
    let mut bounds: Vec<GeohashBound> = Vec::new();
    for point in bounding_box_coordinates(center, radius_m) {
        let bound = geohash_query(&geohash_with_precision(point, precision), query_bits);
        if !bounds.contains(&bound) {
            bounds.push(bound);
        }
    }
    bounds
}

fn geohash_query(geohash: &str, bits: u32) -> GeohashBound {
    let precision = (bits as f64 / BITS_PER_CHAR as f64).ceil() as usize;
    if geohash.len() < precision {
        return (geohash.to_string(), format!("{geohash}~"));
    }
    let ghash = &geohash[..precision];
    let base = &ghash[..ghash.len() - 1];
    let last = ghash.as_bytes()[ghash.len() - 1];
    let last_value = BASE32.iter().position(|&c| c == last).unwrap_or(0);
    let significant_bits = bits - (base.len() as u32 * BITS_PER_CHAR);
    let unused_bits = BITS_PER_CHAR - significant_bits;
    let start_value = (last_value >> unused_bits) << unused_bits;
    let end_value = start_value + (1 << unused_bits);
    let start = format!("{base}{}", BASE32[start_value] as char);
    if end_value > 31 {
        (start, format!("{base}~"))
    } else {
        (start, format!("{base}{}", BASE32[end_value] as char))
    }
}

fn bounding_box_bits(center: Coordinates, size: f64) -> u32 {
    let lat_delta = size / METERS_PER_DEGREE_LATITUDE;
    let north = (center.lat + lat_delta).min(90.0);
    let south = (center.lat - lat_delta).max(-90.0);
    let bits_lat = latitude_bits_for_resolution(size).floor() * 2.0;
    let bits_long_north = longitude_bits_for_resolution(size, north).floor() * 2.0 - 1.0;
    let bits_long_south = longitude_bits_for_resolution(size, south).floor() * 2.0 - 1.0;
    bits_lat
        .min(bits_long_north)
        .min(bits_long_south)
        .min(MAXIMUM_BITS_PRECISION)
        .max(0.0) as u32
}

fn bounding_box_coordinates(center: Coordinates, radius: f64) -> [Coordinates; 9] {
    let lat_degrees = radius / METERS_PER_DEGREE_LATITUDE;
    let north = (center.lat + lat_degrees).min(90.0);
    let south = (center.lat - lat_degrees).max(-90.0);
    let long_degs = meters_to_longitude_degrees(radius, north)
        .max(meters_to_longitude_degrees(radius, south));
    let west = wrap_longitude(center.lng - long_degs);
    let east = wrap_longitude(center.lng + long_degs);
    [
        Coordinates::new(center.lat, center.lng),
        Coordinates::new(center.lat, west),
        Coordinates::new(center.lat, east),
        Coordinates::new(north, center.lng),
        Coordinates::new(north, west),
        Coordinates::new(north, east),
        Coordinates::new(south, center.lng),
        Coordinates::new(south, west),
        Coordinates::new(south, east),
    ]
}

fn meters_to_longitude_degrees(distance: f64, latitude: f64) -> f64 {
    let radians = latitude.to_radians();
    let num = radians.cos() * EARTH_EQ_RADIUS * std::f64::consts::PI / 180.0;
    let denom = 1.0 / (1.0 - E2 * radians.sin() * radians.sin()).sqrt();
    let delta_deg = num * denom;
    if delta_deg < EPSILON {
        if distance > 0.0 {
            360.0
        } else {
            0.0
        }
    } else {
        (distance / delta_deg).min(360.0)
    }
}

fn longitude_bits_for_resolution(resolution: f64, latitude: f64) -> f64 {
    let degs = meters_to_longitude_degrees(resolution, latitude);
    if degs.abs() > 0.000_001 {
        (360.0 / degs).log2().max(1.0)
    } else {
        1.0
    }
}

fn latitude_bits_for_resolution(resolution: f64) -> f64 {
    (EARTH_MERI_CIRCUMFERENCE / 2.0 / resolution)
        .log2()
        .min(MAXIMUM_BITS_PRECISION)
}

fn wrap_longitude(longitude: f64) -> f64 {
    if (-180.0..=180.0).contains(&longitude) {
        return longitude;
    }
    let adjusted = longitude + 180.0;
    if adjusted > 0.0 {
        (adjusted % 360.0) - 180.0
    } else {
        180.0 - (-adjusted % 360.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUBLIN: Coordinates = Coordinates {
        lat: 53.324319,
        lng: -6.253127,
    };

    #[test]
    fn encodes_known_geohash() {
        let hash = geohash_with_precision(Coordinates::new(57.64911, 10.40744), 11);
        assert_eq!(hash, "u4pruydqqvj");
    }

    #[test]
    fn distance_between_dublin_and_galway_is_about_190km() {
        let galway = Coordinates::new(53.2707, -9.0568);
        let km = distance_between(DUBLIN, galway);
        assert!((180.0..200.0).contains(&km), "got {km}");
        assert!(distance_between(DUBLIN, DUBLIN).abs() < 1e-9);
    }

    #[test]
    fn bounds_cover_the_center_hash_and_are_unique() {
        let bounds = geohash_query_bounds(DUBLIN, 5_000.0);
        assert!(!bounds.is_empty() && bounds.len() <= 9);
        let center = geohash_for_location(DUBLIN);
        assert!(bounds
            .iter()
            .any(|(start, end)| center.as_str() >= start.as_str() && center.as_str() <= end.as_str()));
        for (i, bound) in bounds.iter().enumerate() {
            assert!(!bounds[..i].contains(bound));
            assert!(bound.0 < bound.1);
        }
    }

    #[test]
    fn wraps_longitude_past_the_antimeridian() {
        assert!((wrap_longitude(190.0) + 170.0).abs() < 1e-9);
        assert!((wrap_longitude(-190.0) - 170.0).abs() < 1e-9);
        assert_eq!(wrap_longitude(45.0), 45.0);
    }
}
