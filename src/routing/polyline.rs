//! Encoded polyline decoding (precision 5, as returned by OSRM).

use crate::error::RoutingError;
use crate::types::GeoPoint;

const PRECISION: f64 = 1e5;

/// Decode an encoded polyline into explicit points.
pub fn decode(encoded: &str) -> Result<Vec<GeoPoint>, RoutingError> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::new();
    let mut pos = 0;
    let mut lat: i64 = 0;
    let mut lon: i64 = 0;

    while pos < bytes.len() {
        lat += next_value(bytes, &mut pos)?;
        lon += next_value(bytes, &mut pos)?;
        points.push(GeoPoint::new(lat as f64 / PRECISION, lon as f64 / PRECISION));
    }

    Ok(points)
}

fn next_value(bytes: &[u8], pos: &mut usize) -> Result<i64, RoutingError> {
    let mut result: i64 = 0;
    let mut shift = 0;
    loop {
        let Some(&byte) = bytes.get(*pos) else {
            return Err(RoutingError::Decode("truncated polyline".to_string()));
        };
        *pos += 1;
        if !(63..=126).contains(&byte) {
            return Err(RoutingError::Decode(format!(
                "invalid polyline character {:?} at {}",
                byte as char,
                *pos - 1
            )));
        }
        let chunk = (byte - 63) as i64;
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        if chunk < 0x20 {
            break;
        }
        if shift > 60 {
            return Err(RoutingError::Decode("polyline value overflow".to_string()));
        }
    }

    // Zig-zag sign encoding
    Ok(if result & 1 != 0 { !(result >> 1) } else { result >> 1 })
}
