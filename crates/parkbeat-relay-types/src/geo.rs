use geohash::Coord;

use crate::errors::RelayError;
use crate::{GEOHASH_PRECISION, RelayResult};

/// Canonical base-32 geohash for a project location. Any location update must
/// go back through this function; the stored hash is never edited by hand.
pub fn encode_geohash(lat: f64, lng: f64) -> RelayResult<String> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(RelayError::InvalidCoordinates(lat, lng));
    }
    geohash::encode(Coord { x: lng, y: lat }, GEOHASH_PRECISION).map_err(RelayError::from)
}

/// Center point of a geohash cell as `(lat, lng)`.
pub fn decode_geohash(hash: &str) -> RelayResult<(f64, f64)> {
    let (coord, _, _) = geohash::decode(hash)?;
    Ok((coord.y, coord.x))
}

/// All fan-out prefixes for a geohash, longest first: `g[0..L], g[0..L-1], …, g[0..1]`.
pub fn fanout_prefixes(geohash: &str) -> impl Iterator<Item = &str> {
    (1..=geohash.len()).rev().map(move |len| &geohash[..len])
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn encodes_known_location() {
        // Washington Square Park
        let hash = encode_geohash(40.7308, -73.9973).unwrap();
        assert_eq!(hash.len(), GEOHASH_PRECISION);
        assert!(hash.starts_with("dr5rs"));
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(matches!(
            encode_geohash(91.0, 0.0),
            Err(RelayError::InvalidCoordinates(_, _))
        ));
        assert!(matches!(
            encode_geohash(0.0, -181.0),
            Err(RelayError::InvalidCoordinates(_, _))
        ));
    }

    #[test]
    fn prefixes_walk_from_full_hash_down_to_one_character() {
        let prefixes: Vec<&str> = fanout_prefixes("dr5ru").collect();
        assert_eq!(prefixes, vec!["dr5ru", "dr5r", "dr5", "dr", "d"]);
    }

    proptest! {
        // Re-encoding a decoded cell center lands back in the same cell.
        #[test]
        fn round_trip_preserves_the_cell(lat in -89.9f64..89.9, lng in -179.9f64..179.9) {
            let hash = encode_geohash(lat, lng).unwrap();
            let (decoded_lat, decoded_lng) = decode_geohash(&hash).unwrap();
            let rehash = encode_geohash(decoded_lat, decoded_lng).unwrap();
            prop_assert_eq!(hash, rehash);
        }
    }
}
