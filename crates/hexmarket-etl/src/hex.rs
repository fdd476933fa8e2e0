//! Hexagonal cell assignment

use h3o::{LatLng, Resolution};

use crate::error::ConfigError;
use crate::models::Coordinates;

/// Maps a point to a hexagon id
pub trait HexIndexer: Send + Sync {
    /// `None` for coordinates that cannot be indexed
    fn index(&self, location: Coordinates) -> Option<String>;
}

/// H3 grid at a fixed resolution
#[derive(Debug, Clone, Copy)]
pub struct H3Indexer {
    resolution: Resolution,
}

impl H3Indexer {
    pub fn new(resolution: u8) -> Result<Self, ConfigError> {
        let resolution = Resolution::try_from(resolution).map_err(|e| {
            ConfigError::invalid("ETL_H3_RESOLUTION", e.to_string())
        })?;
        Ok(Self { resolution })
    }

    pub fn resolution(&self) -> u8 {
        u8::from(self.resolution)
    }
}

impl HexIndexer for H3Indexer {
    fn index(&self, location: Coordinates) -> Option<String> {
        if !location.is_valid() {
            return None;
        }
        let point = LatLng::new(location.latitude, location.longitude).ok()?;
        Some(point.to_cell(self.resolution).to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_nearby_points_share_a_cell() {
        let indexer = H3Indexer::new(8).unwrap();
        let a = indexer.index(Coordinates { latitude: 33.7490, longitude: -84.3880 });
        let b = indexer.index(Coordinates { latitude: 33.7491, longitude: -84.3881 });
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_eq!(a.unwrap().len(), 15);
    }

    #[test]
    fn test_distant_points_differ() {
        let indexer = H3Indexer::new(8).unwrap();
        let atlanta = indexer.index(Coordinates { latitude: 33.7490, longitude: -84.3880 });
        let marietta = indexer.index(Coordinates { latitude: 33.9526, longitude: -84.5499 });
        assert_ne!(atlanta, marietta);
    }

    #[test]
    fn test_invalid_points_are_not_indexed() {
        let indexer = H3Indexer::new(8).unwrap();
        assert!(indexer.index(Coordinates { latitude: 0.0, longitude: 0.0 }).is_none());
        assert!(indexer.index(Coordinates { latitude: 120.0, longitude: 0.0 }).is_none());
    }

    #[test]
    fn test_resolution_bounds() {
        assert_eq!(H3Indexer::new(15).unwrap().resolution(), 15);
        assert!(H3Indexer::new(16).is_err());
    }
}
