use serde::{Deserialize, Serialize};

/// A WGS84 position in degrees.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        LngLat { lng, lat }
    }
}

/// Map viewport snapshot: geographic bounds plus the web-map zoom level.
///
/// `west > east` means the viewport wraps across the antimeridian.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub zoom: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewportError {
    NonFinite,
    InvertedLatitude { south: f64, north: f64 },
    LongitudeOutOfRange { lng: f64 },
}

impl std::fmt::Display for ViewportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewportError::NonFinite => write!(f, "viewport contains a non-finite coordinate"),
            ViewportError::InvertedLatitude { south, north } => {
                write!(f, "viewport south={south} is above north={north}")
            }
            ViewportError::LongitudeOutOfRange { lng } => {
                write!(f, "viewport longitude {lng} outside [-180, 180]")
            }
        }
    }
}

impl std::error::Error for ViewportError {}

impl Viewport {
    pub fn new(west: f64, south: f64, east: f64, north: f64, zoom: f64) -> Self {
        Viewport {
            west,
            south,
            east,
            north,
            zoom,
        }
    }

    /// Checks the bounds; zoom is allowed to be any finite value.
    pub fn validate(&self) -> Result<(), ViewportError> {
        let coords = [self.west, self.south, self.east, self.north, self.zoom];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(ViewportError::NonFinite);
        }
        if self.south > self.north {
            return Err(ViewportError::InvertedLatitude {
                south: self.south,
                north: self.north,
            });
        }
        for lng in [self.west, self.east] {
            if !(-180.0..=180.0).contains(&lng) {
                return Err(ViewportError::LongitudeOutOfRange { lng });
            }
        }
        Ok(())
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.west > self.east
    }

    /// Longitude spans covered by the viewport, split at the antimeridian.
    pub fn lng_ranges(&self) -> Vec<(f64, f64)> {
        if self.crosses_antimeridian() {
            vec![(self.west, 180.0), (-180.0, self.east)]
        } else {
            vec![(self.west, self.east)]
        }
    }

    /// Latitude span clamped to the valid range.
    pub fn lat_range(&self) -> (f64, f64) {
        (self.south.max(-90.0), self.north.min(90.0))
    }

    pub fn contains(&self, p: LngLat) -> bool {
        let (south, north) = self.lat_range();
        if p.lat < south || p.lat > north {
            return false;
        }
        self.lng_ranges()
            .iter()
            .any(|(w, e)| p.lng >= *w && p.lng <= *e)
    }
}
