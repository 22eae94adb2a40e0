use foundation::viewport::LngLat;
use h3o::{CellIndex, LatLng, Resolution};

use crate::cell::CellId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("{0} is not a valid cell")]
    InvalidCell(CellId),
    #[error("resolution {0} is not supported")]
    InvalidResolution(u8),
    #[error("invalid coordinate lng={lng} lat={lat}")]
    InvalidCoordinate { lng: f64, lat: f64 },
    #[error("viewport needs {samples} samples at resolution {resolution}, limit is {limit}")]
    ViewportTooLarge {
        samples: u64,
        resolution: u8,
        limit: u64,
    },
}

/// Capability surface of a hierarchical cell system.
///
/// Everything the engine knows about cell geometry goes through this trait, so
/// the H3 implementation can be swapped for another hierarchy in tests or
/// deployments.
pub trait CellCodec: Send + Sync + std::fmt::Debug {
    /// The cell containing `point` at `resolution`.
    fn cell_at(&self, point: LngLat, resolution: u8) -> Result<CellId, CodecError>;

    fn resolution(&self, cell: CellId) -> Result<u8, CodecError>;

    /// Ancestor of `cell` at `resolution`.
    ///
    /// When `resolution` is at or below the cell's own level of detail the
    /// cell is returned unchanged.
    fn parent(&self, cell: CellId, resolution: u8) -> Result<CellId, CodecError>;

    /// `cell` and every cell within `k` grid steps of it.
    fn k_ring(&self, cell: CellId, k: u32) -> Result<Vec<CellId>, CodecError>;

    fn center(&self, cell: CellId) -> Result<LngLat, CodecError>;

    fn boundary(&self, cell: CellId) -> Result<Vec<LngLat>, CodecError>;

    /// Average edge length of a cell at `resolution`.
    fn edge_length_km(&self, resolution: u8) -> Result<f64, CodecError>;

    fn max_resolution(&self) -> u8;
}

/// [`CellCodec`] backed by the `h3o` implementation of H3.
#[derive(Debug, Clone, Copy, Default)]
pub struct H3Codec;

impl H3Codec {
    pub fn new() -> Self {
        H3Codec
    }

    fn index(cell: CellId) -> Result<CellIndex, CodecError> {
        CellIndex::try_from(cell.raw()).map_err(|_| CodecError::InvalidCell(cell))
    }

    fn res(resolution: u8) -> Result<Resolution, CodecError> {
        Resolution::try_from(resolution).map_err(|_| CodecError::InvalidResolution(resolution))
    }

    fn lng_lat(ll: LatLng) -> LngLat {
        LngLat::new(ll.lng(), ll.lat())
    }
}

impl CellCodec for H3Codec {
    fn cell_at(&self, point: LngLat, resolution: u8) -> Result<CellId, CodecError> {
        let res = Self::res(resolution)?;
        let ll = LatLng::new(point.lat, point.lng).map_err(|_| CodecError::InvalidCoordinate {
            lng: point.lng,
            lat: point.lat,
        })?;
        Ok(CellId::from_raw(u64::from(ll.to_cell(res))))
    }

    fn resolution(&self, cell: CellId) -> Result<u8, CodecError> {
        Ok(u8::from(Self::index(cell)?.resolution()))
    }

    fn parent(&self, cell: CellId, resolution: u8) -> Result<CellId, CodecError> {
        let index = Self::index(cell)?;
        let res = Self::res(resolution)?;
        Ok(index
            .parent(res)
            .map(|p| CellId::from_raw(u64::from(p)))
            .unwrap_or(cell))
    }

    fn k_ring(&self, cell: CellId, k: u32) -> Result<Vec<CellId>, CodecError> {
        let index = Self::index(cell)?;
        Ok(index
            .grid_disk_safe(k)
            .map(|c| CellId::from_raw(u64::from(c)))
            .collect())
    }

    fn center(&self, cell: CellId) -> Result<LngLat, CodecError> {
        Ok(Self::lng_lat(LatLng::from(Self::index(cell)?)))
    }

    fn boundary(&self, cell: CellId) -> Result<Vec<LngLat>, CodecError> {
        let index = Self::index(cell)?;
        Ok(index.boundary().iter().map(|ll| Self::lng_lat(*ll)).collect())
    }

    fn edge_length_km(&self, resolution: u8) -> Result<f64, CodecError> {
        Ok(Self::res(resolution)?.edge_length_km())
    }

    fn max_resolution(&self) -> u8 {
        15
    }
}

#[cfg(test)]
mod tests {
    use super::{CellCodec, CodecError, H3Codec};
    use crate::cell::CellId;
    use foundation::viewport::LngLat;

    const LONDON: LngLat = LngLat {
        lng: -0.1276,
        lat: 51.5072,
    };

    #[test]
    fn cell_at_reports_requested_resolution() {
        let codec = H3Codec::new();
        let cell = codec.cell_at(LONDON, 7).unwrap();
        assert_eq!(codec.resolution(cell).unwrap(), 7);
    }

    #[test]
    fn parent_contains_child_point() {
        let codec = H3Codec::new();
        let fine = codec.cell_at(LONDON, 9).unwrap();
        let coarse = codec.cell_at(LONDON, 4).unwrap();
        assert_eq!(codec.parent(fine, 4).unwrap(), coarse);
    }

    #[test]
    fn parent_at_finer_resolution_is_identity() {
        let codec = H3Codec::new();
        let cell = codec.cell_at(LONDON, 5).unwrap();
        assert_eq!(codec.parent(cell, 8).unwrap(), cell);
    }

    #[test]
    fn k_ring_of_hexagon_has_seven_cells() {
        let codec = H3Codec::new();
        let cell = codec.cell_at(LONDON, 6).unwrap();
        let ring = codec.k_ring(cell, 1).unwrap();
        assert_eq!(ring.len(), 7);
        assert!(ring.contains(&cell));
    }

    #[test]
    fn boundary_surrounds_center() {
        let codec = H3Codec::new();
        let cell = codec.cell_at(LONDON, 5).unwrap();
        let boundary = codec.boundary(cell).unwrap();
        assert!(boundary.len() >= 6);
        let center = codec.center(cell).unwrap();
        assert!((center.lat - LONDON.lat).abs() < 1.0);
        assert!((center.lng - LONDON.lng).abs() < 1.0);
    }

    #[test]
    fn rejects_garbage_cell() {
        let codec = H3Codec::new();
        let bogus = CellId::from_raw(42);
        assert_eq!(codec.resolution(bogus), Err(CodecError::InvalidCell(bogus)));
    }

    #[test]
    fn rejects_unknown_resolution() {
        let codec = H3Codec::new();
        assert_eq!(
            codec.cell_at(LONDON, 16),
            Err(CodecError::InvalidResolution(16))
        );
    }

    #[test]
    fn edge_length_shrinks_with_resolution() {
        let codec = H3Codec::new();
        let coarse = codec.edge_length_km(3).unwrap();
        let fine = codec.edge_length_km(6).unwrap();
        assert!(fine < coarse);
    }
}
