//! Virtual mosaic over cached unit tiles.
//!
//! A mosaic never copies raster data. It records which unit tiles back a
//! bounding box so point lookups can be routed to the right file; the tiles
//! themselves are loaded on demand through the cache's shared LRU.

use std::collections::HashSet;

use crate::elevation::ResolutionProduct;
use crate::geo::{BoundingBox, GeoPoint};
use crate::tile::TileKey;

#[derive(Debug, Clone)]
pub struct Mosaic {
    product: ResolutionProduct,
    bounds: BoundingBox,
    tiles: HashSet<TileKey>,
}

impl Mosaic {
    pub fn new(
        product: ResolutionProduct,
        bounds: BoundingBox,
        tiles: impl IntoIterator<Item = TileKey>,
    ) -> Self {
        Self {
            product,
            bounds,
            tiles: tiles.into_iter().collect(),
        }
    }

    pub fn product(&self) -> ResolutionProduct {
        self.product
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    /// The unit tile serving `point`, if the mosaic has one.
    ///
    /// A point on an integer-degree edge is shared by two tiles; when the tile
    /// that owns the cell is absent, the neighbour to the south and/or west
    /// serves the edge.
    pub fn tile_for(&self, point: &GeoPoint) -> Option<TileKey> {
        let own = TileKey::containing(point.lat, point.lon);
        let lat_edge = point.lat.fract() == 0.0;
        let lon_edge = point.lon.fract() == 0.0;

        let candidates = [
            Some(own),
            lat_edge.then(|| TileKey::new(own.lat - 1, own.lon)),
            lon_edge.then(|| TileKey::new(own.lat, own.lon - 1)),
            (lat_edge && lon_edge).then(|| TileKey::new(own.lat - 1, own.lon - 1)),
        ];
        candidates
            .into_iter()
            .flatten()
            .find(|key| self.tiles.contains(key))
    }
}
