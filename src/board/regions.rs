//! Keepout region index
//!
//! R-tree over keepout region envelopes so the "item intersects region"
//! predicate used by keepout rule conditions only runs the exact overlap
//! test against regions whose bounding boxes actually touch the item.

use rstar::{RTree, RTreeObject, AABB};
use std::collections::HashMap;

use super::config::KeepoutRegion;
use super::items::BoardItem;

/// Envelope wrapper for R-tree indexing of keepout regions
#[derive(Clone, Debug)]
struct RegionEnvelope {
    index: usize,
    bounds: AABB<[f64; 2]>,
}

impl RegionEnvelope {
    fn new(index: usize, region: &KeepoutRegion) -> Self {
        let mut min = [f64::MAX, f64::MAX];
        let mut max = [f64::MIN, f64::MIN];
        for pt in &region.outline {
            min[0] = min[0].min(f64::from(pt[0]));
            min[1] = min[1].min(f64::from(pt[1]));
            max[0] = max[0].max(f64::from(pt[0]));
            max[1] = max[1].max(f64::from(pt[1]));
        }
        Self {
            index,
            bounds: AABB::from_corners(min, max),
        }
    }
}

impl RTreeObject for RegionEnvelope {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.bounds
    }
}

/// Spatial lookup of keepout regions by id or name
#[derive(Debug)]
pub struct RegionIndex {
    regions: Vec<KeepoutRegion>,
    tree: RTree<RegionEnvelope>,
    by_key: HashMap<String, usize>,
}

impl RegionIndex {
    pub fn new(regions: &[KeepoutRegion]) -> Self {
        let envelopes: Vec<RegionEnvelope> = regions
            .iter()
            .enumerate()
            .map(|(i, r)| RegionEnvelope::new(i, r))
            .collect();

        let mut by_key = HashMap::new();
        for (i, region) in regions.iter().enumerate() {
            by_key.insert(region.id.clone(), i);
            if !region.name.is_empty() {
                by_key.entry(region.name.clone()).or_insert(i);
            }
        }

        Self {
            regions: regions.to_vec(),
            tree: RTree::bulk_load(envelopes),
            by_key,
        }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Check if an item overlaps the region named `key` on a shared layer
    pub fn item_intersects(&self, key: &str, item: &BoardItem) -> bool {
        let Some(&index) = self.by_key.get(key) else {
            return false;
        };
        let region = &self.regions[index];
        if !region.layers.intersects(item.layers) {
            return false;
        }

        let envelope = item_envelope(item);
        let touches_envelope = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .any(|e| e.index == index);

        touches_envelope && polygon_intersects_rect(&region.outline, &item.bounds)
    }
}

fn item_envelope(item: &BoardItem) -> AABB<[f64; 2]> {
    AABB::from_corners(
        [f64::from(item.bounds[0]), f64::from(item.bounds[1])],
        [f64::from(item.bounds[2]), f64::from(item.bounds[3])],
    )
}

/// Exact overlap of a closed polygon outline with an axis-aligned rectangle
fn polygon_intersects_rect(outline: &[[i32; 2]], rect: &[i32; 4]) -> bool {
    if outline.len() < 3 {
        return false;
    }
    let poly: Vec<[f64; 2]> = outline
        .iter()
        .map(|p| [f64::from(p[0]), f64::from(p[1])])
        .collect();
    let (x0, y0, x1, y1) = (
        f64::from(rect[0]),
        f64::from(rect[1]),
        f64::from(rect[2]),
        f64::from(rect[3]),
    );
    let corners = [[x0, y0], [x1, y0], [x1, y1], [x0, y1]];

    // Rectangle inside (or partly inside) the polygon
    if corners.iter().any(|c| point_in_polygon(*c, &poly)) {
        return true;
    }

    // Polygon vertex inside the rectangle
    if poly
        .iter()
        .any(|p| p[0] >= x0 && p[0] <= x1 && p[1] >= y0 && p[1] <= y1)
    {
        return true;
    }

    // Edge crossings
    for i in 0..poly.len() {
        let a = poly[i];
        let b = poly[(i + 1) % poly.len()];
        for j in 0..4 {
            if segments_intersect(a, b, corners[j], corners[(j + 1) % 4]) {
                return true;
            }
        }
    }
    false
}

/// Even-odd ray casting
fn point_in_polygon(pt: [f64; 2], poly: &[[f64; 2]]) -> bool {
    let mut inside = false;
    let mut j = poly.len() - 1;
    for i in 0..poly.len() {
        let (pi, pj) = (poly[i], poly[j]);
        if (pi[1] > pt[1]) != (pj[1] > pt[1])
            && pt[0] < (pj[0] - pi[0]) * (pt[1] - pi[1]) / (pj[1] - pi[1]) + pi[0]
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn orientation(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn on_segment(a: [f64; 2], b: [f64; 2], p: [f64; 2]) -> bool {
    p[0] >= a[0].min(b[0]) && p[0] <= a[0].max(b[0]) && p[1] >= a[1].min(b[1]) && p[1] <= a[1].max(b[1])
}

fn segments_intersect(p1: [f64; 2], p2: [f64; 2], q1: [f64; 2], q2: [f64; 2]) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}
