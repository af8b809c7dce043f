//! Geometry - containment and side tests
//!
//! ## Responsibilities
//!
//! - Point-in-polygon (even-odd ray casting)
//! - Side of a directed segment, polyline, or axis-aligned line
//! - Segment intersection, so finite lines only count what passes through them
//! - Crossing classification from two side readings
//!
//! All functions are pure. Coordinates are usually normalized (0-1) but
//! nothing here depends on the scale.

mod types;

pub use types::*;

use crate::error::{Error, Result};

/// Cross products smaller than this are treated as lying on the line
const COLLINEAR_EPSILON: f64 = 1e-12;

/// Even-odd ray casting test. Polygons with fewer than 3 vertices contain nothing.
pub fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (pi, pj) = (polygon[i], polygon[j]);
        if (pi.y > point.y) != (pj.y > point.y) {
            let x_cross = (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x;
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Polygon containment as a side reading
pub fn containment(point: Point, polygon: &[Point]) -> Containment {
    if point_in_polygon(point, polygon) {
        Containment::Inside
    } else {
        Containment::Outside
    }
}

fn cross(a: Point, b: Point, p: Point) -> f64 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Side of `point` relative to the directed segment `a -> b`.
///
/// Sign of the 2-D cross product: positive is `Left` in a y-up frame.
/// Reversing the segment swaps `Left` and `Right`.
pub fn side_of_line(point: Point, a: Point, b: Point) -> Side {
    let c = cross(a, b, point);
    if c.abs() <= COLLINEAR_EPSILON {
        Side::On
    } else if c > 0.0 {
        Side::Left
    } else {
        Side::Right
    }
}

/// Side of an axis-aligned line at `position`.
///
/// Points within `tolerance` of the line read as `On`.
pub fn side_of_axis(point: Point, orientation: Orientation, position: f64, tolerance: f64) -> AxisSide {
    let coord = match orientation {
        Orientation::Vertical => point.x,
        Orientation::Horizontal => point.y,
    };
    let d = coord - position;
    if d.abs() <= tolerance.max(0.0) {
        AxisSide::On
    } else if d < 0.0 {
        AxisSide::Before
    } else {
        AxisSide::After
    }
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return p.distance(&a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0);
    p.distance(&Point::new(a.x + t * dx, a.y + t * dy))
}

/// Index of the polyline segment closest to `point`
fn nearest_segment(point: Point, points: &[Point]) -> Option<usize> {
    points
        .windows(2)
        .enumerate()
        .map(|(i, w)| (i, distance_to_segment(point, w[0], w[1])))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

/// Side of `point` relative to a polyline, judged against its nearest segment
pub fn side_of_polyline(point: Point, points: &[Point]) -> Side {
    match nearest_segment(point, points) {
        Some(i) => side_of_line(point, points[i], points[i + 1]),
        None => Side::On,
    }
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p.x >= a.x.min(b.x) - COLLINEAR_EPSILON
        && p.x <= a.x.max(b.x) + COLLINEAR_EPSILON
        && p.y >= a.y.min(b.y) - COLLINEAR_EPSILON
        && p.y <= a.y.max(b.y) + COLLINEAR_EPSILON
}

fn orientation(a: Point, b: Point, p: Point) -> i8 {
    let c = cross(a, b, p);
    if c.abs() <= COLLINEAR_EPSILON {
        0
    } else if c > 0.0 {
        1
    } else {
        -1
    }
}

/// Whether segments `p1 -> p2` and `q1 -> q2` share a point (touching included)
pub fn segments_intersect(p1: Point, p2: Point, q1: Point, q2: Point) -> bool {
    let o1 = orientation(p1, p2, q1);
    let o2 = orientation(p1, p2, q2);
    let o3 = orientation(q1, q2, p1);
    let o4 = orientation(q1, q2, p2);

    if o1 * o2 < 0 && o3 * o4 < 0 {
        return true;
    }
    (o1 == 0 && on_segment(p1, p2, q1))
        || (o2 == 0 && on_segment(p1, p2, q2))
        || (o3 == 0 && on_segment(q1, q2, p1))
        || (o4 == 0 && on_segment(q1, q2, p2))
}

/// Whether a movement `from -> to` passes through any segment of the polyline
pub fn polyline_crossed(from: Point, to: Point, points: &[Point]) -> bool {
    points
        .windows(2)
        .any(|w| segments_intersect(from, to, w[0], w[1]))
}

/// Classify a transition between two side readings.
///
/// A crossing needs two distinct, non-`On` readings. Arriving on
/// `entry_side` is an entry, leaving it is an exit.
pub fn crossing_direction<S: SideClass>(prev: S, curr: S, entry_side: S) -> Crossing {
    if prev.is_on() || curr.is_on() || prev == curr {
        return Crossing::None;
    }
    if curr == entry_side {
        Crossing::Entry
    } else {
        Crossing::Exit
    }
}

/// Side a track arrives on when it moves through `a -> b` in `direction`.
///
/// Fails when the direction runs parallel to the line, since no side can
/// be reached by travelling that way.
pub fn entry_side_of_line(a: Point, b: Point, direction: EntryDirection) -> Result<Side> {
    let v = direction.vector();
    let c = (b.x - a.x) * v.y - (b.y - a.y) * v.x;
    if c.abs() <= COLLINEAR_EPSILON {
        return Err(Error::Validation(format!(
            "entry direction {} is parallel to the direction line",
            direction.as_str()
        )));
    }
    Ok(if c > 0.0 { Side::Left } else { Side::Right })
}

/// Entry side of a polyline, taken from its first segment
pub fn entry_side_of_polyline(points: &[Point], direction: EntryDirection) -> Result<Side> {
    match points {
        [a, b, ..] => entry_side_of_line(*a, *b, direction),
        _ => Err(Error::Validation(
            "direction line needs at least 2 points".to_string(),
        )),
    }
}

/// Entry side of an axis-aligned line
pub fn entry_side_of_axis(orientation: Orientation, direction: EntryDirection) -> Result<AxisSide> {
    match (orientation, direction) {
        (Orientation::Vertical, EntryDirection::Right) => Ok(AxisSide::After),
        (Orientation::Vertical, EntryDirection::Left) => Ok(AxisSide::Before),
        (Orientation::Horizontal, EntryDirection::Down) => Ok(AxisSide::After),
        (Orientation::Horizontal, EntryDirection::Up) => Ok(AxisSide::Before),
        (o, d) => Err(Error::Validation(format!(
            "entry direction {} cannot cross a {:?} line",
            d.as_str(),
            o
        ))),
    }
}
