//! Geometry kernel: axis-aligned boxes, spheres, rays, planes, frusta and
//! tetrahedra, with the intersection predicates the query kernel relies on.
//!
//! Stored data is `f32`; every predicate computes in `f64` and compares
//! against the shared `GEOMETRIC_TOLERANCE`.

use itertools::izip;

use crate::constants::GEOMETRIC_TOLERANCE;
use crate::error::SpatialError;
use crate::types::{Coord, PointType};

/// Outcome of a conservative intersection test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intersection {
    Disjoint,
    Intersecting,
    /// The quick tests were inconclusive; callers that need a strict
    /// answer run the full separating-axis test.
    Possible,
}

/// Classification of a cell against a frustum or convex hull.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Containment {
    Inside,
    Intersecting,
    Outside,
}

pub(crate) fn to_f64(p: &Coord) -> [f64; 3] {
    [p[0] as f64, p[1] as f64, p[2] as f64]
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn add(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn scale(a: [f64; 3], s: f64) -> [f64; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

fn normalize(a: [f64; 3]) -> Option<[f64; 3]> {
    let n = norm(a);
    if n < GEOMETRIC_TOLERANCE {
        None
    } else {
        Some(scale(a, 1.0 / n))
    }
}

pub(crate) fn distance(a: &Coord, b: &Coord) -> f64 {
    norm(sub(to_f64(a), to_f64(b)))
}

/// Axis-aligned bounding box `[min, max]`, componentwise `min <= max`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Coord,
    pub max: Coord,
}

impl Aabb {
    pub fn new(min: Coord, max: Coord) -> Result<Aabb, SpatialError> {
        for axis in 0..3 {
            if !(min[axis].is_finite() && max[axis].is_finite()) {
                return Err(SpatialError::InvalidArgument(
                    "bounds must be finite".to_string(),
                ));
            }
            if min[axis] > max[axis] {
                return Err(SpatialError::InvalidArgument(format!(
                    "bounds min {:?} exceeds max {:?}",
                    min, max
                )));
            }
        }
        Ok(Aabb { min, max })
    }

    pub fn from_center_half_extent(center: Coord, half_extent: PointType) -> Result<Aabb, SpatialError> {
        if !(half_extent.is_finite() && half_extent >= 0.0) {
            return Err(SpatialError::InvalidArgument(
                "half extent must be finite and non-negative".to_string(),
            ));
        }
        Aabb::new(
            [center[0] - half_extent, center[1] - half_extent, center[2] - half_extent],
            [center[0] + half_extent, center[1] + half_extent, center[2] + half_extent],
        )
    }

    pub fn center(&self) -> Coord {
        [
            0.5 * (self.min[0] + self.max[0]),
            0.5 * (self.min[1] + self.max[1]),
            0.5 * (self.min[2] + self.max[2]),
        ]
    }

    pub fn extent(&self) -> Coord {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Largest edge of the box.
    pub fn max_extent(&self) -> PointType {
        let e = self.extent();
        e[0].max(e[1]).max(e[2])
    }

    pub fn contains_point(&self, p: &Coord) -> bool {
        (0..3).all(|axis| self.min[axis] <= p[axis] && p[axis] <= self.max[axis])
    }

    pub fn contains_aabb(&self, other: &Aabb) -> bool {
        (0..3).all(|axis| self.min[axis] <= other.min[axis] && other.max[axis] <= self.max[axis])
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        (0..3).all(|axis| self.min[axis] <= other.max[axis] && other.min[axis] <= self.max[axis])
    }

    /// The eight corners, x fastest.
    pub fn corners(&self) -> [Coord; 8] {
        let mut out = [[0.0; 3]; 8];
        for (index, corner) in out.iter_mut().enumerate() {
            *corner = [
                if index & 1 == 0 { self.min[0] } else { self.max[0] },
                if index & 2 == 0 { self.min[1] } else { self.max[1] },
                if index & 4 == 0 { self.min[2] } else { self.max[2] },
            ];
        }
        out
    }

    /// Squared distance from `p` to the closest point of the box.
    pub fn min_distance_squared(&self, p: &Coord) -> f64 {
        let mut d2 = 0.0;
        for axis in 0..3 {
            let v = p[axis] as f64;
            let lo = self.min[axis] as f64;
            let hi = self.max[axis] as f64;
            let excess = if v < lo {
                lo - v
            } else if v > hi {
                v - hi
            } else {
                0.0
            };
            d2 += excess * excess;
        }
        d2
    }

    pub fn intersects_sphere(&self, sphere: &Sphere) -> bool {
        self.min_distance_squared(&sphere.center) <= (sphere.radius as f64).powi(2)
    }

    pub fn translated(&self, delta: &Coord) -> Aabb {
        let mut min = [0.0; 3];
        let mut max = [0.0; 3];
        for (slot_min, slot_max, lo, hi, step) in
            izip!(&mut min, &mut max, &self.min, &self.max, delta)
        {
            *slot_min = lo + step;
            *slot_max = hi + step;
        }
        Aabb { min, max }
    }

    /// Overlap box of two intersecting boxes.
    pub fn intersection(&self, other: &Aabb) -> Option<Aabb> {
        if !self.intersects(other) {
            return None;
        }
        let mut min = [0.0; 3];
        let mut max = [0.0; 3];
        for axis in 0..3 {
            min[axis] = self.min[axis].max(other.min[axis]);
            max[axis] = self.max[axis].min(other.max[axis]);
        }
        Some(Aabb { min, max })
    }
}

/// A sphere described by center and radius.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sphere {
    pub center: Coord,
    pub radius: PointType,
}

impl Sphere {
    pub fn new(center: Coord, radius: PointType) -> Result<Sphere, SpatialError> {
        if !(radius.is_finite() && radius >= 0.0) {
            return Err(SpatialError::InvalidArgument(
                "sphere radius must be finite and non-negative".to_string(),
            ));
        }
        Ok(Sphere { center, radius })
    }

    pub fn contains_point(&self, p: &Coord) -> bool {
        distance(&self.center, p) <= self.radius as f64 + GEOMETRIC_TOLERANCE
    }

    pub fn contains_aabb(&self, aabb: &Aabb) -> bool {
        aabb.corners().iter().all(|corner| self.contains_point(corner))
    }

    pub fn aabb(&self) -> Aabb {
        Aabb {
            min: [
                self.center[0] - self.radius,
                self.center[1] - self.radius,
                self.center[2] - self.radius,
            ],
            max: [
                self.center[0] + self.radius,
                self.center[1] + self.radius,
                self.center[2] + self.radius,
            ],
        }
    }
}

/// A ray with normalized direction.
#[derive(Clone, Copy, Debug)]
pub struct Ray3 {
    pub origin: Coord,
    pub direction: Coord,
}

impl Ray3 {
    /// Build a ray, normalizing `direction`. A zero direction is degenerate.
    pub fn new(origin: Coord, direction: Coord) -> Result<Ray3, SpatialError> {
        let normalized = normalize(to_f64(&direction)).ok_or_else(|| {
            SpatialError::GeometryDegenerate("ray direction has zero length".to_string())
        })?;
        Ok(Ray3 {
            origin,
            direction: [
                normalized[0] as PointType,
                normalized[1] as PointType,
                normalized[2] as PointType,
            ],
        })
    }

    pub fn point_at(&self, t: f64) -> Coord {
        let p = add(to_f64(&self.origin), scale(to_f64(&self.direction), t));
        [p[0] as PointType, p[1] as PointType, p[2] as PointType]
    }

    /// Parameter of the closest approach of the ray to `p`, clamped to 0.
    pub fn closest_approach(&self, p: &Coord) -> (f64, f64) {
        let t = dot(
            sub(to_f64(p), to_f64(&self.origin)),
            to_f64(&self.direction),
        )
        .max(0.0);
        let closest = add(to_f64(&self.origin), scale(to_f64(&self.direction), t));
        (t, norm(sub(to_f64(p), closest)))
    }
}

/// Slab test of a ray against a box.
///
/// Returns `(t_enter, t_exit)`; the ray misses iff `t_enter > t_exit` or
/// `t_exit < 0`, in which case `None` is returned.
pub fn ray_aabb(ray: &Ray3, aabb: &Aabb) -> Option<(f64, f64)> {
    let mut t_enter = f64::NEG_INFINITY;
    let mut t_exit = f64::INFINITY;

    for axis in 0..3 {
        let origin = ray.origin[axis] as f64;
        let dir = ray.direction[axis] as f64;
        let lo = aabb.min[axis] as f64;
        let hi = aabb.max[axis] as f64;

        if dir.abs() < GEOMETRIC_TOLERANCE {
            if origin < lo || origin > hi {
                return None;
            }
            continue;
        }

        let t0 = (lo - origin) / dir;
        let t1 = (hi - origin) / dir;
        let (near, far) = if t0 <= t1 { (t0, t1) } else { (t1, t0) };
        t_enter = t_enter.max(near);
        t_exit = t_exit.min(far);
    }

    if t_enter > t_exit || t_exit < 0.0 {
        None
    } else {
        Some((t_enter, t_exit))
    }
}

/// Outward face normal of the box at the entry point of `ray`.
///
/// When the origin lies inside the box the reversed ray direction is
/// returned instead.
pub fn ray_aabb_entry_normal(ray: &Ray3, aabb: &Aabb, t_enter: f64) -> Coord {
    if t_enter <= 0.0 {
        return [-ray.direction[0], -ray.direction[1], -ray.direction[2]];
    }
    let mut best_axis = 0;
    let mut best_gap = f64::INFINITY;
    let hit = ray.point_at(t_enter);
    let mut sign = -1.0;
    for axis in 0..3 {
        let to_min = (hit[axis] as f64 - aabb.min[axis] as f64).abs();
        let to_max = (hit[axis] as f64 - aabb.max[axis] as f64).abs();
        if to_min < best_gap {
            best_gap = to_min;
            best_axis = axis;
            sign = -1.0;
        }
        if to_max < best_gap {
            best_gap = to_max;
            best_axis = axis;
            sign = 1.0;
        }
    }
    let mut normal = [0.0; 3];
    normal[best_axis] = sign as PointType;
    normal
}

/// Möller–Trumbore ray/triangle intersection; returns the ray parameter.
fn ray_triangle(ray: &Ray3, v0: [f64; 3], v1: [f64; 3], v2: [f64; 3]) -> Option<f64> {
    let edge1 = sub(v1, v0);
    let edge2 = sub(v2, v0);
    let dir = to_f64(&ray.direction);

    let p = cross(dir, edge2);
    let det = dot(edge1, p);
    if det.abs() < GEOMETRIC_TOLERANCE {
        return None;
    }

    let inv_det = 1.0 / det;
    let s = sub(to_f64(&ray.origin), v0);
    let u = dot(s, p) * inv_det;
    if !(-GEOMETRIC_TOLERANCE..=1.0 + GEOMETRIC_TOLERANCE).contains(&u) {
        return None;
    }

    let q = cross(s, edge1);
    let v = dot(dir, q) * inv_det;
    if v < -GEOMETRIC_TOLERANCE || u + v > 1.0 + GEOMETRIC_TOLERANCE {
        return None;
    }

    let t = dot(edge2, q) * inv_det;
    if t >= 0.0 {
        Some(t)
    } else {
        None
    }
}

/// A plane `normal . p + d = 0` with unit normal.
///
/// Points with non-positive signed distance are on the interior side; a
/// frustum or convex hull is the set of points interior to all of its
/// planes.
#[derive(Clone, Copy, Debug)]
pub struct Plane3 {
    pub normal: Coord,
    pub d: PointType,
}

impl Plane3 {
    pub fn new(normal: Coord, d: PointType) -> Result<Plane3, SpatialError> {
        let unit = normalize(to_f64(&normal)).ok_or_else(|| {
            SpatialError::GeometryDegenerate("plane normal has zero length".to_string())
        })?;
        let scale_back = norm(to_f64(&normal));
        Ok(Plane3 {
            normal: [unit[0] as PointType, unit[1] as PointType, unit[2] as PointType],
            d: (d as f64 / scale_back) as PointType,
        })
    }

    pub fn from_point_normal(point: Coord, normal: Coord) -> Result<Plane3, SpatialError> {
        let unit = normalize(to_f64(&normal)).ok_or_else(|| {
            SpatialError::GeometryDegenerate("plane normal has zero length".to_string())
        })?;
        Ok(Plane3 {
            normal: [unit[0] as PointType, unit[1] as PointType, unit[2] as PointType],
            d: -dot(unit, to_f64(&point)) as PointType,
        })
    }

    /// Plane through three points, oriented so `interior` is on the
    /// non-positive side.
    pub fn from_points(a: Coord, b: Coord, c: Coord, interior: Coord) -> Result<Plane3, SpatialError> {
        let normal = cross(sub(to_f64(&b), to_f64(&a)), sub(to_f64(&c), to_f64(&a)));
        let unit = normalize(normal).ok_or_else(|| {
            SpatialError::GeometryDegenerate("collinear plane points".to_string())
        })?;
        let mut plane = Plane3 {
            normal: [unit[0] as PointType, unit[1] as PointType, unit[2] as PointType],
            d: -dot(unit, to_f64(&a)) as PointType,
        };
        if plane.signed_distance(&interior) > 0.0 {
            plane.normal = [-plane.normal[0], -plane.normal[1], -plane.normal[2]];
            plane.d = -plane.d;
        }
        Ok(plane)
    }

    pub fn signed_distance(&self, p: &Coord) -> f64 {
        dot(to_f64(&self.normal), to_f64(p)) + self.d as f64
    }

    /// -1 when the box is entirely interior, 1 when entirely exterior,
    /// 0 when the plane cuts it.
    pub fn classify_aabb(&self, aabb: &Aabb) -> i8 {
        let mut below = false;
        let mut above = false;
        for corner in aabb.corners().iter() {
            if self.signed_distance(corner) > GEOMETRIC_TOLERANCE {
                above = true;
            } else {
                below = true;
            }
        }
        match (below, above) {
            (true, false) => -1,
            (false, true) => 1,
            _ => 0,
        }
    }
}

/// Six planes with interior-pointing sense; a point is inside when its
/// signed distance to every plane is non-positive.
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    pub planes: [Plane3; 6],
}

impl Frustum {
    pub fn contains_point(&self, p: &Coord) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(p) <= GEOMETRIC_TOLERANCE)
    }

    /// A box is inside when all eight corners are inside; it is outside
    /// when some plane has all eight corners strictly on its outer side.
    pub fn classify_aabb(&self, aabb: &Aabb) -> Containment {
        let mut inside = true;
        for plane in self.planes.iter() {
            match plane.classify_aabb(aabb) {
                1 => return Containment::Outside,
                0 => inside = false,
                _ => {}
            }
        }
        if inside {
            Containment::Inside
        } else {
            Containment::Intersecting
        }
    }

    pub fn contains_aabb(&self, aabb: &Aabb) -> bool {
        self.classify_aabb(aabb) == Containment::Inside
    }

    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.classify_aabb(aabb) != Containment::Outside
    }

    /// Orthographic frustum looking from `position` towards `target`.
    pub fn orthographic(
        position: Coord,
        target: Coord,
        up: Coord,
        width: PointType,
        height: PointType,
        near: PointType,
        far: PointType,
    ) -> Result<Frustum, SpatialError> {
        let (forward, right, true_up) = camera_basis(position, target, up)?;
        if far <= near {
            return Err(SpatialError::InvalidArgument(
                "far plane must be beyond near plane".to_string(),
            ));
        }
        let pos = to_f64(&position);
        let near_center = add(pos, scale(forward, near as f64));
        let far_center = add(pos, scale(forward, far as f64));
        let half_w = width as f64 * 0.5;
        let half_h = height as f64 * 0.5;

        let plane = |point: [f64; 3], n: [f64; 3]| {
            Plane3::from_point_normal(
                [point[0] as PointType, point[1] as PointType, point[2] as PointType],
                [n[0] as PointType, n[1] as PointType, n[2] as PointType],
            )
        };
        Ok(Frustum {
            planes: [
                plane(near_center, scale(forward, -1.0))?,
                plane(far_center, forward)?,
                plane(add(near_center, scale(right, -half_w)), scale(right, -1.0))?,
                plane(add(near_center, scale(right, half_w)), right)?,
                plane(add(near_center, scale(true_up, -half_h)), scale(true_up, -1.0))?,
                plane(add(near_center, scale(true_up, half_h)), true_up)?,
            ],
        })
    }

    /// Perspective frustum with vertical field of view `fov_y` (radians).
    pub fn perspective(
        position: Coord,
        target: Coord,
        up: Coord,
        fov_y: PointType,
        aspect: PointType,
        near: PointType,
        far: PointType,
    ) -> Result<Frustum, SpatialError> {
        let (forward, right, true_up) = camera_basis(position, target, up)?;
        if far <= near || near <= 0.0 {
            return Err(SpatialError::InvalidArgument(
                "perspective frustum requires 0 < near < far".to_string(),
            ));
        }
        let tan_y = (fov_y as f64 * 0.5).tan();
        let tan_x = tan_y * aspect as f64;
        let pos = to_f64(&position);

        let rect = |dist: f64| -> [[f64; 3]; 4] {
            let center = add(pos, scale(forward, dist));
            let half_w = dist * tan_x;
            let half_h = dist * tan_y;
            [
                add(add(center, scale(right, -half_w)), scale(true_up, -half_h)),
                add(add(center, scale(right, half_w)), scale(true_up, -half_h)),
                add(add(center, scale(right, half_w)), scale(true_up, half_h)),
                add(add(center, scale(right, -half_w)), scale(true_up, half_h)),
            ]
        };
        let near_rect = rect(near as f64);
        let far_rect = rect(far as f64);
        let interior_f64 = add(pos, scale(forward, (near as f64 + far as f64) * 0.5));
        let interior = [
            interior_f64[0] as PointType,
            interior_f64[1] as PointType,
            interior_f64[2] as PointType,
        ];
        let p = |v: [f64; 3]| [v[0] as PointType, v[1] as PointType, v[2] as PointType];

        Ok(Frustum {
            planes: [
                Plane3::from_points(p(near_rect[0]), p(near_rect[1]), p(near_rect[2]), interior)?,
                Plane3::from_points(p(far_rect[0]), p(far_rect[1]), p(far_rect[2]), interior)?,
                Plane3::from_points(p(near_rect[0]), p(near_rect[3]), p(far_rect[3]), interior)?,
                Plane3::from_points(p(near_rect[1]), p(near_rect[2]), p(far_rect[2]), interior)?,
                Plane3::from_points(p(near_rect[0]), p(near_rect[1]), p(far_rect[1]), interior)?,
                Plane3::from_points(p(near_rect[2]), p(near_rect[3]), p(far_rect[3]), interior)?,
            ],
        })
    }
}

fn camera_basis(
    position: Coord,
    target: Coord,
    up: Coord,
) -> Result<([f64; 3], [f64; 3], [f64; 3]), SpatialError> {
    let forward = normalize(sub(to_f64(&target), to_f64(&position))).ok_or_else(|| {
        SpatialError::GeometryDegenerate("camera target coincides with position".to_string())
    })?;
    let right = normalize(cross(forward, to_f64(&up))).ok_or_else(|| {
        SpatialError::GeometryDegenerate("camera up is parallel to view direction".to_string())
    })?;
    let true_up = cross(right, forward);
    Ok((forward, right, true_up))
}

/// A tetrahedron given by its four vertices.
#[derive(Clone, Copy, Debug)]
pub struct Tetrahedron {
    pub vertices: [Coord; 4],
}

impl Tetrahedron {
    pub fn new(vertices: [Coord; 4]) -> Tetrahedron {
        Tetrahedron { vertices }
    }

    /// Six times the signed volume.
    pub fn signed_volume6(&self) -> f64 {
        let [a, b, c, d] = self.vertices;
        let ab = sub(to_f64(&b), to_f64(&a));
        let ac = sub(to_f64(&c), to_f64(&a));
        let ad = sub(to_f64(&d), to_f64(&a));
        dot(ab, cross(ac, ad))
    }

    pub fn is_degenerate(&self) -> bool {
        self.signed_volume6().abs() < GEOMETRIC_TOLERANCE
    }

    pub fn centroid(&self) -> Coord {
        let mut c = [0.0f64; 3];
        for v in self.vertices.iter() {
            let v = to_f64(v);
            c = add(c, v);
        }
        [
            (c[0] * 0.25) as PointType,
            (c[1] * 0.25) as PointType,
            (c[2] * 0.25) as PointType,
        ]
    }

    pub fn aabb(&self) -> Aabb {
        let mut min = self.vertices[0];
        let mut max = self.vertices[0];
        for v in self.vertices.iter().skip(1) {
            for axis in 0..3 {
                min[axis] = min[axis].min(v[axis]);
                max[axis] = max[axis].max(v[axis]);
            }
        }
        Aabb { min, max }
    }

    /// Point containment by four signed volumes; the point is inside iff
    /// all four agree in sign with the tetrahedron, boundary inclusive.
    /// The boundary band scales with the cell volume so large cells keep
    /// the same relative slack as unit cells.
    pub fn contains_point(&self, p: &Coord) -> bool {
        let [a, b, c, d] = self.vertices;
        let reference = self.signed_volume6();
        if reference.abs() < GEOMETRIC_TOLERANCE {
            // Degenerate cell: no interior.
            return false;
        }
        let tolerance = GEOMETRIC_TOLERANCE * reference.abs().max(1.0);
        let sign = reference.signum();
        for face in [
            Tetrahedron::new([*p, b, c, d]),
            Tetrahedron::new([a, *p, c, d]),
            Tetrahedron::new([a, b, *p, d]),
            Tetrahedron::new([a, b, c, *p]),
        ]
        .iter()
        {
            let volume = face.signed_volume6();
            if volume.abs() > tolerance && volume.signum() != sign {
                return false;
            }
        }
        true
    }

    /// Nearest positive ray parameter over the four triangular faces.
    pub fn ray_intersection(&self, ray: &Ray3) -> Option<f64> {
        let [a, b, c, d] = self.vertices;
        let faces = [
            (to_f64(&a), to_f64(&b), to_f64(&c)),
            (to_f64(&a), to_f64(&b), to_f64(&d)),
            (to_f64(&a), to_f64(&c), to_f64(&d)),
            (to_f64(&b), to_f64(&c), to_f64(&d)),
        ];
        let mut best: Option<f64> = None;
        for (v0, v1, v2) in faces.iter() {
            if let Some(t) = ray_triangle(ray, *v0, *v1, *v2) {
                best = Some(match best {
                    Some(current) if current <= t => current,
                    _ => t,
                });
            }
        }
        best
    }

    /// Quick vertex/corner tests; `Possible` when inconclusive.
    pub fn intersects_aabb_fast(&self, aabb: &Aabb) -> Intersection {
        if !self.aabb().intersects(aabb) {
            return Intersection::Disjoint;
        }
        if self.vertices.iter().any(|v| aabb.contains_point(v)) {
            return Intersection::Intersecting;
        }
        if aabb.corners().iter().any(|corner| self.contains_point(corner)) {
            return Intersection::Intersecting;
        }
        Intersection::Possible
    }

    /// Full separating-axis test against a box.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        match self.intersects_aabb_fast(aabb) {
            Intersection::Disjoint => return false,
            Intersection::Intersecting => return true,
            Intersection::Possible => {}
        }

        let box_corners: Vec<[f64; 3]> = aabb.corners().iter().map(to_f64).collect();
        let tet_corners: Vec<[f64; 3]> = self.vertices.iter().map(to_f64).collect();

        let separated = |axis: [f64; 3]| -> bool {
            if norm(axis) < GEOMETRIC_TOLERANCE {
                return false;
            }
            let project = |points: &[[f64; 3]]| {
                let mut lo = f64::INFINITY;
                let mut hi = f64::NEG_INFINITY;
                for p in points {
                    let v = dot(*p, axis);
                    lo = lo.min(v);
                    hi = hi.max(v);
                }
                (lo, hi)
            };
            let (alo, ahi) = project(&box_corners);
            let (blo, bhi) = project(&tet_corners);
            ahi < blo - GEOMETRIC_TOLERANCE || bhi < alo - GEOMETRIC_TOLERANCE
        };

        let [a, b, c, d] = [tet_corners[0], tet_corners[1], tet_corners[2], tet_corners[3]];
        let face_normals = [
            cross(sub(b, a), sub(c, a)),
            cross(sub(b, a), sub(d, a)),
            cross(sub(c, a), sub(d, a)),
            cross(sub(c, b), sub(d, b)),
        ];
        for normal in face_normals.iter() {
            if separated(*normal) {
                return false;
            }
        }

        let tet_edges = [
            sub(b, a),
            sub(c, a),
            sub(d, a),
            sub(c, b),
            sub(d, b),
            sub(d, c),
        ];
        let box_axes = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        for edge in tet_edges.iter() {
            for axis in box_axes.iter() {
                if separated(cross(*edge, *axis)) {
                    return false;
                }
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_tet() -> Tetrahedron {
        Tetrahedron::new([
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [1.0, 1.0, 1.0],
        ])
    }

    #[test]
    fn test_ray_aabb_hit_and_miss() {
        let aabb = Aabb::new([1.0, 1.0, 1.0], [2.0, 2.0, 2.0]).unwrap();

        let hit = Ray3::new([0.0, 1.5, 1.5], [1.0, 0.0, 0.0]).unwrap();
        let (t_enter, t_exit) = ray_aabb(&hit, &aabb).unwrap();
        assert!((t_enter - 1.0).abs() < 1e-9);
        assert!((t_exit - 2.0).abs() < 1e-9);

        let miss = Ray3::new([0.0, 5.0, 1.5], [1.0, 0.0, 0.0]).unwrap();
        assert!(ray_aabb(&miss, &aabb).is_none());

        // Behind the origin.
        let behind = Ray3::new([5.0, 1.5, 1.5], [1.0, 0.0, 0.0]).unwrap();
        assert!(ray_aabb(&behind, &aabb).is_none());
    }

    #[test]
    fn test_ray_aabb_from_inside() {
        let aabb = Aabb::new([0.0, 0.0, 0.0], [2.0, 2.0, 2.0]).unwrap();
        let ray = Ray3::new([1.0, 1.0, 1.0], [1.0, 0.0, 0.0]).unwrap();
        let (t_enter, t_exit) = ray_aabb(&ray, &aabb).unwrap();
        assert!(t_enter < 0.0);
        assert!((t_exit - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_direction_is_degenerate() {
        assert!(Ray3::new([0.0; 3], [0.0; 3]).is_err());
    }

    #[test]
    fn test_centroid_inside_tet() {
        let tet = unit_tet();
        assert!(tet.contains_point(&tet.centroid()));
    }

    #[test]
    fn test_point_in_tet_boundary_counts_as_inside() {
        let tet = unit_tet();
        // A vertex and a face point.
        assert!(tet.contains_point(&[0.0, 0.0, 0.0]));
        assert!(tet.contains_point(&[1.0, 0.5, 0.0]));
        // Clearly outside.
        assert!(!tet.contains_point(&[0.0, 1.0, 0.0]));
    }

    #[test]
    fn test_degenerate_tet_has_no_interior() {
        let flat = Tetrahedron::new([
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [2.0, 0.0, 0.0],
            [3.0, 0.0, 0.0],
        ]);
        assert!(flat.is_degenerate());
        assert!(!flat.contains_point(&[1.0, 0.0, 0.0]));
    }

    #[test]
    fn test_ray_tet() {
        let tet = unit_tet();
        let centroid = tet.centroid();
        let ray = Ray3::new(
            [centroid[0], centroid[1], -5.0],
            [0.0, 0.0, 1.0],
        )
        .unwrap();
        let t = tet.ray_intersection(&ray).unwrap();
        assert!(t > 0.0 && t < 10.0);

        let miss = Ray3::new([-5.0, 5.0, 5.0], [0.0, 0.0, 1.0]).unwrap();
        assert!(tet.ray_intersection(&miss).is_none());
    }

    #[test]
    fn test_tet_aabb_sat() {
        let tet = unit_tet();
        let overlapping = Aabb::new([0.4, 0.2, 0.0], [0.9, 0.5, 0.3]).unwrap();
        assert!(tet.intersects_aabb(&overlapping));

        // Overlapping bounding boxes but separated volumes.
        let corner = Aabb::new([0.0, 0.8, 0.8], [0.1, 1.0, 1.0]).unwrap();
        assert!(!tet.intersects_aabb(&corner));

        let disjoint = Aabb::new([5.0, 5.0, 5.0], [6.0, 6.0, 6.0]).unwrap();
        assert_eq!(tet.intersects_aabb_fast(&disjoint), Intersection::Disjoint);
    }

    #[test]
    fn test_sphere_aabb() {
        let sphere = Sphere::new([0.0, 0.0, 0.0], 1.0).unwrap();
        let near = Aabb::new([0.5, 0.0, 0.0], [2.0, 1.0, 1.0]).unwrap();
        let far = Aabb::new([2.0, 2.0, 2.0], [3.0, 3.0, 3.0]).unwrap();
        assert!(near.intersects_sphere(&sphere));
        assert!(!far.intersects_sphere(&sphere));
        assert!(sphere.contains_aabb(&Aabb::new([-0.2, -0.2, -0.2], [0.2, 0.2, 0.2]).unwrap()));
    }

    #[test]
    fn test_plane_classification() {
        let plane = Plane3::from_point_normal([0.0, 0.0, 1.0], [0.0, 0.0, 1.0]).unwrap();
        let below = Aabb::new([0.0, 0.0, 0.0], [1.0, 1.0, 0.5]).unwrap();
        let above = Aabb::new([0.0, 0.0, 2.0], [1.0, 1.0, 3.0]).unwrap();
        let cut = Aabb::new([0.0, 0.0, 0.0], [1.0, 1.0, 2.0]).unwrap();
        assert_eq!(plane.classify_aabb(&below), -1);
        assert_eq!(plane.classify_aabb(&above), 1);
        assert_eq!(plane.classify_aabb(&cut), 0);
    }

    #[test]
    fn test_orthographic_frustum_classification() {
        let frustum = Frustum::orthographic(
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 10.0],
            [0.0, 1.0, 0.0],
            10.0,
            10.0,
            1.0,
            100.0,
        )
        .unwrap();

        assert!(frustum.contains_point(&[0.0, 0.0, 50.0]));
        assert!(!frustum.contains_point(&[0.0, 0.0, 0.5]));
        assert!(!frustum.contains_point(&[8.0, 0.0, 50.0]));

        let inside = Aabb::new([-1.0, -1.0, 10.0], [1.0, 1.0, 12.0]).unwrap();
        let outside = Aabb::new([20.0, 20.0, 10.0], [22.0, 22.0, 12.0]).unwrap();
        let cut = Aabb::new([4.0, -1.0, 10.0], [6.0, 1.0, 12.0]).unwrap();
        assert_eq!(frustum.classify_aabb(&inside), Containment::Inside);
        assert_eq!(frustum.classify_aabb(&outside), Containment::Outside);
        assert_eq!(frustum.classify_aabb(&cut), Containment::Intersecting);
    }

    #[test]
    fn test_containment_implies_intersection() {
        let frustum = Frustum::perspective(
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.0, 1.0, 0.0],
            std::f32::consts::FRAC_PI_2,
            1.0,
            1.0,
            100.0,
        )
        .unwrap();

        // Sample a few boxes along the axis.
        for z in [2.0f32, 10.0, 50.0, 90.0] {
            let aabb = Aabb::new([-0.5, -0.5, z], [0.5, 0.5, z + 1.0]).unwrap();
            if frustum.contains_aabb(&aabb) {
                assert!(frustum.intersects_aabb(&aabb));
            }
        }
    }
}
