//! Narrow phase: GJK intersection test on convex shapes.

use glam::{Mat4, Vec3};

use super::broadphase::{CollisionPair, ProxyId};
use super::collider::ColliderShape;

/// Support evaluations allowed before giving up.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

const EPSILON: f32 = 1e-10;

/// Working simplex: up to four Minkowski-difference points, oldest first.
#[derive(Debug, Clone, Copy)]
struct Simplex {
    points: [Vec3; 4],
    len: usize,
}

impl Simplex {
    fn new(first: Vec3) -> Self {
        Self {
            points: [first, Vec3::ZERO, Vec3::ZERO, Vec3::ZERO],
            len: 1,
        }
    }

    fn push(&mut self, point: Vec3) {
        self.points[self.len] = point;
        self.len += 1;
    }

    fn reset(&mut self, points: &[Vec3]) {
        self.points[..points.len()].copy_from_slice(points);
        self.len = points.len();
    }

    /// Shrink to the feature closest to the origin and aim `direction` at it.
    /// Returns true once the simplex encloses the origin.
    fn reduce(&mut self, direction: &mut Vec3) -> bool {
        match self.len {
            2 => {
                self.segment(direction);
                false
            }
            3 => {
                self.triangle(direction);
                false
            }
            4 => self.tetrahedron(direction),
            _ => false,
        }
    }

    fn segment(&mut self, direction: &mut Vec3) {
        let [b, a] = [self.points[0], self.points[1]];
        let ab = b - a;
        let ao = -a;

        if ab.dot(ao) > 0.0 {
            // Perpendicular to the segment, towards the origin.
            *direction = ab.cross(ao).cross(ab);
        } else {
            self.reset(&[a]);
            *direction = ao;
        }
    }

    fn triangle(&mut self, direction: &mut Vec3) {
        let [c, b, a] = [self.points[0], self.points[1], self.points[2]];
        let ab = b - a;
        let ac = c - a;
        let ao = -a;
        let normal = ab.cross(ac);

        if normal.length_squared() < EPSILON {
            // Collinear: keep the newest edge.
            self.reset(&[b, a]);
            self.segment(direction);
        } else if normal.cross(ac).dot(ao) > 0.0 {
            if ac.dot(ao) > 0.0 {
                self.reset(&[c, a]);
                *direction = ac.cross(ao).cross(ac);
            } else {
                self.reset(&[b, a]);
                self.segment(direction);
            }
        } else if ab.cross(normal).dot(ao) > 0.0 {
            self.reset(&[b, a]);
            self.segment(direction);
        } else if normal.dot(ao) > 0.0 {
            *direction = normal;
        } else {
            // Origin below the face: flip winding so the normal faces it.
            self.reset(&[b, c, a]);
            *direction = -normal;
        }
    }

    fn tetrahedron(&mut self, direction: &mut Vec3) -> bool {
        let [d, c, b, a] = self.points;
        let ao = -a;
        // The three faces sharing the newest point; the opposite face was
        // already known not to separate the origin.
        let faces = [
            ((b - a).cross(c - a), [c, b, a]),
            ((c - a).cross(d - a), [d, c, a]),
            ((d - a).cross(b - a), [b, d, a]),
        ];
        for (normal, vertices) in faces {
            if normal.dot(ao) > 0.0 {
                self.reset(&vertices);
                *direction = normal;
                self.triangle(direction);
                return false;
            }
        }
        true
    }
}

/// A convex shape placed in the world.
#[derive(Debug, Clone, Copy)]
pub struct Placed<'a> {
    pub shape: &'a ColliderShape,
    pub world: Mat4,
}

impl<'a> Placed<'a> {
    pub fn new(shape: &'a ColliderShape, world: Mat4) -> Self {
        Self { shape, world }
    }

    #[inline]
    fn support(&self, direction: Vec3) -> Vec3 {
        self.shape.support(direction, &self.world)
    }
}

/// Result of one GJK run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GjkOutcome {
    Intersecting { iterations: usize },
    Separated { iterations: usize },
    /// The iteration cap ran out before the simplex settled.
    IterationLimit,
}

impl GjkOutcome {
    /// Only a confirmed intersection counts; running out of iterations does not.
    #[inline]
    pub fn is_intersecting(&self) -> bool {
        matches!(self, GjkOutcome::Intersecting { .. })
    }
}

/// Minkowski difference support function, `B - A`.
#[inline]
fn minkowski_support(a: &Placed<'_>, b: &Placed<'_>, direction: Vec3) -> Vec3 {
    b.support(direction) - a.support(-direction)
}

/// GJK intersection test between two placed convex shapes.
pub fn gjk_intersection(a: &Placed<'_>, b: &Placed<'_>, max_iterations: usize) -> GjkOutcome {
    let mut direction = b.shape.world_center(&b.world) - a.shape.world_center(&a.world);
    if direction.length_squared() < EPSILON {
        direction = Vec3::X;
    }

    let first = minkowski_support(a, b, direction);
    let mut simplex = Simplex::new(first);
    direction = -first;

    if direction.length_squared() < EPSILON {
        // The origin is the support point itself.
        return GjkOutcome::Intersecting { iterations: 0 };
    }

    for iteration in 1..=max_iterations {
        let point = minkowski_support(a, b, direction);
        if point.dot(direction) <= 0.0 {
            return GjkOutcome::Separated {
                iterations: iteration,
            };
        }
        simplex.push(point);

        if simplex.reduce(&mut direction) {
            return GjkOutcome::Intersecting {
                iterations: iteration,
            };
        }

        // The origin lies on the current simplex feature.
        if direction.length_squared() < EPSILON {
            return GjkOutcome::Intersecting {
                iterations: iteration,
            };
        }
    }

    GjkOutcome::IterationLimit
}

/// Narrow-phase driver over broad-phase candidates.
#[derive(Debug, Clone)]
pub struct Gjk {
    max_iterations: usize,
    checks: usize,
    iteration_limit_hits: usize,
}

impl Default for Gjk {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

impl Gjk {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            checks: 0,
            iteration_limit_hits: 0,
        }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn intersect(&self, a: &Placed<'_>, b: &Placed<'_>) -> GjkOutcome {
        gjk_intersection(a, b, self.max_iterations)
    }

    /// Run GJK on every candidate pair and keep the ones that intersect.
    ///
    /// `lookup` resolves a proxy to its shape and world matrix; pairs with an
    /// unresolvable member are skipped.
    pub fn get_collisions<'a, F>(&mut self, pairs: &[CollisionPair], lookup: F) -> Vec<CollisionPair>
    where
        F: Fn(ProxyId) -> Option<Placed<'a>>,
    {
        self.checks = 0;
        self.iteration_limit_hits = 0;
        let mut colliding = Vec::new();

        for pair in pairs {
            let (Some(a), Some(b)) = (lookup(pair.a), lookup(pair.b)) else {
                tracing::trace!(?pair, "skipping pair with unknown proxy");
                continue;
            };
            self.checks += 1;
            match self.intersect(&a, &b) {
                GjkOutcome::Intersecting { .. } => colliding.push(*pair),
                GjkOutcome::Separated { .. } => {}
                GjkOutcome::IterationLimit => {
                    self.iteration_limit_hits += 1;
                    tracing::debug!(
                        ?pair,
                        max_iterations = self.max_iterations,
                        "gjk hit the iteration cap, treating pair as separated"
                    );
                }
            }
        }

        colliding
    }

    /// Pairs tested by the last [`Gjk::get_collisions`].
    pub fn checks_made(&self) -> usize {
        self.checks
    }

    /// Pairs that exhausted the iteration cap in the last pass.
    pub fn iteration_limit_hits(&self) -> usize {
        self.iteration_limit_hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn test_segment_through_origin_has_no_direction() {
        let mut simplex = Simplex::new(Vec3::new(1.0, 0.0, 0.0));
        simplex.push(Vec3::new(-1.0, 0.0, 0.0));
        let mut direction = Vec3::X;
        assert!(!simplex.reduce(&mut direction));
        assert_eq!(simplex.len, 2);
        assert!(direction.length_squared() < EPSILON);
    }

    #[test]
    fn test_segment_past_origin_keeps_newest_point() {
        let mut simplex = Simplex::new(Vec3::new(5.0, 0.0, 0.0));
        simplex.push(Vec3::new(2.0, 0.0, 0.0));
        let mut direction = Vec3::ZERO;
        assert!(!simplex.reduce(&mut direction));
        assert_eq!(simplex.len, 1);
        assert_eq!(direction, Vec3::new(-2.0, 0.0, 0.0));
    }

    #[test]
    fn test_tetrahedron_around_origin_encloses() {
        let c = Vec3::new(1.0, 1.0, 1.0);
        let b = Vec3::new(1.0, -1.0, -1.0);
        let a = Vec3::new(-1.0, 1.0, -1.0);
        let mut simplex = Simplex::new(c);
        simplex.push(b);
        simplex.push(a);

        let mut direction = Vec3::ZERO;
        assert!(!simplex.reduce(&mut direction));
        assert_eq!(simplex.len, 3);
        assert_eq!(direction, Vec3::new(-4.0, -4.0, 4.0));

        simplex.push(Vec3::new(-1.0, -1.0, 1.0));
        assert!(simplex.reduce(&mut direction));
    }

    fn at(position: Vec3) -> Mat4 {
        Mat4::from_translation(position)
    }

    fn sphere(radius: f32) -> ColliderShape {
        ColliderShape::sphere(radius).unwrap()
    }

    fn cuboid(half: f32) -> ColliderShape {
        ColliderShape::cuboid(Vec3::splat(half)).unwrap()
    }

    #[test]
    fn test_separated_spheres() {
        let s = sphere(1.0);
        let a = Placed::new(&s, at(Vec3::ZERO));
        let b = Placed::new(&s, at(Vec3::new(3.0, 0.0, 0.0)));
        assert!(matches!(
            gjk_intersection(&a, &b, DEFAULT_MAX_ITERATIONS),
            GjkOutcome::Separated { .. }
        ));
    }

    #[test]
    fn test_overlapping_spheres_within_cap() {
        let s = sphere(1.0);
        let a = Placed::new(&s, at(Vec3::ZERO));
        let b = Placed::new(&s, at(Vec3::new(1.5, 0.2, -0.1)));
        match gjk_intersection(&a, &b, DEFAULT_MAX_ITERATIONS) {
            GjkOutcome::Intersecting { iterations } => assert!(iterations < 100),
            other => panic!("expected intersection, got {other:?}"),
        }
    }

    #[test]
    fn test_concentric_shapes_intersect() {
        let big = sphere(2.0);
        let small = cuboid(0.5);
        let a = Placed::new(&big, at(Vec3::ONE));
        let b = Placed::new(&small, at(Vec3::ONE));
        assert!(gjk_intersection(&a, &b, DEFAULT_MAX_ITERATIONS).is_intersecting());
    }

    #[test]
    fn test_boxes_round_trip() {
        let shape = cuboid(0.5);
        let a = Placed::new(&shape, at(Vec3::ZERO));
        let far = Placed::new(&shape, at(Vec3::new(2.0, 0.0, 0.0)));
        let near = Placed::new(&shape, at(Vec3::new(0.5, 0.3, 0.0)));
        assert!(!gjk_intersection(&a, &far, DEFAULT_MAX_ITERATIONS).is_intersecting());
        assert!(gjk_intersection(&a, &near, DEFAULT_MAX_ITERATIONS).is_intersecting());
    }

    #[test]
    fn test_rotated_box_reaches_further() {
        let shape = cuboid(1.0);
        let a = Placed::new(&shape, at(Vec3::ZERO));
        let rotation = Quat::from_rotation_z(std::f32::consts::FRAC_PI_4);
        // Axis aligned, a box at x = 2.3 leaves a 0.3 gap; rotated 45 degrees
        // its corner sticks out by sqrt(2) and closes it.
        let aligned = Placed::new(&shape, at(Vec3::new(2.3, 0.0, 0.0)));
        let rotated = Placed::new(
            &shape,
            Mat4::from_rotation_translation(rotation, Vec3::new(2.3, 0.0, 0.0)),
        );
        assert!(!gjk_intersection(&a, &aligned, DEFAULT_MAX_ITERATIONS).is_intersecting());
        assert!(gjk_intersection(&a, &rotated, DEFAULT_MAX_ITERATIONS).is_intersecting());
    }

    #[test]
    fn test_sphere_near_box_corner_is_separated() {
        // AABBs overlap, the shapes do not.
        let cube = cuboid(1.0);
        let ball = sphere(1.0);
        let a = Placed::new(&cube, at(Vec3::ZERO));
        let b = Placed::new(&ball, at(Vec3::new(1.8, 1.8, 0.0)));
        assert!(!gjk_intersection(&a, &b, DEFAULT_MAX_ITERATIONS).is_intersecting());

        let b = Placed::new(&ball, at(Vec3::new(1.5, 1.5, 0.0)));
        assert!(gjk_intersection(&a, &b, DEFAULT_MAX_ITERATIONS).is_intersecting());
    }

    #[test]
    fn test_capsule_against_hull() {
        let capsule = ColliderShape::capsule(0.5, 1.0).unwrap();
        let hull = ColliderShape::convex_hull(vec![
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(0.0, 1.0, -1.0),
            Vec3::new(0.0, 0.0, 1.0),
        ])
        .unwrap();
        let a = Placed::new(&capsule, at(Vec3::new(0.0, 0.0, 0.0)));
        let overlapping = Placed::new(&hull, at(Vec3::new(0.5, 0.0, 0.0)));
        let away = Placed::new(&hull, at(Vec3::new(5.0, 0.0, 0.0)));
        assert!(gjk_intersection(&a, &overlapping, DEFAULT_MAX_ITERATIONS).is_intersecting());
        assert!(!gjk_intersection(&a, &away, DEFAULT_MAX_ITERATIONS).is_intersecting());
    }

    #[test]
    fn test_zero_iterations_is_not_a_collision() {
        let s = sphere(1.0);
        let a = Placed::new(&s, at(Vec3::ZERO));
        let b = Placed::new(&s, at(Vec3::new(1.5, 0.0, 0.0)));
        let outcome = gjk_intersection(&a, &b, 0);
        assert_eq!(outcome, GjkOutcome::IterationLimit);
        assert!(!outcome.is_intersecting());
    }

    #[test]
    fn test_get_collisions_filters_candidates() {
        let s = sphere(1.0);
        let worlds = [
            at(Vec3::ZERO),
            at(Vec3::new(1.5, 0.0, 0.0)),
            at(Vec3::new(1.8, 1.8, 0.0)),
        ];
        let pairs = vec![
            CollisionPair::new(ProxyId(0), ProxyId(1)),
            CollisionPair::new(ProxyId(0), ProxyId(2)),
            CollisionPair::new(ProxyId(1), ProxyId(2)),
            CollisionPair::new(ProxyId(1), ProxyId(9)),
        ];

        let mut gjk = Gjk::default();
        let hits = gjk.get_collisions(&pairs, |id| {
            worlds.get(id.0 as usize).map(|w| Placed::new(&s, *w))
        });

        // 0-2 are 2.55 apart (separated); 1-2 are 1.81 apart (overlapping).
        assert_eq!(
            hits,
            vec![
                CollisionPair::new(ProxyId(0), ProxyId(1)),
                CollisionPair::new(ProxyId(1), ProxyId(2)),
            ]
        );
        assert_eq!(gjk.checks_made(), 3);
    }
}
