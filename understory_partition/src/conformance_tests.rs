// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Behavior every partition must share, run against each implementation.
//!
//! The compressed tree answers on rounded-outward bounds, so for it results are only
//! required to be supersets of the exact answer.

use alloc::vec::Vec;

use crate::backends::{
    AabbTreeF64, AdaptiveAabbTree, CompressedAabbTree, DynamicAabbTree, SweepAndPrune,
};
use crate::test_support::{
    Body, boxed, brute_force_cross, brute_force_pairs, brute_force_query, ids, random_scene,
    sorted_pairs,
};
use crate::{Aabb3D, Error, Ray3D, SpatialPartition};

/// Compare a result with the brute-force answer: equal when `exact`, a superset otherwise.
fn check<T: PartialEq + core::fmt::Debug>(found: &[T], expected: &[T], exact: bool) {
    if exact {
        assert_eq!(found, expected);
    } else {
        for e in expected {
            assert!(found.contains(e), "missing {e:?} in {found:?}");
        }
    }
}

fn assert_unique<T: PartialEq + core::fmt::Debug>(sorted: &[T]) {
    for w in sorted.windows(2) {
        assert_ne!(w[0], w[1], "reported twice");
    }
}

fn filled<S: SpatialPartition<f64, Body>>(mut s: S, bodies: &[Body]) -> S {
    for b in bodies {
        let _ = s.add(b.clone()).unwrap();
    }
    s
}

/// Ids of bodies hit by the segment, sorted.
fn brute_force_ray(bodies: &[Body], ray: &Ray3D<f64>, max_len: f64) -> Vec<u32> {
    let mut out: Vec<_> = bodies
        .iter()
        .filter(|b| b.aabb.intersect_ray(ray, max_len).is_some())
        .map(|b| b.id)
        .collect();
    out.sort_unstable();
    out
}

macro_rules! conformance {
    ($name:ident, $make:expr, exact = $exact:expr) => {
        mod $name {
            use super::*;

            const EXACT: bool = $exact;

            fn make() -> impl SpatialPartition<f64, Body> {
                $make
            }

            #[test]
            fn empty_partition_reports_nothing() {
                let s = make();
                assert!(s.is_empty());
                assert_eq!(s.len(), 0);
                assert_eq!(s.query_aabb(boxed([-1e9; 3], 2e9)).count(), 0);
                let ray = Ray3D::new([0.; 3], [1., 0., 0.]);
                assert_eq!(s.query_ray(ray, 1e9).count(), 0);
                assert_eq!(s.pairs().count(), 0);
                assert_eq!(s.pairs_with(&make()).count(), 0);
            }

            #[test]
            fn two_disjoint_boxes() {
                let bodies = [
                    Body::new(1, boxed([0.; 3], 1.)),
                    Body::new(2, boxed([3., 0., 0.], 1.)),
                ];
                let s = filled(make(), &bodies);
                assert_eq!(s.pairs().count(), 0);
                assert_eq!(ids(s.query_point([0.5; 3])), [1]);
                assert_eq!(ids(s.query_point([3.5, 0.5, 0.5])), [2]);
                assert_eq!(ids(s.query_aabb(boxed([0.5, 0., 0.], 3.))), [1, 2]);
            }

            #[test]
            fn query_between_boxes_misses() {
                let bodies = [
                    Body::new(1, boxed([0.; 3], 1.)),
                    Body::new(2, boxed([10.; 3], 1.)),
                ];
                let s = filled(make(), &bodies);
                assert_eq!(s.query_aabb(Aabb3D::new([5.; 3], [6.; 3])).count(), 0);
                assert_eq!(s.query_point([5.5; 3]).count(), 0);
                assert_eq!(ids(s.query_aabb(Aabb3D::new([0.5; 3], [10.5; 3]))), [1, 2]);
            }

            #[test]
            fn two_overlapping_boxes() {
                let bodies = [
                    Body::new(1, boxed([0.; 3], 1.)),
                    Body::new(2, boxed([0.5, 0.5, 0.5], 1.)),
                ];
                let s = filled(make(), &bodies);
                assert_eq!(sorted_pairs(s.pairs()), [(1, 2)]);
                let mut visited = 0;
                s.visit_pairs(|_, _| visited += 1);
                assert_eq!(visited, 1);
            }

            #[test]
            fn queries_are_sound() {
                let bodies = random_scene(101, 100, 0);
                let s = filled(make(), &bodies);
                for q in random_scene(102, 30, 1000) {
                    let found = ids(s.query_aabb(q.aabb));
                    assert_unique(&found);
                    check(&found, &brute_force_query(&bodies, &q.aabb), EXACT);

                    let mut visited = Vec::new();
                    s.visit_aabb(q.aabb, |b| visited.push(b.id));
                    visited.sort_unstable();
                    assert_eq!(visited, found);
                }
                let rays = [
                    (Ray3D::new([-5., 50., 50.], [1., 0., 0.]), 200.),
                    (Ray3D::new([50., -5., 20.], [0., 1., 0.]), 60.),
                    (Ray3D::new([0., 0., 0.], [0.577, 0.577, 0.577]), 90.),
                    (Ray3D::new([100., 100., 100.], [-1., -0.5, 0.]), 30.),
                ];
                for (ray, len) in rays {
                    let found = ids(s.query_ray(ray, len));
                    assert_unique(&found);
                    check(&found, &brute_force_ray(&bodies, &ray, len), EXACT);
                }
            }

            #[test]
            fn pairs_are_reported_once() {
                let bodies = random_scene(103, 100, 0);
                let s = filled(make(), &bodies);
                let found = sorted_pairs(s.pairs());
                assert_unique(&found);
                for (a, b) in &found {
                    assert_ne!(a, b, "an item never pairs with itself");
                }
                check(&found, &brute_force_pairs(&bodies), EXACT);
            }

            #[test]
            fn cross_pairs_match_brute_force() {
                for (i, n) in [0_usize, 1, 2, 10, 100].into_iter().enumerate() {
                    let seed = 200 + i as u64 * 2;
                    let left = random_scene(seed, n, 0);
                    let right = random_scene(seed + 1, n.max(3), 10_000);
                    let expected = brute_force_cross(&left, &right);

                    let mine = filled(make(), &left);
                    let theirs = filled(make(), &right);
                    let mut found: Vec<_> = mine
                        .pairs_with(&theirs)
                        .map(|(a, b)| (a.id, b.id))
                        .collect();
                    found.sort_unstable();
                    assert_unique(&found);
                    check(&found, &expected, EXACT);

                    // Against an exact partition of another kind the answer is exact.
                    let exact = filled(SweepAndPrune::<f64, Body>::new(), &right);
                    let mut found: Vec<_> = mine
                        .pairs_with(&exact)
                        .map(|(a, b)| (a.id, b.id))
                        .collect();
                    found.sort_unstable();
                    assert_eq!(found, expected, "{n} items");
                }
            }

            #[test]
            fn update_is_idempotent() {
                let bodies = random_scene(104, 60, 0);
                let mut s = filled(make(), &bodies);
                let pairs = sorted_pairs(s.pairs());
                let q = boxed([20.; 3], 40.);
                let hits = ids(s.query_aabb(q));
                for b in &bodies[..20] {
                    let k1 = s.update(b.clone()).unwrap();
                    let k2 = s.update(b.clone()).unwrap();
                    assert_eq!(k1, k2);
                    assert_eq!(s.key_of(b), Some(k1));
                }
                assert_eq!(s.len(), 60);
                assert_eq!(sorted_pairs(s.pairs()), pairs);
                assert_eq!(ids(s.query_aabb(q)), hits);
            }

            #[test]
            fn add_then_remove_is_a_no_op() {
                let bodies = random_scene(105, 60, 0);
                let mut s = filled(make(), &bodies);
                let pairs = sorted_pairs(s.pairs());
                let q = boxed([10.; 3], 60.);
                let hits = ids(s.query_aabb(q));

                let extra = Body::new(500, boxed([30.; 3], 20.));
                let key = s.add(extra.clone()).unwrap();
                assert!(s.contains(&extra));
                assert_eq!(s.get(key).map(|b| b.id), Some(500));
                assert_eq!(s.remove(&extra).unwrap().id, 500);

                assert!(!s.contains(&extra));
                assert_eq!(s.get(key), None, "stale key");
                assert_eq!(s.len(), 60);
                assert_eq!(sorted_pairs(s.pairs()), pairs);
                assert_eq!(ids(s.query_aabb(q)), hits);
            }

            #[test]
            fn moving_item_is_reclassified() {
                let mut bodies: Vec<_> = (0..50)
                    .map(|i| {
                        let (x, y) = (f64::from(i % 10) * 2., f64::from(i / 10) * 2.);
                        Body::new(i, boxed([x, y, 0.], 1.))
                    })
                    .collect();
                let mut s = filled(make(), &bodies);
                assert_eq!(s.pairs().count(), 0);

                bodies.push(Body::new(100, boxed([-3., 1.8, 0.2], 0.5)));
                let _ = s.add(bodies[50].clone()).unwrap();
                for step in 0..50 {
                    let mover = &mut bodies[50];
                    let x = -3. + f64::from(step) * 0.5;
                    let y = 1.8 + f64::from(step % 7) * 0.3;
                    mover.aabb = boxed([x, y, 0.2], 0.5);
                    let _ = s.update(mover.clone()).unwrap();

                    let found = sorted_pairs(s.pairs());
                    assert_unique(&found);
                    check(&found, &brute_force_pairs(&bodies), EXACT);
                    let spot = bodies[50].aabb;
                    check(&ids(s.query_aabb(spot)), &brute_force_query(&bodies, &spot), EXACT);
                }
            }

            #[test]
            fn grid_item_moved_far_away() {
                let mut bodies: Vec<_> = (0..50)
                    .map(|i| {
                        let (x, y) = (f64::from(i % 10) * 2., f64::from(i / 10) * 2.);
                        Body::new(i, boxed([x, y, 0.], 1.))
                    })
                    .collect();
                let mut s = filled(make(), &bodies);

                bodies[7].aabb = boxed([100.; 3], 1.);
                let _ = s.update(bodies[7].clone()).unwrap();
                assert_eq!(s.len(), 50);
                assert_eq!(s.query_point([14.5, 0.5, 0.5]).count(), 0, "old spot is empty");
                assert_eq!(ids(s.query_point([100.5; 3])), [7]);
                assert_eq!(s.pairs().count(), 0);

                // Back into the grid, onto item 23.
                bodies[7].aabb = boxed([6.5, 4.5, 0.], 1.);
                let _ = s.update(bodies[7].clone()).unwrap();
                assert_eq!(s.query_point([100.5; 3]).count(), 0);
                assert_eq!(sorted_pairs(s.pairs()), [(7, 23)]);
                let spot = bodies[7].aabb;
                check(&ids(s.query_aabb(spot)), &brute_force_query(&bodies, &spot), EXACT);
            }

            #[test]
            fn errors_leave_the_partition_unchanged() {
                let original = Body::new(1, boxed([0.; 3], 1.));
                let mut s = filled(make(), &[original.clone(), Body::new(2, boxed([5.; 3], 1.))]);

                assert_eq!(s.add(original.clone()), Err(Error::DuplicateItem));
                let ghost = Body::new(3, boxed([0.; 3], 1.));
                assert_eq!(s.remove(&ghost).unwrap_err(), Error::NotFound);
                assert_eq!(s.update(ghost.clone()), Err(Error::NotFound));

                let nan = Aabb3D::new([f64::NAN, 0., 0.], [1., 1., 1.]);
                let inverted = Aabb3D::new([2., 0., 0.], [1., 1., 1.]);
                let infinite = Aabb3D::new([0., 0., 0.], [f64::INFINITY, 1., 1.]);
                for bad in [nan, inverted, infinite] {
                    assert_eq!(s.add(Body::new(4, bad)), Err(Error::InvalidAabb));
                    assert_eq!(s.update(Body::new(1, bad)), Err(Error::InvalidAabb));
                }

                assert_eq!(s.len(), 2);
                assert!(!s.contains(&Body::new(4, boxed([0.; 3], 0.))));
                let stored: Vec<_> = s.items().filter(|(b, _)| b.id == 1).map(|(_, a)| a).collect();
                assert_eq!(stored, [original.aabb]);
                assert_eq!(ids(s.query_point([0.5; 3])), [1]);
            }

            #[test]
            fn clear_and_rebuild() {
                let bodies = random_scene(106, 80, 0);
                let mut s = filled(make(), &bodies);
                let pairs = sorted_pairs(s.pairs());
                s.rebuild().unwrap();
                assert_eq!(sorted_pairs(s.pairs()), pairs);
                assert_eq!(s.len(), 80);

                let key = s.key_of(&bodies[0]).unwrap();
                s.clear();
                assert!(s.is_empty());
                assert_eq!(s.get(key), None);
                assert_eq!(s.pairs().count(), 0);

                let s = filled(s, &bodies[..10]);
                assert_eq!(s.len(), 10);
                check(&sorted_pairs(s.pairs()), &brute_force_pairs(&bodies[..10]), EXACT);
            }
        }
    };
}

conformance!(aabb_tree, AabbTreeF64::<Body>::new(), exact = true);
conformance!(dynamic_tree, DynamicAabbTree::<f64, Body>::new(), exact = true);
conformance!(adaptive_tree, AdaptiveAabbTree::<f64, Body>::new(), exact = true);
conformance!(compressed_tree, CompressedAabbTree::<f64, Body>::new(), exact = false);
conformance!(sweep_and_prune, SweepAndPrune::<f64, Body>::new(), exact = true);
