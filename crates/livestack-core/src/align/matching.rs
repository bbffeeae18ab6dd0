//! Triangle-invariant star matching.
//!
//! Each star set is turned into triangles built from every star and its
//! nearest neighbours. A triangle is described by the ratios of its two
//! shorter sides to its longest, which do not change under rotation, scale
//! or translation. Triangles with close invariants give candidate
//! similarities; the candidate pairing the most stars wins and is refined by
//! least squares over its inliers.

use std::collections::HashSet;

use rayon::prelude::*;

use super::stars::Star;
use super::transform::Similarity;
use crate::consts::{
    MATCH_RADIUS_PX, MAX_SIMILARITY_SCALE, MIN_SIMILARITY_SCALE, TRIANGLE_INVARIANT_TOLERANCE,
    TRIANGLE_NEIGHBOURS, TRIANGLE_STAR_COUNT,
};

/// Shortest longest-side accepted for a triangle, in pixels.
const MIN_TRIANGLE_SIDE: f64 = 4.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle {
    /// Star indices ordered by the length of the opposite side, longest first.
    pub vertices: [usize; 3],
    /// (middle side / longest side, shortest side / longest side).
    pub invariant: (f64, f64),
}

/// Result of matching a frame's stars against the reference stars.
#[derive(Clone, Debug, PartialEq)]
pub struct StarMatch {
    /// Maps frame coordinates onto reference coordinates.
    pub transform: Similarity,
    /// `(frame star index, reference star index)` for every inlier.
    pub pairs: Vec<(usize, usize)>,
}

fn distance(a: &Star, b: &Star) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Triangles over the brightest stars and their nearest neighbours.
pub fn build_triangles(stars: &[Star]) -> Vec<Triangle> {
    let stars = &stars[..stars.len().min(TRIANGLE_STAR_COUNT)];
    let mut seen = HashSet::new();
    let mut triangles = Vec::new();

    for (i, star) in stars.iter().enumerate() {
        let mut neighbours: Vec<usize> = (0..stars.len()).filter(|&j| j != i).collect();
        neighbours
            .sort_by(|&a, &b| distance(star, &stars[a]).total_cmp(&distance(star, &stars[b])));
        neighbours.truncate(TRIANGLE_NEIGHBOURS);

        for (n, &j) in neighbours.iter().enumerate() {
            for &k in &neighbours[n + 1..] {
                let mut key = [i, j, k];
                key.sort_unstable();
                if !seen.insert(key) {
                    continue;
                }
                if let Some(triangle) = make_triangle(stars, key) {
                    triangles.push(triangle);
                }
            }
        }
    }
    triangles
}

fn make_triangle(stars: &[Star], [i, j, k]: [usize; 3]) -> Option<Triangle> {
    // Side opposite each vertex.
    let mut sides = [
        (distance(&stars[j], &stars[k]), i),
        (distance(&stars[i], &stars[k]), j),
        (distance(&stars[i], &stars[j]), k),
    ];
    sides.sort_by(|a, b| b.0.total_cmp(&a.0));
    let longest = sides[0].0;
    if longest < MIN_TRIANGLE_SIDE {
        return None;
    }
    Some(Triangle {
        vertices: [sides[0].1, sides[1].1, sides[2].1],
        invariant: (sides[1].0 / longest, sides[2].0 / longest),
    })
}

/// Greedy one-to-one pairing of transformed frame stars with reference stars
/// within `MATCH_RADIUS_PX`.
pub fn count_inliers(
    frame: &[Star],
    reference: &[Star],
    transform: &Similarity,
) -> Vec<(usize, usize)> {
    let mut used = vec![false; reference.len()];
    let mut pairs = Vec::new();
    for (fi, star) in frame.iter().enumerate() {
        let (x, y) = transform.apply(star.position());
        let best = reference
            .iter()
            .enumerate()
            .filter(|(ri, _)| !used[*ri])
            .map(|(ri, r)| (ri, (r.x - x).hypot(r.y - y)))
            .filter(|&(_, d)| d <= MATCH_RADIUS_PX)
            .min_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((ri, _)) = best {
            used[ri] = true;
            pairs.push((fi, ri));
        }
    }
    pairs
}

fn plausible(transform: &Similarity) -> bool {
    (MIN_SIMILARITY_SCALE..=MAX_SIMILARITY_SCALE).contains(&transform.scale())
}

/// Best similarity mapping `frame` stars onto `reference` stars, or `None`
/// when no pair of triangles agrees.
pub fn match_stars(frame: &[Star], reference: &[Star]) -> Option<StarMatch> {
    let frame_triangles = build_triangles(frame);
    let reference_triangles = build_triangles(reference);

    frame_triangles
        .par_iter()
        .enumerate()
        .filter_map(|(i, ft)| {
            best_for_triangle(ft, &reference_triangles, frame, reference).map(|m| (i, m))
        })
        .reduce_with(|a, b| {
            let (na, nb) = (a.1.pairs.len(), b.1.pairs.len());
            if nb > na || (nb == na && b.0 < a.0) {
                b
            } else {
                a
            }
        })
        .map(|(_, candidate)| refine(frame, reference, candidate))
}

/// Best hypothesis seeded by one frame triangle, first one wins on ties.
fn best_for_triangle(
    ft: &Triangle,
    reference_triangles: &[Triangle],
    frame: &[Star],
    reference: &[Star],
) -> Option<StarMatch> {
    let mut best: Option<StarMatch> = None;
    for rt in reference_triangles {
        let d = (ft.invariant.0 - rt.invariant.0).hypot(ft.invariant.1 - rt.invariant.1);
        if d > TRIANGLE_INVARIANT_TOLERANCE {
            continue;
        }
        let pairs: Vec<_> = ft
            .vertices
            .iter()
            .zip(rt.vertices.iter())
            .map(|(&f, &r)| (frame[f].position(), reference[r].position()))
            .collect();
        let Some(transform) = Similarity::fit(&pairs) else {
            continue;
        };
        if !plausible(&transform) {
            continue;
        }
        let inliers = count_inliers(frame, reference, &transform);
        if best.as_ref().map_or(true, |b| inliers.len() > b.pairs.len()) {
            best = Some(StarMatch {
                transform,
                pairs: inliers,
            });
        }
    }
    best
}

fn refine(frame: &[Star], reference: &[Star], candidate: StarMatch) -> StarMatch {
    let pairs: Vec<_> = candidate
        .pairs
        .iter()
        .map(|&(f, r)| (frame[f].position(), reference[r].position()))
        .collect();
    let Some(transform) = Similarity::fit(&pairs).filter(plausible) else {
        return candidate;
    };
    let inliers = count_inliers(frame, reference, &transform);
    if inliers.len() >= candidate.pairs.len() {
        StarMatch {
            transform,
            pairs: inliers,
        }
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star(x: f64, y: f64) -> Star {
        Star {
            x,
            y,
            flux: 1.0,
            area: 4,
        }
    }

    #[test]
    fn invariants_survive_similarity() {
        let stars = vec![star(0.0, 0.0), star(30.0, 0.0), star(10.0, 20.0)];
        let t = Similarity::from_parts(1.1, 0.4, 5.0, -3.0);
        let moved: Vec<_> = stars
            .iter()
            .map(|s| {
                let (x, y) = t.apply(s.position());
                star(x, y)
            })
            .collect();
        let a = build_triangles(&stars);
        let b = build_triangles(&moved);
        assert_eq!(a.len(), 1);
        assert!((a[0].invariant.0 - b[0].invariant.0).abs() < 1e-9);
        assert!((a[0].invariant.1 - b[0].invariant.1).abs() < 1e-9);
        assert_eq!(a[0].vertices, b[0].vertices);
    }

    #[test]
    fn tiny_triangles_are_ignored() {
        let stars = vec![star(0.0, 0.0), star(1.0, 0.0), star(0.0, 1.0)];
        assert!(build_triangles(&stars).is_empty());
    }

    #[test]
    fn inliers_are_one_to_one() {
        let reference = vec![star(10.0, 10.0)];
        let frame = vec![star(10.5, 10.0), star(9.5, 10.0)];
        let pairs = count_inliers(&frame, &reference, &Similarity::identity());
        assert_eq!(pairs.len(), 1);
    }
}
