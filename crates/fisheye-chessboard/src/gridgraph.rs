//! 4-connected graph over chessboard corner candidates and integer grid
//! labelling of its connected components.

use crate::params::GridGraphParams;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Point2, Vector2};
use std::collections::{HashMap, VecDeque};
use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

/// Corner candidate: position, saddle orientation (modulo π) and response.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Corner {
    pub position: Point2<f32>,
    /// Direction of one saddle diagonal, radians, defined modulo π.
    pub orientation: f32,
    pub strength: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct NodeNeighbor {
    pub index: usize,
    pub distance: f32,
    /// Unit vector from the node towards the neighbor.
    pub direction: Vector2<f32>,
    pub score: f32,
}

/// Absolute difference between two angles, in `[0, π]`.
fn angle_diff_abs(a: f32, b: f32) -> f32 {
    let mut diff = (b - a).rem_euclid(2.0 * PI);
    if diff >= PI {
        diff -= 2.0 * PI;
    }
    diff.abs()
}

/// Angle between an undirected axis (modulo π) and a directed angle, in `[0, π/2]`.
fn axis_vec_diff(axis_angle: f32, vec_angle: f32) -> f32 {
    let d = angle_diff_abs(axis_angle, vec_angle);
    d.min(PI - d)
}

fn is_good_neighbor(
    corner: &Corner,
    neighbor: &Corner,
    index: usize,
    params: &GridGraphParams,
) -> Option<NodeNeighbor> {
    let tol = params.orientation_tolerance_deg.to_radians();

    // Adjacent chessboard corners have their saddle diagonals swapped.
    let rel = axis_vec_diff(corner.orientation, neighbor.orientation);
    if (FRAC_PI_2 - rel).abs() > tol {
        return None;
    }

    let delta = neighbor.position - corner.position;
    let distance = delta.norm();
    if distance < params.min_spacing_pix || distance > params.max_spacing_pix {
        return None;
    }

    // Grid edges run at 45° to the diagonals of both endpoints.
    let edge_angle = delta.y.atan2(delta.x);
    let score_corner = (axis_vec_diff(corner.orientation, edge_angle) - FRAC_PI_4).abs();
    let score_neighbor = (axis_vec_diff(neighbor.orientation, edge_angle) - FRAC_PI_4).abs();
    if score_corner > tol || score_neighbor > tol {
        return None;
    }

    Some(NodeNeighbor {
        index,
        distance,
        direction: delta / distance,
        score: score_corner + score_neighbor + (FRAC_PI_2 - rel).abs(),
    })
}

/// Keep at most one neighbor per half-axis: candidates pointing in similar
/// directions compete, the lower score (then the shorter edge) wins.
fn select_neighbors(mut candidates: Vec<NodeNeighbor>) -> Vec<NodeNeighbor> {
    candidates.sort_by(|a, b| {
        a.score
            .total_cmp(&b.score)
            .then(a.distance.total_cmp(&b.distance))
    });

    let mut kept: Vec<NodeNeighbor> = Vec::with_capacity(4);
    for c in candidates {
        // cos(45°): anything closer than that shares a half-axis with a kept edge.
        let clashes = kept
            .iter()
            .any(|k| k.direction.dot(&c.direction) > std::f32::consts::FRAC_1_SQRT_2);
        if !clashes && kept.len() < 4 {
            kept.push(c);
        }
    }
    kept
}

/// An edge is followed only when its projection on one local axis is at
/// least this many times its projection on the other (about 34 degrees).
const AXIS_DOMINANCE: f32 = 1.5;

pub struct GridGraph {
    pub neighbors: Vec<Vec<NodeNeighbor>>,
}

impl GridGraph {
    pub fn new(corners: &[Corner], params: &GridGraphParams) -> Self {
        let coords = corners
            .iter()
            .map(|c| [c.position.x, c.position.y])
            .collect::<Vec<_>>();
        let tree: KdTree<f32, 2> = (&coords).into();

        let mut neighbors: Vec<Vec<NodeNeighbor>> = corners
            .iter()
            .enumerate()
            .map(|(i, corner)| {
                let query = [corner.position.x, corner.position.y];
                let candidates = tree
                    .nearest_n::<SquaredEuclidean>(&query, params.k_neighbors + 1)
                    .into_iter()
                    .map(|nn| nn.item as usize)
                    .filter(|&j| j != i)
                    .filter_map(|j| is_good_neighbor(corner, &corners[j], j, params))
                    .collect();
                select_neighbors(candidates)
            })
            .collect();

        // Only keep mutual edges.
        let snapshot: Vec<Vec<usize>> = neighbors
            .iter()
            .map(|n| n.iter().map(|e| e.index).collect())
            .collect();
        for (i, list) in neighbors.iter_mut().enumerate() {
            list.retain(|e| snapshot[e.index].contains(&i));
        }

        Self { neighbors }
    }

    pub fn connected_components(&self) -> Vec<Vec<usize>> {
        let mut visited = vec![false; self.neighbors.len()];
        let mut components = Vec::new();

        for start in 0..self.neighbors.len() {
            if visited[start] {
                continue;
            }

            let mut component = Vec::new();
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                if visited[node] {
                    continue;
                }
                visited[node] = true;
                component.push(node);
                stack.extend(
                    self.neighbors[node]
                        .iter()
                        .map(|n| n.index)
                        .filter(|&j| !visited[j]),
                );
            }
            components.push(component);
        }
        components
    }

    /// BFS over one component, assigning integer `(i, j)` coordinates.
    ///
    /// Each node carries local grid axes which are re-anchored on every edge,
    /// so the labelling follows the board through rotation and strong
    /// distortion. Edges that run diagonally to the local axes are not
    /// followed. The first label reaching a node wins; a node arriving at a
    /// label that is already taken stays unlabelled, so stray candidates
    /// hanging off the board never displace board corners.
    pub fn assign_grid_coordinates(&self, component: &[usize]) -> Option<HashMap<usize, (i32, i32)>> {
        let start = *component
            .iter()
            .max_by_key(|&&n| self.neighbors[n].len())?;
        let first = self.neighbors[start].first()?;
        let u0 = first.direction;
        // Prefer a measured second axis: perspective shears the board.
        let v0 = self.neighbors[start]
            .iter()
            .map(|n| n.direction)
            .filter(|d| d.dot(&u0).abs() < 0.5)
            .min_by(|a, b| a.dot(&u0).abs().total_cmp(&b.dot(&u0).abs()))
            .unwrap_or_else(|| Vector2::new(-u0.y, u0.x));

        let mut labels: HashMap<usize, (i32, i32)> = HashMap::with_capacity(component.len());
        let mut taken: HashMap<(i32, i32), usize> = HashMap::with_capacity(component.len());
        let mut queue = VecDeque::new();
        queue.push_back((start, (0, 0), u0, v0));

        while let Some((node, ij, u, v)) = queue.pop_front() {
            if labels.contains_key(&node) || taken.contains_key(&ij) {
                continue;
            }
            taken.insert(ij, node);
            labels.insert(node, ij);

            for nb in &self.neighbors[node] {
                if labels.contains_key(&nb.index) {
                    continue;
                }
                let e = nb.direction;
                let (du, dv) = (e.dot(&u), e.dot(&v));
                let (a, b) = (du.abs(), dv.abs());
                if a.max(b) < AXIS_DOMINANCE * a.min(b) {
                    continue;
                }
                let (step, nu, nv) = if a >= b {
                    let s = du.signum();
                    ((s as i32, 0), e * s, v)
                } else {
                    let s = dv.signum();
                    ((0, s as i32), u, e * s)
                };
                queue.push_back((nb.index, (ij.0 + step.0, ij.1 + step.1), nu, nv));
            }
        }
        Some(labels)
    }

    /// True when every edge between two labelled nodes is a unit grid step.
    pub fn labels_consistent(&self, labels: &HashMap<usize, (i32, i32)>) -> bool {
        labels.iter().all(|(&node, &(i, j))| {
            self.neighbors[node].iter().all(|nb| match labels.get(&nb.index) {
                Some(&(ni, nj)) => (ni - i).abs() + (nj - j).abs() == 1,
                None => true,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_corner(x: f32, y: f32, orientation: f32) -> Corner {
        Corner {
            position: Point2::new(x, y),
            orientation,
            strength: 1.0,
        }
    }

    fn regular_grid(cols: usize, rows: usize, spacing: f32, angle: f32) -> Vec<Corner> {
        let (s, c) = angle.sin_cos();
        let mut corners = Vec::new();
        for j in 0..rows {
            for i in 0..cols {
                let x = i as f32 * spacing;
                let y = j as f32 * spacing;
                let orientation = angle
                    + if (i + j) % 2 == 0 {
                        FRAC_PI_4
                    } else {
                        3.0 * FRAC_PI_4
                    };
                corners.push(make_corner(100.0 + c * x - s * y, 100.0 + s * x + c * y, orientation));
            }
        }
        corners
    }

    fn params() -> GridGraphParams {
        GridGraphParams {
            min_spacing_pix: 5.0,
            max_spacing_pix: 15.0,
            ..Default::default()
        }
    }

    #[test]
    fn finds_axis_neighbors_in_regular_grid() {
        let corners = regular_grid(3, 3, 10.0, 0.0);
        let graph = GridGraph::new(&corners, &params());

        let idx = |i: usize, j: usize| j * 3 + i;
        let mut center: Vec<usize> = graph.neighbors[idx(1, 1)].iter().map(|n| n.index).collect();
        center.sort_unstable();
        assert_eq!(center, vec![idx(1, 0), idx(0, 1), idx(2, 1), idx(1, 2)]);
        assert_eq!(graph.neighbors[idx(0, 0)].len(), 2);
        assert_eq!(graph.neighbors[idx(1, 0)].len(), 3);
    }

    #[test]
    fn rejects_parallel_orientations() {
        let corners = vec![
            make_corner(0.0, 0.0, FRAC_PI_4),
            make_corner(10.0, 0.0, FRAC_PI_4),
        ];
        let graph = GridGraph::new(&corners, &params());
        assert!(graph.neighbors.iter().all(|n| n.is_empty()));
    }

    #[test]
    fn rejects_neighbors_outside_distance_window() {
        let corners = vec![
            make_corner(0.0, 0.0, FRAC_PI_4),
            make_corner(30.0, 0.0, 3.0 * FRAC_PI_4),
        ];
        let graph = GridGraph::new(&corners, &params());
        assert!(graph.neighbors.iter().all(|n| n.is_empty()));
    }

    #[test]
    fn labels_rotated_grid_consistently() {
        let corners = regular_grid(4, 3, 10.0, 0.6);
        let graph = GridGraph::new(&corners, &params());
        let components = graph.connected_components();
        assert_eq!(components.len(), 1);

        let labels = graph.assign_grid_coordinates(&components[0]).expect("labels");
        assert_eq!(labels.len(), 12);
        let is: Vec<i32> = labels.values().map(|l| l.0).collect();
        let js: Vec<i32> = labels.values().map(|l| l.1).collect();
        let span_i = is.iter().max().unwrap() - is.iter().min().unwrap() + 1;
        let span_j = js.iter().max().unwrap() - js.iter().min().unwrap() + 1;
        let mut spans = [span_i, span_j];
        spans.sort_unstable();
        assert_eq!(spans, [3, 4]);
    }

    fn edge(index: usize, dx: f32, dy: f32) -> NodeNeighbor {
        let direction = Vector2::new(dx, dy);
        NodeNeighbor {
            index,
            distance: 10.0 * direction.norm(),
            direction: direction.normalize(),
            score: 0.0,
        }
    }

    #[test]
    fn stray_node_does_not_displace_board_labels() {
        let corners = regular_grid(3, 3, 10.0, 0.0);
        let mut graph = GridGraph::new(&corners, &params());

        // node 9 hangs above (0, 0) and leans into (1, 0) almost horizontally
        graph.neighbors.push(vec![edge(0, 0.0, 1.0), edge(1, 0.9, 0.44)]);
        graph.neighbors[0].push(edge(9, 0.0, -1.0));
        graph.neighbors[1].push(edge(9, -0.9, -0.44));

        let component: Vec<usize> = (0..10).collect();
        let labels = graph.assign_grid_coordinates(&component).expect("labels");
        let board: HashMap<usize, (i32, i32)> = labels
            .iter()
            .filter(|(&n, _)| n < 9)
            .map(|(&n, &l)| (n, l))
            .collect();
        assert_eq!(board.len(), 9);
        let distinct: std::collections::HashSet<_> = board.values().collect();
        assert_eq!(distinct.len(), 9);
        assert!(graph.labels_consistent(&board));
        if let Some(stray) = labels.get(&9) {
            assert!(!board.values().any(|l| l == stray));
        }
    }

    #[test]
    fn diagonal_edges_are_not_followed() {
        let corners = regular_grid(2, 2, 10.0, 0.0);
        let mut graph = GridGraph::new(&corners, &params());
        graph.neighbors.push(vec![edge(3, -0.7, -0.7)]);
        graph.neighbors[3].push(edge(4, 0.7, 0.7));

        let labels = graph.assign_grid_coordinates(&[0, 1, 2, 3, 4]).expect("labels");
        assert_eq!(labels.len(), 4);
        assert!(!labels.contains_key(&4));
        assert!(graph.labels_consistent(&labels));
    }
}
