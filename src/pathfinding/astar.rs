//! Grid A* with a configurable iteration cap, optional diagonal movement,
//! and the grid's temporary-weight overlay (spec §4.7).

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use super::grid::{GridCoord, PathGrid};

const ORTHOGONAL_COST: f32 = 1.0;
const DIAGONAL_COST: f32 = std::f32::consts::SQRT_2;

#[derive(Clone, Copy)]
struct ScoredNode {
    f_score: f32,
    node: GridCoord,
}

impl PartialEq for ScoredNode {
    fn eq(&self, other: &Self) -> bool {
        self.f_score == other.f_score && self.node == other.node
    }
}
impl Eq for ScoredNode {}

impl PartialOrd for ScoredNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the lowest f_score pops first.
        other.f_score.total_cmp(&self.f_score)
    }
}

fn neighbors(node: GridCoord, allow_diagonal: bool) -> Vec<(GridCoord, f32)> {
    let mut out = vec![
        (GridCoord::new(node.x + 1, node.y), ORTHOGONAL_COST),
        (GridCoord::new(node.x - 1, node.y), ORTHOGONAL_COST),
        (GridCoord::new(node.x, node.y + 1), ORTHOGONAL_COST),
        (GridCoord::new(node.x, node.y - 1), ORTHOGONAL_COST),
    ];
    if allow_diagonal {
        out.extend_from_slice(&[
            (GridCoord::new(node.x + 1, node.y + 1), DIAGONAL_COST),
            (GridCoord::new(node.x + 1, node.y - 1), DIAGONAL_COST),
            (GridCoord::new(node.x - 1, node.y + 1), DIAGONAL_COST),
            (GridCoord::new(node.x - 1, node.y - 1), DIAGONAL_COST),
        ]);
    }
    out
}

fn heuristic(a: GridCoord, b: GridCoord) -> f32 {
    let dx = (a.x - b.x) as f32;
    let dy = (a.y - b.y) as f32;
    (dx * dx + dy * dy).sqrt()
}

/// Returns the cell path from `start` to `goal` inclusive, or `None` if no
/// path exists or `max_iterations` is exceeded (spec's "no path" failure
/// semantics — both cases are represented the same way for the caller).
pub fn find_path(
    grid: &PathGrid,
    start: GridCoord,
    goal: GridCoord,
    allow_diagonal: bool,
    max_iterations: u32,
) -> Option<Vec<GridCoord>> {
    if !grid.is_walkable(start) || !grid.is_walkable(goal) {
        return None;
    }
    if start == goal {
        return Some(vec![start]);
    }

    let mut open = BinaryHeap::new();
    let mut g_score: HashMap<GridCoord, f32> = HashMap::new();
    let mut came_from: HashMap<GridCoord, GridCoord> = HashMap::new();
    let mut closed: HashMap<GridCoord, bool> = HashMap::new();

    g_score.insert(start, 0.0);
    open.push(ScoredNode {
        f_score: heuristic(start, goal),
        node: start,
    });

    let mut iterations = 0u32;
    while let Some(ScoredNode { node: current, .. }) = open.pop() {
        if current == goal {
            return Some(reconstruct_path(&came_from, current));
        }

        iterations += 1;
        if iterations > max_iterations {
            return None;
        }

        if closed.get(&current).copied().unwrap_or(false) {
            continue;
        }
        closed.insert(current, true);

        let current_g = g_score.get(&current).copied().unwrap_or(f32::INFINITY);
        for (neighbor, step_cost) in neighbors(current, allow_diagonal) {
            if !grid.is_walkable(neighbor) {
                continue;
            }
            let tentative_g = current_g + step_cost * grid.weight_at(neighbor);
            let best_known = g_score.get(&neighbor).copied().unwrap_or(f32::INFINITY);
            if tentative_g < best_known {
                came_from.insert(neighbor, current);
                g_score.insert(neighbor, tentative_g);
                open.push(ScoredNode {
                    f_score: tentative_g + heuristic(neighbor, goal),
                    node: neighbor,
                });
            }
        }
    }

    None
}

fn reconstruct_path(came_from: &HashMap<GridCoord, GridCoord>, mut current: GridCoord) -> Vec<GridCoord> {
    let mut path = vec![current];
    while let Some(&prev) = came_from.get(&current) {
        path.push(prev);
        current = prev;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_grid(w: u32, h: u32) -> PathGrid {
        let mut grid = PathGrid::new(1.0);
        grid.rebuild([0.0, 0.0], w, h, |_, _| false);
        grid
    }

    #[test]
    fn straight_line_path_on_open_grid() {
        let grid = open_grid(10, 10);
        let path = find_path(&grid, GridCoord::new(0, 0), GridCoord::new(5, 0), false, 1000).unwrap();
        assert_eq!(path.first(), Some(&GridCoord::new(0, 0)));
        assert_eq!(path.last(), Some(&GridCoord::new(5, 0)));
        assert_eq!(path.len(), 6);
    }

    #[test]
    fn routes_around_a_wall_with_a_gap() {
        let mut grid = open_grid(10, 10);
        for y in 0..10 {
            if y != 5 {
                grid.set_tile(5, y, true);
            }
        }
        let path = find_path(&grid, GridCoord::new(0, 0), GridCoord::new(9, 0), true, 20_000).unwrap();
        assert!(path.contains(&GridCoord::new(5, 5)));
    }

    #[test]
    fn fully_enclosed_goal_returns_no_path() {
        let mut grid = open_grid(5, 5);
        for (x, y) in [(0, 1), (1, 0), (2, 1), (1, 2)] {
            grid.set_tile(x, y, true);
        }
        assert!(find_path(&grid, GridCoord::new(4, 4), GridCoord::new(1, 1), true, 20_000).is_none());
    }

    #[test]
    fn exceeding_max_iterations_returns_no_path() {
        let grid = open_grid(200, 200);
        let result = find_path(&grid, GridCoord::new(0, 0), GridCoord::new(199, 199), true, 5);
        assert!(result.is_none());
    }

    #[test]
    fn start_equals_goal_returns_single_cell_path() {
        let grid = open_grid(10, 10);
        let path = find_path(&grid, GridCoord::new(3, 3), GridCoord::new(3, 3), true, 1000).unwrap();
        assert_eq!(path, vec![GridCoord::new(3, 3)]);
    }

    #[test]
    fn unwalkable_endpoint_returns_no_path() {
        let mut grid = open_grid(5, 5);
        grid.set_tile(4, 4, true);
        assert!(find_path(&grid, GridCoord::new(0, 0), GridCoord::new(4, 4), true, 1000).is_none());
    }
}
