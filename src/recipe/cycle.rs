//! Cycle detection over producer edges between steps.

use std::collections::HashMap;

use camino::Utf8PathBuf;

use super::step::Step;

/// Tracks the visitation state of a step during cycle detection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum VisitState {
    Visiting,
    Visited,
}

/// Find a dependency cycle among `steps`, returned as shortcuts with the
/// first one repeated at the end.
pub(crate) fn find_cycle(steps: &[Step]) -> Option<Vec<String>> {
    let producers: HashMap<&Utf8PathBuf, usize> = steps
        .iter()
        .enumerate()
        .flat_map(|(index, step)| step.outputs.iter().map(move |output| (output, index)))
        .collect();
    let edges: Vec<Vec<usize>> = steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            let mut deps: Vec<usize> = step
                .inputs
                .iter()
                .filter_map(|input| producers.get(input).copied())
                .filter(|&producer| producer != index)
                .collect();
            deps.sort_unstable();
            deps.dedup();
            deps
        })
        .collect();

    let mut detector = CycleDetector::new(&edges);
    let cycle = (0..steps.len()).find_map(|node| {
        if detector.is_visited(node) {
            None
        } else {
            detector.visit(node)
        }
    })?;
    let names = cycle
        .into_iter()
        .filter_map(|index| steps.get(index))
        .map(|step| step.shortcut.clone())
        .collect();
    Some(canonicalize_cycle(names))
}

struct CycleDetector<'a> {
    edges: &'a [Vec<usize>],
    stack: Vec<usize>,
    states: HashMap<usize, VisitState>,
}

impl<'a> CycleDetector<'a> {
    fn new(edges: &'a [Vec<usize>]) -> Self {
        Self {
            edges,
            stack: Vec::new(),
            states: HashMap::new(),
        }
    }

    fn is_visited(&self, node: usize) -> bool {
        matches!(self.states.get(&node), Some(VisitState::Visited))
    }

    fn visit(&mut self, node: usize) -> Option<Vec<usize>> {
        match self.states.get(&node) {
            Some(VisitState::Visited) => return None,
            Some(VisitState::Visiting) => {
                let start = self.stack.iter().position(|&n| n == node).unwrap_or(0);
                let mut cycle: Vec<usize> = self.stack.iter().skip(start).copied().collect();
                cycle.push(node);
                return Some(cycle);
            }
            None => {
                self.states.insert(node, VisitState::Visiting);
            }
        }

        self.stack.push(node);
        let edges = self.edges;
        let deps = edges.get(node).map(Vec::as_slice).unwrap_or_default();
        for &dep in deps {
            if let Some(cycle) = self.visit(dep) {
                return Some(cycle);
            }
        }
        self.stack.pop();
        self.states.insert(node, VisitState::Visited);
        None
    }
}

/// Rotate the cycle so it starts at its smallest name.
fn canonicalize_cycle(mut cycle: Vec<String>) -> Vec<String> {
    if cycle.len() < 2 {
        return cycle;
    }
    let len = cycle.len() - 1;
    let start = cycle
        .iter()
        .take(len)
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map_or(0, |(idx, _)| idx);
    let (prefix, suffix) = cycle.split_at_mut(len);
    prefix.rotate_left(start);
    if let (Some(first), Some(slot)) = (prefix.first().cloned(), suffix.first_mut()) {
        *slot = first;
    }
    cycle
}
