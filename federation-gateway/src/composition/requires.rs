//! `@requires` dependency extraction and cycle detection.

use std::collections::HashMap;

use indexmap::IndexMap;
use petgraph::Direction;
use petgraph::graph::DiGraph;
use petgraph::graph::NodeIndex;

use super::ownership::Declaration;
use crate::directives::FieldSet;
use crate::error::CompositionError;
use crate::error::CompositionErrorCode;
use crate::supergraph::FieldCoordinate;
use crate::supergraph::SupergraphType;

/// Edges from a field to every field its `@requires` selects.
#[derive(Clone, Debug, Default)]
pub(crate) struct RequiresGraph {
    graph: DiGraph<FieldCoordinate, ()>,
    indices: HashMap<FieldCoordinate, NodeIndex>,
}

impl RequiresGraph {
    /// Build the graph from the merged types.
    pub(crate) fn build(types: &IndexMap<String, SupergraphType>) -> RequiresGraph {
        let mut graph = RequiresGraph::default();
        for ty in types.values() {
            for field in ty.fields.values() {
                if let Some(requires) = &field.requires {
                    let from = graph.node(FieldCoordinate::new(&ty.name, &field.name));
                    graph.add_selection_edges(types, from, &ty.name, requires);
                }
            }
        }
        graph
    }

    fn node(&mut self, coordinate: FieldCoordinate) -> NodeIndex {
        if let Some(index) = self.indices.get(&coordinate) {
            return *index;
        }
        let index = self.graph.add_node(coordinate.clone());
        self.indices.insert(coordinate, index);
        index
    }

    fn add_selection_edges(
        &mut self,
        types: &IndexMap<String, SupergraphType>,
        from: NodeIndex,
        type_name: &str,
        selection: &FieldSet,
    ) {
        for item in selection.iter() {
            let to = self.node(FieldCoordinate::new(type_name, &item.name));
            if !self.graph.contains_edge(from, to) {
                self.graph.add_edge(from, to, ());
            }
            if !item.selections.is_empty() {
                let nested = types
                    .get(type_name)
                    .and_then(|ty| ty.fields.get(&item.name))
                    .map(|field| field.ty.named_type().to_string());
                if let Some(nested) = nested {
                    self.add_selection_edges(types, from, &nested, &item.selections);
                }
            }
        }
    }

    /// The fields `coordinate` depends on, in declaration order.
    pub(crate) fn dependencies(&self, coordinate: &FieldCoordinate) -> Vec<FieldCoordinate> {
        let Some(index) = self.indices.get(coordinate) else {
            return Vec::new();
        };
        // petgraph yields the most recent edge first
        let mut dependencies: Vec<FieldCoordinate> = self
            .graph
            .neighbors_directed(*index, Direction::Outgoing)
            .map(|neighbor| self.graph[neighbor].clone())
            .collect();
        dependencies.reverse();
        dependencies
    }

    /// Every cycle reachable in the graph, each as the list of fields in
    /// cycle order. Found by depth-first traversal with visiting/visited
    /// colouring; each back edge yields one cycle.
    pub(crate) fn cycles(&self) -> Vec<Vec<FieldCoordinate>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            Unvisited,
            Visiting,
            Visited,
        }

        fn visit(
            graph: &RequiresGraph,
            node: NodeIndex,
            colors: &mut [Color],
            stack: &mut Vec<NodeIndex>,
            cycles: &mut Vec<Vec<FieldCoordinate>>,
        ) {
            colors[node.index()] = Color::Visiting;
            stack.push(node);
            let mut neighbors: Vec<NodeIndex> = graph
                .graph
                .neighbors_directed(node, Direction::Outgoing)
                .collect();
            neighbors.reverse();
            for neighbor in neighbors {
                match colors[neighbor.index()] {
                    Color::Unvisited => visit(graph, neighbor, colors, stack, cycles),
                    Color::Visiting => {
                        let start = stack
                            .iter()
                            .position(|candidate| *candidate == neighbor)
                            .unwrap_or_default();
                        cycles.push(
                            stack[start..]
                                .iter()
                                .map(|index| graph.graph[*index].clone())
                                .collect(),
                        );
                    }
                    Color::Visited => {}
                }
            }
            stack.pop();
            colors[node.index()] = Color::Visited;
        }

        let mut colors = vec![Color::Unvisited; self.graph.node_count()];
        let mut stack = Vec::new();
        let mut cycles = Vec::new();
        for node in self.graph.node_indices() {
            if colors[node.index()] == Color::Unvisited {
                visit(self, node, &mut colors, &mut stack, &mut cycles);
            }
        }
        cycles
    }
}

/// Report every `@requires` cycle as a composition error.
pub(crate) fn check_requires_cycles(
    graph: &RequiresGraph,
    types: &IndexMap<String, SupergraphType>,
    errors: &mut Vec<CompositionError>,
) {
    for cycle in graph.cycles() {
        let first = &cycle[0];
        let owner = types
            .get(&first.type_name)
            .and_then(|ty| ty.fields.get(&first.field_name))
            .map(|field| field.owner.clone())
            .unwrap_or_default();
        let path: Vec<String> = cycle
            .iter()
            .chain(std::iter::once(first))
            .map(ToString::to_string)
            .collect();
        errors.push(
            CompositionError::new(
                CompositionErrorCode::RequiresCycle,
                owner,
                format!("@requires declarations form a cycle: {}", path.join(" -> ")),
            )
            .on_field(&first.type_name, &first.field_name),
        );
    }
}

/// Follow `@override(from:)` edges between the declarations of one field
/// and return the subgraphs of the first cycle found, closed on its start.
pub(crate) fn find_override_cycle(declarations: &[&Declaration<'_>]) -> Option<Vec<String>> {
    for start in declarations {
        let mut path = vec![start.subgraph];
        let mut current = *start;
        while let Some(from) = current.field.override_from.as_deref() {
            if let Some(position) = path.iter().position(|subgraph| *subgraph == from) {
                let mut cycle: Vec<String> =
                    path[position..].iter().map(|name| name.to_string()).collect();
                cycle.push(from.to_string());
                return Some(cycle);
            }
            path.push(from);
            match declarations
                .iter()
                .find(|declaration| declaration.subgraph == from)
            {
                Some(next) => current = *next,
                None => break,
            }
        }
    }
    None
}
