//! Splits a normalized operation into per-subgraph fetches.
//!
//! Fields are placed into the fetch of the subgraph resolving them. A field
//! the current subgraph cannot resolve moves to an entity fetch against its
//! owner, keyed on a `@key` the current subgraph can return. Fields with
//! `@requires` first have their required fields planned at the parent
//! position, and the entity fetch depends on every fetch supplying them.

use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Write as _;

use indexmap::IndexMap;
use indexmap::IndexSet;
use itertools::Itertools;
use petgraph::Direction;
use petgraph::graph::DiGraph;

use super::FetchNode;
use super::operation;
use super::operation::Directive;
use super::operation::NormalizedOperation;
use super::operation::OperationKind;
use super::operation::TYPENAME;
use crate::directives::FieldSet;
use crate::directives::FieldSetItem;
use crate::error::PlanningError;
use crate::json_ext::Path;
use crate::schema::InputValue;
use crate::schema::TypeRef;
use crate::selection::InlineFragment;
use crate::selection::Selection;
use crate::selection::merge_selection;
use crate::supergraph::SupergraphField;
use crate::supergraph::Supergraph;

const REPRESENTATIONS: &str = "representations";
const INJECTED_ALIAS_PREFIX: &str = "__fedgw_";

/// A selection sent to a subgraph.
#[derive(Clone, Debug, PartialEq)]
enum FetchSelection {
    Field {
        alias: Option<String>,
        name: String,
        arguments: Vec<(String, InputValue)>,
        directives: Vec<Directive>,
        selections: Vec<FetchSelection>,
    },
    InlineFragment {
        type_condition: String,
        directives: Vec<Directive>,
        selections: Vec<FetchSelection>,
    },
}

impl FetchSelection {
    fn typename() -> FetchSelection {
        FetchSelection::Field {
            alias: None,
            name: TYPENAME.to_string(),
            arguments: Vec::new(),
            directives: Vec::new(),
            selections: Vec::new(),
        }
    }

    /// The field itself, without its subselections.
    fn field(field: &operation::Field) -> FetchSelection {
        FetchSelection::Field {
            alias: field.alias.clone(),
            name: field.name.clone(),
            arguments: field.arguments.clone(),
            directives: field.directives.clone(),
            selections: Vec::new(),
        }
    }

    fn fragment(type_condition: &str, directives: Vec<Directive>) -> FetchSelection {
        FetchSelection::InlineFragment {
            type_condition: type_condition.to_string(),
            directives,
            selections: Vec::new(),
        }
    }

    fn key(fields: &FieldSet) -> Vec<FetchSelection> {
        fields
            .iter()
            .map(|item| FetchSelection::Field {
                alias: None,
                name: item.name.clone(),
                arguments: Vec::new(),
                directives: Vec::new(),
                selections: FetchSelection::key(&item.selections),
            })
            .collect()
    }

    fn selections_mut(&mut self) -> &mut Vec<FetchSelection> {
        match self {
            FetchSelection::Field { selections, .. }
            | FetchSelection::InlineFragment { selections, .. } => selections,
        }
    }

    fn into_selections(self) -> Vec<FetchSelection> {
        match self {
            FetchSelection::Field { selections, .. }
            | FetchSelection::InlineFragment { selections, .. } => selections,
        }
    }

    /// True if both select the same position, ignoring subselections.
    fn same_position(&self, other: &FetchSelection) -> bool {
        match (self, other) {
            (
                FetchSelection::Field {
                    alias,
                    name,
                    arguments,
                    directives,
                    ..
                },
                FetchSelection::Field {
                    alias: other_alias,
                    name: other_name,
                    arguments: other_arguments,
                    directives: other_directives,
                    ..
                },
            ) => {
                alias == other_alias
                    && name == other_name
                    && arguments == other_arguments
                    && directives == other_directives
            }
            (
                FetchSelection::InlineFragment {
                    type_condition,
                    directives,
                    ..
                },
                FetchSelection::InlineFragment {
                    type_condition: other_condition,
                    directives: other_directives,
                    ..
                },
            ) => type_condition == other_condition && directives == other_directives,
            _ => false,
        }
    }

    fn collect_variables(&self, into: &mut Vec<String>) {
        let (arguments, directives, selections) = match self {
            FetchSelection::Field {
                arguments,
                directives,
                selections,
                ..
            } => (arguments.as_slice(), directives, selections),
            FetchSelection::InlineFragment {
                directives,
                selections,
                ..
            } => (&[][..], directives, selections),
        };
        for (_, value) in arguments {
            value.collect_variables(into);
        }
        for directive in directives {
            for (_, value) in &directive.arguments {
                value.collect_variables(into);
            }
        }
        for selection in selections {
            selection.collect_variables(into);
        }
    }
}

impl fmt::Display for FetchSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (directives, selections) = match self {
            FetchSelection::Field {
                alias,
                name,
                arguments,
                directives,
                selections,
            } => {
                if let Some(alias) = alias {
                    write!(f, "{alias}: ")?;
                }
                f.write_str(name)?;
                operation::write_arguments(f, arguments)?;
                (directives, selections)
            }
            FetchSelection::InlineFragment {
                type_condition,
                directives,
                selections,
            } => {
                write!(f, "... on {type_condition}")?;
                (directives, selections)
            }
        };
        for directive in directives {
            write!(f, " {directive}")?;
        }
        if !selections.is_empty() {
            write!(f, " {}", SelectionSet(selections))?;
        }
        Ok(())
    }
}

struct SelectionSet<'a>(&'a [FetchSelection]);

impl fmt::Display for SelectionSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ {} }}", self.0.iter().join(" "))
    }
}

/// Add a selection, merging it with an existing one at the same position.
fn add_selection(selections: &mut Vec<FetchSelection>, selection: FetchSelection) {
    match selections
        .iter_mut()
        .find(|existing| existing.same_position(&selection))
    {
        Some(existing) => {
            let target = existing.selections_mut();
            for nested in selection.into_selections() {
                add_selection(target, nested);
            }
        }
        None => selections.push(selection),
    }
}

/// The selections under `steps`, creating missing steps on the way.
fn ensure_path<'s>(
    selections: &'s mut Vec<FetchSelection>,
    steps: &[FetchSelection],
) -> &'s mut Vec<FetchSelection> {
    let Some((step, rest)) = steps.split_first() else {
        return selections;
    };
    let index = match selections
        .iter()
        .position(|existing| existing.same_position(step))
    {
        Some(index) => index,
        None => {
            selections.push(step.clone());
            selections.len() - 1
        }
    };
    ensure_path(selections[index].selections_mut(), rest)
}

struct EntityFetch {
    type_name: String,
    merge_path: Path,
    requires: Vec<Selection>,
    with_requires: bool,
}

struct NodeBuilder {
    service: String,
    entity: Option<EntityFetch>,
    selections: Vec<FetchSelection>,
    depends_on: BTreeSet<usize>,
    output_keys: IndexSet<String>,
}

/// Where in a fetch the next selections go.
#[derive(Clone)]
struct Position {
    node: usize,
    /// Selections from the fetch root down to this position.
    steps: Vec<FetchSelection>,
    /// The response path of the objects at this position.
    path: Path,
    /// Subfields the fetch's subgraph returns here through `@provides`.
    provided: Option<FieldSet>,
    /// Fields selected here are root fields of the fetch.
    top_level: bool,
    /// Response keys the client uses here for something other than the
    /// bare field of that name.
    taken: BTreeSet<String>,
}

impl Position {
    /// The alias of a field the planner adds here, if its name clashes
    /// with a client response key.
    fn injected_alias(&self, name: &str) -> Option<String> {
        self.taken
            .contains(name)
            .then(|| format!("{INJECTED_ALIAS_PREFIX}{name}"))
    }
}

fn taken_keys(selections: &[operation::Selection], taken: &mut BTreeSet<String>) {
    for selection in selections {
        match selection {
            operation::Selection::Field(field) => {
                if field.response_key() != field.name || !field.arguments.is_empty() {
                    taken.insert(field.response_key().to_string());
                }
            }
            operation::Selection::InlineFragment(fragment) => {
                taken_keys(&fragment.selection_set, taken)
            }
        }
    }
}

type Touched = BTreeSet<usize>;

pub(crate) struct PlanBuilder<'a> {
    supergraph: &'a Supergraph,
    operation: &'a NormalizedOperation,
    nodes: Vec<NodeBuilder>,
    root_nodes: IndexMap<String, usize>,
}

impl<'a> PlanBuilder<'a> {
    pub(crate) fn new(supergraph: &'a Supergraph, operation: &'a NormalizedOperation) -> Self {
        PlanBuilder {
            supergraph,
            operation,
            nodes: Vec::new(),
            root_nodes: IndexMap::new(),
        }
    }

    pub(crate) fn build(mut self) -> Result<Vec<FetchNode>, PlanningError> {
        let operation = self.operation;
        for selection in &operation.selection_set {
            self.plan_root_selection(selection, &[])?;
        }
        self.finish()
    }

    fn plan_root_selection(
        &mut self,
        selection: &operation::Selection,
        steps: &[FetchSelection],
    ) -> Result<(), PlanningError> {
        let root_type = self.operation.root_type.as_str();
        match selection {
            operation::Selection::Field(field) => {
                // answered from the operation kind alone
                if field.name == TYPENAME {
                    return Ok(());
                }
                let owner = self
                    .supergraph
                    .owner(root_type, &field.name)
                    .ok_or_else(|| PlanningError::NoOwner {
                        type_name: root_type.to_string(),
                        field_name: field.name.clone(),
                    })?;
                let node = self.root_node(owner);
                let position = Position {
                    node,
                    steps: steps.to_vec(),
                    path: Path::empty(),
                    provided: None,
                    top_level: true,
                    taken: BTreeSet::new(),
                };
                self.plan_field(&position, root_type, field)?;
            }
            operation::Selection::InlineFragment(fragment) => {
                let mut steps = steps.to_vec();
                if !fragment.directives.is_empty() {
                    steps.push(FetchSelection::fragment(
                        root_type,
                        fragment.directives.clone(),
                    ));
                }
                for selection in &fragment.selection_set {
                    self.plan_root_selection(selection, &steps)?;
                }
            }
        }
        Ok(())
    }

    /// The root fetch for fields owned by `service`.
    ///
    /// Query fields share one fetch per subgraph. Mutation fields run in
    /// order: consecutive fields of one subgraph share a fetch, and each new
    /// fetch waits for everything planned before it.
    fn root_node(&mut self, service: &str) -> usize {
        if self.operation.kind == OperationKind::Mutation {
            if let Some(last) = self.root_nodes.values().last().copied() {
                if self.nodes[last].service == service {
                    return last;
                }
            }
            let depends_on = (0..self.nodes.len()).collect();
            let id = self.push_node(service, None, depends_on);
            // keyed by position so that a subgraph can appear again later
            self.root_nodes.insert(format!("{service}#{id}"), id);
            return id;
        }
        if let Some(id) = self.root_nodes.get(service) {
            return *id;
        }
        let id = self.push_node(service, None, BTreeSet::new());
        self.root_nodes.insert(service.to_string(), id);
        id
    }

    fn push_node(
        &mut self,
        service: &str,
        entity: Option<EntityFetch>,
        depends_on: BTreeSet<usize>,
    ) -> usize {
        self.nodes.push(NodeBuilder {
            service: service.to_string(),
            entity,
            selections: Vec::new(),
            depends_on,
            output_keys: IndexSet::new(),
        });
        self.nodes.len() - 1
    }

    fn service(&self, position: &Position) -> &str {
        &self.nodes[position.node].service
    }

    fn add(&mut self, position: &Position, selection: FetchSelection) {
        let selections = ensure_path(&mut self.nodes[position.node].selections, &position.steps);
        add_selection(selections, selection);
    }

    fn plan_selection(
        &mut self,
        position: &Position,
        parent_type: &str,
        selection: &operation::Selection,
    ) -> Result<Touched, PlanningError> {
        let fragment = match selection {
            operation::Selection::Field(field) => return self.plan_field(position, parent_type, field),
            operation::Selection::InlineFragment(fragment) => fragment,
        };
        let supergraph = self.supergraph;
        let condition = fragment.type_condition.as_deref().unwrap_or(parent_type);
        let parent_is_object = supergraph
            .get_type(parent_type)
            .is_some_and(|ty| !ty.kind.is_abstract());

        let (child, child_type) = if parent_is_object {
            if !supergraph.type_condition_matches(condition, parent_type) {
                return Ok(Touched::new());
            }
            if fragment.directives.is_empty() {
                (position.clone(), parent_type)
            } else {
                let mut child = position.clone();
                child.steps.push(FetchSelection::fragment(
                    parent_type,
                    fragment.directives.clone(),
                ));
                (child, parent_type)
            }
        } else {
            let service = self.service(position);
            let declared = supergraph
                .get_type(condition)
                .is_some_and(|ty| ty.declared_in.iter().any(|name| name == service));
            if !declared {
                return Ok(Touched::new());
            }
            let mut child = position.clone();
            child.steps.push(FetchSelection::fragment(
                condition,
                fragment.directives.clone(),
            ));
            (child, condition)
        };

        let mut touched = Touched::new();
        for selection in &fragment.selection_set {
            touched.extend(self.plan_selection(&child, child_type, selection)?);
        }
        Ok(touched)
    }

    /// Plan one field and return the fetches its data ends up in.
    fn plan_field(
        &mut self,
        position: &Position,
        parent_type: &str,
        field: &operation::Field,
    ) -> Result<Touched, PlanningError> {
        if field.name == TYPENAME {
            self.add(position, FetchSelection::field(field));
            return Ok(Touched::from([position.node]));
        }
        let supergraph = self.supergraph;
        let definition =
            supergraph
                .field(parent_type, &field.name)
                .ok_or_else(|| PlanningError::UnknownField {
                    type_name: parent_type.to_string(),
                    field_name: field.name.clone(),
                })?;
        let service = self.service(position).to_string();
        let provided = position
            .provided
            .as_ref()
            .and_then(|provided| provided.get(&field.name))
            .map(|item| item.selections.clone());

        let needs_requires = definition.requires.is_some()
            && definition.owner == service
            && !self.requires_satisfied(position);
        let local = (definition.is_resolvable_in(&service) || provided.is_some()) && !needs_requires;
        if local {
            let provided = provided.or_else(|| definition.provides.get(&service).cloned());
            self.plan_local_field(position, field, provided)
        } else {
            self.plan_entity_fetch(position, parent_type, field, definition)
        }
    }

    fn requires_satisfied(&self, position: &Position) -> bool {
        position.top_level
            && self.nodes[position.node]
                .entity
                .as_ref()
                .is_some_and(|entity| entity.with_requires)
    }

    fn plan_local_field(
        &mut self,
        position: &Position,
        field: &operation::Field,
        provided: Option<FieldSet>,
    ) -> Result<Touched, PlanningError> {
        let node = position.node;
        if position.top_level {
            self.nodes[node]
                .output_keys
                .insert(field.response_key().to_string());
        }
        let selection = FetchSelection::field(field);
        if field.selection_set.is_empty() {
            self.add(position, selection);
            return Ok(Touched::from([node]));
        }

        let mut steps = position.steps.clone();
        steps.push(selection);
        let mut child = Position {
            node,
            steps,
            path: flatten_lists(position.path.with_key(field.response_key()), &field.ty),
            provided: provided.filter(|provided| !provided.is_empty()),
            top_level: false,
            taken: BTreeSet::new(),
        };
        taken_keys(&field.selection_set, &mut child.taken);
        ensure_path(&mut self.nodes[node].selections, &child.steps);

        let output_type = field.ty.named_type();
        if operation::output_kind(self.supergraph, &field.ty).is_some_and(|kind| kind.is_abstract()) {
            self.add(&child, FetchSelection::typename());
        }
        let mut touched = Touched::from([node]);
        for selection in &field.selection_set {
            touched.extend(self.plan_selection(&child, output_type, selection)?);
        }
        Ok(touched)
    }

    fn plan_entity_fetch(
        &mut self,
        position: &Position,
        parent_type: &str,
        field: &operation::Field,
        definition: &SupergraphField,
    ) -> Result<Touched, PlanningError> {
        let supergraph = self.supergraph;
        let parent = supergraph
            .get_type(parent_type)
            .ok_or_else(|| PlanningError::UnknownType(parent_type.to_string()))?;
        let service = self.service(position).to_string();

        if parent.kind.is_abstract() {
            // each concrete type may be resolved by a different subgraph
            let mut touched = Touched::new();
            for possible in supergraph.possible_types(parent_type) {
                let declared = supergraph
                    .get_type(possible)
                    .is_some_and(|ty| ty.declared_in.contains(&service));
                if !declared {
                    continue;
                }
                let mut concrete = position.clone();
                concrete
                    .steps
                    .push(FetchSelection::fragment(possible, Vec::new()));
                touched.extend(self.plan_field(&concrete, possible, field)?);
            }
            return Ok(touched);
        }

        let target = definition.owner.as_str();
        let key = parent
            .keys_in(target)
            .find(|key| self.can_return_key(position, parent_type, &key.fields, &service))
            .ok_or_else(|| PlanningError::UnreachableField {
                type_name: parent_type.to_string(),
                field_name: field.name.clone(),
                subgraph: target.to_string(),
            })?
            .fields
            .clone();

        let mut depends_on = Touched::from([position.node]);
        let mut requires = vec![Selection::field(TYPENAME, None)];
        for selection in required_selections(&key, position) {
            merge_selection(&mut requires, selection);
        }
        if let Some(required) = &definition.requires {
            for mut selection in self.required_fields(parent_type, required, field)? {
                if let operation::Selection::Field(required) = &mut selection {
                    required.alias = position.injected_alias(&required.name);
                }
                depends_on.extend(self.plan_selection(position, parent_type, &selection)?);
            }
            for selection in required_selections(required, position) {
                merge_selection(&mut requires, selection);
            }
        }
        self.add(position, FetchSelection::typename());
        for mut selection in FetchSelection::key(&key) {
            if let FetchSelection::Field { alias, name, .. } = &mut selection {
                *alias = position.injected_alias(name);
            }
            self.add(position, selection);
        }

        let node = self.entity_node(
            target,
            &position.path,
            parent_type,
            definition.requires.is_some(),
            Selection::InlineFragment(InlineFragment {
                type_condition: Some(parent_type.to_string()),
                selections: requires,
            }),
            &depends_on,
        );
        let entity_position = Position {
            node,
            steps: vec![FetchSelection::fragment(parent_type, Vec::new())],
            path: position.path.clone(),
            provided: None,
            top_level: true,
            taken: position.taken.clone(),
        };
        self.plan_field(&entity_position, parent_type, field)
    }

    fn can_return_key(
        &self,
        position: &Position,
        parent_type: &str,
        key: &FieldSet,
        service: &str,
    ) -> bool {
        key.iter().all(|item| {
            position
                .provided
                .as_ref()
                .is_some_and(|provided| provided.contains(&item.name))
                || self
                    .supergraph
                    .field(parent_type, &item.name)
                    .is_some_and(|field| field.is_resolvable_in(service))
        })
    }

    /// The `@requires` field set as selections to plan at the parent.
    fn required_fields(
        &self,
        type_name: &str,
        fields: &FieldSet,
        required_by: &operation::Field,
    ) -> Result<Vec<operation::Selection>, PlanningError> {
        fields
            .iter()
            .map(|item| {
                let definition = self.supergraph.field(type_name, &item.name).ok_or_else(|| {
                    PlanningError::UnresolvableRequires {
                        type_name: required_by.parent_type.clone(),
                        field_name: required_by.name.clone(),
                    }
                })?;
                Ok(operation::Selection::Field(operation::Field {
                    alias: None,
                    name: item.name.clone(),
                    arguments: Vec::new(),
                    directives: Vec::new(),
                    selection_set: self.required_fields(
                        definition.ty.named_type(),
                        &item.selections,
                        required_by,
                    )?,
                    parent_type: type_name.to_string(),
                    ty: definition.ty.clone(),
                }))
            })
            .collect()
    }

    /// Find an entity fetch to extend or create one. A fetch is reused
    /// unless one of the new dependencies already waits on it.
    fn entity_node(
        &mut self,
        service: &str,
        path: &Path,
        type_name: &str,
        with_requires: bool,
        requires: Selection,
        depends_on: &Touched,
    ) -> usize {
        let reusable = (0..self.nodes.len()).find(|&candidate| {
            let node = &self.nodes[candidate];
            node.service == service
                && node.entity.as_ref().is_some_and(|entity| {
                    entity.type_name == type_name
                        && entity.merge_path == *path
                        && entity.with_requires == with_requires
                })
                && !depends_on.contains(&candidate)
                && depends_on
                    .iter()
                    .all(|&dependency| !self.depends_transitively(dependency, candidate))
        });
        let id = match reusable {
            Some(id) => id,
            None => self.push_node(
                service,
                Some(EntityFetch {
                    type_name: type_name.to_string(),
                    merge_path: path.clone(),
                    requires: Vec::new(),
                    with_requires,
                }),
                Touched::new(),
            ),
        };
        let node = &mut self.nodes[id];
        node.depends_on.extend(depends_on.iter().copied());
        if let Some(entity) = &mut node.entity {
            merge_selection(&mut entity.requires, requires);
        }
        id
    }

    fn depends_transitively(&self, from: usize, to: usize) -> bool {
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if seen.insert(node) {
                stack.extend(self.nodes[node].depends_on.iter().copied());
            }
        }
        false
    }

    fn finish(self) -> Result<Vec<FetchNode>, PlanningError> {
        let mut graph = DiGraph::<usize, ()>::new();
        let indices: Vec<_> = (0..self.nodes.len()).map(|id| graph.add_node(id)).collect();
        for (id, node) in self.nodes.iter().enumerate() {
            for dependency in &node.depends_on {
                graph.add_edge(indices[*dependency], indices[id], ());
            }
        }
        petgraph::algo::toposort(&graph, None).map_err(|_| PlanningError::DependencyCycle)?;

        // a stable topological order: lowest creation index first among ready fetches
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut placed = vec![false; self.nodes.len()];
        while order.len() < self.nodes.len() {
            let next = indices
                .iter()
                .find(|index| {
                    !placed[index.index()]
                        && graph
                            .neighbors_directed(**index, Direction::Incoming)
                            .all(|dependency| placed[dependency.index()])
                })
                .ok_or(PlanningError::DependencyCycle)?;
            placed[next.index()] = true;
            order.push(next.index());
        }
        let mut renumbered = vec![0; self.nodes.len()];
        for (new_id, old_id) in order.iter().enumerate() {
            renumbered[*old_id] = new_id;
        }

        let mut nodes: Vec<Option<NodeBuilder>> = self.nodes.into_iter().map(Some).collect();
        let mut fetches = Vec::with_capacity(nodes.len());
        for (id, old_id) in order.into_iter().enumerate() {
            let Some(node) = nodes[old_id].take() else {
                continue;
            };
            fetches.push(fetch_node(
                self.operation,
                id,
                node,
                &renumbered,
            ));
        }
        Ok(fetches)
    }
}

fn fetch_node(
    operation: &NormalizedOperation,
    id: usize,
    node: NodeBuilder,
    renumbered: &[usize],
) -> FetchNode {
    let mut usages = Vec::new();
    for selection in &node.selections {
        selection.collect_variables(&mut usages);
    }
    let variable_usages: Vec<String> = usages.into_iter().unique().collect();
    let mut definitions: Vec<String> = operation
        .variables
        .iter()
        .filter(|variable| variable_usages.contains(&variable.name))
        .map(ToString::to_string)
        .collect();

    let operation_name = operation
        .name
        .as_ref()
        .map(|name| subgraph_operation_name(name, &node.service, id));
    let body = SelectionSet(&node.selections).to_string();
    let (operation_kind, body, requires, merge_path) = match node.entity {
        Some(entity) => {
            definitions.insert(0, format!("${REPRESENTATIONS}: [_Any!]!"));
            (
                OperationKind::Query,
                format!("{{ _entities({REPRESENTATIONS}: ${REPRESENTATIONS}) {body} }}"),
                entity.requires,
                entity.merge_path,
            )
        }
        None => (operation.kind, body, Vec::new(), Path::empty()),
    };

    let mut text = operation_kind.to_string();
    if let Some(name) = &operation_name {
        let _ = write!(text, " {name}");
    }
    if !definitions.is_empty() {
        let _ = write!(text, "({})", definitions.join(", "));
    }
    let _ = write!(text, " {body}");

    let mut depends_on: Vec<usize> = node
        .depends_on
        .iter()
        .map(|dependency| renumbered[*dependency])
        .collect();
    depends_on.sort_unstable();

    FetchNode {
        id,
        service_name: node.service,
        operation_kind,
        operation_name,
        operation: text,
        variable_usages,
        requires,
        merge_path,
        depends_on,
        output_keys: node.output_keys.into_iter().collect(),
    }
}

/// `{operation}__{subgraph}__{id}`, restricted to name characters.
fn subgraph_operation_name(operation: &str, service: &str, id: usize) -> String {
    format!("{operation}__{service}__{id}")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Representation selections for `fields` added at `position`.
fn required_selections(fields: &FieldSet, position: &Position) -> Vec<Selection> {
    fields
        .iter()
        .map(|item| {
            let mut selection = nested_selection(item);
            if let Selection::Field(field) = &mut selection {
                field.alias = position.injected_alias(&item.name);
            }
            selection
        })
        .collect()
}

fn nested_selection(item: &FieldSetItem) -> Selection {
    let nested = (!item.selections.is_empty())
        .then(|| item.selections.iter().map(nested_selection).collect());
    Selection::field(item.name.clone(), nested)
}

fn flatten_lists(mut path: Path, ty: &TypeRef) -> Path {
    for _ in 0..ty.list_depth() {
        path = path.with_flatten();
    }
    path
}
