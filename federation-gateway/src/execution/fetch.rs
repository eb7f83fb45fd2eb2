//! Building subgraph requests for fetch nodes and merging their responses.

use indexmap::IndexMap;

use crate::error::FetchError;
use crate::graphql;
use crate::graphql::Request;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::query_planner::FetchNode;
use crate::selection::MissingField;
use crate::selection::select_representation;

const REPRESENTATIONS: &str = "representations";
const ENTITIES: &str = "_entities";

/// A request ready to be sent, with what is needed to merge its response.
#[derive(Debug)]
pub(crate) struct PreparedFetch {
    pub(crate) request: Request,
    /// For entity fetches, the response paths each representation came
    /// from, in representation order.
    pub(crate) entity_paths: Option<Vec<Vec<Path>>>,
}

/// The entities found at a merge path.
#[derive(Debug, Default)]
pub(crate) struct Entities {
    /// Deduplicated representations, with every path they were found at.
    representations: IndexMap<String, (Value, Vec<Path>)>,
    /// Entities missing some of the data the fetch requires.
    missing: Vec<(Path, String)>,
}

impl Entities {
    fn paths(&self) -> impl Iterator<Item = &Path> {
        self.representations
            .values()
            .flat_map(|(_, paths)| paths.iter())
    }
}

impl FetchNode {
    /// Find the entities this fetch resolves in the current data.
    pub(crate) fn entities(&self, data: &Value) -> Entities {
        let mut entities = Entities::default();
        data.select_values_and_paths(&self.merge_path, |path, value| {
            match select_representation(value, &self.requires) {
                Ok(Some(representation)) => {
                    let (_, paths) = entities
                        .representations
                        .entry(representation.to_string())
                        .or_insert_with(|| (representation, Vec::new()));
                    paths.push(path.clone());
                }
                Ok(None) => {}
                Err(MissingField(field)) => entities.missing.push((path.clone(), field)),
            }
        });
        entities
    }

    /// Build the subgraph request. Returns `None` when there is nothing to
    /// fetch, after recording errors for entities that cannot be resolved.
    pub(crate) fn prepare(
        &self,
        data: &Value,
        variables: &Object,
        errors: &mut Vec<graphql::Error>,
    ) -> Option<PreparedFetch> {
        let mut request_variables: Object = self
            .variable_usages
            .iter()
            .filter_map(|name| {
                variables
                    .get(name)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect();

        let entity_paths = if self.is_entity_fetch() {
            let entities = self.entities(data);
            for (path, field) in &entities.missing {
                tracing::debug!(
                    subgraph.name = %self.service_name,
                    %path,
                    field = %field,
                    "entity is missing required data"
                );
                let error = FetchError::ExecutionMissingRequirements {
                    service: self.service_name.clone(),
                };
                for output_path in self.output_paths(std::iter::once(path)) {
                    errors.push(error.to_graphql_error(Some(output_path)));
                }
            }
            if entities.representations.is_empty() {
                return None;
            }
            let (representations, paths): (Vec<Value>, Vec<Vec<Path>>) =
                entities.representations.into_values().unzip();
            request_variables.insert(REPRESENTATIONS.to_string(), Value::Array(representations));
            Some(paths)
        } else {
            None
        };

        let mut request = Request::new(self.operation.clone()).with_variables(request_variables);
        request.operation_name = self.operation_name.clone();
        Some(PreparedFetch {
            request,
            entity_paths,
        })
    }

    /// The response paths this fetch resolves below `parents`.
    fn output_paths<'a>(&'a self, parents: impl Iterator<Item = &'a Path>) -> Vec<Path> {
        parents
            .flat_map(|parent| self.output_keys.iter().map(|key| parent.with_key(key)))
            .collect()
    }

    /// The response paths a failure of this fetch leaves unresolved. For
    /// entity fetches that were not sent yet, the entities are looked up in
    /// the current data.
    pub(crate) fn failure_paths(
        &self,
        data: &Value,
        entity_paths: Option<&[Vec<Path>]>,
    ) -> Vec<Path> {
        if !self.is_entity_fetch() {
            return self.output_paths(std::iter::once(&Path::empty()));
        }
        match entity_paths {
            Some(entity_paths) => self.output_paths(entity_paths.iter().flatten()),
            None => self.output_paths(self.entities(data).paths()),
        }
    }

    /// Record a failed fetch: one error per unresolved path.
    pub(crate) fn record_failure(
        &self,
        error: &FetchError,
        data: &Value,
        entity_paths: Option<&[Vec<Path>]>,
        errors: &mut Vec<graphql::Error>,
    ) {
        let paths = self.failure_paths(data, entity_paths);
        if paths.is_empty() {
            errors.push(error.to_graphql_error(None));
        }
        for path in paths {
            errors.push(error.to_graphql_error(Some(path)));
        }
    }

    fn no_data_error(&self) -> FetchError {
        FetchError::ExecutionInvalidContent {
            service: self.service_name.clone(),
            reason: "the subgraph returned no data and no errors".to_string(),
        }
    }

    /// Merge a subgraph response into `data`, rewriting error paths to the
    /// client response.
    pub(crate) fn merge_response(
        &self,
        response: graphql::Response,
        entity_paths: Option<&[Vec<Path>]>,
        data: &mut Value,
        errors: &mut Vec<graphql::Error>,
    ) {
        let service = Value::String(self.service_name.clone());
        let failure_paths = self.failure_paths(data, entity_paths);
        let had_errors = !response.errors.is_empty();
        for error in response.errors {
            let paths = match (&error.path, entity_paths) {
                (Some(path), Some(entity_paths)) => entity_error_paths(path, entity_paths),
                (Some(path), None) => vec![Some(path.clone())],
                (None, _) => Vec::new(),
            };
            // errors the subgraph did not locate are reported on every path
            // this fetch was responsible for
            let paths = if paths.iter().all(Option::is_none) && !failure_paths.is_empty() {
                failure_paths.iter().cloned().map(Some).collect()
            } else if paths.is_empty() {
                vec![None]
            } else {
                paths
            };
            for path in paths {
                let mut error = error.clone();
                error.path = path;
                error
                    .extensions
                    .entry("service")
                    .or_insert_with(|| service.clone());
                errors.push(error);
            }
        }

        let response_data = match response.data {
            Some(Value::Null) | None => {
                if !had_errors {
                    self.record_failure(&self.no_data_error(), data, entity_paths, errors);
                }
                return;
            }
            Some(response_data) => response_data,
        };
        let Some(entity_paths) = entity_paths else {
            data.deep_merge(response_data);
            return;
        };

        let entities = match response_data {
            Value::Object(mut object) => object.remove(ENTITIES),
            _ => None,
        };
        let entities = match entities {
            Some(Value::Array(entities)) if entities.len() == entity_paths.len() => entities,
            Some(Value::Null) => {
                if !had_errors {
                    self.record_failure(&self.no_data_error(), data, Some(entity_paths), errors);
                }
                return;
            }
            other => {
                let found = other.map_or(0, |entities| {
                    entities.as_array().map_or(0, Vec::len)
                });
                let error = FetchError::ExecutionInvalidContent {
                    service: self.service_name.clone(),
                    reason: format!(
                        "expected {} entities in the response, found {found}",
                        entity_paths.len()
                    ),
                };
                self.record_failure(&error, data, Some(entity_paths), errors);
                return;
            }
        };

        for (entity, paths) in entities.into_iter().zip(entity_paths) {
            for path in paths {
                if let Some(target) = data.get_path_mut(path) {
                    target.deep_merge(entity.clone());
                }
            }
        }
    }
}

/// Rewrite `_entities/i/...` to the response path of entity `i`.
fn entity_error_paths(path: &Path, entity_paths: &[Vec<Path>]) -> Vec<Option<Path>> {
    match path.0.as_slice() {
        [PathElement::Key(key), PathElement::Index(index), rest @ ..] if key == ENTITIES => {
            match entity_paths.get(*index) {
                Some(paths) => paths
                    .iter()
                    .map(|entity_path| Some(entity_path.join(&Path(rest.to_vec()))))
                    .collect(),
                None => vec![None],
            }
        }
        _ => vec![None],
    }
}
