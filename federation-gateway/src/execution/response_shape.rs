//! Projects the merged subgraph data onto the client's selection set.
//!
//! Fields the planner added for keys and requirements disappear, aliases and
//! `__typename` are honoured, and every selected field is present, `null`
//! when no fetch resolved it.

use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::query_planner::NormalizedOperation;
use crate::query_planner::operation::Field;
use crate::query_planner::operation::Selection;
use crate::query_planner::operation::TYPENAME;
use crate::query_planner::operation::is_included;
use crate::supergraph::Supergraph;

pub(crate) struct ResponseShaper<'a> {
    supergraph: &'a Supergraph,
    variables: &'a Object,
}

impl<'a> ResponseShaper<'a> {
    pub(crate) fn new(supergraph: &'a Supergraph, variables: &'a Object) -> Self {
        ResponseShaper {
            supergraph,
            variables,
        }
    }

    pub(crate) fn shape(&self, operation: &NormalizedOperation, data: &Value) -> Value {
        let empty = Object::new();
        let root = data.as_object().unwrap_or(&empty);
        let mut output = Object::new();
        self.shape_object(&operation.selection_set, root, &operation.root_type, &mut output);
        Value::Object(output)
    }

    fn shape_object(
        &self,
        selections: &[Selection],
        content: &Object,
        runtime_type: &str,
        output: &mut Object,
    ) {
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    if !is_included(&field.directives, self.variables) {
                        continue;
                    }
                    let key = field.response_key();
                    let value = if field.name == TYPENAME {
                        Value::String(runtime_type.to_string())
                    } else {
                        self.shape_value(field, content.get(key))
                    };
                    match output.get_mut(key) {
                        Some(existing) => existing.deep_merge(value),
                        None => {
                            output.insert(key.to_string(), value);
                        }
                    }
                }
                Selection::InlineFragment(fragment) => {
                    if !is_included(&fragment.directives, self.variables) {
                        continue;
                    }
                    let matches = fragment.type_condition.as_deref().is_none_or(|condition| {
                        self.supergraph
                            .type_condition_matches(condition, runtime_type)
                    });
                    if matches {
                        self.shape_object(&fragment.selection_set, content, runtime_type, output);
                    }
                }
            }
        }
    }

    fn shape_value(&self, field: &Field, value: Option<&Value>) -> Value {
        match value {
            None | Some(Value::Null) => Value::Null,
            Some(Value::Array(elements)) => Value::Array(
                elements
                    .iter()
                    .map(|element| self.shape_value(field, Some(element)))
                    .collect(),
            ),
            Some(Value::Object(object)) if !field.selection_set.is_empty() => {
                let runtime_type = object
                    .get(TYPENAME)
                    .and_then(Value::as_str)
                    .unwrap_or_else(|| field.ty.named_type());
                let mut output = Object::new();
                self.shape_object(&field.selection_set, object, runtime_type, &mut output);
                Value::Object(output)
            }
            Some(other) => other.clone(),
        }
    }
}
