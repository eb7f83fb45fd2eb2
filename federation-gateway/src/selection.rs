use serde::Deserialize;
use serde::Serialize;

use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;

/// A selection that is part of a fetch.
/// Selections describe the data an entity fetch sends as representations.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", tag = "kind")]
pub enum Selection {
    /// A field selection.
    Field(Field),

    /// An inline fragment selection.
    InlineFragment(InlineFragment),
}

/// The field that is used
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    /// The key the field's value is found under in the merged data, when
    /// it differs from the name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// The name of the field.
    pub name: String,

    /// The selections for the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selections: Option<Vec<Selection>>,
}

/// An inline fragment.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineFragment {
    /// The required fragment type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_condition: Option<String>,

    /// The selections from the fragment.
    pub selections: Vec<Selection>,
}

impl Selection {
    pub(crate) fn field(name: impl Into<String>, selections: Option<Vec<Selection>>) -> Selection {
        Selection::Field(Field {
            alias: None,
            name: name.into(),
            selections,
        })
    }
}

/// Add `selection` to `selections`, merging it into an existing field or
/// fragment with the same name or type condition.
pub(crate) fn merge_selection(selections: &mut Vec<Selection>, selection: Selection) {
    match selection {
        Selection::Field(field) => {
            let existing = selections.iter_mut().find_map(|candidate| match candidate {
                Selection::Field(candidate)
                    if candidate.name == field.name && candidate.alias == field.alias =>
                {
                    Some(candidate)
                }
                _ => None,
            });
            match existing {
                Some(existing) => {
                    if let Some(nested) = field.selections {
                        let target = existing.selections.get_or_insert_with(Vec::new);
                        for selection in nested {
                            merge_selection(target, selection);
                        }
                    }
                }
                None => selections.push(Selection::Field(field)),
            }
        }
        Selection::InlineFragment(fragment) => {
            let existing = selections.iter_mut().find_map(|candidate| match candidate {
                Selection::InlineFragment(candidate)
                    if candidate.type_condition == fragment.type_condition =>
                {
                    Some(candidate)
                }
                _ => None,
            });
            match existing {
                Some(existing) => {
                    for selection in fragment.selections {
                        merge_selection(&mut existing.selections, selection);
                    }
                }
                None => selections.push(Selection::InlineFragment(fragment)),
            }
        }
    }
}

/// Why a representation could not be built.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MissingField(pub(crate) String);

/// Select an entity representation out of `content`.
///
/// Returns `Ok(None)` when no top level type condition matches the object's
/// `__typename`: the object is not one of the entities this fetch resolves.
/// A selected field absent from the object is an error.
pub(crate) fn select_representation(
    content: &Value,
    selections: &[Selection],
) -> Result<Option<Value>, MissingField> {
    let Value::Object(object) = content else {
        return Ok(None);
    };
    let typename = object.get("__typename").and_then(Value::as_str);

    let mut output = Object::new();
    let mut matched = false;
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                matched = true;
                select_field(object, field, None, &mut output)?;
            }
            Selection::InlineFragment(fragment) => {
                let fallback = match (&fragment.type_condition, typename) {
                    (Some(condition), Some(typename)) if condition != typename => continue,
                    (Some(condition), None) => Some(condition.as_str()),
                    _ => None,
                };
                matched = true;
                select_object(object, &fragment.selections, fallback, &mut output)?;
            }
        }
    }

    Ok(matched.then_some(Value::Object(output)))
}

fn select_object(
    content: &Object,
    selections: &[Selection],
    typename_fallback: Option<&str>,
    output: &mut Object,
) -> Result<(), MissingField> {
    for selection in selections {
        match selection {
            Selection::Field(field) => select_field(content, field, typename_fallback, output)?,
            Selection::InlineFragment(fragment) => {
                let typename = content.get("__typename").and_then(Value::as_str);
                if let (Some(condition), Some(typename)) = (&fragment.type_condition, typename) {
                    if condition != typename {
                        continue;
                    }
                }
                select_object(content, &fragment.selections, typename_fallback, output)?;
            }
        }
    }
    Ok(())
}

fn select_field(
    content: &Object,
    field: &Field,
    typename_fallback: Option<&str>,
    output: &mut Object,
) -> Result<(), MissingField> {
    let value = match content.get(field.alias.as_ref().unwrap_or(&field.name)) {
        Some(value) => select_value(value, field.selections.as_deref())?,
        None if field.name == "__typename" => match typename_fallback {
            Some(typename) => Value::String(typename.to_string()),
            None => return Err(MissingField(field.name.clone())),
        },
        None => return Err(MissingField(field.name.clone())),
    };
    match output.get_mut(&field.name) {
        Some(existing) => existing.deep_merge(value),
        None => {
            output.insert(field.name.clone(), value);
        }
    }
    Ok(())
}

fn select_value(value: &Value, selections: Option<&[Selection]>) -> Result<Value, MissingField> {
    let Some(selections) = selections else {
        return Ok(value.clone());
    };
    match value {
        Value::Array(elements) => elements
            .iter()
            .map(|element| select_value(element, Some(selections)))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(object) => {
            let mut output = Object::new();
            select_object(object, selections, None, &mut output)?;
            Ok(Value::Object(output))
        }
        other => Ok(other.clone()),
    }
}
