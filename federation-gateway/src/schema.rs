//! Schema-level building blocks shared by composition, planning and execution.

use std::fmt;

use apollo_compiler::ast;
use serde::Serialize;

/// The kind of a named type.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, strum_macros::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeKind {
    #[strum(to_string = "object")]
    Object,
    #[strum(to_string = "interface")]
    Interface,
    #[strum(to_string = "union")]
    Union,
    #[strum(to_string = "enum")]
    Enum,
    #[strum(to_string = "scalar")]
    Scalar,
    #[strum(to_string = "input object")]
    InputObject,
}

impl TypeKind {
    pub fn is_abstract(self) -> bool {
        matches!(self, TypeKind::Interface | TypeKind::Union)
    }

    pub fn is_composite(self) -> bool {
        matches!(
            self,
            TypeKind::Object | TypeKind::Interface | TypeKind::Union
        )
    }

    pub(crate) fn sdl_keyword(self) -> &'static str {
        match self {
            TypeKind::Object => "type",
            TypeKind::Interface => "interface",
            TypeKind::Union => "union",
            TypeKind::Enum => "enum",
            TypeKind::Scalar => "scalar",
            TypeKind::InputObject => "input",
        }
    }
}

/// A reference to a type from a field, argument or variable definition.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    /// The named type at the bottom of the wrappers.
    pub fn named_type(&self) -> &str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.named_type(),
        }
    }

    /// How many lists wrap the named type.
    pub fn list_depth(&self) -> usize {
        match self {
            TypeRef::Named(_) => 0,
            TypeRef::List(inner) => 1 + inner.list_depth(),
            TypeRef::NonNull(inner) => inner.list_depth(),
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, TypeRef::NonNull(_))
    }

    /// The same type with every non-null wrapper removed.
    pub fn nullable(&self) -> TypeRef {
        match self {
            TypeRef::Named(name) => TypeRef::Named(name.clone()),
            TypeRef::List(inner) => TypeRef::List(Box::new(inner.nullable())),
            TypeRef::NonNull(inner) => inner.nullable(),
        }
    }
}

impl From<&ast::Type> for TypeRef {
    fn from(ty: &ast::Type) -> Self {
        match ty {
            ast::Type::Named(name) => TypeRef::Named(name.to_string()),
            ast::Type::NonNullNamed(name) => {
                TypeRef::NonNull(Box::new(TypeRef::Named(name.to_string())))
            }
            ast::Type::List(inner) => TypeRef::List(Box::new(TypeRef::from(inner.as_ref()))),
            ast::Type::NonNullList(inner) => TypeRef::NonNull(Box::new(TypeRef::List(
                Box::new(TypeRef::from(inner.as_ref())),
            ))),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => f.write_str(name),
            TypeRef::List(inner) => write!(f, "[{inner}]"),
            TypeRef::NonNull(inner) => write!(f, "{inner}!"),
        }
    }
}

/// A GraphQL input value, as written in a document.
#[derive(Clone, Debug, PartialEq)]
pub enum InputValue {
    Variable(String),
    Null,
    Boolean(bool),
    Int(String),
    Float(String),
    String(String),
    Enum(String),
    List(Vec<InputValue>),
    Object(Vec<(String, InputValue)>),
}

impl InputValue {
    /// Collect the names of every variable used by this value.
    pub fn collect_variables(&self, into: &mut Vec<String>) {
        match self {
            InputValue::Variable(name) => {
                if !into.contains(name) {
                    into.push(name.clone());
                }
            }
            InputValue::List(items) => items.iter().for_each(|item| item.collect_variables(into)),
            InputValue::Object(fields) => fields
                .iter()
                .for_each(|(_, value)| value.collect_variables(into)),
            _ => {}
        }
    }

    /// Evaluate the value as a boolean, looking variables up in `variables`.
    pub fn as_bool(&self, variables: &serde_json::Map<String, serde_json::Value>) -> Option<bool> {
        match self {
            InputValue::Boolean(b) => Some(*b),
            InputValue::Variable(name) => variables.get(name).and_then(|value| value.as_bool()),
            _ => None,
        }
    }

    /// The JSON form of the value. Variables resolve to their value in
    /// `variables`, or `null` when unset.
    pub fn to_json(&self, variables: &serde_json::Map<String, serde_json::Value>) -> serde_json::Value {
        use serde_json::Value;
        match self {
            InputValue::Variable(name) => variables.get(name).cloned().unwrap_or_default(),
            InputValue::Null => Value::Null,
            InputValue::Boolean(b) => Value::Bool(*b),
            InputValue::Int(i) | InputValue::Float(i) => serde_json::from_str(i).unwrap_or_default(),
            InputValue::String(s) | InputValue::Enum(s) => Value::String(s.clone()),
            InputValue::List(items) => {
                Value::Array(items.iter().map(|item| item.to_json(variables)).collect())
            }
            InputValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json(variables)))
                    .collect(),
            ),
        }
    }
}

impl From<&ast::Value> for InputValue {
    fn from(value: &ast::Value) -> Self {
        match value {
            ast::Value::Null => InputValue::Null,
            ast::Value::Enum(name) => InputValue::Enum(name.to_string()),
            ast::Value::Variable(name) => InputValue::Variable(name.to_string()),
            ast::Value::String(s) => InputValue::String(s.to_string()),
            ast::Value::Float(f) => InputValue::Float(f.as_str().to_string()),
            ast::Value::Int(i) => InputValue::Int(i.as_str().to_string()),
            ast::Value::Boolean(b) => InputValue::Boolean(*b),
            ast::Value::List(items) => {
                InputValue::List(items.iter().map(|item| InputValue::from(&**item)).collect())
            }
            ast::Value::Object(fields) => InputValue::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.to_string(), InputValue::from(&**value)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputValue::Variable(name) => write!(f, "${name}"),
            InputValue::Null => f.write_str("null"),
            InputValue::Boolean(b) => write!(f, "{b}"),
            InputValue::Int(i) => f.write_str(i),
            InputValue::Float(v) => f.write_str(v),
            // JSON string escaping is a valid GraphQL string literal
            InputValue::String(s) => {
                write!(f, "{}", serde_json::Value::String(s.clone()))
            }
            InputValue::Enum(name) => f.write_str(name),
            InputValue::List(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            InputValue::Object(fields) => {
                f.write_str("{")?;
                for (index, (name, value)) in fields.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// An argument or input field definition.
#[derive(Clone, Debug, PartialEq)]
pub struct ArgumentDefinition {
    pub name: String,
    pub ty: TypeRef,
    pub default_value: Option<InputValue>,
}

impl From<&ast::InputValueDefinition> for ArgumentDefinition {
    fn from(definition: &ast::InputValueDefinition) -> Self {
        ArgumentDefinition {
            name: definition.name.to_string(),
            ty: TypeRef::from(&*definition.ty),
            default_value: definition
                .default_value
                .as_ref()
                .map(|value| InputValue::from(&**value)),
        }
    }
}

impl fmt::Display for ArgumentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.ty)?;
        if let Some(default_value) = &self.default_value {
            write!(f, " = {default_value}")?;
        }
        Ok(())
    }
}
