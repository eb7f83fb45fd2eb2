//! JSON helpers shared by the planner and the executor.

use std::fmt;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de::Error as _;
use serde_json::Map;
pub use serde_json::Value;

/// A JSON object.
pub type Object = Map<String, Value>;

/// One step of a response path.
///
/// `Flatten` only appears in plan merge paths: it stands for "every element of
/// the list at this position". Concrete response paths use `Index` instead.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum PathElement {
    /// Every element of a list.
    Flatten,

    /// A list index.
    Index(usize),

    /// An object key.
    Key(String),
}

impl Serialize for PathElement {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            PathElement::Flatten => serializer.serialize_str("@"),
            PathElement::Index(index) => serializer.serialize_u64(*index as u64),
            PathElement::Key(key) => serializer.serialize_str(key),
        }
    }
}

impl<'de> Deserialize<'de> for PathElement {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(s) if s == "@" => Ok(PathElement::Flatten),
            Value::String(s) => Ok(PathElement::Key(s)),
            Value::Number(n) => n
                .as_u64()
                .map(|index| PathElement::Index(index as usize))
                .ok_or_else(|| D::Error::custom(format!("invalid path index {n}"))),
            other => Err(D::Error::custom(format!("invalid path element {other}"))),
        }
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Flatten => f.write_str("@"),
            PathElement::Index(index) => write!(f, "{index}"),
            PathElement::Key(key) => f.write_str(key),
        }
    }
}

/// A path into a response, e.g. `product/reviews/@/author`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Path {
        Path(Vec::new())
    }

    pub fn from_keys<I, S>(keys: I) -> Path
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Path(
            keys.into_iter()
                .map(|key| PathElement::Key(key.into()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn push(&mut self, element: PathElement) {
        self.0.push(element)
    }

    pub fn join(&self, other: &Path) -> Path {
        let mut joined = self.0.clone();
        joined.extend(other.0.iter().cloned());
        Path(joined)
    }

    pub fn with_key(&self, key: impl Into<String>) -> Path {
        let mut path = self.clone();
        path.push(PathElement::Key(key.into()));
        path
    }

    pub fn with_index(&self, index: usize) -> Path {
        let mut path = self.clone();
        path.push(PathElement::Index(index));
        path
    }

    pub fn with_flatten(&self) -> Path {
        let mut path = self.clone();
        path.push(PathElement::Flatten);
        path
    }

    /// True if the path holds no `Flatten` element.
    pub fn is_concrete(&self) -> bool {
        !self.0.contains(&PathElement::Flatten)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, element) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("/")?;
            }
            write!(f, "{element}")?;
        }
        Ok(())
    }
}

impl From<Vec<PathElement>> for Path {
    fn from(elements: Vec<PathElement>) -> Self {
        Path(elements)
    }
}

/// Extension methods on JSON values used while stitching responses.
pub trait ValueExt {
    /// Merge `other` into `self`. Objects merge key by key, arrays element
    /// by element. A `null` in `other` never overwrites existing data.
    fn deep_merge(&mut self, other: Value);

    /// Call `f` with every value found at `path` along with its concrete
    /// path. `Flatten` elements expand to every element of the list found at
    /// that position. Missing and `null` positions are skipped.
    fn select_values_and_paths<'a, F>(&'a self, path: &Path, f: F)
    where
        F: FnMut(&Path, &'a Value);

    /// Mutable access to the value at a concrete path.
    fn get_path_mut(&mut self, path: &Path) -> Option<&mut Value>;
}

impl ValueExt for Value {
    fn deep_merge(&mut self, other: Value) {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                for (key, value) in b {
                    match a.get_mut(&key) {
                        Some(existing) => existing.deep_merge(value),
                        None => {
                            a.insert(key, value);
                        }
                    }
                }
            }
            (Value::Array(a), Value::Array(b)) => {
                let extra = b.len().saturating_sub(a.len());
                let mut b = b.into_iter();
                for (a, b) in a.iter_mut().zip(b.by_ref()) {
                    a.deep_merge(b);
                }
                if extra > 0 {
                    a.extend(b);
                }
            }
            (_, Value::Null) => {}
            (a, b) => *a = b,
        }
    }

    fn select_values_and_paths<'a, F>(&'a self, path: &Path, mut f: F)
    where
        F: FnMut(&Path, &'a Value),
    {
        iterate_path(&mut Path::empty(), &path.0, self, &mut f)
    }

    fn get_path_mut(&mut self, path: &Path) -> Option<&mut Value> {
        let mut current = self;
        for element in path.iter() {
            current = match (element, current) {
                (PathElement::Key(key), Value::Object(object)) => object.get_mut(key)?,
                (PathElement::Index(index), Value::Array(array)) => array.get_mut(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

fn iterate_path<'a, F>(parent: &mut Path, path: &[PathElement], data: &'a Value, f: &mut F)
where
    F: FnMut(&Path, &'a Value),
{
    let Some((head, rest)) = path.split_first() else {
        if !data.is_null() {
            f(parent, data);
        }
        return;
    };
    match (head, data) {
        (PathElement::Key(key), Value::Object(object)) => {
            if let Some(value) = object.get(key) {
                parent.push(head.clone());
                iterate_path(parent, rest, value, f);
                parent.0.pop();
            }
        }
        (PathElement::Index(index), Value::Array(array)) => {
            if let Some(value) = array.get(*index) {
                parent.push(head.clone());
                iterate_path(parent, rest, value, f);
                parent.0.pop();
            }
        }
        (PathElement::Flatten, Value::Array(array)) => {
            for (index, value) in array.iter().enumerate() {
                parent.push(PathElement::Index(index));
                iterate_path(parent, rest, value, f);
                parent.0.pop();
            }
        }
        _ => {}
    }
}
