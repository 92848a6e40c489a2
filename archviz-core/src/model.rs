//! Model: the object graph parsed from a model instance file

use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::ParseError;
use crate::loader;
use crate::metamodel::Metamodel;

/// Index of an object inside its model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub(crate) usize);

impl ObjectId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A parsed model, borrowing the metamodel it conforms to
#[derive(Debug, Clone)]
pub struct Model<'mm> {
    pub(crate) metamodel: &'mm Metamodel,
    pub(crate) objects: Vec<Object>,
}

/// An object created by a common rule
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    /// Class name (the rule that created it)
    pub class: String,
    /// Containing object, `None` for the root
    pub parent: Option<ObjectId>,
    /// Attribute values in rule order; unset single values are omitted
    pub attributes: Vec<(String, Value)>,
}

impl Object {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// The `name` attribute, when it is a string
    pub fn name(&self) -> Option<&str> {
        match self.get("name") {
            Some(Value::Str(s)) => Some(s),
            _ => None,
        }
    }
}

/// Attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Contained object
    Object(ObjectId),
    /// Cross reference
    Ref(ObjectId),
    List(Vec<Value>),
}

impl Value {
    /// Whether this is a plain value rather than an object link or list
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Str(_) | Value::Int(_) | Value::Float(_) | Value::Bool(_)
        )
    }

    /// Type name used in diagrams
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "str",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Object(_) | Value::Ref(_) => "object",
            Value::List(_) => "list",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Object(id) | Value::Ref(id) => write!(f, "#{}", id.0),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl<'mm> Model<'mm> {
    /// Load a model file against a metamodel
    pub fn from_file(metamodel: &'mm Metamodel, path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let source = fs::read_to_string(path.as_ref())?;
        Self::from_str(metamodel, &source)
    }

    /// Parse model text against a metamodel
    pub fn from_str(metamodel: &'mm Metamodel, source: &str) -> Result<Self, ParseError> {
        loader::parse(metamodel, source)
    }

    pub fn metamodel(&self) -> &'mm Metamodel {
        self.metamodel
    }

    /// The root object
    pub fn root(&self) -> ObjectId {
        ObjectId(0)
    }

    pub fn object(&self, id: ObjectId) -> &Object {
        &self.objects[id.0]
    }

    /// All objects with their ids, in document order
    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, &Object)> {
        self.objects
            .iter()
            .enumerate()
            .map(|(i, o)| (ObjectId(i), o))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Dotted name made of the names of this object and its named ancestors
    pub fn qualified_name(&self, id: ObjectId) -> Option<String> {
        let own = self.object(id).name()?;
        let mut parts = vec![own];
        let mut current = self.object(id).parent;
        while let Some(parent) = current {
            let object = self.object(parent);
            if let Some(name) = object.name() {
                parts.push(name);
            }
            current = object.parent;
        }
        parts.reverse();
        Some(parts.join("."))
    }

    /// First object of class `class` (or a subclass) whose qualified name is
    /// `name` or ends with `.name`
    pub fn find(&self, class: &str, name: &str) -> Option<ObjectId> {
        let suffix = format!(".{}", name);
        self.objects()
            .filter(|(_, o)| self.metamodel.is_instance(&o.class, class))
            .find(|(id, _)| {
                self.qualified_name(*id)
                    .map_or(false, |q| q == name || q.ends_with(&suffix))
            })
            .map(|(id, _)| id)
    }
}

impl fmt::Display for Model<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let root = self.object(self.root());
        match root.name() {
            Some(name) => write!(f, "{} '{}'", root.class, name)?,
            None => write!(f, "{}", root.class)?,
        }
        match self.objects.len() {
            1 => f.write_str(" (1 object)"),
            n => write!(f, " ({} objects)", n),
        }
    }
}
