//! The host value space.
//!
//! `HostValue` is a closed tagged variant over everything a handle can
//! name. Composite variants (`Object`, `Array`, `Element`) have reference
//! semantics: cloning the value clones the reference, and mutations made
//! through one handle are visible through every other handle to the same
//! composite.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::HostError;
use crate::function::FunctionRef;
use crate::types::MAX_ARRAY_LEN;

/// A value living in the host's object space.
#[derive(Clone, Default)]
pub enum HostValue {
    /// No value. Always crosses the boundary as handle `0`.
    #[default]
    Absent,
    Number(f64),
    Text(String),
    Object(ObjectRef),
    Array(ArrayRef),
    Function(FunctionRef),
    /// Reference to a host UI element.
    Element(ElementRef),
}

impl HostValue {
    /// Name of the variant, used in `TypeMismatch` errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
            Self::Function(_) => "function",
            Self::Element(_) => "element",
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// A fresh empty object.
    pub fn object() -> Self {
        Self::Object(ObjectRef::new())
    }

    /// A fresh empty array.
    pub fn array() -> Self {
        Self::Array(ArrayRef::new())
    }

    pub fn as_number(&self) -> Result<f64, HostError> {
        match self {
            Self::Number(n) => Ok(*n),
            other => Err(HostError::type_mismatch("number", other.kind())),
        }
    }

    pub fn as_text(&self) -> Result<&str, HostError> {
        match self {
            Self::Text(s) => Ok(s),
            other => Err(HostError::type_mismatch("text", other.kind())),
        }
    }

    pub fn as_object(&self) -> Result<&ObjectRef, HostError> {
        match self {
            Self::Object(o) => Ok(o),
            other => Err(HostError::type_mismatch("object", other.kind())),
        }
    }

    pub fn as_array(&self) -> Result<&ArrayRef, HostError> {
        match self {
            Self::Array(a) => Ok(a),
            other => Err(HostError::type_mismatch("array", other.kind())),
        }
    }

    pub fn as_function(&self) -> Result<&FunctionRef, HostError> {
        match self {
            Self::Function(f) => Ok(f),
            other => Err(HostError::type_mismatch("function", other.kind())),
        }
    }

    pub fn as_element(&self) -> Result<&ElementRef, HostError> {
        match self {
            Self::Element(e) => Ok(e),
            other => Err(HostError::type_mismatch("element", other.kind())),
        }
    }
}

impl PartialEq for HostValue {
    /// Primitives compare by value, composites by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Absent, Self::Absent) => true,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Array(a), Self::Array(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => a == b,
            (Self::Element(a), Self::Element(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "Absent"),
            Self::Number(n) => write!(f, "Number({})", n),
            Self::Text(s) => write!(f, "Text({:?})", s),
            Self::Object(o) => write!(f, "Object({} keys)", o.len()),
            Self::Array(a) => write!(f, "Array({} items)", a.len()),
            Self::Function(func) => write!(f, "Function({})", func.name()),
            Self::Element(e) => write!(f, "Element(<{}>)", e.tag()),
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.borrow().iter()).finish()
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.borrow().iter()).finish()
    }
}

impl fmt::Debug for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.tag())
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for HostValue {
    fn from(n: i32) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<ObjectRef> for HostValue {
    fn from(o: ObjectRef) -> Self {
        Self::Object(o)
    }
}

impl From<ArrayRef> for HostValue {
    fn from(a: ArrayRef) -> Self {
        Self::Array(a)
    }
}

impl From<FunctionRef> for HostValue {
    fn from(f: FunctionRef) -> Self {
        Self::Function(f)
    }
}

impl From<ElementRef> for HostValue {
    fn from(e: ElementRef) -> Self {
        Self::Element(e)
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(items: Vec<HostValue>) -> Self {
        Self::Array(ArrayRef::from_vec(items))
    }
}

/// Shared reference to a string-keyed object.
#[derive(Clone, Default)]
pub struct ObjectRef(Rc<RefCell<BTreeMap<String, HostValue>>>);

impl ObjectRef {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value stored under `key`, or `Absent`.
    pub fn get(&self, key: &str) -> HostValue {
        self.0.borrow().get(key).cloned().unwrap_or_default()
    }

    /// Store `value` under `key`. Storing `Absent` removes the key.
    pub fn set(&self, key: impl Into<String>, value: HostValue) {
        let key = key.into();
        if value.is_absent() {
            self.0.borrow_mut().remove(&key);
        } else {
            self.0.borrow_mut().insert(key, value);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Shared reference to a growable array.
#[derive(Clone, Default)]
pub struct ArrayRef(Rc<RefCell<Vec<HostValue>>>);

impl ArrayRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<HostValue>) -> Self {
        Self(Rc::new(RefCell::new(items)))
    }

    /// Element at `index`, or `Absent` past the end.
    pub fn get(&self, index: usize) -> HostValue {
        self.0.borrow().get(index).cloned().unwrap_or_default()
    }

    /// Store `value` at `index`, extending with `Absent` holes as needed.
    ///
    /// Growth stops at [`MAX_ARRAY_LEN`]; writes past it fail with
    /// `IndexOutOfRange` and leave the array untouched.
    pub fn set(&self, index: usize, value: HostValue) -> Result<(), HostError> {
        let mut items = self.0.borrow_mut();
        if index >= items.len() {
            if index >= MAX_ARRAY_LEN {
                return Err(HostError::IndexOutOfRange {
                    index: index as u64,
                    limit: MAX_ARRAY_LEN,
                });
            }
            items.resize(index + 1, HostValue::Absent);
        }
        items[index] = value;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// A host UI element: a tag name plus a property bag.
pub struct Element {
    tag: String,
    props: ObjectRef,
}

/// Shared reference to an [`Element`].
#[derive(Clone)]
pub struct ElementRef(Rc<Element>);

impl ElementRef {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(Rc::new(Element {
            tag: tag.into(),
            props: ObjectRef::new(),
        }))
    }

    pub fn tag(&self) -> &str {
        &self.0.tag
    }

    pub fn props(&self) -> &ObjectRef {
        &self.0.props
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
