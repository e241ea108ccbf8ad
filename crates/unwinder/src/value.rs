use std::{fmt, rc::Rc};

use crate::{
    exception_private::ExceptionRef,
    types::{GeneratorRef, ManagerRef},
};

/// A runtime value.
///
/// Scalars are stored inline; exceptions, generators and context managers are shared
/// handles whose identity survives cloning.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
    Exception(ExceptionRef),
    Generator(GeneratorRef),
    Manager(ManagerRef),
}

impl Value {
    /// `None`, `False`, `0` and the empty string are falsy; everything else is truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Str(s) => !s.is_empty(),
            Self::Exception(_) | Self::Generator(_) | Self::Manager(_) => true,
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "str",
            Self::Exception(exc) => exc.kind().into(),
            Self::Generator(_) => "generator",
            Self::Manager(_) => "manager",
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_exception(&self) -> Option<&ExceptionRef> {
        match self {
            Self::Exception(exc) => Some(exc),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_generator(&self) -> Option<&GeneratorRef> {
        match self {
            Self::Generator(generator) => Some(generator),
            _ => None,
        }
    }

    /// Identity for shared handles, equality for scalars.
    #[must_use]
    pub fn is(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Exception(a), Self::Exception(b)) => a.ptr_eq(b),
            (Self::Generator(a), Self::Generator(b)) => a.ptr_eq(b),
            (Self::Manager(a), Self::Manager(b)) => a.ptr_eq(b),
            _ => self == other,
        }
    }

    /// Quoted rendering, used for exception side-data.
    #[must_use]
    pub fn repr(&self) -> String {
        match self {
            Self::Str(s) => format!("'{s}'"),
            Self::Exception(exc) => match exc.message() {
                Some(message) => format!("{}('{message}')", exc.kind()),
                None => format!("{}()", exc.kind()),
            },
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Exception(a), Self::Exception(b)) => a.ptr_eq(b),
            (Self::Generator(a), Self::Generator(b)) => a.ptr_eq(b),
            (Self::Manager(a), Self::Manager(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    /// Strings print raw and exceptions print their message only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => f.write_str(s),
            Self::Exception(exc) => f.write_str(exc.message().unwrap_or_default()),
            Self::Generator(generator) => write!(f, "<generator object {}>", generator.name()),
            Self::Manager(manager) => write!(f, "<manager {}>", manager.name()),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<ExceptionRef> for Value {
    fn from(exc: ExceptionRef) -> Self {
        Self::Exception(exc)
    }
}
