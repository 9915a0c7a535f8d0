use crate::db::value::{SqlType, Value};

/// Direction of a procedure parameter. OUT and INOUT carry the declared type
/// the driver needs to register an output slot.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamMode {
    In(Value),
    Out(SqlType),
    InOut(Value, SqlType),
}

/// A procedure-call parameter. An empty name means positional.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub mode: ParamMode,
}

impl Param {
    pub fn input(value: impl Into<Value>) -> Self {
        Self {
            name: String::new(),
            mode: ParamMode::In(value.into()),
        }
    }

    pub fn out(sql_type: SqlType) -> Self {
        Self {
            name: String::new(),
            mode: ParamMode::Out(sql_type),
        }
    }

    pub fn in_out(value: impl Into<Value>, sql_type: SqlType) -> Self {
        Self {
            name: String::new(),
            mode: ParamMode::InOut(value.into(), sql_type),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn is_named(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn is_in(&self) -> bool {
        matches!(self.mode, ParamMode::In(_) | ParamMode::InOut(..))
    }

    pub fn is_out(&self) -> bool {
        matches!(self.mode, ParamMode::Out(_) | ParamMode::InOut(..))
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.mode {
            ParamMode::In(value) | ParamMode::InOut(value, _) => Some(value),
            ParamMode::Out(_) => None,
        }
    }

    pub fn sql_type(&self) -> Option<SqlType> {
        match &self.mode {
            ParamMode::Out(sql_type) | ParamMode::InOut(_, sql_type) => Some(*sql_type),
            ParamMode::In(_) => None,
        }
    }
}

/// Value bound to a named placeholder. `Many` expands to one positional
/// placeholder per element.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding<T = Value> {
    One(T),
    Many(Vec<T>),
}

impl<T> Binding<T> {
    pub fn values(&self) -> &[T] {
        match self {
            Binding::One(value) => std::slice::from_ref(value),
            Binding::Many(values) => values,
        }
    }

    pub fn len(&self) -> usize {
        self.values().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values().is_empty()
    }
}

/// Ordered set of `name -> value` bindings as supplied by the caller.
/// Duplicates are kept here and rejected when the query is resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedBindings {
    entries: Vec<(String, Binding)>,
}

impl NamedBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.entries
            .push((name.to_string(), Binding::One(value.into())));
        self
    }

    pub fn bind_all<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.entries.push((name.to_string(), Binding::Many(values)));
        self
    }

    pub fn push(&mut self, name: &str, binding: Binding) {
        self.entries.push((name.to_string(), binding));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, Binding)] {
        &self.entries
    }
}

impl<K: AsRef<str>, V: Into<Value>> FromIterator<(K, V)> for NamedBindings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut bindings = NamedBindings::new();
        for (name, value) in iter {
            bindings.push(name.as_ref(), Binding::One(value.into()));
        }
        bindings
    }
}

/// Canonical `:name` form of a binding key. Names stay case-sensitive.
pub fn normalize_name(name: &str) -> String {
    let name = name.trim();
    if name.starts_with(':') {
        name.to_string()
    } else {
        format!(":{name}")
    }
}
