//! The predicate tree: backend-independent search conditions.
//!
//! A search condition is either a plain equality map (the common case) or a
//! [`Where`] tree built from comparison leaves and AND/OR groups. Both arrive
//! at the model boundary as a [`Filter`] and are resolved into one
//! [`Predicate`] before any compiler sees them, so the compilers never
//! dispatch on the input shape.

use std::collections::BTreeMap;

use crate::value::Value;

/// Comparison operator for a predicate leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// Equal (array value => membership, null => IS NULL, false => false-or-null).
    Eq,
    /// Not equal; exact negation of [`Comparator::Eq`].
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
}

impl Comparator {
    /// SQL operator text for the plain (non-rewritten) cases.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Ne => "<>",
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
        }
    }
}

/// Boolean connective for a predicate group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    /// All children must match. An empty AND matches everything.
    And,
    /// Any child must match. An empty OR matches nothing.
    Or,
}

/// A node of the predicate tree.
///
/// Leaves carry a field/comparator/value triple; groups carry only children.
/// The shape invariants of the original design (leaves never have children,
/// groups never carry a field) hold by construction here.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// A comparison leaf.
    Compare {
        /// Field the comparison applies to.
        field: String,
        /// Comparison operator.
        op: Comparator,
        /// Right-hand value.
        value: Value,
    },
    /// An AND/OR group of child predicates, in insertion order.
    Group {
        /// Connective joining the children.
        op: BoolOp,
        /// Child predicates.
        children: Vec<Predicate>,
    },
}

impl Predicate {
    /// An empty AND group: matches every row.
    #[must_use]
    pub fn match_all() -> Self {
        Predicate::Group {
            op: BoolOp::And,
            children: Vec::new(),
        }
    }

    /// All field names referenced anywhere in the tree, deduplicated,
    /// in first-reference order.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_field_names(&mut names);
        names
    }

    fn collect_field_names<'a>(&'a self, into: &mut Vec<&'a str>) {
        match self {
            Predicate::Compare { field, .. } => {
                if !into.contains(&field.as_str()) {
                    into.push(field.as_str());
                }
            }
            Predicate::Group { children, .. } => {
                for child in children {
                    child.collect_field_names(into);
                }
            }
        }
    }
}

/// Fluent builder for a predicate tree. The root is an implicit AND.
///
/// ```
/// use anymodel_core::{Comparator, Where};
///
/// let w = Where::new()
///     .compare("age", Comparator::Gte, 18)
///     .or(|w| {
///         w.compare("role", Comparator::Eq, "admin")
///             .compare("role", Comparator::Eq, "owner")
///     });
/// assert_eq!(w.field_names(), vec!["age", "role"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Where {
    children: Vec<Predicate>,
}

impl Where {
    /// Start an empty tree (matches everything until leaves are added).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a comparison leaf to the current scope.
    #[must_use]
    pub fn compare(
        mut self,
        field: impl Into<String>,
        op: Comparator,
        value: impl Into<Value>,
    ) -> Self {
        self.children.push(Predicate::Compare {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Nest a new AND scope built by `build`.
    #[must_use]
    pub fn and(mut self, build: impl FnOnce(Where) -> Where) -> Self {
        let nested = build(Where::new());
        self.children.push(Predicate::Group {
            op: BoolOp::And,
            children: nested.children,
        });
        self
    }

    /// Nest a new OR scope built by `build`.
    #[must_use]
    pub fn or(mut self, build: impl FnOnce(Where) -> Where) -> Self {
        let nested = build(Where::new());
        self.children.push(Predicate::Group {
            op: BoolOp::Or,
            children: nested.children,
        });
        self
    }

    /// All referenced field names, deduplicated.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for child in &self.children {
            child.collect_field_names(&mut names);
        }
        names
    }

    /// Finish the builder into a [`Predicate`] rooted at AND.
    #[must_use]
    pub fn into_predicate(self) -> Predicate {
        Predicate::Group {
            op: BoolOp::And,
            children: self.children,
        }
    }
}

/// A search condition as accepted at the model boundary.
///
/// Either a plain field→value equality map (sugar for an AND of EQ leaves,
/// with arrays meaning membership and null meaning IS NULL) or an explicit
/// [`Where`] tree. Resolved exactly once, before any compiler runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Implicit AND of equality tests.
    Map(BTreeMap<String, Value>),
    /// An explicit predicate tree.
    Where(Where),
}

impl Filter {
    /// The empty filter: matches every row.
    #[must_use]
    pub fn all() -> Self {
        Filter::Map(BTreeMap::new())
    }

    /// Equality filter on a single field.
    #[must_use]
    pub fn by(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(field.into(), value.into());
        Filter::Map(map)
    }

    /// All referenced field names, deduplicated.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        match self {
            Filter::Map(map) => map.keys().map(String::as_str).collect(),
            Filter::Where(w) => w.field_names(),
        }
    }

    /// Resolve into a single [`Predicate`] tree.
    #[must_use]
    pub fn into_predicate(self) -> Predicate {
        match self {
            Filter::Map(map) => Predicate::Group {
                op: BoolOp::And,
                children: map
                    .into_iter()
                    .map(|(field, value)| Predicate::Compare {
                        field,
                        op: Comparator::Eq,
                        value,
                    })
                    .collect(),
            },
            Filter::Where(w) => w.into_predicate(),
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Filter::all()
    }
}

impl From<Where> for Filter {
    fn from(w: Where) -> Self {
        Filter::Where(w)
    }
}

impl From<BTreeMap<String, Value>> for Filter {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Filter::Map(map)
    }
}

impl<const N: usize> From<[(&str, Value); N]> for Filter {
    fn from(pairs: [(&str, Value); N]) -> Self {
        Filter::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }
}
