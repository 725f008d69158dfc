//! Entity filters for [`crate::Store::scan`].
//!
//! Filtering is plain Rust: any `Fn(&Entity) -> bool` is a [`Filter`].
//! [`Predicate`] covers the common field comparisons as data, so filters
//! can be built at runtime.
//!
//! ```
//! use bottledb_core::{Entity, Filter, Predicate};
//!
//! let adult = Predicate::ge("age", 18i64).and(Predicate::is_null("banned"));
//! assert!(adult.matches(&Entity::new("app.User").with("age", 30i64)));
//! assert!(!adult.matches(&Entity::new("app.User").with("age", 12i64)));
//! ```

use crate::entity::Entity;
use crate::value::Value;
use std::cmp::Ordering;

/// Decides whether an entity belongs to a result.
pub trait Filter {
    /// Returns true if `entity` matches.
    fn matches(&self, entity: &Entity) -> bool;
}

impl<F> Filter for F
where
    F: Fn(&Entity) -> bool,
{
    fn matches(&self, entity: &Entity) -> bool {
        self(entity)
    }
}

/// Matches every entity.
#[derive(Debug, Clone, Copy, Default)]
pub struct All;

impl Filter for All {
    fn matches(&self, _entity: &Entity) -> bool {
        true
    }
}

/// A field condition.
///
/// Field names may be dotted paths through nested composites and entities
/// (`customer.name`). A path that ends at an absent field compares as
/// false, except for [`Predicate::IsNull`].
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Field equals the value.
    Eq(String, Value),
    /// Field is present and differs from the value.
    Ne(String, Value),
    /// Field is less than the value.
    Lt(String, Value),
    /// Field is less than or equal to the value.
    Le(String, Value),
    /// Field is greater than the value.
    Gt(String, Value),
    /// Field is greater than or equal to the value.
    Ge(String, Value),
    /// A list field holds the value, or a string field contains it.
    Contains(String, Value),
    /// Field is absent.
    IsNull(String),
    /// Every predicate matches.
    And(Vec<Predicate>),
    /// At least one predicate matches.
    Or(Vec<Predicate>),
    /// The predicate does not match.
    Not(Box<Predicate>),
}

impl Predicate {
    /// `field == value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    /// `field != value`.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ne(field.into(), value.into())
    }

    /// `field < value`.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt(field.into(), value.into())
    }

    /// `field <= value`.
    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Le(field.into(), value.into())
    }

    /// `field > value`.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt(field.into(), value.into())
    }

    /// `field >= value`.
    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ge(field.into(), value.into())
    }

    /// List membership or substring.
    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Contains(field.into(), value.into())
    }

    /// Field is absent.
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull(field.into())
    }

    /// Both predicates.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match self {
            Self::And(mut all) => {
                all.push(other);
                Self::And(all)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Either predicate.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match self {
            Self::Or(mut any) => {
                any.push(other);
                Self::Or(any)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    /// The negation.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    fn ordered(entity: &Entity, field: &str, value: &Value, accept: fn(Ordering) -> bool) -> bool {
        resolve(entity, field)
            .and_then(|found| compare(&found, value))
            .is_some_and(accept)
    }
}

impl Filter for Predicate {
    fn matches(&self, entity: &Entity) -> bool {
        match self {
            Self::Eq(field, value) => resolve(entity, field).is_some_and(|v| &v == value),
            Self::Ne(field, value) => resolve(entity, field).is_some_and(|v| &v != value),
            Self::Lt(field, value) => Self::ordered(entity, field, value, Ordering::is_lt),
            Self::Le(field, value) => Self::ordered(entity, field, value, Ordering::is_le),
            Self::Gt(field, value) => Self::ordered(entity, field, value, Ordering::is_gt),
            Self::Ge(field, value) => Self::ordered(entity, field, value, Ordering::is_ge),
            Self::Contains(field, value) => match (resolve(entity, field), value) {
                (Some(Value::List(items)), _) => items.contains(value),
                (Some(Value::Str(text)), Value::Str(part)) => text.contains(part.as_str()),
                (Some(Value::Str(text)), Value::Char(c)) => text.contains(*c),
                _ => false,
            },
            Self::IsNull(field) => resolve(entity, field).is_none(),
            Self::And(all) => all.iter().all(|p| p.matches(entity)),
            Self::Or(any) => any.iter().any(|p| p.matches(entity)),
            Self::Not(inner) => !inner.matches(entity),
        }
    }
}

/// Follows a dotted path from `entity`.
fn resolve(entity: &Entity, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let mut current = entity.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Entity(inner) => inner.get(segment)?,
            Value::Object(object) => object.get(segment)?.clone(),
            _ => return None,
        };
    }
    Some(current)
}

/// Orders two values of comparable kinds. Integers and floats compare
/// numerically with each other.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Object;

    fn order() -> Entity {
        let customer = Entity::new("shop.Customer").with("name", "Ada");
        Entity::new("shop.Order")
            .with("total", 42.5)
            .with("count", 3i64)
            .with("tags", vec![Value::from("rush"), Value::from("gift")])
            .with("note", "leave at door")
            .with("customer", customer)
            .with("address", Object::new("shop.Address").with("city", "Oslo"))
    }

    #[test]
    fn comparisons() {
        let order = order();
        assert!(Predicate::eq("count", 3i64).matches(&order));
        assert!(Predicate::ne("count", 4i64).matches(&order));
        assert!(Predicate::gt("total", 40i64).matches(&order));
        assert!(Predicate::le("count", 3.0).matches(&order));
        assert!(!Predicate::lt("count", 3i64).matches(&order));
        // Different kinds never order.
        assert!(!Predicate::lt("note", 3i64).matches(&order));
        // Absent fields are neither equal nor unequal.
        assert!(!Predicate::ne("missing", 1i64).matches(&order));
    }

    #[test]
    fn contains_and_null() {
        let order = order();
        assert!(Predicate::contains("tags", "gift").matches(&order));
        assert!(!Predicate::contains("tags", "fragile").matches(&order));
        assert!(Predicate::contains("note", "door").matches(&order));
        assert!(Predicate::is_null("shipped").matches(&order));
        assert!(!Predicate::is_null("note").matches(&order));
    }

    #[test]
    fn paths_and_combinators() {
        let order = order();
        assert!(Predicate::eq("customer.name", "Ada").matches(&order));
        assert!(Predicate::eq("address.city", "Oslo").matches(&order));
        assert!(!Predicate::eq("note.city", "Oslo").matches(&order));

        let both = Predicate::eq("count", 3i64).and(Predicate::contains("tags", "rush"));
        assert!(both.matches(&order));
        let neither = Predicate::eq("count", 1i64).or(Predicate::is_null("note"));
        assert!(!neither.matches(&order));
        assert!(neither.negate().matches(&order));
    }

    #[test]
    fn closures_are_filters() {
        let big = |e: &Entity| e.get("count").and_then(|v| v.as_int()).is_some_and(|n| n > 2);
        assert!(big.matches(&order()));
        assert!(All.matches(&order()));
    }
}
