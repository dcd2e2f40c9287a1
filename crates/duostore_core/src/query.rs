//! Fetch specifications: filter, sort, and clip criteria for a fetch.
//!
//! A [`FetchSpec`] is stateless and context-agnostic; the same spec can be
//! executed any number of times against either context.

use crate::attrs::{AttrMap, AttrValue};
use crate::entity::Entity;
use std::cmp::Ordering;
use std::marker::PhantomData;

/// A filter predicate over a record's attribute map.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every record.
    All,
    /// Attribute equals value. A missing attribute never matches.
    Eq(String, AttrValue),
    /// Attribute differs from value (missing attributes match).
    Ne(String, AttrValue),
    /// Attribute is strictly less than value.
    Lt(String, AttrValue),
    /// Attribute is less than or equal to value.
    Le(String, AttrValue),
    /// Attribute is strictly greater than value.
    Gt(String, AttrValue),
    /// Attribute is greater than or equal to value.
    Ge(String, AttrValue),
    /// Text attribute contains the given substring.
    Contains(String, String),
    /// All sub-predicates match.
    And(Vec<Predicate>),
    /// At least one sub-predicate matches.
    Or(Vec<Predicate>),
    /// The sub-predicate does not match.
    Not(Box<Predicate>),
}

impl Predicate {
    /// Equality predicate.
    pub fn eq(key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        Self::Eq(key.into(), value.into())
    }

    /// Inequality predicate.
    pub fn ne(key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        Self::Ne(key.into(), value.into())
    }

    /// Less-than predicate.
    pub fn lt(key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        Self::Lt(key.into(), value.into())
    }

    /// Less-than-or-equal predicate.
    pub fn le(key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        Self::Le(key.into(), value.into())
    }

    /// Greater-than predicate.
    pub fn gt(key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        Self::Gt(key.into(), value.into())
    }

    /// Greater-than-or-equal predicate.
    pub fn ge(key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        Self::Ge(key.into(), value.into())
    }

    /// Substring predicate over a text attribute.
    pub fn contains(key: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains(key.into(), needle.into())
    }

    /// Conjunction of predicates.
    #[must_use]
    pub fn and(predicates: Vec<Predicate>) -> Self {
        Self::And(predicates)
    }

    /// Disjunction of predicates.
    #[must_use]
    pub fn or(predicates: Vec<Predicate>) -> Self {
        Self::Or(predicates)
    }

    /// Negation of a predicate.
    #[must_use]
    pub fn not(predicate: Predicate) -> Self {
        Self::Not(Box::new(predicate))
    }

    /// Evaluates the predicate against an attribute map.
    pub(crate) fn matches(&self, attrs: &AttrMap) -> bool {
        match self {
            Self::All => true,
            Self::Eq(key, value) => attrs.get(key) == Some(value),
            Self::Ne(key, value) => attrs.get(key) != Some(value),
            Self::Lt(key, value) => Self::ordered(attrs, key, value, Ordering::is_lt),
            Self::Le(key, value) => Self::ordered(attrs, key, value, Ordering::is_le),
            Self::Gt(key, value) => Self::ordered(attrs, key, value, Ordering::is_gt),
            Self::Ge(key, value) => Self::ordered(attrs, key, value, Ordering::is_ge),
            Self::Contains(key, needle) => attrs
                .get(key)
                .and_then(AttrValue::as_text)
                .is_some_and(|text| text.contains(needle.as_str())),
            Self::And(preds) => preds.iter().all(|p| p.matches(attrs)),
            Self::Or(preds) => preds.iter().any(|p| p.matches(attrs)),
            Self::Not(pred) => !pred.matches(attrs),
        }
    }

    fn ordered(attrs: &AttrMap, key: &str, value: &AttrValue, test: fn(Ordering) -> bool) -> bool {
        attrs
            .get(key)
            .and_then(|v| v.compare(value))
            .is_some_and(test)
    }
}

/// Sort direction for a sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Smallest values first.
    Ascending,
    /// Largest values first.
    Descending,
}

/// One sort criterion: attribute key plus direction.
#[derive(Debug, Clone)]
pub(crate) struct SortKey {
    pub(crate) key: String,
    pub(crate) direction: SortDirection,
}

/// Type-erased fetch criteria.
#[derive(Debug, Clone)]
pub(crate) struct RawSpec {
    pub(crate) entity: &'static str,
    pub(crate) attributes: &'static [&'static str],
    pub(crate) predicate: Predicate,
    pub(crate) sort: Vec<SortKey>,
    pub(crate) limit: Option<usize>,
    pub(crate) offset: usize,
}

impl RawSpec {
    /// Sorts and clips already-filtered rows in place.
    ///
    /// Without sort keys the incoming (store-defined) order is kept.
    /// Records missing a sort attribute order before records that have it;
    /// incomparable values keep their relative order.
    pub(crate) fn order_and_clip(&self, rows: &mut Vec<(crate::types::RecordId, AttrMap)>) {
        if !self.sort.is_empty() {
            rows.sort_by(|(_, a), (_, b)| {
                for sort_key in &self.sort {
                    let ord = match (a.get(&sort_key.key), b.get(&sort_key.key)) {
                        (None, None) => Ordering::Equal,
                        (None, Some(_)) => Ordering::Less,
                        (Some(_), None) => Ordering::Greater,
                        (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
                    };
                    let ord = match sort_key.direction {
                        SortDirection::Ascending => ord,
                        SortDirection::Descending => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        if self.offset > 0 {
            rows.drain(..self.offset.min(rows.len()));
        }
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
    }
}

/// A fetch specification for entity `E`.
///
/// # Example
///
/// ```rust,ignore
/// let spec = FetchSpec::<Player>::filtered(Predicate::ge("score", 10i64))
///     .sort_by("score", SortDirection::Descending)
///     .limit(3);
/// let top = coordinator.fetch(&spec)?;
/// ```
#[derive(Debug)]
pub struct FetchSpec<E: Entity> {
    raw: RawSpec,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity> FetchSpec<E> {
    /// A spec matching every record of the entity.
    #[must_use]
    pub fn all() -> Self {
        Self::filtered(Predicate::All)
    }

    /// A spec with the given filter predicate.
    #[must_use]
    pub fn filtered(predicate: Predicate) -> Self {
        Self {
            raw: RawSpec {
                entity: E::NAME,
                attributes: E::attributes(),
                predicate,
                sort: Vec::new(),
                limit: None,
                offset: 0,
            },
            _marker: PhantomData,
        }
    }

    /// Replaces the filter predicate.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.raw.predicate = predicate;
        self
    }

    /// Appends a sort criterion.
    #[must_use]
    pub fn sort_by(mut self, key: impl Into<String>, direction: SortDirection) -> Self {
        self.raw.sort.push(SortKey {
            key: key.into(),
            direction,
        });
        self
    }

    /// Caps the number of returned records.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.raw.limit = Some(limit);
        self
    }

    /// Skips the first `offset` matching records.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.raw.offset = offset;
        self
    }

    pub(crate) fn raw(&self) -> &RawSpec {
        &self.raw
    }
}

impl<E: Entity> Clone for FetchSpec<E> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}
