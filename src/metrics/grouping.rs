//! Grouping and overflow control for one aggregator's flush window.
//!
//! The controller enforces two kinds of cardinality limits:
//!
//! - **Dimension limits**: a hierarchy of fields (e.g. `service.name` then
//!   `transaction.name`), each with a cap on distinct values. The distinct set
//!   of dimension *i* is scoped by the values of dimensions `0..i`, so a busy
//!   service exhausting its transaction-name budget never affects another
//!   service.
//! - **Aggregator limit**: a window-wide cap on buckets. Once reached the
//!   controller is [`ControllerState::Saturated`] and every further unseen
//!   key lands in one reserved overflow bucket.
//!
//! All state lives for exactly one window and is dropped by [`GroupingController::reset`].

use crate::core::{Limit, OVERFLOW_SENTINEL};
use crate::metrics::key::{self, CompositeKey};
use ahash::RandomState;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

/// One level of a grouping hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDimension {
    /// Event field holding the dimension value
    pub field: &'static str,
    /// Distinct values allowed per parent scope per window
    pub limit: Limit,
}

impl GroupDimension {
    /// Creates a dimension
    pub fn new(field: &'static str, limit: Limit) -> Self {
        Self { field, limit }
    }
}

/// Grouping hierarchy and aggregator-level limit of a metricset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grouping {
    dimensions: Vec<GroupDimension>,
    aggregator_limit: Limit,
    aggregator_fields: Vec<&'static str>,
}

impl Grouping {
    /// Creates a grouping over `dimensions`, outermost first
    pub fn new(dimensions: Vec<GroupDimension>) -> Self {
        Self {
            dimensions,
            aggregator_limit: Limit::Unbounded,
            aggregator_fields: Vec::new(),
        }
    }

    /// Sets the window-wide bucket limit and the fields replaced by the
    /// overflow sentinel in the reserved overflow bucket
    pub fn with_aggregator_limit(mut self, limit: Limit, fields: &[&'static str]) -> Self {
        self.aggregator_limit = limit;
        self.aggregator_fields = fields.to_vec();
        self
    }

    /// Dimensions, outermost first
    pub fn dimensions(&self) -> &[GroupDimension] {
        &self.dimensions
    }

    /// Window-wide bucket limit
    pub fn aggregator_limit(&self) -> Limit {
        self.aggregator_limit
    }

    /// Fields set to the sentinel in the aggregator overflow bucket
    pub fn aggregator_fields(&self) -> &[&'static str] {
        &self.aggregator_fields
    }
}

/// Whether new groups are still accepted this window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Below the aggregator limit
    Active,
    /// Aggregator limit reached; new keys go to the reserved overflow bucket
    Saturated,
}

/// Outcome of [`GroupingController::admit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First event of an admitted group
    NewGroup(CompositeKey),
    /// Group already admitted this window
    ExistingGroup(CompositeKey),
    /// A dimension limit overflowed; the event belongs to the `_other`
    /// bucket scoped under the dimensions before `depth`
    DimensionOverflow {
        /// Key of the overflow bucket
        key: CompositeKey,
        /// Index of the dimension that overflowed
        depth: usize,
        /// True the first time this original key was redirected this window
        first_redirect: bool,
    },
    /// The aggregator limit is reached
    AggregatorOverflow {
        /// Key of the reserved overflow bucket
        key: CompositeKey,
        /// True the first time this original key was redirected this window
        first_redirect: bool,
    },
}

impl Admission {
    /// Key of the bucket the event must be reduced into
    pub fn bucket_key(&self) -> CompositeKey {
        match self {
            Admission::NewGroup(key) | Admission::ExistingGroup(key) => *key,
            Admission::DimensionOverflow { key, .. } | Admission::AggregatorOverflow { key, .. } => {
                *key
            },
        }
    }

    /// True if the event was redirected into an overflow bucket
    pub fn is_overflow(&self) -> bool {
        matches!(
            self,
            Admission::DimensionOverflow { .. } | Admission::AggregatorOverflow { .. }
        )
    }
}

/// Why a group was folded into an overflow bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverflowReason {
    /// A dimension's distinct-value limit was exceeded
    Dimension {
        /// Index of the dimension
        depth: usize,
        /// Field of the dimension
        field: &'static str,
        /// The value that did not fit
        value: Option<String>,
    },
    /// The aggregator limit was reached
    Aggregator,
}

/// A group that was not given its own bucket this window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuppressedGroup {
    /// The key the group would have had
    pub original_key: CompositeKey,
    /// The overflow bucket it was folded into
    pub overflow_key: CompositeKey,
    /// Why it was folded
    pub reason: OverflowReason,
}

#[derive(Debug, Clone, Copy)]
enum Redirect {
    Dimension { key: CompositeKey, depth: usize },
    Aggregator,
}

type ScopedValues = HashMap<CompositeKey, HashSet<Option<String>, RandomState>, RandomState>;

/// Per-window admission state for one aggregator
#[derive(Debug)]
pub struct GroupingController {
    grouping: Grouping,
    /// Distinct values per dimension, keyed by the digest of the parent path
    seen: Vec<ScopedValues>,
    /// Buckets counted against the aggregator limit
    admitted: HashSet<CompositeKey, RandomState>,
    /// Original keys that were redirected, so repeats resolve identically
    redirected: HashMap<CompositeKey, Redirect, RandomState>,
    suppressed: Vec<SuppressedGroup>,
    state: ControllerState,
    aggregator_overflow_key: CompositeKey,
}

impl GroupingController {
    /// Creates a controller in the `Active` state
    pub fn new(grouping: Grouping) -> Self {
        let seen = grouping
            .dimensions
            .iter()
            .map(|_| ScopedValues::default())
            .collect();
        Self {
            grouping,
            seen,
            admitted: HashSet::default(),
            redirected: HashMap::default(),
            suppressed: Vec::new(),
            state: ControllerState::Active,
            aggregator_overflow_key: key::append(
                key::hash_values([Some(OVERFLOW_SENTINEL)]),
                b"aggregator_overflow",
            ),
        }
    }

    /// The grouping this controller enforces
    pub fn grouping(&self) -> &Grouping {
        &self.grouping
    }

    /// Current state
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Buckets counted against the aggregator limit
    pub fn admitted(&self) -> usize {
        self.admitted.len()
    }

    /// Key of the reserved aggregator overflow bucket
    pub fn aggregator_overflow_key(&self) -> CompositeKey {
        self.aggregator_overflow_key
    }

    /// Groups redirected into overflow buckets so far this window
    pub fn suppressed(&self) -> &[SuppressedGroup] {
        &self.suppressed
    }

    /// Distinct values seen for dimension `depth` under the `parent` path
    pub fn distinct_values(&self, depth: usize, parent: &[Option<String>]) -> usize {
        self.seen
            .get(depth)
            .and_then(|scoped| scoped.get(&scope_key(parent, depth)))
            .map_or(0, HashSet::len)
    }

    /// Decides which bucket an event with `key` and grouping `values` belongs to.
    ///
    /// `values` follow the dimension order; missing trailing values count as absent.
    pub fn admit(&mut self, key: CompositeKey, values: &[Option<String>]) -> Admission {
        if self.admitted.contains(&key) {
            return Admission::ExistingGroup(key);
        }

        if let Some(redirect) = self.redirected.get(&key) {
            return match *redirect {
                Redirect::Dimension { key, depth } => Admission::DimensionOverflow {
                    key,
                    depth,
                    first_redirect: false,
                },
                Redirect::Aggregator => Admission::AggregatorOverflow {
                    key: self.aggregator_overflow_key,
                    first_redirect: false,
                },
            };
        }

        // Evaluate dimension limits outermost first without committing anything.
        let mut pending: SmallVec<[(usize, CompositeKey, Option<String>); 2]> = SmallVec::new();
        let mut overflow_depth = None;
        for (depth, dimension) in self.grouping.dimensions.iter().enumerate() {
            let scope = scope_key(values, depth);
            let value = values.get(depth).cloned().flatten();
            let distinct = self.seen[depth].get(&scope);

            if distinct.map_or(false, |set| set.contains(&value)) {
                continue;
            }
            let count = distinct.map_or(0, HashSet::len);
            if !dimension.limit.allows(count) {
                overflow_depth = Some(depth);
                break;
            }
            pending.push((depth, scope, value));
        }

        let target = match overflow_depth {
            Some(depth) => dimension_overflow_key(values, depth),
            None => key,
        };

        // An existing dimension overflow bucket absorbs the group without a new slot.
        if let Some(depth) = overflow_depth {
            if self.admitted.contains(&target) {
                self.commit(pending);
                return self.redirect_dimension(key, target, depth, values);
            }
        }

        if !self.grouping.aggregator_limit.allows(self.admitted.len()) {
            self.state = ControllerState::Saturated;
            self.redirected.insert(key, Redirect::Aggregator);
            self.suppressed.push(SuppressedGroup {
                original_key: key,
                overflow_key: self.aggregator_overflow_key,
                reason: OverflowReason::Aggregator,
            });
            tracing::trace!(key = %key, "aggregator limit reached, group redirected");
            return Admission::AggregatorOverflow {
                key: self.aggregator_overflow_key,
                first_redirect: true,
            };
        }

        self.commit(pending);
        self.admitted.insert(target);
        if !self.grouping.aggregator_limit.allows(self.admitted.len()) {
            self.state = ControllerState::Saturated;
        }

        match overflow_depth {
            Some(depth) => self.redirect_dimension(key, target, depth, values),
            None => Admission::NewGroup(key),
        }
    }

    /// Drops all window state and returns to `Active`
    pub fn reset(&mut self) -> Vec<SuppressedGroup> {
        for scoped in &mut self.seen {
            scoped.clear();
        }
        self.admitted.clear();
        self.redirected.clear();
        self.state = ControllerState::Active;
        std::mem::take(&mut self.suppressed)
    }

    fn commit(&mut self, pending: SmallVec<[(usize, CompositeKey, Option<String>); 2]>) {
        for (depth, scope, value) in pending {
            self.seen[depth].entry(scope).or_default().insert(value);
        }
    }

    fn redirect_dimension(
        &mut self,
        key: CompositeKey,
        target: CompositeKey,
        depth: usize,
        values: &[Option<String>],
    ) -> Admission {
        self.redirected.insert(key, Redirect::Dimension { key: target, depth });
        self.suppressed.push(SuppressedGroup {
            original_key: key,
            overflow_key: target,
            reason: OverflowReason::Dimension {
                depth,
                field: self.grouping.dimensions[depth].field,
                value: values.get(depth).cloned().flatten(),
            },
        });
        tracing::trace!(key = %key, depth, "dimension limit reached, group redirected");
        Admission::DimensionOverflow {
            key: target,
            depth,
            first_redirect: true,
        }
    }
}

/// Digest of the dimension values above `depth`.
fn scope_key(values: &[Option<String>], depth: usize) -> CompositeKey {
    key::hash_values((0..depth).map(|i| values.get(i).and_then(|v| v.as_deref())))
}

/// Key of the `_other` bucket for an overflow at `depth` under the real parent values.
fn dimension_overflow_key(values: &[Option<String>], depth: usize) -> CompositeKey {
    let path = (0..depth)
        .map(|i| values.get(i).and_then(|v| v.as_deref()))
        .chain(std::iter::once(Some(OVERFLOW_SENTINEL)));
    #[allow(clippy::cast_possible_truncation)]
    key::append(key::hash_values(path), &[b'd', depth as u8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(parts: &[&str]) -> Vec<Option<String>> {
        parts.iter().map(|p| Some((*p).to_string())).collect()
    }

    fn key_of(parts: &[&str]) -> CompositeKey {
        key::hash_values(parts.iter().map(|p| Some(*p)))
    }

    fn two_level(services: Limit, names: Limit) -> Grouping {
        Grouping::new(vec![
            GroupDimension::new("service.name", services),
            GroupDimension::new("transaction.name", names),
        ])
    }

    #[test]
    fn test_unbounded_admits_everything() {
        let mut controller = GroupingController::new(two_level(Limit::Unbounded, Limit::Unbounded));
        for i in 0..100 {
            let name = format!("tx-{}", i);
            let v = values(&["svc", name.as_str()]);
            let k = key_of(&["svc", name.as_str()]);
            assert_eq!(controller.admit(k, &v), Admission::NewGroup(k));
        }
        assert_eq!(controller.admitted(), 100);
        assert_eq!(controller.state(), ControllerState::Active);
    }

    #[test]
    fn test_existing_group() {
        let mut controller = GroupingController::new(two_level(Limit::Max(1), Limit::Max(1)));
        let k = key_of(&["svc", "a"]);
        assert_eq!(controller.admit(k, &values(&["svc", "a"])), Admission::NewGroup(k));
        assert_eq!(controller.admit(k, &values(&["svc", "a"])), Admission::ExistingGroup(k));
    }

    #[test]
    fn test_child_overflow_scoped_to_parent() {
        let mut controller = GroupingController::new(two_level(Limit::Unbounded, Limit::Max(1)));

        let a1 = key_of(&["A", "one"]);
        let a2 = key_of(&["A", "two"]);
        let b1 = key_of(&["B", "one"]);
        let b2 = key_of(&["B", "two"]);

        assert_eq!(controller.admit(a1, &values(&["A", "one"])), Admission::NewGroup(a1));
        let overflow_a = controller.admit(a2, &values(&["A", "two"]));
        assert!(matches!(
            overflow_a,
            Admission::DimensionOverflow { depth: 1, first_redirect: true, .. }
        ));

        // service B keeps its own budget
        assert_eq!(controller.admit(b1, &values(&["B", "one"])), Admission::NewGroup(b1));
        let overflow_b = controller.admit(b2, &values(&["B", "two"]));
        assert!(matches!(overflow_b, Admission::DimensionOverflow { depth: 1, .. }));
        assert_ne!(overflow_a.bucket_key(), overflow_b.bucket_key());
    }

    #[test]
    fn test_overflow_bucket_shared_within_parent() {
        let mut controller = GroupingController::new(two_level(Limit::Unbounded, Limit::Max(1)));
        controller.admit(key_of(&["A", "one"]), &values(&["A", "one"]));

        let first = controller.admit(key_of(&["A", "two"]), &values(&["A", "two"]));
        let second = controller.admit(key_of(&["A", "three"]), &values(&["A", "three"]));
        let repeat = controller.admit(key_of(&["A", "two"]), &values(&["A", "two"]));

        assert_eq!(first.bucket_key(), second.bucket_key());
        assert!(matches!(second, Admission::DimensionOverflow { first_redirect: true, .. }));
        assert!(matches!(repeat, Admission::DimensionOverflow { first_redirect: false, .. }));
        assert_eq!(controller.suppressed().len(), 2);
    }

    #[test]
    fn test_outer_dimension_overflow_wins() {
        let mut controller = GroupingController::new(two_level(Limit::Max(1), Limit::Unbounded));
        controller.admit(key_of(&["A", "one"]), &values(&["A", "one"]));

        let admission = controller.admit(key_of(&["B", "one"]), &values(&["B", "one"]));
        assert!(matches!(admission, Admission::DimensionOverflow { depth: 0, .. }));
    }

    #[test]
    fn test_aggregator_limit_saturates() {
        let grouping = two_level(Limit::Unbounded, Limit::Unbounded)
            .with_aggregator_limit(Limit::Max(1), &["service.name"]);
        let mut controller = GroupingController::new(grouping);

        let a = key_of(&["A", "x"]);
        assert_eq!(controller.admit(a, &values(&["A", "x"])), Admission::NewGroup(a));
        assert_eq!(controller.state(), ControllerState::Saturated);

        let b = controller.admit(key_of(&["B", "x"]), &values(&["B", "x"]));
        let c = controller.admit(key_of(&["C", "x"]), &values(&["C", "x"]));
        assert_eq!(
            b,
            Admission::AggregatorOverflow {
                key: controller.aggregator_overflow_key(),
                first_redirect: true
            }
        );
        assert_eq!(b.bucket_key(), c.bucket_key());
        assert_eq!(controller.admitted(), 1);

        // the existing group is still served
        assert_eq!(controller.admit(a, &values(&["A", "x"])), Admission::ExistingGroup(a));
    }

    #[test]
    fn test_rejected_group_does_not_consume_dimension_slot() {
        let grouping = two_level(Limit::Max(2), Limit::Unbounded)
            .with_aggregator_limit(Limit::Max(1), &["service.name"]);
        let mut controller = GroupingController::new(grouping);

        controller.admit(key_of(&["A", "x"]), &values(&["A", "x"]));
        let rejected = controller.admit(key_of(&["B", "x"]), &values(&["B", "x"]));

        assert!(matches!(rejected, Admission::AggregatorOverflow { .. }));
        assert_eq!(controller.distinct_values(0, &[]), 1);

        let suppressed = controller.reset();
        assert_eq!(suppressed.len(), 1);
        assert_eq!(suppressed[0].reason, OverflowReason::Aggregator);
        assert_eq!(controller.state(), ControllerState::Active);
        assert_eq!(controller.distinct_values(0, &[]), 0);
    }

    #[test]
    fn test_aggregator_limit_applies_to_new_overflow_bucket() {
        let grouping = two_level(Limit::Unbounded, Limit::Max(1))
            .with_aggregator_limit(Limit::Max(1), &["service.name", "transaction.name"]);
        let mut controller = GroupingController::new(grouping);

        controller.admit(key_of(&["A", "one"]), &values(&["A", "one"]));
        let admission = controller.admit(key_of(&["A", "two"]), &values(&["A", "two"]));
        assert!(matches!(admission, Admission::AggregatorOverflow { .. }));
    }

    #[test]
    fn test_suppressed_records_dimension_value() {
        let grouping = Grouping::new(vec![GroupDimension::new("service.name", Limit::Max(1))]);
        let mut controller = GroupingController::new(grouping);

        controller.admit(key_of(&["A"]), &values(&["A"]));
        let original = key_of(&["B"]);
        controller.admit(original, &values(&["B"]));

        let suppressed = &controller.suppressed()[0];
        assert_eq!(suppressed.original_key, original);
        assert_eq!(
            suppressed.reason,
            OverflowReason::Dimension {
                depth: 0,
                field: "service.name",
                value: Some("B".to_string())
            }
        );
    }

    #[test]
    fn test_reset_restores_budget() {
        let grouping = Grouping::new(vec![GroupDimension::new("service.name", Limit::Max(1))]);
        let mut controller = GroupingController::new(grouping);

        controller.admit(key_of(&["A"]), &values(&["A"]));
        assert!(controller.admit(key_of(&["B"]), &values(&["B"])).is_overflow());

        controller.reset();
        let b = key_of(&["B"]);
        assert_eq!(controller.admit(b, &values(&["B"])), Admission::NewGroup(b));
    }

    #[test]
    fn test_absent_value_is_distinct() {
        let grouping = Grouping::new(vec![GroupDimension::new("service.name", Limit::Max(1))]);
        let mut controller = GroupingController::new(grouping);

        let absent = key::hash_values([None]);
        assert_eq!(controller.admit(absent, &[None]), Admission::NewGroup(absent));
        assert!(controller.admit(key_of(&["A"]), &values(&["A"])).is_overflow());
    }
}
