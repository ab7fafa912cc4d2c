use std::collections::{BTreeMap, btree_map};

/// A type that can be merged with itself
///
/// Service definitions can come from several sources (the charm config and any number of related
/// units), and those sources may describe the same service. Merging combines two descriptions
/// into one, where the description being merged *into* takes precedence.
///
/// # Example
///
/// ```
/// # use haproxy_charm::service::merge::{Merge, merge};
/// # use haproxy_charm::service::ServiceDefinition;
/// let config = ServiceDefinition {
///     service_name: Some("left".to_owned()),
///     ..ServiceDefinition::default()
/// };
/// let relation = ServiceDefinition {
///     service_name: Some("right".to_owned()),
///     service_port: Some(80),
///     ..ServiceDefinition::default()
/// };
///
/// let merged = merge(config, &relation);
/// assert_eq!(merged.service_name.as_deref(), Some("left")); // Kept from the left side
/// assert_eq!(merged.service_port, Some(80)); // Fallback is used
/// ```
pub trait Merge {
    /// Merge with `defaults`, preferring values from `self` if they are set there
    fn merge(&mut self, defaults: &Self);
}

impl<K: Ord + Clone, V: Merge + Clone> Merge for BTreeMap<K, V> {
    fn merge(&mut self, defaults: &Self) {
        for (k, default_v) in defaults {
            match self.entry(k.clone()) {
                btree_map::Entry::Occupied(mut entry) => {
                    entry.get_mut().merge(default_v);
                }
                btree_map::Entry::Vacant(entry) => {
                    entry.insert(default_v.clone());
                }
            }
        }
    }
}

/// Moving version of [`Merge::merge`], to produce slightly nicer test output
pub fn merge<T: Merge>(mut overrides: T, defaults: &T) -> T {
    overrides.merge(defaults);
    overrides
}

/// A marker trait for types that are merged atomically (as one single value) rather than
/// trying to merge each field individually
pub trait Atomic: Clone {}
impl Atomic for u16 {}
impl Atomic for String {}
// Option lists replace each other wholesale, only server lists are combined.
impl Atomic for Vec<String> {}

impl<T: Atomic> Merge for Option<T> {
    fn merge(&mut self, defaults: &Self) {
        if self.is_none() {
            *self = defaults.clone();
        }
    }
}

// Unknown keys are opaque, the overriding value is kept as is.
impl Merge for serde_yaml::Value {
    fn merge(&mut self, _defaults: &Self) {}
}
