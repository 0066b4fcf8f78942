use crate::key::Key;
use rkyv::ser::serializers::AllocSerializer;
use rkyv::ser::Serializer;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Bounds selecting every key that is equal to `prefix` or descends from it.
fn subtree_bounds(prefix: &Key) -> (Bound<Key>, Bound<Key>) {
    if prefix.is_root() {
        (Bound::Unbounded, Bound::Unbounded)
    } else {
        (
            Bound::Included(prefix.clone()),
            Bound::Excluded(prefix.prefix_upper_bound()),
        )
    }
}

/// Iterates the entries of `map` whose keys are equal to or descend from
/// `prefix`.
pub(crate) fn map_range<'a, V>(
    prefix: &Key,
    map: &'a BTreeMap<Key, V>,
) -> impl Iterator<Item = (&'a Key, &'a V)> {
    map.range(subtree_bounds(prefix))
}

/// Iterates the elements of `set` that are equal to or descend from
/// `prefix`.
pub(crate) fn set_range<'a>(prefix: &Key, set: &'a BTreeSet<Key>) -> impl Iterator<Item = &'a Key> {
    set.range(subtree_bounds(prefix))
}

/// Checks whether `set` has any element equal to or below `prefix`.
pub(crate) fn has_keys(prefix: &Key, set: &BTreeSet<Key>) -> bool {
    set_range(prefix, set).next().is_some()
}

/// Serialises a value into its archived byte representation.
pub(crate) fn archive<T>(value: &T) -> Vec<u8>
where
    T: rkyv::Serialize<AllocSerializer<256>>,
{
    let mut ser = AllocSerializer::<256>::default();
    ser.serialize_value(value).unwrap();
    ser.into_serializer().into_inner().to_vec()
}
