use crate::{
    error::InternalError,
    record::Record,
    view::{item::ViewItem, strategy::DirectStrategy},
};
use std::{
    collections::{BTreeSet, HashMap},
    rc::Rc,
};

///
/// UidRegistry
///
/// Memoised projection-unique id strings. The base id comes from the
/// record's identity capability, else the configured id property; string
/// collisions are resolved deterministically by `-1`, `-2`, … suffixes.
///

pub(crate) struct UidRegistry {
    by_instance: HashMap<u64, String>,
    used: BTreeSet<String>,
}

impl UidRegistry {
    pub(crate) fn new() -> Self {
        Self {
            by_instance: HashMap::new(),
            used: BTreeSet::new(),
        }
    }

    pub(crate) fn uid_for<R: Record>(
        &mut self,
        item: &Rc<ViewItem<R>>,
        id_property: Option<&str>,
    ) -> Result<String, InternalError> {
        if let Some(uid) = self.by_instance.get(&item.instance_id()) {
            return Ok(uid.clone());
        }

        let base = match item.record() {
            Some(record) => DirectStrategy::extract_id(id_property, record)
                .map(|id| id.to_string())
                .ok_or_else(|| {
                    InternalError::missing_id_property(
                        "uid extraction needs a record identity or a configured id property",
                    )
                })?,
            // headers key by their group id
            None => item
                .group_id()
                .map(ToString::to_string)
                .unwrap_or_default(),
        };

        let uid = self.claim(base);
        self.by_instance.insert(item.instance_id(), uid.clone());
        Ok(uid)
    }

    /// Drop memoised uids for instances no longer materialised.
    pub(crate) fn retain_instances(&mut self, live: &dyn Fn(u64) -> bool) {
        let dead: Vec<u64> = self
            .by_instance
            .keys()
            .copied()
            .filter(|instance| !live(*instance))
            .collect();
        for instance in dead {
            if let Some(uid) = self.by_instance.remove(&instance) {
                self.used.remove(&uid);
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.by_instance.clear();
        self.used.clear();
    }

    fn claim(&mut self, base: String) -> String {
        if self.used.insert(base.clone()) {
            return base;
        }
        let mut suffix = 1u64;
        loop {
            let candidate = format!("{base}-{suffix}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            suffix += 1;
        }
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        record::ObjectRecord,
        view::item::ItemFactory,
    };

    fn items(ids: &[i64]) -> Vec<Rc<ViewItem<ObjectRecord>>> {
        let factory = ItemFactory::new();
        ids.iter()
            .map(|id| factory.data(Rc::new(ObjectRecord::from_pairs([("id", *id)]))))
            .collect()
    }

    #[test]
    fn uid_is_memoised_per_instance() {
        let mut registry = UidRegistry::new();
        let items = items(&[7]);
        let first = registry.uid_for(&items[0], Some("id")).expect("uid");
        let second = registry.uid_for(&items[0], Some("id")).expect("uid");
        assert_eq!(first, "7");
        assert_eq!(first, second);
    }

    #[test]
    fn collisions_get_deterministic_suffixes() {
        let mut registry = UidRegistry::new();
        let items = items(&[1, 1, 1]);
        let uids: Vec<String> = items
            .iter()
            .map(|item| registry.uid_for(item, Some("id")).expect("uid"))
            .collect();
        assert_eq!(uids, vec!["1", "1-1", "1-2"]);
    }

    #[test]
    fn missing_identity_is_an_error() {
        let mut registry = UidRegistry::new();
        let items = items(&[1]);
        let err = registry.uid_for(&items[0], None).expect_err("no id source");
        assert!(err.message.contains("id property"));
    }

    #[test]
    fn released_uids_become_claimable_again() {
        let mut registry = UidRegistry::new();
        let items = items(&[5, 5]);
        let first = registry.uid_for(&items[0], Some("id")).expect("uid");
        let second = registry.uid_for(&items[1], Some("id")).expect("uid");
        assert_eq!((first.as_str(), second.as_str()), ("5", "5-1"));

        let keep = items[1].instance_id();
        registry.retain_instances(&|instance| instance == keep);

        let factory = ItemFactory::new();
        let fresh = factory.data(Rc::new(ObjectRecord::from_pairs([("id", 5i64)])));
        let reclaimed = registry.uid_for(&fresh, Some("id")).expect("uid");
        assert_eq!(reclaimed, "5");
    }
}
