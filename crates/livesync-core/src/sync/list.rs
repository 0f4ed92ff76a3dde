//! List-sync: bring every live view up to date after one mutation

use tracing::{debug, warn};

use crate::algebra::{Algebra, QuerySet};
use crate::error::{AlgebraError, SyncError, SyncResult, ViewFailure};
use crate::instance::{Instance, Props};
use crate::views::{ListView, ViewDiff, ViewRegistry};

/// Kind of lifecycle event being synchronized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Create,
    Update,
    Destroy,
}

/// Re-evaluate every registered view against `instance`
///
/// Views are processed independently: a view whose query cannot be
/// evaluated is skipped and reported, and the remaining views are still
/// updated. Each changed view produces exactly one notification.
pub(crate) fn sync_lists(
    registry: &ViewRegistry,
    algebra: &dyn Algebra,
    instance: &Instance,
    mutation: Mutation,
) -> SyncResult<()> {
    let props = instance.props();
    let mut failures = Vec::new();

    for view in registry.snapshot() {
        let outcome = match mutation {
            Mutation::Destroy => Ok(remove_from(&view, instance)),
            Mutation::Create | Mutation::Update => {
                sync_member(algebra, &view, instance, &props, mutation)
            }
        };

        match outcome {
            Ok(Some(diff)) => {
                debug!("View {} {:?} after {:?}", view.key(), diff, mutation);
                registry.notify(&view, diff);
            }
            Ok(None) => {}
            Err(error) => {
                warn!("Skipping view {}: {}", view.key(), error);
                failures.push(ViewFailure {
                    key: view.key().to_string(),
                    error,
                });
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(SyncError::ListSync { failures })
    }
}

fn remove_from(view: &ListView, instance: &Instance) -> Option<ViewDiff> {
    let index = view.position(instance)?;
    view.remove(index).map(|_| ViewDiff::Removed { index })
}

fn sync_member(
    algebra: &dyn Algebra,
    view: &ListView,
    instance: &Instance,
    props: &Props,
    mutation: Mutation,
) -> Result<Option<ViewDiff>, AlgebraError> {
    let member = algebra.belongs_to(view.query(), props)?;
    let current = view.position(instance);

    match (member, current) {
        (true, None) => {
            let items = view.serialize();
            let index = algebra
                .locate(view.query(), &items, props)?
                .unwrap_or(items.len());
            view.insert(index, instance.clone());
            Ok(Some(ViewDiff::Inserted { index }))
        }
        // Already present: a create does not refresh position.
        (true, Some(_)) if mutation == Mutation::Create => Ok(None),
        (true, Some(from)) => {
            let mut items = view.serialize();
            items.remove(from);
            let Some(to) = algebra.locate(view.query(), &items, props)? else {
                return Ok(None);
            };
            if to == from || ties_in_place(algebra, view.query(), &items, from, to, props)? {
                return Ok(None);
            }
            view.relocate(from, to);
            Ok(Some(ViewDiff::Moved { from, to }))
        }
        (false, Some(index)) => Ok(view.remove(index).map(|_| ViewDiff::Removed { index })),
        (false, None) => Ok(None),
    }
}

/// Whether `props` can stay at `from` inside a group of equal sort keys
///
/// `items` is the view without the updated item and `to` the insertion
/// index after equal keys. Everything in `items[from..to]` sorts no later
/// than `props`, so the current slot is still ordered when its successor
/// does not sort earlier either.
fn ties_in_place(
    algebra: &dyn Algebra,
    query: &QuerySet,
    items: &[Props],
    from: usize,
    to: usize,
    props: &Props,
) -> Result<bool, AlgebraError> {
    if to < from {
        return Ok(false);
    }
    let next = &items[from];
    Ok(algebra.locate(query, std::slice::from_ref(props), next)? == Some(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::DefaultAlgebra;
    use crate::instance::RecordId;
    use crate::store::IdentityStore;
    use serde_json::{json, Value};

    fn props(value: Value) -> Props {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn ids(view: &ListView) -> Vec<i64> {
        view.ids()
            .into_iter()
            .map(|id| match id {
                Some(RecordId::Int(n)) => n,
                other => panic!("unexpected id {other:?}"),
            })
            .collect()
    }

    struct Fixture {
        store: IdentityStore,
        registry: ViewRegistry,
        algebra: DefaultAlgebra,
        events: tokio::sync::mpsc::UnboundedReceiver<crate::views::ViewChange>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = ViewRegistry::new();
            let events = registry.take_events().unwrap();
            Self {
                store: IdentityStore::default(),
                registry,
                algebra: DefaultAlgebra::default(),
                events,
            }
        }

        fn view(&self, query: QuerySet, records: &[Value]) -> ListView {
            let items = records
                .iter()
                .map(|r| self.store.hydrate(props(r.clone())))
                .collect();
            self.registry.install(query, items)
        }

        fn sync(&self, instance: &Instance, mutation: Mutation) -> SyncResult<()> {
            sync_lists(&self.registry, &self.algebra, instance, mutation)
        }

        fn drain(&mut self) -> Vec<ViewDiff> {
            let mut diffs = Vec::new();
            while let Ok(change) = self.events.try_recv() {
                diffs.push(change.diff);
            }
            diffs
        }
    }

    #[test]
    fn test_create_appends_to_unsorted_view() {
        let mut fx = Fixture::new();
        let view = fx.view(
            QuerySet::new().with("color", "red"),
            &[json!({"id": 1, "color": "red"})],
        );

        let created = fx.store.hydrate(props(json!({"id": 2, "color": "red"})));
        fx.sync(&created, Mutation::Create).unwrap();

        assert_eq!(ids(&view), vec![1, 2]);
        assert_eq!(fx.drain(), vec![ViewDiff::Inserted { index: 1 }]);
    }

    #[test]
    fn test_create_inserts_in_sort_order() {
        let mut fx = Fixture::new();
        let view = fx.view(
            QuerySet::new().with("sort", "name"),
            &[json!({"id": 1, "name": "a"}), json!({"id": 3, "name": "c"})],
        );

        let created = fx.store.hydrate(props(json!({"id": 2, "name": "b"})));
        fx.sync(&created, Mutation::Create).unwrap();

        assert_eq!(ids(&view), vec![1, 2, 3]);
        assert_eq!(fx.drain(), vec![ViewDiff::Inserted { index: 1 }]);
    }

    #[test]
    fn test_create_for_non_member_is_ignored() {
        let mut fx = Fixture::new();
        let view = fx.view(QuerySet::new().with("color", "red"), &[]);

        let created = fx.store.hydrate(props(json!({"id": 2, "color": "blue"})));
        fx.sync(&created, Mutation::Create).unwrap();

        assert!(view.is_empty());
        assert!(fx.drain().is_empty());
    }

    #[test]
    fn test_create_for_present_member_is_noop() {
        let mut fx = Fixture::new();
        let view = fx.view(
            QuerySet::new().with("sort", "name"),
            &[json!({"id": 1, "name": "a"}), json!({"id": 2, "name": "b"})],
        );

        // Moves out of order, but a create never relocates
        let existing = fx.store.get(&RecordId::Int(1)).unwrap();
        existing.set("name", "z");
        fx.sync(&existing, Mutation::Create).unwrap();

        assert_eq!(ids(&view), vec![1, 2]);
        assert!(fx.drain().is_empty());
    }

    #[test]
    fn test_update_removes_lost_member() {
        let mut fx = Fixture::new();
        let view = fx.view(
            QuerySet::new().with("color", "red"),
            &[
                json!({"id": 1, "color": "red"}),
                json!({"id": 2, "color": "red"}),
            ],
        );

        let b = fx.store.get(&RecordId::Int(2)).unwrap();
        b.set("color", "green");
        fx.sync(&b, Mutation::Update).unwrap();

        assert_eq!(ids(&view), vec![1]);
        assert_eq!(fx.drain(), vec![ViewDiff::Removed { index: 1 }]);
    }

    #[test]
    fn test_update_adds_new_member() {
        let mut fx = Fixture::new();
        let view = fx.view(QuerySet::new().with("color", "red"), &[]);

        let c = fx.store.hydrate(props(json!({"id": 3, "color": "blue"})));
        c.set("color", "red");
        fx.sync(&c, Mutation::Update).unwrap();

        assert_eq!(ids(&view), vec![3]);
        assert_eq!(fx.drain(), vec![ViewDiff::Inserted { index: 0 }]);
    }

    #[test]
    fn test_update_relocates_once() {
        let mut fx = Fixture::new();
        let view = fx.view(
            QuerySet::new().with("sort", "rank"),
            &[
                json!({"id": 1, "rank": 1}),
                json!({"id": 2, "rank": 2}),
                json!({"id": 3, "rank": 3}),
                json!({"id": 4, "rank": 4}),
            ],
        );

        let first = fx.store.get(&RecordId::Int(1)).unwrap();
        first.set("rank", 3.5);
        fx.sync(&first, Mutation::Update).unwrap();
        assert_eq!(ids(&view), vec![2, 3, 1, 4]);

        let last = fx.store.get(&RecordId::Int(4)).unwrap();
        last.set("rank", 0);
        fx.sync(&last, Mutation::Update).unwrap();
        assert_eq!(ids(&view), vec![4, 2, 3, 1]);

        assert_eq!(
            fx.drain(),
            vec![
                ViewDiff::Moved { from: 0, to: 2 },
                ViewDiff::Moved { from: 3, to: 0 }
            ]
        );
    }

    #[test]
    fn test_update_in_place_is_noop() {
        let mut fx = Fixture::new();
        let view = fx.view(
            QuerySet::new().with("sort", "rank"),
            &[json!({"id": 1, "rank": 1}), json!({"id": 2, "rank": 5})],
        );

        let first = fx.store.get(&RecordId::Int(1)).unwrap();
        first.set("rank", 2);
        fx.sync(&first, Mutation::Update).unwrap();

        assert_eq!(ids(&view), vec![1, 2]);
        assert!(fx.drain().is_empty());
    }

    #[test]
    fn test_update_inside_tie_group_is_noop() {
        let mut fx = Fixture::new();
        let view = fx.view(
            QuerySet::new().with("sort", "rank"),
            &[
                json!({"id": 1, "rank": 1, "title": "a"}),
                json!({"id": 2, "rank": 1, "title": "b"}),
                json!({"id": 3, "rank": 2, "title": "c"}),
            ],
        );

        let first = fx.store.get(&RecordId::Int(1)).unwrap();
        first.set("title", "renamed");
        fx.sync(&first, Mutation::Update).unwrap();

        let middle = fx.store.get(&RecordId::Int(2)).unwrap();
        middle.set("rank", 2);
        fx.sync(&middle, Mutation::Update).unwrap();

        assert_eq!(ids(&view), vec![1, 2, 3]);
        assert!(fx.drain().is_empty());
    }

    #[test]
    fn test_update_out_of_tie_group_moves() {
        let mut fx = Fixture::new();
        let view = fx.view(
            QuerySet::new().with("sort", "rank DESC"),
            &[
                json!({"id": 1, "rank": 5}),
                json!({"id": 2, "rank": 5}),
                json!({"id": 3, "rank": 4}),
            ],
        );

        let last = fx.store.get(&RecordId::Int(3)).unwrap();
        last.set("rank", 5);
        fx.sync(&last, Mutation::Update).unwrap();
        assert_eq!(ids(&view), vec![1, 2, 3]);

        let first = fx.store.get(&RecordId::Int(1)).unwrap();
        first.set("rank", 1);
        fx.sync(&first, Mutation::Update).unwrap();
        assert_eq!(ids(&view), vec![2, 3, 1]);

        assert_eq!(fx.drain(), vec![ViewDiff::Moved { from: 0, to: 2 }]);
    }

    #[test]
    fn test_update_without_order_keeps_position() {
        let mut fx = Fixture::new();
        let view = fx.view(
            QuerySet::new(),
            &[json!({"id": 1, "n": 1}), json!({"id": 2, "n": 2})],
        );

        let first = fx.store.get(&RecordId::Int(1)).unwrap();
        first.set("n", 10);
        fx.sync(&first, Mutation::Update).unwrap();

        assert_eq!(ids(&view), vec![1, 2]);
        assert!(fx.drain().is_empty());
    }

    #[test]
    fn test_destroy_removes_everywhere() {
        let mut fx = Fixture::new();
        let red = fx.view(
            QuerySet::new().with("color", "red"),
            &[json!({"id": 1, "color": "red"}), json!({"id": 2, "color": "red"})],
        );
        let all = fx.view(
            QuerySet::new(),
            &[json!({"id": 2, "color": "red"}), json!({"id": 3})],
        );
        let other = fx.view(QuerySet::new().with("color", "blue"), &[]);

        let victim = fx.store.get(&RecordId::Int(2)).unwrap();
        fx.sync(&victim, Mutation::Destroy).unwrap();

        assert_eq!(ids(&red), vec![1]);
        assert_eq!(ids(&all), vec![3]);
        assert!(other.is_empty());
        // One per affected view, none for the untouched one
        assert_eq!(fx.drain().len(), 2);
    }

    #[test]
    fn test_failing_view_does_not_block_others() {
        let mut fx = Fixture::new();
        let broken = fx.view(QuerySet::new().with("sort", "name sideways"), &[]);
        let healthy = fx.view(QuerySet::new().with("color", "red"), &[]);

        let created = fx.store.hydrate(props(json!({"id": 5, "color": "red"})));
        let err = fx.sync(&created, Mutation::Create).unwrap_err();

        assert_eq!(err.failed_views(), vec![broken.key().as_str()]);
        assert_eq!(ids(&healthy), vec![5]);
        assert!(broken.is_empty());
        assert_eq!(fx.drain(), vec![ViewDiff::Inserted { index: 0 }]);
    }
}
