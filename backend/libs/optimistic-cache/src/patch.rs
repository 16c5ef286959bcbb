//! Pure patch functions over cache values
//!
//! Each function returns `Some(new_value)` when the value changes and `None`
//! for a no-op, so callers only write keys that actually moved.

use crate::{ById, CacheValue, IdentityComparator, InsertPolicy, OperationKind, RankOrder, Record, Shape};

pub(crate) fn position<I>(items: &[Record], target: &Record, identity: &I) -> Option<usize>
where
    I: IdentityComparator + ?Sized,
{
    items.iter().position(|item| identity.same(item, target))
}

/// (page, index) of the first match
fn page_position<I>(pages: &[Vec<Record>], target: &Record, identity: &I) -> Option<(usize, usize)>
where
    I: IdentityComparator + ?Sized,
{
    pages
        .iter()
        .enumerate()
        .find_map(|(p, page)| position(page, target, identity).map(|i| (p, i)))
}

/// Insert `record` at the position the policy dictates
pub(crate) fn insert(items: &mut Vec<Record>, record: Record, policy: &InsertPolicy) {
    match policy {
        InsertPolicy::Prepend => items.insert(0, record),
        InsertPolicy::Append => items.push(record),
        InsertPolicy::Ranked { field, order } => match record.number_field(field) {
            Some(rank) => {
                let at = items
                    .iter()
                    .position(|item| match item.number_field(field) {
                        Some(other) => match order {
                            RankOrder::Ascending => other > rank,
                            RankOrder::Descending => other < rank,
                        },
                        // Unranked items sort last
                        None => true,
                    })
                    .unwrap_or(items.len());
                items.insert(at, record);
            }
            None => items.insert(0, record),
        },
    }
}

fn insert_into_pages(pages: &mut Vec<Vec<Record>>, record: Record, policy: &InsertPolicy) {
    match (policy, pages.is_empty()) {
        (_, true) => pages.push(vec![record]),
        (InsertPolicy::Append, false) => {
            if let Some(last) = pages.last_mut() {
                last.push(record);
            }
        }
        (_, false) => insert(&mut pages[0], record, policy),
    }
}

/// Speculative patch for one key
///
/// Updates merge the entity's fields into the matched item instead of
/// replacing it, so fields the patch omits keep their cached values. Adds
/// that find their identity already cached merge the same way.
pub(crate) fn patch_value<I>(
    current: Option<&CacheValue>,
    shape: Shape,
    entity: &Record,
    kind: OperationKind,
    identity: &I,
    policy: &InsertPolicy,
) -> Option<CacheValue>
where
    I: IdentityComparator + ?Sized,
{
    match (kind, current) {
        (OperationKind::Add, None) => Some(CacheValue::singleton(shape, entity.clone())),

        (OperationKind::Add, Some(CacheValue::List(items))) => {
            let mut items = items.clone();
            match position(&items, entity, identity) {
                // Same identity already cached: merge instead of duplicating
                Some(i) => items[i] = items[i].merged_with(entity),
                None => insert(&mut items, entity.clone(), policy),
            }
            Some(CacheValue::List(items))
        }

        (OperationKind::Add, Some(CacheValue::Pages(pages))) => {
            let mut pages = pages.clone();
            match page_position(&pages, entity, identity) {
                Some((p, i)) => pages[p][i] = pages[p][i].merged_with(entity),
                None => insert_into_pages(&mut pages, entity.clone(), policy),
            }
            Some(CacheValue::Pages(pages))
        }

        (OperationKind::Add, Some(CacheValue::Single(existing))) => {
            let record = match existing {
                Some(existing) if identity.same(existing, entity) => existing.merged_with(entity),
                _ => entity.clone(),
            };
            Some(CacheValue::Single(Some(record)))
        }

        (OperationKind::Update, Some(CacheValue::List(items))) => {
            let i = position(items, entity, identity)?;
            let mut items = items.clone();
            items[i] = items[i].merged_with(entity);
            Some(CacheValue::List(items))
        }

        (OperationKind::Update, Some(CacheValue::Pages(pages))) => {
            let (p, i) = page_position(pages, entity, identity)?;
            let mut pages = pages.clone();
            pages[p][i] = pages[p][i].merged_with(entity);
            Some(CacheValue::Pages(pages))
        }

        (OperationKind::Update, Some(CacheValue::Single(Some(existing)))) => {
            Some(CacheValue::Single(Some(existing.merged_with(entity))))
        }

        (OperationKind::Remove, Some(CacheValue::List(items))) => {
            let kept: Vec<Record> = items
                .iter()
                .filter(|item| !identity.same(item, entity))
                .cloned()
                .collect();
            (kept.len() != items.len()).then_some(CacheValue::List(kept))
        }

        (OperationKind::Remove, Some(CacheValue::Pages(pages))) => {
            let before: usize = pages.iter().map(Vec::len).sum();
            let kept: Vec<Vec<Record>> = pages
                .iter()
                .map(|page| {
                    page.iter()
                        .filter(|item| !identity.same(item, entity))
                        .cloned()
                        .collect()
                })
                .collect();
            let after: usize = kept.iter().map(Vec::len).sum();
            (after != before).then_some(CacheValue::Pages(kept))
        }

        (OperationKind::Remove, Some(CacheValue::Single(Some(_)))) => Some(CacheValue::Single(None)),

        // Nothing cached to update or remove
        (OperationKind::Update, None)
        | (OperationKind::Update, Some(CacheValue::Single(None)))
        | (OperationKind::Remove, None)
        | (OperationKind::Remove, Some(CacheValue::Single(None))) => None,
    }
}

/// Swap the record matching `optimistic` for `confirmed`
///
/// Other items already carrying the confirmed identity are dropped so a
/// refetch that raced the mutation does not leave a duplicate.
pub(crate) fn replace_value<I>(
    current: &CacheValue,
    optimistic: &Record,
    confirmed: &Record,
    identity: &I,
) -> Option<CacheValue>
where
    I: IdentityComparator + ?Sized,
{
    let is_duplicate = |item: &Record| ById.same(item, confirmed);

    match current {
        CacheValue::List(items) => {
            let i = position(items, optimistic, identity)?;
            let replaced = items
                .iter()
                .enumerate()
                .filter_map(|(j, item)| match j == i {
                    true => Some(confirmed.clone()),
                    false if is_duplicate(item) => None,
                    false => Some(item.clone()),
                })
                .collect();
            Some(CacheValue::List(replaced))
        }
        CacheValue::Pages(pages) => {
            let (p, i) = page_position(pages, optimistic, identity)?;
            let replaced = pages
                .iter()
                .enumerate()
                .map(|(q, page)| {
                    page.iter()
                        .enumerate()
                        .filter_map(|(j, item)| match (q, j) == (p, i) {
                            true => Some(confirmed.clone()),
                            false if is_duplicate(item) => None,
                            false => Some(item.clone()),
                        })
                        .collect()
                })
                .collect();
            Some(CacheValue::Pages(replaced))
        }
        CacheValue::Single(Some(existing)) if identity.same(existing, optimistic) => {
            Some(CacheValue::Single(Some(confirmed.clone())))
        }
        CacheValue::Single(_) => None,
    }
}

fn revert_items(
    items: &mut Vec<Record>,
    before: Option<(usize, &Record)>,
    entity: &Record,
    kind: OperationKind,
) {
    match (kind, position(items, entity, &ById), before) {
        (OperationKind::Remove, None, Some((i, item))) => {
            let at = i.min(items.len());
            items.insert(at, item.clone());
        }
        (OperationKind::Remove, _, _) => {}
        (_, Some(at), Some((_, item))) => items[at] = item.clone(),
        (OperationKind::Add, Some(at), None) => {
            items.remove(at);
        }
        _ => {}
    }
}

/// Undo one optimistic operation on a value other writes have since changed
///
/// Only the record sharing the entity's `id` moves; everything else in
/// `current` is kept. Returns `None` when there is nothing to undo and
/// `Some(None)` when the key should be removed.
pub(crate) fn revert_value(
    current: Option<&CacheValue>,
    previous: Option<&CacheValue>,
    entity: &Record,
    kind: OperationKind,
) -> Option<Option<CacheValue>> {
    let current = current?;

    let reverted = match current {
        CacheValue::Single(existing) => {
            let ours = existing.as_ref().is_some_and(|r| ById.same(r, entity));
            return match (kind, ours, previous) {
                (OperationKind::Remove, _, Some(CacheValue::Single(Some(before))))
                    if existing.is_none() && ById.same(before, entity) =>
                {
                    Some(Some(CacheValue::Single(Some(before.clone()))))
                }
                (OperationKind::Add | OperationKind::Update, true, previous) => {
                    (previous != Some(current)).then(|| previous.cloned())
                }
                _ => None,
            };
        }
        CacheValue::List(items) => {
            let before = match previous {
                Some(CacheValue::List(prev)) => {
                    position(prev, entity, &ById).map(|i| (i, &prev[i]))
                }
                _ => None,
            };
            let mut items = items.clone();
            revert_items(&mut items, before, entity, kind);
            CacheValue::List(items)
        }
        CacheValue::Pages(pages) => {
            let before = match previous {
                Some(CacheValue::Pages(prev)) => {
                    page_position(prev, entity, &ById).map(|(p, i)| (p, i, &prev[p][i]))
                }
                _ => None,
            };
            let present = page_position(pages, entity, &ById).map(|(p, _)| p);
            let target = match kind {
                OperationKind::Remove if present.is_none() => before.map(|(p, _, _)| p),
                OperationKind::Remove => None,
                _ => present,
            };

            let mut pages = pages.clone();
            if let Some(page) = target.and_then(|p| pages.get_mut(p)) {
                revert_items(page, before.map(|(_, i, item)| (i, item)), entity, kind);
            }
            CacheValue::Pages(pages)
        }
    };

    (reverted != *current).then_some(Some(reverted))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str) -> Record {
        Record::new().with("id", id)
    }

    fn ranked(id: &str, rank: i64) -> Record {
        rec(id).with("rank", rank)
    }

    fn ids(value: &CacheValue) -> Vec<String> {
        value.records().iter().filter_map(|r| r.id()).collect()
    }

    #[test]
    fn test_insert_ranked_ascending() {
        let mut items = vec![ranked("a", 1), ranked("c", 3), rec("z")];
        let policy = InsertPolicy::Ranked {
            field: "rank".into(),
            order: RankOrder::Ascending,
        };
        insert(&mut items, ranked("b", 2), &policy);
        let order: Vec<_> = items.iter().filter_map(|r| r.id()).collect();
        assert_eq!(order, vec!["a", "b", "c", "z"]);
    }

    #[test]
    fn test_insert_ranked_descending_at_end() {
        let mut items = vec![ranked("a", 9), ranked("b", 5)];
        let policy = InsertPolicy::Ranked {
            field: "rank".into(),
            order: RankOrder::Descending,
        };
        insert(&mut items, ranked("c", 1), &policy);
        assert_eq!(items[2].id(), Some("c".to_string()));
    }

    #[test]
    fn test_add_into_pages_prepends_first_page() {
        let pages = CacheValue::Pages(vec![vec![rec("b")], vec![rec("c")]]);
        let patched = patch_value(
            Some(&pages),
            Shape::Pages,
            &rec("a"),
            OperationKind::Add,
            &ById,
            &InsertPolicy::Prepend,
        )
        .unwrap();
        assert_eq!(
            patched,
            CacheValue::Pages(vec![vec![rec("a"), rec("b")], vec![rec("c")]])
        );
    }

    #[test]
    fn test_add_absent_uses_declared_shape() {
        let patched = patch_value(
            None,
            Shape::Single,
            &rec("a"),
            OperationKind::Add,
            &ById,
            &InsertPolicy::Prepend,
        );
        assert_eq!(patched, Some(CacheValue::Single(Some(rec("a")))));
    }

    #[test]
    fn test_update_missing_item_is_noop() {
        let list = CacheValue::List(vec![rec("a")]);
        let patched = patch_value(
            Some(&list),
            Shape::List,
            &rec("b"),
            OperationKind::Update,
            &ById,
            &InsertPolicy::Prepend,
        );
        assert!(patched.is_none());
    }

    #[test]
    fn test_remove_across_pages() {
        let pages = CacheValue::Pages(vec![vec![rec("a"), rec("b")], vec![rec("b")]]);
        let patched = patch_value(
            Some(&pages),
            Shape::Pages,
            &rec("b"),
            OperationKind::Remove,
            &ById,
            &InsertPolicy::Prepend,
        )
        .unwrap();
        assert_eq!(ids(&patched), vec!["a"]);
    }

    #[test]
    fn test_remove_single_clears() {
        let single = CacheValue::Single(Some(rec("a")));
        let patched = patch_value(
            Some(&single),
            Shape::Single,
            &rec("a"),
            OperationKind::Remove,
            &ById,
            &InsertPolicy::Prepend,
        );
        assert_eq!(patched, Some(CacheValue::Single(None)));
    }

    #[test]
    fn test_replace_drops_raced_duplicate() {
        let optimistic = rec("tmp-1");
        let confirmed = rec("srv-1");
        let list = CacheValue::List(vec![rec("srv-1"), rec("tmp-1"), rec("x")]);

        let replaced = replace_value(&list, &optimistic, &confirmed, &ById).unwrap();
        assert_eq!(ids(&replaced), vec!["srv-1", "x"]);
    }

    #[test]
    fn test_update_merges_into_matched_item() {
        let list = CacheValue::List(vec![rec("a").with("title", "old").with("likes", 3)]);
        let patched = patch_value(
            Some(&list),
            Shape::List,
            &rec("a").with("title", "new"),
            OperationKind::Update,
            &ById,
            &InsertPolicy::Prepend,
        )
        .unwrap();
        assert_eq!(
            patched,
            CacheValue::List(vec![rec("a").with("title", "new").with("likes", 3)])
        );
    }

    #[test]
    fn test_revert_add_keeps_later_items() {
        let previous = CacheValue::List(vec![rec("p0")]);
        let current = CacheValue::List(vec![rec("p2"), rec("p1"), rec("p0")]);

        let reverted = revert_value(Some(&current), Some(&previous), &rec("p1"), OperationKind::Add);
        assert_eq!(
            reverted,
            Some(Some(CacheValue::List(vec![rec("p2"), rec("p0")])))
        );
    }

    #[test]
    fn test_revert_update_restores_previous_item_only() {
        let previous = CacheValue::List(vec![rec("a").with("title", "old"), rec("b")]);
        let current = CacheValue::List(vec![rec("c"), rec("a").with("title", "new"), rec("b")]);

        let reverted =
            revert_value(Some(&current), Some(&previous), &rec("a"), OperationKind::Update);
        assert_eq!(
            reverted,
            Some(Some(CacheValue::List(vec![
                rec("c"),
                rec("a").with("title", "old"),
                rec("b")
            ])))
        );
    }

    #[test]
    fn test_revert_remove_reinserts_at_old_page_slot() {
        let previous = CacheValue::Pages(vec![vec![rec("a"), rec("b")], vec![rec("c")]]);
        let current = CacheValue::Pages(vec![vec![rec("x"), rec("a")], vec![rec("c")]]);

        let reverted = revert_value(Some(&current), Some(&previous), &rec("b"), OperationKind::Remove)
            .unwrap()
            .unwrap();
        assert_eq!(
            reverted,
            CacheValue::Pages(vec![vec![rec("x"), rec("b"), rec("a")], vec![rec("c")]])
        );
    }

    #[test]
    fn test_revert_is_noop_once_undone() {
        let previous = CacheValue::List(vec![rec("p0")]);
        assert_eq!(
            revert_value(Some(&previous), Some(&previous), &rec("p1"), OperationKind::Add),
            None
        );
        assert_eq!(revert_value(None, Some(&previous), &rec("p0"), OperationKind::Remove), None);
    }

    #[test]
    fn test_revert_single_restores_absent_slot() {
        let current = CacheValue::Single(Some(rec("a").with("title", "later")));
        assert_eq!(
            revert_value(Some(&current), None, &rec("a"), OperationKind::Add),
            Some(None)
        );

        let other = CacheValue::Single(Some(rec("z")));
        assert_eq!(revert_value(Some(&other), None, &rec("a"), OperationKind::Add), None);
    }

    #[test]
    fn test_replace_single_requires_match() {
        let single = CacheValue::Single(Some(rec("other")));
        assert!(replace_value(&single, &rec("a"), &rec("a"), &ById).is_none());
    }
}
