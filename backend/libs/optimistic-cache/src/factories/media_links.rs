//! Media link keys

use crate::{
    default_insert_policy, CacheKey, InsertPolicy, KeyFactory, KeySet, KeySetBuilder, Record,
    Shape,
};

/// Profile and group media links, shown in creation order
pub struct MediaLinkKeys;

impl KeyFactory for MediaLinkKeys {
    fn entity(&self) -> &'static str {
        "media_link"
    }

    fn roots(&self) -> &'static [&'static str] {
        &["media-links", "media-link"]
    }

    fn keys(&self, descriptor: &Record) -> KeySet {
        KeySetBuilder::new(self.roots())
            .push("all", Shape::List, ["media-links"])
            .push_if("single", Shape::Single, descriptor.id(), |id| {
                vec!["media-link".into(), id]
            })
            .push_if("user", Shape::List, descriptor.str_field("profile_id"), |id| {
                vec!["media-links".into(), "user".into(), id]
            })
            .push_if("group", Shape::List, descriptor.str_field("group_id"), |id| {
                vec!["media-links".into(), "group".into(), id]
            })
            .build()
    }

    fn insert_policy(&self, _key: &CacheKey, entity: &Record, rank_field: &str) -> InsertPolicy {
        match default_insert_policy(entity, rank_field) {
            InsertPolicy::Prepend => InsertPolicy::Append,
            ranked => ranked,
        }
    }

    /// Owner lists are in creation order, so a confirmed link belongs at the tail
    fn append_on_reconcile(&self, key: &CacheKey, _confirmed: &Record) -> bool {
        matches!(
            key.segments().get(1).map(String::as_str),
            Some("user") | Some("group")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_links_append() {
        let link = Record::new().with("id", "m1");
        let key = CacheKey::new(["media-links"]);
        assert_eq!(
            MediaLinkKeys.insert_policy(&key, &link, "rank"),
            InsertPolicy::Append
        );

        let ranked = link.with("rank", 2);
        assert!(matches!(
            MediaLinkKeys.insert_policy(&key, &ranked, "rank"),
            InsertPolicy::Ranked { .. }
        ));
    }

    #[test]
    fn test_append_on_reconcile_owner_lists_only() {
        let link = Record::new().with("id", "m1");
        assert!(MediaLinkKeys.append_on_reconcile(&CacheKey::new(["media-links", "group", "g1"]), &link));
        assert!(!MediaLinkKeys.append_on_reconcile(&CacheKey::new(["media-links"]), &link));
    }

    #[test]
    fn test_group_scope() {
        let set = MediaLinkKeys.keys(&Record::new().with("group_id", "g1"));
        assert!(set.contains(&CacheKey::new(["media-links", "group", "g1"])));
        assert_eq!(set.len(), 2);
    }
}
