//! Hashtag keys
//!
//! Hashtags are keyed by normalized name; the global list is ordered by
//! popularity.

use super::normalized;
use crate::{
    default_insert_policy, CacheKey, InsertPolicy, KeyFactory, KeySet, KeySetBuilder, RankOrder,
    Record, Shape,
};

const POPULARITY_FIELD: &str = "post_count";

pub struct HashtagKeys;

impl KeyFactory for HashtagKeys {
    fn entity(&self) -> &'static str {
        "hashtag"
    }

    fn roots(&self) -> &'static [&'static str] {
        &["hashtags", "hashtag"]
    }

    fn keys(&self, descriptor: &Record) -> KeySet {
        KeySetBuilder::new(self.roots())
            .push("all", Shape::List, ["hashtags"])
            .push_if("single", Shape::Single, descriptor.str_field("name"), |name| {
                vec!["hashtag".into(), normalized(name)]
            })
            .push_if("post", Shape::List, descriptor.str_field("post_id"), |id| {
                vec!["hashtags".into(), "post".into(), id]
            })
            .push_if("search", Shape::List, descriptor.str_field("search_term"), |term| {
                vec!["hashtags".into(), "search".into(), normalized(term)]
            })
            .build()
    }

    fn insert_policy(&self, key: &CacheKey, entity: &Record, rank_field: &str) -> InsertPolicy {
        let is_global = key.segments().len() == 1;
        if is_global && entity.number_field(POPULARITY_FIELD).is_some() {
            return InsertPolicy::Ranked {
                field: POPULARITY_FIELD.to_string(),
                order: RankOrder::Descending,
            };
        }
        default_insert_policy(entity, rank_field)
    }
}
