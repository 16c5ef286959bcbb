//! Ad keys

use super::normalized;
use crate::{KeyFactory, KeySet, KeySetBuilder, Record, Shape};

pub struct AdKeys;

impl KeyFactory for AdKeys {
    fn entity(&self) -> &'static str {
        "ad"
    }

    fn roots(&self) -> &'static [&'static str] {
        &["ads", "ad"]
    }

    fn keys(&self, descriptor: &Record) -> KeySet {
        KeySetBuilder::new(self.roots())
            .push("all", Shape::List, ["ads"])
            .push_if("single", Shape::Single, descriptor.id(), |id| {
                vec!["ad".into(), id]
            })
            .push_if("user", Shape::List, descriptor.str_field("profile_id"), |id| {
                vec!["ads".into(), "user".into(), id]
            })
            .push_if("category", Shape::List, descriptor.str_field("category"), |c| {
                vec!["ads".into(), "category".into(), normalized(c)]
            })
            .push_if("search", Shape::List, descriptor.str_field("search_term"), |term| {
                vec!["ads".into(), "search".into(), normalized(term)]
            })
            .build()
    }
}
