//! Profile group keys

use super::normalized;
use crate::{KeyFactory, KeySet, KeySetBuilder, Record, Shape};

pub struct GroupKeys;

impl KeyFactory for GroupKeys {
    fn entity(&self) -> &'static str {
        "group"
    }

    fn roots(&self) -> &'static [&'static str] {
        &["groups", "group"]
    }

    fn keys(&self, descriptor: &Record) -> KeySet {
        let mut builder = KeySetBuilder::new(self.roots())
            .push("all", Shape::List, ["groups"])
            .push_if("single", Shape::Single, descriptor.id(), |id| {
                vec!["group".into(), id]
            })
            // Groups owned by the profile
            .push_if("user", Shape::List, descriptor.str_field("profile_id"), |id| {
                vec!["groups".into(), "user".into(), id]
            })
            .push_if("search", Shape::List, descriptor.str_field("search_term"), |term| {
                vec!["groups".into(), "search".into(), normalized(term)]
            });

        // Every member sees the group in their own list
        for member in descriptor.str_list("member_ids") {
            builder = builder.push(
                "user",
                Shape::List,
                ["groups".to_string(), "user".to_string(), member],
            );
        }

        builder.build()
    }
}
