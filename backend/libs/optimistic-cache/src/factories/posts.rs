//! Post keys

use super::normalized;
use crate::{KeyFactory, KeySet, KeySetBuilder, Record, Shape};

/// Posts are cached in every feed that can show them
pub struct PostKeys;

impl KeyFactory for PostKeys {
    fn entity(&self) -> &'static str {
        "post"
    }

    fn roots(&self) -> &'static [&'static str] {
        &["posts", "post"]
    }

    fn keys(&self, descriptor: &Record) -> KeySet {
        let mut builder = KeySetBuilder::new(self.roots())
            // Format: posts
            .push("all", Shape::List, ["posts"])
            // Format: posts:infinite
            .push("infinite", Shape::Pages, ["posts", "infinite"])
            // Format: post:{id}
            .push_if("single", Shape::Single, descriptor.id(), |id| {
                vec!["post".into(), id]
            })
            // Format: posts:user:{profile_id}
            .push_if("user", Shape::List, descriptor.str_field("profile_id"), |id| {
                vec!["posts".into(), "user".into(), id]
            })
            // Format: posts:group:{group_id}
            .push_if("group", Shape::List, descriptor.str_field("group_id"), |id| {
                vec!["posts".into(), "group".into(), id]
            })
            // Format: posts:infinite:{group_id}
            .push_if("infinite", Shape::Pages, descriptor.str_field("group_id"), |id| {
                vec!["posts".into(), "infinite".into(), id]
            })
            // Format: posts:search:{term}
            .push_if("search", Shape::List, descriptor.str_field("search_term"), |term| {
                vec!["posts".into(), "search".into(), normalized(term)]
            });

        // Format: posts:hashtag:{tag}
        for tag in descriptor.str_list("hashtags") {
            builder = builder.push(
                "hashtag",
                Shape::List,
                ["posts".to_string(), "hashtag".to_string(), normalized(tag)],
            );
        }

        builder.build()
    }
}
