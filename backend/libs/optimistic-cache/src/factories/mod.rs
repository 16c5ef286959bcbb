//! Key factories for every cached entity type
//!
//! Key format: `{root}[:{scope}][:{identifier}]`, roots are disjoint per
//! entity type.

mod ads;
mod groups;
mod hashtags;
mod media_links;
mod notifications;
mod posts;

pub use ads::AdKeys;
pub use groups::GroupKeys;
pub use hashtags::HashtagKeys;
pub use media_links::MediaLinkKeys;
pub use notifications::NotificationKeys;
pub use posts::PostKeys;

use crate::KeyFactory;
use std::sync::Arc;

/// Every shipped factory, for registry bootstrap
pub fn all() -> Vec<Arc<dyn KeyFactory>> {
    vec![
        Arc::new(PostKeys),
        Arc::new(AdKeys),
        Arc::new(MediaLinkKeys),
        Arc::new(NotificationKeys),
        Arc::new(GroupKeys),
        Arc::new(HashtagKeys),
    ]
}

/// Search terms and tags are keyed case-insensitively
fn normalized(term: String) -> String {
    term.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Record;

    #[test]
    fn test_factories_are_pure() {
        let descriptor = Record::new()
            .with("id", "x1")
            .with("profile_id", "u1")
            .with("group_id", "g1")
            .with("search_term", "Jazz");

        for factory in all() {
            assert_eq!(factory.keys(&descriptor), factory.keys(&descriptor));
        }
    }

    #[test]
    fn test_factories_are_total_on_empty_descriptor() {
        for factory in all() {
            let set = factory.keys(&Record::new());
            assert!(set.scope("single").is_empty(), "{}", factory.entity());
        }
    }

    #[test]
    fn test_keys_stay_inside_roots() {
        let descriptor = Record::new()
            .with("id", "x1")
            .with("name", "jazz")
            .with("profile_id", "u1")
            .with("recipient_id", "u1")
            .with("group_id", "g1")
            .with("post_id", "p1")
            .with("category", "gear")
            .with("search_term", "jazz")
            .with("hashtags", vec!["jazz"]);

        for factory in all() {
            for key in factory.keys(&descriptor).keys() {
                let root = key.root().unwrap();
                assert!(
                    factory.roots().iter().any(|r| *r == root),
                    "{} produced foreign key {}",
                    factory.entity(),
                    key
                );
            }
        }
    }

    #[test]
    fn test_confirmed_keys_cover_optimistic_keys() {
        let optimistic = Record::new()
            .with("client_id", "tmp-1")
            .with("profile_id", "u1")
            .with("recipient_id", "u1");
        let confirmed = optimistic
            .clone()
            .with("id", "srv-1")
            .with("name", "jazz")
            .with("group_id", "g1")
            .with("post_id", "p1");

        for factory in all() {
            let before = factory.keys(&optimistic);
            let after = factory.keys(&confirmed);
            assert!(after.is_superset_of(&before), "{}", factory.entity());
        }
    }

    #[test]
    fn test_normalized() {
        assert_eq!(normalized("  Jazz ".to_string()), "jazz");
    }
}
