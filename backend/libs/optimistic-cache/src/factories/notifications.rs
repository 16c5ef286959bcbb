//! Notification keys
//!
//! Notifications are only cached per recipient; there is no global list.

use crate::{KeyFactory, KeySet, KeySetBuilder, Record, Shape};

pub struct NotificationKeys;

impl KeyFactory for NotificationKeys {
    fn entity(&self) -> &'static str {
        "notification"
    }

    fn roots(&self) -> &'static [&'static str] {
        &["notifications", "notification"]
    }

    fn keys(&self, descriptor: &Record) -> KeySet {
        let recipient = descriptor.str_field("recipient_id");

        KeySetBuilder::new(self.roots())
            .push_if("single", Shape::Single, descriptor.id(), |id| {
                vec!["notification".into(), id]
            })
            .push_if("user", Shape::List, recipient.clone(), |id| {
                vec!["notifications".into(), "user".into(), id]
            })
            .push_if("unread", Shape::List, recipient.clone(), |id| {
                vec!["notifications".into(), "unread".into(), id]
            })
            .push_if("infinite", Shape::Pages, recipient, |id| {
                vec!["notifications".into(), "infinite".into(), id]
            })
            .build()
    }
}
