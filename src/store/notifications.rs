use crate::models::Notification;

/// Notification list plus the server-maintained unread counter.
///
/// The counter is authoritative when pushed (`unread_count` events or the
/// REST endpoint); local read toggles adjust it optimistically and can be
/// reverted when the server call fails.
#[derive(Debug, Clone, Default)]
pub struct NotificationCenter {
    notifications: Vec<Notification>,
    unread_count: u64,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn unread_count(&self) -> u64 {
        self.unread_count
    }

    pub fn replace(&mut self, mut notifications: Vec<Notification>) {
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.notifications = notifications;
    }

    pub fn set_unread_count(&mut self, count: u64) {
        self.unread_count = count;
    }

    /// Adds a pushed notification at the top. Returns `false` for a
    /// duplicate delivery.
    pub fn push(&mut self, notification: Notification) -> bool {
        if self.notifications.iter().any(|n| n.id == notification.id) {
            return false;
        }
        if !notification.is_read {
            self.unread_count += 1;
        }
        self.notifications.insert(0, notification);
        true
    }

    /// Optimistically flags one notification read. Returns `true` if it
    /// changed, which is when the caller should tell the server.
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.notifications.iter_mut().find(|n| n.id == id) {
            Some(n) if !n.is_read => {
                n.is_read = true;
                self.unread_count = self.unread_count.saturating_sub(1);
                true
            }
            _ => false,
        }
    }

    /// Undoes [`mark_read`](Self::mark_read) after the server rejected it.
    pub fn revert_read(&mut self, id: &str) {
        if let Some(n) = self.notifications.iter_mut().find(|n| n.id == id) {
            if n.is_read {
                n.is_read = false;
                self.unread_count += 1;
            }
        }
    }

    /// Flags everything read and returns the ids that changed.
    pub fn mark_all_read(&mut self) -> Vec<String> {
        let changed: Vec<String> = self
            .notifications
            .iter_mut()
            .filter(|n| !n.is_read)
            .map(|n| {
                n.is_read = true;
                n.id.clone()
            })
            .collect();
        self.unread_count = 0;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn notification(id: &str, secs: i64, is_read: bool) -> Notification {
        Notification {
            id: id.to_string(),
            kind: "like".to_string(),
            title: format!("Notification {id}"),
            body: None,
            is_read,
            created_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn push_increments_count_once_per_id() {
        let mut center = NotificationCenter::new();
        center.set_unread_count(2);
        assert!(center.push(notification("n1", 1, false)));
        assert!(!center.push(notification("n1", 1, false)));
        assert_eq!(center.unread_count(), 3);
        assert_eq!(center.list().len(), 1);
    }

    #[test]
    fn optimistic_read_can_be_reverted() {
        let mut center = NotificationCenter::new();
        center.replace(vec![notification("n1", 1, false)]);
        center.set_unread_count(1);

        assert!(center.mark_read("n1"));
        assert!(!center.mark_read("n1"));
        assert_eq!(center.unread_count(), 0);

        center.revert_read("n1");
        assert!(!center.list()[0].is_read);
        assert_eq!(center.unread_count(), 1);
    }

    #[test]
    fn pushed_count_overrides_local_bookkeeping() {
        let mut center = NotificationCenter::new();
        center.push(notification("n1", 1, false));
        center.set_unread_count(7);
        assert_eq!(center.unread_count(), 7);
    }

    #[test]
    fn mark_all_read_reports_changed_ids() {
        let mut center = NotificationCenter::new();
        center.replace(vec![
            notification("old", 1, true),
            notification("new", 5, false),
            notification("mid", 3, false),
        ]);
        center.set_unread_count(2);
        assert_eq!(center.list()[0].id, "new");

        let changed = center.mark_all_read();
        assert_eq!(changed, vec!["new", "mid"]);
        assert_eq!(center.unread_count(), 0);
    }
}
