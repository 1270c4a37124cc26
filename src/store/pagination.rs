use crate::models::MessagePage;

/// One backward history fetch to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub conversation_id: String,
    /// `None` asks for the newest page.
    pub cursor: Option<String>,
    pub limit: u32,
}

/// Tracks the server-issued cursor for loading older history.
///
/// `has_more` is only ever taken from the server's explicit flag, never
/// inferred from how many messages a page held.
#[derive(Debug, Clone)]
pub struct CursorController {
    conversation_id: String,
    limit: u32,
    has_more: bool,
    next_cursor: Option<String>,
    in_flight: bool,
    loaded_first_page: bool,
}

impl CursorController {
    pub fn new(conversation_id: impl Into<String>, limit: u32) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            limit,
            has_more: false,
            next_cursor: None,
            in_flight: false,
            loaded_first_page: false,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn next_cursor(&self) -> Option<&str> {
        self.next_cursor.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight
    }

    /// Request for the newest page; always allowed unless a fetch is running.
    pub fn first_request(&mut self) -> Option<PageRequest> {
        if self.in_flight {
            return None;
        }
        self.in_flight = true;
        Some(PageRequest {
            conversation_id: self.conversation_id.clone(),
            cursor: None,
            limit: self.limit,
        })
    }

    /// Request for the next older page, if the server said there is one and
    /// nothing else is in flight.
    pub fn next_request(&mut self) -> Option<PageRequest> {
        if self.in_flight || !self.loaded_first_page || !self.has_more {
            return None;
        }
        let cursor = self.next_cursor.clone()?;
        self.in_flight = true;
        Some(PageRequest {
            conversation_id: self.conversation_id.clone(),
            cursor: Some(cursor),
            limit: self.limit,
        })
    }

    /// Records the pagination state carried by a successfully fetched page.
    pub fn complete(&mut self, page: &MessagePage) {
        self.in_flight = false;
        self.loaded_first_page = true;
        self.has_more = page.has_more;
        self.next_cursor = page.next_cursor.clone();
    }

    /// Releases the in-flight slot after a failed fetch; the cursor is kept so
    /// the same page can be requested again.
    pub fn fail(&mut self) {
        self.in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(has_more: bool, cursor: Option<&str>) -> MessagePage {
        MessagePage {
            messages: Vec::new(),
            has_more,
            next_cursor: cursor.map(str::to_string),
        }
    }

    #[test]
    fn empty_first_page_means_no_more_history() {
        let mut cursor = CursorController::new("C1", 50);
        cursor.first_request().unwrap();
        cursor.complete(&MessagePage::empty());
        assert!(!cursor.has_more());
        assert_eq!(cursor.next_request(), None);
    }

    #[test]
    fn next_request_uses_server_cursor() {
        let mut cursor = CursorController::new("C1", 10);
        let first = cursor.first_request().unwrap();
        assert_eq!(first.cursor, None);
        cursor.complete(&page(true, Some("9")));

        let next = cursor.next_request().unwrap();
        assert_eq!(next.cursor.as_deref(), Some("9"));
        assert_eq!(next.limit, 10);
    }

    #[test]
    fn only_one_request_in_flight() {
        let mut cursor = CursorController::new("C1", 10);
        cursor.first_request().unwrap();
        assert!(cursor.first_request().is_none());
        cursor.complete(&page(true, Some("9")));

        assert!(cursor.next_request().is_some());
        assert!(cursor.next_request().is_none());
        cursor.fail();
        assert_eq!(cursor.next_request().unwrap().cursor.as_deref(), Some("9"));
    }

    #[test]
    fn short_page_with_has_more_still_paginates() {
        let mut cursor = CursorController::new("C1", 50);
        cursor.first_request().unwrap();
        // Three messages in a page of fifty, but the server says there is more.
        cursor.complete(&page(true, Some("abc")));
        assert!(cursor.next_request().is_some());
    }

    #[test]
    fn has_more_without_cursor_does_not_request() {
        let mut cursor = CursorController::new("C1", 50);
        cursor.first_request().unwrap();
        cursor.complete(&page(true, None));
        assert!(cursor.next_request().is_none());
    }
}
