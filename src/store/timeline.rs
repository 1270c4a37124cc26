//! Per-conversation ordered message log.
//!
//! Merges three sources: history pages at the head, live pushes at the tail
//! and local optimistic sends. Entries are unique by final id and ordered by
//! `created_at` ascending, ties broken by arrival.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::errors::SyncError;
use crate::models::{Author, Message, MessagePage, MessageType, OutgoingMessage, TempId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelinePhase {
    Empty,
    Loading,
    Ready,
    LoadingOlder,
}

impl std::fmt::Display for TimelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TimelinePhase::Empty => "empty",
            TimelinePhase::Loading => "loading",
            TimelinePhase::Ready => "ready",
            TimelinePhase::LoadingOlder => "loading older",
        })
    }
}

/// Identity of a timeline entry across the optimistic send lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageIdentity {
    /// Sent locally, awaiting the server's canonical copy.
    Pending { temp_id: TempId },
    /// The send was reported as failed; kept so the UI can offer a retry.
    Failed { temp_id: TempId },
    Confirmed { id: String },
}

impl MessageIdentity {
    pub fn confirmed_id(&self) -> Option<&str> {
        match self {
            MessageIdentity::Confirmed { id } => Some(id),
            _ => None,
        }
    }

    pub fn temp_id(&self) -> Option<&TempId> {
        match self {
            MessageIdentity::Pending { temp_id } | MessageIdentity::Failed { temp_id } => Some(temp_id),
            MessageIdentity::Confirmed { .. } => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, MessageIdentity::Pending { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, MessageIdentity::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub identity: MessageIdentity,
    pub sender_id: String,
    pub sender: Option<Author>,
    pub content: Option<String>,
    pub message_type: MessageType,
    pub media_url: Option<String>,
    pub reply_to_id: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for TimelineEntry {
    fn from(m: Message) -> Self {
        Self {
            identity: MessageIdentity::Confirmed { id: m.id },
            sender_id: m.sender_id,
            sender: m.sender,
            content: m.content,
            message_type: m.message_type,
            media_url: m.media_url,
            reply_to_id: m.reply_to_id,
            is_deleted: m.is_deleted,
            created_at: m.created_at,
        }
    }
}

/// What [`TimelineStore::append_live`] did with a pushed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// The push was the echo of a local send and replaced it in place.
    Reconciled(TempId),
    Duplicate,
}

/// What [`TimelineStore::reconcile_sent`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Replaced,
    /// The confirmed id had already arrived; the temporary entry was dropped.
    Merged,
}

#[derive(Debug, Clone)]
pub struct TimelineStore {
    conversation_id: String,
    phase: TimelinePhase,
    entries: Vec<TimelineEntry>,
    confirmed: HashSet<String>,
}

impl TimelineStore {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            phase: TimelinePhase::Empty,
            entries: Vec::new(),
            confirmed: HashSet::new(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn phase(&self) -> TimelinePhase {
        self.phase
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.confirmed.contains(message_id)
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.identity.is_pending()).count()
    }

    pub fn entry(&self, temp_id: &TempId) -> Option<&TimelineEntry> {
        self.position_of_temp(temp_id).map(|i| &self.entries[i])
    }

    fn invalid_phase(&self, operation: &'static str) -> SyncError {
        SyncError::InvalidPhase {
            conversation_id: self.conversation_id.clone(),
            operation,
            phase: self.phase.to_string(),
        }
    }

    pub fn begin_loading(&mut self) -> Result<(), SyncError> {
        match self.phase {
            TimelinePhase::Empty | TimelinePhase::Loading => {
                self.phase = TimelinePhase::Loading;
                Ok(())
            }
            _ => Err(self.invalid_phase("start loading")),
        }
    }

    /// Replaces the timeline with the newest page (newest first).
    pub fn seed(&mut self, page: Vec<Message>) -> Result<(), SyncError> {
        if !matches!(self.phase, TimelinePhase::Empty | TimelinePhase::Loading) {
            return Err(self.invalid_phase("seed"));
        }
        self.entries.clear();
        self.confirmed.clear();
        for message in page.into_iter().rev() {
            if self.confirmed.insert(message.id.clone()) {
                self.entries.push(message.into());
            }
        }
        // Stable: equal timestamps keep page order.
        self.entries.sort_by_key(|e| e.created_at);
        self.phase = TimelinePhase::Ready;
        debug!(conversation_id = %self.conversation_id, count = self.entries.len(), "Timeline seeded");
        Ok(())
    }

    pub fn seed_page(&mut self, page: MessagePage) -> Result<(), SyncError> {
        self.seed(page.messages)
    }

    pub fn begin_loading_older(&mut self) -> Result<(), SyncError> {
        match self.phase {
            TimelinePhase::Ready => {
                self.phase = TimelinePhase::LoadingOlder;
                Ok(())
            }
            _ => Err(self.invalid_phase("load older history")),
        }
    }

    /// Returns to `Ready` after a failed older-page load.
    pub fn abort_loading_older(&mut self) {
        if self.phase == TimelinePhase::LoadingOlder {
            self.phase = TimelinePhase::Ready;
        }
    }

    /// Merges an older page (newest first) at the head, skipping ids already
    /// present. Existing entries keep their relative order. Returns the number
    /// of entries added.
    pub fn prepend_older(&mut self, page: Vec<Message>) -> Result<usize, SyncError> {
        if !matches!(self.phase, TimelinePhase::Ready | TimelinePhase::LoadingOlder) {
            return Err(self.invalid_phase("prepend history"));
        }
        let mut older: Vec<TimelineEntry> = Vec::with_capacity(page.len());
        for message in page.into_iter().rev() {
            if self.confirmed.insert(message.id.clone()) {
                older.push(message.into());
            }
        }
        older.sort_by_key(|e| e.created_at);
        let added = older.len();
        self.entries.splice(0..0, older);
        self.phase = TimelinePhase::Ready;
        Ok(added)
    }

    /// Inserts a server-pushed message unless it is already present.
    ///
    /// A push carrying the `client_id` of a local pending entry is that send's
    /// echo and replaces the entry in place.
    pub fn append_live(&mut self, message: Message) -> AppendOutcome {
        if let Some(temp_id) = message.client_id.clone().map(TempId::from) {
            if self.position_of_temp(&temp_id).is_some() {
                return match self.reconcile_sent(&temp_id, message) {
                    Ok(_) => AppendOutcome::Reconciled(temp_id),
                    Err(_) => AppendOutcome::Duplicate,
                };
            }
        }
        if self.confirmed.contains(&message.id) {
            debug!(message_id = %message.id, "Ignoring duplicate live message");
            return AppendOutcome::Duplicate;
        }

        self.confirmed.insert(message.id.clone());
        let entry = TimelineEntry::from(message);
        let at = self
            .entries
            .iter()
            .rposition(|e| e.created_at <= entry.created_at)
            .map_or(0, |i| i + 1);
        self.entries.insert(at, entry);
        AppendOutcome::Appended
    }

    /// Appends a pending entry attributed to `author` and returns its
    /// temporary id. Purely local; no I/O happens here.
    pub fn send_optimistic(
        &mut self,
        draft: &OutgoingMessage,
        author: &Author,
        now: DateTime<Utc>,
    ) -> TempId {
        let temp_id = TempId::generate(now);
        self.entries.push(TimelineEntry {
            identity: MessageIdentity::Pending { temp_id: temp_id.clone() },
            sender_id: author.id.clone(),
            sender: Some(author.clone()),
            content: draft.content.clone(),
            message_type: draft.message_type,
            media_url: draft.media_url.clone(),
            reply_to_id: draft.reply_to_id.clone(),
            is_deleted: false,
            created_at: now,
        });
        temp_id
    }

    /// Swaps the temporary entry for the confirmed `message` at the same
    /// position. If the confirmed id already arrived through another path
    /// the temporary entry is dropped instead of duplicated.
    pub fn reconcile_sent(
        &mut self,
        temp_id: &TempId,
        message: Message,
    ) -> Result<ReconcileOutcome, SyncError> {
        let Some(index) = self.position_of_temp(temp_id) else {
            warn!(%temp_id, message_id = %message.id, "Server echo for unknown temporary id");
            return Err(SyncError::ReconciliationConflict { temp_id: temp_id.to_string() });
        };
        if self.confirmed.contains(&message.id) {
            self.entries.remove(index);
            return Ok(ReconcileOutcome::Merged);
        }
        self.confirmed.insert(message.id.clone());
        self.entries[index] = TimelineEntry::from(message);
        Ok(ReconcileOutcome::Replaced)
    }

    /// Marks a pending entry as failed. The entry stays in place.
    pub fn reconcile_failed(&mut self, temp_id: &TempId) -> Result<(), SyncError> {
        let Some(index) = self.position_of_temp(temp_id) else {
            return Err(SyncError::ReconciliationConflict { temp_id: temp_id.to_string() });
        };
        self.entries[index].identity = MessageIdentity::Failed { temp_id: temp_id.clone() };
        Ok(())
    }

    /// Puts a failed entry back into the pending state for a resend and
    /// returns the draft it carried.
    pub fn retry_failed(&mut self, temp_id: &TempId) -> Result<OutgoingMessage, SyncError> {
        let entry = self
            .position_of_temp(temp_id)
            .map(|i| &mut self.entries[i])
            .filter(|e| e.identity.is_failed())
            .ok_or_else(|| SyncError::ReconciliationConflict { temp_id: temp_id.to_string() })?;
        entry.identity = MessageIdentity::Pending { temp_id: temp_id.clone() };
        Ok(OutgoingMessage {
            content: entry.content.clone(),
            message_type: entry.message_type,
            media_url: entry.media_url.clone(),
            reply_to_id: entry.reply_to_id.clone(),
        })
    }

    /// Deletes a confirmed message. Returns `false` if it was not present.
    pub fn remove(&mut self, message_id: &str) -> bool {
        if !self.confirmed.remove(message_id) {
            return false;
        }
        self.entries
            .retain(|e| e.identity.confirmed_id() != Some(message_id));
        true
    }

    /// Drops a local entry that never reached the server.
    pub fn discard(&mut self, temp_id: &TempId) -> bool {
        match self.position_of_temp(temp_id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    fn position_of_temp(&self, temp_id: &TempId) -> Option<usize> {
        self.entries
            .iter()
            .rposition(|e| e.identity.temp_id() == Some(temp_id))
    }
}
