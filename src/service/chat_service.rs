use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::api::RestApi;
use crate::config::SyncConfig;
use crate::errors::SyncError;
use crate::models::{
    Conversation, CurrentUser, Message, MessagePage, Notification, OutgoingMessage, TempId,
};
use crate::presence::{TypingCoordinator, TypingIndicator, TypingIndicators};
use crate::protocol::{
    self, ClientEvent, MessageDeleted, MessageError, SendMessagePayload, ServerEvent,
};
use crate::store::{
    AppendOutcome, ConversationDirectory, CursorController, NotificationCenter, PageRequest,
    TimelinePhase, TimelineStore,
};
use crate::transport::{ConnectionManager, Subscription};

/// What changed after one update was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    Connected,
    ConnectionLost,
    ReconnectFailed,
    ConversationsChanged,
    ConversationCreated { conversation_id: String },
    TimelineChanged { conversation_id: String },
    MessageFailed { conversation_id: String, temp_id: TempId, reason: String },
    TypingChanged { conversation_id: String },
    NotificationsChanged,
    RequestFailed(SyncError),
    /// Nothing observable changed: a stale result, a duplicate delivery or
    /// an update deferred until the first page arrives.
    Unchanged,
}

enum Update {
    Server(ServerEvent),
    Connected,
    Disconnected,
    ReconnectFailed,
    ConversationsLoaded(Result<Vec<Conversation>, SyncError>),
    ConversationCreated(Result<Conversation, SyncError>),
    PageLoaded {
        view: u64,
        request: PageRequest,
        result: Result<MessagePage, SyncError>,
    },
    Sent {
        conversation_id: String,
        temp_id: TempId,
        result: Result<Message, SyncError>,
    },
    Deleted {
        conversation_id: String,
        message_id: String,
        result: Result<(), SyncError>,
    },
    /// The live channel dropped before the server echoed this send.
    LiveSendLost {
        conversation_id: String,
        temp_id: TempId,
    },
    NotificationsLoaded(Result<(Vec<Notification>, u64), SyncError>),
    NotificationRead {
        notification_id: String,
        result: Result<(), SyncError>,
    },
    AllNotificationsRead {
        changed: Vec<String>,
        result: Result<(), SyncError>,
    },
}

/// The open conversation.
struct ActiveView {
    serial: u64,
    timeline: TimelineStore,
    cursor: CursorController,
    /// Live messages that arrived before the first page.
    backlog: Vec<Message>,
    /// Sends handed to the live channel and not yet echoed back.
    awaiting_echo: Vec<TempId>,
}

/// Owns the conversation views of one session.
///
/// Pushed events and REST results are funnelled through a single channel and
/// applied by [`process_next`](Self::process_next), so the stores are only
/// ever touched from the owner's task. Network calls never block the caller:
/// they run as spawned tasks and report back through the same channel.
pub struct ChatService {
    user: CurrentUser,
    connection: ConnectionManager,
    api: Arc<dyn RestApi>,
    page_size: u32,
    updates_tx: mpsc::UnboundedSender<Update>,
    updates: mpsc::UnboundedReceiver<Update>,
    subscriptions: Vec<Subscription>,
    directory: ConversationDirectory,
    notifications: NotificationCenter,
    active: Option<ActiveView>,
    next_view: u64,
    focused: bool,
    typing: TypingCoordinator,
    indicators: TypingIndicators,
}

impl ChatService {
    pub fn new(
        config: &SyncConfig,
        user: CurrentUser,
        connection: ConnectionManager,
        api: Arc<dyn RestApi>,
    ) -> Self {
        let (updates_tx, updates) = mpsc::unbounded_channel();

        let mut subscriptions = Vec::with_capacity(protocol::SERVER_EVENTS.len() + 3);
        for event in protocol::SERVER_EVENTS {
            let tx = updates_tx.clone();
            subscriptions.push(connection.subscribe(event, move |data| {
                match ServerEvent::from_frame(event, data) {
                    Ok(decoded) => {
                        let _ = tx.send(Update::Server(decoded));
                    }
                    Err(e) => warn!("Dropping undecodable push: {e}"),
                }
            }));
        }
        let lifecycle: [(&str, fn() -> Update); 3] = [
            (protocol::CONNECT, || Update::Connected),
            (protocol::DISCONNECT, || Update::Disconnected),
            (protocol::RECONNECT_FAILED, || Update::ReconnectFailed),
        ];
        for (event, update) in lifecycle {
            let tx = updates_tx.clone();
            subscriptions.push(connection.subscribe(event, move |_| {
                let _ = tx.send(update());
            }));
        }

        let typing = TypingCoordinator::new(
            Arc::new(connection.clone()),
            config.typing_debounce,
            config.typing_quiet_window,
        );
        let indicators = TypingIndicators::new(user.id.clone(), config.typing_quiet_window);

        Self {
            user,
            connection,
            api,
            page_size: config.page_size,
            updates_tx,
            updates,
            subscriptions,
            directory: ConversationDirectory::new(),
            notifications: NotificationCenter::new(),
            active: None,
            next_view: 0,
            focused: false,
            typing,
            indicators,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn user(&self) -> &CurrentUser {
        &self.user
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    pub fn active_conversation_id(&self) -> Option<&str> {
        self.active.as_ref().map(|v| v.timeline.conversation_id())
    }

    pub fn timeline(&self) -> Option<&TimelineStore> {
        self.active.as_ref().map(|v| &v.timeline)
    }

    pub fn has_more_history(&self) -> bool {
        self.active.as_ref().is_some_and(|v| v.cursor.has_more())
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    /// Who is typing in `conversation_id` right now, if anyone.
    pub fn typing_indicator(&self, conversation_id: &str) -> Option<&TypingIndicator> {
        self.indicators.current(conversation_id, Instant::now())
    }

    /// Drops expired remote typing slots and returns their conversations.
    pub fn prune_typing(&mut self) -> Vec<String> {
        self.indicators.prune(Instant::now())
    }

    // ── Update loop ──────────────────────────────────────────────────────────

    /// Waits for the next pushed event or request result and applies it.
    pub async fn process_next(&mut self) -> Option<ServiceEvent> {
        let update = self.updates.recv().await?;
        Some(self.apply(update))
    }

    /// Applies everything already queued without waiting.
    pub fn process_pending(&mut self) -> Vec<ServiceEvent> {
        let mut events = Vec::new();
        while let Ok(update) = self.updates.try_recv() {
            events.push(self.apply(update));
        }
        events
    }

    fn spawn_request<F>(&self, request: F)
    where
        F: Future<Output = Update> + Send + 'static,
    {
        let tx = self.updates_tx.clone();
        tokio::spawn(async move {
            if tx.send(request.await).is_err() {
                debug!("Chat service went away before the request finished");
            }
        });
    }

    // ── Conversations ────────────────────────────────────────────────────────

    pub fn load_conversations(&self) {
        let api = Arc::clone(&self.api);
        self.spawn_request(async move { Update::ConversationsLoaded(api.list_conversations().await) });
    }

    pub fn create_conversation(&self, peer_id: &str) -> Result<(), SyncError> {
        if peer_id.trim().is_empty() {
            return Err(SyncError::EmptyField { field_name: "peer_id".to_string() });
        }
        let api = Arc::clone(&self.api);
        let peer_id = peer_id.to_string();
        self.spawn_request(async move {
            Update::ConversationCreated(api.create_conversation(&peer_id).await)
        });
        Ok(())
    }

    /// Makes `conversation_id` the active view and fetches its newest page.
    ///
    /// Reopening the active conversation is a no-op unless its first page
    /// failed to load, in which case the fetch is retried.
    pub fn open_conversation(&mut self, conversation_id: &str) -> Result<(), SyncError> {
        if let Some(view) = self.active.as_mut() {
            if view.timeline.conversation_id() == conversation_id {
                let retry = view.timeline.phase() == TimelinePhase::Loading && !view.cursor.is_loading();
                let request = if retry { view.cursor.first_request() } else { None };
                let serial = view.serial;
                if let Some(request) = request {
                    self.fetch_page(serial, request);
                }
                return Ok(());
            }
        }
        self.close_conversation();

        self.next_view += 1;
        let mut timeline = TimelineStore::new(conversation_id);
        timeline.begin_loading()?;
        let mut cursor = CursorController::new(conversation_id, self.page_size);
        if let Some(request) = cursor.first_request() {
            self.fetch_page(self.next_view, request);
        }
        self.active = Some(ActiveView {
            serial: self.next_view,
            timeline,
            cursor,
            backlog: Vec::new(),
            awaiting_echo: Vec::new(),
        });
        self.focused = true;
        self.acknowledge(conversation_id);
        info!(%conversation_id, "Opened conversation");
        Ok(())
    }

    /// Leaves the active view. In-flight pages for it are discarded when
    /// they arrive.
    pub fn close_conversation(&mut self) {
        if let Some(view) = self.active.take() {
            let conversation_id = view.timeline.conversation_id();
            self.typing.clear(conversation_id);
            debug!(%conversation_id, "Closed conversation");
        }
        self.focused = false;
    }

    pub fn set_focused(&mut self, focused: bool) {
        let regained = focused && !self.focused;
        self.focused = focused;
        if regained {
            if let Some(conversation_id) = self.active_conversation_id().map(str::to_string) {
                self.acknowledge(&conversation_id);
            }
        }
    }

    fn acknowledge(&mut self, conversation_id: &str) {
        self.connection.emit(&ClientEvent::mark_read(conversation_id));
        self.directory.mark_read(conversation_id, Utc::now());
    }

    fn rejoin(&self) {
        let mut ids = self.directory.ids();
        if let Some(active) = self.active_conversation_id() {
            if !ids.iter().any(|id| id == active) {
                ids.push(active.to_string());
            }
        }
        if ids.is_empty() {
            return;
        }
        info!(count = ids.len(), "Joining conversations");
        self.connection.emit(&ClientEvent::JoinConversations(ids));
    }

    // ── History ──────────────────────────────────────────────────────────────

    fn fetch_page(&self, view: u64, request: PageRequest) {
        let api = Arc::clone(&self.api);
        self.spawn_request(async move {
            let result = api
                .list_messages(&request.conversation_id, request.cursor.as_deref(), request.limit)
                .await;
            Update::PageLoaded { view, request, result }
        });
    }

    /// Requests the next older page. Returns `false` when there is nothing
    /// more to load or a fetch is already running.
    pub fn load_older(&mut self) -> bool {
        let Some(view) = self.active.as_mut() else {
            return false;
        };
        let Some(request) = view.cursor.next_request() else {
            return false;
        };
        if let Err(e) = view.timeline.begin_loading_older() {
            debug!("Not loading older history: {e}");
            view.cursor.fail();
            return false;
        }
        let serial = view.serial;
        self.fetch_page(serial, request);
        true
    }

    // ── Sending ──────────────────────────────────────────────────────────────

    /// Shows `draft` immediately as a pending entry, then delivers it over
    /// the live channel or, when that is down, over REST.
    pub fn send_message(&mut self, draft: OutgoingMessage) -> Result<TempId, SyncError> {
        draft.validate()?;
        let author = self.user.author();
        let view = self.active.as_mut().ok_or(SyncError::NoActiveConversation)?;
        let phase = view.timeline.phase();
        if !matches!(phase, TimelinePhase::Ready | TimelinePhase::LoadingOlder) {
            return Err(SyncError::InvalidPhase {
                conversation_id: view.timeline.conversation_id().to_string(),
                operation: "send a message",
                phase: phase.to_string(),
            });
        }

        let temp_id = view.timeline.send_optimistic(&draft, &author, Utc::now());
        let conversation_id = view.timeline.conversation_id().to_string();
        self.typing.stop_typing(&conversation_id);
        self.deliver(conversation_id, temp_id.clone(), draft);
        Ok(temp_id)
    }

    /// Resends a failed entry in place.
    pub fn retry_message(&mut self, temp_id: &TempId) -> Result<(), SyncError> {
        let view = self.active.as_mut().ok_or(SyncError::NoActiveConversation)?;
        let draft = view.timeline.retry_failed(temp_id)?;
        let conversation_id = view.timeline.conversation_id().to_string();
        self.deliver(conversation_id, temp_id.clone(), draft);
        Ok(())
    }

    /// Drops a failed entry the user gave up on.
    pub fn discard_message(&mut self, temp_id: &TempId) -> bool {
        self.active
            .as_mut()
            .is_some_and(|v| v.timeline.discard(temp_id))
    }

    fn deliver(&mut self, conversation_id: String, temp_id: TempId, draft: OutgoingMessage) {
        let event = ClientEvent::SendMessage(SendMessagePayload {
            conversation_id: conversation_id.clone(),
            content: draft.content.clone(),
            message_type: Some(draft.message_type.as_str().to_string()),
            media_url: draft.media_url.clone(),
            reply_to_id: draft.reply_to_id.clone(),
            client_id: temp_id.to_string(),
        });
        if self.connection.emit(&event) {
            debug!(%conversation_id, %temp_id, "Message sent over the live channel");
            if let Some(view) = self.view_for(&conversation_id) {
                view.awaiting_echo.push(temp_id);
            }
            return;
        }

        debug!(%conversation_id, %temp_id, "Live channel unavailable; sending over REST");
        let api = Arc::clone(&self.api);
        self.spawn_request(async move {
            let result = api.send_message(&conversation_id, &draft).await;
            Update::Sent { conversation_id, temp_id, result }
        });
    }

    pub fn delete_message(&self, message_id: &str) -> Result<(), SyncError> {
        let conversation_id = self
            .active_conversation_id()
            .ok_or(SyncError::NoActiveConversation)?
            .to_string();
        let api = Arc::clone(&self.api);
        let message_id = message_id.to_string();
        self.spawn_request(async move {
            let result = api.delete_message(&message_id).await;
            Update::Deleted { conversation_id, message_id, result }
        });
        Ok(())
    }

    /// Forwards a keystroke in the active conversation to the typing
    /// coordinator. Returns `false` when no conversation is open.
    pub fn notify_typing(&self) -> bool {
        match self.active_conversation_id() {
            Some(conversation_id) => {
                self.typing.notify_typing(conversation_id);
                true
            }
            None => false,
        }
    }

    // ── Notifications ────────────────────────────────────────────────────────

    pub fn load_notifications(&self) {
        let api = Arc::clone(&self.api);
        self.spawn_request(async move {
            let (list, count) =
                tokio::join!(api.list_notifications(), api.unread_notification_count());
            Update::NotificationsLoaded(list.and_then(|list| count.map(|count| (list, count))))
        });
    }

    /// Flags a notification read locally and tells the server. Returns
    /// `false` if it was unknown or already read.
    pub fn mark_notification_read(&mut self, notification_id: &str) -> bool {
        if !self.notifications.mark_read(notification_id) {
            return false;
        }
        let api = Arc::clone(&self.api);
        let notification_id = notification_id.to_string();
        self.spawn_request(async move {
            let result = api.mark_notification_read(&notification_id).await;
            Update::NotificationRead { notification_id, result }
        });
        true
    }

    /// Returns how many notifications flipped to read locally.
    pub fn mark_all_notifications_read(&mut self) -> usize {
        let changed = self.notifications.mark_all_read();
        let count = changed.len();
        let api = Arc::clone(&self.api);
        self.spawn_request(async move {
            let result = api.mark_all_notifications_read().await;
            Update::AllNotificationsRead { changed, result }
        });
        count
    }

    // ── Applying updates ─────────────────────────────────────────────────────

    fn apply(&mut self, update: Update) -> ServiceEvent {
        match update {
            Update::Server(event) => self.on_server_event(event),
            Update::Connected => {
                self.rejoin();
                ServiceEvent::Connected
            }
            Update::Disconnected => {
                self.fail_unechoed_sends();
                ServiceEvent::ConnectionLost
            }
            Update::ReconnectFailed => ServiceEvent::ReconnectFailed,
            Update::ConversationsLoaded(Ok(conversations)) => {
                info!(count = conversations.len(), "Loaded conversations");
                self.directory.replace(conversations);
                self.rejoin();
                ServiceEvent::ConversationsChanged
            }
            Update::ConversationCreated(Ok(conversation)) => {
                let conversation_id = conversation.id.clone();
                self.directory.upsert(conversation);
                self.connection
                    .emit(&ClientEvent::JoinConversations(vec![conversation_id.clone()]));
                ServiceEvent::ConversationCreated { conversation_id }
            }
            Update::PageLoaded { view, request, result } => self.on_page(view, request, result),
            Update::Sent { conversation_id, temp_id, result } => {
                self.on_sent(conversation_id, temp_id, result)
            }
            Update::LiveSendLost { conversation_id, temp_id } => {
                let Some(view) = self.view_for(&conversation_id) else {
                    return ServiceEvent::Unchanged;
                };
                match view.timeline.reconcile_failed(&temp_id) {
                    Ok(()) => ServiceEvent::MessageFailed {
                        conversation_id,
                        temp_id,
                        reason: "Connection lost before the message was confirmed".to_string(),
                    },
                    Err(e) => {
                        debug!("Send already settled: {e}");
                        ServiceEvent::Unchanged
                    }
                }
            }
            Update::Deleted { conversation_id, message_id, result } => match result {
                Ok(()) => self.remove_message(&conversation_id, &message_id),
                Err(e) => {
                    error!(%message_id, "Failed to delete message: {e}");
                    ServiceEvent::RequestFailed(e)
                }
            },
            Update::NotificationsLoaded(Ok((notifications, unread))) => {
                self.notifications.replace(notifications);
                self.notifications.set_unread_count(unread);
                ServiceEvent::NotificationsChanged
            }
            Update::NotificationRead { notification_id, result: Err(e) } => {
                warn!(%notification_id, "Reverting read flag: {e}");
                self.notifications.revert_read(&notification_id);
                ServiceEvent::RequestFailed(e)
            }
            Update::AllNotificationsRead { changed, result: Err(e) } => {
                warn!(count = changed.len(), "Reverting read flags: {e}");
                for id in &changed {
                    self.notifications.revert_read(id);
                }
                ServiceEvent::RequestFailed(e)
            }
            Update::NotificationRead { result: Ok(()), .. }
            | Update::AllNotificationsRead { result: Ok(()), .. } => ServiceEvent::Unchanged,
            Update::ConversationsLoaded(Err(e))
            | Update::ConversationCreated(Err(e))
            | Update::NotificationsLoaded(Err(e)) => {
                error!("Request failed: {e}");
                ServiceEvent::RequestFailed(e)
            }
        }
    }

    fn on_server_event(&mut self, event: ServerEvent) -> ServiceEvent {
        match event {
            ServerEvent::NewMessage(message) => self.on_live_message(message),
            ServerEvent::MessageDeleted(MessageDeleted { message_id, conversation_id }) => {
                self.remove_message(&conversation_id, &message_id)
            }
            ServerEvent::MessageError(rejection) => self.on_message_error(rejection),
            ServerEvent::UserTyping(payload) => {
                let conversation_id = payload.conversation_id.clone();
                if self.indicators.on_typing(payload, Instant::now()) {
                    ServiceEvent::TypingChanged { conversation_id }
                } else {
                    ServiceEvent::Unchanged
                }
            }
            ServerEvent::UserStopTyping(payload) => {
                if self.indicators.on_stop(&payload) {
                    ServiceEvent::TypingChanged { conversation_id: payload.conversation_id }
                } else {
                    ServiceEvent::Unchanged
                }
            }
            ServerEvent::NewNotification(notification) => {
                if self.notifications.push(notification) {
                    ServiceEvent::NotificationsChanged
                } else {
                    ServiceEvent::Unchanged
                }
            }
            ServerEvent::UnreadCount(payload) => {
                self.notifications.set_unread_count(payload.count);
                ServiceEvent::NotificationsChanged
            }
        }
    }

    fn on_live_message(&mut self, message: Message) -> ServiceEvent {
        let conversation_id = message.conversation_id.clone();
        let own = message.sender_id == self.user.id;
        let is_active = self.active_conversation_id() == Some(conversation_id.as_str());
        let seen = is_active && self.focused;

        let known = self.directory.record_message(&message, own || seen);
        if !is_active {
            if known {
                return ServiceEvent::ConversationsChanged;
            }
            info!(%conversation_id, "Message for an unknown conversation; reloading the directory");
            self.load_conversations();
            return ServiceEvent::Unchanged;
        }
        if seen && !own {
            self.connection.emit(&ClientEvent::mark_read(conversation_id.as_str()));
        }

        let Some(view) = self.active.as_mut() else {
            return ServiceEvent::Unchanged;
        };
        if view.timeline.phase() == TimelinePhase::Loading {
            view.backlog.push(message);
            return ServiceEvent::Unchanged;
        }
        match view.timeline.append_live(message) {
            AppendOutcome::Appended => ServiceEvent::TimelineChanged { conversation_id },
            AppendOutcome::Reconciled(temp_id) => {
                view.awaiting_echo.retain(|t| *t != temp_id);
                debug!(%conversation_id, %temp_id, "Live echo confirmed a pending send");
                ServiceEvent::TimelineChanged { conversation_id }
            }
            AppendOutcome::Duplicate => ServiceEvent::Unchanged,
        }
    }

    fn on_message_error(&mut self, rejection: MessageError) -> ServiceEvent {
        warn!(client_id = ?rejection.client_id, "Server rejected a message: {}", rejection.message);
        let Some(temp_id) = rejection.client_id.map(TempId::from) else {
            return ServiceEvent::RequestFailed(SyncError::request(
                "send_message",
                None,
                rejection.message,
            ));
        };
        let Some(view) = self.active.as_mut() else {
            return ServiceEvent::Unchanged;
        };
        view.awaiting_echo.retain(|t| *t != temp_id);
        match view.timeline.reconcile_failed(&temp_id) {
            Ok(()) => ServiceEvent::MessageFailed {
                conversation_id: view.timeline.conversation_id().to_string(),
                temp_id,
                reason: rejection.message,
            },
            Err(e) => {
                debug!("Ignoring rejection: {e}");
                ServiceEvent::Unchanged
            }
        }
    }

    /// Queues a failure for every live send the dropped channel never echoed.
    /// Each one is applied as its own update so it surfaces as `MessageFailed`.
    fn fail_unechoed_sends(&mut self) {
        let Some(view) = self.active.as_mut() else {
            return;
        };
        let conversation_id = view.timeline.conversation_id().to_string();
        for temp_id in std::mem::take(&mut view.awaiting_echo) {
            warn!(%conversation_id, %temp_id, "Connection lost before the echo arrived");
            let _ = self.updates_tx.send(Update::LiveSendLost {
                conversation_id: conversation_id.clone(),
                temp_id,
            });
        }
    }

    fn view_for(&mut self, conversation_id: &str) -> Option<&mut ActiveView> {
        self.active
            .as_mut()
            .filter(|v| v.timeline.conversation_id() == conversation_id)
    }

    fn on_page(
        &mut self,
        serial: u64,
        request: PageRequest,
        result: Result<MessagePage, SyncError>,
    ) -> ServiceEvent {
        let conversation_id = request.conversation_id;
        let Some(view) = self
            .view_for(&conversation_id)
            .filter(|v| v.serial == serial)
        else {
            debug!(%conversation_id, "Discarding page for a conversation that is no longer open");
            return ServiceEvent::Unchanged;
        };
        let first_page = request.cursor.is_none();

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                error!(%conversation_id, "Failed to load messages: {e}");
                view.cursor.fail();
                view.timeline.abort_loading_older();
                return ServiceEvent::RequestFailed(e);
            }
        };
        view.cursor.complete(&page);

        let merged = if first_page {
            view.timeline.seed_page(page).map(|()| {
                for message in std::mem::take(&mut view.backlog) {
                    view.timeline.append_live(message);
                }
            })
        } else {
            view.timeline.prepend_older(page.messages).map(|added| {
                debug!(%conversation_id, added, "Merged older history");
            })
        };
        match merged {
            Ok(()) => ServiceEvent::TimelineChanged { conversation_id },
            Err(e) => {
                warn!("Ignoring page: {e}");
                ServiceEvent::Unchanged
            }
        }
    }

    fn on_sent(
        &mut self,
        conversation_id: String,
        temp_id: TempId,
        result: Result<Message, SyncError>,
    ) -> ServiceEvent {
        match result {
            Ok(message) => {
                self.directory.record_message(&message, true);
                let Some(view) = self.view_for(&conversation_id) else {
                    return ServiceEvent::ConversationsChanged;
                };
                match view.timeline.reconcile_sent(&temp_id, message) {
                    Ok(outcome) => {
                        debug!(%temp_id, ?outcome, "Send confirmed over REST");
                        ServiceEvent::TimelineChanged { conversation_id }
                    }
                    Err(e) => {
                        warn!("Ignoring send confirmation: {e}");
                        ServiceEvent::Unchanged
                    }
                }
            }
            Err(e) => {
                error!(%conversation_id, %temp_id, "Failed to send message: {e}");
                let Some(view) = self.view_for(&conversation_id) else {
                    return ServiceEvent::RequestFailed(e);
                };
                match view.timeline.reconcile_failed(&temp_id) {
                    Ok(()) => ServiceEvent::MessageFailed {
                        conversation_id,
                        temp_id,
                        reason: e.to_string(),
                    },
                    Err(conflict) => {
                        debug!("{conflict}");
                        ServiceEvent::Unchanged
                    }
                }
            }
        }
    }

    fn remove_message(&mut self, conversation_id: &str, message_id: &str) -> ServiceEvent {
        let removed = self
            .view_for(conversation_id)
            .is_some_and(|view| view.timeline.remove(message_id));
        if removed {
            ServiceEvent::TimelineChanged { conversation_id: conversation_id.to_string() }
        } else {
            ServiceEvent::Unchanged
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Removes every subscription and cancels typing timers. The connection
    /// itself is shared and left alone.
    pub fn dispose(&mut self) {
        if self.subscriptions.is_empty() {
            return;
        }
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        self.typing.dispose();
        self.active = None;
        info!("Chat service disposed");
    }
}

impl Drop for ChatService {
    fn drop(&mut self) {
        self.dispose();
    }
}
