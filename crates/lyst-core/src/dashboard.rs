//! Dashboard view-model: the fetched snapshot plus every bit of transient
//! UI state (drafts, the row being edited, expanded lists).
//!
//! Each successful mutation is followed by a full `list_all` reload that
//! replaces the snapshot wholesale. Failures leave state as it was and do
//! not trigger a reload.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::api::RemoteClient;
use crate::error::{ApiError, ValidationError};
use crate::model::{List, ListId, Todo, TodoId, find_list};
use crate::session::{SessionTracker, Subscription, User};

/// User-facing dialogs. The terminal implementation lives in `shell`.
pub trait Prompter {
    fn confirm(&self, message: &str) -> bool;
    fn alert(&self, message: &str);
}

/// What an action did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The request succeeded and the snapshot was reloaded.
    Done,
    /// Input was refused; no request was issued.
    Rejected(ValidationError),
    /// The user declined a confirmation.
    Declined,
    /// Nothing to do (no user, unknown row, not editing).
    Skipped,
    /// The request failed; state is unchanged.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(User),
    SignedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket(u64);

/// Last fetched lists, tagged with fetch sequence numbers so a response
/// that arrives after a newer one (or after a clear) is dropped.
#[derive(Debug, Default)]
pub struct Snapshot {
    lists: Vec<List>,
    issued: u64,
    applied: u64,
}

impl Snapshot {
    pub fn lists(&self) -> &[List] {
        &self.lists
    }

    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.issued += 1;
        FetchTicket(self.issued)
    }

    /// Returns false when the response is stale and was discarded.
    pub fn apply(&mut self, ticket: FetchTicket, lists: Vec<List>) -> bool {
        if ticket.0 <= self.applied {
            debug!(ticket = ticket.0, applied = self.applied, "discarding stale fetch");
            return false;
        }
        self.applied = ticket.0;
        self.lists = lists;
        true
    }

    /// Empties the snapshot and invalidates every fetch issued so far.
    pub fn clear(&mut self) {
        self.lists.clear();
        self.applied = self.issued;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEdit {
    pub list_id: ListId,
    pub draft: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoEdit {
    pub list_id: ListId,
    pub todo_id: TodoId,
    pub draft: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoRow {
    /// 1-based number used by shell commands: incomplete todos first,
    /// then completed ones.
    pub number: usize,
    pub todo: Todo,
    pub editing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRow {
    pub number: usize,
    pub id: ListId,
    pub title: String,
    pub item_count: usize,
    pub expanded: bool,
    pub editing: bool,
    pub incomplete: Vec<TodoRow>,
    pub completed: Vec<TodoRow>,
}

impl ListRow {
    pub fn todo_by_number(&self, number: usize) -> Option<&TodoRow> {
        self.incomplete
            .iter()
            .chain(self.completed.iter())
            .find(|row| row.number == number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardView {
    pub user: Option<User>,
    pub new_list_title: String,
    pub new_todo_text: String,
    pub list_edit: Option<ListEdit>,
    pub todo_edit: Option<TodoEdit>,
    pub lists: Vec<ListRow>,
}

pub struct Dashboard {
    session: Arc<SessionTracker>,
    client: RemoteClient,
    prompter: Box<dyn Prompter>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    subscription: Option<Subscription>,
    user: Option<User>,
    snapshot: Snapshot,
    new_list_title: String,
    new_todo_text: String,
    list_edit: Option<ListEdit>,
    todo_edit: Option<TodoEdit>,
    expanded: HashMap<ListId, bool>,
}

impl Dashboard {
    /// Subscribes to `session`; changes are applied on the next
    /// `pump_session_events`.
    pub fn new(
        session: Arc<SessionTracker>,
        client: RemoteClient,
        prompter: Box<dyn Prompter>,
    ) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let subscription = session.subscribe(move |user| {
            let event = match user {
                Some(user) => SessionEvent::SignedIn(user.clone()),
                None => SessionEvent::SignedOut,
            };
            if tx.send(event).is_err() {
                debug!("dashboard dropped; session event ignored");
            }
        });

        Self {
            user: session.current_user(),
            session,
            client,
            prompter,
            events,
            subscription: Some(subscription),
            snapshot: Snapshot::default(),
            new_list_title: String::new(),
            new_todo_text: String::new(),
            list_edit: None,
            todo_edit: None,
            expanded: HashMap::new(),
        }
    }

    /// Drops the session subscription. Further session changes are ignored.
    pub fn teardown(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
            debug!("dashboard unsubscribed from session");
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn lists(&self) -> &[List] {
        self.snapshot.lists()
    }

    pub fn new_list_title(&self) -> &str {
        &self.new_list_title
    }

    pub fn new_todo_text(&self) -> &str {
        &self.new_todo_text
    }

    pub fn list_edit(&self) -> Option<&ListEdit> {
        self.list_edit.as_ref()
    }

    pub fn todo_edit(&self) -> Option<&TodoEdit> {
        self.todo_edit.as_ref()
    }

    pub fn is_expanded(&self, id: &ListId) -> bool {
        self.expanded.get(id).copied().unwrap_or(false)
    }

    /// Applies queued session changes: sign-in fetches, sign-out clears.
    #[instrument(skip(self))]
    pub async fn pump_session_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                SessionEvent::SignedIn(user) => {
                    info!(uid = %user.uid, "session started; loading lists");
                    self.user = Some(user);
                    self.fetch_lists().await;
                }
                SessionEvent::SignedOut => {
                    info!("session ended; clearing lists");
                    self.user = None;
                    self.snapshot.clear();
                    self.prune_edits();
                }
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn sign_in(&mut self) -> Outcome {
        let outcome = match self.session.sign_in().await {
            Ok(_) => Outcome::Done,
            Err(err) => {
                error!(error = %err, "error signing in");
                Outcome::Failed
            }
        };
        self.pump_session_events().await;
        outcome
    }

    #[instrument(skip(self))]
    pub async fn sign_out(&mut self) -> Outcome {
        let outcome = match self.session.sign_out().await {
            Ok(()) => Outcome::Done,
            Err(err) => {
                error!(error = %err, "sign out error");
                Outcome::Failed
            }
        };
        self.pump_session_events().await;
        outcome
    }

    /// Reloads the whole collection. Errors are only logged.
    #[instrument(skip(self))]
    pub async fn refresh(&mut self) -> Outcome {
        let outcome = self.fetch_lists().await;
        // A token refresh may have ended the session.
        self.pump_session_events().await;
        outcome
    }

    async fn fetch_lists(&mut self) -> Outcome {
        if self.user.is_none() {
            return Outcome::Skipped;
        }

        let ticket = self.snapshot.begin_fetch();
        match self.client.list_all().await {
            Ok(lists) => {
                debug!(count = lists.len(), ticket = ?ticket, "applying fetched lists");
                if self.snapshot.apply(ticket, lists) {
                    self.prune_edits();
                }
                Outcome::Done
            }
            Err(err) => {
                error!(error = %err, "error fetching lists");
                Outcome::Failed
            }
        }
    }

    pub fn set_new_list_title(&mut self, title: impl Into<String>) {
        self.new_list_title = title.into();
    }

    pub fn set_new_todo_text(&mut self, text: impl Into<String>) {
        self.new_todo_text = text.into();
    }

    #[instrument(skip(self))]
    pub async fn create_list(&mut self) -> Outcome {
        if self.user.is_none() {
            self.prompter.alert("Please sign in to create a list");
            return Outcome::Skipped;
        }

        let title = self.new_list_title.clone();
        let result = self.client.create_list(&title).await;
        let outcome = self.complete(result, "Failed to create list.").await;
        if outcome == Outcome::Done {
            self.new_list_title.clear();
        }
        outcome
    }

    /// Enters editing for a list in the current snapshot, seeding the draft
    /// with its title. Returns false for an unknown id.
    pub fn begin_list_edit(&mut self, id: &ListId) -> bool {
        let Some(list) = find_list(self.snapshot.lists(), id) else {
            warn!(list = %id, "cannot edit list missing from snapshot");
            return false;
        };
        self.list_edit = Some(ListEdit {
            list_id: list.id.clone(),
            draft: list.title.clone(),
        });
        true
    }

    pub fn set_list_draft(&mut self, draft: impl Into<String>) {
        if let Some(edit) = self.list_edit.as_mut() {
            edit.draft = draft.into();
        }
    }

    pub fn cancel_list_edit(&mut self) {
        self.list_edit = None;
    }

    /// Submits the list draft. A blank draft is ignored and editing stays
    /// active.
    #[instrument(skip(self))]
    pub async fn submit_list_edit(&mut self) -> Outcome {
        let Some(edit) = self.list_edit.clone() else {
            return Outcome::Skipped;
        };
        if edit.draft.trim().is_empty() {
            debug!(list = %edit.list_id, "blank list title ignored");
            return Outcome::Rejected(ValidationError::EmptyTitle);
        }

        let result = self.client.rename_list(&edit.list_id, &edit.draft).await;
        let outcome = self.complete(result, "Failed to update list.").await;
        if outcome == Outcome::Done {
            self.list_edit = None;
        }
        outcome
    }

    #[instrument(skip(self), fields(list = %id))]
    pub async fn delete_list(&mut self, id: &ListId) -> Outcome {
        if !self
            .prompter
            .confirm("Are you sure you want to delete this list?")
        {
            debug!("list deletion declined");
            return Outcome::Declined;
        }

        let result = self.client.delete_list(id).await;
        self.complete(result, "Failed to delete list.").await
    }

    /// Flips the expanded flag for `id`; other lists are unaffected.
    pub fn toggle_expanded(&mut self, id: &ListId) -> bool {
        let flag = self.expanded.entry(id.clone()).or_insert(false);
        *flag = !*flag;
        debug!(list = %id, expanded = *flag, "toggled list");
        *flag
    }

    #[instrument(skip(self), fields(list = %list_id))]
    pub async fn add_todo(&mut self, list_id: &ListId) -> Outcome {
        if self.new_todo_text.trim().is_empty() {
            return Outcome::Rejected(ValidationError::EmptyText);
        }

        let text = self.new_todo_text.clone();
        let result = self.client.add_todo(list_id, &text).await;
        let outcome = self.complete(result, "Failed to add todo.").await;
        if outcome == Outcome::Done {
            self.new_todo_text.clear();
        }
        outcome
    }

    #[instrument(skip(self), fields(list = %list_id, todo = %todo_id))]
    pub async fn toggle_todo(&mut self, list_id: &ListId, todo_id: &TodoId) -> Outcome {
        let result = self.client.toggle_todo(list_id, todo_id).await;
        self.complete(result, "Failed to toggle todo.").await
    }

    /// Enters editing for an incomplete todo in the current snapshot.
    pub fn begin_todo_edit(&mut self, list_id: &ListId, todo_id: &TodoId) -> bool {
        let todo = find_list(self.snapshot.lists(), list_id).and_then(|l| l.find_todo(todo_id));
        match todo {
            Some(todo) if !todo.completed => {
                self.todo_edit = Some(TodoEdit {
                    list_id: list_id.clone(),
                    todo_id: todo.id.clone(),
                    draft: todo.text.clone(),
                });
                true
            }
            Some(_) => {
                debug!(todo = %todo_id, "completed todos are not editable");
                false
            }
            None => {
                warn!(list = %list_id, todo = %todo_id, "cannot edit todo missing from snapshot");
                false
            }
        }
    }

    pub fn set_todo_draft(&mut self, draft: impl Into<String>) {
        if let Some(edit) = self.todo_edit.as_mut() {
            edit.draft = draft.into();
        }
    }

    pub fn cancel_todo_edit(&mut self) {
        self.todo_edit = None;
    }

    #[instrument(skip(self))]
    pub async fn submit_todo_edit(&mut self) -> Outcome {
        let Some(edit) = self.todo_edit.clone() else {
            return Outcome::Skipped;
        };
        if edit.draft.trim().is_empty() {
            debug!(todo = %edit.todo_id, "blank todo text ignored");
            return Outcome::Rejected(ValidationError::EmptyText);
        }

        let result = self
            .client
            .rename_todo(&edit.list_id, &edit.todo_id, &edit.draft)
            .await;
        let outcome = self.complete(result, "Failed to update todo.").await;
        if outcome == Outcome::Done {
            self.todo_edit = None;
        }
        outcome
    }

    #[instrument(skip(self), fields(list = %list_id, todo = %todo_id))]
    pub async fn delete_todo(&mut self, list_id: &ListId, todo_id: &TodoId) -> Outcome {
        let result = self.client.delete_todo(list_id, todo_id).await;
        self.complete(result, "Failed to delete todo.").await
    }

    pub fn view(&self) -> DashboardView {
        let lists = self
            .snapshot
            .lists()
            .iter()
            .enumerate()
            .map(|(idx, list)| {
                let (open, done) = list.partition_todos();
                let row = |number: usize, todo: &Todo| TodoRow {
                    number,
                    todo: todo.clone(),
                    editing: self.todo_edit.as_ref().is_some_and(|e| {
                        e.list_id == list.id && e.todo_id == todo.id
                    }),
                };
                let incomplete: Vec<TodoRow> = open
                    .iter()
                    .enumerate()
                    .map(|(i, todo)| row(i + 1, *todo))
                    .collect();
                let completed: Vec<TodoRow> = done
                    .iter()
                    .enumerate()
                    .map(|(i, todo)| row(incomplete.len() + i + 1, *todo))
                    .collect();

                ListRow {
                    number: idx + 1,
                    id: list.id.clone(),
                    title: list.title.clone(),
                    item_count: list.item_count(),
                    expanded: self.is_expanded(&list.id),
                    editing: self
                        .list_edit
                        .as_ref()
                        .is_some_and(|e| e.list_id == list.id),
                    incomplete,
                    completed,
                }
            })
            .collect();

        DashboardView {
            user: self.user.clone(),
            new_list_title: self.new_list_title.clone(),
            new_todo_text: self.new_todo_text.clone(),
            list_edit: self.list_edit.clone(),
            todo_edit: self.todo_edit.clone(),
            lists,
        }
    }

    /// Drops edit state whose list or todo is no longer in the snapshot. A
    /// todo that became completed is no longer editable either.
    fn prune_edits(&mut self) {
        let lists = self.snapshot.lists();
        let list_gone = self
            .list_edit
            .as_ref()
            .is_some_and(|edit| find_list(lists, &edit.list_id).is_none());
        let todo_gone = self.todo_edit.as_ref().is_some_and(|edit| {
            !find_list(lists, &edit.list_id)
                .and_then(|list| list.find_todo(&edit.todo_id))
                .is_some_and(|todo| !todo.completed)
        });

        if list_gone {
            debug!("list being edited is gone; leaving edit mode");
            self.list_edit = None;
        }
        if todo_gone {
            debug!("todo being edited is gone; leaving edit mode");
            self.todo_edit = None;
        }
    }

    /// Reloads after a successful mutation. On any other outcome only queued
    /// session changes are applied, so a token that expired mid-call still
    /// signs the dashboard out.
    async fn complete(&mut self, result: Result<(), ApiError>, failure: &str) -> Outcome {
        let outcome = self.settle(result, failure);
        if outcome == Outcome::Done {
            self.refresh().await;
        } else {
            self.pump_session_events().await;
        }
        outcome
    }

    /// Maps a mutation result onto an outcome, logging and alerting on
    /// failure.
    fn settle(&self, result: Result<(), ApiError>, failure: &str) -> Outcome {
        match result {
            Ok(()) => Outcome::Done,
            Err(ApiError::Validation(err)) => {
                debug!(error = %err, "input rejected");
                Outcome::Rejected(err)
            }
            Err(err) => {
                error!(error = %err, "{failure}");
                self.prompter
                    .alert(&format!("{failure} Check logs for details."));
                Outcome::Failed
            }
        }
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.teardown();
    }
}
