//! Database adapter.
//!
//! Request handlers never touch the store directly. They enqueue typed
//! command structs on a single-consumer channel; a dedicated blocking
//! task owns the sole [`Store`] connection and answers over `oneshot`
//! channels. The channel is the serialization point.

pub mod store;

pub use store::{AccountInfo, EventRow, NewEvent, Store, TS_FORMAT};

use chrono::NaiveDateTime;
use tokio::sync::{mpsc, oneshot};

use crate::config::DbConfig;
use crate::error::{BrokerError, Result};

const COMMAND_BACKLOG: usize = 64;

#[derive(Debug)]
pub enum DbRequest {
    CreateAccount {
        user: String,
        pass: String,
        email: String,
    },
    Login {
        user: String,
        pass: String,
    },
    UpdateUser {
        old_user: String,
        old_pass: String,
        new_pass: String,
        new_user: String,
        new_mail: String,
        new_cell: String,
    },
    ResetPassword {
        user: String,
        email: String,
        new_pass: String,
    },
    AccountInfo {
        user: String,
    },
    SetPresence {
        user: String,
        present: bool,
    },
    CreateGroup {
        group: String,
    },
    DeleteGroup {
        group: String,
    },
    JoinGroup {
        user: String,
        group: String,
    },
    LeaveGroup {
        user: String,
        group: String,
    },
    ListGroups {
        user: String,
    },
    ListGroupUsers {
        group: String,
    },
    CreatePersonalEvent {
        user: String,
        event: NewEvent,
    },
    CreateGroupEvent {
        group: String,
        event: NewEvent,
    },
    EventsForUser {
        user: String,
        from: NaiveDateTime,
        to: NaiveDateTime,
    },
    EventsForGroup {
        group: String,
        from: NaiveDateTime,
        to: NaiveDateTime,
    },
    EventsForGroupMembers {
        group: String,
        from: NaiveDateTime,
        to: NaiveDateTime,
    },
    FriendRequest {
        from_user: String,
        to_user: String,
    },
    AcceptFriend {
        user: String,
        from_user: String,
    },
    RejectFriend {
        user: String,
        from_user: String,
    },
    DeleteFriend {
        user: String,
        other: String,
    },
    Friends {
        user: String,
    },
    FriendRequests {
        user: String,
    },
}

#[derive(Debug)]
pub enum DbResponse {
    Done(bool),
    Created(Option<i64>),
    Names(Option<Vec<String>>),
    Account(Option<AccountInfo>),
    Events(Option<Vec<EventRow>>),
}

struct DbCommand {
    request: DbRequest,
    reply: oneshot::Sender<Result<DbResponse>>,
}

/// Cheap-to-clone handle to the adapter task.
#[derive(Clone)]
pub struct DbHandle {
    tx: mpsc::Sender<DbCommand>,
}

/// Open the store from config and start the adapter task. Open failure
/// is fatal at worker startup.
pub fn spawn(config: &DbConfig) -> Result<DbHandle> {
    let store = Store::open(config)?;
    Ok(spawn_with_store(store))
}

/// Start the adapter around an already opened store (tests use
/// `Store::open_in_memory`).
pub fn spawn_with_store(store: Store) -> DbHandle {
    let (tx, mut rx) = mpsc::channel::<DbCommand>(COMMAND_BACKLOG);
    tokio::task::spawn_blocking(move || {
        while let Some(cmd) = rx.blocking_recv() {
            let result = apply(&store, cmd.request);
            let _ = cmd.reply.send(result);
        }
        tracing::debug!("database adapter stopped");
    });
    DbHandle { tx }
}

fn apply(store: &Store, request: DbRequest) -> Result<DbResponse> {
    use DbRequest::*;
    Ok(match request {
        CreateAccount { user, pass, email } => {
            DbResponse::Done(store.create_account(&user, &pass, &email)?)
        }
        Login { user, pass } => DbResponse::Done(store.login(&user, &pass)?),
        UpdateUser {
            old_user,
            old_pass,
            new_pass,
            new_user,
            new_mail,
            new_cell,
        } => DbResponse::Done(store.update_user(
            &old_user, &old_pass, &new_pass, &new_user, &new_mail, &new_cell,
        )?),
        ResetPassword {
            user,
            email,
            new_pass,
        } => DbResponse::Done(store.reset_password(&user, &email, &new_pass)?),
        AccountInfo { user } => DbResponse::Account(store.account_info(&user)?),
        SetPresence { user, present } => DbResponse::Done(store.set_presence(&user, present)?),
        CreateGroup { group } => DbResponse::Done(store.create_group(&group)?),
        DeleteGroup { group } => DbResponse::Done(store.delete_group(&group)?),
        JoinGroup { user, group } => DbResponse::Done(store.join_group(&user, &group)?),
        LeaveGroup { user, group } => DbResponse::Done(store.leave_group(&user, &group)?),
        ListGroups { user } => DbResponse::Names(store.list_groups(&user)?),
        ListGroupUsers { group } => DbResponse::Names(store.list_group_users(&group)?),
        CreatePersonalEvent { user, event } => {
            DbResponse::Created(store.create_personal_event(&user, &event)?)
        }
        CreateGroupEvent { group, event } => {
            DbResponse::Created(store.create_group_event(&group, &event)?)
        }
        EventsForUser { user, from, to } => {
            DbResponse::Events(store.events_for_user(&user, from, to)?)
        }
        EventsForGroup { group, from, to } => {
            DbResponse::Events(store.events_for_group(&group, from, to)?)
        }
        EventsForGroupMembers { group, from, to } => {
            DbResponse::Events(store.events_for_group_members(&group, from, to)?)
        }
        FriendRequest { from_user, to_user } => {
            DbResponse::Done(store.friend_request(&from_user, &to_user)?)
        }
        AcceptFriend { user, from_user } => {
            DbResponse::Done(store.accept_friend(&user, &from_user)?)
        }
        RejectFriend { user, from_user } => {
            DbResponse::Done(store.reject_friend(&user, &from_user)?)
        }
        DeleteFriend { user, other } => DbResponse::Done(store.delete_friend(&user, &other)?),
        Friends { user } => DbResponse::Names(store.friends(&user)?),
        FriendRequests { user } => DbResponse::Names(store.friend_requests(&user)?),
    })
}

impl DbHandle {
    pub async fn request(&self, request: DbRequest) -> Result<DbResponse> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DbCommand { request, reply })
            .await
            .map_err(|_| BrokerError::DbClosed)?;
        rx.await.map_err(|_| BrokerError::DbClosed)?
    }

    pub async fn done(&self, request: DbRequest) -> Result<bool> {
        match self.request(request).await? {
            DbResponse::Done(ok) => Ok(ok),
            DbResponse::Created(id) => Ok(id.is_some()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn names(&self, request: DbRequest) -> Result<Option<Vec<String>>> {
        match self.request(request).await? {
            DbResponse::Names(names) => Ok(names),
            other => Err(unexpected(other)),
        }
    }

    pub async fn account(&self, request: DbRequest) -> Result<Option<AccountInfo>> {
        match self.request(request).await? {
            DbResponse::Account(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    pub async fn events(&self, request: DbRequest) -> Result<Option<Vec<EventRow>>> {
        match self.request(request).await? {
            DbResponse::Events(events) => Ok(events),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(resp: DbResponse) -> BrokerError {
    BrokerError::Protocol(format!("unexpected database response {resp:?}"))
}
