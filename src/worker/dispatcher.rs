//! Request dispatcher: one text line in, one response line out.
//!
//! The verb set is closed; every verb has a fixed arity. Unknown verbs
//! and arity mismatches answer `FAIL UNKNOWN_VERB` without closing the
//! connection. Space-bearing fields are URL-encoded on the wire in both
//! directions.

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::db::{DbHandle, DbRequest, EventRow, NewEvent, TS_FORMAT};
use crate::error::Result;
use crate::protocol::{decode_field, encode_field};
use crate::worker::suggest::{self, Interval};

/// What the connection loop should do after a request.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Reply(String),
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Login { user: String, pass: String },
    CreateAccount { user: String, pass: String, email: String },
    CreateGroup { group: String },
    JoinGroup { user: String, group: String },
    LeaveGroup { user: String, group: String },
    DeleteGroup { group: String },
    UpdateUser {
        old_user: String,
        old_pass: String,
        new_pass: String,
        new_user: String,
        new_mail: String,
        new_cell: String,
    },
    ListGroups { user: String },
    ListGroupUsers { group: String },
    AccountInfo { user: String },
    CreatePersonalEvent { user: String, event: NewEvent },
    CreateGroupEvent { group: String, event: NewEvent },
    ListUserEvents { user: String, from: NaiveDateTime, to: NaiveDateTime },
    ListGroupEvents { group: String, from: NaiveDateTime, to: NaiveDateTime },
    ListMonthEvents { user: String, from: NaiveDateTime, to: NaiveDateTime },
    SuggestUserTimes {
        user: String,
        duration: Duration,
        from: NaiveDateTime,
        to: NaiveDateTime,
    },
    SuggestGroupTimes {
        group: String,
        duration: Duration,
        from: NaiveDateTime,
        to: NaiveDateTime,
    },
    FriendRequest { from_user: String, to_user: String },
    AcceptFriend { user: String, from_user: String },
    RejectFriend { user: String, from_user: String },
    DeleteFriend { user: String, other: String },
    Friends { user: String },
    FriendRequests { user: String },
    Absent { user: String },
    Present { user: String },
    ResetPassword { user: String, email: String, new_pass: String },
    Bye,
}

/// Reason token carried in a `FAIL` reply for unparseable requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailure {
    UnknownVerb,
    BadArgument,
}

impl ParseFailure {
    pub fn reason(self) -> &'static str {
        match self {
            ParseFailure::UnknownVerb => "UNKNOWN_VERB",
            ParseFailure::BadArgument => "BAD_ARGUMENT",
        }
    }
}

impl Request {
    pub fn parse(line: &str) -> std::result::Result<Self, ParseFailure> {
        let mut tokens = line.split_ascii_whitespace();
        let verb = tokens.next().ok_or(ParseFailure::UnknownVerb)?;
        let args: Vec<String> = tokens
            .map(decode_field)
            .collect::<Result<_>>()
            .map_err(|_| ParseFailure::BadArgument)?;

        let exact = |n: usize| {
            if args.len() == n {
                Ok(())
            } else {
                Err(ParseFailure::UnknownVerb)
            }
        };

        match verb {
            "LOGIN" => {
                exact(2)?;
                Ok(Request::Login {
                    user: args[0].clone(),
                    pass: args[1].clone(),
                })
            }
            "CREATE_ACCOUNT" => {
                exact(3)?;
                Ok(Request::CreateAccount {
                    user: args[0].clone(),
                    pass: args[1].clone(),
                    email: args[2].clone(),
                })
            }
            "CREATE_GROUP" => {
                exact(1)?;
                Ok(Request::CreateGroup {
                    group: args[0].clone(),
                })
            }
            "JOIN_GROUP" => {
                exact(2)?;
                Ok(Request::JoinGroup {
                    user: args[0].clone(),
                    group: args[1].clone(),
                })
            }
            "LEAVE_GROUP" => {
                exact(2)?;
                Ok(Request::LeaveGroup {
                    user: args[0].clone(),
                    group: args[1].clone(),
                })
            }
            "DELETE_GROUP" => {
                exact(1)?;
                Ok(Request::DeleteGroup {
                    group: args[0].clone(),
                })
            }
            "UPDATE_USER" => {
                exact(6)?;
                Ok(Request::UpdateUser {
                    old_user: args[0].clone(),
                    old_pass: args[1].clone(),
                    new_pass: args[2].clone(),
                    new_user: args[3].clone(),
                    new_mail: args[4].clone(),
                    new_cell: args[5].clone(),
                })
            }
            "LIST_GROUPS" => {
                exact(1)?;
                Ok(Request::ListGroups {
                    user: args[0].clone(),
                })
            }
            "LIST_GROUP_USERS" => {
                exact(1)?;
                Ok(Request::ListGroupUsers {
                    group: args[0].clone(),
                })
            }
            "ACCOUNT_INFO" => {
                exact(1)?;
                Ok(Request::AccountInfo {
                    user: args[0].clone(),
                })
            }
            "CREATE_PERSONAL_EVENT" => {
                exact(8)?;
                Ok(Request::CreatePersonalEvent {
                    user: args[0].clone(),
                    event: parse_event(&args[1..])?,
                })
            }
            "CREATE_GROUP_EVENT" => {
                exact(8)?;
                Ok(Request::CreateGroupEvent {
                    group: args[0].clone(),
                    event: parse_event(&args[1..])?,
                })
            }
            "LIST_USER_EVENTS" => {
                exact(3)?;
                Ok(Request::ListUserEvents {
                    user: args[0].clone(),
                    from: parse_ts(&args[1])?,
                    to: parse_ts(&args[2])?,
                })
            }
            "LIST_GROUP_EVENTS" => {
                exact(3)?;
                Ok(Request::ListGroupEvents {
                    group: args[0].clone(),
                    from: parse_ts(&args[1])?,
                    to: parse_ts(&args[2])?,
                })
            }
            "LIST_MONTH_EVENTS" => {
                exact(3)?;
                let (from, to) = month_window(&args[1], &args[2])?;
                Ok(Request::ListMonthEvents {
                    user: args[0].clone(),
                    from,
                    to,
                })
            }
            "SUGGEST_USER_TIMES" => {
                exact(4)?;
                Ok(Request::SuggestUserTimes {
                    user: args[0].clone(),
                    duration: parse_minutes(&args[1])?,
                    from: parse_ts(&args[2])?,
                    to: parse_ts(&args[3])?,
                })
            }
            "SUGGEST_GROUP_TIMES" => {
                exact(4)?;
                Ok(Request::SuggestGroupTimes {
                    group: args[0].clone(),
                    duration: parse_minutes(&args[1])?,
                    from: parse_ts(&args[2])?,
                    to: parse_ts(&args[3])?,
                })
            }
            "FRIEND_REQUEST" => {
                exact(2)?;
                Ok(Request::FriendRequest {
                    from_user: args[0].clone(),
                    to_user: args[1].clone(),
                })
            }
            "ACCEPT_FRIEND" => {
                exact(2)?;
                Ok(Request::AcceptFriend {
                    user: args[0].clone(),
                    from_user: args[1].clone(),
                })
            }
            "REJECT_FRIEND" => {
                exact(2)?;
                Ok(Request::RejectFriend {
                    user: args[0].clone(),
                    from_user: args[1].clone(),
                })
            }
            "DELETE_FRIEND" => {
                exact(2)?;
                Ok(Request::DeleteFriend {
                    user: args[0].clone(),
                    other: args[1].clone(),
                })
            }
            "FRIENDS" => {
                exact(1)?;
                Ok(Request::Friends {
                    user: args[0].clone(),
                })
            }
            "FRIEND_REQUESTS" => {
                exact(1)?;
                Ok(Request::FriendRequests {
                    user: args[0].clone(),
                })
            }
            "ABSENT" => {
                exact(1)?;
                Ok(Request::Absent {
                    user: args[0].clone(),
                })
            }
            "PRESENT" => {
                exact(1)?;
                Ok(Request::Present {
                    user: args[0].clone(),
                })
            }
            "RESET_PASSWORD" => {
                exact(3)?;
                Ok(Request::ResetPassword {
                    user: args[0].clone(),
                    email: args[1].clone(),
                    new_pass: args[2].clone(),
                })
            }
            "BYE" => {
                exact(0)?;
                Ok(Request::Bye)
            }
            _ => Err(ParseFailure::UnknownVerb),
        }
    }
}

fn parse_event(args: &[String]) -> std::result::Result<NewEvent, ParseFailure> {
    Ok(NewEvent {
        title: args[0].clone(),
        location: args[1].clone(),
        start: parse_ts(&args[2])?,
        end: parse_ts(&args[3])?,
        repeat_rule: args[4].clone(),
        notes: args[5].clone(),
        color: args[6].clone(),
    })
}

fn parse_ts(text: &str) -> std::result::Result<NaiveDateTime, ParseFailure> {
    NaiveDateTime::parse_from_str(text, TS_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|_| ParseFailure::BadArgument)
}

fn parse_minutes(text: &str) -> std::result::Result<Duration, ParseFailure> {
    let minutes: i64 = text.parse().map_err(|_| ParseFailure::BadArgument)?;
    if minutes <= 0 {
        return Err(ParseFailure::BadArgument);
    }
    Ok(Duration::minutes(minutes))
}

fn month_window(
    month: &str,
    year: &str,
) -> std::result::Result<(NaiveDateTime, NaiveDateTime), ParseFailure> {
    let month: u32 = month.parse().map_err(|_| ParseFailure::BadArgument)?;
    let year: i32 = year.parse().map_err(|_| ParseFailure::BadArgument)?;
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or(ParseFailure::BadArgument)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or(ParseFailure::BadArgument)?;
    Ok((
        first.and_hms_opt(0, 0, 0).ok_or(ParseFailure::BadArgument)?,
        next.and_hms_opt(0, 0, 0).ok_or(ParseFailure::BadArgument)?,
    ))
}

/// Routes parsed requests to the database adapter and renders replies.
pub struct Dispatcher {
    db: DbHandle,
}

impl Dispatcher {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    pub async fn handle(&self, line: &str) -> Outcome {
        let request = match Request::parse(line) {
            Ok(request) => request,
            Err(failure) => return Outcome::Reply(format!("FAIL {}", failure.reason())),
        };
        if request == Request::Bye {
            return Outcome::Close;
        }
        match self.dispatch(request).await {
            Ok(reply) => Outcome::Reply(reply),
            Err(e) => {
                tracing::warn!(error = %e, "request handling failed");
                Outcome::Reply("FAIL DB".to_string())
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<String> {
        use Request::*;
        match request {
            Login { user, pass } => {
                let ok = self.db.done(DbRequest::Login { user, pass }).await?;
                Ok(if ok {
                    ok_reply()
                } else {
                    "FAIL BAD_CREDENTIALS".to_string()
                })
            }
            CreateAccount { user, pass, email } => self
                .done(DbRequest::CreateAccount { user, pass, email })
                .await,
            CreateGroup { group } => self.done(DbRequest::CreateGroup { group }).await,
            JoinGroup { user, group } => self.done(DbRequest::JoinGroup { user, group }).await,
            LeaveGroup { user, group } => self.done(DbRequest::LeaveGroup { user, group }).await,
            DeleteGroup { group } => self.done(DbRequest::DeleteGroup { group }).await,
            UpdateUser {
                old_user,
                old_pass,
                new_pass,
                new_user,
                new_mail,
                new_cell,
            } => {
                self.done(DbRequest::UpdateUser {
                    old_user,
                    old_pass,
                    new_pass,
                    new_user,
                    new_mail,
                    new_cell,
                })
                .await
            }
            ResetPassword {
                user,
                email,
                new_pass,
            } => {
                self.done(DbRequest::ResetPassword {
                    user,
                    email,
                    new_pass,
                })
                .await
            }
            ListGroups { user } => self.names(DbRequest::ListGroups { user }).await,
            ListGroupUsers { group } => self.names(DbRequest::ListGroupUsers { group }).await,
            Friends { user } => self.names(DbRequest::Friends { user }).await,
            FriendRequests { user } => self.names(DbRequest::FriendRequests { user }).await,
            AccountInfo { user } => {
                match self.db.account(DbRequest::AccountInfo { user }).await? {
                    Some(info) => Ok(ok_csv(&[
                        encode_field(&info.user_name),
                        encode_field(&info.email),
                        encode_field(&info.cell),
                        if info.present { "1" } else { "0" }.to_string(),
                    ])),
                    None => Ok(fail_reply()),
                }
            }
            Absent { user } => {
                self.done(DbRequest::SetPresence {
                    user,
                    present: false,
                })
                .await
            }
            Present { user } => {
                self.done(DbRequest::SetPresence {
                    user,
                    present: true,
                })
                .await
            }
            CreatePersonalEvent { user, event } => {
                self.done(DbRequest::CreatePersonalEvent { user, event }).await
            }
            CreateGroupEvent { group, event } => {
                self.done(DbRequest::CreateGroupEvent { group, event }).await
            }
            ListUserEvents { user, from, to } => {
                self.events(DbRequest::EventsForUser { user, from, to }).await
            }
            ListGroupEvents { group, from, to } => {
                self.events(DbRequest::EventsForGroup { group, from, to })
                    .await
            }
            ListMonthEvents { user, from, to } => {
                self.events(DbRequest::EventsForUser { user, from, to }).await
            }
            SuggestUserTimes {
                user,
                duration,
                from,
                to,
            } => {
                let rows = self
                    .db
                    .events(DbRequest::EventsForUser { user, from, to })
                    .await?;
                Ok(render_suggestions(rows, from, to, duration))
            }
            SuggestGroupTimes {
                group,
                duration,
                from,
                to,
            } => {
                let rows = self
                    .db
                    .events(DbRequest::EventsForGroupMembers { group, from, to })
                    .await?;
                Ok(render_suggestions(rows, from, to, duration))
            }
            FriendRequest { from_user, to_user } => {
                self.done(DbRequest::FriendRequest { from_user, to_user })
                    .await
            }
            AcceptFriend { user, from_user } => {
                self.done(DbRequest::AcceptFriend { user, from_user }).await
            }
            RejectFriend { user, from_user } => {
                self.done(DbRequest::RejectFriend { user, from_user }).await
            }
            DeleteFriend { user, other } => {
                self.done(DbRequest::DeleteFriend { user, other }).await
            }
            Bye => Ok(ok_reply()),
        }
    }

    async fn done(&self, request: DbRequest) -> Result<String> {
        Ok(if self.db.done(request).await? {
            ok_reply()
        } else {
            fail_reply()
        })
    }

    async fn names(&self, request: DbRequest) -> Result<String> {
        Ok(match self.db.names(request).await? {
            Some(names) => {
                let encoded: Vec<String> = names.iter().map(|n| encode_field(n)).collect();
                ok_csv(&encoded)
            }
            None => fail_reply(),
        })
    }

    async fn events(&self, request: DbRequest) -> Result<String> {
        Ok(match self.db.events(request).await? {
            Some(rows) => {
                let items: Vec<String> = rows.iter().map(render_event).collect();
                ok_csv(&items)
            }
            None => fail_reply(),
        })
    }
}

fn ok_reply() -> String {
    "OK".to_string()
}

fn fail_reply() -> String {
    "FAIL".to_string()
}

fn ok_csv(items: &[String]) -> String {
    if items.is_empty() {
        ok_reply()
    } else {
        format!("OK {}", items.join(","))
    }
}

/// `<id>/<title>/<start>/<end>`, title URL-encoded.
fn render_event(row: &EventRow) -> String {
    format!(
        "{}/{}/{}/{}",
        row.event_id,
        encode_field(&row.title),
        row.start.format(TS_FORMAT),
        row.end.format(TS_FORMAT),
    )
}

fn render_suggestions(
    rows: Option<Vec<EventRow>>,
    from: NaiveDateTime,
    to: NaiveDateTime,
    duration: Duration,
) -> String {
    let Some(rows) = rows else {
        return fail_reply();
    };
    let Some(window) = Interval::new(from, to) else {
        return fail_reply();
    };
    let busy: Vec<Interval> = rows
        .iter()
        .filter_map(|r| Interval::new(r.start, r.end))
        .collect();
    let slots = suggest::free_slots(&busy, window, duration, suggest::MAX_SLOTS);
    let items: Vec<String> = slots
        .iter()
        .map(|s| format!("{}/{}", s.start.format(TS_FORMAT), s.end.format(TS_FORMAT)))
        .collect();
    ok_csv(&items)
}
