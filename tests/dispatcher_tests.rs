//! Request dispatcher round-trips against an in-memory store.

use broker_lite::db::{self, Store};
use broker_lite::worker::{Dispatcher, Outcome};

fn dispatcher() -> Dispatcher {
    Dispatcher::new(db::spawn_with_store(
        Store::open_in_memory().expect("in-memory store"),
    ))
}

async fn reply(d: &Dispatcher, line: &str) -> String {
    match d.handle(line).await {
        Outcome::Reply(reply) => reply,
        Outcome::Close => panic!("unexpected close for {line:?}"),
    }
}

#[tokio::test]
async fn account_round_trip() {
    let d = dispatcher();
    assert_eq!(reply(&d, "CREATE_ACCOUNT alice s3cret a%40x").await, "OK");
    assert_eq!(reply(&d, "LOGIN alice s3cret").await, "OK");
    assert_eq!(
        reply(&d, "LOGIN alice wrong").await,
        "FAIL BAD_CREDENTIALS"
    );
    // The name is taken now.
    assert_eq!(reply(&d, "CREATE_ACCOUNT alice other b%40x").await, "FAIL");
}

#[tokio::test]
async fn group_membership_round_trip() {
    let d = dispatcher();
    reply(&d, "CREATE_ACCOUNT alice pw a%40x").await;
    assert_eq!(reply(&d, "CREATE_GROUP chess").await, "OK");
    assert_eq!(reply(&d, "JOIN_GROUP alice chess").await, "OK");
    assert_eq!(reply(&d, "LIST_GROUPS alice").await, "OK chess");
    assert_eq!(reply(&d, "LIST_GROUP_USERS chess").await, "OK alice");
    assert_eq!(reply(&d, "LEAVE_GROUP alice chess").await, "OK");
    assert_eq!(reply(&d, "LIST_GROUPS alice").await, "OK");
    // Leaving twice has nothing left to remove.
    assert_eq!(reply(&d, "LEAVE_GROUP alice chess").await, "FAIL");
    assert_eq!(reply(&d, "DELETE_GROUP chess").await, "OK");
    assert_eq!(reply(&d, "LIST_GROUP_USERS chess").await, "FAIL");
}

#[tokio::test]
async fn event_round_trip_returns_the_event_id() {
    let d = dispatcher();
    reply(&d, "CREATE_ACCOUNT alice pw a%40x").await;
    assert_eq!(
        reply(
            &d,
            "CREATE_PERSONAL_EVENT alice team%20standup room%201 \
             2024-06-01T09:00 2024-06-01T10:00 none - blue"
        )
        .await,
        "OK"
    );
    let listed = reply(&d, "LIST_USER_EVENTS alice 2024-06-01T00:00 2024-06-02T00:00").await;
    assert_eq!(
        listed,
        "OK 1/team%20standup/2024-06-01T09:00/2024-06-01T10:00"
    );
    // A window that misses the event returns nothing.
    assert_eq!(
        reply(&d, "LIST_USER_EVENTS alice 2024-06-02T00:00 2024-06-03T00:00").await,
        "OK"
    );
}

#[tokio::test]
async fn month_listing_windows_by_calendar_month() {
    let d = dispatcher();
    reply(&d, "CREATE_ACCOUNT alice pw a%40x").await;
    reply(
        &d,
        "CREATE_PERSONAL_EVENT alice review hq 2024-06-15T14:00 2024-06-15T15:00 none - red",
    )
    .await;
    assert!(reply(&d, "LIST_MONTH_EVENTS alice 6 2024")
        .await
        .starts_with("OK 1/"));
    assert_eq!(reply(&d, "LIST_MONTH_EVENTS alice 7 2024").await, "OK");
}

#[tokio::test]
async fn suggest_times_emits_inclusive_gaps() {
    let d = dispatcher();
    reply(&d, "CREATE_ACCOUNT alice pw a%40x").await;
    reply(
        &d,
        "CREATE_PERSONAL_EVENT alice a - 2024-06-01T09:00 2024-06-01T10:00 none - blue",
    )
    .await;
    reply(
        &d,
        "CREATE_PERSONAL_EVENT alice b - 2024-06-01T11:00 2024-06-01T11:30 none - blue",
    )
    .await;

    let suggested = reply(
        &d,
        "SUGGEST_USER_TIMES alice 60 2024-06-01T08:00 2024-06-01T18:00",
    )
    .await;
    assert_eq!(
        suggested,
        "OK 2024-06-01T08:00/2024-06-01T09:00,2024-06-01T10:00/2024-06-01T11:00,2024-06-01T11:30/2024-06-01T18:00"
    );
}

#[tokio::test]
async fn group_suggestions_union_member_calendars() {
    let d = dispatcher();
    reply(&d, "CREATE_ACCOUNT alice pw a%40x").await;
    reply(&d, "CREATE_ACCOUNT bob pw b%40x").await;
    reply(&d, "CREATE_GROUP team").await;
    reply(&d, "JOIN_GROUP alice team").await;
    reply(&d, "JOIN_GROUP bob team").await;
    reply(
        &d,
        "CREATE_PERSONAL_EVENT alice a - 2024-06-01T09:00 2024-06-01T10:00 none - blue",
    )
    .await;
    reply(
        &d,
        "CREATE_PERSONAL_EVENT bob b - 2024-06-01T10:00 2024-06-01T11:00 none - blue",
    )
    .await;

    let suggested = reply(
        &d,
        "SUGGEST_GROUP_TIMES team 60 2024-06-01T08:00 2024-06-01T13:00",
    )
    .await;
    assert_eq!(
        suggested,
        "OK 2024-06-01T08:00/2024-06-01T09:00,2024-06-01T11:00/2024-06-01T13:00"
    );
}

#[tokio::test]
async fn group_events_are_visible_to_members() {
    let d = dispatcher();
    reply(&d, "CREATE_ACCOUNT alice pw a%40x").await;
    reply(&d, "CREATE_GROUP team").await;
    reply(&d, "JOIN_GROUP alice team").await;
    assert_eq!(
        reply(
            &d,
            "CREATE_GROUP_EVENT team offsite beach 2024-06-03T09:00 2024-06-03T17:00 none - green"
        )
        .await,
        "OK"
    );
    assert!(reply(&d, "LIST_GROUP_EVENTS team 2024-06-03T00:00 2024-06-04T00:00")
        .await
        .starts_with("OK 1/offsite/"));
    assert!(reply(&d, "LIST_USER_EVENTS alice 2024-06-03T00:00 2024-06-04T00:00")
        .await
        .starts_with("OK 1/"));
}

#[tokio::test]
async fn friendship_flow() {
    let d = dispatcher();
    reply(&d, "CREATE_ACCOUNT alice pw a%40x").await;
    reply(&d, "CREATE_ACCOUNT bob pw b%40x").await;
    reply(&d, "CREATE_ACCOUNT carl pw c%40x").await;

    assert_eq!(reply(&d, "FRIEND_REQUEST alice bob").await, "OK");
    assert_eq!(reply(&d, "FRIEND_REQUESTS bob").await, "OK alice");
    assert_eq!(reply(&d, "ACCEPT_FRIEND bob alice").await, "OK");
    assert_eq!(reply(&d, "FRIENDS alice").await, "OK bob");

    assert_eq!(reply(&d, "FRIEND_REQUEST carl alice").await, "OK");
    assert_eq!(reply(&d, "REJECT_FRIEND alice carl").await, "OK");
    assert_eq!(reply(&d, "FRIEND_REQUESTS alice").await, "OK");

    assert_eq!(reply(&d, "DELETE_FRIEND alice bob").await, "OK");
    assert_eq!(reply(&d, "FRIENDS alice").await, "OK");
}

#[tokio::test]
async fn presence_toggles_through_account_info() {
    let d = dispatcher();
    reply(&d, "CREATE_ACCOUNT alice pw a%40x").await;
    assert_eq!(reply(&d, "ACCOUNT_INFO alice").await, "OK alice,a%40x,,1");
    assert_eq!(reply(&d, "ABSENT alice").await, "OK");
    assert_eq!(reply(&d, "ACCOUNT_INFO alice").await, "OK alice,a%40x,,0");
    assert_eq!(reply(&d, "PRESENT alice").await, "OK");
    assert_eq!(reply(&d, "ACCOUNT_INFO alice").await, "OK alice,a%40x,,1");
}

#[tokio::test]
async fn update_and_reset_credentials() {
    let d = dispatcher();
    reply(&d, "CREATE_ACCOUNT alice pw a%40x").await;
    assert_eq!(
        reply(&d, "UPDATE_USER alice wrong npw alicia n%40x 555").await,
        "FAIL"
    );
    assert_eq!(
        reply(&d, "UPDATE_USER alice pw npw alicia n%40x 555").await,
        "OK"
    );
    assert_eq!(reply(&d, "LOGIN alicia npw").await, "OK");
    assert_eq!(reply(&d, "RESET_PASSWORD alicia n%40x fresh").await, "OK");
    assert_eq!(reply(&d, "LOGIN alicia fresh").await, "OK");
    assert_eq!(reply(&d, "RESET_PASSWORD alicia bad%40x nope").await, "FAIL");
}

#[tokio::test]
async fn malformed_requests_keep_the_connection() {
    let d = dispatcher();
    assert_eq!(reply(&d, "FROBNICATE a b").await, "FAIL UNKNOWN_VERB");
    assert_eq!(reply(&d, "LOGIN alice").await, "FAIL UNKNOWN_VERB");
    assert_eq!(
        reply(&d, "LIST_USER_EVENTS alice soon later").await,
        "FAIL BAD_ARGUMENT"
    );
    // The dispatcher still answers afterwards.
    assert_eq!(reply(&d, "CREATE_ACCOUNT alice pw a%40x").await, "OK");
}

#[tokio::test]
async fn bye_closes_the_dialogue() {
    let d = dispatcher();
    assert_eq!(d.handle("BYE").await, Outcome::Close);
}
