use super::*;
use crate::config_store::Config;
use chrono::TimeZone;
use helpdesk_core::fakes::{FakePlatform, PlatformCall};
use helpdesk_core::{Access, HistoryMessage, PlatformError, RoleId};
use tempfile::TempDir;

const PRODUCTS: u64 = 500;
const PARTNERSHIPS: u64 = 501;
const LOG: u64 = 900;
const STAFF: u64 = 77;

struct Harness {
    _dir: TempDir,
    transcripts_dir: PathBuf,
    manager: TicketManager,
}

fn harness(config: Config) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ConfigStore::open(dir.path().join("state.json")));
    store.update(|current| *current = config);
    let transcripts_dir = dir.path().join("transcripts");
    let manager = TicketManager::new(
        store,
        TranscriptStore::new(&transcripts_dir),
        100,
        Duration::from_secs(3),
    );
    Harness {
        _dir: dir,
        transcripts_dir,
        manager,
    }
}

fn configured() -> Config {
    Config {
        products_category_id: Some(ChannelId(PRODUCTS)),
        partnerships_category_id: Some(ChannelId(PARTNERSHIPS)),
        log_channel_id: Some(ChannelId(LOG)),
        staff_role_id: Some(RoleId(STAFF)),
        ticket_counter: 1,
    }
}

fn platform() -> FakePlatform {
    FakePlatform::new()
        .with_category(PRODUCTS)
        .with_category(PARTNERSHIPS)
}

fn alice() -> UserRef {
    UserRef::new(1_u64, "Alice")
}

fn first_channel() -> ChannelId {
    ChannelId(FakePlatform::FIRST_CHANNEL_ID)
}

#[tokio::test]
async fn product_request_creates_private_channel() {
    let h = harness(configured());
    let platform = platform();

    let ticket = h
        .manager
        .submit_product_request(&platform, &alice(), "Logo", "Blue and gold", "3 days")
        .await
        .unwrap();

    assert_eq!(ticket.id, 1);
    assert_eq!(ticket.kind, TicketKind::Product);
    assert_eq!(ticket.channel.name, "product-alice-1");
    assert_eq!(ticket.channel.id, first_channel());

    let created = platform.created_channels();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].category, ChannelId(PRODUCTS));
    assert_eq!(
        created[0].topic.as_deref(),
        Some("Product: Logo | Deadline: 3 days")
    );

    let permissions = platform.permissions_for(first_channel());
    assert!(permissions.contains(&PermissionOverwrite::deny(PermissionTarget::Everyone)));
    assert!(permissions.contains(&PermissionOverwrite::allow(PermissionTarget::Member(
        alice().id
    ))));
    assert!(permissions.contains(&PermissionOverwrite::allow(PermissionTarget::Role(
        RoleId(STAFF)
    ))));

    let welcome = platform.sent_to(first_channel());
    assert_eq!(welcome.len(), 1);
    assert_eq!(welcome[0].buttons[0].custom_id, interaction_id::CLOSE);
    let content = welcome[0].content.as_deref().unwrap();
    assert!(content.contains("<@1>"));
    assert!(content.contains("<@&77>"));
    let embed = welcome[0].embed.as_ref().unwrap();
    assert!(embed.fields.iter().any(|f| f.value == "Blue and gold"));

    assert_eq!(platform.sent_to(ChannelId(LOG)).len(), 1);
    assert_eq!(h.manager.config().snapshot().ticket_counter, 2);
}

#[tokio::test]
async fn partnership_request_uses_its_own_category() {
    let h = harness(configured());
    let platform = platform();

    let ticket = h
        .manager
        .submit_partnership_request(&platform, &alice(), "https://discord.gg/abc")
        .await
        .unwrap();

    assert_eq!(ticket.channel.name, "partnership-alice-1");
    assert_eq!(
        platform.created_channels()[0].category,
        ChannelId(PARTNERSHIPS)
    );
}

#[tokio::test]
async fn without_staff_role_only_requester_is_granted() {
    let h = harness(Config {
        staff_role_id: None,
        ..configured()
    });
    let platform = platform();

    h.manager
        .submit_partnership_request(&platform, &alice(), "https://discord.gg/abc")
        .await
        .unwrap();

    let allowed: Vec<_> = platform
        .permissions_for(first_channel())
        .into_iter()
        .filter(|o| o.access == Access::Allow)
        .collect();
    assert_eq!(
        allowed,
        vec![PermissionOverwrite::allow(PermissionTarget::Member(alice().id))]
    );
}

#[tokio::test]
async fn unconfigured_category_has_no_side_effects() {
    let h = harness(Config {
        products_category_id: None,
        ..configured()
    });
    let platform = platform();

    let err = h
        .manager
        .submit_product_request(&platform, &alice(), "Logo", "desc", "soon")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TicketError::CategoryNotConfigured(TicketKind::Product)
    ));
    assert!(platform.created_channels().is_empty());
    assert_eq!(h.manager.config().snapshot().ticket_counter, 1);
}

#[tokio::test]
async fn deleted_category_counts_as_unconfigured() {
    let h = harness(configured());
    let platform = platform();
    platform.remove_category(ChannelId(PRODUCTS));

    let err = h
        .manager
        .submit_product_request(&platform, &alice(), "Logo", "desc", "soon")
        .await
        .unwrap_err();

    assert!(matches!(err, TicketError::CategoryNotConfigured(_)));
    assert!(platform.calls().is_empty());
    assert_eq!(h.manager.config().snapshot().ticket_counter, 1);
}

#[tokio::test]
async fn rejected_channel_creation_burns_the_number() {
    let h = harness(configured());
    let platform = platform();
    platform.fail_create_with(PlatformError::PermissionDenied("missing access".to_owned()));

    let err = h
        .manager
        .submit_product_request(&platform, &alice(), "Logo", "desc", "soon")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TicketError::Platform(PlatformError::PermissionDenied(_))
    ));
    assert_eq!(h.manager.config().snapshot().ticket_counter, 2);
    assert!(platform.permissions_for(first_channel()).is_empty());
}

#[tokio::test]
async fn partial_failures_after_creation_still_return_the_ticket() {
    let h = harness(configured());
    let platform = platform();
    platform.fail_permissions_with(PlatformError::Transient("reset".to_owned()));
    platform.fail_send_to(first_channel(), PlatformError::RateLimited);
    platform.fail_send_to(ChannelId(LOG), PlatformError::NotFound("log".to_owned()));

    let ticket = h
        .manager
        .submit_product_request(&platform, &alice(), "Logo", "desc", "soon")
        .await
        .unwrap();

    assert_eq!(ticket.channel.id, first_channel());
    assert!(platform.deleted().is_empty());
    // Every overwrite was still attempted.
    assert_eq!(platform.permissions_for(first_channel()).len(), 3);
}

#[tokio::test]
async fn concurrent_submissions_get_unique_contiguous_numbers() {
    let h = harness(configured());
    let platform = platform();
    let users: Vec<UserRef> = (0..10_u64)
        .map(|i| UserRef::new(i, format!("user{i}")))
        .collect();

    let results = futures::future::join_all(users.iter().map(|user| {
        h.manager
            .submit_product_request(&platform, user, "Logo", "desc", "soon")
    }))
    .await;

    let mut numbers: Vec<u64> = results.into_iter().map(|r| r.unwrap().id).collect();
    numbers.sort_unstable();
    assert_eq!(numbers, (1..=10).collect::<Vec<_>>());

    let mut names: Vec<String> = platform
        .created_channels()
        .into_iter()
        .map(|c| c.name)
        .collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 10);
}

fn history() -> Vec<HistoryMessage> {
    let at = |minute| Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap();
    vec![
        HistoryMessage {
            author: "alice".to_owned(),
            content: "hello".to_owned(),
            timestamp: at(1),
            has_attachments: false,
        },
        HistoryMessage {
            author: "staff".to_owned(),
            content: String::new(),
            timestamp: at(2),
            has_attachments: true,
        },
    ]
}

fn ticket_channel() -> ChannelRef {
    ChannelRef::new(4242_u64, "product-alice-1")
}

fn staffer() -> UserRef {
    UserRef::new(2_u64, "staffer")
}

#[tokio::test(start_paused = true)]
async fn close_archives_announces_and_deletes_after_grace() {
    let h = harness(configured());
    let platform = platform();
    platform.set_history(ticket_channel().id, history());

    let transcript = h
        .manager
        .close_ticket(&platform, &ticket_channel(), &staffer())
        .await
        .unwrap();

    assert_eq!(transcript.lines, 2);
    assert_eq!(
        transcript.path,
        h.transcripts_dir.join("transcript-4242.txt")
    );
    let text = std::fs::read_to_string(&transcript.path).unwrap();
    assert!(text.contains("Closed by: staffer"));
    assert!(text.contains("[10:01] alice: hello"));
    assert!(text.contains("[10:02] staff: (no text) [file]"));

    let logged = platform.sent_to(ChannelId(LOG));
    assert_eq!(logged.len(), 1);
    let attachment = logged[0].attachment.as_ref().unwrap();
    assert_eq!(attachment.filename, "transcript-4242.txt");
    assert_eq!(attachment.bytes, text.as_bytes());

    let calls = platform.timed_calls();
    let announced = calls
        .iter()
        .find(|(_, call)| {
            matches!(call, PlatformCall::Send { channel, .. } if *channel == ticket_channel().id)
        })
        .map(|(at, _)| *at)
        .unwrap();
    let deleted = calls
        .iter()
        .find(|(_, call)| matches!(call, PlatformCall::DeleteChannel(_)))
        .map(|(at, _)| *at)
        .unwrap();
    assert!(deleted - announced >= Duration::from_secs(3));
    assert_eq!(platform.deleted(), vec![ticket_channel().id]);
}

#[tokio::test(start_paused = true)]
async fn history_request_is_capped() {
    let h = harness(configured());
    let platform = platform();

    h.manager
        .close_ticket(&platform, &ticket_channel(), &staffer())
        .await
        .unwrap();

    assert!(platform.calls().contains(&PlatformCall::FetchHistory {
        channel: ticket_channel().id,
        limit: 100,
    }));
}

#[tokio::test(start_paused = true)]
async fn second_close_of_same_channel_is_rejected() {
    let h = harness(configured());
    let platform = platform();
    platform.set_history(ticket_channel().id, history());

    let (channel_a, staffer_a) = (ticket_channel(), staffer());
    let (channel_b, staffer_b) = (ticket_channel(), staffer());
    let (first, second) = tokio::join!(
        h.manager.close_ticket(&platform, &channel_a, &staffer_a),
        h.manager.close_ticket(&platform, &channel_b, &staffer_b),
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(TicketError::AlreadyClosing(_))));
    assert_eq!(platform.deleted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn history_failure_aborts_before_anything_is_written() {
    let h = harness(configured());
    let platform = platform();
    platform.fail_history_with(PlatformError::RateLimited);

    let err = h
        .manager
        .close_ticket(&platform, &ticket_channel(), &staffer())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TicketError::Platform(PlatformError::RateLimited)
    ));
    assert!(!h.transcripts_dir.join("transcript-4242.txt").exists());
    assert!(platform.sent_to(ChannelId(LOG)).is_empty());
    assert!(platform.deleted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_announcement_keeps_channel_and_releases_mark() {
    let h = harness(configured());
    let platform = platform();
    platform.fail_send_to(ticket_channel().id, PlatformError::Transient("down".to_owned()));

    let err = h
        .manager
        .close_ticket(&platform, &ticket_channel(), &staffer())
        .await
        .unwrap_err();

    assert!(matches!(err, TicketError::Platform(_)));
    assert!(platform.deleted().is_empty());

    // The closing mark is released so staff can retry.
    let platform = self::platform();
    h.manager
        .close_ticket(&platform, &ticket_channel(), &staffer())
        .await
        .unwrap();
    assert_eq!(platform.deleted(), vec![ticket_channel().id]);
}

#[tokio::test(start_paused = true)]
async fn log_and_delete_failures_are_not_errors() {
    let h = harness(configured());
    let platform = platform();
    platform.fail_send_to(ChannelId(LOG), PlatformError::RateLimited);
    platform.fail_delete_with(PlatformError::PermissionDenied("nope".to_owned()));

    let transcript = h
        .manager
        .close_ticket(&platform, &ticket_channel(), &staffer())
        .await
        .unwrap();
    assert!(transcript.path.exists());
}

#[test]
fn channel_names_are_sanitised() {
    assert_eq!(
        channel_name(TicketKind::Product, "Alice.Smith", 3),
        "product-alice-smith-3"
    );
    assert_eq!(
        channel_name(TicketKind::Partnership, "zoë_99", 12),
        "partnership-zo-_99-12"
    );
}

#[tokio::test]
async fn creation_is_traced_with_span_and_failed_step() {
    use std::io::BufRead;
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::prelude::*;

    let trace_dir = tempfile::tempdir().unwrap();
    let appender = tracing_appender::rolling::never(trace_dir.path(), "traces.jsonl");
    let (writer, flush_guard) = tracing_appender::non_blocking(appender);
    let subscriber = tracing_subscriber::Registry::default().with(
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_span_list(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(tracing_subscriber::EnvFilter::new("debug")),
    );
    let dispatch = tracing::dispatcher::Dispatch::new(subscriber);
    let default_guard = tracing::dispatcher::set_default(&dispatch);

    let h = harness(configured());
    let platform = platform();
    platform.fail_send_to(first_channel(), PlatformError::RateLimited);
    h.manager
        .submit_product_request(&platform, &alice(), "Logo", "desc", "soon")
        .await
        .unwrap();

    drop(default_guard);
    drop(flush_guard);

    let file = std::fs::File::open(trace_dir.path().join("traces.jsonl")).unwrap();
    let lines: Vec<serde_json::Value> = std::io::BufReader::new(file)
        .lines()
        .map(|line| line.unwrap())
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(&line).unwrap())
        .collect();

    let welcome = lines
        .iter()
        .find(|line| line["fields"]["step"] == "welcome")
        .expect("welcome failure should be logged");
    assert_eq!(welcome["level"], "WARN");
    assert_eq!(welcome["spans"][0]["name"], "ticket_create");
    assert!(
        lines
            .iter()
            .any(|line| line["fields"]["message"] == "ticket created")
    );
}
