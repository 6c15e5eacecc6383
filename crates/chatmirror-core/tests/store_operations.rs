//! Integration tests for store operations.

use chatmirror_core::Store;
use chatmirror_core::db::{ListMessagesOptions, SearchOptions, StoreOptions};
use chatmirror_core::models::{
    ChatKind, ContactInfo, GroupParticipant, MediaDescriptor, MediaKind, MessageUpsert,
    ParticipantRole,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

const DM: &str = "15550100@s.whatsapp.net";
const GROUP: &str = "120363-555@g.us";

fn temp_db_path() -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    let filename = format!("chatmirror-test-{}.db", Uuid::new_v4());
    path.push(filename);
    path
}

fn at(offset: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + offset, 0).expect("valid timestamp")
}

fn text_message(chat: &str, id: &str, offset: i64, text: &str) -> MessageUpsert {
    MessageUpsert {
        chat_jid: chat.to_string(),
        msg_id: id.to_string(),
        sender_jid: DM.to_string(),
        sender_name: "Alice".to_string(),
        timestamp: at(offset),
        text: text.to_string(),
        display_text: text.to_string(),
        ..MessageUpsert::default()
    }
}

fn image_message(chat: &str, id: &str, offset: i64) -> MessageUpsert {
    let mut media = MediaDescriptor::new(MediaKind::Image);
    media.mime_type = Some("image/jpeg".to_string());
    media.direct_path = Some("/v/t62/img".to_string());
    media.media_key = vec![1, 2, 3];
    media.file_sha256 = vec![4];
    media.file_enc_sha256 = vec![5];
    media.file_length = 2048;

    MessageUpsert {
        chat_jid: chat.to_string(),
        msg_id: id.to_string(),
        sender_jid: DM.to_string(),
        timestamp: at(offset),
        display_text: "Sent image".to_string(),
        media: Some(media),
        ..MessageUpsert::default()
    }
}

// ============================================================================
// Messages
// ============================================================================

#[tokio::test]
async fn upsert_message_is_idempotent() {
    let db = Store::open(&temp_db_path()).await.expect("open store");
    let msg = text_message(DM, "m1", 0, "hello");

    db.upsert_message(&msg).await.expect("first upsert");
    db.upsert_message(&msg).await.expect("second upsert");

    assert_eq!(db.count_messages().await.expect("count"), 1);
    let stored = db.get_message(DM, "m1").await.expect("get").expect("exists");
    assert_eq!(stored.text.as_deref(), Some("hello"));
    assert_eq!(stored.sender_name.as_deref(), Some("Alice"));
}

#[tokio::test]
async fn upsert_message_creates_placeholder_chat() {
    let db = Store::open(&temp_db_path()).await.expect("open store");
    db.upsert_message(&text_message(GROUP, "g1", 0, "hi all"))
        .await
        .expect("upsert");

    let chat = db.get_chat(GROUP).await.expect("get").expect("exists");
    assert_eq!(chat.kind, ChatKind::Group);
    assert!(chat.name.is_none());
}

#[tokio::test]
async fn upsert_message_keeps_known_fields_when_new_values_are_empty() {
    let db = Store::open(&temp_db_path()).await.expect("open store");
    db.upsert_message(&image_message(DM, "img", 0))
        .await
        .expect("upsert");

    let mut sparse = image_message(DM, "img", 0);
    if let Some(media) = sparse.media.as_mut() {
        media.direct_path = None;
        media.media_key.clear();
        media.file_length = 0;
    }
    sparse.display_text.clear();
    db.upsert_message(&sparse).await.expect("merge");

    let info = db
        .media_download_info(DM, "img")
        .await
        .expect("info")
        .expect("exists");
    let media = info.media.as_ref().expect("media");
    assert_eq!(media.direct_path.as_deref(), Some("/v/t62/img"));
    assert_eq!(media.media_key, vec![1, 2, 3]);
    assert_eq!(media.file_length, 2048);
    assert!(info.needs_download());

    let stored = db.get_message(DM, "img").await.expect("get").expect("exists");
    assert_eq!(stored.display_text.as_deref(), Some("Sent image"));
}

#[tokio::test]
async fn upsert_message_requires_identity() {
    let db = Store::open(&temp_db_path()).await.expect("open store");
    let result = db.upsert_message(&text_message(DM, "  ", 0, "x")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn list_messages_newest_first_with_filters() {
    let db = Store::open(&temp_db_path()).await.expect("open store");
    for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
        db.upsert_message(&text_message(DM, id, i as i64 * 10, id))
            .await
            .expect("upsert");
    }
    db.upsert_message(&text_message(GROUP, "other", 5, "other"))
        .await
        .expect("upsert");

    let all = db
        .list_messages(ListMessagesOptions {
            chat_jid: Some(DM.to_string()),
            ..Default::default()
        })
        .await
        .expect("list");
    let ids: Vec<_> = all.iter().map(|m| m.msg_id.as_str()).collect();
    assert_eq!(ids, vec!["d", "c", "b", "a"]);

    let window = db
        .list_messages(ListMessagesOptions {
            chat_jid: Some(DM.to_string()),
            after: Some(at(0)),
            before: Some(at(30)),
            limit: Some(10),
        })
        .await
        .expect("list window");
    let ids: Vec<_> = window.iter().map(|m| m.msg_id.as_str()).collect();
    assert_eq!(ids, vec!["c", "b"]);
}

#[tokio::test]
async fn message_context_orders_chronologically() {
    let db = Store::open(&temp_db_path()).await.expect("open store");
    for (i, id) in ["m1", "m2", "m3", "m4", "m5"].iter().enumerate() {
        db.upsert_message(&text_message(DM, id, i as i64, id))
            .await
            .expect("upsert");
    }

    let context = db.message_context(DM, "m3", 1, 1).await.expect("context");
    let ids: Vec<_> = context.iter().map(|m| m.msg_id.as_str()).collect();
    assert_eq!(ids, vec!["m2", "m3", "m4"]);

    let edge = db.message_context(DM, "m1", 5, -3).await.expect("context");
    let ids: Vec<_> = edge.iter().map(|m| m.msg_id.as_str()).collect();
    assert_eq!(ids, vec!["m1"]);

    assert!(db.message_context(DM, "missing", 1, 1).await.is_err());
}

#[tokio::test]
async fn oldest_message_returns_anchor() {
    let db = Store::open(&temp_db_path()).await.expect("open store");
    assert!(db.oldest_message(DM).await.expect("query").is_none());
    assert!(db.oldest_message("").await.is_err());

    db.upsert_message(&text_message(DM, "late", 50, "late"))
        .await
        .expect("upsert");
    db.upsert_message(&text_message(DM, "early", 10, "early"))
        .await
        .expect("upsert");

    let anchor = db.oldest_message(DM).await.expect("query").expect("exists");
    assert_eq!(anchor.msg_id, "early");
    assert_eq!(anchor.timestamp, at(10));
    assert_eq!(anchor.sender_jid.as_deref(), Some(DM));
}

#[tokio::test]
async fn resolve_target_text_prefers_display_text() {
    let db = Store::open(&temp_db_path()).await.expect("open store");
    db.upsert_message(&text_message(DM, "t1", 0, "hello"))
        .await
        .expect("upsert");

    let mut bare = image_message(DM, "t2", 1);
    bare.display_text.clear();
    db.upsert_message(&bare).await.expect("upsert");

    assert_eq!(
        db.resolve_target_text(DM, "t1").await.expect("resolve"),
        Some("hello".to_string())
    );
    assert_eq!(
        db.resolve_target_text(DM, "t2").await.expect("resolve"),
        Some("Sent image".to_string())
    );
    assert_eq!(db.resolve_target_text(DM, "nope").await.expect("resolve"), None);
}

// ============================================================================
// Chats
// ============================================================================

#[tokio::test]
async fn chat_name_is_never_cleared_and_activity_is_monotonic() {
    let db = Store::open(&temp_db_path()).await.expect("open store");

    db.upsert_chat(DM, ChatKind::Direct, "Alice", at(100))
        .await
        .expect("upsert");
    db.upsert_chat(DM, ChatKind::Direct, "", at(50))
        .await
        .expect("upsert older");

    let chat = db.get_chat(DM).await.expect("get").expect("exists");
    assert_eq!(chat.name.as_deref(), Some("Alice"));
    assert_eq!(chat.last_message_at, Some(at(100)));

    db.upsert_chat(DM, ChatKind::Direct, "Alice B", at(200))
        .await
        .expect("upsert newer");
    let chat = db.get_chat(DM).await.expect("get").expect("exists");
    assert_eq!(chat.name.as_deref(), Some("Alice B"));
    assert_eq!(chat.last_message_at, Some(at(200)));
}

#[tokio::test]
async fn list_chats_by_recent_activity() {
    let db = Store::open(&temp_db_path()).await.expect("open store");
    db.upsert_chat(DM, ChatKind::Direct, "Alice", at(10))
        .await
        .expect("upsert");
    db.upsert_chat(GROUP, ChatKind::Group, "Book Club", at(20))
        .await
        .expect("upsert");

    let chats = db.list_chats(None, None).await.expect("list");
    let jids: Vec<_> = chats.iter().map(|c| c.jid.as_str()).collect();
    assert_eq!(jids, vec![GROUP, DM]);

    let filtered = db.list_chats(Some("book"), None).await.expect("list");
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].jid, GROUP);
}

#[tokio::test]
async fn list_messages_uses_current_chat_name() {
    let db = Store::open(&temp_db_path()).await.expect("open store");
    db.upsert_message(&text_message(DM, "m1", 0, "hi"))
        .await
        .expect("upsert");
    db.upsert_chat(DM, ChatKind::Direct, "Alice", at(0))
        .await
        .expect("name chat");

    let msgs = db
        .list_messages(ListMessagesOptions::default())
        .await
        .expect("list");
    assert_eq!(msgs[0].chat_name.as_deref(), Some("Alice"));
}

// ============================================================================
// Contacts
// ============================================================================

#[tokio::test]
async fn contact_upsert_merges_non_empty_fields() {
    let db = Store::open(&temp_db_path()).await.expect("open store");

    db.upsert_contact(&ContactInfo {
        jid: DM.to_string(),
        phone: "15550100".to_string(),
        push_name: "ali".to_string(),
        full_name: "Alice Doe".to_string(),
        ..ContactInfo::default()
    })
    .await
    .expect("upsert");

    db.upsert_contact(&ContactInfo {
        jid: DM.to_string(),
        push_name: "alice!".to_string(),
        ..ContactInfo::default()
    })
    .await
    .expect("merge");

    let contact = db.get_contact(DM).await.expect("get").expect("exists");
    assert_eq!(contact.phone.as_deref(), Some("15550100"));
    assert_eq!(contact.push_name.as_deref(), Some("alice!"));
    assert_eq!(contact.full_name.as_deref(), Some("Alice Doe"));
}

#[tokio::test]
async fn aliases_and_tags() {
    let db = Store::open(&temp_db_path()).await.expect("open store");
    db.upsert_contact(&ContactInfo {
        jid: DM.to_string(),
        full_name: "Alice Doe".to_string(),
        ..ContactInfo::default()
    })
    .await
    .expect("upsert");

    assert!(db.set_alias(DM, "  ").await.is_err());
    assert!(db.add_tag(DM, "").await.is_err());

    db.set_alias(DM, "Ali").await.expect("alias");
    db.add_tag(DM, "work").await.expect("tag");
    db.add_tag(DM, "family").await.expect("tag");
    db.add_tag(DM, "work").await.expect("tag again");

    let contact = db.get_contact(DM).await.expect("get").expect("exists");
    assert_eq!(contact.alias.as_deref(), Some("Ali"));
    assert_eq!(contact.tags, vec!["family".to_string(), "work".to_string()]);

    let found = db.search_contacts("ali", None).await.expect("search");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].alias.as_deref(), Some("Ali"));

    db.remove_alias(DM).await.expect("remove alias");
    db.remove_tag(DM, "work").await.expect("remove tag");
    let contact = db.get_contact(DM).await.expect("get").expect("exists");
    assert!(contact.alias.is_none());
    assert_eq!(contact.tags, vec!["family".to_string()]);
}

#[tokio::test]
async fn search_contacts_requires_query() {
    let db = Store::open(&temp_db_path()).await.expect("open store");
    assert!(db.search_contacts(" ", None).await.is_err());
}

// ============================================================================
// Groups
// ============================================================================

#[tokio::test]
async fn replace_group_participants_swaps_set() {
    let db = Store::open(&temp_db_path()).await.expect("open store");
    db.upsert_group(GROUP, "Book Club", "owner@s.whatsapp.net", Some(at(0)))
        .await
        .expect("group");

    let first = vec![
        GroupParticipant {
            user_jid: "a@s.whatsapp.net".to_string(),
            role: ParticipantRole::Superadmin,
        },
        GroupParticipant {
            user_jid: "b@s.whatsapp.net".to_string(),
            role: ParticipantRole::Member,
        },
    ];
    db.replace_group_participants(GROUP, &first)
        .await
        .expect("replace");

    let second = vec![GroupParticipant {
        user_jid: "c@s.whatsapp.net".to_string(),
        role: ParticipantRole::Admin,
    }];
    db.replace_group_participants(GROUP, &second)
        .await
        .expect("replace again");

    let stored = db.group_participants(GROUP).await.expect("participants");
    assert_eq!(stored, second);
}

#[tokio::test]
async fn failed_participant_replacement_keeps_previous_set() {
    let db = Store::open(&temp_db_path()).await.expect("open store");
    db.upsert_group(GROUP, "Book Club", "", None)
        .await
        .expect("group");

    let original = vec![GroupParticipant {
        user_jid: "a@s.whatsapp.net".to_string(),
        role: ParticipantRole::Admin,
    }];
    db.replace_group_participants(GROUP, &original)
        .await
        .expect("replace");

    let duplicate = GroupParticipant {
        user_jid: "dup@s.whatsapp.net".to_string(),
        role: ParticipantRole::Member,
    };
    let broken = vec![duplicate.clone(), duplicate];
    assert!(db.replace_group_participants(GROUP, &broken).await.is_err());

    let stored = db.group_participants(GROUP).await.expect("participants");
    assert_eq!(stored, original);
}

#[tokio::test]
async fn group_upsert_keeps_known_metadata() {
    let db = Store::open(&temp_db_path()).await.expect("open store");
    db.upsert_group(GROUP, "Book Club", "owner@s.whatsapp.net", Some(at(5)))
        .await
        .expect("group");
    db.upsert_group(GROUP, "", "", None).await.expect("merge");

    let groups = db.list_groups(None, None).await.expect("list");
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name.as_deref(), Some("Book Club"));
    assert_eq!(groups[0].owner_jid.as_deref(), Some("owner@s.whatsapp.net"));
    assert_eq!(groups[0].created_at, Some(at(5)));
}

// ============================================================================
// Media
// ============================================================================

#[tokio::test]
async fn mark_media_downloaded_records_path() {
    let db = Store::open(&temp_db_path()).await.expect("open store");
    db.upsert_message(&image_message(DM, "img", 0))
        .await
        .expect("upsert");

    db.mark_media_downloaded(DM, "img", "/tmp/media/img.jpg", at(60))
        .await
        .expect("mark");

    let info = db
        .media_download_info(DM, "img")
        .await
        .expect("info")
        .expect("exists");
    assert_eq!(info.local_path.as_deref(), Some("/tmp/media/img.jpg"));
    assert_eq!(info.downloaded_at, Some(at(60)));
    assert!(!info.needs_download());

    assert!(
        db.mark_media_downloaded(DM, "missing", "/tmp/x", at(60))
            .await
            .is_err()
    );

    let stats = db.stats().await.expect("stats");
    assert_eq!(stats.messages, 1);
    assert_eq!(stats.media_downloaded, 1);
    assert_eq!(stats.chats, 1);
}

// ============================================================================
// Search
// ============================================================================

#[tokio::test]
async fn full_text_search_finds_messages() {
    let db = Store::open(&temp_db_path()).await.expect("open store");
    assert!(db.has_search_index());

    db.upsert_message(&text_message(DM, "m1", 0, "lunch tomorrow at noon"))
        .await
        .expect("upsert");
    db.upsert_message(&text_message(DM, "m2", 1, "see you later"))
        .await
        .expect("upsert");

    let results = db
        .search_messages("lunch", SearchOptions::default())
        .await
        .expect("search");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].msg_id, "m1");
    assert!(
        results[0]
            .snippet
            .as_deref()
            .is_some_and(|s| s.contains("[lunch]"))
    );

    // Updates flow through the index.
    db.upsert_message(&text_message(DM, "m2", 1, "lunch moved"))
        .await
        .expect("update");
    let results = db
        .search_messages(
            "lunch",
            SearchOptions {
                chat_jid: Some(DM.to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("search");
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn substring_search_without_index() {
    let db = Store::open_with(&temp_db_path(), StoreOptions { full_text: false })
        .await
        .expect("open store");
    assert!(!db.has_search_index());

    db.upsert_message(&text_message(DM, "m1", 0, "Lunch tomorrow"))
        .await
        .expect("upsert");
    db.upsert_message(&text_message(DM, "m2", 5, "no LUNCH today"))
        .await
        .expect("upsert");
    db.upsert_message(&image_message(DM, "m3", 9))
        .await
        .expect("upsert");

    let results = db
        .search_messages("lunch", SearchOptions::default())
        .await
        .expect("search");
    let ids: Vec<_> = results.iter().map(|m| m.msg_id.as_str()).collect();
    assert_eq!(ids, vec!["m2", "m1"]);

    let images = db
        .search_messages(
            "image",
            SearchOptions {
                media_type: Some("image".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("search");
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].msg_id, "m3");
}

#[tokio::test]
async fn search_requires_query() {
    let db = Store::open(&temp_db_path()).await.expect("open store");
    assert!(
        db.search_messages("   ", SearchOptions::default())
            .await
            .is_err()
    );
}
