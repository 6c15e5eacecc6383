//! Unit tests for domain models.

use super::*;

#[cfg(test)]
mod chat_kind_tests {
    use super::*;

    #[test]
    fn display_matches_stored_names() {
        assert_eq!(ChatKind::Direct.to_string(), "dm");
        assert_eq!(ChatKind::Group.to_string(), "group");
        assert_eq!(ChatKind::Broadcast.to_string(), "broadcast");
        assert_eq!(ChatKind::Unknown.to_string(), "unknown");
    }

    #[test]
    fn from_stored_names() {
        assert_eq!(ChatKind::from("dm"), ChatKind::Direct);
        assert_eq!(ChatKind::from("GROUP"), ChatKind::Group);
        assert_eq!(ChatKind::from("broadcast"), ChatKind::Broadcast);
        assert_eq!(ChatKind::from(""), ChatKind::Unknown);
        assert_eq!(ChatKind::from("newsletter"), ChatKind::Unknown);
    }
}

#[cfg(test)]
mod participant_role_tests {
    use super::*;

    #[test]
    fn empty_role_is_member() {
        assert_eq!(ParticipantRole::from(""), ParticipantRole::Member);
        assert_eq!(ParticipantRole::from("  "), ParticipantRole::Member);
    }

    #[test]
    fn admin_roles() {
        assert_eq!(ParticipantRole::from("admin"), ParticipantRole::Admin);
        assert_eq!(
            ParticipantRole::from("SuperAdmin"),
            ParticipantRole::Superadmin
        );
    }
}

#[cfg(test)]
mod media_kind_tests {
    use super::*;

    #[test]
    fn labels() {
        assert_eq!(MediaKind::Image.label(), "Sent image");
        assert_eq!(MediaKind::Video.label(), "Sent video");
        assert_eq!(MediaKind::Gif.label(), "Sent gif");
        assert_eq!(MediaKind::Audio.label(), "Sent audio");
        assert_eq!(MediaKind::Document.label(), "Sent document");
        assert_eq!(MediaKind::Sticker.label(), "Sent sticker");
    }

    #[test]
    fn parse_round_trips_names() {
        for kind in [
            MediaKind::Image,
            MediaKind::Video,
            MediaKind::Gif,
            MediaKind::Audio,
            MediaKind::Document,
            MediaKind::Sticker,
        ] {
            assert_eq!(MediaKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MediaKind::parse("location"), None);
    }

    #[test]
    fn classifies_mime_prefixes() {
        assert_eq!(MediaKind::from_mime("image/png"), MediaKind::Image);
        assert_eq!(MediaKind::from_mime("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_mime("audio/ogg"), MediaKind::Audio);
        assert_eq!(MediaKind::from_mime("application/pdf"), MediaKind::Document);
        assert_eq!(MediaKind::from_mime(""), MediaKind::Document);
    }
}

#[cfg(test)]
mod contact_tests {
    use super::*;

    #[test]
    fn best_name_prefers_full_name() {
        let info = ContactInfo {
            found: true,
            full_name: "Alice Liddell".to_string(),
            push_name: "ali".to_string(),
            ..ContactInfo::default()
        };
        assert_eq!(info.best_name().as_deref(), Some("Alice Liddell"));
    }

    #[test]
    fn best_name_skips_placeholder_push_name() {
        let info = ContactInfo {
            found: true,
            push_name: "-".to_string(),
            ..ContactInfo::default()
        };
        assert_eq!(info.best_name(), None);
    }

    #[test]
    fn best_name_requires_found() {
        let info = ContactInfo {
            found: false,
            full_name: "Nobody".to_string(),
            ..ContactInfo::default()
        };
        assert_eq!(info.best_name(), None);
    }

    #[test]
    fn display_name_prefers_alias() {
        let contact = Contact {
            jid: "1@s.whatsapp.net".to_string(),
            phone: Some("1".to_string()),
            push_name: Some("push".to_string()),
            full_name: Some("Full".to_string()),
            first_name: None,
            business_name: None,
            alias: Some("Mom".to_string()),
            tags: Vec::new(),
            updated_at: None,
        };
        assert_eq!(contact.display_name(), Some("Mom"));
    }
}

#[cfg(test)]
mod message_tests {
    use super::*;

    fn message() -> Message {
        Message {
            chat_jid: "1@s.whatsapp.net".to_string(),
            chat_name: None,
            msg_id: "m1".to_string(),
            sender_jid: None,
            sender_name: None,
            timestamp: Utc::now(),
            from_me: false,
            text: None,
            display_text: None,
            media_type: None,
            media_caption: None,
            filename: None,
            local_path: None,
            reaction_to_id: None,
            reaction_emoji: None,
            reply_to_id: None,
            reply_to_display: None,
            snippet: None,
        }
    }

    #[test]
    fn render_prefers_display_text() {
        let mut msg = message();
        msg.text = Some("raw".to_string());
        msg.display_text = Some("shown".to_string());
        assert_eq!(msg.render_text(), "shown");
    }

    #[test]
    fn render_falls_back_to_media_label() {
        let mut msg = message();
        msg.media_type = Some("sticker".to_string());
        assert_eq!(msg.render_text(), "Sent sticker");
    }

    #[test]
    fn download_needs_locator_and_key() {
        let mut media = MediaDescriptor::new(MediaKind::Image);
        let mut info = MediaDownloadInfo {
            chat_jid: "c".to_string(),
            chat_name: None,
            msg_id: "m".to_string(),
            media: Some(media.clone()),
            local_path: None,
            downloaded_at: None,
        };
        assert!(!info.needs_download());

        media.direct_path = Some("/v/t62/abc".to_string());
        media.media_key = vec![1, 2, 3];
        info.media = Some(media);
        assert!(info.needs_download());

        info.downloaded_at = Some(Utc::now());
        assert!(!info.needs_download());
    }
}
