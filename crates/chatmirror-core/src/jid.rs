//! Helpers for remote identifiers (`user@server`, optionally with a device
//! suffix `user:device@server`).

use crate::error::{Error, Result};
use crate::models::ChatKind;

pub const USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";
pub const BROADCAST_SERVER: &str = "broadcast";

/// Server part of an identifier, or the empty string.
pub fn server(jid: &str) -> &str {
    jid.rsplit_once('@').map(|(_, server)| server).unwrap_or("")
}

/// User part of an identifier with any device suffix removed.
pub fn user(jid: &str) -> &str {
    let user = jid.split_once('@').map_or(jid, |(user, _)| user);
    user.split_once(':').map_or(user, |(user, _)| user)
}

/// Classify a chat identifier by its server.
pub fn chat_kind(jid: &str) -> ChatKind {
    match server(jid) {
        GROUP_SERVER => ChatKind::Group,
        BROADCAST_SERVER => ChatKind::Broadcast,
        USER_SERVER => ChatKind::Direct,
        _ => ChatKind::Unknown,
    }
}

/// Strip the device suffix so per-device identifiers map to one contact.
pub fn to_non_device(jid: &str) -> String {
    match jid.split_once('@') {
        Some((user_part, server)) => {
            let user = user_part.split_once(':').map_or(user_part, |(user, _)| user);
            format!("{user}@{server}")
        }
        None => jid.to_string(),
    }
}

/// Parse a recipient given either as a full identifier or a bare phone
/// number, which is mapped onto the user server.
pub fn parse_recipient(input: &str) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidRequest("recipient is required".to_string()));
    }

    if input.contains('@') {
        let (user, server) = input
            .split_once('@')
            .ok_or_else(|| Error::InvalidRequest(format!("invalid identifier: {input}")))?;
        if server.is_empty() || server.contains('@') {
            return Err(Error::InvalidRequest(format!("invalid identifier: {input}")));
        }
        if user.is_empty() && server != BROADCAST_SERVER {
            return Err(Error::InvalidRequest(format!("invalid identifier: {input}")));
        }
        return Ok(input.to_string());
    }

    let digits: String = input
        .trim_start_matches('+')
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::InvalidRequest(format!(
            "invalid phone number: {input}"
        )));
    }
    Ok(format!("{digits}@{USER_SERVER}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_servers() {
        assert_eq!(chat_kind("123@s.whatsapp.net"), ChatKind::Direct);
        assert_eq!(chat_kind("123-456@g.us"), ChatKind::Group);
        assert_eq!(chat_kind("status@broadcast"), ChatKind::Broadcast);
        assert_eq!(chat_kind("123@lid"), ChatKind::Unknown);
        assert_eq!(chat_kind("garbage"), ChatKind::Unknown);
    }

    #[test]
    fn strips_device_suffix() {
        assert_eq!(to_non_device("123:7@s.whatsapp.net"), "123@s.whatsapp.net");
        assert_eq!(to_non_device("123@s.whatsapp.net"), "123@s.whatsapp.net");
        assert_eq!(user("123:7@s.whatsapp.net"), "123");
    }

    #[test]
    fn phone_numbers_map_to_user_server() {
        assert_eq!(
            parse_recipient("+1 555-0100").expect("parse"),
            "15550100@s.whatsapp.net"
        );
        assert_eq!(
            parse_recipient("123-456@g.us").expect("parse"),
            "123-456@g.us"
        );
    }

    #[test]
    fn rejects_bad_recipients() {
        assert!(parse_recipient("").is_err());
        assert!(parse_recipient("not a number").is_err());
        assert!(parse_recipient("user@").is_err());
    }
}
