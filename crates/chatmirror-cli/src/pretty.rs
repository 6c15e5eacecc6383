//! Terminal output formatting for the chatmirror CLI.

use chatmirror_core::models::{Chat, Contact, Group, GroupParticipant, Message};
use chrono::{DateTime, Local, Utc};
use console::{Style, Term, style};

const HIGHLIGHT_START: &str = "\x1b[1;33m";
const HIGHLIGHT_END: &str = "\x1b[0m";

/// Terminal width for formatting, with fallback.
fn term_width() -> usize {
    Term::stdout().size().1 as usize
}

/// Format a relative time string (e.g., "2 days ago", "just now").
fn relative_time(dt: DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(dt);

    if duration.num_seconds() < 60 {
        return "just now".to_string();
    }
    if duration.num_minutes() < 60 {
        let mins = duration.num_minutes();
        return format!("{mins} min{s} ago", s = if mins == 1 { "" } else { "s" });
    }
    if duration.num_hours() < 24 {
        let hours = duration.num_hours();
        return format!("{hours} hour{s} ago", s = if hours == 1 { "" } else { "s" });
    }
    if duration.num_days() < 7 {
        let days = duration.num_days();
        return format!("{days} day{s} ago", s = if days == 1 { "" } else { "s" });
    }

    dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn sender_style(from_me: bool) -> Style {
    if from_me {
        Style::new().green().bold()
    } else {
        Style::new().cyan().bold()
    }
}

/// Render `[match]` markers from full-text snippets. Without colors the
/// brackets are kept as they are.
fn highlight_snippet(s: &str, use_color: bool) -> String {
    let clean = s.replace('\n', " ");
    if !use_color {
        return clean;
    }
    let mut out = clean.replace('[', HIGHLIGHT_START).replace(']', HIGHLIGHT_END);
    if out.matches(HIGHLIGHT_START).count() > out.matches(HIGHLIGHT_END).count() {
        out.push_str(HIGHLIGHT_END);
    }
    out
}

/// Wrap text to the terminal width, indenting continuation lines.
fn wrap_text(s: &str, indent: usize, max_lines: usize) -> String {
    let width = term_width().saturating_sub(indent + 2).max(40);
    textwrap::wrap(s, width)
        .into_iter()
        .take(max_lines)
        .map(|line| line.to_string())
        .collect::<Vec<_>>()
        .join(&format!("\n{:indent$}", ""))
}

fn sender_label(msg: &Message) -> String {
    msg.sender_name
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .or(msg.sender_jid.as_deref())
        .unwrap_or("?")
        .to_string()
}

/// Print messages, oldest last. `focus` marks one message id (context view).
pub fn print_messages(messages: &[Message], focus: Option<&str>) {
    if messages.is_empty() {
        println!("{}", style("No messages found.").dim());
        return;
    }

    let use_color = console::colors_enabled();
    for msg in messages {
        let marker = if focus == Some(msg.msg_id.as_str()) {
            style(">").yellow().bold().to_string()
        } else {
            " ".to_string()
        };
        let chat = msg.chat_name.as_deref().unwrap_or(&msg.chat_jid);
        println!(
            "{marker} {} {} {} {}",
            style(relative_time(msg.timestamp)).dim(),
            style(chat).white(),
            sender_style(msg.from_me).apply_to(sender_label(msg)),
            style(format!("[{}]", msg.msg_id)).dim(),
        );

        let body = match &msg.snippet {
            Some(snippet) => highlight_snippet(snippet, use_color),
            None => msg.render_text(),
        };
        let mut body = wrap_text(&body, 4, 6);
        if let Some(path) = &msg.local_path {
            body.push_str(&format!("\n    {}", style(path).dim()));
        }
        println!("    {body}");
    }
}

pub fn print_chats(chats: &[Chat]) {
    if chats.is_empty() {
        println!("{}", style("No chats found.").dim());
        return;
    }
    for chat in chats {
        let last = chat
            .last_message_at
            .map(relative_time)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} | {} | {} | {}",
            chat.jid,
            chat.kind,
            chat.name.as_deref().unwrap_or("(unnamed)"),
            style(last).dim()
        );
    }
}

pub fn print_contact(contact: &Contact) {
    println!(
        "{}",
        style(contact.display_name().unwrap_or(&contact.jid)).bold()
    );
    println!("JID:      {}", contact.jid);
    let fields = [
        ("Phone", &contact.phone),
        ("Alias", &contact.alias),
        ("Full", &contact.full_name),
        ("Push", &contact.push_name),
        ("First", &contact.first_name),
        ("Business", &contact.business_name),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            println!("{:<10}{value}", format!("{label}:"));
        }
    }
    if !contact.tags.is_empty() {
        println!("Tags:     {}", contact.tags.join(", "));
    }
}

pub fn print_contacts(contacts: &[Contact]) {
    if contacts.is_empty() {
        println!("{}", style("No contacts found.").dim());
        return;
    }
    for contact in contacts {
        println!(
            "{} | {}",
            contact.jid,
            contact.display_name().unwrap_or("-")
        );
    }
}

pub fn print_groups(groups: &[Group]) {
    if groups.is_empty() {
        println!("{}", style("No groups found.").dim());
        return;
    }
    for group in groups {
        let created = group
            .created_at
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} | {} | {}",
            group.jid,
            group.name.as_deref().unwrap_or("(unnamed)"),
            style(created).dim()
        );
    }
}

pub fn print_group(group: &Group, participants: &[GroupParticipant]) {
    println!(
        "{}",
        style(group.name.as_deref().unwrap_or(&group.jid)).bold()
    );
    println!("JID:    {}", group.jid);
    if let Some(owner) = &group.owner_jid {
        println!("Owner:  {owner}");
    }
    println!("Members ({}):", participants.len());
    for participant in participants {
        println!("  {} ({})", participant.user_jid, participant.role);
    }
}
