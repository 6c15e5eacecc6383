//! chatmirror CLI - query the local message mirror and send messages

use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};
use chatmirror_core::db::{ListMessagesOptions, SearchOptions, StoreOptions};
use chatmirror_core::{Config, Store};
use chatmirror_runtime::{GatewayClient, SendRequest, SendResponse};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod pretty;

#[derive(Debug, Parser)]
#[command(
    name = "chatmirror",
    author,
    version,
    about = "Local mirror of a messaging account",
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print JSON instead of formatted text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Query stored messages
    Messages {
        #[command(subcommand)]
        command: MessagesCommand,
    },

    /// Query chats
    Chats {
        #[command(subcommand)]
        command: ChatsCommand,
    },

    /// Query and annotate contacts
    Contacts {
        #[command(subcommand)]
        command: ContactsCommand,
    },

    /// Query groups
    Groups {
        #[command(subcommand)]
        command: GroupsCommand,
    },

    /// Send through the running sync process
    Send {
        #[command(subcommand)]
        command: SendCommand,
    },

    /// Show store statistics
    Stats,

    /// List applied schema migrations
    Migrations,
}

#[derive(Debug, Subcommand)]
enum MessagesCommand {
    /// List messages, newest first
    List {
        /// Filter by chat
        #[arg(long)]
        chat: Option<String>,

        /// Only messages after this time (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_time)]
        after: Option<DateTime<Utc>>,

        /// Only messages before this time (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_time)]
        before: Option<DateTime<Utc>>,

        /// Maximum results
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Search message text
    Search {
        /// Search query
        query: String,

        /// Filter by chat
        #[arg(long)]
        chat: Option<String>,

        /// Filter by sender
        #[arg(long)]
        from: Option<String>,

        /// Filter by media type (image, video, gif, audio, document, sticker)
        #[arg(long = "type")]
        media_type: Option<String>,

        #[arg(long, value_parser = parse_time)]
        after: Option<DateTime<Utc>>,

        #[arg(long, value_parser = parse_time)]
        before: Option<DateTime<Utc>>,

        /// Maximum results
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Show one message
    Show {
        #[arg(long)]
        chat: String,

        #[arg(long)]
        id: String,
    },

    /// Show a message with its neighbours
    Context {
        #[arg(long)]
        chat: String,

        #[arg(long)]
        id: String,

        /// Older messages to include
        #[arg(long, default_value = "5")]
        before: i64,

        /// Newer messages to include
        #[arg(long, default_value = "5")]
        after: i64,
    },
}

#[derive(Debug, Subcommand)]
enum ChatsCommand {
    /// List chats by recent activity
    List {
        /// Filter by name or identifier
        #[arg(long)]
        query: Option<String>,

        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Show one chat
    Show { jid: String },
}

#[derive(Debug, Subcommand)]
enum ContactsCommand {
    /// Search contacts by name, phone or identifier
    Search {
        query: String,

        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Show one contact
    Show { jid: String },

    /// Manage a contact's local alias
    Alias {
        #[command(subcommand)]
        command: AliasCommand,
    },

    /// Manage a contact's local tags
    Tags {
        #[command(subcommand)]
        command: TagCommand,
    },
}

#[derive(Debug, Subcommand)]
enum AliasCommand {
    /// Set the alias
    Set { jid: String, alias: String },

    /// Remove the alias
    Rm { jid: String },
}

#[derive(Debug, Subcommand)]
enum TagCommand {
    /// Add a tag
    Add { jid: String, tag: String },

    /// Remove a tag
    Rm { jid: String, tag: String },

    /// List tags
    List { jid: String },
}

#[derive(Debug, Subcommand)]
enum GroupsCommand {
    /// List groups
    List {
        #[arg(long)]
        query: Option<String>,

        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Show a group with its participants
    Show { jid: String },
}

#[derive(Debug, Subcommand)]
enum SendCommand {
    /// Send a text message
    Text {
        /// Recipient: phone number or full identifier
        #[arg(long)]
        to: String,

        #[arg(long)]
        message: String,
    },

    /// Send a file as image, video, audio or document
    File {
        #[arg(long)]
        to: String,

        #[arg(long)]
        file: PathBuf,

        /// Display filename (defaults to the file's name)
        #[arg(long)]
        filename: Option<String>,

        #[arg(long)]
        caption: Option<String>,

        /// MIME type override
        #[arg(long)]
        mime: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over -v
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load config
    let config_path = cli.config.unwrap_or_else(Config::default_config_path);
    let config = Config::ensure_at(&config_path)?;
    let json = cli.json;

    if let Command::Send { command } = cli.command {
        return cmd_send(&config, command, json).await;
    }

    let layout = config.layout();
    let store = Store::open_with(
        &layout.store_db(),
        StoreOptions {
            full_text: config.search.full_text,
        },
    )
    .await?;

    let result = match cli.command {
        Command::Messages { command } => cmd_messages(&store, command, json).await,
        Command::Chats { command } => cmd_chats(&store, command, json).await,
        Command::Contacts { command } => cmd_contacts(&store, command, json).await,
        Command::Groups { command } => cmd_groups(&store, command, json).await,
        Command::Stats => cmd_stats(&store, json).await,
        Command::Migrations => cmd_migrations(&store, json).await,
        Command::Send { .. } => Ok(()),
    };
    store.close().await;
    result
}

async fn cmd_messages(store: &Store, command: MessagesCommand, json: bool) -> Result<()> {
    match command {
        MessagesCommand::List {
            chat,
            after,
            before,
            limit,
        } => {
            let messages = store
                .list_messages(ListMessagesOptions {
                    chat_jid: chat,
                    after,
                    before,
                    limit: Some(limit),
                })
                .await?;
            output(json, &messages, || pretty::print_messages(&messages, None))
        }
        MessagesCommand::Search {
            query,
            chat,
            from,
            media_type,
            after,
            before,
            limit,
        } => {
            let opts = SearchOptions {
                chat_jid: chat,
                sender_jid: from,
                media_type,
                after,
                before,
                limit: Some(limit),
            };
            let messages = store.search_messages(&query, opts).await?;
            if !store.has_search_index() {
                tracing::debug!("Full-text index unavailable, used substring search");
            }
            output(json, &messages, || pretty::print_messages(&messages, None))
        }
        MessagesCommand::Show { chat, id } => {
            let message = store
                .get_message(&chat, &id)
                .await?
                .ok_or_else(|| anyhow!("Message not found: {id} in {chat}"))?;
            output(json, &message, || {
                pretty::print_messages(std::slice::from_ref(&message), None);
            })
        }
        MessagesCommand::Context {
            chat,
            id,
            before,
            after,
        } => {
            let messages = store.message_context(&chat, &id, before, after).await?;
            output(json, &messages, || {
                pretty::print_messages(&messages, Some(&id));
            })
        }
    }
}

async fn cmd_chats(store: &Store, command: ChatsCommand, json: bool) -> Result<()> {
    match command {
        ChatsCommand::List { query, limit } => {
            let chats = store.list_chats(query.as_deref(), Some(limit)).await?;
            output(json, &chats, || pretty::print_chats(&chats))
        }
        ChatsCommand::Show { jid } => {
            let chat = store
                .get_chat(&jid)
                .await?
                .ok_or_else(|| anyhow!("Chat not found: {jid}"))?;
            output(json, &chat, || {
                pretty::print_chats(std::slice::from_ref(&chat));
            })
        }
    }
}

async fn cmd_contacts(store: &Store, command: ContactsCommand, json: bool) -> Result<()> {
    match command {
        ContactsCommand::Search { query, limit } => {
            let contacts = store.search_contacts(&query, Some(limit)).await?;
            output(json, &contacts, || pretty::print_contacts(&contacts))
        }
        ContactsCommand::Show { jid } => {
            let contact = store
                .get_contact(&jid)
                .await?
                .ok_or_else(|| anyhow!("Contact not found: {jid}"))?;
            output(json, &contact, || pretty::print_contact(&contact))
        }
        ContactsCommand::Alias { command } => match command {
            AliasCommand::Set { jid, alias } => {
                store.set_alias(&jid, &alias).await?;
                println!("Set alias for {jid}: {}", alias.trim());
                Ok(())
            }
            AliasCommand::Rm { jid } => {
                store.remove_alias(&jid).await?;
                println!("Removed alias for {jid}");
                Ok(())
            }
        },
        ContactsCommand::Tags { command } => match command {
            TagCommand::Add { jid, tag } => {
                store.add_tag(&jid, &tag).await?;
                println!("Tagged {jid}: {}", tag.trim());
                Ok(())
            }
            TagCommand::Rm { jid, tag } => {
                store.remove_tag(&jid, &tag).await?;
                println!("Removed tag from {jid}: {}", tag.trim());
                Ok(())
            }
            TagCommand::List { jid } => {
                let tags = store.list_tags(&jid).await?;
                output(json, &tags, || {
                    for tag in &tags {
                        println!("{tag}");
                    }
                })
            }
        },
    }
}

async fn cmd_groups(store: &Store, command: GroupsCommand, json: bool) -> Result<()> {
    match command {
        GroupsCommand::List { query, limit } => {
            let groups = store.list_groups(query.as_deref(), Some(limit)).await?;
            output(json, &groups, || pretty::print_groups(&groups))
        }
        GroupsCommand::Show { jid } => {
            let group = store
                .list_groups(Some(&jid), None)
                .await?
                .into_iter()
                .find(|group| group.jid == jid)
                .ok_or_else(|| anyhow!("Group not found: {jid}"))?;
            let participants = store.group_participants(&jid).await?;

            #[derive(Serialize)]
            struct GroupView<'a> {
                #[serde(flatten)]
                group: &'a chatmirror_core::models::Group,
                participants: &'a [chatmirror_core::models::GroupParticipant],
            }
            let view = GroupView {
                group: &group,
                participants: &participants,
            };
            output(json, &view, || pretty::print_group(&group, &participants))
        }
    }
}

async fn cmd_send(config: &Config, command: SendCommand, json: bool) -> Result<()> {
    let req = match command {
        SendCommand::Text { to, message } => SendRequest::text(to, message),
        SendCommand::File {
            to,
            file,
            filename,
            caption,
            mime,
        } => {
            let path = std::path::absolute(&file)?;
            SendRequest {
                filename: filename.unwrap_or_default(),
                caption: caption.unwrap_or_default(),
                mime: mime.unwrap_or_default(),
                ..SendRequest::file(to, path.to_string_lossy())
            }
        }
    };

    let socket = config.layout().send_socket();
    let timeout = if req.is_file() {
        config.gateway.file_timeout_secs
    } else {
        config.gateway.text_timeout_secs
    };
    let client = GatewayClient::new(&socket).with_timeout(std::time::Duration::from_secs(timeout));

    let Some(response) = client.send(&req).await? else {
        bail!(
            "No send gateway at {}. Start a follow-mode sync to send messages.",
            socket.display()
        );
    };
    output(json, &response, || print_sent(&response))
}

fn print_sent(response: &SendResponse) {
    let id = response.id.as_deref().unwrap_or("-");
    let to = response.to.as_deref().unwrap_or("-");
    match &response.file {
        Some(file) => println!(
            "Sent {} {} ({}) to {to} [{id}]",
            file.media, file.name, file.mime_type
        ),
        None => println!("Sent message to {to} [{id}]"),
    }
}

async fn cmd_stats(store: &Store, json: bool) -> Result<()> {
    let stats = store.stats().await?;
    output(json, &stats, || {
        println!("Store Statistics");
        println!("----------------");
        println!("Chats:      {}", stats.chats);
        println!("Messages:   {}", stats.messages);
        println!("Contacts:   {}", stats.contacts);
        println!("Groups:     {}", stats.groups);
        println!("Media:      {}", stats.media_downloaded);
        println!(
            "Search:     {}",
            if store.has_search_index() {
                "full-text"
            } else {
                "substring"
            }
        );
    })
}

async fn cmd_migrations(store: &Store, json: bool) -> Result<()> {
    let applied = store.applied_migrations().await?;
    output(json, &applied, || {
        for migration in &applied {
            let at = DateTime::from_timestamp(migration.applied_at, 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            println!("{:>3} | {} | {at}", migration.version, migration.name);
        }
    })
}

/// Print `value` as JSON when requested, else run the formatter.
fn output<T: Serialize>(json: bool, value: &T, pretty: impl FnOnce()) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        pretty();
    }
    Ok(())
}

/// Parse an RFC 3339 timestamp or a plain date (midnight UTC).
fn parse_time(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid time '{value}', expected RFC 3339 or YYYY-MM-DD"))
}
