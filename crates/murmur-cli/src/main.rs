mod command;
mod render;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use murmur_db::SqliteRecords;
use murmur_db::migrations::GENERAL_CHANNEL_ID;
use murmur_gateway::Hub;
use murmur_sync::{ChatState, ChatStore, ChatView, Key, SyncConfig};

use crate::command::Command;
use crate::render::Renderer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging on stderr; stdout is the chat
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Config
    let config = SyncConfig::from_env()?;
    let db_path = std::env::var("MURMUR_DB_PATH").unwrap_or_else(|_| "murmur.db".into());
    let username = std::env::var("MURMUR_USERNAME").unwrap_or_else(|_| "guest".into());

    // Init database and identity
    let records = Arc::new(SqliteRecords::open(&PathBuf::from(&db_path))?);
    let me = records.ensure_user(&username).await?;

    let hub = Hub::new()?;
    hub.track_presence(config.presence_topic.clone());

    let store = ChatStore::new(records, Arc::new(hub), config)?;
    store.set_current_user(Some(me.id));
    store.set_active_channel(Some(Uuid::parse_str(GENERAL_CHANNEL_ID)?));
    info!("{} joined as {}", me.username, me.id);

    let printer = tokio::spawn(print_updates(store.watch()));
    let mut composer = store.composer();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Command::Join(slug) => {
                let view = store.view();
                match view.channels.iter().find(|c| c.slug == slug) {
                    Some(channel) => {
                        store.set_active_channel(Some(channel.id));
                        println!("-- #{}", channel.slug);
                    }
                    None => println!("no channel named {}", slug),
                }
            }
            Command::New(slug) => store.add_channel(slug),
            Command::Who => println!("{}", render::who(&store.view())),
            Command::Quit => break,
            Command::Say(text) => {
                composer.key_down(Key::Other);
                composer.set_text(text);
                composer.key_up(Key::Other);
                if let Some(body) = composer.key_down(Key::Enter) {
                    store.send_message(body);
                }
                composer.key_up(Key::Enter);
            }
            Command::Empty => {}
            Command::Unknown(input) => warn!("unknown command: {}", input),
        }
    }

    printer.abort();
    store.shutdown();
    Ok(())
}

async fn print_updates(mut rx: watch::Receiver<ChatState>) {
    let mut renderer = Renderer::default();
    let mut conversation = None;

    loop {
        let view = {
            let state = rx.borrow_and_update();
            if state.conversation != conversation {
                conversation = state.conversation;
                renderer.reset_messages();
            }
            ChatView::derive(&state)
        };
        for line in renderer.render(&view) {
            println!("{}", line);
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}
