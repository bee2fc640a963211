use std::collections::HashSet;

use uuid::Uuid;

use murmur_sync::ChatView;

/// Turns successive views into the lines worth printing: messages not shown
/// yet, a changed channel list and a changed typing line.
#[derive(Default)]
pub struct Renderer {
    shown: HashSet<Uuid>,
    channels: Vec<String>,
    typing: Option<String>,
}

impl Renderer {
    pub fn render(&mut self, view: &ChatView) -> Vec<String> {
        let mut lines = Vec::new();

        let channels: Vec<String> = view.channels.iter().map(|c| c.slug.clone()).collect();
        if channels != self.channels {
            lines.push(format!("channels: {}", channels.join(", ")));
            self.channels = channels;
        }

        for item in &view.messages {
            if !self.shown.insert(item.message.id) {
                continue;
            }
            let author = item
                .author
                .as_ref()
                .and_then(|user| user.username.as_deref())
                .unwrap_or("?");
            lines.push(format!(
                "[{}] {}: {}",
                item.message.inserted_at.format("%H:%M"),
                author,
                item.message.body
            ));
        }

        let typing = view.typing_summary();
        if typing != self.typing {
            if let Some(summary) = &typing {
                lines.push(format!("({})", summary));
            }
            self.typing = typing;
        }

        lines
    }

    /// Forget printed messages, e.g. after switching conversation.
    pub fn reset_messages(&mut self) {
        self.shown.clear();
    }
}

pub fn who(view: &ChatView) -> String {
    let online: Vec<&str> = view
        .online_users()
        .filter_map(|user| user.username.as_deref())
        .collect();
    if online.is_empty() {
        "nobody is online".to_string()
    } else {
        format!("online: {}", online.join(", "))
    }
}
