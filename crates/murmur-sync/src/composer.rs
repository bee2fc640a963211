use crate::debounce::ActivitySignals;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Tab,
    Other,
}

/// Message input: turns key events into typing signals and submissions.
#[derive(Debug)]
pub struct Composer {
    signals: ActivitySignals,
    text: String,
}

impl Composer {
    pub fn new(signals: ActivitySignals) -> Self {
        Self {
            signals,
            text: String::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Returns the text to submit when Enter completes a non-empty message.
    pub fn key_down(&mut self, key: Key) -> Option<String> {
        match key {
            Key::Enter => {
                self.signals.stop().flush();
                let body = self.text.trim().to_string();
                self.text.clear();
                (!body.is_empty()).then_some(body)
            }
            Key::Tab => None,
            Key::Other => {
                self.signals.on_activity_start();
                None
            }
        }
    }

    pub fn key_up(&mut self, key: Key) {
        match key {
            Key::Enter => {
                self.signals.stop().cancel();
            }
            Key::Tab => {}
            Key::Other => self.signals.on_activity_stop(),
        }
    }
}
