//! Keyboard key validation and CDP key-event payload construction.
//!
//! Accepts a single key name (`Enter`, `a`, `ArrowLeft`) or a chord with
//! leading modifiers (`Control+c`, `Shift+ArrowRight`). Anything outside the
//! known-key table is rejected before a session is touched.

use serde_json::{json, Value};

use crate::errors::{ToolError, ToolResult};

// CDP Input.dispatchKeyEvent modifier bits.
const MOD_ALT: u32 = 1;
const MOD_CTRL: u32 = 2;
const MOD_META: u32 = 4;
const MOD_SHIFT: u32 = 8;

const NAMED_KEYS: &[&str] = &[
    "Enter", "Tab", "Escape", "Backspace", "Delete", "Insert", "Home", "End", "PageUp",
    "PageDown", "ArrowUp", "ArrowDown", "ArrowLeft", "ArrowRight", "F1", "F2", "F3", "F4",
    "F5", "F6", "F7", "F8", "F9", "F10", "F11", "F12", "Space",
];

/// A parsed key press: the key itself plus any modifier bits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyChord {
    pub key: String,
    pub modifiers: u32,
}

impl KeyChord {
    /// Parse `"Control+Shift+x"` style specs. The last segment is the key;
    /// everything before it must be a modifier name.
    pub fn parse(spec: &str) -> ToolResult<Self> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(ToolError::Validation("key must not be empty".into()));
        }

        let mut parts: Vec<&str> = trimmed.split('+').collect();
        let key = parts
            .pop()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ToolError::Validation(format!("malformed key spec '{spec}'")))?;

        let mut modifiers = 0u32;
        for part in parts {
            modifiers |= match part {
                "Alt" => MOD_ALT,
                "Control" | "Ctrl" => MOD_CTRL,
                "Meta" | "Cmd" | "Command" => MOD_META,
                "Shift" => MOD_SHIFT,
                other => {
                    return Err(ToolError::Validation(format!(
                        "unknown modifier '{other}' in key spec '{spec}'"
                    )))
                }
            };
        }

        if !is_known_key(key) {
            return Err(ToolError::Validation(format!(
                "unknown key '{key}' (expected a single character or one of {})",
                NAMED_KEYS.join(", ")
            )));
        }

        Ok(Self {
            key: key.to_string(),
            modifiers,
        })
    }

    fn cdp_key(&self) -> &str {
        if self.key == "Space" {
            " "
        } else {
            &self.key
        }
    }

    /// Text inserted by this press, for printable keys without a chord that
    /// would suppress insertion.
    fn text(&self) -> Option<String> {
        if self.modifiers & (MOD_CTRL | MOD_META | MOD_ALT) != 0 {
            return None;
        }
        match self.key.as_str() {
            "Enter" => Some("\r".to_string()),
            "Space" => Some(" ".to_string()),
            key if key.chars().count() == 1 => Some(key.to_string()),
            _ => None,
        }
    }

    /// The keyDown/keyUp payload pair for `Input.dispatchKeyEvent`.
    pub fn payloads(&self) -> (Value, Value) {
        let mut down = json!({
            "type": "keyDown",
            "key": self.cdp_key(),
            "modifiers": self.modifiers,
        });
        if let Some(text) = self.text() {
            down["text"] = Value::String(text.clone());
            down["unmodifiedText"] = Value::String(text);
        } else {
            // No character output; a raw key press is enough.
            down["type"] = Value::String("rawKeyDown".to_string());
        }
        let up = json!({
            "type": "keyUp",
            "key": self.cdp_key(),
            "modifiers": self.modifiers,
        });
        (down, up)
    }
}

fn is_known_key(key: &str) -> bool {
    NAMED_KEYS.contains(&key) || (key.chars().count() == 1 && !key.chars().next().is_some_and(char::is_control))
}
