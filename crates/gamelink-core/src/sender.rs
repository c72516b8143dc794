//! Who issued a command on the game side.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity attached to "command invoked" events.
///
/// Serializes as `{"type":"PLAYER","name":..,"uuid":..}` or `{"type":"CONSOLE"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum SenderDescriptor {
    /// An online player.
    Player {
        /// Display name.
        name: String,
        /// Stable player id.
        uuid: Uuid,
    },
    /// The server console.
    Console,
}

impl SenderDescriptor {
    /// Whether this is the console.
    pub fn is_console(&self) -> bool {
        matches!(self, Self::Console)
    }
}

/// A command sender as the host command framework sees it.
pub trait CommandSource: Send + Sync {
    /// Identity reported in events.
    fn descriptor(&self) -> SenderDescriptor;

    /// Whether the sender holds the given permission tag.
    fn has_permission(&self, permission: &str) -> bool;

    /// Deliver a chat/console line back to the sender.
    fn send_message(&self, message: &str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn console_wire_shape() {
        let v = serde_json::to_value(SenderDescriptor::Console).unwrap();
        assert_eq!(v, json!({"type": "CONSOLE"}));
    }

    #[test]
    fn player_wire_shape() {
        let uuid = Uuid::nil();
        let v = serde_json::to_value(SenderDescriptor::Player {
            name: "Alex".into(),
            uuid,
        })
        .unwrap();
        assert_eq!(
            v,
            json!({"type": "PLAYER", "name": "Alex", "uuid": "00000000-0000-0000-0000-000000000000"})
        );
    }
}
