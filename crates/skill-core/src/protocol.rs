//! Bus wire protocol.
//!
//! Every message is a JSON object with a `type` field, addressed to a
//! service key. Replies use [`BusResponse`].

use crate::events::InstallEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Service key the skill manager responds under.
pub const SKILL_SERVICE_KEY: &str = "everlife-skill-svc";

/// Service key of the communication relay (chat routing).
pub const COMMUNICATION_SERVICE_KEY: &str = "everlife-communication-svc";

/// Service key of the persistent store.
pub const STORE_SERVICE_KEY: &str = "everlife-db-svc";

/// Requests handled by the skill manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SkillRequest {
    /// Install (or upgrade) a package and start it.
    Add {
        #[serde(default)]
        pkg: Option<String>,
    },
    /// A chat message offered by the communication relay.
    Msg {
        #[serde(default)]
        msg: Option<String>,
        /// Opaque routing data; echoed back on replies.
        #[serde(default)]
        addl: Option<Value>,
    },
    /// Stop and delete a user-installed skill.
    Remove {
        #[serde(default)]
        name: Option<String>,
    },
    /// List supervised processes.
    List,
}

/// Help entry announced to the communication relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandHelp {
    pub cmd: String,
    pub txt: String,
}

/// Messages sent to the communication relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayMessage {
    /// Ask the relay to forward matching chat messages to `mskey`.
    RegisterMsgHandler {
        mskey: String,
        mstype: String,
        mshelp: Vec<CommandHelp>,
    },
    /// Text for the human on the other side of a chat.
    Reply { msg: String, addl: Value },
}

/// Messages sent to the persistent store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StoreMessage {
    Record { event: InstallEvent },
}

/// Reply envelope for every bus request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BusResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BusResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(message.into()),
        }
    }

    /// Convert into a `Result`, treating a missing result as `null`.
    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Running process entry returned by `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub name: String,
    pub pid: Option<u32>,
    pub log_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_without_pkg_deserializes() {
        let req: SkillRequest = serde_json::from_value(json!({ "type": "add" })).unwrap();
        assert_eq!(req, SkillRequest::Add { pkg: None });
    }

    #[test]
    fn msg_keeps_addl_blob() {
        let req: SkillRequest = serde_json::from_value(json!({
            "type": "msg",
            "msg": "/install foo",
            "addl": { "chan": "telegram", "ctx": 42 }
        }))
        .unwrap();
        match req {
            SkillRequest::Msg { msg, addl } => {
                assert_eq!(msg.as_deref(), Some("/install foo"));
                assert_eq!(addl.unwrap()["ctx"], 42);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result = serde_json::from_value::<SkillRequest>(json!({ "type": "explode" }));
        assert!(result.is_err());
    }

    #[test]
    fn register_message_uses_kebab_case_type() {
        let msg = RelayMessage::RegisterMsgHandler {
            mskey: SKILL_SERVICE_KEY.to_string(),
            mstype: "msg".to_string(),
            mshelp: vec![],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "register-msg-handler");
        assert_eq!(json["mskey"], SKILL_SERVICE_KEY);
    }

    #[test]
    fn response_into_result() {
        assert_eq!(BusResponse::ok(json!(1)).into_result(), Ok(json!(1)));
        assert_eq!(
            BusResponse::err("boom").into_result(),
            Err("boom".to_string())
        );
        assert_eq!(BusResponse::default().into_result(), Ok(Value::Null));
    }
}
