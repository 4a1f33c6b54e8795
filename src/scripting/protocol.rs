//! Messages exchanged between the host and a sandbox worker.
//!
//! The host sends exactly one [`WorkerRequest`]. The worker answers with
//! [`WorkerMessage::Started`] once it has picked the request up (which arms the
//! deadline) and then a single final message.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::scripting::Primitive;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WorkerRequest {
    pub code: String,
    pub variables: BTreeMap<String, Primitive>,
    /// Names of the zero-argument action stubs to install.
    pub functions: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerMessage {
    #[serde(rename = "start")]
    Started,
    Finished {
        /// JSON array of recorded action names.
        answer: String,
        log: Option<String>,
    },
    Failed {
        message: String,
    },
}

pub fn encode_answer(actions: &[String]) -> Result<String, serde_json::Error> {
    serde_json::to_string(actions)
}

pub fn decode_answer(answer: &str) -> Result<Vec<String>, ErrorKind> {
    serde_json::from_str(answer)
        .map_err(|e| ErrorKind::ScriptError(format!("Malformed sandbox answer: {e}")))
}
