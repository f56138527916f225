//! `/mcp.json` capability manifest.

use serde::Serialize;
use serde_json::{Value, json};
use tracker_core::constants::{NAME, VERSION};

/// A resource an external tool-calling client can read.
#[derive(Clone, Debug, Serialize)]
pub struct Resource {
    /// Resource URI template.
    pub uri: &'static str,
    /// Display name.
    pub name: &'static str,
}

/// A tool an external client can invoke.
#[derive(Clone, Debug, Serialize)]
pub struct Tool {
    /// Tool name.
    pub name: &'static str,
    /// What the tool does.
    pub description: &'static str,
    /// JSON schema of the tool input.
    pub input_schema: Value,
}

/// The full manifest.
#[derive(Clone, Debug, Serialize)]
pub struct Manifest {
    /// Server name.
    pub name: &'static str,
    /// Server version.
    pub version: &'static str,
    /// Readable resources.
    pub resources: Vec<Resource>,
    /// Invocable tools.
    pub tools: Vec<Tool>,
}

fn no_input() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// Build the manifest.
pub fn manifest() -> Manifest {
    let tool = |name, description| Tool {
        name,
        description,
        input_schema: no_input(),
    };
    Manifest {
        name: NAME,
        version: VERSION,
        resources: vec![
            Resource {
                uri: "tracker://timeline",
                name: "Timeline stream (NDJSON)",
            },
            Resource {
                uri: "tracker://frame/{frame_id}",
                name: "Frame by id (jpg)",
            },
        ],
        tools: vec![
            Tool {
                name: "mark_bookmark",
                description: "Append a bookmark to the current session log",
                input_schema: json!({
                    "type": "object",
                    "properties": { "label": { "type": "string" } }
                }),
            },
            tool("start_vision", "Start screen capture"),
            tool("stop_vision", "Stop screen capture"),
            tool("start_audio", "Start speech recognition"),
            tool("stop_audio", "Stop speech recognition"),
            tool("get_status", "Report which services are running"),
            tool("create_new_session", "Create a new capture session"),
        ],
    }
}
