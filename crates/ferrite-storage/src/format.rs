//! `.format.json`: the one-time format identity a drive carries. Every
//! drive operation checks its caller-supplied id against this file before
//! doing anything else.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatFile {
    pub version: String,
    pub format: String,
    pub id: Uuid,
    pub erasure: FormatErasure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatErasure {
    pub version: String,
    /// This drive's own id within the deployment; must be non-empty except
    /// during the bootstrap window, when legacy empty values are healed at
    /// startup.
    pub this: Uuid,
    pub sets: Vec<Vec<Uuid>>,
    pub distribution_algo: String,
}

impl FormatFile {
    pub fn new(deployment_id: Uuid, this_drive: Uuid, sets: Vec<Vec<Uuid>>) -> Self {
        Self {
            version: "1".to_string(),
            format: "erasure".to_string(),
            id: deployment_id,
            erasure: FormatErasure {
                version: "3".to_string(),
                this: this_drive,
                sets,
                distribution_algo: "SIPMOD".to_string(),
            },
        }
    }
}
