use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InputIdentifier {
    pub identifier: String,
    pub kind: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputAttemptCount {
    pub identifier: String,
    pub kind: Option<String>,
    pub attempts: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputBlockStatus {
    pub blocked: bool,
    /// Seconds since the Unix epoch. `None` when not blocked or blocked with no expiry.
    pub blocked_until: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputThrottleRecord {
    pub identifier: String,
    pub kind: Option<String>,
    pub attempts: i32,
    pub blocked: bool,
    pub blocked_until: Option<u64>,
}
