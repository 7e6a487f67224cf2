use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A chat user as tracked by the presence layer. Created implicitly on first
/// join; never deleted by this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    pub is_online: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
}
