use serde::Deserialize;

/// Standard upstream JSON envelope: `{ code, message, data }`.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub uid: u64,
    pub name: String,
    #[serde(default)]
    pub live_room_id: Option<u64>,
}

/// One feed item, newest-first in the upstream response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Post {
    /// String id: the upstream uses 64-bit+ ids that overflow JSON numbers.
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub author: String,
    /// Unix seconds; absent for some legacy item kinds.
    #[serde(default)]
    pub published_at: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FeedData {
    #[serde(default)]
    pub items: Vec<Post>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomStatus {
    pub room_id: u64,
    /// 0 = offline, 1 = live, 2 = rerun/loop.
    pub live_status: u8,
    #[serde(default)]
    pub title: String,
    /// Current viewer count when the room is live.
    #[serde(default)]
    pub online: Option<u64>,
    #[serde(default)]
    pub cover: Option<String>,
}

impl RoomStatus {
    /// Only an actual live session counts; reruns are not transitions.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live_status == 1
    }
}

/// Canonical room-id resolution payload.
#[derive(Debug, Deserialize)]
pub struct RoomInit {
    pub room_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushHost {
    pub host: String,
    pub wss_port: u16,
}

/// Push-channel join credentials: short-lived token plus candidate hosts.
#[derive(Debug, Clone, Deserialize)]
pub struct PushCredentials {
    pub token: String,
    #[serde(default)]
    pub host_list: Vec<PushHost>,
}

/// Rotating signing key pair as served by the key endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SignKeysData {
    pub key_a: String,
    pub key_b: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_status_live_flag() {
        let offline = RoomStatus {
            room_id: 1,
            live_status: 0,
            title: String::new(),
            online: None,
            cover: None,
        };
        assert!(!offline.is_live());

        let rerun = RoomStatus { live_status: 2, ..offline.clone() };
        assert!(!rerun.is_live());

        let live = RoomStatus { live_status: 1, ..offline };
        assert!(live.is_live());
    }

    #[test]
    fn post_deserializes_with_defaults() {
        let post: Post = serde_json::from_str(r#"{"id": "98765"}"#).unwrap();
        assert_eq!(post.id, "98765");
        assert!(post.text.is_empty());
        assert!(post.published_at.is_none());
    }
}
