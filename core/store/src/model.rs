//! Persisted entities.
//!
//! Field names on the wire are fixed; renaming a Rust field must keep its
//! `serde` name so existing stores still decode.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Media assigned to a user, with its watch status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignedMedia {
    /// Plex media key.
    pub id: String,
    pub title: String,
    pub status: String,
}

/// A Plex account that has been assigned media.
///
/// `plex_user_id` is the sole identity: saving a user with an existing id
/// replaces the stored record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    #[serde(rename = "plexUserID")]
    pub plex_user_id: String,
    #[serde(rename = "plexUsername")]
    pub name: String,
    #[serde(rename = "assignedMedia")]
    pub assigned_media: AssignedMedia,
    /// Set while a playback stop is being attempted.
    #[serde(rename = "stoppingPlayback")]
    pub stopping_playback: bool,
    #[serde(rename = "playbackIsStopped")]
    pub is_playback_stopped: bool,
    /// Library access should be revoked.
    #[serde(rename = "revokeAccess")]
    pub revoke_access: bool,
    /// The account is a friend of the server owner.
    #[serde(rename = "isFriend")]
    pub is_friend: bool,
}

impl User {
    /// Create a user with no assigned media and all flags cleared.
    pub fn new(plex_user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            plex_user_id: plex_user_id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Attach media to this user.
    pub fn with_media(mut self, media: AssignedMedia) -> Self {
        self.assigned_media = media;
        self
    }
}

/// The media server this installation is bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub name: String,
    pub url: String,
}

impl Server {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Pin issued by plex.tv while the owner completes sign-in out of band.
///
/// Persisted as received: fields not modelled here are kept in `extra` and
/// written back unchanged. Only present while an authorization flow is in
/// progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlexPin {
    pub id: i64,
    pub code: String,
    pub client_identifier: String,
    pub trusted: bool,
    /// Seconds until the pin expires, as reported at issue time.
    pub expires_in: i64,
    pub created_at: String,
    pub expires_at: String,
    /// `null` until the owner has signed in.
    pub auth_token: Option<String>,
    /// Remaining response fields (`product`, `qr`, `location`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
