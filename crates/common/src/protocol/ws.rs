// WebSocket message types for the switchboard signaling protocol.

use serde::{Deserialize, Serialize};

use crate::types::ParticipantId;

/// Action discriminant of a signaling frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAction {
    IceCandidate,
    Join,
    SessionDescription,
    CreateOffer,
    CreateAnswer,
    Remove,
    Exit,
}

impl SignalAction {
    /// Actions a client may legally send to the relay. The remaining
    /// actions only ever appear as relay-generated outbound frames.
    #[must_use]
    pub const fn client_to_server(self) -> bool {
        matches!(
            self,
            Self::Join | Self::SessionDescription | Self::IceCandidate | Self::Exit
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IceCandidate => "ICE_CANDIDATE",
            Self::Join => "JOIN",
            Self::SessionDescription => "SESSION_DESCRIPTION",
            Self::CreateOffer => "CREATE_OFFER",
            Self::CreateAnswer => "CREATE_ANSWER",
            Self::Remove => "REMOVE",
            Self::Exit => "EXIT",
        }
    }
}

/// One signaling frame.
///
/// The relay treats `text` as an opaque payload (SDP, ICE candidate);
/// it is forwarded untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignalMessage {
    pub action: SignalAction,

    /// On client-to-server frames: the sender's local-id fragment,
    /// relative to its own connection. On server-to-client frames: the
    /// full participant id of the logical sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Target participant id, bare or `owner:local` composite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<ParticipantId>,

    #[serde(default)]
    pub text: String,
}
