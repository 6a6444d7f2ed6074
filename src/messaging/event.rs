//! Inbound events from the messaging platform and their decoding

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// URL-safe base64 that accepts message data with or without padding
pub const MESSAGE_DATA: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub const PLAIN_TEXT: &str = "PLAIN_TEXT";

const KNOWN_CATEGORIES: [&str; 6] = [
    "SYSTEM_ACCOUNT_SNAPSHOT",
    PLAIN_TEXT,
    "SYSTEM_CONVERSATION",
    "PLAIN_STICKER",
    "PLAIN_IMAGE",
    "PLAIN_CONTACT",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateMessage,
    AcknowledgeMessageReceipt,
    ListPendingMessages,
}

impl Action {
    #[inline]
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "CREATE_MESSAGE" => Some(Self::CreateMessage),
            "ACKNOWLEDGE_MESSAGE_RECEIPT" => Some(Self::AcknowledgeMessageReceipt),
            "LIST_PENDING_MESSAGES" => Some(Self::ListPendingMessages),
            _ => None,
        }
    }
}

/// One event as delivered by the platform connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    #[serde(default)]
    pub id: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<MessageView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub message_id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub category: String,
    /// URL-safe base64 of the message body
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl MessageView {
    #[inline]
    pub fn is_known_category(&self) -> bool {
        KNOWN_CATEGORIES.contains(&self.category.as_str())
    }

    #[inline]
    pub fn is_plain_text(&self) -> bool {
        self.category == PLAIN_TEXT
    }
}

/// Decode message data into the question text.
///
/// A leading `@mention` is removed together with the space after it. Returns `None`
/// for undecodable data and for a mention with nothing after it.
pub fn decode_text(data: &str) -> Option<String> {
    let bytes = MESSAGE_DATA.decode(data.trim()).ok()?;
    let body = strip_mention(&bytes)?;
    String::from_utf8(body.to_vec()).ok()
}

/// Remove a leading `@name ` prefix
#[inline]
pub fn strip_mention(bytes: &[u8]) -> Option<&[u8]> {
    if !bytes.starts_with(b"@") {
        return Some(bytes);
    }
    let space = bytes.iter().position(|b| *b == b' ')?;
    Some(&bytes[space + 1..])
}

#[inline]
pub fn encode_text(text: &str) -> String {
    MESSAGE_DATA.encode(text.as_bytes())
}

/// Conversation id the platform assigns to the direct chat between two users.
///
/// Name-based UUID (MD5) of both ids in ascending order.
pub fn unique_conversation_id(user_id: &str, recipient_id: &str) -> String {
    let (min_id, max_id) = if user_id <= recipient_id {
        (user_id, recipient_id)
    } else {
        (recipient_id, user_id)
    };

    let mut hasher = Md5::new();
    hasher.update(min_id.as_bytes());
    hasher.update(max_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hasher.finalize());

    bytes[6] = (bytes[6] & 0x0f) | 0x30;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes).to_string()
}

/// Canned reply for an exact greeting
#[inline]
pub fn greeting(text: &str) -> Option<&'static str> {
    match text {
        "hi" => Some(
            "\nHello, this is a Q&A robot about Python Smart Contracts Development. Is there anything I can help you with?\n",
        ),
        "你好" => Some(
            "\n你好，这是一个关于Python智能合约开发的问答机器人，请问有什么可以帮到你的吗？\n",
        ),
        "こんにちは" => Some(
            "\nこんにちは、これはPythonスマートコントラクト開発に関するQ&Aロボットです。何かお手伝いできることがありますか？\n",
        ),
        _ => None,
    }
}
