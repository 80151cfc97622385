//! Plain-text extraction from message payloads

use crate::protocol::MessagePayload;

/// Pulls the text a workflow should see out of a payload
pub struct MessageContentExtractor;

impl MessageContentExtractor {
    /// Text of a plain or extended-text message, empty for anything else
    ///
    /// A missing payload and an extended-text payload without text are both
    /// treated as malformed and yield the empty string, which the dispatcher
    /// reads as "nothing to route".
    pub fn extract_text(payload: Option<&MessagePayload>) -> String {
        match payload {
            Some(MessagePayload::PlainText { conversation }) => conversation.clone(),
            Some(MessagePayload::ExtendedText { text: Some(text) }) => text.clone(),
            Some(MessagePayload::ExtendedText { text: None })
            | Some(MessagePayload::Other)
            | None => String::new(),
        }
    }
}
