//! The conversation model: typed chat turns, per-turn validation, and the
//! builder that produces immutable snapshots for the engine.
//!
//! A turn is one of three variants. Role and variant are carried by the
//! variant itself; validation happens at [`ConversationBuilder::build`] time,
//! not at append time, so callers can assemble freely and get one coherent
//! error when the shape is wrong. Out-of-range indices and wrong-variant
//! accessors are caller bugs and panic.

use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

const STANDARD_ROLES: [&str; 2] = ["system", "user"];
const SUPPORTED_IMAGE_TYPES: [&str; 5] = ["png", "jpeg", "jpg", "webp", "gif"];
const IMAGE_DETAILS: [&str; 3] = ["high", "low", "auto"];

/// Images above this size are rejected before transmission.
const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

fn invalid_role(allowed: &[&str], role: &str) -> anyhow::Error {
    anyhow::anyhow!("{} are valid roles, you provided {}", allowed.join(", "), role)
}

/// A plain text turn from the system or the user.
#[derive(Debug, Clone, Serialize)]
pub struct StandardTurn {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl StandardTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            name: None,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !STANDARD_ROLES.contains(&self.role.as_str()) {
            return Err(invalid_role(&STANDARD_ROLES, &self.role));
        }

        if self.content.is_empty() {
            bail!("standard turn content is empty");
        }

        Ok(())
    }
}

/// The image half of an `image_url` content part.
///
/// `image_type` never goes over the wire; it records the declared format of a
/// raw base64 payload so the engine can rewrite the url into a
/// `data:image/<type>;base64,<payload>` URI before transmission.
#[derive(Debug, Clone, Serialize)]
pub struct ImagePart {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing)]
    pub image_type: Option<String>,
}

impl ImagePart {
    /// Whether the url is already in a shape the vendor accepts verbatim.
    pub fn is_passthrough(&self) -> bool {
        self.url.starts_with("http") || self.url.starts_with("data:image/")
    }

    fn validate(&self) -> anyhow::Result<()> {
        if let Some(detail) = &self.detail {
            if !IMAGE_DETAILS.contains(&detail.as_str()) {
                bail!("{} is not a valid detail", detail);
            }
        }

        if self.is_passthrough() {
            return Ok(());
        }

        let image_type = self
            .image_type
            .as_deref()
            .context("image part without an http url must declare an image type")?;

        if !SUPPORTED_IMAGE_TYPES.contains(&image_type) {
            bail!("{} is not a supported image type", image_type);
        }

        let bytes = STANDARD
            .decode(&self.url)
            .context("image payload is not valid base64")?;

        if bytes.len() > MAX_IMAGE_BYTES {
            bail!("image exceeds the 20MiB limit");
        }

        Ok(())
    }
}

/// One element of a multimodal turn: text, or an image by url/payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImagePart },
}

impl ContentPart {
    fn validate(&self) -> anyhow::Result<()> {
        match self {
            ContentPart::Text { text } => {
                if text.is_empty() {
                    bail!("text part is empty");
                }
                Ok(())
            }
            ContentPart::ImageUrl { image_url } => image_url.validate(),
        }
    }
}

/// A turn mixing text and images, for engines with vision support.
#[derive(Debug, Clone, Serialize)]
pub struct MultimodalTurn {
    pub role: String,
    pub content: Vec<ContentPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl MultimodalTurn {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Vec::new(),
            name: None,
        }
    }

    pub fn push_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.content.push(ContentPart::Text { text: text.into() });
        self
    }

    pub fn push_image_url(&mut self, url: impl Into<String>, detail: Option<String>) -> &mut Self {
        self.content.push(ContentPart::ImageUrl {
            image_url: ImagePart {
                url: url.into(),
                detail,
                image_type: None,
            },
        });
        self
    }

    /// Encode raw image bytes as base64 and record the declared format; the
    /// engine rewrites the pair into a data URI before transmission.
    pub fn push_image_bytes(
        &mut self,
        bytes: &[u8],
        detail: Option<String>,
        image_type: impl Into<String>,
    ) -> &mut Self {
        self.content.push(ContentPart::ImageUrl {
            image_url: ImagePart {
                url: STANDARD.encode(bytes),
                detail,
                image_type: Some(image_type.into()),
            },
        });
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !STANDARD_ROLES.contains(&self.role.as_str()) {
            return Err(invalid_role(&STANDARD_ROLES, &self.role));
        }

        for (index, part) in self.content.iter().enumerate() {
            part.validate()
                .with_context(|| format!("content part {}", index))?;
        }

        Ok(())
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    pub arguments: String,
}

/// A turn produced by the model: either text content or tool calls, never
/// both and never neither.
#[derive(Debug, Clone, Serialize)]
pub struct AssistantTurn {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AssistantTurn {
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            name: None,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.role != "assistant" {
            return Err(invalid_role(&["assistant"], &self.role));
        }

        if let Some(content) = &self.content {
            if content.is_empty() {
                bail!("assistant turn content cannot be empty");
            }
        }

        if let Some(tool_calls) = &self.tool_calls {
            if tool_calls.is_empty() {
                bail!("assistant turn tool calls cannot be empty");
            }
        }

        if self.content.is_some() == self.tool_calls.is_some() {
            bail!("either tool calls or content must be provided, but not both");
        }

        Ok(())
    }
}

/// One element of a conversation.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Turn {
    Standard(StandardTurn),
    Multimodal(MultimodalTurn),
    Assistant(AssistantTurn),
}

impl Turn {
    pub fn role(&self) -> &str {
        match self {
            Turn::Standard(turn) => &turn.role,
            Turn::Multimodal(turn) => &turn.role,
            Turn::Assistant(turn) => &turn.role,
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Turn::Assistant(_))
    }

    pub fn is_multimodal(&self) -> bool {
        matches!(self, Turn::Multimodal(_))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        match self {
            Turn::Standard(turn) => turn.validate(),
            Turn::Multimodal(turn) => turn.validate(),
            Turn::Assistant(turn) => turn.validate(),
        }
    }
}

/// An immutable, validated snapshot of turns ready for the engine.
///
/// Serializes as the bare turn array, which is exactly the `messages` value
/// of the chat-completions wire shape.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub(crate) fn turns_mut(&mut self) -> &mut [Turn] {
        &mut self.turns
    }

    pub fn has_multimodal(&self) -> bool {
        self.turns.iter().any(Turn::is_multimodal)
    }
}

/// Accumulates turns and snapshots them into [`Conversation`]s.
///
/// Appending never validates; every snapshot re-validates everything, so two
/// successive `build` calls yield independent copies.
#[derive(Debug, Clone, Default)]
pub struct ConversationBuilder {
    turns: Vec<Turn>,
}

impl ConversationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_standard(&mut self, turn: StandardTurn) -> &mut Self {
        self.turns.push(Turn::Standard(turn));
        self
    }

    pub fn add_multimodal(&mut self, turn: MultimodalTurn) -> &mut Self {
        self.turns.push(Turn::Multimodal(turn));
        self
    }

    pub fn add_assistant(&mut self, turn: AssistantTurn) -> &mut Self {
        self.turns.push(Turn::Assistant(turn));
        self
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// View the turn at `index` as a standard turn.
    ///
    /// Panics when the index is out of range or the turn is another variant.
    pub fn standard_at(&mut self, index: usize) -> &mut StandardTurn {
        match &mut self.turns[index] {
            Turn::Standard(turn) => turn,
            _ => panic!("turn {} is not a standard turn", index),
        }
    }

    /// View the turn at `index` as a multimodal turn. Panics like
    /// [`Self::standard_at`].
    pub fn multimodal_at(&mut self, index: usize) -> &mut MultimodalTurn {
        match &mut self.turns[index] {
            Turn::Multimodal(turn) => turn,
            _ => panic!("turn {} is not a multimodal turn", index),
        }
    }

    /// View the turn at `index` as an assistant turn. Panics like
    /// [`Self::standard_at`].
    pub fn assistant_at(&mut self, index: usize) -> &mut AssistantTurn {
        match &mut self.turns[index] {
            Turn::Assistant(turn) => turn,
            _ => panic!("turn {} is not an assistant turn", index),
        }
    }

    /// Remove and return the turn at `index`. Panics when out of range.
    pub fn pop(&mut self, index: usize) -> Turn {
        if index >= self.turns.len() {
            panic!(
                "pop index {} out of range for conversation of length {}",
                index,
                self.turns.len()
            );
        }

        self.turns.remove(index)
    }

    /// Validate every turn and the closing invariant, then snapshot.
    ///
    /// The final turn must come from the user: its role is `user` and it is
    /// not an assistant turn.
    pub fn build(&self) -> anyhow::Result<Conversation> {
        for (index, turn) in self.turns.iter().enumerate() {
            turn.validate().with_context(|| format!("turn {}", index))?;
        }

        let last = match self.turns.last() {
            Some(turn) => turn,
            None => bail!("cannot build an empty conversation"),
        };

        if last.is_assistant() {
            bail!("the last turn cannot be an assistant turn");
        }

        if last.role() != "user" {
            bail!("the role for the last turn must be user, got {}", last.role());
        }

        Ok(Conversation {
            turns: self.turns.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_turn(content: &str) -> StandardTurn {
        StandardTurn::new("user", content)
    }

    #[test]
    fn test_standard_turn_rejects_assistant_role() {
        let turn = StandardTurn::new("assistant", "hi");
        assert!(turn.validate().is_err());
    }

    #[test]
    fn test_standard_turn_rejects_empty_content() {
        let turn = user_turn("");
        assert!(turn.validate().is_err());
    }

    #[test]
    fn test_standard_turn_accepts_user_text() {
        assert!(user_turn("hi").validate().is_ok());
    }

    #[test]
    fn test_assistant_turn_needs_exactly_one_of_content_and_tool_calls() {
        let both = AssistantTurn {
            role: "assistant".to_string(),
            content: Some("hi".to_string()),
            tool_calls: Some(vec![ToolCall {
                id: "call_1".to_string(),
                kind: "function".to_string(),
                function: ToolCallFunction {
                    name: "lookup".to_string(),
                    arguments: "{}".to_string(),
                },
            }]),
            name: None,
        };
        assert!(both.validate().is_err());

        let neither = AssistantTurn {
            role: "assistant".to_string(),
            content: None,
            tool_calls: None,
            name: None,
        };
        assert!(neither.validate().is_err());

        assert!(AssistantTurn::from_content("hi").validate().is_ok());
    }

    #[test]
    fn test_multimodal_detail_and_type_checks() {
        let mut turn = MultimodalTurn::new("user");
        turn.push_image_bytes(b"pixels", Some("ultra".to_string()), "png");
        assert!(turn.validate().is_err());

        let mut turn = MultimodalTurn::new("user");
        turn.push_image_bytes(b"pixels", None, "tiff");
        assert!(turn.validate().is_err());

        let mut turn = MultimodalTurn::new("user");
        turn.push_image_bytes(b"pixels", Some("low".to_string()), "png");
        assert!(turn.validate().is_ok());
    }

    #[test]
    fn test_multimodal_http_url_passes_without_type() {
        let mut turn = MultimodalTurn::new("user");
        turn.push_image_url("https://example.com/cat.png", None);
        assert!(turn.validate().is_ok());
    }

    #[test]
    fn test_multimodal_raw_payload_must_be_base64() {
        let mut turn = MultimodalTurn::new("user");
        turn.content.push(ContentPart::ImageUrl {
            image_url: ImagePart {
                url: "not base64 at all!".to_string(),
                detail: None,
                image_type: Some("png".to_string()),
            },
        });
        assert!(turn.validate().is_err());
    }

    #[test]
    fn test_build_requires_trailing_user_turn() {
        let mut builder = ConversationBuilder::new();
        builder.add_standard(StandardTurn::new("system", "be helpful"));
        assert!(builder.build().is_err());

        builder.add_standard(user_turn("hello"));
        builder.add_assistant(AssistantTurn::from_content("hi there"));
        assert!(builder.build().is_err());

        builder.add_standard(user_turn("and now?"));
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_build_rejects_empty_conversation() {
        assert!(ConversationBuilder::new().build().is_err());
    }

    #[test]
    fn test_build_surfaces_invalid_turn() {
        let mut builder = ConversationBuilder::new();
        builder.add_standard(user_turn(""));
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_builds_are_independent() {
        let mut builder = ConversationBuilder::new();
        builder.add_standard(user_turn("hello"));

        let mut first = builder.build().unwrap();
        let second = builder.build().unwrap();

        if let Turn::Standard(turn) = &mut first.turns_mut()[0] {
            turn.content = "changed".to_string();
        }

        match &second.turns()[0] {
            Turn::Standard(turn) => assert_eq!(turn.content, "hello"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_pop_removes_turn() {
        let mut builder = ConversationBuilder::new();
        builder.add_standard(StandardTurn::new("system", "be helpful"));
        builder.add_standard(user_turn("hello"));

        builder.pop(0);
        assert_eq!(builder.len(), 1);
        assert_eq!(builder.standard_at(0).content, "hello");
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_pop_out_of_range_panics() {
        ConversationBuilder::new().pop(0);
    }

    #[test]
    #[should_panic(expected = "not an assistant turn")]
    fn test_wrong_variant_access_panics() {
        let mut builder = ConversationBuilder::new();
        builder.add_standard(user_turn("hello"));
        builder.assistant_at(0);
    }

    #[test]
    fn test_conversation_serializes_as_message_array() {
        let mut builder = ConversationBuilder::new();
        builder.add_standard(StandardTurn::new("system", "be helpful"));
        builder.add_standard(user_turn("hello"));
        let conversation = builder.build().unwrap();

        let value = serde_json::to_value(&conversation).unwrap();
        assert_eq!(
            value,
            serde_json::json!([
                {"role": "system", "content": "be helpful"},
                {"role": "user", "content": "hello"},
            ])
        );
    }
}
