//! Message-producing and input-capturing nodes
//!
//! `message` and `keyboard` render their templates against the merged
//! variable view and auto-continue. `input` is the interactive kind: the
//! engine stops on it until the user answers, then the captured payload
//! lands in a session variable.

use async_trait::async_trait;
use colloquy_core::domain::flow::NodeId;
use colloquy_core::types::{Keyboard, KeyboardButton, OutboundMessage};
use colloquy_core::{
    EngineError, NodeContext, NodeHandler, NodeOutcome, ResumeCondition, Trigger, VarScope,
    VariablesPatch,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageConfig {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    media_url: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    next_node_id: String,
}

/// Sends one text or media message, then continues.
#[derive(Debug, Default)]
pub struct MessageHandler;

#[async_trait]
impl NodeHandler for MessageHandler {
    fn kind(&self) -> &str {
        "message"
    }

    async fn execute(
        &self,
        ctx: &NodeContext,
        config: &Value,
        _trigger: &Trigger,
    ) -> Result<NodeOutcome, EngineError> {
        let config: MessageConfig = serde_json::from_value(config.clone())
            .map_err(|e| EngineError::InvalidConfiguration(format!("message node: {}", e)))?;

        let chat_id = ctx.session.chat_id.clone();
        let message = if let Some(url) = &config.media_url {
            let caption = config
                .caption
                .as_deref()
                .or(config.text.as_deref())
                .map(|c| ctx.render(c));
            OutboundMessage::media(chat_id, ctx.render(url), caption)
        } else if let Some(text) = &config.text {
            OutboundMessage::text(chat_id, ctx.render(text))
        } else {
            return Err(EngineError::InvalidConfiguration(
                "message node needs 'text' or 'mediaUrl'".to_string(),
            ));
        };

        Ok(NodeOutcome::goto(NodeId(config.next_node_id)).with_effect(message))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ButtonConfig {
    label: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyboardConfig {
    text: String,
    #[serde(default)]
    buttons: Vec<Vec<ButtonConfig>>,
    next_node_id: String,
}

/// Sends a prompt with a reply keyboard, then continues.
#[derive(Debug, Default)]
pub struct KeyboardHandler;

#[async_trait]
impl NodeHandler for KeyboardHandler {
    fn kind(&self) -> &str {
        "keyboard"
    }

    async fn execute(
        &self,
        ctx: &NodeContext,
        config: &Value,
        _trigger: &Trigger,
    ) -> Result<NodeOutcome, EngineError> {
        let config: KeyboardConfig = serde_json::from_value(config.clone())
            .map_err(|e| EngineError::InvalidConfiguration(format!("keyboard node: {}", e)))?;

        if config.buttons.iter().all(|row| row.is_empty()) {
            return Err(EngineError::InvalidConfiguration(
                "keyboard node needs at least one button".to_string(),
            ));
        }

        let rows = config
            .buttons
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|button| KeyboardButton {
                        label: ctx.render(&button.label),
                        value: button.value,
                    })
                    .collect()
            })
            .collect();

        let message = OutboundMessage::text(ctx.session.chat_id.clone(), ctx.render(&config.text))
            .with_keyboard(Keyboard { rows });

        Ok(NodeOutcome::goto(NodeId(config.next_node_id)).with_effect(message))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputConfig {
    variable: String,
    next_node_id: String,
}

/// Captures the user's answer into a session variable.
///
/// The engine halts before executing this kind; the node runs on the next
/// inbound event. A selection wins over free text; a lone attachment is
/// stored as a small media object. An event with no usable payload keeps
/// the session paused on the node.
#[derive(Debug, Default)]
pub struct InputHandler;

#[async_trait]
impl NodeHandler for InputHandler {
    fn kind(&self) -> &str {
        "input"
    }

    fn awaits_input(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        _ctx: &NodeContext,
        config: &Value,
        trigger: &Trigger,
    ) -> Result<NodeOutcome, EngineError> {
        let config: InputConfig = serde_json::from_value(config.clone())
            .map_err(|e| EngineError::InvalidConfiguration(format!("input node: {}", e)))?;

        let event = match trigger.inbound() {
            Some(event) => event,
            None => return Ok(NodeOutcome::pause(ResumeCondition::Input)),
        };

        let captured = if let Some(text) = event.payload_text() {
            json!(text)
        } else if let Some(attachment) = event.attachments.first() {
            json!({ "mediaType": attachment.media_type, "url": attachment.url })
        } else {
            return Ok(NodeOutcome::pause(ResumeCondition::Input));
        };

        let patch = VariablesPatch::new().set(VarScope::Session, config.variable, captured);
        Ok(NodeOutcome::goto(NodeId(config.next_node_id)).with_patch(patch))
    }
}
