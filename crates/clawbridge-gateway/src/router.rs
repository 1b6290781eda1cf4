//! Inbound upstream frame dispatch.
//!
//! Responses go to the correlator. Events are classified by name: `chat`
//! drives the stream reassembler, `agent` events on the tool stream become
//! tool notices, anything else is dropped.

use crate::correlator::Correlator;
use crate::extract::extract_text;
use crate::hub::Hub;
use crate::link::LinkState;
use crate::protocol::{
    AgentEventPayload, ChatEventPayload, EventFrame, InboundFrame, ServerMessage, StreamState,
    ToolPhase,
};
use crate::reassembler::SharedReassembler;
use std::sync::Arc;
use tracing::debug;

/// Error text used when a run fails without a message.
pub const DEFAULT_RUN_ERROR: &str = "Unknown error";

/// Tool name used when a tool notice carries none.
pub const DEFAULT_TOOL_NAME: &str = "tool";

/// Routes upstream frames to their consumers.
pub struct EventRouter {
    link: Arc<LinkState>,
    correlator: Arc<Correlator>,
    reassembler: SharedReassembler,
    hub: Arc<Hub>,
}

impl EventRouter {
    pub fn new(
        link: Arc<LinkState>,
        correlator: Arc<Correlator>,
        reassembler: SharedReassembler,
        hub: Arc<Hub>,
    ) -> Self {
        Self {
            link,
            correlator,
            reassembler,
            hub,
        }
    }

    /// Handle one upstream text frame. Undecodable frames are dropped.
    pub fn handle_frame(&self, text: &str) {
        match InboundFrame::parse(text) {
            Ok(InboundFrame::Res(response)) => {
                self.correlator.resolve(response);
            }
            Ok(InboundFrame::Event(event)) => self.dispatch(event),
            Err(e) => debug!("Dropping upstream frame: {}", e),
        }
    }

    fn dispatch(&self, event: EventFrame) {
        match event.event.as_str() {
            "connect.challenge" => debug!("Ignoring connect challenge"),
            "chat" => match serde_json::from_value::<ChatEventPayload>(event.payload) {
                Ok(payload) => self.on_chat(payload),
                Err(e) => debug!("Dropping chat event: {}", e),
            },
            "agent" => match serde_json::from_value::<AgentEventPayload>(event.payload) {
                Ok(payload) => self.on_agent(payload),
                Err(e) => debug!("Dropping agent event: {}", e),
            },
            other => debug!(event = other, "Ignoring upstream event"),
        }
    }

    fn on_chat(&self, payload: ChatEventPayload) {
        let text = payload.message.as_ref().and_then(extract_text);
        let run_id = payload.run_id;

        match payload.state.as_deref() {
            Some("delta") => {
                let published = self.reassembler.lock().on_delta(run_id.as_deref(), text);
                if let Some(text) = published {
                    self.hub.broadcast(&ServerMessage::stream_text(
                        StreamState::Delta,
                        text,
                        run_id,
                    ));
                }
            }
            Some("final") => {
                let text = self.reassembler.lock().on_final(text);
                self.link.clear_run();
                debug!(chars = text.chars().count(), "Run finished");
                self.hub.broadcast(&ServerMessage::stream_text(
                    StreamState::Final,
                    text,
                    run_id,
                ));
            }
            Some("aborted") => {
                self.end_run();
                self.hub
                    .broadcast(&ServerMessage::stream_state(StreamState::Aborted, run_id));
            }
            Some("error") => {
                self.end_run();
                let error = payload
                    .error_message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_RUN_ERROR.to_string());
                self.hub.broadcast(&ServerMessage::Stream {
                    state: StreamState::Error,
                    text: None,
                    error: Some(error),
                    run_id,
                });
            }
            other => debug!(state = ?other, "Ignoring chat event state"),
        }
    }

    fn on_agent(&self, payload: AgentEventPayload) {
        if payload.stream.as_deref() != Some("tool") {
            return;
        }
        let Some(data) = payload.data else {
            return;
        };
        let Some(phase) = data.phase.as_deref().and_then(ToolPhase::from_upstream) else {
            return;
        };

        self.hub.broadcast(&ServerMessage::Tool {
            phase,
            name: data.name.unwrap_or_else(|| DEFAULT_TOOL_NAME.to_string()),
            tool_call_id: data.tool_call_id,
        });
    }

    fn end_run(&self) {
        self.reassembler.lock().clear();
        self.link.clear_run();
    }
}
