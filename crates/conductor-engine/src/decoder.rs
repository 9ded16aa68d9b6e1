use std::collections::HashMap;

use tracing::debug;

use conductor_core::events::DeltaEvent;
use conductor_core::ids::{BlockId, ToolCallId};
use conductor_core::messages::{AssistantMessage, ToolCallBlock};
use conductor_core::stream::{ModelChunk, ToolCallFragment};

/// Per-run decoder turning provider chunks into canonical delta events.
///
/// Content and reasoning each keep at most one open block. A tool-call
/// fragment, a stage marker or the end of a model stream closes both; text
/// arriving afterwards opens a block with a fresh id. Tool-call argument text
/// is concatenated per call id in arrival order.
#[derive(Debug, Default)]
pub struct DeltaDecoder {
    content_block: Option<BlockId>,
    reasoning_block: Option<BlockId>,
    text: String,
    reasoning: String,
    calls: Vec<PendingCall>,
    by_id: HashMap<ToolCallId, usize>,
    by_index: HashMap<u32, usize>,
    last_call: Option<usize>,
    finish_reason: Option<String>,
}

#[derive(Debug)]
struct PendingCall {
    id: ToolCallId,
    name: String,
    arguments: String,
}

/// A tool call reassembled from its fragments.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedCall {
    pub id: ToolCallId,
    pub name: String,
    pub raw_arguments: String,
    /// Position among the calls of its model turn.
    pub index: u32,
}

impl DecodedCall {
    /// Parsed arguments. An empty argument string means `{}`.
    pub fn arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        if self.raw_arguments.trim().is_empty() {
            return Ok(serde_json::Value::Object(Default::default()));
        }
        serde_json::from_str(&self.raw_arguments)
    }
}

/// Everything one model stream produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedTurn {
    pub text: String,
    pub reasoning: String,
    pub tool_calls: Vec<DecodedCall>,
    pub finish_reason: Option<String>,
}

impl DecodedTurn {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Keep the first `max` tool calls. Returns the dropped calls.
    pub fn truncate_calls(&mut self, max: usize) -> Vec<DecodedCall> {
        if self.tool_calls.len() <= max {
            return Vec::new();
        }
        self.tool_calls.split_off(max)
    }

    /// History entry for this turn. Malformed argument text is kept as a
    /// JSON string so the transcript still shows what the model sent.
    pub fn to_assistant_message(&self) -> AssistantMessage {
        AssistantMessage {
            text: self.text.clone(),
            reasoning: (!self.reasoning.is_empty()).then(|| self.reasoning.clone()),
            tool_calls: self
                .tool_calls
                .iter()
                .map(|c| ToolCallBlock {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    arguments: c
                        .arguments()
                        .unwrap_or_else(|_| serde_json::Value::String(c.raw_arguments.clone())),
                })
                .collect(),
        }
    }
}

impl DeltaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk. Text in the chunk is handled before its tool-call
    /// fragments.
    pub fn push(&mut self, chunk: ModelChunk) -> Vec<DeltaEvent> {
        let mut events = Vec::new();

        if let Some(text) = chunk.reasoning.filter(|t| !t.is_empty()) {
            let block_id = self.reasoning_block.get_or_insert_with(BlockId::new).clone();
            self.reasoning.push_str(&text);
            events.push(DeltaEvent::Reasoning { block_id, text });
        }

        if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
            let block_id = self.content_block.get_or_insert_with(BlockId::new).clone();
            self.text.push_str(&text);
            events.push(DeltaEvent::Content { block_id, text });
        }

        if !chunk.tool_calls.is_empty() {
            self.close_blocks();
            for fragment in chunk.tool_calls {
                events.push(self.push_fragment(fragment));
            }
        }

        if let Some(reason) = chunk.finish_reason {
            self.finish_reason = Some(reason);
        }

        events
    }

    /// Close any open text block. Called on stage markers.
    pub fn close_blocks(&mut self) {
        self.content_block = None;
        self.reasoning_block = None;
    }

    pub fn has_open_block(&self) -> bool {
        self.content_block.is_some() || self.reasoning_block.is_some()
    }

    /// End of one model stream: close blocks and hand back what was
    /// assembled. Block ids stay unique across streams of the same run.
    pub fn finish_stream(&mut self) -> DecodedTurn {
        self.close_blocks();
        self.by_id.clear();
        self.by_index.clear();
        self.last_call = None;
        DecodedTurn {
            text: std::mem::take(&mut self.text),
            reasoning: std::mem::take(&mut self.reasoning),
            tool_calls: self
                .calls
                .drain(..)
                .enumerate()
                .map(|(i, c)| DecodedCall {
                    id: c.id,
                    name: c.name,
                    raw_arguments: c.arguments,
                    index: i as u32,
                })
                .collect(),
            finish_reason: self.finish_reason.take(),
        }
    }

    fn push_fragment(&mut self, fragment: ToolCallFragment) -> DeltaEvent {
        let slot = self.attribute(&fragment);
        let call = &mut self.calls[slot];
        if call.name.is_empty() {
            if let Some(name) = fragment.name.as_deref() {
                call.name = name.trim().to_string();
            }
        }
        let args_chunk = fragment.arguments.unwrap_or_default();
        call.arguments.push_str(&args_chunk);

        DeltaEvent::ToolCallChunk {
            id: call.id.clone(),
            name: fragment.name,
            kind: fragment.kind,
            args_chunk,
            index: slot as u32,
        }
    }

    /// Find the call a fragment belongs to, opening a new one if needed.
    ///
    /// With an id: that call, or a new one. Without: the most recently
    /// opened call, else the call at the fragment's positional index, else a
    /// new call with a synthetic id.
    fn attribute(&mut self, fragment: &ToolCallFragment) -> usize {
        if let Some(raw) = fragment.id.as_deref().filter(|id| !id.is_empty()) {
            let id = ToolCallId::from_raw(raw);
            if let Some(&slot) = self.by_id.get(&id) {
                return slot;
            }
            return self.open_call(id, fragment.index);
        }

        if let Some(slot) = self.last_call {
            return slot;
        }
        if let Some(&slot) = fragment.index.and_then(|i| self.by_index.get(&i)) {
            return slot;
        }

        let id = ToolCallId::new();
        debug!(call_id = %id, "tool call fragment without id, assigning synthetic id");
        self.open_call(id, fragment.index)
    }

    fn open_call(&mut self, id: ToolCallId, index: Option<u32>) -> usize {
        let slot = self.calls.len();
        self.calls.push(PendingCall {
            id: id.clone(),
            name: String::new(),
            arguments: String::new(),
        });
        self.by_id.insert(id, slot);
        if let Some(index) = index {
            self.by_index.entry(index).or_insert(slot);
        }
        self.last_call = Some(slot);
        slot
    }
}
