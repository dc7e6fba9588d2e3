//! Edges and first-match routing
//!
//! An edge is a chain of steps evaluated against the source node's output in
//! declaration order. A condition step can reject the edge; a transform step
//! replaces the value seen by later steps; a filter-map step does both at
//! once. The value left at the end of the chain becomes the target node's
//! input. An edge with no steps always fires and passes the output through.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::message::{Message, ToolCall, ToolResult};
use crate::node::{decode, encode};

type ConditionFn = Arc<dyn Fn(&Value) -> Result<bool> + Send + Sync>;
type TransformFn = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;
type FilterMapFn = Arc<dyn Fn(Value) -> Result<Option<Value>> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum EdgeStep {
    Condition(ConditionFn),
    Transform(TransformFn),
    FilterMap(FilterMapFn),
}

/// A resolved edge inside a built graph
#[derive(Clone)]
pub(crate) struct Edge {
    pub(crate) target: usize,
    pub(crate) steps: Vec<EdgeStep>,
}

impl Edge {
    /// Run the chain; `None` means the edge does not fire
    pub(crate) fn evaluate(&self, output: &Value) -> Result<Option<Value>> {
        let mut value = output.clone();
        for step in &self.steps {
            match step {
                EdgeStep::Condition(condition) => {
                    if !condition(&value)? {
                        return Ok(None);
                    }
                }
                EdgeStep::Transform(transform) => value = transform(value)?,
                EdgeStep::FilterMap(filter_map) => match filter_map(value)? {
                    Some(next) => value = next,
                    None => return Ok(None),
                },
            }
        }
        Ok(Some(value))
    }
}

/// Typed description of an edge's condition/transform chain
///
/// `Out` is the source node's output type and `Cur` the type of the value
/// at the current end of the chain. The builder only accepts a spec whose
/// `Cur` equals the target node's input type.
pub struct EdgeSpec<Out, Cur> {
    location: String,
    pub(crate) steps: Vec<EdgeStep>,
    _marker: PhantomData<fn(Out) -> Cur>,
}

impl<Out> EdgeSpec<Out, Out> {
    pub(crate) fn new(location: String) -> Self {
        Self {
            location,
            steps: Vec::new(),
            _marker: PhantomData,
        }
    }
}

impl<Out, Cur> EdgeSpec<Out, Cur>
where
    Cur: DeserializeOwned + 'static,
{
    /// Fire only when `condition` holds for the current value
    pub fn on_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Cur) -> bool + Send + Sync + 'static,
    {
        let location = self.location.clone();
        self.steps.push(EdgeStep::Condition(Arc::new(move |value: &Value| {
            let typed: Cur = decode(&location, value.clone())?;
            Ok(condition(&typed))
        })));
        self
    }

    /// Replace the current value
    pub fn transformed<Next, F>(mut self, transform: F) -> EdgeSpec<Out, Next>
    where
        Next: Serialize,
        F: Fn(Cur) -> Next + Send + Sync + 'static,
    {
        let location = self.location.clone();
        self.steps.push(EdgeStep::Transform(Arc::new(move |value: Value| {
            let typed: Cur = decode(&location, value)?;
            encode(&location, &transform(typed))
        })));
        self.retype()
    }

    /// Fire only when `f` returns `Some`, continuing with its content
    pub fn filter_map<Next, F>(mut self, f: F) -> EdgeSpec<Out, Next>
    where
        Next: Serialize,
        F: Fn(Cur) -> Option<Next> + Send + Sync + 'static,
    {
        let location = self.location.clone();
        self.steps.push(EdgeStep::FilterMap(Arc::new(move |value: Value| {
            let typed: Cur = decode(&location, value)?;
            f(typed).map(|next| encode(&location, &next)).transpose()
        })));
        self.retype()
    }
}

impl<Out, Cur> EdgeSpec<Out, Cur> {
    fn retype<Next>(self) -> EdgeSpec<Out, Next> {
        EdgeSpec {
            location: self.location,
            steps: self.steps,
            _marker: PhantomData,
        }
    }
}

impl<Out> EdgeSpec<Out, Message> {
    /// Fire on a tool call, continuing with the call
    pub fn on_tool_call(self) -> EdgeSpec<Out, ToolCall> {
        self.filter_map(|message: Message| match message {
            Message::ToolCall { call, .. } => Some(call),
            _ => None,
        })
    }

    /// Fire on a call of one specific tool
    pub fn on_tool_call_named(self, tool: impl Into<String>) -> EdgeSpec<Out, ToolCall> {
        let tool = tool.into();
        self.on_tool_call().on_condition(move |call: &ToolCall| call.tool == tool)
    }

    /// Fire on an assistant message, keeping the message
    pub fn on_assistant_message(self) -> Self {
        self.on_condition(Message::is_assistant)
    }

    /// Fire on an assistant message, continuing with its text
    pub fn on_assistant_content(self) -> EdgeSpec<Out, String> {
        self.filter_map(|message: Message| match message {
            Message::Assistant { content, .. } => Some(content),
            _ => None,
        })
    }
}

impl<Out> EdgeSpec<Out, Vec<Message>> {
    /// Fire when the response holds tool calls, continuing with all of them
    pub fn on_multiple_tool_calls(self) -> EdgeSpec<Out, Vec<ToolCall>> {
        self.filter_map(|messages: Vec<Message>| {
            let calls: Vec<ToolCall> = messages
                .into_iter()
                .filter_map(|m| match m {
                    Message::ToolCall { call, .. } => Some(call),
                    _ => None,
                })
                .collect();
            (!calls.is_empty()).then_some(calls)
        })
    }

    /// Fire when the response holds no tool call, continuing with its assistant messages
    pub fn on_assistant_messages(self) -> EdgeSpec<Out, Vec<Message>> {
        self.on_condition(|messages: &Vec<Message>| !messages.iter().any(Message::is_tool_call))
    }
}

impl<Out> EdgeSpec<Out, ToolResult> {
    /// Fire when the tool failed
    pub fn on_tool_error(self) -> Self {
        self.on_condition(|result: &ToolResult| result.is_error)
    }

    /// Fire when the tool succeeded
    pub fn on_tool_success(self) -> Self {
        self.on_condition(|result: &ToolResult| !result.is_error)
    }
}
