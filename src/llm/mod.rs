//! Language model integration module
//!
//! This module provides the chat types shared by the agent loop and the
//! result generators, and a client for OpenAI-compatible chat endpoints.

pub mod client;
pub mod types;

pub use client::{ChatError, ChatModel, OpenAiClient, DEFAULT_MODEL, DEFAULT_TEMPERATURE};
pub use types::{ChatMessage, ContentPart, FunctionCall, MessageContent, Role, Tool, ToolCall, ToolFunction};
