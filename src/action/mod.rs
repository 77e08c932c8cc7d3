//! Inline action directives in the assistant's transcript
//!
//! The model is instructed to emit `[ACTION: <KIND>: <ARGUMENT>]` when it wants
//! something done besides talking. This module parses those directives out of
//! streamed text and hands them to the matching collaborator.

mod dispatch;
mod image;
mod parser;

pub use dispatch::{ActionDispatcher, ActionOutcome, DispatchedAction};
pub use image::{ImageGenerator, ImageRef, ImageReplyMessage, ImageRequestMessage, NatsImageGenerator};
pub use parser::{scan, ActionDirective, ActionKind, DirectiveScanner, Directives};
