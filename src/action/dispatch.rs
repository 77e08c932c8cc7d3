use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::image::{ImageGenerator, ImageRef};
use super::parser::{ActionDirective, ActionKind};
use crate::error::VoiceError;

/// Result of an asynchronously executed action
#[derive(Debug)]
pub enum ActionOutcome {
    ImageReady {
        action_id: String,
        prompt: String,
        image: ImageRef,
    },
    ImageFailed {
        action_id: String,
        prompt: String,
        error: VoiceError,
    },
}

/// An action handed to a collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedAction {
    pub id: String,
    pub kind: ActionKind,
    pub argument: String,
}

/// Routes parsed directives to their handlers without blocking the caller
pub struct ActionDispatcher {
    images: Option<Arc<dyn ImageGenerator>>,
    outcomes: mpsc::UnboundedSender<ActionOutcome>,
}

impl ActionDispatcher {
    pub fn new(
        images: Option<Arc<dyn ImageGenerator>>,
        outcomes: mpsc::UnboundedSender<ActionOutcome>,
    ) -> Self {
        Self { images, outcomes }
    }

    /// Dispatch one directive; unknown kinds are ignored
    pub fn dispatch(&self, directive: ActionDirective) -> Option<DispatchedAction> {
        match directive.kind {
            ActionKind::GenerateImage => {
                let Some(images) = self.images.clone() else {
                    warn!("No image generator configured; ignoring GEN_IMAGE");
                    return None;
                };

                let action_id = Uuid::new_v4().to_string();
                let prompt = directive.argument;
                info!("Dispatching image generation {}: {}", action_id, prompt);

                let outcomes = self.outcomes.clone();
                let id = action_id.clone();
                let task_prompt = prompt.clone();
                tokio::spawn(async move {
                    let outcome = match images.request_image(&task_prompt).await {
                        Ok(image) => ActionOutcome::ImageReady {
                            action_id: id,
                            prompt: task_prompt,
                            image,
                        },
                        Err(error) => ActionOutcome::ImageFailed {
                            action_id: id,
                            prompt: task_prompt,
                            error,
                        },
                    };
                    let _ = outcomes.send(outcome);
                });

                Some(DispatchedAction {
                    id: action_id,
                    kind: ActionKind::GenerateImage,
                    argument: prompt,
                })
            }
            ActionKind::Other(kind) => {
                debug!("Ignoring unrecognized action {}", kind);
                None
            }
        }
    }
}
