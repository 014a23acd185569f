//! Streaming generation
//!
//! A blocking worker runs the generate pass and pushes decoded fragments
//! through a bounded channel. The end of generation is a distinct terminal
//! message, so a worker that disappears without one is reported as an error
//! instead of looking like a clean finish.

use super::cache::LoadedAsset;
use crate::error::{ModelboxError, ModelboxResult};
use crate::runtime::Sampling;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Message from the generation worker to the consumer
#[derive(Debug)]
pub enum StreamEvent {
    Fragment(String),
    Failed(ModelboxError),
    Finished,
}

/// Lazy, finite, non-restartable sequence of text fragments.
///
/// Yields `Ok(fragment)` in generation order, at most one terminal `Err`, then
/// ends. Dropping it early stops the worker at the next token boundary.
pub struct GenerationStream {
    model_id: String,
    events: ReceiverStream<StreamEvent>,
    done: bool,
}

impl GenerationStream {
    pub fn new(model_id: impl Into<String>, rx: mpsc::Receiver<StreamEvent>) -> Self {
        Self {
            model_id: model_id.into(),
            events: ReceiverStream::new(rx),
            done: false,
        }
    }
}

impl Stream for GenerationStream {
    type Item = ModelboxResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.events).poll_next(cx) {
            Poll::Ready(Some(StreamEvent::Fragment(text))) => Poll::Ready(Some(Ok(text))),
            Poll::Ready(Some(StreamEvent::Failed(err))) => {
                self.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(Some(StreamEvent::Finished)) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                self.done = true;
                let err = ModelboxError::generation(
                    &self.model_id,
                    anyhow::anyhow!("generation worker exited without a terminal message"),
                );
                Poll::Ready(Some(Err(err)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

enum StreamOutcome {
    Completed,
    Abandoned,
}

/// Start a blocking worker streaming a generation from `asset`.
///
/// `max_new_tokens` bounds the continuation only; the prompt is not counted.
pub(crate) fn spawn_stream_worker(
    asset: Arc<LoadedAsset>,
    prompt: String,
    max_new_tokens: usize,
    sampling: Sampling,
    buffer: usize,
) -> GenerationStream {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let model_id = asset.model_id.clone();

    tokio::task::spawn_blocking(move || {
        let terminal = match stream_generation(&asset, &prompt, max_new_tokens, &sampling, &tx) {
            Ok(StreamOutcome::Completed) => StreamEvent::Finished,
            Ok(StreamOutcome::Abandoned) => {
                tracing::debug!(model_id = %asset.model_id, "Stream consumer went away");
                return;
            }
            Err(source) => {
                tracing::error!(model_id = %asset.model_id, error = %format!("{:#}", source), "Stream generation failed");
                StreamEvent::Failed(ModelboxError::generation(&asset.model_id, source))
            }
        };
        // The consumer may already be gone
        let _ = tx.blocking_send(terminal);
    });

    GenerationStream::new(model_id, rx)
}

fn stream_generation(
    asset: &LoadedAsset,
    prompt: &str,
    max_new_tokens: usize,
    sampling: &Sampling,
    tx: &mpsc::Sender<StreamEvent>,
) -> anyhow::Result<StreamOutcome> {
    let prompt_ids = asset.codec.encode(prompt)?;

    let mut generated = Vec::new();
    let mut assembled = String::new();
    let mut abandoned = false;
    let mut decode_error = None;

    asset.with_model(|model| {
        model.generate(&prompt_ids, max_new_tokens, sampling, &mut |id| {
            generated.push(id);
            let decoded = match asset.codec.decode(&generated) {
                Ok(text) => text,
                Err(e) => {
                    decode_error = Some(e);
                    return false;
                }
            };

            // Byte-level vocabularies decode a partial character as U+FFFD;
            // hold the text back until the character completes
            if decoded.ends_with(char::REPLACEMENT_CHARACTER) {
                return true;
            }

            let delta = text_delta(&assembled, &decoded);
            assembled = decoded;
            if delta.is_empty() {
                return true;
            }

            if tx.blocking_send(StreamEvent::Fragment(delta)).is_err() {
                abandoned = true;
                return false;
            }
            true
        })
    })?;

    if let Some(e) = decode_error {
        return Err(e);
    }

    // Flush text still held back when generation ended mid-character
    if !abandoned {
        let decoded = asset.codec.decode(&generated)?;
        let tail = text_delta(&assembled, &decoded);
        if !tail.is_empty() && tx.blocking_send(StreamEvent::Fragment(tail)).is_err() {
            abandoned = true;
        }
    }

    tracing::debug!(
        model_id = %asset.model_id,
        new_tokens = generated.len(),
        abandoned,
        "Stream generation ended"
    );

    Ok(if abandoned {
        StreamOutcome::Abandoned
    } else {
        StreamOutcome::Completed
    })
}

/// Text added by `current` over `previous`.
///
/// Decoding the growing id sequence can rewrite its tail (e.g. when the
/// decoder's cleanup merges a space into punctuation), so fall back to the
/// common char prefix.
pub fn text_delta(previous: &str, current: &str) -> String {
    if let Some(delta) = current.strip_prefix(previous) {
        return delta.to_string();
    }
    let common = previous
        .chars()
        .zip(current.chars())
        .take_while(|(a, b)| a == b)
        .count();
    current.chars().skip(common).collect()
}
