use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tidings_core::logging::redact_prompt;
use tidings_core::{Error, Message, MessageId, RESTART_NOTICE, RestartConfirmation, Result, Transcript};
use tidings_providers::{ByteStream, CancelToken, Endpoint, GenerateRequest, StreamAssembler};
use tokio::sync::mpsc;

/// What the user asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Send a prompt and stream the reply
    Prompt(String),
    /// Clear the conversation on both ends
    Restart,
}

/// How a submission ended
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Blank prompt, nothing happened
    Ignored,
    /// Another submission is in flight, nothing happened
    Busy,
    /// The restart confirmation was declined
    Declined,
    /// The transcript was reset to the restart notice
    Restarted,
    /// The reply streamed to the end
    Completed { message: Message },
    /// The submission failed; the transcript carries an error message
    Failed(Error),
}

impl SubmitOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SubmitOutcome::Completed { .. })
    }
}

/// Events sent from the session to the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A message was added at the end of the transcript
    MessageAppended(Message),
    /// The full text of a message changed
    MessageUpdated { id: MessageId, text: String },
    /// A streaming message became final
    MessageFinished(MessageId),
    /// An unfilled placeholder was dropped
    MessageRemoved(MessageId),
    /// The transcript now holds only this message
    TranscriptReset(Message),
    /// A submission started or ended
    BusyChanged(bool),
}

#[derive(Debug, Default)]
struct SessionState {
    transcript: Transcript,
    input: String,
    last_error: Option<String>,
}

/// Submission controller for one conversation.
///
/// Owns the transcript and drives it from the endpoint's streamed replies. At most one
/// submission runs at a time; the others return [`SubmitOutcome::Busy`] untouched.
pub struct ChatSession {
    endpoint: Arc<dyn Endpoint>,
    state: Mutex<SessionState>,
    busy: AtomicBool,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
}

/// Clears the busy flag when the submission ends, however it ends
struct BusyGuard<'a> {
    session: &'a ChatSession,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.session.busy.store(false, Ordering::Release);
        self.session.emit(SessionEvent::BusyChanged(false));
    }
}

impl ChatSession {
    pub fn new(endpoint: Arc<dyn Endpoint>) -> Self {
        Self {
            endpoint,
            state: Mutex::new(SessionState::default()),
            busy: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Text of the error message added by the last failed submission
    pub fn last_error(&self) -> Option<String> {
        lock(&self.state).last_error.clone()
    }

    /// Snapshot of the transcript
    pub fn transcript(&self) -> Transcript {
        lock(&self.state).transcript.clone()
    }

    pub fn input(&self) -> String {
        lock(&self.state).input.clone()
    }

    pub fn set_input(&self, input: impl Into<String>) {
        lock(&self.state).input = input.into();
    }

    /// Submit the current input buffer as a prompt
    pub async fn submit_input(&self, cancel: CancelToken) -> SubmitOutcome {
        let input = self.input();
        self.submit(Submission::Prompt(input), cancel).await
    }

    /// Restart the conversation, asking `confirmation` first when there is history to lose
    pub async fn restart(&self, confirmation: &dyn RestartConfirmation, cancel: CancelToken) -> SubmitOutcome {
        let message_count = {
            let state = lock(&self.state);
            state.transcript.needs_restart_confirmation().then(|| state.transcript.len())
        };

        if let Some(count) = message_count {
            match confirmation.confirm_restart(count) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(backend = confirmation.name(), "restart declined");
                    return SubmitOutcome::Declined;
                }
                Err(e) => {
                    tracing::warn!(backend = confirmation.name(), error = %e, "restart confirmation failed");
                    return SubmitOutcome::Declined;
                }
            }
        }

        self.submit(Submission::Restart, cancel).await
    }

    /// Run one submission to completion.
    ///
    /// Never returns an error: failures end up in the transcript as an error message and
    /// in [`SubmitOutcome::Failed`].
    pub async fn submit(&self, submission: Submission, cancel: CancelToken) -> SubmitOutcome {
        let request = match &submission {
            Submission::Prompt(prompt) => {
                let prompt = prompt.trim();
                if prompt.is_empty() {
                    return SubmitOutcome::Ignored;
                }
                GenerateRequest::prompt(prompt)
            }
            Submission::Restart => GenerateRequest::restart(),
        };

        let Some(_busy) = self.try_acquire() else {
            tracing::debug!("submission rejected, another one is in flight");
            return SubmitOutcome::Busy;
        };

        match &request {
            GenerateRequest::Prompt { prompt } => {
                tracing::info!(prompt = %redact_prompt(prompt, 80), "submitting prompt");
                let appended = {
                    let mut state = lock(&self.state);
                    state.input.clear();
                    state.last_error = None;
                    append(&mut state.transcript, Message::user(prompt.as_str()))
                };
                match appended {
                    Ok(message) => self.emit(SessionEvent::MessageAppended(message)),
                    Err(e) => return self.fail(None, e),
                }
            }
            GenerateRequest::Restart { .. } => {
                tracing::info!("requesting restart");
                lock(&self.state).last_error = None;
            }
        }

        let body = match self.dispatch(&request, &cancel).await {
            Ok(body) => body,
            Err(e) => return self.fail(None, e),
        };

        if request.is_restart() {
            drop(body);
            let notice = {
                let mut state = lock(&self.state);
                let id = state.transcript.replace_all(Message::system(RESTART_NOTICE));
                state.transcript.get(id).cloned()
            };
            if let Some(notice) = notice {
                self.emit(SessionEvent::TranscriptReset(notice));
            }
            tracing::info!("conversation restarted");
            return SubmitOutcome::Restarted;
        }

        let placeholder = {
            let mut state = lock(&self.state);
            append(&mut state.transcript, Message::assistant_placeholder())
        };
        let id = match placeholder {
            Ok(message) => {
                let id = message.id;
                self.emit(SessionEvent::MessageAppended(message));
                match id {
                    Some(id) => id,
                    None => return self.fail(None, Error::Validation("placeholder has no id".to_string())),
                }
            }
            Err(e) => return self.fail(None, e),
        };

        let mut assembler = StreamAssembler::new(body, cancel);
        let mut reply = String::new();
        while let Some(fragment) = assembler.next().await {
            let text = match fragment {
                Ok(text) => text,
                Err(e) => return self.fail(Some(id), e),
            };

            reply.push_str(&text);
            let updated = lock(&self.state).transcript.update_text(id, reply.as_str());
            match updated {
                Ok(()) => self.emit(SessionEvent::MessageUpdated { id, text: reply.clone() }),
                Err(e) => return self.fail(Some(id), e),
            }
        }

        let finished = {
            let mut state = lock(&self.state);
            state.transcript.finish(id).and_then(|()| {
                state
                    .transcript
                    .get(id)
                    .cloned()
                    .ok_or_else(|| Error::Validation(format!("{} vanished from the transcript", id)))
            })
        };

        match finished {
            Ok(message) => {
                self.emit(SessionEvent::MessageFinished(id));
                tracing::info!(chars = message.text.chars().count(), "reply complete");
                SubmitOutcome::Completed { message }
            }
            Err(e) => self.fail(Some(id), e),
        }
    }

    fn try_acquire(&self) -> Option<BusyGuard<'_>> {
        self.busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).ok()?;
        self.emit(SessionEvent::BusyChanged(true));
        Some(BusyGuard { session: self })
    }

    async fn dispatch(&self, request: &GenerateRequest, cancel: &CancelToken) -> Result<ByteStream> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.endpoint.send(request) => result,
        }
    }

    /// Settle the transcript after a failure and report it
    fn fail(&self, placeholder: Option<MessageId>, error: Error) -> SubmitOutcome {
        let text = format!("Error: {}", error.user_message());
        tracing::warn!(error = %error, "submission failed");

        let mut events = Vec::new();
        {
            let mut state = lock(&self.state);

            if let Some(id) = placeholder {
                let unfilled = state.transcript.get(id).map(Message::is_unfilled_placeholder);
                match unfilled {
                    Some(true) => {
                        state.transcript.remove(id);
                        events.push(SessionEvent::MessageRemoved(id));
                    }
                    Some(false) => {
                        if state.transcript.finish(id).is_ok() {
                            events.push(SessionEvent::MessageFinished(id));
                        }
                    }
                    None => {}
                }
            }

            if let Ok(message) = append(&mut state.transcript, Message::error(text.as_str())) {
                events.push(SessionEvent::MessageAppended(message));
            }
            state.last_error = Some(text);
        }

        for event in events {
            self.emit(event);
        }
        SubmitOutcome::Failed(error)
    }

    fn emit(&self, event: SessionEvent) {
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Append and hand back the stored copy, id included
fn append(transcript: &mut Transcript, message: Message) -> Result<Message> {
    let id = transcript.append(message)?;
    transcript
        .get(id)
        .cloned()
        .ok_or_else(|| Error::Validation(format!("{} vanished from the transcript", id)))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
