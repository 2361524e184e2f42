//! Turns the streamed body of a generate request into text fragments.
//!
//! The body is a sequence of `data: <json>` frames separated by blank lines. UTF-8
//! decoding and frame buffering across chunk boundaries are handled by
//! `eventsource-stream`; this module parses each payload and applies the stream's
//! failure policy: a malformed payload or an `error` field ends the stream. A final frame
//! that the server did not terminate with a blank line is still delivered.

use bytes::Bytes;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::types::{CancelToken, StreamPayload};
use tidings_core::{Error, Result};

/// Lazy, finite sequence of text fragments read from one response body.
///
/// Not restartable: after the first error or the end of the body it only yields `None`.
pub struct StreamAssembler {
    inner: Pin<Box<dyn Stream<Item = Result<String>> + Send>>,
}

enum Step<T> {
    Cancelled,
    Next(Option<T>),
}

impl StreamAssembler {
    pub fn new<S, E>(body: S, cancel: CancelToken) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let stream = async_stream::stream! {
            // Terminates a trailing frame so it is dispatched at end of body
            let flush = stream::once(async { Ok(Bytes::from_static(b"\n\n")) });
            let events = body.chain(flush).eventsource();
            tokio::pin!(events);
            let mut fragments = 0usize;

            loop {
                let step = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Step::Cancelled,
                    next = events.next() => Step::Next(next),
                };

                let event = match step {
                    Step::Cancelled => {
                        tracing::debug!(fragments, "stream cancelled");
                        yield Err(Error::Cancelled);
                        return;
                    }
                    Step::Next(None) => break,
                    Step::Next(Some(Err(EventStreamError::Transport(e)))) => {
                        tracing::warn!(error = %e, "stream interrupted");
                        yield Err(Error::Transport(e.to_string()));
                        return;
                    }
                    Step::Next(Some(Err(e))) => {
                        tracing::warn!(error = %e, "undecodable stream data");
                        yield Err(Error::Parse(e.to_string()));
                        return;
                    }
                    Step::Next(Some(Ok(event))) => event,
                };

                if event.data.trim().is_empty() {
                    continue;
                }

                let payload = match parse_payload(&event.data) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed frame payload");
                        yield Err(e);
                        return;
                    }
                };

                if let Some(text) = payload.text.filter(|text| !text.is_empty()) {
                    fragments += 1;
                    yield Ok(text);
                }

                if let Some(message) = payload.error.filter(|message| !message.is_empty()) {
                    tracing::warn!(fragments, error = %message, "upstream reported an error");
                    yield Err(Error::Upstream(message));
                    return;
                }
            }

            tracing::debug!(fragments, "stream finished");
        };

        Self { inner: Box::pin(stream) }
    }
}

impl Stream for StreamAssembler {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Parse the JSON payload of one `data:` frame
pub fn parse_payload(data: &str) -> Result<StreamPayload> {
    serde_json::from_str(data).map_err(|e| Error::Parse(format!("invalid frame payload: {}", e)))
}

/// Drain an assembler into the full reply text
pub async fn collect_text(mut assembler: StreamAssembler) -> Result<String> {
    let mut reply = String::new();
    while let Some(fragment) = assembler.next().await {
        reply.push_str(&fragment?);
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;

    fn body(chunks: &[&'static str]) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
        let chunks: Vec<std::io::Result<Bytes>> =
            chunks.iter().map(|chunk| Ok(Bytes::from_static(chunk.as_bytes()))).collect();
        stream::iter(chunks)
    }

    async fn drain(assembler: StreamAssembler) -> Vec<Result<String>> {
        assembler.collect().await
    }

    #[tokio::test]
    async fn test_fragments_in_arrival_order() {
        let assembler = StreamAssembler::new(
            body(&["data: {\"text\":\"Hel\"}\n\n", "data: {\"text\":\"lo\"}\n\n"]),
            CancelToken::new(),
        );

        let text = collect_text(assembler).await.unwrap();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn test_frame_split_across_chunks() {
        let assembler = StreamAssembler::new(
            body(&["data: {\"te", "xt\":\"Hel\"}\n", "\ndata: {\"text\":\"lo\"}\n\n"]),
            CancelToken::new(),
        );

        let fragments: Vec<String> = drain(assembler).await.into_iter().map(|f| f.unwrap()).collect();
        assert_eq!(fragments, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[tokio::test]
    async fn test_multibyte_character_split_across_chunks() {
        let frame = "data: {\"text\":\"你好\"}\n\n".as_bytes();
        let split = frame.iter().position(|&b| b >= 0x80).unwrap() + 1;
        let (head, tail) = frame.split_at(split);

        let chunks = vec![Ok::<_, std::io::Error>(Bytes::copy_from_slice(head)), Ok(Bytes::copy_from_slice(tail))];
        let assembler = StreamAssembler::new(stream::iter(chunks), CancelToken::new());

        assert_eq!(collect_text(assembler).await.unwrap(), "你好");
    }

    #[tokio::test]
    async fn test_several_frames_in_one_chunk() {
        let assembler = StreamAssembler::new(
            body(&["data: {\"text\":\"a\"}\n\ndata: {\"text\":\"b\"}\n\ndata: {\"text\":\"c\"}\n\n"]),
            CancelToken::new(),
        );

        assert_eq!(collect_text(assembler).await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_malformed_json_is_fatal() {
        let assembler = StreamAssembler::new(
            body(&[
                "data: {\"text\":\"ok\"}\n\n",
                "data: {not json}\n\n",
                "data: {\"text\":\"never\"}\n\n",
            ]),
            CancelToken::new(),
        );

        let items = drain(assembler).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "ok");
        assert!(matches!(items[1], Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn test_upstream_error_is_fatal() {
        let assembler = StreamAssembler::new(
            body(&["data: {\"error\":\"boom\"}\n\n", "data: {\"text\":\"never\"}\n\n"]),
            CancelToken::new(),
        );

        let items = drain(assembler).await;
        assert_eq!(items.len(), 1);
        match &items[0] {
            Err(Error::Upstream(message)) => assert_eq!(message, "boom"),
            other => panic!("Expected upstream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_text_then_error_in_same_payload() {
        let assembler = StreamAssembler::new(
            body(&["data: {\"text\":\"partial\",\"error\":\"cut off\"}\n\n"]),
            CancelToken::new(),
        );

        let items = drain(assembler).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "partial");
        assert!(matches!(items[1], Err(Error::Upstream(_))));
    }

    #[tokio::test]
    async fn test_unterminated_final_frame() {
        let assembler = StreamAssembler::new(
            body(&["data: {\"text\":\"a\"}\n\n", "data: {\"text\":\"b\"}"]),
            CancelToken::new(),
        );

        assert_eq!(collect_text(assembler).await.unwrap(), "ab");
    }

    #[tokio::test]
    async fn test_unterminated_final_error_frame() {
        let assembler = StreamAssembler::new(body(&["data: {\"error\":\"boom\"}\n"]), CancelToken::new());

        let items = drain(assembler).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(Error::Upstream(message)) if message == "boom"));
    }

    #[tokio::test]
    async fn test_empty_error_is_ignored() {
        let assembler = StreamAssembler::new(
            body(&["data: {\"text\":\"a\",\"error\":\"\"}\n\n", "data: {\"text\":\"b\"}\n\n"]),
            CancelToken::new(),
        );

        let items = drain(assembler).await;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.is_ok()));
    }

    #[tokio::test]
    async fn test_empty_text_and_comments_skipped() {
        let assembler = StreamAssembler::new(
            body(&[": keep-alive\n\n", "data: {\"text\":\"\"}\n\n", "data: {}\n\n", "data: {\"text\":\"x\"}\n\n"]),
            CancelToken::new(),
        );

        let items = drain(assembler).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), "x");
    }

    #[tokio::test]
    async fn test_transport_error_mid_stream() {
        let chunks = vec![
            Ok(Bytes::from_static(b"data: {\"text\":\"Hel\"}\n\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer")),
        ];
        let assembler = StreamAssembler::new(stream::iter(chunks), CancelToken::new());

        let items = drain(assembler).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "Hel");
        match &items[1] {
            Err(Error::Transport(message)) => assert!(message.contains("reset by peer")),
            other => panic!("Expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_stream() {
        let cancel = CancelToken::new();
        cancel.cancel();

        let assembler = StreamAssembler::new(body(&["data: {\"text\":\"Hel\"}\n\n"]), cancel);
        let items = drain(assembler).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_data() {
        let cancel = CancelToken::new();
        let pending = stream::pending::<std::io::Result<Bytes>>();
        let mut assembler = StreamAssembler::new(pending, cancel.clone());

        let trigger = tokio::spawn(async move {
            tokio::task::yield_now().await;
            cancel.cancel();
        });

        let first = assembler.next().await;
        assert!(matches!(first, Some(Err(Error::Cancelled))));
        assert!(assembler.next().await.is_none());
        trigger.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_body() {
        let assembler = StreamAssembler::new(body(&[]), CancelToken::new());
        assert_eq!(collect_text(assembler).await.unwrap(), "");
    }

    #[test]
    fn test_parse_payload() {
        let payload = parse_payload(r#"{"text":"Hel"}"#).unwrap();
        assert_eq!(payload.text.as_deref(), Some("Hel"));

        let err = parse_payload("not json").unwrap_err();
        assert!(err.to_string().contains("invalid frame payload"));
    }
}
