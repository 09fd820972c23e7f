//! Completion assembly over the decoded chunk stream.
//!
//! Drives a chunk sequence to termination and produces exactly one
//! [`ChatCompletion`] per request:
//! - accumulates partial text in arrival order
//! - captures usage counts from the terminal chunk
//! - cuts off a backend stuck repeating the same chunk (repeat guard)
//! - returns a partial completion when the transport closes early
//!
//! Decode failures and transport errors abort instead; those are the only
//! stream outcomes without a completion.

use futures::{pin_mut, Stream, StreamExt};
use uuid::Uuid;

use crate::errors::ChatError;
use crate::types::{
    ChatChunk, ChatCompletion, CompletionChoice, CompletionMessage, CompletionUsage,
    FinishReason, Role,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// The `object` discriminator carried by every completion record.
const COMPLETION_OBJECT: &str = "chat.completion";

/// Placeholder `system_fingerprint` for local backends.
///
/// The hosted API uses this field to identify its serving configuration.
/// Local backends have no equivalent, so every record carries this stub.
const SYSTEM_FINGERPRINT: &str = "fp_local_stub";

// ─── RepeatGuard ─────────────────────────────────────────────────────────────

/// Tracks consecutive identical chunk texts.
///
/// Local models occasionally degenerate into emitting the same token forever
/// (a lone newline, typically) without ever sending a terminal chunk. The
/// guard counts consecutive identical texts and trips once a run exceeds the
/// configured threshold, letting the assembler cut the stream off instead of
/// hanging.
///
/// Starts primed with the empty string: a stream that opens with empty
/// chunks counts them as a run from the first chunk, exactly as a mid-stream
/// run would. An empty chunk indicates a stalled backend the same way a
/// repeated token does.
#[derive(Debug)]
pub struct RepeatGuard {
    threshold: u32,
    last: String,
    repeats: u32,
}

impl RepeatGuard {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            last: String::new(),
            repeats: 0,
        }
    }

    /// Record one chunk's text. Returns `true` once the run of identical
    /// texts has exceeded the threshold.
    pub fn record(&mut self, text: &str) -> bool {
        if text == self.last {
            self.repeats += 1;
        } else {
            self.last.clear();
            self.last.push_str(text);
            self.repeats = 0;
        }
        self.repeats > self.threshold
    }

    /// Bytes the current run has contributed to the content buffer.
    ///
    /// At the moment the guard trips, the buffer tail holds exactly
    /// `repeats` appended copies of `last`: one from the chunk that opened
    /// the run and one per match before the trip (the tripping chunk itself
    /// is never appended). A primed empty-string run contributes nothing
    /// either way.
    fn run_len(&self) -> usize {
        self.last.len() * self.repeats as usize
    }
}

// ─── CompletionAssembler ─────────────────────────────────────────────────────

/// Consumes a chunk stream and produces exactly one completion record.
///
/// One assembler serves one request. It exclusively owns the accumulation
/// buffer and the repeat guard, and takes the stream by value so that every
/// exit path drops it, closing the underlying connection.
pub struct CompletionAssembler {
    model: String,
    guard: RepeatGuard,
    content: String,
}

impl CompletionAssembler {
    pub fn new(model: impl Into<String>, idle_repeat_threshold: u32) -> Self {
        Self {
            model: model.into(),
            guard: RepeatGuard::new(idle_repeat_threshold),
            content: String::new(),
        }
    }

    /// Drive the stream to termination and build the completion record.
    ///
    /// Per chunk, in order: update the repeat guard, honor a terminal chunk,
    /// honor a guard trip, otherwise append the text. The terminal chunk's
    /// own text is never appended. Three terminations yield a completion:
    ///
    /// - terminal chunk: usage counts from the chunk (absent counts read 0)
    /// - guard trip: the trailing repeated run is removed, usage counts 0
    /// - stream end without a terminal chunk: partial text, usage counts 0
    ///
    /// A decode failure or transport read error aborts with no completion.
    pub async fn assemble<S>(mut self, stream: S) -> Result<ChatCompletion, ChatError>
    where
        S: Stream<Item = Result<ChatChunk, ChatError>>,
    {
        pin_mut!(stream);

        while let Some(item) = stream.next().await {
            let chunk = item?;
            let text = chunk.message.content;
            let tripped = self.guard.record(&text);

            if chunk.done {
                let prompt = chunk.prompt_eval_count.unwrap_or(0);
                let completion = chunk.eval_count.unwrap_or(0);
                tracing::debug!(
                    prompt_tokens = prompt,
                    completion_tokens = completion,
                    content_len = self.content.len(),
                    "stream finished"
                );
                return Ok(self.finish(prompt, completion));
            }

            if tripped {
                let run_len = self.guard.run_len();
                self.content.truncate(self.content.len() - run_len);
                tracing::warn!(
                    repeats = self.guard.repeats,
                    repeated_len = self.guard.last.len(),
                    content_len = self.content.len(),
                    "repeat guard tripped, terminating stream early"
                );
                return Ok(self.finish(0, 0));
            }

            self.content.push_str(&text);
        }

        // Transport closed without a terminal chunk. The partial text is
        // still a usable answer; usage counts never arrived.
        tracing::warn!(
            content_len = self.content.len(),
            "stream closed before terminal chunk"
        );
        Ok(self.finish(0, 0))
    }

    /// Build the completion record. Runs exactly once per request, on every
    /// terminating path, so the record shape never depends on how the
    /// stream ended.
    fn finish(self, prompt_tokens: u64, completion_tokens: u64) -> ChatCompletion {
        ChatCompletion {
            id: format!("chatcmpl-{}", Uuid::new_v4()),
            object: COMPLETION_OBJECT.to_string(),
            created: chrono::Utc::now().timestamp_millis(),
            model: self.model,
            system_fingerprint: SYSTEM_FINGERPRINT.to_string(),
            choices: vec![CompletionChoice {
                index: 0,
                message: CompletionMessage {
                    role: Role::Assistant,
                    content: self.content,
                },
                finish_reason: FinishReason::Stop,
            }],
            usage: CompletionUsage::from_counts(prompt_tokens, completion_tokens),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkMessage;
    use futures::stream;

    fn chunk(text: &str, done: bool) -> Result<ChatChunk, ChatError> {
        Ok(ChatChunk {
            message: ChunkMessage {
                content: text.to_string(),
            },
            done,
            prompt_eval_count: None,
            eval_count: None,
        })
    }

    fn final_chunk(prompt: u64, completion: u64) -> Result<ChatChunk, ChatError> {
        Ok(ChatChunk {
            message: ChunkMessage {
                content: String::new(),
            },
            done: true,
            prompt_eval_count: Some(prompt),
            eval_count: Some(completion),
        })
    }

    async fn assemble(chunks: Vec<Result<ChatChunk, ChatError>>) -> ChatCompletion {
        CompletionAssembler::new("phi4:14b-q8_0", 5)
            .assemble(stream::iter(chunks))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_assembles_text_and_usage() {
        let completion = assemble(vec![
            chunk("Hel", false),
            chunk("lo", false),
            final_chunk(3, 2),
        ])
        .await;

        assert_eq!(completion.choices.len(), 1);
        let choice = &completion.choices[0];
        assert_eq!(choice.index, 0);
        assert_eq!(choice.message.role, Role::Assistant);
        assert_eq!(choice.message.content, "Hello");
        assert_eq!(choice.finish_reason, FinishReason::Stop);
        assert_eq!(completion.usage.prompt_tokens, "3");
        assert_eq!(completion.usage.completion_tokens, "2");
        assert_eq!(completion.usage.total_tokens, "5");
        assert_eq!(completion.object, "chat.completion");
        assert_eq!(completion.model, "phi4:14b-q8_0");
        assert_eq!(completion.system_fingerprint, "fp_local_stub");
        assert!(completion.id.starts_with("chatcmpl-"));
        assert!(completion.created > 0);
    }

    #[tokio::test]
    async fn test_newline_loop_trips_guard() {
        // Seven identical non-terminal chunks: the seventh pushes the run
        // past the threshold of 5 and the stream is cut off.
        let chunks = (0..7).map(|_| chunk("\n", false)).collect();
        let completion = assemble(chunks).await;

        assert_eq!(
            completion.choices[0].message.content, "",
            "the repeated run should not appear in the content"
        );
        assert_eq!(completion.usage.prompt_tokens, "0");
        assert_eq!(completion.usage.completion_tokens, "0");
        assert_eq!(completion.usage.total_tokens, "0");
        assert_eq!(completion.choices[0].finish_reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn test_guard_trip_keeps_text_before_the_run() {
        let mut chunks = vec![chunk("The answer is 42.", false)];
        chunks.extend((0..7).map(|_| chunk("\n", false)));
        let completion = assemble(chunks).await;

        assert_eq!(completion.choices[0].message.content, "The answer is 42.");
        assert_eq!(completion.usage.total_tokens, "0");
    }

    #[tokio::test]
    async fn test_exactly_threshold_repeats_do_not_trip() {
        // Six identical chunks reach repeats == 5, which is not strictly
        // more than the threshold; a terminal chunk then ends the stream
        // normally with all six copies intact.
        let mut chunks: Vec<_> = (0..6).map(|_| chunk("x", false)).collect();
        chunks.push(final_chunk(1, 6));
        let completion = assemble(chunks).await;

        assert_eq!(completion.choices[0].message.content, "xxxxxx");
        assert_eq!(completion.usage.total_tokens, "7");
    }

    #[tokio::test]
    async fn test_guard_requires_consecutive_repeats() {
        let mut chunks = Vec::new();
        for _ in 0..8 {
            chunks.push(chunk("a", false));
            chunks.push(chunk("b", false));
        }
        chunks.push(final_chunk(2, 16));
        let completion = assemble(chunks).await;

        assert_eq!(completion.choices[0].message.content, "ab".repeat(8));
        assert_eq!(completion.usage.completion_tokens, "16");
    }

    #[tokio::test]
    async fn test_leading_empty_chunks_trip_guard() {
        // The guard starts primed with "", so six empty chunks form a run
        // that exceeds the threshold with nothing ever appended.
        let chunks = (0..6).map(|_| chunk("", false)).collect();
        let completion = assemble(chunks).await;

        assert_eq!(completion.choices[0].message.content, "");
        assert_eq!(completion.usage.total_tokens, "0");
    }

    #[tokio::test]
    async fn test_empty_stream_yields_empty_completion() {
        let completion = assemble(vec![]).await;

        assert_eq!(completion.choices.len(), 1);
        assert_eq!(completion.choices[0].message.content, "");
        assert_eq!(completion.choices[0].finish_reason, FinishReason::Stop);
        assert_eq!(completion.usage.prompt_tokens, "0");
        assert_eq!(completion.usage.completion_tokens, "0");
        assert_eq!(completion.usage.total_tokens, "0");
    }

    #[tokio::test]
    async fn test_early_close_returns_partial_text() {
        let completion = assemble(vec![chunk("par", false), chunk("tial", false)]).await;

        assert_eq!(completion.choices[0].message.content, "partial");
        assert_eq!(completion.usage.total_tokens, "0");
        assert_eq!(completion.choices[0].finish_reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn test_terminal_chunk_text_not_appended() {
        let terminal = Ok(ChatChunk {
            message: ChunkMessage {
                content: "IGNORED".to_string(),
            },
            done: true,
            prompt_eval_count: Some(1),
            eval_count: Some(1),
        });
        let completion = assemble(vec![chunk("Hi", false), terminal]).await;

        assert_eq!(completion.choices[0].message.content, "Hi");
    }

    #[tokio::test]
    async fn test_missing_usage_counts_default_to_zero() {
        let completion = assemble(vec![chunk("x", false), chunk("", true)]).await;

        assert_eq!(completion.choices[0].message.content, "x");
        assert_eq!(completion.usage.prompt_tokens, "0");
        assert_eq!(completion.usage.completion_tokens, "0");
        assert_eq!(completion.usage.total_tokens, "0");
    }

    #[tokio::test]
    async fn test_decode_failure_aborts_without_completion() {
        let chunks = vec![
            chunk("valid text so far", false),
            Err(ChatError::DecodeError {
                reason: "expected value at line 1 column 1".to_string(),
            }),
        ];
        let result = CompletionAssembler::new("phi4:14b-q8_0", 5)
            .assemble(stream::iter(chunks))
            .await;

        assert!(matches!(result, Err(ChatError::DecodeError { .. })));
    }

    #[tokio::test]
    async fn test_transport_error_aborts_without_completion() {
        let chunks = vec![
            chunk("x", false),
            Err(ChatError::StreamError {
                reason: "connection reset by peer".to_string(),
            }),
        ];
        let result = CompletionAssembler::new("phi4:14b-q8_0", 5)
            .assemble(stream::iter(chunks))
            .await;

        assert!(matches!(result, Err(ChatError::StreamError { .. })));
    }

    #[tokio::test]
    async fn test_identical_streams_yield_identical_records() {
        let make = || {
            vec![
                chunk("deter", false),
                chunk("ministic", false),
                final_chunk(4, 8),
            ]
        };
        let a = assemble(make()).await;
        let b = assemble(make()).await;

        assert_eq!(a.choices[0].message.content, b.choices[0].message.content);
        assert_eq!(a.choices[0].finish_reason, b.choices[0].finish_reason);
        assert_eq!(a.usage.prompt_tokens, b.usage.prompt_tokens);
        assert_eq!(a.usage.completion_tokens, b.usage.completion_tokens);
        assert_eq!(a.usage.total_tokens, b.usage.total_tokens);
        assert_ne!(a.id, b.id, "separate requests should get distinct ids");
    }

    #[test]
    fn test_repeat_guard_resets_on_change() {
        let mut guard = RepeatGuard::new(2);
        assert!(!guard.record("a"));
        assert!(!guard.record("a"));
        assert!(!guard.record("b"), "a different text should reset the run");
        assert!(!guard.record("b"));
        assert!(!guard.record("b"));
        assert!(guard.record("b"), "repeats must exceed the threshold to trip");
    }

    #[test]
    fn test_repeat_guard_primed_with_empty_string() {
        let mut guard = RepeatGuard::new(1);
        assert!(!guard.record(""), "first empty chunk counts as a repeat of the primed state");
        assert!(guard.record(""));
    }

    #[test]
    fn test_repeat_guard_zero_threshold() {
        let mut guard = RepeatGuard::new(0);
        assert!(!guard.record("x"));
        assert!(guard.record("x"), "any repeat exceeds a zero threshold");
    }

    #[test]
    fn test_repeat_guard_run_len() {
        let mut guard = RepeatGuard::new(1);
        guard.record("ab");
        guard.record("ab");
        assert!(guard.record("ab"), "third copy trips a threshold of 1");
        assert_eq!(guard.run_len(), 4, "two copies of \"ab\" were appended before the trip");
    }
}
