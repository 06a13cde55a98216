//! Streaming text → speech chunk accumulation.
//!
//! The language model streams tokens; speaking each token alone would sound
//! broken and waiting for the whole reply adds seconds of latency. The
//! accumulator cuts the growing text at sentence boundaries (or, for long
//! unpunctuated runs, at a word boundary), normalizes each cut for speech and
//! never emits the same normalized text twice within a turn.

use std::collections::HashSet;

use duet_core::{ChunkKind, ChunkingSettings, SpeechChunk, TurnId};
use sha2::{Digest, Sha256};

use crate::text_utils::{self, TextNormalizer};

/// Per-turn accumulation state.
///
/// Owned by the caller (the engine keeps one per assistant turn) and mutated
/// only through [`ChunkAccumulator`]. Discard it when the turn ends.
#[derive(Debug, Clone)]
pub struct StreamBuffer {
    turn_id: TurnId,
    full_text: String,
    /// Byte offset into `full_text` of the first character not yet handed
    /// out (or deliberately skipped).
    last_emitted_offset: usize,
    emitted_hashes: HashSet<String>,
    next_sequence: u64,
}

impl StreamBuffer {
    pub fn new(turn_id: TurnId) -> Self {
        Self {
            turn_id,
            full_text: String::new(),
            last_emitted_offset: 0,
            emitted_hashes: HashSet::new(),
            next_sequence: 1,
        }
    }

    pub const fn turn_id(&self) -> TurnId {
        self.turn_id
    }

    /// Everything received so far.
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    /// Text that has not been emitted yet.
    pub fn unsent(&self) -> &str {
        &self.full_text[self.last_emitted_offset..]
    }

    pub const fn last_emitted_offset(&self) -> usize {
        self.last_emitted_offset
    }

    /// Number of distinct chunks emitted for this turn.
    pub fn emitted_count(&self) -> usize {
        self.emitted_hashes.len()
    }
}

/// Cuts streamed text into speakable chunks.
#[derive(Debug, Clone)]
pub struct ChunkAccumulator {
    settings: ChunkingSettings,
    normalizer: TextNormalizer,
}

impl ChunkAccumulator {
    pub const fn new(settings: ChunkingSettings, normalizer: TextNormalizer) -> Self {
        Self {
            settings,
            normalizer,
        }
    }

    /// Append one streamed delta and emit a chunk if one is ready.
    ///
    /// A delta for a turn other than the buffer's is ignored.
    pub fn on_token_delta(
        &self,
        turn_id: TurnId,
        buffer: &mut StreamBuffer,
        delta: &str,
    ) -> Option<SpeechChunk> {
        if turn_id != buffer.turn_id {
            tracing::debug!(
                expected = %buffer.turn_id,
                got = %turn_id,
                "Dropping token delta for another turn"
            );
            return None;
        }

        buffer.full_text.push_str(delta);
        self.scan(buffer)
    }

    /// Replace the buffer contents with a full snapshot of the text so far.
    ///
    /// A snapshot that extends the current text behaves like a delta. One that
    /// diverges (the model rewrote earlier text) resets the unsent window to
    /// the common prefix; already-spoken text is still suppressed by the
    /// duplicate check.
    pub fn on_text_snapshot(
        &self,
        buffer: &mut StreamBuffer,
        full_text: &str,
    ) -> Option<SpeechChunk> {
        if let Some(suffix) = full_text.strip_prefix(buffer.full_text.as_str()) {
            buffer.full_text.push_str(suffix);
            return self.scan(buffer);
        }

        let common = common_prefix_len(&buffer.full_text, full_text);
        tracing::debug!(
            turn_id = %buffer.turn_id,
            common_prefix = common,
            "Text snapshot diverged, rewinding"
        );
        buffer.full_text = full_text.to_string();
        buffer.last_emitted_offset = buffer.last_emitted_offset.min(common);
        self.scan(buffer)
    }

    /// Emit whatever is left once the stream has ended.
    pub fn flush(&self, buffer: &mut StreamBuffer) -> Option<SpeechChunk> {
        if buffer.unsent().trim().is_empty() {
            buffer.last_emitted_offset = buffer.full_text.len();
            return None;
        }
        self.emit(buffer, buffer.full_text.len(), ChunkKind::Final)
    }

    fn scan(&self, buffer: &mut StreamBuffer) -> Option<SpeechChunk> {
        let unsent = buffer.unsent();

        if let Some(end) = text_utils::last_sentence_end(unsent) {
            let candidate = &unsent[..end];
            if text_utils::word_count(candidate) >= self.settings.min_sentence_words {
                let end = buffer.last_emitted_offset + end;
                return self.emit(buffer, end, ChunkKind::Sentence);
            }
        }

        if unsent.chars().count() > self.settings.fallback_chars
            && text_utils::word_count(unsent) >= self.settings.fallback_min_words
        {
            // Cut before the trailing partial word; it stays buffered.
            if let Some(cut) = unsent.rfind(char::is_whitespace).filter(|&c| c > 0) {
                let end = buffer.last_emitted_offset + cut;
                return self.emit(buffer, end, ChunkKind::Fallback);
            }
        }

        None
    }

    /// Emit `full_text[last_emitted_offset..end]`. The offset always
    /// advances, even when the candidate is suppressed.
    fn emit(&self, buffer: &mut StreamBuffer, end: usize, kind: ChunkKind) -> Option<SpeechChunk> {
        let raw = buffer.full_text[buffer.last_emitted_offset..end].trim().to_string();
        buffer.last_emitted_offset = end;

        let normalized = self.normalizer.normalize(&raw);
        if !normalized.cleaned_text.chars().any(char::is_alphanumeric) {
            tracing::debug!(turn_id = %buffer.turn_id, "Skipping unspeakable chunk");
            return None;
        }

        let hash = chunk_hash(&normalized.cleaned_text);
        if !buffer.emitted_hashes.insert(hash) {
            tracing::debug!(turn_id = %buffer.turn_id, text = %raw, "Suppressing duplicate chunk");
            return None;
        }

        let sequence_number = buffer.next_sequence;
        buffer.next_sequence += 1;

        tracing::debug!(
            turn_id = %buffer.turn_id,
            sequence = sequence_number,
            ?kind,
            "Emitting speech chunk"
        );

        Some(SpeechChunk {
            text: raw,
            normalized_text: normalized.cleaned_text,
            emotion: normalized.emotion,
            emotion_intensity: normalized.emotion_intensity,
            sequence_number,
            kind,
        })
    }
}

/// SHA-256 (hex) of the whitespace-collapsed, lowercased text.
pub fn chunk_hash(normalized_text: &str) -> String {
    let canonical = text_utils::collapse_whitespace(normalized_text).to_lowercase();
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

/// Length in bytes of the longest common prefix, on a char boundary.
fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map_or_else(|| a.len().min(b.len()), |((i, _), _)| i)
}
