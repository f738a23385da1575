//! Incremental sentence segmentation for streamed model output.
//!
//! Fragments arrive from the language model with no boundary guarantee; this
//! buffers them and emits a sentence the moment its terminal marker is seen,
//! so synthesis can start well before the reply is complete.

/// Sentence-terminal markers for Japanese dialogue output.
pub const JAPANESE_TERMINATORS: &[char] = &['。', '！', '？'];

/// Turns an unbounded stream of text fragments into complete sentences.
///
/// Every character fed in comes back out: the concatenation of all emitted
/// sentences plus the final [`flush`](Self::flush) remainder equals the
/// concatenation of all fed chunks, except that sentences are trimmed of
/// surrounding whitespace at emission (lossy only with respect to that
/// whitespace). Whitespace-only sentences are suppressed entirely.
#[derive(Debug, Clone)]
pub struct SentenceSegmenter {
    buffer: String,
    terminators: Vec<char>,
}

impl SentenceSegmenter {
    /// Creates a segmenter with the default Japanese terminators (。！？).
    pub fn new() -> Self {
        Self::with_terminators(JAPANESE_TERMINATORS.iter().copied())
    }

    /// Creates a segmenter with a custom terminator set.
    ///
    /// The marker set is language-dependent; callers targeting other locales
    /// supply their own (e.g. `['.', '!', '?']`).
    pub fn with_terminators(terminators: impl IntoIterator<Item = char>) -> Self {
        Self {
            buffer: String::new(),
            terminators: terminators.into_iter().collect(),
        }
    }

    /// Appends a fragment and returns every sentence completed by it,
    /// markers included, in stream order.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut sentences = Vec::new();
        let mut consumed = 0;
        for (idx, ch) in self.buffer.char_indices() {
            if self.terminators.contains(&ch) {
                let end = idx + ch.len_utf8();
                let sentence = self.buffer[consumed..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                consumed = end;
            }
        }
        if consumed > 0 {
            self.buffer.drain(..consumed);
        }
        sentences
    }

    /// Returns and clears the buffered remainder (trimmed); empty string if
    /// nothing is pending. Called when the upstream stream ends.
    pub fn flush(&mut self) -> String {
        std::mem::take(&mut self.buffer).trim().to_string()
    }

    /// The not-yet-terminated tail currently buffered.
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new()
    }
}
