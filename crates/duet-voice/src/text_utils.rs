//! Text preprocessing for speech.
//!
//! Turns raw model output into text a synthesizer can read aloud: strips
//! markdown and reasoning blocks, replaces laughter with one canonical marker,
//! drops emoji and stray symbols, and derives a best-effort emotion from the
//! markers it saw plus the configured [`EmotionClassifier`].

use std::sync::Arc;

use duet_core::{Emotion, EmotionClassifier, EmotionScore, NeutralClassifier};

/// Canonical marker that replaces every form of written laughter.
pub const LAUGH_MARKER: &str = "[laugh]";

/// Placeholder spoken in place of a fenced code block.
const CODE_PLACEHOLDER: &str = "Code omitted.";

/// Emoji that read as laughter.
const LAUGH_EMOJI: &[char] = &['😂', '🤣', '😆', '😹', '😁'];

/// Emoji that carry a clear emotion, with the emotion they map to.
const EMOTION_EMOJI: &[(char, Emotion)] = &[
    ('😊', Emotion::Happy),
    ('🙂', Emotion::Happy),
    ('😄', Emotion::Happy),
    ('😃', Emotion::Happy),
    ('❤', Emotion::Happy),
    ('🥰', Emotion::Happy),
    ('😢', Emotion::Sad),
    ('😭', Emotion::Sad),
    ('😞', Emotion::Sad),
    ('😔', Emotion::Sad),
    ('😡', Emotion::Angry),
    ('😠', Emotion::Angry),
    ('🤬', Emotion::Angry),
    ('😮', Emotion::Surprised),
    ('😲', Emotion::Surprised),
    ('😯', Emotion::Surprised),
    ('🤯', Emotion::Surprised),
    ('😨', Emotion::Fearful),
    ('😱', Emotion::Fearful),
    ('😰', Emotion::Fearful),
];

/// Written laughter that is a word on its own.
const LAUGH_WORDS: &[&str] = &["lol", "lool", "lolol", "lmao", "lmfao", "rofl", "笑"];

/// Result of normalizing one piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedText {
    pub cleaned_text: String,
    pub emotion: Emotion,
    pub emotion_intensity: f32,
}

impl NormalizedText {
    fn neutral(text: String) -> Self {
        Self {
            cleaned_text: text,
            emotion: Emotion::Neutral,
            emotion_intensity: 0.0,
        }
    }
}

/// Cleans generated text for speech and tags it with an emotion.
///
/// Pure and deterministic for a deterministic classifier.
#[derive(Clone)]
pub struct TextNormalizer {
    classifier: Arc<dyn EmotionClassifier>,
}

impl std::fmt::Debug for TextNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextNormalizer").finish_non_exhaustive()
    }
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new(Arc::new(NeutralClassifier))
    }
}

impl TextNormalizer {
    pub fn new(classifier: Arc<dyn EmotionClassifier>) -> Self {
        Self { classifier }
    }

    /// Normalize `raw` for speech.
    ///
    /// If cleanup would erase every letter and digit of an input that had
    /// some, and found no laughter or emoji to account for them, the trimmed
    /// original is returned with a neutral emotion instead.
    pub fn normalize(&self, raw: &str) -> NormalizedText {
        let plain = strip_markdown(raw);
        let (symbol_free, markers) = strip_symbols(&plain);
        let (cleaned, laughs) = canonicalize_laughter(&symbol_free);

        let found_markers = laughs > 0 || markers.dominant().is_some();
        if !found_markers && !has_speakable(&cleaned) && has_speakable(raw) {
            return NormalizedText::neutral(raw.trim().to_string());
        }

        let mut score = EmotionScore::neutral();
        if laughs > 0 {
            #[allow(clippy::cast_precision_loss)]
            let extra = (laughs - 1) as f32 * 0.15;
            score = score.stronger(EmotionScore::new(Emotion::Happy, 0.5 + extra));
        }
        if let Some(emotion) = markers.dominant() {
            score = score.stronger(EmotionScore::new(emotion, 0.6));
        }

        let without_marker = cleaned.replace(LAUGH_MARKER, " ");
        match self.classifier.classify(without_marker.trim()) {
            Ok(classified) => score = score.stronger(classified),
            Err(e) => tracing::debug!(error = %e, "Emotion classifier failed, keeping markers"),
        }

        if score.emotion != Emotion::Neutral {
            let bangs = raw.chars().filter(|&c| c == '!').count().min(3);
            #[allow(clippy::cast_precision_loss)]
            let boost = bangs as f32 * 0.1;
            score = EmotionScore::new(score.emotion, score.intensity + boost);
        }

        NormalizedText {
            cleaned_text: cleaned,
            emotion: score.emotion,
            emotion_intensity: score.intensity,
        }
    }
}

// ── Sentence helpers ───────────────────────────────────────────────

/// Byte offset just past the last sentence-terminator run in `text` that is
/// followed by whitespace.
///
/// A terminator run is one or more of `.`, `!`, `?`, optionally followed by
/// closing quotes or brackets. Returns `None` when no such boundary exists
/// (a terminator at the very end does not count: more text may follow).
pub fn last_sentence_end(text: &str) -> Option<usize> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut last = None;
    let mut i = 0;

    while i < chars.len() {
        if !is_terminator(chars[i].1) {
            i += 1;
            continue;
        }

        let mut j = i;
        while j < chars.len() && is_terminator(chars[j].1) {
            j += 1;
        }
        while j < chars.len() && is_closing(chars[j].1) {
            j += 1;
        }

        if j < chars.len() && chars[j].1.is_whitespace() {
            last = Some(chars[j].0);
        }
        i = j.max(i + 1);
    }

    last
}

/// Number of whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Collapse whitespace runs to single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

const fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

const fn is_closing(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '”' | '’' | '»')
}

fn has_speakable(text: &str) -> bool {
    text.replace(LAUGH_MARKER, "")
        .chars()
        .any(char::is_alphanumeric)
}

// ── Markdown ───────────────────────────────────────────────────────

/// Strip markdown formatting, producing plain text.
///
/// Reasoning blocks are removed entirely, fenced code becomes a short
/// placeholder, headings/lists/quotes/emphasis/links lose their markup, and
/// HTML tags are dropped.
pub fn strip_markdown(text: &str) -> String {
    let text = strip_reasoning_blocks(text);

    let mut out = String::with_capacity(text.len());
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            if !in_fence {
                push_segment(&mut out, CODE_PLACEHOLDER);
            }
            in_fence = !in_fence;
            continue;
        }
        if in_fence || is_horizontal_rule(trimmed) {
            continue;
        }

        let stripped = strip_line(trimmed);
        push_segment(&mut out, stripped.trim());
    }

    collapse_whitespace(&out)
}

fn push_segment(out: &mut String, segment: &str) {
    if segment.is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push(' ');
    }
    out.push_str(segment);
}

/// Remove `<think>…</think>`-style blocks (case-insensitive). An unclosed
/// block hides everything after it: the model is still reasoning.
fn strip_reasoning_blocks(text: &str) -> String {
    const PAIRS: &[(&str, &str)] = &[
        ("<think", "</think>"),
        ("<reasoning", "</reasoning>"),
        ("<|start_thinking|>", "<|end_thinking|>"),
    ];

    let mut result = text.to_string();
    for (open, close) in PAIRS {
        result = remove_tag_pair(&result, open, close);
    }
    result
}

fn remove_tag_pair(text: &str, open: &str, close: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    while let Some(found) = lower[cursor..].find(open) {
        let start = cursor + found;
        out.push_str(&text[cursor..start]);

        let Some(tag_end) = lower[start..].find('>').map(|i| start + i + 1) else {
            return out;
        };
        match lower[tag_end..].find(close) {
            Some(i) => cursor = tag_end + i + close.len(),
            None => return out,
        }
    }

    out.push_str(&text[cursor..]);
    out
}

fn is_horizontal_rule(line: &str) -> bool {
    let marks: Vec<char> = line.chars().filter(|c| !c.is_whitespace()).collect();
    marks.len() >= 3
        && matches!(marks[0], '-' | '*' | '_')
        && marks.iter().all(|&c| c == marks[0])
}

fn strip_line(line: &str) -> String {
    let mut s = line.trim_start_matches('>').trim_start();
    s = s.trim_start_matches('#').trim_start();

    let s = strip_list_marker(s);
    let s = strip_links(&s);
    let s = strip_html_tags(&s);
    s.replace("**", "").replace("__", "").replace("~~", "")
}

fn strip_list_marker(line: &str) -> String {
    for bullet in ["- ", "* ", "+ ", "• "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return rest.to_string();
        }
    }

    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let after = &line[digits..];
        if let Some(rest) = after.strip_prefix(". ").or_else(|| after.strip_prefix(") ")) {
            return rest.to_string();
        }
    }

    line.to_string()
}

/// `[text](url)` → `text`, `![alt](url)` → `alt`.
fn strip_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find("](").map(|i| open + i) else {
            break;
        };
        let Some(paren_end) = rest[close..].find(')').map(|i| close + i) else {
            break;
        };

        let before = rest[..open].strip_suffix('!').unwrap_or(&rest[..open]);
        out.push_str(before);
        out.push_str(&rest[open + 1..close]);
        rest = &rest[paren_end + 1..];
    }

    out.push_str(rest);
    out
}

fn strip_html_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        // Only treat `<` as a tag when it opens something tag-like.
        if c == '<' && chars.peek().is_some_and(|n| n.is_ascii_alphabetic() || *n == '/') {
            for inner in chars.by_ref() {
                if inner == '>' {
                    break;
                }
            }
            out.push(' ');
        } else {
            out.push(c);
        }
    }

    out
}

// ── Symbols and emoji ──────────────────────────────────────────────

/// Counts of emotion-bearing emoji seen while stripping.
#[derive(Debug, Default)]
struct EmojiMarkers {
    counts: Vec<(Emotion, usize)>,
}

impl EmojiMarkers {
    fn record(&mut self, emotion: Emotion) {
        match self.counts.iter_mut().find(|(e, _)| *e == emotion) {
            Some((_, n)) => *n += 1,
            None => self.counts.push((emotion, 1)),
        }
    }

    /// Most frequent emotion; ties go to the one seen first.
    fn dominant(&self) -> Option<Emotion> {
        let mut best: Option<(Emotion, usize)> = None;
        for &(emotion, n) in &self.counts {
            if best.is_none_or(|(_, m)| n > m) {
                best = Some((emotion, n));
            }
        }
        best.map(|(e, _)| e)
    }
}

/// Drop brackets, stray symbols and emoji. Laugh emoji become the word
/// `haha` so the laughter pass picks them up.
fn strip_symbols(text: &str) -> (String, EmojiMarkers) {
    let mut out = String::with_capacity(text.len());
    let mut markers = EmojiMarkers::default();
    let mut prev: Option<char> = None;

    for c in text.chars() {
        if LAUGH_EMOJI.contains(&c) {
            out.push_str(" haha ");
            prev = None;
            continue;
        }
        if let Some((_, emotion)) = EMOTION_EMOJI.iter().find(|(e, _)| *e == c) {
            markers.record(*emotion);
            out.push(' ');
            prev = None;
            continue;
        }
        // Inline emphasis marks vanish; anything else that separates words
        // becomes a space.
        if matches!(c, '*' | '`' | '~' | '^') {
            continue;
        }
        if is_emoji(c)
            || matches!(
                c,
                '[' | ']' | '{' | '}' | '(' | ')' | '<' | '>' | '_' | '#' | '|' | '\\' | '='
                    | '@'
            )
        {
            out.push(' ');
            prev = None;
            continue;
        }

        // Collapse runs of `!` and `?` to one mark.
        if matches!(c, '!' | '?') && prev == Some(c) {
            continue;
        }
        out.push(c);
        prev = Some(c);
    }

    let collapsed = tidy_punctuation(&collapse_whitespace(&out));
    let cleaned = collapsed
        .trim_start_matches(|c: char| matches!(c, ',' | ';' | ':' | '.' | '-'))
        .trim_start()
        .to_string();
    (cleaned, markers)
}

/// Remove the space a dropped symbol left before punctuation (`word .`).
fn tidy_punctuation(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '.' | ',' | '!' | '?' | ';' | ':') && out.ends_with(' ') {
            out.pop();
        }
        out.push(c);
    }
    out
}

const fn is_emoji(c: char) -> bool {
    matches!(c as u32,
        0x1F000..=0x1FAFF | 0x2600..=0x27BF | 0xFE0F | 0x200D | 0x2B50 | 0x2B55)
}

// ── Laughter ───────────────────────────────────────────────────────

/// Replace every form of written laughter with [`LAUGH_MARKER`], collapsing
/// adjacent laughs into one. Returns the text and the number of markers.
fn canonicalize_laughter(text: &str) -> (String, usize) {
    let text = split_cjk_laughter(text);
    let mut words: Vec<&str> = Vec::new();
    let mut laughs = 0;

    for token in text.split_whitespace() {
        let core = token.trim_matches(|c: char| c.is_ascii_punctuation());
        if is_laugh_token(core) {
            if words.last() != Some(&LAUGH_MARKER) {
                words.push(LAUGH_MARKER);
                laughs += 1;
            }
        } else {
            words.push(token);
        }
    }

    (words.join(" "), laughs)
}

/// Laughter in scripts written without spaces (`哈哈`, `ㅋㅋ`) can sit
/// inside a word; pull such runs out as separate tokens.
fn split_cjk_laughter(text: &str) -> String {
    const RUN_CHARS: &[char] = &['哈', '呵', 'ㅋ', 'ㅎ'];

    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if RUN_CHARS.contains(&c) {
            let run = chars[i..].iter().take_while(|&&x| x == c).count();
            if run >= 2 {
                out.push_str(" haha ");
                i += run;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }

    out
}

fn is_laugh_token(core: &str) -> bool {
    if core.is_empty() {
        return false;
    }
    let lower = core.to_lowercase();
    if LAUGH_WORDS.contains(&lower.as_str()) {
        return true;
    }

    is_repeated_syllable(&lower)
        || is_single_char_run(&lower, 'w', 3)
        || is_single_char_run(&lower, 'k', 4)
        || is_single_char_run(&lower, '5', 3)
}

/// `haha`, `hahaha`, `hehe`, `jajaja`, `ahah`, with an optional trailing
/// half-syllable (`hahah`).
fn is_repeated_syllable(word: &str) -> bool {
    const SYLLABLES: &[&str] = &["ha", "he", "hi", "ja", "je", "ah", "ho"];

    SYLLABLES.iter().any(|syl| {
        let mut rest = word;
        let mut repeats = 0;
        while let Some(r) = rest.strip_prefix(syl) {
            rest = r;
            repeats += 1;
        }
        repeats >= 2 && (rest.is_empty() || syl.starts_with(rest))
    })
}

fn is_single_char_run(word: &str, c: char, min: usize) -> bool {
    word.chars().count() >= min && word.chars().all(|x| x == c)
}
