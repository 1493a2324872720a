//! Fence extraction state machine.
//!
//! Separates an arbitrarily-chunked text stream into prose and fenced
//! code-block content. Deltas may split a fence delimiter or a language tag
//! at any byte, so the machine never emits a trailing run of backticks until
//! the next character proves whether it completes a delimiter.
//!
//! State is threaded explicitly: `feed(state, delta)` returns the successor
//! state plus the segments that became unambiguous, and `finish(state)`
//! flushes whatever code is still buffered when the stream ends inside an
//! unterminated block.

/// The fence delimiter that opens and closes a code block.
const FENCE: &str = "```";

/// One classified piece of stream output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Prose(String),
    Code(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Mode {
    #[default]
    Outside,
    AwaitingLanguageTag,
    Inside,
}

/// Working state of the extractor for one stream.
///
/// `pending` holds only text not yet classified: at most a two-backtick
/// residual in `Outside`/`Inside`, or the partial language tag while
/// `AwaitingLanguageTag`. `scanned` marks how far `pending` has already been
/// searched for the tag-terminating newline, so a tag split across many
/// deltas is still scanned linearly.
#[derive(Debug, Clone, Default)]
pub struct ExtractorState {
    mode: Mode,
    pending: String,
    scanned: usize,
}

impl ExtractorState {
    /// True once an opening delimiter has been consumed and the closing one
    /// has not yet arrived (language-tag line included).
    pub fn in_code_block(&self) -> bool {
        !matches!(self.mode, Mode::Outside)
    }
}

/// Consume one delta, returning the successor state and every segment that
/// the new input resolved. Total over any input; never fails.
pub fn feed(mut state: ExtractorState, delta: &str) -> (ExtractorState, Vec<Segment>) {
    state.pending.push_str(delta);
    let mut out = Vec::new();

    loop {
        match state.mode {
            Mode::Outside => {
                if let Some(at) = state.pending.find(FENCE) {
                    if at > 0 {
                        out.push(Segment::Prose(state.pending[..at].to_string()));
                    }
                    state.pending.drain(..at + FENCE.len());
                    state.scanned = 0;
                    state.mode = Mode::AwaitingLanguageTag;
                } else {
                    // Hold back a partial delimiter; everything before it is prose.
                    let cut = state.pending.len() - trailing_backtick_run(&state.pending);
                    if cut > 0 {
                        let prose: String = state.pending.drain(..cut).collect();
                        out.push(Segment::Prose(prose));
                    }
                    break;
                }
            }
            Mode::AwaitingLanguageTag => {
                match state.pending[state.scanned..].find('\n') {
                    Some(rel) => {
                        // Drop the language tag line, newline included.
                        state.pending.drain(..=state.scanned + rel);
                        state.scanned = 0;
                        state.mode = Mode::Inside;
                    }
                    None => {
                        state.scanned = state.pending.len();
                        break;
                    }
                }
            }
            Mode::Inside => {
                if let Some(at) = state.pending.find(FENCE) {
                    if at > 0 {
                        out.push(Segment::Code(state.pending[..at].to_string()));
                    }
                    state.pending.drain(..at + FENCE.len());
                    state.mode = Mode::Outside;
                } else {
                    let cut = state.pending.len() - trailing_backtick_run(&state.pending);
                    if cut > 0 {
                        let code: String = state.pending.drain(..cut).collect();
                        out.push(Segment::Code(code));
                    }
                    break;
                }
            }
        }
    }

    (state, out)
}

/// Flush the machine at end-of-stream.
///
/// Inside an unterminated block, any buffered code is emitted once; a
/// trailing backtick run is an unresolved delimiter candidate and is dropped,
/// as is anything pending outside a block.
pub fn finish(state: ExtractorState) -> Option<Segment> {
    if state.mode != Mode::Inside {
        return None;
    }
    let cut = state.pending.len() - trailing_backtick_run(&state.pending);
    if cut == 0 {
        return None;
    }
    Some(Segment::Code(state.pending[..cut].to_string()))
}

/// Length in bytes of the run of backticks ending `text`. A run of three or
/// more would already have matched as a delimiter, so callers only ever see
/// runs shorter than `FENCE`.
fn trailing_backtick_run(text: &str) -> usize {
    text.len() - text.trim_end_matches('`').len()
}
