// Reasoning-trace removal
// Strips `<think>...</think>` blocks that reasoning models emit before the answer


pub const OPEN_MARKER: &str = "<think>";
pub const CLOSE_MARKER: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Outside,
    Inside,
}

/// Remove every reasoning block and its markers, then trim.
///
/// An opening marker without a matching closer discards everything after it.
/// A closing marker seen outside a block is dropped and the text around it kept.
#[inline]
pub fn strip_reasoning(raw: &str) -> String {
    let mut output = String::with_capacity(raw.len());
    let mut state = ScanState::Outside;
    let mut rest = raw;

    while !rest.is_empty() {
        match state {
            ScanState::Outside => match (rest.find(OPEN_MARKER), rest.find(CLOSE_MARKER)) {
                (Some(open), Some(close)) if close < open => {
                    rest = skip_marker(rest, close, CLOSE_MARKER, &mut output);
                }
                (Some(open), _) => {
                    rest = skip_marker(rest, open, OPEN_MARKER, &mut output);
                    state = ScanState::Inside;
                }
                (None, Some(close)) => {
                    rest = skip_marker(rest, close, CLOSE_MARKER, &mut output);
                }
                (None, None) => {
                    output.push_str(rest);
                    rest = "";
                }
            },
            ScanState::Inside => match rest.find(CLOSE_MARKER) {
                Some(close) => {
                    let (_, after) = rest.split_at(close);
                    rest = after.strip_prefix(CLOSE_MARKER).unwrap_or(after);
                    state = ScanState::Outside;
                }
                None => rest = "",
            },
        }
    }

    output.trim().to_string()
}

/// Keep the text before the marker at `at`, return what follows the marker
fn skip_marker<'a>(text: &'a str, at: usize, marker: &str, output: &mut String) -> &'a str {
    let (before, after) = text.split_at(at);
    output.push_str(before);
    after.strip_prefix(marker).unwrap_or(after)
}
