//! Helpers for preparing outgoing message bodies.

const FENCE: &str = "```";

/// Named card colors and their hex values.
const COLORS: [(&str, &str); 6] = [
    ("white", "#FFFFFF"),
    ("cyan", "#00FFFF"),
    ("blue", "#0000FF"),
    ("red", "#FF0000"),
    ("green", "#008000"),
    ("yellow", "#FFA500"),
];

/// Resolves a named color to hex; anything else is passed through unchanged.
pub fn resolve_color(color: &str) -> String {
    COLORS
        .iter()
        .find(|(name, _)| *name == color)
        .map(|(_, hex)| hex.to_string())
        .unwrap_or_else(|| color.to_string())
}

/// Splits `text` into chunks of at most `n` characters.
///
/// An empty string yields a single empty chunk.
pub fn split_string_after(text: &str, n: usize) -> Vec<String> {
    let n = n.max(1);
    let chars: Vec<char> = text.chars().collect();

    if chars.is_empty() {
        return vec![String::new()];
    }

    chars.chunks(n).map(|chunk| chunk.iter().collect()).collect()
}

/// Returns the parts of a message body chunked and ready for sending.
///
/// Code fences left open by the split are closed at the end of the part, and a
/// body that starts fenced re-opens the fence on every continuation part.
pub fn prepare_message_body(body: &str, size_limit: usize) -> Vec<String> {
    let fixed_format = body.starts_with(FENCE);
    let mut parts = split_string_after(body, size_limit);

    if parts.len() == 1 {
        if has_open_fence(&parts[0]) {
            parts[0].push_str("\n```\n");
        }

        return parts;
    }

    for part in parts.iter_mut() {
        if fixed_format && !part.starts_with(FENCE) {
            part.insert_str(0, "```\n");
        }

        if has_open_fence(part) {
            part.push_str("\n```\n");
        }
    }

    parts
}

fn has_open_fence(text: &str) -> bool {
    text.matches(FENCE).count() % 2 != 0
}
