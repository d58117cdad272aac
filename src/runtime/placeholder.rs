use crate::runtime::callback::CodeCallback;
use crate::runtime::stack::ConvStack;
use crate::runtime::vm::CodeVm;

/// Where a placeholder's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    /// Conversation global slot.
    Global,
    /// Stack word at `bp + index`.
    Stack,
    /// Word addressed by the stack word at `bp + index`.
    Pointer,
}

impl<C: CodeCallback> CodeVm<C> {
    /// Expand `@<source><type><index>` placeholders in `text` using the
    /// current stack and frame pointer. See [`replace_placeholders`].
    pub fn replace_placeholders(&self, text: &str, strings: &[String]) -> String {
        replace_placeholders(text, self.stack(), self.base_pointer(), strings)
    }
}

/// Expand placeholders such as `@GS8` (string of global 8) or `@SI-2`
/// (integer at `bp - 2`). Unknown source or type letters expand to nothing;
/// an `@` not followed by two letters and a number is kept as is.
pub fn replace_placeholders(text: &str, stack: &ConvStack, bp: u16, strings: &[String]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(at) = rest.find('@') {
        out.push_str(&rest[..at]);
        let tail = &rest[at + 1..];
        match parse_placeholder(tail) {
            Some((source, kind, index, len)) => {
                out.push_str(&expand(source, kind, index, stack, bp, strings));
                rest = &tail[len..];
            }
            None => {
                out.push('@');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Returns source letter, type letter, index and the consumed length.
fn parse_placeholder(s: &str) -> Option<(char, char, i32, usize)> {
    let mut chars = s.chars();
    let source = chars.next().filter(char::is_ascii_alphabetic)?;
    let kind = chars.next().filter(char::is_ascii_alphabetic)?;
    let digits = &s[2..];

    let sign = usize::from(digits.starts_with('-'));
    let len = digits[sign..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len() - sign);
    if len == 0 {
        return None;
    }
    let index = digits[..sign + len].parse().ok()?;
    Some((source, kind, index, 2 + sign + len))
}

fn expand(source: char, kind: char, index: i32, stack: &ConvStack, bp: u16, strings: &[String]) -> String {
    let source = match source {
        'G' => Source::Global,
        'S' => Source::Stack,
        'P' => Source::Pointer,
        _ => return String::new(),
    };

    let word = |pos: u16| stack.get(pos).unwrap_or(0);
    let index = index as u16;
    let value = match source {
        Source::Global => word(index),
        Source::Stack => word(bp.wrapping_add(index)),
        Source::Pointer => word(word(bp.wrapping_add(index))),
    };

    match kind {
        'I' => value.to_string(),
        'S' => strings.get(value as usize).cloned().unwrap_or_default(),
        _ => String::new(),
    }
}
