use crate::conversation::Message;
use crate::tokenizer::{Tokenize, TokenizerError};
use serde::{Deserialize, Serialize};

const LINE_SEPARATOR: &str = "\n\n";
const TS_PREFIX_CHARS: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackMessage {
    pub role: String,
    pub ts: String,
    pub text: String,
}

impl From<&Message> for PackMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.clone(),
            ts: message.ts.clone(),
            text: message.text.clone(),
        }
    }
}

impl PackMessage {
    /// `[<role> • <minute-precision ts>] <text>`
    pub fn render(&self) -> String {
        let ts: String = self.ts.chars().take(TS_PREFIX_CHARS).collect();
        format!("[{} • {}] {}", self.role, ts, self.text)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextPack {
    pub text_block: String,
    /// Tokens of the included lines; the truncation marker is not counted.
    pub token_count: usize,
    pub message_count: usize,
}

pub fn truncation_marker(max_tokens: usize) -> String {
    format!("-- Truncated at {max_tokens} tokens --")
}

/// Renders `messages` in the given order until the next line would push the
/// running total past `max_tokens`. The first line that does not fit ends
/// the pack; later, smaller messages are not considered.
pub fn build_pack<T>(
    messages: &[PackMessage],
    max_tokens: usize,
    tokenizer: &T,
) -> Result<ContextPack, TokenizerError>
where
    T: Tokenize + ?Sized,
{
    if messages.is_empty() {
        return Ok(ContextPack::default());
    }

    let mut lines = Vec::new();
    let mut token_count = 0usize;
    for message in messages {
        let line = message.render();
        let line_tokens = tokenizer.tokenize(&line)?.len();
        if token_count + line_tokens > max_tokens {
            break;
        }
        token_count += line_tokens;
        lines.push(line);
    }

    let message_count = lines.len();
    let mut text_block = lines.join(LINE_SEPARATOR);
    if message_count < messages.len() {
        text_block.push_str(LINE_SEPARATOR);
        text_block.push_str(&truncation_marker(max_tokens));
    }

    Ok(ContextPack {
        text_block,
        token_count,
        message_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn pack_msg(role: &str, ts: &str, text: &str) -> PackMessage {
        PackMessage {
            role: role.to_string(),
            ts: ts.to_string(),
            text: text.to_string(),
        }
    }

    fn fixed_cost(cost: usize) -> impl Fn(&str) -> Result<Vec<u32>, TokenizerError> {
        move |_: &str| Ok(vec![0; cost])
    }

    #[test]
    fn renders_role_and_minute_precision_timestamp() {
        let line = pack_msg("assistant", "2024-03-01T09:15:42.123+00:00", "hi").render();
        assert_eq!(line, "[assistant • 2024-03-01T09:15] hi");

        let short = pack_msg("user", "2024", "x").render();
        assert_eq!(short, "[user • 2024] x");
    }

    #[test]
    fn stops_at_first_message_over_budget() {
        let messages = vec![
            pack_msg("user", "2024-01-01T00:00:00", "one"),
            pack_msg("assistant", "2024-01-01T00:01:00", "two"),
            pack_msg("user", "2024-01-01T00:02:00", "three"),
        ];

        let pack = build_pack(&messages, 15, &fixed_cost(10)).expect("pack");
        assert_eq!(pack.message_count, 1);
        assert_eq!(pack.token_count, 10);
        assert_eq!(
            pack.text_block,
            "[user • 2024-01-01T00:00] one\n\n-- Truncated at 15 tokens --"
        );
    }

    #[test]
    fn fitting_messages_are_joined_without_marker() {
        let messages = vec![
            pack_msg("user", "2024-01-01T00:00:00", "one"),
            pack_msg("assistant", "2024-01-01T00:01:00", "two"),
        ];

        let pack = build_pack(&messages, 20, &fixed_cost(10)).expect("pack");
        assert_eq!(pack.message_count, 2);
        assert_eq!(pack.token_count, 20);
        assert_eq!(
            pack.text_block,
            "[user • 2024-01-01T00:00] one\n\n[assistant • 2024-01-01T00:01] two"
        );
    }

    #[test]
    fn greedy_cutoff_skips_later_small_messages() {
        let messages = vec![
            pack_msg("user", "t", "short"),
            pack_msg("user", "t", &"long ".repeat(20)),
            pack_msg("user", "t", "tiny"),
        ];
        let by_word = |text: &str| -> Result<Vec<u32>, TokenizerError> {
            Ok(text.split_whitespace().map(|_| 1).collect())
        };

        let pack = build_pack(&messages, 10, &by_word).expect("pack");
        assert_eq!(pack.message_count, 1);
        assert!(pack.text_block.ends_with("-- Truncated at 10 tokens --"));
        assert!(!pack.text_block.contains("tiny"));
    }

    #[test]
    fn empty_input_skips_tokenizer() {
        let calls = Cell::new(0);
        let counting = |_: &str| -> Result<Vec<u32>, TokenizerError> {
            calls.set(calls.get() + 1);
            Ok(vec![])
        };

        let pack = build_pack(&[], 100, &counting).expect("pack");
        assert_eq!(pack, ContextPack::default());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn tokenizer_errors_propagate() {
        let failing =
            |_: &str| -> Result<Vec<u32>, TokenizerError> { Err(TokenizerError::Encode("boom".into())) };
        let messages = vec![pack_msg("user", "t", "x")];

        let err = build_pack(&messages, 100, &failing).expect_err("tokenizer failure");
        assert_eq!(err, TokenizerError::Encode("boom".into()));
    }
}
