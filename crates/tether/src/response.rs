//! Splits free-form model output into prose and fenced code.
//!
//! A fence marker is a line of three or more backticks, optionally followed
//! by a language word (`[A-Za-z0-9_+#.-]+`) and trailing whitespace. Inside
//! a fence, only a marker starting with the opening backtick run closes it;
//! shorter markers are content. Same-length inner fences therefore close
//! the outer block.
//!
//! ```
//! use tether::response::{parse, BlockKind};
//!
//! let parsed = parse("Here you go:\n```rust\nfn main() {}\n```");
//! assert_eq!(parsed.blocks().len(), 2);
//! assert_eq!(parsed.blocks()[1].kind, BlockKind::Code("rust".into()));
//! ```

use std::fmt;

use serde::Serialize;

/// Language tag for fences that do not name one.
pub const DEFAULT_LANGUAGE: &str = "code";

const MIN_FENCE: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "language", rename_all = "lowercase")]
pub enum BlockKind {
    Text,
    /// Fenced code with its language tag.
    Code(String),
}

impl BlockKind {
    /// `"text"`, or the code block's language.
    pub fn tag(&self) -> &str {
        match self {
            BlockKind::Text => "text",
            BlockKind::Code(lang) => lang,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseBlock {
    #[serde(flatten)]
    pub kind: BlockKind,
    pub content: String,
}

impl ResponseBlock {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Text,
            content: content.into(),
        }
    }

    pub fn code(language: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Code(language.into()),
            content: content.into(),
        }
    }

    pub fn is_code(&self) -> bool {
        matches!(self.kind, BlockKind::Code(_))
    }
}

/// Ordered blocks of one response. `Display` re-serializes to markdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedResponse {
    blocks: Vec<ResponseBlock>,
}

impl ParsedResponse {
    pub fn blocks(&self) -> &[ResponseBlock] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<ResponseBlock> {
        self.blocks
    }

    pub fn code_blocks(&self) -> impl Iterator<Item = &ResponseBlock> {
        self.blocks.iter().filter(|b| b.is_code())
    }

    /// Code blocks whose language tag equals `language`.
    pub fn code_blocks_tagged<'a>(
        &'a self,
        language: &'a str,
    ) -> impl Iterator<Item = &'a ResponseBlock> + 'a {
        self.blocks
            .iter()
            .filter(move |b| matches!(&b.kind, BlockKind::Code(lang) if lang == language))
    }

    /// All prose, blocks separated by blank lines.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter(|b| !b.is_code())
            .map(|b| b.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl fmt::Display for ParsedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            match &block.kind {
                BlockKind::Text => writeln!(f, "{}", block.content.trim())?,
                BlockKind::Code(lang) => {
                    let fence = "`".repeat(fence_len_for(&block.content));
                    writeln!(f, "{fence}{lang}")?;
                    if !block.content.is_empty() {
                        writeln!(f, "{}", block.content)?;
                    }
                    writeln!(f, "{fence}")?;
                }
            }
        }
        Ok(())
    }
}

/// Shortest fence longer than any backtick run that opens a content line.
fn fence_len_for(content: &str) -> usize {
    let longest = content
        .lines()
        .map(|line| line.bytes().take_while(|b| *b == b'`').count())
        .max()
        .unwrap_or(0);
    if longest >= MIN_FENCE {
        longest + 1
    } else {
        MIN_FENCE
    }
}

/// A fence marker line split into its backtick run and optional language.
fn fence_marker(line: &str) -> Option<(&str, Option<&str>)> {
    let ticks = line.bytes().take_while(|b| *b == b'`').count();
    if ticks < MIN_FENCE {
        return None;
    }
    let (token, rest) = line.split_at(ticks);
    let rest = rest.trim_end();
    if rest.is_empty() {
        return Some((token, None));
    }
    let is_word = rest
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b"_+#.-".contains(&b));
    is_word.then_some((token, Some(rest)))
}

struct OpenFence<'a> {
    token: &'a str,
    language: String,
}

/// Split `text` into text and code blocks. Never fails.
pub fn parse(text: &str) -> ParsedResponse {
    let mut blocks = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();
    let mut fence: Option<OpenFence<'_>> = None;

    for line in text.lines() {
        let marker = fence_marker(line);
        match (&fence, marker) {
            (None, Some((token, language))) => {
                flush_text(&mut blocks, &mut buffer);
                fence = Some(OpenFence {
                    token,
                    language: language.unwrap_or(DEFAULT_LANGUAGE).to_string(),
                });
            }
            (Some(open), Some((token, _))) if token.starts_with(open.token) => {
                let language = open.language.clone();
                blocks.push(ResponseBlock::code(language, buffer.join("\n").trim()));
                buffer.clear();
                fence = None;
            }
            _ => buffer.push(line),
        }
    }

    match fence {
        Some(open) => blocks.push(ResponseBlock::code(open.language, buffer.join("\n").trim())),
        None => flush_text(&mut blocks, &mut buffer),
    }

    ParsedResponse { blocks }
}

fn flush_text(blocks: &mut Vec<ResponseBlock>, buffer: &mut Vec<&str>) {
    let joined = buffer.join("\n");
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        blocks.push(ResponseBlock::text(trimmed));
    }
    buffer.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_code_text() {
        let parsed = parse("intro\n```go\nfmt.Println(1)\n```\nend");
        assert_eq!(
            parsed.blocks(),
            [
                ResponseBlock::text("intro"),
                ResponseBlock::code("go", "fmt.Println(1)"),
                ResponseBlock::text("end"),
            ]
        );
    }

    #[test]
    fn round_trip_preserves_blocks() {
        let parsed = parse("intro\n```go\nfmt.Println(1)\n```\nend");
        assert_eq!(parse(&parsed.to_string()), parsed);
    }

    #[test]
    fn unterminated_fence_becomes_trailing_code() {
        let parsed = parse("Try this:\n```python\nprint('hi')\n");
        assert_eq!(
            parsed.blocks().last(),
            Some(&ResponseBlock::code("python", "print('hi')"))
        );
    }

    #[test]
    fn untagged_fence_defaults_to_code() {
        let parsed = parse("```\nls -la\n```");
        assert_eq!(parsed.blocks(), [ResponseBlock::code("code", "ls -la")]);
    }

    #[test]
    fn empty_code_block_is_kept_but_empty_text_is_not() {
        let parsed = parse("\n\n```rust\n```\n   \n");
        assert_eq!(parsed.blocks(), [ResponseBlock::code("rust", "")]);
    }

    #[test]
    fn longer_outer_fence_holds_inner_fence() {
        let input = "````markdown\n```rust\nfn x() {}\n```\n````";
        let parsed = parse(input);
        assert_eq!(
            parsed.blocks(),
            [ResponseBlock::code("markdown", "```rust\nfn x() {}\n```")]
        );
        assert_eq!(parse(&parsed.to_string()), parsed);
    }

    #[test]
    fn same_length_inner_fence_closes_outer() {
        let parsed = parse("```md\n```rust\nfn x() {}\n```");
        assert_eq!(parsed.blocks()[0], ResponseBlock::code("md", ""));
        assert_eq!(parsed.blocks()[1], ResponseBlock::text("fn x() {}"));
    }

    #[test]
    fn serializer_lengthens_fence_for_nested_content() {
        let response = ParsedResponse {
            blocks: vec![ResponseBlock::code("md", "```\ninner\n```")],
        };
        let out = response.to_string();
        assert!(out.starts_with("````md\n"), "{out}");
        assert_eq!(parse(&out), response);
    }

    #[test]
    fn marker_with_trailing_junk_is_content() {
        let parsed = parse("```rust fn main\nnot code");
        assert_eq!(
            parsed.blocks(),
            [ResponseBlock::text("```rust fn main\nnot code")]
        );
    }

    #[test]
    fn marker_grammar() {
        assert_eq!(fence_marker("```"), Some(("```", None)));
        assert_eq!(fence_marker("````c++  "), Some(("````", Some("c++"))));
        assert_eq!(fence_marker("``"), None);
        assert_eq!(fence_marker(" ```"), None);
    }

    #[test]
    fn helpers_filter_blocks() {
        let parsed = parse("a\n```rust\n1\n```\nb\n```toml\n2\n```\n```rust\n3\n```");
        assert_eq!(parsed.code_blocks().count(), 3);
        let rust: Vec<_> = parsed
            .code_blocks_tagged("rust")
            .map(|b| b.content.as_str())
            .collect();
        assert_eq!(rust, ["1", "3"]);
        assert_eq!(parsed.text(), "a\n\nb");
        let owned = parsed.into_blocks();
        assert_eq!(owned.len(), 5);
        assert_eq!(owned[4], ResponseBlock::code("rust", "3"));
    }

    #[test]
    fn serializes_to_json_with_kind_and_language() {
        let json = serde_json::to_value(ResponseBlock::code("go", "x")).unwrap();
        assert_eq!(json["kind"], "code");
        assert_eq!(json["language"], "go");
        assert_eq!(json["content"], "x");
    }
}
