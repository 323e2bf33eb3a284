#[cfg(test)]
mod tests;

use anyhow::Result;
use tracing::debug;

/// A piece of a document ready for embedding, with its 1-based source line range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub content: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// Options for splitting a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Lines of the previous chunk repeated at the start of the next one
    pub overlap_lines: usize,
}

impl ChunkOptions {
    #[inline]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            overlap_lines: 1,
        }
    }
}

impl Default for ChunkOptions {
    #[inline]
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Splits document text into chunks. Must be deterministic for the same input.
pub trait Chunker: Send + Sync {
    fn split(&self, text: &str, options: &ChunkOptions) -> Result<Vec<TextChunk>>;
}

/// Heading and paragraph aware markdown splitter.
///
/// Paragraphs (separated by blank lines), headings and fenced code blocks form blocks that
/// are packed greedily up to the chunk size. Blocks larger than the chunk size fall back to
/// line based splitting. Chunk content is always the exact source text of its line range.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownChunker;

impl Chunker for MarkdownChunker {
    #[inline]
    fn split(&self, text: &str, options: &ChunkOptions) -> Result<Vec<TextChunk>> {
        let lines: Vec<&str> = text.lines().collect();
        let chunk_size = options.chunk_size.max(1);

        let mut ranges = Vec::new();
        let mut current: Option<LineRange> = None;

        for block in split_blocks(&lines) {
            let block_size = range_size(&lines, block);

            if block_size > chunk_size {
                if let Some(range) = current.take() {
                    ranges.push(range);
                }
                ranges.extend(split_by_lines(&lines, block, chunk_size));
                continue;
            }

            current = match current {
                Some(range) if range_size(&lines, range.extend_to(block.end)) > chunk_size => {
                    ranges.push(range);
                    Some(block)
                }
                Some(range) => Some(range.extend_to(block.end)),
                None => Some(block),
            };
        }

        if let Some(range) = current {
            ranges.push(range);
        }

        let chunks = add_overlap(&lines, ranges, options.overlap_lines)
            .into_iter()
            .map(|range| TextChunk {
                content: lines[range.start..=range.end].join("\n"),
                start_line: (range.start + 1) as u32,
                end_line: (range.end + 1) as u32,
            })
            .collect::<Vec<_>>();

        debug!(
            "Split {} lines into {} chunks (avg {} chars)",
            lines.len(),
            chunks.len(),
            chunks.iter().map(|c| c.content.len()).sum::<usize>() / chunks.len().max(1)
        );

        Ok(chunks)
    }
}

/// Inclusive 0-based line range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LineRange {
    start: usize,
    end: usize,
}

impl LineRange {
    fn extend_to(self, end: usize) -> Self {
        Self {
            start: self.start,
            end,
        }
    }
}

/// Characters of the range when joined with newlines
fn range_size(lines: &[&str], range: LineRange) -> usize {
    lines[range.start..=range.end]
        .iter()
        .map(|line| line.len() + 1)
        .sum::<usize>()
        .saturating_sub(1)
}

fn is_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    let rest = trimmed.trim_start_matches('#');
    let hashes = trimmed.len() - rest.len();
    (1..=6).contains(&hashes) && rest.chars().next().is_none_or(char::is_whitespace)
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// Blocks of non-blank lines. A heading starts a new block and fenced code stays whole.
fn split_blocks(lines: &[&str]) -> Vec<LineRange> {
    let mut blocks = Vec::new();
    let mut current: Option<LineRange> = None;
    let mut in_fence = false;

    for (index, line) in lines.iter().enumerate() {
        if in_fence {
            in_fence = !is_fence(line);
            current = current.map(|range| range.extend_to(index));
            continue;
        }

        if line.trim().is_empty() {
            if let Some(range) = current.take() {
                blocks.push(range);
            }
            continue;
        }

        if is_heading(line) {
            if let Some(range) = current.take() {
                blocks.push(range);
            }
        }

        in_fence = is_fence(line);
        current = Some(match current {
            Some(range) => range.extend_to(index),
            None => LineRange {
                start: index,
                end: index,
            },
        });
    }

    if let Some(range) = current {
        blocks.push(trim_trailing_blank(lines, range));
    }

    blocks
}

/// An unterminated fence swallows the rest of the document, including trailing blank lines
fn trim_trailing_blank(lines: &[&str], mut range: LineRange) -> LineRange {
    while range.end > range.start && lines[range.end].trim().is_empty() {
        range.end -= 1;
    }
    range
}

/// Naive fallback for oversized blocks: pack whole lines up to the chunk size.
/// A single line longer than the chunk size becomes its own chunk.
fn split_by_lines(lines: &[&str], block: LineRange, chunk_size: usize) -> Vec<LineRange> {
    let mut ranges = Vec::new();
    let mut current: Option<LineRange> = None;

    for index in block.start..=block.end {
        if lines[index].trim().is_empty() && current.is_none() {
            continue;
        }

        current = match current {
            Some(range) if range_size(lines, range.extend_to(index)) > chunk_size => {
                ranges.push(trim_trailing_blank(lines, range));
                if lines[index].trim().is_empty() {
                    None
                } else {
                    Some(LineRange {
                        start: index,
                        end: index,
                    })
                }
            }
            Some(range) => Some(range.extend_to(index)),
            None => Some(LineRange {
                start: index,
                end: index,
            }),
        };
    }

    if let Some(range) = current {
        ranges.push(trim_trailing_blank(lines, range));
    }

    ranges
}

/// Start each chunk with the last `overlap_lines` lines of the previous one, never at or
/// before the previous chunk's start and never on a blank line
fn add_overlap(lines: &[&str], mut ranges: Vec<LineRange>, overlap_lines: usize) -> Vec<LineRange> {
    if overlap_lines == 0 {
        return ranges;
    }

    for i in 1..ranges.len() {
        let previous = ranges[i - 1];
        let mut start = (previous.end + 1)
            .saturating_sub(overlap_lines)
            .max(previous.start + 1)
            .min(ranges[i].start);
        while start < ranges[i].start && lines[start].trim().is_empty() {
            start += 1;
        }
        ranges[i].start = start;
    }

    ranges
}
