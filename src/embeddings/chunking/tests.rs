use super::*;

fn no_overlap(chunk_size: usize) -> ChunkOptions {
    ChunkOptions {
        chunk_size,
        overlap_lines: 0,
    }
}

fn split(text: &str, options: &ChunkOptions) -> Vec<TextChunk> {
    MarkdownChunker
        .split(text, options)
        .expect("split should succeed")
}

fn sample_note() -> String {
    let mut note = String::from("# Project notes\n\n");
    for section in 0..5 {
        note.push_str(&format!("## Section {section}\n\n"));
        for paragraph in 0..3 {
            note.push_str(&format!(
                "Paragraph {paragraph} of section {section} talks about the topic at some length.\n\n"
            ));
        }
        note.push_str("```rust\nfn main() {\n\n    println!(\"hi\");\n}\n```\n\n");
    }
    note
}

#[test]
fn blank_input_has_no_chunks() {
    assert!(split("", &ChunkOptions::default()).is_empty());
    assert!(split("   \n\n\t\n", &ChunkOptions::default()).is_empty());
}

#[test]
fn small_document_is_one_chunk() {
    let text = "# Title\n\nFirst paragraph.\n\nSecond paragraph.";
    let chunks = split(text, &ChunkOptions::default());

    assert_eq!(
        chunks,
        vec![TextChunk {
            content: text.to_string(),
            start_line: 1,
            end_line: 5,
        }]
    );
}

#[test]
fn paragraphs_are_packed_up_to_chunk_size() {
    let paragraph = |c: char| c.to_string().repeat(50);
    let text = format!("{}\n\n{}\n\n{}", paragraph('a'), paragraph('b'), paragraph('c'));

    let chunks = split(&text, &no_overlap(120));
    assert_eq!(chunks.len(), 2);
    assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 3));
    assert_eq!(chunks[0].content, format!("{}\n\n{}", paragraph('a'), paragraph('b')));
    assert_eq!((chunks[1].start_line, chunks[1].end_line), (5, 5));
    assert_eq!(chunks[1].content, paragraph('c'));
}

#[test]
fn overlap_repeats_trailing_lines() {
    let paragraph = |c: char| c.to_string().repeat(50);
    let text = format!("{}\n\n{}\n\n{}", paragraph('a'), paragraph('b'), paragraph('c'));

    let chunks = split(
        &text,
        &ChunkOptions {
            chunk_size: 120,
            overlap_lines: 1,
        },
    );
    assert_eq!(chunks.len(), 2);
    assert_eq!((chunks[1].start_line, chunks[1].end_line), (3, 5));
    assert_eq!(chunks[1].content, format!("{}\n\n{}", paragraph('b'), paragraph('c')));
}

#[test]
fn headings_start_a_new_block() {
    let chunks = split("Intro line\n# Heading\nBody", &no_overlap(20));

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].content, "Intro line");
    assert_eq!(chunks[1].content, "# Heading\nBody");
    assert_eq!((chunks[1].start_line, chunks[1].end_line), (2, 3));
}

#[test]
fn hashtags_are_not_headings() {
    assert!(is_heading("# Title"));
    assert!(is_heading("###### Deep"));
    assert!(is_heading("##"));
    assert!(!is_heading("#tag in text"));
    assert!(!is_heading("####### too deep"));
}

#[test]
fn fenced_code_stays_whole() {
    let text = "```\nline one\n\nline two\n```\n\nafter";
    let chunks = split(text, &no_overlap(30));

    assert_eq!(chunks.len(), 2);
    assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 5));
    assert!(chunks[0].content.contains("line one"));
    assert!(chunks[0].content.contains("line two"));
    assert_eq!(chunks[1].content, "after");
}

#[test]
fn oversized_block_falls_back_to_lines() {
    let text = vec!["x".repeat(30); 10].join("\n");
    let chunks = split(&text, &no_overlap(100));

    assert_eq!(chunks.len(), 4);
    assert!(chunks.iter().all(|c| c.content.len() <= 100));
    assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 3));
    assert_eq!((chunks[3].start_line, chunks[3].end_line), (10, 10));
}

#[test]
fn overlong_line_is_its_own_chunk() {
    let text = format!("short\n{}\nshort again", "y".repeat(500));
    let chunks = split(&text, &no_overlap(100));

    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[1].content.len(), 500);
    assert_eq!((chunks[1].start_line, chunks[1].end_line), (2, 2));
}

#[test]
fn line_ranges_match_source_text() {
    let note = sample_note();
    let lines: Vec<&str> = note.lines().collect();

    for chunk in split(&note, &ChunkOptions::new(200)) {
        assert!(chunk.start_line <= chunk.end_line);
        let source = lines[chunk.start_line as usize - 1..chunk.end_line as usize].join("\n");
        assert_eq!(chunk.content, source);
        assert!(!chunk.content.trim().is_empty());
    }
}

#[test]
fn splitting_is_deterministic() {
    let note = sample_note();
    let options = ChunkOptions::new(150);

    assert_eq!(split(&note, &options), split(&note, &options));
}

#[test]
fn windows_line_endings_are_stripped() {
    let chunks = split("first\r\n\r\nsecond\r\n", &ChunkOptions::default());

    assert_eq!(chunks.len(), 1);
    assert!(!chunks[0].content.contains('\r'));
    assert_eq!(chunks[0].end_line, 3);
}
