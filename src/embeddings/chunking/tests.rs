use super::estimate_token_count as estimate_token_count_impl;
use super::*;
use crate::loader::{Document, DocumentMetadata, SourceKind, TextFormat};

fn document(text: &str) -> Document {
    Document {
        source_id: "docs/handbook.md".to_string(),
        raw_text: text.to_string(),
        metadata: DocumentMetadata {
            kind: SourceKind::Text {
                format: TextFormat::Markdown,
                encoding: "utf-8",
            },
            byte_len: text.len() as u64,
        },
    }
}

fn config(chunk_size: usize, chunk_overlap: usize) -> ChunkingConfig {
    ChunkingConfig {
        chunk_size,
        chunk_overlap,
    }
}

fn reconstruct(chunks: &[Chunk]) -> String {
    chunks.iter().map(Chunk::fresh_text).collect()
}

fn handbook_text() -> String {
    let mut text = String::new();
    for section in 0..12 {
        text.push_str(&format!("# Section {section}\n\n"));
        for sentence in 0..6 {
            text.push_str(&format!(
                "Sentence {sentence} of section {section} explains a campus policy in detail. "
            ));
        }
        text.push_str("\n\n");
    }
    text
}

#[test]
fn estimate_token_count() {
    assert_eq!(estimate_token_count_impl("hello world"), 2);
    assert_eq!(estimate_token_count_impl("This is a test."), 5);
    assert_eq!(estimate_token_count_impl(""), 0);
}

#[test]
fn short_document_is_single_chunk() {
    let doc = document("Tuition is due on the 5th of each month.");
    let chunks = chunk_document(&doc, &config(100, 20)).expect("chunking should succeed");

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, doc.raw_text);
    assert_eq!(chunks[0].overlap, 0);
    assert_eq!(chunks[0].sequence, 0);
    assert_eq!(chunks[0].source_id, "docs/handbook.md");
}

#[test]
fn empty_document_yields_no_chunks() {
    let cfg = config(100, 20);
    assert!(
        chunk_document(&document(""), &cfg)
            .expect("chunking should succeed")
            .is_empty()
    );
    assert!(
        chunk_document(&document("  \n\n\t "), &cfg)
            .expect("chunking should succeed")
            .is_empty()
    );
}

#[test]
fn chunks_respect_size_and_reconstruct_text() {
    let text = handbook_text();
    let doc = document(&text);

    for (size, overlap) in [(120, 0), (200, 40), (333, 100), (1000, 150)] {
        let chunks = chunk_document(&doc, &config(size, overlap)).expect("chunking should succeed");
        assert!(chunks.len() > 1, "size {size} should split the document");

        for chunk in &chunks {
            assert!(
                chunk.char_len() <= size,
                "chunk of {} chars exceeds size {size}",
                chunk.char_len()
            );
        }
        assert_eq!(reconstruct(&chunks), text, "size {size} overlap {overlap}");
    }
}

#[test]
fn consecutive_chunks_share_overlap() {
    let text = handbook_text();
    let overlap = 40;
    let chunks = chunk_document(&document(&text), &config(200, overlap))
        .expect("chunking should succeed");

    for pair in chunks.windows(2) {
        let prev_tail: String = {
            let chars: Vec<char> = pair[0].text.chars().collect();
            chars[chars.len() - overlap..].iter().collect()
        };
        let next_head: String = pair[1].text.chars().take(overlap).collect();
        assert_eq!(prev_tail, next_head);
        assert_eq!(pair[1].overlap, overlap);
        assert_eq!(
            pair[1].start_offset,
            pair[0].start_offset + pair[0].char_len() - overlap
        );
        assert_eq!(pair[1].sequence, pair[0].sequence + 1);
    }
}

#[test]
fn prefers_paragraph_boundaries() {
    let paragraph = "Admissions open in January and close in March. ".repeat(3);
    let text = format!("{paragraph}\n\n{paragraph}\n\n{paragraph}");
    let chunks =
        chunk_document(&document(&text), &config(200, 0)).expect("chunking should succeed");

    assert!(chunks.len() > 1);
    assert!(
        chunks[0].text.ends_with("\n\n"),
        "first chunk should end at a paragraph break: {:?}",
        chunks[0].text
    );
}

#[test]
fn falls_back_to_sentence_then_word_boundaries() {
    let text = "Fees are listed online. Payment plans exist! Ask the office? ".repeat(10);
    let chunks =
        chunk_document(&document(&text), &config(100, 0)).expect("chunking should succeed");
    assert!(chunks[0].text.trim_end().ends_with(['.', '!', '?']));

    let words = "word ".repeat(100);
    let chunks =
        chunk_document(&document(&words), &config(101, 0)).expect("chunking should succeed");
    assert!(chunks[0].text.ends_with(' '));
    assert_eq!(reconstruct(&chunks), words);
}

#[test]
fn hard_cut_without_boundaries() {
    let text = "x".repeat(250);
    let chunks =
        chunk_document(&document(&text), &config(100, 10)).expect("chunking should succeed");

    assert_eq!(chunks[0].char_len(), 100);
    assert!(chunks.iter().all(|c| c.char_len() <= 100));
    assert_eq!(reconstruct(&chunks), text);
}

#[test]
fn multibyte_text_is_split_on_characters() {
    let text = "Études à l'université … frais réglés le 5 du mois. ".repeat(20);
    let chunks =
        chunk_document(&document(&text), &config(120, 30)).expect("chunking should succeed");

    assert!(chunks.iter().all(|c| c.char_len() <= 120));
    assert_eq!(reconstruct(&chunks), text);
}

#[test]
fn chunking_is_deterministic() {
    let text = handbook_text();
    let doc = document(&text);
    let cfg = config(250, 60);

    let first = chunk_document(&doc, &cfg).expect("chunking should succeed");
    let second = chunk_document(&doc, &cfg).expect("chunking should succeed");
    assert_eq!(first, second);
}

#[test]
fn invalid_overlap_is_rejected() {
    let doc = document("some text");
    assert!(matches!(
        chunk_document(&doc, &config(100, 100)),
        Err(RagError::Config(_))
    ));
    assert!(matches!(
        chunk_documents(&[doc], &config(0, 0)),
        Err(RagError::Config(_))
    ));
}

#[test]
fn chunk_documents_preserves_document_order() {
    let mut first = document(&"Alpha paragraph text. ".repeat(20));
    first.source_id = "a.txt".to_string();
    let mut second = document(&"Beta paragraph text. ".repeat(20));
    second.source_id = "b.txt".to_string();
    let empty = document("");

    let chunks = chunk_documents(&[first, empty, second], &config(150, 30))
        .expect("chunking should succeed");

    let first_b = chunks
        .iter()
        .position(|c| c.source_id == "b.txt")
        .expect("should contain chunks from b.txt");
    assert!(chunks[..first_b].iter().all(|c| c.source_id == "a.txt"));
    assert!(chunks[first_b..].iter().all(|c| c.source_id == "b.txt"));
    assert_eq!(chunks[first_b].sequence, 0);
    assert_eq!(chunks[first_b].overlap, 0);
}
