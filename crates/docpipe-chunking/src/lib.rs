//! Paragraph-aware chunking for the embeddings step.
//!
//! `chunk_size == 0` means "no chunking": the whole document is emitted as
//! a single chunk. Otherwise content is split on paragraph boundaries
//! (blank-line separated), greedily packed so each chunk stays at or under
//! `chunk_size`, and any paragraph that alone exceeds `chunk_size` is
//! force-split into fixed-size slices rather than left oversized.

/// Split `content` into chunks according to the policy above. Chunk order
/// matches document order, which callers rely on to map a batched
/// embedding response back onto `chunk_index`.
pub fn chunk_content(content: &str, chunk_size: usize) -> Vec<String> {
    if chunk_size == 0 || char_len(content) <= chunk_size {
        return vec![content.to_string()];
    }

    let paragraphs = split_paragraphs(content);
    let mut chunks = Vec::new();
    let mut buffer = String::new();

    for paragraph in paragraphs {
        if char_len(&paragraph) > chunk_size {
            if !buffer.is_empty() {
                chunks.push(std::mem::take(&mut buffer));
            }
            chunks.extend(force_split(&paragraph, chunk_size));
            continue;
        }

        let separator_len = if buffer.is_empty() { 0 } else { 2 };
        if !buffer.is_empty() && char_len(&buffer) + separator_len + char_len(&paragraph) > chunk_size
        {
            chunks.push(std::mem::take(&mut buffer));
        }

        if !buffer.is_empty() {
            buffer.push_str("\n\n");
        }
        buffer.push_str(&paragraph);
    }

    if !buffer.is_empty() {
        chunks.push(buffer);
    }

    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split on one-or-more blank lines, preserving internal newlines within
/// each paragraph verbatim.
fn split_paragraphs(content: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut blank_run = 0;

    for line in content.split('\n') {
        if line.trim().is_empty() {
            blank_run += 1;
            continue;
        }
        if blank_run > 0 && !current.is_empty() {
            paragraphs.push(std::mem::take(&mut current));
        }
        blank_run = 0;
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    paragraphs
}

/// Force-split a single oversized paragraph into fixed-size character
/// slices. Used only when a paragraph alone exceeds `chunk_size`.
fn force_split(paragraph: &str, chunk_size: usize) -> Vec<String> {
    paragraph
        .chars()
        .collect::<Vec<char>>()
        .chunks(chunk_size)
        .map(|slice| slice.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_chunk_size_means_no_chunking() {
        let content = "a".repeat(1000);
        assert_eq!(chunk_content(&content, 0), vec![content]);
    }

    #[test]
    fn content_under_chunk_size_is_a_single_chunk() {
        let content = "short document";
        assert_eq!(chunk_content(content, 500), vec![content.to_string()]);
    }

    #[test]
    fn paragraphs_are_packed_until_the_limit() {
        let content = "one\n\ntwo\n\nthree";
        let chunks = chunk_content(content, 8);
        assert_eq!(chunks, vec!["one\n\ntwo".to_string(), "three".to_string()]);
    }

    #[test]
    fn oversized_paragraph_is_force_split() {
        let paragraph = "x".repeat(25);
        let chunks = chunk_content(&paragraph, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[1].len(), 10);
        assert_eq!(chunks[2].len(), 5);
    }

    #[test]
    fn internal_newlines_within_a_paragraph_are_preserved() {
        let content = "line one\nline two\n\nsecond paragraph";
        let chunks = chunk_content(content, 100);
        assert_eq!(chunks, vec![content.to_string()]);
    }

    #[test]
    fn multiple_blank_lines_are_treated_as_one_boundary() {
        let content = "first\n\n\n\nsecond";
        let paragraphs = split_paragraphs(content);
        assert_eq!(paragraphs, vec!["first".to_string(), "second".to_string()]);
    }

    proptest::proptest! {
        #[test]
        fn no_chunk_ever_exceeds_chunk_size(
            chunk_size in 1usize..200,
            paragraph_count in 1usize..10,
        ) {
            let content = (0..paragraph_count)
                .map(|i| "word ".repeat(i + 1))
                .collect::<Vec<_>>()
                .join("\n\n");
            let chunks = chunk_content(&content, chunk_size);
            for chunk in &chunks {
                proptest::prop_assert!(char_len(chunk) <= chunk_size);
            }
        }
    }
}
