use crate::chunk::{chunk_id, content_hash, Chunk};
use crate::config::ChunkerConfig;
use crate::error::Result;
use crate::language::Language;

/// Bytes inspected for a NUL when deciding whether a file is binary.
pub const BINARY_SNIFF_LEN: usize = 8 * 1024;

/// Returns true when a NUL byte appears in the first 8 KiB.
#[must_use]
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(BINARY_SNIFF_LEN)].contains(&0)
}

/// Splits file contents into fixed-size overlapping byte windows.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Fails with `InvalidConfig` unless `chunk_overlap < chunk_size`.
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk a file's bytes.
    ///
    /// Windows start every `chunk_size - chunk_overlap` bytes; the last one
    /// ends at the file end and may be shorter. Empty and binary inputs
    /// yield no chunks. Offsets, ids and hashes cover the raw window; the
    /// text is widened to whole UTF-8 characters.
    #[must_use]
    pub fn chunk(&self, file_path: &str, bytes: &[u8], language: Language) -> Vec<Chunk> {
        if bytes.is_empty() || is_binary(bytes) {
            return Vec::new();
        }

        let lines = LineIndex::new(bytes);
        let len = bytes.len();
        let size = self.config.chunk_size;
        let step = self.config.step();

        let mut chunks = Vec::with_capacity(len / step + 1);
        let mut start = 0usize;
        loop {
            let end = (start + size).min(len);
            let window = &bytes[start..end];
            let hash = content_hash(window);
            let (byte_start, byte_end) = (start as u64, end as u64);
            let (text_start, text_end) = widen_to_chars(bytes, start, end);

            chunks.push(Chunk {
                id: chunk_id(file_path, byte_start, byte_end, &hash),
                file_path: file_path.to_string(),
                byte_start,
                byte_end,
                line_start: lines.line_of(start),
                line_end: lines.line_of(end - 1),
                text: String::from_utf8_lossy(&bytes[text_start..text_end]).into_owned(),
                language,
            });

            if end == len {
                break;
            }
            start += step;
        }
        chunks
    }

    /// Convenience wrapper for in-memory text.
    #[must_use]
    pub fn chunk_str(&self, file_path: &str, text: &str, language: Language) -> Vec<Chunk> {
        self.chunk(file_path, text.as_bytes(), language)
    }
}

/// Grow `start..end` outwards so it does not split a UTF-8 sequence.
fn widen_to_chars(bytes: &[u8], start: usize, end: usize) -> (usize, usize) {
    let continuation = |b: u8| b & 0xC0 == 0x80;
    let mut from = start;
    while from > 0 && start - from < 3 && continuation(bytes[from]) {
        from -= 1;
    }
    let mut to = end;
    while to < bytes.len() && to - end < 3 && continuation(bytes[to]) {
        to += 1;
    }
    (from, to)
}

/// Offsets of every newline, built in one pass.
struct LineIndex {
    newlines: Vec<usize>,
}

impl LineIndex {
    fn new(bytes: &[u8]) -> Self {
        let newlines = bytes
            .iter()
            .enumerate()
            .filter_map(|(offset, &b)| (b == b'\n').then_some(offset))
            .collect();
        Self { newlines }
    }

    /// 1-based line containing `offset`.
    fn line_of(&self, offset: usize) -> u32 {
        let before = self.newlines.partition_point(|&nl| nl < offset);
        u32::try_from(before + 1).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkerConfig::new(size, overlap).expect("config")).expect("chunker")
    }

    #[test]
    fn exact_fit_produces_single_chunk() {
        let chunks = chunker(16, 0).chunk_str("a.txt", "alpha beta gamma", Language::Text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "alpha beta gamma");
        assert_eq!((chunks[0].byte_start, chunks[0].byte_end), (0, 16));
    }

    #[test]
    fn last_chunk_may_be_short() {
        let chunks = chunker(8, 2).chunk_str("f.txt", "0123456789abcdef", Language::Text);
        let spans: Vec<(u64, u64)> = chunks.iter().map(|c| (c.byte_start, c.byte_end)).collect();
        assert_eq!(spans, vec![(0, 8), (6, 14), (12, 16)]);
    }

    #[test]
    fn line_numbers_follow_newlines() {
        let text = "one\ntwo\nthree\nfour\n";
        let chunks = chunker(8, 0).chunk_str("l.txt", text, Language::Text);
        let lines: Vec<(u32, u32)> = chunks.iter().map(|c| (c.line_start, c.line_end)).collect();
        // "one\ntwo\n" | "three\nfo" | "ur\n"
        assert_eq!(lines, vec![(1, 2), (3, 4), (4, 4)]);
    }

    #[test]
    fn binary_and_empty_inputs_are_skipped() {
        let c = chunker(16, 4);
        assert!(c.chunk("bin.dat", b"abc\0def", Language::Text).is_empty());
        assert!(c.chunk("empty.txt", b"", Language::Text).is_empty());
    }

    #[test]
    fn nul_after_sniff_window_is_not_binary() {
        let mut bytes = vec![b'a'; BINARY_SNIFF_LEN];
        bytes.push(0);
        assert!(!is_binary(&bytes));
    }

    #[test]
    fn windows_splitting_multibyte_chars_keep_whole_chars() {
        // a | é (2 bytes) | € (3 bytes) | b
        let chunks = chunker(2, 0).chunk_str("u.txt", "aé€b", Language::Text);
        let spans: Vec<(u64, u64)> = chunks.iter().map(|c| (c.byte_start, c.byte_end)).collect();
        assert_eq!(spans, vec![(0, 2), (2, 4), (4, 6), (6, 7)]);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["aé", "é€", "€", "b"]);
        assert!(chunks.iter().all(|c| !c.text.contains('\u{FFFD}')));
    }

    #[test]
    fn identical_windows_share_ids_only_at_same_offsets() {
        let chunks = chunker(4, 0).chunk_str("r.txt", "abcdabcd", Language::Text);
        assert_eq!(chunks.len(), 2);
        assert_ne!(chunks[0].id, chunks[1].id);
        assert_eq!(chunks[0].text, chunks[1].text);
    }
}
