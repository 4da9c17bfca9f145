use gcq_vector_store::{ChunkMeta, IndexIdentity, VectorIndex, VectorStoreError};
use pretty_assertions::assert_eq;

fn meta(file: &str, id: &str, start: u64, line: u32) -> ChunkMeta {
    ChunkMeta {
        chunk_id: id.to_string(),
        file_path: file.to_string(),
        byte_start: start,
        byte_end: start + 16,
        line_start: line,
        line_end: line + 1,
    }
}

fn populated() -> VectorIndex {
    let index = VectorIndex::new(IndexIdentity::new("ollama", "nomic-embed-text", 3));
    index
        .upsert(
            "src/a.rs",
            vec![
                (meta("src/a.rs", "a0", 0, 1), vec![1.0, 2.0, 3.0]),
                (meta("src/a.rs", "a1", 12, 2), vec![0.3, -0.2, 0.9]),
            ],
        )
        .expect("upsert a");
    index
        .upsert("b.txt", vec![(meta("b.txt", "b0", 0, 1), vec![0.0, 0.0, 5.0])])
        .expect("upsert b");
    index
}

#[test]
fn snapshot_round_trip_is_bit_identical() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("index.idx");
    let original = populated();
    original.snapshot(&path).expect("snapshot");
    assert!(!dir.path().join("index.idx.tmp").exists());

    let restored = VectorIndex::new(original.identity().clone());
    let loaded = restored.load(&path).expect("load");
    assert_eq!(loaded, 3);

    let before = original.entries();
    let after = restored.entries();
    assert_eq!(before.len(), after.len());
    for (a, b) in before.iter().zip(&after) {
        assert_eq!(a.meta, b.meta);
        let a_bits: Vec<u32> = a.vector.iter().map(|x| x.to_bits()).collect();
        let b_bits: Vec<u32> = b.vector.iter().map(|x| x.to_bits()).collect();
        assert_eq!(a_bits, b_bits);
    }
}

#[test]
fn snapshot_header_layout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("index.idx");
    populated().snapshot(&path).expect("snapshot");
    let bytes = std::fs::read(&path).expect("read");

    assert_eq!(&bytes[..8], b"GCQIDX\0\x01");
    assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().expect("u32")), 1);
    assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().expect("u32")), 3);
    assert_eq!(u16::from_le_bytes(bytes[16..18].try_into().expect("u16")), 6);
    assert_eq!(&bytes[18..24], b"ollama");

    let body = &bytes[..bytes.len() - 4];
    let crc = u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().expect("crc"));
    assert_eq!(crc, crc32fast::hash(body));
}

#[test]
fn dimension_mismatch_is_incompatible_and_leaves_index_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("index.idx");
    populated().snapshot(&path).expect("snapshot");

    let other = VectorIndex::new(IndexIdentity::new("ollama", "nomic-embed-text", 4));
    other
        .upsert("keep.txt", vec![(meta("keep.txt", "k0", 0, 1), vec![1.0, 0.0, 0.0, 0.0])])
        .expect("upsert");
    let revision = other.revision();

    let err = other.load(&path).expect_err("must be incompatible");
    assert!(matches!(err, VectorStoreError::IncompatibleSnapshot { .. }));
    assert_eq!(other.len(), 1);
    assert_eq!(other.chunk_ids("keep.txt"), vec!["k0".to_string()]);
    assert_eq!(other.revision(), revision);
}

#[test]
fn model_mismatch_is_incompatible() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("index.idx");
    populated().snapshot(&path).expect("snapshot");

    let other = VectorIndex::new(IndexIdentity::new("ollama", "mxbai-embed-large", 3));
    assert!(matches!(
        other.load(&path),
        Err(VectorStoreError::IncompatibleSnapshot { .. })
    ));
}

#[test]
fn flipped_byte_fails_checksum() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("index.idx");
    let original = populated();
    original.snapshot(&path).expect("snapshot");

    let mut bytes = std::fs::read(&path).expect("read");
    let last_vector_byte = bytes.len() - 6;
    bytes[last_vector_byte] ^= 0x01;
    std::fs::write(&path, &bytes).expect("write");

    let restored = VectorIndex::new(original.identity().clone());
    assert!(matches!(
        restored.load(&path),
        Err(VectorStoreError::CorruptSnapshot(_))
    ));
    assert!(restored.is_empty());
}

#[test]
fn truncated_file_is_corrupt() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("index.idx");
    let original = populated();
    original.snapshot(&path).expect("snapshot");

    let bytes = std::fs::read(&path).expect("read");
    std::fs::write(&path, &bytes[..bytes.len() / 2]).expect("write");

    let restored = VectorIndex::new(original.identity().clone());
    assert!(matches!(
        restored.load(&path),
        Err(VectorStoreError::CorruptSnapshot(_))
    ));
}
