use gcq_vector_store::{ChunkMeta, IndexIdentity, VectorIndex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn version(tag: &str) -> Vec<(ChunkMeta, Vec<f32>)> {
    (0..4u64)
        .map(|i| {
            (
                ChunkMeta {
                    chunk_id: format!("{tag}{i}"),
                    file_path: "hot.rs".to_string(),
                    byte_start: i * 8,
                    byte_end: i * 8 + 8,
                    line_start: 1,
                    line_end: 1,
                },
                vec![1.0, 0.0, 0.0],
            )
        })
        .collect()
}

#[test]
fn readers_never_observe_a_partial_file() {
    let index = Arc::new(VectorIndex::new(IndexIdentity::new("stub", "m", 3)));
    index.upsert("hot.rs", version("a")).expect("seed");
    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let index = Arc::clone(&index);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            for round in 0..2_000 {
                let tag = if round % 2 == 0 { "b" } else { "a" };
                index.upsert("hot.rs", version(tag)).expect("upsert");
            }
            stop.store(true, Ordering::SeqCst);
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let index = Arc::clone(&index);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut observations = 0usize;
                while !stop.load(Ordering::SeqCst) || observations == 0 {
                    let hits = index.query(&[1.0, 0.0, 0.0], 100, 0.5).expect("query");
                    assert_eq!(hits.len(), 4, "file must be all present");
                    let first = hits[0].meta.chunk_id.chars().next();
                    assert!(
                        hits.iter()
                            .all(|h| h.meta.chunk_id.chars().next() == first),
                        "mixed versions: {:?}",
                        hits.iter().map(|h| &h.meta.chunk_id).collect::<Vec<_>>()
                    );
                    observations += 1;
                }
                observations
            })
        })
        .collect();

    writer.join().expect("writer");
    for reader in readers {
        assert!(reader.join().expect("reader") > 0);
    }
}
