//! End-to-end scenarios and cross-component properties, exercised through
//! the public `Database` facade.

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use quiver::{ChunkPatch, Database, LibraryPatch, Metric, QuiverError, Settings};

fn db() -> Database {
    Database::new(Settings::default())
}

fn db_with_data_dir(dir: &std::path::Path) -> Database {
    Database::new(Settings {
        data_dir: dir.to_path_buf(),
        ..Settings::default()
    })
}

fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// S1–S6
// ---------------------------------------------------------------------------

#[test]
fn s1_basic_flow_linear_cosine() {
    let db = db();
    let library = db.create_library("L", None, HashMap::new()).unwrap();
    let doc = db
        .create_document(&library.id, "D", None, HashMap::new())
        .unwrap();

    let c1 = db
        .create_chunk(&library.id, &doc.id, "a", vec![0.0, 1.0, 0.0], HashMap::new())
        .unwrap();
    db.create_chunk(&library.id, &doc.id, "b", vec![1.0, 0.0, 0.0], HashMap::new())
        .unwrap();

    db.build_index(&library.id, "linear", "cosine").unwrap();

    let hits = db
        .search(&library.id, &[0.0, 1.0, 0.0], 1, HashMap::new())
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, c1.id);
    assert!((hits[0].score - 1.0).abs() < 1e-9);
}

#[test]
fn s2_dimension_lock() {
    let db = db();
    let library = db.create_library("L", None, HashMap::new()).unwrap();
    let doc = db
        .create_document(&library.id, "D", None, HashMap::new())
        .unwrap();
    db.create_chunk(&library.id, &doc.id, "a", vec![0.0, 1.0, 0.0], HashMap::new())
        .unwrap();

    let err = db
        .create_chunk(&library.id, &doc.id, "short", vec![1.0, 0.0], HashMap::new())
        .unwrap_err();
    assert!(matches!(
        err,
        QuiverError::DimensionMismatch {
            expected: 3,
            got: 2
        }
    ));
}

#[test]
fn s3_metadata_filter() {
    let db = db();
    let library = db.create_library("L", None, HashMap::new()).unwrap();
    let doc = db
        .create_document(&library.id, "D", None, HashMap::new())
        .unwrap();

    db.create_chunk(&library.id, &doc.id, "a", vec![0.0, 1.0, 0.0], HashMap::new())
        .unwrap();
    let c2 = db
        .create_chunk(
            &library.id,
            &doc.id,
            "b",
            vec![1.0, 0.0, 0.0],
            meta(&[("lang", "tr")]),
        )
        .unwrap();
    let c3 = db
        .create_chunk(
            &library.id,
            &doc.id,
            "c",
            vec![0.0, 1.0, 0.0],
            meta(&[("lang", "en")]),
        )
        .unwrap();

    db.build_index(&library.id, "linear", "cosine").unwrap();

    let hits = db
        .search(&library.id, &[0.0, 1.0, 0.0], 5, meta(&[("lang", "en")]))
        .unwrap();
    let ids: HashSet<_> = hits.iter().map(|h| h.chunk_id.clone()).collect();
    assert_eq!(ids.len(), 1);
    assert!(ids.contains(&c3.id));
    assert!(!ids.contains(&c2.id));
}

#[test]
fn s4_algorithm_metric_rejection() {
    let db = db();
    let library = db.create_library("L", None, HashMap::new()).unwrap();

    match db.build_index(&library.id, "kdtree", "cosine").unwrap_err() {
        QuiverError::InvalidMetric {
            algorithm,
            metric,
            supported,
        } => {
            assert_eq!(algorithm, "kdtree");
            assert_eq!(metric, "cosine");
            assert_eq!(supported, vec!["euclidean"]);
        }
        other => panic!("expected InvalidMetric, got {other:?}"),
    }

    assert!(matches!(
        db.build_index(&library.id, "lsh", "euclidean").unwrap_err(),
        QuiverError::InvalidMetric { .. }
    ));

    match db.build_index(&library.id, "bogus", "cosine").unwrap_err() {
        QuiverError::InvalidAlgorithm {
            algorithm,
            available,
        } => {
            assert_eq!(algorithm, "bogus");
            assert_eq!(available, vec!["linear", "kdtree", "lsh"]);
        }
        other => panic!("expected InvalidAlgorithm, got {other:?}"),
    }
}

#[test]
fn s5_lazy_fallback_index() {
    let db = db();
    let library = db.create_library("L", None, HashMap::new()).unwrap();
    let doc = db
        .create_document(&library.id, "D", None, HashMap::new())
        .unwrap();
    db.create_chunk(&library.id, &doc.id, "a", vec![0.0, 1.0, 0.0], HashMap::new())
        .unwrap();

    // No explicit build: the first search installs a Linear index with the
    // process default metric.
    let hits = db
        .search(&library.id, &[0.0, 1.0, 0.0], 1, HashMap::new())
        .unwrap();
    assert_eq!(hits.len(), 1);

    let info = db.index_info(&library.id);
    assert_eq!(info.algorithm.map(|a| a.as_str()), Some("linear"));
    assert_eq!(info.metric, Metric::Cosine);
}

#[test]
fn s6_snapshot_round_trip_with_kdtree() {
    let dir = tempfile::tempdir().unwrap();
    let db = db_with_data_dir(dir.path());

    let library = db.create_library("L", None, HashMap::new()).unwrap();
    let doc = db
        .create_document(&library.id, "D", None, HashMap::new())
        .unwrap();
    let c1 = db
        .create_chunk(&library.id, &doc.id, "a", vec![0.0, 1.0, 0.0], HashMap::new())
        .unwrap();
    db.create_chunk(&library.id, &doc.id, "b", vec![1.0, 0.0, 0.0], HashMap::new())
        .unwrap();
    db.build_index(&library.id, "kdtree", "euclidean").unwrap();

    let before = db
        .search(&library.id, &[0.0, 1.0, 0.0], 1, HashMap::new())
        .unwrap();

    let path = db.save_snapshot(None).unwrap();

    // Restore into a fresh database.
    let restored = db_with_data_dir(dir.path());
    restored.load_snapshot(Some(path)).unwrap();

    let info = restored.index_info(&library.id);
    assert_eq!(info.algorithm.map(|a| a.as_str()), Some("kdtree"));
    assert_eq!(info.metric, Metric::Euclidean);

    let after = restored
        .search(&library.id, &[0.0, 1.0, 0.0], 1, HashMap::new())
        .unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].chunk_id, before[0].chunk_id);
    assert_eq!(after[0].chunk_id, c1.id);
}

// ---------------------------------------------------------------------------
// Cross-component properties
// ---------------------------------------------------------------------------

#[test]
fn snapshot_round_trip_preserves_all_listings() {
    let dir = tempfile::tempdir().unwrap();
    let db = db_with_data_dir(dir.path());

    let lib_a = db
        .create_library("a", Some("first"), meta(&[("team", "search")]))
        .unwrap();
    let lib_b = db.create_library("b", None, HashMap::new()).unwrap();
    let doc = db
        .create_document(&lib_a.id, "doc", None, HashMap::new())
        .unwrap();
    db.create_chunk(&lib_a.id, &doc.id, "x", vec![1.0, 2.0], meta(&[("k", "v")]))
        .unwrap();
    db.build_index(&lib_a.id, "lsh", "cosine").unwrap();

    let path = db.save_snapshot(None).unwrap();
    let restored = db_with_data_dir(dir.path());
    restored.load_snapshot(Some(path)).unwrap();

    assert_eq!(restored.list_libraries(), db.list_libraries());
    assert_eq!(restored.list_documents(&lib_a.id), db.list_documents(&lib_a.id));
    assert_eq!(restored.list_chunks(&lib_a.id), db.list_chunks(&lib_a.id));
    assert!(restored.list_documents(&lib_b.id).is_empty());

    let info = restored.index_info(&lib_a.id);
    assert_eq!(info.algorithm.map(|a| a.as_str()), Some("lsh"));
}

#[test]
fn updating_an_embedding_serves_stale_vectors_until_rebuild() {
    let db = db();
    let library = db.create_library("L", None, HashMap::new()).unwrap();
    let doc = db
        .create_document(&library.id, "D", None, HashMap::new())
        .unwrap();
    let chunk = db
        .create_chunk(&library.id, &doc.id, "a", vec![0.0, 1.0], HashMap::new())
        .unwrap();
    db.build_index(&library.id, "linear", "cosine").unwrap();

    // Point the chunk the other way; the index still holds the old vector.
    db.update_chunk(
        &chunk.id,
        ChunkPatch {
            embedding: Some(vec![1.0, 0.0]),
            ..Default::default()
        },
    )
    .unwrap();

    let stale = db
        .search(&library.id, &[0.0, 1.0], 1, HashMap::new())
        .unwrap();
    assert!((stale[0].score - 1.0).abs() < 1e-6);

    db.build_index(&library.id, "linear", "cosine").unwrap();
    let fresh = db
        .search(&library.id, &[0.0, 1.0], 1, HashMap::new())
        .unwrap();
    assert!(fresh[0].score.abs() < 1e-6);
}

#[test]
fn rename_via_patch_leaves_other_fields_alone() {
    let db = db();
    let library = db
        .create_library("old", Some("desc"), meta(&[("k", "v")]))
        .unwrap();

    let updated = db
        .update_library(
            &library.id,
            LibraryPatch {
                name: Some("new".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(updated.name, "new");
    assert_eq!(updated.description.as_deref(), Some("desc"));
    assert_eq!(updated.metadata.get("k"), Some(&"v".to_string()));
}

#[test]
fn concurrent_mutation_and_search_never_dangles() {
    let db = db();
    let library = db.create_library("L", None, HashMap::new()).unwrap();
    let doc = db
        .create_document(&library.id, "D", None, HashMap::new())
        .unwrap();

    // Seed enough chunks that searches overlap deletions.
    let seed_ids: Vec<_> = (0..64)
        .map(|i| {
            db.create_chunk(
                &library.id,
                &doc.id,
                "seed",
                vec![i as f32, 1.0],
                HashMap::new(),
            )
            .unwrap()
            .id
        })
        .collect();
    db.build_index(&library.id, "linear", "cosine").unwrap();

    std::thread::scope(|scope| {
        let deleter = &db;
        let delete_ids = seed_ids.clone();
        scope.spawn(move || {
            for id in &delete_ids {
                deleter.delete_chunk(id);
            }
        });

        let writer = &db;
        let writer_lib = library.id.clone();
        let writer_doc = doc.id.clone();
        scope.spawn(move || {
            for i in 0..64 {
                writer
                    .create_chunk(
                        &writer_lib,
                        &writer_doc,
                        "new",
                        vec![i as f32, -1.0],
                        HashMap::new(),
                    )
                    .unwrap();
                if i % 16 == 0 {
                    writer.build_index(&writer_lib, "linear", "cosine").unwrap();
                }
            }
        });

        for _ in 0..2 {
            let searcher = &db;
            let search_lib = library.id.clone();
            scope.spawn(move || {
                for _ in 0..128 {
                    // Every hydrated hit must reference a chunk that existed
                    // at hydration time — dangling ids are dropped inside
                    // `search`, so text is always present.
                    let hits = searcher
                        .search(&search_lib, &[1.0, 1.0], 8, HashMap::new())
                        .unwrap();
                    for hit in hits {
                        assert!(!hit.text.is_empty());
                    }
                }
            });
        }
    });
}

// ---------------------------------------------------------------------------
// Property tests
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Creates without deletes: listings contain exactly what was created.
    #[test]
    fn created_libraries_are_all_listed(names in proptest::collection::vec("[a-z]{1,12}", 1..8)) {
        let db = db();
        let mut created = Vec::new();
        for name in &names {
            created.push(db.create_library(name, None, HashMap::new()).unwrap().id);
        }

        let listed: HashSet<_> = db.list_libraries().into_iter().map(|l| l.id).collect();
        prop_assert_eq!(listed, created.into_iter().collect::<HashSet<_>>());
    }

    /// The first admitted embedding freezes the library dimension; every
    /// other length fails with the frozen dimension in the error.
    #[test]
    fn embedding_dim_freezes_on_first_chunk(first in 1usize..16, second in 1usize..16) {
        let db = db();
        let library = db.create_library("lib", None, HashMap::new()).unwrap();
        let doc = db.create_document(&library.id, "doc", None, HashMap::new()).unwrap();

        db.create_chunk(&library.id, &doc.id, "a", vec![1.0; first], HashMap::new()).unwrap();
        prop_assert_eq!(db.get_library(&library.id).unwrap().embedding_dim, Some(first));

        let second_try = db.create_chunk(&library.id, &doc.id, "b", vec![1.0; second], HashMap::new());
        if second == first {
            prop_assert!(second_try.is_ok());
        } else {
            match second_try {
                Err(QuiverError::DimensionMismatch { expected, got }) => {
                    prop_assert_eq!(expected, first);
                    prop_assert_eq!(got, second);
                }
                other => prop_assert!(false, "expected DimensionMismatch, got {:?}", other),
            }
        }
    }

    /// After a cascade delete nothing under the library is reachable.
    #[test]
    fn cascade_delete_unreaches_descendants(chunk_count in 1usize..6) {
        let db = db();
        let keep = db.create_library("keep", None, HashMap::new()).unwrap();
        let keep_doc = db.create_document(&keep.id, "kd", None, HashMap::new()).unwrap();
        db.create_chunk(&keep.id, &keep_doc.id, "kc", vec![1.0], HashMap::new()).unwrap();

        let doomed = db.create_library("doomed", None, HashMap::new()).unwrap();
        let doomed_doc = db.create_document(&doomed.id, "dd", None, HashMap::new()).unwrap();
        let mut doomed_chunks = Vec::new();
        for _ in 0..chunk_count {
            doomed_chunks.push(
                db.create_chunk(&doomed.id, &doomed_doc.id, "dc", vec![1.0], HashMap::new())
                    .unwrap()
                    .id,
            );
        }
        db.build_index(&doomed.id, "linear", "cosine").unwrap();

        db.delete_library(&doomed.id);

        prop_assert!(db.get_library(&doomed.id).is_err());
        prop_assert!(db.list_documents(&doomed.id).is_empty());
        prop_assert!(db.list_chunks(&doomed.id).is_empty());
        for id in &doomed_chunks {
            prop_assert!(db.get_chunk(id).is_err());
        }
        prop_assert_eq!(db.index_info(&doomed.id).algorithm, None);

        // The sibling library is untouched.
        prop_assert_eq!(db.list_chunks(&keep.id).len(), 1);
    }
}
