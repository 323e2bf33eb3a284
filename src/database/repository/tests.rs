use super::*;
use std::sync::Arc;

use tempfile::TempDir;

use crate::database::DatabaseManager;
use crate::database::models::{ChunkMetadata, SearchScope};
use crate::scheduler::TokioScheduler;

const MODEL: &str = "test-model";

async fn create_test_manager() -> (DatabaseManager, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let manager = DatabaseManager::open(
        temp_dir.path().join("snapshot.db.gz"),
        temp_dir.path().join("engine").join("live.db"),
        Arc::new(TokioScheduler),
    )
    .await
    .expect("should create engine");
    (manager, temp_dir)
}

fn chunk(path: &str, mtime: i64, embedding: Vec<f32>) -> NewEmbeddingChunk {
    NewEmbeddingChunk {
        path: path.to_string(),
        mtime,
        content: format!("chunk of {path}"),
        model: MODEL.to_string(),
        dimension: embedding.len() as u32,
        embedding,
        metadata: ChunkMetadata {
            start_line: 1,
            end_line: 4,
        },
    }
}

#[tokio::test]
async fn file_mtimes_report_latest_per_path() {
    let (manager, _temp_dir) = create_test_manager().await;
    let repository = manager.repository();

    repository
        .insert_vectors(&[
            chunk("a.md", 100, vec![1.0, 0.0]),
            chunk("a.md", 150, vec![0.0, 1.0]),
            chunk("b.md", 90, vec![1.0, 1.0]),
        ])
        .await
        .expect("should insert chunks");

    let mtimes = repository
        .get_file_mtimes(MODEL)
        .await
        .expect("can read mtimes");
    assert_eq!(mtimes.len(), 2);
    assert_eq!(mtimes["a.md"], 150);
    assert_eq!(mtimes["b.md"], 90);

    assert!(
        repository
            .get_file_mtimes("other-model")
            .await
            .expect("can read mtimes")
            .is_empty()
    );
}

#[tokio::test]
async fn insert_is_all_or_nothing() {
    let (manager, _temp_dir) = create_test_manager().await;
    let repository = manager.repository();

    let mut bad = chunk("bad.md", 100, vec![1.0, 0.0]);
    bad.dimension = 3;

    let result = repository
        .insert_vectors(&[chunk("good.md", 100, vec![1.0, 0.0]), bad])
        .await;
    assert!(result.is_err());
    assert!(
        !repository
            .has_vectors_for_model(MODEL)
            .await
            .expect("can query")
    );

    let mut empty = chunk("empty.md", 100, vec![1.0, 0.0]);
    empty.content = "\0\0".to_string();
    assert!(repository.insert_vectors(&[empty]).await.is_err());
}

#[tokio::test]
async fn content_is_sanitized_on_insert() {
    let (manager, _temp_dir) = create_test_manager().await;
    let repository = manager.repository();

    let mut dirty = chunk("a.md", 100, vec![1.0, 0.0]);
    dirty.content = "hel\0lo".to_string();
    repository
        .insert_vectors(&[dirty])
        .await
        .expect("should insert chunk");

    let stored = repository
        .get_chunks_for_file("a.md", MODEL)
        .await
        .expect("can read chunks");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, "hello");
    assert_eq!(stored[0].metadata.0.end_line, 4);
}

#[tokio::test]
async fn delete_and_clear() {
    let (manager, _temp_dir) = create_test_manager().await;
    let repository = manager.repository();

    repository
        .insert_vectors(&[
            chunk("a.md", 100, vec![1.0, 0.0]),
            chunk("a.md", 100, vec![0.5, 0.5]),
            chunk("b.md", 100, vec![0.0, 1.0]),
            chunk("c.md", 100, vec![1.0, 1.0]),
        ])
        .await
        .expect("should insert chunks");

    let deleted = repository
        .delete_vectors_for_multiple_files(&["a.md".to_string(), "b.md".to_string()], MODEL)
        .await
        .expect("can delete");
    assert_eq!(deleted, 3);

    let remaining = repository
        .get_indexed_file_paths(MODEL)
        .await
        .expect("can list paths");
    assert_eq!(remaining, HashSet::from(["c.md".to_string()]));

    assert_eq!(
        repository
            .delete_vectors_for_multiple_files(&[], MODEL)
            .await
            .expect("empty delete is fine"),
        0
    );

    assert_eq!(
        repository
            .clear_all_vectors(MODEL)
            .await
            .expect("can clear"),
        1
    );
    assert!(
        !repository
            .has_vectors_for_model(MODEL)
            .await
            .expect("can query")
    );
}

#[tokio::test]
async fn delete_handles_more_paths_than_one_statement() {
    let (manager, _temp_dir) = create_test_manager().await;
    let repository = manager.repository();

    let chunks: Vec<_> = (0..1200)
        .map(|i| chunk(&format!("notes/{i}.md"), 1, vec![1.0, 0.0]))
        .collect();
    repository
        .insert_vectors(&chunks)
        .await
        .expect("should insert chunks");

    let paths: Vec<String> = chunks.iter().map(|c| c.path.clone()).collect();
    let deleted = repository
        .delete_vectors_for_multiple_files(&paths, MODEL)
        .await
        .expect("can delete");
    assert_eq!(deleted, 1200);
}

#[tokio::test]
async fn similarity_search_orders_and_filters() {
    let (manager, _temp_dir) = create_test_manager().await;
    let repository = manager.repository();

    repository
        .insert_vectors(&[
            chunk("same.md", 1, vec![1.0, 0.0]),
            chunk("close.md", 1, vec![0.9, 0.1]),
            chunk("orthogonal.md", 1, vec![0.0, 1.0]),
            chunk("opposite.md", 1, vec![-1.0, 0.0]),
            chunk("wide.md", 1, vec![1.0, 0.0, 0.0]),
        ])
        .await
        .expect("should insert chunks");

    let options = SearchOptions {
        min_similarity: 0.5,
        limit: 10,
        scope: None,
    };
    let results = repository
        .perform_similarity_search(&[1.0, 0.0], MODEL, &options)
        .await
        .expect("search succeeds");

    let paths: Vec<&str> = results.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["same.md", "close.md"]);
    assert!((results[0].similarity - 1.0).abs() < 1e-6);
    assert!(results.iter().all(|r| r.similarity >= 0.5));

    let limited = repository
        .perform_similarity_search(
            &[1.0, 0.0],
            MODEL,
            &SearchOptions {
                min_similarity: -1.0,
                limit: 3,
                scope: None,
            },
        )
        .await
        .expect("search succeeds");
    assert_eq!(limited.len(), 3);
    assert!(
        limited
            .windows(2)
            .all(|pair| pair[0].similarity >= pair[1].similarity)
    );
}

#[tokio::test]
async fn scoped_search_stays_inside_scope() {
    let (manager, _temp_dir) = create_test_manager().await;
    let repository = manager.repository();

    repository
        .insert_vectors(&[
            chunk("notes/a.md", 1, vec![1.0, 0.0]),
            chunk("notes/deep/b.md", 1, vec![0.8, 0.2]),
            chunk("notes-archive/c.md", 1, vec![1.0, 0.0]),
            chunk("journal/d.md", 1, vec![1.0, 0.0]),
            chunk("todo.md", 1, vec![0.7, 0.3]),
            chunk("笔记/e.md", 1, vec![1.0, 0.0]),
            chunk("笔记本/f.md", 1, vec![1.0, 0.0]),
        ])
        .await
        .expect("should insert chunks");

    let non_ascii_scope = SearchOptions {
        min_similarity: 0.0,
        limit: 10,
        scope: Some(SearchScope {
            files: Vec::new(),
            folders: vec!["笔记/".to_string()],
        }),
    };
    let paths: Vec<String> = repository
        .perform_similarity_search(&[1.0, 0.0], MODEL, &non_ascii_scope)
        .await
        .expect("search succeeds")
        .into_iter()
        .map(|r| r.path)
        .collect();
    assert_eq!(paths, vec!["笔记/e.md"]);

    let folder_scope = SearchOptions {
        min_similarity: 0.0,
        limit: 10,
        scope: Some(SearchScope {
            files: Vec::new(),
            folders: vec!["notes/".to_string()],
        }),
    };
    let results = repository
        .perform_similarity_search(&[1.0, 0.0], MODEL, &folder_scope)
        .await
        .expect("search succeeds");
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.path.starts_with("notes/")));

    let mixed_scope = SearchOptions {
        min_similarity: 0.0,
        limit: 10,
        scope: Some(SearchScope {
            files: vec!["todo.md".to_string()],
            folders: vec!["journal".to_string()],
        }),
    };
    let mut paths: Vec<String> = repository
        .perform_similarity_search(&[1.0, 0.0], MODEL, &mixed_scope)
        .await
        .expect("search succeeds")
        .into_iter()
        .map(|r| r.path)
        .collect();
    paths.sort();
    assert_eq!(paths, vec!["journal/d.md", "todo.md"]);

    let root_scope = SearchOptions {
        min_similarity: 0.0,
        limit: 10,
        scope: Some(SearchScope {
            files: Vec::new(),
            folders: vec!["/".to_string()],
        }),
    };
    assert_eq!(
        repository
            .perform_similarity_search(&[1.0, 0.0], MODEL, &root_scope)
            .await
            .expect("search succeeds")
            .len(),
        7
    );
}

#[tokio::test]
async fn embedding_stats_per_model() {
    let (manager, _temp_dir) = create_test_manager().await;
    let repository = manager.repository();

    let mut other = chunk("a.md", 1, vec![1.0, 0.0, 0.0]);
    other.model = "other-model".to_string();

    repository
        .insert_vectors(&[
            chunk("a.md", 1, vec![1.0, 0.0]),
            chunk("a.md", 1, vec![0.0, 1.0]),
            chunk("b.md", 1, vec![1.0, 1.0]),
            other,
        ])
        .await
        .expect("should insert chunks");

    let stats = repository
        .get_embedding_stats()
        .await
        .expect("can read stats");
    assert_eq!(stats.len(), 2);

    let other_stats = &stats[0];
    assert_eq!(other_stats.model, "other-model");
    assert_eq!(other_stats.row_count, 1);
    assert_eq!(other_stats.dimension, 3);

    let test_stats = &stats[1];
    assert_eq!(test_stats.model, MODEL);
    assert_eq!(test_stats.row_count, 3);
    assert_eq!(test_stats.file_count, 2);
    assert!(test_stats.data_bytes >= 3 * 8);
}
