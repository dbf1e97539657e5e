//! End-to-end tests: a local model behind the cache, feeding a
//! similarity index.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use codex_semantic_search::{
    BatchProgress, CachedProvider, EmbeddingCache, EmbeddingModel, EmbeddingProvider, ErrorKind,
    IndexConfig, LocalProvider, Metadata, PreloadedModel, SearchOverrides, SimilarityIndex,
    centroid, cosine_similarity,
};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use serde_json::json;

const DIMENSION: usize = 64;

/// Bag-of-words model hashing lowercase words into a fixed number of buckets.
struct HashingModel {
    calls: Arc<AtomicUsize>,
}

impl EmbeddingModel for HashingModel {
    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut embedding = vec![0.0f32; DIMENSION];
        for word in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            embedding[(hasher.finish() % DIMENSION as u64) as usize] += 1.0;
        }
        Ok(embedding)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    id: u32,
    title: String,
    body: String,
    tag: String,
}

fn note(id: u32, title: &str, body: &str, tag: &str) -> Note {
    Note {
        id,
        title: title.to_string(),
        body: body.to_string(),
        tag: tag.to_string(),
    }
}

fn notes() -> Vec<Note> {
    vec![
        note(1, "tokio", "async runtime for rust futures", "rust"),
        note(2, "serde", "serialization framework for rust data", "rust"),
        note(3, "pandas", "dataframes for python data analysis", "python"),
        note(4, "asyncio", "async runtime for python coroutines", "python"),
    ]
}

type NoteProvider = CachedProvider<LocalProvider<PreloadedModel<HashingModel>>>;

fn provider(calls: &Arc<AtomicUsize>) -> Arc<NoteProvider> {
    let model = HashingModel {
        calls: Arc::clone(calls),
    };
    Arc::new(CachedProvider::new(
        LocalProvider::new(PreloadedModel::new("hashing-bow", model)),
        EmbeddingCache::new(1_000),
    ))
}

fn note_index(provider: Arc<NoteProvider>) -> SimilarityIndex<Note> {
    SimilarityIndex::new(provider, |n: &Note| format!("{} {}", n.title, n.body))
        .with_metadata_extractor(|n: &Note| {
            let mut metadata = Metadata::new();
            metadata.insert("tag".to_string(), json!(n.tag));
            metadata.insert("id".to_string(), json!(n.id));
            metadata
        })
}

#[tokio::test]
async fn test_index_and_search_notes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut index = note_index(provider(&calls));
    index.index(&notes(), false).await.unwrap();

    let results = index
        .search("tokio async runtime for rust futures", &SearchOverrides::default())
        .await
        .unwrap();

    assert_eq!(results[0].item.id, 1);
    assert_eq!(results[0].rank, 1);
    assert!((results[0].score - 1.0).abs() < 1e-6);
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn test_filtered_search_only_sees_matching_metadata() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut index = note_index(provider(&calls));
    index.index(&notes(), false).await.unwrap();

    let results = index
        .search_with_filter(
            "async runtime",
            |m| m.get("tag") == Some(&json!("python")),
            &SearchOverrides::default(),
        )
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.item.tag == "python"));
    assert_eq!(results[0].item.id, 4);

    let err = index
        .search_with_filter(
            "async runtime",
            |m| m.get("tag") == Some(&json!("go")),
            &SearchOverrides::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_find_similar_returns_the_item_itself_first() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut index = note_index(provider(&calls));
    let notes = notes();
    index.index(&notes, false).await.unwrap();

    let results = index
        .find_similar(&notes[2], &SearchOverrides::new().with_top_k(2))
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].item, notes[2]);
}

#[tokio::test]
async fn test_reindexing_hits_the_cache() {
    let calls = Arc::new(AtomicUsize::new(0));
    let provider = provider(&calls);
    let mut index = note_index(Arc::clone(&provider));

    index.index(&notes(), false).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    index.index(&notes(), true).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(index.stats().item_count, 4);
    assert_eq!(provider.cache().stats().await.entries, 4);
}

#[tokio::test]
async fn test_progress_is_reported_per_chunk() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen: Arc<Mutex<Vec<BatchProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let mut index = note_index(provider(&calls))
        .with_config(IndexConfig::new().with_batch_size(3))
        .unwrap()
        .with_progress(move |progress| sink.lock().unwrap().push(progress));
    index.index(&notes(), false).await.unwrap();

    let completed: Vec<usize> = seen.lock().unwrap().iter().map(|p| p.completed).collect();
    assert_eq!(completed, vec![3, 4]);
}

#[tokio::test]
async fn test_snapshot_survives_json_round_trip() {
    let calls = Arc::new(AtomicUsize::new(0));
    let provider = provider(&calls);
    let mut index = note_index(Arc::clone(&provider));
    index.index(&notes(), false).await.unwrap();

    let json = index.export_json().unwrap();
    let before = index.stats();
    index.clear();
    assert_eq!(index.stats().item_count, 0);
    assert_eq!(index.stats().dimensions, 0);

    index.import_json(&json).unwrap();
    assert_eq!(index.stats(), before);
    assert_eq!(before.dimensions, DIMENSION);

    let ids: Vec<u32> = index.items().iter().map(|e| e.item.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert_eq!(index.items()[2].metadata["tag"], json!("python"));
}

#[tokio::test]
async fn test_centroid_of_topic_is_closer_to_its_members() {
    let calls = Arc::new(AtomicUsize::new(0));
    let provider = provider(&calls);
    provider.initialize().await.unwrap();

    let mut index = note_index(Arc::clone(&provider));
    index.index(&notes(), false).await.unwrap();

    let python: Vec<Vec<f32>> = index
        .items()
        .iter()
        .filter(|e| e.item.tag == "python")
        .map(|e| e.embedding.clone())
        .collect();
    let center = centroid(&python).unwrap();
    assert_eq!(center.len(), DIMENSION);

    for member in &python {
        assert!(cosine_similarity(&center, member).unwrap() > 0.5);
    }
}
