use crate::corpus::{EmbeddingStore, StoreEntry};
use crate::search::{cosine_similarity, top_k, SearchError};
use crate::tests::code;

fn store(vectors: &[Vec<f32>]) -> EmbeddingStore {
    EmbeddingStore::from_entries(
        vectors
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let code = code(&format!("C-{i}"), "Glucose");
                StoreEntry {
                    search_text: code.searchable_text(),
                    code,
                    embedding: v.clone(),
                }
            })
            .collect(),
    )
}

fn codes(results: &[crate::search::ScoredCode]) -> Vec<&str> {
    results.iter().map(|r| r.code.code.as_str()).collect()
}

#[test]
fn test_two_nearest_of_three() {
    let store = store(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]]);
    let results = top_k(&[1.0, 0.0], &store, 2).unwrap();

    assert_eq!(codes(&results), vec!["C-0", "C-2"]);
    assert!((results[0].similarity - 1.0).abs() < 1e-6);
    assert!((results[1].similarity - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
}

#[test]
fn test_matches_brute_force_ranking() {
    let vectors: Vec<Vec<f32>> = (0..10)
        .map(|i| {
            let t = i as f32;
            vec![t.sin(), t.cos(), (t * 0.3).sin() - 0.2]
        })
        .collect();
    let store = store(&vectors);
    let query = [0.3, -0.8, 0.5];

    let mut expected: Vec<(usize, f32)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (i, cosine_similarity(&query, v).unwrap()))
        .collect();
    expected.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let results = top_k(&query, &store, 4).unwrap();
    let got: Vec<String> = results.iter().map(|r| r.code.code.clone()).collect();
    let want: Vec<String> = expected[..4].iter().map(|(i, _)| format!("C-{i}")).collect();
    assert_eq!(got, want);

    for pair in results.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
}

#[test]
fn test_k_larger_than_corpus() {
    let store = store(&[vec![1.0, 0.0], vec![0.0, 1.0]]);
    assert_eq!(top_k(&[1.0, 1.0], &store, 10).unwrap().len(), 2);
    assert!(top_k(&[1.0, 1.0], &store, 0).unwrap().is_empty());
    assert!(top_k(&[1.0, 1.0], &EmbeddingStore::default(), 3).unwrap().is_empty());
}

#[test]
fn test_dimension_mismatch_is_an_error() {
    let store = store(&[vec![1.0, 0.0], vec![1.0, 0.0, 0.0]]);
    let err = top_k(&[1.0, 0.0], &store, 1).unwrap_err();

    assert_eq!(
        err,
        SearchError::DimensionMismatch {
            code: "C-1".to_string(),
            expected: 2,
            got: 3,
        }
    );
}

#[test]
fn test_ties_keep_corpus_order() {
    let store = store(&[
        vec![0.0, 1.0],
        vec![2.0, 0.0],
        vec![1.0, 0.0],
        vec![0.5, 0.0],
    ]);
    let results = top_k(&[1.0, 0.0], &store, 3).unwrap();
    assert_eq!(codes(&results), vec!["C-1", "C-2", "C-3"]);
}

#[test]
fn test_large_corpus_spans_shards() {
    // more entries than one rayon shard; the best one sits near the end
    let mut vectors = vec![vec![0.0, 1.0]; 3000];
    vectors[2999] = vec![1.0, 0.0];
    vectors[1500] = vec![1.0, 0.1];
    let store = store(&vectors);

    let results = top_k(&[1.0, 0.0], &store, 2).unwrap();
    assert_eq!(codes(&results), vec!["C-2999", "C-1500"]);
}

#[test]
fn test_zero_vector_scores_zero() {
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).unwrap(), 0.0);
    assert_eq!(
        cosine_similarity(&[1.0], &[1.0, 2.0]),
        Err(SearchError::LengthMismatch(1, 2))
    );
}

#[test]
fn test_degenerate_entry_does_not_outrank_exact_match() {
    let store = store(&[vec![f32::MAX, f32::INFINITY], vec![3e19, 1e19], vec![0.0, 1.0]]);
    let results = top_k(&[3.0, 1.0], &store, 3).unwrap();

    assert_eq!(codes(&results), vec!["C-1", "C-2", "C-0"]);
    assert!((results[0].similarity - 1.0).abs() < 1e-6);
    assert!(results.iter().all(|r| (-1.0..=1.0).contains(&r.similarity)));
}
