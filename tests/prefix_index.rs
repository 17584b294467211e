use std::sync::Arc;

use zcache::application::prefix_index::{MatchWindow, PrefixIndex, PrefixIndexOptions, PrefixOp};
use zcache::cache::{CacheConfig, CombinationCache, KeyHasher, SetQueries};
use zcache::domain::score::SortDirection;
use zcache::infra::memory::MemoryStore;

const INDEX_NAME: &str = "test_index";

fn index() -> (Arc<MemoryStore>, PrefixIndex) {
    let store = Arc::new(MemoryStore::new());
    let cache = CombinationCache::new(store.clone(), KeyHasher::default(), CacheConfig::default());
    let index = PrefixIndex::new(
        SetQueries::new(cache),
        INDEX_NAME,
        PrefixIndexOptions::default(),
    );
    (store, index)
}

async fn add(index: &PrefixIndex, text: &str, id: &str) {
    index
        .build(text, id, 1, PrefixOp::Add, &[])
        .await
        .expect("add to index");
}

async fn add_scored(index: &PrefixIndex, text: &str, id: &str, secondary: f64) {
    index
        .build(text, id, 1, PrefixOp::Add, &[(secondary, SortDirection::Desc)])
        .await
        .expect("add to index");
}

async fn matches(index: &PrefixIndex, query: &str) -> Vec<String> {
    index
        .matches(query, MatchWindow::default())
        .await
        .expect("matches")
        .members()
        .into_iter()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn matches_a_string_by_prefix() {
    let (_, index) = index();
    add(&index, "alchemy", "alpha").await;

    assert_eq!(matches(&index, "alc").await, vec!["alpha"]);
}

#[tokio::test]
async fn returns_every_id_sharing_the_prefix() {
    let (_, index) = index();
    add(&index, "dafydd", "alpha").await;
    add(&index, "dagon", "beta").await;

    let found = matches(&index, "da").await;
    assert!(found.contains(&"alpha".to_string()));
    assert!(found.contains(&"beta".to_string()));
}

#[tokio::test]
async fn whitespace_separated_terms_must_all_match() {
    let (store, index) = index();
    add(&index, "ebenezer", "alpha").await;
    add(&index, "safari", "alpha").await;
    add(&index, "ebby", "beta").await;
    add(&index, "dakota", "beta").await;
    add(&index, "saffron", "gamma").await;
    add(&index, "cadmus", "gamma").await;

    let eb = matches(&index, "eb").await;
    assert!(eb.contains(&"alpha".to_string()));
    assert!(eb.contains(&"beta".to_string()));
    assert!(!eb.contains(&"gamma".to_string()));

    let saf = matches(&index, "saf").await;
    assert!(saf.contains(&"alpha".to_string()));
    assert!(!saf.contains(&"beta".to_string()));
    assert!(saf.contains(&"gamma".to_string()));

    assert_eq!(matches(&index, "eb saf").await, vec!["alpha"]);
    // ttl 0 leaves no intersection behind
    assert!(store.keys().iter().all(|key| key.starts_with(INDEX_NAME)));
}

#[tokio::test]
async fn matching_ignores_case() {
    let (_, index) = index();
    add(&index, "February", "alpha").await;

    assert_eq!(matches(&index, "feb").await, vec!["alpha"]);
    assert_eq!(matches(&index, "FEB").await, vec!["alpha"]);
}

#[tokio::test]
async fn shorter_strings_come_first() {
    let (_, index) = index();
    add(&index, "gustav", "alpha").await;
    add(&index, "gus", "beta").await;
    add(&index, "gustavo", "gamma").await;

    assert_eq!(matches(&index, "gus").await, vec!["beta", "alpha", "gamma"]);
}

#[tokio::test]
async fn removed_ids_stop_matching() {
    let (_, index) = index();
    add(&index, "gustav", "alpha").await;
    add(&index, "gus", "beta").await;
    add(&index, "gustavo", "gamma").await;
    assert_eq!(matches(&index, "gus").await, vec!["beta", "alpha", "gamma"]);

    let touched = index
        .build("gustav", "alpha", 1, PrefixOp::Remove, &[])
        .await
        .expect("remove");
    assert_eq!(touched, 6);
    assert_eq!(matches(&index, "gus").await, vec!["beta", "gamma"]);
}

#[tokio::test]
async fn secondary_scores_keep_length_ordering() {
    let (_, index) = index();
    add_scored(&index, "Kelsey", "alpha", 10.0).await;
    add_scored(&index, "Kelsey", "beta", 5.0).await;
    add_scored(&index, "Kelly", "gamma", 5.0).await;

    assert_eq!(matches(&index, "kel").await[0], "gamma");
}

#[tokio::test]
async fn secondary_scores_break_length_ties() {
    let (_, index) = index();
    add_scored(&index, "Kelsey", "alpha", 5.0).await;
    add_scored(&index, "Kelsey", "beta", 10.0).await;

    assert_eq!(matches(&index, "kel").await, vec!["beta", "alpha"]);
}

#[tokio::test]
async fn match_window_pages_results() {
    let (_, index) = index();
    add(&index, "gustav", "alpha").await;
    add(&index, "gus", "beta").await;
    add(&index, "gustavo", "gamma").await;

    let window = MatchWindow {
        start: 1,
        end: 1,
        ..Default::default()
    };
    let page = index.matches("gus", window).await.expect("page");
    assert_eq!(page.members(), vec!["alpha"]);
}

#[tokio::test]
async fn multibyte_text_is_split_on_characters() {
    let (store, index) = index();
    let touched = index
        .build("Äpfel", "alpha", 1, PrefixOp::Add, &[])
        .await
        .expect("add");

    assert_eq!(touched, 5);
    assert!(store.keys().contains(&format!("{INDEX_NAME}:ä")));
    assert_eq!(matches(&index, "ÄP").await, vec!["alpha"]);
}
