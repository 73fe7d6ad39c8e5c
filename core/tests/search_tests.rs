use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;

use ferret_core::{
    DocFilter, FieldSpec, Language, MinimumShouldMatch, ResultPage, SearchHandle, SearchOutput,
    SearchRequest, SledEngine, Stale,
};

fn open_handle() -> (TempDir, SearchHandle<SledEngine>) {
    let dir = tempfile::tempdir().unwrap();
    let engine = SledEngine::open(dir.path()).unwrap();
    (dir, SearchHandle::new(engine))
}

fn text_fields() -> FieldSpec {
    FieldSpec::Named(vec!["text".to_string()])
}

fn request(query: &str) -> SearchRequest {
    SearchRequest::new(query, text_fields())
}

async fn results(handle: &SearchHandle<SledEngine>, req: SearchRequest) -> ResultPage {
    match handle.search(req).await.unwrap() {
        SearchOutput::Results(page) => page,
        SearchOutput::Ack { .. } => panic!("expected a result page"),
    }
}

fn ids(page: &ResultPage) -> Vec<&str> {
    page.rows.iter().map(|r| r.id.as_str()).collect()
}

#[tokio::test]
async fn round_trip_returns_indexed_document_with_positive_score() {
    let (_dir, handle) = open_handle();
    handle
        .store()
        .put_doc("d1", &json!({"text": "a sketch of the quick brown fox"}))
        .unwrap();

    let page = results(&handle, request("sketch")).await;
    assert_eq!(page.total_rows, 1);
    assert_eq!(ids(&page), vec!["d1"]);
    assert!(page.rows[0].score.unwrap() > 0.0);
}

#[tokio::test]
async fn empty_query_returns_empty_page() {
    let (_dir, handle) = open_handle();
    handle.store().put_doc("d1", &json!({"text": "words"})).unwrap();

    let page = results(&handle, request("")).await;
    assert_eq!(page.total_rows, 0);
    assert!(page.rows.is_empty());

    // punctuation-only queries tokenize to nothing as well
    let page = results(&handle, request("!!! --- ???")).await;
    assert_eq!(page.total_rows, 0);
}

#[tokio::test]
async fn stemmed_and_unstemmed_queries_both_match() {
    let (_dir, handle) = open_handle();
    handle
        .store()
        .put_doc("d1", &json!({"text": "running shoes"}))
        .unwrap();

    assert_eq!(results(&handle, request("running")).await.total_rows, 1);
    assert_eq!(results(&handle, request("run")).await.total_rows, 1);
}

#[tokio::test]
async fn minimum_should_match_gates_partial_matches() {
    let (_dir, handle) = open_handle();
    handle
        .store()
        .put_doc("both", &json!({"text": "donkey kong"}))
        .unwrap();
    handle
        .store()
        .put_doc("one", &json!({"text": "donkey"}))
        .unwrap();

    // default mm is 100%
    let page = results(&handle, request("donkey kong")).await;
    assert_eq!(ids(&page), vec!["both"]);

    let mut half = request("donkey kong");
    half.mm = Some(MinimumShouldMatch::Text("50%".to_string()));
    let page = results(&handle, half).await;
    assert_eq!(page.total_rows, 2);
}

#[tokio::test]
async fn wildcard_prefix_suffix_and_substring() {
    let (_dir, handle) = open_handle();
    handle
        .store()
        .put_doc("d1", &json!({"text": "foobar"}))
        .unwrap();

    for pattern in ["fo*", "*bar", "*oob*"] {
        let page = results(&handle, request(pattern)).await;
        assert!(
            page.rows.iter().any(|r| r.id == "d1"),
            "pattern {pattern} should match foobar"
        );
        assert!(page.rows.iter().all(|r| r.score.is_none()));
    }

    // more than two sections outside the substring shape matches nothing
    let page = results(&handle, request("f*b*r")).await;
    assert_eq!(page.total_rows, 0);
}

#[tokio::test]
async fn pagination_windows_scored_results() {
    let (_dir, handle) = open_handle();
    // more distinct terms -> larger field norm -> lower score for "pivot"
    let fillers = ["", "one", "one two", "one two three", "one two three four"];
    for (i, filler) in fillers.iter().enumerate() {
        let text = format!("pivot {filler}");
        handle
            .store()
            .put_doc(&format!("d{i}"), &json!({ "text": text.trim() }))
            .unwrap();
    }

    let full = results(&handle, request("pivot")).await;
    assert_eq!(full.total_rows, 5);

    let mut windowed = request("pivot");
    windowed.skip = 2;
    windowed.limit = Some(3);
    let page = results(&handle, windowed).await;
    assert_eq!(page.total_rows, 5);
    assert_eq!(ids(&page), &ids(&full)[2..5]);

    let mut empty_page = request("pivot");
    empty_page.limit = Some(0);
    let page = results(&handle, empty_page).await;
    assert_eq!(page.total_rows, 5);
    assert!(page.rows.is_empty());
}

#[tokio::test]
async fn scores_sort_descending() {
    let (_dir, handle) = open_handle();
    handle
        .store()
        .put_doc("short", &json!({"text": "cat"}))
        .unwrap();
    handle
        .store()
        .put_doc("long", &json!({"text": "cat plus quite a few other distinct words"}))
        .unwrap();

    let page = results(&handle, request("cat")).await;
    assert_eq!(ids(&page), vec!["short", "long"]);
    assert!(page.rows[0].score.unwrap() > page.rows[1].score.unwrap());
}

#[tokio::test]
async fn field_boosts_change_ranking() {
    let (_dir, handle) = open_handle();
    handle
        .store()
        .put_doc("in_title", &json!({"title": "ember", "body": "other"}))
        .unwrap();
    handle
        .store()
        .put_doc("in_body", &json!({"title": "other", "body": "ember"}))
        .unwrap();

    let fields: std::collections::BTreeMap<String, f64> =
        [("title".to_string(), 10.0), ("body".to_string(), 1.0)].into();
    let mut req = SearchRequest::new("ember", FieldSpec::Boosted(fields));
    req.mm = Some(MinimumShouldMatch::Percent(100.0));
    let page = results(&handle, req).await;
    assert_eq!(ids(&page), vec!["in_title", "in_body"]);
}

#[tokio::test]
async fn include_docs_attaches_bodies() {
    let (_dir, handle) = open_handle();
    let doc = json!({"text": "fetch me", "extra": 7});
    handle.store().put_doc("d1", &doc).unwrap();

    let mut req = request("fetch");
    req.include_docs = true;
    let page = results(&handle, req).await;
    assert_eq!(page.rows[0].doc, Some(doc));
}

#[tokio::test]
async fn highlighting_wraps_matches_including_suffixes() {
    let (_dir, handle) = open_handle();
    handle
        .store()
        .put_doc("d1", &json!({"text": "cats are cute"}))
        .unwrap();

    let mut req = request("cat");
    req.highlighting = true;
    let page = results(&handle, req).await;
    let highlighting = page.rows[0].highlighting.as_ref().unwrap();
    assert_eq!(highlighting["text"], "<strong>cats</strong> are cute");
}

#[tokio::test]
async fn highlighting_honors_custom_markers() {
    let (_dir, handle) = open_handle();
    handle
        .store()
        .put_doc("d1", &json!({"text": "cats are cute"}))
        .unwrap();

    let mut req = request("cat");
    req.highlighting = true;
    req.highlighting_pre = Some("<em>".to_string());
    req.highlighting_post = Some("</em>".to_string());
    let page = results(&handle, req).await;
    let highlighting = page.rows[0].highlighting.as_ref().unwrap();
    assert_eq!(highlighting["text"], "<em>cats</em> are cute");
}

#[tokio::test]
async fn deep_fields_flatten_arrays() {
    let (_dir, handle) = open_handle();
    handle
        .store()
        .put_doc(
            "d1",
            &json!({"authors": [{"name": "ada"}, {"name": "grace"}]}),
        )
        .unwrap();

    let req = SearchRequest::new("grace", FieldSpec::Named(vec!["authors.name".to_string()]));
    let page = results(&handle, req).await;
    assert_eq!(ids(&page), vec!["d1"]);
}

#[tokio::test]
async fn custom_text_extractors_feed_the_index() {
    let (_dir, handle) = open_handle();
    handle
        .store()
        .put_doc("d1", &json!({"parts": {"a": "alpha", "b": "beta"}}))
        .unwrap();

    let mut req = SearchRequest::new("beta", FieldSpec::Named(vec!["parts".to_string()]));
    req.get_text.insert(
        "parts".to_string(),
        Arc::new(|doc: &Value| {
            doc.get("parts").and_then(Value::as_object).map(|parts| {
                parts
                    .values()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
        }),
    );
    let page = results(&handle, req).await;
    assert_eq!(ids(&page), vec!["d1"]);
}

#[tokio::test]
async fn updates_and_deletes_reindex_incrementally() {
    let (_dir, handle) = open_handle();
    handle.store().put_doc("d1", &json!({"text": "cat"})).unwrap();
    assert_eq!(results(&handle, request("cat")).await.total_rows, 1);

    handle.store().put_doc("d1", &json!({"text": "dog"})).unwrap();
    assert_eq!(results(&handle, request("cat")).await.total_rows, 0);
    assert_eq!(results(&handle, request("dog")).await.total_rows, 1);

    handle.store().delete_doc("d1").unwrap();
    assert_eq!(results(&handle, request("dog")).await.total_rows, 0);
}

#[tokio::test]
async fn stale_reads_skip_index_maintenance() {
    let (_dir, handle) = open_handle();
    handle.store().put_doc("d1", &json!({"text": "cat"})).unwrap();
    handle.build(request("")).await.unwrap();

    handle.store().put_doc("d2", &json!({"text": "cat"})).unwrap();

    let mut stale = request("cat");
    stale.stale = Some(Stale::Ok);
    assert_eq!(results(&handle, stale).await.total_rows, 1);

    // update_after answers from the old snapshot, then catches up
    let mut update_after = request("cat");
    update_after.stale = Some(Stale::UpdateAfter);
    assert_eq!(results(&handle, update_after).await.total_rows, 1);

    let mut stale = request("cat");
    stale.stale = Some(Stale::Ok);
    assert_eq!(results(&handle, stale).await.total_rows, 2);
}

#[tokio::test]
async fn build_and_destroy_acknowledge() {
    let (_dir, handle) = open_handle();
    handle.store().put_doc("d1", &json!({"text": "cat"})).unwrap();

    match handle.search({
        let mut req = request("");
        req.build = true;
        req
    })
    .await
    .unwrap()
    {
        SearchOutput::Ack { ok } => assert!(ok),
        other => panic!("expected ack, got {other:?}"),
    }

    handle.destroy(request("")).await.unwrap();
    // destroyed index rebuilds lazily on the next query
    assert_eq!(results(&handle, request("cat")).await.total_rows, 1);
}

#[tokio::test]
async fn filter_excludes_documents_from_the_index() {
    let (_dir, handle) = open_handle();
    handle
        .store()
        .put_doc("kept", &json!({"kind": "note", "text": "cat"}))
        .unwrap();
    handle
        .store()
        .put_doc("dropped", &json!({"kind": "draft", "text": "cat"}))
        .unwrap();

    let mut req = request("cat");
    req.filter = Some(DocFilter::new("notes-only", |doc: &Value| {
        Ok(doc.get("kind").and_then(Value::as_str) == Some("note"))
    }));
    let page = results(&handle, req).await;
    assert_eq!(ids(&page), vec!["kept"]);
}

#[tokio::test]
async fn filter_errors_report_to_the_sink_without_aborting() {
    let dir = tempfile::tempdir().unwrap();
    let reported: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_log = reported.clone();
    let engine = SledEngine::open(dir.path())
        .unwrap()
        .with_error_sink(move |context, _error| sink_log.lock().push(context.to_string()));
    let handle = SearchHandle::new(engine);

    handle
        .store()
        .put_doc("bad", &json!({"poison": true, "text": "cat"}))
        .unwrap();
    handle.store().put_doc("good", &json!({"text": "cat"})).unwrap();

    let mut req = request("cat");
    req.filter = Some(DocFilter::new("poison-check", |doc: &Value| {
        if doc.get("poison").is_some() {
            Err(anyhow!("predicate blew up"))
        } else {
            Ok(true)
        }
    }));
    let page = results(&handle, req).await;

    assert_eq!(ids(&page), vec!["good"]);
    let contexts = reported.lock();
    assert_eq!(contexts.len(), 1);
    assert!(contexts[0].contains("bad"));
}

#[tokio::test]
async fn distinct_field_sets_use_distinct_indexes() {
    let (_dir, handle) = open_handle();
    handle
        .store()
        .put_doc("d1", &json!({"title": "apple", "body": "pear"}))
        .unwrap();

    let title_req = SearchRequest::new("apple", FieldSpec::Named(vec!["title".to_string()]));
    assert_eq!(results(&handle, title_req).await.total_rows, 1);

    // the body-only index must not see title terms
    let body_req = SearchRequest::new("apple", FieldSpec::Named(vec!["body".to_string()]));
    assert_eq!(results(&handle, body_req).await.total_rows, 0);
}

#[tokio::test]
async fn multi_language_pipelines_chain_stemmers() {
    let (_dir, handle) = open_handle();
    handle
        .store()
        .put_doc("d1", &json!({"text": "running"}))
        .unwrap();

    let mut req = request("running");
    req.language = Language::Many(vec!["en".to_string(), "fr".to_string()]);
    assert_eq!(results(&handle, req).await.total_rows, 1);
}

#[tokio::test]
async fn unknown_language_is_an_error() {
    let (_dir, handle) = open_handle();
    let mut req = request("cat");
    req.language = Language::One("xx".to_string());
    assert!(handle.search(req).await.is_err());
}
