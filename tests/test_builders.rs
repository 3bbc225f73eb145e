//! Tests for the built-in request body builders.

use std::sync::Arc;

use serde_json::{Value, json};

use chainflow::builders::BuilderRegistry;
use chainflow::engine::context::WorkflowContext;
use chainflow::engine::types::*;
use chainflow::storage::RunStore;
use chainflow::storage::memory_store::MemoryStore;

/// A workflow run with one open job run, plus a registry reading from it.
struct Harness {
    store: Arc<MemoryStore>,
    registry: BuilderRegistry,
    job_run: JobRun,
}

impl Harness {
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let registry = BuilderRegistry::with_builtins(Arc::new(WorkflowContext::new(store.clone())));

        let run_id = store
            .insert_workflow_run(&WorkflowRun::start(1, "t-builders"))
            .await
            .unwrap();
        let mut job_run = JobRun::start(run_id, 1, Some(1));
        job_run.id = store.insert_job_run(&job_run).await.unwrap();

        Self {
            store,
            registry,
            job_run,
        }
    }

    /// Record a successful upstream run of `name` that returned `{"data": data}`.
    async fn upstream(&self, name: &str, data: Value) {
        let mut task_run = TaskRun::start(self.job_run.id, &task(name, None));
        task_run.id = self.store.insert_task_run(&task_run).await.unwrap();
        task_run.finish(RunStatus::Success, None);
        self.store.update_task_run(&task_run).await.unwrap();

        let output = json!({ "data": data });
        self.store
            .insert_task_io_data(&TaskIoData::new(
                task_run.id,
                IoType::Output,
                "response_body",
                &output,
            ))
            .await
            .unwrap();
    }

    async fn build(&self, name: &str, settings: Option<Value>) -> Value {
        self.registry.build(&task(name, settings), &self.job_run).await
    }
}

fn task(name: &str, settings: Option<Value>) -> TaskDefinition {
    TaskDefinition {
        id: 1,
        job_id: 1,
        name: name.to_string(),
        task_type: "http".to_string(),
        execution_order: None,
        parameters: None,
        settings,
    }
}

#[tokio::test]
async fn registry_lists_builtins_in_table_order() {
    let h = Harness::new().await;
    let names: Vec<&str> = h.registry.list().iter().map(|(name, _)| *name).collect();
    assert_eq!(
        names,
        vec![
            "keyword_search",
            "product_search",
            "product_match",
            "product_similarity",
            "product_crawl",
            "s3_upload",
            "product_select",
            "image_ocr",
            "blog_rag",
            "blog_publish",
        ]
    );
}

#[tokio::test]
async fn keyword_search_tag_defaults_to_naver() {
    let h = Harness::new().await;
    assert_eq!(h.build("keyword_search", None).await, json!({ "tag": "naver" }));
    assert_eq!(
        h.build("keyword_search", Some(json!({ "tag": "coupang" }))).await,
        json!({ "tag": "coupang" })
    );
}

#[tokio::test]
async fn product_search_always_sends_keyword() {
    let h = Harness::new().await;
    assert_eq!(h.build("product_search", None).await, json!({ "keyword": "" }));

    h.upstream("keyword_search", json!({ "keyword": "usb hub" })).await;
    assert_eq!(
        h.build("product_search", None).await,
        json!({ "keyword": "usb hub" })
    );
}

#[tokio::test]
async fn product_match_and_similarity_omit_missing_fields() {
    let h = Harness::new().await;
    assert_eq!(h.build("product_match", None).await, json!({}));

    h.upstream("keyword_search", json!({ "keyword": "mug" })).await;
    h.upstream("product_search", json!({ "search_results": [{ "id": 1 }] }))
        .await;
    assert_eq!(
        h.build("product_match", None).await,
        json!({ "keyword": "mug", "search_results": [{ "id": 1 }] })
    );

    h.upstream("product_match", json!({ "matched_products": [{ "id": 1 }] }))
        .await;
    assert_eq!(
        h.build("product_similarity", None).await,
        json!({
            "keyword": "mug",
            "matched_products": [{ "id": 1 }],
            "search_results": [{ "id": 1 }],
        })
    );
}

#[tokio::test]
async fn product_crawl_collects_non_empty_urls() {
    let h = Harness::new().await;
    assert_eq!(
        h.build("product_crawl", None).await,
        json!({ "product_urls": [] })
    );

    h.upstream(
        "product_similarity",
        json!({
            "top_products": [
                { "url": "https://shop.example/a" },
                { "url": "" },
                { "name": "no url" },
                { "url": 42 },
                { "url": "https://shop.example/b" },
            ]
        }),
    )
    .await;
    assert_eq!(
        h.build("product_crawl", None).await,
        json!({ "product_urls": ["https://shop.example/a", "https://shop.example/b"] })
    );
}

#[tokio::test]
async fn s3_upload_skips_blank_keyword() {
    let h = Harness::new().await;
    h.upstream("keyword_search", json!({ "keyword": "  " })).await;
    h.upstream("product_crawl", json!({ "crawled_products": ["p1"] })).await;

    assert_eq!(
        h.build("s3_upload", None).await,
        json!({ "crawled_products": ["p1"], "base_folder": "product" })
    );
}

#[tokio::test]
async fn product_select_uses_fixed_criterion() {
    let h = Harness::new().await;
    assert_eq!(
        h.build("product_select", None).await,
        json!({ "selection_criteria": "image_count_priority" })
    );
}

#[tokio::test]
async fn blog_rag_renames_selected_product() {
    let h = Harness::new().await;
    h.upstream("keyword_search", json!({ "keyword": "tent" })).await;
    h.upstream("image_ocr", json!({ "translation_language": "ko" })).await;
    h.upstream("product_select", json!({ "selected_product": { "id": 9 } }))
        .await;

    assert_eq!(
        h.build("image_ocr", None).await,
        json!({ "keyword": "tent" })
    );
    assert_eq!(
        h.build("blog_rag", None).await,
        json!({
            "keyword": "tent",
            "translation_language": "ko",
            "product_info": { "id": 9 },
        })
    );
}

#[tokio::test]
async fn blog_publish_maps_draft_and_account_settings() {
    let h = Harness::new().await;
    h.upstream(
        "blog_rag",
        json!({ "title": "Best tents", "content": "<p>...</p>", "tags": ["camping"] }),
    )
    .await;

    assert_eq!(
        h.build("blog_publish", None).await,
        json!({
            "post_title": "Best tents",
            "post_content": "<p>...</p>",
            "post_tags": ["camping"],
        })
    );

    let settings = json!({ "tag": "naver", "blog_name": "camp-notes", "blog_id": "me" });
    assert_eq!(
        h.build("blog_publish", Some(settings)).await,
        json!({
            "post_title": "Best tents",
            "post_content": "<p>...</p>",
            "post_tags": ["camping"],
            "tag": "naver",
            "blog_name": "camp-notes",
            "blog_id": "me",
            "blog_pw": "",
        })
    );
}

#[tokio::test]
async fn unknown_task_builds_empty_body() {
    let h = Harness::new().await;
    assert_eq!(h.build("send_slack_message", None).await, json!({}));
}
