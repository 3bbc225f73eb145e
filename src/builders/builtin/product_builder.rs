use std::sync::Arc;

use async_trait::async_trait;

use super::{
    KEYWORD_SEARCH, PRODUCT_CRAWL, PRODUCT_MATCH, PRODUCT_SEARCH, PRODUCT_SELECT,
    PRODUCT_SIMILARITY, any, copy_data_field, data_field, text_or,
};
use crate::builders::{Body, BodyBuilder};
use crate::engine::context::WorkflowContext;
use crate::engine::types::{JobRun, TaskDefinition};

/// Product search for the keyword found by `keyword_search`.
/// `keyword` is required by the endpoint, so it is sent as "" when unknown.
pub struct ProductSearchBuilder {
    context: Arc<WorkflowContext>,
}

impl ProductSearchBuilder {
    pub fn new(context: Arc<WorkflowContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl BodyBuilder for ProductSearchBuilder {
    fn task_name(&self) -> &str {
        PRODUCT_SEARCH
    }

    fn description(&self) -> &str {
        "Product search for the upstream keyword"
    }

    async fn build(&self, _task: &TaskDefinition, job_run: &JobRun) -> Body {
        let keyword_output = self.context.previous_task_output(job_run, KEYWORD_SEARCH).await;
        let keyword = text_or(
            keyword_output.as_ref().and_then(|o| data_field(o, "keyword")),
            "",
        );

        let mut body = Body::new();
        body.insert("keyword".to_string(), serde_json::Value::String(keyword));
        body
    }
}

/// Match search results against the keyword.
pub struct ProductMatchBuilder {
    context: Arc<WorkflowContext>,
}

impl ProductMatchBuilder {
    pub fn new(context: Arc<WorkflowContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl BodyBuilder for ProductMatchBuilder {
    fn task_name(&self) -> &str {
        PRODUCT_MATCH
    }

    fn description(&self) -> &str {
        "Keyword/product matching over search results"
    }

    async fn build(&self, _task: &TaskDefinition, job_run: &JobRun) -> Body {
        let mut body = Body::new();

        let keyword = self.context.previous_task_output(job_run, KEYWORD_SEARCH).await;
        copy_data_field(&mut body, keyword.as_ref(), "keyword", "keyword", any);

        let search = self.context.previous_task_output(job_run, PRODUCT_SEARCH).await;
        copy_data_field(&mut body, search.as_ref(), "search_results", "search_results", any);

        body
    }
}

/// Similarity ranking over matched products.
pub struct ProductSimilarityBuilder {
    context: Arc<WorkflowContext>,
}

impl ProductSimilarityBuilder {
    pub fn new(context: Arc<WorkflowContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl BodyBuilder for ProductSimilarityBuilder {
    fn task_name(&self) -> &str {
        PRODUCT_SIMILARITY
    }

    fn description(&self) -> &str {
        "Similarity analysis of matched products"
    }

    async fn build(&self, _task: &TaskDefinition, job_run: &JobRun) -> Body {
        let mut body = Body::new();

        let keyword = self.context.previous_task_output(job_run, KEYWORD_SEARCH).await;
        copy_data_field(&mut body, keyword.as_ref(), "keyword", "keyword", any);

        let matched = self.context.previous_task_output(job_run, PRODUCT_MATCH).await;
        copy_data_field(&mut body, matched.as_ref(), "matched_products", "matched_products", any);

        let search = self.context.previous_task_output(job_run, PRODUCT_SEARCH).await;
        copy_data_field(&mut body, search.as_ref(), "search_results", "search_results", any);

        body
    }
}

/// Crawl the pages of the top-ranked products.
/// `product_urls` is always present; entries without a usable url are dropped.
pub struct ProductCrawlBuilder {
    context: Arc<WorkflowContext>,
}

impl ProductCrawlBuilder {
    pub fn new(context: Arc<WorkflowContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl BodyBuilder for ProductCrawlBuilder {
    fn task_name(&self) -> &str {
        PRODUCT_CRAWL
    }

    fn description(&self) -> &str {
        "Product page crawl for the top similar products"
    }

    async fn build(&self, _task: &TaskDefinition, job_run: &JobRun) -> Body {
        let similarity = self.context.previous_task_output(job_run, PRODUCT_SIMILARITY).await;

        let urls: Vec<serde_json::Value> = similarity
            .as_ref()
            .and_then(|o| data_field(o, "top_products"))
            .and_then(|v| v.as_array())
            .map(|products| {
                products
                    .iter()
                    .filter_map(|p| p.get("url").and_then(|u| u.as_str()))
                    .filter(|url| !url.is_empty())
                    .map(|url| serde_json::Value::String(url.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let mut body = Body::new();
        body.insert("product_urls".to_string(), serde_json::Value::Array(urls));
        body
    }
}

/// Product selection with a fixed ranking criterion.
pub struct ProductSelectBuilder;

#[async_trait]
impl BodyBuilder for ProductSelectBuilder {
    fn task_name(&self) -> &str {
        PRODUCT_SELECT
    }

    fn description(&self) -> &str {
        "Product selection by image count"
    }

    async fn build(&self, _task: &TaskDefinition, _job_run: &JobRun) -> Body {
        let mut body = Body::new();
        body.insert(
            "selection_criteria".to_string(),
            serde_json::Value::String("image_count_priority".to_string()),
        );
        body
    }
}
