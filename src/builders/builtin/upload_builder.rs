use std::sync::Arc;

use async_trait::async_trait;

use super::{KEYWORD_SEARCH, PRODUCT_CRAWL, S3_UPLOAD, any, copy_data_field, has_text};
use crate::builders::{Body, BodyBuilder};
use crate::engine::context::WorkflowContext;
use crate::engine::types::{JobRun, TaskDefinition};

const BASE_FOLDER: &str = "product";

/// Upload crawled product assets under a keyword folder.
pub struct S3UploadBuilder {
    context: Arc<WorkflowContext>,
}

impl S3UploadBuilder {
    pub fn new(context: Arc<WorkflowContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl BodyBuilder for S3UploadBuilder {
    fn task_name(&self) -> &str {
        S3_UPLOAD
    }

    fn description(&self) -> &str {
        "Object storage upload of crawled products"
    }

    async fn build(&self, _task: &TaskDefinition, job_run: &JobRun) -> Body {
        let mut body = Body::new();

        let keyword = self.context.previous_task_output(job_run, KEYWORD_SEARCH).await;
        copy_data_field(&mut body, keyword.as_ref(), "keyword", "keyword", has_text);

        let crawl = self.context.previous_task_output(job_run, PRODUCT_CRAWL).await;
        copy_data_field(&mut body, crawl.as_ref(), "crawled_products", "crawled_products", any);

        body.insert(
            "base_folder".to_string(),
            serde_json::Value::String(BASE_FOLDER.to_string()),
        );
        body
    }
}
