use std::sync::Arc;

use async_trait::async_trait;

use super::{
    BLOG_PUBLISH, BLOG_RAG, IMAGE_OCR, KEYWORD_SEARCH, PRODUCT_SELECT, any, copy_data_field,
    has_text, text_or,
};
use crate::builders::{Body, BodyBuilder};
use crate::engine::context::WorkflowContext;
use crate::engine::types::{JobRun, TaskDefinition};

/// Settings copied verbatim into the publish request.
const PUBLISH_SETTINGS: [&str; 4] = ["tag", "blog_name", "blog_id", "blog_pw"];

/// OCR over the product images for the current keyword.
pub struct ImageOcrBuilder {
    context: Arc<WorkflowContext>,
}

impl ImageOcrBuilder {
    pub fn new(context: Arc<WorkflowContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl BodyBuilder for ImageOcrBuilder {
    fn task_name(&self) -> &str {
        IMAGE_OCR
    }

    fn description(&self) -> &str {
        "Image OCR for the upstream keyword"
    }

    async fn build(&self, _task: &TaskDefinition, job_run: &JobRun) -> Body {
        let mut body = Body::new();
        let keyword = self.context.previous_task_output(job_run, KEYWORD_SEARCH).await;
        copy_data_field(&mut body, keyword.as_ref(), "keyword", "keyword", has_text);
        body
    }
}

/// Retrieval-augmented blog draft from keyword, OCR language and selected product.
pub struct BlogRagBuilder {
    context: Arc<WorkflowContext>,
}

impl BlogRagBuilder {
    pub fn new(context: Arc<WorkflowContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl BodyBuilder for BlogRagBuilder {
    fn task_name(&self) -> &str {
        BLOG_RAG
    }

    fn description(&self) -> &str {
        "Blog draft generation from keyword, OCR and selected product"
    }

    async fn build(&self, _task: &TaskDefinition, job_run: &JobRun) -> Body {
        let mut body = Body::new();

        let keyword = self.context.previous_task_output(job_run, KEYWORD_SEARCH).await;
        copy_data_field(&mut body, keyword.as_ref(), "keyword", "keyword", any);

        let ocr = self.context.previous_task_output(job_run, IMAGE_OCR).await;
        copy_data_field(
            &mut body,
            ocr.as_ref(),
            "translation_language",
            "translation_language",
            has_text,
        );

        let selected = self.context.previous_task_output(job_run, PRODUCT_SELECT).await;
        copy_data_field(&mut body, selected.as_ref(), "selected_product", "product_info", any);

        body
    }
}

/// Publish the generated draft to the configured blog account.
pub struct BlogPublishBuilder {
    context: Arc<WorkflowContext>,
}

impl BlogPublishBuilder {
    pub fn new(context: Arc<WorkflowContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl BodyBuilder for BlogPublishBuilder {
    fn task_name(&self) -> &str {
        BLOG_PUBLISH
    }

    fn description(&self) -> &str {
        "Blog post publish using account settings"
    }

    async fn build(&self, task: &TaskDefinition, job_run: &JobRun) -> Body {
        let mut body = Body::new();

        let draft = self.context.previous_task_output(job_run, BLOG_RAG).await;
        copy_data_field(&mut body, draft.as_ref(), "title", "post_title", any);
        copy_data_field(&mut body, draft.as_ref(), "content", "post_content", any);
        copy_data_field(&mut body, draft.as_ref(), "tags", "post_tags", any);

        if let Some(settings) = &task.settings {
            for key in PUBLISH_SETTINGS {
                let value = text_or(settings.get(key), "");
                body.insert(key.to_string(), serde_json::Value::String(value));
            }
        }

        body
    }
}
