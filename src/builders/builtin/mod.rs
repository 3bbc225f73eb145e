mod blog_builder;
mod keyword_builder;
mod product_builder;
mod upload_builder;

use std::sync::Arc;

use crate::builders::{Body, BuilderRegistry};
use crate::engine::context::WorkflowContext;

pub const KEYWORD_SEARCH: &str = "keyword_search";
pub const PRODUCT_SEARCH: &str = "product_search";
pub const PRODUCT_MATCH: &str = "product_match";
pub const PRODUCT_SIMILARITY: &str = "product_similarity";
pub const PRODUCT_CRAWL: &str = "product_crawl";
pub const S3_UPLOAD: &str = "s3_upload";
pub const PRODUCT_SELECT: &str = "product_select";
pub const IMAGE_OCR: &str = "image_ocr";
pub const BLOG_RAG: &str = "blog_rag";
pub const BLOG_PUBLISH: &str = "blog_publish";

/// Register all built-in builders into the registry.
pub fn register_all(registry: &mut BuilderRegistry, context: Arc<WorkflowContext>) {
    registry.register(Arc::new(keyword_builder::KeywordSearchBuilder));
    registry.register(Arc::new(product_builder::ProductSearchBuilder::new(context.clone())));
    registry.register(Arc::new(product_builder::ProductMatchBuilder::new(context.clone())));
    registry.register(Arc::new(product_builder::ProductSimilarityBuilder::new(context.clone())));
    registry.register(Arc::new(product_builder::ProductCrawlBuilder::new(context.clone())));
    registry.register(Arc::new(upload_builder::S3UploadBuilder::new(context.clone())));
    registry.register(Arc::new(product_builder::ProductSelectBuilder));
    registry.register(Arc::new(blog_builder::ImageOcrBuilder::new(context.clone())));
    registry.register(Arc::new(blog_builder::BlogRagBuilder::new(context.clone())));
    registry.register(Arc::new(blog_builder::BlogPublishBuilder::new(context)));
}

/// Field under the `data` envelope of an upstream task response.
pub(crate) fn data_field<'a>(output: &'a serde_json::Value, field: &str) -> Option<&'a serde_json::Value> {
    output.get("data")?.get(field)
}

/// Copy `data.<field>` from an upstream output into the body as `key`.
/// Nothing is written when the output or the field is absent, or when
/// `keep` rejects the value.
pub(crate) fn copy_data_field(
    body: &mut Body,
    output: Option<&serde_json::Value>,
    field: &str,
    key: &str,
    keep: impl Fn(&serde_json::Value) -> bool,
) {
    if let Some(value) = output.and_then(|o| data_field(o, field)).filter(|v| keep(*v)) {
        body.insert(key.to_string(), value.clone());
    }
}

/// Accept any present value.
pub(crate) fn any(_: &serde_json::Value) -> bool {
    true
}

/// Text rendering of a scalar JSON value. Containers render as empty.
pub(crate) fn as_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => String::new(),
    }
}

/// Text of an optional value; absent or null values yield `default`.
pub(crate) fn text_or(value: Option<&serde_json::Value>, default: &str) -> String {
    match value {
        None | Some(serde_json::Value::Null) => default.to_string(),
        Some(v) => as_text(v),
    }
}

/// True when the value renders to non-whitespace text.
pub(crate) fn has_text(value: &serde_json::Value) -> bool {
    !as_text(value).trim().is_empty()
}
