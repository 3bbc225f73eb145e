use async_trait::async_trait;

use super::{KEYWORD_SEARCH, text_or};
use crate::builders::{Body, BodyBuilder};
use crate::engine::types::{JobRun, TaskDefinition};

const DEFAULT_TAG: &str = "naver";

/// Trending-keyword lookup. Reads only its own settings: `tag` picks the
/// platform to search, defaulting to "naver".
pub struct KeywordSearchBuilder;

#[async_trait]
impl BodyBuilder for KeywordSearchBuilder {
    fn task_name(&self) -> &str {
        KEYWORD_SEARCH
    }

    fn description(&self) -> &str {
        "Keyword search request from the task's `tag` setting"
    }

    async fn build(&self, task: &TaskDefinition, _job_run: &JobRun) -> Body {
        let tag = text_or(
            task.settings.as_ref().and_then(|s| s.get("tag")),
            DEFAULT_TAG,
        );

        let mut body = Body::new();
        body.insert("tag".to_string(), serde_json::Value::String(tag));
        body
    }
}
