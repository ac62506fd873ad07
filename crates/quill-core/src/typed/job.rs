//! Job trait - binds a task_type string to a payload type.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A typed task payload.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SummarizeChapter {
///     chapter_id: i64,
/// }
///
/// impl Job for SummarizeChapter {
///     const TYPE: &'static str = "chapter.summarize.v1";
///     type Output = String;
/// }
/// ```
///
/// Naming convention for `TYPE`: `{domain}.{action}.v{major}`.
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;

    /// What a successful run produces; stored as JSON in the task result.
    type Output: Serialize + Send + 'static;
}
