use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub const ANALYSIS_PROGRESS_EVENT: &str = "analysis:progress";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisRequestId(pub String);

impl fmt::Display for AnalysisRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    Pending,
    ResumeParsing,
    ResumeAnalyzing,
    VideoTranscribing,
    VideoAnalyzing,
    GeneratingReport,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisProgress {
    pub analysis_request_id: AnalysisRequestId,
    pub status: AnalysisStatus,
    #[serde(deserialize_with = "clamped_percent")]
    pub progress: u8,
}

fn clamped_percent<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(raw.clamp(0, 100) as u8)
}
