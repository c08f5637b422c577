use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::coordinator::CoordinatorStats;
use crate::pipeline::{PipelineResult, ProblemResult};
use crate::state::RunStatsSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub input: PathBuf,
    pub model: String,
    pub problems: Vec<ProblemReport>,
    pub stats: RunStatsSnapshot,
    #[serde(default)]
    pub coordinator: CoordinatorStats,
}

/// Shaped like the evaluation input so graders can consume it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemReport {
    pub question_id: String,
    pub code_list: Vec<String>,
    pub output_list: Vec<String>,
    #[serde(default)]
    pub repaired_list: Vec<bool>,
    #[serde(default)]
    pub passed_list: Vec<bool>,
}

impl From<&ProblemResult> for ProblemReport {
    fn from(p: &ProblemResult) -> Self {
        Self {
            question_id: p.question_id.clone(),
            code_list: p.candidates.iter().map(|c| c.code.clone()).collect(),
            output_list: p.output_list(),
            repaired_list: p.candidates.iter().map(|c| c.repaired).collect(),
            passed_list: p.candidates.iter().map(|c| c.passed).collect(),
        }
    }
}

impl RunReport {
    pub fn new(
        input: &Path,
        model: String,
        started_at: DateTime<Utc>,
        result: &PipelineResult,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            input: input.to_path_buf(),
            model,
            problems: result.problems.iter().map(ProblemReport::from).collect(),
            stats: result.stats,
            coordinator: result.coordinator.clone(),
        }
    }
}

/// Writes `report` to `out`, or to the per-input runs directory when `out`
/// is `None`. Returns the path written.
pub fn save(report: &RunReport, out: Option<&Path>) -> Result<PathBuf, String> {
    let path = match out {
        Some(p) => p.to_path_buf(),
        None => report_file(&report.input, &report.run_id),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }

    let text = serde_json::to_string_pretty(report).map_err(|e| e.to_string())?;
    fs::write(&path, text).map_err(|e| e.to_string())?;
    Ok(path)
}

pub fn load(path: &Path) -> Result<RunReport, String> {
    let raw = fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&raw).map_err(|e| e.to_string())
}

fn report_file(input: &Path, run_id: &Uuid) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(input.to_string_lossy().as_bytes());
    let hash = hex::encode(hasher.finalize());

    let mut base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push("mendloop");
    base.push("runs");
    base.push(format!("{}-{}.json", &hash[..16], run_id));
    base
}
