//! task-dispatch boundary
//!
//! a `TaskRequest` names one task; `run` validates it, executes it against a
//! repository and always answers with a `TaskResult` carrying a numeric
//! status code. mutating tasks hold the repository lock for their whole run.

use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result, StatusCode};
use crate::hash::Hash;
use crate::ops;
use crate::refs;
use crate::repo::Repo;
use crate::revision::DstRev;
use crate::types::{TaskParams, TaskType};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_id: String,
    #[serde(default)]
    pub message: String,
    /// branch receiving the commit; required for mutating tasks
    #[serde(default)]
    pub dst_branch: String,
    pub params: TaskParams,
}

impl TaskRequest {
    pub fn new(task_id: impl Into<String>, dst_branch: impl Into<String>, params: TaskParams) -> Self {
        Self {
            task_id: task_id.into(),
            message: String::new(),
            dst_branch: dst_branch.into(),
            params,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// checks that need no storage access
    pub fn validate(&self) -> Result<()> {
        let task_id = self.task_id.trim();
        if task_id.is_empty() || task_id.contains('@') {
            return Err(Error::InvalidArgument(format!(
                "invalid task id: {:?}",
                self.task_id
            )));
        }
        if self.params.task_type().is_mutating() {
            refs::validate_branch_name(&self.dst_branch)?;
        }
        self.params.validate()
    }

    fn dst(&self) -> DstRev {
        DstRev {
            branch: self.dst_branch.clone(),
            task_id: self.task_id.trim().to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaskResult {
    #[serde(serialize_with = "code_as_i32")]
    pub code: StatusCode,
    pub message: String,
    /// commit produced by a mutating task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<Hash>,
}

fn code_as_i32<S: Serializer>(code: &StatusCode, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_i32(code.as_i32())
}

impl TaskResult {
    fn ok(commit: Option<Hash>) -> Self {
        Self {
            code: StatusCode::Ok,
            message: String::new(),
            commit,
        }
    }

    fn from_error(err: &Error) -> Self {
        Self {
            code: err.status_code(),
            message: err.to_string(),
            commit: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }
}

/// execute one task; failures are reported through the result code
pub fn run(repo: &Repo, request: &TaskRequest) -> TaskResult {
    match execute(repo, request) {
        Ok(commit) => {
            tracing::info!(
                task_id = %request.task_id,
                task_type = %request.params.task_type(),
                "task done"
            );
            TaskResult::ok(commit)
        }
        Err(e) => {
            tracing::error!(task_id = %request.task_id, error = %e, "task failed");
            TaskResult::from_error(&e)
        }
    }
}

fn execute(repo: &Repo, request: &TaskRequest) -> Result<Option<Hash>> {
    request.validate()?;

    let task_type = request.params.task_type();
    if matches!(
        task_type,
        TaskType::Mining | TaskType::Training | TaskType::Label
    ) {
        return Err(Error::Unsupported(format!(
            "{} tasks run in external executors",
            task_type
        )));
    }

    let _lock = if task_type.is_mutating() {
        Some(repo.lock()?)
    } else {
        None
    };

    let dst = request.dst();
    let message = request.message.as_str();
    let mut labels = repo.load_labels(false)?;

    let commit = match &request.params {
        TaskParams::Init => ops::init_empty_revision(repo, &dst, message)?,
        TaskParams::Import(p) => ops::import(repo, &mut labels, &dst, p, message)?.0,
        TaskParams::Merge(p) => ops::merge(repo, &labels, &dst, p, message)?,
        TaskParams::Filter(p) => ops::filter(repo, &labels, &dst, p, message)?,
        TaskParams::Copy(p) => ops::copy(repo, &labels, &dst, p, message)?,
        TaskParams::Export(p) => {
            ops::export(repo, &labels, p)?;
            return Ok(None);
        }
        TaskParams::Mining(_) | TaskParams::Training(_) | TaskParams::Label(_) => {
            return Err(Error::Unsupported(task_type.to_string()));
        }
    };
    Ok(Some(commit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, Fixture};
    use crate::types::{ExportParams, FilterParams, ImportParams, MiningParams};
    use std::fs;

    #[test]
    fn test_request_from_json() {
        let json = r#"{
            "task_id": "t1",
            "dst_branch": "main",
            "params": {"type": "merge", "sources": ["a", "b"]}
        }"#;
        let request: TaskRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.params.task_type(), TaskType::Merge);
        assert!(request.message.is_empty());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_init_then_import() {
        let fx = Fixture::empty();
        let result = run(&fx.repo, &TaskRequest::new("t0", "main", TaskParams::Init));
        assert!(result.is_ok(), "{}", result.message);
        assert!(result.commit.is_some());

        let src = fx.dir.path().join("incoming");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("x.jpg"), testutil::jpeg(20, 10, 3)).unwrap();
        let request = TaskRequest::new(
            "t1",
            "main",
            TaskParams::Import(ImportParams {
                asset_dir: Some(src),
                ..Default::default()
            }),
        )
        .with_message("first import");

        let result = run(&fx.repo, &request);
        assert!(result.is_ok(), "{}", result.message);
        assert_eq!(
            refs::read_branch(&fx.repo, "main").unwrap(),
            result.commit.unwrap()
        );
    }

    #[test]
    fn test_validation_happens_first() {
        let fx = Fixture::new();

        let result = run(&fx.repo, &TaskRequest::new("", "main", TaskParams::Init));
        assert_eq!(result.code, StatusCode::InvalidArgs);

        let result = run(&fx.repo, &TaskRequest::new("t@x", "main", TaskParams::Init));
        assert_eq!(result.code, StatusCode::InvalidArgs);

        let filter = TaskParams::Filter(FilterParams::default());
        let result = run(&fx.repo, &TaskRequest::new("f", "main", filter));
        assert_eq!(result.code, StatusCode::InvalidArgs);
        assert!(!refs::branch_exists(&fx.repo, "main"));
    }

    #[test]
    fn test_external_tasks_unsupported() {
        let fx = Fixture::new();
        let mining = TaskParams::Mining(MiningParams {
            source: "a".into(),
            ..Default::default()
        });

        let result = run(&fx.repo, &TaskRequest::new("m", "main", mining));
        assert_eq!(result.code, StatusCode::Unsupported);
    }

    #[test]
    fn test_mutating_task_needs_lock() {
        let fx = Fixture::new();
        let _held = fx.repo.lock().unwrap();

        let result = run(&fx.repo, &TaskRequest::new("t0", "main", TaskParams::Init));
        assert_eq!(result.code, StatusCode::Locked);

        // export does not commit and runs without the lock
        let export = TaskParams::Export(ExportParams {
            source: "a".into(),
            asset_dir: Some(fx.dir.path().join("out")),
            ..Default::default()
        });
        let result = run(&fx.repo, &TaskRequest::new("e", "", export));
        assert!(result.is_ok(), "{}", result.message);
        assert!(result.commit.is_none());
    }

    #[test]
    fn test_error_codes() {
        let fx = Fixture::new();
        let filter = TaskParams::Filter(FilterParams {
            source: "missing".into(),
            ..Default::default()
        });

        let result = run(&fx.repo, &TaskRequest::new("f", "f", filter));
        assert_eq!(result.code, StatusCode::RevisionNotFound);
        assert!(!result.message.is_empty());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["code"], StatusCode::RevisionNotFound.as_i32());
        assert!(json.get("commit").is_none());
    }
}
