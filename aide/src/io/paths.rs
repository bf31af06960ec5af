//! Canonical locations under a working root.

use std::path::{Path, PathBuf};

use crate::io::approvals::APPROVAL_STORE_FILE;
use crate::io::code_map::CODE_MAP_FILE;
use crate::io::event_log::EVENT_LOG_FILE;

pub const SPEC_FILE: &str = "spec.json";
pub const PLAN_FILE: &str = "plan.json";
pub const API_SCHEMA_FILE: &str = "api_schema.json";
pub const TEST_REPORT_FILE: &str = "test_report.json";
pub const PERFORMANCE_REPORT_FILE: &str = "performance_report.json";

/// Paths of every file aide reads or writes in one working root.
#[derive(Debug, Clone)]
pub struct AidePaths {
    pub root: PathBuf,
    pub aide_dir: PathBuf,
    pub config: PathBuf,
    pub run_state: PathBuf,
    pub approvals: PathBuf,
    pub event_log: PathBuf,
    pub spec: PathBuf,
    pub plan: PathBuf,
    pub code_map: PathBuf,
    pub api_schema: PathBuf,
    pub test_report: PathBuf,
    pub performance_report: PathBuf,
}

impl AidePaths {
    pub fn new(root: &Path) -> Self {
        let aide_dir = root.join(".aide");
        Self {
            root: root.to_path_buf(),
            config: aide_dir.join("config.toml"),
            run_state: aide_dir.join("run_state.json"),
            aide_dir,
            approvals: root.join(APPROVAL_STORE_FILE),
            event_log: root.join(EVENT_LOG_FILE),
            spec: root.join(SPEC_FILE),
            plan: root.join(PLAN_FILE),
            code_map: root.join(CODE_MAP_FILE),
            api_schema: root.join(API_SCHEMA_FILE),
            test_report: root.join(TEST_REPORT_FILE),
            performance_report: root.join(PERFORMANCE_REPORT_FILE),
        }
    }
}
