#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use mediacheck::{
    CheckEngine, CheckMode, CheckOutcome, CheckOutput, Checker, Config, OutputStream,
};

/// Test double: fails files whose name is listed, prints scripted lines.
#[derive(Default)]
pub struct ScriptedChecker {
    pub failing: HashSet<String>,
    pub lines: Vec<(OutputStream, String)>,
    pub duration: Option<f64>,
    pub delay: Duration,
    /// Each check waits for one permit when set.
    pub gate: Option<Arc<Semaphore>>,
    pub calls: AtomicUsize,
}

impl ScriptedChecker {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Checker for ScriptedChecker {
    async fn check(
        &self,
        path: &Path,
        _mode: CheckMode,
        output: &dyn CheckOutput,
    ) -> CheckOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for (stream, text) in &self.lines {
            output.line(*stream, text);
        }
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if self.failing.contains(&name) {
            output.line(OutputStream::Stderr, "Invalid data found when processing input");
            CheckOutcome::failed("Invalid data found when processing input")
        } else {
            CheckOutcome::passed(self.duration)
        }
    }
}

pub struct TestEnv {
    pub dir: TempDir,
    pub engine: CheckEngine,
}

pub fn config_in(dir: &TempDir) -> Config {
    Config {
        database_path: dir.path().join("mediacheck.db"),
        log_directory: dir.path().join("logs"),
        concurrency: 2,
        ..Config::default()
    }
}

pub fn engine_with(checker: ScriptedChecker) -> (TestEnv, Arc<ScriptedChecker>) {
    let dir = TempDir::new().unwrap();
    let checker = Arc::new(checker);
    let engine = CheckEngine::with_checker(config_in(&dir), checker.clone()).unwrap();
    (TestEnv { dir, engine }, checker)
}

pub fn add_files(engine: &CheckEngine, names: &[&str]) -> Vec<String> {
    names
        .iter()
        .map(|name| engine.add_file(&Path::new("/media").join(name)).unwrap())
        .collect()
}

/// Polls `cond` until it holds or five seconds pass.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
