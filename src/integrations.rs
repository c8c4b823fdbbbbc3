//! Interfaces to external collaborators
//!
//! The runtime consumes these capabilities but does not implement them: an
//! LLM backend (only token counts matter to the controller), a sandboxed
//! filesystem scoped to a whitelist root, and a test runner. Implementations
//! live outside the core; the traits define the seams.

use async_trait::async_trait;
use thiserror::Error;

/// One completed generation.
#[derive(Debug, Clone)]
pub struct Generation {
    /// Generated text.
    pub text: String,
    /// Prompt tokens consumed.
    pub tokens_in: u64,
    /// Completion tokens produced.
    pub tokens_out: u64,
}

impl Generation {
    /// Total tokens charged against the episode budget.
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.tokens_in + self.tokens_out
    }
}

/// LLM backend errors.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The backend rejected or failed the request.
    #[error("backend error: {message}")]
    Backend {
        /// Backend-reported failure.
        message: String,
    },

    /// The request exceeded its deadline.
    #[error("generation timed out after {timeout_s}s")]
    Timeout {
        /// Deadline that was exceeded.
        timeout_s: u64,
    },
}

/// A text-generation backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generates a completion for `prompt`, bounded by `max_tokens`.
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<Generation, LlmError>;
}

/// Sandboxed filesystem errors.
#[derive(Debug, Error)]
pub enum FsError {
    /// The path escapes the whitelist root.
    #[error("path escapes the workspace root: {path}")]
    OutsideRoot {
        /// Offending path.
        path: String,
    },

    /// The file was not found under the root.
    #[error("not found: {path}")]
    NotFound {
        /// Missing path.
        path: String,
    },

    /// Underlying I/O failure.
    #[error("i/o error: {source}")]
    Io {
        /// Underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

/// A filesystem scoped to a whitelist root.
#[async_trait]
pub trait WorkspaceFs: Send + Sync {
    /// Reads a file under the root.
    async fn read(&self, path: &str) -> Result<String, FsError>;

    /// Writes a file under the root, creating parents as needed.
    async fn write(&self, path: &str, contents: &str) -> Result<(), FsError>;

    /// Replaces the first occurrence of `find` with `replace` in a file.
    async fn patch(&self, path: &str, find: &str, replace: &str) -> Result<(), FsError>;

    /// Lists paths under the root whose contents match `pattern`.
    async fn search_files(&self, pattern: &str) -> Result<Vec<String>, FsError>;
}

/// Aggregated outcome of one test run.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestReport {
    /// Tests that passed.
    pub passed: u32,
    /// Tests that failed.
    pub failed: u32,
    /// Tests skipped.
    pub skipped: u32,
    /// Collection or harness errors.
    pub errors: u32,
    /// Wall-clock run duration in seconds.
    pub duration_s: f64,
}

impl TestReport {
    /// Fraction of selected tests that passed; zero when nothing ran.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn pass_rate(&self) -> f64 {
        let ran = self.passed + self.failed + self.errors;
        if ran == 0 {
            0.0
        } else {
            f64::from(self.passed) / f64::from(ran)
        }
    }
}

/// Test runner errors.
#[derive(Debug, Error)]
pub enum TestRunnerError {
    /// Test discovery failed.
    #[error("discovery failed: {message}")]
    Discovery {
        /// Runner-reported failure.
        message: String,
    },

    /// The run exceeded its deadline.
    #[error("test run timed out after {timeout_s}s")]
    Timeout {
        /// Deadline that was exceeded.
        timeout_s: u64,
    },
}

/// A test runner over the sandboxed workspace.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Lists runnable test node ids.
    async fn discover(&self) -> Result<Vec<String>, TestRunnerError>;

    /// Runs the selected nodes with a per-run deadline.
    async fn run(&self, selected: &[String], timeout_s: u64) -> Result<TestReport, TestRunnerError>;
}
