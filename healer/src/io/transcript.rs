//! Session transcripts under `<transcript_dir>/<session_id>/`.
//!
//! Transcripts are a diagnostics side channel. Nothing in the engine reads them
//! back.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::language::Language;
use crate::core::types::{ExecutionResult, Failure, FixAttempt, TaskReport};

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptMeta<'a> {
    pub session_id: &'a str,
    pub request: &'a str,
    pub strategy: &'a str,
    pub language: Language,
    pub succeeded: bool,
    pub depth: u32,
    pub attempt_count: usize,
    pub failure: Option<&'a Failure>,
}

#[derive(Debug, Clone)]
pub struct TranscriptPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub attempts_path: PathBuf,
    pub tasks_path: PathBuf,
    pub final_code_path: PathBuf,
    pub result_path: PathBuf,
}

impl TranscriptPaths {
    pub fn new(root: &Path, session_id: &str, language: Language) -> Self {
        let dir = root.join(session_id);
        Self {
            meta_path: dir.join("meta.json"),
            attempts_path: dir.join("attempts.json"),
            tasks_path: dir.join("tasks.json"),
            final_code_path: dir.join(format!("final.{}", language.extension())),
            result_path: dir.join("result.json"),
            dir,
        }
    }
}

pub struct TranscriptWriteRequest<'a> {
    pub root: &'a Path,
    pub meta: &'a TranscriptMeta<'a>,
    pub attempts: &'a [FixAttempt],
    pub tasks: &'a [TaskReport],
    pub result: Option<&'a ExecutionResult>,
}

pub fn write_transcript(request: &TranscriptWriteRequest<'_>) -> Result<TranscriptPaths> {
    let paths = TranscriptPaths::new(
        request.root,
        request.meta.session_id,
        request.meta.language,
    );
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create transcript dir {}", paths.dir.display()))?;

    // Write in deterministic order to keep transcripts stable.
    write_json(&paths.meta_path, request.meta)?;
    write_json(&paths.attempts_path, &request.attempts)?;
    if !request.tasks.is_empty() {
        write_json(&paths.tasks_path, &request.tasks)?;
    }
    if let Some(result) = request.result {
        write_text(&paths.final_code_path, &result.source_code)?;
        write_json(&paths.result_path, result)?;
    }

    Ok(paths)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_text(path, &buf)
}
