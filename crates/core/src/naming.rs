//! Dataset and output naming convention.
//!
//! All paths derive from the task's one-based number `n`:
//!
//! | What                     | Path                                      |
//! |--------------------------|-------------------------------------------|
//! | job configuration        | `{dataset}/midi_parseq_{n}/parseq_{n}.json` |
//! | auxiliary asset          | `{dataset}/midi_parseq_{n}/midi_{n}.mid`    |
//! | expected output dir      | `{output}/batch_{n}`                        |
//! | copied asset             | `{outdir}/midi_{n}.mid`                     |

use std::path::{Path, PathBuf};

/// File extension of a finished render. Its presence marks a task done.
pub const RENDERED_OUTPUT_EXTENSION: &str = "mp4";

/// Directory holding every input for task number `n`.
pub fn task_dir(dataset_root: &Path, n: usize) -> PathBuf {
    dataset_root.join(format!("midi_parseq_{n}"))
}

/// Job configuration document for task number `n`.
pub fn config_path(dataset_root: &Path, n: usize) -> PathBuf {
    task_dir(dataset_root, n).join(format!("parseq_{n}.json"))
}

/// File name of the auxiliary asset for task number `n`.
pub fn asset_file_name(n: usize) -> String {
    format!("midi_{n}.mid")
}

/// Auxiliary input asset for task number `n`.
pub fn asset_path(dataset_root: &Path, n: usize) -> PathBuf {
    task_dir(dataset_root, n).join(asset_file_name(n))
}

/// Batch name submitted to the backend; the backend names its output
/// directory after it.
pub fn batch_name(n: usize) -> String {
    format!("batch_{n}")
}

/// Where the backend is expected to write the render for task number `n`.
pub fn expected_output_dir(output_root: &Path, n: usize) -> PathBuf {
    output_root.join(batch_name(n))
}

/// Whether `file_name` looks like a finished render.
pub fn is_rendered_output(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(RENDERED_OUTPUT_EXTENSION))
}
