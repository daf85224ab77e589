use std::path::PathBuf;
use std::string::FromUtf8Error;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("failed to run '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' failed (status {status:?}): {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("non-utf8 {stream} from '{command}': {source}")]
    NonUtf8Output {
        command: String,
        stream: &'static str,
        #[source]
        source: FromUtf8Error,
    },

    #[error("'{path}' is not a git repository")]
    NotARepository { path: PathBuf },

    #[error("failed to parse git output: {context}")]
    Parse { context: String },

    /// Branch already exists, locally or on the remote. `RepositorySync`
    /// treats this as recoverable: a local checkout, or a single
    /// force-push retry.
    #[error("branch '{branch}' already exists")]
    BranchAlreadyExists { branch: String },
}
