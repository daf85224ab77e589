#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("file not found: {repo}:{path}@{reference}")]
    FileNotFound {
        repo: String,
        path: String,
        reference: String,
    },

    #[error("failed to run '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("failed to parse response from '{command}': {source}")]
    Parse {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected response from '{command}': {message}")]
    InvalidResponse { command: String, message: String },
}
