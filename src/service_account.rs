use secrecy::{ExposeSecret, SecretString};
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};

/// A compute-resource token ("cr-token") projected into the workload by its runtime.
///
/// The token proves which workload is calling; it is what gets exchanged for an IAM access
/// token bound to a trusted profile. It is short-lived and re-read on every request.
pub struct ServiceAccountToken {
    path: PathBuf,
    content: SecretString,
}

impl ServiceAccountToken {
    /// Read the token file at `path`.
    ///
    /// Returns `None` if the file can't be read for any reason (missing, unreadable, not UTF-8).
    /// The cause is only logged; callers treat every failure the same way.
    pub async fn load(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                tracing::debug!("Read service account token from {}", path.display());
                Some(Self {
                    path: path.to_path_buf(),
                    content: SecretString::from(content),
                })
            }
            Err(e) => {
                tracing::debug!(
                    "Could not read service account token from {}: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    /// The lines of the token file, line terminators included.
    pub fn lines(&self) -> Vec<&str> {
        self.content.expose_secret().split_inclusive('\n').collect()
    }

    /// The token as sent to IAM: the file content without surrounding whitespace.
    pub fn secret(&self) -> &str {
        self.content.expose_secret().trim()
    }
}

impl Debug for ServiceAccountToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ServiceAccountToken(path={}, ...)", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn missing_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(
            ServiceAccountToken::load(dir.path().join("sa-token"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn directory_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ServiceAccountToken::load(dir.path()).await.is_none());
    }

    #[tokio::test]
    async fn reads_file_as_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "eyJhbGciOi.first\nsecond").unwrap();

        let token = ServiceAccountToken::load(file.path()).await.unwrap();
        assert_eq!(token.lines(), vec!["eyJhbGciOi.first\n", "second"]);
        assert_eq!(token.lines().concat(), "eyJhbGciOi.first\nsecond");
    }

    #[tokio::test]
    async fn secret_is_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  eyJhbGciOi.payload.sig").unwrap();

        let token = ServiceAccountToken::load(file.path()).await.unwrap();
        assert_eq!(token.secret(), "eyJhbGciOi.payload.sig");
        assert_eq!(token.lines(), vec!["  eyJhbGciOi.payload.sig\n"]);
    }

    #[tokio::test]
    async fn debug_output_hides_token() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "top-secret").unwrap();

        let token = ServiceAccountToken::load(file.path()).await.unwrap();
        assert!(!format!("{:?}", token).contains("top-secret"));
    }
}
