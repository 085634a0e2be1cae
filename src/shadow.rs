use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::ShadowError;
use crate::structs::CrackingJob;

/// Builds a job for `username` from a shadow(5) formatted file.
///
/// The heartbeat interval is left at zero for the caller to fill in.
pub fn find_user(path: impl AsRef<Path>, username: &str) -> Result<CrackingJob, ShadowError> {
    let file = File::open(path)?;

    for line in BufReader::new(file).lines() {
        if let Some(job) = parse_line(&line?) {
            if job.username == username {
                return Ok(job);
            }
        }
    }

    Err(ShadowError::UserNotFound(username.to_owned()))
}

/// Returns `None` for lines without a crackable crypt(3) hash.
pub fn parse_line(line: &str) -> Option<CrackingJob> {
    let mut fields = line.split(':');
    let username = fields.next()?;
    let full_hash = fields.next()?;

    // locked and disabled accounts have no '$' prefix either
    if !full_hash.starts_with('$') {
        tracing::trace!(username, "skipping account without crypt hash");
        return None;
    }

    let setting = &full_hash[..full_hash.rfind('$')?];

    Some(CrackingJob {
        id: 1,
        interval_seconds: 0,
        username: username.to_owned(),
        setting: setting.to_owned(),
        full_hash: full_hash.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SHADOW: &str = "\
root:!:19000:0:99999:7:::
daemon:*:19000:0:99999:7:::
broken
bob:plaintext:19000:0:99999:7:::
alice:$6$rounds=1000$abcd$Q9bX0p:19000:0:99999:7:::
carol:$y$j9T$salt$hashhash:19000:0:99999:7:::
";

    fn shadow_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SHADOW.as_bytes()).unwrap();
        file
    }

    #[test]
    fn setting_is_everything_before_the_last_dollar() {
        let job = find_user(shadow_file().path(), "alice").unwrap();

        assert_eq!(job.id, 1);
        assert_eq!(job.username, "alice");
        assert_eq!(job.setting, "$6$rounds=1000$abcd");
        assert_eq!(job.full_hash, "$6$rounds=1000$abcd$Q9bX0p");
    }

    #[test]
    fn finds_users_after_unparseable_lines() {
        let job = find_user(shadow_file().path(), "carol").unwrap();
        assert_eq!(job.setting, "$y$j9T$salt");
    }

    #[test]
    fn locked_and_plain_accounts_are_not_found() {
        let file = shadow_file();

        for user in ["root", "daemon", "bob", "broken", "nobody"] {
            assert!(matches!(
                find_user(file.path(), user),
                Err(ShadowError::UserNotFound(_))
            ));
        }
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_user(dir.path().join("shadow"), "alice"),
            Err(ShadowError::Io(_))
        ));
    }

    #[test]
    fn parse_line_rejects_short_lines() {
        assert!(parse_line("").is_none());
        assert!(parse_line("justaname").is_none());
        assert!(parse_line("x:!$6$salt$hash").is_none());
    }
}
