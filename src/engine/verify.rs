use thiserror::Error;

use crate::structs::CrackingJob;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// This candidate could not be checked; the next one may well be.
    #[error("verification failed: {0}")]
    Transient(String),

    /// No candidate can ever be checked against this job.
    #[error("verification impossible: {0}")]
    Unrecoverable(String),
}

impl VerifyError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, VerifyError::Transient(_))
    }
}

/// Decides whether a candidate reproduces the job's reference hash.
///
/// Must be a pure function of its inputs: the engine calls it from many
/// threads at once and trusts whichever thread matches first.
pub trait Verifier: Send + Sync {
    fn verify(&self, candidate: &str, job: &CrackingJob) -> Result<bool, VerifyError>;
}

impl<F> Verifier for F
where
    F: Fn(&str, &CrackingJob) -> Result<bool, VerifyError> + Send + Sync,
{
    fn verify(&self, candidate: &str, job: &CrackingJob) -> Result<bool, VerifyError> {
        self(candidate, job)
    }
}

/// crypt(3) modular hashes. yescrypt and its relatives go to the system
/// libcrypt; `$6$`, `$5$`, `$1$`, bcrypt and the rest to `pwhash`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CryptVerifier;

impl Verifier for CryptVerifier {
    fn verify(&self, candidate: &str, job: &CrackingJob) -> Result<bool, VerifyError> {
        if let Some(verdict) = system_crypt(candidate, job) {
            return verdict;
        }

        match pwhash::unix::crypt(candidate, &job.full_hash) {
            Ok(hash) => Ok(hash == job.full_hash),
            Err(pwhash::error::Error::RandomError(e)) => Err(VerifyError::Transient(e)),
            Err(e) => Err(VerifyError::Unrecoverable(format!(
                "{e} in {:?}",
                job.setting
            ))),
        }
    }
}

#[cfg(target_os = "linux")]
fn system_crypt(candidate: &str, job: &CrackingJob) -> Option<Result<bool, VerifyError>> {
    super::libcrypt::handles(&job.full_hash).then(|| {
        super::libcrypt::crypt(candidate, &job.full_hash).map(|hash| hash == job.full_hash)
    })
}

#[cfg(not(target_os = "linux"))]
fn system_crypt(_: &str, _: &CrackingJob) -> Option<Result<bool, VerifyError>> {
    None
}
