//! Server call guard
//!
//! Every RPC body runs inside `run_guarded`: the stale last-error is
//! cleared first, the body's `ServiceError` becomes a discrete wire
//! status recorded as the new last error, and a panic anywhere in the
//! body aborts the whole server process. A JIT server that has panicked
//! mid-compilation cannot be trusted to keep handing out code, so
//! fail-fast is the only acceptable panic policy here.

use std::panic::{self, AssertUnwindSafe};

use parking_lot::Mutex;

use crate::ServiceResult;
use vireo_jit_proto::Status;

/// Run one call body under the guard.
///
/// Returns the wire status plus the body's value on success. On failure
/// the error's status is recorded in `last_error` and no value is
/// returned; the caller reports zeroed/absent payloads.
pub fn run_guarded<T, F>(last_error: &Mutex<Option<Status>>, body: F) -> (Status, Option<T>)
where
    F: FnOnce() -> ServiceResult<T>,
{
    *last_error.lock() = None;

    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(value)) => (Status::Ok, Some(value)),
        Ok(Err(err)) => {
            let status = err.to_status();
            *last_error.lock() = Some(status);
            (status, None)
        }
        Err(payload) => {
            let msg = panic_message(&payload);
            eprintln!("jit server: panic in call body: {}", msg);
            std::process::abort();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServiceError;

    #[test]
    fn test_success_clears_last_error() {
        let last = Mutex::new(Some(Status::Fail));
        let (status, value) = run_guarded(&last, || Ok(42u32));
        assert_eq!(status, Status::Ok);
        assert_eq!(value, Some(42));
        assert!(last.lock().is_none());
    }

    #[test]
    fn test_failure_records_status() {
        let last = Mutex::new(None);
        let (status, value) = run_guarded::<u32, _>(&last, || Err(ServiceError::AccessDenied));
        assert_eq!(status, Status::AccessDenied);
        assert_eq!(value, None);
        assert_eq!(*last.lock(), Some(Status::AccessDenied));
    }

    #[test]
    fn test_each_call_starts_with_clean_slate() {
        let last = Mutex::new(None);
        let _ = run_guarded::<u32, _>(&last, || Err(ServiceError::OutOfMemory));
        assert_eq!(*last.lock(), Some(Status::OutOfMemory));
        let _ = run_guarded(&last, || Ok(0u32));
        assert!(last.lock().is_none());
    }
}
