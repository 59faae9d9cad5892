//! Fan-out/fan-in across backends.
//!
//! A [`BatchReport`] is the result of issuing one driver operation against
//! several backends at once. Nothing is decided while the batch runs: every
//! backend is awaited, and the caller applies its own partial-failure policy
//! afterwards.

use crate::error::{ErrorKind, Result};
use blobfan_storage::DriverHandle;
use blobfan_storage::error::{Error as StorageError, Result as StorageResult};
use futures::future::join_all;
use std::future::Future;

/// What one backend made of the operation.
#[derive(Debug)]
pub struct Outcome<T> {
    /// Name of the backend.
    pub backend: String,
    pub result: StorageResult<T>,
}
impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-backend outcomes of a single fanned-out operation, in the order the
/// drivers were given (primary first for a
/// [`DriverSet`](crate::DriverSet)).
#[derive(Debug)]
pub struct BatchReport<T> {
    outcomes: Vec<Outcome<T>>,
}
impl<T> BatchReport<T> {
    /// Run `op` against every driver concurrently and wait for all of them.
    ///
    /// Failures don't cancel the other backends.
    pub async fn run<'a, I, F, Fut>(drivers: I, mut op: F) -> Self
    where
        I: IntoIterator<Item = &'a DriverHandle>,
        F: FnMut(&'a DriverHandle) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let (names, futures): (Vec<String>, Vec<Fut>) =
            drivers.into_iter().map(|driver| (driver.name().to_string(), op(driver))).unzip();
        let results = join_all(futures).await;
        let outcomes: Vec<Outcome<T>> = names
            .into_iter()
            .zip(results)
            .map(|(backend, result)| {
                match &result {
                    Ok(_) => tracing::debug!(%backend, "Backend call succeeded"),
                    Err(err) => tracing::debug!(%backend, error = ?err, "Backend call failed"),
                }
                Outcome { backend, result }
            })
            .collect();
        Self { outcomes }
    }

    /// Whether every backend succeeded. An empty batch is a success.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(Outcome::is_success)
    }

    /// Backends that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &StorageError)> {
        self.outcomes.iter().filter_map(|outcome| match &outcome.result {
            Ok(_) => None,
            Err(err) => Some((outcome.backend.as_str(), err)),
        })
    }

    pub fn outcomes(&self) -> &[Outcome<T>] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<Outcome<T>> {
        self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Every backend must have succeeded.
    ///
    /// All failures are logged; the first one is raised as
    /// [`Backend`](ErrorKind::Backend) with the driver error as its child.
    /// Writes that already landed on other backends are left alone.
    pub fn require_all(self) -> Result<Vec<T>> {
        let mut values = Vec::with_capacity(self.outcomes.len());
        let mut first_failure = None;
        for Outcome { backend, result } in self.outcomes {
            match result {
                Ok(value) => values.push(value),
                Err(err) => {
                    tracing::warn!(%backend, error = ?err, "Backend failed; other backends are not rolled back");
                    first_failure.get_or_insert((backend, err));
                },
            }
        }
        match first_failure {
            Some((backend, err)) => Err(err.raise(ErrorKind::Backend(backend))),
            None => Ok(values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobfan_storage::backend::{Fault, MockBackend};
    use std::sync::Arc;

    fn drivers() -> Vec<DriverHandle> {
        vec![
            Arc::new(MockBackend::with_files([("a.txt", b"a")]).with_name("one")),
            Arc::new(MockBackend::default().with_name("two")),
            Arc::new(MockBackend::with_files([("a.txt", b"a")]).with_name("three").with_fault(Fault::FailDeletes)),
        ]
    }

    #[tokio::test]
    async fn test_run_keeps_driver_order() {
        let drivers = drivers();
        let report = BatchReport::run(&drivers, |driver| driver.exists("a.txt")).await;
        assert_eq!(report.len(), 3);
        let seen: Vec<(&str, bool)> =
            report.outcomes().iter().map(|o| (o.backend.as_str(), *o.result.as_ref().unwrap())).collect();
        assert_eq!(seen, vec![("one", true), ("two", false), ("three", true)]);
        assert!(report.is_success());
        assert_eq!(report.require_all().unwrap(), vec![true, false, true]);
    }

    #[tokio::test]
    async fn test_partial_failure() {
        let drivers = drivers();
        let report = BatchReport::run(&drivers, |driver| driver.delete("a.txt")).await;
        assert!(!report.is_success());
        let failed: Vec<&str> = report.failures().map(|(backend, _)| backend).collect();
        assert_eq!(failed, vec!["three"]);
        // The other backends ran to completion regardless.
        assert!(!drivers[0].exists("a.txt").await.unwrap());
        let err = report.require_all().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Backend(name) if name == "three"));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let drivers: Vec<DriverHandle> = Vec::new();
        let report = BatchReport::run(&drivers, |driver| driver.exists("a.txt")).await;
        assert!(report.is_empty());
        assert!(report.is_success());
        assert!(report.require_all().unwrap().is_empty());
    }
}
