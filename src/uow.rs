//! Units of work: commit everything a handler touched.
//!
//! There is no rollback. Whatever a unit of work commits stays committed,
//! even if a later step of the same cascade fails.

use std::future::Future;

use futures::future::join_all;
use tracing::error;

use crate::error::SyncError;
use crate::mapper::Mapper;
use crate::repository::Repository;

/// Scope lending a [`Repository`] and committing every table it loaded.
#[derive(Debug)]
pub struct UnitOfWork {
    mapper: Mapper,
    repo: Repository,
}

impl UnitOfWork {
    /// Open a unit of work over `mapper`.
    pub fn new(mapper: Mapper) -> Self {
        let repo = Repository::new(mapper.clone());
        Self { mapper, repo }
    }

    /// Repository recording the tables this unit of work will commit.
    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Commit every table loaded through [`repo`](Self::repo).
    ///
    /// All commits are started together and all of them run to completion.
    /// Returns the number of tables seen.
    ///
    /// # Errors
    ///
    /// Returns the first failed commit; further failures are logged.
    pub async fn commit(self) -> Result<usize, SyncError> {
        let tables = self.repo.seen();
        let results = join_all(tables.iter().map(|t| self.mapper.commit(t.as_ref()))).await;

        let mut first = None;
        for (table, result) in tables.iter().zip(results) {
            if let Err(e) = result {
                if first.is_none() {
                    first = Some(e);
                } else {
                    error!(table = %table.id(), error = %e, "commit failed");
                }
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(tables.len()),
        }
    }

    /// Run `body` inside a fresh unit of work and commit afterwards.
    ///
    /// The commit is attempted whether or not `body` succeeded. An error
    /// from `body` takes precedence; a commit error that follows it is
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns the body's error, or else the commit's error.
    pub async fn run<F, Fut, T>(mapper: &Mapper, body: F) -> Result<T, SyncError>
    where
        F: FnOnce(Repository) -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let uow = Self::new(mapper.clone());
        let outcome = body(uow.repo().clone()).await;
        let committed = uow.commit().await;
        match (outcome, committed) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(commit_err)) => {
                error!(error = %commit_err, "commit failed after handler error");
                Err(e)
            }
        }
    }
}
