//! Branch-scoped project state store.
//!
//! A [`ProjectStore`] is bound to one branch; every row it reads or writes
//! carries that branch, so sessions on different branches can share one
//! database file without touching each other's entities.
//!
//! All reads and writes go through [`StateOps`], a cheap borrowed view over a
//! connection. The same operations run against the bare connection, a
//! [`ProjectTransaction`] (the required-action chain of a rule run) or a
//! [`ProjectScope`] savepoint nested inside it (one optional action).

pub(crate) mod changelog;
mod entities;
mod generic;
mod hierarchy;

pub use changelog::{Change, ChangeOp};
pub use entities::{CodeEntity, Reservation};
pub use generic::Record;
pub use hierarchy::{Item, Milestone, Project, Stage, Subtask, Task};

use crate::error::Result;
use crate::migrations;
use crate::paths;
use crate::sqlite;
use rusqlite::{Connection, DropBehavior, Savepoint, Transaction};
use std::path::Path;

// ---------------------------------------------------------------------------
// ProjectStore
// ---------------------------------------------------------------------------

pub struct ProjectStore {
    conn: Connection,
    branch: String,
}

impl ProjectStore {
    /// Open (or create) the store at `path` and migrate it to the latest
    /// schema.
    pub fn open(path: &Path, branch: &str) -> Result<Self> {
        paths::validate_branch(branch)?;
        let mut conn = sqlite::open_read_write(path)?;
        migrations::apply(&mut conn, migrations::PROJECT_STORE)?;
        Ok(Self {
            conn,
            branch: branch.to_string(),
        })
    }

    pub fn open_in_memory(branch: &str) -> Result<Self> {
        paths::validate_branch(branch)?;
        let mut conn = sqlite::open_in_memory()?;
        migrations::apply(&mut conn, migrations::PROJECT_STORE)?;
        Ok(Self {
            conn,
            branch: branch.to_string(),
        })
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Operations outside any explicit transaction. Each statement commits
    /// on its own.
    pub fn state(&self) -> StateOps<'_> {
        StateOps {
            conn: &self.conn,
            branch: &self.branch,
        }
    }

    pub fn transaction(&mut self) -> Result<ProjectTransaction<'_>> {
        let tx = self.conn.transaction()?;
        Ok(ProjectTransaction {
            tx,
            branch: &self.branch,
        })
    }

    /// Run `f` in a transaction, committing on `Ok` and rolling back on
    /// `Err`.
    pub fn with_transaction<T>(
        &mut self,
        f: impl FnOnce(StateOps<'_>) -> Result<T>,
    ) -> Result<T> {
        let tx = self.transaction()?;
        let value = f(tx.state())?;
        tx.commit()?;
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// ProjectTransaction / ProjectScope
// ---------------------------------------------------------------------------

/// Dropping without [`commit`](Self::commit) rolls everything back.
pub struct ProjectTransaction<'s> {
    tx: Transaction<'s>,
    branch: &'s str,
}

impl<'s> ProjectTransaction<'s> {
    pub fn state(&self) -> StateOps<'_> {
        StateOps {
            conn: &self.tx,
            branch: self.branch,
        }
    }

    /// Open a savepoint nested in this transaction.
    pub fn scope(&mut self) -> Result<ProjectScope<'_>> {
        let branch = self.branch;
        let sp = self.tx.savepoint()?;
        Ok(ProjectScope { sp, branch })
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> Result<()> {
        self.tx.rollback()?;
        Ok(())
    }
}

/// A savepoint inside a [`ProjectTransaction`]. Rolling it back discards
/// only the writes made through it.
pub struct ProjectScope<'t> {
    sp: Savepoint<'t>,
    branch: &'t str,
}

impl<'t> ProjectScope<'t> {
    pub fn state(&self) -> StateOps<'_> {
        StateOps {
            conn: &self.sp,
            branch: self.branch,
        }
    }

    pub fn commit(self) -> Result<()> {
        self.sp.commit()?;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.sp.set_drop_behavior(DropBehavior::Rollback);
        self.sp.finish()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StateOps
// ---------------------------------------------------------------------------

/// Borrowed, branch-bound view used by every state operation.
#[derive(Clone, Copy)]
pub struct StateOps<'c> {
    conn: &'c Connection,
    branch: &'c str,
}

impl<'c> StateOps<'c> {
    pub fn branch(&self) -> &'c str {
        self.branch
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
