//! Statement execution
//!
//! [`run_in_transaction`] is used for account creation and password
//! rotation: statements run in order inside one transaction that is rolled
//! back on any failure or cancellation.
//!
//! [`run_direct`] is used for revocation. Oracle commits DDL such as
//! `DROP USER` implicitly, so a transaction around it cannot undo anything.
//! Each statement therefore runs and commits on its own, and a failure after
//! the first statement is reported as [`LifecycleError::PartialRevocation`].

use dynacred_rdbc::prelude::{Connection, Transaction};
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::error::{LifecycleError, Operation, Result};
use crate::statements::StatementBindings;

async fn rollback(operation: Operation, tx: Box<dyn Transaction>) {
    if let Err(e) = tx.rollback().await {
        warn!(%operation, error = %e, "rollback failed");
    }
}

/// Run `statements` in one transaction, committing only if all succeed.
///
/// The failing statement's zero-based index is carried in
/// [`LifecycleError::Execution`]. Cancellation abandons the current
/// statement, which the backend breaks off before it takes effect, and rolls
/// back.
pub async fn run_in_transaction(
    ctx: &RequestContext,
    conn: &dyn Connection,
    operation: Operation,
    statements: &[String],
    bindings: &StatementBindings,
) -> Result<()> {
    let tx = ctx
        .run(conn.begin())
        .await
        .map_err(|i| LifecycleError::cancelled(operation, i))?
        .map_err(|e| LifecycleError::execution(operation, None, &e))?;

    for (index, statement) in statements.iter().enumerate() {
        let sql = bindings.render(statement);
        let result = ctx.run(tx.execute(&sql)).await;
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                rollback(operation, tx).await;
                return Err(LifecycleError::execution(operation, Some(index), &e));
            }
            Err(interrupted) => {
                rollback(operation, tx).await;
                return Err(LifecycleError::cancelled(operation, interrupted));
            }
        }
    }

    if let Err(interrupted) = ctx.check() {
        rollback(operation, tx).await;
        return Err(LifecycleError::cancelled(operation, interrupted));
    }

    // COMMIT itself is not interruptible.
    tx.commit()
        .await
        .map_err(|e| LifecycleError::execution(operation, None, &e))?;

    debug!(%operation, statements = statements.len(), "transaction committed");
    Ok(())
}

/// Run `statements` one by one, each committing as it completes.
pub async fn run_direct(
    ctx: &RequestContext,
    conn: &dyn Connection,
    username: &str,
    statements: &[String],
    bindings: &StatementBindings,
) -> Result<()> {
    let operation = Operation::DeleteUser;

    for (index, statement) in statements.iter().enumerate() {
        let sql = bindings.render(statement);
        let message = match ctx.run(conn.execute(&sql)).await {
            Ok(Ok(_)) => continue,
            Ok(Err(e)) if index == 0 => {
                return Err(LifecycleError::execution(operation, Some(index), &e))
            }
            Err(interrupted) if index == 0 => {
                return Err(LifecycleError::cancelled(operation, interrupted))
            }
            Ok(Err(e)) => e.to_string(),
            Err(interrupted) => interrupted.to_string(),
        };

        warn!(
            username = %username,
            committed = index,
            failed_index = index,
            "revocation partially applied"
        );
        return Err(LifecycleError::PartialRevocation {
            username: username.to_string(),
            committed: index,
            failed_index: index,
            message,
        });
    }

    debug!(username = %username, statements = statements.len(), "revocation statements applied");
    Ok(())
}
