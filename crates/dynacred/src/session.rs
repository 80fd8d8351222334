//! Forced disconnection of a user's live sessions
//!
//! Oracle refuses to drop a user that is still connected (ORA-01940), so
//! before revocation every session the user owns is killed. The cluster
//! view `gv$session` is tried first; when it cannot be queried the
//! single-instance `v$session` is used instead.
//!
//! Each kill takes effect immediately. If a kill fails part way through,
//! the sessions already killed stay killed.

use dynacred_rdbc::prelude::{Connection, Row};
use dynacred_rdbc::security::escape_string_literal;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::error::{LifecycleError, Operation, Result};

/// One row of the session view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSession {
    /// Instance id, present when read from the cluster view
    pub inst_id: Option<i64>,
    /// Session id
    pub sid: i64,
    /// Session serial number
    pub serial: i64,
    /// Owning user
    pub username: Option<String>,
}

impl LiveSession {
    /// `ALTER SYSTEM KILL SESSION` addressed at this session
    pub fn kill_statement(&self) -> String {
        match self.inst_id {
            Some(inst_id) => format!(
                "ALTER SYSTEM KILL SESSION '{},{},@{}' IMMEDIATE",
                self.sid, self.serial, inst_id
            ),
            None => format!(
                "ALTER SYSTEM KILL SESSION '{},{}' IMMEDIATE",
                self.sid, self.serial
            ),
        }
    }

    fn from_row(row: &Row, cluster: bool) -> std::result::Result<Self, String> {
        let int = |name: &str| {
            row.get_by_name(name)
                .and_then(|v| v.as_i64())
                .ok_or_else(|| format!("session row has no numeric {} column", name))
        };
        Ok(Self {
            inst_id: if cluster { Some(int("INST_ID")?) } else { None },
            sid: int("SID")?,
            serial: int("SERIAL#")?,
            username: row
                .get_by_name("USERNAME")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }
}

fn cluster_query(username: &str) -> String {
    format!(
        "SELECT inst_id, sid, serial#, username FROM gv$session WHERE username = UPPER('{}')",
        escape_string_literal(username)
    )
}

fn local_query(username: &str) -> String {
    format!(
        "SELECT sid, serial#, username FROM v$session WHERE username = UPPER('{}')",
        escape_string_literal(username)
    )
}

/// Finds and kills the sessions of one user
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionTerminator;

impl SessionTerminator {
    /// Create a terminator
    pub fn new() -> Self {
        Self
    }

    /// Sessions currently owned by `username`
    async fn list(
        &self,
        ctx: &RequestContext,
        conn: &dyn Connection,
        username: &str,
    ) -> Result<Vec<LiveSession>> {
        let interrupted = |i| LifecycleError::cancelled(Operation::DeleteUser, i);
        let failed = |message: String| LifecycleError::SessionTermination {
            username: username.to_string(),
            killed: 0,
            message,
        };

        let (rows, cluster) = match ctx
            .run(conn.query(&cluster_query(username)))
            .await
            .map_err(interrupted)?
        {
            Ok(rows) => (rows, true),
            Err(e) => {
                debug!(username = %username, error = %e, "cluster session view unavailable, using v$session");
                let rows = ctx
                    .run(conn.query(&local_query(username)))
                    .await
                    .map_err(interrupted)?
                    .map_err(|e| failed(e.to_string()))?;
                (rows, false)
            }
        };

        rows.iter()
            .map(|row| LiveSession::from_row(row, cluster))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(failed)
    }

    /// Kill every live session of `username`, returning how many were killed.
    ///
    /// A session that disappears between listing and killing (ORA-00030) is
    /// not an error.
    pub async fn disconnect(
        &self,
        ctx: &RequestContext,
        conn: &dyn Connection,
        username: &str,
    ) -> Result<usize> {
        let sessions = self.list(ctx, conn, username).await?;
        let mut killed = 0;

        for session in &sessions {
            let result = ctx
                .run(conn.execute(&session.kill_statement()))
                .await
                .map_err(|i| LifecycleError::cancelled(Operation::DeleteUser, i))?;
            match result {
                Ok(_) => killed += 1,
                Err(e) if e.to_string().contains("ORA-00030") => {
                    debug!(username = %username, sid = session.sid, "session already gone");
                }
                Err(e) => {
                    warn!(username = %username, sid = session.sid, killed, error = %e, "failed to kill session");
                    return Err(LifecycleError::SessionTermination {
                        username: username.to_string(),
                        killed,
                        message: e.to_string(),
                    });
                }
            }
        }

        debug!(username = %username, found = sessions.len(), killed, "disconnected sessions");
        Ok(killed)
    }
}
