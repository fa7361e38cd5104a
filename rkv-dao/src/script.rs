//! Server-side script invocation.

use tracing::debug;

use crate::dao::{group_name, unexpected, Command, RedisDao};
use crate::error::DaoResult;
use crate::registry::Reply;

impl RedisDao {
    /// Runs `body` with `EVAL`.
    ///
    /// Every entry of `args` is declared as a key (`numkeys = args.len()`);
    /// scripts needing plain arguments cannot be expressed here. A nil result
    /// is `Ok(None)`. `group` and `id` only label the call in logs.
    pub fn script(
        &self,
        db: &str,
        group: Option<&str>,
        id: &str,
        body: &str,
        args: &[&str],
    ) -> DaoResult<Option<String>> {
        debug!(database = db, group = ?group_name(group), id, keys = args.len(), "script");
        let mut command = Command::new("EVAL").arg(body).arg(args.len().to_string());
        for arg in args {
            command = command.arg(*arg);
        }

        let mut conn = self.lease(db)?;
        match self.registry().decode(command.name, conn.exec(&command.parts())) {
            Ok(Reply::Str(text)) => Ok(Some(text)),
            Ok(_) => Err(unexpected(command.name, "string")),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}
