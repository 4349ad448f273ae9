//! Fault injection points, active only with the `failpoints` feature.

use fail::fail_point;

use crate::error::{ErrorKind, LakeResult};

/// Fails the write of one organized chunk. Evaluated on every flush attempt.
pub const REORG_FLUSH_CHUNK: &str = "reorg.flush_chunk";

/// Fails a table partition commit before it is published.
pub const TABLE_COMMIT_PARTITION: &str = "table.commit_partition";

/// Returns an error of `kind` when the failpoint `name` is configured with `return`.
///
/// The optional return parameter, if any, is used as error detail.
#[cfg_attr(not(feature = "failpoints"), allow(unused_variables))]
pub fn lake_fail_point(name: &str, kind: ErrorKind) -> LakeResult<()> {
    fail_point!(name, |parameter| {
        let detail = parameter.unwrap_or_else(|| format!("failpoint `{name}` triggered"));
        crate::bail!(kind, "An error occurred in a fail point", detail = detail);
    });

    Ok(())
}
