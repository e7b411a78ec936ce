use polars::prelude::*;

use crate::errors::LoadError;
use crate::schema::ColumnSpec;

/// Selects every column in `specs` from `raw`, accepting any alias, casting
/// strictly to the declared kind and renaming to the canonical name. Columns
/// not named by `specs` are dropped; output order follows `specs`.
pub(crate) fn project_columns(
    raw: &DataFrame,
    specs: &[ColumnSpec],
    table: &'static str,
) -> Result<DataFrame, LoadError> {
    let mut columns = Vec::with_capacity(specs.len());

    for spec in specs {
        let source = spec
            .accepted_names()
            .find_map(|name| raw.column(name).ok())
            .ok_or_else(|| LoadError::MissingColumn {
                table,
                column: spec.name,
                accepted: spec.accepted_names().collect::<Vec<_>>().join(", "),
            })?;

        let series = source.as_materialized_series();
        let mut cast = series
            .strict_cast(&spec.kind.data_type())
            .map_err(|source| LoadError::InvalidColumn {
                table,
                column: spec.name,
                expected: spec.kind.describe(),
                source,
            })?;
        cast.rename(spec.name.into());
        columns.push(cast.into());
    }

    Ok(DataFrame::new(columns)?)
}
