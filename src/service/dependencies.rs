//! Computed-field dependency ordering.

use std::collections::HashSet;

use crate::error::{DatasetError, DatasetResult};
use crate::expr::field_references;
use crate::model::DatasetField;

/// Computed fields that `field_id` depends on, dependencies first, ending
/// with the field itself.
///
/// Non-computed fields end the walk. A field reached again while it is
/// still being resolved is a cycle; a field reached twice along different
/// paths is listed once.
pub fn resolve_dependencies(
    fields: &[DatasetField],
    field_id: &str,
) -> DatasetResult<Vec<DatasetField>> {
    let root = fields
        .iter()
        .find(|f| f.id == field_id)
        .ok_or_else(|| DatasetError::not_found("field"))?;

    let mut walk = Walk {
        fields,
        in_progress: HashSet::new(),
        done: HashSet::new(),
        ordered: Vec::new(),
    };
    walk.visit(root)?;
    Ok(walk.ordered)
}

struct Walk<'a> {
    fields: &'a [DatasetField],
    in_progress: HashSet<&'a str>,
    done: HashSet<&'a str>,
    ordered: Vec<DatasetField>,
}

impl<'a> Walk<'a> {
    fn visit(&mut self, field: &'a DatasetField) -> DatasetResult<()> {
        if self.done.contains(field.id.as_str()) {
            return Ok(());
        }
        if !self.in_progress.insert(&field.id) {
            return Err(DatasetError::Cycle(field.name.clone()));
        }

        if let Some(expression) = field.computed_expression() {
            let fields = self.fields;
            for name in field_references(expression) {
                let dependency = fields
                    .iter()
                    .find(|f| f.name == name && f.is_computed);
                if let Some(dependency) = dependency {
                    self.visit(dependency)?;
                }
            }
        }

        self.in_progress.remove(field.id.as_str());
        self.done.insert(&field.id);
        if field.is_computed {
            self.ordered.push(field.clone());
        }
        Ok(())
    }
}
