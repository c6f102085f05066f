//! Relationship derivation from foreign keys.

use crate::{Relationship, RelationshipKind, Table, table_key};
use indexmap::IndexMap;

/// Derive the expansion field name for the owning side of a foreign key.
///
/// A single-column foreign key named `author_id` yields the field
/// `author`; anything else falls back to the referenced table's name.
pub fn relationship_field_name(columns: &[String], referenced_table: &str) -> String {
    if let [column] = columns
        && let Some(stem) = column.strip_suffix("_id")
        && !stem.is_empty()
    {
        return stem.to_string();
    }
    referenced_table.to_string()
}

/// Derive [`Relationship`]s for every table from its foreign keys.
///
/// Each foreign key yields exactly one forward many-to-one relationship
/// on the owning table, plus a reverse one-to-many relationship on the
/// referenced table when that table is part of the same table set (it
/// may not be, e.g. when it lives in an excluded schema).
///
/// Existing relationships are replaced wholesale, so this is safe to run
/// on a freshly loaded table set exactly once.
pub fn derive_relationships(tables: &mut IndexMap<String, Table>) {
    let mut forward: Vec<(String, Relationship)> = Vec::new();
    let mut reverse: Vec<(String, Relationship)> = Vec::new();

    for table in tables.values() {
        for fk in &table.foreign_keys {
            let field_name = relationship_field_name(&fk.columns, &fk.referenced_table);
            forward.push((
                table.key(),
                Relationship {
                    name: fk.constraint_name.clone(),
                    kind: RelationshipKind::ManyToOne,
                    from_schema: table.schema.clone(),
                    from_table: table.name.clone(),
                    from_columns: fk.columns.clone(),
                    to_schema: fk.referenced_schema.clone(),
                    to_table: fk.referenced_table.clone(),
                    to_columns: fk.referenced_columns.clone(),
                    field_name,
                },
            ));

            let referenced_key = table_key(&fk.referenced_schema, &fk.referenced_table);
            if let Some(referenced) = tables.get(&referenced_key) {
                reverse.push((
                    referenced_key,
                    Relationship {
                        name: format!("{}_via_{}", table.name, fk.constraint_name),
                        kind: RelationshipKind::OneToMany,
                        from_schema: referenced.schema.clone(),
                        from_table: referenced.name.clone(),
                        from_columns: fk.referenced_columns.clone(),
                        to_schema: table.schema.clone(),
                        to_table: table.name.clone(),
                        to_columns: fk.columns.clone(),
                        field_name: table.name.clone(),
                    },
                ));
            }
        }
    }

    for table in tables.values_mut() {
        table.relationships.clear();
    }
    for (key, rel) in forward.into_iter().chain(reverse) {
        if let Some(table) = tables.get_mut(&key) {
            table.relationships.push(rel);
        }
    }
}
