use super::*;

fn column(name: &str, json_type: JsonType) -> Column {
    Column {
        name: name.to_string(),
        position: 1,
        type_name: "text".to_string(),
        type_oid: 25,
        nullable: true,
        primary_key: false,
        is_enum: false,
        enum_values: vec![],
        is_array: false,
        is_json: false,
        json_type,
        default_expr: None,
        comment: None,
    }
}

fn sample_table() -> Table {
    Table {
        schema: "public".to_string(),
        name: "users".to_string(),
        kind: TableKind::Table,
        columns: vec![
            column("id", JsonType::Integer),
            column("email", JsonType::String),
        ],
        primary_key: vec!["id".to_string()],
        foreign_keys: vec![],
        indexes: vec![],
        relationships: vec![],
        comment: None,
    }
}

#[test]
fn test_table_key() {
    assert_eq!(table_key("public", "users"), "public.users");
    assert_eq!(sample_table().key(), "public.users");
}

#[test]
fn test_table_column_lookup() {
    let table = sample_table();
    assert!(table.has_column("email"));
    assert!(!table.has_column("EMAIL"));
    assert!(table.column("missing").is_none());
}

#[test]
fn test_snapshot_lookup() {
    let mut snapshot = Snapshot::default();
    let table = sample_table();
    snapshot.tables.insert(table.key(), table);

    assert!(snapshot.table("public.users").is_some());
    assert!(snapshot.table_named("public", "users").is_some());
    assert!(snapshot.table_named("public", "posts").is_none());
}

#[test]
fn test_table_kind_from_relkind() {
    assert_eq!(TableKind::from_relkind("r"), Some(TableKind::Table));
    assert_eq!(TableKind::from_relkind("v"), Some(TableKind::View));
    assert_eq!(TableKind::from_relkind("m"), Some(TableKind::MaterializedView));
    assert_eq!(TableKind::from_relkind("p"), Some(TableKind::PartitionedTable));
    assert_eq!(TableKind::from_relkind("i"), None);
    assert_eq!(TableKind::from_relkind("S"), None);
}

#[test]
fn test_ref_action_from_code() {
    assert_eq!(RefAction::from_code("a"), RefAction::NoAction);
    assert_eq!(RefAction::from_code("r"), RefAction::Restrict);
    assert_eq!(RefAction::from_code("c"), RefAction::Cascade);
    assert_eq!(RefAction::from_code("n"), RefAction::SetNull);
    assert_eq!(RefAction::from_code("d"), RefAction::SetDefault);
}
