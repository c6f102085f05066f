use super::*;
use indexmap::IndexMap;
use quarry_schema::{
    Column, ForeignKey, JsonType, RefAction, TableKind, derive_relationships,
};
use std::sync::Mutex;

fn column(name: &str) -> Column {
    Column {
        name: name.to_string(),
        position: 1,
        type_name: "int8".to_string(),
        type_oid: 20,
        nullable: true,
        primary_key: false,
        is_enum: false,
        enum_values: vec![],
        is_array: false,
        is_json: false,
        json_type: JsonType::Integer,
        default_expr: None,
        comment: None,
    }
}

fn table(name: &str, columns: &[&str]) -> Table {
    Table {
        schema: "public".to_string(),
        name: name.to_string(),
        kind: TableKind::Table,
        columns: columns.iter().map(|c| column(c)).collect(),
        primary_key: vec!["id".to_string()],
        foreign_keys: vec![],
        indexes: vec![],
        relationships: vec![],
        comment: None,
    }
}

fn fk(name: &str, columns: &[&str], ref_table: &str) -> ForeignKey {
    ForeignKey {
        constraint_name: name.to_string(),
        columns: columns.iter().map(|s| s.to_string()).collect(),
        referenced_schema: "public".to_string(),
        referenced_table: ref_table.to_string(),
        referenced_columns: vec!["id".to_string()],
        on_update: RefAction::NoAction,
        on_delete: RefAction::NoAction,
    }
}

/// posts.author_id -> users.id, posts.editor_id -> users.id
fn snapshot() -> Snapshot {
    let mut tables = IndexMap::new();
    let mut posts = table("posts", &["id", "title", "author_id", "editor_id"]);
    posts.foreign_keys.push(fk("posts_author_id_fkey", &["author_id"], "users"));
    posts.foreign_keys.push(fk("posts_editor_id_fkey", &["editor_id"], "users"));
    tables.insert(posts.key(), posts);
    let users = table("users", &["id", "name"]);
    tables.insert(users.key(), users);
    derive_relationships(&mut tables);

    Snapshot {
        tables,
        ..Snapshot::default()
    }
}

fn record(pairs: &[(&str, Value)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Canned record source that counts queries per target table.
struct FakeSource {
    calls: Mutex<Vec<(String, String, Vec<Value>)>>,
    responses: Mutex<HashMap<String, Vec<Record>>>,
    failing: bool,
}

impl FakeSource {
    fn new() -> Self {
        Self {
            calls: Mutex::new(vec![]),
            responses: Mutex::new(HashMap::new()),
            failing: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: Mutex::new(vec![]),
            responses: Mutex::new(HashMap::new()),
            failing: true,
        }
    }

    fn respond(self, table: &str, records: Vec<Record>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(table.to_string(), records);
        self
    }

    fn calls(&self) -> Vec<(String, String, Vec<Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl RecordSource for FakeSource {
    fn query_records<'a>(
        &'a self,
        table: &'a str,
        sql: &'a str,
        args: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>, Error>> + Send + 'a>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push((table.to_string(), sql.to_string(), args.to_vec()));
            if self.failing {
                return Err(Error::UnknownTable(table.to_string()));
            }
            Ok(self
                .responses
                .lock()
                .unwrap()
                .get(table)
                .cloned()
                .unwrap_or_default())
        })
    }
}

fn users_rows() -> Vec<Record> {
    vec![
        record(&[("id", Value::I64(1)), ("name", Value::from("ada"))]),
        record(&[("id", Value::I64(2)), ("name", Value::from("grace"))]),
    ]
}

fn posts_table(snapshot: &Snapshot) -> &Table {
    snapshot.table("public.posts").unwrap()
}

#[tokio::test]
async fn test_many_to_one_batches_into_one_query() {
    let snapshot = snapshot();
    let source = FakeSource::new().respond("public.users", users_rows());

    // 100 records sharing one FK value: exactly one extra query.
    let mut records: Vec<Record> = (0..100)
        .map(|i| record(&[("id", Value::I64(i)), ("author_id", Value::I64(1))]))
        .collect();

    expand_with(&source, &snapshot, posts_table(&snapshot), &mut records, "author").await;

    let calls = source.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "public.users");
    assert_eq!(calls[0].2, vec![Value::I64(1)]);
    assert_eq!(
        calls[0].1,
        r#"SELECT "id", "name" FROM "public"."users" WHERE "id" IN ($1)"#
    );

    for rec in &records {
        let expand = rec.get("expand").and_then(Value::as_record).unwrap();
        let author = expand.get("author").and_then(Value::as_record).unwrap();
        assert_eq!(author.get("name"), Some(&Value::String("ada".to_string())));
    }
}

#[tokio::test]
async fn test_join_values_are_distinct_first_seen_non_null() {
    let snapshot = snapshot();
    let source = FakeSource::new().respond("public.users", users_rows());

    let mut records = vec![
        record(&[("id", Value::I64(1)), ("author_id", Value::I64(2))]),
        record(&[("id", Value::I64(2)), ("author_id", Value::Null)]),
        record(&[("id", Value::I64(3)), ("author_id", Value::I64(1))]),
        record(&[("id", Value::I64(4)), ("author_id", Value::I64(2))]),
    ];

    expand_with(&source, &snapshot, posts_table(&snapshot), &mut records, "author").await;

    let calls = source.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].2, vec![Value::I64(2), Value::I64(1)]);

    // The null-keyed record stays unexpanded.
    assert!(records[1].get("expand").is_none());
    assert!(records[0].get("expand").is_some());
}

#[tokio::test]
async fn test_raw_fk_column_name_resolves() {
    let snapshot = snapshot();
    let source = FakeSource::new().respond("public.users", users_rows());

    let mut records = vec![record(&[("id", Value::I64(1)), ("author_id", Value::I64(1))])];
    expand_with(&source, &snapshot, posts_table(&snapshot), &mut records, "author_id").await;

    // Resolution went through the FK column; attachment still uses the
    // relationship's field name.
    let expand = records[0].get("expand").and_then(Value::as_record).unwrap();
    assert!(expand.contains_key("author"));
}

#[tokio::test]
async fn test_unknown_segment_is_skipped_silently() {
    let snapshot = snapshot();
    let source = FakeSource::new();

    let mut records = vec![record(&[("id", Value::I64(1)), ("author_id", Value::I64(1))])];
    let before = records.clone();
    expand_with(&source, &snapshot, posts_table(&snapshot), &mut records, "nonexistent").await;

    assert!(source.calls().is_empty());
    assert_eq!(records, before);
}

#[tokio::test]
async fn test_one_to_many_attaches_lists() {
    let snapshot = snapshot();
    let posts_rows = vec![
        record(&[("id", Value::I64(10)), ("author_id", Value::I64(1))]),
        record(&[("id", Value::I64(11)), ("author_id", Value::I64(1))]),
        record(&[("id", Value::I64(12)), ("author_id", Value::I64(2))]),
    ];
    let source = FakeSource::new().respond("public.posts", posts_rows);

    let users = snapshot.table("public.users").unwrap();
    let mut records = vec![
        record(&[("id", Value::I64(1)), ("name", Value::from("ada"))]),
        record(&[("id", Value::I64(3)), ("name", Value::from("nobody"))]),
    ];

    expand_with(&source, &snapshot, users, &mut records, "posts").await;

    let expand = records[0].get("expand").and_then(Value::as_record).unwrap();
    let posts = expand.get("posts").unwrap();
    match posts {
        Value::Array(items) => assert_eq!(items.len(), 2),
        other => panic!("expected a list, got {other:?}"),
    }

    // No matching children: the field stays absent, not an empty list.
    assert!(records[1].get("expand").is_none());
}

#[tokio::test]
async fn test_expand_container_is_reused_across_relations() {
    let snapshot = snapshot();
    let source = FakeSource::new().respond("public.users", users_rows());

    let mut records = vec![record(&[
        ("id", Value::I64(1)),
        ("author_id", Value::I64(1)),
        ("editor_id", Value::I64(2)),
    ])];

    expand_with(&source, &snapshot, posts_table(&snapshot), &mut records, "author,editor").await;

    assert_eq!(source.calls().len(), 2);
    let expand = records[0].get("expand").and_then(Value::as_record).unwrap();
    assert!(expand.contains_key("author"));
    assert!(expand.contains_key("editor"));
}

#[tokio::test]
async fn test_nested_expansion_recurses_one_level() {
    let snapshot = snapshot();
    let posts_rows = vec![record(&[
        ("id", Value::I64(10)),
        ("author_id", Value::I64(2)),
    ])];
    let source = FakeSource::new()
        .respond("public.users", users_rows())
        .respond("public.posts", posts_rows);

    let users = snapshot.table("public.users").unwrap();
    let mut records = vec![record(&[("id", Value::I64(2)), ("name", Value::from("grace"))])];

    expand_with(&source, &snapshot, users, &mut records, "posts.author").await;

    assert_eq!(source.calls().len(), 2);
    let expand = records[0].get("expand").and_then(Value::as_record).unwrap();
    let posts = match expand.get("posts").unwrap() {
        Value::Array(items) => items,
        other => panic!("expected a list, got {other:?}"),
    };
    let post = posts[0].as_record().unwrap();
    let nested = post.get("expand").and_then(Value::as_record).unwrap();
    let author = nested.get("author").and_then(Value::as_record).unwrap();
    assert_eq!(author.get("name"), Some(&Value::String("grace".to_string())));
}

#[tokio::test]
async fn test_paths_deeper_than_two_are_truncated() {
    assert_eq!(
        parse_expand_spec("author.posts.author"),
        vec![vec!["author".to_string(), "posts".to_string()]]
    );
    assert_eq!(
        parse_expand_spec("author, , posts.author"),
        vec![
            vec!["author".to_string()],
            vec!["posts".to_string(), "author".to_string()],
        ]
    );
    assert!(parse_expand_spec("").is_empty());

    // End to end: the third level causes no extra query.
    let snapshot = snapshot();
    let posts_rows = vec![record(&[
        ("id", Value::I64(10)),
        ("author_id", Value::I64(1)),
    ])];
    let source = FakeSource::new()
        .respond("public.users", users_rows())
        .respond("public.posts", posts_rows);

    let users = snapshot.table("public.users").unwrap();
    let mut records = vec![record(&[("id", Value::I64(1)), ("name", Value::from("ada"))])];
    expand_with(&source, &snapshot, users, &mut records, "posts.author.posts").await;

    assert_eq!(source.calls().len(), 2);
}

#[tokio::test]
async fn test_query_failure_degrades_to_omission() {
    let snapshot = snapshot();
    let source = FakeSource::failing();

    let mut records = vec![record(&[("id", Value::I64(1)), ("author_id", Value::I64(1))])];
    let before = records.clone();
    expand_with(&source, &snapshot, posts_table(&snapshot), &mut records, "author").await;

    assert_eq!(source.calls().len(), 1);
    assert_eq!(records, before);
}

#[test]
fn test_join_key_rejects_non_scalars() {
    assert_eq!(join_key(&Value::Null), None);
    assert_eq!(join_key(&Value::Array(vec![])), None);
    assert_eq!(join_key(&Value::Record(Record::new())), None);
    assert_eq!(join_key(&Value::I64(7)), Some("7".to_string()));
    assert_eq!(join_key(&Value::String("x".to_string())), Some("x".to_string()));
}
