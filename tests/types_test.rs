//! SQLite Cloud Rust driver - value and parameter tests

use serde_json::json;
use sqlitecloud::{anonymize_command, Command, Param, Value};

#[test]
fn test_param_conversions() {
  assert_eq!(Param::from(7u8), Param::Integer(7));
  assert_eq!(Param::from(-3i32), Param::Integer(-3));
  assert_eq!(Param::from(1.5f64), Param::Real(1.5));
  assert_eq!(Param::from(false), Param::Bool(false));
  assert_eq!(Param::from("a"), Param::Text("a".to_string()));
  assert_eq!(Param::from(vec![1u8, 2]), Param::Blob(vec![1, 2]));
  assert_eq!(Param::from(None::<String>), Param::Null);
  assert_eq!(Param::from(Some(9i64)), Param::Integer(9));
}

#[test]
fn test_command_bind_order() {
  let command = Command::new("SELECT ?, ?").bind("x").bind(2);
  assert_eq!(
    command.params,
    vec![Param::Text("x".to_string()), Param::Integer(2)]
  );
  assert_eq!(Command::from("PING"), Command::new("PING"));
}

#[test]
fn test_value_from_json() {
  let value = Value::from_json(json!([true, 3, 2.5, "s", null, {"k": 1}]));
  assert_eq!(
    value,
    Value::Array(vec![
      Value::Integer(1),
      Value::Integer(3),
      Value::Float(2.5),
      Value::Text("s".to_string()),
      Value::Null,
      Value::Json(json!({"k": 1})),
    ])
  );
}

#[test]
fn test_value_to_json() {
  assert_eq!(Value::Blob(vec![0, 255]).to_json(), json!([0, 255]));
  assert_eq!(Value::Float(f64::NAN).to_json(), json!(null));
  assert_eq!(
    Value::Array(vec![Value::Integer(1), Value::Text("a".into())]).to_json(),
    json!([1, "a"])
  );
}

#[test]
fn test_value_accessors() {
  assert_eq!(Value::Integer(4).as_i64(), Some(4));
  assert_eq!(Value::Integer(4).as_f64(), Some(4.0));
  assert_eq!(Value::Text("t".into()).as_str(), Some("t"));
  assert!(Value::Null.is_null());
  assert!(Value::Text("t".into()).as_rowset().is_none());
}

#[test]
fn test_anonymize_command() {
  assert_eq!(
    anonymize_command("AUTH USER admin PASSWORD s3cr3t; USE DATABASE db;"),
    "AUTH USER admin PASSWORD ******; USE DATABASE db;"
  );
  assert_eq!(anonymize_command("auth apikey abc123"), "auth apikey ******");
}

#[test]
fn test_anonymize_leaves_queries_alone() {
  assert_eq!(anonymize_command("SELECT token FROM t"), "SELECT token FROM t");
  assert_eq!(
    anonymize_command("AUTH TOKEN abc; SELECT password, hash FROM users"),
    "AUTH TOKEN ******; SELECT password, hash FROM users"
  );
  assert_eq!(
    anonymize_command("AUTH USER bob HASH 9f86d0; USE DATABASE db;"),
    "AUTH USER bob HASH ******; USE DATABASE db;"
  );
}
