// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::status::StatusKind;

fn no_env() -> HashMap<String, String> {
    HashMap::new()
}

#[test]
fn parses_inline_and_split_flags() {
    let args = vec![
        "--group_name=phone".to_string(),
        "--home".to_string(),
        "/tmp/h".to_string(),
        "--verbose".to_string(),
    ];
    let (opts, rest) = SelectorOpts::parse(&args, &no_env()).unwrap();
    assert_eq!(opts.group_name.as_deref(), Some("phone"));
    assert_eq!(opts.home.as_deref(), Some("/tmp/h"));
    assert_eq!(rest, vec!["--verbose".to_string()]);
}

#[test]
fn missing_value_is_a_precondition_error() {
    let args = vec!["--group_name".to_string()];
    let err = SelectorOpts::parse(&args, &no_env()).unwrap_err();
    assert_eq!(err.kind, StatusKind::Precondition);
}

#[test]
fn env_instance_id_is_parsed() {
    let mut env = no_env();
    env.insert("CUTTLEFISH_INSTANCE".to_string(), "3".to_string());
    let (opts, _) = SelectorOpts::parse(&[], &env).unwrap();
    assert_eq!(opts.instance_id, Some(3));
}

#[test]
fn non_numeric_env_instance_id_rejected() {
    let mut env = no_env();
    env.insert("CUTTLEFISH_INSTANCE".to_string(), "phone".to_string());
    assert!(SelectorOpts::parse(&[], &env).is_err());
}

#[test]
fn queries_cover_all_set_fields() {
    let opts = SelectorOpts {
        group_name: Some("phone".to_string()),
        instance_name: Some("cvd-2".to_string()),
        home: Some("/tmp/h".to_string()),
        instance_id: Some(2),
    };
    let queries = opts.queries();
    assert_eq!(queries.len(), 4);
    assert!(queries.contains(&Query::new(FieldName::GroupName, "phone")));
    assert!(queries.contains(&Query::new(FieldName::InstanceId, "2")));
}

#[test]
fn empty_selector() {
    let (opts, _) = SelectorOpts::parse(&[], &no_env()).unwrap();
    assert!(opts.is_empty());
    assert!(opts.queries().is_empty());
}
