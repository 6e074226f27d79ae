//! Plan files: catalog declarations, execution settings and hints.


use quarry_core::catalog::Catalog;
use quarry_core::config::EngineConfig;
use quarry_core::error::ErrorKind;
use quarry_core::id::OperatorId;
use quarry_planner::{parse_yaml_plan, OperatorKind};

use plan_fixtures::{load, DB_NODE, LINEAR_CHAIN, THREE_WAY_JOIN};

const STORE: &str = r#"
connections:
  - { name: c1, url: "mysql://db1:3306/shop" }
schemas:
  - { name: shop, connection: c1 }
"#;

#[test]
fn catalog_is_populated_from_the_plan_file() {
    let parsed = load(THREE_WAY_JOIN);
    let conns = parsed.catalog.get_connections_for_table("items").unwrap();
    assert_eq!(conns.len(), 1);
    assert_eq!(conns[0].node.as_deref(), Some(DB_NODE));
    let items = parsed.catalog.get_table("items").unwrap();
    assert_eq!(items.connections, vec!["c1".to_string()]);
    assert_eq!(items.attributes.column_defs(), "i_order BIGINT, i_qty INT");
}

#[test]
fn join_output_schema_concatenates_inputs() {
    let parsed = load(THREE_WAY_JOIN);
    let join = parsed
        .plan
        .get(&OperatorId::from_parts(&[4, 4]))
        .unwrap();
    assert!(matches!(join.kind, OperatorKind::EquiJoin { .. }));
    assert_eq!(
        join.result.schema.names(),
        vec!["c_id", "c_name", "o_id", "o_cust", "o_total"]
    );
}

#[test]
fn hints_and_settings_are_read() {
    let parsed = load(LINEAR_CHAIN);
    assert_eq!(parsed.hints.table_rows.get("orders"), Some(&2_000_000));

    let src = format!(
        "{STORE}config: {{ policy: wishlist, slots_per_unit: 2, mtbf_secs: 900, retries: 3 }}\noperators:\n  - {{ id: 1, op: table_scan, table: t }}\ntables:\n  - {{ name: t, schema: shop, connections: [c1], attributes: [{{name: a, type: int}}] }}\n"
    );
    let parsed = parse_yaml_plan(&src).unwrap();
    assert_eq!(parsed.config.mtbf_secs, Some(900.0));
    assert_eq!(parsed.config.retries, Some(3));

    let mut cfg = EngineConfig::default();
    parsed.config.apply_to(&mut cfg);
    assert_eq!(cfg.scheduling_policy, "wishlist");
    assert_eq!(cfg.slots_per_unit, 2);
    assert_eq!(cfg.mttr_secs, EngineConfig::default().mttr_secs);
}

#[test]
fn duplicate_table_is_rejected() {
    let src = format!(
        "{STORE}tables:\n  - {{ name: t, schema: shop, attributes: [] }}\n  - {{ name: t, schema: shop, attributes: [] }}\noperators:\n  - {{ id: 1, op: table_scan, table: t }}\n"
    );
    let err = parse_yaml_plan(&src).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CatalogObjectAlreadyExists);
}

#[test]
fn unknown_catalog_references_are_rejected() {
    let src = format!(
        "{STORE}tables:\n  - {{ name: t, schema: other, attributes: [] }}\noperators:\n  - {{ id: 1, op: table_scan, table: t }}\n"
    );
    assert_eq!(
        parse_yaml_plan(&src).unwrap_err().kind(),
        ErrorKind::CatalogObjectNotFound
    );

    let src = format!("{STORE}operators:\n  - {{ id: 1, op: table_scan, table: missing }}\n");
    assert_eq!(
        parse_yaml_plan(&src).unwrap_err().kind(),
        ErrorKind::CatalogObjectNotFound
    );
}

#[test]
fn empty_and_malformed_plans_are_plan_errors() {
    assert_eq!(
        parse_yaml_plan("operators: []").unwrap_err().kind(),
        ErrorKind::Plan
    );
    assert_eq!(
        parse_yaml_plan("operators:\n  - { id: 1, op: teleport }")
            .unwrap_err()
            .kind(),
        ErrorKind::Plan
    );
}
