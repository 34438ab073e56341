//! End-to-end model behavior: loading, referential integrity, mutation.

use std::sync::Arc;

use epmodel::{
    CheckOptions, Epm, EpmError, Idd, Pk, ReferentialError, ValidationError, Value, ValueRef,
};

const FIXTURE_IDD: &str = "\
!IDD_Version 9.4.0
\\group Thermal Zones

Zone,
   A1, \\field Name
       \\required-field
       \\reference ZoneNames
   N1, \\field Direction of Relative North
       \\units deg
       \\default 0.0
   N2, \\field Volume

Wall,
   A1, \\field Name
       \\required-field
       \\reference WallNames
   A2, \\field Zone Name
       \\type object-list
       \\object-list ZoneNames
   N1, \\field Area

ZoneList,
   \\extensible:1
   A1, \\field Name
       \\required-field
       \\reference ZoneListNames
   A2, \\field Zone 1 Name
       \\begin-extensible
       \\type object-list
       \\object-list ZoneNames

Schedule:Compact,
   \\extensible:1
   A1, \\field Name
       \\required-field
       \\reference ScheduleNames
   A2, \\field Schedule Type Limits Name
   A3, \\field Field 1
       \\begin-extensible

HVACSystem,
   A1, \\field Name
       \\required-field
       \\reference SystemNames
       \\reference-class-name SystemTypes

Controller,
   A1, \\field Name
       \\required-field
       \\reference ControllerNames
   A2, \\field System Type
       \\type object-list
       \\object-list SystemTypes
";

fn idd() -> Arc<Idd> {
    Arc::new(Idd::parse(FIXTURE_IDD).expect("fixture grammar parses"))
}

#[test]
fn test_load_resolves_forward_references() {
    // The wall appears before the zone it points at; phase ordering makes
    // declaration order irrelevant.
    let text = "\
Wall, North, Kitchen, 12.5;
Zone, Kitchen, 0.0, 250.0;
";
    let epm = Epm::load_str(idd(), text).unwrap();
    let wall = epm.view("Wall", &Pk::from("north")).unwrap();
    let zone = wall.get("zone_name").unwrap().as_record().unwrap();
    assert_eq!(zone.pk(), Pk::from("kitchen"));
}

#[test]
fn test_load_refuses_duplicate_pk() {
    let text = "\
Zone, Kitchen;
Zone, Kitchen;
";
    let err = Epm::load_str(idd(), text).unwrap_err();
    assert!(matches!(
        err,
        EpmError::Validation(ValidationError::DuplicatePrimaryKey { .. })
    ));
}

#[test]
fn test_load_refuses_unknown_table() {
    let err = Epm::load_str(idd(), "Roof, R1;").unwrap_err();
    assert!(matches!(
        err,
        EpmError::Validation(ValidationError::UnknownTable { .. })
    ));
}

#[test]
fn test_failed_batch_rolls_back() {
    let mut epm = Epm::load_str(idd(), "Zone, Kitchen, 0.0, 250.0;").unwrap();
    let hooks = epm.relations().record_hook_count();
    let links = epm.relations().link_count();

    let err = epm
        .batch_add(vec![
            ("Zone".to_string(), vec!["Attic".into()]),
            ("Wall".to_string(), vec!["North".into(), "Attic".into()]),
            ("Wall".to_string(), vec!["South".into(), "Ghost".into()]),
        ])
        .unwrap_err();
    assert!(matches!(
        err,
        EpmError::Validation(ValidationError::UnresolvedLink { .. })
    ));

    assert_eq!(epm.record_count(), 1);
    assert_eq!(epm.relations().record_hook_count(), hooks);
    assert_eq!(epm.relations().link_count(), links);
}

#[test]
fn test_shared_value_across_reference_sets() {
    // Zone and ZoneList names live under different reference sets, so
    // sharing a name across them is fine; a second claim under the same
    // set is not.
    let mut epm = Epm::load_str(idd(), "Zone, Shared;\nZoneList, Shared, Shared;").unwrap();

    let err = epm
        .add("Zone", vec!["Shared".into()])
        .unwrap_err();
    assert!(matches!(
        err,
        EpmError::Validation(ValidationError::DuplicatePrimaryKey { .. })
    ));
    assert_eq!(epm.record_count(), 2);
}

#[test]
fn test_delete_cascade_and_strict() {
    let text = "\
Zone, Kitchen, 0.0, 250.0;
Wall, North, Kitchen, 12.5;
";
    let mut epm = Epm::load_str(idd(), text).unwrap();

    let err = epm.delete_strict("Zone", &Pk::from("kitchen")).unwrap_err();
    match err {
        EpmError::Referential(ReferentialError::PointedRecordDelete { pointing, .. }) => {
            assert_eq!(pointing, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(epm.record_count(), 2);

    epm.delete("Zone", &Pk::from("kitchen")).unwrap();
    let wall = epm.view("Wall", &Pk::from("north")).unwrap();
    assert!(wall.get("zone_name").unwrap().is_null());
    assert_eq!(epm.relations().link_count(), 0);
}

#[test]
fn test_rename_cascades_to_pointers() {
    let text = "\
Zone, Kitchen, 0.0, 250.0;
Wall, North, Kitchen, 12.5;
";
    let mut epm = Epm::load_str(idd(), text).unwrap();
    epm.update("Zone", &Pk::from("kitchen"), 0, "Pantry".into())
        .unwrap();

    assert!(epm.view("Zone", &Pk::from("pantry")).is_ok());
    let wall = epm.view("Wall", &Pk::from("north")).unwrap();
    assert!(wall.get("zone_name").unwrap().is_null());
}

#[test]
fn test_extensible_record_beyond_declared_fields() {
    let text = "\
Zone, A; Zone, B; Zone, C;
ZoneList, Everything, A, B, C;
";
    let mut epm = Epm::load_str(idd(), text).unwrap();
    let pk = Pk::from("everything");

    {
        let list = epm.view("ZoneList", &pk).unwrap();
        assert_eq!(list.len(), 4);
        assert_eq!(
            list.get("zone_3_name").unwrap().as_record().unwrap().pk(),
            Pk::from("c")
        );
    }

    let popped = epm.pop("ZoneList", &pk).unwrap();
    assert_eq!(popped, Value::Str("c".into()));
    epm.insert("ZoneList", &pk, 1, "C".into()).unwrap();

    let list = epm.view("ZoneList", &pk).unwrap();
    let order: Vec<String> = (1..list.len())
        .map(|i| list.value(i).unwrap().to_string())
        .collect();
    assert_eq!(order, ["c", "a", "b"]);
}

#[test]
fn test_table_hook_resolution() {
    let text = "\
HVACSystem, Main Loop;
Controller, C1, HVACSystem;
";
    let epm = Epm::load_str(idd(), text).unwrap();
    let controller = epm.view("Controller", &Pk::from("c1")).unwrap();
    match controller.get("system_type").unwrap() {
        ValueRef::Table(table) => assert_eq!(table.table_ref(), "hvacsystem"),
        _ => panic!("expected a table target"),
    }
}

#[test]
fn test_schedule_compact_retains_case() {
    // The grammar omits retaincase on schedule directives; the correction
    // pass restores it from the third field on.
    let text = "\
Schedule:Compact,
    Office Occupancy,
    Any Number,
    Through: 12/31,
    For: AllDays,
    Until: 24:00;
";
    let epm = Epm::load_str(idd(), text).unwrap();
    let schedule = epm.view("Schedule:Compact", &Pk::from("office occupancy")).unwrap();
    // Field 1 folds; fields 2.. retain case.
    assert_eq!(schedule.value(1).unwrap(), Value::Str("any number".into()));
    assert_eq!(
        schedule.value(2).unwrap(),
        Value::Str("Through: 12/31".into())
    );
    assert_eq!(schedule.value(4).unwrap(), Value::Str("Until: 24:00".into()));
}

#[test]
fn test_set_defaults_fills_only_unset() {
    let mut epm = Epm::load_str(idd(), "Zone, Kitchen, , 250.0;").unwrap();
    epm.set_defaults("Zone", &Pk::from("kitchen")).unwrap();

    let zone = epm.view("Zone", &Pk::from("kitchen")).unwrap();
    assert_eq!(
        zone.get("direction_of_relative_north").unwrap().as_real(),
        Some(0.0)
    );
    assert_eq!(zone.get("volume").unwrap().as_real(), Some(250.0));
}

#[test]
fn test_select_and_one_cardinality() {
    let text = "\
Zone, A, 0.0, 100.0;
Zone, B, 0.0, 200.0;
Zone, C, 0.0, 300.0;
";
    let epm = Epm::load_str(idd(), text).unwrap();
    let zones = epm.table("Zone").unwrap();

    let big = zones.select(|r| r.value(2).as_real().is_some_and(|v| v > 150.0));
    assert_eq!(big.len(), 2);

    let only = zones
        .one(|r| r.value(2).as_real() == Some(300.0))
        .unwrap();
    assert_eq!(only.pk(), Pk::from("c"));
    assert!(zones.one(|_| true).is_err());
}

#[test]
fn test_required_field_check_is_optional() {
    let text = "Zone, , 0.0, 250.0;";
    let err = Epm::load_str(idd(), text).unwrap_err();
    assert!(matches!(
        err,
        EpmError::Validation(ValidationError::MissingRequiredField { .. })
    ));

    let epm = Epm::load_with_options(idd(), text, CheckOptions::none()).unwrap();
    assert_eq!(epm.record_count(), 1);
}

#[test]
fn test_keyless_records_get_stable_identity() {
    let mut epm = Epm::with_options(idd(), CheckOptions::none());
    let a = epm.add("Zone", vec![Value::Null, 0.0.into(), 1.0.into()]).unwrap();
    let b = epm.add("Zone", vec![Value::Null, 0.0.into(), 2.0.into()]).unwrap();
    assert_ne!(a.slot, b.slot);

    let zones = epm.table("Zone").unwrap();
    let volumes: Vec<Value> = zones.records().map(|r| r.value(2)).collect();
    // Generated identities keep insertion order.
    assert_eq!(volumes, vec![Value::Real(1.0), Value::Real(2.0)]);
}

#[test]
fn test_copy_deep_enough() {
    let text = "\
Zone, Kitchen, 0.0, 250.0;
Wall, North, Kitchen, 12.5;
";
    let mut epm = Epm::load_str(idd(), text).unwrap();
    epm.copy("Wall", &Pk::from("north"), Some("South")).unwrap();

    let south = epm.view("Wall", &Pk::from("south")).unwrap();
    assert_eq!(
        south.get("zone_name").unwrap().as_record().unwrap().pk(),
        Pk::from("kitchen")
    );

    let zone = epm.view("Zone", &Pk::from("kitchen")).unwrap();
    assert_eq!(zone.pointing().len(), 2);
}
