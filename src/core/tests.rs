//! Rule list scenarios across controller, store and script codec

#[cfg(test)]
mod tests_impl {
    use crate::core::controller::RuleListController;
    use crate::core::error::Error;
    use crate::core::rule::{Action, Direction, IpVersion, Protocol, Rule};
    use crate::core::script::{export, import};
    use crate::core::store::{MemoryStore, RuleStore, StoreChange};
    use crate::core::test_helpers::{app_rule, port_rule, store_with_five_rules, varied_rules};

    fn ports(store: &MemoryStore) -> Vec<String> {
        store
            .rules()
            .unwrap()
            .into_iter()
            .map(|r| r.destination_port)
            .collect()
    }

    #[test]
    fn test_insert_resets_neighbouring_positions() {
        let mut ctl = RuleListController::new(store_with_five_rules());
        ctl.insert(&port_rule(Action::Deny, "80").with_position(3))
            .unwrap();

        assert_eq!(
            ctl.store().changes(),
            [
                StoreChange::Inserted {
                    position: 3,
                    ip_version: IpVersion::Both
                },
                StoreChange::PositionReset { position: 2 },
                StoreChange::PositionReset { position: 3 },
                StoreChange::PositionReset { position: 4 },
            ]
        );
        assert_eq!(ports(ctl.store()), ["21", "22", "80", "23", "24", "25"]);
        assert_eq!(ctl.store().rule_at(3).unwrap().position, 0);
    }

    #[test]
    fn test_insert_at_first_position_resets_two() {
        let mut ctl = RuleListController::new(store_with_five_rules());
        ctl.insert(&port_rule(Action::Deny, "80").with_position(1))
            .unwrap();
        let resets: Vec<_> = ctl
            .store()
            .changes()
            .iter()
            .filter_map(|c| match c {
                StoreChange::PositionReset { position } => Some(*position),
                _ => None,
            })
            .collect();
        assert_eq!(resets, [1, 2]);
    }

    #[test]
    fn test_insert_past_end_appends_without_resets() {
        let mut ctl = RuleListController::new(store_with_five_rules());
        let msg = ctl
            .insert(&port_rule(Action::Allow, "8080").with_position(99))
            .unwrap();

        assert_eq!(msg, "Rule added");
        assert_eq!(
            ctl.store().changes(),
            [StoreChange::Inserted {
                position: 6,
                ip_version: IpVersion::Both
            }]
        );
    }

    #[test]
    fn test_insert_resolves_ip_version() {
        let mut ctl = RuleListController::new(MemoryStore::new());
        ctl.insert(&Rule::new(Action::Deny).with_source("2001:db8::1"))
            .unwrap();
        ctl.insert_pinned(&port_rule(Action::Allow, "22"), IpVersion::V4)
            .unwrap();

        let versions: Vec<_> = ctl
            .store()
            .changes()
            .iter()
            .filter_map(|c| match c {
                StoreChange::Inserted { ip_version, .. } => Some(*ip_version),
                _ => None,
            })
            .collect();
        assert_eq!(versions, [IpVersion::V6, IpVersion::V4]);
    }

    #[test]
    fn test_invalid_rule_never_reaches_store() {
        let mut ctl = RuleListController::new(store_with_five_rules());

        let mixed = Rule::new(Action::Allow)
            .with_source("10.0.0.1")
            .with_destination("2001:db8::1");
        assert!(matches!(
            ctl.insert(&mixed),
            Err(Error::MixedAddressFamily { .. })
        ));

        let bad_port = port_rule(Action::Allow, "70000");
        assert!(ctl.insert(&bad_port).unwrap_err().is_validation());

        // A port list needs a protocol
        let list = Rule::new(Action::Allow).with_destination_port("80,443");
        assert!(ctl.insert(&list).unwrap_err().is_validation());

        assert!(ctl.store().changes().is_empty());
    }

    #[test]
    fn test_app_rules_are_stored_fixed_up() {
        let mut ctl = RuleListController::new(MemoryStore::new());
        ctl.insert(&app_rule("OpenSSH").with_protocol(Protocol::Tcp))
            .unwrap();
        let stored = ctl.store().rule_at(1).unwrap();
        assert_eq!(stored.protocol, Protocol::Any);
        assert_eq!(stored.destination_port, "OpenSSH");
    }

    #[test]
    fn test_move_to_same_position_does_nothing() {
        let mut ctl = RuleListController::new(store_with_five_rules());
        assert_eq!(ctl.move_rule(3, 3).unwrap(), None);
        assert!(ctl.store().changes().is_empty());
        assert_eq!(ctl.store().mutation_count(), 0);
    }

    #[test]
    fn test_move_rule_up() {
        let mut ctl = RuleListController::new(store_with_five_rules());
        assert!(ctl.move_rule(4, 1).unwrap().is_some());
        assert_eq!(ports(ctl.store()), ["24", "21", "22", "23", "25"]);
        assert_eq!(ctl.store().len(), 5);
    }

    #[test]
    fn test_move_missing_rule_is_untouched() {
        let mut ctl = RuleListController::new(store_with_five_rules());
        assert!(matches!(ctl.move_rule(9, 1), Err(Error::NoSuchRule(9))));
        assert!(ctl.store().changes().is_empty());
    }

    #[test]
    fn test_update_replaces_in_place() {
        let mut ctl = RuleListController::new(store_with_five_rules());
        ctl.update(2, &port_rule(Action::Deny, "8080")).unwrap();

        assert_eq!(ports(ctl.store()), ["21", "8080", "23", "24", "25"]);
        assert_eq!(ctl.store().rule_at(2).unwrap().action, Action::Deny);
    }

    #[test]
    fn test_update_partial_failure_is_reported() {
        let mut ctl = RuleListController::new(store_with_five_rules());
        ctl.store_mut().fail_inserts_with("ERROR: Bad port");

        let err = ctl.update(2, &port_rule(Action::Deny, "8080")).unwrap_err();
        assert!(err.is_partial());
        match err {
            Error::Incomplete { completed, source } => {
                assert!(completed.contains("deleted rule 2"));
                assert!(matches!(*source, Error::Store { .. }));
            }
            other => panic!("unexpected: {other:?}"),
        }
        // The old rule is gone and nothing replaced it
        assert_eq!(ctl.store().len(), 4);
    }

    #[test]
    fn test_update_validation_leaves_store_untouched() {
        let mut ctl = RuleListController::new(store_with_five_rules());
        let mixed = Rule::new(Action::Allow)
            .with_source("10.0.0.1")
            .with_destination("::1");
        assert!(ctl.update(2, &mixed).unwrap_err().is_validation());
        assert!(matches!(
            ctl.update(9, &port_rule(Action::Allow, "1")),
            Err(Error::NoSuchRule(9))
        ));
        assert!(ctl.store().changes().is_empty());
    }

    #[test]
    fn test_listing_collapses_expanded_profile_rules() {
        // ufw stores one rule per protocol for a tcp+udp profile
        let samba_tcp = app_rule("Samba").with_protocol(Protocol::Tcp);
        let samba_udp = app_rule("Samba").with_protocol(Protocol::Udp);
        let store = MemoryStore::new().with_rules(vec![
            port_rule(Action::Allow, "22"),
            samba_tcp,
            samba_udp,
            port_rule(Action::Allow, "80"),
        ]);
        let ctl = RuleListController::new(store);

        let listing = ctl.list_rules().unwrap();
        let indices: Vec<usize> = listing.iter().map(|(i, _)| i).collect();
        assert_eq!(indices, [0, 1, 3]);
        assert_eq!(listing.store_len(), 4);

        // Iterating twice gives the same result
        assert_eq!(listing.iter().count(), (&listing).into_iter().count());

        let rows = ctl.display_rows().unwrap();
        assert_eq!(rows.last().unwrap().position(), 4);
        assert_eq!(rows[1].rule.destination_port, "Samba");
        assert_eq!(rows[1].rule.protocol, "-");
    }

    #[test]
    fn test_listing_collapses_source_app_rules() {
        let from_dns = |proto| {
            Rule::new(Action::Allow)
                .with_source_app("Bind9")
                .with_protocol(proto)
        };
        let ctl = RuleListController::new(
            MemoryStore::new().with_rules(vec![from_dns(Protocol::Tcp), from_dns(Protocol::Udp)]),
        );
        assert_eq!(ctl.list_rules().unwrap().iter().count(), 1);
    }

    #[test]
    fn test_profile_rules_on_different_interfaces_are_kept() {
        let store = MemoryStore::new().with_rules(vec![
            app_rule("OpenSSH").with_interface_in("eth0"),
            app_rule("OpenSSH").with_interface_in("eth1"),
        ]);
        let ctl = RuleListController::new(store);
        assert_eq!(ctl.list_rules().unwrap().iter().count(), 2);
    }

    #[test]
    fn test_reload_only_when_enabled() {
        let mut ctl = RuleListController::new(MemoryStore::new());
        assert!(ctl.reload().unwrap());
        assert_eq!(
            ctl.store().changes(),
            [StoreChange::Enabled(false), StoreChange::Enabled(true)]
        );

        let mut inactive = RuleListController::new(MemoryStore::new().with_enabled(false));
        assert!(!inactive.reload().unwrap());
        assert!(inactive.store().changes().is_empty());
    }

    #[test]
    fn test_allow_event_appends_matching_rule() {
        let event = crate::core::events::parse(
            "Oct 19 08:15:02 gw kernel: [UFW BLOCK] IN=eth0 OUT= SRC=198.51.100.23 \
             DST=192.0.2.10 PROTO=UDP SPT=5353 DPT=5353",
        )
        .unwrap();
        let mut ctl = RuleListController::new(store_with_five_rules());

        assert_eq!(ctl.allow_event(&event).unwrap(), "Rule added");
        let added = ctl.store().rule_at(6).unwrap();
        assert_eq!(added.protocol, Protocol::Udp);
        assert_eq!(added.source_address, "198.51.100.23");
        assert_eq!(added.destination_port, "5353");
        assert_eq!(
            ctl.store().changes(),
            [StoreChange::Inserted {
                position: 6,
                ip_version: IpVersion::V4
            }]
        );

        // Allowing the same connection twice adds nothing
        ctl.allow_event(&event).unwrap();
        assert_eq!(ctl.store().len(), 6);
    }

    #[test]
    fn test_reset_leaves_nothing_to_reload() {
        let mut ctl = RuleListController::new(store_with_five_rules());
        ctl.reset().unwrap();
        assert!(ctl.list_rules().unwrap().iter().next().is_none());
        assert!(!ctl.reload().unwrap());
        assert_eq!(ctl.store().changes(), [StoreChange::Reset]);
    }

    #[test]
    fn test_ipt_modules_are_edited_as_quoted_list() {
        let mut ctl = RuleListController::new(MemoryStore::new());
        ctl.set_ipt_module("nf_nat_ftp", true).unwrap();
        assert_eq!(
            ctl.store().default_value("IPT_MODULES").unwrap().as_deref(),
            Some("\"nf_conntrack_ftp nf_nat_ftp\"")
        );

        ctl.set_ipt_module("nf_conntrack_ftp", false).unwrap();
        assert_eq!(ctl.ipt_modules().unwrap(), ["nf_nat_ftp"]);

        // Adding twice keeps one entry
        ctl.set_ipt_module("nf_nat_ftp", true).unwrap();
        assert_eq!(ctl.ipt_modules().unwrap(), ["nf_nat_ftp"]);

        assert!(ctl.set_ipt_module("bad name", true).unwrap_err().is_validation());
        assert!(ctl.set_ipt_module("", true).is_err());
    }

    #[test]
    fn test_ipv6_toggle_and_status() {
        let mut ctl = RuleListController::new(store_with_five_rules());
        ctl.set_ipv6(false).unwrap();
        ctl.set_default_policy(Direction::Out, crate::core::rule::Policy::Deny)
            .unwrap();

        let status = ctl.status().unwrap();
        assert!(status.enabled);
        assert!(!status.ipv6);
        assert_eq!(status.outgoing, crate::core::rule::Policy::Deny);
        assert_eq!(status.rule_count, 5);
    }

    #[test]
    fn test_export_then_import_into_empty_store() {
        let source = RuleListController::new(MemoryStore::new().with_rules(varied_rules()));
        let mut script = Vec::new();
        let written = export(&source, &mut script).unwrap();
        assert_eq!(written, 5);

        let text = String::from_utf8(script).unwrap();
        assert!(text.starts_with("#!/bin/sh\n"));
        assert!(text.contains("ufw allow 'Apache Full'"));

        let mut target = RuleListController::new(MemoryStore::new());
        let report = import(text.as_bytes(), &mut target).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.applied.len(), 5);
        assert_eq!(target.store().len(), 5);
    }

    #[test]
    fn test_numeric_profile_name_survives_export() {
        let source = RuleListController::new(
            MemoryStore::new().with_rules(vec![app_rule("3proxy"), port_rule(Action::Allow, "3128")]),
        );
        let mut script = Vec::new();
        export(&source, &mut script).unwrap();

        let mut target = RuleListController::new(MemoryStore::new());
        let report = import(script.as_slice(), &mut target).unwrap();
        assert!(report.is_clean(), "skipped: {:?}", report.skipped);

        let imported = target.store().rules().unwrap();
        assert_eq!(imported[0].destination_app.as_deref(), Some("3proxy"));
        assert_eq!(imported[1].destination_port, "3128");
        assert!(imported[1].destination_app.is_none());
    }

    #[test]
    fn test_import_skips_bad_lines_and_continues() {
        let script = "#!/bin/sh\n\
            echo hello\n\
            ufw allow 22/tcp\n\
            ufw frobnicate 22\n\
            ufw allow from 10.0.0.1 to 2001:db8::1\n\
            ufw deny from 192.168.0.0/16\n";

        let mut ctl = RuleListController::new(MemoryStore::new());
        let report = import(script.as_bytes(), &mut ctl).unwrap();

        assert_eq!(report.applied.len(), 2);
        let skipped_lines: Vec<usize> = report
            .skipped
            .iter()
            .filter_map(|e| match e {
                Error::ImportFormat { line, .. } => Some(*line),
                _ => None,
            })
            .collect();
        assert_eq!(skipped_lines, [4, 5]);
        assert_eq!(ctl.store().len(), 2);
    }

    #[test]
    fn test_import_stops_on_store_failure() {
        let mut ctl = RuleListController::new(MemoryStore::new());
        ctl.store_mut().fail_inserts_with("ERROR: You need to be root to run this script");
        let err = import("ufw allow 22\nufw allow 80\n".as_bytes(), &mut ctl).unwrap_err();
        assert!(matches!(err, Error::Store { .. }));
    }
}

#[cfg(test)]
mod property_tests {
    use crate::core::controller::RuleListController;
    use crate::core::normalize::fixup_for_storage;
    use crate::core::rule::{Action, Direction, LogType, Protocol, Rule};
    use crate::core::script::{export, import};
    use crate::core::store::{MemoryStore, RuleStore};
    use crate::validators::validate_rule;
    use proptest::prelude::*;

    fn action() -> impl Strategy<Value = Action> {
        prop_oneof![
            Just(Action::Allow),
            Just(Action::Deny),
            Just(Action::Reject),
            Just(Action::Limit)
        ]
    }

    fn log_type() -> impl Strategy<Value = LogType> {
        prop_oneof![Just(LogType::None), Just(LogType::Log), Just(LogType::LogAll)]
    }

    /// Source and destination from the same family
    fn addresses() -> impl Strategy<Value = (String, String)> {
        let v4 = prop_oneof![
            Just("0.0.0.0/0".to_string()),
            Just("10.0.0.0/8".to_string()),
            Just("192.168.1.10".to_string()),
        ];
        let v6 = prop_oneof![
            Just("0.0.0.0/0".to_string()),
            Just("2001:db8::/32".to_string()),
            Just("fe80::1".to_string()),
        ];
        prop_oneof![(v4.clone(), v4), (v6.clone(), v6)]
    }

    /// `(port, app, protocol)` for the destination side
    fn destination() -> impl Strategy<Value = (String, Option<String>, Protocol)> {
        prop_oneof![
            Just(("any".to_string(), None, Protocol::Any)),
            Just(("22".to_string(), None, Protocol::Tcp)),
            Just(("53".to_string(), None, Protocol::Any)),
            Just(("6000:6007".to_string(), None, Protocol::Udp)),
            Just(("80,443".to_string(), None, Protocol::Tcp)),
            Just(("any".to_string(), Some("OpenSSH".to_string()), Protocol::Any)),
            Just(("any".to_string(), Some("Apache Full".to_string()), Protocol::Any)),
            // Profile names may start with a digit
            Just(("any".to_string(), Some("3proxy".to_string()), Protocol::Any)),
        ]
    }

    fn rule() -> impl Strategy<Value = Rule> {
        (
            action(),
            prop_oneof![Just(Direction::In), Just(Direction::Out)],
            addresses(),
            destination(),
            prop_oneof![Just("any"), Just("1024")],
            log_type(),
            proptest::option::of(prop_oneof![Just("eth0"), Just("wg0")]),
        )
            .prop_map(
                |(action, direction, (src, dst), (dport, dapp, proto), sport, log, iface)| {
                    let mut rule = Rule::new(action)
                        .with_direction(direction)
                        .with_protocol(proto)
                        .with_source(src)
                        .with_destination(dst)
                        .with_destination_port(dport)
                        .with_source_port(sport)
                        .with_log_type(log);
                    rule.destination_app = dapp;
                    match (direction, iface) {
                        (Direction::In, Some(i)) => rule.interface_in = Some(i.to_string()),
                        (Direction::Out, Some(i)) => rule.interface_out = Some(i.to_string()),
                        _ => {}
                    }
                    fixup_for_storage(&rule)
                },
            )
            .prop_filter("rule must validate", |r| validate_rule(r).is_ok())
    }

    /// Drops rules the store or the listing would collapse.
    fn distinct(rules: Vec<Rule>) -> Vec<Rule> {
        let mut kept: Vec<Rule> = Vec::new();
        for rule in rules {
            let clash = kept.iter().any(|k| {
                k.same_match(&rule) || (rule.app_key().is_some() && k.app_key() == rule.app_key())
            });
            if !clash {
                kept.push(rule);
            }
        }
        kept
    }

    proptest! {
        #[test]
        fn test_export_import_roundtrip(rules in proptest::collection::vec(rule(), 0..12)) {
            let rules = distinct(rules);
            let source = RuleListController::new(MemoryStore::new().with_rules(rules.clone()));

            let mut script = Vec::new();
            export(&source, &mut script).unwrap();

            let mut target = RuleListController::new(MemoryStore::new());
            let report = import(script.as_slice(), &mut target).unwrap();
            prop_assert!(report.is_clean(), "skipped: {:?}", report.skipped);

            let imported = target.store().rules().unwrap();
            prop_assert_eq!(imported.len(), rules.len());
            for (original, restored) in rules.iter().zip(&imported) {
                prop_assert!(
                    original.same_match(restored),
                    "{:?} != {:?}", original, restored
                );
            }
        }

        #[test]
        fn test_listing_positions_stay_in_range(rules in proptest::collection::vec(rule(), 0..12)) {
            let ctl = RuleListController::new(MemoryStore::new().with_rules(rules));
            let len = ctl.store().len();
            for row in ctl.display_rows().unwrap() {
                prop_assert!(row.position() >= 1 && row.position() <= len);
                prop_assert_eq!(row.number, row.position());
            }
        }
    }
}
