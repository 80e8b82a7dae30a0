//! Unit tests for intent extraction

#[cfg(test)]
mod tests {
    use crate::dn::UNKNOWN_FILTER;
    use crate::models::{FilterRule, PortSpec};
    use crate::watcher::{ApicWatcher, CONTRACT_CLASS, EPG_CLASS, FILTER_CLASS, HOST_PROT_POL_CLASS};
    use apic_client::{ApicObject, MockApicClient, Subscription, SubscriptionChange, SubscriptionEvent};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const EPG_DN: &str = "uni/tn-prod/cloudapp-shop/cloudepg-frontend";

    fn relation(class: &str, target: &str, contract: &str) -> ApicObject {
        ApicObject::new(class, "")
            .with_attr("tDn", target)
            .with_attr("tnVzBrCPName", contract)
    }

    fn frontend_epg() -> ApicObject {
        ApicObject::new(EPG_CLASS, EPG_DN)
            .with_attr("name", "frontend")
            .with_child(relation("fvRsProv", "uni/tn-prod/brc-web", "web"))
            .with_child(relation("fvRsCons", "uni/tn-common/brc-dns", "dns"))
            .with_child(ApicObject::new("tagAnnotation", ""))
    }

    fn entry(prot: &str, from: &str, to: &str) -> ApicObject {
        ApicObject::new("vzEntry", "")
            .with_attr("prot", prot)
            .with_attr("dFromPort", from)
            .with_attr("dToPort", to)
    }

    fn host_prot_pol(dn: &str) -> ApicObject {
        ApicObject::new(HOST_PROT_POL_CLASS, dn).with_attr("name", "np1").with_child(
            ApicObject::new("hostprotSubj", format!("{}/subj-ingress", dn))
                .with_attr("name", "ingress")
                .with_child(
                    ApicObject::new("hostprotRule", format!("{}/subj-ingress/rule-0", dn))
                        .with_attr("name", "rule-0")
                        .with_attr("direction", "ingress")
                        .with_attr("ethertype", "ipv4")
                        .with_attr("protocol", "tcp")
                        .with_attr("fromPort", "443")
                        .with_attr("toPort", "443")
                        .with_child(ApicObject::new("hostprotRemoteIp", "").with_attr("addr", "10.1.0.0/16")),
                ),
        )
    }

    #[test]
    fn test_epg_contracts_extracted() {
        let watcher = ApicWatcher::new("kube");
        watcher.epg_changed(&frontend_epg());

        let db = watcher.snapshot();
        let epg = &db.epgs["prod/frontend"];
        assert_eq!(epg.dn, EPG_DN);
        assert_eq!(epg.provided, vec!["prod/web"]);
        assert_eq!(epg.consumed, vec!["common/dns"]);
    }

    #[test]
    fn test_incomplete_relation_is_skipped() {
        let watcher = ApicWatcher::new("kube");
        let epg = ApicObject::new(EPG_CLASS, EPG_DN)
            .with_attr("name", "frontend")
            .with_child(relation("fvRsProv", "", "web"))
            .with_child(relation("fvRsProv", "uni/tn-prod/brc-api", ""))
            .with_child(relation("fvRsProv", "uni/tn-prod/brc-web", "web"));
        watcher.epg_changed(&epg);

        assert_eq!(watcher.snapshot().epgs["prod/frontend"].provided, vec!["prod/web"]);
    }

    #[test]
    fn test_epg_deleted_by_dn() {
        let watcher = ApicWatcher::new("kube");
        watcher.epg_changed(&frontend_epg());
        watcher.epg_deleted(EPG_DN);
        assert!(watcher.snapshot().epgs.is_empty());
    }

    #[test]
    fn test_contract_filters() {
        let watcher = ApicWatcher::new("kube");
        let contract = ApicObject::new(CONTRACT_CLASS, "uni/tn-prod/brc-web")
            .with_attr("name", "web")
            .with_child(
                ApicObject::new("vzSubj", "uni/tn-prod/brc-web/subj-http")
                    .with_child(ApicObject::new("vzRsSubjFiltAtt", "").with_attr("tDn", "uni/tn-prod/flt-http")),
            )
            .with_child(ApicObject::new("vzSubj", "uni/tn-prod/brc-web/subj-empty"));
        watcher.contract_changed(&contract);

        let db = watcher.snapshot();
        assert_eq!(db.contracts["prod/web"].filters, vec!["prod/flt-http", UNKNOWN_FILTER]);

        // wrong shape is ignored
        watcher.contract_deleted("uni/tn-prod/brc-web/subj-http");
        assert_eq!(watcher.snapshot().contracts.len(), 1);

        watcher.contract_deleted("uni/tn-prod/brc-web");
        assert!(watcher.snapshot().contracts.is_empty());
    }

    #[test]
    fn test_filter_rules() {
        let watcher = ApicWatcher::new("kube");
        let filter = ApicObject::new(FILTER_CLASS, "uni/tn-prod/flt-http")
            .with_child(entry("tcp", "80", "8080"))
            .with_child(entry("unspecified", "unspecified", "unspecified"));
        watcher.filter_changed(&filter);

        let db = watcher.snapshot();
        assert_eq!(
            db.filters["prod/flt-http"].rules,
            vec![
                FilterRule {
                    protocol: Some("tcp".to_string()),
                    ports: PortSpec { start: Some(80), end: Some(8080) },
                },
                FilterRule::default(),
            ]
        );

        watcher.filter_deleted("uni/tn-prod/flt-http");
        assert!(watcher.snapshot().filters.is_empty());
    }

    #[test]
    fn test_filter_with_unexpected_dn_is_unknown() {
        let watcher = ApicWatcher::new("kube");
        watcher.filter_changed(&ApicObject::new(FILTER_CLASS, "uni/tn-prod/ap-x/flt-http"));
        assert!(watcher.snapshot().filters.contains_key(UNKNOWN_FILTER));
    }

    #[test]
    fn test_network_policy_decoded() {
        let watcher = ApicWatcher::new("kube");
        let dn = "uni/tn-kube/pol-np1";
        watcher.network_policy_changed(&host_prot_pol(dn));

        let db = watcher.snapshot();
        let policy = &db.network_policies[dn];
        assert_eq!(policy.host_prot_pol.attributes.name, "np1");
        let rules: Vec<_> = policy.rules().collect();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].attributes.protocol, "tcp");
        assert_eq!(rules[0].attributes.from_port, "443");
        assert_eq!(rules[0].remote_ips().collect::<Vec<_>>(), vec!["10.1.0.0/16"]);

        watcher.network_policy_deleted(dn);
        assert!(watcher.snapshot().network_policies.is_empty());
    }

    #[test]
    fn test_undecodable_network_policy_is_skipped() {
        let watcher = ApicWatcher::new("kube");
        let mut policy = host_prot_pol("uni/tn-kube/pol-np1");
        policy.attributes.remove("dn");
        watcher.network_policy_changed(&policy);
        assert!(watcher.snapshot().network_policies.is_empty());
    }

    #[test]
    fn test_events_dispatched_by_subscription() {
        let watcher = ApicWatcher::new("kube");
        let subs = watcher.subscriptions();
        assert_eq!(subs[3], Subscription::dn_subtree("uni/tn-kube", &[HOST_PROT_POL_CLASS]));

        watcher.handle_event(&SubscriptionEvent {
            subscription: subs[0].clone(),
            change: SubscriptionChange::Updated(frontend_epg()),
        });
        watcher.handle_event(&SubscriptionEvent {
            subscription: subs[3].clone(),
            change: SubscriptionChange::Updated(host_prot_pol("uni/tn-kube/pol-np1")),
        });
        let db = watcher.snapshot();
        assert_eq!(db.epgs.len(), 1);
        assert_eq!(db.network_policies.len(), 1);

        watcher.handle_event(&SubscriptionEvent {
            subscription: subs[0].clone(),
            change: SubscriptionChange::Deleted(EPG_DN.to_string()),
        });
        assert!(watcher.snapshot().epgs.is_empty());
    }

    #[tokio::test]
    async fn test_run_populates_from_fabric() {
        let mock = MockApicClient::new();
        mock.set_class_objects(EPG_CLASS, vec![frontend_epg()]);
        mock.set_class_objects(FILTER_CLASS, vec![ApicObject::new(FILTER_CLASS, "uni/tn-prod/flt-http")
            .with_child(entry("tcp", "80", "80"))]);

        let watcher = Arc::new(ApicWatcher::new("kube"));
        let token = CancellationToken::new();
        let handle = tokio::spawn(watcher.clone().run(Arc::new(mock), Duration::from_millis(10), token.clone()));

        for _ in 0..100 {
            let db = watcher.snapshot();
            if !db.epgs.is_empty() && !db.filters.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        token.cancel();
        handle.await.unwrap();

        let db = watcher.snapshot();
        assert!(db.epgs.contains_key("prod/frontend"));
        assert!(db.filters.contains_key("prod/flt-http"));
    }
}
