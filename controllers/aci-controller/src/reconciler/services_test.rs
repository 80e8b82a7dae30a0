//! Unit tests for the service handler

#[cfg(test)]
mod tests {
    use crate::queue::QueueKind;
    use crate::reconciler::Action;
    use crate::service_writer::RecordedWrite;
    use crate::test_utils::*;
    use apic_client::MockCall;
    use crds::{SERVICE_EP_ANNOTATION, parse_annotation};
    use k8s_openapi::api::core::v1::ServicePort;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use std::net::IpAddr;

    const KEY: &str = "default/web";
    const GRAPH_KEY: &str = "kube_svc_default_web";
    const VMM_KEY: &str = "kube_service-vmm_default_web";

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn ingress_writes(h: &TestHarness) -> Vec<Vec<String>> {
        h.writer
            .writes()
            .into_iter()
            .filter_map(|w| match w {
                RecordedWrite::Ingress { ips, .. } => Some(ips),
                _ => None,
            })
            .collect()
    }

    fn last_annotation(h: &TestHarness) -> Option<String> {
        h.writer
            .writes()
            .into_iter()
            .filter_map(|w| match w {
                RecordedWrite::Annotation { name, value, .. } if name == SERVICE_EP_ANNOTATION => Some(value),
                _ => None,
            })
            .last()
    }

    #[tokio::test]
    async fn test_lb_service_gets_address_endpoint_and_graph() {
        let mut h = TestHarness::new(test_config());
        h.attach_node("odev-1", "node-1", "topology/pod-1/paths-101/pathep-[eth1/1]").await;
        h.apply_service(create_test_lb_service("default", "web", &[]));
        h.apply_endpoints(create_test_endpoints("default", "web", &[("node-1", "web-0")]));

        let action = h.reconciler.handle_service(KEY).await.unwrap();
        assert_eq!(action, Action::Done);

        assert_eq!(ingress_writes(&h), vec![vec!["10.3.0.1".to_string()]]);
        let table = parse_annotation(&last_annotation(&h).unwrap()).unwrap();
        assert_eq!(table["node-1"].ipv4, Some("10.6.0.2".parse().unwrap()));

        let graph = h.apic.written(GRAPH_KEY).unwrap();
        assert_eq!(graph.len(), 6);
        let dests: Vec<&str> = graph[0].children_of("vnsRedirectDest").map(|d| d.attr_str("ip")).collect();
        assert_eq!(dests, vec!["10.6.0.2"]);
        let subnets: Vec<&str> = graph[1].children_of("l3extSubnet").map(|s| s.attr_str("ip")).collect();
        assert_eq!(subnets, vec!["10.3.0.1/32"]);

        let vmm = h.apic.written(VMM_KEY).unwrap();
        assert_eq!(vmm[0].class, "vmmInjectedSvc");
        assert_eq!(vmm[0].attr_str("type"), "loadBalancer");
        assert_eq!(vmm[0].attr_str("lbIp"), "10.3.0.1");
        assert_eq!(vmm[0].attr_str("guid"), "uid-web");
        assert_eq!(vmm[0].attr_str("clusterIp"), "10.96.0.10");
        let eps: Vec<&str> = vmm[0].children_of("vmmInjectedSvcEp").map(|e| e.attr_str("contGrpName")).collect();
        assert_eq!(eps, vec!["web-0"]);
    }

    #[tokio::test]
    async fn test_requested_static_ip_replaces_dynamic() {
        let mut h = TestHarness::new(test_config());
        let mut service = create_test_lb_service("default", "web", &["10.3.0.9"]);
        service.spec.as_mut().unwrap().load_balancer_ip = Some("10.3.0.11".to_string());
        h.apply_service(service);

        h.reconciler.handle_service(KEY).await.unwrap();
        {
            let state = h.reconciler.lock_state();
            assert!(state.service_ips.contains(ip("10.3.0.9")));
            assert!(!state.static_service_ips.contains(ip("10.3.0.11")));
            assert!(!state.service_ips.contains(ip("10.3.0.11")));
            let meta = &state.service_meta[KEY];
            assert!(meta.ingress_ips.is_empty());
            assert_eq!(meta.static_ingress_ips, vec![ip("10.3.0.11")]);
        }
        assert_eq!(ingress_writes(&h), vec![vec!["10.3.0.11".to_string()]]);

        // withdrawing the request hands the static address back
        h.writer.clear();
        h.apply_service(create_test_lb_service("default", "web", &["10.3.0.11"]));
        h.reconciler.handle_service(KEY).await.unwrap();
        {
            let state = h.reconciler.lock_state();
            assert!(state.static_service_ips.contains(ip("10.3.0.11")));
            assert_eq!(state.service_meta[KEY].ingress(), vec![ip("10.3.0.1")]);
            assert_eq!(state.service_meta[KEY].requested_ip, None);
        }
        assert_eq!(ingress_writes(&h), vec![vec!["10.3.0.1".to_string()]]);
    }

    #[tokio::test]
    async fn test_requested_ip_already_held_dynamically_is_kept() {
        let mut h = TestHarness::new(test_config());
        let mut service = create_test_lb_service("default", "web", &["10.3.0.5"]);
        service.spec.as_mut().unwrap().load_balancer_ip = Some("10.3.0.5".to_string());
        h.apply_service(service);

        h.reconciler.handle_service(KEY).await.unwrap();
        let state = h.reconciler.lock_state();
        assert_eq!(state.service_meta[KEY].ingress_ips, vec![ip("10.3.0.5")]);
        assert!(!state.service_ips.contains(ip("10.3.0.5")));
        drop(state);
        // status already matches
        assert!(ingress_writes(&h).is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_request_falls_back_to_dynamic_pool() {
        let mut h = TestHarness::new(test_config());
        let mut service = create_test_lb_service("default", "web", &[]);
        service.spec.as_mut().unwrap().load_balancer_ip = Some("192.0.2.50".to_string());
        h.apply_service(service);

        h.reconciler.handle_service(KEY).await.unwrap();
        assert_eq!(ingress_writes(&h), vec![vec!["10.3.0.1".to_string()]]);
    }

    #[tokio::test]
    async fn test_sync_disabled_only_adopts_existing_state() {
        let mut config = test_config();
        config.apic_sync_enabled = false;
        let mut h = TestHarness::new(config);

        let mut service = create_test_lb_service("default", "web", &["10.3.0.4"]);
        service.metadata.annotations = Some(
            [(
                SERVICE_EP_ANNOTATION.to_string(),
                r#"{"node-1":{"mac":"02:00:00:00:00:01","ipv4":"10.6.0.7"}}"#.to_string(),
            )]
            .into_iter()
            .collect(),
        );
        h.apply_service(service);
        h.apply_endpoints(create_test_endpoints("default", "web", &[("node-2", "web-0")]));

        h.reconciler.handle_service(KEY).await.unwrap();
        {
            let state = h.reconciler.lock_state();
            assert!(!state.service_ips.contains(ip("10.3.0.4")));
            assert!(!state.node_service_ips.contains(ip("10.6.0.7")));
            // no endpoint is allocated for node-2
            assert_eq!(state.service_meta[KEY].node_service_eps.len(), 1);
        }
        assert!(h.writer.writes().is_empty());
        assert!(h.apic.written(GRAPH_KEY).is_none());
        // the visibility object is written regardless
        assert_eq!(h.apic.keys(), vec![VMM_KEY.to_string()]);
    }

    #[tokio::test]
    async fn test_endpoint_of_departed_node_is_released() {
        let mut h = TestHarness::new(test_config());
        h.apply_service(create_test_lb_service("default", "web", &[]));
        h.apply_endpoints(create_test_endpoints(
            "default",
            "web",
            &[("node-1", "web-0"), ("node-2", "web-1")],
        ));
        h.reconciler.handle_service(KEY).await.unwrap();
        assert!(!h.reconciler.lock_state().node_service_ips.contains(ip("10.6.0.3")));

        h.apply_endpoints(create_test_endpoints("default", "web", &[("node-1", "web-0")]));
        h.reconciler.handle_service(KEY).await.unwrap();

        assert!(h.reconciler.lock_state().node_service_ips.contains(ip("10.6.0.3")));
        let table = parse_annotation(&last_annotation(&h).unwrap()).unwrap();
        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["node-1"]);
    }

    #[tokio::test]
    async fn test_unreachable_nodes_leave_graph_empty() {
        let mut h = TestHarness::new(test_config());
        h.apply_service(create_test_lb_service("default", "web", &[]));
        h.apply_endpoints(create_test_endpoints("default", "web", &[("node-1", "web-0")]));

        h.reconciler.handle_service(KEY).await.unwrap();
        // endpoint allocated, but no fabric path to redirect to
        assert!(last_annotation(&h).unwrap().contains("node-1"));
        assert!(h.apic.written(GRAPH_KEY).is_none());
        assert_eq!(h.apic.write_count(GRAPH_KEY), 1);
    }

    #[tokio::test]
    async fn test_type_change_releases_addresses() {
        let mut h = TestHarness::new(test_config());
        h.attach_node("odev-1", "node-1", "path-1").await;
        h.apply_service(create_test_lb_service("default", "web", &[]));
        h.apply_endpoints(create_test_endpoints("default", "web", &[("node-1", "web-0")]));
        h.reconciler.handle_service(KEY).await.unwrap();
        assert!(h.apic.written(GRAPH_KEY).is_some());

        h.apply_service(create_test_service("default", "web", "ClusterIP"));
        h.reconciler.handle_service(KEY).await.unwrap();

        let state = h.reconciler.lock_state();
        assert!(state.service_ips.contains(ip("10.3.0.1")));
        assert!(state.node_service_ips.contains(ip("10.6.0.2")));
        assert!(!state.service_meta.contains_key(KEY));
        drop(state);
        assert!(h.apic.written(GRAPH_KEY).is_none());
        let vmm = h.apic.written(VMM_KEY).unwrap();
        assert_eq!(vmm[0].attr_str("type"), "clusterIp");
        assert_eq!(vmm[0].attr("lbIp"), None);
    }

    #[tokio::test]
    async fn test_deleted_service_clears_everything() {
        let mut h = TestHarness::new(test_config());
        let service = create_test_lb_service("default", "web", &[]);
        h.apply_service(service.clone());
        h.reconciler.handle_service(KEY).await.unwrap();

        h.delete_service(service);
        h.apic.reset_calls();
        let action = h.reconciler.handle_service(KEY).await.unwrap();
        assert_eq!(action, Action::Done);

        assert_eq!(
            h.apic.calls(),
            vec![MockCall::Clear(GRAPH_KEY.to_string()), MockCall::Clear(VMM_KEY.to_string())]
        );
        assert!(h.apic.keys().is_empty());
        assert!(h.reconciler.lock_state().service_ips.contains(ip("10.3.0.1")));
    }

    #[tokio::test]
    async fn test_replayed_event_gives_identical_graph() {
        let mut h = TestHarness::new(test_config());
        h.attach_node("odev-1", "node-1", "path-1").await;
        h.attach_node("odev-2", "node-2", "path-2").await;
        h.apply_service(create_test_lb_service("default", "web", &[]));
        h.apply_endpoints(create_test_endpoints(
            "default",
            "web",
            &[("node-1", "web-0"), ("node-2", "web-1")],
        ));

        h.reconciler.handle_service(KEY).await.unwrap();
        let first = h.apic.written(GRAPH_KEY).unwrap();
        h.reconciler.handle_service(KEY).await.unwrap();
        assert_eq!(h.apic.written(GRAPH_KEY).unwrap(), first);
        assert_eq!(h.reconciler.lock_state().service_meta[KEY].ingress(), vec![ip("10.3.0.1")]);
    }

    #[tokio::test]
    async fn test_vmm_service_ports() {
        let mut h = TestHarness::new(test_config());
        let mut service = create_test_service("default", "web", "NodePort");
        service.spec.as_mut().unwrap().ports = Some(vec![ServicePort {
            port: 53,
            protocol: Some("UDP".to_string()),
            target_port: Some(IntOrString::String("dns".to_string())),
            node_port: Some(30053),
            ..Default::default()
        }]);
        h.apply_service(service);

        h.reconciler.handle_service(KEY).await.unwrap();
        let vmm = h.apic.written(VMM_KEY).unwrap();
        assert_eq!(vmm[0].attr_str("type"), "nodePort");
        let port = vmm[0].children_of("vmmInjectedSvcPort").next().unwrap();
        assert_eq!(port.attr_str("port"), "53");
        assert_eq!(port.attr_str("protocol"), "udp");
        assert_eq!(port.attr_str("targetPort"), "dns");
        assert_eq!(port.attr_str("nodePort"), "30053");
    }

    #[tokio::test]
    async fn test_failed_status_write_is_returned() {
        let mut h = TestHarness::new(test_config());
        h.apply_service(create_test_lb_service("default", "web", &[]));
        h.writer.set_fail(true);

        assert!(h.reconciler.process(QueueKind::Service, KEY).await.is_err());
        assert_eq!(
            h.reconciler
                .metrics
                .reconciliations
                .with_label_values(&["service", "error"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_recover_then_full_sync() {
        let mut h = TestHarness::new(test_config());
        h.apply_service(create_test_lb_service("default", "web", &["10.3.0.4"]));
        h.apply_service(create_test_lb_service("default", "db", &["10.3.0.10"]));
        h.apply_service(create_test_service("kube-system", "dns", "ClusterIP"));
        h.apply_snat_policy(create_test_snat_policy("egress", &["10.20.0.1"], &[], &[]));
        h.apply_netflow_policy(create_test_netflow_policy("flows", "netflow"));

        h.reconciler.recover();
        {
            let state = h.reconciler.lock_state();
            assert!(!state.service_ips.contains(ip("10.3.0.4")));
            assert!(!state.static_service_ips.contains(ip("10.3.0.10")));
            assert!(!state.service_meta.contains_key("kube-system/dns"));
        }

        h.reconciler.full_sync();
        assert_eq!(h.reconciler.queues.services.len(), 3);
        assert_eq!(h.reconciler.queues.snat.len(), 1);
        assert_eq!(h.reconciler.queues.netflow.len(), 1);
    }

    #[tokio::test]
    async fn test_static_objects() {
        let h = TestHarness::new(test_config());
        h.reconciler.write_static_objects().await.unwrap();
        let bd = h.apic.written("kube_service_static").unwrap();
        assert_eq!(bd[0].dn(), "uni/tn-common/BD-kube_bd_kubernetes-service");
    }
}
