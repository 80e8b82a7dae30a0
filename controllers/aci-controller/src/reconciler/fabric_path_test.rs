//! Unit tests for fabric path handling in the reconciler

#[cfg(test)]
mod tests {
    use crate::queue::WorkQueue;
    use crate::reconciler::fabric_path::OPFLEX_DEVICE_CLASS;
    use crate::test_utils::*;
    use apic_client::{Subscription, SubscriptionChange, SubscriptionEvent};
    use std::collections::BTreeSet;

    const GLOBAL_KEY: &str = "kube_svc_global";

    async fn drain(queue: &WorkQueue) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        while !queue.is_empty() {
            if let Some(key) = queue.get().await {
                queue.done(&key);
                keys.insert(key);
            }
        }
        keys
    }

    fn event(change: SubscriptionChange) -> SubscriptionEvent {
        SubscriptionEvent {
            subscription: Subscription::class(OPFLEX_DEVICE_CLASS),
            change,
        }
    }

    fn device_members(h: &TestHarness) -> Vec<String> {
        let global = h.apic.written(GLOBAL_KEY).unwrap();
        assert_eq!(global[0].class, "vnsLDevVip");
        assert_eq!(global[1].class, "vnsAbsGraph");
        global[0]
            .children_of("vnsCDev")
            .map(|d| d.attr_str("name").to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_attachment_rewrites_device_cluster() {
        let h = TestHarness::new(test_config());
        h.attach_node("odev-1", "node-1", "path-1").await;
        h.attach_node("odev-2", "node-2", "path-2").await;
        assert_eq!(device_members(&h), vec!["node-1", "node-2"]);

        // the same record again writes nothing
        h.apic.reset_calls();
        h.attach_node("odev-1", "node-1", "path-1").await;
        assert!(h.apic.calls().is_empty());
    }

    #[tokio::test]
    async fn test_host_move_requeues_services_of_both_nodes() {
        let mut h = TestHarness::new(test_config());
        h.apply_endpoints(create_test_endpoints("default", "a", &[("node-a", "a-0")]));
        h.apply_endpoints(create_test_endpoints("default", "b", &[("node-b", "b-0")]));
        h.apply_endpoints(create_test_endpoints("default", "c", &[("node-c", "c-0")]));
        h.attach_node("odev-1", "node-a", "path-1").await;
        h.attach_node("odev-2", "node-b", "path-2").await;
        h.attach_node("odev-3", "node-c", "path-3").await;
        drain(&h.reconciler.queues.services).await;

        h.attach_node("odev-1", "node-b", "path-1").await;

        let queued = drain(&h.reconciler.queues.services).await;
        assert_eq!(queued, ["default/a", "default/b"].iter().map(|k| k.to_string()).collect::<BTreeSet<_>>());
        {
            let state = h.reconciler.lock_state();
            assert!(!state.node_fabric_paths.contains_key("node-a"));
            assert_eq!(state.node_fabric_paths["node-b"].len(), 2);
            // oldest attachment wins
            assert_eq!(state.fabric_path_for_node("node-b"), Some("path-2"));
        }
        assert_eq!(device_members(&h), vec!["node-b", "node-c"]);
    }

    #[tokio::test]
    async fn test_foreign_domain_is_ignored() {
        let h = TestHarness::new(test_config());
        let odev = create_test_odev("odev-1", "node-1", "path-1", "other-domain", "kube-ctrlr");
        h.reconciler.handle_subscription_event(event(SubscriptionChange::Updated(odev))).await;

        assert!(h.reconciler.lock_state().node_fabric_paths.is_empty());
        assert!(h.apic.calls().is_empty());
    }

    #[tokio::test]
    async fn test_device_without_host_is_skipped() {
        let h = TestHarness::new(test_config());
        let odev = create_test_odev("odev-1", "", "path-1", "kube-domain", "kube-ctrlr");
        h.reconciler.opflex_device_changed(&odev).await.unwrap();
        assert!(h.reconciler.lock_state().node_fabric_paths.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_device_drops_member() {
        let h = TestHarness::new(test_config());
        h.attach_node("odev-1", "node-1", "path-1").await;
        h.attach_node("odev-2", "node-2", "path-2").await;

        h.reconciler
            .handle_subscription_event(event(SubscriptionChange::Deleted("odev-1".to_string())))
            .await;
        assert_eq!(device_members(&h), vec!["node-2"]);
    }

    #[tokio::test]
    async fn test_fabric_change_rewrites_snat_graph() {
        let mut h = TestHarness::new(test_config());
        h.attach_node("odev-1", "node-1", "path-1").await;
        h.apply_snat_policy(create_test_snat_policy("egress", &["10.20.0.1"], &[], &[]));
        h.reconciler.handle_snat("egress").await.unwrap();

        h.attach_node("odev-2", "node-2", "path-2").await;
        let graph = h.apic.written("kube_snat_global").unwrap();
        assert_eq!(graph[0].children_of("vnsRedirectDest").count(), 2);
        assert_eq!(h.reconciler.lock_state().snat_node_eps.len(), 2);
    }

    #[tokio::test]
    async fn test_sync_disabled_tracks_without_writing() {
        let mut config = test_config();
        config.apic_sync_enabled = false;
        let mut h = TestHarness::new(config);
        h.apply_endpoints(create_test_endpoints("default", "a", &[("node-1", "a-0")]));
        h.attach_node("odev-1", "node-1", "path-1").await;

        assert!(h.apic.calls().is_empty());
        assert_eq!(h.reconciler.lock_state().fabric_path_for_node("node-1"), Some("path-1"));
        assert_eq!(h.reconciler.queues.services.len(), 1);
    }
}
