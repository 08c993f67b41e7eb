// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Integration tests for the publisher on the mock engine

use core::net::Ipv6Addr;
use core::time::Duration;
use otbr_mdns::{
    dns_sd, DiscoveredHostInfo, DiscoveredInstanceInfo, Error, Mainloop, MainloopContext,
    MainloopProcessor, Publisher, PublisherConfig, PublisherState, Result, ResultCallback,
    TxtEntry,
};
use otbr_mdns_mock::MockEngine;
use std::cell::RefCell;
use std::rc::Rc;

const MESHCOP: &str = "_meshcop._udp";

type Outcomes = Rc<RefCell<Vec<Result<()>>>>;

fn recorder() -> (Outcomes, ResultCallback) {
    let outcomes = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&outcomes);
    (
        outcomes,
        Box::new(move |result| sink.borrow_mut().push(result)),
    )
}

fn publisher(engine: &MockEngine) -> Publisher {
    Publisher::new(Box::new(engine.backend()), &PublisherConfig::default()).unwrap()
}

fn started(engine: &MockEngine) -> Publisher {
    let mut publisher = publisher(engine);
    publisher.start().unwrap();
    assert!(publisher.is_started());
    publisher
}

fn pump(publisher: &mut Publisher) {
    publisher.process(&MainloopContext::new(Duration::ZERO));
}

fn publish(publisher: &mut Publisher, name: &str, port: u16) -> Outcomes {
    publish_on(publisher, "", name, port)
}

fn publish_on(publisher: &mut Publisher, host: &str, name: &str, port: u16) -> Outcomes {
    let (outcomes, callback) = recorder();
    publisher
        .publish_service(
            host,
            name,
            MESHCOP,
            &[],
            port,
            &[TxtEntry::new("nn", "OpenThread")],
            callback,
        )
        .unwrap();
    outcomes
}

fn addr(s: &str) -> Ipv6Addr {
    s.parse().unwrap()
}

type Instances = Rc<RefCell<Vec<(u8, String, DiscoveredInstanceInfo)>>>;
type Hosts = Rc<RefCell<Vec<(String, DiscoveredHostInfo)>>>;

fn watch_instances(publisher: &mut Publisher, tag: u8, log: &Instances) -> u64 {
    let log = Rc::clone(log);
    publisher.add_subscription_callbacks(
        Some(Box::new(move |service_type: &str, info: &DiscoveredInstanceInfo| {
            log.borrow_mut()
                .push((tag, service_type.to_string(), info.clone()));
        })),
        None,
    )
}

fn watch_hosts(publisher: &mut Publisher, log: &Hosts) -> u64 {
    let log = Rc::clone(log);
    publisher.add_subscription_callbacks(
        None,
        Some(Box::new(move |host_name: &str, info: &DiscoveredHostInfo| {
            log.borrow_mut().push((host_name.to_string(), info.clone()));
        })),
    )
}

#[test_log::test]
fn test_operations_require_ready_state() {
    let engine = MockEngine::new();
    let mut publisher = publisher(&engine);

    let (outcomes, callback) = recorder();
    let result = publisher.publish_service("", "br", MESHCOP, &[], 1, &[], callback);
    assert_eq!(result, Err(Error::InvalidState));
    assert!(outcomes.borrow().is_empty());

    let (outcomes, callback) = recorder();
    assert_eq!(
        publisher.publish_host("otbr", &[addr("fd00::1")], callback),
        Err(Error::InvalidState)
    );
    assert!(outcomes.borrow().is_empty());

    assert_eq!(
        publisher.subscribe_service(MESHCOP, ""),
        Err(Error::InvalidState)
    );
    assert_eq!(publisher.subscribe_host("otbr"), Err(Error::InvalidState));
    assert_eq!(engine.publish_count(), 0);
}

#[test_log::test]
fn test_publish_service() {
    let engine = MockEngine::new();
    let mut publisher = started(&engine);

    let outcomes = publish(&mut publisher, "br", 49152);

    assert_eq!(*outcomes.borrow(), vec![Ok(())]);
    assert!(publisher.has_service_registration("br", MESHCOP));
    let published = engine.service("br", MESHCOP).unwrap();
    assert_eq!(published.port, 49152);
    assert_eq!(published.txt_data, b"\x0dnn=OpenThread");
    assert_eq!(publisher.telemetry().service_registrations.success, 1);
}

#[test_log::test]
fn test_identical_publish_while_pending_coalesces() {
    let engine = MockEngine::new();
    let mut publisher = started(&engine);
    engine.set_auto_complete(false);

    let first = publish(&mut publisher, "br", 49152);
    let second = publish(&mut publisher, "br", 49152);
    assert!(first.borrow().is_empty());
    assert!(second.borrow().is_empty());
    assert_eq!(engine.publish_count(), 1);

    engine.complete_pending();
    pump(&mut publisher);

    assert_eq!(*first.borrow(), vec![Ok(())]);
    assert_eq!(*second.borrow(), vec![Ok(())]);
}

#[test_log::test]
fn test_identical_publish_after_completion_succeeds_immediately() {
    let engine = MockEngine::new();
    let mut publisher = started(&engine);

    publish(&mut publisher, "br", 49152);
    let again = publish(&mut publisher, "br", 49152);

    assert_eq!(*again.borrow(), vec![Ok(())]);
    assert_eq!(engine.publish_count(), 1);
}

#[test_log::test]
fn test_outdated_registration_is_replaced() {
    let engine = MockEngine::new();
    let mut publisher = started(&engine);
    engine.set_auto_complete(false);

    let old = publish(&mut publisher, "br", 1000);
    let new = publish(&mut publisher, "br", 2000);

    assert_eq!(*old.borrow(), vec![Err(Error::Aborted)]);
    assert!(new.borrow().is_empty());

    // The held outcome of the first request is stale by now.
    engine.complete_pending();
    pump(&mut publisher);

    assert_eq!(*old.borrow(), vec![Err(Error::Aborted)]);
    assert_eq!(*new.borrow(), vec![Ok(())]);
    assert_eq!(engine.service("br", MESHCOP).unwrap().port, 2000);
    assert_eq!(engine.publish_count(), 2);
}

#[test_log::test]
fn test_completed_registration_is_replaced() {
    let engine = MockEngine::new();
    let mut publisher = started(&engine);

    let old = publish(&mut publisher, "br", 1000);
    assert_eq!(*old.borrow(), vec![Ok(())]);

    let new = publish(&mut publisher, "br", 2000);
    pump(&mut publisher);

    assert_eq!(*old.borrow(), vec![Ok(())]);
    assert_eq!(*new.borrow(), vec![Ok(())]);
    assert_eq!(engine.publish_count(), 2);
    assert_eq!(engine.service_count(), 1);
    assert_eq!(engine.service("br", MESHCOP).unwrap().port, 2000);
    assert!(publisher.has_service_registration("br", MESHCOP));
}

#[test_log::test]
fn test_coalesced_failure_reaches_every_caller() {
    let engine = MockEngine::new();
    let mut publisher = started(&engine);
    engine.set_auto_complete(false);
    engine.fail_next_publish(dns_sd::NAME_CONFLICT);

    let first = publish(&mut publisher, "br", 49152);
    let second = publish(&mut publisher, "br", 49152);
    assert_eq!(engine.publish_count(), 1);

    engine.complete_pending();
    pump(&mut publisher);

    assert_eq!(*first.borrow(), vec![Err(Error::Duplicated)]);
    assert_eq!(*second.borrow(), vec![Err(Error::Duplicated)]);
    assert!(!publisher.has_service_registration("br", MESHCOP));
    // Every caller's outcome is counted
    assert_eq!(publisher.telemetry().service_registrations.duplicated, 2);
}

#[test_log::test]
fn test_publish_failure_is_not_retained() {
    let engine = MockEngine::new();
    let mut publisher = started(&engine);
    engine.fail_next_publish(dns_sd::NAME_CONFLICT);

    let outcomes = publish(&mut publisher, "br", 49152);

    assert_eq!(*outcomes.borrow(), vec![Err(Error::Duplicated)]);
    assert!(!publisher.has_service_registration("br", MESHCOP));
    assert_eq!(publisher.telemetry().service_registrations.duplicated, 1);

    let retry = publish(&mut publisher, "br", 49152);
    assert_eq!(*retry.borrow(), vec![Ok(())]);
}

#[test_log::test]
fn test_name_conflict_between_publishers() {
    let engine = MockEngine::new();
    let mut first = started(&engine);
    let mut second = started(&engine);

    assert_eq!(*publish(&mut first, "br", 1).borrow(), vec![Ok(())]);
    assert_eq!(
        *publish(&mut second, "br", 1).borrow(),
        vec![Err(Error::Duplicated)]
    );
    assert_eq!(engine.service("br", MESHCOP).unwrap().port, 1);
}

#[test_log::test]
fn test_invalid_arguments_reach_the_callback() {
    let engine = MockEngine::new();
    let mut publisher = started(&engine);

    let (outcomes, callback) = recorder();
    let result = publisher.publish_service("", "br", "meshcop", &[], 1, &[], callback);
    assert_eq!(result, Ok(()));
    assert_eq!(*outcomes.borrow(), vec![Err(Error::InvalidArgs)]);

    let (outcomes, callback) = recorder();
    publisher.publish_host("otbr", &[], callback).unwrap();
    assert_eq!(*outcomes.borrow(), vec![Err(Error::InvalidArgs)]);

    let (outcomes, callback) = recorder();
    let oversized = TxtEntry::new("k", vec![b'v'; 300]);
    publisher
        .publish_service("", "br", MESHCOP, &[], 1, &[oversized], callback)
        .unwrap();
    assert_eq!(*outcomes.borrow(), vec![Err(Error::InvalidArgs)]);

    assert_eq!(engine.publish_count(), 0);
    let telemetry = publisher.telemetry();
    assert_eq!(telemetry.service_registrations.invalid_args, 2);
    assert_eq!(telemetry.host_registrations.invalid_args, 1);
}

#[test_log::test]
fn test_unpublish_is_idempotent() {
    let engine = MockEngine::new();
    let mut publisher = started(&engine);

    let (outcomes, callback) = recorder();
    publisher.unpublish_service("br", MESHCOP, callback).unwrap();
    assert_eq!(*outcomes.borrow(), vec![Ok(())]);

    publish(&mut publisher, "br", 1);
    engine.expire_service("br", MESHCOP);

    let (outcomes, callback) = recorder();
    publisher.unpublish_service("br", MESHCOP, callback).unwrap();
    assert_eq!(*outcomes.borrow(), vec![Ok(())]);
    assert!(!publisher.has_service_registration("br", MESHCOP));

    let (outcomes, callback) = recorder();
    publisher.unpublish_host("otbr", callback).unwrap();
    assert_eq!(*outcomes.borrow(), vec![Ok(())]);
}

#[test_log::test]
fn test_unpublish_aborts_pending_publish() {
    let engine = MockEngine::new();
    let mut publisher = started(&engine);
    engine.set_auto_complete(false);

    let published = publish(&mut publisher, "br", 1);
    let (unpublished, callback) = recorder();
    publisher.unpublish_service("br", MESHCOP, callback).unwrap();

    assert_eq!(*published.borrow(), vec![Err(Error::Aborted)]);
    assert_eq!(*unpublished.borrow(), vec![Ok(())]);
    assert_eq!(engine.service_count(), 0);

    engine.complete_pending();
    pump(&mut publisher);
    assert_eq!(published.borrow().len(), 1);
}

#[test_log::test]
fn test_publish_host() {
    let engine = MockEngine::new();
    let mut publisher = started(&engine);

    let (outcomes, callback) = recorder();
    publisher
        .publish_host("otbr", &[addr("fd00::1"), addr("fd00::2")], callback)
        .unwrap();

    assert_eq!(*outcomes.borrow(), vec![Ok(())]);
    assert!(publisher.has_host_registration("otbr"));
    assert_eq!(
        engine.host_addresses("otbr"),
        Some(vec![addr("fd00::1"), addr("fd00::2")])
    );

    let (outcomes, callback) = recorder();
    publisher.unpublish_host("otbr", callback).unwrap();
    assert_eq!(*outcomes.borrow(), vec![Ok(())]);
    assert_eq!(engine.host_count(), 0);
}

#[test_log::test]
fn test_stop_aborts_everything() {
    let engine = MockEngine::new();
    let mut publisher = publisher(&engine);
    let states = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&states);
    publisher.set_state_callback(Box::new(move |state| sink.borrow_mut().push(state)));
    publisher.start().unwrap();

    publisher.subscribe_service(MESHCOP, "").unwrap();
    publisher.subscribe_host("peer").unwrap();
    engine.set_auto_complete(false);
    let service = publish(&mut publisher, "br", 1);
    let (host, callback) = recorder();
    publisher
        .publish_host("otbr", &[addr("fd00::1")], callback)
        .unwrap();

    publisher.stop();

    assert_eq!(*service.borrow(), vec![Err(Error::Aborted)]);
    assert_eq!(*host.borrow(), vec![Err(Error::Aborted)]);
    assert_eq!(
        *states.borrow(),
        vec![PublisherState::Ready, PublisherState::Idle]
    );
    assert_eq!(engine.service_count(), 0);
    assert_eq!(engine.host_count(), 0);
    assert_eq!(engine.active_queries(), 0);

    let (outcomes, callback) = recorder();
    assert_eq!(
        publisher.publish_service("", "br", MESHCOP, &[], 1, &[], callback),
        Err(Error::InvalidState)
    );
    assert!(outcomes.borrow().is_empty());
}

#[test_log::test]
fn test_engine_loss_and_recovery() {
    let engine = MockEngine::new();
    let mut publisher = started(&engine);
    let published = publish(&mut publisher, "br", 1);
    publisher.subscribe_service(MESHCOP, "").unwrap();

    engine.set_available(false);
    pump(&mut publisher);
    assert_eq!(publisher.state(), PublisherState::Idle);
    assert!(!publisher.has_service_registration("br", MESHCOP));
    assert_eq!(published.borrow().len(), 1);

    engine.set_available(true);
    pump(&mut publisher);
    assert!(publisher.is_started());
    assert_eq!(*publish(&mut publisher, "br", 1).borrow(), vec![Ok(())]);
}

#[test_log::test]
fn test_browse_resolves_and_fans_out_in_order() {
    let engine = MockEngine::new();
    let mut local = started(&engine);
    let mut remote = started(&engine);

    let log: Instances = Rc::default();
    watch_instances(&mut local, 1, &log);
    watch_instances(&mut local, 2, &log);
    local.subscribe_service(MESHCOP, "").unwrap();

    let (_, callback) = recorder();
    remote
        .publish_host("peer", &[addr("fd00::7")], callback)
        .unwrap();
    publish_on(&mut remote, "peer", "remote-br", 49153);
    pump(&mut local);

    let log = log.borrow();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].0, 1);
    assert_eq!(log[1].0, 2);
    let (_, service_type, info) = &log[0];
    assert_eq!(service_type, MESHCOP);
    assert!(!info.removed);
    assert_eq!(info.name, "remote-br");
    assert_eq!(info.host_name, "peer.local.");
    assert_eq!(info.port, 49153);
    assert_eq!(info.addresses, vec![addr("fd00::7")]);
    assert_eq!(
        Publisher::decode_txt_data(&info.txt_data).unwrap(),
        vec![TxtEntry::new("nn", "OpenThread")]
    );
    assert_eq!(log[1].2, *info);
    assert_eq!(local.telemetry().service_resolutions.success, 1);
}

#[test_log::test]
fn test_already_published_instances_are_found() {
    let engine = MockEngine::new();
    let mut local = started(&engine);
    let mut remote = started(&engine);
    publish(&mut remote, "a", 1);
    publish(&mut remote, "b", 2);

    let log: Instances = Rc::default();
    watch_instances(&mut local, 1, &log);
    local.subscribe_service(MESHCOP, "").unwrap();

    let names: Vec<String> = log.borrow().iter().map(|e| e.2.name.clone()).collect();
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
}

#[test_log::test]
fn test_removed_instance_is_reported() {
    let engine = MockEngine::new();
    let mut local = started(&engine);
    let mut remote = started(&engine);

    let log: Instances = Rc::default();
    watch_instances(&mut local, 1, &log);
    local.subscribe_service(MESHCOP, "").unwrap();
    publish(&mut remote, "remote-br", 1);
    pump(&mut local);

    let (_, callback) = recorder();
    remote
        .unpublish_service("remote-br", MESHCOP, callback)
        .unwrap();
    pump(&mut local);

    let log = log.borrow();
    assert_eq!(log.len(), 2);
    let removed = &log[1].2;
    assert!(removed.removed);
    assert_eq!(removed.name, "remote-br");
    assert_eq!(removed.netif_index, otbr_mdns_mock::NETIF_INDEX);
}

#[test_log::test]
fn test_only_routable_addresses_are_delivered() {
    let engine = MockEngine::new();
    let mut local = started(&engine);
    engine
        .add_remote_host(
            "peer",
            &[
                addr("fe80::1"),
                addr("fd00::1"),
                addr("ff02::1"),
                addr("::1"),
                addr("::"),
                addr("2001:db8::1"),
            ],
        )
        .unwrap();

    let instances: Instances = Rc::default();
    let hosts: Hosts = Rc::default();
    watch_instances(&mut local, 1, &instances);
    watch_hosts(&mut local, &hosts);

    let info =
        otbr_mdns::ServiceRegistrationInfo::new("peer", "remote-br", MESHCOP, &[], 1, &[])
            .unwrap();
    engine.add_remote_service(&info).unwrap();
    local.subscribe_service(MESHCOP, "remote-br").unwrap();
    local.subscribe_host("peer").unwrap();

    let expected = vec![addr("fd00::1"), addr("2001:db8::1")];
    assert_eq!(instances.borrow()[0].2.addresses, expected);
    assert_eq!(hosts.borrow()[0].1.addresses, expected);
    assert_eq!(hosts.borrow()[0].1.host_name, "peer.local.");
}

#[test_log::test]
fn test_resolve_failure_is_mapped() {
    let engine = MockEngine::new();
    let mut local = started(&engine);
    let log: Instances = Rc::default();
    watch_instances(&mut local, 1, &log);

    engine.fail_next_resolve(dns_sd::NO_SUCH_NAME);
    local.subscribe_service(MESHCOP, "missing").unwrap();

    engine.fail_next_resolve(dns_sd::BAD_INTERFACE_INDEX);
    local.subscribe_host("missing").unwrap();

    assert!(log.borrow().is_empty());
    let telemetry = local.telemetry();
    assert_eq!(telemetry.service_resolutions.not_found, 1);
    assert_eq!(telemetry.host_resolutions.invalid_args, 1);
}

#[test_log::test]
fn test_host_changes_are_delivered_once() {
    let engine = MockEngine::new();
    let mut local = started(&engine);
    let mut remote = started(&engine);

    let hosts: Hosts = Rc::default();
    watch_hosts(&mut local, &hosts);
    local.subscribe_host("peer").unwrap();

    let (_, callback) = recorder();
    remote
        .publish_host("peer", &[addr("fd00::1")], callback)
        .unwrap();
    pump(&mut local);

    let (_, callback) = recorder();
    remote
        .publish_host("peer", &[addr("fd00::1")], callback)
        .unwrap();
    pump(&mut local);
    assert_eq!(hosts.borrow().len(), 1);

    let (_, callback) = recorder();
    remote
        .publish_host("peer", &[addr("fd00::2")], callback)
        .unwrap();
    pump(&mut local);

    let hosts = hosts.borrow();
    assert_eq!(hosts.len(), 2);
    assert_eq!(hosts[0].0, "peer");
    assert_eq!(hosts[1].1.addresses, vec![addr("fd00::2")]);
}

#[test_log::test]
fn test_resolution_with_other_case_releases_query() {
    let engine = MockEngine::new();
    let mut local = started(&engine);
    let mut remote = started(&engine);
    publish(&mut remote, "remote-br", 49153);

    let log: Instances = Rc::default();
    watch_instances(&mut local, 1, &log);
    local.subscribe_service(MESHCOP, "Remote-BR").unwrap();
    pump(&mut local);

    assert_eq!(log.borrow().len(), 1);
    assert_eq!(log.borrow()[0].2.name, "remote-br");
    assert_eq!(engine.active_queries(), 0);
    assert_eq!(local.telemetry().service_resolutions.success, 1);
}

#[test_log::test]
fn test_unsubscribe_releases_queries() {
    let engine = MockEngine::new();
    let mut publisher = started(&engine);

    publisher.subscribe_service(MESHCOP, "").unwrap();
    publisher.subscribe_service(MESHCOP, "pending").unwrap();
    publisher.subscribe_host("peer").unwrap();
    assert_eq!(engine.active_queries(), 3);

    publisher.unsubscribe_service(MESHCOP, "");
    publisher.unsubscribe_service(MESHCOP, "pending");
    publisher.unsubscribe_host("peer");
    assert_eq!(engine.active_queries(), 0);
}

#[test_log::test]
fn test_removed_subscriber_is_not_called() {
    let engine = MockEngine::new();
    let mut local = started(&engine);
    let mut remote = started(&engine);

    let log: Instances = Rc::default();
    let first = watch_instances(&mut local, 1, &log);
    watch_instances(&mut local, 2, &log);
    local.remove_subscription_callbacks(first);
    local.subscribe_service(MESHCOP, "").unwrap();

    publish(&mut remote, "remote-br", 1);
    pump(&mut local);

    let tags: Vec<u8> = log.borrow().iter().map(|e| e.0).collect();
    assert_eq!(tags, vec![2]);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_registration_latency_is_tracked() {
    let engine = MockEngine::new();
    let mut publisher = started(&engine);
    engine.set_auto_complete(false);

    let outcomes = publish(&mut publisher, "br", 1);
    tokio::time::advance(Duration::from_millis(30)).await;
    engine.complete_pending();
    pump(&mut publisher);

    assert_eq!(*outcomes.borrow(), vec![Ok(())]);
    assert_eq!(publisher.telemetry().service_registration_ema_latency, 30);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_mainloop_drives_the_publisher() {
    let engine = MockEngine::new();
    let mut publisher = started(&engine);
    let mut mainloop = Mainloop::new(Duration::from_secs(1));
    engine.set_auto_complete(false);

    let outcomes = publish(&mut publisher, "br", 1);
    let remote_engine = engine.clone();
    mainloop
        .handle()
        .post_delayed(Duration::from_millis(50), move || {
            remote_engine.complete_pending();
        });

    let done = Rc::clone(&outcomes);
    let mut processors: [&mut dyn MainloopProcessor; 1] = [&mut publisher];
    mainloop
        .run_until(&mut processors, || !done.borrow().is_empty())
        .await;

    assert_eq!(*outcomes.borrow(), vec![Ok(())]);
}
