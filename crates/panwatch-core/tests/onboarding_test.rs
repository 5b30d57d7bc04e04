#![allow(clippy::unwrap_used)]
// Integration tests for appliance onboarding through the scheduler.

use std::sync::Arc;

use panwatch_api::commands::{CONFIG_VSYS_LIST, OP_SHOW_INTERFACE_ALL, OP_SHOW_SYSTEM_INFO};
use pretty_assertions::assert_eq;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use panwatch_core::testing::MockTransport;
use panwatch_core::{
    ApplianceCredentials, ApplianceRegistry, ConfigHandle, CoreError, PollingConfig,
    RequestKind, RequestScheduler, add_appliance,
};

// ── Helpers ─────────────────────────────────────────────────────────

const SYSTEM_INFO: &str = "<result><system><hostname>edge-1</hostname>\
    <devicename>edge-1</devicename><serial>012801000001</serial><model>PA-850</model>\
    <sw-version>10.2.4</sw-version><multi-vsys>on</multi-vsys></system></result>";

const INTERFACES: &str = "<result><ifnet><entry><name>ethernet1/1</name><zone>untrust</zone>\
    <vsys>1</vsys></entry><entry><name>ethernet1/2</name><zone>trust</zone><vsys>2</vsys>\
    </entry></ifnet><hw><entry><name>ethernet1/1</name><state>up</state>\
    <st>1000/full/up</st><speed>1000</speed></entry></hw></result>";

const VSYS: &str = "<result><vsys><entry name=\"vsys1\"/><entry name=\"vsys2\"/></vsys></result>";

fn setup() -> (Arc<MockTransport>, RequestScheduler, ApplianceRegistry) {
    let transport = Arc::new(MockTransport::new());
    let config = ConfigHandle::new(PollingConfig::default());
    let scheduler = RequestScheduler::spawn(transport.clone(), config.subscribe());
    (transport, scheduler, ApplianceRegistry::new())
}

fn script(transport: &MockTransport, system_info: &str) {
    transport.on_op_xml(OP_SHOW_SYSTEM_INFO, system_info).unwrap();
    transport.on_op_xml(OP_SHOW_INTERFACE_ALL, INTERFACES).unwrap();
    transport.on_config(
        CONFIG_VSYS_LIST,
        Ok(panwatch_api::ApiElement::parse(VSYS).unwrap()),
    );
}

fn password() -> ApplianceCredentials {
    ApplianceCredentials::Password {
        username: "admin".into(),
        password: SecretString::from("s3cret"),
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_password_onboarding_discovers_everything() {
    let (transport, scheduler, registry) = setup();
    script(&transport, SYSTEM_INFO);
    transport.on_key_gen(Ok(SecretString::from("LUFRPT==")));
    let url = Url::parse("https://edge-1.example.com").unwrap();

    let appliance = add_appliance(&scheduler, &registry, url.clone(), password())
        .await
        .unwrap();

    assert_eq!(appliance.serial, "012801000001");
    assert_eq!(appliance.model, "PA-850");
    assert_eq!(appliance.device_name, "edge-1");
    assert_eq!(appliance.api_key.expose_secret(), "LUFRPT==");
    assert!(appliance.multi_vsys);
    assert_eq!(appliance.vsys, vec!["vsys1", "vsys2"]);
    assert_eq!(appliance.logical_interfaces.len(), 2);
    assert_eq!(appliance.hw_interfaces.len(), 1);
    assert!(!appliance.disabled);

    let stored = registry.get("012801000001").unwrap();
    assert_eq!(stored.url, url);

    let kinds: Vec<RequestKind> = transport.calls().iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![
            RequestKind::KeyGen,
            RequestKind::Op,
            RequestKind::Op,
            RequestKind::Config
        ]
    );
}

#[tokio::test]
async fn test_api_key_skips_key_exchange_and_single_vsys_skips_config() {
    let (transport, scheduler, registry) = setup();
    script(&transport, &SYSTEM_INFO.replace("<multi-vsys>on", "<multi-vsys>off"));
    let url = Url::parse("https://edge-1.example.com").unwrap();

    let appliance = add_appliance(
        &scheduler,
        &registry,
        url,
        ApplianceCredentials::ApiKey(SecretString::from("existing")),
    )
    .await
    .unwrap();

    assert!(!appliance.multi_vsys);
    assert!(appliance.vsys.is_empty());
    let targets: Vec<String> = transport.calls().into_iter().map(|c| c.target).collect();
    assert_eq!(targets, vec![OP_SHOW_SYSTEM_INFO, OP_SHOW_INTERFACE_ALL]);
}

#[tokio::test]
async fn test_duplicate_url_is_rejected_before_calling_out() {
    let (transport, scheduler, registry) = setup();
    script(&transport, SYSTEM_INFO);
    let url = Url::parse("https://edge-1.example.com").unwrap();
    add_appliance(&scheduler, &registry, url.clone(), password())
        .await
        .unwrap();
    let calls = transport.call_count();

    let err = add_appliance(&scheduler, &registry, url, password())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Onboarding { .. }));
    assert_eq!(transport.call_count(), calls);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_duplicate_serial_at_new_url_is_rejected() {
    let (transport, scheduler, registry) = setup();
    script(&transport, SYSTEM_INFO);
    add_appliance(
        &scheduler,
        &registry,
        Url::parse("https://edge-1.example.com").unwrap(),
        password(),
    )
    .await
    .unwrap();

    let err = add_appliance(
        &scheduler,
        &registry,
        Url::parse("https://10.0.0.1").unwrap(),
        password(),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("012801000001"));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_rejected_credentials_leave_registry_untouched() {
    let (transport, scheduler, registry) = setup();
    transport.on_key_gen(Err(CoreError::Api {
        message: "Request failed (Invalid Credential)".into(),
    }));

    let err = add_appliance(
        &scheduler,
        &registry,
        Url::parse("https://edge-1.example.com").unwrap(),
        password(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.to_string(), "Request failed (Invalid Credential)");
    assert!(registry.is_empty());
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn test_incomplete_system_info_is_a_decode_error() {
    let (transport, scheduler, registry) = setup();
    transport
        .on_op_xml(OP_SHOW_SYSTEM_INFO, "<result><system><model>PA-850</model></system></result>")
        .unwrap();

    let err = add_appliance(
        &scheduler,
        &registry,
        Url::parse("https://edge-1.example.com").unwrap(),
        ApplianceCredentials::ApiKey(SecretString::from("k")),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CoreError::Decode { .. }));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_queued_discovery_is_not_cancelable_by_serial() {
    let transport = Arc::new(MockTransport::new());
    let config = ConfigHandle::new(PollingConfig {
        max_running_requests: 1,
        ..PollingConfig::default()
    });
    let scheduler = RequestScheduler::spawn(transport.clone(), config.subscribe());
    let registry = Arc::new(ApplianceRegistry::new());
    script(&transport, &SYSTEM_INFO.replace("<multi-vsys>on", "<multi-vsys>off"));
    let url = Url::parse("https://edge-1.example.com").unwrap();

    // Occupy the only slot so the discovery call stays queued.
    transport.gate();
    let key = SecretString::from("existing");
    let blocker = {
        let scheduler = scheduler.clone();
        let url = url.clone();
        let key = key.clone();
        tokio::spawn(async move { scheduler.op(&url, &key, "other", "<busy/>", None).await })
    };
    transport.wait_for_waiting(1).await;

    let onboarding = {
        let scheduler = scheduler.clone();
        let registry = Arc::clone(&registry);
        let url = url.clone();
        tokio::spawn(async move {
            add_appliance(&scheduler, &registry, url, ApplianceCredentials::ApiKey(key)).await
        })
    };
    loop {
        let queued = scheduler
            .stats()
            .await
            .values()
            .map(|s| s.queued)
            .sum::<usize>();
        if queued == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let dropped = scheduler
        .cancel_queued_for_appliance(&url, "012801000001")
        .await;
    assert_eq!(dropped, 0);

    transport.open();
    assert!(blocker.await.unwrap().is_ok());
    let appliance = onboarding.await.unwrap().unwrap();
    assert_eq!(appliance.serial, "012801000001");
}
