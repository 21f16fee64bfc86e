//! End-to-end pipeline flows through the dispatcher, from a received HL7
//! batch down to the batch/send hand-off, against in-memory collaborators.

use std::sync::{Arc, Mutex};

use serde_json::json;

use reportrelay_config::{
    CustomerStatus, Organization, Receiver, ReceiverRef, Sender, SettingsSnapshot,
};
use reportrelay_core::{
    sha256_hex, Bundle, BundleCodec, BundleEntry, CoreError, EventSink, FhirJsonCodec,
    PipelineEvent, PipelineEventName, ReportFormat, Topic,
};
use reportrelay_filter::{FilterChainEngine, SimpleEvaluator, TableConditionLookup};
use reportrelay_lineage::{
    ActionLogLevel, InMemoryLineageStore, LineageStore, ReportFile, ReportLineageManager,
    TaskAction,
};
use reportrelay_pipeline::{
    BlobStore, DispatchOutcome, InMemoryBlobStore, InMemoryQueue, PipelineContext,
    PipelineDispatcher, QueueMessage, ReportPointer, SchemaStampEnricher,
};

const SENDER: &str = "strac.default";
const COVID_CODE: &str = "94558-5";
const FLU_CODE: &str = "80382-5";

/// Minimal HL7v2 codec for the fixtures in this suite: `PID|<state>` and
/// `OBX|<code>` segments, anything without an MSH and a PID fails to decode.
struct StubHl7Codec {
    inner: FhirJsonCodec,
}

impl StubHl7Codec {
    fn new() -> Self {
        Self {
            inner: FhirJsonCodec,
        }
    }
}

impl BundleCodec for StubHl7Codec {
    fn decode(&self, bytes: &[u8], format: ReportFormat) -> reportrelay_core::Result<Bundle> {
        match format {
            ReportFormat::Fhir => self.inner.decode(bytes, format),
            ReportFormat::Hl7 => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| CoreError::decode("HL7", e.to_string()))?;
                if !text.starts_with("MSH") {
                    return Err(CoreError::decode("HL7", "missing MSH segment"));
                }
                let mut entries = vec![BundleEntry::new(
                    json!({ "resourceType": "MessageHeader", "id": "mh1" }),
                )];
                let mut observation = 0;
                let mut has_pid = false;
                for line in text.split('\r') {
                    let mut fields = line.split('|');
                    match fields.next() {
                        Some("PID") => {
                            has_pid = true;
                            let state = fields.next().unwrap_or_default();
                            entries.push(BundleEntry::new(json!({
                                "resourceType": "Patient",
                                "id": "p1",
                                "address": [{ "state": state }]
                            })));
                        }
                        Some("OBX") => {
                            observation += 1;
                            let code = fields.next().unwrap_or_default();
                            entries.push(BundleEntry::new(json!({
                                "resourceType": "Observation",
                                "id": format!("o{observation}"),
                                "code": { "coding": [
                                    { "system": "http://loinc.org", "code": code }
                                ] }
                            })));
                        }
                        _ => {}
                    }
                }
                if !has_pid {
                    return Err(CoreError::decode("HL7", "missing PID segment"));
                }
                Ok(Bundle::new(entries))
            }
        }
    }

    fn encode(&self, bundle: &Bundle, format: ReportFormat) -> reportrelay_core::Result<Vec<u8>> {
        match format {
            ReportFormat::Fhir => self.inner.encode(bundle, format),
            ReportFormat::Hl7 => {
                let mut out = String::from("MSH|^~\\&|reportrelay");
                if let Some(state) = bundle.patient_state() {
                    out.push_str("\rPID|");
                    out.push_str(&state);
                }
                for code in bundle.observation_codes() {
                    out.push_str("\rOBX|");
                    out.push_str(&code);
                }
                Ok(out.into_bytes())
            }
        }
    }
}

#[derive(Default)]
struct RecordingEventSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingEventSink {
    fn named(&self, name: PipelineEventName) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: PipelineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct Harness {
    ctx: PipelineContext,
    dispatcher: PipelineDispatcher,
    queue: Arc<InMemoryQueue>,
    store: Arc<InMemoryLineageStore>,
    blob: Arc<InMemoryBlobStore>,
    events: Arc<RecordingEventSink>,
}

fn harness(organizations: Vec<Organization>) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let queue = Arc::new(InMemoryQueue::new());
    let store = Arc::new(InMemoryLineageStore::new());
    let blob = Arc::new(InMemoryBlobStore::new());
    let events = Arc::new(RecordingEventSink::default());
    let ctx = PipelineContext {
        settings: Arc::new(SettingsSnapshot::new(organizations).unwrap()),
        codec: Arc::new(StubHl7Codec::new()),
        engine: FilterChainEngine::new(
            Arc::new(SimpleEvaluator),
            Arc::new(TableConditionLookup::from_pairs([
                (COVID_CODE, "COVID-19"),
                (FLU_CODE, "Influenza"),
            ])),
        ),
        lineage: ReportLineageManager::new(store.clone()),
        blob: blob.clone(),
        queue: queue.clone(),
        events: events.clone(),
        enricher: Arc::new(SchemaStampEnricher),
    };
    Harness {
        dispatcher: PipelineDispatcher::new(ctx.clone()),
        ctx,
        queue,
        store,
        blob,
        events,
    }
}

fn sender_org() -> Organization {
    Organization {
        name: "strac".into(),
        description: None,
        senders: vec![Sender {
            name: "default".into(),
            format: ReportFormat::Hl7,
            topic: Topic::FullElr,
            schema_name: "strac/covid-19".into(),
            customer_status: CustomerStatus::Active,
        }],
        receivers: vec![],
    }
}

fn receiver(name: &str, state: &str) -> Receiver {
    Receiver {
        name: name.into(),
        topic: Topic::FullElr,
        format: ReportFormat::Hl7,
        customer_status: CustomerStatus::Active,
        jurisdictional_filter: vec![format!("Patient.address.state = '{state}'")],
        quality_filter: vec![],
        reverse_quality_filter: false,
        routing_filter: vec![],
        processing_mode_filter: vec![],
        condition_filter: vec![],
        mapped_condition_filter: vec![],
        enrichment_schemas: vec![],
        translation_schema: None,
        is_send_original: false,
    }
}

fn receiver_org(name: &str, receivers: Vec<Receiver>) -> Organization {
    Organization {
        name: name.into(),
        description: None,
        senders: vec![],
        receivers,
    }
}

/// Seeds the root report a receive step would have created and returns the
/// convert message pointing at it.
async fn seed_submission(h: &Harness, body: &[u8]) -> (ReportFile, QueueMessage) {
    let url = h.blob.upload("receive/strac.default/root.hl7", body).await.unwrap();
    let digest = sha256_hex(body);
    let root = ReportFile {
        report_id: uuid::Uuid::new_v4(),
        action_id: 0,
        next_action: TaskAction::Convert,
        body_url: Some(url.clone()),
        blob_digest: Some(digest.clone()),
        body_format: ReportFormat::Hl7,
        item_count: 1,
        schema_name: "strac/covid-19".into(),
        schema_topic: Topic::FullElr,
        receiving_org: None,
        receiving_org_svc: None,
        created_at: time::OffsetDateTime::now_utc(),
    };
    let mut tx = h.ctx.lineage.store().begin().await.unwrap();
    tx.insert_report(root.clone()).await.unwrap();
    tx.commit().await.unwrap();
    let message = QueueMessage::Convert {
        pointer: ReportPointer {
            report_id: root.report_id,
            blob_url: url,
            digest,
            blob_sub_folder_name: SENDER.into(),
            topic: Topic::FullElr,
        },
        schema_name: "strac/covid-19".into(),
    };
    (root, message)
}

async fn dispatch_ok(h: &Harness, message: &QueueMessage) -> usize {
    match h.dispatcher.dispatch(&message.to_json().unwrap()).await {
        DispatchOutcome::Completed { enqueued } => enqueued,
        other => panic!("dispatch did not complete: {other:?}"),
    }
}

/// Drives drained messages back through the dispatcher until only batch and
/// send hand-offs remain, and returns those.
async fn run_until_settled(h: &Harness) -> Vec<(String, String)> {
    let mut terminal = Vec::new();
    loop {
        let pending = h.queue.drain().await;
        if pending.is_empty() {
            return terminal;
        }
        for (queue_name, raw) in pending {
            if queue_name == "batch" || queue_name == "send" {
                terminal.push((queue_name, raw));
                continue;
            }
            let outcome = h.dispatcher.dispatch(&raw).await;
            assert!(
                outcome.is_completed(),
                "dispatch on {queue_name} failed: {outcome:?}"
            );
        }
    }
}

fn hl7_batch(items: &[&str]) -> Vec<u8> {
    items.join("\r").into_bytes()
}

const GOOD_TWO_OBS: &str = "MSH|^~\\&|lab\rPID|TX\rOBX|94558-5\rOBX|80382-5";
const GOOD_ONE_OBS: &str = "MSH|^~\\&|lab\rPID|TX\rOBX|94558-5";
const GARBLED: &str = "MSH|^~\\&|lab\rZZZ|garbage";

#[tokio::test]
async fn test_convert_fans_out_items_and_logs_bad_item() {
    let h = harness(vec![sender_org()]);
    let body = hl7_batch(&[GOOD_TWO_OBS, GOOD_ONE_OBS, GARBLED]);
    let (root, message) = seed_submission(&h, &body).await;

    assert_eq!(dispatch_ok(&h, &message).await, 2);

    let children = h.store.fetch_children(root.report_id).await.unwrap();
    assert_eq!(children.len(), 2);
    for child in &children {
        assert_eq!(child.next_action, TaskAction::Route);
        assert_eq!(child.body_format, ReportFormat::Fhir);
        assert_eq!(child.item_count, 1);
        assert_eq!(child.schema_name, "strac/covid-19");
    }

    // Exactly one error log, naming the third item.
    let logs = h
        .store
        .fetch_action_logs(children[0].action_id)
        .await
        .unwrap();
    let errors: Vec<_> = logs
        .iter()
        .filter(|l| l.level == ActionLogLevel::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("Item 3"));
    assert_eq!(errors[0].item_index, Some(3));

    assert_eq!(h.queue.queued_on("route").await.len(), 2);
    assert_eq!(
        h.events.named(PipelineEventName::ItemFailedValidation).len(),
        1
    );
}

#[tokio::test]
async fn test_convert_redelivery_is_idempotent() {
    let h = harness(vec![sender_org()]);
    let (root, message) = seed_submission(&h, &hl7_batch(&[GOOD_ONE_OBS, GOOD_TWO_OBS])).await;

    assert_eq!(dispatch_ok(&h, &message).await, 2);
    let first: Vec<_> = h
        .store
        .fetch_children(root.report_id)
        .await
        .unwrap()
        .iter()
        .map(|c| c.report_id)
        .collect();

    // Same delivery again: no new rows, successors re-sent from the
    // committed children.
    assert_eq!(dispatch_ok(&h, &message).await, 2);
    let second: Vec<_> = h
        .store
        .fetch_children(root.report_id)
        .await
        .unwrap()
        .iter()
        .map(|c| c.report_id)
        .collect();
    assert_eq!(first, second);
    assert_eq!(h.store.report_count().await, 3);
    assert_eq!(h.queue.queued_on("route").await.len(), 4);
}

#[tokio::test]
async fn test_unknown_sender_is_rejected() {
    let h = harness(vec![sender_org()]);
    let (root, message) = seed_submission(&h, &hl7_batch(&[GOOD_ONE_OBS])).await;
    let message = match message {
        QueueMessage::Convert { mut pointer, schema_name } => {
            pointer.blob_sub_folder_name = "nobody.here".into();
            QueueMessage::Convert { pointer, schema_name }
        }
        other => panic!("unexpected message {other:?}"),
    };

    assert_eq!(dispatch_ok(&h, &message).await, 0);
    assert!(h.store.fetch_children(root.report_id).await.unwrap().is_empty());
    assert!(h.queue.is_empty().await);
}

#[tokio::test]
async fn test_rejected_submission_redelivery_stays_childless() {
    let h = harness(vec![sender_org()]);
    let (root, message) = seed_submission(&h, &hl7_batch(&[GOOD_ONE_OBS])).await;
    let message = match message {
        QueueMessage::Convert { mut pointer, schema_name } => {
            pointer.blob_sub_folder_name = "nobody.here".into();
            QueueMessage::Convert { pointer, schema_name }
        }
        other => panic!("unexpected message {other:?}"),
    };

    // A rejection records no children, so a redelivered message cannot be
    // recognized as a replay. It must still complete without fan-out.
    assert_eq!(dispatch_ok(&h, &message).await, 0);
    assert_eq!(dispatch_ok(&h, &message).await, 0);
    assert!(h.store.fetch_children(root.report_id).await.unwrap().is_empty());
    assert!(h.queue.is_empty().await);
}

#[tokio::test]
async fn test_jurisdictional_mismatch_terminates_silently() {
    let h = harness(vec![
        sender_org(),
        receiver_org("tx-doh", vec![receiver("elr", "TX")]),
        receiver_org("il-doh", vec![receiver("elr", "IL")]),
    ]);
    let (root, message) = seed_submission(&h, &hl7_batch(&[GOOD_ONE_OBS])).await;

    dispatch_ok(&h, &message).await;
    let route_parent = h.store.fetch_children(root.report_id).await.unwrap().remove(0);
    for (_, raw) in h.queue.drain().await {
        assert!(h.dispatcher.dispatch(&raw).await.is_completed());
    }

    let branches = h.store.fetch_children(route_parent.report_id).await.unwrap();
    assert_eq!(branches.len(), 2);
    let tx_branch = branches
        .iter()
        .find(|c| c.receiver_full_name().as_deref() == Some("tx-doh.elr"))
        .unwrap();
    let il_branch = branches
        .iter()
        .find(|c| c.receiver_full_name().as_deref() == Some("il-doh.elr"))
        .unwrap();

    assert_eq!(tx_branch.next_action, TaskAction::ReceiverFilter);
    assert!(!tx_branch.is_terminated());
    assert!(il_branch.is_terminated());
    assert_eq!(il_branch.item_count, 0);

    // Jurisdictional mismatches are routine: no action log, no filter event.
    let logs = h
        .store
        .fetch_action_logs(branches[0].action_id)
        .await
        .unwrap();
    assert!(logs.is_empty());
    assert!(h.events.named(PipelineEventName::ItemFilterFailed).is_empty());
    assert_eq!(h.queue.queued_on("receiver_filter").await.len(), 1);
}

#[tokio::test]
async fn test_quality_failure_is_logged_and_terminates() {
    let mut strict = receiver("elr", "TX");
    strict.quality_filter = vec!["exists(Specimen)".into()];
    let h = harness(vec![sender_org(), receiver_org("tx-doh", vec![strict])]);
    let (root, message) = seed_submission(&h, &hl7_batch(&[GOOD_ONE_OBS])).await;

    dispatch_ok(&h, &message).await;
    let route_parent = h.store.fetch_children(root.report_id).await.unwrap().remove(0);
    for (_, raw) in h.queue.drain().await {
        assert!(h.dispatcher.dispatch(&raw).await.is_completed());
    }

    let branches = h.store.fetch_children(route_parent.report_id).await.unwrap();
    assert_eq!(branches.len(), 1);
    assert!(branches[0].is_terminated());

    let logs = h
        .store
        .fetch_action_logs(branches[0].action_id)
        .await
        .unwrap();
    assert!(logs.iter().any(|l| {
        l.level == ActionLogLevel::Filter && l.message.contains("QUALITY_FILTER")
    }));

    let failures = h.events.named(PipelineEventName::ItemFilterFailed);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].params["filterType"], "QUALITY_FILTER");
    assert!(h.queue.is_empty().await);
}

#[tokio::test]
async fn test_reverse_quality_filter_inverts_verdict() {
    // The same failing quality filter, reversed, lets the report through.
    let mut reversed = receiver("elr", "TX");
    reversed.quality_filter = vec!["exists(Specimen)".into()];
    reversed.reverse_quality_filter = true;
    let h = harness(vec![sender_org(), receiver_org("tx-doh", vec![reversed])]);
    let (root, message) = seed_submission(&h, &hl7_batch(&[GOOD_ONE_OBS])).await;

    dispatch_ok(&h, &message).await;
    let route_parent = h.store.fetch_children(root.report_id).await.unwrap().remove(0);
    for (_, raw) in h.queue.drain().await {
        assert!(h.dispatcher.dispatch(&raw).await.is_completed());
    }

    let branches = h.store.fetch_children(route_parent.report_id).await.unwrap();
    assert_eq!(branches.len(), 1);
    assert!(!branches[0].is_terminated());
}

#[tokio::test]
async fn test_condition_filter_prunes_observations() {
    let mut covid_only = receiver("elr", "TX");
    covid_only.condition_filter = vec![format!("%resource.code.coding.code = '{COVID_CODE}'")];
    let h = harness(vec![sender_org(), receiver_org("tx-doh", vec![covid_only])]);
    let (_, message) = seed_submission(&h, &hl7_batch(&[GOOD_TWO_OBS])).await;

    dispatch_ok(&h, &message).await;
    let mut translate_raw = None;
    loop {
        let pending = h.queue.drain().await;
        if pending.is_empty() {
            break;
        }
        for (queue_name, raw) in pending {
            if queue_name == "translate" {
                translate_raw = Some(raw);
            } else {
                assert!(h.dispatcher.dispatch(&raw).await.is_completed());
            }
        }
    }

    // The translate-bound blob holds the pruned bundle: the flu observation
    // is gone, the covid one survives.
    let message = QueueMessage::from_json(&translate_raw.unwrap()).unwrap();
    let body = h.blob.download(&message.pointer().blob_url).await.unwrap();
    let pruned = StubHl7Codec::new().decode(&body, ReportFormat::Fhir).unwrap();
    assert_eq!(pruned.observation_codes(), vec![COVID_CODE.to_string()]);
    assert!(pruned.first_of_type("Patient").is_some());
}

#[tokio::test]
async fn test_mapped_condition_filter_uses_lookup() {
    let mut mapped = receiver("elr", "TX");
    mapped.mapped_condition_filter = vec!["COVID-19".into()];
    let h = harness(vec![sender_org(), receiver_org("tx-doh", vec![mapped])]);
    let (_, message) = seed_submission(&h, &hl7_batch(&[GOOD_TWO_OBS])).await;

    dispatch_ok(&h, &message).await;
    let terminal = run_until_settled(&h).await;

    assert_eq!(terminal.len(), 1);
    let (queue_name, raw) = &terminal[0];
    assert_eq!(queue_name, "batch");
    let message = QueueMessage::from_json(raw).unwrap();
    let body = h.blob.download(&message.pointer().blob_url).await.unwrap();
    // Translated to the receiver's HL7 format, flu observation pruned.
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("OBX|94558-5"));
    assert!(!text.contains("OBX|80382-5"));
}

#[tokio::test]
async fn test_condition_filter_rejecting_all_terminates() {
    let mut nothing = receiver("elr", "TX");
    nothing.condition_filter = vec!["%resource.code.coding.code = '11111-1'".into()];
    let h = harness(vec![sender_org(), receiver_org("tx-doh", vec![nothing])]);
    let (_, message) = seed_submission(&h, &hl7_batch(&[GOOD_TWO_OBS])).await;

    dispatch_ok(&h, &message).await;
    let terminal = run_until_settled(&h).await;
    assert!(terminal.is_empty());

    let failures = h.events.named(PipelineEventName::ItemFilterFailed);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].params["filterType"], "CONDITION_FILTER");
    assert_eq!(failures[0].params["receiverName"], "tx-doh.elr");
}

#[tokio::test]
async fn test_enrichment_stage_applies_schemas() {
    let mut enriched = receiver("elr", "TX");
    enriched.enrichment_schemas = vec!["tx/elr-enrichment".into()];
    let h = harness(vec![sender_org(), receiver_org("tx-doh", vec![enriched])]);
    let (_, message) = seed_submission(&h, &hl7_batch(&[GOOD_ONE_OBS])).await;

    dispatch_ok(&h, &message).await;
    // Drive convert and route through; hold the enrichment stage's output so
    // it can be inspected before receiver filtering consumes it.
    let mut filter_raw = None;
    loop {
        let pending = h.queue.drain().await;
        if pending.is_empty() {
            break;
        }
        for (queue_name, raw) in pending {
            if queue_name == "receiver_filter" {
                filter_raw = Some(raw);
            } else {
                assert!(h.dispatcher.dispatch(&raw).await.is_completed());
            }
        }
    }

    // Route targeted the enrichment stage, which stamped the header and
    // forwarded to receiver filtering.
    let message = QueueMessage::from_json(&filter_raw.expect("no receiver_filter message")).unwrap();
    let body = h.blob.download(&message.pointer().blob_url).await.unwrap();
    let bundle = StubHl7Codec::new().decode(&body, ReportFormat::Fhir).unwrap();
    let header = bundle.first_of_type("MessageHeader").unwrap();
    assert_eq!(header["source"]["software"], "tx/elr-enrichment");

    let transformed = h.events.named(PipelineEventName::ItemTransformed);
    assert!(
        transformed
            .iter()
            .any(|e| e.params["enrichments"] == json!(["tx/elr-enrichment"]))
    );
}

#[tokio::test]
async fn test_full_pipeline_reaches_batch() {
    let h = harness(vec![
        sender_org(),
        receiver_org("tx-doh", vec![receiver("elr", "TX")]),
    ]);
    let (root, message) = seed_submission(&h, &hl7_batch(&[GOOD_ONE_OBS])).await;

    dispatch_ok(&h, &message).await;
    let terminal = run_until_settled(&h).await;

    assert_eq!(terminal.len(), 1);
    let (queue_name, raw) = &terminal[0];
    assert_eq!(queue_name, "batch");
    let message = QueueMessage::from_json(raw).unwrap();
    assert_eq!(message.receiver_full_name(), Some("tx-doh.elr"));

    // The batch-bound body is the receiver's HL7 rendering, and its digest
    // matches the message.
    let body = h.blob.download(&message.pointer().blob_url).await.unwrap();
    assert!(body.starts_with(b"MSH|"));
    assert_eq!(sha256_hex(&body), message.pointer().digest);

    // Lineage: root -> convert child -> route child -> filter child ->
    // translate child, each stage one hop.
    let convert_child = h.store.fetch_children(root.report_id).await.unwrap().remove(0);
    let route_child = h
        .store
        .fetch_children(convert_child.report_id)
        .await
        .unwrap()
        .remove(0);
    let filter_child = h
        .store
        .fetch_children(route_child.report_id)
        .await
        .unwrap()
        .remove(0);
    let translate_child = h
        .store
        .fetch_children(filter_child.report_id)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(translate_child.report_id, message.pointer().report_id);
    assert_eq!(translate_child.next_action, TaskAction::Batch);
    assert_eq!(translate_child.body_format, ReportFormat::Hl7);
    assert_eq!(
        translate_child.receiver_full_name().as_deref(),
        Some("tx-doh.elr")
    );
}

#[tokio::test]
async fn test_send_original_skips_translation() {
    let mut original = receiver("elr", "TX");
    original.is_send_original = true;
    let h = harness(vec![sender_org(), receiver_org("tx-doh", vec![original])]);
    let (_, message) = seed_submission(&h, &hl7_batch(&[GOOD_ONE_OBS])).await;

    dispatch_ok(&h, &message).await;
    let terminal = run_until_settled(&h).await;

    assert_eq!(terminal.len(), 1);
    let (queue_name, raw) = &terminal[0];
    assert_eq!(queue_name, "send");
    let message = QueueMessage::from_json(raw).unwrap();

    // The body is forwarded untouched: the canonical FHIR the receiver
    // filter produced, not an HL7 re-encode.
    let body = h.blob.download(&message.pointer().blob_url).await.unwrap();
    assert!(StubHl7Codec::new().decode(&body, ReportFormat::Fhir).is_ok());
}

#[tokio::test]
async fn test_inactive_receiver_branch_terminates() {
    let mut inactive = receiver("elr", "TX");
    inactive.customer_status = CustomerStatus::Inactive;
    let h = harness(vec![sender_org(), receiver_org("tx-doh", vec![inactive])]);
    let (root, message) = seed_submission(&h, &hl7_batch(&[GOOD_ONE_OBS])).await;

    dispatch_ok(&h, &message).await;
    let route_parent = h.store.fetch_children(root.report_id).await.unwrap().remove(0);
    for (_, raw) in h.queue.drain().await {
        assert!(h.dispatcher.dispatch(&raw).await.is_completed());
    }

    let branches = h.store.fetch_children(route_parent.report_id).await.unwrap();
    assert_eq!(branches.len(), 1);
    assert!(branches[0].is_terminated());
    assert!(h.queue.is_empty().await);
}

#[tokio::test]
async fn test_no_subscribed_receivers_records_zero_children() {
    let h = harness(vec![sender_org()]);
    let (root, message) = seed_submission(&h, &hl7_batch(&[GOOD_ONE_OBS])).await;

    dispatch_ok(&h, &message).await;
    let route_parent = h.store.fetch_children(root.report_id).await.unwrap().remove(0);
    for (_, raw) in h.queue.drain().await {
        assert!(h.dispatcher.dispatch(&raw).await.is_completed());
    }

    assert!(
        h.store
            .fetch_children(route_parent.report_id)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(h.queue.is_empty().await);
}

/// A receiver reference must stay valid across the whole flow: the
/// receiver-scoped stages look the receiver up again from the same snapshot.
#[tokio::test]
async fn test_receiver_ref_round_trips_through_messages() {
    let parsed = ReceiverRef::parse("tx-doh.elr").unwrap();
    assert_eq!(parsed.organization_name, "tx-doh");
    assert_eq!(parsed.receiver_name, "elr");
    assert_eq!(parsed.full_name(), "tx-doh.elr");
}
