use super::*;
use crate::config::PacerKind;
use crate::errors::ScalazapResult;
use crate::models::{Connection, MessageType, RawWebhookLog, StatusUpdate, TemplateLanguage, TemplateRef};
use crate::store::{InsertOutcome, MessageFilter, MessageUpdate, SqliteStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Clone)]
enum Scripted {
    Accept(Option<&'static str>),
    Reject(&'static str),
    Transport(&'static str),
}

/// Messaging API double: answers per recipient, records every call.
#[derive(Default)]
struct ScriptedApi {
    answers: HashMap<String, Scripted>,
    calls: Mutex<Vec<(String, SendContent, Instant)>>,
}

impl ScriptedApi {
    fn answer(mut self, recipient: &str, answer: Scripted) -> Self {
        self.answers.insert(recipient.to_string(), answer);
        self
    }

    fn recipients(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.0.clone()).collect()
    }
}

#[async_trait]
impl MessagingApi for ScriptedApi {
    async fn send(
        &self,
        _credentials: &Credentials,
        recipient: &str,
        content: &SendContent,
    ) -> anyhow::Result<SendOutcome> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((recipient.to_string(), content.clone(), Instant::now()));
            calls.len()
        };
        match self.answers.get(recipient) {
            Some(Scripted::Accept(id)) => Ok(SendOutcome::Accepted {
                message_id: id.map(str::to_string),
            }),
            Some(Scripted::Reject(msg)) => Ok(SendOutcome::Rejected {
                message: (*msg).to_string(),
            }),
            Some(Scripted::Transport(msg)) => Err(anyhow::anyhow!("{}", msg)),
            None => Ok(SendOutcome::Accepted {
                message_id: Some(format!("wamid.{n}")),
            }),
        }
    }
}

/// Store that refuses every insert.
struct ReadOnlyStore(SqliteStore);

#[async_trait]
impl MessageStore for ReadOnlyStore {
    async fn insert_message_if_absent(&self, _: &MessageRecord) -> ScalazapResult<InsertOutcome> {
        Err(ScalazapError::Store("attempt to write a readonly database".into()))
    }
    async fn get_message(&self, id: &str) -> ScalazapResult<Option<MessageRecord>> {
        self.0.get_message(id).await
    }
    async fn list_messages(&self, f: &MessageFilter) -> ScalazapResult<Vec<MessageRecord>> {
        self.0.list_messages(f).await
    }
    async fn update_message(&self, id: &str, u: &MessageUpdate) -> ScalazapResult<bool> {
        self.0.update_message(id, u).await
    }
    async fn apply_status(&self, u: &StatusUpdate) -> ScalazapResult<bool> {
        self.0.apply_status(u).await
    }
    async fn clear_messages(&self) -> ScalazapResult<usize> {
        self.0.clear_messages().await
    }
    async fn append_webhook_log(&self, log: &RawWebhookLog) -> ScalazapResult<i64> {
        self.0.append_webhook_log(log).await
    }
    async fn recent_webhook_logs(&self, limit: usize) -> ScalazapResult<Vec<RawWebhookLog>> {
        self.0.recent_webhook_logs(limit).await
    }
    async fn upsert_connection(&self, c: &Connection) -> ScalazapResult<()> {
        self.0.upsert_connection(c).await
    }
    async fn get_connection(&self, id: &str) -> ScalazapResult<Option<Connection>> {
        self.0.get_connection(id).await
    }
    async fn first_connected(&self, company: Option<&str>) -> ScalazapResult<Option<Connection>> {
        self.0.first_connected(company).await
    }
    async fn list_connections(&self) -> ScalazapResult<Vec<Connection>> {
        self.0.list_connections().await
    }
}

fn creds() -> Credentials {
    Credentials {
        phone_number_id: "1098".into(),
        access_token: "tok".into(),
    }
}

fn config(pacer: PacerKind) -> DispatchConfig {
    DispatchConfig {
        default_delay_ms: 0,
        pacer,
        max_batch_size: 10,
    }
}

fn batch(n: usize) -> Vec<OutboundSendRequest> {
    (1..=n)
        .map(|i| OutboundSendRequest::text(format!("+55 11 9000-000{i}"), format!("msg {i}")))
        .collect()
}

#[tokio::test]
async fn test_batch_counts_failures_and_continues() {
    let api = Arc::new(
        ScriptedApi::default()
            .answer("551190000002", Scripted::Reject("(#131026) Message undeliverable"))
            .answer("551190000005", Scripted::Transport("connection reset by peer")),
    );
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let dispatcher = Dispatcher::new(api.clone(), store.clone(), config(PacerKind::Fixed));

    let report = dispatcher
        .dispatch_batch(&creds(), &batch(6), None, Some("b-1".into()))
        .await
        .unwrap();

    assert_eq!(report.sent, 4);
    assert_eq!(report.failed, 2);
    assert_eq!(
        report.errors,
        vec![
            "551190000002: (#131026) Message undeliverable".to_string(),
            "551190000005: connection reset by peer".to_string(),
        ]
    );
    assert_eq!(report.batch_id.as_deref(), Some("b-1"));
    assert!(report.unrecorded.is_empty());

    // Every item attempted, in input order
    let expected: Vec<String> = (1..=6).map(|i| format!("55119000000{i}")).collect();
    assert_eq!(api.recipients(), expected);
    assert_eq!(report.outcomes.len(), 6);
    assert!(matches!(report.outcomes[1], ItemOutcome::Failed { .. }));

    let stored = store.list_messages(&MessageFilter::default()).await.unwrap();
    assert_eq!(stored.len(), 4);
    assert!(stored.iter().all(|m| m.is_from_me && m.from_number == "1098"));
}

#[tokio::test]
async fn test_batch_paced_by_interval() {
    let api = Arc::new(ScriptedApi::default());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let dispatcher = Dispatcher::new(api.clone(), store, config(PacerKind::Fixed));

    let interval = Duration::from_millis(25);
    let start = Instant::now();
    let report = dispatcher
        .dispatch_batch(&creds(), &batch(5), Some(interval), None)
        .await
        .unwrap();
    assert_eq!(report.sent, 5);
    assert!(start.elapsed() >= interval * 4);

    let calls = api.calls.lock().unwrap();
    // First item is not delayed relative to the start
    assert!(calls[0].2.duration_since(start) < interval);
    for pair in calls.windows(2) {
        assert!(pair[1].2.duration_since(pair[0].2) >= interval);
    }
}

#[tokio::test]
async fn test_quota_pacer_batch_also_spaced() {
    let api = Arc::new(ScriptedApi::default());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let dispatcher = Dispatcher::new(api, store, config(PacerKind::Quota));

    let start = Instant::now();
    dispatcher
        .dispatch_batch(&creds(), &batch(3), Some(Duration::from_millis(30)), None)
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_millis(55));
}

#[tokio::test]
async fn test_invalid_items_fail_without_provider_call() {
    let api = Arc::new(ScriptedApi::default());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let dispatcher = Dispatcher::new(api.clone(), store, config(PacerKind::Fixed));

    let items = vec![
        OutboundSendRequest::text("abc", "hello"),
        OutboundSendRequest::text("5511", ""),
        OutboundSendRequest {
            to: "5512".into(),
            message: None,
            template: Some(TemplateRef {
                name: "promo".into(),
                language: None,
                components: Some(vec![]),
            }),
            ..OutboundSendRequest::default()
        },
        OutboundSendRequest::text("5513", "ok"),
    ];
    let report = dispatcher
        .dispatch_batch(&creds(), &items, None, None)
        .await
        .unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 3);
    assert_eq!(report.errors[0], "abc: recipient phone number is required");
    assert_eq!(report.errors[1], "5511: message is required");
    assert_eq!(report.errors[2], "5512: template language code is required");
    assert_eq!(api.recipients(), vec!["5513".to_string()]);
}

#[tokio::test]
async fn test_batch_size_limits() {
    let dispatcher = Dispatcher::new(
        Arc::new(ScriptedApi::default()),
        Arc::new(SqliteStore::open_in_memory().unwrap()),
        config(PacerKind::Fixed),
    );
    let empty = dispatcher.dispatch_batch(&creds(), &[], None, None).await;
    assert!(matches!(empty, Err(ScalazapError::Validation(_))));

    let too_many = dispatcher
        .dispatch_batch(&creds(), &batch(11), None, None)
        .await
        .unwrap_err();
    assert!(too_many.to_string().contains("maxBatchSize"));
}

#[tokio::test]
async fn test_request_delay_bounds() {
    let api = Arc::new(ScriptedApi::default());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    let fixed = Dispatcher::new(api.clone(), store.clone(), config(PacerKind::Fixed));
    let err = fixed
        .dispatch_batch(&creds(), &batch(2), Some(Duration::from_millis(u64::MAX)), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ScalazapError::Validation(ref m) if m.contains("delayMs")));
    let err = fixed
        .dispatch_batch(&creds(), &batch(2), Some(Duration::from_millis(600_001)), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ScalazapError::Validation(_)));

    let quota = Dispatcher::new(api.clone(), store, config(PacerKind::Quota));
    let err = quota
        .dispatch_batch(&creds(), &batch(2), Some(Duration::ZERO), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("quota pacer"));
    // Falls back to defaultDelayMs, which is 0 here
    assert!(quota.dispatch_batch(&creds(), &batch(2), None, None).await.is_err());

    assert!(api.recipients().is_empty());
}

#[tokio::test]
async fn test_unrecorded_reported_separately() {
    let api = Arc::new(ScriptedApi::default().answer("5511", Scripted::Accept(Some("wamid.Z"))));
    let store = Arc::new(ReadOnlyStore(SqliteStore::open_in_memory().unwrap()));
    let dispatcher = Dispatcher::new(api, store, config(PacerKind::Fixed));

    let report = dispatcher
        .dispatch_batch(&creds(), &[OutboundSendRequest::text("5511", "hi")], None, None)
        .await
        .unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.unrecorded, vec!["wamid.Z".to_string()]);
}

#[tokio::test]
async fn test_send_one_end_to_end() {
    let api = Arc::new(ScriptedApi::default().answer("14155550100", Scripted::Accept(Some("wamid.X"))));
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let dispatcher = Dispatcher::new(api.clone(), store.clone(), config(PacerKind::Fixed));

    let sent = dispatcher
        .send_one(&creds(), &OutboundSendRequest::text("+1 415-555-0100", "Hi"))
        .await
        .unwrap();
    assert_eq!(sent.message_id, "wamid.X");
    assert_eq!(sent.recipient, "14155550100");
    assert!(sent.recorded);
    assert_eq!(api.recipients(), vec!["14155550100".to_string()]);

    let record = store.get_message("wamid.X").await.unwrap().unwrap();
    assert!(record.is_from_me);
    assert_eq!(record.to_number, "14155550100");
    assert_eq!(record.body, "Hi");
    assert_eq!(record.status.as_deref(), Some("sent"));
}

#[tokio::test]
async fn test_send_one_placeholder_id() {
    let api = Arc::new(ScriptedApi::default().answer("5511", Scripted::Accept(None)));
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let dispatcher = Dispatcher::new(api, store.clone(), config(PacerKind::Fixed));

    let sent = dispatcher
        .send_one(&creds(), &OutboundSendRequest::text("5511", "x"))
        .await
        .unwrap();
    assert!(sent.message_id.starts_with("local-"));
    assert!(store.get_message(&sent.message_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_send_one_errors() {
    let api = Arc::new(
        ScriptedApi::default()
            .answer("1", Scripted::Reject("Invalid OAuth access token."))
            .answer("2", Scripted::Transport("timed out")),
    );
    let dispatcher = Dispatcher::new(
        api.clone(),
        Arc::new(SqliteStore::open_in_memory().unwrap()),
        config(PacerKind::Fixed),
    );

    let rejected = dispatcher
        .send_one(&creds(), &OutboundSendRequest::text("1", "x"))
        .await
        .unwrap_err();
    assert!(matches!(rejected, ScalazapError::Provider { ref message } if message == "Invalid OAuth access token."));
    assert_eq!(rejected.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);

    let transport = dispatcher
        .send_one(&creds(), &OutboundSendRequest::text("2", "x"))
        .await
        .unwrap_err();
    assert!(matches!(transport, ScalazapError::Provider { .. }));

    let invalid = dispatcher
        .send_one(&creds(), &OutboundSendRequest::text("", "x"))
        .await
        .unwrap_err();
    assert!(invalid.is_client_error());
    assert_eq!(api.recipients().len(), 2);
}

#[tokio::test]
async fn test_template_send_recorded_with_template_type() {
    let api = Arc::new(ScriptedApi::default().answer("5511", Scripted::Accept(Some("wamid.T"))));
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let dispatcher = Dispatcher::new(api.clone(), store.clone(), config(PacerKind::Fixed));

    let request = OutboundSendRequest {
        to: "5511".into(),
        message: None,
        template: Some(TemplateRef {
            name: "hello_world".into(),
            language: Some(TemplateLanguage::Object { code: "en_US".into() }),
            components: Some(vec![]),
        }),
        ..OutboundSendRequest::default()
    };
    dispatcher.send_one(&creds(), &request).await.unwrap();

    let record = store.get_message("wamid.T").await.unwrap().unwrap();
    assert_eq!(record.message_type, MessageType::Template);
    assert_eq!(record.body, "[template: hello_world]");
    let calls = api.calls.lock().unwrap();
    assert!(matches!(&calls[0].1, SendContent::Template { language, .. } if language == "en_US"));
}

#[test]
fn test_report_serializes_camel_case_without_outcomes() {
    let report = BatchReport {
        batch_id: Some("b".into()),
        sent: 1,
        failed: 0,
        errors: vec![],
        outcomes: vec![ItemOutcome::Failed {
            recipient: "1".into(),
            error: "x".into(),
        }],
        unrecorded: vec![],
    };
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["batchId"], "b");
    assert!(json.get("outcomes").is_none());
}
