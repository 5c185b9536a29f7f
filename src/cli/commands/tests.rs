use super::subcommands::{format_message_line, list_filter, new_connection};
use super::*;
use crate::models::{ConnectionStatus, MessageRecord, MessageType};
use crate::store::fields::{FieldValue, MessageField};
use chrono::TimeZone;

#[test]
fn test_parse_send_command() {
    let cli = Cli::try_parse_from([
        "scalazap",
        "send",
        "--to",
        "+55 11 98888-7777",
        "-m",
        "Olá",
        "--connection",
        "conn-1",
    ])
    .unwrap();
    match cli.command {
        Commands::Send {
            to,
            message,
            connection,
            company,
        } => {
            assert_eq!(to, "+55 11 98888-7777");
            assert_eq!(message, "Olá");
            assert_eq!(connection.as_deref(), Some("conn-1"));
            assert!(company.is_none());
        }
        _ => panic!("expected send"),
    }
}

#[test]
fn test_global_config_flag() {
    let cli = Cli::try_parse_from(["scalazap", "logs", "--config", "/tmp/x.json"]).unwrap();
    assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.json")));
    assert!(matches!(cli.command, Commands::Logs { limit: 20 }));
}

#[test]
fn test_send_requires_recipient() {
    assert!(Cli::try_parse_from(["scalazap", "send", "-m", "hi"]).is_err());
}

#[test]
fn test_connections_add_defaults_to_connected() {
    let cli = Cli::try_parse_from([
        "scalazap",
        "connections",
        "add",
        "-n",
        "Vendas",
        "--phone-number-id",
        "1098",
        "--access-token",
        "EAAG",
    ])
    .unwrap();
    let Commands::Connections {
        cmd: ConnectionCommands::Add { status, id, .. },
    } = cli.command
    else {
        panic!("expected connections add");
    };
    assert_eq!(status, "connected");
    assert!(id.is_none());
}

#[test]
fn test_new_connection_generates_id() {
    let conn = new_connection(
        "Vendas".into(),
        "1098".into(),
        "EAAG".into(),
        None,
        "pending",
        Some("acme".into()),
    );
    assert_eq!(conn.id.len(), 36);
    assert_eq!(conn.status, ConnectionStatus::Pending);
    assert_eq!(conn.company_id.as_deref(), Some("acme"));

    let named = new_connection("x".into(), "1".into(), "t".into(), Some("c1".into()), "weird", None);
    assert_eq!(named.id, "c1");
    assert_eq!(named.status, ConnectionStatus::Other("weird".into()));
}

#[test]
fn test_list_filter_normalizes_sender() {
    let filter = list_filter(Some("+55 (11) 9999-0000"), true, 5000);
    assert_eq!(filter.limit, crate::store::MAX_LIST_LIMIT);
    assert_eq!(
        filter.conditions,
        vec![
            (MessageField::FromNumber, FieldValue::Text("551199990000".into())),
            (MessageField::Processed, FieldValue::Bool(false)),
        ]
    );
}

#[test]
fn test_format_message_line() {
    let record = MessageRecord {
        message_id: "wamid.1".into(),
        from_number: "5511999990000".into(),
        to_number: "15550001111".into(),
        contact_name: None,
        body: "oi".into(),
        message_type: MessageType::Text,
        phone_number_id: "1098".into(),
        timestamp: chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
        is_from_me: false,
        processed: false,
        replied: false,
        media_id: None,
        status: None,
    };
    assert_eq!(
        format_message_line(&record),
        "2024-03-01 12:30:00 \u{2190} 5511999990000 [text] oi"
    );
}

#[test]
fn test_init_writes_config_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    init(Some(path.clone()), false).unwrap();
    assert!(path.exists());

    std::fs::write(&path, "{\"gateway\": {\"port\": 9000}}").unwrap();
    init(Some(path.clone()), false).unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("9000"));

    init(Some(path.clone()), true).unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("8787"));
}
