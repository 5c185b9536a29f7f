use super::*;

#[test]
fn config_error_display() {
    let err = ScalazapError::Config("bad value".into());
    assert_eq!(err.to_string(), "Configuration error: bad value");
}

#[test]
fn no_connection_is_client_error() {
    let err = ScalazapError::NoConnection("no connected line".into());
    assert!(err.is_client_error());
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(err.to_string(), "No usable connection: no connected line");
}

#[test]
fn validation_is_client_error() {
    let err = ScalazapError::Validation("to is required".into());
    assert!(err.is_client_error());
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
}

#[test]
fn provider_error_is_server_side() {
    let err = ScalazapError::Provider {
        message: "(#131030) Recipient not in allowed list".into(),
    };
    assert!(!err.is_client_error());
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        err.to_string(),
        "Provider error: (#131030) Recipient not in allowed list"
    );
}

#[test]
fn internal_from_anyhow() {
    let anyhow_err = anyhow::anyhow!("something broke");
    let err: ScalazapError = anyhow_err.into();
    assert!(matches!(err, ScalazapError::Internal(_)));
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[test]
fn store_from_rusqlite() {
    let err: ScalazapError = rusqlite::Error::QueryReturnedNoRows.into();
    assert!(matches!(err, ScalazapError::Store(_)));
    assert!(!err.is_client_error());
}
