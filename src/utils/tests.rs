use super::*;
use proptest::prelude::*;

#[test]
fn ensure_dir_creates_and_returns() {
    let tmp = tempfile::tempdir().unwrap();
    let new_dir = tmp.path().join("subdir");
    let result = ensure_dir(&new_dir).unwrap();
    assert_eq!(result, new_dir);
    assert!(new_dir.exists());
}

#[test]
fn atomic_write_creates_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("nested").join("config.json");
    atomic_write(&path, "{\"a\":1}").unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":1}");
}

#[test]
fn atomic_write_overwrites_existing() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("config.json");
    atomic_write(&path, "old").unwrap();
    atomic_write(&path, "new").unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
}

#[test]
fn normalize_phone_strips_formatting() {
    assert_eq!(normalize_phone("+1 415-555-0100"), "14155550100");
    assert_eq!(normalize_phone("(11) 98888-7777"), "11988887777");
    assert_eq!(normalize_phone("5511999990000"), "5511999990000");
    assert_eq!(normalize_phone("abc"), "");
}

#[test]
fn normalize_phone_ignores_non_ascii_digits() {
    // Arabic-Indic digits are not valid in the messaging API's `to` field
    assert_eq!(normalize_phone("٠١٢3"), "3");
}

#[test]
fn truncate_for_log_respects_char_boundaries() {
    assert_eq!(truncate_for_log("olá mundo", 3), "olá...");
    assert_eq!(truncate_for_log("short", 10), "short");
}

proptest! {
    #[test]
    fn normalize_phone_output_is_digits_only(raw in ".{0,40}") {
        let out = normalize_phone(&raw);
        prop_assert!(out.chars().all(|c| c.is_ascii_digit()));
        prop_assert!(out.len() <= raw.len());
    }

    #[test]
    fn normalize_phone_is_idempotent(raw in "[0-9 +()-]{0,30}") {
        let once = normalize_phone(&raw);
        prop_assert_eq!(normalize_phone(&once), once.clone());
    }
}
