use std::fs;

use profile_scan::{AddOutcome, ReferenceStore};

#[test]
fn load_missing_file_is_empty() {
    let td = tempfile::tempdir().unwrap();
    let store = ReferenceStore::new(td.path().join("known_accounts.txt"));
    assert!(store.load().unwrap().is_empty());
}

#[test]
fn load_skips_malformed_rows_and_keeps_order() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("known_accounts.txt");
    fs::write(
        &path,
        "b;02.02.2021\n\nno separator here\n;01.01.2020\nbad;31.02.2024\n a ; 1/2/20 \nb;03.03.2023\n",
    )
    .unwrap();
    let entries = ReferenceStore::new(&path).load().unwrap();
    let lines: Vec<String> = entries.iter().map(|e| e.to_line()).collect();
    assert_eq!(lines, vec!["b;02.02.2021", "a;01.02.2020", "b;03.03.2023"]);
}

#[test]
fn add_twice_writes_one_line() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("known_accounts.txt");
    let store = ReferenceStore::new(&path);

    assert!(matches!(store.add("u1", "01.01.2020").unwrap(), AddOutcome::Added(_)));
    assert!(matches!(store.add("u1", "1/1/20").unwrap(), AddOutcome::Duplicate(_)));
    assert_eq!(fs::read_to_string(&path).unwrap(), "u1;01.01.2020\n");
}

#[test]
fn add_keeps_same_identifier_with_other_dates() {
    let td = tempfile::tempdir().unwrap();
    let store = ReferenceStore::new(td.path().join("known_accounts.txt"));
    store.add("u1", "01.01.2020").unwrap();
    store.add("u1", "05.05.2021").unwrap();
    assert_eq!(store.load().unwrap().len(), 2);
}

#[test]
fn add_with_bad_date_or_identifier_writes_nothing() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("known_accounts.txt");
    let store = ReferenceStore::new(&path);

    assert_eq!(store.add("u1", "31.02.2024").unwrap(), AddOutcome::InvalidDate);
    assert_eq!(store.add("a;b", "01.01.2020").unwrap(), AddOutcome::InvalidIdentifier);
    assert_eq!(store.add("   ", "01.01.2020").unwrap(), AddOutcome::InvalidIdentifier);
    assert!(!path.exists());
}

#[test]
fn added_lines_round_trip_through_load() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("known_accounts.txt");
    // Hand-edited file without a trailing newline.
    fs::write(&path, "seed;10.10.2010").unwrap();
    let store = ReferenceStore::new(&path);
    store.add("x9", "3/4/22").unwrap();
    store.add("y7", "28.02.1999").unwrap();

    let written: Vec<String> = fs::read_to_string(&path).unwrap().lines().map(String::from).collect();
    let loaded: Vec<String> = store.load().unwrap().iter().map(|e| e.to_line()).collect();
    assert_eq!(written, vec!["seed;10.10.2010", "x9;03.04.2022", "y7;28.02.1999"]);
    assert_eq!(loaded, written);
}
