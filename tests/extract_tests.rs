use profile_scan::{extract, extract_with, ProfileRecord, Vocabulary};

const SCREEN: &str = "Max Mustermann
Privater Nutzer
Aktiv seit 15.03.2019
12 Anzeigen online / 34 gesamt
Antwortet in der Regel innerhalb von 10 Minuten
57 Follower  3 Folge ich
TOP Zufriedenheit
Besonders freundlich
Sicher bezahlen";

#[test]
fn full_profile_screen() {
    let p = extract(SCREEN);
    assert_eq!(p.name.as_deref(), Some("Max Mustermann"));
    assert_eq!(p.registration_date.map(|d| d.to_string()).as_deref(), Some("15.03.2019"));
    assert_eq!(p.online_listings, Some(12));
    assert_eq!(p.total_listings, Some(34));
    assert_eq!(p.followers, Some(57));
    assert_eq!(p.badges, vec!["TOP Zufriedenheit", "Besonders freundlich", "Freundlich"]);
}

#[test]
fn only_registration_date() {
    let p = extract("Aktiv seit 15.03.2019");
    assert_eq!(p.registration_date.map(|d| d.to_string()).as_deref(), Some("15.03.2019"));
    assert_eq!(p.name, None);
    assert_eq!(p.online_listings, None);
    assert_eq!(p.total_listings, None);
    assert_eq!(p.followers, None);
    assert!(p.badges.is_empty());
}

#[test]
fn empty_text_yields_empty_record() {
    assert_eq!(extract(""), ProfileRecord::default());
    assert_eq!(extract("\n \n\t"), ProfileRecord::default());
}

#[test]
fn listings_combined_and_online_only() {
    let both = extract("42 Anzeigen online / 100 gesamt");
    assert_eq!((both.online_listings, both.total_listings), (Some(42), Some(100)));

    let online = extract("42 Anzeigen online");
    assert_eq!((online.online_listings, online.total_listings), (Some(42), None));

    let spaced = extract("7 ANZEIGEN ONLINE/9 Gesamt");
    assert_eq!((spaced.online_listings, spaced.total_listings), (Some(7), Some(9)));
}

#[test]
fn date_pattern_is_case_insensitive_and_accepts_short_forms() {
    let upper = extract("AKTIV SEIT 1.1.20");
    assert_eq!(upper.registration_date.map(|d| d.to_string()).as_deref(), Some("01.01.2020"));

    let glued = extract("Aktivseit01/02/20");
    assert_eq!(glued.registration_date.map(|d| d.to_string()).as_deref(), Some("01.02.2020"));

    let invalid = extract("Aktiv seit 31.02.2024");
    assert_eq!(invalid.registration_date, None);
}

#[test]
fn badges_follow_vocabulary_order() {
    let p = extract("Naja\nsehr zuverlässig\nTOP Zufriedenheit");
    assert_eq!(p.badges, vec!["TOP Zufriedenheit", "Sehr zuverlässig", "Zuverlässig", "Naja"]);
}

#[test]
fn name_skips_short_blank_and_boilerplate_lines() {
    let p = extract("M\n   \nPRIVATER NUTZER\n  Jo  \nAnna");
    assert_eq!(p.name.as_deref(), Some("Jo"));
}

#[test]
fn large_counts_are_kept() {
    let p = extract("99999999999 Follower\n5000000000 Anzeigen online / 6000000000 gesamt");
    assert_eq!(p.followers, Some(99_999_999_999));
    assert_eq!(p.online_listings, Some(5_000_000_000));
    assert_eq!(p.total_listings, Some(6_000_000_000));
}

#[test]
fn counts_beyond_u64_leave_field_absent() {
    let p = extract("123456789012345678901234567890 Follower\n5 Anzeigen online");
    assert_eq!(p.followers, None);
    assert_eq!(p.online_listings, Some(5));
}

#[test]
fn noisy_field_does_not_block_others() {
    let p = extract("Ak tiv se1t 15.O3.2019\n3 Follower\nTOP Zufriedenheit");
    assert_eq!(p.registration_date, None);
    assert_eq!(p.followers, Some(3));
    assert_eq!(p.badges, vec!["TOP Zufriedenheit"]);
}

#[test]
fn custom_vocabulary() {
    let vocab = Vocabulary {
        badges: vec!["Schnell".to_string()],
        name_stopwords: vec!["Profil".to_string()],
    };
    let p = extract_with("Profil von\nErika\nschnell geantwortet\nTOP Zufriedenheit", &vocab);
    assert_eq!(p.name.as_deref(), Some("Erika"));
    assert_eq!(p.badges, vec!["Schnell"]);
}
