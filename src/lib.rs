use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{Datelike, NaiveDate};
use globwalk::GlobWalkerBuilder;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "profscan.yaml";

/// A calendar date in the single textual form used everywhere: `DD.MM.YYYY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalDate(NaiveDate);

impl CanonicalDate {
    pub fn new(date: NaiveDate) -> Self {
        CanonicalDate(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Proleptic Gregorian day count, used only for distance arithmetic.
    pub fn ordinal(&self) -> i64 {
        i64::from(self.0.num_days_from_ce())
    }
}

impl fmt::Display for CanonicalDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%d.%m.%Y"))
    }
}

impl Serialize for CanonicalDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// Tried in order; the second field is the width the year part must have.
const DATE_FORMATS: [(&str, usize); 2] = [("%d.%m.%Y", 4), ("%d.%m.%y", 2)];

/// Parse `D.M.YYYY`, `D.M.YY` (either with `/` separators too) into a canonical date.
/// Two-digit years use the POSIX pivot: 00-68 -> 20xx, 69-99 -> 19xx.
/// Returns None for anything else, including impossible calendar dates.
pub fn normalize_date(raw: &str) -> Option<CanonicalDate> {
    let cleaned = raw.trim().replace('/', ".");
    let parts: Vec<&str> = cleaned.split('.').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }
    let year_width = parts[2].len();
    DATE_FORMATS
        .iter()
        .filter(|(_, width)| *width == year_width)
        .find_map(|(fmt, _)| NaiveDate::parse_from_str(&cleaned, fmt).ok())
        .and_then(|date| if year_width == 2 { apply_posix_pivot(date) } else { Some(date) })
        .map(CanonicalDate)
}

// chrono maps `69` to 2069; POSIX strptime maps it to 1969.
fn apply_posix_pivot(date: NaiveDate) -> Option<NaiveDate> {
    if date.year() >= 2069 {
        date.with_year(date.year() - 100)
    } else {
        Some(date)
    }
}

pub fn day_distance(a: CanonicalDate, b: CanonicalDate) -> i64 {
    (a.ordinal() - b.ordinal()).abs()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceEntry {
    pub id: String,
    pub date: CanonicalDate,
}

impl ReferenceEntry {
    /// The persisted form: `identifier;DD.MM.YYYY`.
    pub fn to_line(&self) -> String {
        format!("{};{}", self.id, self.date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added(ReferenceEntry),
    Duplicate(ReferenceEntry),
    InvalidDate,
    InvalidIdentifier,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read {path}: {message}")]
    Read { path: String, message: String },
    #[error("Failed to write {path}: {message}")]
    Write { path: String, message: String },
}

/// Append-only `identifier;date` file. Reloaded in full on every access.
#[derive(Debug, Clone)]
pub struct ReferenceStore {
    path: PathBuf,
}

impl ReferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ReferenceStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_raw(&self) -> Result<String, StoreError> {
        if !self.path.exists() {
            return Ok(String::new());
        }
        std::fs::read_to_string(&self.path).map_err(|e| StoreError::Read {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Read every well-formed row in file order. Blank rows, rows without `;`,
    /// rows with an empty identifier and rows with an unparseable date are skipped.
    pub fn load(&self) -> Result<Vec<ReferenceEntry>, StoreError> {
        let raw = self.read_raw()?;
        Ok(raw.lines().filter_map(parse_reference_line).collect())
    }

    /// Append `identifier;date` unless the date is unparseable or the exact line
    /// is already present.
    pub fn add(&self, identifier: &str, raw_date: &str) -> Result<AddOutcome, StoreError> {
        let Some(date) = normalize_date(raw_date) else {
            return Ok(AddOutcome::InvalidDate);
        };
        let id = identifier.trim();
        if id.is_empty() || id.contains(|c: char| c == ';' || c == '\n' || c == '\r') {
            return Ok(AddOutcome::InvalidIdentifier);
        }
        let entry = ReferenceEntry { id: id.to_string(), date };
        let line = entry.to_line();

        let existing = self.read_raw()?;
        if existing.lines().any(|l| l == line) {
            return Ok(AddOutcome::Duplicate(entry));
        }

        let write_err = |e: std::io::Error| StoreError::Write {
            path: self.path.display().to_string(),
            message: e.to_string(),
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(write_err)?;
        let mut record = String::with_capacity(line.len() + 2);
        if !existing.is_empty() && !existing.ends_with('\n') {
            record.push('\n');
        }
        record.push_str(&line);
        record.push('\n');
        file.write_all(record.as_bytes()).map_err(write_err)?;
        Ok(AddOutcome::Added(entry))
    }
}

fn parse_reference_line(line: &str) -> Option<ReferenceEntry> {
    if line.trim().is_empty() {
        return None;
    }
    let (id, date) = line.split_once(';')?;
    let id = id.trim();
    if id.is_empty() {
        return None;
    }
    let date = normalize_date(date)?;
    Some(ReferenceEntry { id: id.to_string(), date })
}

/// Entry with the smallest absolute day distance to `target`.
/// Ties go to the earliest entry in `entries`.
pub fn find_nearest(target: CanonicalDate, entries: &[ReferenceEntry]) -> Option<&ReferenceEntry> {
    let mut best: Option<(&ReferenceEntry, i64)> = None;
    for entry in entries {
        let delta = day_distance(entry.date, target);
        match best {
            Some((_, best_delta)) if delta >= best_delta => {}
            _ => best = Some((entry, delta)),
        }
    }
    best.map(|(entry, _)| entry)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileRecord {
    pub name: Option<String>,
    pub registration_date: Option<CanonicalDate>,
    pub online_listings: Option<u64>,
    pub total_listings: Option<u64>,
    pub followers: Option<u64>,
    pub badges: Vec<String>,
}

fn default_badges() -> Vec<String> {
    [
        "TOP Zufriedenheit",
        "OK Zufriedenheit",
        "Besonders freundlich",
        "Besonders zuverlässig",
        "Sehr freundlich",
        "Sehr zuverlässig",
        "Freundlich",
        "Zuverlässig",
        "Naja",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_name_stopwords() -> Vec<String> {
    [
        "Privater Nutzer",
        "Aktiv seit",
        "Anzeigen online",
        "gesamt",
        "Verkaufsübersicht",
        "Antwortet",
        "Follower",
        "Folge ich",
        "Sicher bezahlen",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Word lists driving badge detection and the name heuristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    /// Reported in this order when present in the text.
    #[serde(default = "default_badges")]
    pub badges: Vec<String>,
    /// A line containing any of these is never taken as the name.
    #[serde(default = "default_name_stopwords")]
    pub name_stopwords: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Vocabulary { badges: default_badges(), name_stopwords: default_name_stopwords() }
    }
}

static RE_AKTIV_SEIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Aktiv\s*seit\s*([0-9]{1,2}[./][0-9]{1,2}[./][0-9]{2,4})").unwrap());
static RE_LISTINGS_BOTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([0-9]+)\s+Anzeigen\s+online\s*/\s*([0-9]+)\s+gesamt").unwrap());
static RE_LISTINGS_ONLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)([0-9]+)\s+Anzeigen\s+online").unwrap());
static RE_FOLLOWERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)([0-9]+)\s+Follower").unwrap());

type FieldRule = fn(&str, &Vocabulary, &mut ProfileRecord);

// Each rule reads the whole text and owns its fields, so one noisy field
// never blocks another.
static FIELD_RULES: &[FieldRule] = &[rule_registration_date, rule_listings, rule_followers, rule_badges, rule_name];

fn rule_registration_date(text: &str, _: &Vocabulary, out: &mut ProfileRecord) {
    out.registration_date = RE_AKTIV_SEIT.captures(text).and_then(|caps| normalize_date(&caps[1]));
}

fn rule_listings(text: &str, _: &Vocabulary, out: &mut ProfileRecord) {
    if let Some(caps) = RE_LISTINGS_BOTH.captures(text) {
        out.online_listings = caps[1].parse().ok();
        out.total_listings = caps[2].parse().ok();
    } else if let Some(caps) = RE_LISTINGS_ONLINE.captures(text) {
        out.online_listings = caps[1].parse().ok();
    }
}

fn rule_followers(text: &str, _: &Vocabulary, out: &mut ProfileRecord) {
    out.followers = RE_FOLLOWERS.captures(text).and_then(|caps| caps[1].parse().ok());
}

fn rule_badges(text: &str, vocab: &Vocabulary, out: &mut ProfileRecord) {
    let lower = text.to_lowercase();
    out.badges = vocab
        .badges
        .iter()
        .filter(|badge| lower.contains(&badge.to_lowercase()))
        .cloned()
        .collect();
}

fn rule_name(text: &str, vocab: &Vocabulary, out: &mut ProfileRecord) {
    let stopwords: Vec<String> = vocab.name_stopwords.iter().map(|s| s.to_lowercase()).collect();
    out.name = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find(|line| {
            let lower = line.to_lowercase();
            !stopwords.iter().any(|s| lower.contains(s.as_str())) && line.chars().count() >= 2
        })
        .map(str::to_string);
}

/// Extract profile fields from OCR text with the built-in vocabulary.
pub fn extract(text: &str) -> ProfileRecord {
    extract_with(text, &Vocabulary::default())
}

/// Extract profile fields from OCR text. Never fails; whatever is not found stays None/empty.
pub fn extract_with(text: &str, vocab: &Vocabulary) -> ProfileRecord {
    let mut record = ProfileRecord::default();
    for rule in FIELD_RULES {
        rule(text, vocab, &mut record);
    }
    record
}

fn or_placeholder<T: fmt::Display>(value: Option<T>, placeholder: &str) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| placeholder.to_string())
}

/// Render the record as seven fixed lines; missing fields get a placeholder.
pub fn format_summary(record: &ProfileRecord) -> String {
    let badges = if record.badges.is_empty() { "не найдены".to_string() } else { record.badges.join(", ") };
    [
        "Распознанные данные:".to_string(),
        format!("Имя: {}", or_placeholder(record.name.as_deref(), "не найдено")),
        format!("Дата регистрации: {}", or_placeholder(record.registration_date, "не найдена")),
        format!("Объявления онлайн: {}", or_placeholder(record.online_listings, "не найдено")),
        format!("Всего объявлений: {}", or_placeholder(record.total_listings, "не найдено")),
        format!("Подписчики: {}", or_placeholder(record.followers, "не найдено")),
        format!("Плашки: {}", badges),
    ]
    .join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchOutcome {
    NoDate,
    EmptyReference,
    Found { entry: ReferenceEntry, distance_days: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Analysis {
    pub profile: ProfileRecord,
    pub outcome: MatchOutcome,
}

/// Extract the profile and, when a registration date was found, match it against `entries`.
pub fn analyze(text: &str, vocab: &Vocabulary, entries: &[ReferenceEntry]) -> Analysis {
    let profile = extract_with(text, vocab);
    let outcome = match profile.registration_date {
        None => MatchOutcome::NoDate,
        Some(target) => match find_nearest(target, entries) {
            None => MatchOutcome::EmptyReference,
            Some(entry) => MatchOutcome::Found {
                entry: entry.clone(),
                distance_days: day_distance(entry.date, target),
            },
        },
    };
    Analysis { profile, outcome }
}

impl Analysis {
    /// Compact single-line JSON, one analysis per output line.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Messages for the operator: the summary, then the match result.
    pub fn replies(&self) -> Vec<String> {
        let second = match &self.outcome {
            MatchOutcome::NoDate => "Не удалось определить дату регистрации на скрине.".to_string(),
            MatchOutcome::EmptyReference => {
                "База пустая. Добавь запись вида user_id;dd.mm.yyyy командой /add <user_id> <dd.mm.yyyy>.".to_string()
            }
            MatchOutcome::Found { entry, distance_days } => format!(
                "Ближайшая запись в базе:\nuser_id: {}\nДата: {}\nРазница: {} дн.\nЭти данные будут стартовой точкой для дальнейшего поиска.",
                entry.id, entry.date, distance_days
            ),
        };
        vec![format_summary(&self.profile), second]
    }
}

pub const ADD_USAGE: &str = "Формат: /add <user_id> <dd.mm.yyyy>";

pub fn add_reply(outcome: &AddOutcome, identifier: &str, raw_date: &str) -> String {
    match outcome {
        AddOutcome::Added(entry) => format!("Добавлено в базу: {}", entry.to_line()),
        AddOutcome::Duplicate(entry) => format!("Уже есть в базе: {}", entry.to_line()),
        AddOutcome::InvalidDate => format!("Не удалось распознать дату: {}", raw_date),
        AddOutcome::InvalidIdentifier => format!("Недопустимый user_id: {}", identifier),
    }
}

/// Handle a chat command. Returns None for text that is not a known command.
pub fn handle_command(text: &str, store: &ReferenceStore) -> Option<Result<String, StoreError>> {
    if !text.starts_with("/add ") {
        return None;
    }
    let parts: Vec<&str> = text.split_whitespace().collect();
    if parts.len() < 3 {
        return Some(Ok(ADD_USAGE.to_string()));
    }
    let (id, raw_date) = (parts[1], parts[2]);
    Some(store.add(id, raw_date).map(|outcome| add_reply(&outcome, id, raw_date)))
}

fn default_tesseract_cmd() -> String {
    "tesseract".to_string()
}

fn default_ocr_lang() -> String {
    "deu+eng".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_tesseract_cmd")]
    pub tesseract_cmd: String,
    #[serde(default = "default_ocr_lang")]
    pub lang: String,
    #[serde(default)]
    pub psm: Option<u8>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        OcrConfig { tesseract_cmd: default_tesseract_cmd(), lang: default_ocr_lang(), psm: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DepsResult {
    pub ok: bool,
    pub missing: Vec<String>,
}

/// Check that the tesseract binary (name on PATH or explicit path) is available.
pub fn check_deps(tesseract_cmd: &str) -> DepsResult {
    let mut missing = Vec::new();
    if which::which(tesseract_cmd).is_err() {
        missing.push(tesseract_cmd.to_string());
    }
    DepsResult { ok: missing.is_empty(), missing }
}

/// Install hint for missing deps, empty when nothing is missing.
pub fn install_help_for(missing: &[String]) -> String {
    if missing.is_empty() {
        return String::new();
    }
    "Tesseract not found. Install it with German language data:\n  sudo apt install tesseract-ocr tesseract-ocr-deu\nor set ocr.tesseract_cmd in profscan.yaml".to_string()
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("FileNotFound: {0}")]
    FileNotFound(String),
    #[error("Failed to start tesseract: {0}")]
    Spawn(String),
    #[error("tesseract exited with {code}: {stderr}")]
    Failed { code: i32, stderr: String },
    #[error("Io: {0}")]
    Io(String),
}

/// Run tesseract on an image file and return the recognized text.
/// Empty output is not an error.
pub fn ocr_image_path(path: &Path, cfg: &OcrConfig) -> Result<String, OcrError> {
    if !path.exists() {
        return Err(OcrError::FileNotFound(path.display().to_string()));
    }
    let mut cmd = Command::new(&cfg.tesseract_cmd);
    cmd.arg(path).arg("stdout").arg("-l").arg(&cfg.lang);
    if let Some(psm) = cfg.psm {
        cmd.arg("--psm").arg(psm.to_string());
    }
    let out = cmd.output().map_err(|e| OcrError::Spawn(e.to_string()))?;
    if !out.status.success() {
        return Err(OcrError::Failed {
            code: out.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

/// OCR an in-memory image by staging it in a temporary directory.
pub fn ocr_image_bytes(image: &[u8], cfg: &OcrConfig) -> Result<String, OcrError> {
    let tmpdir = tempfile::tempdir().map_err(|e| OcrError::Io(e.to_string()))?;
    let staged = tmpdir.path().join("screenshot.png");
    std::fs::write(&staged, image).map_err(|e| OcrError::Io(e.to_string()))?;
    ocr_image_path(&staged, cfg)
}

#[derive(Debug, Error)]
pub enum EnumerateError {
    #[error("NoFilesFound")]
    NoFilesFound { pattern: String },
}

/// Enumerate screenshots with a glob pattern (e.g. "./shots/**/*.png"), sorted.
pub fn enumerate_images(glob_pattern: &str) -> Result<Vec<PathBuf>, EnumerateError> {
    let not_found = || EnumerateError::NoFilesFound { pattern: glob_pattern.to_string() };
    let root = if Path::new(glob_pattern).is_absolute() { "/" } else { "." };
    let pat = glob_pattern.trim_start_matches("./");
    let mut paths: Vec<PathBuf> = GlobWalkerBuilder::from_patterns(root, &[pat])
        .follow_links(false)
        .build()
        .map_err(|_| not_found())?
        .filter_map(|e| e.ok())
        .map(|e| e.path().to_path_buf())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    if paths.is_empty() {
        return Err(not_found());
    }
    Ok(paths)
}

/// File name for the OCR text dump of `image`. Built from the whole path minus
/// extension, so `a/1.png` and `b/1.png` do not collide.
pub fn artifact_name(image: &Path) -> String {
    let base = image.with_extension("").display().to_string();
    let mut slug = String::with_capacity(base.len());
    let mut prev_dash = false;
    for ch in base.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            prev_dash = false;
        } else if !prev_dash {
            slug.push('-');
            prev_dash = true;
        }
    }
    let slug = slug.trim_matches('-');
    format!("{}.ocr.txt", if slug.is_empty() { "shot" } else { slug })
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    Sha256::digest(bytes).iter().map(|b| format!("{:02x}", b)).collect()
}

fn default_reference_file() -> String {
    "known_accounts.txt".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_reference_file")]
    pub reference_file: String,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub vocabulary: Vocabulary,
}

impl Default for Config {
    fn default() -> Self {
        Config { reference_file: default_reference_file(), ocr: OcrConfig::default(), vocabulary: Vocabulary::default() }
    }
}

impl Config {
    pub fn store(&self) -> ReferenceStore {
        ReferenceStore::new(&self.reference_file)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(String),
    #[error("Failed to parse config: {0}")]
    Parse(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load and validate the YAML config. With no explicit path the default file is
/// used if it exists, otherwise built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let (path, required) = match path {
        Some(p) => (p, true),
        None => (Path::new(DEFAULT_CONFIG_PATH), false),
    };
    if !required && !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;
    parse_config(&raw)
}

pub fn parse_config(raw: &str) -> Result<Config, ConfigError> {
    // An empty document deserializes to unit, not a map.
    if raw.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.reference_file.trim().is_empty() {
        return Err(ConfigError::Invalid("reference_file is empty".into()));
    }
    if cfg.ocr.tesseract_cmd.trim().is_empty() {
        return Err(ConfigError::Invalid("ocr.tesseract_cmd is empty".into()));
    }
    if cfg.ocr.lang.trim().is_empty() {
        return Err(ConfigError::Invalid("ocr.lang is empty".into()));
    }
    for (field, words) in [("vocabulary.badges", &cfg.vocabulary.badges), ("vocabulary.name_stopwords", &cfg.vocabulary.name_stopwords)] {
        if words.iter().any(|w| w.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("blank entry in {}", field)));
        }
    }
    Ok(())
}
