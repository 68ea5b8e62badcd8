use std::io::Read;
use std::path::{Path, PathBuf};

use profile_scan::{
    add_reply, analyze, artifact_name, check_deps, enumerate_images, install_help_for, load_config, ocr_image_path, sha256_hex,
    AddOutcome, Analysis, Config, EnumerateError, MatchOutcome, ADD_USAGE,
};

const USAGE: &str = "Usage:
  profscan [--config <path>] check-deps
  profscan [--config <path>] add <user_id> <dd.mm.yyyy>
  profscan [--config <path>] scan <glob> [--json] [--artifacts <dir>]
  profscan [--config <path>] text <file|-> [--json]";

// Flags that take a value; their values are not positional arguments.
const VALUE_FLAGS: [&str; 2] = ["--config", "--artifacts"];

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|pos| args.get(pos + 1))
        .filter(|v| !v.starts_with("--"))
        .cloned()
}

fn positional(args: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut skip_next = false;
    for a in args.iter().skip(1) {
        if skip_next {
            skip_next = false;
            continue;
        }
        if VALUE_FLAGS.contains(&a.as_str()) {
            skip_next = true;
            continue;
        }
        if a.starts_with("--") {
            continue;
        }
        out.push(a.clone());
    }
    out
}

fn usage_exit() -> ! {
    eprintln!("{}", USAGE);
    std::process::exit(64);
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let as_json = args.iter().any(|a| a == "--json");
    let config_path = flag_value(&args, "--config");
    let artifacts_dir = flag_value(&args, "--artifacts");
    let pos = positional(&args);

    let config = match load_config(config_path.as_deref().map(Path::new)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::json!({
                    "tool": "load_config",
                    "file": config_path,
                    "error": e.to_string(),
                    "error_code": 3
                })
            );
            std::process::exit(3);
        }
    };
    eprintln!(
        "{}",
        serde_json::json!({
            "tool": "load_config",
            "status": "ok",
            "reference_file": config.reference_file,
            "tesseract_cmd": config.ocr.tesseract_cmd,
            "lang": config.ocr.lang
        })
    );

    match pos.first().map(String::as_str) {
        Some("check-deps") => run_check_deps(&config),
        Some("add") => match (pos.get(1), pos.get(2)) {
            (Some(id), Some(date)) => run_add(&config, id, date),
            _ => {
                eprintln!("{}", ADD_USAGE);
                std::process::exit(64);
            }
        },
        Some("text") => match pos.get(1) {
            Some(source) => run_text(&config, source, as_json),
            None => usage_exit(),
        },
        Some("scan") => match pos.get(1) {
            Some(pattern) => run_scan(&config, pattern, as_json, artifacts_dir.as_deref()),
            None => usage_exit(),
        },
        _ => usage_exit(),
    }
}

fn run_check_deps(config: &Config) {
    let deps = check_deps(&config.ocr.tesseract_cmd);
    if deps.ok {
        eprintln!("{}", serde_json::json!({"tool": "check_deps", "status": "ok"}));
        return;
    }
    eprintln!(
        "{}",
        serde_json::json!({
            "tool": "check_deps",
            "missing": deps.missing,
            "error_code": 2
        })
    );
    eprintln!("{}", install_help_for(&deps.missing));
    std::process::exit(2);
}

fn run_add(config: &Config, id: &str, raw_date: &str) {
    let store = config.store();
    match store.add(id, raw_date) {
        Ok(outcome) => {
            let status = match &outcome {
                AddOutcome::Added(_) => "added",
                AddOutcome::Duplicate(_) => "duplicate",
                AddOutcome::InvalidDate => "invalid_date",
                AddOutcome::InvalidIdentifier => "invalid_identifier",
            };
            eprintln!(
                "{}",
                serde_json::json!({
                    "tool": "add",
                    "file": store.path(),
                    "user_id": id,
                    "status": status
                })
            );
            println!("{}", add_reply(&outcome, id, raw_date));
        }
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::json!({
                    "tool": "add",
                    "file": store.path(),
                    "error": e.to_string(),
                    "error_code": 1
                })
            );
            println!("Ошибка добавления: {}", e);
            std::process::exit(1);
        }
    }
}

/// Load the reference set and analyze one OCR text. Exits on store failure.
fn analyze_text(config: &Config, source: &str, text: &str) -> Analysis {
    let store = config.store();
    let entries = match store.load() {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::json!({
                    "tool": "load_reference",
                    "file": store.path(),
                    "error": e.to_string(),
                    "error_code": 1
                })
            );
            std::process::exit(1);
        }
    };
    let analysis = analyze(text, &config.vocabulary, &entries);
    let p = &analysis.profile;
    eprintln!(
        "{}",
        serde_json::json!({
            "tool": "extract",
            "source": source,
            "name_found": p.name.is_some(),
            "registration_date": p.registration_date,
            "online_listings": p.online_listings,
            "total_listings": p.total_listings,
            "followers": p.followers,
            "badges": p.badges.len()
        })
    );
    let (status, user_id, distance) = match &analysis.outcome {
        MatchOutcome::NoDate => ("no_date", None, None),
        MatchOutcome::EmptyReference => ("empty_reference", None, None),
        MatchOutcome::Found { entry, distance_days } => ("found", Some(entry.id.clone()), Some(*distance_days)),
    };
    eprintln!(
        "{}",
        serde_json::json!({
            "tool": "match",
            "source": source,
            "reference_entries": entries.len(),
            "status": status,
            "user_id": user_id,
            "distance_days": distance
        })
    );
    analysis
}

fn print_analysis(analysis: &Analysis, as_json: bool) {
    if as_json {
        match analysis.to_json_line() {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("{}", serde_json::json!({"tool": "print", "error": e.to_string()})),
        }
    } else {
        println!("{}", analysis.replies().join("\n\n"));
    }
}

fn run_text(config: &Config, source: &str, as_json: bool) {
    let read = if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).map(|_| buf)
    } else {
        std::fs::read_to_string(source)
    };
    let text = match read {
        Ok(t) => t,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::json!({
                    "tool": "read_text",
                    "file": source,
                    "error": e.to_string(),
                    "error_code": 1
                })
            );
            std::process::exit(1);
        }
    };
    let analysis = analyze_text(config, source, &text);
    print_analysis(&analysis, as_json);
}

fn run_scan(config: &Config, pattern: &str, as_json: bool, artifacts_dir: Option<&str>) {
    let deps = check_deps(&config.ocr.tesseract_cmd);
    if !deps.ok {
        eprintln!(
            "{}",
            serde_json::json!({
                "tool": "check_deps",
                "missing": deps.missing,
                "error_code": 2
            })
        );
        eprintln!("{}", install_help_for(&deps.missing));
        std::process::exit(2);
    }

    let files = match enumerate_images(pattern) {
        Ok(files) => files,
        Err(EnumerateError::NoFilesFound { pattern }) => {
            eprintln!(
                "{}",
                serde_json::json!({
                    "tool": "enumerate_images",
                    "pattern": pattern,
                    "error": "NoFilesFound",
                    "error_code": 1
                })
            );
            std::process::exit(1);
        }
    };
    eprintln!("{}", serde_json::json!({"tool": "enumerate_images", "count": files.len()}));

    let mut failed: Vec<PathBuf> = Vec::new();
    for file in files {
        let bytes = match std::fs::read(&file) {
            Ok(b) => b,
            Err(e) => {
                eprintln!("{}", serde_json::json!({"tool": "read_image", "file": file, "error": e.to_string()}));
                failed.push(file);
                continue;
            }
        };
        let text = match ocr_image_path(&file, &config.ocr) {
            Ok(t) => t,
            Err(e) => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "tool": "ocr",
                        "file": file,
                        "sha256": sha256_hex(&bytes),
                        "error": e.to_string()
                    })
                );
                failed.push(file);
                continue;
            }
        };
        eprintln!(
            "{}",
            serde_json::json!({
                "tool": "ocr",
                "file": file,
                "sha256": sha256_hex(&bytes),
                "chars": text.chars().count()
            })
        );
        if let Some(dir) = artifacts_dir {
            let dump = Path::new(dir).join(artifact_name(&file));
            let written = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&dump, &text));
            if let Err(e) = written {
                eprintln!("{}", serde_json::json!({"tool": "artifacts", "file": dump, "error": e.to_string()}));
            }
        }
        let source = file.display().to_string();
        let analysis = analyze_text(config, &source, &text);
        print_analysis(&analysis, as_json);
    }

    if !failed.is_empty() {
        eprintln!(
            "{}",
            serde_json::json!({
                "tool": "scan",
                "failed": failed,
                "error_code": 1
            })
        );
        std::process::exit(1);
    }
}
