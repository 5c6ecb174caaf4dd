// tests/config_load.rs
use sector_corpus::config::{AppConfig, SourceFlavor, SourceKind, ENV_CONFIG_PATH};
use std::{env, fs, time::Duration};

const TOML: &str = r#"
sectors = [" Energy ", "", "Technology", "energy"]

[insight_types]
Funding = ["Funding Round", " raise "]

[cache]
ttl = 120
dir = "corpus-cache"

[data_sources.newsapi]
kind = "api"
base_url = "https://newsapi.org/v2"
api_key = "env:TEST_CORPUS_NEWS_KEY"

[data_sources.gridnotes]
kind = "scrape"
base_url = "https://gridnotes.example/"
link_selector = "a.post-link"
enabled = false
"#;

#[serial_test::serial]
#[test]
fn parse_toml_and_json_paths() {
    let dir = tempfile::tempdir().unwrap();

    let p_toml = dir.path().join("corpus.toml");
    fs::write(&p_toml, TOML).unwrap();
    let cfg = AppConfig::load_from(&p_toml).unwrap();
    assert_eq!(cfg.sectors, vec!["Energy".to_string(), "Technology".to_string()]);
    assert_eq!(
        cfg.insight_types["Funding"],
        vec!["funding round".to_string(), "raise".to_string()]
    );
    assert_eq!(cfg.cache.ttl(), Duration::from_secs(120));
    let scrape = cfg.source("gridnotes").unwrap();
    assert_eq!(scrape.kind, SourceKind::Scrape);
    assert_eq!(scrape.flavor, SourceFlavor::Html);
    assert!(!scrape.enabled);

    let p_json = dir.path().join("corpus.json");
    fs::write(
        &p_json,
        r#"{
            "sectors": ["Finance"],
            "data_sources": {
                "fedwire": { "kind": "feed", "base_url": "https://fed.example/rss.xml" }
            }
        }"#,
    )
    .unwrap();
    let cj = AppConfig::load_from(&p_json).unwrap();
    assert_eq!(cj.sectors, vec!["Finance".to_string()]);
    assert_eq!(cj.source("fedwire").unwrap().flavor, SourceFlavor::Rss);
    assert_eq!(cj.cache.ttl(), Duration::from_secs(86_400));
}

#[serial_test::serial]
#[test]
fn api_key_comes_from_env_and_stays_redacted() {
    env::set_var("TEST_CORPUS_NEWS_KEY", "nk-123456");
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("corpus.toml");
    fs::write(&p, TOML).unwrap();

    let cfg = AppConfig::load_from(&p).unwrap();
    let news = cfg.source("newsapi").unwrap();
    assert_eq!(news.api_key.as_ref().map(|k| k.expose()), Some("nk-123456"));
    let dump = format!("{cfg:?}");
    assert!(!dump.contains("nk-123456"), "secret leaked into Debug output");

    env::remove_var("TEST_CORPUS_NEWS_KEY");
    let cfg = AppConfig::load_from(&p).unwrap();
    assert!(cfg.source("newsapi").unwrap().api_key.is_none());
}

#[serial_test::serial]
#[test]
fn invalid_files_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let bad_rate = dir.path().join("bad_rate.toml");
    fs::write(
        &bad_rate,
        r#"
sectors = ["Energy"]
[data_sources.x]
kind = "api"
base_url = "https://x.example"
[data_sources.x.rate_limit]
requests = 0
"#,
    )
    .unwrap();
    assert!(AppConfig::load_from(&bad_rate).is_err());

    let no_sectors = dir.path().join("empty.toml");
    fs::write(&no_sectors, "sectors = []").unwrap();
    assert!(AppConfig::load_from(&no_sectors).is_err());
}

#[serial_test::serial]
#[test]
fn default_uses_env_then_fallbacks() {
    // Isolate CWD so the repo's own config/ is not picked up.
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    env::remove_var(ENV_CONFIG_PATH);

    // 1) Nothing on disk: built-in seed
    let seed = AppConfig::load_default().unwrap();
    assert_eq!(seed.sectors.len(), 10);
    assert!(seed.source("sec_edgar").is_some());

    // 2) Fallback TOML in ./config/
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(cfg_dir.join("corpus.toml"), r#"sectors = ["Energy"]"#).unwrap();
    let ft = AppConfig::load_default().unwrap();
    assert_eq!(ft.sectors, vec!["Energy".to_string()]);

    // 3) ENV wins
    let p_env = tmp.path().join("other.json");
    fs::write(&p_env, r#"{"sectors": ["Materials"]}"#).unwrap();
    env::set_var(ENV_CONFIG_PATH, p_env.display().to_string());
    let fe = AppConfig::load_default().unwrap();
    assert_eq!(fe.sectors, vec!["Materials".to_string()]);

    // 4) ENV pointing nowhere is an error, not a silent fallback
    env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
    assert!(AppConfig::load_default().is_err());
    env::remove_var(ENV_CONFIG_PATH);

    env::set_current_dir(&old).unwrap();
}
