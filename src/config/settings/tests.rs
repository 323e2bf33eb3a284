use super::*;
use serial_test::serial;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.embedding.provider, EmbeddingProvider::Ollama);
    assert_eq!(
        config.embedding.base_url.as_deref(),
        Some("http://localhost:11434")
    );
    assert_eq!(config.embedding.model, "nomic-embed-text");
    assert_eq!(config.embedding.dimension, 768);
    assert_eq!(config.indexing.batch_size, 100);
    assert_eq!(config.retry.base_delay_ms, 2000);
    assert_eq!(config.retry.max_delay_ms, 60000);
    assert_eq!(config.retry.max_attempts, 8);
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.embedding.base_url = Some("not a url".to_string());
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.dimension = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.indexing.batch_size = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.indexing.exclude_patterns = vec!["[".to_string()];
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidPattern(_, _))
    ));

    let mut invalid_config = config.clone();
    invalid_config.retry.base_delay_ms = 120_000;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::RetryDelayTooLarge(120_000, 60000))
    ));

    let mut invalid_config = config;
    invalid_config.search.min_similarity = 1.5;
    assert!(invalid_config.validate().is_err());
}

#[test]
fn missing_base_url_is_valid_until_used() {
    let mut config = Config::default();
    config.embedding.base_url = None;
    assert!(config.validate().is_ok());
    assert!(
        config
            .embedding
            .base_url()
            .expect("blank url is not an error")
            .is_none()
    );

    config.embedding.base_url = Some("   ".to_string());
    assert!(
        config
            .embedding
            .base_url()
            .expect("blank url is not an error")
            .is_none()
    );
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let partial = r#"
        [embedding]
        provider = "openai"
        base_url = "https://api.openai.com/v1"
        model = "text-embedding-3-small"
        dimension = 1536

        [indexing]
        exclude_patterns = ["templates/**"]
    "#;

    let config: Config = toml::from_str(partial).expect("should parse partial toml");
    assert_eq!(config.embedding.provider, EmbeddingProvider::OpenAi);
    assert_eq!(config.embedding.dimension, 1536);
    assert_eq!(config.indexing.exclude_patterns, vec!["templates/**"]);
    assert_eq!(config.indexing.chunk_size, 1000);
    assert_eq!(config.retry, RetryConfig::default());
}

#[test]
fn load_missing_config() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let config = Config::load(temp_dir.path()).expect("missing config falls back to defaults");
    assert_eq!(config.base_dir, temp_dir.path());
    assert_eq!(config.embedding, EmbeddingConfig::default());
}

#[test]
fn save_and_reload() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.indexing.include_patterns = vec!["notes/**".to_string()];
    config
        .embedding
        .set_model("mxbai-embed-large".to_string())
        .expect("valid model");
    config.save().expect("should save config");

    assert!(config.config_file_path().exists());

    let loaded = Config::load(temp_dir.path()).expect("should load saved config");
    assert_eq!(loaded, config);
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[indexing]\nchunk_size = 5\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn storage_paths() {
    let config = Config {
        base_dir: PathBuf::from("/data/vault-index"),
        ..Config::default()
    };

    assert_eq!(
        config.snapshot_path(),
        PathBuf::from("/data/vault-index/snapshot/vault-index.db.gz")
    );
    assert_eq!(
        config.working_database_path(),
        PathBuf::from("/data/vault-index/engine/live.db")
    );
}

#[test]
fn setter_validation() {
    let mut config = EmbeddingConfig::default();

    assert!(config.set_model("new-model".to_string()).is_ok());
    assert!(config.set_base_url("https://example.com/v1".to_string()).is_ok());
    assert!(config.set_dimension(1024).is_ok());

    assert!(config.set_model("   ".to_string()).is_err());
    assert!(config.set_base_url("example".to_string()).is_err());
    assert!(config.set_dimension(0).is_err());
    assert_eq!(config.model, "new-model");
    assert_eq!(config.dimension, 1024);
}

#[test]
#[serial]
fn api_key_falls_back_to_environment() {
    let mut config = EmbeddingConfig::default();

    // SAFETY: serialized with the other environment tests
    unsafe { std::env::set_var(API_KEY_ENV_VAR, "from-env") };
    assert_eq!(config.resolved_api_key().as_deref(), Some("from-env"));

    config.api_key = Some("from-file".to_string());
    assert_eq!(config.resolved_api_key().as_deref(), Some("from-file"));

    // SAFETY: serialized with the other environment tests
    unsafe { std::env::remove_var(API_KEY_ENV_VAR) };
    config.api_key = Some("  ".to_string());
    assert_eq!(config.resolved_api_key(), None);
}
