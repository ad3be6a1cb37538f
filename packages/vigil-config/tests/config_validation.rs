use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use toml::Value;

use vigil_config::{Config, Error};

const SAMPLE_CONFIG_TOML: &str = include_str!("fixtures/sample_config.toml");

fn sample_toml_with(section: &str, key: &str, value: Value) -> String {
	let mut root: Value = toml::from_str(SAMPLE_CONFIG_TOML).expect("Failed to parse sample config.");
	let table = root
		.as_table_mut()
		.expect("Sample config must be a table.")
		.get_mut(section)
		.and_then(Value::as_table_mut)
		.unwrap_or_else(|| panic!("Sample config must include [{section}]."));

	table.insert(key.to_string(), value);

	toml::to_string(&root).expect("Failed to render sample config.")
}

fn write_temp_config(payload: String) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let pid = std::process::id();
	let mut path = env::temp_dir();

	path.push(format!("vigil_config_test_{nanos}_{pid}_{ordinal}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn base_config() -> Config {
	vigil_config::parse(SAMPLE_CONFIG_TOML).expect("Failed to parse sample config.")
}

#[test]
fn sample_config_loads_and_normalizes() {
	let path = write_temp_config(SAMPLE_CONFIG_TOML.to_string());
	let result = vigil_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let cfg = result.expect("Sample config must load.");

	assert_eq!(cfg.backend.url, "http://localhost:9200");
	assert_eq!(cfg.backend.api_key, None);
	assert_eq!(cfg.backend.text_fields, vec!["name^3", "aliases^2", "name_text"]);
	assert_eq!(cfg.fusion.strategy, "weighted");
	assert_eq!(cfg.monitor.history_limit, 10_000);
}

#[test]
fn empty_config_uses_defaults() {
	let cfg = vigil_config::parse("").expect("Empty config must be valid.");

	assert_eq!(cfg.search.top_k, 50);
	assert_eq!(cfg.escalation.min_ac_results, 2);
	assert!((cfg.escalation.min_ac_score - 0.7).abs() < f32::EPSILON);
	assert!((cfg.fusion.ac_weight - 0.7).abs() < f32::EPSILON);
	assert!((cfg.fusion.vector_weight - 0.3).abs() < f32::EPSILON);
	assert!((cfg.fusion.formula_ac_weight - 0.55).abs() < f32::EPSILON);
	assert!((cfg.fusion.formula_vector_weight - 0.45).abs() < f32::EPSILON);
	assert!((cfg.fusion.anchor_bonus - 0.05).abs() < f32::EPSILON);
	assert!((cfg.fusion.context_penalty - 0.1).abs() < f32::EPSILON);
	assert_eq!(cfg.backend.max_retries, 3);
	assert_eq!(cfg.backend.health_check_interval_secs, 300);
	assert!(cfg.processing.deduplicate && cfg.processing.validate);
}

#[test]
fn missing_file_reports_read_error() {
	let mut path = env::temp_dir();

	path.push("vigil_config_test_missing_file.toml");

	let err = vigil_config::load(&path).expect_err("Expected read error.");

	assert!(matches!(err, Error::ReadConfig { .. }), "Unexpected error: {err}");
}

#[test]
fn malformed_toml_reports_parse_error_with_path() {
	let path = write_temp_config("[backend\nurl = ".to_string());
	let result = vigil_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	match result {
		Err(Error::ParseConfig { path: reported, .. }) => assert_eq!(reported, path),
		other => panic!("Expected parse error, got {other:?}."),
	}
}

#[test]
fn embedding_dimensions_must_match_backend() {
	let payload = sample_toml_with("embedding", "dimensions", Value::Integer(768));
	let path = write_temp_config(payload);
	let result = vigil_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let err = result.expect_err("Expected dimension validation error.");

	assert!(
		err.to_string().contains("embedding.dimensions must match backend.vector_dim."),
		"Unexpected error: {err}"
	);
}

#[test]
fn fusion_strategy_must_be_known() {
	let payload = sample_toml_with("fusion", "strategy", Value::String("rrf".to_string()));
	let err = vigil_config::parse(&payload).expect_err("Expected strategy validation error.");

	assert!(
		err.to_string().contains("fusion.strategy must be one of weighted or formula."),
		"Unexpected error: {err}"
	);
}

#[test]
fn fusion_weights_must_be_unit_range() {
	let mut cfg = base_config();

	cfg.fusion.ac_weight = 1.5;

	let err = vigil_config::validate(&cfg).expect_err("Expected weight validation error.");

	assert!(
		err.to_string().contains("fusion.ac_weight must be in the range 0.0-1.0."),
		"Unexpected error: {err}"
	);

	cfg = base_config();
	cfg.fusion.vector_weight = f32::NAN;

	let err = vigil_config::validate(&cfg).expect_err("Expected finite validation error.");

	assert!(
		err.to_string().contains("fusion.vector_weight must be a finite number."),
		"Unexpected error: {err}"
	);
}

#[test]
fn anchor_boost_factor_cannot_shrink_scores() {
	let mut cfg = base_config();

	cfg.fusion.anchor_boost_factor = 0.8;

	assert!(vigil_config::validate(&cfg).is_err());

	cfg.fusion.anchor_boost_factor = 1.0;

	assert!(vigil_config::validate(&cfg).is_ok());
}

#[test]
fn search_defaults_respect_option_bounds() {
	let mut cfg = base_config();

	cfg.search.top_k = 0;

	assert!(vigil_config::validate(&cfg).is_err());

	cfg = base_config();
	cfg.search.timeout_ms = 50;

	let err = vigil_config::validate(&cfg).expect_err("Expected timeout validation error.");

	assert!(
		err.to_string().contains("search.timeout_ms must be in the range 100-30000."),
		"Unexpected error: {err}"
	);

	cfg = base_config();
	cfg.search.ac_fuzziness = 4;

	assert!(vigil_config::validate(&cfg).is_err());
}

#[test]
fn cache_and_monitor_sizes_must_be_positive() {
	let payload = sample_toml_with("cache", "result_ttl_secs", Value::Integer(0));
	let err = vigil_config::parse(&payload).expect_err("Expected TTL validation error.");

	assert!(
		err.to_string().contains("cache.result_ttl_secs must be greater than zero."),
		"Unexpected error: {err}"
	);

	let mut cfg = base_config();

	cfg.monitor.rate_limit_per_minute = 0;

	assert!(vigil_config::validate(&cfg).is_err());
}

#[test]
fn enabled_embedding_requires_api_key() {
	let payload = sample_toml_with("embedding", "api_key", Value::String(" ".to_string()));
	let err = vigil_config::parse(&payload).expect_err("Expected api_key validation error.");

	assert!(
		err.to_string().contains("embedding.api_key must be non-empty when embedding is enabled."),
		"Unexpected error: {err}"
	);
}
