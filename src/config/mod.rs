pub mod schema;

pub use schema::{
    resolve_config_dir, AgentConfig, Config, OllamaConfig, PermissionsConfig, ReliabilityConfig,
    StorageConfig,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexported_config_default_is_constructible() {
        let config = Config::default();

        assert!(!config.ollama.model.is_empty());
        assert!(config.ollama.temperature > 0.0);
        assert!(config.config_path.ends_with("config.toml"));
    }
}
