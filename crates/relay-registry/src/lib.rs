pub mod registry;

pub use registry::{PlatformFactory, Registry};

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use relay_commands::SupervisorContext;
    use relay_platform::{MockPlatform, PlatformClient};
    use relay_store::SqliteStore;
    use tempfile::TempDir;

    use super::*;

    fn write_config(dir: &std::path::Path, name: &str, chan_id: &str, enabled: bool) {
        let body = format!(
            r#"{{
                "Token": "xoxb-test",
                "ChanID": "{chan_id}",
                "Enabled": {enabled},
                "MaxFileSize": 5242880,
                "SessionTimeout": 3600,
                "TimeoutCheckInterval": 3600,
                "ThreadsPerPage": 10
            }}"#
        );
        std::fs::write(dir.join(format!("{name}.json")), body).unwrap();
    }

    fn test_registry(config_dir: PathBuf) -> Arc<Registry> {
        let store = Arc::new(SqliteStore::open(":memory:").unwrap());
        let factory: PlatformFactory = Arc::new(|name, _cfg| {
            let mock = MockPlatform::new("T1", format!("UBOT_{name}"));
            Arc::new(mock) as Arc<dyn PlatformClient>
        });
        Registry::new(store, config_dir, factory)
    }

    #[tokio::test]
    async fn load_starts_an_enabled_bot() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), "acme", "C1", true);
        let registry = test_registry(dir.path().to_path_buf());

        SupervisorContext::load(registry.as_ref(), "acme").await.unwrap();
        assert_eq!(registry.bot_count(), 1);
    }

    #[tokio::test]
    async fn load_skips_disabled_bot() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), "acme", "C1", false);
        let registry = test_registry(dir.path().to_path_buf());

        SupervisorContext::load(registry.as_ref(), "acme").await.unwrap();
        assert_eq!(registry.bot_count(), 0);
    }

    #[tokio::test]
    async fn load_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), "acme", "C1", true);
        let registry = test_registry(dir.path().to_path_buf());

        SupervisorContext::load(registry.as_ref(), "acme").await.unwrap();
        SupervisorContext::load(registry.as_ref(), "acme").await.unwrap();
        assert_eq!(registry.bot_count(), 1);
    }

    #[tokio::test]
    async fn unload_unknown_bot_is_not_found() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(dir.path().to_path_buf());

        let err = SupervisorContext::unload(registry.as_ref(), "ghost")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn uptimes_reports_same_workspace_and_hides_others() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), "acme", "C1", true);
        let registry = test_registry(dir.path().to_path_buf());
        SupervisorContext::load(registry.as_ref(), "acme").await.unwrap();

        let entries = SupervisorContext::uptimes(registry.as_ref(), Some("T1"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "acme");
        assert_eq!(entries[0].1.as_deref(), Some("T1"));

        let hidden = SupervisorContext::uptimes(registry.as_ref(), Some("OTHER"));
        assert_eq!(hidden[0].1, None);
    }
}
