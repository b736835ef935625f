pub mod loader;
pub mod schema;

pub use loader::{child_env, load_config, load_default_config};
pub use schema::{
    AgentConfig, AppConfig, Credentials, SandboxSettings, SearchSettings, ServerConfig,
    SkillsSettings, TraceSettings,
};
